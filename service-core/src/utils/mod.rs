pub mod digest;

pub use digest::{constant_time_eq, random_token, sha256_base64url, sha256_hex};
