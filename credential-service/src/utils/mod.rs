pub mod password;
pub mod pkce;
pub mod validation;

pub use password::Password;
