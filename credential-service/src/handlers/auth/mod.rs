pub mod password;
pub mod registration;
pub mod session;

pub use password::{change_password, confirm_password_reset, request_password_reset};
pub use registration::{register, verify_email};
pub use session::{authenticate, authenticate_bearer, introspect, logout};
