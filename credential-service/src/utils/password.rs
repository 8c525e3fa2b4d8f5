use crate::config::PasswordConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Plaintext password. `Debug` is redacted so it can't end up in logs.
#[derive(Debug)]
pub struct Password(SecretString);

impl Password {
    pub fn new(password: String) -> Self {
        Self(SecretString::new(password))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl<'de> Deserialize<'de> for Password {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("Password must be at least {min_length} characters (got {actual_length})")]
    TooShort {
        min_length: usize,
        actual_length: usize,
    },
    #[error("Password must contain at least one uppercase letter")]
    MissingUppercase,
    #[error("Password must contain at least one lowercase letter")]
    MissingLowercase,
    #[error("Password must contain at least one number")]
    MissingNumber,
    #[error("Password must contain at least one special character")]
    MissingSpecial,
}

/// Every strength rule the password breaks, in a stable order.
pub fn policy_violations(password: &str, policy: &PasswordConfig) -> Vec<PolicyError> {
    let mut errors = Vec::new();
    let length = password.chars().count();

    if length < policy.min_length {
        errors.push(PolicyError::TooShort {
            min_length: policy.min_length,
            actual_length: length,
        });
    }
    if policy.require_uppercase && !password.chars().any(char::is_uppercase) {
        errors.push(PolicyError::MissingUppercase);
    }
    if policy.require_lowercase && !password.chars().any(char::is_lowercase) {
        errors.push(PolicyError::MissingLowercase);
    }
    if policy.require_number && !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push(PolicyError::MissingNumber);
    }
    if policy.require_special && !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace())
    {
        errors.push(PolicyError::MissingSpecial);
    }

    errors
}
