//! PKCE (RFC 7636) helpers.

use service_core::utils::{constant_time_eq, random_token, sha256_base64url};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    S256,
    Plain,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::S256 => "S256",
            CodeChallengeMethod::Plain => "plain",
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(CodeChallengeMethod::S256),
            "plain" => Ok(CodeChallengeMethod::Plain),
            other => Err(format!("unsupported code_challenge_method {}", other)),
        }
    }
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

/// 43..=128 characters from the unreserved set.
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len()) && verifier.chars().all(is_unreserved)
}

pub fn is_valid_challenge(challenge: &str, method: CodeChallengeMethod) -> bool {
    match method {
        // base64url(SHA-256) without padding is always 43 characters
        CodeChallengeMethod::S256 => {
            challenge.len() == 43
                && challenge
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }
        CodeChallengeMethod::Plain => is_valid_verifier(challenge),
    }
}

pub fn compute_challenge(verifier: &str, method: CodeChallengeMethod) -> String {
    match method {
        CodeChallengeMethod::S256 => sha256_base64url(verifier),
        CodeChallengeMethod::Plain => verifier.to_string(),
    }
}

/// Constant-time check of `verifier` against a stored challenge. Malformed
/// verifiers fail the same way as wrong ones.
pub fn verify(verifier: &str, challenge: &str, method: CodeChallengeMethod) -> bool {
    if !is_valid_verifier(verifier) {
        return false;
    }
    constant_time_eq(&compute_challenge(verifier, method), challenge)
}

/// Fresh `(code_verifier, S256 code_challenge)` pair.
pub fn generate_pair() -> (String, String) {
    let verifier = random_token(32);
    let challenge = compute_challenge(&verifier, CodeChallengeMethod::S256);
    (verifier, challenge)
}
