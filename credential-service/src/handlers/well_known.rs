use crate::services::JwkSet;
use crate::AppState;

/// Public keys for verifying access tokens offline.
pub fn jwks(state: &AppState) -> JwkSet {
    state.tokens.jwks()
}
