//! Bootstrap for a deployment: applies migrations, seeds the system catalog
//! and verifies that every backend answers. The credential core itself is a
//! library driven by the transport in front of it.

use credential_service::{config::CredentialConfig, AppState};
use service_core::observability::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // fail fast on invalid configuration
    let config = CredentialConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.common.log_json,
    )?;

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        "Bootstrapping credential service"
    );

    let state = AppState::connect(&config).await?;
    state.health_check().await?;

    let jwks = state.tokens.jwks();
    tracing::info!(
        key_id = %state.tokens.key_id(),
        keys = jwks.keys.len(),
        access_token_ttl_seconds = state.tokens.access_token_ttl_seconds(),
        "Credential service ready"
    );
    Ok(())
}
