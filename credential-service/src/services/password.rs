//! Argon2id password hashing on a bounded blocking pool.

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};
use std::sync::Arc;
use tokio::sync::{OnceCell, Semaphore};

use crate::config::PasswordConfig;
use crate::services::error::ServiceError;
use crate::utils::password::{policy_violations, Password};

pub struct PasswordHasher {
    params: Params,
    policy: PasswordConfig,
    workers: Arc<Semaphore>,
    dummy_hash: OnceCell<String>,
}

impl PasswordHasher {
    pub fn new(config: &PasswordConfig) -> Result<Self, ServiceError> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| anyhow::anyhow!("Invalid argon2 parameters: {}", e))?;

        Ok(Self {
            params,
            policy: config.clone(),
            workers: Arc::new(Semaphore::new(config.hash_workers.max(1))),
            dummy_hash: OnceCell::new(),
        })
    }

    fn argon2(params: Params) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    }

    /// Check strength, then hash.
    pub async fn hash(&self, password: &Password) -> Result<String, ServiceError> {
        self.validate_strength(password.expose())?;
        self.hash_secret(password.expose()).await
    }

    /// Hash without the strength policy (client secrets are random).
    pub async fn hash_secret(&self, secret: &str) -> Result<String, ServiceError> {
        let params = self.params.clone();
        let secret = secret.to_string();
        self.run_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Self::argon2(params)
                .hash_password(secret.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
        })
        .await
    }

    /// Verify against a self-describing encoded hash. A malformed hash never
    /// verifies.
    pub async fn verify(&self, password: &str, encoded_hash: &str) -> Result<bool, ServiceError> {
        let password = password.to_string();
        let encoded_hash = encoded_hash.to_string();
        self.run_blocking(move || {
            let parsed = match PasswordHash::new(&encoded_hash) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(error = %e, "Stored password hash is malformed");
                    return Ok(false);
                }
            };
            // Parameters come from the hash itself, not from current config.
            Ok(Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok())
        })
        .await
    }

    /// Burn the same work as a real verification. Used when the account does
    /// not exist so response timing does not reveal that.
    pub async fn verify_dummy(&self, password: &str) -> Result<(), ServiceError> {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| self.hash_secret("credential-service-dummy-password"))
            .await?
            .clone();
        self.verify(password, &dummy).await?;
        Ok(())
    }

    /// True when the hash was produced with another algorithm, version or
    /// cost than currently configured.
    pub fn needs_rehash(&self, encoded_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(encoded_hash) else {
            return true;
        };
        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return true;
        }
        if parsed.version != Some(Version::V0x13.into()) {
            return true;
        }
        match Params::try_from(&parsed) {
            Ok(params) => {
                params.m_cost() != self.params.m_cost()
                    || params.t_cost() != self.params.t_cost()
                    || params.p_cost() != self.params.p_cost()
            }
            Err(_) => true,
        }
    }

    pub fn validate_strength(&self, password: &str) -> Result<(), ServiceError> {
        let violations = policy_violations(password, &self.policy);
        if violations.is_empty() {
            return Ok(());
        }
        let message = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(ServiceError::Validation(message))
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, anyhow::Error> + Send + 'static,
    {
        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("Hashing pool closed: {}", e))?;

        let result = tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| anyhow::anyhow!("Hashing task failed: {}", e))??;
        Ok(result)
    }
}
