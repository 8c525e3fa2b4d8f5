use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub token: TokenConfig,
    pub oauth: OAuthConfig,
    pub password: PasswordConfig,
    pub rate_limit: RateLimitConfig,
    pub lockout: LockoutConfig,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub private_key_path: String,
    pub public_key_path: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    /// Clock skew tolerated on `exp`/`nbf`.
    pub leeway_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub authorization_code_expiry_minutes: i64,
    pub allow_plain_pkce: bool,
    pub client_secret_grace_hours: i64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorization_code_expiry_minutes: 10,
            allow_plain_pkce: false,
            client_secret_grace_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    /// Argon2 memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    /// Concurrent hash/verify operations allowed at once.
    pub hash_workers: usize,
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_number: bool,
    pub require_special: bool,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
            hash_workers: 4,
            min_length: 12,
            require_uppercase: true,
            require_lowercase: true,
            require_number: true,
            require_special: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitRule {
    pub attempts: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_per_ip: RateLimitRule,
    pub login_per_email: RateLimitRule,
    pub register_per_ip: RateLimitRule,
    pub password_reset_per_ip: RateLimitRule,
    pub password_reset_per_email: RateLimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_per_ip: RateLimitRule {
                attempts: 20,
                window_seconds: 900,
            },
            login_per_email: RateLimitRule {
                attempts: 5,
                window_seconds: 900,
            },
            register_per_ip: RateLimitRule {
                attempts: 3,
                window_seconds: 3600,
            },
            password_reset_per_ip: RateLimitRule {
                attempts: 5,
                window_seconds: 3600,
            },
            password_reset_per_email: RateLimitRule {
                attempts: 3,
                window_seconds: 3600,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockoutConfig {
    pub max_failed_attempts: i32,
    pub lockout_minutes: i64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub base_url: String,
}

impl CredentialConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let password_defaults = PasswordConfig::default();
        let limits = RateLimitConfig::default();

        let config = CredentialConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("credential-service"), is_prod)?,
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
                acquire_timeout_secs: parse_env("DATABASE_ACQUIRE_TIMEOUT_SECS", "30", is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", None, is_prod)?,
            },
            token: TokenConfig {
                private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?,
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
                issuer: get_env("JWT_ISSUER", Some("credential-service"), is_prod)?,
                audience: get_env("JWT_AUDIENCE", Some("credential-service"), is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "60",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env(
                    "JWT_REFRESH_TOKEN_EXPIRY_DAYS",
                    "30",
                    is_prod,
                )?,
                leeway_seconds: parse_env("JWT_LEEWAY_SECONDS", "30", is_prod)?,
            },
            oauth: OAuthConfig {
                authorization_code_expiry_minutes: parse_env(
                    "OAUTH_CODE_EXPIRY_MINUTES",
                    "10",
                    is_prod,
                )?,
                allow_plain_pkce: parse_env("OAUTH_ALLOW_PLAIN_PKCE", "false", is_prod)?,
                client_secret_grace_hours: parse_env(
                    "OAUTH_CLIENT_SECRET_GRACE_HOURS",
                    "24",
                    is_prod,
                )?,
            },
            password: PasswordConfig {
                memory_kib: parse_env(
                    "PASSWORD_MEMORY_KIB",
                    &password_defaults.memory_kib.to_string(),
                    is_prod,
                )?,
                iterations: parse_env(
                    "PASSWORD_ITERATIONS",
                    &password_defaults.iterations.to_string(),
                    is_prod,
                )?,
                parallelism: parse_env(
                    "PASSWORD_PARALLELISM",
                    &password_defaults.parallelism.to_string(),
                    is_prod,
                )?,
                hash_workers: parse_env(
                    "PASSWORD_HASH_WORKERS",
                    &password_defaults.hash_workers.to_string(),
                    is_prod,
                )?,
                min_length: parse_env(
                    "PASSWORD_MIN_LENGTH",
                    &password_defaults.min_length.to_string(),
                    is_prod,
                )?,
                require_uppercase: parse_env("PASSWORD_REQUIRE_UPPERCASE", "true", is_prod)?,
                require_lowercase: parse_env("PASSWORD_REQUIRE_LOWERCASE", "true", is_prod)?,
                require_number: parse_env("PASSWORD_REQUIRE_NUMBER", "true", is_prod)?,
                require_special: parse_env("PASSWORD_REQUIRE_SPECIAL", "false", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                login_per_ip: rule_from_env("LOGIN_IP", limits.login_per_ip, is_prod)?,
                login_per_email: rule_from_env("LOGIN_EMAIL", limits.login_per_email, is_prod)?,
                register_per_ip: rule_from_env("REGISTER_IP", limits.register_per_ip, is_prod)?,
                password_reset_per_ip: rule_from_env(
                    "PASSWORD_RESET_IP",
                    limits.password_reset_per_ip,
                    is_prod,
                )?,
                password_reset_per_email: rule_from_env(
                    "PASSWORD_RESET_EMAIL",
                    limits.password_reset_per_email,
                    is_prod,
                )?,
            },
            lockout: LockoutConfig {
                max_failed_attempts: parse_env("LOCKOUT_MAX_FAILED_ATTEMPTS", "5", is_prod)?,
                lockout_minutes: parse_env("LOCKOUT_MINUTES", "15", is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", "587", is_prod)?,
                username: get_env("SMTP_USERNAME", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from_address: get_env("SMTP_FROM", Some("no-reply@localhost"), is_prod)?,
                base_url: get_env("PUBLIC_BASE_URL", Some("http://localhost:3000"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.token.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.token.refresh_token_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.oauth.authorization_code_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OAUTH_CODE_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.password.hash_workers == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASSWORD_HASH_WORKERS must be greater than 0"
            )));
        }

        if self.lockout.max_failed_attempts <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LOCKOUT_MAX_FAILED_ATTEMPTS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.oauth.allow_plain_pkce {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "plain PKCE is not allowed in production"
                )));
            }

            if self.password.min_length < 8 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "PASSWORD_MIN_LENGTH must be at least 8 in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn rule_from_env(
    name: &str,
    default: RateLimitRule,
    is_prod: bool,
) -> Result<RateLimitRule, AppError> {
    Ok(RateLimitRule {
        attempts: parse_env(
            &format!("RATE_LIMIT_{}_ATTEMPTS", name),
            &default.attempts.to_string(),
            is_prod,
        )?,
        window_seconds: parse_env(
            &format!("RATE_LIMIT_{}_WINDOW_SECONDS", name),
            &default.window_seconds.to_string(),
            is_prod,
        )?,
    })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("DEV".parse::<Environment>(), Ok(Environment::Dev));
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Prod));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_get_env_falls_back_to_default_outside_prod() {
        let value = get_env("CREDENTIAL_SERVICE_TEST_UNSET_KEY", Some("fallback"), false).unwrap();
        assert_eq!(value, "fallback");
        assert!(get_env("CREDENTIAL_SERVICE_TEST_UNSET_KEY", Some("fallback"), true).is_err());
        assert!(get_env("CREDENTIAL_SERVICE_TEST_UNSET_KEY", None, false).is_err());
    }
}
