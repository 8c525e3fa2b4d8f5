use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use service_core::utils::{random_token, sha256_hex};
use std::fs;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::context::RequestContext;
use crate::models::RefreshToken;
use crate::services::error::ServiceError;
use crate::services::revocation::RevocationStore;
use crate::store::CredentialStore;

/// Issues RS256 access tokens and opaque refresh tokens, and validates
/// access tokens against signature, time window and revocation state.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    key_id: String,
    jwk: JsonWebKey,
    issuer: String,
    audience: String,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
    leeway_seconds: u64,
    store: Arc<dyn CredentialStore>,
    revocation: Arc<RevocationStore>,
}

/// Claims for access tokens (short-lived, never persisted)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Organization the token acts in
    pub org: String,
    /// Role names held in `org`
    pub roles: Vec<String>,
    /// Delegated scope, present on tokens issued to client applications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    /// Issue time in microseconds. Revocation watermarks compare against this
    /// so a token minted right after a revocation is not caught by it.
    pub iat_us: i64,
}

impl AccessTokenClaims {
    pub fn user_id(&self) -> Result<Uuid, ServiceError> {
        Uuid::parse_str(&self.sub).map_err(|_| ServiceError::TokenInvalid)
    }

    pub fn organization_id(&self) -> Result<Uuid, ServiceError> {
        Uuid::parse_str(&self.org).map_err(|_| ServiceError::TokenInvalid)
    }

    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// What an access token asserts.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub roles: Vec<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub jti: String,
}

/// Token response returned to client
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonWebKey {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwkSet {
    pub keys: Vec<JsonWebKey>,
}

fn read_key(path: &str, what: &str) -> Result<String, anyhow::Error> {
    fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {} key from {}: {}", what, path, e))
}

fn public_jwk(public_key_pem: &str) -> Result<JsonWebKey, anyhow::Error> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(public_key_pem))
        .map_err(|e| anyhow::anyhow!("Failed to parse RSA public key: {}", e))?;

    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
    // stable across PEM re-encodings of the same key
    let kid = sha256_hex(&format!("{}.{}", n, e))[..16].to_string();

    Ok(JsonWebKey {
        kty: "RSA".to_string(),
        key_use: "sig".to_string(),
        alg: "RS256".to_string(),
        kid,
        n,
        e,
    })
}

impl TokenService {
    /// Load the RS256 key pair from the configured PEM files.
    pub fn new(
        config: &TokenConfig,
        store: Arc<dyn CredentialStore>,
        revocation: Arc<RevocationStore>,
    ) -> Result<Self, anyhow::Error> {
        let private_key_pem = read_key(&config.private_key_path, "private")?;
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

        let public_key_pem = read_key(&config.public_key_path, "public")?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;
        let jwk = public_jwk(&public_key_pem)?;

        tracing::info!(kid = %jwk.kid, issuer = %config.issuer, "Token service initialized with RS256 keys");

        Ok(Self {
            encoding_key,
            decoding_key,
            key_id: jwk.kid.clone(),
            jwk,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_expiry_minutes: config.access_token_expiry_minutes,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
            leeway_seconds: config.leeway_seconds,
            store,
            revocation,
        })
    }

    pub fn revocation(&self) -> &Arc<RevocationStore> {
        &self.revocation
    }

    pub fn issue_access_token(&self, grant: &AccessGrant) -> Result<IssuedAccessToken, ServiceError> {
        let now = Utc::now();
        let iat = now.timestamp();
        let jti = Uuid::new_v4().to_string();

        let claims = AccessTokenClaims {
            sub: grant.user_id.to_string(),
            org: grant.organization_id.to_string(),
            roles: grant.roles.clone(),
            scope: grant.scope.clone(),
            client_id: grant.client_id.clone(),
            jti: jti.clone(),
            iat,
            nbf: iat,
            exp: iat + self.access_token_ttl_seconds(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat_us: now.timestamp_micros(),
        };

        let token = self.sign(&claims)?;
        Ok(IssuedAccessToken { token, jti })
    }

    /// Persist the hash of a fresh opaque refresh token and return the
    /// plaintext. `family_id = None` starts a new rotation family.
    pub async fn issue_refresh_token(
        &self,
        ctx: &RequestContext,
        grant: &AccessGrant,
        family_id: Option<Uuid>,
    ) -> Result<String, ServiceError> {
        let plaintext = random_token(32);
        let token_hash = sha256_hex(&plaintext);
        let scope = grant.scope.clone().unwrap_or_default();

        let record = match family_id {
            Some(family_id) => RefreshToken::in_family(
                family_id,
                token_hash,
                grant.user_id,
                grant.client_id.clone(),
                grant.organization_id,
                scope,
                self.refresh_token_expiry_days,
            ),
            None => RefreshToken::new(
                token_hash,
                grant.user_id,
                grant.client_id.clone(),
                grant.organization_id,
                scope,
                self.refresh_token_expiry_days,
            ),
        };

        tracing::debug!(
            user_id = %grant.user_id,
            family_id = %record.family_id,
            "Issuing refresh token"
        );
        ctx.run(self.store.insert_refresh_token(record)).await?;

        Ok(plaintext)
    }

    pub async fn issue_token_pair(
        &self,
        ctx: &RequestContext,
        grant: &AccessGrant,
        family_id: Option<Uuid>,
    ) -> Result<TokenPair, ServiceError> {
        // signed before the refresh token is persisted; session revocation
        // relies on this order
        let access = self.issue_access_token(grant)?;
        let refresh_token = self.issue_refresh_token(ctx, grant, family_id).await?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_token_ttl_seconds(),
            scope: grant.scope.clone(),
        })
    }

    /// Signature, issuer, audience and time-window checks only.
    pub fn decode(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.leeway_seconds;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);

        decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature | JwtErrorKind::ImmatureSignature => {
                    ServiceError::TokenExpired
                }
                _ => {
                    tracing::debug!(error = %e, "Access token rejected");
                    ServiceError::TokenInvalid
                }
            })
    }

    /// Full validation: `decode` plus denylist and watermark checks.
    pub async fn validate(
        &self,
        ctx: &RequestContext,
        token: &str,
    ) -> Result<AccessTokenClaims, ServiceError> {
        let claims = self.decode(token)?;
        self.revocation.check(ctx, &claims).await?;
        Ok(claims)
    }

    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.jwk.clone()],
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    /// Longest time an issued access token can still pass `decode`.
    pub fn max_token_lifetime_seconds(config: &TokenConfig) -> u64 {
        (config.access_token_expiry_minutes.max(0) as u64) * 60 + config.leeway_seconds
    }

    fn sign(&self, claims: &AccessTokenClaims) -> Result<String, ServiceError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.clone());
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::redis::MemoryKeyValueStore;
    use crate::store::memory::InMemoryCredentialStore;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/signing_key.pem");
    const PUBLIC_KEY: &str = include_str!("../../tests/fixtures/signing_key.pub.pem");
    const OTHER_PRIVATE_KEY: &str = include_str!("../../tests/fixtures/other_key.pem");
    const OTHER_PUBLIC_KEY: &str = include_str!("../../tests/fixtures/other_key.pub.pem");

    fn write_key(pem: &str) -> Result<NamedTempFile, anyhow::Error> {
        let mut file = NamedTempFile::new()?;
        file.write_all(pem.as_bytes())?;
        Ok(file)
    }

    struct Fixture {
        service: TokenService,
        store: Arc<InMemoryCredentialStore>,
        _keys: (NamedTempFile, NamedTempFile),
    }

    fn fixture_with(private: &str, public: &str, audience: &str) -> Result<Fixture, anyhow::Error> {
        let private_file = write_key(private)?;
        let public_file = write_key(public)?;

        let config = TokenConfig {
            private_key_path: private_file.path().to_string_lossy().to_string(),
            public_key_path: public_file.path().to_string_lossy().to_string(),
            issuer: "credential-service".to_string(),
            audience: audience.to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            leeway_seconds: 0,
        };

        let store = Arc::new(InMemoryCredentialStore::new());
        let revocation = Arc::new(RevocationStore::new(
            Arc::new(MemoryKeyValueStore::new()),
            store.clone(),
            TokenService::max_token_lifetime_seconds(&config),
        ));
        let service = TokenService::new(&config, store.clone(), revocation)?;

        Ok(Fixture {
            service,
            store,
            _keys: (private_file, public_file),
        })
    }

    fn fixture() -> Result<Fixture, anyhow::Error> {
        fixture_with(PRIVATE_KEY, PUBLIC_KEY, "credential-service")
    }

    fn grant() -> AccessGrant {
        AccessGrant {
            user_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            roles: vec!["admin".to_string()],
            scope: Some("profile email".to_string()),
            client_id: Some("abc123".to_string()),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_access_token_round_trip() -> Result<(), anyhow::Error> {
        let fx = fixture()?;
        let grant = grant();

        let issued = fx.service.issue_access_token(&grant)?;
        let claims = fx.service.validate(&ctx(), &issued.token).await?;

        assert_eq!(claims.user_id()?, grant.user_id);
        assert_eq!(claims.organization_id()?, grant.organization_id);
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.roles, vec!["admin"]);
        assert_eq!(claims.scopes(), vec!["profile", "email"]);
        assert_eq!(claims.exp - claims.iat, 15 * 60);

        let header = jsonwebtoken::decode_header(&issued.token)?;
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some(fx.service.key_id()));
        Ok(())
    }

    #[tokio::test]
    async fn test_every_token_gets_a_unique_jti() -> Result<(), anyhow::Error> {
        let fx = fixture()?;
        let a = fx.service.issue_access_token(&grant())?;
        let b = fx.service.issue_access_token(&grant())?;
        assert_ne!(a.jti, b.jti);
        Ok(())
    }

    #[test]
    fn test_expired_token_is_token_expired() -> Result<(), anyhow::Error> {
        let fx = fixture()?;
        let issued = fx.service.issue_access_token(&grant())?;
        let mut claims = fx.service.decode(&issued.token).unwrap();
        claims.iat -= 7200;
        claims.nbf -= 7200;
        claims.exp -= 7200;

        let stale = fx.service.sign(&claims).unwrap();
        assert!(matches!(
            fx.service.decode(&stale),
            Err(ServiceError::TokenExpired)
        ));
        Ok(())
    }

    #[test]
    fn test_not_yet_valid_token_is_rejected() -> Result<(), anyhow::Error> {
        let fx = fixture()?;
        let issued = fx.service.issue_access_token(&grant())?;
        let mut claims = fx.service.decode(&issued.token).unwrap();
        claims.nbf += 3600;

        let early = fx.service.sign(&claims).unwrap();
        assert!(matches!(
            fx.service.decode(&early),
            Err(ServiceError::TokenExpired)
        ));
        Ok(())
    }

    #[test]
    fn test_foreign_signature_and_audience_are_invalid() -> Result<(), anyhow::Error> {
        let fx = fixture()?;
        let other = fixture_with(OTHER_PRIVATE_KEY, OTHER_PUBLIC_KEY, "credential-service")?;
        let forged = other.service.issue_access_token(&grant())?;
        assert!(matches!(
            fx.service.decode(&forged.token),
            Err(ServiceError::TokenInvalid)
        ));

        let elsewhere = fixture_with(PRIVATE_KEY, PUBLIC_KEY, "another-audience")?;
        let token = elsewhere.service.issue_access_token(&grant())?;
        assert!(matches!(
            fx.service.decode(&token.token),
            Err(ServiceError::TokenInvalid)
        ));

        assert!(matches!(
            fx.service.decode("not.a.jwt"),
            Err(ServiceError::TokenInvalid)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_revoked_jti_fails_validation() -> Result<(), anyhow::Error> {
        let fx = fixture()?;
        let issued = fx.service.issue_access_token(&grant())?;
        let claims = fx.service.decode(&issued.token)?;

        fx.service
            .revocation()
            .revoke_token(&ctx(), &claims.jti, claims.exp)
            .await?;

        assert!(matches!(
            fx.service.validate(&ctx(), &issued.token).await,
            Err(ServiceError::TokenRevoked)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_refresh_token_is_stored_hashed() -> Result<(), anyhow::Error> {
        let fx = fixture()?;
        let grant = grant();

        let pair = fx.service.issue_token_pair(&ctx(), &grant, None).await?;
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);

        assert!(fx.store.find_refresh_token(&pair.refresh_token).await?.is_none());
        let stored = fx
            .store
            .find_refresh_token(&sha256_hex(&pair.refresh_token))
            .await?
            .unwrap();
        assert_eq!(stored.user_id, grant.user_id);
        assert_eq!(stored.client_id.as_deref(), Some("abc123"));
        assert_eq!(stored.scope, "profile email");

        let rotated = fx
            .service
            .issue_refresh_token(&ctx(), &grant, Some(stored.family_id))
            .await?;
        let next = fx
            .store
            .find_refresh_token(&sha256_hex(&rotated))
            .await?
            .unwrap();
        assert_eq!(next.family_id, stored.family_id);
        Ok(())
    }

    #[test]
    fn test_jwks_publishes_the_verification_key() -> Result<(), anyhow::Error> {
        let fx = fixture()?;
        let jwks = fx.service.jwks();

        assert_eq!(jwks.keys.len(), 1);
        let key = &jwks.keys[0];
        assert_eq!(key.kty, "RSA");
        assert_eq!(key.alg, "RS256");
        assert_eq!(key.kid, fx.service.key_id());
        assert_eq!(key.e, "AQAB");

        // the published modulus verifies our own tokens
        let decoding = DecodingKey::from_rsa_components(&key.n, &key.e)?;
        let issued = fx.service.issue_access_token(&grant())?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["credential-service"]);
        assert!(decode::<AccessTokenClaims>(&issued.token, &decoding, &validation).is_ok());

        let json = serde_json::to_value(&jwks)?;
        assert_eq!(json["keys"][0]["use"], "sig");
        Ok(())
    }

    #[test]
    fn test_missing_key_file_fails() {
        let config = TokenConfig {
            private_key_path: "/nonexistent/private.pem".to_string(),
            public_key_path: "/nonexistent/public.pem".to_string(),
            issuer: "i".to_string(),
            audience: "a".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
            leeway_seconds: 0,
        };
        let store = Arc::new(InMemoryCredentialStore::new());
        let revocation = Arc::new(RevocationStore::new(
            Arc::new(MemoryKeyValueStore::new()),
            store.clone(),
            900,
        ));
        assert!(TokenService::new(&config, store, revocation).is_err());
    }
}
