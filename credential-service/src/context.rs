//! Per-request context threaded explicitly through every call into the core.

use crate::services::error::ServiceError;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated principal, if any.
    pub user_id: Option<Uuid>,
    /// Organization the request acts in.
    pub organization_id: Option<Uuid>,
    pub deadline: Instant,
    pub correlation_id: String,
    pub ip_address: Option<IpAddr>,
}

impl RequestContext {
    /// Anonymous context with a fresh correlation id.
    pub fn new(timeout: Duration) -> Self {
        Self {
            user_id: None,
            organization_id: None,
            deadline: Instant::now() + timeout,
            correlation_id: Uuid::new_v4().to_string(),
            ip_address: None,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip_address = Some(ip);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn require_user(&self) -> Result<Uuid, ServiceError> {
        self.user_id.ok_or(ServiceError::Unauthenticated)
    }

    pub fn require_organization(&self) -> Result<Uuid, ServiceError> {
        self.organization_id.ok_or_else(|| {
            ServiceError::Validation("organization_id is required".to_string())
        })
    }

    /// Run a store or cache call under this request's deadline.
    pub async fn run<T, E, F>(&self, fut: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<ServiceError>,
    {
        match tokio::time::timeout_at(self.deadline, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(ServiceError::DeadlineExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_maps_elapsed_deadline() {
        let ctx = RequestContext::new(Duration::from_millis(10));
        let result: Result<(), ServiceError> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, ServiceError>(())
            })
            .await;
        assert!(matches!(result, Err(ServiceError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_run_passes_through_result() {
        let ctx = RequestContext::new(Duration::from_secs(1));
        let value = ctx.run(async { Ok::<_, ServiceError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_require_fields() {
        let ctx = RequestContext::new(Duration::from_secs(1));
        assert!(ctx.require_user().is_err());
        let user = Uuid::new_v4();
        assert_eq!(ctx.clone().with_user(user).require_user().unwrap(), user);
        assert!(matches!(
            ctx.require_organization(),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_inbound_correlation_id_is_kept() {
        let ctx = RequestContext::new(Duration::from_secs(1)).with_correlation_id("req-42");
        assert_eq!(ctx.correlation_id, "req-42");
    }
}
