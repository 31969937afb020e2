//! Request-scoped identity.

use uuid::Uuid;

use crate::auth::error::AuthError;
use crate::auth::principal::Principal;

/// Identity of one HTTP request, passed explicitly down the handler chain.
///
/// Created by the request authenticator and dropped with the request. It is
/// never stored anywhere shared, so concurrent requests cannot observe each
/// other's principal.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id for log lines of this request
    request_id: Uuid,
    /// Verified principal, or `None` for an anonymous request
    principal: Option<Principal>,
    /// Client IP address (for audit logging)
    ip_address: Option<String>,
    /// Client user agent (for audit logging)
    user_agent: Option<String>,
}

impl RequestContext {
    /// Context for a request that carried a valid credential.
    pub fn authenticated(principal: Principal) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            principal: Some(principal),
            ip_address: None,
            user_agent: None,
        }
    }

    /// Context for a request that carried no credential.
    pub fn anonymous() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            principal: None,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Set client metadata for audit logging.
    pub fn with_client_info(
        mut self,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// The principal, or `Unauthorized` for endpoints that need identity.
    pub fn require_principal(&self) -> Result<&Principal, AuthError> {
        self.principal.as_ref().ok_or(AuthError::Unauthorized)
    }

    pub fn is_anonymous(&self) -> bool {
        self.principal.is_none()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Get a display-friendly name for this request's user.
    pub fn display(&self) -> &str {
        match &self.principal {
            Some(principal) => principal.display(),
            None => "Anonymous",
        }
    }
}
