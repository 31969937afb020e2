//! Extract → verify → load pipeline shared by HTTP requests and channel handshakes.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::auth::context::RequestContext;
use crate::auth::credential::{CredentialCarrier, extract_bearer};
use crate::auth::error::AuthError;
use crate::auth::principal::{LoadError, Principal, PrincipalLoader};
use crate::auth::token::{TokenCodec, fingerprint};
use crate::config::{AuthConfig, ConfigError};

/// Result of authenticating a carrier that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// A valid credential for an existing subject
    Authenticated(Principal),
    /// No credential was offered
    Anonymous,
}

impl Authentication {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Authenticated(principal) => Some(principal),
            Self::Anonymous => None,
        }
    }

    pub fn into_principal(self) -> Option<Principal> {
        match self {
            Self::Authenticated(principal) => Some(principal),
            Self::Anonymous => None,
        }
    }
}

/// Stateless authenticator. One instance serves every request and channel.
pub struct Authenticator {
    codec: Arc<TokenCodec>,
    loader: Arc<dyn PrincipalLoader>,
    load_timeout: Duration,
}

impl Authenticator {
    pub fn new(
        codec: Arc<TokenCodec>,
        loader: Arc<dyn PrincipalLoader>,
        load_timeout: Duration,
    ) -> Self {
        Self {
            codec,
            loader,
            load_timeout,
        }
    }

    /// Build the codec from `config` and wrap `loader`.
    pub fn from_config(
        config: &AuthConfig,
        loader: Arc<dyn PrincipalLoader>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let codec = Arc::new(TokenCodec::new(&config.jwt)?);
        Ok(Self::new(codec, loader, config.loader_timeout()))
    }

    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// Authenticate whatever credential `carrier` holds at time `now`.
    ///
    /// A carrier with no bearer credential is `Anonymous`; whether that is
    /// acceptable is the caller's decision.
    pub async fn authenticate<C: CredentialCarrier + ?Sized>(
        &self,
        carrier: &C,
        now: u64,
    ) -> Result<Authentication, AuthError> {
        match extract_bearer(carrier) {
            Some(token) => self
                .authenticate_token(token, now)
                .await
                .map(Authentication::Authenticated),
            None => Ok(Authentication::Anonymous),
        }
    }

    /// Verify a raw token and load its subject.
    pub async fn authenticate_token(&self, token: &str, now: u64) -> Result<Principal, AuthError> {
        let subject = self.codec.verify(token, now).map_err(|e| {
            warn!(
                kind = e.kind(),
                fingerprint = %fingerprint(token),
                "Token verification failed: {}",
                e
            );
            AuthError::Unauthorized
        })?;

        let loaded = tokio::time::timeout(self.load_timeout, self.loader.load_by_id(subject)).await;

        match loaded {
            Ok(Ok(principal)) => {
                debug!(user_id = %subject, "Token verified and principal loaded");
                Ok(principal)
            }
            Ok(Err(LoadError::NotFound)) => {
                warn!(
                    user_id = %subject,
                    fingerprint = %fingerprint(token),
                    "Token subject no longer exists or is inactive"
                );
                Err(AuthError::Unauthorized)
            }
            Ok(Err(LoadError::Unavailable(msg))) => {
                error!(user_id = %subject, "Principal store unavailable: {}", msg);
                Err(AuthError::Unavailable)
            }
            Err(_) => {
                error!(
                    user_id = %subject,
                    timeout_ms = self.load_timeout.as_millis() as u64,
                    "Principal lookup timed out"
                );
                Err(AuthError::Unavailable)
            }
        }
    }

    /// Authenticate an HTTP request and build its context.
    pub async fn authenticate_request<C: CredentialCarrier + ?Sized>(
        &self,
        carrier: &C,
        now: u64,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<RequestContext, AuthError> {
        let ctx = match self.authenticate(carrier, now).await? {
            Authentication::Authenticated(principal) => RequestContext::authenticated(principal),
            Authentication::Anonymous => RequestContext::anonymous(),
        };
        Ok(ctx.with_client_info(ip_address, user_agent))
    }
}
