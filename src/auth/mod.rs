//! Authentication: token codec, credential extraction, principal loading.
//!
//! Every entry point runs the same pipeline:
//!
//! ```text
//! carrier ──extract──▶ raw token ──verify──▶ subject id ──load──▶ Principal
//! ```
//!
//! - A carrier without a bearer credential is **anonymous**, not a failure.
//! - Every token failure (malformed, bad signature, expired, unsupported
//!   algorithm) and an unknown subject collapse into [`AuthError::Unauthorized`].
//!   The distinct kind is logged server-side only.
//! - A loader that cannot answer within its budget yields
//!   [`AuthError::Unavailable`], which callers may retry.
//!
//! ## Usage
//!
//! ```ignore
//! let authenticator = Authenticator::from_config(&config, loader)?;
//! let ctx = authenticator
//!     .authenticate_request(&headers, unix_now(), ip, user_agent)
//!     .await?;
//! let me = ctx.require_principal()?;
//! ```

mod authenticator;
mod context;
mod credential;
mod error;
mod principal;
mod token;
mod user_store;

pub use authenticator::{Authentication, Authenticator};
pub use context::RequestContext;
pub use credential::{AUTHORIZATION_HEADER, BEARER_PREFIX, CredentialCarrier, extract_bearer};
pub use error::AuthError;
pub use principal::{Denylist, LoadError, MemoryPrincipalStore, Principal, PrincipalLoader};
pub use token::{TokenCodec, TokenError, fingerprint, unix_now};
pub use user_store::{UserCreate, UserRecord, UserStore};
