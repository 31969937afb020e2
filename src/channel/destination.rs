//! Destination routing and identity enforcement.
//!
//! Anonymous channels are stopped here rather than at the handshake: a frame
//! aimed at an identity-scoped prefix is refused when it arrives.
//!
//! Private queues live on the broker as `<queue>-user<id>`. They are reachable
//! only through the user prefix; naming one directly is refused.

use std::fmt;

use crate::config::ChannelConfig;
use crate::types::UserId;

/// Where a `SEND` frame goes after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Application handler; carries the path with the app prefix stripped
    App(String),
    /// Broker destination, delivered to its subscribers
    Broker(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationError {
    /// Frame carries no `destination` header
    Missing,
    /// No configured prefix matches
    Unknown(String),
    /// Identity-scoped destination from an anonymous channel
    IdentityRequired(String),
    /// Matches a prefix but cannot be resolved for this operation
    Invalid(String),
    /// Names another principal's private queue directly
    PrivateQueue(String),
}

impl fmt::Display for DestinationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "Missing destination header"),
            Self::Unknown(dest) => write!(f, "Unknown destination: {}", dest),
            Self::IdentityRequired(dest) => write!(f, "Destination requires authentication: {}", dest),
            Self::Invalid(dest) => write!(f, "Invalid destination: {}", dest),
            Self::PrivateQueue(dest) => write!(f, "Private queue is not addressable: {}", dest),
        }
    }
}

impl std::error::Error for DestinationError {}

/// Resolves destinations against the configured prefixes.
#[derive(Debug, Clone)]
pub struct DestinationPolicy {
    config: ChannelConfig,
}

impl DestinationPolicy {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }

    /// True when `destination` falls under an identity-scoped prefix.
    pub fn requires_identity(&self, destination: &str) -> bool {
        self.config
            .identity_prefixes
            .iter()
            .any(|prefix| under(destination, prefix))
    }

    fn is_broker(&self, destination: &str) -> bool {
        self.config
            .broker_prefixes
            .iter()
            .any(|prefix| under(destination, prefix))
    }

    fn guard(&self, destination: &str, user: Option<UserId>) -> Result<(), DestinationError> {
        if user.is_none() && self.requires_identity(destination) {
            return Err(DestinationError::IdentityRequired(destination.to_string()));
        }
        Ok(())
    }

    /// A raw broker destination, refused when it has the shape of a private queue.
    fn broker_destination(&self, destination: &str) -> Result<String, DestinationError> {
        if is_user_queue(destination) {
            return Err(DestinationError::PrivateQueue(destination.to_string()));
        }
        Ok(destination.to_string())
    }

    /// Resolve the target of a `SEND` frame from a channel bound to `user`.
    ///
    /// `/user/{id}/queue/x` addresses the private queue of user `id`.
    pub fn resolve_send(
        &self,
        destination: &str,
        user: Option<UserId>,
    ) -> Result<Route, DestinationError> {
        self.guard(destination, user)?;

        if let Some(path) = strip(destination, &self.config.app_prefix) {
            return Ok(Route::App(path.to_string()));
        }
        if let Some(rest) = strip(destination, &self.config.user_prefix) {
            let (target, queue) = rest
                .trim_start_matches('/')
                .split_once('/')
                .ok_or_else(|| DestinationError::Invalid(destination.to_string()))?;
            let target: UserId = target
                .parse()
                .map_err(|_| DestinationError::Invalid(destination.to_string()))?;
            let queue = format!("/{}", queue);
            if !self.is_broker(&queue) {
                return Err(DestinationError::Invalid(destination.to_string()));
            }
            return Ok(Route::Broker(user_queue(&queue, target)));
        }
        if self.is_broker(destination) {
            return self.broker_destination(destination).map(Route::Broker);
        }
        Err(DestinationError::Unknown(destination.to_string()))
    }

    /// Resolve the broker destination a `SUBSCRIBE` frame listens on.
    ///
    /// `/user/queue/x` becomes the subscriber's own private queue.
    pub fn resolve_subscribe(
        &self,
        destination: &str,
        user: Option<UserId>,
    ) -> Result<String, DestinationError> {
        self.guard(destination, user)?;

        if let Some(queue) = strip(destination, &self.config.user_prefix) {
            let user = user.ok_or_else(|| DestinationError::IdentityRequired(destination.to_string()))?;
            if !self.is_broker(queue) {
                return Err(DestinationError::Invalid(destination.to_string()));
            }
            return Ok(user_queue(queue, user));
        }
        if self.is_broker(destination) {
            return self.broker_destination(destination);
        }
        if under(destination, &self.config.app_prefix) {
            return Err(DestinationError::Invalid(destination.to_string()));
        }
        Err(DestinationError::Unknown(destination.to_string()))
    }
}

const USER_QUEUE_MARKER: &str = "-user";

/// Private broker destination of `user` for `queue`.
fn user_queue(queue: &str, user: UserId) -> String {
    format!("{}{}{}", queue, USER_QUEUE_MARKER, user)
}

/// True for names produced by [`user_queue`].
fn is_user_queue(destination: &str) -> bool {
    destination
        .rsplit_once(USER_QUEUE_MARKER)
        .is_some_and(|(_, id)| id.parse::<UserId>().is_ok())
}

/// `destination` equals `prefix` or continues it at a `/` boundary.
fn under(destination: &str, prefix: &str) -> bool {
    strip(destination, prefix).is_some()
}

/// Remainder of `destination` after `prefix`, starting with `/`.
fn strip<'a>(destination: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = destination.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DestinationPolicy {
        DestinationPolicy::new(ChannelConfig::default())
    }

    const ME: Option<UserId> = Some(UserId::new(42));

    #[test]
    fn test_requires_identity() {
        let policy = policy();
        assert!(policy.requires_identity("/app/chat"));
        assert!(policy.requires_identity("/queue/notifications"));
        assert!(policy.requires_identity("/user/queue/notifications"));
        assert!(!policy.requires_identity("/topic/feed"));
        // Prefix must end at a segment boundary
        assert!(!policy.requires_identity("/application"));
    }

    #[test]
    fn test_anonymous_send_is_refused_on_identity_prefixes() {
        let policy = policy();
        for dest in ["/app/chat", "/queue/x", "/user/42/queue/x"] {
            assert_eq!(
                policy.resolve_send(dest, None),
                Err(DestinationError::IdentityRequired(dest.to_string()))
            );
        }
        assert_eq!(
            policy.resolve_send("/topic/feed", None),
            Ok(Route::Broker("/topic/feed".to_string()))
        );
    }

    #[test]
    fn test_send_routes() {
        let policy = policy();
        assert_eq!(
            policy.resolve_send("/app/chat.send", ME),
            Ok(Route::App("/chat.send".to_string()))
        );
        assert_eq!(
            policy.resolve_send("/user/7/queue/messages", ME),
            Ok(Route::Broker("/queue/messages-user7".to_string()))
        );
        assert_eq!(
            policy.resolve_send("/queue/jobs", ME),
            Ok(Route::Broker("/queue/jobs".to_string()))
        );
    }

    #[test]
    fn test_send_to_malformed_user_destination() {
        let policy = policy();
        assert!(matches!(
            policy.resolve_send("/user/abc/queue/x", ME),
            Err(DestinationError::Invalid(_))
        ));
        assert!(matches!(
            policy.resolve_send("/user/7", ME),
            Err(DestinationError::Invalid(_))
        ));
        assert!(matches!(
            policy.resolve_send("/user/7/elsewhere/x", ME),
            Err(DestinationError::Invalid(_))
        ));
    }

    #[test]
    fn test_subscribe_resolves_own_queue() {
        let policy = policy();
        assert_eq!(
            policy.resolve_subscribe("/user/queue/messages", ME),
            Ok("/queue/messages-user42".to_string())
        );
        assert_eq!(
            policy.resolve_subscribe("/topic/feed", None),
            Ok("/topic/feed".to_string())
        );
        assert!(matches!(
            policy.resolve_subscribe("/user/queue/messages", None),
            Err(DestinationError::IdentityRequired(_))
        ));
    }

    #[test]
    fn test_user_queues_line_up() {
        // What 7 sends to /user/42/... is what 42 hears on /user/queue/...
        let policy = policy();
        let sent = policy
            .resolve_send("/user/42/queue/messages", Some(UserId::new(7)))
            .unwrap();
        let heard = policy.resolve_subscribe("/user/queue/messages", ME).unwrap();
        assert_eq!(sent, Route::Broker(heard));
    }

    #[test]
    fn test_other_users_queue_is_not_reachable_directly() {
        let policy = policy();
        let intruder = Some(UserId::new(7));
        let private = policy.resolve_subscribe("/user/queue/messages", ME).unwrap();
        assert_eq!(private, "/queue/messages-user42");

        assert_eq!(
            policy.resolve_subscribe(&private, intruder),
            Err(DestinationError::PrivateQueue(private.clone()))
        );
        assert_eq!(
            policy.resolve_send(&private, intruder),
            Err(DestinationError::PrivateQueue(private.clone()))
        );
        // Not even the owner names it directly
        assert!(matches!(
            policy.resolve_subscribe(&private, ME),
            Err(DestinationError::PrivateQueue(_))
        ));
        // Also under the public broker prefix
        assert!(matches!(
            policy.resolve_subscribe("/topic/feed-user42", intruder),
            Err(DestinationError::PrivateQueue(_))
        ));
    }

    #[test]
    fn test_queue_names_resembling_user_queues() {
        let policy = policy();
        assert_eq!(
            policy.resolve_subscribe("/queue/power-user", ME),
            Ok("/queue/power-user".to_string())
        );
        assert_eq!(
            policy.resolve_subscribe("/topic/user42", None),
            Ok("/topic/user42".to_string())
        );
        assert!(is_user_queue("/queue/x-user-3"));
        assert!(!is_user_queue("/queue/x-userabc"));
    }

    #[test]
    fn test_unknown_destinations() {
        let policy = policy();
        assert_eq!(
            policy.resolve_send("/elsewhere", ME),
            Err(DestinationError::Unknown("/elsewhere".to_string()))
        );
        assert!(matches!(
            policy.resolve_subscribe("/app/chat", ME),
            Err(DestinationError::Invalid(_))
        ));
    }
}
