//! Bearer credential extraction from transport carriers.

use http::HeaderMap;

/// Scheme prefix of an `Authorization` value. Case-sensitive, one space.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Name of the credential header on channel-open frames.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Anything that can carry an `Authorization`-style credential.
pub trait CredentialCarrier {
    /// Raw value of the authorization field, if present.
    fn authorization(&self) -> Option<&str>;
}

impl CredentialCarrier for HeaderMap {
    fn authorization(&self) -> Option<&str> {
        self.get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    }
}

/// Return the raw token following `Bearer `, or `None` when the carrier holds
/// no bearer credential.
///
/// `None` means "anonymous", not "invalid": a missing header, another scheme,
/// `bearer ` in a different case, or `Bearer` without the separating space
/// all yield `None`.
pub fn extract_bearer<C: CredentialCarrier + ?Sized>(carrier: &C) -> Option<&str> {
    carrier.authorization()?.strip_prefix(BEARER_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_str(value).unwrap(),
        );
        map
    }

    #[test]
    fn test_missing_header_is_none() {
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }

    #[test]
    fn test_bearer_value_returned_verbatim() {
        assert_eq!(extract_bearer(&headers("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        // Only the prefix is stripped; inner spaces are preserved
        assert_eq!(extract_bearer(&headers("Bearer  padded")), Some(" padded"));
        assert_eq!(extract_bearer(&headers("Bearer ")), Some(""));
    }

    #[test]
    fn test_prefix_is_case_sensitive() {
        assert_eq!(extract_bearer(&headers("bearer abc")), None);
        assert_eq!(extract_bearer(&headers("BEARER abc")), None);
    }

    #[test]
    fn test_prefix_requires_space() {
        assert_eq!(extract_bearer(&headers("Bearerabc")), None);
        assert_eq!(extract_bearer(&headers("Bearer")), None);
    }

    #[test]
    fn test_other_scheme_is_none() {
        assert_eq!(extract_bearer(&headers("Basic dXNlcjpwYXNz")), None);
    }

    #[test]
    fn test_header_name_is_case_insensitive_for_http() {
        let mut map = HeaderMap::new();
        map.insert("authorization", HeaderValue::from_static("Bearer t"));
        assert_eq!(extract_bearer(&map), Some("t"));
    }

    #[test]
    fn test_non_ascii_header_value_is_none() {
        let mut map = HeaderMap::new();
        map.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_bytes(b"Bearer \xff").unwrap(),
        );
        assert_eq!(extract_bearer(&map), None);
    }
}
