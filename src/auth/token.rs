//! Signed session tokens.
//!
//! Tokens are standard JWS compact serializations (JWTs) signed with an HMAC
//! key: `base64url(header).base64url(claims).base64url(signature)`. The claims
//! carry only the subject id and the validity window; everything else about a
//! user is fetched through the principal loader.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{ConfigError, JwtConfig};
use crate::types::UserId;

/// Reasons a token fails verification.
///
/// These are server-side diagnostics only. Callers facing an untrusted peer
/// collapse all of them into `AuthError::Unauthorized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Not three well-formed base64url segments, or unreadable header/claims
    Malformed,
    /// Signature does not match header and payload
    BadSignature,
    /// `now` is past the `exp` claim
    Expired,
    /// Header declares an algorithm other than the configured one
    UnsupportedAlgorithm(String),
    /// Signing failed while issuing
    Signing(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed token"),
            Self::BadSignature => write!(f, "bad signature"),
            Self::Expired => write!(f, "token expired"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm: {}", alg),
            Self::Signing(msg) => write!(f, "signing failed: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}

impl TokenError {
    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::BadSignature => "bad_signature",
            Self::Expired => "expired",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::Signing(_) => "signing",
        }
    }
}

/// Registered claims carried by every token.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    /// Subject id as a decimal string
    sub: String,
    /// Issued at (NumericDate seconds)
    iat: u64,
    /// Expires at (NumericDate seconds)
    exp: u64,
}

/// The only header field inspected before the signature check.
#[derive(Deserialize)]
struct AlgorithmHeader {
    alg: String,
}

/// Issues and verifies tokens with one shared HMAC secret.
///
/// Holds no mutable state; one instance is shared behind an `Arc` by every
/// request and channel worker.
pub struct TokenCodec {
    algorithm: Algorithm,
    algorithm_name: &'static str,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_seconds: u64,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm_name)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec from validated signing settings.
    pub fn new(config: &JwtConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let algorithm_name = hmac_name(config.algorithm)
            .ok_or(ConfigError::UnsupportedAlgorithm(config.algorithm))?;

        // Expiry is checked against the caller's clock, not the system clock.
        let mut validation = Validation::new(config.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let secret = config.secret.as_bytes();

        Ok(Self {
            algorithm: config.algorithm,
            algorithm_name,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl_seconds: config.expiration_seconds,
        })
    }

    /// Token lifetime in seconds.
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Issue a token for `subject`, valid from `now` through `now + ttl` inclusive.
    pub fn issue(&self, subject: UserId, now: u64) -> Result<String, TokenError> {
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl_seconds),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify `token` at time `now` and return its subject.
    ///
    /// Checks run in order: segment structure, declared algorithm, signature,
    /// expiry, subject. Claims are never trusted before the signature passes.
    ///
    /// Everything after the second `.` is the signature segment. Once the
    /// header has been accepted, a signature that does not decode as
    /// base64url is a signature mismatch, not a structural fault.
    pub fn verify(&self, token: &str, now: u64) -> Result<UserId, TokenError> {
        let mut segments = token.splitn(3, '.');
        let (Some(header), Some(payload), Some(signature)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(TokenError::Malformed);
        };

        if header.is_empty() || payload.is_empty() {
            return Err(TokenError::Malformed);
        }

        let header_json = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|_| TokenError::Malformed)?;
        let declared: AlgorithmHeader =
            serde_json::from_slice(&header_json).map_err(|_| TokenError::Malformed)?;

        if declared.alg != self.algorithm_name {
            return Err(TokenError::UnsupportedAlgorithm(declared.alg));
        }

        if signature.is_empty() {
            return Err(TokenError::Malformed);
        }
        URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::BadSignature)?;

        // The HMAC tag is checked by jsonwebtoken through `Mac::verify_slice`,
        // which compares in constant time.
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::InvalidAlgorithm => {
                    TokenError::UnsupportedAlgorithm(declared.alg.clone())
                }
                _ => TokenError::Malformed,
            }
        })?;

        if now > data.claims.exp {
            return Err(TokenError::Expired);
        }

        data.claims
            .sub
            .parse::<UserId>()
            .map_err(|_| TokenError::Malformed)
    }
}

fn hmac_name(algorithm: Algorithm) -> Option<&'static str> {
    match algorithm {
        Algorithm::HS256 => Some("HS256"),
        Algorithm::HS384 => Some("HS384"),
        Algorithm::HS512 => Some("HS512"),
        _ => None,
    }
}

/// Current wall-clock time as NumericDate seconds.
pub fn unix_now() -> u64 {
    jsonwebtoken::get_current_timestamp()
}

/// Short, non-reversible identifier of a token for log correlation.
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    const SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";
    const T0: u64 = 1_700_000_000;

    fn codec() -> TokenCodec {
        TokenCodec::new(&JwtConfig::new(SECRET).with_expiration_seconds(3600)).unwrap()
    }

    fn b64(json: &str) -> String {
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    /// Rebuild a token with its signature bytes altered by `mutate`.
    fn with_signature(token: &str, mutate: impl FnOnce(&mut Vec<u8>)) -> String {
        let (signed, signature) = token.rsplit_once('.').unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(signature).unwrap();
        mutate(&mut bytes);
        format!("{}.{}", signed, URL_SAFE_NO_PAD.encode(bytes))
    }

    #[test]
    fn test_round_trip() {
        let codec = codec();
        let token = codec.issue(UserId::new(42), T0).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(codec.verify(&token, T0), Ok(UserId::new(42)));
    }

    #[test]
    fn test_negative_subject_round_trip() {
        let codec = codec();
        let token = codec.issue(UserId::new(-5), T0).unwrap();
        assert_eq!(codec.verify(&token, T0), Ok(UserId::new(-5)));
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let codec = codec();
        let token = codec.issue(UserId::new(42), T0).unwrap();

        assert_eq!(codec.verify(&token, T0 + 3599), Ok(UserId::new(42)));
        assert_eq!(codec.verify(&token, T0 + 3600), Ok(UserId::new(42)));
        assert_eq!(codec.verify(&token, T0 + 3601), Err(TokenError::Expired));
    }

    #[test]
    fn test_header_uses_configured_algorithm() {
        let codec = TokenCodec::new(
            &JwtConfig::new(format!("{}{}", SECRET, SECRET)).with_algorithm(Algorithm::HS512),
        )
        .unwrap();
        let token = codec.issue(UserId::new(1), T0).unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::HS512);
        assert_eq!(codec.verify(&token, T0), Ok(UserId::new(1)));
    }

    #[test]
    fn test_wrong_secret_is_bad_signature() {
        let issuer = codec();
        let verifier =
            TokenCodec::new(&JwtConfig::new("another-secret-that-is-also-32-bytes!!")).unwrap();

        let token = issuer.issue(UserId::new(42), T0).unwrap();
        assert_eq!(verifier.verify(&token, T0), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_tampered_payload_is_bad_signature() {
        let codec = codec();
        let token = codec.issue(UserId::new(42), T0).unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let forged_payload = b64(&format!(
            r#"{{"sub":"1","iat":{},"exp":{}}}"#,
            T0,
            T0 + 3600
        ));
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(codec.verify(&forged, T0), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_truncated_signature_is_bad_signature() {
        let codec = codec();
        let token = codec.issue(UserId::new(42), T0).unwrap();
        let truncated = with_signature(&token, |sig| {
            sig.pop();
        });

        assert_eq!(codec.verify(&truncated, T0), Err(TokenError::BadSignature));
    }

    #[test]
    fn test_segment_count_is_malformed() {
        let codec = codec();
        let token = codec.issue(UserId::new(42), T0).unwrap();

        assert_eq!(codec.verify("", T0), Err(TokenError::Malformed));
        assert_eq!(codec.verify("abc", T0), Err(TokenError::Malformed));
        assert_eq!(codec.verify("a.b", T0), Err(TokenError::Malformed));
        assert_eq!(codec.verify(".", T0), Err(TokenError::Malformed));

        // A trailing segment lands in the signature, which then fails to match
        assert_eq!(
            codec.verify(&format!("{}.extra", token), T0),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_every_signature_text_bit_flip_is_bad_signature() {
        let codec = codec();
        let token = codec.issue(UserId::new(42), T0).unwrap();
        let (signed, signature) = token.rsplit_once('.').unwrap();

        for index in 0..signature.len() {
            for bit in 0..8 {
                let mut text = signature.as_bytes().to_vec();
                text[index] ^= 1 << bit;
                // High-bit flips are not UTF-8; they reach us as replacement characters
                let flipped = format!("{}.{}", signed, String::from_utf8_lossy(&text));
                assert_eq!(
                    codec.verify(&flipped, T0),
                    Err(TokenError::BadSignature),
                    "byte {} bit {}",
                    index,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_non_alphabet_signature_is_bad_signature() {
        let codec = codec();
        let token = codec.issue(UserId::new(42), T0).unwrap();
        let (signed, signature) = token.rsplit_once('.').unwrap();

        for replacement in ["!", ".", "="] {
            let forged = format!("{}.{}{}", signed, &signature[1..], replacement);
            assert_eq!(codec.verify(&forged, T0), Err(TokenError::BadSignature));
        }
    }

    #[test]
    fn test_maximum_ttl_saturates() {
        let codec = TokenCodec::new(&JwtConfig::new(SECRET).with_expiration_seconds(u64::MAX))
            .unwrap();
        let token = codec.issue(UserId::new(42), T0).unwrap();
        assert_eq!(codec.verify(&token, u64::MAX), Ok(UserId::new(42)));
    }

    #[test]
    fn test_garbage_segments_are_malformed() {
        let codec = codec();
        assert_eq!(codec.verify("!!!.???.***", T0), Err(TokenError::Malformed));

        // Valid base64 but not JSON
        let not_json = format!("{}.{}.{}", b64("nope"), b64("{}"), b64("sig"));
        assert_eq!(codec.verify(&not_json, T0), Err(TokenError::Malformed));

        // Empty header segment
        assert_eq!(codec.verify(".a.b", T0), Err(TokenError::Malformed));
    }

    #[test]
    fn test_none_algorithm_is_unsupported() {
        let codec = codec();
        let token = format!(
            "{}.{}.",
            b64(r#"{"alg":"none","typ":"JWT"}"#),
            b64(&format!(r#"{{"sub":"42","iat":{},"exp":{}}}"#, T0, T0 + 10))
        );

        assert_eq!(
            codec.verify(&token, T0),
            Err(TokenError::UnsupportedAlgorithm("none".to_string()))
        );
    }

    #[test]
    fn test_other_algorithm_is_unsupported() {
        let codec = codec();
        let token = format!(
            "{}.{}.{}",
            b64(r#"{"alg":"RS256","typ":"JWT"}"#),
            b64(r#"{"sub":"42","iat":0,"exp":10}"#),
            b64("sig")
        );

        assert_eq!(
            codec.verify(&token, T0),
            Err(TokenError::UnsupportedAlgorithm("RS256".to_string()))
        );
    }

    #[test]
    fn test_non_numeric_subject_is_malformed() {
        let codec = codec();
        let claims = serde_json::json!({ "sub": "alice", "iat": T0, "exp": T0 + 10 });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(codec.verify(&token, T0), Err(TokenError::Malformed));
    }

    #[test]
    fn test_missing_exp_is_malformed() {
        let codec = codec();
        let claims = serde_json::json!({ "sub": "42", "iat": T0 });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(codec.verify(&token, T0), Err(TokenError::Malformed));
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = fingerprint("token-a");
        assert_eq!(a.len(), 12);
        assert_eq!(a, fingerprint("token-a"));
        assert_ne!(a, fingerprint("token-b"));
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_codec_debug_hides_keys() {
        let rendered = format!("{:?}", codec());
        assert!(rendered.contains("HS256"));
        assert!(!rendered.contains(SECRET));
    }

    #[test]
    fn test_concurrent_issue_and_verify() {
        let codec = Arc::new(codec());
        let handles: Vec<_> = (0..16)
            .map(|worker| {
                let codec = codec.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let subject = UserId::new(worker * 1_000 + i);
                        let now = T0 + i as u64;
                        let token = codec.issue(subject, now).unwrap();
                        assert_eq!(codec.verify(&token, now), Ok(subject));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip(subject in any::<i64>(), now in 0u64..4_000_000_000) {
            let codec = codec();
            let token = codec.issue(UserId::new(subject), now).unwrap();
            prop_assert_eq!(codec.verify(&token, now), Ok(UserId::new(subject)));
        }

        #[test]
        fn prop_signature_bit_flip_is_rejected(
            subject in any::<i64>(),
            byte in 0usize..32,
            bit in 0u8..8,
        ) {
            let codec = codec();
            let token = codec.issue(UserId::new(subject), T0).unwrap();
            let flipped = with_signature(&token, |sig| sig[byte] ^= 1 << bit);
            prop_assert_eq!(codec.verify(&flipped, T0), Err(TokenError::BadSignature));
        }

        #[test]
        fn prop_signature_text_bit_flip_is_rejected(
            subject in any::<i64>(),
            index in 0usize..43,
            bit in 0u8..7,
        ) {
            let codec = codec();
            let token = codec.issue(UserId::new(subject), T0).unwrap();
            let (signed, signature) = token.rsplit_once('.').unwrap();
            let mut text = signature.as_bytes().to_vec();
            text[index] ^= 1 << bit;
            let flipped = format!("{}.{}", signed, String::from_utf8(text).unwrap());
            prop_assert_eq!(codec.verify(&flipped, T0), Err(TokenError::BadSignature));
        }

        #[test]
        fn prop_expired_after_ttl(subject in any::<i64>(), epsilon in 1u64..1_000_000) {
            let codec = codec();
            let token = codec.issue(UserId::new(subject), T0).unwrap();
            prop_assert_eq!(codec.verify(&token, T0 + 3600), Ok(UserId::new(subject)));
            prop_assert_eq!(codec.verify(&token, T0 + 3600 + epsilon), Err(TokenError::Expired));
        }
    }
}
