use crate::error::IdentityError;
use crate::events::Registration;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Claims issued by the identity provider for `register-user`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // External user ID, becomes the DM identity
    pub aud: String,
    pub iss: String,
    pub exp: usize,
    pub iat: usize,
}

// NIST SP 800-63B recommends 112 bits minimum for secrets
const MIN_ENTROPY_BITS: f64 = 80.0;

/// Shannon entropy of a string in bits, from its character frequency distribution.
fn calculate_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    let len = s.len() as f64;
    let per_char: f64 = freq
        .values()
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum();

    per_char * len
}

/// Checks `register-user` payloads.
///
/// Without a secret the bare identity is trusted as sent. With a secret the
/// client must present a provider-signed HS256 token and the bound identity
/// is its `sub` claim.
#[derive(Clone)]
pub struct IdentityVerifier {
    secret: String,
    audience: String,
    issuer: String,
    pub enabled: bool,
}

impl IdentityVerifier {
    pub fn from_env() -> Self {
        let secret = std::env::var("IDENTITY_JWT_SECRET").unwrap_or_default();
        let audience = std::env::var("IDENTITY_JWT_AUDIENCE").unwrap_or_else(|_| "listen-party".to_string());
        let issuer = std::env::var("IDENTITY_JWT_ISSUER").unwrap_or_else(|_| "identity-provider".to_string());

        if secret.is_empty() {
            log::warn!("IDENTITY_JWT_SECRET not set, register-user identities are NOT verified");
        } else {
            // Lengths are not logged to avoid leaking anything about the secret
            if secret.len() < 32 {
                log::warn!("IDENTITY_JWT_SECRET is too short. Use at least 32 characters.");
            }
            let entropy = calculate_entropy(&secret);
            if entropy < MIN_ENTROPY_BITS {
                log::warn!(
                    "IDENTITY_JWT_SECRET has low entropy ({:.1} bits, minimum recommended: {:.0} bits). \
                     Use a cryptographically random secret.",
                    entropy,
                    MIN_ENTROPY_BITS
                );
            }
        }

        Self::new(secret, audience, issuer)
    }

    pub fn new(secret: String, audience: String, issuer: String) -> Self {
        let enabled = !secret.is_empty();
        Self { secret, audience, issuer, enabled }
    }

    pub fn disabled() -> Self {
        Self::new(String::new(), String::new(), String::new())
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;
        validation.leeway = 60; // seconds of clock skew tolerated

        let data = decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &validation)?;
        Ok(data.claims)
    }

    /// Returns the identity to bind for a `register-user` payload.
    pub fn resolve(&self, registration: &Registration) -> Result<String, IdentityError> {
        let identity = match (self.enabled, registration) {
            (false, Registration::Identity(identity)) => identity.clone(),
            (false, Registration::Token { .. }) => return Err(IdentityError::VerificationDisabled),
            (true, Registration::Token { token }) => self.validate_token(token)?.sub,
            (true, Registration::Identity(_)) => return Err(IdentityError::TokenRequired),
        };
        if identity.trim().is_empty() {
            return Err(IdentityError::EmptyIdentity);
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::now_ms;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-with-at-least-32-characters-here";

    fn verifier() -> IdentityVerifier {
        IdentityVerifier::new(SECRET.to_string(), "listen-party".to_string(), "idp".to_string())
    }

    fn token(sub: &str, aud: &str, secret: &str) -> String {
        let now = (now_ms() / 1000) as usize;
        let claims = Claims { sub: sub.to_string(), aud: aud.to_string(), iss: "idp".to_string(), exp: now + 3600, iat: now };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_entropy_empty_string() {
        assert_eq!(calculate_entropy(""), 0.0);
    }

    #[test]
    fn test_entropy_single_char() {
        let entropy = calculate_entropy("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert!(entropy < 1.0, "Repeated single char should have near-zero entropy");
    }

    #[test]
    fn test_entropy_random_looking() {
        let entropy = calculate_entropy("aB3$xY9!pQ2@wE5#rT8^uI1&oP4*");
        assert!(entropy > MIN_ENTROPY_BITS, "Random-looking string should have high entropy: {}", entropy);
    }

    #[test]
    fn test_entropy_weak_pattern() {
        let entropy = calculate_entropy("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaabb");
        assert!(entropy < MIN_ENTROPY_BITS, "Weak pattern should have low entropy: {}", entropy);
    }

    #[test]
    fn test_disabled_accepts_bare_identity() {
        let verifier = IdentityVerifier::disabled();
        assert!(!verifier.enabled);
        let identity = verifier.resolve(&Registration::Identity("user_2abc".to_string())).unwrap();
        assert_eq!(identity, "user_2abc");
    }

    #[test]
    fn test_disabled_rejects_token_and_blank_identity() {
        let verifier = IdentityVerifier::disabled();
        assert!(matches!(
            verifier.resolve(&Registration::Token { token: "a.b.c".to_string() }),
            Err(IdentityError::VerificationDisabled)
        ));
        assert!(matches!(
            verifier.resolve(&Registration::Identity("  ".to_string())),
            Err(IdentityError::EmptyIdentity)
        ));
    }

    #[test]
    fn test_enabled_requires_token() {
        assert!(matches!(
            verifier().resolve(&Registration::Identity("alice".to_string())),
            Err(IdentityError::TokenRequired)
        ));
    }

    #[test]
    fn test_enabled_binds_subject_claim() {
        let registration = Registration::Token { token: token("alice", "listen-party", SECRET) };
        assert_eq!(verifier().resolve(&registration).unwrap(), "alice");
    }

    #[test]
    fn test_wrong_audience_or_secret_rejected() {
        let wrong_aud = Registration::Token { token: token("alice", "someone-else", SECRET) };
        assert!(matches!(verifier().resolve(&wrong_aud), Err(IdentityError::InvalidToken(_))));

        let forged = Registration::Token { token: token("alice", "listen-party", "another-secret-of-sufficient-length!!") };
        assert!(matches!(verifier().resolve(&forged), Err(IdentityError::InvalidToken(_))));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(verifier().validate_token("invalid-token").is_err());
    }
}
