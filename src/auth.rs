//! Password hashing and bearer token issuing.
//!
//! Passwords are pre-hashed with SHA-256 (hex) before argon2. The pre-hash
//! gives argon2 a fixed-length input and sidesteps the 72-byte style input
//! ceilings some password hashers impose. Verification must apply the same
//! pre-hash, and existing digests depend on it staying in place.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{Duration, Utc};
use eyre::{eyre, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AuthConfig;

/// JWT claims carried by access tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id
    pub sub: String,
    /// Expiry, seconds since epoch
    pub exp: i64,
}

fn prehash(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Hash a password into a PHC-format argon2 digest.
pub fn hash_password(password: &str) -> Result<String> {
    let normalized = prehash(password);
    let salt = SaltString::generate(&mut OsRng);
    let digest = Argon2::default()
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|e| eyre!("failed to hash password: {}", e))?;
    Ok(digest.to_string())
}

/// Verify a password against a stored digest. A malformed digest is an
/// error; a mismatching password is `Ok(false)`.
pub fn verify_password(password: &str, digest: &str) -> Result<bool> {
    let normalized = prehash(password);
    let parsed = PasswordHash::new(digest).map_err(|e| eyre!("malformed password digest: {}", e))?;
    Ok(Argon2::default()
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok())
}

fn algorithm(cfg: &AuthConfig) -> Result<Algorithm> {
    match cfg.jwt_algorithm.as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(eyre!("unsupported JWT algorithm: {}", other)),
    }
}

/// Mint a signed access token for a principal.
pub fn create_access_token(subject: Uuid, cfg: &AuthConfig) -> Result<String> {
    let expire = Utc::now() + Duration::minutes(cfg.jwt_exp_minutes);
    let claims = Claims {
        sub: subject.to_string(),
        exp: expire.timestamp(),
    };
    encode(
        &Header::new(algorithm(cfg)?),
        &claims,
        &EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
    )
    .map_err(|e| eyre!("failed to sign token: {}", e))
}

/// Validate a token and extract the principal id. Fails on bad signature,
/// wrong algorithm, expiry, or a subject that is not a UUID.
pub fn decode_access_token(token: &str, cfg: &AuthConfig) -> Result<Uuid> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        &Validation::new(algorithm(cfg)?),
    )
    .map_err(|e| eyre!("invalid token: {}", e))?;

    Uuid::parse_str(&data.claims.sub).map_err(|e| eyre!("invalid token subject: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "test-secret".to_string(),
            jwt_algorithm: "HS256".to_string(),
            jwt_exp_minutes: 60,
        }
    }

    #[test]
    fn test_hash_and_verify_roundtrip() {
        let digest = hash_password("pw12345678").unwrap();
        assert!(digest.starts_with("$argon2"));
        assert!(verify_password("pw12345678", &digest).unwrap());
        assert!(!verify_password("wrong-password", &digest).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("pw12345678").unwrap();
        let b = hash_password("pw12345678").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_long_passwords_accepted() {
        // The SHA-256 pre-hash keeps argon2 input at 64 hex chars no matter
        // how long the password is.
        let long = "x".repeat(1024);
        let digest = hash_password(&long).unwrap();
        assert!(verify_password(&long, &digest).unwrap());
        assert!(!verify_password(&"x".repeat(1023), &digest).unwrap());
    }

    #[test]
    fn test_malformed_digest_is_error() {
        assert!(verify_password("pw", "not-a-digest").is_err());
    }

    #[test]
    fn test_token_roundtrip() {
        let cfg = auth_config();
        let subject = Uuid::new_v4();
        let token = create_access_token(subject, &cfg).unwrap();
        assert_eq!(decode_access_token(&token, &cfg).unwrap(), subject);
    }

    #[test]
    fn test_token_wrong_secret_rejected() {
        let cfg = auth_config();
        let token = create_access_token(Uuid::new_v4(), &cfg).unwrap();

        let other = AuthConfig {
            jwt_secret: "other-secret".to_string(),
            ..auth_config()
        };
        assert!(decode_access_token(&token, &other).is_err());
    }

    #[test]
    fn test_token_wrong_algorithm_rejected() {
        let hs384 = AuthConfig {
            jwt_algorithm: "HS384".to_string(),
            ..auth_config()
        };
        let token = create_access_token(Uuid::new_v4(), &hs384).unwrap();
        // Validator pinned to HS256 must reject an HS384 token even though
        // the secret matches.
        assert!(decode_access_token(&token, &auth_config()).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let cfg = auth_config();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            exp: (Utc::now() - Duration::hours(2)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        )
        .unwrap();
        assert!(decode_access_token(&token, &cfg).is_err());
    }

    #[test]
    fn test_non_uuid_subject_rejected() {
        let cfg = auth_config();
        let claims = Claims {
            sub: "not-a-uuid".to_string(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(cfg.jwt_secret.as_bytes()),
        )
        .unwrap();
        assert!(decode_access_token(&token, &cfg).is_err());
    }
}
