//! Authentication primitives: password and device-token hashing, access
//! tokens, and API-key encryption at rest.
//!
//! Account storage itself lives behind the admin surface; the gateway
//! only needs the primitives (and their round-trip guarantees).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Access-token lifetime.
const ACCESS_TOKEN_EXPIRE_HOURS: i64 = 72;

/// AES-GCM nonce length (bytes), prepended to the ciphertext.
const NONCE_LEN: usize = 12;

/// Errors from the auth primitives.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Hashing failed: {0}")]
    Hash(String),

    #[error("Token invalid: {0}")]
    Token(String),

    #[error("Encryption failed: {0}")]
    Crypto(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Password / Token Hashing
// ─────────────────────────────────────────────────────────────────────────────

/// Hashes a password with a per-hash random salt.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// Verifies a password against a stored hash.
pub fn verify_password(password: &str, hashed: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hashed) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Hashes a device token (same scheme as passwords).
pub fn hash_token(token: &str) -> Result<String, AuthError> {
    hash_password(token)
}

/// Verifies a device token against a stored hash.
pub fn verify_token(token: &str, hashed: &str) -> bool {
    verify_password(token, hashed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Access Tokens
// ─────────────────────────────────────────────────────────────────────────────

/// JWT payload for an authenticated account.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: i64,
}

/// HS256 signer/verifier derived from the gateway secret.
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issues an access token for a user.
    pub fn issue(&self, user_id: i64, email: &str) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            exp: (Utc::now() + chrono::Duration::hours(ACCESS_TOKEN_EXPIRE_HOURS)).timestamp(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::Token(e.to_string()))
    }

    /// Decodes and validates an access token.
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| AuthError::Token(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API-key Encryption
// ─────────────────────────────────────────────────────────────────────────────

/// AES-256-GCM cipher for API keys at rest, keyed from the SHA-256 of the
/// gateway secret. The random nonce is prepended to the ciphertext and
/// the whole blob is base64-encoded.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(secret: &str) -> Self {
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key).expect("SHA-256 digest is a valid key");
        Self { cipher }
    }

    /// Encrypts a secret for storage. Empty input maps to empty output.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AuthError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AuthError::Crypto(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypts a stored secret. Empty input maps to empty output.
    pub fn decrypt(&self, encoded: &str) -> Result<String, AuthError> {
        if encoded.is_empty() {
            return Ok(String::new());
        }
        let blob = BASE64
            .decode(encoded)
            .map_err(|e| AuthError::Crypto(e.to_string()))?;
        if blob.len() < NONCE_LEN {
            return Err(AuthError::Crypto("ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| AuthError::Crypto(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| AuthError::Crypto(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hashed = hash_password("mypassword").unwrap();
        assert!(verify_password("mypassword", &hashed));
        assert!(!verify_password("wrongpassword", &hashed));
        assert!(!hashed.contains("mypassword"));
    }

    #[test]
    fn password_hash_round_trip_unicode() {
        let hashed = hash_password("密码🔑 pässword").unwrap();
        assert!(verify_password("密码🔑 pässword", &hashed));
        assert!(!verify_password("密码🔑 password", &hashed));
    }

    #[test]
    fn same_password_hashes_differently() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b, "salts must differ");
        assert!(verify_password("same", &a));
        assert!(verify_password("same", &b));
    }

    #[test]
    fn token_hash_round_trip() {
        let hashed = hash_token("device-token-123").unwrap();
        assert!(verify_token("device-token-123", &hashed));
        assert!(!verify_token("wrong-token", &hashed));
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn jwt_issue_and_decode() {
        let signer = TokenSigner::new("test-secret");
        let token = signer.issue(42, "test@example.com").unwrap();
        let claims = signer.decode(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.email, "test@example.com");
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn jwt_rejects_invalid_token() {
        let signer = TokenSigner::new("test-secret");
        assert!(signer.decode("invalid.token.here").is_err());
    }

    #[test]
    fn jwt_rejects_foreign_signature() {
        let signer = TokenSigner::new("secret-a");
        let other = TokenSigner::new("secret-b");
        let token = signer.issue(1, "a@b.com").unwrap();
        assert!(other.decode(&token).is_err());
    }

    #[test]
    fn secret_encryption_round_trip() {
        let cipher = SecretCipher::new("gateway-secret");
        let encrypted = cipher.encrypt("sk-my-api-key-12345").unwrap();
        assert!(!encrypted.contains("sk-my-api-key"));
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "sk-my-api-key-12345");
    }

    #[test]
    fn secret_encryption_round_trip_unicode() {
        let cipher = SecretCipher::new("gateway-secret");
        let encrypted = cipher.encrypt("api-key-with-中文🔐").unwrap();
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), "api-key-with-中文🔐");
    }

    #[test]
    fn empty_secret_maps_to_empty() {
        let cipher = SecretCipher::new("gateway-secret");
        assert_eq!(cipher.encrypt("").unwrap(), "");
        assert_eq!(cipher.decrypt("").unwrap(), "");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = SecretCipher::new("gateway-secret");
        let mut encrypted = cipher.encrypt("payload").unwrap();
        encrypted.replace_range(4..5, if &encrypted[4..5] == "A" { "B" } else { "A" });
        assert!(cipher.decrypt(&encrypted).is_err());
    }
}
