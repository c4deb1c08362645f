//! Signed download tokens.
//!
//! A grant mints a short-lived capability binding (file, user, expiry,
//! target URL) under an Ed25519 signature, so a delivery edge holding only
//! the verifying key can check a token without shared state. The signing
//! string format:
//!
//! ```text
//! (download-target): <file_id>
//! user: <user_id>
//! expires: <RFC 3339>
//! url: <target_url>
//! ```

use crate::clock::Clock;
use crate::GateError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A minted download capability.
///
/// `token` is the opaque id handed to clients; the signature binds every
/// other field, so no field can be swapped without failing verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadToken {
    /// Opaque token id (hex SHA-256 of the signature bytes).
    pub token: String,
    /// File this token grants.
    pub file_id: String,
    /// User this token was granted to.
    pub user_id: String,
    /// Hard expiry; one hour after mint by default.
    pub expires_at: DateTime<Utc>,
    /// Resolved external location of the file bytes.
    pub target_url: String,
    /// Base64 Ed25519 signature over the signing string.
    pub signature_b64: String,
}

/// Build the signing string a token signature covers.
///
/// Components delimited by newline, lowercase names, no trailing newline.
pub fn build_token_string(
    file_id: &str,
    user_id: &str,
    expires_at: DateTime<Utc>,
    target_url: &str,
) -> String {
    format!(
        "(download-target): {}\nuser: {}\nexpires: {}\nurl: {}",
        file_id,
        user_id,
        expires_at.to_rfc3339(),
        target_url
    )
}

/// Mints and verifies download tokens with one Ed25519 key pair.
pub struct TokenSigner {
    signing_key: SigningKey,
}

impl TokenSigner {
    /// Build a signer from a hex-encoded 32-byte seed.
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, GateError> {
        let bytes = hex::decode(seed_hex)
            .map_err(|e| GateError::ConfigError(format!("Invalid signing seed hex: {}", e)))?;

        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GateError::ConfigError("Signing seed must be 32 bytes".to_string()))?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Hex-encoded verifying key for distribution to delivery edges.
    pub fn verifying_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Mint a token for one (file, user) pair.
    pub fn mint(
        &self,
        file_id: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
        target_url: &str,
    ) -> DownloadToken {
        let signing_string = build_token_string(file_id, user_id, expires_at, target_url);
        let signature = self.signing_key.sign(signing_string.as_bytes());

        DownloadToken {
            token: hex::encode(Sha256::digest(signature.to_bytes())),
            file_id: file_id.to_string(),
            user_id: user_id.to_string(),
            expires_at,
            target_url: target_url.to_string(),
            signature_b64: STANDARD.encode(signature.to_bytes()),
        }
    }

    /// Verify a token's signature and expiry.
    ///
    /// Fail-closed: bad base64, wrong length, signature mismatch and past
    /// expiry all reject. The signature is checked before the expiry so a
    /// forged token never learns which field was wrong.
    pub fn verify(&self, token: &DownloadToken, clock: &dyn Clock) -> Result<(), GateError> {
        let sig_bytes = STANDARD
            .decode(&token.signature_b64)
            .map_err(|_| GateError::TokenInvalid)?;

        let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|_| GateError::TokenInvalid)?;
        let signature = Signature::from_bytes(&sig_array);

        let signing_string = build_token_string(
            &token.file_id,
            &token.user_id,
            token.expires_at,
            &token.target_url,
        );

        self.signing_key
            .verifying_key()
            .verify(signing_string.as_bytes(), &signature)
            .map_err(|_| GateError::TokenInvalid)?;

        if clock.now_utc() > token.expires_at {
            return Err(GateError::TokenExpired);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::TimeZone;

    // Well-known Ed25519 test vector seed (DO NOT USE IN PRODUCTION).
    const TEST_SEED_HEX: &str =
        "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    fn signer() -> TokenSigner {
        TokenSigner::from_seed_hex(TEST_SEED_HEX).unwrap()
    }

    fn clock_at_noon() -> MockClock {
        MockClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
    }

    fn mint_test_token(signer: &TokenSigner) -> DownloadToken {
        signer.mint(
            "f1",
            "u1",
            Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap(),
            "https://cdn.example.com/f1.bin",
        )
    }

    #[test]
    fn token_string_format() {
        let s = build_token_string(
            "f1",
            "u1",
            Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap(),
            "https://cdn.example.com/f1.bin",
        );
        assert_eq!(
            s,
            "(download-target): f1\n\
             user: u1\n\
             expires: 2025-06-01T13:00:00+00:00\n\
             url: https://cdn.example.com/f1.bin"
        );
        assert!(!s.ends_with('\n'));
    }

    #[test]
    fn mint_then_verify_roundtrip() {
        let signer = signer();
        let token = mint_test_token(&signer);

        assert!(signer.verify(&token, &clock_at_noon()).is_ok());
        // Opaque id is 64 hex chars.
        assert_eq!(token.token.len(), 64);
    }

    #[test]
    fn tampered_field_fails_verification() {
        let signer = signer();

        let mut token = mint_test_token(&signer);
        token.file_id = "f2".to_string();
        assert!(matches!(
            signer.verify(&token, &clock_at_noon()),
            Err(GateError::TokenInvalid)
        ));

        let mut token = mint_test_token(&signer);
        token.user_id = "u2".to_string();
        assert!(matches!(
            signer.verify(&token, &clock_at_noon()),
            Err(GateError::TokenInvalid)
        ));

        let mut token = mint_test_token(&signer);
        token.target_url = "https://evil.example.com/x.bin".to_string();
        assert!(matches!(
            signer.verify(&token, &clock_at_noon()),
            Err(GateError::TokenInvalid)
        ));
    }

    #[test]
    fn garbage_signature_is_invalid_not_a_panic() {
        let signer = signer();

        let mut token = mint_test_token(&signer);
        token.signature_b64 = "not-base64!!!".to_string();
        assert!(matches!(
            signer.verify(&token, &clock_at_noon()),
            Err(GateError::TokenInvalid)
        ));

        let mut token = mint_test_token(&signer);
        token.signature_b64 = STANDARD.encode(b"short");
        assert!(matches!(
            signer.verify(&token, &clock_at_noon()),
            Err(GateError::TokenInvalid)
        ));
    }

    #[test]
    fn expired_token_rejected() {
        let signer = signer();
        let token = mint_test_token(&signer);

        let clock = clock_at_noon();
        clock.advance(chrono::Duration::hours(1) + chrono::Duration::seconds(1));
        assert!(matches!(
            signer.verify(&token, &clock),
            Err(GateError::TokenExpired)
        ));
    }

    #[test]
    fn tokens_never_collide_across_files_or_users() {
        let signer = signer();
        let expires = Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap();

        let a = signer.mint("f1", "u1", expires, "https://cdn.example.com/f1.bin");
        let b = signer.mint("f2", "u1", expires, "https://cdn.example.com/f2.bin");
        let c = signer.mint("f1", "u2", expires, "https://cdn.example.com/f1.bin");

        assert_ne!(a.token, b.token);
        assert_ne!(a.token, c.token);
    }

    #[test]
    fn rejects_bad_seed() {
        assert!(matches!(
            TokenSigner::from_seed_hex("zz"),
            Err(GateError::ConfigError(_))
        ));
        assert!(matches!(
            TokenSigner::from_seed_hex("abcd"),
            Err(GateError::ConfigError(_))
        ));
    }
}
