//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier and S256 challenge that bind an authorization
//! request to the token request redeeming its code. The verifier stays in
//! process memory (wrapped in `Secret`); only the challenge leaves the device
//! before the code exchange.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// The only challenge method this library emits.
pub const CHALLENGE_METHOD: &str = "S256";

/// A verifier together with the challenge derived from it.
///
/// Created fresh for every authorization request and never reused.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    verifier: Secret<String>,
    challenge: String,
}

impl PkceChallenge {
    /// Generate a new random verifier and its S256 challenge.
    pub fn generate() -> Self {
        Self::from_verifier(generate_verifier())
    }

    /// Build the pair from a known verifier.
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = compute_challenge(&verifier);
        Self {
            verifier: Secret::new(verifier),
            challenge,
        }
    }

    pub fn verifier(&self) -> &str {
        self.verifier.expose()
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn method(&self) -> &'static str {
        CHALLENGE_METHOD
    }

    /// Whether `verifier` hashes to this pair's challenge.
    pub fn matches(&self, verifier: &str) -> bool {
        compute_challenge(verifier) == self.challenge
    }
}

/// Generate a cryptographically random PKCE code verifier.
///
/// 32 random bytes encoded as URL-safe base64 without padding (43 chars),
/// the minimum length RFC 7636 allows.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate an opaque `state` value for CSRF protection.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 24];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
