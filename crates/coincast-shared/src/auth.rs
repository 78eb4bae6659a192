//! Auth-token verification.
//!
//! Tokens are issued by the external auth service and signed with its
//! Ed25519 key. The hub only verifies them against the configured public
//! key; [`mint_auth_token`] exists for tests and local tooling.
//!
//! Wire form: base64 of the JSON-serialized [`AuthToken`].

use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::UserId;

/// Token signed by the auth service; clients present it on the realtime
/// connection before any other action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub user_id: UserId,
    pub username: String,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
}

/// The verified identity carried by a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Malformed token")]
    Malformed,

    #[error("Token expired")]
    Expired,

    #[error("Bad signature")]
    BadSignature,
}

// payload = user_id (16 bytes) || username || expires_at (rfc3339)
fn signing_payload(user_id: &UserId, username: &str, expires_at: &DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(user_id.0.as_bytes());
    payload.extend_from_slice(username.as_bytes());
    payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
    payload
}

/// Verify a base64 token string against the auth server's public key.
pub fn verify_auth_token(token: &str, auth_pubkey: &[u8; 32]) -> Result<AuthClaims, AuthError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(token)
        .map_err(|_| AuthError::Malformed)?;
    let token: AuthToken = serde_json::from_slice(&raw).map_err(|_| AuthError::Malformed)?;

    if Utc::now() > token.expires_at {
        return Err(AuthError::Expired);
    }

    let verifying_key =
        VerifyingKey::from_bytes(auth_pubkey).map_err(|_| AuthError::BadSignature)?;
    let signature =
        Signature::from_slice(&token.signature).map_err(|_| AuthError::BadSignature)?;

    let payload = signing_payload(&token.user_id, &token.username, &token.expires_at);
    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| AuthError::BadSignature)?;

    Ok(AuthClaims {
        user_id: token.user_id,
        username: token.username,
    })
}

/// Mint a signed token string. The production issuer is the external auth
/// service; this is the test/tooling counterpart.
pub fn mint_auth_token(
    user_id: UserId,
    username: &str,
    expires_at: DateTime<Utc>,
    signing_key: &ed25519_dalek::SigningKey,
) -> String {
    let payload = signing_payload(&user_id, username, &expires_at);
    let signature = signing_key.sign(&payload);

    let token = AuthToken {
        user_id,
        username: username.to_string(),
        expires_at,
        signature: signature.to_bytes().to_vec(),
    };

    let json = serde_json::to_vec(&token).unwrap_or_default();
    base64::engine::general_purpose::STANDARD.encode(json)
}
