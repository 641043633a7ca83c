//! Signed keyset cursors for the lead listing
//!
//! A cursor is `base64url(json).base64url(hmac-sha256)`, so clients can
//! neither forge positions nor page through filters they were not given.

use anyhow::{anyhow, Context, Result};
use base64::prelude::*;
use hmac::{Hmac, Mac};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::OnceLock;
use subtle::ConstantTimeEq;

use crate::storage::LeadCursor;

static HMAC_KEY: OnceLock<Vec<u8>> = OnceLock::new();

fn random_key() -> Vec<u8> {
    let mut rng = rand::rng();
    (0..32).map(|_| rng.random::<u8>()).collect()
}

/// Set the signing key. Without a secret a random key is used and cursors
/// stop verifying after a restart.
pub fn init_cursor_hmac_key(secret: Option<&str>) {
    let key = secret.map_or_else(random_key, |s| s.as_bytes().to_vec());
    if HMAC_KEY.set(key).is_err() {
        tracing::debug!("Cursor signing key already initialised");
    }
}

fn hmac_key() -> &'static [u8] {
    HMAC_KEY.get_or_init(random_key)
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorPayload {
    #[serde(rename = "c")]
    created_at: i64,
    #[serde(rename = "i")]
    id: i64,
}

fn sign(payload: &str) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key())
        .map_err(|e| anyhow!("Failed to create HMAC: {e}"))?;
    mac.update(payload.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

pub fn encode_cursor(cursor: &LeadCursor) -> Result<String> {
    let json = serde_json::to_vec(&CursorPayload {
        created_at: cursor.created_at,
        id: cursor.id,
    })?;
    let payload = BASE64_URL_SAFE_NO_PAD.encode(json);
    let signature = BASE64_URL_SAFE_NO_PAD.encode(sign(&payload)?);
    Ok(format!("{payload}.{signature}"))
}

pub fn decode_cursor(raw: &str) -> Result<LeadCursor> {
    let (payload, signature) = raw
        .split_once('.')
        .filter(|(_, sig)| !sig.contains('.'))
        .ok_or_else(|| anyhow!("Invalid cursor format"))?;

    let provided = BASE64_URL_SAFE_NO_PAD
        .decode(signature)
        .context("Invalid cursor signature encoding")?;
    let expected = sign(payload)?;
    if !bool::from(expected.ct_eq(&provided)) {
        return Err(anyhow!("Cursor signature verification failed"));
    }

    let json = BASE64_URL_SAFE_NO_PAD
        .decode(payload)
        .context("Invalid cursor payload encoding")?;
    let data: CursorPayload = serde_json::from_slice(&json).context("Invalid cursor data")?;
    Ok(LeadCursor {
        created_at: data.created_at,
        id: data.id,
    })
}
