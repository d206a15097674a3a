//! AES-256-GCM authenticated encryption under an encryption context (component D).
//!
//! The encryption context is folded into the AAD by sorting its keys
//! lexicographically and concatenating each key's UTF-8 bytes directly
//! against its optional value's bytes, with no separators or length
//! prefixes. An absent or empty context produces empty AAD.

use std::collections::BTreeMap;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};

use crate::error::{KmsError, KmsResult};
use crate::rand::random_bytes;

const NONCE_LEN: usize = 12;

fn encode_aad(context: &BTreeMap<String, Option<String>>) -> Vec<u8> {
    let mut aad = Vec::new();
    for (key, value) in context {
        aad.extend_from_slice(key.as_bytes());
        if let Some(value) = value {
            aad.extend_from_slice(value.as_bytes());
        }
    }
    aad
}

/// Encrypt `plaintext` under `key` (must be 32 bytes), returning
/// `nonce(12) || ciphertext_with_tag`.
pub fn encrypt(key: &[u8], plaintext: &[u8], context: &BTreeMap<String, Option<String>>) -> KmsResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| KmsError::Internal(format!("invalid AES key: {e}")))?;
    let nonce_bytes = random_bytes(NONCE_LEN);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let aad = encode_aad(context);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &aad })
        .map_err(|e| KmsError::Internal(format!("AES-GCM encryption failed: {e}")))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `nonce(12) || ciphertext_with_tag` payload produced by [`encrypt`].
pub fn decrypt(key: &[u8], payload: &[u8], context: &BTreeMap<String, Option<String>>) -> KmsResult<Vec<u8>> {
    if payload.len() < NONCE_LEN {
        return Err(KmsError::InvalidCiphertext("ciphertext too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| KmsError::Internal(format!("invalid AES key: {e}")))?;
    let nonce = Nonce::from_slice(nonce_bytes);
    let aad = encode_aad(context);

    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad: &aad })
        .map_err(|_| KmsError::InvalidCiphertext("authentication failed".to_string()))
}
