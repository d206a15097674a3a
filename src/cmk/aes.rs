//! The symmetric CMK variant: an ordered list of raw 256-bit backing keys.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::{b64, ImportParams, KeyMetadata};
use crate::envelope;
use crate::error::{KmsError, KmsResult};
use crate::rand::random_256;

const ROTATION_PERIOD_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AesKey {
    pub metadata: KeyMetadata,
    #[serde(with = "b64::vec_of_bytes")]
    pub backing_keys: Vec<Vec<u8>>,
    pub next_rotation: i64,
    pub import_params: Option<ImportParams>,
}

impl Drop for AesKey {
    fn drop(&mut self) {
        for k in &mut self.backing_keys {
            k.zeroize();
        }
    }
}

impl AesKey {
    pub fn new(metadata: KeyMetadata) -> Self {
        Self {
            metadata,
            backing_keys: vec![random_256().to_vec()],
            next_rotation: 0,
            import_params: None,
        }
    }

    /// An External-origin key that starts with no material at all.
    pub fn new_pending_import(metadata: KeyMetadata) -> Self {
        Self {
            metadata,
            backing_keys: Vec::new(),
            next_rotation: 0,
            import_params: None,
        }
    }

    pub fn newest_version(&self) -> KmsResult<u32> {
        if self.backing_keys.is_empty() {
            return Err(KmsError::InvalidState(
                "key has no backing material".to_string(),
            ));
        }
        Ok((self.backing_keys.len() - 1) as u32)
    }

    pub fn backing_key(&self, version: u32) -> KmsResult<&[u8]> {
        self.backing_keys
            .get(version as usize)
            .map(|v| v.as_slice())
            .ok_or_else(|| KmsError::InvalidCiphertext("unknown backing key version".to_string()))
    }

    /// Applied on every `load_key` for an AES key: §3 Lifecycle "Rotation".
    pub fn rotate_if_needed(&mut self, now: i64) -> bool {
        if self.next_rotation != 0 && self.next_rotation < now && self.metadata.enabled {
            self.backing_keys.push(random_256().to_vec());
            self.next_rotation = now + ROTATION_PERIOD_SECS;
            true
        } else {
            false
        }
    }

    pub fn enable_rotation(&mut self, now: i64) {
        if self.next_rotation == 0 {
            self.next_rotation = now + ROTATION_PERIOD_SECS;
        }
    }

    pub fn disable_rotation(&mut self) {
        self.next_rotation = 0;
    }

    pub fn rotation_enabled(&self) -> bool {
        self.next_rotation != 0
    }

    /// AES-256-GCM encrypt under the newest backing key, wrapped in the
    /// ciphertext envelope (component B, component D).
    pub fn encrypt_and_package(
        &self,
        plaintext: &[u8],
        context: &std::collections::BTreeMap<String, Option<String>>,
    ) -> KmsResult<Vec<u8>> {
        let version = self.newest_version()?;
        let key = self.backing_key(version)?;
        let payload = crate::crypto::symmetric::encrypt(key, plaintext, context)?;
        Ok(envelope::pack(&self.metadata.arn, version, &payload))
    }

    /// Decrypt a payload (post-envelope-unpack) produced at `version`.
    pub fn decrypt(
        &self,
        version: u32,
        payload: &[u8],
        context: &std::collections::BTreeMap<String, Option<String>>,
    ) -> KmsResult<Vec<u8>> {
        let key = self.backing_key(version)?;
        crate::crypto::symmetric::decrypt(key, payload, context)
    }

    pub fn set_import_params(&mut self, params: ImportParams) {
        self.import_params = Some(params);
    }

    pub fn take_import_params(&self) -> KmsResult<&ImportParams> {
        self.import_params
            .as_ref()
            .ok_or_else(|| KmsError::InvalidState("no import in progress for this key".to_string()))
    }

    /// §4.D Import-key-material flow: idempotent re-import, reject mismatches.
    pub fn import_key_material(&mut self, material: Vec<u8>) -> KmsResult<()> {
        if material.len() != 32 {
            return Err(KmsError::IncorrectKeyMaterial(
                "imported key material must be exactly 32 bytes".to_string(),
            ));
        }
        if let Some(existing) = self.backing_keys.last() {
            if existing.as_slice() != material.as_slice() {
                return Err(KmsError::IncorrectKeyMaterial(
                    "imported key material does not match previously imported material"
                        .to_string(),
                ));
            }
        } else {
            self.backing_keys.push(material);
        }
        Ok(())
    }

    pub fn delete_imported_key_material(&mut self) {
        // Material is retained internally; re-import must still match it.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmk::{CustomerMasterKeySpec, KeyOrigin, KeyState, KeyUsage};
    use std::collections::BTreeMap;

    fn metadata() -> KeyMetadata {
        KeyMetadata {
            account_id: "111122223333".into(),
            region: "eu-west-2".into(),
            arn: "arn:aws:kms:eu-west-2:111122223333:key/test".into(),
            key_id: "test".into(),
            description: String::new(),
            policy: String::new(),
            creation_date: 0,
            deletion_date: 0,
            enabled: true,
            state: KeyState::Enabled,
            origin: KeyOrigin::AwsKms,
            usage: KeyUsage::EncryptDecrypt,
            spec: CustomerMasterKeySpec::SymmetricDefault,
            key_manager: "CUSTOMER".into(),
            expiration_model: None,
            valid_to: 0,
            signing_algorithms: vec![],
            encryption_algorithms: vec![super::super::EncryptionAlgorithm::SymmetricDefault],
        }
    }

    #[test]
    fn round_trip_encrypt_decrypt() {
        let key = AesKey::new(metadata());
        let ctx = BTreeMap::new();
        let envelope_bytes = key.encrypt_and_package(b"hello", &ctx).unwrap();
        let (ident, version, payload) = envelope::unpack(&envelope_bytes).unwrap();
        assert_eq!(ident, key.metadata.arn);
        let plaintext = key.decrypt(version, &payload, &ctx).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn rotation_keeps_old_ciphertexts_decryptable() {
        let mut key = AesKey::new(metadata());
        let ctx = BTreeMap::new();
        let old_envelope = key.encrypt_and_package(b"old", &ctx).unwrap();

        key.next_rotation = 1;
        assert!(key.rotate_if_needed(1_000_000));
        assert_eq!(key.backing_keys.len(), 2);

        let (_, version, payload) = envelope::unpack(&old_envelope).unwrap();
        assert_eq!(key.decrypt(version, &payload, &ctx).unwrap(), b"old");

        let new_envelope = key.encrypt_and_package(b"new", &ctx).unwrap();
        let (_, new_version, _) = envelope::unpack(&new_envelope).unwrap();
        assert_eq!(new_version, 1);
    }

    #[test]
    fn import_idempotence() {
        let mut key = AesKey::new_pending_import(metadata());
        let material = vec![7u8; 32];
        key.import_key_material(material.clone()).unwrap();
        // Re-importing the same material is fine.
        key.import_key_material(material).unwrap();
        // Different material is rejected.
        let err = key.import_key_material(vec![9u8; 32]).unwrap_err();
        assert_eq!(err.kind(), "IncorrectKeyMaterialException");
    }

    #[test]
    fn import_rejects_wrong_length() {
        let mut key = AesKey::new_pending_import(metadata());
        let err = key.import_key_material(vec![1u8; 16]).unwrap_err();
        assert_eq!(err.kind(), "IncorrectKeyMaterialException");
    }
}
