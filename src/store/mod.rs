//! Persistent, ordered key-value store for CMKs, aliases, and tags (component E).
//!
//! Backed by a single embedded `sled` tree, keyed by ARN (or ARN-derived
//! path for tags), the way the teacher's L2 disk cache tier opens and
//! addresses its `sled::Db`. Every record is loaded, and every listing
//! entry is considered, through the same transparent maintenance pass:
//! rotate an AES key whose rotation is due, drop a key/import past its
//! expiry, and persist the result before returning it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cmk::Key;
use crate::error::{KmsError, KmsResult};

const TAG_INFIX: &str = "/tag/";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    pub alias_arn: String,
    pub alias_name: String,
    pub target_key_id: String,
    pub creation_date: i64,
    pub last_updated_date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub tag_key: String,
    pub tag_value: String,
}

/// A page of listing results: `limit+1` entries were considered so the
/// caller knows whether more remain, without exposing the extra entry.
pub struct Page<T> {
    pub items: Vec<T>,
    pub truncated: bool,
    pub next_marker: Option<String>,
}

pub struct Store {
    db: sled::Db,
}

impl Store {
    pub fn open(path: &Path) -> KmsResult<Self> {
        let db = sled::open(path).map_err(|e| KmsError::Internal(format!("failed to open store: {e}")))?;
        Ok(Self { db })
    }

    // -- keys ----------------------------------------------------------

    pub fn save_key(&self, key: &Key) -> KmsResult<()> {
        let encoded = serde_json::to_vec(key).map_err(|e| KmsError::Serialization(e.to_string()))?;
        self.db
            .insert(key.arn().as_bytes(), encoded)
            .map_err(|e| KmsError::Internal(format!("store write failed: {e}")))?;
        Ok(())
    }

    /// Load a key by ARN, applying rotation-on-read, deletion-on-read, and
    /// import-expiry-on-read maintenance before returning it.
    pub fn load_key(&self, arn: &str, now: i64) -> KmsResult<Key> {
        let encoded = self
            .db
            .get(arn.as_bytes())
            .map_err(|e| KmsError::Internal(format!("store read failed: {e}")))?
            .ok_or_else(|| KmsError::NotFound(format!("no such key: {arn}")))?;

        let key: Key = serde_json::from_slice(&encoded).map_err(|e| KmsError::Serialization(e.to_string()))?;

        match self.apply_key_maintenance(key, now)? {
            Some(key) => Ok(key),
            None => Err(KmsError::NotFound(format!("no such key: {arn}"))),
        }
    }

    /// Pure maintenance step, factored out so listing can reuse it without
    /// re-fetching: returns `None` when the key should be treated as gone.
    fn apply_key_maintenance(&self, mut key: Key, now: i64) -> KmsResult<Option<Key>> {
        if let Key::Aes(aes) = &mut key {
            if aes.rotate_if_needed(now) {
                self.save_key(&key)?;
            }
        }

        let metadata = key.metadata();
        if metadata.deletion_date != 0 && metadata.deletion_date < now {
            self.delete_object(metadata.arn.clone())?;
            return Ok(None);
        }

        if metadata.valid_to != 0 && metadata.valid_to < now {
            {
                let metadata = key.metadata_mut();
                metadata.enabled = false;
                metadata.state = crate::cmk::KeyState::PendingImport;
                metadata.expiration_model = None;
                metadata.valid_to = 0;
            }
            self.save_key(&key)?;
        }

        Ok(Some(key))
    }

    /// Keys whose ARN starts with `prefix`, marker-inclusive, `/tag/`
    /// entries excluded. `InvalidMarkerException` if a non-empty marker
    /// never matches an entry in the scan. Fetches one extra entry beyond
    /// `limit` to determine truncation without exposing it.
    pub fn list_keys(&self, prefix: &str, limit: usize, marker: Option<&str>, now: i64) -> KmsResult<Page<Key>> {
        let mut out = Vec::new();
        let mut past_marker = marker.is_none();

        for item in self.db.scan_prefix(prefix.as_bytes()) {
            if out.len() > limit {
                break;
            }
            let (raw_key, raw_value) =
                item.map_err(|e| KmsError::Internal(format!("store scan failed: {e}")))?;
            let entry_key = String::from_utf8_lossy(&raw_key).into_owned();

            if entry_key.contains(TAG_INFIX) {
                continue;
            }

            if !past_marker {
                if Some(entry_key.as_str()) == marker {
                    past_marker = true;
                } else {
                    continue;
                }
            }

            let key: Key = serde_json::from_slice(&raw_value).map_err(|e| KmsError::Serialization(e.to_string()))?;
            if let Some(key) = self.apply_key_maintenance(key, now)? {
                out.push(key);
            }
        }

        if !past_marker {
            return Err(KmsError::InvalidMarker(format!("marker {:?} did not match any key", marker)));
        }
        Ok(paginate(out, limit, |k| k.arn().to_string()))
    }

    pub fn delete_object(&self, key: impl AsRef<[u8]>) -> KmsResult<()> {
        self.db
            .remove(key.as_ref())
            .map_err(|e| KmsError::Internal(format!("store delete failed: {e}")))?;
        Ok(())
    }

    // -- aliases ---------------------------------------------------------

    pub fn save_alias(&self, alias: &Alias) -> KmsResult<()> {
        let encoded = serde_json::to_vec(alias).map_err(|e| KmsError::Serialization(e.to_string()))?;
        self.db
            .insert(alias.alias_arn.as_bytes(), encoded)
            .map_err(|e| KmsError::Internal(format!("store write failed: {e}")))?;
        Ok(())
    }

    pub fn load_alias(&self, alias_arn: &str) -> KmsResult<Alias> {
        let encoded = self
            .db
            .get(alias_arn.as_bytes())
            .map_err(|e| KmsError::Internal(format!("store read failed: {e}")))?
            .ok_or_else(|| KmsError::NotFound(format!("no such alias: {alias_arn}")))?;
        serde_json::from_slice(&encoded).map_err(|e| KmsError::Serialization(e.to_string()))
    }

    /// Aliases whose ARN starts with `prefix`, marker-inclusive, optionally
    /// filtered down to those pointing at `target_key_id`.
    pub fn list_aliases(
        &self,
        prefix: &str,
        limit: usize,
        marker: Option<&str>,
        target_key_id: Option<&str>,
    ) -> KmsResult<Page<Alias>> {
        let mut out = Vec::new();
        let mut past_marker = marker.is_none();

        for item in self.db.scan_prefix(prefix.as_bytes()) {
            if out.len() > limit {
                break;
            }
            let (raw_key, raw_value) =
                item.map_err(|e| KmsError::Internal(format!("store scan failed: {e}")))?;
            let entry_key = String::from_utf8_lossy(&raw_key).into_owned();

            if !past_marker {
                if Some(entry_key.as_str()) == marker {
                    past_marker = true;
                } else {
                    continue;
                }
            }

            let alias: Alias =
                serde_json::from_slice(&raw_value).map_err(|e| KmsError::Serialization(e.to_string()))?;
            if let Some(target) = target_key_id {
                if alias.target_key_id != target {
                    continue;
                }
            }
            out.push(alias);
        }

        if !past_marker {
            return Err(KmsError::InvalidMarker(format!("marker {:?} did not match any alias", marker)));
        }
        Ok(paginate(out, limit, |a| a.alias_arn.clone()))
    }

    // -- tags -------------------------------------------------------------

    pub fn save_tag(&self, key_arn: &str, tag: &Tag) -> KmsResult<()> {
        let encoded = serde_json::to_vec(tag).map_err(|e| KmsError::Serialization(e.to_string()))?;
        let storage_key = format!("{key_arn}{TAG_INFIX}{}", tag.tag_key);
        self.db
            .insert(storage_key.as_bytes(), encoded)
            .map_err(|e| KmsError::Internal(format!("store write failed: {e}")))?;
        Ok(())
    }

    pub fn list_tags(&self, key_arn: &str, limit: usize, marker: Option<&str>) -> KmsResult<Page<Tag>> {
        let prefix = format!("{key_arn}{TAG_INFIX}");
        let mut out = Vec::new();
        let mut past_marker = marker.is_none();
        let full_marker = marker.map(|m| format!("{prefix}{m}"));

        for item in self.db.scan_prefix(prefix.as_bytes()) {
            if out.len() > limit {
                break;
            }
            let (raw_key, raw_value) =
                item.map_err(|e| KmsError::Internal(format!("store scan failed: {e}")))?;
            let entry_key = String::from_utf8_lossy(&raw_key).into_owned();

            if !past_marker {
                if full_marker.as_deref() == Some(entry_key.as_str()) {
                    past_marker = true;
                } else {
                    continue;
                }
            }

            let tag: Tag = serde_json::from_slice(&raw_value).map_err(|e| KmsError::Serialization(e.to_string()))?;
            out.push(tag);
        }

        if !past_marker {
            return Err(KmsError::InvalidMarker(format!("marker {:?} did not match any tag", marker)));
        }
        Ok(paginate(out, limit, |t| t.tag_key.clone()))
    }
}

/// Truncate `items` (which may hold one entry past `limit`) to `limit`,
/// reporting whether the extra entry was dropped and, if so, the marker for
/// the next page.
fn paginate<T>(mut items: Vec<T>, limit: usize, marker_of: impl Fn(&T) -> String) -> Page<T> {
    if items.len() > limit {
        let next_marker = Some(marker_of(&items[limit]));
        items.truncate(limit);
        Page { items, truncated: true, next_marker }
    } else {
        Page { items, truncated: false, next_marker: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmk::{AesKey, CustomerMasterKeySpec, EncryptionAlgorithm, KeyMetadata, KeyOrigin, KeyState, KeyUsage};

    fn temp_store() -> Store {
        let dir = std::env::temp_dir().join(format!("local-kms-test-{}", uuid::Uuid::new_v4()));
        Store::open(&dir).unwrap()
    }

    fn metadata(arn: &str) -> KeyMetadata {
        KeyMetadata {
            account_id: "111122223333".into(),
            region: "eu-west-2".into(),
            arn: arn.into(),
            key_id: arn.rsplit('/').next().unwrap().into(),
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
            encryption_algorithms: vec![EncryptionAlgorithm::SymmetricDefault],
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let store = temp_store();
        let key = Key::Aes(AesKey::new(metadata("arn:aws:kms:eu-west-2:111122223333:key/a")));
        store.save_key(&key).unwrap();
        let loaded = store.load_key(key.arn(), 100).unwrap();
        assert_eq!(loaded.arn(), key.arn());
    }

    #[test]
    fn load_missing_key_is_not_found() {
        let store = temp_store();
        let err = store
            .load_key("arn:aws:kms:eu-west-2:111122223333:key/missing", 0)
            .unwrap_err();
        assert_eq!(err.kind(), "NotFoundException");
    }

    #[test]
    fn expired_key_is_deleted_on_read() {
        let store = temp_store();
        let mut meta = metadata("arn:aws:kms:eu-west-2:111122223333:key/expiring");
        meta.deletion_date = 50;
        let key = Key::Aes(AesKey::new(meta));
        store.save_key(&key).unwrap();

        let err = store.load_key(key.arn(), 100).unwrap_err();
        assert_eq!(err.kind(), "NotFoundException");
        assert!(store.db.get(key.arn().as_bytes()).unwrap().is_none());
    }

    #[test]
    fn list_keys_excludes_tags_and_respects_marker() {
        let store = temp_store();
        let prefix = "arn:aws:kms:eu-west-2:111122223333:key/";
        let k1 = Key::Aes(AesKey::new(metadata(&format!("{prefix}a"))));
        let k2 = Key::Aes(AesKey::new(metadata(&format!("{prefix}b"))));
        store.save_key(&k1).unwrap();
        store.save_key(&k2).unwrap();
        store
            .save_tag(k1.arn(), &Tag { tag_key: "env".into(), tag_value: "prod".into() })
            .unwrap();

        let all = store.list_keys(prefix, 10, None, 0).unwrap();
        assert_eq!(all.items.len(), 2);
        assert!(!all.truncated);

        let after_a = store.list_keys(prefix, 10, Some(k1.arn()), 0).unwrap();
        assert_eq!(after_a.items.len(), 1);
        assert_eq!(after_a.items[0].arn(), k2.arn());

        let err = store
            .list_keys(prefix, 10, Some("arn:aws:kms:eu-west-2:111122223333:key/nope"), 0)
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidMarkerException");
    }

    #[test]
    fn list_keys_reports_truncation_with_next_marker() {
        let store = temp_store();
        let prefix = "arn:aws:kms:eu-west-2:111122223333:key/";
        let k1 = Key::Aes(AesKey::new(metadata(&format!("{prefix}a"))));
        let k2 = Key::Aes(AesKey::new(metadata(&format!("{prefix}b"))));
        store.save_key(&k1).unwrap();
        store.save_key(&k2).unwrap();

        let page = store.list_keys(prefix, 1, None, 0).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.truncated);
        assert_eq!(page.next_marker.as_deref(), Some(k2.arn()));
    }

    #[test]
    fn list_keys_pagination_with_limit_one_visits_every_key_exactly_once() {
        let store = temp_store();
        let prefix = "arn:aws:kms:eu-west-2:111122223333:key/";
        let k1 = Key::Aes(AesKey::new(metadata(&format!("{prefix}a"))));
        let k2 = Key::Aes(AesKey::new(metadata(&format!("{prefix}b"))));
        let k3 = Key::Aes(AesKey::new(metadata(&format!("{prefix}c"))));
        store.save_key(&k1).unwrap();
        store.save_key(&k2).unwrap();
        store.save_key(&k3).unwrap();

        let mut seen = Vec::new();
        let mut marker = None;
        loop {
            let page = store.list_keys(prefix, 1, marker.as_deref(), 0).unwrap();
            seen.extend(page.items.iter().map(|k| k.arn().to_string()));
            if !page.truncated {
                break;
            }
            marker = page.next_marker;
        }

        assert_eq!(seen, vec![k1.arn().to_string(), k2.arn().to_string(), k3.arn().to_string()]);
    }

    #[test]
    fn list_tags_marker_includes_key_arn_prefix() {
        let store = temp_store();
        let key = Key::Aes(AesKey::new(metadata("arn:aws:kms:eu-west-2:111122223333:key/tagged")));
        store.save_key(&key).unwrap();
        store
            .save_tag(key.arn(), &Tag { tag_key: "a".into(), tag_value: "1".into() })
            .unwrap();
        store
            .save_tag(key.arn(), &Tag { tag_key: "b".into(), tag_value: "2".into() })
            .unwrap();

        let tags = store.list_tags(key.arn(), 10, None).unwrap();
        assert_eq!(tags.items.len(), 2);

        let after_a = store.list_tags(key.arn(), 10, Some("a")).unwrap();
        assert_eq!(after_a.items.len(), 1);
        assert_eq!(after_a.items[0].tag_key, "b");
    }
}
