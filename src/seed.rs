//! YAML seed-file loader (component J, §10.III): pre-provisions keys and
//! aliases at startup so local development and integration tests don't need
//! a scripted bootstrap sequence over the wire protocol.
//!
//! A missing or absent seed path is a no-op; a malformed file logs and is
//! skipped rather than failing startup.

use serde::Deserialize;

use crate::api::handlers::{algorithm_sets, parse_key_origin, parse_key_usage, parse_spec};
use crate::cmk::ecc::EccCurve;
use crate::cmk::rsa::RsaKeySize;
use crate::cmk::{AesKey, CustomerMasterKeySpec, EccKey, Key, KeyMetadata, KeyState, RsaKey, SecpKey};
use crate::config::Config;
use crate::store::{Alias, Store};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SeedFile {
    #[serde(default)]
    keys: Vec<SeedKey>,
    #[serde(default)]
    aliases: Vec<SeedAlias>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SeedKey {
    key_id: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_usage")]
    key_usage: String,
    #[serde(default = "default_spec")]
    customer_master_key_spec: String,
    #[serde(default = "default_origin")]
    origin: String,
    /// Hex-encoded AES-256 backing keys, oldest first. Only meaningful for
    /// `SYMMETRIC_DEFAULT`; ignored for asymmetric specs, which always
    /// generate fresh material.
    #[serde(default)]
    backing_keys: Vec<String>,
}

fn default_usage() -> String {
    "ENCRYPT_DECRYPT".to_string()
}

fn default_spec() -> String {
    "SYMMETRIC_DEFAULT".to_string()
}

fn default_origin() -> String {
    "AWS_KMS".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SeedAlias {
    alias_name: String,
    target_key_id: String,
}

/// Load `config.seed_path` and provision its keys and aliases into `store`.
pub fn load(config: &Config, store: &Store) {
    if config.seed_path.trim().is_empty() {
        log::debug!("no seed path configured; skipping seeding");
        return;
    }

    let content = match std::fs::read_to_string(&config.seed_path) {
        Ok(content) => content,
        Err(e) => {
            log::info!("no seed file at {}: {e}; skipping", config.seed_path);
            return;
        }
    };

    let seed: SeedFile = match serde_yaml::from_str(&content) {
        Ok(seed) => seed,
        Err(e) => {
            log::error!("malformed seed file at {}: {e}; skipping", config.seed_path);
            return;
        }
    };

    for seed_key in seed.keys {
        let key_id = seed_key.key_id.clone();
        if let Err(e) = seed_one_key(config, store, seed_key) {
            log::error!("failed to seed key {key_id}: {e}");
        }
    }
    for seed_alias in seed.aliases {
        let alias_name = seed_alias.alias_name.clone();
        if let Err(e) = seed_one_alias(config, store, seed_alias) {
            log::error!("failed to seed alias {alias_name}: {e}");
        }
    }
}

fn seed_one_key(config: &Config, store: &Store, seed_key: SeedKey) -> crate::error::KmsResult<()> {
    let usage = parse_key_usage(&seed_key.key_usage)?;
    let spec = parse_spec(&seed_key.customer_master_key_spec)?;
    let origin = parse_key_origin(&seed_key.origin)?;
    let arn = config.key_arn(&seed_key.key_id);
    let (signing_algorithms, encryption_algorithms) = algorithm_sets(spec, usage);

    let metadata = KeyMetadata {
        account_id: config.account_id.clone(),
        region: config.region.clone(),
        arn,
        key_id: seed_key.key_id,
        description: seed_key.description,
        policy: "default".to_string(),
        creation_date: now(),
        deletion_date: 0,
        enabled: true,
        state: KeyState::Enabled,
        origin,
        usage,
        spec,
        key_manager: "CUSTOMER".to_string(),
        expiration_model: None,
        valid_to: 0,
        signing_algorithms,
        encryption_algorithms,
    };

    let key = match spec {
        CustomerMasterKeySpec::SymmetricDefault => {
            let mut aes = AesKey::new(metadata);
            if !seed_key.backing_keys.is_empty() {
                aes.backing_keys = seed_key
                    .backing_keys
                    .iter()
                    .map(|hex_key| {
                        hex::decode(hex_key)
                            .map_err(|e| crate::error::KmsError::Internal(format!("seed backing key is not valid hex: {e}")))
                    })
                    .collect::<crate::error::KmsResult<Vec<_>>>()?;
            }
            Key::Aes(aes)
        }
        CustomerMasterKeySpec::Rsa2048 | CustomerMasterKeySpec::Rsa3072 | CustomerMasterKeySpec::Rsa4096 => {
            Key::Rsa(RsaKey::generate(metadata, RsaKeySize::from_spec(spec)?)?)
        }
        CustomerMasterKeySpec::EccNistP256 | CustomerMasterKeySpec::EccNistP384 | CustomerMasterKeySpec::EccNistP521 => {
            Key::Ecc(EccKey::generate(metadata, EccCurve::from_spec(spec)?))
        }
        CustomerMasterKeySpec::EccSecgP256k1 => Key::Secp(SecpKey::generate(metadata)),
    };

    store.save_key(&key)
}

fn seed_one_alias(config: &Config, store: &Store, seed_alias: SeedAlias) -> crate::error::KmsResult<()> {
    let now = now();
    store.save_alias(&Alias {
        alias_arn: config.alias_arn(&seed_alias.alias_name),
        alias_name: seed_alias.alias_name,
        target_key_id: seed_alias.target_key_id,
        creation_date: now,
        last_updated_date: now,
    })
}

fn now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is after 1970").as_secs() as i64
}
