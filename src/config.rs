//! Process-wide configuration, read once at startup from the environment.
//!
//! Nothing outside [`Config::from_env`] touches `std::env` directly — every
//! subsystem that needs account id, region, storage path, or the bind port
//! receives it through a constructed `Config`, never a module-level global.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub account_id: String,
    pub region: String,
    pub data_path: String,
    pub seed_path: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account_id: "111122223333".to_string(),
            region: "eu-west-2".to_string(),
            data_path: "/tmp/local-kms".to_string(),
            seed_path: "/init/seed.yaml".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            account_id: env::var("KMS_ACCOUNT_ID").unwrap_or(defaults.account_id),
            region: env::var("KMS_REGION").unwrap_or(defaults.region),
            data_path: env::var("KMS_DATA_PATH").unwrap_or(defaults.data_path),
            seed_path: env::var("KMS_SEED_PATH").unwrap_or(defaults.seed_path),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    /// `arn:aws:kms:{region}:{account_id}:`
    pub fn arn_prefix(&self) -> String {
        format!("arn:aws:kms:{}:{}:", self.region, self.account_id)
    }

    pub fn key_arn(&self, key_id: &str) -> String {
        format!("{}key/{}", self.arn_prefix(), key_id)
    }

    pub fn alias_arn(&self, alias_name: &str) -> String {
        format!("{}{}", self.arn_prefix(), alias_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_arn_prefix() {
        let cfg = Config::default();
        assert_eq!(cfg.arn_prefix(), "arn:aws:kms:eu-west-2:111122223333:");
    }

    #[test]
    fn key_arn_format() {
        let cfg = Config::default();
        assert_eq!(
            cfg.key_arn("bc436485-5092-42b8-92a3-0aa8b93536dc"),
            "arn:aws:kms:eu-west-2:111122223333:key/bc436485-5092-42b8-92a3-0aa8b93536dc"
        );
    }
}
