//! Identity configuration and authorization (component G).

use serde::{Deserialize, Serialize};

const ANONYMOUS: &str = "anonymous";
const ADMIN: &str = "admin";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub account_id: String,
    #[serde(default)]
    pub credentials: Vec<Credential>,
    #[serde(default)]
    pub targets: Vec<String>,
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        self.name == ANONYMOUS
    }

    pub fn is_admin(&self) -> bool {
        self.targets.iter().any(|t| t == ADMIN)
    }

    /// True if this identity may invoke `operation` against `key_id` (the
    /// target key's id, or empty for operations with no specific key).
    pub fn can_do(&self, operation: &str, key_id: &str) -> bool {
        if self.is_admin() {
            return true;
        }
        let scoped = format!("{operation}:{key_id}");
        self.targets.iter().any(|t| t == operation || *t == scoped)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IdentityManager {
    identities: Vec<Identity>,
}

impl IdentityManager {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        let identities: Vec<Identity> = serde_yaml::from_str(content)?;
        Ok(Self { identities })
    }

    pub fn is_enabled(&self) -> bool {
        !self.identities.is_empty()
    }

    pub fn lookup_anonymous(&self) -> Option<&Identity> {
        self.identities.iter().find(|i| i.is_anonymous())
    }

    pub fn lookup_by_access_key(&self, access_key: &str) -> Option<(&Identity, &Credential)> {
        self.identities.iter().find_map(|identity| {
            identity
                .credentials
                .iter()
                .find(|c| c.access_key == access_key)
                .map(|cred| (identity, cred))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(targets: &[&str]) -> Identity {
        Identity {
            name: "dev".to_string(),
            account_id: "111122223333".to_string(),
            credentials: vec![],
            targets: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn admin_can_do_anything() {
        let i = identity(&["admin"]);
        assert!(i.can_do("Decrypt", "some-key"));
    }

    #[test]
    fn blanket_operation_grant() {
        let i = identity(&["Encrypt"]);
        assert!(i.can_do("Encrypt", "key-a"));
        assert!(!i.can_do("Decrypt", "key-a"));
    }

    #[test]
    fn per_key_grant() {
        let i = identity(&["Decrypt:key-a"]);
        assert!(i.can_do("Decrypt", "key-a"));
        assert!(!i.can_do("Decrypt", "key-b"));
    }

    #[test]
    fn from_yaml_round_trip() {
        let yaml = r#"
- name: anonymous
  account_id: "111122223333"
  targets: ["admin"]
- name: limited
  account_id: "111122223333"
  credentials:
    - access_key: AKIDEXAMPLE
      secret_key: shhh
  targets: ["Encrypt", "Decrypt:key-a"]
"#;
        let manager = IdentityManager::from_yaml(yaml).unwrap();
        assert!(manager.lookup_anonymous().unwrap().is_admin());
        let (identity, cred) = manager.lookup_by_access_key("AKIDEXAMPLE").unwrap();
        assert_eq!(identity.name, "limited");
        assert_eq!(cred.secret_key, "shhh");
    }
}
