//! Request authentication and authorization (components F and G).
//!
//! A request is either signed (`Authorization: AWS4-HMAC-SHA256 ...`) or
//! anonymous (no `Authorization` header at all); anything else is rejected
//! outright. Once an identity is established, [`identity::Identity::can_do`]
//! decides whether it may invoke the requested operation against the
//! requested key.

pub mod identity;
pub mod sigv4;

use std::collections::BTreeMap;

use identity::{Identity, IdentityManager};
use sigv4::SignedRequest;

use crate::error::{KmsError, KmsResult};

pub struct Authenticator {
    identities: IdentityManager,
}

impl Authenticator {
    pub fn new(identities: IdentityManager) -> Self {
        Self { identities }
    }

    /// Authenticate `request`, then authorize it for `operation` against
    /// `key_id` (empty string for operations with no specific key target).
    pub fn authorize(&self, request: &SignedRequest, operation: &str, key_id: &str) -> KmsResult<Identity> {
        let identity = self.authenticate(request)?;
        if !identity.can_do(operation, key_id) {
            return Err(KmsError::AccessDenied(
                "the caller is not authorized to perform this operation".to_string(),
            ));
        }
        Ok(identity.clone())
    }

    fn authenticate(&self, request: &SignedRequest) -> KmsResult<Identity> {
        match request.headers.get("authorization") {
            Some(authorization) => self.authenticate_signed(request, authorization),
            None => self
                .identities
                .lookup_anonymous()
                .cloned()
                .ok_or_else(|| KmsError::AccessDenied("anonymous access is not permitted".to_string())),
        }
    }

    fn authenticate_signed(&self, request: &SignedRequest, authorization: &str) -> KmsResult<Identity> {
        let access_key = sigv4::access_key_from_header(authorization)?;
        let (identity, credential) = self
            .identities
            .lookup_by_access_key(&access_key)
            .ok_or_else(|| KmsError::IncompleteSignature("unknown access key".to_string()))?;

        let amz_date = request
            .headers
            .get("x-amz-date")
            .or_else(|| request.headers.get("date"))
            .ok_or_else(|| KmsError::IncompleteSignature("no date header present".to_string()))?;

        sigv4::verify(request, authorization, amz_date, &credential.secret_key)?;
        Ok(identity.clone())
    }
}

/// Build the lowercased header map [`sigv4::SignedRequest`] expects from an
/// arbitrary ordered list of `(name, value)` pairs, as received off the wire.
pub fn lowercase_headers(pairs: impl IntoIterator<Item = (String, String)>) -> BTreeMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use identity::Credential;

    fn manager_with_anonymous_admin() -> IdentityManager {
        IdentityManager::new(vec![Identity {
            name: "anonymous".to_string(),
            account_id: "111122223333".to_string(),
            credentials: vec![],
            targets: vec!["admin".to_string()],
        }])
    }

    #[test]
    fn anonymous_request_uses_anonymous_identity_when_permitted() {
        let auth = Authenticator::new(manager_with_anonymous_admin());
        let headers = BTreeMap::new();
        let req = SignedRequest { method: "POST", path: "/", query: "", headers: &headers, body: b"{}" };
        let identity = auth.authorize(&req, "CreateKey", "").unwrap();
        assert_eq!(identity.name, "anonymous");
    }

    #[test]
    fn anonymous_request_rejected_when_no_anonymous_identity_configured() {
        let auth = Authenticator::new(IdentityManager::new(vec![]));
        let headers = BTreeMap::new();
        let req = SignedRequest { method: "POST", path: "/", query: "", headers: &headers, body: b"{}" };
        let err = auth.authorize(&req, "CreateKey", "").unwrap_err();
        assert_eq!(err.kind(), "AccessDeniedException");
    }

    #[test]
    fn unauthorized_operation_is_denied() {
        let manager = IdentityManager::new(vec![Identity {
            name: "anonymous".to_string(),
            account_id: "111122223333".to_string(),
            credentials: vec![Credential { access_key: "x".into(), secret_key: "y".into() }],
            targets: vec!["Encrypt".to_string()],
        }]);
        let auth = Authenticator::new(manager);
        let headers = BTreeMap::new();
        let req = SignedRequest { method: "POST", path: "/", query: "", headers: &headers, body: b"{}" };
        let err = auth.authorize(&req, "Decrypt", "").unwrap_err();
        assert_eq!(err.kind(), "AccessDeniedException");
    }
}
