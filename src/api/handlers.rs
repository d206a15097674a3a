//! Per-operation request handlers (component H).
//!
//! Each operation follows the same shape: decode the JSON body, validate and
//! resolve its `KeyId` (possibly an alias), invoke the matching CMK
//! capability, persist, and build the response. [`handle`] is the single
//! axum entry point; [`dispatch`] is the pure name-to-function table which
//! is where test coverage for individual operations lives.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};

use crate::auth::sigv4::SignedRequest;
use crate::cmk::{
    ecc::EccCurve, rsa::RsaKeySize, AesKey, CustomerMasterKeySpec, EccKey, EncryptionAlgorithm, ImportParams, Key,
    KeyMetadata, KeyOrigin, KeyState, KeyUsage, RsaKey, SecpKey, SigningAlgorithm, SigningKey, WrappingAlgorithm,
};
use crate::error::{KmsError, KmsResult};
use crate::store::{Alias, Tag};

use super::AppState;

const MAX_ENVELOPE_LEN: usize = 6144;
const IMPORT_TOKEN_VALID_SECS: i64 = 24 * 60 * 60;
const DEFAULT_PENDING_WINDOW_DAYS: i64 = 30;
const MAX_RAW_MESSAGE_LEN: usize = 4096;

const OPERATIONS: &[&str] = &[
    "CreateKey",
    "DescribeKey",
    "ListKeys",
    "UpdateKeyDescription",
    "ScheduleKeyDeletion",
    "CancelKeyDeletion",
    "EnableKey",
    "DisableKey",
    "EnableKeyRotation",
    "DisableKeyRotation",
    "GetKeyRotationStatus",
    "GetKeyPolicy",
    "PutKeyPolicy",
    "GetPublicKey",
    "CreateAlias",
    "UpdateAlias",
    "DeleteAlias",
    "ListAliases",
    "TagResource",
    "UntagResource",
    "ListResourceTags",
    "Encrypt",
    "Decrypt",
    "ReEncrypt",
    "GenerateDataKey",
    "GenerateDataKeyWithoutPlaintext",
    "GenerateDataKeyPair",
    "GenerateDataKeyPairWithoutPlaintext",
    "GenerateRandom",
    "Sign",
    "Verify",
    "GetParametersForImport",
    "ImportKeyMaterial",
    "DeleteImportedKeyMaterial",
];

/// axum entry point. Parses `X-Amz-Target`, authenticates + authorizes, then
/// hands the decoded body to [`dispatch`].
pub async fn handle(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let target = match headers.get("x-amz-target").and_then(|v| v.to_str().ok()) {
        Some(t) => t,
        None => return unknown_operation_response(),
    };
    let operation = match target.rsplit('.').next() {
        Some(op) if OPERATIONS.contains(&op) => op,
        _ => return unknown_operation_response(),
    };

    match route(&state, &headers, &body, operation).await {
        Ok(value) => {
            let mut resp = (StatusCode::OK, Json(value)).into_response();
            resp.headers_mut().insert(
                axum::http::header::CONTENT_TYPE,
                "application/x-amz-json-1.1".parse().unwrap(),
            );
            resp
        }
        Err(err) => err.into_response(),
    }
}

fn unknown_operation_response() -> Response {
    (StatusCode::NOT_IMPLEMENTED, "unknown operation").into_response()
}

async fn route(state: &AppState, headers: &HeaderMap, body: &[u8], operation: &str) -> KmsResult<Value> {
    let header_pairs = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())));
    let lower_headers = crate::auth::lowercase_headers(header_pairs);

    let signed_request = SignedRequest { method: "POST", path: "/", query: "", headers: &lower_headers, body };

    let json_body: Value = if body.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(body).map_err(|e| KmsError::Serialization(e.to_string()))?
    };

    let key_id = opt_str(&json_body, "KeyId").unwrap_or_default();
    state.auth.authorize(&signed_request, operation, key_id)?;

    dispatch(state, operation, &json_body)
}

/// Pure operation table: given a parsed body, run the named operation. Public
/// so integration tests can drive individual operations without going
/// through the HTTP layer.
pub fn dispatch(state: &AppState, operation: &str, body: &Value) -> KmsResult<Value> {
    match operation {
        "CreateKey" => create_key(state, body),
        "DescribeKey" => describe_key(state, body),
        "ListKeys" => list_keys(state, body),
        "UpdateKeyDescription" => update_key_description(state, body),
        "ScheduleKeyDeletion" => schedule_key_deletion(state, body),
        "CancelKeyDeletion" => cancel_key_deletion(state, body),
        "EnableKey" => set_enabled(state, body, true),
        "DisableKey" => set_enabled(state, body, false),
        "EnableKeyRotation" => set_rotation(state, body, true),
        "DisableKeyRotation" => set_rotation(state, body, false),
        "GetKeyRotationStatus" => get_key_rotation_status(state, body),
        "GetKeyPolicy" => get_key_policy(state, body),
        "PutKeyPolicy" => put_key_policy(state, body),
        "GetPublicKey" => get_public_key(state, body),
        "CreateAlias" => create_alias(state, body),
        "UpdateAlias" => update_alias(state, body),
        "DeleteAlias" => delete_alias(state, body),
        "ListAliases" => list_aliases(state, body),
        "TagResource" => tag_resource(state, body),
        "UntagResource" => untag_resource(state, body),
        "ListResourceTags" => list_resource_tags(state, body),
        "Encrypt" => encrypt(state, body),
        "Decrypt" => decrypt(state, body),
        "ReEncrypt" => re_encrypt(state, body),
        "GenerateDataKey" => generate_data_key(state, body, true),
        "GenerateDataKeyWithoutPlaintext" => generate_data_key(state, body, false),
        "GenerateDataKeyPair" => generate_data_key_pair(state, body, true),
        "GenerateDataKeyPairWithoutPlaintext" => generate_data_key_pair(state, body, false),
        "GenerateRandom" => generate_random(body),
        "Sign" => sign(state, body),
        "Verify" => verify(state, body),
        "GetParametersForImport" => get_parameters_for_import(state, body),
        "ImportKeyMaterial" => import_key_material(state, body),
        "DeleteImportedKeyMaterial" => delete_imported_key_material(state, body),
        other => Err(KmsError::Validation(format!("unsupported operation: {other}"))),
    }
}

// ---------------------------------------------------------------------
// Body extraction helpers
// ---------------------------------------------------------------------

fn opt_str<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field).and_then(Value::as_str)
}

fn require_str<'a>(body: &'a Value, field: &str) -> KmsResult<&'a str> {
    opt_str(body, field).ok_or_else(|| KmsError::MissingParameter(format!("{field} is required")))
}

fn opt_i64(body: &Value, field: &str) -> Option<i64> {
    body.get(field).and_then(Value::as_i64)
}

fn require_b64(body: &Value, field: &str) -> KmsResult<Vec<u8>> {
    let s = require_str(body, field)?;
    STANDARD.decode(s).map_err(|_| KmsError::Validation(format!("{field} is not valid base64")))
}

fn context_map(body: &Value, field: &str) -> BTreeMap<String, Option<String>> {
    let mut out = BTreeMap::new();
    if let Some(Value::Object(obj)) = body.get(field) {
        for (k, v) in obj {
            out.insert(k.clone(), v.as_str().map(|s| s.to_string()));
        }
    }
    out
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock is after 1970").as_secs() as i64
}

// ---------------------------------------------------------------------
// Enum <-> wire string mappings
// ---------------------------------------------------------------------

fn key_usage_str(u: KeyUsage) -> &'static str {
    match u {
        KeyUsage::EncryptDecrypt => "ENCRYPT_DECRYPT",
        KeyUsage::SignVerify => "SIGN_VERIFY",
    }
}

pub(crate) fn parse_key_usage(s: &str) -> KmsResult<KeyUsage> {
    match s {
        "ENCRYPT_DECRYPT" => Ok(KeyUsage::EncryptDecrypt),
        "SIGN_VERIFY" => Ok(KeyUsage::SignVerify),
        other => Err(KmsError::Validation(format!("unknown KeyUsage: {other}"))),
    }
}

fn key_state_str(s: KeyState) -> &'static str {
    match s {
        KeyState::Enabled => "Enabled",
        KeyState::Disabled => "Disabled",
        KeyState::PendingImport => "PendingImport",
        KeyState::PendingDeletion => "PendingDeletion",
        KeyState::Unavailable => "Unavailable",
    }
}

fn key_origin_str(o: KeyOrigin) -> &'static str {
    match o {
        KeyOrigin::AwsKms => "AWS_KMS",
        KeyOrigin::External => "EXTERNAL",
        KeyOrigin::AwsCloudHsm => "AWS_CLOUDHSM",
    }
}

pub(crate) fn parse_key_origin(s: &str) -> KmsResult<KeyOrigin> {
    match s {
        "AWS_KMS" => Ok(KeyOrigin::AwsKms),
        "EXTERNAL" => Ok(KeyOrigin::External),
        "AWS_CLOUDHSM" => Ok(KeyOrigin::AwsCloudHsm),
        other => Err(KmsError::Validation(format!("unknown Origin: {other}"))),
    }
}

fn spec_str(s: CustomerMasterKeySpec) -> &'static str {
    use CustomerMasterKeySpec::*;
    match s {
        SymmetricDefault => "SYMMETRIC_DEFAULT",
        Rsa2048 => "RSA_2048",
        Rsa3072 => "RSA_3072",
        Rsa4096 => "RSA_4096",
        EccNistP256 => "ECC_NIST_P256",
        EccNistP384 => "ECC_NIST_P384",
        EccNistP521 => "ECC_NIST_P521",
        EccSecgP256k1 => "ECC_SECG_P256K1",
    }
}

pub(crate) fn parse_spec(s: &str) -> KmsResult<CustomerMasterKeySpec> {
    use CustomerMasterKeySpec::*;
    match s {
        "SYMMETRIC_DEFAULT" => Ok(SymmetricDefault),
        "RSA_2048" => Ok(Rsa2048),
        "RSA_3072" => Ok(Rsa3072),
        "RSA_4096" => Ok(Rsa4096),
        "ECC_NIST_P256" => Ok(EccNistP256),
        "ECC_NIST_P384" => Ok(EccNistP384),
        "ECC_NIST_P521" => Ok(EccNistP521),
        "ECC_SECG_P256K1" => Ok(EccSecgP256k1),
        other => Err(KmsError::Validation(format!("unknown key spec: {other}"))),
    }
}

fn enc_alg_str(a: EncryptionAlgorithm) -> &'static str {
    match a {
        EncryptionAlgorithm::SymmetricDefault => "SYMMETRIC_DEFAULT",
        EncryptionAlgorithm::RsaesOaepSha1 => "RSAES_OAEP_SHA_1",
        EncryptionAlgorithm::RsaesOaepSha256 => "RSAES_OAEP_SHA_256",
    }
}

fn parse_enc_alg(s: &str) -> KmsResult<EncryptionAlgorithm> {
    match s {
        "SYMMETRIC_DEFAULT" => Ok(EncryptionAlgorithm::SymmetricDefault),
        "RSAES_OAEP_SHA_1" => Ok(EncryptionAlgorithm::RsaesOaepSha1),
        "RSAES_OAEP_SHA_256" => Ok(EncryptionAlgorithm::RsaesOaepSha256),
        other => Err(KmsError::Validation(format!("unknown EncryptionAlgorithm: {other}"))),
    }
}

fn sig_alg_str(a: SigningAlgorithm) -> &'static str {
    use SigningAlgorithm::*;
    match a {
        EcdsaSha256 => "ECDSA_SHA_256",
        EcdsaSha384 => "ECDSA_SHA_384",
        EcdsaSha512 => "ECDSA_SHA_512",
        RsassaPssSha256 => "RSASSA_PSS_SHA_256",
        RsassaPssSha384 => "RSASSA_PSS_SHA_384",
        RsassaPssSha512 => "RSASSA_PSS_SHA_512",
        RsassaPkcs1V15Sha256 => "RSASSA_PKCS1_V1_5_SHA_256",
        RsassaPkcs1V15Sha384 => "RSASSA_PKCS1_V1_5_SHA_384",
        RsassaPkcs1V15Sha512 => "RSASSA_PKCS1_V1_5_SHA_512",
    }
}

fn parse_sig_alg(s: &str) -> KmsResult<SigningAlgorithm> {
    use SigningAlgorithm::*;
    match s {
        "ECDSA_SHA_256" => Ok(EcdsaSha256),
        "ECDSA_SHA_384" => Ok(EcdsaSha384),
        "ECDSA_SHA_512" => Ok(EcdsaSha512),
        "RSASSA_PSS_SHA_256" => Ok(RsassaPssSha256),
        "RSASSA_PSS_SHA_384" => Ok(RsassaPssSha384),
        "RSASSA_PSS_SHA_512" => Ok(RsassaPssSha512),
        "RSASSA_PKCS1_V1_5_SHA_256" => Ok(RsassaPkcs1V15Sha256),
        "RSASSA_PKCS1_V1_5_SHA_384" => Ok(RsassaPkcs1V15Sha384),
        "RSASSA_PKCS1_V1_5_SHA_512" => Ok(RsassaPkcs1V15Sha512),
        other => Err(KmsError::Validation(format!("unknown SigningAlgorithm: {other}"))),
    }
}

fn parse_wrapping_alg(s: &str) -> KmsResult<WrappingAlgorithm> {
    match s {
        "RSAES_PKCS1_V1_5" => Ok(WrappingAlgorithm::RsaesPkcs1V15),
        "RSAES_OAEP_SHA_1" => Ok(WrappingAlgorithm::RsaesOaepSha1),
        "RSAES_OAEP_SHA_256" => Ok(WrappingAlgorithm::RsaesOaepSha256),
        other => Err(KmsError::Validation(format!("unknown WrappingAlgorithm: {other}"))),
    }
}

fn expiration_model_str(e: crate::cmk::ExpirationModel) -> &'static str {
    match e {
        crate::cmk::ExpirationModel::KeyMaterialExpires => "KEY_MATERIAL_EXPIRES",
        crate::cmk::ExpirationModel::KeyMaterialDoesNotExpire => "KEY_MATERIAL_DOES_NOT_EXPIRE",
    }
}

fn parse_expiration_model(s: &str) -> KmsResult<crate::cmk::ExpirationModel> {
    match s {
        "KEY_MATERIAL_EXPIRES" => Ok(crate::cmk::ExpirationModel::KeyMaterialExpires),
        "KEY_MATERIAL_DOES_NOT_EXPIRE" => Ok(crate::cmk::ExpirationModel::KeyMaterialDoesNotExpire),
        other => Err(KmsError::Validation(format!("unknown ExpirationModel: {other}"))),
    }
}

pub(crate) fn algorithm_sets(spec: CustomerMasterKeySpec, usage: KeyUsage) -> (Vec<SigningAlgorithm>, Vec<EncryptionAlgorithm>) {
    use CustomerMasterKeySpec::*;
    use SigningAlgorithm::*;
    match (spec, usage) {
        (SymmetricDefault, _) => (vec![], vec![EncryptionAlgorithm::SymmetricDefault]),
        (Rsa2048 | Rsa3072 | Rsa4096, KeyUsage::EncryptDecrypt) => {
            (vec![], vec![EncryptionAlgorithm::RsaesOaepSha1, EncryptionAlgorithm::RsaesOaepSha256])
        }
        (Rsa2048 | Rsa3072 | Rsa4096, KeyUsage::SignVerify) => (
            vec![
                RsassaPssSha256,
                RsassaPssSha384,
                RsassaPssSha512,
                RsassaPkcs1V15Sha256,
                RsassaPkcs1V15Sha384,
                RsassaPkcs1V15Sha512,
            ],
            vec![],
        ),
        (EccNistP256, _) => (vec![EcdsaSha256], vec![]),
        (EccNistP384, _) => (vec![EcdsaSha384], vec![]),
        (EccNistP521, _) => (vec![EcdsaSha512], vec![]),
        (EccSecgP256k1, _) => (vec![EcdsaSha256], vec![]),
    }
}

// ---------------------------------------------------------------------
// KeyMetadata wire shape
// ---------------------------------------------------------------------

fn key_metadata_json(key: &Key) -> Value {
    let m = key.metadata();
    let mut obj = Map::new();
    obj.insert("AWSAccountId".into(), json!(m.account_id));
    obj.insert("KeyId".into(), json!(m.key_id));
    obj.insert("Arn".into(), json!(m.arn));
    obj.insert("CreationDate".into(), json!(m.creation_date));
    obj.insert("Enabled".into(), json!(m.enabled));
    obj.insert("Description".into(), json!(m.description));
    obj.insert("KeyUsage".into(), json!(key_usage_str(m.usage)));
    obj.insert("KeyState".into(), json!(key_state_str(m.state)));
    obj.insert("Origin".into(), json!(key_origin_str(m.origin)));
    obj.insert("KeyManager".into(), json!(m.key_manager));
    obj.insert("CustomerMasterKeySpec".into(), json!(spec_str(m.spec)));
    obj.insert("KeySpec".into(), json!(spec_str(m.spec)));
    obj.insert(
        "SigningAlgorithms".into(),
        json!(m.signing_algorithms.iter().copied().map(sig_alg_str).collect::<Vec<_>>()),
    );
    obj.insert(
        "EncryptionAlgorithms".into(),
        json!(m.encryption_algorithms.iter().copied().map(enc_alg_str).collect::<Vec<_>>()),
    );
    if m.deletion_date != 0 {
        obj.insert("DeletionDate".into(), json!(m.deletion_date));
    }
    if m.valid_to != 0 {
        obj.insert("ValidTo".into(), json!(m.valid_to));
    }
    if let Some(em) = m.expiration_model {
        obj.insert("ExpirationModel".into(), json!(expiration_model_str(em)));
    }
    Value::Object(obj)
}

// ---------------------------------------------------------------------
// Key id / alias resolution, cross-cutting state checks
// ---------------------------------------------------------------------

fn resolve_key_arn(state: &AppState, key_id: &str) -> KmsResult<String> {
    if key_id.is_empty() {
        return Err(KmsError::MissingParameter("KeyId is required".to_string()));
    }
    let alias_arn = if key_id.starts_with("alias/") {
        Some(state.config.alias_arn(key_id))
    } else if key_id.contains(":alias/") {
        Some(key_id.to_string())
    } else {
        None
    };
    if let Some(alias_arn) = alias_arn {
        let alias = state.store.load_alias(&alias_arn)?;
        return Ok(state.config.key_arn(&alias.target_key_id));
    }
    if key_id.starts_with("arn:aws:kms:") {
        return Ok(key_id.to_string());
    }
    Ok(state.config.key_arn(key_id))
}

fn load_resolved(state: &AppState, key_id: &str) -> KmsResult<Key> {
    let arn = resolve_key_arn(state, key_id)?;
    state.store.load_key(&arn, now())
}

/// §4.H cross-cutting check applied before any crypto operation.
fn require_usable(key: &Key) -> KmsResult<()> {
    let m = key.metadata();
    match m.state {
        KeyState::PendingImport => Err(KmsError::InvalidState("key material has not been imported yet".to_string())),
        KeyState::PendingDeletion => Err(KmsError::InvalidState("key is scheduled for deletion".to_string())),
        KeyState::Unavailable => Err(KmsError::InvalidState("key is unavailable".to_string())),
        _ if !m.enabled => Err(KmsError::Disabled("key is disabled".to_string())),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------
// Key lifecycle
// ---------------------------------------------------------------------

fn create_key(state: &AppState, body: &Value) -> KmsResult<Value> {
    let usage = match opt_str(body, "KeyUsage") {
        Some(s) => parse_key_usage(s)?,
        None => KeyUsage::EncryptDecrypt,
    };
    let spec = match opt_str(body, "CustomerMasterKeySpec").or_else(|| opt_str(body, "KeySpec")) {
        Some(s) => parse_spec(s)?,
        None => CustomerMasterKeySpec::SymmetricDefault,
    };
    let origin = match opt_str(body, "Origin") {
        Some(s) => parse_key_origin(s)?,
        None => KeyOrigin::AwsKms,
    };
    let description = opt_str(body, "Description").unwrap_or_default().to_string();
    let policy = opt_str(body, "Policy").unwrap_or("default").to_string();

    if origin == KeyOrigin::External && spec != CustomerMasterKeySpec::SymmetricDefault {
        return Err(KmsError::Validation("EXTERNAL origin is only supported for symmetric keys".to_string()));
    }

    let key_id = uuid::Uuid::new_v4().to_string();
    let arn = state.config.key_arn(&key_id);
    let (signing_algorithms, encryption_algorithms) = algorithm_sets(spec, usage);
    let pending_import = origin == KeyOrigin::External;

    let metadata = KeyMetadata {
        account_id: state.config.account_id.clone(),
        region: state.config.region.clone(),
        arn,
        key_id,
        description,
        policy,
        creation_date: now(),
        deletion_date: 0,
        enabled: !pending_import,
        state: if pending_import { KeyState::PendingImport } else { KeyState::Enabled },
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
            Key::Aes(if pending_import { AesKey::new_pending_import(metadata) } else { AesKey::new(metadata) })
        }
        CustomerMasterKeySpec::Rsa2048 | CustomerMasterKeySpec::Rsa3072 | CustomerMasterKeySpec::Rsa4096 => {
            Key::Rsa(RsaKey::generate(metadata, RsaKeySize::from_spec(spec)?)?)
        }
        CustomerMasterKeySpec::EccNistP256 | CustomerMasterKeySpec::EccNistP384 | CustomerMasterKeySpec::EccNistP521 => {
            Key::Ecc(EccKey::generate(metadata, EccCurve::from_spec(spec)?))
        }
        CustomerMasterKeySpec::EccSecgP256k1 => Key::Secp(SecpKey::generate(metadata)),
    };

    state.store.save_key(&key)?;

    if let Some(Value::Array(tags)) = body.get("Tags") {
        for tag in tags {
            let tag_key = tag.get("TagKey").and_then(Value::as_str).unwrap_or_default().to_string();
            let tag_value = tag.get("TagValue").and_then(Value::as_str).unwrap_or_default().to_string();
            if let Err(e) = state.store.save_tag(key.arn(), &Tag { tag_key, tag_value }) {
                log::warn!("failed to save tag for newly created key {}: {e}", key.arn());
            }
        }
    }

    Ok(json!({ "KeyMetadata": key_metadata_json(&key) }))
}

fn describe_key(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let key = load_resolved(state, key_id)?;
    Ok(json!({ "KeyMetadata": key_metadata_json(&key) }))
}

fn list_keys(state: &AppState, body: &Value) -> KmsResult<Value> {
    let limit = opt_i64(body, "Limit").unwrap_or(100).max(1) as usize;
    let marker = opt_str(body, "Marker");
    let prefix = format!("{}key/", state.config.arn_prefix());

    let page = state.store.list_keys(&prefix, limit, marker, now())?;
    let keys: Vec<Value> = page
        .items
        .iter()
        .map(|k| json!({ "KeyId": k.metadata().key_id, "KeyArn": k.arn() }))
        .collect();

    Ok(json!({
        "Keys": keys,
        "Truncated": page.truncated,
        "NextMarker": page.next_marker,
    }))
}

fn update_key_description(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let description = require_str(body, "Description")?;
    if description.len() > 8192 {
        return Err(KmsError::Validation("Description exceeds 8192 characters".to_string()));
    }
    let mut key = load_resolved(state, key_id)?;
    key.metadata_mut().description = description.to_string();
    state.store.save_key(&key)?;
    Ok(json!({}))
}

fn schedule_key_deletion(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let window = opt_i64(body, "PendingWindowInDays").unwrap_or(DEFAULT_PENDING_WINDOW_DAYS);
    if !(7..=30).contains(&window) {
        return Err(KmsError::Validation("PendingWindowInDays must be between 7 and 30".to_string()));
    }
    let mut key = load_resolved(state, key_id)?;
    if key.metadata().is_pending_deletion() {
        return Err(KmsError::InvalidState("key is already scheduled for deletion".to_string()));
    }
    let deletion_date = now() + window * 24 * 60 * 60;
    {
        let m = key.metadata_mut();
        m.deletion_date = deletion_date;
        m.enabled = false;
        m.state = KeyState::PendingDeletion;
    }
    state.store.save_key(&key)?;
    Ok(json!({ "KeyId": key.arn(), "DeletionDate": deletion_date }))
}

fn cancel_key_deletion(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let mut key = load_resolved(state, key_id)?;
    if !key.metadata().is_pending_deletion() {
        return Err(KmsError::InvalidState("key is not scheduled for deletion".to_string()));
    }
    {
        let m = key.metadata_mut();
        m.deletion_date = 0;
        m.enabled = true;
        m.state = KeyState::Enabled;
    }
    state.store.save_key(&key)?;
    Ok(json!({ "KeyId": key.arn() }))
}

fn set_enabled(state: &AppState, body: &Value, enabled: bool) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let mut key = load_resolved(state, key_id)?;
    match key.metadata().state {
        KeyState::Enabled | KeyState::Disabled => {
            let m = key.metadata_mut();
            m.enabled = enabled;
            m.state = if enabled { KeyState::Enabled } else { KeyState::Disabled };
        }
        _ => return Err(KmsError::InvalidState("key is not in a state that can be enabled or disabled".to_string())),
    }
    state.store.save_key(&key)?;
    Ok(json!({}))
}

fn set_rotation(state: &AppState, body: &Value, enable: bool) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let mut key = load_resolved(state, key_id)?;
    let aes = key.as_aes_mut().map_err(|_| {
        KmsError::UnsupportedOperation("key rotation is only supported for symmetric keys".to_string())
    })?;
    if aes.metadata.origin == KeyOrigin::External {
        return Err(KmsError::UnsupportedOperation(
            "key rotation is not supported for externally imported key material".to_string(),
        ));
    }
    if enable {
        aes.enable_rotation(now());
    } else {
        aes.disable_rotation();
    }
    state.store.save_key(&key)?;
    Ok(json!({}))
}

fn get_key_rotation_status(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let key = load_resolved(state, key_id)?;
    let enabled = matches!(&key, Key::Aes(aes) if aes.rotation_enabled());
    Ok(json!({ "KeyRotationEnabled": enabled }))
}

fn get_key_policy(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let key = load_resolved(state, key_id)?;
    Ok(json!({ "Policy": key.metadata().policy }))
}

fn put_key_policy(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let policy = require_str(body, "Policy")?;
    if policy.len() > 32768 {
        return Err(KmsError::Validation("Policy exceeds 32768 characters".to_string()));
    }
    let mut key = load_resolved(state, key_id)?;
    key.metadata_mut().policy = policy.to_string();
    state.store.save_key(&key)?;
    Ok(json!({}))
}

fn get_public_key(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let key = load_resolved(state, key_id)?;
    let signing = key.as_signing()?;
    let der = signing.public_key_der()?;
    let m = key.metadata();
    Ok(json!({
        "KeyId": m.arn,
        "PublicKey": STANDARD.encode(der),
        "CustomerMasterKeySpec": spec_str(m.spec),
        "KeySpec": spec_str(m.spec),
        "KeyUsage": key_usage_str(m.usage),
        "SigningAlgorithms": m.signing_algorithms.iter().copied().map(sig_alg_str).collect::<Vec<_>>(),
        "EncryptionAlgorithms": m.encryption_algorithms.iter().copied().map(enc_alg_str).collect::<Vec<_>>(),
    }))
}

// ---------------------------------------------------------------------
// Aliases
// ---------------------------------------------------------------------

fn create_alias(state: &AppState, body: &Value) -> KmsResult<Value> {
    let alias_name = require_str(body, "AliasName")?;
    let target_key_id = require_str(body, "TargetKeyId")?;
    validate_alias_name(alias_name)?;

    let target = load_resolved(state, target_key_id)?;
    let alias_arn = state.config.alias_arn(alias_name);
    if state.store.load_alias(&alias_arn).is_ok() {
        return Err(KmsError::AlreadyExists(format!("alias {alias_name} already exists")));
    }

    let now = now();
    state.store.save_alias(&Alias {
        alias_arn,
        alias_name: alias_name.to_string(),
        target_key_id: target.metadata().key_id.clone(),
        creation_date: now,
        last_updated_date: now,
    })?;
    Ok(json!({}))
}

fn update_alias(state: &AppState, body: &Value) -> KmsResult<Value> {
    let alias_name = require_str(body, "AliasName")?;
    let target_key_id = require_str(body, "TargetKeyId")?;
    validate_alias_name(alias_name)?;

    let alias_arn = state.config.alias_arn(alias_name);
    let mut alias = state.store.load_alias(&alias_arn)?;

    let old_target = load_resolved(state, &alias.target_key_id)?;
    let new_target = load_resolved(state, target_key_id)?;
    if old_target.metadata().usage != new_target.metadata().usage || old_target.type_name() != new_target.type_name() {
        return Err(KmsError::Validation(
            "the new target key must have the same usage and key type as the current target".to_string(),
        ));
    }

    alias.target_key_id = new_target.metadata().key_id.clone();
    alias.last_updated_date = now();
    state.store.save_alias(&alias)?;
    Ok(json!({}))
}

fn delete_alias(state: &AppState, body: &Value) -> KmsResult<Value> {
    let alias_name = require_str(body, "AliasName")?;
    let alias_arn = state.config.alias_arn(alias_name);
    state.store.load_alias(&alias_arn)?;
    state.store.delete_object(alias_arn.as_bytes())?;
    Ok(json!({}))
}

fn list_aliases(state: &AppState, body: &Value) -> KmsResult<Value> {
    let limit = opt_i64(body, "Limit").unwrap_or(100).max(1) as usize;
    let marker = opt_str(body, "Marker");
    let key_filter = match opt_str(body, "KeyId") {
        Some(key_id) => Some(load_resolved(state, key_id)?.metadata().key_id.clone()),
        None => None,
    };
    let prefix = format!("{}alias/", state.config.arn_prefix());

    let page = state.store.list_aliases(&prefix, limit, marker, key_filter.as_deref())?;
    let aliases: Vec<Value> = page
        .items
        .iter()
        .map(|a| {
            json!({
                "AliasName": a.alias_name,
                "AliasArn": a.alias_arn,
                "TargetKeyId": a.target_key_id,
                "CreationDate": a.creation_date,
                "LastUpdatedDate": a.last_updated_date,
            })
        })
        .collect();

    Ok(json!({ "Aliases": aliases, "Truncated": page.truncated, "NextMarker": page.next_marker }))
}

fn validate_alias_name(alias_name: &str) -> KmsResult<()> {
    if !alias_name.starts_with("alias/") {
        return Err(KmsError::Validation("AliasName must start with alias/".to_string()));
    }
    if alias_name.starts_with("alias/aws") {
        return Err(KmsError::NotAuthorized("the alias/aws prefix is reserved".to_string()));
    }
    if alias_name.len() > 256 {
        return Err(KmsError::Validation("AliasName exceeds 256 characters".to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------

fn tag_resource(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let arn = resolve_key_arn(state, key_id)?;
    state.store.load_key(&arn, now())?;

    let tags = body.get("Tags").and_then(Value::as_array).ok_or_else(|| KmsError::MissingParameter("Tags is required".to_string()))?;
    for tag in tags {
        let tag_key = tag.get("TagKey").and_then(Value::as_str).ok_or_else(|| KmsError::MissingParameter("TagKey is required".to_string()))?;
        let tag_value = tag.get("TagValue").and_then(Value::as_str).unwrap_or_default();
        if tag_key.is_empty() || tag_key.len() > 128 {
            return Err(KmsError::Validation("TagKey must be 1-128 characters".to_string()));
        }
        if tag_value.len() > 256 {
            return Err(KmsError::Validation("TagValue exceeds 256 characters".to_string()));
        }
        state.store.save_tag(&arn, &Tag { tag_key: tag_key.to_string(), tag_value: tag_value.to_string() })?;
    }
    Ok(json!({}))
}

fn untag_resource(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let arn = resolve_key_arn(state, key_id)?;
    state.store.load_key(&arn, now())?;

    let tag_keys = body.get("TagKeys").and_then(Value::as_array).ok_or_else(|| KmsError::MissingParameter("TagKeys is required".to_string()))?;
    for tag_key in tag_keys {
        let tag_key = tag_key.as_str().ok_or_else(|| KmsError::Validation("TagKeys entries must be strings".to_string()))?;
        state.store.delete_object(format!("{arn}/tag/{tag_key}").as_bytes())?;
    }
    Ok(json!({}))
}

fn list_resource_tags(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let arn = resolve_key_arn(state, key_id)?;
    let limit = opt_i64(body, "Limit").unwrap_or(50).max(1) as usize;
    let marker = opt_str(body, "Marker");

    let page = state.store.list_tags(&arn, limit, marker)?;
    let tags: Vec<Value> = page.items.iter().map(|t| json!({ "TagKey": t.tag_key, "TagValue": t.tag_value })).collect();
    Ok(json!({ "Tags": tags, "Truncated": page.truncated, "NextMarker": page.next_marker }))
}

// ---------------------------------------------------------------------
// Crypto operations
// ---------------------------------------------------------------------

fn encrypt(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let plaintext = require_b64(body, "Plaintext")?;
    let context = context_map(body, "EncryptionContext");
    let algorithm = match opt_str(body, "EncryptionAlgorithm") {
        Some(s) => parse_enc_alg(s)?,
        None => EncryptionAlgorithm::SymmetricDefault,
    };

    let key = load_resolved(state, key_id)?;
    require_usable(&key)?;

    let (ciphertext, reported_algorithm) = match &key {
        Key::Aes(aes) => (aes.encrypt_and_package(&plaintext, &context)?, EncryptionAlgorithm::SymmetricDefault),
        Key::Rsa(rsa) => (rsa.encrypt(&plaintext, algorithm)?, algorithm),
        Key::Ecc(_) | Key::Secp(_) => {
            return Err(KmsError::InvalidKeyUsage("this key does not support Encrypt".to_string()))
        }
    };

    Ok(json!({
        "CiphertextBlob": STANDARD.encode(ciphertext),
        "KeyId": key.arn(),
        "EncryptionAlgorithm": enc_alg_str(reported_algorithm),
    }))
}

/// Decrypt-path failures are coalesced into one opaque `AccessDeniedException`
/// so a caller cannot use error shape to probe for a key's existence (§4.H).
fn decrypt(state: &AppState, body: &Value) -> KmsResult<Value> {
    decrypt_inner(state, body).map_err(|_| KmsError::AccessDenied("could not decrypt the ciphertext".to_string()))
}

fn decrypt_inner(state: &AppState, body: &Value) -> KmsResult<Value> {
    let ciphertext = require_b64(body, "CiphertextBlob")?;
    if ciphertext.len() > MAX_ENVELOPE_LEN {
        return Err(KmsError::Validation("CiphertextBlob exceeds the maximum envelope length".to_string()));
    }
    let context = context_map(body, "EncryptionContext");
    let algorithm = match opt_str(body, "EncryptionAlgorithm") {
        Some(s) => parse_enc_alg(s)?,
        None => EncryptionAlgorithm::SymmetricDefault,
    };
    let caller_key_id = opt_str(body, "KeyId");

    let key = match caller_key_id {
        Some(key_id) => load_resolved(state, key_id)?,
        None => {
            let (ident, _, _) = crate::envelope::unpack(&ciphertext).map_err(|_| KmsError::InvalidCiphertext("malformed ciphertext".to_string()))?;
            state.store.load_key(&ident, now())?
        }
    };
    require_usable(&key)?;

    let plaintext = match &key {
        Key::Aes(aes) => {
            let (ident, version, payload) =
                crate::envelope::unpack(&ciphertext).map_err(|_| KmsError::InvalidCiphertext("malformed ciphertext".to_string()))?;
            if ident != key.arn() {
                return Err(KmsError::InvalidCiphertext("ciphertext was not produced by this key".to_string()));
            }
            aes.decrypt(version, &payload, &context)?
        }
        Key::Rsa(rsa) => rsa.decrypt(&ciphertext, algorithm)?,
        Key::Ecc(_) | Key::Secp(_) => return Err(KmsError::InvalidKeyUsage("this key does not support Decrypt".to_string())),
    };

    Ok(json!({
        "Plaintext": STANDARD.encode(plaintext),
        "KeyId": key.arn(),
        "EncryptionAlgorithm": enc_alg_str(algorithm),
    }))
}

fn re_encrypt(state: &AppState, body: &Value) -> KmsResult<Value> {
    let ciphertext = require_b64(body, "CiphertextBlob")?;
    let destination_key_id = require_str(body, "DestinationKeyId")?;
    let source_context = context_map(body, "SourceEncryptionContext");
    let destination_context = context_map(body, "DestinationEncryptionContext");

    let (ident, version, payload) =
        crate::envelope::unpack(&ciphertext).map_err(|_| KmsError::InvalidCiphertext("malformed ciphertext".to_string()))?;
    let source_key = state.store.load_key(&ident, now())?;
    require_usable(&source_key)?;
    let source_aes = source_key.as_aes()?;
    let plaintext = source_aes.decrypt(version, &payload, &source_context)?;

    let destination_key = load_resolved(state, destination_key_id)?;
    require_usable(&destination_key)?;
    let destination_aes = destination_key.as_aes()?;
    let new_ciphertext = destination_aes.encrypt_and_package(&plaintext, &destination_context)?;

    Ok(json!({
        "CiphertextBlob": STANDARD.encode(new_ciphertext),
        "SourceKeyId": source_key.arn(),
        "KeyId": destination_key.arn(),
    }))
}

fn generate_data_key(state: &AppState, body: &Value, with_plaintext: bool) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let context = context_map(body, "EncryptionContext");

    let len = match opt_str(body, "KeySpec") {
        Some("AES_256") | None => 32,
        Some("AES_128") => 16,
        Some(_) => return Err(KmsError::Validation("unsupported KeySpec".to_string())),
    };
    let len = opt_i64(body, "NumberOfBytes").map(|n| n as usize).unwrap_or(len);
    if !(1..=1024).contains(&len) {
        return Err(KmsError::Validation("NumberOfBytes must be between 1 and 1024".to_string()));
    }

    let key = load_resolved(state, key_id)?;
    require_usable(&key)?;
    let aes = key.as_aes()?;

    let plaintext = crate::rand::random_bytes(len);
    let ciphertext = aes.encrypt_and_package(&plaintext, &context)?;

    let mut response = json!({ "CiphertextBlob": STANDARD.encode(&ciphertext), "KeyId": key.arn() });
    if with_plaintext {
        response["Plaintext"] = json!(STANDARD.encode(&plaintext));
    }
    Ok(response)
}

fn generate_data_key_pair(state: &AppState, body: &Value, with_plaintext: bool) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let context = context_map(body, "EncryptionContext");
    let pair_spec = parse_spec(require_str(body, "KeyPairSpec")?)?;

    let key = load_resolved(state, key_id)?;
    require_usable(&key)?;
    let aes = key.as_aes()?;

    let (private_der, public_der) = generate_ephemeral_keypair_der(pair_spec)?;
    let ciphertext = aes.encrypt_and_package(&private_der, &context)?;

    let mut response = json!({
        "PrivateKeyCiphertextBlob": STANDARD.encode(&ciphertext),
        "PublicKey": STANDARD.encode(&public_der),
        "KeyId": key.arn(),
        "KeyPairSpec": spec_str(pair_spec),
    });
    if with_plaintext {
        response["PrivateKeyPlaintext"] = json!(STANDARD.encode(&private_der));
    }
    Ok(response)
}

/// Ephemeral asymmetric material for `GenerateDataKeyPair`: generated fresh,
/// never persisted as a CMK, wrapped under the caller's AES key and handed
/// back (plus, optionally, in the clear).
fn generate_ephemeral_keypair_der(spec: CustomerMasterKeySpec) -> KmsResult<(Vec<u8>, Vec<u8>)> {
    use rsa::pkcs8::{EncodePrivateKey as _, EncodePublicKey as _};
    use rsa::RsaPrivateKey;

    fn internal(e: impl std::fmt::Display) -> KmsError {
        KmsError::Internal(format!("DER encode failed: {e}"))
    }
    match spec {
        CustomerMasterKeySpec::Rsa2048 | CustomerMasterKeySpec::Rsa3072 | CustomerMasterKeySpec::Rsa4096 => {
            let bits = RsaKeySize::from_spec(spec)?.bits();
            let mut rng = rand::rngs::OsRng;
            let private = RsaPrivateKey::new(&mut rng, bits).map_err(|e| KmsError::Internal(format!("RSA key generation failed: {e}")))?;
            let private_der = private.to_pkcs8_der().map_err(internal)?.as_bytes().to_vec();
            let public_der = private.to_public_key().to_public_key_der().map_err(internal)?.as_bytes().to_vec();
            Ok((private_der, public_der))
        }
        CustomerMasterKeySpec::EccNistP256 => {
            use p256::ecdsa::{SigningKey, VerifyingKey};
            use p256::pkcs8::{EncodePrivateKey as _, EncodePublicKey as _};
            let private = SigningKey::random(&mut rand::rngs::OsRng);
            let private_der = private.to_pkcs8_der().map_err(internal)?.as_bytes().to_vec();
            let public_der = VerifyingKey::from(&private).to_public_key_der().map_err(internal)?.as_bytes().to_vec();
            Ok((private_der, public_der))
        }
        CustomerMasterKeySpec::EccNistP384 => {
            use p384::ecdsa::{SigningKey, VerifyingKey};
            use p384::pkcs8::{EncodePrivateKey as _, EncodePublicKey as _};
            let private = SigningKey::random(&mut rand::rngs::OsRng);
            let private_der = private.to_pkcs8_der().map_err(internal)?.as_bytes().to_vec();
            let public_der = VerifyingKey::from(&private).to_public_key_der().map_err(internal)?.as_bytes().to_vec();
            Ok((private_der, public_der))
        }
        CustomerMasterKeySpec::EccNistP521 => {
            use p521::ecdsa::{SigningKey, VerifyingKey};
            use p521::pkcs8::{EncodePrivateKey as _, EncodePublicKey as _};
            let private = SigningKey::random(&mut rand::rngs::OsRng);
            let private_der = private.to_pkcs8_der().map_err(internal)?.as_bytes().to_vec();
            let public_der = VerifyingKey::from(&private).to_public_key_der().map_err(internal)?.as_bytes().to_vec();
            Ok((private_der, public_der))
        }
        CustomerMasterKeySpec::EccSecgP256k1 => {
            use k256::ecdsa::{SigningKey, VerifyingKey};
            use k256::pkcs8::{EncodePrivateKey as _, EncodePublicKey as _};
            let private = SigningKey::random(&mut rand::rngs::OsRng);
            let private_der = private.to_pkcs8_der().map_err(internal)?.as_bytes().to_vec();
            let public_der = VerifyingKey::from(&private).to_public_key_der().map_err(internal)?.as_bytes().to_vec();
            Ok((private_der, public_der))
        }
        CustomerMasterKeySpec::SymmetricDefault => Err(KmsError::Validation("KeyPairSpec must be asymmetric".to_string())),
    }
}

/// `MessageType` is a closed two-value enum; anything else is a validation
/// error, not a silent fallback to `RAW`. A `RAW` message is also bounded to
/// 4096 bytes, matching the wire protocol's input contract.
fn parse_message_type(message: &[u8], body: &Value) -> KmsResult<&'static str> {
    match opt_str(body, "MessageType").unwrap_or("RAW") {
        "RAW" => {
            if message.len() > MAX_RAW_MESSAGE_LEN {
                return Err(KmsError::Validation(format!(
                    "message must be no more than {MAX_RAW_MESSAGE_LEN} bytes for MessageType RAW"
                )));
            }
            Ok("RAW")
        }
        "DIGEST" => Ok("DIGEST"),
        other => Err(KmsError::Validation(format!("invalid MessageType: {other}"))),
    }
}

fn sign(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let message = require_b64(body, "Message")?;
    let message_type = parse_message_type(&message, body)?;
    let algorithm = parse_sig_alg(require_str(body, "SigningAlgorithm")?)?;

    let key = load_resolved(state, key_id)?;
    require_usable(&key)?;
    let signing = key.as_signing()?;

    let digest = match message_type {
        "DIGEST" => message,
        _ => crate::cmk::hash_message(&message, algorithm),
    };
    let signature = signing.sign(&digest, algorithm)?;

    Ok(json!({
        "KeyId": key.arn(),
        "Signature": STANDARD.encode(signature),
        "SigningAlgorithm": sig_alg_str(algorithm),
    }))
}

fn verify(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let message = require_b64(body, "Message")?;
    let message_type = parse_message_type(&message, body)?;
    let signature = require_b64(body, "Signature")?;
    let algorithm = parse_sig_alg(require_str(body, "SigningAlgorithm")?)?;

    let key = load_resolved(state, key_id)?;
    require_usable(&key)?;
    let signing = key.as_signing()?;

    let digest = match message_type {
        "DIGEST" => message,
        _ => crate::cmk::hash_message(&message, algorithm),
    };
    let valid = signing.verify(&digest, &signature, algorithm)?;

    Ok(json!({
        "KeyId": key.arn(),
        "SignatureValid": valid,
        "SigningAlgorithm": sig_alg_str(algorithm),
    }))
}

fn generate_random(body: &Value) -> KmsResult<Value> {
    let n = opt_i64(body, "NumberOfBytes").unwrap_or(32) as usize;
    if !(1..=1024).contains(&n) {
        return Err(KmsError::Validation("NumberOfBytes must be between 1 and 1024".to_string()));
    }
    Ok(json!({ "Plaintext": STANDARD.encode(crate::rand::random_bytes(n)) }))
}

// ---------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------

fn get_parameters_for_import(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let wrapping_algorithm = parse_wrapping_alg(require_str(body, "WrappingAlgorithm")?)?;
    if opt_str(body, "WrappingKeySpec").unwrap_or("RSA_2048") != "RSA_2048" {
        return Err(KmsError::Validation("only RSA_2048 wrapping keys are supported".to_string()));
    }

    let mut key = load_resolved(state, key_id)?;
    if key.metadata().origin != KeyOrigin::External {
        return Err(KmsError::UnsupportedOperation("GetParametersForImport requires an EXTERNAL origin key".to_string()));
    }
    let aes = key.as_aes_mut()?;

    let (private_key, public_key_der) = crate::cmk::rsa::generate_ephemeral_wrapping_keypair()?;
    let private_key_der = {
        use rsa::pkcs8::EncodePrivateKey;
        private_key.to_pkcs8_der().map_err(|e| KmsError::Internal(format!("DER encode failed: {e}")))?.as_bytes().to_vec()
    };
    let import_token = crate::cmk::rsa::random_import_token();
    let parameters_valid_to = now() + IMPORT_TOKEN_VALID_SECS;

    aes.set_import_params(ImportParams {
        public_key_der: public_key_der.clone(),
        private_key_der,
        import_token: import_token.clone(),
        parameters_valid_to,
        wrapping_algorithm,
    });
    state.store.save_key(&key)?;

    Ok(json!({
        "KeyId": key.arn(),
        "ImportToken": STANDARD.encode(import_token),
        "PublicKey": STANDARD.encode(public_key_der),
        "ParametersValidTo": parameters_valid_to,
    }))
}

fn import_key_material(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let import_token = require_b64(body, "ImportToken")?;
    let encrypted_key_material = require_b64(body, "EncryptedKeyMaterial")?;
    let expiration_model = match opt_str(body, "ExpirationModel") {
        Some(s) => Some(parse_expiration_model(s)?),
        None => None,
    };
    let valid_to = opt_i64(body, "ValidTo");

    let mut key = load_resolved(state, key_id)?;
    let arn = key.arn().to_string();
    let aes = key.as_aes_mut()?;
    let params = aes.take_import_params()?.clone();

    if params.import_token != import_token {
        return Err(KmsError::InvalidImportToken("import token does not match".to_string()));
    }
    if params.parameters_valid_to < now() {
        return Err(KmsError::ExpiredImportToken("import token has expired".to_string()));
    }

    let material = crate::cmk::rsa::decrypt_wrapped_with_der(&params.private_key_der, &encrypted_key_material, params.wrapping_algorithm)?;
    aes.import_key_material(material)?;

    {
        let m = key.metadata_mut();
        m.state = KeyState::Enabled;
        m.enabled = true;
        m.expiration_model = expiration_model.or(Some(crate::cmk::ExpirationModel::KeyMaterialDoesNotExpire));
        m.valid_to = valid_to.unwrap_or(0);
    }
    state.store.save_key(&key)?;
    Ok(json!({ "KeyId": arn }))
}

fn delete_imported_key_material(state: &AppState, body: &Value) -> KmsResult<Value> {
    let key_id = require_str(body, "KeyId")?;
    let mut key = load_resolved(state, key_id)?;
    let aes = key.as_aes_mut()?;
    aes.delete_imported_key_material();
    {
        let m = key.metadata_mut();
        m.state = KeyState::PendingImport;
        m.enabled = false;
    }
    state.store.save_key(&key)?;
    Ok(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::{Identity, IdentityManager};
    use crate::auth::Authenticator;
    use crate::config::Config;
    use crate::store::Store;

    fn test_state() -> AppState {
        let dir = std::env::temp_dir().join(format!("local-kms-handlers-test-{}", uuid::Uuid::new_v4()));
        let store = Store::open(&dir).unwrap();
        let config = Config::default();
        let manager = IdentityManager::new(vec![Identity {
            name: "anonymous".to_string(),
            account_id: config.account_id.clone(),
            credentials: vec![],
            targets: vec!["admin".to_string()],
        }]);
        AppState { store, auth: Authenticator::new(manager), config }
    }

    #[test]
    fn create_key_then_describe_round_trips() {
        let state = test_state();
        let created = create_key(&state, &json!({})).unwrap();
        let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

        let described = describe_key(&state, &json!({ "KeyId": key_id })).unwrap();
        assert_eq!(described["KeyMetadata"]["KeyState"], "Enabled");
        assert_eq!(described["KeyMetadata"]["CustomerMasterKeySpec"], "SYMMETRIC_DEFAULT");
    }

    #[test]
    fn encrypt_then_decrypt_round_trips_plaintext() {
        let state = test_state();
        let created = create_key(&state, &json!({})).unwrap();
        let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

        let plaintext = STANDARD.encode(b"hello kms");
        let enc = encrypt(&state, &json!({ "KeyId": key_id, "Plaintext": plaintext })).unwrap();
        let ciphertext = enc["CiphertextBlob"].as_str().unwrap().to_string();

        let dec = decrypt(&state, &json!({ "CiphertextBlob": ciphertext })).unwrap();
        let recovered = STANDARD.decode(dec["Plaintext"].as_str().unwrap()).unwrap();
        assert_eq!(recovered, b"hello kms");
    }

    #[test]
    fn decrypt_of_garbage_ciphertext_is_opaque_access_denied() {
        let state = test_state();
        let err = decrypt(&state, &json!({ "CiphertextBlob": STANDARD.encode(b"not a real envelope") })).unwrap_err();
        assert_eq!(err.kind(), "AccessDeniedException");
    }

    #[test]
    fn create_alias_rejects_aws_reserved_prefix() {
        let state = test_state();
        let created = create_key(&state, &json!({})).unwrap();
        let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();
        let err = create_alias(&state, &json!({ "AliasName": "alias/aws/reserved", "TargetKeyId": key_id })).unwrap_err();
        assert_eq!(err.kind(), "NotAuthorizedException");
    }

    #[test]
    fn sign_then_verify_round_trips_for_ecc_key() {
        let state = test_state();
        let created = create_key(
            &state,
            &json!({ "KeyUsage": "SIGN_VERIFY", "CustomerMasterKeySpec": "ECC_NIST_P256" }),
        )
        .unwrap();
        let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

        let message = STANDARD.encode(b"sign me");
        let signed = sign(
            &state,
            &json!({ "KeyId": key_id, "Message": message, "SigningAlgorithm": "ECDSA_SHA_256" }),
        )
        .unwrap();

        let verified = verify(
            &state,
            &json!({
                "KeyId": key_id,
                "Message": message,
                "Signature": signed["Signature"],
                "SigningAlgorithm": "ECDSA_SHA_256",
            }),
        )
        .unwrap();
        assert_eq!(verified["SignatureValid"], true);
    }

    #[test]
    fn sign_rejects_unknown_message_type() {
        let state = test_state();
        let created = create_key(
            &state,
            &json!({ "KeyUsage": "SIGN_VERIFY", "CustomerMasterKeySpec": "ECC_NIST_P256" }),
        )
        .unwrap();
        let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

        let err = sign(
            &state,
            &json!({
                "KeyId": key_id,
                "Message": STANDARD.encode(b"sign me"),
                "MessageType": "HASH",
                "SigningAlgorithm": "ECDSA_SHA_256",
            }),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "ValidationException");
    }

    #[test]
    fn sign_rejects_raw_message_over_4096_bytes() {
        let state = test_state();
        let created = create_key(
            &state,
            &json!({ "KeyUsage": "SIGN_VERIFY", "CustomerMasterKeySpec": "ECC_NIST_P256" }),
        )
        .unwrap();
        let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

        let message = STANDARD.encode(vec![0u8; MAX_RAW_MESSAGE_LEN + 1]);
        let err = sign(
            &state,
            &json!({ "KeyId": key_id, "Message": message, "SigningAlgorithm": "ECDSA_SHA_256" }),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "ValidationException");
    }
}
