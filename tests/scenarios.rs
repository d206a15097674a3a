//! End-to-end scenarios driving the handler layer directly (no HTTP, no
//! SigV4) against a temporary `sled` database, one per key lifecycle shape.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

use local_kms::api::handlers::dispatch;
use local_kms::api::AppState;
use local_kms::auth::identity::{Identity, IdentityManager};
use local_kms::auth::Authenticator;
use local_kms::config::Config;
use local_kms::store::Store;

fn test_state() -> AppState {
    let dir = std::env::temp_dir().join(format!("local-kms-scenario-{}", uuid::Uuid::new_v4()));
    let store = Store::open(&dir).unwrap();
    let config = Config::default();
    let identities = IdentityManager::new(vec![Identity {
        name: "anonymous".to_string(),
        account_id: config.account_id.clone(),
        credentials: vec![],
        targets: vec!["admin".to_string()],
    }]);
    AppState { store, auth: Authenticator::new(identities), config }
}

fn hex_key(a: &str, b: &str) -> Vec<u8> {
    hex::decode(format!("{a}{b}")).unwrap()
}

/// S1: seed an AES key with two backing key versions directly through the
/// store, then confirm Encrypt/Decrypt round-trip regardless of which
/// backing version produced the ciphertext.
#[test]
fn s1_seeded_aes_key_round_trips_across_backing_versions() {
    let state = test_state();

    let key_id = "bc436485-5092-42b8-92a3-0aa8b93536dc";
    let arn = state.config.key_arn(key_id);
    let metadata = local_kms::cmk::KeyMetadata {
        account_id: state.config.account_id.clone(),
        region: state.config.region.clone(),
        arn: arn.clone(),
        key_id: key_id.to_string(),
        description: String::new(),
        policy: "default".to_string(),
        creation_date: 0,
        deletion_date: 0,
        enabled: true,
        state: local_kms::cmk::KeyState::Enabled,
        origin: local_kms::cmk::KeyOrigin::AwsKms,
        usage: local_kms::cmk::KeyUsage::EncryptDecrypt,
        spec: local_kms::cmk::CustomerMasterKeySpec::SymmetricDefault,
        key_manager: "CUSTOMER".to_string(),
        expiration_model: None,
        valid_to: 0,
        signing_algorithms: vec![],
        encryption_algorithms: vec![local_kms::cmk::EncryptionAlgorithm::SymmetricDefault],
    };
    let mut aes = local_kms::cmk::AesKey::new(metadata);
    aes.backing_keys = vec![
        hex_key("34743777", "4428").repeat(4),
        hex_key("614E6452", "5971").repeat(4),
    ];
    state.store.save_key(&local_kms::cmk::Key::Aes(aes)).unwrap();

    let plaintext = STANDARD.encode(b"hello");
    let enc = dispatch(&state, "Encrypt", &json!({ "KeyId": key_id, "Plaintext": plaintext })).unwrap();
    let ciphertext = enc["CiphertextBlob"].as_str().unwrap().to_string();

    let dec = dispatch(&state, "Decrypt", &json!({ "CiphertextBlob": ciphertext })).unwrap();
    assert_eq!(STANDARD.decode(dec["Plaintext"].as_str().unwrap()).unwrap(), b"hello");
    assert_eq!(dec["KeyId"], arn);
}

/// S2: an ECC P-256 signing key round-trips Sign/Verify.
#[test]
fn s2_ecc_sign_verify_round_trip() {
    let state = test_state();
    let created = dispatch(
        &state,
        "CreateKey",
        &json!({ "CustomerMasterKeySpec": "ECC_NIST_P256", "KeyUsage": "SIGN_VERIFY" }),
    )
    .unwrap();
    assert_eq!(created["KeyMetadata"]["SigningAlgorithms"], json!(["ECDSA_SHA_256"]));
    let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

    let message = STANDARD.encode(b"abc");
    let signed = dispatch(
        &state,
        "Sign",
        &json!({ "KeyId": key_id, "Message": message, "MessageType": "RAW", "SigningAlgorithm": "ECDSA_SHA_256" }),
    )
    .unwrap();

    let verified = dispatch(
        &state,
        "Verify",
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

/// S3: the external-origin import lifecycle, including the
/// delete-imported-material round trip back to `PendingImport`.
#[test]
fn s3_external_key_import_lifecycle() {
    let state = test_state();
    let created = dispatch(&state, "CreateKey", &json!({ "Origin": "EXTERNAL" })).unwrap();
    assert_eq!(created["KeyMetadata"]["KeyState"], "PendingImport");
    let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

    let params = dispatch(
        &state,
        "GetParametersForImport",
        &json!({ "KeyId": key_id, "WrappingAlgorithm": "RSAES_OAEP_SHA_256", "WrappingKeySpec": "RSA_2048" }),
    )
    .unwrap();
    let public_key_der = STANDARD.decode(params["PublicKey"].as_str().unwrap()).unwrap();
    let import_token = params["ImportToken"].clone();

    let material = [7u8; 32];
    let public_key =
        <rsa::RsaPublicKey as rsa::pkcs8::DecodePublicKey>::from_public_key_der(&public_key_der).unwrap();
    let mut rng = rand::rngs::OsRng;
    let encrypted = public_key.encrypt(&mut rng, rsa::Oaep::new::<sha2::Sha256>(), &material).unwrap();

    dispatch(
        &state,
        "ImportKeyMaterial",
        &json!({
            "KeyId": key_id,
            "ImportToken": import_token,
            "EncryptedKeyMaterial": STANDARD.encode(encrypted),
            "ExpirationModel": "KEY_MATERIAL_DOES_NOT_EXPIRE",
        }),
    )
    .unwrap();

    let plaintext = STANDARD.encode(b"after import");
    dispatch(&state, "Encrypt", &json!({ "KeyId": key_id, "Plaintext": plaintext })).unwrap();

    dispatch(&state, "DeleteImportedKeyMaterial", &json!({ "KeyId": key_id })).unwrap();
    let err = dispatch(&state, "Encrypt", &json!({ "KeyId": key_id, "Plaintext": plaintext })).unwrap_err();
    assert_eq!(err.kind(), "KMSInvalidStateException");
}

/// S4: generated data keys are 32 bytes and decrypt back to themselves.
#[test]
fn s4_generate_data_key_round_trips() {
    let state = test_state();
    let created = dispatch(&state, "CreateKey", &json!({})).unwrap();
    let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

    let generated = dispatch(&state, "GenerateDataKey", &json!({ "KeyId": key_id, "KeySpec": "AES_256" })).unwrap();
    let plaintext = STANDARD.decode(generated["Plaintext"].as_str().unwrap()).unwrap();
    assert_eq!(plaintext.len(), 32);

    let dec = dispatch(&state, "Decrypt", &json!({ "CiphertextBlob": generated["CiphertextBlob"] })).unwrap();
    assert_eq!(STANDARD.decode(dec["Plaintext"].as_str().unwrap()).unwrap(), plaintext);
}

/// S5: scheduled deletion blocks state-changing/crypto operations until
/// cancelled.
#[test]
fn s5_scheduled_deletion_blocks_then_cancel_restores() {
    let state = test_state();
    let created = dispatch(&state, "CreateKey", &json!({})).unwrap();
    let key_id = created["KeyMetadata"]["KeyId"].as_str().unwrap().to_string();

    let scheduled =
        dispatch(&state, "ScheduleKeyDeletion", &json!({ "KeyId": key_id, "PendingWindowInDays": 7 })).unwrap();
    assert!(scheduled["DeletionDate"].as_i64().unwrap() > 0);

    let plaintext = STANDARD.encode(b"x");
    let err = dispatch(&state, "Encrypt", &json!({ "KeyId": key_id, "Plaintext": plaintext.clone() })).unwrap_err();
    assert_eq!(err.kind(), "KMSInvalidStateException");

    dispatch(&state, "CancelKeyDeletion", &json!({ "KeyId": key_id })).unwrap();
    dispatch(&state, "Encrypt", &json!({ "KeyId": key_id, "Plaintext": plaintext })).unwrap();
}

/// S6: aliases resolve to their target key, and `UpdateAlias` enforces that
/// the replacement target has the same usage and key type.
#[test]
fn s6_alias_resolution_and_update_type_check() {
    let state = test_state();
    let k1 = dispatch(&state, "CreateKey", &json!({})).unwrap()["KeyMetadata"]["KeyId"]
        .as_str()
        .unwrap()
        .to_string();
    let k2 = dispatch(&state, "CreateKey", &json!({})).unwrap()["KeyMetadata"]["KeyId"]
        .as_str()
        .unwrap()
        .to_string();
    let asymmetric = dispatch(
        &state,
        "CreateKey",
        &json!({ "CustomerMasterKeySpec": "ECC_NIST_P256", "KeyUsage": "SIGN_VERIFY" }),
    )
    .unwrap()["KeyMetadata"]["KeyId"]
        .as_str()
        .unwrap()
        .to_string();

    dispatch(&state, "CreateAlias", &json!({ "AliasName": "alias/testing", "TargetKeyId": k1 })).unwrap();

    let encrypted =
        dispatch(&state, "Encrypt", &json!({ "KeyId": "alias/testing", "Plaintext": STANDARD.encode(b"x") })).unwrap();
    assert_eq!(encrypted["KeyId"], state.config.key_arn(&k1));

    dispatch(&state, "UpdateAlias", &json!({ "AliasName": "alias/testing", "TargetKeyId": k2 })).unwrap();

    let err = dispatch(&state, "UpdateAlias", &json!({ "AliasName": "alias/testing", "TargetKeyId": asymmetric }))
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationException");
}
