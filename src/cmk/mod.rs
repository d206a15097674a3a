//! Customer Master Key (CMK) value types (component C).
//!
//! A `Key` is a closed, tagged variant over the four backing-material shapes
//! the service supports. Capabilities common to all variants are inherent
//! methods on `Key`; the subset that can sign/verify is exposed through
//! [`SigningKey`], implemented only by `Rsa`, `Ecc`, and `Secp`.

pub mod aes;
pub mod b64;
pub mod ecc;
pub mod ecdsa_der;
pub mod rsa;
pub mod secp;

use serde::{Deserialize, Serialize};

pub use aes::AesKey;
pub use ecc::EccKey;
pub use rsa::RsaKey;
pub use secp::SecpKey;

use crate::error::{KmsError, KmsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyState {
    Enabled,
    Disabled,
    PendingImport,
    PendingDeletion,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyUsage {
    EncryptDecrypt,
    SignVerify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyOrigin {
    AwsKms,
    External,
    AwsCloudHsm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpirationModel {
    KeyMaterialExpires,
    KeyMaterialDoesNotExpire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerMasterKeySpec {
    SymmetricDefault,
    Rsa2048,
    Rsa3072,
    Rsa4096,
    EccNistP256,
    EccNistP384,
    EccNistP521,
    EccSecgP256k1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    SymmetricDefault,
    RsaesOaepSha1,
    RsaesOaepSha256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    EcdsaSha256,
    EcdsaSha384,
    EcdsaSha512,
    RsassaPssSha256,
    RsassaPssSha384,
    RsassaPssSha512,
    RsassaPkcs1V15Sha256,
    RsassaPkcs1V15Sha384,
    RsassaPkcs1V15Sha512,
}

impl SigningAlgorithm {
    /// Expected raw digest length in bytes for this algorithm's hash.
    pub fn digest_len(&self) -> usize {
        use SigningAlgorithm::*;
        match self {
            EcdsaSha256 | RsassaPssSha256 | RsassaPkcs1V15Sha256 => 32,
            EcdsaSha384 | RsassaPssSha384 | RsassaPkcs1V15Sha384 => 48,
            EcdsaSha512 | RsassaPssSha512 | RsassaPkcs1V15Sha512 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrappingAlgorithm {
    RsaesPkcs1V15,
    RsaesOaepSha1,
    RsaesOaepSha256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportParams {
    #[serde(with = "b64")]
    pub public_key_der: Vec<u8>,
    #[serde(with = "b64")]
    pub private_key_der: Vec<u8>,
    #[serde(with = "b64")]
    pub import_token: Vec<u8>,
    pub parameters_valid_to: i64,
    pub wrapping_algorithm: WrappingAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub account_id: String,
    pub region: String,
    pub arn: String,
    pub key_id: String,
    pub description: String,
    pub policy: String,
    pub creation_date: i64,
    pub deletion_date: i64,
    pub enabled: bool,
    pub state: KeyState,
    pub origin: KeyOrigin,
    pub usage: KeyUsage,
    pub spec: CustomerMasterKeySpec,
    pub key_manager: String,
    pub expiration_model: Option<ExpirationModel>,
    pub valid_to: i64,
    pub signing_algorithms: Vec<SigningAlgorithm>,
    pub encryption_algorithms: Vec<EncryptionAlgorithm>,
}

impl KeyMetadata {
    pub fn is_pending_deletion(&self) -> bool {
        self.deletion_date != 0
    }
}

/// The four-variant closed key type, tagged on disk for polymorphic decoding.
///
/// Legacy/zero-discriminant records decode as `Aes` for backward compatibility
/// with records written before the discriminant existed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "key_type")]
pub enum Key {
    #[serde(alias = "")]
    Aes(AesKey),
    Rsa(RsaKey),
    Ecc(EccKey),
    Secp(SecpKey),
}

impl Key {
    pub fn metadata(&self) -> &KeyMetadata {
        match self {
            Key::Aes(k) => &k.metadata,
            Key::Rsa(k) => &k.metadata,
            Key::Ecc(k) => &k.metadata,
            Key::Secp(k) => &k.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut KeyMetadata {
        match self {
            Key::Aes(k) => &mut k.metadata,
            Key::Rsa(k) => &mut k.metadata,
            Key::Ecc(k) => &mut k.metadata,
            Key::Secp(k) => &mut k.metadata,
        }
    }

    pub fn arn(&self) -> &str {
        &self.metadata().arn
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Key::Aes(_) => "AES",
            Key::Rsa(_) => "RSA",
            Key::Ecc(_) => "ECC",
            Key::Secp(_) => "SECP",
        }
    }

    pub fn as_aes(&self) -> KmsResult<&AesKey> {
        match self {
            Key::Aes(k) => Ok(k),
            _ => Err(KmsError::InvalidKeyUsage(
                "target key is not a symmetric key".to_string(),
            )),
        }
    }

    pub fn as_aes_mut(&mut self) -> KmsResult<&mut AesKey> {
        match self {
            Key::Aes(k) => Ok(k),
            _ => Err(KmsError::InvalidKeyUsage(
                "target key is not a symmetric key".to_string(),
            )),
        }
    }

    pub fn as_signing(&self) -> KmsResult<&dyn SigningKey> {
        match self {
            Key::Rsa(k) => Ok(k),
            Key::Ecc(k) => Ok(k),
            Key::Secp(k) => Ok(k),
            Key::Aes(_) => Err(KmsError::InvalidKeyUsage(
                "symmetric keys do not support sign/verify".to_string(),
            )),
        }
    }
}

/// Capability implemented by the three asymmetric variants.
pub trait SigningKey {
    fn signing_algorithms(&self) -> &[SigningAlgorithm];
    fn sign(&self, digest: &[u8], algorithm: SigningAlgorithm) -> KmsResult<Vec<u8>>;
    fn verify(&self, digest: &[u8], signature: &[u8], algorithm: SigningAlgorithm) -> KmsResult<bool>;
    fn public_key_der(&self) -> KmsResult<Vec<u8>>;

    fn validate_algorithm(&self, algorithm: SigningAlgorithm) -> KmsResult<()> {
        if self.signing_algorithms().contains(&algorithm) {
            Ok(())
        } else {
            Err(KmsError::InvalidKeyUsage(format!(
                "{:?} is not a supported signing algorithm for this key",
                algorithm
            )))
        }
    }

    fn validate_digest_len(&self, digest: &[u8], algorithm: SigningAlgorithm) -> KmsResult<()> {
        if digest.len() == algorithm.digest_len() {
            Ok(())
        } else {
            Err(KmsError::Validation(format!(
                "invalid digest length {} for {:?}",
                digest.len(),
                algorithm
            )))
        }
    }
}

/// SHA-256/384/512 of `message`, selected by the algorithm's hash suffix.
pub fn hash_message(message: &[u8], algorithm: SigningAlgorithm) -> Vec<u8> {
    use sha2::{Digest, Sha256, Sha384, Sha512};
    match algorithm.digest_len() {
        32 => Sha256::digest(message).to_vec(),
        48 => Sha384::digest(message).to_vec(),
        _ => Sha512::digest(message).to_vec(),
    }
}
