//! The RSA CMK variant: encrypt/decrypt (OAEP) and sign/verify (PSS, PKCS#1 v1.5).

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use super::{hash_message, CustomerMasterKeySpec, EncryptionAlgorithm, KeyMetadata, KeyUsage, SigningAlgorithm, SigningKey};
use crate::error::{KmsError, KmsResult};
use crate::rand::random_bytes;

#[derive(Debug, Clone, Copy)]
pub enum RsaKeySize {
    Bits2048,
    Bits3072,
    Bits4096,
}

impl RsaKeySize {
    pub fn bits(&self) -> usize {
        match self {
            RsaKeySize::Bits2048 => 2048,
            RsaKeySize::Bits3072 => 3072,
            RsaKeySize::Bits4096 => 4096,
        }
    }

    pub fn from_spec(spec: CustomerMasterKeySpec) -> KmsResult<Self> {
        match spec {
            CustomerMasterKeySpec::Rsa2048 => Ok(RsaKeySize::Bits2048),
            CustomerMasterKeySpec::Rsa3072 => Ok(RsaKeySize::Bits3072),
            CustomerMasterKeySpec::Rsa4096 => Ok(RsaKeySize::Bits4096),
            _ => Err(KmsError::Validation("not an RSA key spec".to_string())),
        }
    }
}

pub struct RsaKey {
    pub metadata: KeyMetadata,
    pub private_key: RsaPrivateKey,
}

impl std::fmt::Debug for RsaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKey")
            .field("metadata", &self.metadata)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl Clone for RsaKey {
    fn clone(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            private_key: self.private_key.clone(),
        }
    }
}

impl RsaKey {
    pub fn generate(metadata: KeyMetadata, size: RsaKeySize) -> KmsResult<Self> {
        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, size.bits())
            .map_err(|e| KmsError::Internal(format!("RSA key generation failed: {e}")))?;
        Ok(Self { metadata, private_key })
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    fn oaep_for(algorithm: EncryptionAlgorithm) -> KmsResult<Oaep> {
        match algorithm {
            EncryptionAlgorithm::RsaesOaepSha1 => Ok(Oaep::new::<Sha1>()),
            EncryptionAlgorithm::RsaesOaepSha256 => Ok(Oaep::new::<Sha256>()),
            EncryptionAlgorithm::SymmetricDefault => Err(KmsError::InvalidKeyUsage(
                "SYMMETRIC_DEFAULT is not valid for an RSA key".to_string(),
            )),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8], algorithm: EncryptionAlgorithm) -> KmsResult<Vec<u8>> {
        if self.metadata.usage != KeyUsage::EncryptDecrypt {
            return Err(KmsError::InvalidKeyUsage(
                "key usage does not support Encrypt".to_string(),
            ));
        }
        let mut rng = rand::rngs::OsRng;
        let padding = Self::oaep_for(algorithm)?;
        self.public_key()
            .encrypt(&mut rng, padding, plaintext)
            .map_err(|e| KmsError::Internal(format!("RSA encrypt failed: {e}")))
    }

    pub fn decrypt(&self, ciphertext: &[u8], algorithm: EncryptionAlgorithm) -> KmsResult<Vec<u8>> {
        if self.metadata.usage != KeyUsage::EncryptDecrypt {
            return Err(KmsError::InvalidKeyUsage(
                "key usage does not support Decrypt".to_string(),
            ));
        }
        let padding = Self::oaep_for(algorithm)?;
        self.private_key
            .decrypt(padding, ciphertext)
            .map_err(|_| KmsError::InvalidCiphertext("RSA decryption failed".to_string()))
    }

    /// Decrypt wrapped import material using a wrapping algorithm (may include PKCS#1 v1.5).
    pub fn decrypt_wrapped(&self, ciphertext: &[u8], algorithm: super::WrappingAlgorithm) -> KmsResult<Vec<u8>> {
        decrypt_wrapped_der(&self.private_key, ciphertext, algorithm)
    }
}

fn decrypt_wrapped_der(private_key: &RsaPrivateKey, ciphertext: &[u8], algorithm: super::WrappingAlgorithm) -> KmsResult<Vec<u8>> {
    use super::WrappingAlgorithm::*;
    match algorithm {
        RsaesPkcs1V15 => private_key
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|_| KmsError::InvalidCiphertext("unwrap failed".to_string())),
        RsaesOaepSha1 => private_key
            .decrypt(Oaep::new::<Sha1>(), ciphertext)
            .map_err(|_| KmsError::InvalidCiphertext("unwrap failed".to_string())),
        RsaesOaepSha256 => private_key
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|_| KmsError::InvalidCiphertext("unwrap failed".to_string())),
    }
}

/// Decrypt import material wrapped for a key whose private wrapping key is
/// only known as PKCS#8 DER (the shape [`ImportParams`] persists it in).
pub fn decrypt_wrapped_with_der(private_key_der: &[u8], ciphertext: &[u8], algorithm: super::WrappingAlgorithm) -> KmsResult<Vec<u8>> {
    let private_key = RsaPrivateKey::from_pkcs8_der(private_key_der)
        .map_err(|e| KmsError::Internal(format!("stored wrapping key is corrupt: {e}")))?;
    decrypt_wrapped_der(&private_key, ciphertext, algorithm)
}

impl SigningKey for RsaKey {
    fn signing_algorithms(&self) -> &[SigningAlgorithm] {
        &self.metadata.signing_algorithms
    }

    fn sign(&self, digest: &[u8], algorithm: SigningAlgorithm) -> KmsResult<Vec<u8>> {
        self.validate_algorithm(algorithm)?;
        self.validate_digest_len(digest, algorithm)?;

        use SigningAlgorithm::*;
        match algorithm {
            RsassaPssSha256 => {
                let mut rng = rand::rngs::OsRng;
                self.private_key
                    .sign_with_rng(&mut rng, rsa::pss::Pss::new::<Sha256>(), digest)
            }
            RsassaPssSha384 => {
                let mut rng = rand::rngs::OsRng;
                self.private_key
                    .sign_with_rng(&mut rng, rsa::pss::Pss::new::<Sha384>(), digest)
            }
            RsassaPssSha512 => {
                let mut rng = rand::rngs::OsRng;
                self.private_key
                    .sign_with_rng(&mut rng, rsa::pss::Pss::new::<Sha512>(), digest)
            }
            RsassaPkcs1V15Sha256 => self
                .private_key
                .sign(Pkcs1v15Sign::new::<Sha256>(), digest),
            RsassaPkcs1V15Sha384 => self
                .private_key
                .sign(Pkcs1v15Sign::new::<Sha384>(), digest),
            RsassaPkcs1V15Sha512 => self
                .private_key
                .sign(Pkcs1v15Sign::new::<Sha512>(), digest),
            _ => return Err(KmsError::InvalidKeyUsage("not an RSA signing algorithm".to_string())),
        }
        .map_err(|e| KmsError::Internal(format!("RSA sign failed: {e}")))
    }

    fn verify(&self, digest: &[u8], signature: &[u8], algorithm: SigningAlgorithm) -> KmsResult<bool> {
        self.validate_algorithm(algorithm)?;
        self.validate_digest_len(digest, algorithm)?;

        use SigningAlgorithm::*;
        let public_key = self.public_key();
        let ok = match algorithm {
            RsassaPssSha256 => public_key
                .verify(rsa::pss::Pss::new::<Sha256>(), digest, signature)
                .is_ok(),
            RsassaPssSha384 => public_key
                .verify(rsa::pss::Pss::new::<Sha384>(), digest, signature)
                .is_ok(),
            RsassaPssSha512 => public_key
                .verify(rsa::pss::Pss::new::<Sha512>(), digest, signature)
                .is_ok(),
            RsassaPkcs1V15Sha256 => public_key
                .verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
                .is_ok(),
            RsassaPkcs1V15Sha384 => public_key
                .verify(Pkcs1v15Sign::new::<Sha384>(), digest, signature)
                .is_ok(),
            RsassaPkcs1V15Sha512 => public_key
                .verify(Pkcs1v15Sign::new::<Sha512>(), digest, signature)
                .is_ok(),
            _ => return Err(KmsError::InvalidKeyUsage("not an RSA signing algorithm".to_string())),
        };
        Ok(ok)
    }

    fn public_key_der(&self) -> KmsResult<Vec<u8>> {
        self.public_key()
            .to_public_key_der()
            .map(|d| d.as_bytes().to_vec())
            .map_err(|e| KmsError::Internal(format!("DER encode failed: {e}")))
    }
}

/// Generate an ephemeral RSA-2048 wrapping keypair for `GetParametersForImport`.
pub fn generate_ephemeral_wrapping_keypair() -> KmsResult<(RsaPrivateKey, Vec<u8>)> {
    let mut rng = rand::rngs::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048)
        .map_err(|e| KmsError::Internal(format!("RSA key generation failed: {e}")))?;
    let public_der = private_key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| KmsError::Internal(format!("DER encode failed: {e}")))?
        .as_bytes()
        .to_vec();
    Ok((private_key, public_der))
}

pub fn random_import_token() -> Vec<u8> {
    random_bytes(256)
}

// --- Serialization: PKCS#8 DER under the hood, JSON-visible as base64. ---

#[derive(Serialize, Deserialize)]
struct RsaKeyRecord {
    metadata: KeyMetadata,
    #[serde(with = "super::b64")]
    private_key_der: Vec<u8>,
}

impl Serialize for RsaKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let der = self
            .private_key
            .to_pkcs8_der()
            .map_err(serde::ser::Error::custom)?;
        RsaKeyRecord {
            metadata: self.metadata.clone(),
            private_key_der: der.as_bytes().to_vec(),
        }
        .serialize(s)
    }
}

impl<'de> Deserialize<'de> for RsaKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let record = RsaKeyRecord::deserialize(d)?;
        let private_key = RsaPrivateKey::from_pkcs8_der(&record.private_key_der)
            .map_err(serde::de::Error::custom)?;
        Ok(RsaKey {
            metadata: record.metadata,
            private_key,
        })
    }
}

pub fn hash_for_sign(message: &[u8], algorithm: SigningAlgorithm) -> Vec<u8> {
    hash_message(message, algorithm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmk::{CustomerMasterKeySpec, KeyOrigin, KeyState};

    fn metadata(usage: KeyUsage, algos: Vec<SigningAlgorithm>) -> KeyMetadata {
        KeyMetadata {
            account_id: "111122223333".into(),
            region: "eu-west-2".into(),
            arn: "arn:aws:kms:eu-west-2:111122223333:key/rsa-test".into(),
            key_id: "rsa-test".into(),
            description: String::new(),
            policy: String::new(),
            creation_date: 0,
            deletion_date: 0,
            enabled: true,
            state: KeyState::Enabled,
            origin: KeyOrigin::AwsKms,
            usage,
            spec: CustomerMasterKeySpec::Rsa2048,
            key_manager: "CUSTOMER".into(),
            expiration_model: None,
            valid_to: 0,
            signing_algorithms: algos,
            encryption_algorithms: vec![],
        }
    }

    #[test]
    fn sign_verify_round_trip() {
        let key = RsaKey::generate(
            metadata(KeyUsage::SignVerify, vec![SigningAlgorithm::RsassaPssSha256]),
            RsaKeySize::Bits2048,
        )
        .unwrap();
        let digest = [7u8; 32];
        let sig = key.sign(&digest, SigningAlgorithm::RsassaPssSha256).unwrap();
        assert!(key.verify(&digest, &sig, SigningAlgorithm::RsassaPssSha256).unwrap());

        let mut bad_sig = sig.clone();
        bad_sig[0] ^= 0xFF;
        assert!(!key.verify(&digest, &bad_sig, SigningAlgorithm::RsassaPssSha256).unwrap());
    }

    #[test]
    fn rejects_algorithm_not_in_signing_list() {
        let key = RsaKey::generate(
            metadata(KeyUsage::SignVerify, vec![SigningAlgorithm::RsassaPssSha256]),
            RsaKeySize::Bits2048,
        )
        .unwrap();
        let err = key
            .sign(&[0u8; 32], SigningAlgorithm::RsassaPkcs1V15Sha256)
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidKeyUsageException");
    }
}
