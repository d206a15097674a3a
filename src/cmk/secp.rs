//! The secp256k1 CMK variant.
//!
//! Kept as its own variant rather than folded into [`super::ecc::EccKey`]
//! because AWS restricts it to a single signing algorithm and, per the
//! resolved design decision recorded in the project spec, Verify only ever
//! accepts the DER `SEQUENCE { r, s }` form — no 65-byte recoverable
//! signature support.

use ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature as K256Signature, SigningKey as K256SigningKey, VerifyingKey as K256VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ecdsa_der;
use super::{KeyMetadata, SigningAlgorithm, SigningKey};
use crate::error::{KmsError, KmsResult};

const SCALAR_WIDTH: usize = 32;

pub struct SecpKey {
    pub metadata: KeyMetadata,
    inner: K256SigningKey,
}

impl std::fmt::Debug for SecpKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecpKey")
            .field("metadata", &self.metadata)
            .field("inner", &"[REDACTED]")
            .finish()
    }
}

impl Clone for SecpKey {
    fn clone(&self) -> Self {
        SecpKey::from_scalar(self.metadata.clone(), &self.inner.to_bytes())
            .expect("re-deriving from a valid scalar cannot fail")
    }
}

impl SecpKey {
    pub fn generate(metadata: KeyMetadata) -> Self {
        let mut rng = rand::rngs::OsRng;
        Self { metadata, inner: K256SigningKey::random(&mut rng) }
    }

    fn from_scalar(metadata: KeyMetadata, scalar: &[u8]) -> KmsResult<Self> {
        let inner = K256SigningKey::from_bytes(scalar.into())
            .map_err(|e| KmsError::Internal(format!("invalid secp256k1 scalar: {e}")))?;
        Ok(Self { metadata, inner })
    }
}

impl SigningKey for SecpKey {
    fn signing_algorithms(&self) -> &[SigningAlgorithm] {
        &self.metadata.signing_algorithms
    }

    fn sign(&self, digest: &[u8], algorithm: SigningAlgorithm) -> KmsResult<Vec<u8>> {
        self.validate_algorithm(algorithm)?;
        self.validate_digest_len(digest, algorithm)?;

        let sig: K256Signature = self
            .inner
            .sign_prehash(digest)
            .map_err(|e| KmsError::Internal(format!("sign failed: {e}")))?;
        let bytes = sig.to_bytes();
        let (r, s) = (&bytes[..SCALAR_WIDTH], &bytes[SCALAR_WIDTH..]);
        Ok(ecdsa_der::encode(r, s))
    }

    fn verify(&self, digest: &[u8], signature: &[u8], algorithm: SigningAlgorithm) -> KmsResult<bool> {
        self.validate_algorithm(algorithm)?;
        self.validate_digest_len(digest, algorithm)?;

        let (r, s) = match ecdsa_der::decode(signature) {
            Ok(pair) => pair,
            Err(_) => return Ok(false),
        };
        let mut concat = ecdsa_der::fixed_width(&r, SCALAR_WIDTH);
        concat.extend_from_slice(&ecdsa_der::fixed_width(&s, SCALAR_WIDTH));

        let Ok(sig) = K256Signature::from_slice(&concat) else { return Ok(false) };
        let verifying_key = K256VerifyingKey::from(&self.inner);
        Ok(verifying_key.verify_prehash(digest, &sig).is_ok())
    }

    fn public_key_der(&self) -> KmsResult<Vec<u8>> {
        use k256::pkcs8::EncodePublicKey;
        K256VerifyingKey::from(&self.inner)
            .to_public_key_der()
            .map(|d| d.as_bytes().to_vec())
            .map_err(|e| KmsError::Internal(format!("DER encode failed: {e}")))
    }
}

#[derive(Serialize, Deserialize)]
struct SecpKeyRecord {
    metadata: KeyMetadata,
    #[serde(with = "super::b64")]
    private_scalar: Vec<u8>,
}

impl Serialize for SecpKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        SecpKeyRecord {
            metadata: self.metadata.clone(),
            private_scalar: self.inner.to_bytes().to_vec(),
        }
        .serialize(s)
    }
}

impl<'de> Deserialize<'de> for SecpKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let record = SecpKeyRecord::deserialize(d)?;
        SecpKey::from_scalar(record.metadata, &record.private_scalar).map_err(serde::de::Error::custom)
    }
}
