//! The NIST-curve ECDSA CMK variant (P-256, P-384, P-521).
//!
//! The original curve is named by string on disk (`P-256`, `P-384`, `P-521`)
//! and rehydrated into the concrete RustCrypto curve type on load, since Rust
//! has no runtime-polymorphic elliptic curve type the way a dynamically typed
//! `ecdsa.Curve` interface does.

use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use p384::ecdsa::{Signature as P384Signature, SigningKey as P384SigningKey, VerifyingKey as P384VerifyingKey};
use p521::ecdsa::{Signature as P521Signature, SigningKey as P521SigningKey, VerifyingKey as P521VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ecdsa_der;
use super::{CustomerMasterKeySpec, KeyMetadata, SigningAlgorithm, SigningKey};
use crate::error::{KmsError, KmsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccCurve {
    P256,
    P384,
    P521,
}

impl EccCurve {
    pub fn from_spec(spec: CustomerMasterKeySpec) -> KmsResult<Self> {
        match spec {
            CustomerMasterKeySpec::EccNistP256 => Ok(EccCurve::P256),
            CustomerMasterKeySpec::EccNistP384 => Ok(EccCurve::P384),
            CustomerMasterKeySpec::EccNistP521 => Ok(EccCurve::P521),
            _ => Err(KmsError::Validation("not a NIST ECC key spec".to_string())),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            EccCurve::P256 => "P-256",
            EccCurve::P384 => "P-384",
            EccCurve::P521 => "P-521",
        }
    }

    fn from_name(name: &str) -> KmsResult<Self> {
        match name {
            "P-256" => Ok(EccCurve::P256),
            "P-384" => Ok(EccCurve::P384),
            "P-521" => Ok(EccCurve::P521),
            other => Err(KmsError::Internal(format!("unknown ECC curve on disk: {other}"))),
        }
    }

    fn scalar_width(&self) -> usize {
        match self {
            EccCurve::P256 => 32,
            EccCurve::P384 => 48,
            EccCurve::P521 => 66,
        }
    }
}

enum Inner {
    P256(P256SigningKey),
    P384(P384SigningKey),
    P521(P521SigningKey),
}

pub struct EccKey {
    pub metadata: KeyMetadata,
    curve: EccCurve,
    inner: Inner,
}

impl std::fmt::Debug for EccKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EccKey")
            .field("metadata", &self.metadata)
            .field("curve", &self.curve)
            .field("inner", &"[REDACTED]")
            .finish()
    }
}

impl Clone for EccKey {
    fn clone(&self) -> Self {
        let scalar = self.scalar_bytes();
        EccKey::from_scalar(self.metadata.clone(), self.curve, &scalar)
            .expect("re-deriving from a valid scalar cannot fail")
    }
}

impl EccKey {
    pub fn generate(metadata: KeyMetadata, curve: EccCurve) -> Self {
        let mut rng = rand::rngs::OsRng;
        let inner = match curve {
            EccCurve::P256 => Inner::P256(P256SigningKey::random(&mut rng)),
            EccCurve::P384 => Inner::P384(P384SigningKey::random(&mut rng)),
            EccCurve::P521 => Inner::P521(P521SigningKey::random(&mut rng)),
        };
        Self { metadata, curve, inner }
    }

    fn from_scalar(metadata: KeyMetadata, curve: EccCurve, scalar: &[u8]) -> KmsResult<Self> {
        let inner = match curve {
            EccCurve::P256 => Inner::P256(
                P256SigningKey::from_bytes(scalar.into())
                    .map_err(|e| KmsError::Internal(format!("invalid P-256 scalar: {e}")))?,
            ),
            EccCurve::P384 => Inner::P384(
                P384SigningKey::from_bytes(scalar.into())
                    .map_err(|e| KmsError::Internal(format!("invalid P-384 scalar: {e}")))?,
            ),
            EccCurve::P521 => Inner::P521(
                P521SigningKey::from_bytes(scalar.into())
                    .map_err(|e| KmsError::Internal(format!("invalid P-521 scalar: {e}")))?,
            ),
        };
        Ok(Self { metadata, curve, inner })
    }

    fn scalar_bytes(&self) -> Vec<u8> {
        match &self.inner {
            Inner::P256(k) => k.to_bytes().to_vec(),
            Inner::P384(k) => k.to_bytes().to_vec(),
            Inner::P521(k) => k.to_bytes().to_vec(),
        }
    }
}

impl SigningKey for EccKey {
    fn signing_algorithms(&self) -> &[SigningAlgorithm] {
        &self.metadata.signing_algorithms
    }

    fn sign(&self, digest: &[u8], algorithm: SigningAlgorithm) -> KmsResult<Vec<u8>> {
        self.validate_algorithm(algorithm)?;
        self.validate_digest_len(digest, algorithm)?;

        let width = self.curve.scalar_width();
        let (r, s): (Vec<u8>, Vec<u8>) = match &self.inner {
            Inner::P256(k) => {
                let sig: P256Signature = k
                    .sign_prehash(digest)
                    .map_err(|e| KmsError::Internal(format!("sign failed: {e}")))?;
                let bytes = sig.to_bytes();
                (bytes[..width].to_vec(), bytes[width..].to_vec())
            }
            Inner::P384(k) => {
                let sig: P384Signature = k
                    .sign_prehash(digest)
                    .map_err(|e| KmsError::Internal(format!("sign failed: {e}")))?;
                let bytes = sig.to_bytes();
                (bytes[..width].to_vec(), bytes[width..].to_vec())
            }
            Inner::P521(k) => {
                let sig: P521Signature = k
                    .sign_prehash(digest)
                    .map_err(|e| KmsError::Internal(format!("sign failed: {e}")))?;
                let bytes = sig.to_bytes();
                (bytes[..width].to_vec(), bytes[width..].to_vec())
            }
        };
        Ok(ecdsa_der::encode(&r, &s))
    }

    fn verify(&self, digest: &[u8], signature: &[u8], algorithm: SigningAlgorithm) -> KmsResult<bool> {
        self.validate_algorithm(algorithm)?;
        self.validate_digest_len(digest, algorithm)?;

        let (r, s) = match ecdsa_der::decode(signature) {
            Ok(pair) => pair,
            Err(_) => return Ok(false),
        };
        let width = self.curve.scalar_width();
        let mut concat = ecdsa_der::fixed_width(&r, width);
        concat.extend_from_slice(&ecdsa_der::fixed_width(&s, width));

        let ok = match &self.inner {
            Inner::P256(k) => {
                let Ok(sig) = P256Signature::from_slice(&concat) else { return Ok(false) };
                P256VerifyingKey::from(k).verify_prehash(digest, &sig).is_ok()
            }
            Inner::P384(k) => {
                let Ok(sig) = P384Signature::from_slice(&concat) else { return Ok(false) };
                P384VerifyingKey::from(k).verify_prehash(digest, &sig).is_ok()
            }
            Inner::P521(k) => {
                let Ok(sig) = P521Signature::from_slice(&concat) else { return Ok(false) };
                P521VerifyingKey::from(k).verify_prehash(digest, &sig).is_ok()
            }
        };
        Ok(ok)
    }

    fn public_key_der(&self) -> KmsResult<Vec<u8>> {
        use p256::pkcs8::EncodePublicKey;
        match &self.inner {
            Inner::P256(k) => P256VerifyingKey::from(k)
                .to_public_key_der()
                .map(|d| d.as_bytes().to_vec())
                .map_err(|e| KmsError::Internal(format!("DER encode failed: {e}"))),
            Inner::P384(k) => p384::ecdsa::VerifyingKey::from(k)
                .to_public_key_der()
                .map(|d| d.as_bytes().to_vec())
                .map_err(|e| KmsError::Internal(format!("DER encode failed: {e}"))),
            Inner::P521(k) => p521::ecdsa::VerifyingKey::from(k)
                .to_public_key_der()
                .map(|d| d.as_bytes().to_vec())
                .map_err(|e| KmsError::Internal(format!("DER encode failed: {e}"))),
        }
    }
}

// sign_prehash returns a Signature directly, not a Result, on some versions;
// provide a thin shim so both signature-crate call conventions compile against
// one call site above.
trait SignPrehash<S> {
    fn sign_prehash(&self, digest: &[u8]) -> Result<S, ecdsa::Error>;
}

impl SignPrehash<P256Signature> for P256SigningKey {
    fn sign_prehash(&self, digest: &[u8]) -> Result<P256Signature, ecdsa::Error> {
        ecdsa::signature::hazmat::PrehashSigner::sign_prehash(self, digest)
    }
}
impl SignPrehash<P384Signature> for P384SigningKey {
    fn sign_prehash(&self, digest: &[u8]) -> Result<P384Signature, ecdsa::Error> {
        ecdsa::signature::hazmat::PrehashSigner::sign_prehash(self, digest)
    }
}
impl SignPrehash<P521Signature> for P521SigningKey {
    fn sign_prehash(&self, digest: &[u8]) -> Result<P521Signature, ecdsa::Error> {
        ecdsa::signature::hazmat::PrehashSigner::sign_prehash(self, digest)
    }
}

trait VerifyPrehash<S> {
    fn verify_prehash(&self, digest: &[u8], sig: &S) -> Result<(), ecdsa::Error>;
}
impl VerifyPrehash<P256Signature> for P256VerifyingKey {
    fn verify_prehash(&self, digest: &[u8], sig: &P256Signature) -> Result<(), ecdsa::Error> {
        ecdsa::signature::hazmat::PrehashVerifier::verify_prehash(self, digest, sig)
    }
}
impl VerifyPrehash<P384Signature> for P384VerifyingKey {
    fn verify_prehash(&self, digest: &[u8], sig: &P384Signature) -> Result<(), ecdsa::Error> {
        ecdsa::signature::hazmat::PrehashVerifier::verify_prehash(self, digest, sig)
    }
}
impl VerifyPrehash<P521Signature> for P521VerifyingKey {
    fn verify_prehash(&self, digest: &[u8], sig: &P521Signature) -> Result<(), ecdsa::Error> {
        ecdsa::signature::hazmat::PrehashVerifier::verify_prehash(self, digest, sig)
    }
}

#[derive(Serialize, Deserialize)]
struct EccKeyRecord {
    metadata: KeyMetadata,
    curve: String,
    #[serde(with = "super::b64")]
    private_scalar: Vec<u8>,
}

impl Serialize for EccKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        EccKeyRecord {
            metadata: self.metadata.clone(),
            curve: self.curve.name().to_string(),
            private_scalar: self.scalar_bytes(),
        }
        .serialize(s)
    }
}

impl<'de> Deserialize<'de> for EccKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let record = EccKeyRecord::deserialize(d)?;
        let curve = EccCurve::from_name(&record.curve).map_err(serde::de::Error::custom)?;
        EccKey::from_scalar(record.metadata, curve, &record.private_scalar).map_err(serde::de::Error::custom)
    }
}
