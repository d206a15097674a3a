//! Ciphertext envelope codec.
//!
//! Binds a ciphertext to the ARN of the key that produced it and the specific
//! backing-key version used, so a caller only needs to present the blob to
//! decrypt it — no key id required.
//!
//! ```text
//! offset 0    : identlen (u8)
//! offset 1    : ident    (identlen bytes, ASCII key ARN)
//! offset 1+iL : version  (u32 LE)
//! offset 5+iL : payload  (variable)
//! ```
//!
//! For AES, `payload` is `nonce(12 bytes) || gcm_ciphertext_with_tag`. Asymmetric
//! encrypt never goes through this envelope — its ciphertext is returned raw.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("ciphertext blob is too short to be a valid envelope")]
    TooShort,
}

/// Pack `(ident, version, payload)` into the wire layout.
///
/// `identlen` is truncated to the low 8 bits of `ident`'s byte length; in
/// practice ARNs are always well under 256 bytes.
pub fn pack(ident: &str, version: u32, payload: &[u8]) -> Vec<u8> {
    let ident_bytes = ident.as_bytes();
    let ident_len = ident_bytes.len() as u8;

    let mut out = Vec::with_capacity(1 + ident_bytes.len() + 4 + payload.len());
    out.push(ident_len);
    out.extend_from_slice(&ident_bytes[..ident_len as usize]);
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Unpack a wire-format envelope. Never panics on malformed input.
pub fn unpack(data: &[u8]) -> Result<(String, u32, Vec<u8>), EnvelopeError> {
    if data.is_empty() {
        return Err(EnvelopeError::TooShort);
    }
    let ident_len = data[0] as usize;
    let header_len = 1 + ident_len + 4;
    if data.len() < header_len + 1 {
        return Err(EnvelopeError::TooShort);
    }

    let ident = String::from_utf8_lossy(&data[1..1 + ident_len]).into_owned();
    let version_bytes: [u8; 4] = data[1 + ident_len..header_len]
        .try_into()
        .expect("slice is exactly 4 bytes");
    let version = u32::from_le_bytes(version_bytes);
    let payload = data[header_len..].to_vec();

    Ok((ident, version, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let packed = pack("arn:aws:kms:eu-west-2:111122223333:key/abc", 3, b"hello-payload");
        let (ident, version, payload) = unpack(&packed).unwrap();
        assert_eq!(ident, "arn:aws:kms:eu-west-2:111122223333:key/abc");
        assert_eq!(version, 3);
        assert_eq!(payload, b"hello-payload");
    }

    #[test]
    fn empty_payload_is_rejected() {
        let packed = pack("x", 0, &[]);
        assert_eq!(unpack(&packed), Err(EnvelopeError::TooShort));
    }

    #[test]
    fn unpack_rejects_truncated_buffers() {
        assert_eq!(unpack(&[]), Err(EnvelopeError::TooShort));
        // identlen says 5 bytes of ident follow, but only 2 are present.
        assert_eq!(unpack(&[5, b'a', b'b']), Err(EnvelopeError::TooShort));
        // ident is present but the 4-byte version is truncated.
        let mut buf = vec![3];
        buf.extend_from_slice(b"abc");
        buf.extend_from_slice(&[0, 0]);
        assert_eq!(unpack(&buf), Err(EnvelopeError::TooShort));
    }

    #[test]
    fn unpack_does_not_panic_on_garbage() {
        for byte in 0u8..=255 {
            let _ = unpack(&[byte]);
            let _ = unpack(&[byte, byte, byte]);
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_round_trip(ident in "[a-zA-Z0-9:/_-]{0,255}", version: u32, payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..256)) {
            let packed = pack(&ident, version, &payload);
            let (got_ident, got_version, got_payload) = unpack(&packed).unwrap();
            proptest::prop_assert_eq!(got_ident, ident);
            proptest::prop_assert_eq!(got_version, version);
            proptest::prop_assert_eq!(got_payload, payload);
        }
    }
}
