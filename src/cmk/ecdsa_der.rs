//! Minimal ASN.1 DER encode/decode for `SEQUENCE { r INTEGER, s INTEGER }`,
//! the signature format every ECDSA variant (including secp256k1) returns.
//!
//! Implemented directly rather than pulled from a crate feature flag because
//! the wire format is exactly two fixed-width integers and the encoding rules
//! are small enough to keep self-contained and easy to reason about.

use crate::error::KmsError;

fn encode_integer(bytes: &[u8]) -> Vec<u8> {
    let mut trimmed = bytes;
    while trimmed.len() > 1 && trimmed[0] == 0 && trimmed[1] < 0x80 {
        trimmed = &trimmed[1..];
    }
    let mut out = Vec::with_capacity(trimmed.len() + 3);
    out.push(0x02);
    if trimmed.first().map_or(false, |b| *b & 0x80 != 0) {
        out.push((trimmed.len() + 1) as u8);
        out.push(0x00);
    } else {
        out.push(trimmed.len() as u8);
    }
    out.extend_from_slice(trimmed);
    out
}

/// Encode `(r, s)` (big-endian, unsigned) as `SEQUENCE { r INTEGER, s INTEGER }`.
pub fn encode(r: &[u8], s: &[u8]) -> Vec<u8> {
    let r_enc = encode_integer(r);
    let s_enc = encode_integer(s);
    let mut body = Vec::with_capacity(r_enc.len() + s_enc.len());
    body.extend_from_slice(&r_enc);
    body.extend_from_slice(&s_enc);

    let mut out = Vec::with_capacity(body.len() + 2);
    out.push(0x30);
    // Every signature here easily fits a short-form length (< 128 bytes).
    out.push(body.len() as u8);
    out.extend_from_slice(&body);
    out
}

fn read_integer(data: &[u8], pos: &mut usize) -> Result<Vec<u8>, KmsError> {
    if *pos >= data.len() || data[*pos] != 0x02 {
        return Err(KmsError::InvalidSignature("malformed DER signature".to_string()));
    }
    *pos += 1;
    let len = *data.get(*pos).ok_or_else(|| {
        KmsError::InvalidSignature("malformed DER signature".to_string())
    })? as usize;
    *pos += 1;
    let value = data
        .get(*pos..*pos + len)
        .ok_or_else(|| KmsError::InvalidSignature("malformed DER signature".to_string()))?;
    *pos += len;
    // Strip a leading sign-guard zero byte, if present.
    let value = if value.len() > 1 && value[0] == 0 {
        &value[1..]
    } else {
        value
    };
    Ok(value.to_vec())
}

/// Decode `SEQUENCE { r INTEGER, s INTEGER }` into big-endian `(r, s)`.
pub fn decode(der: &[u8]) -> Result<(Vec<u8>, Vec<u8>), KmsError> {
    if der.is_empty() || der[0] != 0x30 {
        return Err(KmsError::InvalidSignature("malformed DER signature".to_string()));
    }
    let mut pos = 2; // skip tag + short-form length byte
    if der.len() < 2 {
        return Err(KmsError::InvalidSignature("malformed DER signature".to_string()));
    }
    let r = read_integer(der, &mut pos)?;
    let s = read_integer(der, &mut pos)?;
    Ok((r, s))
}

/// Left-pad (or strip excess leading zeros from) a big-endian integer to `size` bytes.
pub fn fixed_width(bytes: &[u8], size: usize) -> Vec<u8> {
    if bytes.len() == size {
        return bytes.to_vec();
    }
    if bytes.len() > size {
        return bytes[bytes.len() - size..].to_vec();
    }
    let mut out = vec![0u8; size - bytes.len()];
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_plain_values() {
        let r = vec![1, 2, 3, 4];
        let s = vec![5, 6, 7, 8];
        let der = encode(&r, &s);
        let (got_r, got_s) = decode(&der).unwrap();
        assert_eq!(got_r, r);
        assert_eq!(got_s, s);
    }

    #[test]
    fn high_bit_gets_sign_guard() {
        let r = vec![0xFF, 0x01];
        let der = encode(&r, &[0x01]);
        // The integer encoding must prepend 0x00 so it isn't read as negative.
        assert_eq!(der[3], 0x00);
        let (got_r, _) = decode(&der).unwrap();
        assert_eq!(got_r, r);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(&[]).is_err());
        assert!(decode(&[0x30]).is_err());
        assert!(decode(&[0x99, 0x00]).is_err());
    }
}
