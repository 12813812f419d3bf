// Metadata cipher (C3): AES-256-GCM with a fresh 96-bit IV per encryption.
// Grounded on the teacher's `encryption` module (encrypt/decrypt function
// pair, zeroized key material, metadata-as-JSON framing) with the cipher
// primitive swapped from ChaCha20Poly1305 to AES-256-GCM and the nonce
// switched from a derived value to one drawn from `OsRng`, per §4.3.

use crate::error::{Result, VailixError};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

pub const MAX_PLAINTEXT_BYTES: usize = 8 * 1024;
pub const MAX_WIRE_BYTES: usize = 10 * 1024;

/// Encrypts `plaintext` under `key` (the RPI's metadata key), returning
/// the wire string `base64(iv):base64(tag):base64(ciphertext)`.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<String> {
    if plaintext.len() > MAX_PLAINTEXT_BYTES {
        return Err(VailixError::MetadataTooLarge {
            size: plaintext.len(),
            max: MAX_PLAINTEXT_BYTES,
        });
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let combined = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| VailixError::cipher(format!("encryption failed: {e}")))?;

    // `aes-gcm` appends the 16-byte tag to the ciphertext; split it back
    // out so the wire format carries iv/tag/ciphertext as three tokens.
    let tag_start = combined.len() - 16;
    let (ciphertext, tag) = combined.split_at(tag_start);

    let wire = format!(
        "{}:{}:{}",
        B64.encode(nonce.as_slice()),
        B64.encode(tag),
        B64.encode(ciphertext),
    );

    if wire.len() > MAX_WIRE_BYTES {
        return Err(VailixError::MetadataTooLarge {
            size: wire.len(),
            max: MAX_WIRE_BYTES,
        });
    }

    Ok(wire)
}

/// Decrypts a wire-format string under `key`. Any failure — malformed
/// shape, wrong key, tampered tag — yields `Ok(None)` ("no metadata"),
/// never an error: decryption failure must not abort a matching pass
/// (§4.3, §7).
pub fn decrypt(wire: &str, key: &[u8; 32]) -> Option<Vec<u8>> {
    let parts: Vec<&str> = wire.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let iv = B64.decode(parts[0]).ok()?;
    let tag = B64.decode(parts[1]).ok()?;
    let ciphertext = B64.decode(parts[2]).ok()?;
    if iv.len() != 12 || tag.len() != 16 {
        return None;
    }

    let mut combined = ciphertext;
    combined.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher.decrypt(Nonce::from_slice(&iv), combined.as_slice()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_property_3() {
        let key = [7u8; 32];
        let plaintext = br#"{"condition":"x"}"#;
        let wire = encrypt(plaintext, &key).unwrap();
        let decrypted = decrypt(&wire, &key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_key_yields_no_metadata() {
        let key = [1u8; 32];
        let other = [2u8; 32];
        let wire = encrypt(b"hello", &key).unwrap();
        assert_eq!(decrypt(&wire, &other), None);
    }

    #[test]
    fn tampered_tag_yields_no_metadata() {
        let key = [3u8; 32];
        let wire = encrypt(b"hello", &key).unwrap();
        let mut parts: Vec<String> = wire.split(':').map(String::from).collect();
        parts[1] = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
        let tampered = parts.join(":");
        assert_eq!(decrypt(&tampered, &key), None);
    }

    #[test]
    fn malformed_shape_yields_no_metadata() {
        assert_eq!(decrypt("not-the-right-shape", &[0u8; 32]), None);
        assert_eq!(decrypt("a:b", &[0u8; 32]), None);
    }

    #[test]
    fn oversized_plaintext_rejected() {
        let key = [4u8; 32];
        let big = vec![0u8; MAX_PLAINTEXT_BYTES + 1];
        assert!(matches!(
            encrypt(&big, &key),
            Err(VailixError::MetadataTooLarge { .. })
        ));
    }
}
