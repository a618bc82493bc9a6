//! Sealed-box encryption for the wire channel.
//!
//! Anonymous public-key encryption: the sender seals to the recipient's
//! public key without authenticating itself. Sealed output is hex-encoded
//! so the framed byte stream stays ASCII and can never contain the
//! sentinel.

use crate::error::{HikupError, Result};
use crypto_box::aead::OsRng;
use crypto_box::{PublicKey, SecretKey, KEY_SIZE};

/// Ephemeral per-connection key pair, generated at connection construction.
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }
}

/// Decode a peer's hex-encoded public key announcement.
pub fn decode_public_key(hex_key: &str) -> Result<PublicKey> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| HikupError::Handshake(format!("public key is not valid hex: {e}")))?;
    let bytes: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| HikupError::Handshake("public key has wrong length".into()))?;
    Ok(PublicKey::from(bytes))
}

/// Seal `plain` to the remote key and hex-armor the ciphertext.
pub fn seal(remote: &PublicKey, plain: &[u8]) -> Result<Vec<u8>> {
    let sealed = remote
        .seal(&mut OsRng, plain)
        .map_err(|_| HikupError::Crypto("could not seal message".into()))?;
    Ok(hex::encode(sealed).into_bytes())
}

/// Reverse of [`seal`]: hex-decode, then open with our secret key.
pub fn open(keys: &KeyPair, armored: &[u8]) -> Result<Vec<u8>> {
    if armored.len() % 2 != 0 {
        return Err(HikupError::Crypto("sealed message has odd length".into()));
    }
    let sealed = hex::decode(armored)
        .map_err(|e| HikupError::Crypto(format!("sealed message is not valid hex: {e}")))?;
    keys.secret
        .unseal(&sealed)
        .map_err(|_| HikupError::Crypto("could not open sealed message".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let keys = KeyPair::generate();
        let msg = b"the quick brown fox";

        let sealed = seal(&keys.public, msg).unwrap();
        assert_ne!(sealed.as_slice(), msg.as_slice());
        assert_eq!(open(&keys, &sealed).unwrap(), msg);
    }

    #[test]
    fn test_sealing_is_nondeterministic() {
        let keys = KeyPair::generate();
        let a = seal(&keys.public, b"same input").unwrap();
        let b = seal(&keys.public, b"same input").unwrap();
        assert_ne!(a, b);
        assert_eq!(open(&keys, &a).unwrap(), b"same input");
        assert_eq!(open(&keys, &b).unwrap(), b"same input");
    }

    #[test]
    fn test_roundtrip_large_binary_payload() {
        let keys = KeyPair::generate();
        let msg: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
        let sealed = seal(&keys.public, &msg).unwrap();
        // Hex armor keeps the stream ASCII.
        assert!(sealed.iter().all(u8::is_ascii_hexdigit));
        assert_eq!(open(&keys, &sealed).unwrap(), msg);
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let sender = KeyPair::generate();
        let other = KeyPair::generate();
        let sealed = seal(&sender.public, b"secret").unwrap();
        assert!(open(&other, &sealed).is_err());
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let keys = KeyPair::generate();
        let decoded = decode_public_key(&keys.public_hex()).unwrap();
        assert_eq!(decoded.as_bytes(), keys.public.as_bytes());
    }

    #[test]
    fn test_decode_public_key_rejects_garbage() {
        assert!(decode_public_key("not-hex").is_err());
        assert!(decode_public_key("abcd").is_err()); // wrong length
    }
}
