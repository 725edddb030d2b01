//! The licensing wire envelope: X25519 + XSalsa20-Poly1305 authenticated boxes.
//!
//! Every message on the wire is a JSON object carrying a fresh nonce and an
//! opaque ciphertext. Sealing never reuses a nonce; each call draws 24 fresh
//! bytes from the OS CSPRNG. Long-lived keypairs (server identity, a
//! license's own keypair) are derived once from a 32-byte seed and never
//! regenerated; session keypairs are always freshly random.

use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A derived or generated X25519 keypair.
///
/// The secret half zeroizes on drop (`crypto_box::SecretKey` wraps an
/// `x25519_dalek::StaticSecret`, which implements `Zeroize`).
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random keypair. Used for per-session client/server keys.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Derive a keypair deterministically from a 32-byte seed. Used for the
    /// server identity and for a license's own long-lived keypair; never
    /// used for ephemeral session keys.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let secret = SecretKey::from_bytes(*seed);
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }
}

/// Seal `plaintext` to `peer_public` using `own_secret`, returning a fresh
/// nonce and the ciphertext. The nonce MUST NOT be reused; a new one is drawn
/// from the OS CSPRNG on every call.
pub fn seal(plaintext: &[u8], peer_public: &PublicKey, own_secret: &SecretKey) -> Result<([u8; 24], Vec<u8>)> {
    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let salsa_box = SalsaBox::new(peer_public, own_secret);
    let ciphertext = salsa_box
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::sensitive("failed to seal envelope", BoxError(e.to_string())))?;
    Ok((nonce.into(), ciphertext))
}

/// Open a box sealed by [`seal`]. Any tampering with `nonce` or `ciphertext`,
/// or a key mismatch, surfaces as [`Error::InvalidInput`] — the client-visible
/// "malformed envelope" outcome, never a `Sensitive` failure.
pub fn open(nonce: &[u8; 24], ciphertext: &[u8], peer_public: &PublicKey, own_secret: &SecretKey) -> Result<Vec<u8>> {
    let salsa_box = SalsaBox::new(peer_public, own_secret);
    salsa_box
        .decrypt((*nonce).as_ref().into(), ciphertext)
        .map_err(|_| Error::InvalidInput("failed to open envelope".to_string()))
}

#[derive(Debug)]
struct BoxError(String);

impl std::fmt::Display for BoxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BoxError {}

/// The wire shape of every licensing request/response: a nonce and an opaque
/// box, base64-encoded. `lid` is present only on the create-session request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "base64_bytes")]
    pub n: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(with = "base64_bytes_opt", default)]
    pub lid: Option<Vec<u8>>,
}

impl Envelope {
    pub fn seal(plaintext: &[u8], peer_public: &PublicKey, own_secret: &SecretKey, lid: Option<[u8; 32]>) -> Result<Self> {
        let (nonce, ciphertext) = seal(plaintext, peer_public, own_secret)?;
        Ok(Envelope {
            n: nonce.to_vec(),
            data: ciphertext,
            lid: lid.map(|b| b.to_vec()),
        })
    }

    pub fn open(&self, peer_public: &PublicKey, own_secret: &SecretKey) -> Result<Vec<u8>> {
        let nonce: [u8; 24] = self
            .n
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidInput("nonce must be 24 bytes".to_string()))?;
        open(&nonce, &self.data, peer_public, own_secret)
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        match s {
            Some(s) => base64::engine::general_purpose::STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Parse a 32-byte base64url-with-padding client/server session id, as used
/// in the `{CSID}` path parameter (§6).
pub fn decode_csid(s: &str) -> Result<[u8; 32]> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::URL_SAFE
        .decode(s)
        .map_err(|_| Error::InvalidInput("invalid session id encoding".to_string()))?;
    bytes
        .try_into()
        .map_err(|_| Error::InvalidInput("session id must be 32 bytes".to_string()))
}

pub fn encode_csid(id: &[u8; 32]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE.encode(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let plaintext = b"hello license";
        let (nonce, ciphertext) = seal(plaintext, b.public(), a.secret()).unwrap();
        let opened = open(&nonce, &ciphertext, a.public(), b.secret()).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let (nonce, mut ciphertext) = seal(b"hello", b.public(), a.secret()).unwrap();
        ciphertext[0] ^= 0x01;
        assert!(open(&nonce, &ciphertext, a.public(), b.secret()).is_err());
    }

    #[test]
    fn tampered_nonce_fails_to_open() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let (mut nonce, ciphertext) = seal(b"hello", b.public(), a.secret()).unwrap();
        nonce[0] ^= 0x01;
        assert!(open(&nonce, &ciphertext, a.public(), b.secret()).is_err());
    }

    #[test]
    fn seed_derivation_is_deterministic() {
        let seed = [0x11u8; 32];
        let a = KeyPair::from_seed(&seed);
        let b = KeyPair::from_seed(&seed);
        assert_eq!(a.public_bytes(), b.public_bytes());
    }

    #[test]
    fn csid_round_trip() {
        let id = [7u8; 32];
        let encoded = encode_csid(&id);
        assert_eq!(encoded.len(), 44);
        assert_eq!(decode_csid(&encoded).unwrap(), id);
    }
}
