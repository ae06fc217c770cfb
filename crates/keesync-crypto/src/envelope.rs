use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::instrument;
use zeroize::{Zeroize, ZeroizeOnDrop};

const ENVELOPE_MAGIC: [u8; 3] = *b"KSE";
const ENVELOPE_VERSION: u8 = 1;
const XCHACHA_NONCE_LEN: usize = 24;
const MAX_WRAPPED_DEK_LEN: usize = 256;
pub const KEY_LEN: usize = 32;

/// A sealed payload: a random data key wrapped by the caller's key, plus the
/// payload encrypted under that data key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub wrapped_dek: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    InvalidEnvelope,
    UnsupportedVersion(u8),
    InvalidKdfParams,
    KeyDerivationFailed,
    EncryptionFailed,
    DecryptionFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEnvelope => write!(f, "invalid encrypted envelope"),
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported envelope version: {version}")
            }
            Self::InvalidKdfParams => write!(f, "invalid key derivation parameters"),
            Self::KeyDerivationFailed => write!(f, "key derivation failed"),
            Self::EncryptionFailed => write!(f, "encryption failed"),
            Self::DecryptionFailed => write!(f, "decryption failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidEnvelope)?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey(REDACTED)")
    }
}

impl Envelope {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let wrapped_len = u16::try_from(self.wrapped_dek.len()).unwrap_or(u16::MAX);
        let mut out = Vec::with_capacity(
            ENVELOPE_MAGIC.len()
                + 1
                + 2
                + self.wrapped_dek.len()
                + self.nonce.len()
                + self.ciphertext.len(),
        );
        out.extend_from_slice(&ENVELOPE_MAGIC);
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&wrapped_len.to_le_bytes());
        out.extend_from_slice(&self.wrapped_dek);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    #[instrument(level = "debug", skip(bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let header_len = ENVELOPE_MAGIC.len() + 1 + 2;
        if bytes.len() < header_len {
            return Err(CryptoError::InvalidEnvelope);
        }
        if bytes[..3] != ENVELOPE_MAGIC {
            return Err(CryptoError::InvalidEnvelope);
        }
        if bytes[3] != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(bytes[3]));
        }
        let wrapped_len = u16::from_le_bytes([bytes[4], bytes[5]]) as usize;
        if wrapped_len > MAX_WRAPPED_DEK_LEN {
            return Err(CryptoError::InvalidEnvelope);
        }
        let mut offset = header_len;
        if bytes.len() < offset + wrapped_len + XCHACHA_NONCE_LEN {
            return Err(CryptoError::InvalidEnvelope);
        }
        let wrapped_dek = bytes[offset..offset + wrapped_len].to_vec();
        offset += wrapped_len;
        let nonce = bytes[offset..offset + XCHACHA_NONCE_LEN].to_vec();
        offset += XCHACHA_NONCE_LEN;
        Ok(Self {
            wrapped_dek,
            nonce,
            ciphertext: bytes[offset..].to_vec(),
        })
    }
}

#[instrument(
    level = "debug",
    skip(key, plaintext, aad),
    fields(plaintext_len = plaintext.len(), aad_len = aad.len())
)]
pub fn seal(key: &SecretKey, plaintext: &[u8], aad: &[u8]) -> Result<Envelope, CryptoError> {
    let dek = SecretKey::generate();
    let wrapped_dek = wrap_dek(key, &dek, aad)?;

    let cipher = XChaCha20Poly1305::new(dek.as_bytes().into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(Envelope {
        wrapped_dek,
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

#[instrument(
    level = "debug",
    skip(key, envelope, aad),
    fields(ciphertext_len = envelope.ciphertext.len(), aad_len = aad.len())
)]
pub fn open(key: &SecretKey, envelope: &Envelope, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let dek = unwrap_dek(key, &envelope.wrapped_dek, aad)?;
    if envelope.nonce.len() != XCHACHA_NONCE_LEN {
        return Err(CryptoError::InvalidEnvelope);
    }
    let cipher = XChaCha20Poly1305::new(dek.as_bytes().into());
    cipher
        .decrypt(
            XNonce::from_slice(&envelope.nonce),
            Payload {
                msg: &envelope.ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

fn wrap_dek(kek: &SecretKey, dek: &SecretKey, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(kek.as_bytes().into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: dek.as_bytes(),
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;
    let mut out = Vec::with_capacity(XCHACHA_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn unwrap_dek(kek: &SecretKey, wrapped: &[u8], aad: &[u8]) -> Result<SecretKey, CryptoError> {
    if wrapped.len() < XCHACHA_NONCE_LEN {
        return Err(CryptoError::InvalidEnvelope);
    }
    let (nonce, ciphertext) = wrapped.split_at(XCHACHA_NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(kek.as_bytes().into());
    let mut dek_bytes = cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let dek = SecretKey::from_slice(&dek_bytes);
    dek_bytes.zeroize();
    dek
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_envelope_survives_serialization() {
        let key = SecretKey::generate();
        let envelope = seal(&key, b"secret", b"aad").expect("seal");
        let parsed = Envelope::from_bytes(&envelope.to_bytes()).expect("parse");
        assert_eq!(parsed, envelope);
        assert_eq!(open(&key, &parsed, b"aad").expect("open"), b"secret");
    }

    #[test]
    fn aad_mismatch_fails() {
        let key = SecretKey::generate();
        let envelope = seal(&key, b"secret", b"aad").expect("seal");
        let result = open(&key, &envelope, b"other");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn wrong_key_fails() {
        let envelope = seal(&SecretKey::generate(), b"secret", b"aad").expect("seal");
        let result = open(&SecretKey::generate(), &envelope, b"aad");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn corrupted_ciphertext_fails() {
        let key = SecretKey::generate();
        let mut envelope = seal(&key, b"secret", b"aad").expect("seal");
        envelope.ciphertext[0] ^= 0xff;
        let result = open(&key, &envelope, b"aad");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let key = SecretKey::generate();
        let bytes = seal(&key, b"secret", b"").expect("seal").to_bytes();
        assert_eq!(
            Envelope::from_bytes(&bytes[..10]),
            Err(CryptoError::InvalidEnvelope)
        );
        assert_eq!(
            Envelope::from_bytes(b"XYZ\x01\x00\x00"),
            Err(CryptoError::InvalidEnvelope)
        );
    }

    #[test]
    fn unknown_version_is_reported() {
        let key = SecretKey::generate();
        let mut bytes = seal(&key, b"secret", b"").expect("seal").to_bytes();
        bytes[3] = 9;
        assert_eq!(
            Envelope::from_bytes(&bytes),
            Err(CryptoError::UnsupportedVersion(9))
        );
    }
}
