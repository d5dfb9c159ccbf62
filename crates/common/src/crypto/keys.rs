use std::fmt;

use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use super::envelope::WRAPPED_KEY_SIZE;
use super::CodecError;

/// Modulus size of every share key pair
pub const RSA_KEY_BITS: usize = 2048;

/// Per-share RSA private key.
///
/// Serialized as unencrypted PKCS#8 PEM for storage next to the share record.
#[derive(Clone)]
pub struct SharePrivateKey(RsaPrivateKey);

/// Public half of a [`SharePrivateKey`], used to wrap content keys
#[derive(Clone, Debug, PartialEq)]
pub struct SharePublicKey(RsaPublicKey);

impl fmt::Debug for SharePrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharePrivateKey").finish_non_exhaustive()
    }
}

impl SharePrivateKey {
    /// Generate a fresh key pair. CPU heavy; run it off the async executor.
    pub fn generate() -> Result<Self, CodecError> {
        let key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| CodecError::Key(e.to_string()))?;
        Ok(Self(key))
    }

    pub fn public(&self) -> SharePublicKey {
        SharePublicKey(self.0.to_public_key())
    }

    pub fn to_pem(&self) -> Result<String, CodecError> {
        let pem = self
            .0
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CodecError::Key(e.to_string()))?;
        Ok(pem.as_str().to_owned())
    }

    /// Parse a stored key. Corrupt or foreign key material is reported as
    /// [`CodecError::DecryptionFailed`] since the share can't be opened with it.
    pub fn from_pem(pem: &str) -> Result<Self, CodecError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem).map_err(|_| CodecError::DecryptionFailed)?;
        if key.size() != WRAPPED_KEY_SIZE {
            return Err(CodecError::UnsupportedKeySize {
                expected: WRAPPED_KEY_SIZE,
                actual: key.size(),
            });
        }
        Ok(Self(key))
    }

    pub(crate) fn unwrap_key(&self, wrapped: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.0
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| CodecError::DecryptionFailed)
    }
}

impl SharePublicKey {
    pub(crate) fn wrap_key(&self, key: &[u8]) -> Result<Vec<u8>, CodecError> {
        if self.0.size() != WRAPPED_KEY_SIZE {
            return Err(CodecError::UnsupportedKeySize {
                expected: WRAPPED_KEY_SIZE,
                actual: self.0.size(),
            });
        }
        self.0
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key)
            .map_err(|e| CodecError::Key(e.to_string()))
    }
}
