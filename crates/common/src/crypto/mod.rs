//! Envelope encryption for shared artifacts
//!
//! Every share gets its own RSA-2048 key pair and every payload its own
//! AES-256 content key:
//!
//! - **Content encryption**: AES-256-GCM, driven as a stream over fixed
//!   8 KiB chunks so that callers can observe progress while sealing.
//! - **Key wrapping**: the content key is wrapped with RSA-OAEP (SHA-256)
//!   under the share's public key.
//! - **Custody**: the private key is handed back to the caller, who stores
//!   it next to the share record. Whoever holds the record can decrypt the
//!   share, including the server itself.
//!
//! # Envelope layout
//!
//! ```text
//! [0..256)    RSA-OAEP(SHA-256) wrapped 256-bit content key
//! [256..272)  AES-GCM authentication tag
//! [272..284)  AES-GCM nonce
//! [284..)     AES-GCM ciphertext (same length as the plaintext)
//! ```
//!
//! # Ranged opens
//!
//! GCM is counter mode underneath, so plaintext byte `n` can only be
//! recovered by running the keystream from the start of the counter chain.
//! [`open`] decrypts the whole prefix up to the end of the requested range,
//! folds the remaining ciphertext into the authenticator without decrypting
//! it, and only returns bytes once the tag over the complete ciphertext has
//! been verified.

mod envelope;
mod keys;
mod stream;

pub use envelope::{
    open, seal, EncryptedBlob, Sealer, CHUNK_SIZE, HEADER_SIZE, NONCE_OFFSET, TAG_OFFSET,
    WRAPPED_KEY_SIZE,
};
pub use keys::{SharePrivateKey, SharePublicKey, RSA_KEY_BITS};
pub use stream::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Errors produced while sealing or opening an envelope
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),
    #[error("failed to recover the content key")]
    DecryptionFailed,
    #[error("authentication tag mismatch")]
    AuthenticationFailed,
    #[error("requested range is not satisfiable")]
    RangeNotSatisfiable,
    #[error("unsupported key size: expected {expected} bytes, got {actual}")]
    UnsupportedKeySize { expected: usize, actual: usize },
    #[error("key error: {0}")]
    Key(String),
    #[error("randomness unavailable: {0}")]
    Rng(#[from] getrandom::Error),
}
