//! Incremental AES-256-GCM
//!
//! The one-shot AEAD APIs want the whole message up front. Sealing and
//! opening here happen chunk by chunk, so the mode is assembled from its
//! parts: a 32-bit big-endian counter keystream starting at `inc32(J0)` and
//! a GHASH over the ciphertext, masked with `E(K, J0)` to form the tag.
//! No associated data is used.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes256;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;

/// Size of the AES-256 content key in bytes
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

const BLOCK_SIZE: usize = 16;

type Keystream = ctr::Ctr32BE<Aes256>;

pub(crate) struct GcmStream {
    keystream: Keystream,
    ghash: GHash,
    tag_mask: [u8; BLOCK_SIZE],
    // ciphertext not yet absorbed because it doesn't fill a block
    pending: Vec<u8>,
    ciphertext_len: u64,
}

impl GcmStream {
    pub(crate) fn new(key: &[u8; KEY_SIZE], nonce: &[u8; NONCE_SIZE]) -> Self {
        let key = GenericArray::from_slice(key);
        let cipher = Aes256::new(key);

        let mut hash_key = GenericArray::default();
        cipher.encrypt_block(&mut hash_key);

        let mut j0 = [0u8; BLOCK_SIZE];
        j0[..NONCE_SIZE].copy_from_slice(nonce);
        j0[BLOCK_SIZE - 1] = 1;

        let mut tag_mask = GenericArray::clone_from_slice(&j0);
        cipher.encrypt_block(&mut tag_mask);

        // payload keystream starts one block past J0
        let mut counter = j0;
        counter[BLOCK_SIZE - 1] = 2;
        let keystream = Keystream::new(key, GenericArray::from_slice(&counter));

        let mut mask = [0u8; BLOCK_SIZE];
        mask.copy_from_slice(&tag_mask);

        Self {
            keystream,
            ghash: GHash::new(&hash_key),
            tag_mask: mask,
            pending: Vec::with_capacity(BLOCK_SIZE),
            ciphertext_len: 0,
        }
    }

    /// Encrypt a chunk in place and fold the resulting ciphertext into the tag.
    pub(crate) fn encrypt(&mut self, buf: &mut [u8]) {
        self.keystream.apply_keystream(buf);
        self.absorb(buf);
    }

    /// Fold a ciphertext chunk into the tag, then decrypt it in place.
    pub(crate) fn decrypt(&mut self, buf: &mut [u8]) {
        self.absorb(buf);
        self.keystream.apply_keystream(buf);
    }

    /// Fold ciphertext into the tag without decrypting it.
    ///
    /// The keystream is not advanced, so once this has been called the
    /// stream must not be used to decrypt again.
    pub(crate) fn authenticate(&mut self, ciphertext: &[u8]) {
        self.absorb(ciphertext);
    }

    pub(crate) fn finalize(mut self) -> [u8; TAG_SIZE] {
        if !self.pending.is_empty() {
            self.ghash.update_padded(&self.pending);
        }

        // len(A) || len(C), both in bits
        let mut lengths = ghash::Block::default();
        lengths[BLOCK_SIZE / 2..].copy_from_slice(&(self.ciphertext_len * 8).to_be_bytes());
        self.ghash.update(&[lengths]);

        let digest = self.ghash.finalize();
        let mut tag = [0u8; TAG_SIZE];
        for (i, byte) in tag.iter_mut().enumerate() {
            *byte = digest[i] ^ self.tag_mask[i];
        }
        tag
    }

    pub(crate) fn verify(self, expected: &[u8; TAG_SIZE]) -> bool {
        self.finalize().ct_eq(expected).into()
    }

    fn absorb(&mut self, ciphertext: &[u8]) {
        self.ciphertext_len += ciphertext.len() as u64;

        let mut input = ciphertext;
        if !self.pending.is_empty() {
            let fill = (BLOCK_SIZE - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..fill]);
            input = &input[fill..];
            if self.pending.len() < BLOCK_SIZE {
                return;
            }
            self.ghash.update_padded(&self.pending);
            self.pending.clear();
        }

        let whole = input.len() - input.len() % BLOCK_SIZE;
        if whole > 0 {
            self.ghash.update_padded(&input[..whole]);
        }
        self.pending.extend_from_slice(&input[whole..]);
    }
}
