use bytes::Bytes;

use super::keys::{SharePrivateKey, SharePublicKey};
use super::stream::{GcmStream, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use super::CodecError;
use crate::share::ByteRange;

/// Size of an RSA-2048 OAEP ciphertext
pub const WRAPPED_KEY_SIZE: usize = 256;
/// Offset of the authentication tag within an envelope
pub const TAG_OFFSET: usize = WRAPPED_KEY_SIZE;
/// Offset of the nonce within an envelope
pub const NONCE_OFFSET: usize = TAG_OFFSET + TAG_SIZE;
/// Fixed envelope header length; ciphertext starts here
pub const HEADER_SIZE: usize = NONCE_OFFSET + NONCE_SIZE;
/// Unit of work for the sealing and opening loops
pub const CHUNK_SIZE: usize = 8192;

/// A sealed payload in its only on-disk and on-wire representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedBlob(Bytes);

impl EncryptedBlob {
    /// Validate that `bytes` is at least long enough to hold the fixed header.
    pub fn parse(bytes: Bytes) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::Malformed("shorter than the envelope header"));
        }
        Ok(Self(bytes))
    }

    pub fn wrapped_key(&self) -> &[u8] {
        &self.0[..TAG_OFFSET]
    }

    pub fn tag(&self) -> [u8; TAG_SIZE] {
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&self.0[TAG_OFFSET..NONCE_OFFSET]);
        tag
    }

    pub fn nonce(&self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&self.0[NONCE_OFFSET..HEADER_SIZE]);
        nonce
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.0[HEADER_SIZE..]
    }

    /// GCM doesn't pad, so the plaintext is exactly as long as the ciphertext.
    pub fn plaintext_len(&self) -> u64 {
        self.ciphertext().len() as u64
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// Incremental sealer.
///
/// Feed plaintext through [`Sealer::update`] in any chunking and collect the
/// envelope with [`Sealer::finish`]. The content key is wrapped as soon as the
/// sealer is created and only the wrapped form is retained afterwards.
pub struct Sealer {
    stream: GcmStream,
    wrapped_key: Vec<u8>,
    nonce: [u8; NONCE_SIZE],
    // header placeholder followed by ciphertext
    buf: Vec<u8>,
}

impl Sealer {
    pub fn new(public_key: &SharePublicKey) -> Result<Self, CodecError> {
        Self::with_capacity(public_key, 0)
    }

    /// Like [`Sealer::new`], reserving room for `plaintext_len` bytes of ciphertext.
    pub fn with_capacity(
        public_key: &SharePublicKey,
        plaintext_len: usize,
    ) -> Result<Self, CodecError> {
        let mut key = [0u8; KEY_SIZE];
        getrandom::getrandom(&mut key)?;
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce)?;

        let wrapped_key = public_key.wrap_key(&key)?;
        let stream = GcmStream::new(&key, &nonce);
        key.fill(0);

        let mut buf = Vec::with_capacity(HEADER_SIZE + plaintext_len);
        buf.resize(HEADER_SIZE, 0);

        Ok(Self {
            stream,
            wrapped_key,
            nonce,
            buf,
        })
    }

    pub fn update(&mut self, plaintext: &[u8]) {
        let start = self.buf.len();
        self.buf.extend_from_slice(plaintext);
        self.stream.encrypt(&mut self.buf[start..]);
    }

    /// Bytes of plaintext sealed so far
    pub fn processed(&self) -> u64 {
        (self.buf.len() - HEADER_SIZE) as u64
    }

    pub fn finish(self) -> EncryptedBlob {
        let Self {
            stream,
            wrapped_key,
            nonce,
            mut buf,
        } = self;

        let tag = stream.finalize();
        buf[..TAG_OFFSET].copy_from_slice(&wrapped_key);
        buf[TAG_OFFSET..NONCE_OFFSET].copy_from_slice(&tag);
        buf[NONCE_OFFSET..HEADER_SIZE].copy_from_slice(&nonce);

        EncryptedBlob(Bytes::from(buf))
    }
}

/// Seal an in-memory payload in [`CHUNK_SIZE`] steps.
pub fn seal(plaintext: &[u8], public_key: &SharePublicKey) -> Result<EncryptedBlob, CodecError> {
    let mut sealer = Sealer::with_capacity(public_key, plaintext.len())?;
    for chunk in plaintext.chunks(CHUNK_SIZE) {
        sealer.update(chunk);
    }
    Ok(sealer.finish())
}

/// Open an envelope, optionally returning only an inclusive byte range.
///
/// The keystream is run from the start of the ciphertext through the end of
/// the range; bytes before the range start are decrypted and discarded. The
/// ciphertext past the range is authenticated without being decrypted.
/// Nothing is returned unless the tag over the full ciphertext verifies.
pub fn open(
    blob: &EncryptedBlob,
    private_key: &SharePrivateKey,
    range: Option<ByteRange>,
) -> Result<Bytes, CodecError> {
    let ciphertext = blob.ciphertext();
    let total = ciphertext.len();

    let (start, end) = match range {
        Some(range) => {
            if range.start > range.end || range.end >= total as u64 {
                return Err(CodecError::RangeNotSatisfiable);
            }
            (range.start as usize, range.end as usize + 1)
        }
        None => (0, total),
    };

    let content_key = private_key.unwrap_key(blob.wrapped_key())?;
    let content_key: [u8; KEY_SIZE] = content_key
        .as_slice()
        .try_into()
        .map_err(|_| CodecError::DecryptionFailed)?;

    let mut stream = GcmStream::new(&content_key, &blob.nonce());
    let mut plaintext = Vec::with_capacity(end - start);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut position = 0;

    for chunk in ciphertext[..end].chunks(CHUNK_SIZE) {
        let buf = &mut buf[..chunk.len()];
        buf.copy_from_slice(chunk);
        stream.decrypt(buf);

        let chunk_end = position + chunk.len();
        if chunk_end > start {
            let skip = start.saturating_sub(position);
            plaintext.extend_from_slice(&buf[skip..]);
        }
        position = chunk_end;
    }

    for chunk in ciphertext[end..].chunks(CHUNK_SIZE) {
        stream.authenticate(chunk);
    }

    if !stream.verify(&blob.tag()) {
        return Err(CodecError::AuthenticationFailed);
    }

    Ok(Bytes::from(plaintext))
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;

    fn test_key() -> &'static SharePrivateKey {
        static KEY: OnceLock<SharePrivateKey> = OnceLock::new();
        KEY.get_or_init(|| SharePrivateKey::generate().unwrap())
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        for len in [0, 1, 100, CHUNK_SIZE, CHUNK_SIZE + 1, 3 * CHUNK_SIZE + 17] {
            let plaintext = sample(len);
            let blob = seal(&plaintext, &key.public()).unwrap();
            assert_eq!(blob.len(), HEADER_SIZE + len);
            assert_eq!(open(&blob, key, None).unwrap(), plaintext, "len={}", len);
        }
    }

    #[test]
    fn test_empty_plaintext_is_just_a_header() {
        let key = test_key();
        let blob = seal(b"", &key.public()).unwrap();
        assert_eq!(blob.len(), HEADER_SIZE);
        assert_eq!(blob.plaintext_len(), 0);
        assert!(open(&blob, key, None).unwrap().is_empty());
    }

    #[test]
    fn test_ranged_open_spans_chunks() {
        let key = test_key();
        let plaintext = sample(3 * CHUNK_SIZE + 500);
        let blob = seal(&plaintext, &key.public()).unwrap();

        let cases = [
            (0, 99),
            (10, 10),
            (CHUNK_SIZE as u64 - 5, CHUNK_SIZE as u64 + 5),
            (2 * CHUNK_SIZE as u64 + 1, plaintext.len() as u64 - 1),
        ];
        for (start, end) in cases {
            let out = open(&blob, key, Some(ByteRange { start, end })).unwrap();
            assert_eq!(out, plaintext[start as usize..=end as usize]);
        }
    }

    #[test]
    fn test_ranged_open_still_verifies_suffix() {
        let key = test_key();
        let plaintext = sample(1000);
        let blob = seal(&plaintext, &key.public()).unwrap();

        // tamper with the last byte, well past the requested range
        let mut bytes = blob.as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        let tampered = EncryptedBlob::parse(Bytes::from(bytes)).unwrap();

        let err = open(&tampered, key, Some(ByteRange { start: 0, end: 99 })).unwrap_err();
        assert!(matches!(err, CodecError::AuthenticationFailed));
    }

    #[test]
    fn test_out_of_bounds_range_rejected() {
        let key = test_key();
        let blob = seal(&sample(1000), &key.public()).unwrap();
        for (start, end) in [(1000, 1005), (5, 1000), (10, 9)] {
            let err = open(&blob, key, Some(ByteRange { start, end })).unwrap_err();
            assert!(matches!(err, CodecError::RangeNotSatisfiable));
        }
    }

    #[test]
    fn test_any_flipped_tag_or_ciphertext_byte_fails_authentication() {
        let key = test_key();
        let blob = seal(&sample(64), &key.public()).unwrap();
        let original = blob.as_bytes().to_vec();

        for index in TAG_OFFSET..original.len() {
            if (NONCE_OFFSET..HEADER_SIZE).contains(&index) {
                continue;
            }
            let mut bytes = original.clone();
            bytes[index] ^= 0x01;
            let tampered = EncryptedBlob::parse(Bytes::from(bytes)).unwrap();
            let err = open(&tampered, key, None).unwrap_err();
            assert!(
                matches!(err, CodecError::AuthenticationFailed),
                "index {} gave {:?}",
                index,
                err
            );
        }
    }

    #[test]
    fn test_corrupt_wrapped_key_is_decryption_failure() {
        let key = test_key();
        let blob = seal(b"secret", &key.public()).unwrap();
        let mut bytes = blob.as_bytes().to_vec();
        bytes[0] ^= 0xff;
        let tampered = EncryptedBlob::parse(Bytes::from(bytes)).unwrap();

        let err = open(&tampered, key, None).unwrap_err();
        assert!(matches!(err, CodecError::DecryptionFailed));
    }

    #[test]
    fn test_wrong_private_key_is_decryption_failure() {
        let blob = seal(b"secret", &test_key().public()).unwrap();
        let other = SharePrivateKey::generate().unwrap();
        let err = open(&blob, &other, None).unwrap_err();
        assert!(matches!(err, CodecError::DecryptionFailed));
    }

    #[test]
    fn test_truncated_envelope_is_malformed() {
        let err = EncryptedBlob::parse(Bytes::from_static(&[0u8; HEADER_SIZE - 1])).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn test_sealer_tracks_progress() {
        let key = test_key();
        let mut sealer = Sealer::new(&key.public()).unwrap();
        sealer.update(&[1u8; 10]);
        sealer.update(&[2u8; 5]);
        assert_eq!(sealer.processed(), 15);

        let blob = sealer.finish();
        let mut expected = vec![1u8; 10];
        expected.extend_from_slice(&[2u8; 5]);
        assert_eq!(open(&blob, key, None).unwrap(), expected);
    }
}
