/**
 * Blob storage collaborator interface.
 *  A content-addressed put/get/delete store, plus
 *  in-memory and filesystem backends and a timeout
 *  wrapper used by the service.
 */
pub mod blobs;
/**
 * Envelope encryption for shared artifacts.
 *  - RSA-OAEP wrapped per-payload content keys
 *  - Streaming AES-256-GCM with range-aware opening
 */
pub mod crypto;
/**
 * Value types describing a share: identifiers,
 *  byte ranges requested by downloaders and the
 *  upload progress events fanned out to listeners.
 */
pub mod share;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::blobs::{BlobRef, BlobStore, BlobStoreError, DynBlobStore};
    pub use crate::crypto::{CodecError, EncryptedBlob, Sealer, SharePrivateKey, SharePublicKey};
    pub use crate::share::{ByteRange, ProgressEvent, ProgressStatus, RangeError, ShareId};
    pub use crate::version::build_info;
}
