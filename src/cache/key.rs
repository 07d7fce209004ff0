use crate::config::KeyDigest;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Lowercase hex digest of the original path string.
///
/// Only the path is hashed, never the file contents: replacing the image
/// behind an unchanged path keeps serving the old cached variant.
pub fn key_for(digest: KeyDigest, original: &str) -> String {
    match digest {
        KeyDigest::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(original.as_bytes());
            hex::encode(hasher.finalize())
        }
        KeyDigest::Sha1 => {
            let mut hasher = Sha1::new();
            hasher.update(original.as_bytes());
            hex::encode(hasher.finalize())
        }
    }
}
