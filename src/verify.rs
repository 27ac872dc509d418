//! Archive entry checksums.

use md5::{Digest, Md5};

use crate::metadata::Manifest;

/// Computes the MD5 hash of an entry's bytes as lowercase hex.
pub(crate) fn entry_md5(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compares an entry against the checksum the manifest lists for its
/// collection.
///
/// # Returns
///
/// `Some(true)` on a match, `Some(false)` on a mismatch, `None` when the
/// manifest records no checksum for the collection.
pub(crate) fn verify_entry(manifest: &Manifest, collection: &str, bytes: &[u8]) -> Option<bool> {
    manifest
        .checksum_for(collection)
        .map(|expected| expected.eq_ignore_ascii_case(&entry_md5(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ManifestCollection;
    use std::time::Duration;

    #[test]
    fn test_known_digest() {
        assert_eq!(entry_md5(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(entry_md5(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_verify_entry() {
        let manifest = Manifest::new(
            "app",
            chrono::Utc::now(),
            "extended-json/canonical",
            vec![ManifestCollection {
                name: "users".into(),
                documents: 1,
                md5: Some(entry_md5(b"[]")),
                elapsed_ms: 0,
            }],
            Vec::new(),
            Duration::ZERO,
        );
        assert_eq!(verify_entry(&manifest, "users", b"[]"), Some(true));
        assert_eq!(verify_entry(&manifest, "users", b"[ ]"), Some(false));
        assert_eq!(verify_entry(&manifest, "other", b"[]"), None);
    }
}
