//! Archive reading and entry classification.

use flate2::read::GzDecoder;
use std::io::Read;
use tar::Archive;
use tracing::debug;

use crate::error::SnapshotError;
use crate::metadata::{classify_entry, EntryKind};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A data entry selected for import.
#[derive(Debug, Clone)]
pub(crate) struct ArchiveEntry {
    /// Entry name inside the archive
    pub name: String,
    /// Target collection (entry name without `.json`)
    pub collection: String,
    /// Raw entry bytes
    pub bytes: Vec<u8>,
}

/// Classified contents of an archive.
#[derive(Debug, Default)]
pub(crate) struct ArchiveContents {
    /// Data entries in archive order
    pub imports: Vec<ArchiveEntry>,
    /// Raw manifest bytes, if the archive has one
    pub manifest: Option<Vec<u8>>,
    /// Names of error-marker entries
    pub error_markers: Vec<String>,
}

fn archive_error(e: std::io::Error) -> SnapshotError {
    SnapshotError::Archive(format!("cannot read archive: {}", e))
}

/// Reads a gzip-compressed (or plain) tar archive and sorts its regular-file
/// entries into data, manifest and error markers.
///
/// # Returns
///
/// The classified contents, or `SnapshotError::Archive` if the archive cannot
/// be read.
pub(crate) fn read_archive(bytes: &[u8]) -> Result<ArchiveContents, SnapshotError> {
    let reader: Box<dyn Read + '_> = if bytes.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };
    let mut archive = Archive::new(reader);
    let mut contents = ArchiveContents::default();

    for entry in archive.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(archive_error)?
            .to_string_lossy()
            .into_owned();

        match classify_entry(&name) {
            EntryKind::Data(collection) => {
                // the header size is untrusted; let the reader report truncation
                let mut data = Vec::new();
                entry.read_to_end(&mut data).map_err(archive_error)?;
                contents.imports.push(ArchiveEntry {
                    name,
                    collection,
                    bytes: data,
                });
            }
            EntryKind::Manifest => {
                let mut data = Vec::new();
                entry.read_to_end(&mut data).map_err(archive_error)?;
                contents.manifest = Some(data);
            }
            EntryKind::ErrorMarker => {
                debug!("Skipping error marker {}", name);
                contents.error_markers.push(name);
            }
            EntryKind::Ignored => debug!("Ignoring archive entry {}", name),
        }
    }

    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::{Builder, EntryType, Header};

    fn build(entries: &[(&str, &str)], gzip: bool) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder
            .append_data(&mut dir, "nested.json/", std::io::empty())
            .unwrap();
        for (name, body) in entries {
            let mut header = Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        let tar = builder.into_inner().unwrap();
        if !gzip {
            return tar;
        }
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        std::io::Write::write_all(&mut gz, &tar).unwrap();
        gz.finish().unwrap()
    }

    #[test]
    fn test_classifies_entries() {
        let bytes = build(
            &[
                ("users.json", "[]"),
                ("orders_ERROR.json", "{}"),
                ("_backup_metadata.json", "{}"),
                ("README.txt", "hi"),
            ],
            true,
        );
        let contents = read_archive(&bytes).unwrap();
        assert_eq!(contents.imports.len(), 1);
        assert_eq!(contents.imports[0].collection, "users");
        assert_eq!(contents.imports[0].bytes, b"[]");
        assert_eq!(contents.manifest.as_deref(), Some(&b"{}"[..]));
        assert_eq!(contents.error_markers, vec!["orders_ERROR.json"]);
    }

    #[test]
    fn test_plain_tar_is_accepted() {
        let bytes = build(&[("logs.json", "[]")], false);
        let contents = read_archive(&bytes).unwrap();
        assert_eq!(contents.imports[0].collection, "logs");
    }

    #[test]
    fn test_oversized_header_is_an_archive_error() {
        let mut header = Header::new_gnu();
        header.set_path("users.json").unwrap();
        header.set_size((1 << 62) + 7);
        header.set_mode(0o644);
        header.set_cksum();

        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(b"[]");
        bytes.resize(1024, 0);
        bytes.extend_from_slice(&[0u8; 1024]);

        assert!(matches!(
            read_archive(&bytes),
            Err(SnapshotError::Archive(_))
        ));
    }

    #[test]
    fn test_garbage_is_an_archive_error() {
        let mut bytes = vec![0x1f, 0x8b];
        bytes.extend_from_slice(b"definitely not gzip");
        assert!(matches!(
            read_archive(&bytes),
            Err(SnapshotError::Archive(_))
        ));
    }
}
