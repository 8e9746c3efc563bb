//! Content-addressed blob storage (component A).
//!
//! Blobs live at `<objects>/<aa>/<rest-of-hex>`, fanned out on the first two hex characters of
//! their hash to keep directory sizes bounded. Each file starts with a one-byte compression
//! algorithm header followed by the (possibly compressed) payload; the hash is always computed
//! over the *uncompressed* bytes.
//!
//! Writes are crash-safe: the compressed payload is written to a temporary file under
//! `<objects>/tmp/` and atomically renamed onto its final path. A crash mid-write leaves only an
//! orphaned `.tmp` file, swept on the next `ObjectStore::open`.

use std::{
    fs, io,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{errors::ChronologError, hash::ObjectHash};

/// On-disk compression algorithm, recorded as a one-byte header per blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionAlgorithm {
    Raw,
    Zlib,
    Lzma,
    Bz2,
}

impl CompressionAlgorithm {
    fn header_byte(self) -> u8 {
        match self {
            CompressionAlgorithm::Raw => 0,
            CompressionAlgorithm::Zlib => 1,
            CompressionAlgorithm::Lzma => 2,
            CompressionAlgorithm::Bz2 => 3,
        }
    }

    fn from_header_byte(b: u8) -> io::Result<CompressionAlgorithm> {
        match b {
            0 => Ok(CompressionAlgorithm::Raw),
            1 => Ok(CompressionAlgorithm::Zlib),
            2 => Ok(CompressionAlgorithm::Lzma),
            3 => Ok(CompressionAlgorithm::Bz2),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown compression header byte {other}"),
            )),
        }
    }

    fn compress(self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            CompressionAlgorithm::Raw => Ok(data.to_vec()),
            CompressionAlgorithm::Zlib => {
                use flate2::{Compression, write::ZlibEncoder};
                let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
                enc.write_all(data)?;
                enc.finish()
            }
            CompressionAlgorithm::Lzma => {
                use xz2::write::XzEncoder;
                let mut enc = XzEncoder::new(Vec::new(), 6);
                enc.write_all(data)?;
                enc.finish()
            }
            CompressionAlgorithm::Bz2 => {
                use bzip2::Compression;
                use bzip2::write::BzEncoder;
                let mut enc = BzEncoder::new(Vec::new(), Compression::default());
                enc.write_all(data)?;
                enc.finish()
            }
        }
    }

    fn decompress(self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            CompressionAlgorithm::Raw => Ok(data.to_vec()),
            CompressionAlgorithm::Zlib => {
                use flate2::read::ZlibDecoder;
                let mut dec = ZlibDecoder::new(data);
                let mut out = Vec::new();
                dec.read_to_end(&mut out)?;
                Ok(out)
            }
            CompressionAlgorithm::Lzma => {
                use xz2::read::XzDecoder;
                let mut dec = XzDecoder::new(data);
                let mut out = Vec::new();
                dec.read_to_end(&mut out)?;
                Ok(out)
            }
            CompressionAlgorithm::Bz2 => {
                use bzip2::read::BzDecoder;
                let mut dec = BzDecoder::new(data);
                let mut out = Vec::new();
                dec.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

/// Content-addressed, deduplicated blob store rooted at `<repo>/.chronolog/objects`.
pub struct ObjectStore {
    root: PathBuf,
    default_algorithm: CompressionAlgorithm,
}

impl ObjectStore {
    /// Open (creating if necessary) an object store at `root`, sweeping any `.tmp` leftovers
    /// from a prior crash and quarantining blobs whose filename disagrees with their content
    /// hash (§4.A, §7: "a blob whose computed hash disagrees with its filename is quarantined,
    /// not deleted").
    pub fn open(root: impl Into<PathBuf>, default_algorithm: CompressionAlgorithm) -> crate::errors::Result<ObjectStore> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join("tmp"))?;
        fs::create_dir_all(root.join("quarantine"))?;
        let store = ObjectStore { root, default_algorithm };
        store.sweep_tmp()?;
        store.quarantine_corrupted()?;
        Ok(store)
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn quarantine_dir(&self) -> PathBuf {
        self.root.join("quarantine")
    }

    fn path_for(&self, hash: &ObjectHash) -> PathBuf {
        let (dir, rest) = hash.fanout();
        self.root.join(dir).join(rest)
    }

    /// Remove any leftover `.tmp` files from a crash mid-write (§4.A, §7).
    fn sweep_tmp(&self) -> crate::errors::Result<()> {
        let tmp = self.tmp_dir();
        if !tmp.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&tmp)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("tmp") {
                warn!(path = %entry.path().display(), "sweeping orphaned tmp object");
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    /// Re-hash every stored blob named by its fan-out path and move any whose content no
    /// longer matches its claimed hash into `<objects>/quarantine/<hash>`, rather than
    /// deleting it (§4.A, §7). Runs once per `open`, so startup cost is linear in the number
    /// of objects already on disk.
    fn quarantine_corrupted(&self) -> crate::errors::Result<()> {
        for hash in self.iter_hashes()? {
            let path = self.path_for(&hash);
            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                Err(_) => continue, // already moved/removed by a concurrent sweep
            };
            if raw.is_empty() {
                continue;
            }
            let algorithm = match CompressionAlgorithm::from_header_byte(raw[0]) {
                Ok(algorithm) => algorithm,
                Err(_) => {
                    self.move_to_quarantine(&hash, &path)?;
                    continue;
                }
            };
            let matches = algorithm
                .decompress(&raw[1..])
                .map(|data| ObjectHash::of(&data) == hash)
                .unwrap_or(false);
            if !matches {
                self.move_to_quarantine(&hash, &path)?;
            }
        }
        Ok(())
    }

    fn move_to_quarantine(&self, hash: &ObjectHash, path: &Path) -> crate::errors::Result<()> {
        let dest = self.quarantine_dir().join(hash.to_string());
        warn!(%hash, path = %path.display(), quarantined_to = %dest.display(), "quarantining corrupted blob");
        fs::rename(path, dest)?;
        Ok(())
    }

    /// `has(hash)`: true if a blob with this hash is stored.
    pub fn has(&self, hash: &ObjectHash) -> bool {
        self.path_for(hash).is_file()
    }

    /// `put(bytes) -> hash`. Idempotent: if the blob already exists, no bytes are written.
    pub fn put(&self, bytes: &[u8]) -> crate::errors::Result<ObjectHash> {
        let hash = ObjectHash::of(bytes);
        if self.has(&hash) {
            debug!(%hash, "object already stored, skipping write");
            return Ok(hash);
        }
        let (dir, _) = hash.fanout();
        let dir_path = self.root.join(dir);
        fs::create_dir_all(&dir_path)?;

        let compressed = self.default_algorithm.compress(bytes)?;
        let mut payload = Vec::with_capacity(compressed.len() + 1);
        payload.push(self.default_algorithm.header_byte());
        payload.extend_from_slice(&compressed);

        let tmp_path = self.tmp_dir().join(format!("{hash}.tmp"));
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(&payload)?;
            f.sync_all()?;
        }
        let final_path = self.path_for(&hash);
        fs::rename(&tmp_path, &final_path)?;
        debug!(%hash, bytes = bytes.len(), "stored object");
        Ok(hash)
    }

    /// `get(hash) -> bytes`. Verifies the stored hash matches the filename's claimed identity.
    pub fn get(&self, hash: &ObjectHash) -> crate::errors::Result<Vec<u8>> {
        let path = self.path_for(hash);
        let raw = fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ChronologError::HashUnknown(hash.to_string())
            } else {
                ChronologError::Io(e)
            }
        })?;
        if raw.is_empty() {
            return Err(ChronologError::CorruptedBlob(hash.to_string()));
        }
        let algorithm = CompressionAlgorithm::from_header_byte(raw[0])?;
        let data = algorithm.decompress(&raw[1..])?;
        let actual = ObjectHash::of(&data);
        if actual != *hash {
            return Err(ChronologError::CorruptedBlob(hash.to_string()));
        }
        Ok(data)
    }

    /// `delete(hash)`. Only ever called by GC after it has proven no version references the
    /// blob; never called from the ingest path.
    pub fn delete(&self, hash: &ObjectHash) -> crate::errors::Result<()> {
        let path = self.path_for(hash);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ChronologError::Io(e)),
        }
    }

    /// Iterate every stored blob hash, used by GC to compute the live/garbage set.
    pub fn iter_hashes(&self) -> crate::errors::Result<Vec<ObjectHash>> {
        let mut out = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = dir_entry.file_name();
            let dir_name = dir_name.to_string_lossy();
            if dir_name == "tmp" || dir_name.len() != 2 {
                continue;
            }
            for file_entry in fs::read_dir(dir_entry.path())? {
                let file_entry = file_entry?;
                let rest = file_entry.file_name().to_string_lossy().to_string();
                if let Ok(hash) = format!("{dir_name}{rest}").parse::<ObjectHash>() {
                    out.push(hash);
                }
            }
        }
        Ok(out)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path().join("objects"), CompressionAlgorithm::Zlib).unwrap();
        (dir, store)
    }

    #[test]
    fn put_then_get_roundtrips() {
        let (_dir, store) = store();
        let hash = store.put(b"hello").unwrap();
        assert_eq!(store.get(&hash).unwrap(), b"hello");
    }

    #[test]
    fn put_is_idempotent() {
        let (_dir, store) = store();
        let h1 = store.put(b"same content").unwrap();
        let h2 = store.put(b"same content").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.iter_hashes().unwrap().len(), 1);
    }

    #[test]
    fn empty_blob_has_canonical_hash() {
        let (_dir, store) = store();
        let hash = store.put(b"").unwrap();
        assert_eq!(hash, ObjectHash::empty());
    }

    #[test]
    fn get_unknown_hash_errors() {
        let (_dir, store) = store();
        let bogus = ObjectHash::of(b"never stored");
        assert!(matches!(store.get(&bogus), Err(ChronologError::HashUnknown(_))));
    }

    #[test]
    fn delete_removes_blob() {
        let (_dir, store) = store();
        let hash = store.put(b"transient").unwrap();
        store.delete(&hash).unwrap();
        assert!(!store.has(&hash));
    }

    #[test]
    fn sweep_removes_leftover_tmp_files() {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects");
        fs::create_dir_all(objects.join("tmp")).unwrap();
        fs::write(objects.join("tmp").join("deadbeef.tmp"), b"partial").unwrap();
        let store = ObjectStore::open(&objects, CompressionAlgorithm::Zlib).unwrap();
        let remaining: Vec<_> = fs::read_dir(objects.join("tmp")).unwrap().collect();
        assert!(remaining.is_empty());
        let _ = store;
    }

    #[test]
    fn reopen_quarantines_hash_mismatched_blob_instead_of_deleting_it() {
        let (dir, store) = store();
        let objects_root = dir.path().join("objects");
        let hash = store.put(b"original content").unwrap();
        let path = objects_root.join(hash.fanout().0).join(hash.fanout().1);

        // Corrupt the stored bytes in place so the filename no longer matches its content.
        fs::write(&path, [CompressionAlgorithm::Zlib.header_byte(), 0xff, 0xff, 0xff]).unwrap();

        let reopened = ObjectStore::open(&objects_root, CompressionAlgorithm::Zlib).unwrap();
        assert!(!path.exists());
        assert!(!reopened.has(&hash));
        let quarantined = objects_root.join("quarantine").join(hash.to_string());
        assert!(quarantined.exists());
    }

    #[test]
    fn reopen_leaves_healthy_blobs_in_place() {
        let (dir, store) = store();
        let hash = store.put(b"healthy content").unwrap();
        let objects_root = dir.path().join("objects");
        let reopened = ObjectStore::open(&objects_root, CompressionAlgorithm::Zlib).unwrap();
        assert!(reopened.has(&hash));
        assert_eq!(reopened.get(&hash).unwrap(), b"healthy content");
    }

    #[test]
    fn different_algorithms_roundtrip() {
        for algo in [
            CompressionAlgorithm::Raw,
            CompressionAlgorithm::Zlib,
            CompressionAlgorithm::Lzma,
            CompressionAlgorithm::Bz2,
        ] {
            let dir = tempfile::tempdir().unwrap();
            let store = ObjectStore::open(dir.path().join("objects"), algo).unwrap();
            let hash = store.put(b"roundtrip content").unwrap();
            assert_eq!(store.get(&hash).unwrap(), b"roundtrip content");
        }
    }
}
