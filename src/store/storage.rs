//! Paired on-disk artifacts for one embedding store.
//!
//! Directory layout: `<dir>/vectors.bin` + `<dir>/metadata.json`
//!
//! vectors.bin header (69 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - snapshot: [u8; 26] (ULID, also written into metadata.json)
//! - body_checksum: u32 (CRC32 of the vector rows)
//! - header_checksum: u32 (CRC32 of header fields before it)
//!
//! Body: row-major `f32` little-endian, `dimensions` values per row. The row
//! count is implied by the file size.
//!
//! metadata.json: `{version, snapshot, model, dimensions, records}` with the
//! records ordered by position.
//!
//! Both files go to temp paths first and are renamed into place vectors
//! first. A crash between the two renames leaves mismatched snapshot ids,
//! which `load` reports instead of pairing stale data.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::semantic::embeddings::model_id_hash;
use crate::semantic::{IndexError, VectorIndex};
use crate::store::record::DocumentRecord;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Length of a ULID string
const SNAPSHOT_LEN: usize = 26;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + snapshot(26) + body_checksum(4) + header_checksum(4)
const HEADER_SIZE: usize = 69;

const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.json";

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing artifact: {0}")]
    MissingArtifact(PathBuf),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch in {0}: file may be corrupted")]
    ChecksumMismatch(&'static str),

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Snapshot mismatch: vectors and metadata were written by different saves")]
    SnapshotMismatch,

    #[error("Count mismatch: {vectors} vectors but {records} metadata records")]
    CountMismatch { vectors: usize, records: usize },

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

/// Everything read back by [`VectorStorage::load`].
#[derive(Debug)]
pub struct Snapshot<A> {
    pub index: VectorIndex,
    /// Records ordered by position
    pub records: Vec<DocumentRecord<A>>,
}

#[derive(Serialize, Deserialize)]
struct MetadataFile<R> {
    version: u8,
    snapshot: String,
    model: String,
    dimensions: usize,
    records: R,
}

/// Parsed vectors.bin header.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    snapshot: String,
    body_checksum: u32,
}

/// Storage manager for one store's artifact pair.
pub struct VectorStorage {
    dir: PathBuf,
}

impl VectorStorage {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// True if at least one artifact is on disk.
    pub fn exists(&self) -> bool {
        self.vectors_path().exists() || self.metadata_path().exists()
    }

    /// Combined size of both artifacts in bytes.
    pub fn size_bytes(&self) -> u64 {
        [self.vectors_path(), self.metadata_path()]
            .iter()
            .filter_map(|path| std::fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum()
    }

    /// Modification time of the vector artifact.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        std::fs::metadata(self.vectors_path())
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    }

    /// Write both artifacts.
    ///
    /// `records` must be ordered by position and line up with the index rows.
    pub fn save<A: Serialize>(
        &self,
        index: &VectorIndex,
        records: &[&DocumentRecord<A>],
        model_name: &str,
    ) -> Result<(), VectorStorageError> {
        if records.len() != index.len() {
            return Err(VectorStorageError::CountMismatch {
                vectors: index.len(),
                records: records.len(),
            });
        }

        std::fs::create_dir_all(&self.dir)?;

        let snapshot = rusty_ulid::generate_ulid_string();
        let vectors_path = self.vectors_path();
        let metadata_path = self.metadata_path();
        let vectors_tmp = vectors_path.with_extension("bin.tmp");
        let metadata_tmp = metadata_path.with_extension("json.tmp");

        let result = self
            .write_vectors(&vectors_tmp, index, model_name, &snapshot)
            .and_then(|_| {
                self.write_metadata(&metadata_tmp, index, records, model_name, &snapshot)
            });

        if result.is_err() {
            // Clean up temp files on error
            let _ = std::fs::remove_file(&vectors_tmp);
            let _ = std::fs::remove_file(&metadata_tmp);
            return result;
        }

        std::fs::rename(&vectors_tmp, &vectors_path)?;
        std::fs::rename(&metadata_tmp, &metadata_path)?;

        Ok(())
    }

    /// Load both artifacts and check that they belong together.
    pub fn load<A: DeserializeOwned>(
        &self,
        model_name: &str,
        expected_dimensions: usize,
    ) -> Result<Snapshot<A>, VectorStorageError> {
        let vectors_path = self.vectors_path();
        let metadata_path = self.metadata_path();
        for path in [&vectors_path, &metadata_path] {
            if !path.exists() {
                return Err(VectorStorageError::MissingArtifact(path.clone()));
            }
        }

        let bytes = std::fs::read(&vectors_path)?;
        let header = Self::read_header(&bytes)?;
        Self::validate_header(&header, model_name, expected_dimensions)?;
        let index = Self::read_body(&bytes[HEADER_SIZE..], &header)?;

        let reader = BufReader::new(File::open(&metadata_path)?);
        let metadata: MetadataFile<Vec<DocumentRecord<A>>> = serde_json::from_reader(reader)?;

        if metadata.version > FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(
                metadata.version,
                FORMAT_VERSION,
            ));
        }
        if metadata.model != model_name {
            return Err(VectorStorageError::ModelMismatch);
        }
        if metadata.dimensions != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: metadata.dimensions,
            });
        }
        if metadata.snapshot != header.snapshot {
            return Err(VectorStorageError::SnapshotMismatch);
        }

        let mut records = metadata.records;
        if records.len() != index.len() {
            return Err(VectorStorageError::CountMismatch {
                vectors: index.len(),
                records: records.len(),
            });
        }

        records.sort_by_key(|record| record.position);
        let mut seen = HashSet::with_capacity(records.len());
        for (expected, record) in records.iter().enumerate() {
            if record.position != expected {
                return Err(VectorStorageError::InvalidFormat(format!(
                    "record '{}' has position {}, expected {}",
                    record.external_id, record.position, expected
                )));
            }
            if !seen.insert(record.external_id.as_str()) {
                return Err(VectorStorageError::InvalidFormat(format!(
                    "duplicate record id '{}'",
                    record.external_id
                )));
            }
        }

        Ok(Snapshot { index, records })
    }

    /// Delete both artifacts if they exist.
    pub fn delete(&self) -> Result<(), VectorStorageError> {
        for path in [self.vectors_path(), self.metadata_path()] {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Write the vector artifact to `path`.
    fn write_vectors(
        &self,
        path: &Path,
        index: &VectorIndex,
        model_name: &str,
        snapshot: &str,
    ) -> Result<(), VectorStorageError> {
        let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
            VectorStorageError::InvalidFormat(format!(
                "{} dimensions do not fit the file header",
                index.dimensions()
            ))
        })?;

        let mut body = Vec::with_capacity(index.as_slice().len() * 4);
        for value in index.as_slice() {
            body.extend_from_slice(&value.to_le_bytes());
        }

        let header = Header {
            version: FORMAT_VERSION,
            model_id: model_id_hash(model_name),
            dimensions,
            snapshot: snapshot.to_string(),
            body_checksum: crc32fast::hash(&body),
        };

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&Self::encode_header(&header)?)?;
        writer.write_all(&body)?;

        // Flush and sync
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    /// Write the metadata artifact to `path`.
    fn write_metadata<A: Serialize>(
        &self,
        path: &Path,
        index: &VectorIndex,
        records: &[&DocumentRecord<A>],
        model_name: &str,
        snapshot: &str,
    ) -> Result<(), VectorStorageError> {
        let metadata = MetadataFile {
            version: FORMAT_VERSION,
            snapshot: snapshot.to_string(),
            model: model_name.to_string(),
            dimensions: index.dimensions(),
            records,
        };

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &metadata)?;

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn encode_header(header: &Header) -> Result<[u8; HEADER_SIZE], VectorStorageError> {
        if header.snapshot.len() != SNAPSHOT_LEN {
            return Err(VectorStorageError::InvalidFormat(format!(
                "snapshot id '{}' is not a ULID",
                header.snapshot
            )));
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..61].copy_from_slice(header.snapshot.as_bytes());
        header_bytes[61..65].copy_from_slice(&header.body_checksum.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..65]);
        header_bytes[65..69].copy_from_slice(&checksum.to_le_bytes());

        Ok(header_bytes)
    }

    fn read_header(bytes: &[u8]) -> Result<Header, VectorStorageError> {
        if bytes.len() < HEADER_SIZE {
            return Err(VectorStorageError::InvalidFormat(format!(
                "vector file is {} bytes, shorter than its header",
                bytes.len()
            )));
        }
        let header_bytes = &bytes[..HEADER_SIZE];

        let stored_checksum = u32::from_le_bytes([
            header_bytes[65],
            header_bytes[66],
            header_bytes[67],
            header_bytes[68],
        ]);
        if stored_checksum != crc32fast::hash(&header_bytes[0..65]) {
            return Err(VectorStorageError::ChecksumMismatch("header"));
        }

        let version = header_bytes[0];
        if version > FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
        let snapshot = std::str::from_utf8(&header_bytes[35..61])
            .map_err(|_| VectorStorageError::InvalidFormat("snapshot id is not UTF-8".into()))?
            .to_string();
        let body_checksum = u32::from_le_bytes([
            header_bytes[61],
            header_bytes[62],
            header_bytes[63],
            header_bytes[64],
        ]);

        Ok(Header {
            version,
            model_id,
            dimensions,
            snapshot,
            body_checksum,
        })
    }

    fn validate_header(
        header: &Header,
        model_name: &str,
        expected_dimensions: usize,
    ) -> Result<(), VectorStorageError> {
        if header.model_id != model_id_hash(model_name) {
            return Err(VectorStorageError::ModelMismatch);
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        Ok(())
    }

    fn read_body(body: &[u8], header: &Header) -> Result<VectorIndex, VectorStorageError> {
        let dimensions = header.dimensions as usize;
        let row_bytes = dimensions * 4;
        if row_bytes == 0 || body.len() % row_bytes != 0 {
            return Err(VectorStorageError::InvalidFormat(format!(
                "vector data is {} bytes, not a whole number of {}-byte rows",
                body.len(),
                row_bytes
            )));
        }

        if crc32fast::hash(body) != header.body_checksum {
            return Err(VectorStorageError::ChecksumMismatch("vector data"));
        }

        let data = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(VectorIndex::from_raw(dimensions, data)?)
    }
}
