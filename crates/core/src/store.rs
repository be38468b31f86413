use crate::error::IndexError;
use crate::models::{DocumentIndexRecord, DocumentMetadata, ManifestEntry};
use crate::vector_index::FlatIndex;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};

const MANIFEST_FILE: &str = "manifest.json";
const VECTOR_EXTENSION: &str = "vector";
const METADATA_SUFFIX: &str = "meta.json";

pub fn content_hash(path: &Path) -> Result<String, IndexError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// On-disk home of every indexed document:
/// `<root>/<docId>.vector`, `<root>/<docId>.meta.json` and `<root>/manifest.json`.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn vector_path(&self, doc_id: &str) -> PathBuf {
        self.root.join(format!("{doc_id}.{VECTOR_EXTENSION}"))
    }

    pub fn metadata_path(&self, doc_id: &str) -> PathBuf {
        self.root.join(format!("{doc_id}.{METADATA_SUFFIX}"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.vector_path(doc_id).is_file() && self.metadata_path(doc_id).is_file()
    }

    pub fn save(&self, record: &DocumentIndexRecord) -> Result<(), IndexError> {
        self.save_parts(record.doc_id(), record.index(), record.metadata())
    }

    pub fn save_parts(
        &self,
        doc_id: &str,
        index: &FlatIndex,
        metadata: &DocumentMetadata,
    ) -> Result<(), IndexError> {
        fs::create_dir_all(&self.root)?;

        let vector_path = self.vector_path(doc_id);
        write_replacing(&vector_path, &index.to_bytes())?;

        let metadata_path = self.metadata_path(doc_id);
        let encoded = serde_json::to_vec(metadata)
            .map_err(|error| IndexError::InvalidArgument(error.to_string()))?;
        write_replacing(&metadata_path, &encoded)?;

        info!(
            doc_id,
            vectors = index.len(),
            vector_path = %vector_path.display(),
            metadata_path = %metadata_path.display(),
            "persisted document index"
        );
        Ok(())
    }

    /// Loads both artifacts or neither. A missing artifact is `NotFound`;
    /// one that exists but cannot be read, decoded or aligned is
    /// `CorruptIndex`.
    pub fn load(&self, doc_id: &str) -> Result<DocumentIndexRecord, IndexError> {
        let vector_path = self.vector_path(doc_id);
        let metadata_path = self.metadata_path(doc_id);
        if !vector_path.exists() || !metadata_path.exists() {
            return Err(IndexError::NotFound {
                doc_id: doc_id.to_string(),
            });
        }

        let vector_bytes = read_artifact(&vector_path, doc_id)?;
        let index = FlatIndex::from_bytes(&vector_bytes)
            .map_err(|details| IndexError::corrupt(&vector_path, details))?;

        let metadata_bytes = read_artifact(&metadata_path, doc_id)?;
        let metadata: DocumentMetadata = serde_json::from_slice(&metadata_bytes)
            .map_err(|error| IndexError::corrupt(&metadata_path, error))?;
        metadata
            .check_alignment(index.len())
            .map_err(|details| IndexError::corrupt(&metadata_path, details))?;

        debug!(doc_id, vectors = index.len(), "loaded document index");
        DocumentIndexRecord::new(doc_id, metadata, index)
    }

    pub fn list_documents(&self) -> Result<Vec<ManifestEntry>, IndexError> {
        let path = self.manifest_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(IndexError::corrupt(&path, error)),
        };
        serde_json::from_slice(&bytes).map_err(|error| IndexError::corrupt(&path, error))
    }

    pub fn find_document(&self, doc_id: &str) -> Result<Option<ManifestEntry>, IndexError> {
        Ok(self
            .list_documents()?
            .into_iter()
            .find(|entry| entry.docid == doc_id))
    }

    pub fn upsert_manifest(&self, entry: ManifestEntry) -> Result<(), IndexError> {
        let mut manifest = self.list_documents()?;
        manifest.retain(|existing| existing.docid != entry.docid);
        debug!(doc_id = %entry.docid, name = %entry.name, "upserting manifest entry");
        manifest.push(entry);

        fs::create_dir_all(&self.root)?;
        let encoded = serde_json::to_vec_pretty(&manifest)
            .map_err(|error| IndexError::InvalidArgument(error.to_string()))?;
        write_replacing(&self.manifest_path(), &encoded)
    }
}

pub fn manifest_entry_for_file(
    path: &Path,
    doc_id: &str,
    title: Option<String>,
    total_pages: Option<usize>,
) -> Result<ManifestEntry, IndexError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IndexError::MissingFileName(path.display().to_string()))?;
    let file_metadata = fs::metadata(path)?;
    let mtime = file_metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default();

    Ok(ManifestEntry {
        docid: doc_id.to_string(),
        name: name.to_string(),
        size: file_metadata.len(),
        mtime,
        title,
        total_pages,
        indexed_at: Some(Utc::now()),
    })
}

fn read_artifact(path: &Path, doc_id: &str) -> Result<Vec<u8>, IndexError> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(error) if error.kind() == ErrorKind::NotFound => Err(IndexError::NotFound {
            doc_id: doc_id.to_string(),
        }),
        Err(error) => Err(IndexError::corrupt(path, error)),
    }
}

fn write_replacing(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, bytes)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}
