use crate::error::IndexError;
use crate::vector_index::FlatIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2_000,
            overlap: 400,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.chunk_size <= self.overlap {
            return Err(IndexError::Config(format!(
                "chunk_size {} must exceed overlap {}; chunking would not make forward progress",
                self.chunk_size, self.overlap
            )));
        }
        Ok(())
    }

    pub fn step(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap)
    }
}

#[derive(Debug, Clone)]
pub struct IndexingOptions {
    pub chunking: ChunkingConfig,
    pub embed_batch_size: usize,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            embed_batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub k_base: usize,
    pub k_final: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k_base: 30,
            k_final: 3,
        }
    }
}

/// One page of extracted text. `start` is a character offset into the
/// concatenated document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub index: usize,
    pub text: String,
    pub start: usize,
}

/// A window over the concatenated document text, attributed to the page
/// holding its first character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub page: usize,
    pub text: String,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub chunk_texts: Vec<String>,
    pub chunks: Vec<Chunk>,
    #[serde(default, alias = "page_text")]
    pub page_texts: Vec<String>,
    pub total_pages: usize,
}

impl DocumentMetadata {
    pub fn from_chunks(chunks: Vec<Chunk>, pages: &[Page]) -> Self {
        Self {
            chunk_texts: chunks.iter().map(|chunk| chunk.text.clone()).collect(),
            chunks,
            page_texts: pages.iter().map(|page| page.text.clone()).collect(),
            total_pages: pages.len(),
        }
    }

    pub fn check_alignment(&self, vector_count: usize) -> Result<(), String> {
        if self.chunks.len() != self.chunk_texts.len() {
            return Err(format!(
                "{} chunks but {} chunk texts",
                self.chunks.len(),
                self.chunk_texts.len()
            ));
        }
        if self.chunks.len() != vector_count {
            return Err(format!(
                "{} chunks but {} vectors",
                self.chunks.len(),
                vector_count
            ));
        }
        if !self.page_texts.is_empty() && self.page_texts.len() != self.total_pages {
            return Err(format!(
                "{} page texts but total_pages is {}",
                self.page_texts.len(),
                self.total_pages
            ));
        }
        if let Some(chunk) = self.chunks.iter().find(|chunk| chunk.page >= self.total_pages) {
            return Err(format!(
                "chunk attributed to page {} of a {}-page document",
                chunk.page, self.total_pages
            ));
        }
        Ok(())
    }
}

/// Vector row `i` belongs to chunk `i`.
#[derive(Debug, Clone)]
pub struct DocumentIndexRecord {
    doc_id: String,
    metadata: DocumentMetadata,
    index: FlatIndex,
}

impl DocumentIndexRecord {
    pub fn new(
        doc_id: impl Into<String>,
        metadata: DocumentMetadata,
        index: FlatIndex,
    ) -> Result<Self, IndexError> {
        metadata
            .check_alignment(index.len())
            .map_err(IndexError::InvalidArgument)?;
        Ok(Self {
            doc_id: doc_id.into(),
            metadata,
            index,
        })
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.metadata.chunks
    }

    pub fn chunk_texts(&self) -> &[String] {
        &self.metadata.chunk_texts
    }

    pub fn total_pages(&self) -> usize {
        self.metadata.total_pages
    }

    pub fn page_text(&self, page: usize) -> Option<&str> {
        self.metadata.page_texts.get(page).map(String::as_str)
    }

    pub fn chunks_on_page(&self, page: usize) -> impl Iterator<Item = &Chunk> {
        self.metadata
            .chunks
            .iter()
            .filter(move |chunk| chunk.page == page)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub docid: String,
    pub name: String,
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub mtime: f64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub total_pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub score: f32,
    pub page: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOrigin {
    Loaded,
    Built,
}

#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub path: PathBuf,
    pub doc_id: String,
    pub origin: PrepareOrigin,
    pub chunk_count: usize,
    pub total_pages: usize,
}
