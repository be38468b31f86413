use crate::cancel::CancellationToken;
use crate::chunking::DocumentText;
use crate::embeddings::{embed_passages, Embedder, EmbeddingRole};
use crate::error::IndexError;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::models::{
    DocumentIndexRecord, DocumentMetadata, IndexingOptions, PrepareOrigin, PreparedDocument,
    RetrievalResult, SearchOptions,
};
use crate::rerank::Reranker;
use crate::store::{content_hash, manifest_entry_for_file, IndexStore};
use crate::vector_index::FlatIndex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub struct RetrievalSession<E, R, X = LopdfExtractor>
where
    E: Embedder,
    R: Reranker,
    X: PdfExtractor,
{
    store: IndexStore,
    embedder: E,
    reranker: R,
    extractor: X,
    options: IndexingOptions,
    active: Option<Arc<DocumentIndexRecord>>,
}

impl<E, R, X> RetrievalSession<E, R, X>
where
    E: Embedder,
    R: Reranker,
    X: PdfExtractor,
{
    pub fn new(store: IndexStore, embedder: E, reranker: R, extractor: X) -> Self {
        Self {
            store,
            embedder,
            reranker,
            extractor,
            options: IndexingOptions::default(),
            active: None,
        }
    }

    pub fn with_options(mut self, options: IndexingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn options(&self) -> &IndexingOptions {
        &self.options
    }

    pub fn active(&self) -> Option<Arc<DocumentIndexRecord>> {
        self.active.clone()
    }

    pub fn prepare_document(&mut self, path: &Path) -> Result<PreparedDocument, IndexError> {
        self.prepare_document_with_cancel(path, &CancellationToken::new())
    }

    /// Loads the index persisted for this file's content, or builds it on
    /// `NotFound`. A corrupt index is returned as an error, never rebuilt.
    pub fn prepare_document_with_cancel(
        &mut self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PreparedDocument, IndexError> {
        let doc_id = content_hash(path)?;

        match self.store.load(&doc_id) {
            Ok(record) => {
                info!(path = %path.display(), doc_id = %doc_id, "reusing persisted index");
                let record = self.adopt(record)?;
                if self.store.find_document(&doc_id)?.is_none() {
                    info!(doc_id = %doc_id, "persisted index was unlisted, adding manifest entry");
                    self.list_in_manifest(path, &record)?;
                }
                Ok(prepared(path, &record, PrepareOrigin::Loaded))
            }
            Err(IndexError::NotFound { .. }) => {
                info!(path = %path.display(), doc_id = %doc_id, "no persisted index, building");
                self.build_and_adopt(path, doc_id, cancel)
            }
            Err(error) => Err(error),
        }
    }

    pub fn rebuild_document(
        &mut self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PreparedDocument, IndexError> {
        let doc_id = content_hash(path)?;
        info!(path = %path.display(), doc_id = %doc_id, "rebuilding index from source");
        self.build_and_adopt(path, doc_id, cancel)
    }

    pub fn activate(&mut self, doc_id: &str) -> Result<Arc<DocumentIndexRecord>, IndexError> {
        let record = self.store.load(doc_id)?;
        self.adopt(record)
    }

    /// Equal rerank scores keep their vector-search order.
    pub fn search_and_rerank(
        &self,
        question: &str,
        options: SearchOptions,
    ) -> Result<Vec<RetrievalResult>, IndexError> {
        let record = self.active.as_ref().ok_or(IndexError::NoActiveDocument)?;

        let query_vector = self
            .embedder
            .embed(&[question.to_string()], EmbeddingRole::Query)?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("no vector for query".to_string()))?;

        let candidates = record.index().search(&query_vector, options.k_base)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_texts = record.chunk_texts();
        let pairs = candidates
            .iter()
            .map(|(_, position)| {
                chunk_texts
                    .get(*position)
                    .map(|text| (question, text.as_str()))
                    .ok_or_else(|| {
                        IndexError::InvalidArgument(format!(
                            "vector row {position} has no chunk text"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let scores = self.reranker.score(&pairs)?;
        if scores.len() != pairs.len() {
            return Err(IndexError::Rerank(format!(
                "reranker returned {} scores for {} pairs",
                scores.len(),
                pairs.len()
            )));
        }

        let mut ranked = scores
            .into_iter()
            .map(|score| if score.is_nan() { f32::NEG_INFINITY } else { score })
            .zip(candidates.iter().map(|(_, position)| *position))
            .collect::<Vec<_>>();
        // stable: ties stay in vector-similarity order
        ranked.sort_by(|left, right| right.0.total_cmp(&left.0));

        let chunks = record.chunks();
        let results = ranked
            .into_iter()
            .take(options.k_final)
            .filter_map(|(score, position)| {
                chunks.get(position).map(|chunk| RetrievalResult {
                    score,
                    page: chunk.page,
                    text: chunk.text.clone(),
                })
            })
            .collect::<Vec<_>>();

        debug!(
            doc_id = record.doc_id(),
            candidates = candidates.len(),
            returned = results.len(),
            "search and rerank complete"
        );
        Ok(results)
    }

    fn build_and_adopt(
        &mut self,
        path: &Path,
        doc_id: String,
        cancel: &CancellationToken,
    ) -> Result<PreparedDocument, IndexError> {
        let record = self.build_record(path, doc_id, cancel)?;
        self.store.save(&record)?;
        self.list_in_manifest(path, &record)?;

        let record = self.adopt(record)?;
        Ok(prepared(path, &record, PrepareOrigin::Built))
    }

    fn list_in_manifest(&self, path: &Path, record: &DocumentIndexRecord) -> Result<(), IndexError> {
        let entry = manifest_entry_for_file(
            path,
            record.doc_id(),
            None,
            Some(record.total_pages()),
        )?;
        self.store.upsert_manifest(entry)
    }

    fn build_record(
        &self,
        path: &Path,
        doc_id: String,
        cancel: &CancellationToken,
    ) -> Result<DocumentIndexRecord, IndexError> {
        self.options.chunking.validate()?;

        let document = DocumentText::from_pages(self.extractor.extract_pages(path)?);
        let chunks = document.split(self.options.chunking)?;
        info!(
            doc_id = %doc_id,
            pages = document.pages.len(),
            chunks = chunks.len(),
            "chunked document"
        );

        let metadata = DocumentMetadata::from_chunks(chunks, &document.pages);
        let vectors = embed_passages(
            &self.embedder,
            &metadata.chunk_texts,
            self.options.embed_batch_size,
            cancel,
        )?;

        let mut index = FlatIndex::new(self.embedder.dimensions());
        index.add(&vectors)?;
        DocumentIndexRecord::new(doc_id, metadata, index)
    }

    fn adopt(&mut self, record: DocumentIndexRecord) -> Result<Arc<DocumentIndexRecord>, IndexError> {
        let expected = self.embedder.dimensions();
        if record.index().dimensions() != expected {
            return Err(IndexError::corrupt(
                self.store.vector_path(record.doc_id()),
                format!(
                    "index holds {}-dimension vectors but the embedder produces {}",
                    record.index().dimensions(),
                    expected
                ),
            ));
        }

        let record = Arc::new(record);
        self.active = Some(Arc::clone(&record));
        Ok(record)
    }
}

fn prepared(path: &Path, record: &DocumentIndexRecord, origin: PrepareOrigin) -> PreparedDocument {
    PreparedDocument {
        path: path.to_path_buf(),
        doc_id: record.doc_id().to_string(),
        origin,
        chunk_count: record.chunks().len(),
        total_pages: record.total_pages(),
    }
}
