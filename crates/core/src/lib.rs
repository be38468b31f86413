pub mod cancel;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod rerank;
pub mod retry;
pub mod store;
pub mod vector_index;

pub use cancel::CancellationToken;
pub use chunking::{find_page, split_chunks, DocumentText};
pub use embeddings::{
    embed_passages, CharacterNgramEmbedder, Embedder, EmbeddingRole, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IndexError, LlmError};
pub use extractor::{LopdfExtractor, PdfExtractor};
pub use ingest::{discover_pdf_files, index_folder_best_effort, IngestionReport, SkippedPdf};
pub use llm::{
    answer_question, build_answer_prompt, generate_chunk_title, offline_answer,
    semantic_outline, AnswerLanguage, ChatCompletion, Completion, MistralClient, OutlineEntry,
    TokenUsage,
};
pub use models::{
    Chunk, ChunkingConfig, DocumentIndexRecord, DocumentMetadata, IndexingOptions,
    ManifestEntry, Page, PrepareOrigin, PreparedDocument, RetrievalResult, SearchOptions,
};
pub use orchestrator::RetrievalSession;
pub use rerank::{LexicalReranker, Reranker};
pub use retry::{retry_with, RetryMachine, RetryPolicy, RetryState};
pub use store::{content_hash, manifest_entry_for_file, IndexStore};
pub use vector_index::FlatIndex;
