use crate::cancel::CancellationToken;
use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::extractor::PdfExtractor;
use crate::models::PreparedDocument;
use crate::orchestrator::RetrievalSession;
use crate::rerank::Reranker;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub prepared: Vec<PreparedDocument>,
    pub skipped_files: Vec<SkippedPdf>,
}

pub fn index_folder_best_effort<E, R, X>(
    session: &mut RetrievalSession<E, R, X>,
    folder: &Path,
    rebuild: bool,
    cancel: &CancellationToken,
) -> Result<IngestionReport, IndexError>
where
    E: Embedder,
    R: Reranker,
    X: PdfExtractor,
{
    let files = discover_pdf_files(folder);

    if files.is_empty() {
        return Err(IndexError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let mut prepared = Vec::new();
    let mut skipped_files = Vec::new();

    for path in files {
        let outcome = if rebuild {
            session.rebuild_document(&path, cancel)
        } else {
            session.prepare_document_with_cancel(&path, cancel)
        };

        match outcome {
            Ok(document) => prepared.push(document),
            Err(IndexError::Cancelled) => return Err(IndexError::Cancelled),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping pdf");
                skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(IngestionReport {
        prepared,
        skipped_files,
    })
}
