use anyhow::{anyhow, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use pdf_rag_core::llm::{DEFAULT_MISTRAL_MODEL, OFFLINE_SNIPPET_CHARS};
use pdf_rag_core::{
    answer_question, index_folder_best_effort, offline_answer, semantic_outline, AnswerLanguage,
    CancellationToken, CharacterNgramEmbedder, ChunkingConfig, DocumentIndexRecord, IndexError,
    IndexStore, IndexingOptions, LexicalReranker, LopdfExtractor, MistralClient, PrepareOrigin,
    PreparedDocument, RetrievalResult, RetrievalSession, RetryPolicy, SearchOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Session = RetrievalSession<CharacterNgramEmbedder, LexicalReranker, LopdfExtractor>;

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding persisted indexes and the manifest
    #[arg(long, env = "PDF_RAG_INDEX_DIR", default_value = "index")]
    index_dir: PathBuf,

    /// Chunk length in characters
    #[arg(long, default_value = "2000")]
    chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, default_value = "400")]
    overlap: usize,

    /// Chunks embedded per batch (cancellation is checked between batches)
    #[arg(long, default_value = "32")]
    embed_batch_size: usize,

    /// Mistral API key; answers fall back to offline mode without one
    #[arg(long, env = "MISTRAL_API_KEY", hide_env_values = true)]
    mistral_api_key: Option<String>,

    /// Mistral chat model
    #[arg(long, env = "MISTRAL_MODEL", default_value = DEFAULT_MISTRAL_MODEL)]
    mistral_model: String,
}

#[derive(Subcommand)]
enum Command {
    /// Index a PDF, or every PDF under a folder.
    Index {
        /// PDF file or folder searched recursively.
        #[arg(long)]
        path: PathBuf,
        /// Rebuild from source even if an index exists.
        #[arg(long, default_value_t = false)]
        rebuild: bool,
    },
    /// Retrieve and rerank passages for a query.
    Search {
        /// PDF path, docId or docId prefix.
        #[arg(long)]
        doc: String,
        /// Search query
        #[arg(long)]
        query: String,
        /// Vector-search candidates passed to the reranker.
        #[arg(long, default_value = "30")]
        k_base: usize,
        /// Results kept after reranking.
        #[arg(long, default_value = "3")]
        k_final: usize,
    },
    /// Answer a question from the retrieved passages.
    Ask {
        /// PDF path, docId or docId prefix.
        #[arg(long)]
        doc: String,
        /// Question to answer.
        #[arg(long)]
        question: String,
        /// Answer language: auto, pt or en.
        #[arg(long, default_value = "auto")]
        lang: String,
        /// Skip the LLM and list the relevant passages.
        #[arg(long, default_value_t = false)]
        offline: bool,
        #[arg(long, default_value = "30")]
        k_base: usize,
        #[arg(long, default_value = "3")]
        k_final: usize,
    },
    /// List indexed documents.
    List,
    /// Print the raw text of one page.
    Page {
        /// PDF path, docId or docId prefix.
        #[arg(long)]
        doc: String,
        /// 1-based page number.
        #[arg(long)]
        page: usize,
    },
    /// Title every page with the LLM.
    Outline {
        /// PDF path, docId or docId prefix.
        #[arg(long)]
        doc: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index_dir = %cli.index_dir.display(),
        "pdf-rag boot"
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let work = tokio::task::spawn_blocking(move || run(cli, &cancel));

    tokio::select! {
        outcome = work => outcome?,
        _ = watch_interrupts(interrupt) => {
            warn!("second interrupt received, exiting");
            std::process::exit(130)
        }
    }
}

/// The first Ctrl-C cancels cooperatively; resolves on the second.
async fn watch_interrupts(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    warn!("interrupt received, stopping at the next checkpoint; press Ctrl-C again to exit");
    cancel.cancel();
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn run(cli: Cli, cancel: &CancellationToken) -> anyhow::Result<()> {
    let options = IndexingOptions {
        chunking: ChunkingConfig {
            chunk_size: cli.chunk_size,
            overlap: cli.overlap,
        },
        embed_batch_size: cli.embed_batch_size,
    };
    let mut session = RetrievalSession::new(
        IndexStore::new(&cli.index_dir),
        CharacterNgramEmbedder::default(),
        LexicalReranker::new()?,
        LopdfExtractor,
    )
    .with_options(options);

    match cli.command {
        Command::Index { path, rebuild } => {
            if path.is_dir() {
                let report = index_folder_best_effort(&mut session, &path, rebuild, cancel)
                    .map_err(|error| explain(error, &path.display().to_string()))?;
                for prepared in &report.prepared {
                    print_prepared(prepared);
                }
                if !report.skipped_files.is_empty() {
                    warn!(
                        "skipped_files={} for folder={}",
                        report.skipped_files.len(),
                        path.display()
                    );
                    for skipped in &report.skipped_files {
                        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                    }
                }
                println!(
                    "{} document(s) ready, {} skipped",
                    report.prepared.len(),
                    report.skipped_files.len()
                );
            } else {
                let prepared = if rebuild {
                    session.rebuild_document(&path, cancel)
                } else {
                    session.prepare_document_with_cancel(&path, cancel)
                }
                .map_err(|error| explain(error, &path.display().to_string()))?;
                print_prepared(&prepared);
            }
        }
        Command::Search {
            doc,
            query,
            k_base,
            k_final,
        } => {
            open_document(&mut session, &doc, cancel)?;
            let results = session
                .search_and_rerank(&query, SearchOptions { k_base, k_final })
                .map_err(|error| explain(error, &doc))?;
            println!("query: {query}");
            print_results(&results);
        }
        Command::Ask {
            doc,
            question,
            lang,
            offline,
            k_base,
            k_final,
        } => {
            open_document(&mut session, &doc, cancel)?;
            let results = session
                .search_and_rerank(&question, SearchOptions { k_base, k_final })
                .map_err(|error| explain(error, &doc))?;
            let language = lang.parse::<AnswerLanguage>().unwrap_or_default();

            let client = match (&cli.mistral_api_key, offline) {
                (Some(key), false) => match MistralClient::new(key.clone(), &cli.mistral_model) {
                    Ok(client) => Some(client),
                    Err(error) => {
                        warn!(%error, "completion client unavailable");
                        None
                    }
                },
                _ => None,
            };

            let answered = client.and_then(|client| {
                answer_question(&client, &question, &results, language)
                    .map_err(|error| warn!(%error, "LLM call failed; falling back to offline context"))
                    .ok()
            });

            match answered {
                Some(completion) => {
                    println!("ANSWER ({}):\n\n{}", cli.mistral_model, completion.text);
                    if let Some(usage) = completion.usage {
                        println!(
                            "\ntokens: input={} output={} total={}",
                            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
                        );
                    }
                }
                None => println!("{}", offline_answer(&results, OFFLINE_SNIPPET_CHARS)),
            }
        }
        Command::List => {
            let documents = session.store().list_documents()?;
            if documents.is_empty() {
                println!("no documents indexed yet in {}", cli.index_dir.display());
            }
            for (position, entry) in documents.iter().enumerate() {
                let modified = DateTime::<Utc>::from_timestamp(entry.mtime as i64, 0)
                    .map(|moment| moment.to_rfc3339())
                    .unwrap_or_else(|| "?".to_string());
                let pages = entry
                    .total_pages
                    .map(|pages| pages.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "{}) {} [{}] pages={} size={} modified={}",
                    position + 1,
                    entry.name,
                    short_id(&entry.docid),
                    pages,
                    entry.size,
                    modified
                );
            }
        }
        Command::Page { doc, page } => {
            let record = open_document(&mut session, &doc, cancel)?;
            if page == 0 || page > record.total_pages() {
                bail!(
                    "page {page} is out of range; the document has {} page(s)",
                    record.total_pages()
                );
            }
            let index = page - 1;
            match record.page_text(index) {
                Some(text) => println!("Page {page}:\n{text}"),
                None => {
                    let chunks = record.chunks_on_page(index).collect::<Vec<_>>();
                    if chunks.is_empty() {
                        println!("no chunk found on page {page}");
                    }
                    for (position, chunk) in chunks.iter().enumerate() {
                        println!("Chunk {} (page {page}):\n{}", position + 1, chunk.text);
                    }
                }
            }
        }
        Command::Outline { doc } => {
            let record = open_document(&mut session, &doc, cancel)?;
            let key = cli
                .mistral_api_key
                .as_deref()
                .ok_or_else(|| anyhow!("outline needs MISTRAL_API_KEY"))?;
            let client = MistralClient::new(key, &cli.mistral_model)?;
            let outline = semantic_outline(
                &client,
                record.chunks(),
                RetryPolicy::default(),
                cancel,
                std::thread::sleep,
            )?;
            for entry in outline {
                println!("Page {}: {}", entry.page + 1, entry.title);
            }
        }
    }

    Ok(())
}

/// Accepts a PDF path, a full docId or a unique docId prefix.
fn open_document(
    session: &mut Session,
    doc: &str,
    cancel: &CancellationToken,
) -> anyhow::Result<Arc<DocumentIndexRecord>> {
    let path = Path::new(doc);
    if path.is_file() {
        let prepared = session
            .prepare_document_with_cancel(path, cancel)
            .map_err(|error| explain(error, doc))?;
        if prepared.origin == PrepareOrigin::Built {
            print_prepared(&prepared);
        }
        return session
            .active()
            .ok_or_else(|| explain(IndexError::NoActiveDocument, doc));
    }

    let matches = session
        .store()
        .list_documents()?
        .into_iter()
        .filter(|entry| entry.docid.starts_with(doc))
        .collect::<Vec<_>>();
    let doc_id = match matches.as_slice() {
        [] => doc.to_string(),
        [only] => only.docid.clone(),
        _ => bail!("'{doc}' matches {} indexed documents; use a longer prefix", matches.len()),
    };

    session
        .activate(&doc_id)
        .map_err(|error| explain(error, doc))
}

/// Phrases each failure with its remedy.
fn explain(error: IndexError, doc: &str) -> anyhow::Error {
    match error {
        IndexError::NotFound { .. } => anyhow!(
            "no index exists yet for '{doc}'; run `pdf-rag index --path <file.pdf>` first"
        ),
        IndexError::CorruptIndex { .. } => anyhow!(
            "an index for '{doc}' exists but is unusable ({error}); rebuild it with `pdf-rag index --path <file.pdf> --rebuild`"
        ),
        IndexError::Config(_) => anyhow!("bad parameters: {error}"),
        IndexError::NoActiveDocument => anyhow!("{error}"),
        other => anyhow!(other),
    }
}

fn short_id(doc_id: &str) -> &str {
    doc_id.get(..8).unwrap_or(doc_id)
}

fn print_prepared(prepared: &PreparedDocument) {
    let origin = match prepared.origin {
        PrepareOrigin::Loaded => "reused cached index",
        PrepareOrigin::Built => "built new index",
    };
    println!(
        "{} [{}] pages={} chunks={} ({origin})",
        prepared.path.display(),
        short_id(&prepared.doc_id),
        prepared.total_pages,
        prepared.chunk_count
    );
}

fn print_results(results: &[RetrievalResult]) {
    if results.is_empty() {
        println!("no matching passages");
    }
    for (position, result) in results.iter().enumerate() {
        println!(
            "{}) page={} score={:.4}\n{}\n",
            position + 1,
            result.page + 1,
            result.score,
            result.text
        );
    }
}
