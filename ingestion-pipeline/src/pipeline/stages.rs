use chrono::Utc;
use common::{
    error::AppError,
    storage::types::{
        chunk::Chunk,
        chunk_embedding::ChunkEmbedding,
        document::{Document, DocumentStatus},
        element::Element,
        job::Job,
    },
};
use tracing::instrument;

use super::{JobRunner, ProgressReporter};
use crate::{chunker, parser};

/// Fetch the raw upload, parse it into typed elements, and commit them.
#[instrument(level = "debug", skip_all, fields(document_id = job.document_id))]
pub(crate) async fn run_parse(
    runner: &JobRunner,
    job: &Job,
    progress: &ProgressReporter<'_>,
) -> Result<(), AppError> {
    let document = load_document(runner, job.document_id).await?;
    Document::set_status(&runner.db, document.id, DocumentStatus::Parsing).await?;
    progress.report(10).await;

    let bytes = runner.storage.get(&document.storage_uri).await?;
    progress.report(30).await;

    // Parsing is CPU-bound (PDF decoding in particular); keep it off the
    // async executor.
    let parser_config = runner.parser_config.clone();
    let mime = document.mime.clone();
    let parsed = tokio::task::spawn_blocking(move || {
        parser::parse(&bytes, &mime, &parser_config)
    })
    .await??;
    progress.report(60).await;

    let count = i64::try_from(parsed.len())
        .map_err(|_| AppError::ParseFailed("element count overflow".into()))?;
    let last_id = runner.db.next_id_block("element", count).await?;
    let first_id = last_id - count + 1;

    let now = Utc::now();
    let elements: Vec<Element> = parsed
        .into_iter()
        .enumerate()
        .map(|(index, element)| {
            let offset = i64::try_from(index).unwrap_or(0);
            Element {
                id: first_id + offset,
                created_at: now,
                updated_at: now,
                document_id: document.id,
                tenant_id: document.tenant_id.clone(),
                ordinal: offset,
                kind: element.kind,
                page: element.page,
                level: element.level,
                text: element.text,
                table_markdown: element.table_markdown,
                oversize_table: element.oversize_table,
            }
        })
        .collect();
    progress.report(80).await;

    Element::replace_for_document(&runner.db, document.id, elements).await?;
    progress.report(95).await;

    Ok(())
}

/// Group the parsed elements into retrieval chunks and commit them.
#[instrument(level = "debug", skip_all, fields(document_id = job.document_id))]
pub(crate) async fn run_chunk(
    runner: &JobRunner,
    job: &Job,
    progress: &ProgressReporter<'_>,
) -> Result<(), AppError> {
    let document = load_document(runner, job.document_id).await?;
    let elements = Element::for_document(&runner.db, document.id).await?;
    if elements.is_empty() {
        return Err(AppError::Validation(format!(
            "document {} has no elements to chunk",
            document.id
        )));
    }
    progress.report(10).await;

    let drafts = chunker::chunk_elements(&elements, &runner.chunker_config)?;
    progress.report(40).await;

    let count = i64::try_from(drafts.len())
        .map_err(|_| AppError::Validation("chunk count overflow".into()))?;
    let last_id = runner.db.next_id_block("chunk", count).await?;
    let first_id = last_id - count + 1;
    progress.report(55).await;

    let now = Utc::now();
    let chunks: Vec<Chunk> = drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| {
            let offset = i64::try_from(index).unwrap_or(0);
            Chunk {
                id: first_id + offset,
                created_at: now,
                updated_at: now,
                document_id: document.id,
                tenant_id: document.tenant_id.clone(),
                ordinal: draft.ordinal,
                page: draft.page,
                token_count: draft.token_count,
                text: draft.text,
                header_path: draft.header_path,
                is_table: draft.is_table,
            }
        })
        .collect();
    progress.report(75).await;

    Chunk::replace_for_document(&runner.db, document.id, chunks).await?;
    progress.report(95).await;

    Ok(())
}

/// Embed every chunk and commit vectors; the document becomes `ready`.
#[instrument(level = "debug", skip_all, fields(document_id = job.document_id))]
pub(crate) async fn run_embed(
    runner: &JobRunner,
    job: &Job,
    progress: &ProgressReporter<'_>,
) -> Result<(), AppError> {
    let document = load_document(runner, job.document_id).await?;
    let chunks = Chunk::for_document(&runner.db, document.id).await?;
    if chunks.is_empty() {
        return Err(AppError::Validation(format!(
            "document {} has no chunks to embed",
            document.id
        )));
    }
    progress.report(10).await;

    let batch_size = runner.config.embed_batch_size.max(1);
    let total = chunks.len();
    let mut rows: Vec<ChunkEmbedding> = Vec::with_capacity(total);
    progress.report(20).await;

    for (batch_index, batch) in chunks.chunks(batch_size).enumerate() {
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = runner.embedder.embed_batch(&texts).await?;

        for (chunk, vector) in batch.iter().zip(vectors) {
            rows.push(ChunkEmbedding::new(
                chunk,
                vector,
                runner.embedder.provider_tag(),
            ));
        }

        let done = (batch_index + 1) * batch_size;
        let percent = 20 + (done.min(total) * 70 / total) as u8;
        progress.report(percent).await;
    }
    progress.report(92).await;

    ChunkEmbedding::replace_for_document(&runner.db, document.id, rows).await?;
    progress.report(97).await;

    Ok(())
}

async fn load_document(runner: &JobRunner, document_id: i64) -> Result<Document, AppError> {
    let document: Option<Document> = runner.db.get_item(document_id).await?;
    document.ok_or_else(|| AppError::NotFound(format!("document {document_id}")))
}
