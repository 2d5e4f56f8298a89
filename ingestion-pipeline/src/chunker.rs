use common::{
    error::AppError,
    storage::types::element::{Element, ElementKind},
    utils::{config::AppConfig, token_count},
};
use text_splitter::{ChunkCapacity, ChunkConfig, ChunkSizer, TextSplitter};

use crate::parser::split_table_markdown;

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    /// A heading at this level or above forces a chunk boundary.
    pub header_break_level: u8,
    pub table_group_min_rows: usize,
    pub table_group_max_rows: usize,
}

impl ChunkerConfig {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            min_tokens: cfg.chunk_min_tokens,
            max_tokens: cfg.chunk_max_tokens,
            overlap_tokens: cfg.chunk_overlap_tokens(),
            header_break_level: cfg.header_break_level,
            table_group_min_rows: cfg.table_group_min_rows,
            table_group_max_rows: cfg.table_group_max_rows,
        }
    }
}

/// A chunk before persistence; ids are assigned when rows are written.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub ordinal: i64,
    pub page: Option<u32>,
    pub token_count: usize,
    pub text: String,
    pub header_path: Vec<String>,
    pub is_table: bool,
}

/// Sizes splitter output with the workspace-wide tokenizer, so chunk token
/// counts agree with the retrieval context budget.
struct SharedTokenizer;

impl ChunkSizer for SharedTokenizer {
    fn size(&self, chunk: &str) -> usize {
        token_count::count_tokens(chunk).unwrap_or(0)
    }
}

/// A run of non-table elements sharing one breadcrumb trail.
struct Section {
    header_path: Vec<String>,
    page: Option<u32>,
    parts: Vec<String>,
}

impl Section {
    fn new(header_path: Vec<String>) -> Self {
        Self {
            header_path,
            page: None,
            parts: Vec::new(),
        }
    }

    fn push(&mut self, text: &str, page: Option<u32>) {
        if self.page.is_none() {
            self.page = page;
        }
        self.parts.push(text.to_string());
    }

    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Group ordered elements into retrieval chunks. Pure and deterministic:
/// the same elements and config always produce the same drafts.
///
/// Non-table runs are token-bounded into `[min_tokens, max_tokens]` with
/// overlap; a section shorter than the minimum yields its single undersized
/// chunk, like a document tail. Tables become independent chunks in row
/// groups with the header row repeated.
pub fn chunk_elements(
    elements: &[Element],
    cfg: &ChunkerConfig,
) -> Result<Vec<ChunkDraft>, AppError> {
    if cfg.min_tokens == 0 || cfg.min_tokens > cfg.max_tokens {
        return Err(AppError::Validation(
            "invalid chunk token bounds; ensure 0 < min <= max".into(),
        ));
    }
    if cfg.overlap_tokens >= cfg.min_tokens {
        return Err(AppError::Validation(format!(
            "chunk min_tokens must be greater than the configured overlap of {}",
            cfg.overlap_tokens
        )));
    }
    if cfg.table_group_min_rows == 0 || cfg.table_group_min_rows > cfg.table_group_max_rows {
        return Err(AppError::Validation(
            "invalid table row group bounds; ensure 0 < min <= max".into(),
        ));
    }

    let mut drafts: Vec<ChunkDraft> = Vec::new();
    let mut header_stack: Vec<(u8, String)> = Vec::new();
    let mut section = Section::new(Vec::new());

    let mut flush = |section: &mut Section, drafts: &mut Vec<ChunkDraft>| -> Result<(), AppError> {
        if section.is_empty() {
            return Ok(());
        }
        let done = std::mem::replace(section, Section::new(Vec::new()));
        split_section(&done, cfg, drafts)?;
        Ok(())
    };

    for element in elements {
        match element.kind {
            ElementKind::Heading => {
                let level = element.level.unwrap_or(1);
                if level <= cfg.header_break_level {
                    flush(&mut section, &mut drafts)?;
                }
                header_stack.retain(|(l, _)| *l < level);
                header_stack.push((level, element.text.clone()));
                if section.is_empty() {
                    section = Section::new(
                        header_stack.iter().map(|(_, text)| text.clone()).collect(),
                    );
                }
                section.push(
                    &format!("{} {}", "#".repeat(usize::from(level)), element.text),
                    element.page,
                );
            }
            ElementKind::Table => {
                flush(&mut section, &mut drafts)?;
                table_chunks(element, &header_stack, cfg, &mut drafts)?;
                section = Section::new(
                    header_stack.iter().map(|(_, text)| text.clone()).collect(),
                );
            }
            _ => {
                if section.is_empty() && section.header_path.is_empty() {
                    section.header_path =
                        header_stack.iter().map(|(_, text)| text.clone()).collect();
                }
                section.push(&element.text, element.page);
            }
        }
    }
    flush(&mut section, &mut drafts)?;

    for (ordinal, draft) in drafts.iter_mut().enumerate() {
        draft.ordinal = i64::try_from(ordinal).unwrap_or(i64::MAX);
    }

    Ok(drafts)
}

fn split_section(
    section: &Section,
    cfg: &ChunkerConfig,
    drafts: &mut Vec<ChunkDraft>,
) -> Result<(), AppError> {
    let text = section.parts.join("\n\n");
    if text.trim().is_empty() {
        return Ok(());
    }

    let capacity = ChunkCapacity::new(cfg.min_tokens)
        .with_max(cfg.max_tokens)
        .map_err(|e| AppError::Validation(format!("invalid chunk token bounds: {e}")))?;
    let chunk_config = ChunkConfig::new(capacity)
        .with_overlap(cfg.overlap_tokens)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?
        .with_sizer(SharedTokenizer);
    let splitter = TextSplitter::new(chunk_config);

    for piece in splitter.chunks(&text) {
        let token_count = token_count::count_tokens(piece)?;
        drafts.push(ChunkDraft {
            ordinal: 0,
            page: section.page,
            token_count,
            text: piece.to_string(),
            header_path: section.header_path.clone(),
            is_table: false,
        });
    }

    Ok(())
}

/// Partition a table into row groups with the header repeated on top of
/// each group. Group sizes are balanced so every group lands inside
/// `[table_group_min_rows, table_group_max_rows]`; when no such partition
/// exists the table stays a single unsplit chunk, like a standalone table.
fn table_chunks(
    element: &Element,
    header_stack: &[(u8, String)],
    cfg: &ChunkerConfig,
    drafts: &mut Vec<ChunkDraft>,
) -> Result<(), AppError> {
    let markdown = element
        .table_markdown
        .as_deref()
        .unwrap_or(element.text.as_str());
    let Some((header, separator, rows)) = split_table_markdown(markdown) else {
        // Malformed table text: fall back to a single opaque table chunk.
        drafts.push(table_draft(element, header_stack, markdown.to_string())?);
        return Ok(());
    };

    let group_count = rows.len().div_ceil(cfg.table_group_max_rows);
    // Splitting must keep every group at or above the minimum; the smallest
    // balanced group is rows / group_count rounded down.
    if rows.len() <= cfg.table_group_max_rows
        || rows.len() / group_count < cfg.table_group_min_rows
    {
        drafts.push(table_draft(element, header_stack, markdown.to_string())?);
        return Ok(());
    }

    // Balanced partition: sizes differ by at most one row, so they stay
    // within [rows / n, ceil(rows / n)] ⊆ [min, max].
    let base_size = rows.len() / group_count;
    let mut oversized_groups = rows.len() % group_count;
    let mut remaining = rows.as_slice();

    while !remaining.is_empty() {
        let size = if oversized_groups > 0 {
            oversized_groups -= 1;
            base_size + 1
        } else {
            base_size
        };
        let (group, rest) = remaining.split_at(size.min(remaining.len()));
        remaining = rest;

        let mut text = String::with_capacity(header.len() + separator.len() + group.len() * 16);
        text.push_str(&header);
        text.push('\n');
        text.push_str(&separator);
        for row in group {
            text.push('\n');
            text.push_str(row);
        }
        drafts.push(table_draft(element, header_stack, text)?);
    }

    Ok(())
}

fn table_draft(
    element: &Element,
    header_stack: &[(u8, String)],
    text: String,
) -> Result<ChunkDraft, AppError> {
    let token_count = token_count::count_tokens(&text)?;
    Ok(ChunkDraft {
        ordinal: 0,
        page: element.page,
        token_count,
        text,
        header_path: header_stack.iter().map(|(_, t)| t.clone()).collect(),
        is_table: true,
    })
}
