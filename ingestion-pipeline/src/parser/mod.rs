use common::{error::AppError, storage::types::element::ElementKind, utils::config::AppConfig};

mod delimited;
mod html;
mod markdown;
mod pdf;
mod text;

/// Parser knobs lifted out of the application config.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Tables longer than this are emitted unsplit with the oversize flag;
    /// splitting them is the chunker's job.
    pub max_table_rows: usize,
}

impl ParserConfig {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_table_rows: cfg.max_table_rows,
        }
    }
}

/// Parser output before persistence: a typed piece of document content in
/// reading order. Ordinals and ids are assigned when the rows are written.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedElement {
    pub kind: ElementKind,
    pub page: Option<u32>,
    pub level: Option<u8>,
    pub text: String,
    pub table_markdown: Option<String>,
    pub oversize_table: bool,
}

impl ParsedElement {
    pub fn heading(level: u8, text: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            kind: ElementKind::Heading,
            page,
            level: Some(level.clamp(1, 6)),
            text: text.into(),
            table_markdown: None,
            oversize_table: false,
        }
    }

    pub fn paragraph(text: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            kind: ElementKind::Paragraph,
            page,
            level: None,
            text: text.into(),
            table_markdown: None,
            oversize_table: false,
        }
    }

    pub fn list_item(text: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            kind: ElementKind::ListItem,
            page,
            level: None,
            text: text.into(),
            table_markdown: None,
            oversize_table: false,
        }
    }

    pub fn code(text: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            kind: ElementKind::Code,
            page,
            level: None,
            text: text.into(),
            table_markdown: None,
            oversize_table: false,
        }
    }

    pub fn other(text: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            kind: ElementKind::Other,
            page,
            level: None,
            text: text.into(),
            table_markdown: None,
            oversize_table: false,
        }
    }

    /// A table as a single element with canonical markdown. `data_rows` is
    /// the row count excluding the header.
    pub fn table(markdown: String, data_rows: usize, page: Option<u32>, cfg: &ParserConfig) -> Self {
        Self {
            kind: ElementKind::Table,
            page,
            level: None,
            text: markdown.clone(),
            table_markdown: Some(markdown),
            oversize_table: data_rows > cfg.max_table_rows,
        }
    }
}

/// MIME types the ingest surface accepts. Anything else is rejected with
/// 415 before a document row is created.
pub fn supported_mime(mime: &str) -> bool {
    matches!(
        normalize_mime(mime),
        "application/pdf"
            | "text/html"
            | "application/xhtml+xml"
            | "text/markdown"
            | "text/x-markdown"
            | "text/csv"
            | "text/tab-separated-values"
            | "text/plain"
    )
}

fn normalize_mime(mime: &str) -> &str {
    mime.split(';').next().unwrap_or("").trim()
}

/// Convert raw bytes into ordered typed elements, dispatching on MIME.
///
/// Unparseable regions degrade into `other` elements with best-effort text;
/// only a totally unusable input is a `ParseFailed`.
pub fn parse(
    bytes: &[u8],
    mime: &str,
    cfg: &ParserConfig,
) -> Result<Vec<ParsedElement>, AppError> {
    let elements = match normalize_mime(mime) {
        "application/pdf" => pdf::parse(bytes)?,
        "text/html" | "application/xhtml+xml" => html::parse(bytes, cfg)?,
        "text/markdown" | "text/x-markdown" => markdown::parse(decode_utf8(bytes), cfg),
        "text/csv" => delimited::parse(decode_utf8(bytes), ',', cfg)?,
        "text/tab-separated-values" => delimited::parse(decode_utf8(bytes), '\t', cfg)?,
        "text/plain" => text::parse(decode_utf8(bytes)),
        other => {
            return Err(AppError::UnsupportedMedia(format!(
                "no parser strategy for {other}"
            )))
        }
    };

    if elements.iter().all(|e| e.text.trim().is_empty()) {
        return Err(AppError::ParseFailed(
            "document contains no extractable text".into(),
        ));
    }

    Ok(elements)
}

fn decode_utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Build canonical table markdown: first row is the header, one separator
/// row, then the data rows. Cell text is pipe-escaped and collapsed to one
/// line.
pub fn canonical_table(rows: &[Vec<String>]) -> Option<String> {
    let header = rows.first()?;
    let width = header.len().max(1);
    let mut out = String::new();

    let render_row = |cells: &[String]| -> String {
        let mut line = String::from("|");
        for i in 0..width {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            let cell = cell.replace('|', "\\|").replace('\n', " ");
            line.push_str(&format!(" {} |", cell.trim()));
        }
        line
    };

    out.push_str(&render_row(header));
    out.push('\n');
    out.push('|');
    for _ in 0..width {
        out.push_str(" --- |");
    }
    for row in rows.iter().skip(1) {
        out.push('\n');
        out.push_str(&render_row(row));
    }

    Some(out)
}

/// Split canonical table markdown back into (header, separator, data rows).
pub fn split_table_markdown(markdown: &str) -> Option<(String, String, Vec<String>)> {
    let mut lines = markdown.lines();
    let header = lines.next()?.to_string();
    let separator = lines.next()?.to_string();
    Some((header, separator, lines.map(str::to_string).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ParserConfig {
        ParserConfig {
            max_table_rows: 500,
        }
    }

    #[test]
    fn mime_support_matrix() {
        assert!(supported_mime("application/pdf"));
        assert!(supported_mime("text/markdown"));
        assert!(supported_mime("text/plain; charset=utf-8"));
        assert!(supported_mime("text/csv"));
        assert!(!supported_mime("application/zip"));
        assert!(!supported_mime("image/png"));
    }

    #[test]
    fn unsupported_mime_is_rejected() {
        let result = parse(b"data", "application/zip", &cfg());
        assert!(matches!(result, Err(AppError::UnsupportedMedia(_))));
    }

    #[test]
    fn empty_document_is_parse_failed() {
        let result = parse(b"   \n\n  ", "text/plain", &cfg());
        assert!(matches!(result, Err(AppError::ParseFailed(_))));
    }

    #[test]
    fn canonical_table_shapes_header_and_rows() {
        let rows = vec![
            vec!["name".to_string(), "qty".to_string()],
            vec!["bolt".to_string(), "4".to_string()],
            vec!["nut | washer".to_string(), "2".to_string()],
        ];
        let markdown = canonical_table(&rows).expect("table");
        let lines: Vec<&str> = markdown.lines().collect();
        assert_eq!(lines[0], "| name | qty |");
        assert_eq!(lines[1], "| --- | --- |");
        assert_eq!(lines[2], "| bolt | 4 |");
        assert!(lines[3].contains("nut \\| washer"));
    }

    #[test]
    fn split_table_markdown_roundtrips() {
        let rows = vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["1".to_string(), "2".to_string()],
            vec!["3".to_string(), "4".to_string()],
        ];
        let markdown = canonical_table(&rows).expect("table");
        let (header, separator, data) = split_table_markdown(&markdown).expect("split");
        assert_eq!(header, "| a | b |");
        assert_eq!(separator, "| --- | --- |");
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn oversize_tables_are_flagged_not_split() {
        let small_cfg = ParserConfig { max_table_rows: 2 };
        let rows: Vec<Vec<String>> = (0..5)
            .map(|n| vec![format!("r{n}"), format!("v{n}")])
            .collect();
        let markdown = canonical_table(&rows).expect("table");
        let element = ParsedElement::table(markdown, 4, None, &small_cfg);
        assert!(element.oversize_table);
        assert_eq!(element.kind, ElementKind::Table);
    }
}
