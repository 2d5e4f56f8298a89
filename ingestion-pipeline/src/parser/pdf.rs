use common::error::AppError;
use tracing::debug;

use super::ParsedElement;

const HEADING_MAX_CHARS: usize = 60;

/// PDF: page-wise text extraction through the document structure, falling
/// back to whole-document extraction when the structure is unreadable (at
/// the cost of page numbers). A text layer must exist somewhere; scanned
/// image PDFs fail terminally.
pub fn parse(bytes: &[u8]) -> Result<Vec<ParsedElement>, AppError> {
    match lopdf::Document::load_mem(bytes) {
        Ok(document) => {
            let mut pages: Vec<u32> = document.get_pages().keys().copied().collect();
            pages.sort_unstable();
            if pages.is_empty() {
                return Err(AppError::ParseFailed("PDF has no pages".into()));
            }

            let mut elements = Vec::new();
            for page in &pages {
                match document.extract_text(&[*page]) {
                    Ok(text) => elements.extend(page_elements(&text, *page)),
                    Err(err) => {
                        debug!(page, error = %err, "page text extraction failed");
                        elements.push(ParsedElement::other(
                            format!("[unreadable page {page}]"),
                            Some(*page),
                        ));
                    }
                }
            }

            if elements
                .iter()
                .any(|e| !e.text.trim().is_empty() && !e.text.starts_with("[unreadable"))
            {
                Ok(elements)
            } else {
                fallback_whole_document(bytes)
            }
        }
        Err(err) => {
            debug!(error = %err, "structural PDF parse failed; trying text fallback");
            fallback_whole_document(bytes)
        }
    }
}

fn fallback_whole_document(bytes: &[u8]) -> Result<Vec<ParsedElement>, AppError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|err| AppError::ParseFailed(format!("no extractable PDF text: {err}")))?;

    if text.trim().is_empty() {
        return Err(AppError::ParseFailed(
            "PDF has no text layer to extract".into(),
        ));
    }

    Ok(page_elements(&text, 0))
}

/// Turn one page of raw text into elements. The first short line without
/// terminal punctuation is treated as the page heading.
fn page_elements(text: &str, page: u32) -> Vec<ParsedElement> {
    let page = (page > 0).then_some(page);
    let mut elements = Vec::new();

    for (index, block) in paragraphs(text).into_iter().enumerate() {
        if index == 0 && looks_like_heading(&block) {
            elements.push(ParsedElement::heading(1, block, page));
        } else {
            elements.push(ParsedElement::paragraph(block, page));
        }
    }

    elements
}

fn paragraphs(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !current.is_empty() {
                blocks.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(trimmed);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join(" "));
    }

    blocks
}

fn looks_like_heading(block: &str) -> bool {
    block.chars().count() <= HEADING_MAX_CHARS
        && !block.ends_with(['.', '!', '?', ';', ':', ','])
        && !block.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::element::ElementKind;

    #[test]
    fn page_elements_promote_short_first_line_to_heading() {
        let text = "Alpha\n\nThe first page talks about alpha particles at length.";
        let elements = page_elements(text, 1);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].kind, ElementKind::Heading);
        assert_eq!(elements[0].text, "Alpha");
        assert_eq!(elements[0].page, Some(1));
        assert_eq!(elements[1].kind, ElementKind::Paragraph);
    }

    #[test]
    fn long_first_line_stays_a_paragraph() {
        let text = "This opening sentence is far too long and discursive to plausibly be a page heading of any kind.";
        let elements = page_elements(text, 2);
        assert_eq!(elements[0].kind, ElementKind::Paragraph);
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let blocks = paragraphs("one\ntwo\n\nthree");
        assert_eq!(blocks, vec!["one two".to_string(), "three".to_string()]);
    }

    #[test]
    fn garbage_bytes_are_parse_failed() {
        let result = parse(b"not a pdf at all");
        assert!(matches!(result, Err(AppError::ParseFailed(_))));
    }
}
