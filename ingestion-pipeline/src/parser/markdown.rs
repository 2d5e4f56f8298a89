use super::{canonical_table, ParsedElement, ParserConfig};

/// Line-oriented markdown reader. Produces headings with their depth,
/// fenced code blocks, tables, list items and paragraphs, in source order.
pub fn parse(input: String, cfg: &ParserConfig) -> Vec<ParsedElement> {
    let mut elements = Vec::new();
    let mut paragraph: Vec<String> = Vec::new();
    let mut code: Option<Vec<String>> = None;
    let mut table_rows: Vec<Vec<String>> = Vec::new();

    let flush_paragraph = |buf: &mut Vec<String>, out: &mut Vec<ParsedElement>| {
        if !buf.is_empty() {
            let text = buf.join(" ").trim().to_string();
            if !text.is_empty() {
                out.push(ParsedElement::paragraph(text, None));
            }
            buf.clear();
        }
    };
    let flush_table =
        |rows: &mut Vec<Vec<String>>, out: &mut Vec<ParsedElement>, cfg: &ParserConfig| {
            if rows.is_empty() {
                return;
            }
            let data_rows = rows.len().saturating_sub(1);
            if let Some(markdown) = canonical_table(rows) {
                out.push(ParsedElement::table(markdown, data_rows, None, cfg));
            }
            rows.clear();
        };

    for line in input.lines() {
        let trimmed = line.trim_end();

        // Fenced code blocks swallow everything until the closing fence.
        if let Some(buf) = code.as_mut() {
            if trimmed.trim_start().starts_with("```") {
                let text = buf.join("\n");
                elements.push(ParsedElement::code(text, None));
                code = None;
            } else {
                buf.push(trimmed.to_string());
            }
            continue;
        }

        if trimmed.trim_start().starts_with("```") {
            flush_paragraph(&mut paragraph, &mut elements);
            flush_table(&mut table_rows, &mut elements, cfg);
            code = Some(Vec::new());
            continue;
        }

        if let Some((level, text)) = heading_of(trimmed) {
            flush_paragraph(&mut paragraph, &mut elements);
            flush_table(&mut table_rows, &mut elements, cfg);
            elements.push(ParsedElement::heading(level, text, None));
            continue;
        }

        if is_table_row(trimmed) {
            flush_paragraph(&mut paragraph, &mut elements);
            if let Some(cells) = table_cells(trimmed) {
                if !is_separator_row(&cells) {
                    table_rows.push(cells);
                }
            }
            continue;
        }
        flush_table(&mut table_rows, &mut elements, cfg);

        if let Some(item) = list_item_of(trimmed) {
            flush_paragraph(&mut paragraph, &mut elements);
            elements.push(ParsedElement::list_item(item, None));
            continue;
        }

        if trimmed.trim().is_empty() {
            flush_paragraph(&mut paragraph, &mut elements);
            continue;
        }

        paragraph.push(trimmed.trim().to_string());
    }

    // Unterminated fences degrade into a code element rather than vanishing.
    if let Some(buf) = code {
        elements.push(ParsedElement::code(buf.join("\n"), None));
    }
    flush_paragraph(&mut paragraph, &mut elements);
    flush_table(&mut table_rows, &mut elements, cfg);

    elements
}

fn heading_of(line: &str) -> Option<(u8, String)> {
    let stripped = line.trim_start();
    let hashes = stripped.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = stripped.get(hashes..)?;
    if !rest.starts_with(' ') {
        return None;
    }
    let text = rest.trim().trim_end_matches('#').trim();
    if text.is_empty() {
        return None;
    }
    Some((u8::try_from(hashes).unwrap_or(6), text.to_string()))
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.len() > 1
}

fn table_cells(line: &str) -> Option<Vec<String>> {
    let trimmed = line.trim().trim_start_matches('|').trim_end_matches('|');
    let cells: Vec<String> = trimmed
        .split('|')
        .map(|cell| cell.trim().to_string())
        .collect();
    if cells.is_empty() {
        None
    } else {
        Some(cells)
    }
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|cell| {
            !cell.is_empty() && cell.chars().all(|c| matches!(c, '-' | ':' | ' '))
        })
}

fn list_item_of(line: &str) -> Option<String> {
    let stripped = line.trim_start();
    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = stripped.strip_prefix(marker) {
            return Some(rest.trim().to_string());
        }
    }

    // Ordered list: digits followed by ". "
    let digits = stripped.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        if let Some(rest) = stripped.get(digits..) {
            if let Some(item) = rest.strip_prefix(". ") {
                return Some(item.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::element::ElementKind;

    fn cfg() -> ParserConfig {
        ParserConfig { max_table_rows: 500 }
    }

    #[test]
    fn headings_carry_levels() {
        let elements = parse("# Title\n\nBody text.\n\n### Deep".to_string(), &cfg());
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].kind, ElementKind::Heading);
        assert_eq!(elements[0].level, Some(1));
        assert_eq!(elements[0].text, "Title");
        assert_eq!(elements[1].kind, ElementKind::Paragraph);
        assert_eq!(elements[2].level, Some(3));
    }

    #[test]
    fn paragraphs_join_wrapped_lines() {
        let elements = parse("first line\nsecond line\n\nnext para".to_string(), &cfg());
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].text, "first line second line");
        assert_eq!(elements[1].text, "next para");
    }

    #[test]
    fn fenced_code_is_one_element() {
        let input = "before\n\n```rust\nfn main() {}\nlet x = 1;\n```\n\nafter";
        let elements = parse(input.to_string(), &cfg());
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[1].kind, ElementKind::Code);
        assert!(elements[1].text.contains("fn main() {}"));
        assert!(elements[1].text.contains("let x = 1;"));
    }

    #[test]
    fn table_is_single_element_with_canonical_markdown() {
        let input = "| name | qty |\n| --- | --- |\n| bolt | 4 |\n| nut | 2 |";
        let elements = parse(input.to_string(), &cfg());
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].kind, ElementKind::Table);
        let markdown = elements[0].table_markdown.as_deref().expect("markdown");
        assert!(markdown.starts_with("| name | qty |"));
        assert!(markdown.contains("| --- | --- |"));
        assert!(!elements[0].oversize_table);
    }

    #[test]
    fn oversize_table_is_flagged() {
        let mut input = String::from("| id |\n| --- |\n");
        for n in 0..10 {
            input.push_str(&format!("| {n} |\n"));
        }
        let small = ParserConfig { max_table_rows: 5 };
        let elements = parse(input, &small);
        assert_eq!(elements.len(), 1);
        assert!(elements[0].oversize_table);
    }

    #[test]
    fn list_items_are_individual_elements() {
        let input = "- alpha\n- beta\n1. first\n2. second";
        let elements = parse(input.to_string(), &cfg());
        assert_eq!(elements.len(), 4);
        assert!(elements.iter().all(|e| e.kind == ElementKind::ListItem));
        assert_eq!(elements[2].text, "first");
    }

    #[test]
    fn unterminated_fence_degrades_gracefully() {
        let input = "```\nraw content";
        let elements = parse(input.to_string(), &cfg());
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].kind, ElementKind::Code);
        assert_eq!(elements[0].text, "raw content");
    }
}
