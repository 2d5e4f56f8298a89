use common::error::AppError;

use super::{canonical_table, ParsedElement, ParserConfig};

/// CSV/TSV: the whole file becomes one canonical markdown table element
/// with the first record as the header row. Quoted fields may contain the
/// delimiter, doubled quotes and newlines.
pub fn parse(
    input: String,
    delimiter: char,
    cfg: &ParserConfig,
) -> Result<Vec<ParsedElement>, AppError> {
    let rows = records(&input, delimiter);
    if rows.is_empty() {
        return Err(AppError::ParseFailed("delimited file has no records".into()));
    }

    let data_rows = rows.len().saturating_sub(1);
    let markdown = canonical_table(&rows)
        .ok_or_else(|| AppError::ParseFailed("delimited file has no header row".into()))?;

    Ok(vec![ParsedElement::table(markdown, data_rows, None, cfg)])
}

fn records(input: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            c if c == delimiter => {
                row.push(std::mem::take(&mut field));
            }
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                if row.iter().any(|f| !f.trim().is_empty()) {
                    rows.push(std::mem::take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        if row.iter().any(|f| !f.trim().is_empty()) {
            rows.push(row);
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::element::ElementKind;

    fn cfg() -> ParserConfig {
        ParserConfig { max_table_rows: 500 }
    }

    #[test]
    fn csv_becomes_one_table_element() {
        let input = "name,qty\nbolt,4\nnut,2\n";
        let elements = parse(input.to_string(), ',', &cfg()).expect("parse");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].kind, ElementKind::Table);
        let markdown = elements[0].table_markdown.as_deref().expect("markdown");
        assert!(markdown.starts_with("| name | qty |"));
        assert!(markdown.ends_with("| nut | 2 |"));
    }

    #[test]
    fn quoted_fields_keep_delimiters_and_quotes() {
        let input = "name,note\nbolt,\"m3, steel\"\nnut,\"say \"\"hi\"\"\"\n";
        let rows = records(input, ',');
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][1], "m3, steel");
        assert_eq!(rows[2][1], "say \"hi\"");
    }

    #[test]
    fn tsv_uses_tab_delimiter() {
        let input = "a\tb\n1\t2\n";
        let elements = parse(input.to_string(), '\t', &cfg()).expect("parse");
        let markdown = elements[0].table_markdown.as_deref().expect("markdown");
        assert!(markdown.starts_with("| a | b |"));
    }

    #[test]
    fn empty_input_fails() {
        let result = parse(String::new(), ',', &cfg());
        assert!(matches!(result, Err(AppError::ParseFailed(_))));
    }

    #[test]
    fn oversize_csv_is_flagged() {
        let mut input = String::from("id\n");
        for n in 0..10 {
            input.push_str(&format!("{n}\n"));
        }
        let small = ParserConfig { max_table_rows: 5 };
        let elements = parse(input, ',', &small).expect("parse");
        assert!(elements[0].oversize_table);
    }
}
