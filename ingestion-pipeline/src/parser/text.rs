use super::ParsedElement;

/// Plain text: blank-line separated paragraphs.
pub fn parse(input: String) -> Vec<ParsedElement> {
    input
        .split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| {
            let joined = block
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            ParsedElement::paragraph(joined, None)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_separate_paragraphs() {
        let elements = parse("one\ntwo\n\nthree\n\n\nfour".to_string());
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].text, "one two");
        assert_eq!(elements[1].text, "three");
        assert_eq!(elements[2].text, "four");
    }

    #[test]
    fn whitespace_only_input_yields_nothing() {
        assert!(parse("  \n \n\n ".to_string()).is_empty());
    }
}
