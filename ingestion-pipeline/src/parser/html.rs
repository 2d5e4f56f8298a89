use common::error::AppError;
use dom_smoothie::{Readability, TextMode};

use super::{markdown, ParsedElement, ParserConfig};

/// HTML: boil the page down to its readable article, then run the markdown
/// strategy over the extracted text. The article title becomes a level-1
/// heading in front of the body.
pub fn parse(bytes: &[u8], cfg: &ParserConfig) -> Result<Vec<ParsedElement>, AppError> {
    let html = String::from_utf8_lossy(bytes).into_owned();

    let config = dom_smoothie::Config {
        text_mode: TextMode::Markdown,
        ..Default::default()
    };
    let mut readability = Readability::new(html, None, Some(config))
        .map_err(|e| AppError::ParseFailed(format!("readability rejected document: {e}")))?;
    let article = readability
        .parse()
        .map_err(|e| AppError::ParseFailed(format!("readability parse failed: {e}")))?;

    let mut elements = Vec::new();
    let title = article.title.trim().to_string();
    if !title.is_empty() {
        elements.push(ParsedElement::heading(1, title, None));
    }

    let body: String = article.text_content.into();
    elements.extend(markdown::parse(body, cfg));

    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::element::ElementKind;

    fn cfg() -> ParserConfig {
        ParserConfig { max_table_rows: 500 }
    }

    #[test]
    fn article_body_and_title_are_extracted() {
        let html = r#"<!DOCTYPE html>
<html>
  <head><title>Release Notes</title></head>
  <body>
    <nav>skip me</nav>
    <article>
      <h1>Release Notes</h1>
      <p>The scheduler is now cooperative and considerably fairer under load.
      This paragraph needs to be long enough that readability keeps it as the
      main content of the page rather than discarding the body entirely.</p>
      <p>A second paragraph describes the upgraded retrieval pipeline in some
      detail so the extraction has more than one block to work with.</p>
    </article>
  </body>
</html>"#;

        let elements = parse(html.as_bytes(), &cfg()).expect("parse");
        assert!(!elements.is_empty());
        assert_eq!(elements[0].kind, ElementKind::Heading);
        assert_eq!(elements[0].level, Some(1));
        assert!(elements
            .iter()
            .any(|e| e.text.contains("cooperative")));
    }
}
