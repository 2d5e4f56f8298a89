use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Heading,
    Paragraph,
    ListItem,
    Table,
    Code,
    Other,
}

stored_object!(Element, "element", {
    document_id: i64,
    tenant_id: String,
    /// Monotonic reading order within the document.
    ordinal: i64,
    kind: ElementKind,
    page: Option<u32>,
    /// Heading depth 1..6; only set for headings.
    level: Option<u8>,
    text: String,
    table_markdown: Option<String>,
    /// Table exceeded `max_table_rows` at parse time; the chunker splits it.
    oversize_table: bool
});

impl Element {
    /// Replace a document's elements in one transaction and advance the
    /// document to `chunking`. Re-running the parse stage therefore always
    /// converges to the same rows.
    pub async fn replace_for_document(
        db: &SurrealDbClient,
        document_id: i64,
        elements: Vec<Element>,
    ) -> Result<(), AppError> {
        db.query(
            "BEGIN TRANSACTION;
             DELETE element WHERE document_id = $document_id;
             INSERT INTO element $elements;
             UPDATE type::thing('document', $document_id) SET \
                 status = 'chunking', updated_at = time::now();
             COMMIT TRANSACTION;",
        )
        .bind(("document_id", document_id))
        .bind(("elements", elements))
        .await?
        .check()?;
        Ok(())
    }

    pub async fn for_document(
        db: &SurrealDbClient,
        document_id: i64,
    ) -> Result<Vec<Self>, AppError> {
        let elements: Vec<Self> = db
            .query("SELECT * FROM element WHERE document_id = $document_id ORDER BY ordinal ASC")
            .bind(("document_id", document_id))
            .await?
            .take(0)?;
        Ok(elements)
    }
}
