use rsm_index::Record;
use rsm_registry::Document;

/// A pure transform from a fetched document to an indexable record, or
/// `None` when the document isn't indexable under current rules (§1, §4.F
/// step 7). Must be idempotent — it's one of the two places (alongside the
/// index's upsert) that carries the at-least-once contract's idempotency
/// requirement.
pub trait Formatter: Send + Sync {
    /// Transform a fetched document into an indexable record, or `None` to
    /// skip it.
    fn format(&self, doc: &Document) -> Option<Record>;
}

/// A minimal default formatter: skips documents with no name field, passes
/// everything else straight through as the record's fields.
pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {
    fn format(&self, doc: &Document) -> Option<Record> {
        if doc.deleted {
            return None;
        }
        let has_name = doc
            .raw
            .as_object()
            .map(|obj| obj.contains_key("name"))
            .unwrap_or(false);
        if !has_name {
            return None;
        }
        Some(Record {
            object_id: doc.id.clone(),
            fields: doc.raw.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn skips_deleted_and_nameless_documents() {
        let formatter = DefaultFormatter;

        let deleted = Document {
            id: "left-pad".to_string(),
            rev: "1-a".to_string(),
            deleted: true,
            raw: json!({"name": "left-pad"}),
        };
        assert!(formatter.format(&deleted).is_none());

        let nameless = Document {
            id: "left-pad".to_string(),
            rev: "1-a".to_string(),
            deleted: false,
            raw: json!({}),
        };
        assert!(formatter.format(&nameless).is_none());
    }

    #[test]
    fn formats_a_plain_document() {
        let formatter = DefaultFormatter;
        let doc = Document {
            id: "left-pad".to_string(),
            rev: "1-a".to_string(),
            deleted: false,
            raw: json!({"name": "left-pad", "version": "1.0.0"}),
        };
        let record = formatter.format(&doc).unwrap();
        assert_eq!(record.object_id, "left-pad");
    }
}
