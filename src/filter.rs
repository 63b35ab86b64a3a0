//! Validity partitioning for the combined record stream.
//!
//! Runs after shape normalization so flat and docling-derived records are
//! judged under one rule: a record is embeddable iff it is a mapping whose
//! `text` field is a string with non-whitespace content. Everything else is
//! routed to the skipped set exactly as received.

use serde_json::Value;

/// A record that passed the validity filter, with its text pulled out for
/// the embedding stage. The original JSON value rides along untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRecord {
    /// The record as received from normalization.
    pub value: Value,
    /// The `text` field, unmodified (trimming is only used for the check).
    pub text: String,
}

/// Splits records into embeddable and skipped sets, preserving order.
///
/// Every input lands in exactly one of the two outputs.
pub fn partition_records(records: Vec<Value>) -> (Vec<ValidRecord>, Vec<Value>) {
    let mut valid = Vec::new();
    let mut skipped = Vec::new();
    for record in records {
        match usable_text(&record) {
            Some(text) => valid.push(ValidRecord {
                text,
                value: record,
            }),
            None => skipped.push(record),
        }
    }
    (valid, skipped)
}

fn usable_text(record: &Value) -> Option<String> {
    if !record.is_object() {
        return None;
    }
    let text = record.get("text")?.as_str()?;
    if text.trim().is_empty() {
        return None;
    }
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partitions_mixed_records() {
        let records = vec![
            json!({"text": "hello"}),
            json!({"foo": "bar"}),
            json!({"text": "  "}),
        ];
        let (valid, skipped) = partition_records(records);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].text, "hello");
        assert_eq!(skipped, vec![json!({"foo": "bar"}), json!({"text": "  "})]);
    }

    #[test]
    fn non_mappings_are_skipped_verbatim() {
        let records = vec![json!("loose string"), json!(42), json!(null)];
        let (valid, skipped) = partition_records(records.clone());
        assert!(valid.is_empty());
        assert_eq!(skipped, records);
    }

    #[test]
    fn non_string_text_is_skipped() {
        let (valid, skipped) = partition_records(vec![json!({"text": 3})]);
        assert!(valid.is_empty());
        assert_eq!(skipped, vec![json!({"text": 3})]);
    }

    #[test]
    fn every_record_lands_in_exactly_one_set() {
        let records = vec![
            json!({"id": "a_0", "text": "alpha"}),
            json!({"id": "a_1"}),
            json!([1, 2, 3]),
            json!({"text": "\n\t"}),
            json!({"text": "beta", "metadata": {"page": 2}}),
        ];
        let total = records.len();
        let (valid, skipped) = partition_records(records);
        assert_eq!(valid.len() + skipped.len(), total);
        assert_eq!(valid.len(), 2);
    }

    #[test]
    fn text_is_preserved_untrimmed() {
        let (valid, _) = partition_records(vec![json!({"text": "  padded  "})]);
        assert_eq!(valid[0].text, "  padded  ");
    }
}
