//! Latest-value-per-key snapshot cache

use std::collections::HashMap;

use serde_json::Value;

/// In-memory mapping from stringified key to the latest record
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    key_field: String,
    records: HashMap<String, Value>,
}

impl SnapshotCache {
    /// Create an empty cache keyed by `key_field`
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            records: HashMap::new(),
        }
    }

    /// Remove every record
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Upsert each record under its key.
    ///
    /// Records without a scalar key are skipped. Returns the records that
    /// were stored, in input order.
    pub fn apply_batch(&mut self, records: Vec<Value>) -> Vec<Value> {
        let mut applied = Vec::with_capacity(records.len());

        for record in records {
            match record_key(&record, &self.key_field) {
                Some(key) => {
                    self.records.insert(key, record.clone());
                    applied.push(record);
                }
                None => {
                    tracing::debug!(key_field = %self.key_field, "Dropping record without key");
                }
            }
        }

        applied
    }

    /// Copy of all cached records, unordered
    pub fn values(&self) -> Vec<Value> {
        self.records.values().cloned().collect()
    }

    /// Look up a record by its stringified key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }
}

/// Stringify the key field of a record. Only scalars qualify.
pub fn record_key(record: &Value, key_field: &str) -> Option<String> {
    match record.get(key_field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_clear_then_empty_batch() {
        let mut cache = SnapshotCache::new("id");
        cache.apply_batch(vec![json!({"id": "1"})]);
        cache.clear();
        cache.apply_batch(vec![]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reapply_is_idempotent() {
        let mut cache = SnapshotCache::new("id");
        let record = json!({"id": "1", "v": 10});

        cache.apply_batch(vec![record.clone()]);
        cache.apply_batch(vec![record.clone()]);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("1"), Some(&record));
    }

    #[test]
    fn test_latest_value_wins() {
        let mut cache = SnapshotCache::new("id");
        cache.apply_batch(vec![json!({"id": "1", "v": 10}), json!({"id": "2", "v": 20})]);
        cache.apply_batch(vec![json!({"id": "1", "v": 99})]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("1"), Some(&json!({"id": "1", "v": 99})));
        assert_eq!(cache.get("2"), Some(&json!({"id": "2", "v": 20})));
    }

    #[test]
    fn test_size_bounded_by_records_applied() {
        let mut cache = SnapshotCache::new("id");
        let batches = vec![
            vec![json!({"id": 1}), json!({"id": 2})],
            vec![json!({"id": 2}), json!({"id": 3})],
            vec![json!({"id": 4})],
        ];

        let total: usize = batches.iter().map(Vec::len).sum();
        for batch in batches {
            cache.apply_batch(batch);
        }

        // One duplicate key, so strictly smaller
        assert_eq!(cache.len(), 4);
        assert!(cache.len() < total);
    }

    #[test]
    fn test_numeric_and_string_keys_collide() {
        let mut cache = SnapshotCache::new("id");
        cache.apply_batch(vec![json!({"id": 7, "src": "num"})]);
        cache.apply_batch(vec![json!({"id": "7", "src": "str"})]);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("7").and_then(|v| v.get("src")), Some(&json!("str")));
    }

    #[test]
    fn test_records_without_scalar_key_dropped() {
        let mut cache = SnapshotCache::new("id");
        let applied = cache.apply_batch(vec![
            json!({"v": 1}),
            json!({"id": null}),
            json!({"id": {"nested": 1}}),
            json!("bare string"),
            json!({"id": "ok"}),
        ]);

        assert_eq!(applied, vec![json!({"id": "ok"})]);
        assert_eq!(cache.len(), 1);
    }
}
