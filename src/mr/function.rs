//! Built-in map and reduce functions.

/// Word count.
pub mod wc {
    use crate::mr::task::KeyValue;

    /// Lowercase the content, split on whitespace, emit `(word, "1")`.
    pub fn map(_file: &str, content: &str) -> Vec<KeyValue> {
        content
            .to_lowercase()
            .split_whitespace()
            .map(|word| KeyValue::new(word.to_string(), "1".to_string()))
            .collect()
    }

    /// Sum the counts as decimal integers.
    pub fn reduce(_key: &str, values: &[String]) -> String {
        values
            .iter()
            .filter_map(|value| value.parse::<i64>().ok())
            .sum::<i64>()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::wc;

    #[test]
    fn map_lowercases_and_splits() {
        let records = wc::map("file1", "Apple banana  APPLE\n");
        let words: Vec<&str> = records.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(words, ["apple", "banana", "apple"]);
        assert!(records.iter().all(|kv| kv.value == "1"));
    }

    #[test]
    fn reduce_sums_counts() {
        let values = vec!["1".to_string(), "1".to_string(), "3".to_string()];
        assert_eq!(wc::reduce("apple", &values), "5");
    }
}
