use std::collections::HashMap;

use serde_json::Value;

/// Typed, default-returning access to one of the nested empirical tables
/// received in the `Setup` payload.
///
/// The ingested data is a heterogeneous tree of maps, lists, numbers and
/// strings; `Table` keeps that tree dynamic and exposes typed getters so the
/// loaders and calculators never touch the raw JSON variant. Any missing key
/// or type mismatch along the key path yields the caller-supplied default.
/// Integer and float leaves are promoted to `f64` uniformly. No caching.
#[derive(Debug, Clone, Default)]
pub struct Table {
    root: Value,
}

impl Table {
    pub fn new(root: Value) -> Self {
        Table { root }
    }

    /// Walks the key path and returns the value it lands on, if any.
    fn lookup(&self, keys: &[&str]) -> Option<&Value> {
        let mut current = &self.root;
        for key in keys {
            current = current.as_object()?.get(*key)?;
        }
        Some(current)
    }

    pub fn get_f64(&self, default: f64, keys: &[&str]) -> f64 {
        self.lookup(keys).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn get_str(&self, default: &str, keys: &[&str]) -> String {
        self.lookup(keys).and_then(Value::as_str).unwrap_or(default).to_string()
    }

    /// Returns the list of numbers at the key path, or an empty vector.
    /// Non-numeric elements are skipped.
    pub fn get_f64_list(&self, keys: &[&str]) -> Vec<f64> {
        match self.lookup(keys).and_then(Value::as_array) {
            Some(list) => list.iter().filter_map(Value::as_f64).collect(),
            None => Vec::new(),
        }
    }

    /// Returns the list of number lists at the key path, or an empty vector.
    pub fn get_f64_list_list(&self, keys: &[&str]) -> Vec<Vec<f64>> {
        match self.lookup(keys).and_then(Value::as_array) {
            Some(list) => list
                .iter()
                .filter_map(Value::as_array)
                .map(|inner| inner.iter().filter_map(Value::as_f64).collect())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Returns the string-to-number map at the key path, or an empty map.
    pub fn get_f64_map(&self, keys: &[&str]) -> HashMap<String, f64> {
        match self.lookup(keys).and_then(Value::as_object) {
            Some(map) => map.iter().filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f))).collect(),
            None => HashMap::new(),
        }
    }

    /// Returns the string-to-index map at the key path, or an empty map.
    /// Used for the auxiliary-data slot translation.
    pub fn get_index_map(&self, keys: &[&str]) -> HashMap<String, usize> {
        match self.lookup(keys).and_then(Value::as_object) {
            Some(map) => map.iter().filter_map(|(k, v)| v.as_u64().map(|i| (k.clone(), i as usize))).collect(),
            None => HashMap::new(),
        }
    }

    /// Returns the keys of the map at the key path, or an empty vector.
    pub fn get_map_keys(&self, keys: &[&str]) -> Vec<String> {
        match self.lookup(keys).and_then(Value::as_object) {
            Some(map) => map.keys().cloned().collect(),
            None => Vec::new(),
        }
    }
}

/// Formats a float the way the ingestion pipeline stringifies map keys
/// (shortest round-trip representation, switching to exponent notation with a
/// two-digit exponent below 1e-4). Transfer-size bucket keys in the workflow
/// tables are produced this way, so lookups must match it exactly.
pub fn float_key(value: f64) -> String {
    if value != 0.0 && value.abs() < 1e-4 {
        let formatted = format!("{:e}", value);
        match formatted.split_once('e') {
            Some((mantissa, exponent)) => {
                let exp: i32 = exponent.parse().unwrap_or(0);
                if exp < 0 {
                    format!("{}e-{:02}", mantissa, -exp)
                } else {
                    format!("{}e+{:02}", mantissa, exp)
                }
            }
            None => formatted,
        }
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_table() -> Table {
        Table::new(json!({
            "aws:us-west-2": {
                "pue": 1.11,
                "cores": 4,
                "name": "oregon",
                "durations_s": [1.0, 2, 3.5],
                "auxiliary_data": [[0.1, 0.2], [0.3, 0.4]],
                "sizes": {"a": 1.5, "b": 2},
                "translation": {"x": 0, "y": 1}
            }
        }))
    }

    #[test]
    fn test_get_f64_found_and_promoted() {
        let table = sample_table();
        assert_eq!(table.get_f64(0.0, &["aws:us-west-2", "pue"]), 1.11);
        // Integer leaves promote to f64
        assert_eq!(table.get_f64(0.0, &["aws:us-west-2", "cores"]), 4.0);
    }

    #[test]
    fn test_get_f64_missing_returns_default() {
        let table = sample_table();
        assert_eq!(table.get_f64(500.0, &["aws:eu-west-1", "pue"]), 500.0);
        assert_eq!(table.get_f64(500.0, &["aws:us-west-2", "missing"]), 500.0);
        // Traversing through a leaf also yields the default
        assert_eq!(table.get_f64(500.0, &["aws:us-west-2", "pue", "deeper"]), 500.0);
    }

    #[test]
    fn test_get_str() {
        let table = sample_table();
        assert_eq!(table.get_str("x86_64", &["aws:us-west-2", "name"]), "oregon");
        assert_eq!(table.get_str("x86_64", &["aws:us-west-2", "arch"]), "x86_64");
    }

    #[test]
    fn test_get_f64_list_mixed_numbers() {
        let table = sample_table();
        assert_eq!(table.get_f64_list(&["aws:us-west-2", "durations_s"]), vec![1.0, 2.0, 3.5]);
        assert!(table.get_f64_list(&["aws:us-west-2", "missing"]).is_empty());
    }

    #[test]
    fn test_get_f64_list_list() {
        let table = sample_table();
        let nested = table.get_f64_list_list(&["aws:us-west-2", "auxiliary_data"]);
        assert_eq!(nested, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[test]
    fn test_get_f64_map() {
        let table = sample_table();
        let map = table.get_f64_map(&["aws:us-west-2", "sizes"]);
        assert_eq!(map.get("a"), Some(&1.5));
        assert_eq!(map.get("b"), Some(&2.0));
    }

    #[test]
    fn test_get_index_map() {
        let table = sample_table();
        let map = table.get_index_map(&["aws:us-west-2", "translation"]);
        assert_eq!(map.get("x"), Some(&0));
        assert_eq!(map.get("y"), Some(&1));
    }

    #[test]
    fn test_float_key_plain_and_exponent() {
        assert_eq!(float_key(0.0), "0");
        assert_eq!(float_key(0.22), "0.22");
        assert_eq!(float_key(10.0), "10");
        // 10 KB in GB drops below the 1e-4 exponent switch
        assert_eq!(float_key(10.0 / 1048576.0), "9.5367431640625e-06");
        assert_eq!(float_key(1.0 / 1048576.0), "9.5367431640625e-07");
    }
}
