use std::collections::HashMap;

use crate::api::setup_dto::IndexerDto;

/// Bidirectional mapping between string identifiers (instance or region
/// names) and the dense integer indices the rest of the engine works with.
/// The mapping is produced by the caller and shipped in the `Setup` payload;
/// this is a plain copy of it.
#[derive(Debug, Clone, Default)]
pub struct Indexer {
    value_indices: HashMap<String, i32>,
    indices_values: HashMap<i32, String>,
}

impl Indexer {
    pub fn from_dto(dto: &IndexerDto) -> Self {
        let value_indices = dto.value_indices.clone();
        let mut indices_values = HashMap::with_capacity(dto.indices_to_values.len());
        for (index, value) in &dto.indices_to_values {
            if let Ok(index) = index.parse::<i32>() {
                indices_values.insert(index, value.clone());
            }
        }
        Indexer { value_indices, indices_values }
    }

    pub fn value_to_index(&self, value: &str) -> Option<i32> {
        self.value_indices.get(value).copied()
    }

    pub fn index_to_value(&self, index: i32) -> Option<&str> {
        self.indices_values.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.value_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value_indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_indexer() -> Indexer {
        let dto = IndexerDto {
            value_indices: HashMap::from([("start".to_string(), 0), ("process".to_string(), 1)]),
            indices_to_values: HashMap::from([("0".to_string(), "start".to_string()), ("1".to_string(), "process".to_string())]),
        };
        Indexer::from_dto(&dto)
    }

    #[test]
    fn test_round_trip() {
        let indexer = sample_indexer();
        assert_eq!(indexer.value_to_index("start"), Some(0));
        assert_eq!(indexer.value_to_index("process"), Some(1));
        assert_eq!(indexer.index_to_value(0), Some("start"));
        assert_eq!(indexer.index_to_value(1), Some("process"));
        assert_eq!(indexer.len(), 2);
    }

    #[test]
    fn test_missing_entries() {
        let indexer = sample_indexer();
        assert_eq!(indexer.value_to_index("unknown"), None);
        assert_eq!(indexer.index_to_value(7), None);
    }
}
