use crate::lookup::Table;

pub const RELATIVE_PERFORMANCE_DEFAULT: f64 = 1.0;
// One prohibitive sample, so an unmeasured route never looks fast.
pub const TRANSMISSION_LATENCY_DEFAULT_S: f64 = 1000.0;

/// Keyed access to the CloudPing inter-region latency samples and the
/// relative region performance figures.
#[derive(Debug, Clone)]
pub struct PerformanceLoader {
    data: Table,
}

impl PerformanceLoader {
    pub fn new(data: Table) -> Self {
        PerformanceLoader { data }
    }

    pub fn relative_performance(&self, region_name: &str) -> f64 {
        self.data.get_f64(RELATIVE_PERFORMANCE_DEFAULT, &[region_name, "relative_performance"])
    }

    pub fn transmission_latency_distribution(&self, from_region_name: &str, to_region_name: &str) -> Vec<f64> {
        let distribution =
            self.data.get_f64_list(&[from_region_name, "transmission_latency", to_region_name, "latency_distribution"]);
        if distribution.is_empty() {
            vec![TRANSMISSION_LATENCY_DEFAULT_S]
        } else {
            distribution
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_loader() -> PerformanceLoader {
        PerformanceLoader::new(Table::new(json!({
            "aws:region1": {
                "relative_performance": 1,
                "transmission_latency": {
                    "aws:region1": {"latency_distribution": [0.005], "unit": "s"},
                    "aws:region2": {"latency_distribution": [0.05], "unit": "s"}
                }
            }
        })))
    }

    #[test]
    fn test_relative_performance() {
        let loader = sample_loader();
        assert_eq!(loader.relative_performance("aws:region1"), 1.0);
        assert_eq!(loader.relative_performance("aws:non-existent-region"), RELATIVE_PERFORMANCE_DEFAULT);
    }

    #[test]
    fn test_transmission_latency_distribution() {
        let loader = sample_loader();
        assert_eq!(loader.transmission_latency_distribution("aws:region1", "aws:region2"), vec![0.05]);
        assert_eq!(
            loader.transmission_latency_distribution("aws:region1", "aws:non-existent-region"),
            vec![TRANSMISSION_LATENCY_DEFAULT_S]
        );
    }
}
