use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::calculators::system_region_name;
use crate::domain::loaders::datacenter::DataCenterLoader;
use crate::domain::loaders::workflow::WorkflowLoader;
use crate::error::{Error, Result};

/// Per-instance cost model: execution, egress, messaging-bus requests and
/// table capacity units, all priced against the datacenter table.
#[derive(Debug, Clone)]
pub struct CostCalculator {
    datacenter_loader: Arc<DataCenterLoader>,
    workflow_loader: Arc<WorkflowLoader>,
    /// Bill the intra-region share of SNS traffic as in-region data
    /// transfer instead of treating it as free.
    pub consider_intra_region_transfer_for_sns: bool,
    execution_conversion_ratio_cache: HashMap<(String, String), (f64, f64)>,
}

impl CostCalculator {
    pub fn new(datacenter_loader: Arc<DataCenterLoader>, workflow_loader: Arc<WorkflowLoader>) -> Self {
        CostCalculator {
            datacenter_loader,
            workflow_loader,
            consider_intra_region_transfer_for_sns: false,
            execution_conversion_ratio_cache: HashMap::new(),
        }
    }

    /// The virtual start never executes. It is billed for its SNS calls with
    /// an unknown caller region (so no intra-region transfer surcharge can
    /// apply) and for table reads/writes against the fixed system region.
    pub fn calculate_virtual_start_instance_cost(
        &self,
        sns_data_call_and_output_sizes: &BTreeMap<String, Vec<f64>>,
        dynamodb_read_capacity: f64,
        dynamodb_write_capacity: f64,
    ) -> Result<f64> {
        let mut total_cost = self.calculate_sns_cost("", sns_data_call_and_output_sizes)?;

        // Client requests do not originate in a provider region, so there is
        // no egress component here.
        total_cost += self.calculate_dynamodb_cost(&system_region_name(), dynamodb_read_capacity, dynamodb_write_capacity);

        Ok(total_cost)
    }

    pub fn calculate_instance_cost(
        &mut self,
        execution_time: f64,
        instance_name: &str,
        current_region_name: &str,
        data_output_sizes: &BTreeMap<String, f64>,
        sns_data_output_sizes: &BTreeMap<String, Vec<f64>>,
        dynamodb_read_capacity: f64,
        dynamodb_write_capacity: f64,
        is_invoked: bool,
    ) -> Result<f64> {
        let mut total_cost = 0.0;

        // Execution and SNS requests are only billed when the function ran
        if is_invoked {
            total_cost += self.calculate_execution_cost(instance_name, current_region_name, execution_time)?;
            total_cost += self.calculate_sns_cost(current_region_name, sns_data_output_sizes)?;
        }

        // Even an uninvoked node is modeled as an abstract instance whose
        // egress and table traffic (sync bookkeeping) is still billed
        total_cost += self.calculate_data_transfer_cost(current_region_name, data_output_sizes);
        total_cost += self.calculate_dynamodb_cost(current_region_name, dynamodb_read_capacity, dynamodb_write_capacity);

        Ok(total_cost)
    }

    pub fn calculate_dynamodb_cost(
        &self,
        current_region_name: &str,
        dynamodb_read_capacity: f64,
        dynamodb_write_capacity: f64,
    ) -> f64 {
        let (read_cost, write_cost) = self.datacenter_loader.dynamodb_read_write_cost(current_region_name);
        dynamodb_read_capacity * read_cost + dynamodb_write_capacity * write_cost
    }

    /// Each delivered 64 KB chunk is billed as one request at the
    /// destination region's request price.
    pub fn calculate_sns_cost(
        &self,
        current_region_name: &str,
        sns_data_output_sizes: &BTreeMap<String, Vec<f64>>,
    ) -> Result<f64> {
        let mut total_sns_cost = 0.0;

        // The intra-region share of SNS traffic is free by default; when the
        // flag says otherwise, the second recorded call at the current region
        // is additionally billed as in-region data transfer.
        if self.consider_intra_region_transfer_for_sns && !current_region_name.is_empty() {
            let total_data_output_size = sns_data_output_sizes
                .get(current_region_name)
                .and_then(|sizes| sizes.get(1))
                .copied()
                .unwrap_or(0.0);
            let transmission_cost_gb = self.datacenter_loader.transmission_cost(current_region_name, true);
            total_sns_cost += total_data_output_size * transmission_cost_gb;
        }

        for (region_name, sns_invocation_sizes) in sns_data_output_sizes {
            if region_name.is_empty() {
                return Err(Error::MissingRegionName);
            }
            for sns_invocation_size_gb in sns_invocation_sizes {
                let requests = (sns_invocation_size_gb * 1_048_576.0 / 64.0).ceil();
                total_sns_cost += self.datacenter_loader.sns_request_cost(region_name) * requests;
            }
        }

        Ok(total_sns_cost)
    }

    /// Egress cost of everything leaving the current region. Destinations
    /// within the current region are free and skipped.
    pub fn calculate_data_transfer_cost(&self, current_region_name: &str, data_output_sizes: &BTreeMap<String, f64>) -> f64 {
        let mut total_data_output_size = 0.0;
        for (region_name, data_size) in data_output_sizes {
            if region_name.is_empty() || !region_name.starts_with(current_region_name) {
                total_data_output_size += data_size;
            }
        }

        let transmission_cost_gb = self.datacenter_loader.transmission_cost(current_region_name, true);
        total_data_output_size * transmission_cost_gb
    }

    pub fn calculate_execution_cost(&mut self, instance_name: &str, region_name: &str, execution_time: f64) -> Result<f64> {
        let (cost_from_compute_s, invocation_cost) = self.execution_conversion_ratio(instance_name, region_name)?;
        Ok(cost_from_compute_s * execution_time + invocation_cost)
    }

    /// `(USD per second of execution, USD per invocation)` for the instance
    /// in the region, memoized per `(instance, region)`.
    pub fn execution_conversion_ratio(&mut self, instance_name: &str, region_name: &str) -> Result<(f64, f64)> {
        let cache_key = (instance_name.to_string(), region_name.to_string());
        if let Some(ratio) = self.execution_conversion_ratio_cache.get(&cache_key) {
            return Ok(*ratio);
        }

        let provider = region_name.split(':').next().unwrap_or_default();
        let memory = self.workflow_loader.memory(instance_name, provider)?;
        let architecture = self.workflow_loader.architecture(instance_name, provider);
        let compute_cost = self.datacenter_loader.compute_cost(region_name, &architecture);
        let invocation_cost = self.datacenter_loader.invocation_cost(region_name, &architecture);

        // Compute cost is priced in USD / GB-second; memory arrives in MB
        let memory_gb = memory / 1024.0;
        let cost_from_compute_s = compute_cost * memory_gb;

        self.execution_conversion_ratio_cache.insert(cache_key, (cost_from_compute_s, invocation_cost));
        Ok((cost_from_compute_s, invocation_cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::Table;
    use serde_json::json;

    fn mock_calculator() -> CostCalculator {
        let datacenter_loader = Arc::new(DataCenterLoader::new(Table::new(json!({
            "aws:us-west-2": {
                "sns_cost": {"sns_cost": 0.001},
                "dynamodb_cost": {"read_cost": 0.02, "write_cost": 0.03},
                "transmission_cost": {"provider_data_transfer": 0.05},
                "execution_cost": {
                    "compute_cost": {"x86_64": 0.1},
                    "invocation_cost": {"x86_64": 0.05}
                }
            },
            "aws:us-east-1": {
                "sns_cost": {"sns_cost": 0.001}
            }
        }))));
        let workflow_loader = Arc::new(WorkflowLoader::new(
            Table::new(json!({})),
            Table::new(json!({
                "test_instance": {"aws": {"config": {"memory": 1024.0, "architecture": "x86_64"}}}
            })),
            "aws:us-west-2".to_string(),
        ));
        CostCalculator::new(datacenter_loader, workflow_loader)
    }

    #[test]
    fn test_execution_cost() {
        let mut calculator = mock_calculator();
        // 1024 MB -> 1 GB at 0.1 USD/GB-s plus one invocation at 0.05
        let cost = calculator.calculate_execution_cost("test_instance", "aws:us-west-2", 10.0).unwrap();
        assert!((cost - 1.05).abs() < 1e-9);
        // Served from the memo on the second call
        let ratio = calculator.execution_conversion_ratio("test_instance", "aws:us-west-2").unwrap();
        assert_eq!(ratio, (0.1, 0.05));
    }

    #[test]
    fn test_egress_cost_skips_same_region() {
        let calculator = mock_calculator();
        let outputs = BTreeMap::from([("aws:us-east-1".to_string(), 0.1), ("aws:us-west-2".to_string(), 0.2)]);
        let cost = calculator.calculate_data_transfer_cost("aws:us-west-2", &outputs);
        assert!((cost - 0.1 * 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_egress_cost_bills_unknown_source_region() {
        let calculator = mock_calculator();
        let outputs = BTreeMap::from([("".to_string(), 0.1)]);
        let cost = calculator.calculate_data_transfer_cost("aws:us-west-2", &outputs);
        assert!((cost - 0.1 * 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_sns_cost_rounds_each_call_up() {
        let calculator = mock_calculator();
        // 0.005 GB and 0.01 GB round up to 82 and 164 requests respectively
        let sizes = BTreeMap::from([("aws:us-east-1".to_string(), vec![0.005, 0.01])]);
        let cost = calculator.calculate_sns_cost("aws:us-west-2", &sizes).unwrap();
        let expected = ((0.005f64 * 1_048_576.0 / 64.0).ceil() + (0.01f64 * 1_048_576.0 / 64.0).ceil()) * 0.001;
        assert!((cost - expected).abs() < 1e-9);
    }

    #[test]
    fn test_sns_cost_empty_is_zero() {
        let calculator = mock_calculator();
        let cost = calculator.calculate_sns_cost("aws:us-west-2", &BTreeMap::new()).unwrap();
        assert_eq!(cost, 0.0);
    }

    #[test]
    fn test_sns_cost_rejects_unnamed_region() {
        let calculator = mock_calculator();
        let sizes = BTreeMap::from([("".to_string(), vec![0.005])]);
        assert!(calculator.calculate_sns_cost("aws:us-west-2", &sizes).is_err());
    }

    #[test]
    fn test_sns_cost_intra_region_surcharge_when_enabled() {
        let mut calculator = mock_calculator();
        calculator.consider_intra_region_transfer_for_sns = true;
        // The second recorded call at the current region is billed as
        // in-region transfer on top of the per-call requests
        let sizes = BTreeMap::from([("aws:us-west-2".to_string(), vec![0.005, 0.01])]);
        let cost = calculator.calculate_sns_cost("aws:us-west-2", &sizes).unwrap();
        let expected_requests = ((0.005f64 * 1_048_576.0 / 64.0).ceil() + (0.01f64 * 1_048_576.0 / 64.0).ceil()) * 0.001;
        let expected_surcharge = 0.01 * 0.05;
        assert!((cost - (expected_requests + expected_surcharge)).abs() < 1e-9);
    }

    #[test]
    fn test_dynamodb_cost() {
        let calculator = mock_calculator();
        let cost = calculator.calculate_dynamodb_cost("aws:us-west-2", 100.0, 200.0);
        assert!((cost - (100.0 * 0.02 + 200.0 * 0.03)).abs() < 1e-9);
    }

    #[test]
    fn test_virtual_start_instance_cost() {
        let calculator = mock_calculator();
        let sns_sizes = BTreeMap::from([("aws:us-east-1".to_string(), vec![0.005, 0.01])]);
        let cost = calculator.calculate_virtual_start_instance_cost(&sns_sizes, 100.0, 200.0).unwrap();
        let expected_dynamodb = 100.0 * 0.02 + 200.0 * 0.03;
        let expected_sns = ((0.005f64 * 1_048_576.0 / 64.0).ceil() + (0.01f64 * 1_048_576.0 / 64.0).ceil()) * 0.001;
        assert!((cost - (expected_dynamodb + expected_sns)).abs() < 1e-9);
    }

    #[test]
    fn test_instance_cost_not_invoked_skips_execution_and_sns() {
        let mut calculator = mock_calculator();
        let outputs = BTreeMap::from([("aws:us-east-1".to_string(), 0.1)]);
        let sns_sizes = BTreeMap::from([("aws:us-east-1".to_string(), vec![0.02])]);
        let cost = calculator
            .calculate_instance_cost(0.0, "test_instance", "aws:us-west-2", &outputs, &sns_sizes, 50.0, 100.0, false)
            .unwrap();
        let expected = 0.1 * 0.05 + 50.0 * 0.02 + 100.0 * 0.03;
        assert!((cost - expected).abs() < 1e-9);
    }

    #[test]
    fn test_instance_cost_invoked_includes_all_components() {
        let mut calculator = mock_calculator();
        let outputs = BTreeMap::from([("aws:us-east-1".to_string(), 0.1)]);
        let sns_sizes = BTreeMap::from([("aws:us-east-1".to_string(), vec![0.02])]);
        let cost = calculator
            .calculate_instance_cost(10.0, "test_instance", "aws:us-west-2", &outputs, &sns_sizes, 50.0, 100.0, true)
            .unwrap();
        let expected_execution = 1.05;
        let expected_sns = (0.02f64 * 1_048_576.0 / 64.0).ceil() * 0.001;
        let expected_rest = 0.1 * 0.05 + 50.0 * 0.02 + 100.0 * 0.03;
        assert!((cost - (expected_execution + expected_sns + expected_rest)).abs() < 1e-9);
    }
}
