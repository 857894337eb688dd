use crate::lookup::Table;

// Fallback prices and power figures, applied whenever a region is missing
// from the datacenter table. Cost defaults are prohibitive: a region
// without price data must not come out cheap.
pub const AVERAGE_MEMORY_POWER_DEFAULT: f64 = 100.0;
pub const PUE_DEFAULT: f64 = 1.0;
pub const CFE_DEFAULT: f64 = 0.0;
pub const COMPUTE_COST_DEFAULT: f64 = 100.0;
pub const INVOCATION_COST_DEFAULT: f64 = 100.0;
pub const TRANSMISSION_COST_DEFAULT: f64 = 100.0;
pub const MAX_CPU_POWER_DEFAULT: f64 = 0.0035;
pub const MIN_CPU_POWER_DEFAULT: f64 = 0.00074;
pub const SNS_REQUEST_COST_DEFAULT: f64 = 0.50 / 1_000_000.0; // 0.50 USD per 1 million requests (At Ohio region)
pub const DYNAMODB_READ_COST_DEFAULT: f64 = 0.25 / 1_000_000.0; // 0.25 USD per 1 million read request unit (At Ohio region)
pub const DYNAMODB_WRITE_COST_DEFAULT: f64 = 1.25 / 1_000_000.0; // 1.25 USD per 1 million write request unit (At Ohio region)
pub const ECR_MONTHLY_STORAGE_COST_DEFAULT: f64 = 0.10; // 0.10 USD per 1 GB per month (At Ohio region)

/// Keyed access to the per-region price and power table.
#[derive(Debug, Clone)]
pub struct DataCenterLoader {
    data: Table,
}

impl DataCenterLoader {
    pub fn new(data: Table) -> Self {
        DataCenterLoader { data }
    }

    pub fn average_memory_power(&self, region_name: &str) -> f64 {
        self.data.get_f64(AVERAGE_MEMORY_POWER_DEFAULT, &[region_name, "average_memory_power"])
    }

    pub fn pue(&self, region_name: &str) -> f64 {
        self.data.get_f64(PUE_DEFAULT, &[region_name, "pue"])
    }

    pub fn cfe(&self, region_name: &str) -> f64 {
        self.data.get_f64(CFE_DEFAULT, &[region_name, "cfe"])
    }

    pub fn max_cpu_power(&self, region_name: &str) -> f64 {
        self.data.get_f64(MAX_CPU_POWER_DEFAULT, &[region_name, "max_cpu_power_kWh"])
    }

    pub fn min_cpu_power(&self, region_name: &str) -> f64 {
        self.data.get_f64(MIN_CPU_POWER_DEFAULT, &[region_name, "min_cpu_power_kWh"])
    }

    pub fn sns_request_cost(&self, region_name: &str) -> f64 {
        self.data.get_f64(SNS_REQUEST_COST_DEFAULT, &[region_name, "sns_cost", "sns_cost"])
    }

    /// Returns `(read_cost, write_cost)` per capacity unit.
    pub fn dynamodb_read_write_cost(&self, region_name: &str) -> (f64, f64) {
        (
            self.data.get_f64(DYNAMODB_READ_COST_DEFAULT, &[region_name, "dynamodb_cost", "read_cost"]),
            self.data.get_f64(DYNAMODB_WRITE_COST_DEFAULT, &[region_name, "dynamodb_cost", "write_cost"]),
        )
    }

    pub fn ecr_storage_cost(&self, region_name: &str) -> f64 {
        self.data.get_f64(ECR_MONTHLY_STORAGE_COST_DEFAULT, &[region_name, "ecr_cost", "storage_cost"])
    }

    pub fn compute_cost(&self, region_name: &str, architecture: &str) -> f64 {
        self.data.get_f64(COMPUTE_COST_DEFAULT, &[region_name, "execution_cost", "compute_cost", architecture])
    }

    pub fn invocation_cost(&self, region_name: &str, architecture: &str) -> f64 {
        self.data.get_f64(INVOCATION_COST_DEFAULT, &[region_name, "execution_cost", "invocation_cost", architecture])
    }

    pub fn transmission_cost(&self, region_name: &str, intra_provider_transfer: bool) -> f64 {
        let transfer_type = if intra_provider_transfer { "provider_data_transfer" } else { "global_data_transfer" };
        self.data.get_f64(TRANSMISSION_COST_DEFAULT, &[region_name, "transmission_cost", transfer_type])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_loader() -> DataCenterLoader {
        DataCenterLoader::new(Table::new(json!({
            "aws:us-west-2": {
                "average_memory_power": 0.000392,
                "pue": 1.11,
                "cfe": 0.9,
                "max_cpu_power_kWh": 0.0035,
                "min_cpu_power_kWh": 0.00074,
                "sns_cost": {"sns_cost": 5e-7},
                "dynamodb_cost": {"read_cost": 2.5e-7, "write_cost": 1.25e-6},
                "ecr_cost": {"storage_cost": 0.1},
                "execution_cost": {
                    "compute_cost": {"x86_64": 1.66667e-5, "arm64": 1.33334e-5},
                    "invocation_cost": {"x86_64": 2e-7, "arm64": 2e-7}
                },
                "transmission_cost": {"provider_data_transfer": 0.09, "global_data_transfer": 0.12}
            }
        })))
    }

    #[test]
    fn test_known_region_values() {
        let loader = sample_loader();
        assert_eq!(loader.average_memory_power("aws:us-west-2"), 0.000392);
        assert_eq!(loader.pue("aws:us-west-2"), 1.11);
        assert_eq!(loader.cfe("aws:us-west-2"), 0.9);
        assert_eq!(loader.compute_cost("aws:us-west-2", "arm64"), 1.33334e-5);
        assert_eq!(loader.invocation_cost("aws:us-west-2", "x86_64"), 2e-7);
        assert_eq!(loader.transmission_cost("aws:us-west-2", true), 0.09);
        assert_eq!(loader.transmission_cost("aws:us-west-2", false), 0.12);
        assert_eq!(loader.dynamodb_read_write_cost("aws:us-west-2"), (2.5e-7, 1.25e-6));
        assert_eq!(loader.sns_request_cost("aws:us-west-2"), 5e-7);
        assert_eq!(loader.ecr_storage_cost("aws:us-west-2"), 0.1);
    }

    #[test]
    fn test_unknown_region_defaults() {
        let loader = sample_loader();
        assert_eq!(loader.average_memory_power("aws:eu-west-1"), AVERAGE_MEMORY_POWER_DEFAULT);
        assert_eq!(loader.pue("aws:eu-west-1"), PUE_DEFAULT);
        assert_eq!(loader.cfe("aws:eu-west-1"), CFE_DEFAULT);
        assert_eq!(loader.compute_cost("aws:eu-west-1", "x86_64"), COMPUTE_COST_DEFAULT);
        assert_eq!(loader.min_cpu_power("aws:eu-west-1"), MIN_CPU_POWER_DEFAULT);
        assert_eq!(loader.max_cpu_power("aws:eu-west-1"), MAX_CPU_POWER_DEFAULT);
        assert_eq!(loader.dynamodb_read_write_cost("aws:eu-west-1"), (DYNAMODB_READ_COST_DEFAULT, DYNAMODB_WRITE_COST_DEFAULT));
    }
}
