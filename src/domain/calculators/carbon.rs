use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::loaders::carbon::CarbonLoader;
use crate::domain::loaders::datacenter::DataCenterLoader;
use crate::domain::loaders::workflow::WorkflowLoader;
use crate::error::Result;

pub const AVERAGE_USA_CARBON_INTENSITY: f64 = 410.0;

/// Per-instance carbon model: compute and memory energy scaled by the grid
/// intensity of the executing region, plus transmission carbon per tracked
/// data movement.
#[derive(Debug, Clone)]
pub struct CarbonCalculator {
    carbon_loader: Arc<CarbonLoader>,
    datacenter_loader: Arc<DataCenterLoader>,
    workflow_loader: Arc<WorkflowLoader>,
    consider_cfe: bool,
    energy_factor: f64,
    carbon_free_intra_region_transmission: bool,
    carbon_free_dt_execution_home_region: bool,
    hourly_carbon_setting: Option<String>,
    execution_conversion_ratio_cache: HashMap<(String, String), [f64; 3]>,
}

impl CarbonCalculator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        carbon_loader: Arc<CarbonLoader>,
        datacenter_loader: Arc<DataCenterLoader>,
        workflow_loader: Arc<WorkflowLoader>,
        consider_cfe: bool,
        energy_factor: f64,
        carbon_free_intra_region_transmission: bool,
        carbon_free_dt_execution_home_region: bool,
    ) -> Self {
        CarbonCalculator {
            carbon_loader,
            datacenter_loader,
            workflow_loader,
            consider_cfe,
            energy_factor,
            carbon_free_intra_region_transmission,
            carbon_free_dt_execution_home_region,
            hourly_carbon_setting: None,
            execution_conversion_ratio_cache: HashMap::new(),
        }
    }

    /// Switches between overall and hourly grid intensities. The memoized
    /// conversion ratios embed the intensity, so they are dropped.
    pub fn alter_carbon_setting(&mut self, setting: Option<String>) {
        self.hourly_carbon_setting = setting;
        self.execution_conversion_ratio_cache.clear();
    }

    pub fn hourly_carbon_setting(&self) -> Option<&str> {
        self.hourly_carbon_setting.as_deref()
    }

    /// The virtual start never executes; only its tracked transfers carry
    /// carbon, attributed to an unknown current region.
    pub fn calculate_virtual_start_instance_carbon(
        &self,
        data_input_sizes: &BTreeMap<String, f64>,
        data_output_sizes: &BTreeMap<String, f64>,
    ) -> f64 {
        self.calculate_data_transfer_carbon("", data_input_sizes, data_output_sizes, 0.0)
    }

    /// Returns `(execution_carbon, transmission_carbon)`.
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_instance_carbon(
        &mut self,
        execution_time: f64,
        instance_name: &str,
        region_name: &str,
        data_input_sizes: &BTreeMap<String, f64>,
        data_output_sizes: &BTreeMap<String, f64>,
        data_transfer_during_execution: f64,
        is_invoked: bool,
        is_redirector: bool,
    ) -> Result<(f64, f64)> {
        let mut execution_carbon = 0.0;
        if is_invoked {
            execution_carbon += self.calculate_execution_carbon(instance_name, region_name, execution_time, is_redirector)?;
        }

        // Transfer carbon applies even to uninvoked nodes; sync bookkeeping
        // moves data regardless of invocation
        let transmission_carbon = self.calculate_data_transfer_carbon(
            region_name,
            data_input_sizes,
            data_output_sizes,
            data_transfer_during_execution,
        );

        Ok((execution_carbon, transmission_carbon))
    }

    /// Carbon of every tracked transfer into the current region. Output
    /// sizes are accepted for symmetry but not billed: the energy factor
    /// covers both transfer endpoints, so counting inputs alone avoids
    /// double-charging each edge.
    pub fn calculate_data_transfer_carbon(
        &self,
        current_region_name: &str,
        data_input_sizes: &BTreeMap<String, f64>,
        _data_output_sizes: &BTreeMap<String, f64>,
        data_transfer_during_execution: f64,
    ) -> f64 {
        let mut total_transmission_carbon = 0.0;

        for (from_region_name, data_transfer_gb) in data_input_sizes {
            let mut network_carbon_intensity = AVERAGE_USA_CARBON_INTENSITY;
            if from_region_name == current_region_name {
                if self.carbon_free_intra_region_transmission {
                    continue;
                }
                if !current_region_name.is_empty() {
                    network_carbon_intensity =
                        self.carbon_loader.grid_carbon_intensity(current_region_name, self.hourly_carbon_setting());
                }
            } else if !from_region_name.is_empty() && !current_region_name.is_empty() {
                network_carbon_intensity =
                    self.network_carbon_intensity_between_regions(from_region_name, current_region_name);
            }
            total_transmission_carbon += data_transfer_gb * self.energy_factor * network_carbon_intensity;
        }

        // data_transfer_during_execution is transfer nobody attributed to an
        // edge: user code, runtime downloads, provider-internal movement.
        // Half is assumed to cross the internet and is billed at the USA
        // average; half is assumed to stay near the home region.
        let current_region_is_home_region = current_region_name == self.workflow_loader.home_region();
        let home_region_dtde = data_transfer_during_execution / 2.0;
        let internet_dtde = data_transfer_during_execution / 2.0;

        total_transmission_carbon += internet_dtde * self.energy_factor * AVERAGE_USA_CARBON_INTENSITY;

        if !self.carbon_free_dt_execution_home_region || !current_region_is_home_region {
            let mut network_carbon_intensity = AVERAGE_USA_CARBON_INTENSITY;
            if !current_region_name.is_empty() {
                network_carbon_intensity =
                    self.network_carbon_intensity_between_regions(current_region_name, current_region_name);
            }
            total_transmission_carbon += home_region_dtde * self.energy_factor * network_carbon_intensity;
        }

        total_transmission_carbon
    }

    /// Estimated intensity of the network route between two regions: the
    /// region's own grid intensity when they coincide, otherwise the average
    /// of the two endpoint grids (no order assumed).
    pub fn network_carbon_intensity_between_regions(&self, region_one: &str, region_two: &str) -> f64 {
        if region_one == region_two && !region_one.is_empty() {
            return self.carbon_loader.grid_carbon_intensity(region_one, self.hourly_carbon_setting());
        }

        let region_one_intensity = self.carbon_loader.grid_carbon_intensity(region_one, self.hourly_carbon_setting());
        let region_two_intensity = self.carbon_loader.grid_carbon_intensity(region_two, self.hourly_carbon_setting());
        (region_one_intensity + region_two_intensity) / 2.0
    }

    pub fn calculate_execution_carbon(
        &mut self,
        instance_name: &str,
        region_name: &str,
        execution_latency_s: f64,
        is_redirector: bool,
    ) -> Result<f64> {
        let [compute_factor_kwh, memory_factor_kwh, power_factor_gco2e_kwh] =
            self.execution_conversion_ratio(instance_name, region_name, is_redirector)?;

        let cloud_provider_usage_kwh = execution_latency_s * (compute_factor_kwh + memory_factor_kwh);
        Ok(cloud_provider_usage_kwh * power_factor_gco2e_kwh)
    }

    /// `[compute factor kWh/s, memory factor kWh/s, power factor gCO2e/kWh]`
    /// for the instance in the region, memoized per `(instance, region)`.
    pub fn execution_conversion_ratio(
        &mut self,
        instance_name: &str,
        region_name: &str,
        is_redirector: bool,
    ) -> Result<[f64; 3]> {
        let cache_key = (instance_name.to_string(), region_name.to_string());
        if let Some(conversion) = self.execution_conversion_ratio_cache.get(&cache_key) {
            return Ok(*conversion);
        }

        let average_mem_power = self.datacenter_loader.average_memory_power(region_name);
        let cfe = if self.consider_cfe { self.datacenter_loader.cfe(region_name) } else { 0.0 };
        let pue = self.datacenter_loader.pue(region_name);
        let grid_co2e = self.carbon_loader.grid_carbon_intensity(region_name, self.hourly_carbon_setting());

        let provider = region_name.split(':').next().unwrap_or_default();
        let vcpu = self.workflow_loader.vcpu(instance_name, provider)?;
        let memory_gb = self.workflow_loader.memory(instance_name, provider)? / 1024.0;

        let min_cpu_power = self.datacenter_loader.min_cpu_power(region_name);
        let max_cpu_power = self.datacenter_loader.max_cpu_power(region_name);

        let utilization = self.workflow_loader.average_cpu_utilization(instance_name, region_name, is_redirector);
        let average_cpu_power = min_cpu_power + utilization * (max_cpu_power - min_cpu_power);

        let compute_factor = average_cpu_power * vcpu / 3600.0;
        let memory_factor = average_mem_power * memory_gb / 3600.0;
        let power_factor = (1.0 - cfe) * pue * grid_co2e;

        let conversion = [compute_factor, memory_factor, power_factor];
        self.execution_conversion_ratio_cache.insert(cache_key, conversion);
        Ok(conversion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::Table;
    use serde_json::json;

    fn mock_calculator(carbon_free_intra: bool, carbon_free_dtde_home: bool) -> CarbonCalculator {
        let carbon_loader = Arc::new(CarbonLoader::new(Table::new(json!({
            "aws:us-west-2": {"averages": {"overall": {"carbon_intensity": 0.3}, "7": {"carbon_intensity": 0.6}}},
            "aws:us-east-1": {"averages": {"overall": {"carbon_intensity": 0.3}}}
        }))));
        let datacenter_loader = Arc::new(DataCenterLoader::new(Table::new(json!({
            "aws:us-west-2": {
                "average_memory_power": 0.001,
                "pue": 1.0,
                "cfe": 0.0,
                "min_cpu_power_kWh": 0.001,
                "max_cpu_power_kWh": 0.002
            }
        }))));
        let workflow_loader = Arc::new(WorkflowLoader::new(
            Table::new(json!({})),
            Table::new(json!({
                "test_instance": {"aws": {"config": {"memory": 1769.0}}}
            })),
            "aws:us-west-2".to_string(),
        ));
        CarbonCalculator::new(carbon_loader, datacenter_loader, workflow_loader, true, 0.001, carbon_free_intra, carbon_free_dtde_home)
    }

    #[test]
    fn test_intra_region_transmission_free_when_flagged() {
        let calculator = mock_calculator(true, false);
        let inputs = BTreeMap::from([("aws:us-west-2".to_string(), 10.0)]);
        let carbon = calculator.calculate_data_transfer_carbon("aws:us-west-2", &inputs, &BTreeMap::new(), 0.0);
        assert!(carbon.abs() < 1e-9);
    }

    #[test]
    fn test_intra_region_transmission_billed_at_grid_intensity() {
        let calculator = mock_calculator(false, false);
        let inputs = BTreeMap::from([("aws:us-west-2".to_string(), 10.0)]);
        let carbon = calculator.calculate_data_transfer_carbon("aws:us-west-2", &inputs, &BTreeMap::new(), 0.0);
        assert!((carbon - 10.0 * 0.001 * 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_inter_region_transmission() {
        let calculator = mock_calculator(true, false);
        let inputs = BTreeMap::from([("aws:us-east-1".to_string(), 10.0)]);
        let carbon = calculator.calculate_data_transfer_carbon("aws:us-west-2", &inputs, &BTreeMap::new(), 0.0);
        // Route intensity is the average of the two endpoint grids, 0.3 each
        assert!((carbon - 10.0 * 0.001 * 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_source_region_uses_usa_average() {
        let calculator = mock_calculator(true, false);
        let inputs = BTreeMap::from([("".to_string(), 1.0)]);
        let carbon = calculator.calculate_data_transfer_carbon("aws:us-west-2", &inputs, &BTreeMap::new(), 0.0);
        assert!((carbon - 1.0 * 0.001 * AVERAGE_USA_CARBON_INTENSITY).abs() < 1e-9);
    }

    #[test]
    fn test_dtde_split_halves() {
        let calculator = mock_calculator(true, false);
        let carbon = calculator.calculate_data_transfer_carbon("aws:us-west-2", &BTreeMap::new(), &BTreeMap::new(), 2.0);
        // Internet half at the USA average, home half at the current grid
        let expected = 1.0 * 0.001 * AVERAGE_USA_CARBON_INTENSITY + 1.0 * 0.001 * 0.3;
        assert!((carbon - expected).abs() < 1e-9);
    }

    #[test]
    fn test_dtde_home_half_suppressed_at_home() {
        let calculator = mock_calculator(true, true);
        let carbon = calculator.calculate_data_transfer_carbon("aws:us-west-2", &BTreeMap::new(), &BTreeMap::new(), 2.0);
        let expected = 1.0 * 0.001 * AVERAGE_USA_CARBON_INTENSITY;
        assert!((carbon - expected).abs() < 1e-9);

        // Away from home the suppression does not apply
        let carbon_away = calculator.calculate_data_transfer_carbon("aws:us-east-1", &BTreeMap::new(), &BTreeMap::new(), 2.0);
        let expected_away = 1.0 * 0.001 * AVERAGE_USA_CARBON_INTENSITY + 1.0 * 0.001 * 0.3;
        assert!((carbon_away - expected_away).abs() < 1e-9);
    }

    #[test]
    fn test_execution_carbon_from_conversion_triple() {
        let mut calculator = mock_calculator(false, false);
        calculator
            .execution_conversion_ratio_cache
            .insert(("test_instance".to_string(), "aws:us-west-2".to_string()), [1.0, 2.0, 3.0]);
        let carbon = calculator.calculate_execution_carbon("test_instance", "aws:us-west-2", 50.0, false).unwrap();
        assert!((carbon - 450.0).abs() < 1e-9);
    }

    #[test]
    fn test_execution_conversion_ratio_derivation() {
        let mut calculator = mock_calculator(false, false);
        let [compute, memory, power] =
            calculator.execution_conversion_ratio("test_instance", "aws:us-west-2", false).unwrap();
        // utilization defaults to 0.5: average cpu power 0.0015, 1 vCPU
        assert!((compute - 0.0015 / 3600.0).abs() < 1e-12);
        assert!((memory - 0.001 * (1769.0 / 1024.0) / 3600.0).abs() < 1e-12);
        assert!((power - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_alter_carbon_setting_switches_hourly_and_resets_cache() {
        let mut calculator = mock_calculator(false, false);
        calculator.execution_conversion_ratio("test_instance", "aws:us-west-2", false).unwrap();
        assert!(!calculator.execution_conversion_ratio_cache.is_empty());

        calculator.alter_carbon_setting(Some("7".to_string()));
        assert!(calculator.execution_conversion_ratio_cache.is_empty());
        assert_eq!(calculator.hourly_carbon_setting(), Some("7"));

        // Hourly intensity now feeds the power factor
        let [_, _, power] = calculator.execution_conversion_ratio("test_instance", "aws:us-west-2", false).unwrap();
        assert!((power - 0.6).abs() < 1e-12);

        // Calling twice with the same hour is idempotent
        calculator.alter_carbon_setting(Some("7".to_string()));
        let [_, _, power_again] = calculator.execution_conversion_ratio("test_instance", "aws:us-west-2", false).unwrap();
        assert!((power_again - 0.6).abs() < 1e-12);
    }
}
