use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::lookup::{float_key, Table};

pub const INVOCATION_PROBABILITY_DEFAULT: f64 = 0.0; // A missing edge is never invoked
pub const VCPU_DEFAULT: f64 = -1.0; // Denotes that the vCPU count is not available
pub const ARCHITECTURE_DEFAULT: &str = "x86_64";

pub const SYNC_SIZE_DEFAULT_GB: f64 = 1.0 / 1_048_576.0; // 1 KB in GB
pub const SNS_SIZE_DEFAULT_GB: f64 = 1.0 / 1_048_576.0; // 1 KB in GB

/// Keyed access to the collected workflow summary: per-instance runtime and
/// auxiliary-data samples, per-edge transfer sizes and latencies, sync and
/// non-execution bookkeeping, and the per-provider instance configuration.
///
/// Redirector samples live under `start_hop_summary.at_redirector` instead of
/// `instance_summary`; every execution lookup switches its key prefix on the
/// `is_redirector` flag.
#[derive(Debug, Clone)]
pub struct WorkflowLoader {
    workflow_data: Table,
    instance_regions_providers: Table,
    home_region: String,
}

impl WorkflowLoader {
    pub fn new(workflow_data: Table, instance_regions_providers: Table, home_region: String) -> Self {
        WorkflowLoader { workflow_data, instance_regions_providers, home_region }
    }

    pub fn home_region(&self) -> &str {
        &self.home_region
    }

    fn executions_prefix(is_redirector: bool) -> &'static [&'static str] {
        if is_redirector {
            &["start_hop_summary", "at_redirector"]
        } else {
            &["instance_summary"]
        }
    }

    pub fn workflow_placement_decision_size(&self) -> f64 {
        self.workflow_data.get_f64(0.0, &["start_hop_summary", "workflow_placement_decision_size_gb"])
    }

    pub fn start_hop_retrieve_wpd_probability(&self) -> f64 {
        self.workflow_data.get_f64(1.0, &["start_hop_summary", "wpd_at_function_probability"])
    }

    /// Sizes sent from the client into the start hop. At minimum the
    /// placement decision itself is always transferred.
    pub fn start_hop_size_distribution(&self) -> Vec<f64> {
        let distribution = self.workflow_data.get_f64_list(&["start_hop_summary", "from_client", "transfer_sizes_gb"]);
        if distribution.is_empty() {
            vec![self.workflow_placement_decision_size()]
        } else {
            distribution
        }
    }

    pub fn start_hop_best_fit_line(&self, to_region_name: &str) -> HashMap<String, f64> {
        self.workflow_data.get_f64_map(&[
            "start_hop_summary",
            "from_client",
            "received_region",
            "regions_to_regions",
            to_region_name,
            "best_fit_line",
        ])
    }

    pub fn start_hop_latency_distribution(&self, to_region_name: &str, data_transfer_size: f64) -> Vec<f64> {
        let size_key = float_key(data_transfer_size);
        let distribution = self.workflow_data.get_f64_list(&[
            "start_hop_summary",
            "from_client",
            "received_region",
            to_region_name,
            "transfer_size_gb_to_transfer_latencies_s",
            &size_key,
        ]);
        if !distribution.is_empty() {
            return distribution;
        }
        // Attempt to estimate the latency from the best fit line
        let rounded_size = round_to_kb(data_transfer_size, 10, true);
        let best_fit_line = self.start_hop_best_fit_line(to_region_name);
        estimate_from_best_fit_line(&best_fit_line, rounded_size).map(|latency| vec![latency]).unwrap_or_default()
    }

    /// Average CPU utilization of the instance, preferring the region-local
    /// measurement over the instance-wide one (0.5 when neither exists).
    pub fn average_cpu_utilization(&self, instance_name: &str, region_name: &str, is_redirector: bool) -> f64 {
        let prefix = Self::executions_prefix(is_redirector);
        let mut keys: Vec<&str> = prefix.to_vec();
        keys.extend([instance_name, "executions", "at_region", region_name, "cpu_utilization"]);
        let cpu_utilization = self.workflow_data.get_f64(-1.0, &keys);
        if cpu_utilization >= 0.0 {
            return cpu_utilization;
        }
        let mut keys: Vec<&str> = prefix.to_vec();
        keys.extend([instance_name, "cpu_utilization"]);
        self.workflow_data.get_f64(0.5, &keys)
    }

    pub fn runtime_distribution(&self, instance_name: &str, region_name: &str, is_redirector: bool) -> Vec<f64> {
        let mut keys: Vec<&str> = Self::executions_prefix(is_redirector).to_vec();
        keys.extend([instance_name, "executions", "at_region", region_name, "durations_s"]);
        self.workflow_data.get_f64_list(&keys)
    }

    /// Auxiliary samples recorded for executions whose runtime rounds (up,
    /// to 10 ms) to the same two-decimal bucket as `runtime`.
    pub fn auxiliary_data_distribution(
        &self,
        instance_name: &str,
        region_name: &str,
        runtime: f64,
        is_redirector: bool,
    ) -> Vec<Vec<f64>> {
        let runtime_key = runtime_bucket_key(runtime);
        let mut keys: Vec<&str> = Self::executions_prefix(is_redirector).to_vec();
        keys.extend([instance_name, "executions", "at_region", region_name, "auxiliary_data", &runtime_key]);
        self.workflow_data.get_f64_list_list(&keys)
    }

    pub fn auxiliary_index_translation(&self, instance_name: &str, is_redirector: bool) -> HashMap<String, usize> {
        let mut keys: Vec<&str> = Self::executions_prefix(is_redirector).to_vec();
        keys.extend([instance_name, "executions", "auxiliary_index_translation"]);
        self.workflow_data.get_index_map(&keys)
    }

    pub fn invocation_probability(&self, from_instance_name: &str, to_instance_name: &str) -> f64 {
        if from_instance_name == to_instance_name {
            return 1.0;
        }
        self.workflow_data.get_f64(
            INVOCATION_PROBABILITY_DEFAULT,
            &["instance_summary", from_instance_name, "to_instance", to_instance_name, "invocation_probability"],
        )
    }

    pub fn data_transfer_size_distribution(&self, from_instance_name: &str, to_instance_name: &str) -> Vec<f64> {
        self.workflow_data.get_f64_list(&[
            "instance_summary",
            from_instance_name,
            "to_instance",
            to_instance_name,
            "transfer_sizes_gb",
        ])
    }

    pub fn latency_distribution_best_fit_line(
        &self,
        from_instance_name: &str,
        to_instance_name: &str,
        from_region_name: &str,
        to_region_name: &str,
    ) -> HashMap<String, f64> {
        self.workflow_data.get_f64_map(&[
            "instance_summary",
            from_instance_name,
            "to_instance",
            to_instance_name,
            "regions_to_regions",
            from_region_name,
            to_region_name,
            "best_fit_line",
        ])
    }

    /// Latency samples for a transfer of `data_transfer_size` GB (rounded up
    /// to the nearest 10 KB bucket), falling back to the fitted line.
    pub fn latency_distribution(
        &self,
        from_instance_name: &str,
        to_instance_name: &str,
        from_region_name: &str,
        to_region_name: &str,
        data_transfer_size: f64,
    ) -> Vec<f64> {
        let rounded_size = round_to_kb(data_transfer_size, 10, true);
        let size_key = float_key(rounded_size);
        let distribution = self.workflow_data.get_f64_list(&[
            "instance_summary",
            from_instance_name,
            "to_instance",
            to_instance_name,
            "regions_to_regions",
            from_region_name,
            to_region_name,
            "transfer_size_gb_to_transfer_latencies_s",
            &size_key,
        ]);
        if !distribution.is_empty() {
            return distribution;
        }
        let best_fit_line =
            self.latency_distribution_best_fit_line(from_instance_name, to_instance_name, from_region_name, to_region_name);
        estimate_from_best_fit_line(&best_fit_line, rounded_size).map(|latency| vec![latency]).unwrap_or_default()
    }

    /// For an edge that was not taken: which sync nodes still receive a
    /// response on behalf of the uninvoked destination. Keys have the shape
    /// `"<sync predecessor>><sync node>"`, values are the response sizes.
    pub fn non_execution_information(&self, from_instance_name: &str, to_instance_name: &str) -> HashMap<String, f64> {
        let entries = self.workflow_data.get_map_keys(&[
            "instance_summary",
            from_instance_name,
            "to_instance",
            to_instance_name,
            "non_execution_info",
        ]);
        let mut result = HashMap::with_capacity(entries.len());
        for sync_to_from_instance in entries {
            let size = self.workflow_data.get_f64(
                0.0,
                &[
                    "instance_summary",
                    from_instance_name,
                    "to_instance",
                    to_instance_name,
                    "non_execution_info",
                    &sync_to_from_instance,
                    "sync_data_response_size_gb",
                ],
            );
            result.insert(sync_to_from_instance, size);
        }
        result
    }

    /// SNS payload of the simulated notification, rounded to the nearest
    /// non-zero KB (at least one byte is always transferred).
    pub fn non_execution_sns_transfer_size(
        &self,
        from_instance_name: &str,
        to_instance_name: &str,
        sync_to_from_instance: &str,
    ) -> f64 {
        round_to_kb(
            self.workflow_data.get_f64(
                0.0,
                &[
                    "instance_summary",
                    from_instance_name,
                    "to_instance",
                    to_instance_name,
                    "non_execution_info",
                    sync_to_from_instance,
                    "sns_transfer_size_gb",
                ],
            ),
            1,
            false,
        )
    }

    pub fn non_execution_transfer_latency_distribution(
        &self,
        from_instance_name: &str,
        to_instance_name: &str,
        sync_to_from_instance: &str,
        from_region_name: &str,
        to_region_name: &str,
    ) -> Vec<f64> {
        self.workflow_data.get_f64_list(&[
            "instance_summary",
            from_instance_name,
            "to_instance",
            to_instance_name,
            "non_execution_info",
            sync_to_from_instance,
            "regions_to_regions",
            from_region_name,
            to_region_name,
            "transfer_latencies_s",
        ])
    }

    pub fn sync_size(&self, from_instance_name: &str, to_instance_name: &str) -> f64 {
        self.workflow_data.get_f64(
            SYNC_SIZE_DEFAULT_GB,
            &["instance_summary", from_instance_name, "to_instance", to_instance_name, "sync_sizes_gb"],
        )
    }

    pub fn sns_only_size(&self, from_instance_name: &str, to_instance_name: &str) -> f64 {
        self.workflow_data.get_f64(
            SNS_SIZE_DEFAULT_GB,
            &["instance_summary", from_instance_name, "to_instance", to_instance_name, "sns_only_sizes_gb"],
        )
    }

    /// vCPU count of the instance. AWS functions without an explicit count
    /// derive it from memory (1769 MB per vCPU); elsewhere it is required.
    pub fn vcpu(&self, instance_name: &str, provider_name: &str) -> Result<f64> {
        let vcpu = self.instance_regions_providers.get_f64(VCPU_DEFAULT, &[instance_name, provider_name, "config", "vcpu"]);
        if vcpu >= 0.0 {
            return Ok(vcpu);
        }
        if provider_name == "aws" {
            Ok(self.memory(instance_name, provider_name)? / 1769.0)
        } else {
            Err(Error::MissingVcpuConfig { instance: instance_name.to_string(), provider: provider_name.to_string() })
        }
    }

    /// Configured memory in MB. Required for every instance.
    pub fn memory(&self, instance_name: &str, provider_name: &str) -> Result<f64> {
        let memory = self.instance_regions_providers.get_f64(-1.0, &[instance_name, provider_name, "config", "memory"]);
        if memory == -1.0 {
            return Err(Error::MissingMemoryConfig { instance: instance_name.to_string(), provider: provider_name.to_string() });
        }
        Ok(memory)
    }

    pub fn architecture(&self, instance_name: &str, provider_name: &str) -> String {
        self.instance_regions_providers.get_str(ARCHITECTURE_DEFAULT, &[instance_name, provider_name, "config", "architecture"])
    }
}

/// `latency = clamp(slope * size + intercept, min, max)` from a fitted line,
/// or `None` when no line was fitted for the route.
fn estimate_from_best_fit_line(best_fit_line: &HashMap<String, f64>, data_transfer_size: f64) -> Option<f64> {
    if best_fit_line.is_empty() {
        return None;
    }
    let slope = best_fit_line.get("slope_s").copied().unwrap_or(0.0);
    let intercept = best_fit_line.get("intercept_s").copied().unwrap_or(0.0);
    let min_latency = best_fit_line.get("min_latency_s").copied().unwrap_or(f64::NEG_INFINITY);
    let max_latency = best_fit_line.get("max_latency_s").copied().unwrap_or(f64::INFINITY);
    let estimated = slope * data_transfer_size + intercept;
    Some(estimated.max(min_latency).min(max_latency))
}

/// Rounds a size in GB to a multiple of `round_to` KB: up, or to the nearest
/// non-zero multiple.
pub fn round_to_kb(value_gb: f64, round_to: u32, round_up: bool) -> f64 {
    let mut rounded_kb = value_gb * 1_048_576.0 / f64::from(round_to);
    if round_up {
        rounded_kb = rounded_kb.ceil();
    } else {
        rounded_kb = (rounded_kb + 0.5).floor();
        if rounded_kb == 0.0 {
            rounded_kb = 1.0;
        }
    }
    rounded_kb * f64::from(round_to) / 1_048_576.0
}

/// Rounds a duration in seconds to a multiple of `round_to` ms: up, or to
/// the nearest non-zero multiple.
pub fn round_to_ms(value_s: f64, round_to: u32, round_up: bool) -> f64 {
    let mut rounded_ms = value_s * 1000.0 / f64::from(round_to);
    if round_up {
        rounded_ms = rounded_ms.ceil();
    } else {
        rounded_ms = (rounded_ms + 0.5).floor();
        if rounded_ms == 0.0 {
            rounded_ms = 1.0;
        }
    }
    rounded_ms * f64::from(round_to) / 1000.0
}

/// Bucket key for the auxiliary-data table: runtime rounded up to 10 ms,
/// formatted to two decimals with one trailing zero stripped ("5.00" -> "5.0").
fn runtime_bucket_key(runtime: f64) -> String {
    let rounded = round_to_ms(runtime, 10, true);
    let mut key = format!("{:.2}", rounded);
    if key.ends_with('0') {
        key.pop();
    }
    key
}
