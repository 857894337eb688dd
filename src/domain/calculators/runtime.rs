use std::collections::HashMap;
use std::sync::Arc;

use rand::prelude::IndexedRandom;
use rand_chacha::ChaCha8Rng;
use statrs::statistics::Statistics;

use crate::domain::indexer::Indexer;
use crate::domain::loaders::performance::PerformanceLoader;
use crate::domain::loaders::workflow::WorkflowLoader;
use crate::error::{Error, Result};
use crate::lookup::float_key;

// Average latency between two messaging-bus hops at the home region, used
// when even the home region has no measured samples for an edge.
pub const HOME_REGION_TRANSMISSION_LATENCY_DEFAULT_S: f64 = 0.22;

/// Time to reach the end of a node's execution, plus the earlier points at
/// which it fires each successor invocation.
#[derive(Debug, Clone, Default)]
pub struct CumulativeRuntime {
    pub current: f64,
    pub successors: HashMap<i32, f64>,
}

impl CumulativeRuntime {
    /// When a node invokes the given successor. Without a recorded offset
    /// the node's own completion time is the worst-case answer.
    pub fn for_successor(&self, successor_instance_index: i32) -> f64 {
        self.successors.get(&successor_instance_index).copied().unwrap_or(self.current)
    }
}

/// One sampled node execution.
#[derive(Debug, Clone)]
pub struct NodeRuntimeSample {
    pub cumulative: CumulativeRuntime,
    pub execution_time: f64,
    pub data_transfer_during_execution_gb: f64,
}

/// Samples transmission sizes, transmission latencies and node runtimes from
/// the empirical tables, with cascading estimators for routes that were
/// never measured. Distributions are cached once resolved; the caches are
/// dropped when the hourly carbon setting changes.
#[derive(Debug, Clone)]
pub struct RuntimeCalculator {
    performance_loader: Arc<PerformanceLoader>,
    workflow_loader: Arc<WorkflowLoader>,
    transmission_latency_distribution_cache: HashMap<String, Vec<f64>>,
    transmission_size_distribution_cache: HashMap<String, Vec<f64>>,
}

impl RuntimeCalculator {
    pub fn new(performance_loader: Arc<PerformanceLoader>, workflow_loader: Arc<WorkflowLoader>) -> Self {
        RuntimeCalculator {
            performance_loader,
            workflow_loader,
            transmission_latency_distribution_cache: HashMap::new(),
            transmission_size_distribution_cache: HashMap::new(),
        }
    }

    pub fn reset_cache(&mut self) {
        self.transmission_latency_distribution_cache.clear();
        self.transmission_size_distribution_cache.clear();
    }

    /// Draws a transmission size for the edge, then a latency for that size.
    /// `from_instance`/`from_region` are `None` for the start hop.
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_transmission_size_latency(
        &mut self,
        from_instance_name: Option<&str>,
        from_region_name: Option<&str>,
        to_instance_name: &str,
        to_region_name: &str,
        is_sync_predecessor: bool,
        consider_from_client_latency: bool,
        rng: &mut ChaCha8Rng,
    ) -> Result<(f64, f64)> {
        let transmission_size = {
            let distribution = self.transmission_size_distribution(from_instance_name, to_instance_name)?;
            sample(distribution, rng)
        };

        let transmission_latency = {
            let distribution = self.transmission_latency_distribution(
                from_instance_name,
                from_region_name,
                to_instance_name,
                to_region_name,
                transmission_size,
                is_sync_predecessor,
                consider_from_client_latency,
            )?;
            sample(distribution, rng)
        };

        Ok((transmission_size, transmission_latency))
    }

    /// Size and latency of the notification a sync node receives on behalf
    /// of an ancestor that was never invoked.
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_simulated_transmission_size_latency(
        &mut self,
        from_instance_name: &str,
        uninvoked_instance_name: &str,
        simulated_sync_predecessor_name: &str,
        sync_node_name: &str,
        from_region_name: &str,
        to_region_name: &str,
        rng: &mut ChaCha8Rng,
    ) -> Result<(f64, f64)> {
        let sync_to_from_instance = format!("{}>{}", simulated_sync_predecessor_name, sync_node_name);

        let transmission_size =
            self.workflow_loader.non_execution_sns_transfer_size(from_instance_name, uninvoked_instance_name, &sync_to_from_instance);

        let mut latency_distribution = self.workflow_loader.non_execution_transfer_latency_distribution(
            from_instance_name,
            uninvoked_instance_name,
            &sync_to_from_instance,
            from_region_name,
            to_region_name,
        );
        if latency_distribution.is_empty() {
            // Fall back to what happens when the simulated predecessor calls
            // the sync node as a normal transmission. The destination is a
            // sync node by construction, and never the start hop.
            latency_distribution = self
                .transmission_latency_distribution(
                    Some(simulated_sync_predecessor_name),
                    Some(from_region_name),
                    sync_node_name,
                    to_region_name,
                    transmission_size,
                    true,
                    false,
                )?
                .to_vec();
        }
        if latency_distribution.is_empty() {
            return Err(Error::EmptyLatencyDistribution {
                from_instance: from_instance_name.to_string(),
                to_instance: sync_node_name.to_string(),
                from_region: from_region_name.to_string(),
                to_region: to_region_name.to_string(),
            });
        }

        let transmission_latency = sample(&latency_distribution, rng);
        Ok((transmission_size, transmission_latency))
    }

    fn transmission_size_distribution(&mut self, from_instance_name: Option<&str>, to_instance_name: &str) -> Result<&[f64]> {
        let cache_key = format!("{}-{}", from_instance_name.unwrap_or(""), to_instance_name);
        if !self.transmission_size_distribution_cache.contains_key(&cache_key) {
            let distribution = match from_instance_name {
                Some(from_instance_name) => {
                    self.workflow_loader.data_transfer_size_distribution(from_instance_name, to_instance_name)
                }
                None => self.workflow_loader.start_hop_size_distribution(),
            };
            if distribution.is_empty() {
                // An edge with no size samples was never invoked, and an
                // uninvoked edge should never have been asked about
                return Err(Error::EmptySizeDistribution {
                    from_instance: from_instance_name.unwrap_or("").to_string(),
                    to_instance: to_instance_name.to_string(),
                });
            }
            self.transmission_size_distribution_cache.insert(cache_key.clone(), distribution);
        }
        Ok(self.transmission_size_distribution_cache[&cache_key].as_slice())
    }

    #[allow(clippy::too_many_arguments)]
    fn transmission_latency_distribution(
        &mut self,
        from_instance_name: Option<&str>,
        from_region_name: Option<&str>,
        to_instance_name: &str,
        to_region_name: &str,
        data_transfer_size: f64,
        is_sync_predecessor: bool,
        consider_from_client_latency: bool,
    ) -> Result<&[f64]> {
        let cache_key = format!(
            "{}-{}-{}-{}-{}",
            from_instance_name.unwrap_or(""),
            to_instance_name,
            from_region_name.unwrap_or(""),
            to_region_name,
            float_key(data_transfer_size)
        );
        if !self.transmission_latency_distribution_cache.contains_key(&cache_key) {
            let distribution = match (from_instance_name, from_region_name) {
                (Some(from_instance_name), Some(from_region_name)) => {
                    let measured = self.workflow_loader.latency_distribution(
                        from_instance_name,
                        to_instance_name,
                        from_region_name,
                        to_region_name,
                        data_transfer_size,
                    );
                    if measured.is_empty() {
                        self.handle_missing_transmission_latency_distribution(
                            from_instance_name,
                            from_region_name,
                            to_instance_name,
                            to_region_name,
                            data_transfer_size,
                            is_sync_predecessor,
                        )
                    } else {
                        measured
                    }
                }
                _ => {
                    if consider_from_client_latency {
                        let measured = self.workflow_loader.start_hop_latency_distribution(to_region_name, data_transfer_size);
                        if measured.is_empty() {
                            self.handle_missing_start_hop_latency_distribution(to_region_name, data_transfer_size)?
                        } else {
                            measured
                        }
                    } else {
                        vec![0.0]
                    }
                }
            };
            if distribution.is_empty() {
                return Err(Error::EmptyLatencyDistribution {
                    from_instance: from_instance_name.unwrap_or("").to_string(),
                    to_instance: to_instance_name.to_string(),
                    from_region: from_region_name.unwrap_or("").to_string(),
                    to_region: to_region_name.to_string(),
                });
            }
            self.transmission_latency_distribution_cache.insert(cache_key.clone(), distribution);
        }
        Ok(self.transmission_latency_distribution_cache[&cache_key].as_slice())
    }

    /// No measured samples for the route: shift the home-region measurement
    /// by the CloudPing delta between the route and the home region. Sync
    /// uploads pay the delta five times (one sync-table update plus an
    /// object upload at four times the latency of a plain transmission).
    fn handle_missing_transmission_latency_distribution(
        &self,
        from_instance_name: &str,
        from_region_name: &str,
        to_instance_name: &str,
        to_region_name: &str,
        data_transfer_size: f64,
        is_sync_predecessor: bool,
    ) -> Vec<f64> {
        log::debug!(
            "No measured latency for {} -> {} from {} to {}, estimating from cloud ping",
            from_instance_name,
            to_instance_name,
            from_region_name,
            to_region_name
        );
        let cloud_ping_distribution = self.performance_loader.transmission_latency_distribution(from_region_name, to_region_name);
        let average_cloud_ping_latency = cloud_ping_distribution.iter().mean();

        let home_region_name = self.workflow_loader.home_region().to_string();
        let cloud_ping_home_distribution =
            self.performance_loader.transmission_latency_distribution(&home_region_name, &home_region_name);
        let average_cloud_ping_home_latency = cloud_ping_home_distribution.iter().mean();

        // The route can only be slower than staying at home
        let average_latency_difference = (average_cloud_ping_latency - average_cloud_ping_home_latency).max(0.0);

        let mut home_region_measured_distribution = self.workflow_loader.latency_distribution(
            from_instance_name,
            to_instance_name,
            &home_region_name,
            &home_region_name,
            data_transfer_size,
        );
        if home_region_measured_distribution.is_empty() {
            home_region_measured_distribution = vec![HOME_REGION_TRANSMISSION_LATENCY_DEFAULT_S];
        }

        let multiplier = if is_sync_predecessor { 5.0 } else { 1.0 };

        home_region_measured_distribution
            .into_iter()
            .map(|latency| latency + average_latency_difference * multiplier)
            .collect()
    }

    /// The start hop was never observed in this region: shift the home
    /// region's client latency samples by CloudPing home-to-region samples.
    fn handle_missing_start_hop_latency_distribution(&self, to_region_name: &str, data_transfer_size: f64) -> Result<Vec<f64>> {
        let home_region_name = self.workflow_loader.home_region().to_string();
        if home_region_name == to_region_name {
            return Err(Error::EmptyStartHopLatencyDistribution);
        }
        let home_distribution = self.workflow_loader.start_hop_latency_distribution(&home_region_name, data_transfer_size);
        let cloud_ping_distribution = self.performance_loader.transmission_latency_distribution(&home_region_name, to_region_name);
        Ok(home_distribution
            .iter()
            .enumerate()
            .map(|(i, home_latency)| home_latency + cloud_ping_distribution[i % cloud_ping_distribution.len()])
            .collect())
    }

    /// Samples the node's runtime in the given region (falling back to the
    /// home region's distribution, scaled by the relative region
    /// performance) together with its auxiliary per-successor invoke
    /// offsets and untracked data transfer.
    pub fn calculate_node_runtime_data_transfer(
        &mut self,
        instance_name: &str,
        region_name: &str,
        previous_cumulative_runtime: f64,
        instance_indexer: &Indexer,
        is_redirector: bool,
        rng: &mut ChaCha8Rng,
    ) -> Result<NodeRuntimeSample> {
        let mut runtime_distribution = self.workflow_loader.runtime_distribution(instance_name, region_name, is_redirector);
        let mut original_runtime_region_name = region_name.to_string();
        let desired_runtime_region_name = region_name;
        if runtime_distribution.is_empty() {
            // No samples for this region yet; the home region always has
            // some, because the workflow ran there at least once
            let home_region_name = self.workflow_loader.home_region().to_string();
            if home_region_name == region_name {
                return Err(Error::MissingRuntimeData { instance: instance_name.to_string(), region: region_name.to_string() });
            }
            runtime_distribution = self.workflow_loader.runtime_distribution(instance_name, &home_region_name, is_redirector);
            if runtime_distribution.is_empty() {
                return Err(Error::MissingRuntimeData { instance: instance_name.to_string(), region: home_region_name });
            }
            original_runtime_region_name = home_region_name;
        }
        let runtime = sample(&runtime_distribution, rng);

        self.retrieve_runtime_data_transfer(
            instance_name,
            &original_runtime_region_name,
            desired_runtime_region_name,
            runtime,
            previous_cumulative_runtime,
            instance_indexer,
            is_redirector,
            rng,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn retrieve_runtime_data_transfer(
        &mut self,
        instance_name: &str,
        original_runtime_region_name: &str,
        desired_runtime_region_name: &str,
        runtime: f64,
        previous_cumulative_runtime: f64,
        instance_indexer: &Indexer,
        is_redirector: bool,
        rng: &mut ChaCha8Rng,
    ) -> Result<NodeRuntimeSample> {
        let auxiliary_index_translation = self.workflow_loader.auxiliary_index_translation(instance_name, is_redirector);

        let auxiliary_data_distribution =
            self.workflow_loader.auxiliary_data_distribution(instance_name, original_runtime_region_name, runtime, is_redirector);
        if auxiliary_data_distribution.is_empty() {
            return Err(Error::MissingAuxiliaryData {
                instance: instance_name.to_string(),
                region: original_runtime_region_name.to_string(),
                runtime_key: format!("{:.2}", runtime),
            });
        }
        let auxiliary_data =
            auxiliary_data_distribution.choose(rng).cloned().unwrap_or_default();

        // Runtimes sampled from another region are scaled by how the two
        // regions perform relative to each other
        let mut relative_region_performance = 1.0;
        if original_runtime_region_name != desired_runtime_region_name {
            let original_region_performance = self.performance_loader.relative_performance(original_runtime_region_name);
            let desired_region_performance = self.performance_loader.relative_performance(desired_runtime_region_name);
            relative_region_performance = desired_region_performance / original_region_performance;
        }

        let mut successors_runtime_data = HashMap::new();
        let mut data_transfer_during_execution_gb = 0.0;
        for (key, index) in &auxiliary_index_translation {
            let value = auxiliary_data.get(*index).copied().ok_or_else(|| Error::MissingAuxiliaryData {
                instance: instance_name.to_string(),
                region: original_runtime_region_name.to_string(),
                runtime_key: format!("{:.2}", runtime),
            })?;
            if key == "data_transfer_during_execution_gb" {
                data_transfer_during_execution_gb = value;
            } else {
                let successor_index =
                    instance_indexer.value_to_index(key).ok_or_else(|| Error::UnknownInstanceName(key.clone()))?;
                successors_runtime_data
                    .insert(successor_index, previous_cumulative_runtime + value * relative_region_performance);
            }
        }

        let current_node_execution_time = runtime * relative_region_performance;
        Ok(NodeRuntimeSample {
            cumulative: CumulativeRuntime {
                current: previous_cumulative_runtime + current_node_execution_time,
                successors: successors_runtime_data,
            },
            execution_time: current_node_execution_time,
            data_transfer_during_execution_gb,
        })
    }
}

fn sample(distribution: &[f64], rng: &mut ChaCha8Rng) -> f64 {
    distribution.choose(rng).copied().unwrap_or(0.0)
}
