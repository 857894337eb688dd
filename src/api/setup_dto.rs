use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// The full input bundle received with the `Setup` command.
///
/// The empirical tables (`datacenter_loader`, `performance_loader`,
/// `carbon_loader` and the workflow data) are deeply nested and
/// heterogeneous; they stay as raw JSON here and are wrapped in
/// `lookup::Table` by the domain loaders.
#[derive(Deserialize, Debug, Clone)]
pub struct SetupDto {
    pub region_viability_loader: Vec<String>,
    pub datacenter_loader: Value,
    pub performance_loader: Value,
    pub carbon_loader: Value,
    pub workflow_loader: WorkflowLoaderDto,

    pub consider_cfe: bool,
    pub energy_factor: f64,
    pub carbon_free_intra_region_transmission: bool,
    pub carbon_free_dt_during_execution_at_home_region: bool,

    pub instance_indexer: IndexerDto,
    pub region_indexer: IndexerDto,

    /// Instance index -> predecessor instance indices. JSON object keys are
    /// strings; they are parsed to integers when the domain model is built.
    pub prerequisites_dictionary: HashMap<String, Vec<i32>>,
    pub successor_dictionary: HashMap<String, Vec<i32>>,
    pub topological_order: Vec<i32>,

    pub tail_latency_threshold: f64,
    pub home_region_index: i32,
    pub record_transmission_execution_carbon: bool,

    /// Whether the start hop should sample the measured client-to-region
    /// latency. Absent in most payloads.
    #[serde(default)]
    pub consider_from_client_latency: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WorkflowLoaderDto {
    pub workflow_data: Value,
    pub instances_regions_and_providers: Value,
    pub home_region: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct IndexerDto {
    pub value_indices: HashMap<String, i32>,
    /// Keyed by the stringified index.
    pub indices_to_values: HashMap<String, String>,
}
