use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rand_chacha::ChaCha8Rng;

use crate::api::setup_dto::SetupDto;
use crate::domain::calculators::carbon::CarbonCalculator;
use crate::domain::calculators::cost::CostCalculator;
use crate::domain::calculators::runtime::{NodeRuntimeSample, RuntimeCalculator};
use crate::domain::calculators::system_region_name;
use crate::domain::indexer::Indexer;
use crate::domain::loaders::carbon::CarbonLoader;
use crate::domain::loaders::datacenter::DataCenterLoader;
use crate::domain::loaders::performance::PerformanceLoader;
use crate::domain::loaders::region_viability::RegionViabilityLoader;
use crate::domain::loaders::workflow::WorkflowLoader;
use crate::error::{Error, Result};
use crate::lookup::Table;

/// Region index of the virtual client, whose origin is unknown.
pub const VIRTUAL_CLIENT_REGION: i32 = -1;
/// Region index of the fixed system region holding the placement table.
pub const SYSTEM_REGION: i32 = -2;

/// What one edge traversal costs in time and payload.
#[derive(Debug, Clone)]
pub struct TransmissionInfo {
    pub starting_runtime: f64,
    pub cumulative_runtime: f64,
    pub sns_data_transfer_size: f64,
    pub sync_info: Option<SyncTransmissionInfo>,
}

/// Extra bookkeeping when the destination is a sync node.
#[derive(Debug, Clone)]
pub struct SyncTransmissionInfo {
    pub dynamodb_upload_size: f64,
    pub sync_size: f64,
    pub consumed_dynamodb_write_capacity_units: f64,
    pub sync_upload_auxiliary_info: SyncUploadEntry,
}

/// One sync-table upload: when the uploader reached its invoke call and how
/// much it uploaded.
#[derive(Debug, Clone, Copy)]
pub struct SyncUploadEntry {
    pub start_time: f64,
    pub upload_size_gb: f64,
}

#[derive(Debug, Clone)]
pub struct SimulatedTransmissionInfo {
    pub starting_runtime: f64,
    pub cumulative_runtime: f64,
    pub sns_data_transfer_size: f64,
}

/// Sync bookkeeping still owed when an edge was not taken.
#[derive(Debug, Clone)]
pub struct NonExecutionEntry {
    pub predecessor_instance_id: i32,
    pub sync_node_instance_id: i32,
    pub sync_size: f64,
    pub consumed_dynamodb_write_capacity_units: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CapacityUnits {
    pub read_capacity_units: f64,
    pub write_capacity_units: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct StartHopInfo {
    pub read_capacity_units: f64,
    pub workflow_placement_decision_size: f64,
}

/// Cost and carbon of one node, already split into the two carbon shares.
#[derive(Debug, Clone, Copy)]
pub struct InstanceCostCarbon {
    pub cost: f64,
    pub execution_carbon: f64,
    pub transmission_carbon: f64,
}

/// Integer-indexed façade over the loaders and calculators: translates
/// instance/region indices to names, invokes the calculators and bundles
/// their results for the per-trial workflow instance. Owns every cache that
/// must be dropped when the hourly carbon setting changes.
#[derive(Debug, Clone)]
pub struct InputManager {
    region_viability_loader: RegionViabilityLoader,
    workflow_loader: Arc<WorkflowLoader>,
    runtime_calculator: RuntimeCalculator,
    carbon_calculator: CarbonCalculator,
    cost_calculator: CostCalculator,
    instance_indexer: Indexer,
    region_indexer: Indexer,
    invocation_probability_cache: HashMap<(i32, i32), f64>,
}

impl InputManager {
    pub fn from_setup(dto: &SetupDto) -> Self {
        let region_viability_loader = RegionViabilityLoader::new(dto.region_viability_loader.clone());
        let datacenter_loader = Arc::new(DataCenterLoader::new(Table::new(dto.datacenter_loader.clone())));
        let performance_loader = Arc::new(PerformanceLoader::new(Table::new(dto.performance_loader.clone())));
        let carbon_loader = Arc::new(CarbonLoader::new(Table::new(dto.carbon_loader.clone())));
        let workflow_loader = Arc::new(WorkflowLoader::new(
            Table::new(dto.workflow_loader.workflow_data.clone()),
            Table::new(dto.workflow_loader.instances_regions_and_providers.clone()),
            dto.workflow_loader.home_region.clone(),
        ));

        let runtime_calculator = RuntimeCalculator::new(performance_loader.clone(), workflow_loader.clone());
        let carbon_calculator = CarbonCalculator::new(
            carbon_loader,
            datacenter_loader.clone(),
            workflow_loader.clone(),
            dto.consider_cfe,
            dto.energy_factor,
            dto.carbon_free_intra_region_transmission,
            dto.carbon_free_dt_during_execution_at_home_region,
        );
        let cost_calculator = CostCalculator::new(datacenter_loader, workflow_loader.clone());

        InputManager {
            region_viability_loader,
            workflow_loader,
            runtime_calculator,
            carbon_calculator,
            cost_calculator,
            instance_indexer: Indexer::from_dto(&dto.instance_indexer),
            region_indexer: Indexer::from_dto(&dto.region_indexer),
            invocation_probability_cache: HashMap::new(),
        }
    }

    /// Switches the grid intensities to the given hour and drops every cache
    /// derived from them.
    pub fn alter_carbon_setting(&mut self, setting: Option<String>) {
        self.carbon_calculator.alter_carbon_setting(setting);
        self.runtime_calculator.reset_cache();
        self.invocation_probability_cache.clear();
    }

    pub fn all_regions(&self) -> &[String] {
        self.region_viability_loader.available_regions()
    }

    pub fn home_region_index(&self) -> Result<i32> {
        let home_region = self.workflow_loader.home_region();
        self.region_indexer.value_to_index(home_region).ok_or_else(|| Error::UnknownRegionName(home_region.to_string()))
    }

    pub fn start_hop_retrieve_wpd_probability(&self) -> f64 {
        self.workflow_loader.start_hop_retrieve_wpd_probability()
    }

    pub fn invocation_probability(&mut self, from_instance_index: i32, to_instance_index: i32) -> Result<f64> {
        if let Some(probability) = self.invocation_probability_cache.get(&(from_instance_index, to_instance_index)) {
            return Ok(*probability);
        }
        let from_instance_name = self.instance_name(from_instance_index)?;
        let to_instance_name = self.instance_name(to_instance_index)?;
        let probability = self.workflow_loader.invocation_probability(&from_instance_name, &to_instance_name);
        self.invocation_probability_cache.insert((from_instance_index, to_instance_index), probability);
        Ok(probability)
    }

    /// Time and payload of one real edge traversal. For start hops
    /// `from_instance_index` and `from_region_index` are -1. A destination
    /// sync node additionally yields the sync upload bookkeeping.
    #[allow(clippy::too_many_arguments)]
    pub fn transmission_info(
        &mut self,
        from_instance_index: i32,
        from_region_index: i32,
        to_instance_index: i32,
        to_region_index: i32,
        cumulative_runtime: f64,
        to_instance_is_sync_node: bool,
        consider_from_client_latency: bool,
        rng: &mut ChaCha8Rng,
    ) -> Result<TransmissionInfo> {
        let from_instance_name = if from_instance_index != -1 { Some(self.instance_name(from_instance_index)?) } else { None };
        let from_region_name = if from_region_index != -1 { Some(self.region_name(from_region_index)?) } else { None };
        let to_instance_name = self.instance_name(to_instance_index)?;
        let to_region_name = self.region_name(to_region_index)?;

        let (transmission_size, transmission_latency) = self.runtime_calculator.calculate_transmission_size_latency(
            from_instance_name.as_deref(),
            from_region_name.as_deref(),
            &to_instance_name,
            &to_region_name,
            to_instance_is_sync_node,
            consider_from_client_latency,
            rng,
        )?;

        let mut sns_transmission_size = transmission_size;
        let mut sync_info = None;
        if to_instance_is_sync_node {
            // The sync upload sizes can be resolved in the same pass
            let from_instance_name = from_instance_name.ok_or(Error::StartHopIntoSyncNode)?;
            let (sns_only_size, sync_size, write_capacity_units) =
                self.upload_sync_size_and_wcu(&from_instance_name, &to_instance_name);
            sns_transmission_size = sns_only_size;
            sync_info = Some(SyncTransmissionInfo {
                dynamodb_upload_size: transmission_size,
                sync_size,
                consumed_dynamodb_write_capacity_units: write_capacity_units,
                sync_upload_auxiliary_info: SyncUploadEntry { start_time: cumulative_runtime, upload_size_gb: transmission_size },
            });
        }

        Ok(TransmissionInfo {
            starting_runtime: cumulative_runtime,
            cumulative_runtime: cumulative_runtime + transmission_latency,
            sns_data_transfer_size: sns_transmission_size,
            sync_info,
        })
    }

    /// `(sns_only_size, sync_size, write_capacity_units)` for an upload to a
    /// sync node. The sync wrapper performs two UpdateItem operations per
    /// upload, hence the doubled capacity.
    fn upload_sync_size_and_wcu(&self, from_instance_name: &str, to_instance_name: &str) -> (f64, f64, f64) {
        let sns_only_size = self.workflow_loader.sns_only_size(from_instance_name, to_instance_name);
        let sync_size = self.workflow_loader.sync_size(from_instance_name, to_instance_name);
        let write_capacity_units = calculate_write_capacity_units(sync_size) * 2.0;
        (sns_only_size, sync_size, write_capacity_units)
    }

    /// Time and payload of a simulated notification that stands in for an
    /// ancestor that was never invoked.
    #[allow(clippy::too_many_arguments)]
    pub fn simulated_transmission_info(
        &mut self,
        from_instance_index: i32,
        uninvoked_instance_index: i32,
        simulated_sync_predecessor_index: i32,
        sync_node_index: i32,
        from_region_index: i32,
        to_region_index: i32,
        cumulative_runtime: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<SimulatedTransmissionInfo> {
        let from_instance_name = self.instance_name(from_instance_index)?;
        let uninvoked_instance_name = self.instance_name(uninvoked_instance_index)?;
        let simulated_sync_predecessor_name = self.instance_name(simulated_sync_predecessor_index)?;
        let sync_node_name = self.instance_name(sync_node_index)?;
        let from_region_name = self.region_name(from_region_index)?;
        let to_region_name = self.region_name(to_region_index)?;

        let (sns_transmission_size, transmission_latency) = self.runtime_calculator.calculate_simulated_transmission_size_latency(
            &from_instance_name,
            &uninvoked_instance_name,
            &simulated_sync_predecessor_name,
            &sync_node_name,
            &from_region_name,
            &to_region_name,
            rng,
        )?;

        Ok(SimulatedTransmissionInfo {
            starting_runtime: cumulative_runtime,
            cumulative_runtime: cumulative_runtime + transmission_latency,
            sns_data_transfer_size: sns_transmission_size,
        })
    }

    /// Which sync nodes still get written to when the edge from
    /// `from_instance_index` to `to_instance_index` is not taken.
    pub fn non_execution_info(&self, from_instance_index: i32, to_instance_index: i32) -> Result<Vec<NonExecutionEntry>> {
        let from_instance_name = self.instance_name(from_instance_index)?;
        let to_instance_name = self.instance_name(to_instance_index)?;

        let non_execution_information = self.workflow_loader.non_execution_information(&from_instance_name, &to_instance_name);
        // Deterministic processing order for reproducible trials
        let mut sync_to_from_instances: Vec<_> = non_execution_information.into_iter().collect();
        sync_to_from_instances.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = Vec::with_capacity(sync_to_from_instances.len());
        for (sync_to_from_instance, sync_size) in sync_to_from_instances {
            let (sync_predecessor_instance, sync_node_instance) = sync_to_from_instance
                .split_once('>')
                .ok_or_else(|| Error::UnknownInstanceName(sync_to_from_instance.clone()))?;
            entries.push(NonExecutionEntry {
                predecessor_instance_id: self
                    .instance_indexer
                    .value_to_index(sync_predecessor_instance)
                    .ok_or_else(|| Error::UnknownInstanceName(sync_predecessor_instance.to_string()))?,
                sync_node_instance_id: self
                    .instance_indexer
                    .value_to_index(sync_node_instance)
                    .ok_or_else(|| Error::UnknownInstanceName(sync_node_instance.to_string()))?,
                sync_size,
                consumed_dynamodb_write_capacity_units: 2.0 * calculate_write_capacity_units(sync_size),
            });
        }
        Ok(entries)
    }

    pub fn node_runtime_data_transfer(
        &mut self,
        instance_index: i32,
        region_index: i32,
        previous_cumulative_runtime: f64,
        is_redirector: bool,
        rng: &mut ChaCha8Rng,
    ) -> Result<NodeRuntimeSample> {
        let instance_name = self.instance_name(instance_index)?;
        let region_name = self.region_name(region_index)?;
        self.runtime_calculator.calculate_node_runtime_data_transfer(
            &instance_name,
            &region_name,
            previous_cumulative_runtime,
            &self.instance_indexer,
            is_redirector,
            rng,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn calculate_cost_carbon_of_instance(
        &mut self,
        execution_time: f64,
        instance_index: i32,
        region_index: i32,
        data_input_sizes: &HashMap<i32, f64>,
        data_output_sizes: &HashMap<i32, f64>,
        sns_data_call_and_output_sizes: &HashMap<i32, Vec<f64>>,
        data_transfer_during_execution: f64,
        dynamodb_read_capacity: f64,
        dynamodb_write_capacity: f64,
        is_invoked: bool,
        is_redirector: bool,
    ) -> Result<InstanceCostCarbon> {
        let instance_name = self.instance_name(instance_index)?;
        let region_name = self.region_name(region_index)?;

        let data_input_sizes = self.region_name_map(data_input_sizes);
        let data_output_sizes = self.region_name_map(data_output_sizes);
        let sns_data_call_and_output_sizes = self.region_name_map(sns_data_call_and_output_sizes);

        let (execution_carbon, transmission_carbon) = self.carbon_calculator.calculate_instance_carbon(
            execution_time,
            &instance_name,
            &region_name,
            &data_input_sizes,
            &data_output_sizes,
            data_transfer_during_execution,
            is_invoked,
            is_redirector,
        )?;
        let cost = self.cost_calculator.calculate_instance_cost(
            execution_time,
            &instance_name,
            &region_name,
            &data_output_sizes,
            &sns_data_call_and_output_sizes,
            dynamodb_read_capacity,
            dynamodb_write_capacity,
            is_invoked,
        )?;

        Ok(InstanceCostCarbon { cost, execution_carbon, transmission_carbon })
    }

    pub fn calculate_cost_carbon_virtual_start_instance(
        &mut self,
        data_input_sizes: &HashMap<i32, f64>,
        data_output_sizes: &HashMap<i32, f64>,
        sns_data_call_and_output_sizes: &HashMap<i32, Vec<f64>>,
        dynamodb_read_capacity: f64,
        dynamodb_write_capacity: f64,
    ) -> Result<InstanceCostCarbon> {
        let data_input_sizes = self.region_name_map(data_input_sizes);
        let data_output_sizes = self.region_name_map(data_output_sizes);
        let sns_data_call_and_output_sizes = self.region_name_map(sns_data_call_and_output_sizes);

        let cost = self.cost_calculator.calculate_virtual_start_instance_cost(
            &sns_data_call_and_output_sizes,
            dynamodb_read_capacity,
            dynamodb_write_capacity,
        )?;
        let transmission_carbon =
            self.carbon_calculator.calculate_virtual_start_instance_carbon(&data_input_sizes, &data_output_sizes);

        Ok(InstanceCostCarbon { cost, execution_carbon: 0.0, transmission_carbon })
    }

    /// Sorts the sync-table uploads by arrival time and accumulates their
    /// sizes: every upload rewrites the whole record, so each one is billed
    /// for the cumulative size so far, and the final read returns it all.
    pub fn calculate_dynamodb_capacity_unit_of_sync_edges(&self, entries: &mut Vec<SyncUploadEntry>) -> CapacityUnits {
        let mut write_capacity_units = 0.0;
        let mut cumulative_data_size = 0.0;

        entries.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        for entry in entries.iter() {
            cumulative_data_size += entry.upload_size_gb;
            write_capacity_units += calculate_write_capacity_units(cumulative_data_size);
        }

        CapacityUnits { read_capacity_units: calculate_read_capacity_units(cumulative_data_size), write_capacity_units }
    }

    /// The placement-decision download billed at the start hop.
    pub fn start_hop_info(&self) -> StartHopInfo {
        let workflow_placement_decision_size = self.workflow_loader.workflow_placement_decision_size();
        StartHopInfo {
            read_capacity_units: calculate_read_capacity_units(workflow_placement_decision_size),
            workflow_placement_decision_size,
        }
    }

    fn instance_name(&self, instance_index: i32) -> Result<String> {
        self.instance_indexer
            .index_to_value(instance_index)
            .map(str::to_string)
            .ok_or(Error::UnknownInstanceIndex(instance_index))
    }

    fn region_name(&self, region_index: i32) -> Result<String> {
        self.region_indexer.index_to_value(region_index).map(str::to_string).ok_or(Error::UnknownRegionIndex(region_index))
    }

    /// Rekeys a region-indexed map by region name. The virtual-client
    /// sentinel becomes the empty name; the system sentinel becomes the
    /// fixed system region.
    fn region_name_map<V: Clone>(&self, region_index_map: &HashMap<i32, V>) -> BTreeMap<String, V> {
        let mut result = BTreeMap::new();
        for (region_index, value) in region_index_map {
            let region_name = match *region_index {
                VIRTUAL_CLIENT_REGION => String::new(),
                SYSTEM_REGION => system_region_name(),
                index => self.region_indexer.index_to_value(index).unwrap_or_default().to_string(),
            };
            result.insert(region_name, value.clone());
        }
        result
    }
}

/// One write capacity unit is consumed per started KB written.
pub fn calculate_write_capacity_units(data_size_gb: f64) -> f64 {
    (data_size_gb * 1_048_576.0).ceil()
}

/// One read capacity unit covers up to 4 KB read (strongly consistent).
pub fn calculate_read_capacity_units(data_size_gb: f64) -> f64 {
    (data_size_gb * 1_048_576.0 / 4.0).ceil()
}
