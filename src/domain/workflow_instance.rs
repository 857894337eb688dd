pub mod edge;
pub mod node;

use std::collections::HashMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::domain::input_manager::{InputManager, SyncUploadEntry, SYSTEM_REGION};
use crate::domain::workflow_instance::edge::{EdgeKind, InstanceEdge};
use crate::domain::workflow_instance::node::InstanceNode;
use crate::error::{Error, Result};

/// The three metrics of one trial, with carbon split into its two shares.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowMetrics {
    pub cost: f64,
    pub runtime: f64,
    pub carbon: f64,
    pub execution_carbon: f64,
    pub transmission_carbon: f64,
}

/// One recorded predecessor arrival: when the predecessor fired its call and
/// what the resulting SNS delivery looks like.
#[derive(Debug, Clone, Copy)]
struct SnsArrival {
    start_time: f64,
    from_instance_id: i32,
    to_instance_id: i32,
    cumulative_runtime: f64,
    sns_data_transfer_size: f64,
}

/// One trial's materialized workflow DAG.
///
/// Nodes and edges are value types in hash maps keyed by nominal instance
/// id; edges are stored destination-first so predecessor lookups are direct.
/// Building proceeds in topological order: the start hop is seeded with the
/// virtual client (and redirector when one exists), then every instance is
/// added with its incoming edges resolved, and finally the accounting sweep
/// totals cost and carbon over all nodes and takes the critical-path
/// runtime.
#[derive(Debug)]
pub struct WorkflowInstance {
    consider_from_client_latency: bool,
    start_hop_instance_id: i32,
    home_region_index: i32,
    has_retrieved_wpd_function: bool,
    redirector_exists: bool,
    nodes: HashMap<i32, InstanceNode>,
    edges: HashMap<i32, HashMap<i32, InstanceEdge>>,
    simulated_edges: HashMap<i32, HashMap<i32, InstanceEdge>>,
}

impl WorkflowInstance {
    pub fn new(
        input_manager: &mut InputManager,
        instance_deployment_regions: &[i32],
        start_hop_instance_index: i32,
        consider_from_client_latency: bool,
        rng: &mut ChaCha8Rng,
    ) -> Result<Self> {
        let has_retrieved_wpd_function = rng.random::<f64>() < input_manager.start_hop_retrieve_wpd_probability();
        let home_region_index = input_manager.home_region_index()?;
        let start_hop_region = instance_deployment_regions
            .get(start_hop_instance_index as usize)
            .copied()
            .ok_or(Error::UnknownInstanceIndex(start_hop_instance_index))?;

        let mut workflow_instance = WorkflowInstance {
            consider_from_client_latency,
            start_hop_instance_id: start_hop_instance_index,
            home_region_index,
            has_retrieved_wpd_function,
            redirector_exists: has_retrieved_wpd_function && start_hop_region != home_region_index,
            nodes: HashMap::new(),
            edges: HashMap::new(),
            simulated_edges: HashMap::new(),
        };
        workflow_instance.configure_node_regions(instance_deployment_regions);
        Ok(workflow_instance)
    }

    fn configure_node_regions(&mut self, instance_deployment_regions: &[i32]) {
        if self.redirector_exists {
            // The virtual client moves to -2; -1 becomes the redirector,
            // which runs the start hop's code in the home region
            self.node_mut(-2).region_id = -1;
            let home_region_index = self.home_region_index;
            let start_hop_instance_id = self.start_hop_instance_id;
            let redirector_node = self.node_mut(-1);
            redirector_node.region_id = home_region_index;
            redirector_node.actual_instance_id = start_hop_instance_id;
        } else {
            self.node_mut(-1).region_id = -1;
        }
        for (instance_index, region_index) in instance_deployment_regions.iter().enumerate() {
            self.node_mut(instance_index as i32).region_id = *region_index;
        }
    }

    /// Seeds the chain client -> (redirector ->) start hop and charges the
    /// workflow-placement-decision download to whichever node retrieves it.
    pub fn add_start_hop(
        &mut self,
        input_manager: &mut InputManager,
        starting_instance_index: i32,
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        let (virtual_client_id, wpd_retrieval_id, redirector_id) = if !self.has_retrieved_wpd_function {
            // The placement decision is fetched by the client itself, which
            // then always reaches the desired region directly
            (-1, -1, None)
        } else if self.redirector_exists {
            (-2, -1, Some(-1))
        } else {
            // Retrieved at the function, which already runs where the
            // placement wants it
            (-1, starting_instance_index, None)
        };

        self.node_mut(virtual_client_id).invoked = true;
        self.node_mut(wpd_retrieval_id).invoked = true;
        self.node_mut(starting_instance_index).invoked = true;

        // The client's own call is unconditional
        let first_node_id = redirector_id.unwrap_or(starting_instance_index);
        self.insert_real_edge(virtual_client_id, first_node_id, true);

        // The placement decision is downloaded from the system region into
        // the retrieving node; the upload half is not part of the workflow
        let start_hop_info = input_manager.start_hop_info();
        let wpd_retrieval_node = self.node_mut(wpd_retrieval_id);
        wpd_retrieval_node.tracked_dynamodb_read_capacity += start_hop_info.read_capacity_units;
        track_size(
            &mut wpd_retrieval_node.tracked_data_input_sizes,
            SYSTEM_REGION,
            start_hop_info.workflow_placement_decision_size,
        );

        if let Some(redirector_id) = redirector_id {
            self.add_edge(redirector_id, starting_instance_index, true)?;
            self.add_node(input_manager, redirector_id, rng)?;
        }
        Ok(())
    }

    /// Records the edge; it ends up conditionally invoked only when both the
    /// trial draw and its source node say so.
    pub fn add_edge(&mut self, from_instance_index: i32, to_instance_index: i32, invoked: bool) -> Result<()> {
        let from_node_invoked = self.node(from_instance_index)?.invoked;
        self.insert_real_edge(from_instance_index, to_instance_index, invoked && from_node_invoked);
        Ok(())
    }

    /// Materializes the node: resolves all incoming edges, aggregates sync
    /// capacity, picks the governing SNS arrival and samples the node's own
    /// execution. Returns whether the node was invoked this trial.
    pub fn add_node(&mut self, input_manager: &mut InputManager, instance_index: i32, rng: &mut ChaCha8Rng) -> Result<bool> {
        self.node_mut(instance_index);

        let real_predecessor_edges = predecessor_edges(&self.edges, instance_index);
        let successor_is_sync_node = real_predecessor_edges.len() > 1;

        let mut sync_edge_upload_data: Vec<SyncUploadEntry> = Vec::new();
        let mut sns_arrivals: Vec<SnsArrival> = Vec::new();
        let mut node_invoked = false;
        for current_edge in &real_predecessor_edges {
            let edge_invoked = self.handle_real_edge(
                input_manager,
                current_edge,
                successor_is_sync_node,
                &mut sync_edge_upload_data,
                &mut sns_arrivals,
                rng,
            )?;
            node_invoked = node_invoked || edge_invoked;
        }

        // Upload and read of the sync table, billed against the sync node
        if !sync_edge_upload_data.is_empty() {
            let capacity_units = input_manager.calculate_dynamodb_capacity_unit_of_sync_edges(&mut sync_edge_upload_data);
            let current_node = self.node_mut(instance_index);
            current_node.tracked_dynamodb_write_capacity += capacity_units.write_capacity_units;
            current_node.tracked_dynamodb_read_capacity += capacity_units.read_capacity_units;
        }

        if node_invoked {
            // Simulated predecessor arrivals only matter for an invoked
            // node, where they compete for the governing SNS call
            let simulated_predecessor_edges = predecessor_edges(&self.simulated_edges, instance_index);
            for simulated_edge in &simulated_predecessor_edges {
                self.handle_simulated_edge(input_manager, simulated_edge, &mut sns_arrivals, rng)?;
            }

            let cumulative_runtime = self.handle_sns_invocation(&mut sns_arrivals)?;
            let (actual_instance_id, region_id, is_redirector) = {
                let current_node = self.node(instance_index)?;
                (current_node.actual_instance_id, current_node.region_id, current_node.is_redirector)
            };
            let runtime_sample =
                input_manager.node_runtime_data_transfer(actual_instance_id, region_id, cumulative_runtime, is_redirector, rng)?;
            let current_node = self.node_mut(instance_index);
            current_node.cumulative_runtime = runtime_sample.cumulative;
            current_node.execution_time = runtime_sample.execution_time;
            // Attributed to the node's own region later in the carbon sweep
            current_node.data_transfer_during_execution += runtime_sample.data_transfer_during_execution_gb;
        }

        self.node_mut(instance_index).invoked = node_invoked;
        Ok(node_invoked)
    }

    fn handle_real_edge(
        &mut self,
        input_manager: &mut InputManager,
        current_edge: &InstanceEdge,
        successor_is_sync_node: bool,
        sync_edge_upload_data: &mut Vec<SyncUploadEntry>,
        sns_arrivals: &mut Vec<SnsArrival>,
        rng: &mut ChaCha8Rng,
    ) -> Result<bool> {
        let EdgeKind::Real { conditionally_invoked } = current_edge.kind else {
            return Ok(false);
        };

        let (from_nominal_id, from_actual_id, from_region_id, from_invoked, from_cumulative) = {
            let from_node = self.node(current_edge.from_instance_id)?;
            (
                from_node.nominal_instance_id,
                from_node.actual_instance_id,
                from_node.region_id,
                from_node.invoked,
                from_node.cumulative_runtime.clone(),
            )
        };
        if !from_invoked {
            // A source that never ran contributes nothing to this node
            return Ok(false);
        }
        let (to_actual_id, to_region_id) = {
            let to_node = self.node(current_edge.to_instance_id)?;
            (to_node.actual_instance_id, to_node.region_id)
        };

        if conditionally_invoked {
            let cumulative_runtime = from_cumulative.for_successor(to_actual_id);
            let transmission_info = input_manager.transmission_info(
                from_actual_id,
                from_region_id,
                to_actual_id,
                to_region_id,
                cumulative_runtime,
                successor_is_sync_node,
                self.consider_from_client_latency,
                rng,
            )?;

            sns_arrivals.push(SnsArrival {
                start_time: transmission_info.starting_runtime,
                from_instance_id: current_edge.from_instance_id,
                to_instance_id: current_edge.to_instance_id,
                cumulative_runtime: transmission_info.cumulative_runtime,
                sns_data_transfer_size: transmission_info.sns_data_transfer_size,
            });

            if successor_is_sync_node {
                if from_nominal_id == -1 {
                    return Err(Error::SyncNodeAfterVirtualStart { to_instance: current_edge.to_instance_id });
                }
                if let Some(sync_info) = transmission_info.sync_info {
                    sync_edge_upload_data.push(sync_info.sync_upload_auxiliary_info);

                    // The upload consumes write capacity at the sync node
                    self.node_mut(current_edge.to_instance_id).tracked_dynamodb_write_capacity +=
                        sync_info.consumed_dynamodb_write_capacity_units;

                    // Upload: predecessor region -> sync node region
                    track_size(
                        &mut self.node_mut(current_edge.from_instance_id).tracked_data_output_sizes,
                        to_region_id,
                        sync_info.dynamodb_upload_size,
                    );
                    track_size(
                        &mut self.node_mut(current_edge.to_instance_id).tracked_data_input_sizes,
                        from_region_id,
                        sync_info.dynamodb_upload_size,
                    );

                    // Sync response: sync node region -> predecessor region
                    track_size(
                        &mut self.node_mut(current_edge.to_instance_id).tracked_data_output_sizes,
                        from_region_id,
                        sync_info.sync_size,
                    );
                    track_size(
                        &mut self.node_mut(current_edge.from_instance_id).tracked_data_input_sizes,
                        to_region_id,
                        sync_info.sync_size,
                    );
                }
            }

            Ok(true)
        } else {
            if from_nominal_id == -1 {
                return Err(Error::NonExecutionAfterVirtualStart { to_instance: current_edge.to_instance_id });
            }

            // The edge was not taken, but sync nodes downstream of the
            // skipped destination still get told about the non-execution
            let non_execution_entries = input_manager.non_execution_info(from_actual_id, to_actual_id)?;
            for entry in non_execution_entries {
                let sync_node_region_id = {
                    let sync_node = self.node_mut(entry.sync_node_instance_id);
                    sync_node.tracked_dynamodb_write_capacity += entry.consumed_dynamodb_write_capacity_units;
                    sync_node.region_id
                };

                // The sync node answers with its stored response payload
                track_size(
                    &mut self.node_mut(entry.sync_node_instance_id).tracked_data_output_sizes,
                    from_region_id,
                    entry.sync_size,
                );
                track_size(
                    &mut self.node_mut(current_edge.from_instance_id).tracked_data_input_sizes,
                    sync_node_region_id,
                    entry.sync_size,
                );

                self.insert_simulated_edge(
                    from_nominal_id,
                    entry.sync_node_instance_id,
                    current_edge.to_instance_id,
                    entry.predecessor_instance_id,
                );
            }

            Ok(false)
        }
    }

    fn handle_simulated_edge(
        &mut self,
        input_manager: &mut InputManager,
        simulated_edge: &InstanceEdge,
        sns_arrivals: &mut Vec<SnsArrival>,
        rng: &mut ChaCha8Rng,
    ) -> Result<()> {
        let EdgeKind::Simulated { uninvoked_instance_id, simulated_sync_predecessor_id } = simulated_edge.kind else {
            return Ok(());
        };

        let (from_actual_id, from_region_id, from_invoked, from_cumulative) = {
            let from_node = self.node(simulated_edge.from_instance_id)?;
            (from_node.actual_instance_id, from_node.region_id, from_node.invoked, from_node.cumulative_runtime.clone())
        };
        if !from_invoked {
            return Ok(());
        }
        let (sync_node_actual_id, to_region_id) = {
            let to_node = self.node(simulated_edge.to_instance_id)?;
            (to_node.actual_instance_id, to_node.region_id)
        };

        // The notification goes out when the source would have called the
        // uninvoked node
        let cumulative_runtime = from_cumulative.for_successor(uninvoked_instance_id);
        let transmission_info = input_manager.simulated_transmission_info(
            from_actual_id,
            uninvoked_instance_id,
            simulated_sync_predecessor_id,
            sync_node_actual_id,
            from_region_id,
            to_region_id,
            cumulative_runtime,
            rng,
        )?;

        sns_arrivals.push(SnsArrival {
            start_time: transmission_info.starting_runtime,
            from_instance_id: simulated_edge.from_instance_id,
            to_instance_id: simulated_edge.to_instance_id,
            cumulative_runtime: transmission_info.cumulative_runtime,
            sns_data_transfer_size: transmission_info.sns_data_transfer_size,
        });
        Ok(())
    }

    /// All predecessor arrivals are recorded, but only the last one to fire
    /// governs when this node starts: the sync wrapper waits for the final
    /// signal before delivering, and for plain nodes there is only one
    /// arrival anyway. Returns the governing arrival's cumulative runtime.
    fn handle_sns_invocation(&mut self, sns_arrivals: &mut [SnsArrival]) -> Result<f64> {
        sns_arrivals.sort_by(|a, b| b.start_time.total_cmp(&a.start_time));
        let Some(governing_arrival) = sns_arrivals.first().copied() else {
            return Ok(0.0);
        };

        let from_region_id = self.node(governing_arrival.from_instance_id)?.region_id;
        let to_region_id = self.node(governing_arrival.to_instance_id)?.region_id;

        // The delivered payload moves out of the predecessor and into this
        // node, and is billed as an individual SNS call
        track_size(
            &mut self.node_mut(governing_arrival.from_instance_id).tracked_data_output_sizes,
            to_region_id,
            governing_arrival.sns_data_transfer_size,
        );
        track_size(
            &mut self.node_mut(governing_arrival.to_instance_id).tracked_data_input_sizes,
            from_region_id,
            governing_arrival.sns_data_transfer_size,
        );
        self.node_mut(governing_arrival.from_instance_id)
            .sns_data_call_output_sizes
            .entry(to_region_id)
            .or_default()
            .push(governing_arrival.sns_data_transfer_size);

        Ok(governing_arrival.cumulative_runtime)
    }

    /// Sweeps all nodes in ascending nominal order, dispatching each to the
    /// virtual-start or regular accounting, and reduces to the trial totals.
    pub fn calculate_overall_cost_runtime_carbon(&self, input_manager: &mut InputManager) -> Result<WorkflowMetrics> {
        let mut cumulative_cost = 0.0;
        let mut cumulative_execution_carbon = 0.0;
        let mut cumulative_transmission_carbon = 0.0;
        let mut max_runtime: f64 = 0.0;

        let mut node_ids: Vec<i32> = self.nodes.keys().copied().collect();
        node_ids.sort_unstable();
        for node_id in node_ids {
            let node = self.node(node_id)?;
            let node_metrics = if node.actual_instance_id == -1 {
                input_manager.calculate_cost_carbon_virtual_start_instance(
                    &node.tracked_data_input_sizes,
                    &node.tracked_data_output_sizes,
                    &node.sns_data_call_output_sizes,
                    node.tracked_dynamodb_read_capacity,
                    node.tracked_dynamodb_write_capacity,
                )?
            } else {
                input_manager.calculate_cost_carbon_of_instance(
                    node.execution_time,
                    node.actual_instance_id,
                    node.region_id,
                    &node.tracked_data_input_sizes,
                    &node.tracked_data_output_sizes,
                    &node.sns_data_call_output_sizes,
                    node.data_transfer_during_execution,
                    node.tracked_dynamodb_read_capacity,
                    node.tracked_dynamodb_write_capacity,
                    node.invoked,
                    node.is_redirector,
                )?
            };
            cumulative_cost += node_metrics.cost;
            cumulative_execution_carbon += node_metrics.execution_carbon;
            cumulative_transmission_carbon += node_metrics.transmission_carbon;
            if node.invoked {
                max_runtime = max_runtime.max(node.cumulative_runtime.current);
            }
        }

        Ok(WorkflowMetrics {
            cost: cumulative_cost,
            runtime: max_runtime,
            carbon: cumulative_execution_carbon + cumulative_transmission_carbon,
            execution_carbon: cumulative_execution_carbon,
            transmission_carbon: cumulative_transmission_carbon,
        })
    }

    pub fn node(&self, instance_index: i32) -> Result<&InstanceNode> {
        self.nodes.get(&instance_index).ok_or(Error::UnknownInstanceIndex(instance_index))
    }

    fn node_mut(&mut self, instance_index: i32) -> &mut InstanceNode {
        self.nodes.entry(instance_index).or_insert_with(|| InstanceNode::new(instance_index))
    }

    fn insert_real_edge(&mut self, from_instance_index: i32, to_instance_index: i32, conditionally_invoked: bool) {
        self.node_mut(from_instance_index);
        self.node_mut(to_instance_index);
        self.edges
            .entry(to_instance_index)
            .or_default()
            .insert(from_instance_index, InstanceEdge::real(from_instance_index, to_instance_index, conditionally_invoked));
    }

    fn insert_simulated_edge(
        &mut self,
        from_instance_id: i32,
        sync_node_id: i32,
        uninvoked_instance_id: i32,
        simulated_sync_predecessor_id: i32,
    ) {
        self.node_mut(from_instance_id);
        self.node_mut(sync_node_id);
        self.simulated_edges.entry(sync_node_id).or_default().insert(
            from_instance_id,
            InstanceEdge::simulated(from_instance_id, sync_node_id, uninvoked_instance_id, simulated_sync_predecessor_id),
        );
    }
}

fn track_size(data_transfer_sizes: &mut HashMap<i32, f64>, region_id: i32, data_transfer_size: f64) {
    *data_transfer_sizes.entry(region_id).or_insert(0.0) += data_transfer_size;
}

/// Incoming edges of the node, in ascending source order so a trial's
/// sampling sequence is reproducible.
fn predecessor_edges(edges: &HashMap<i32, HashMap<i32, InstanceEdge>>, instance_index: i32) -> Vec<InstanceEdge> {
    let mut predecessors: Vec<InstanceEdge> = edges.get(&instance_index).map(|m| m.values().copied().collect()).unwrap_or_default();
    predecessors.sort_by_key(|edge| edge.from_instance_id);
    predecessors
}
