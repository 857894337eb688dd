use std::collections::HashMap;

use crate::domain::calculators::runtime::CumulativeRuntime;

/// Per-trial state of one node in the materialized workflow graph.
///
/// `nominal_instance_id` is the key in the trial's node map and may be a
/// sentinel (-1 for the virtual client or the redirector, -2 for the virtual
/// client when a redirector exists). `actual_instance_id` is the workflow
/// instance the node stands for, or -1 for the virtual client.
#[derive(Debug, Clone)]
pub struct InstanceNode {
    pub nominal_instance_id: i32,
    pub actual_instance_id: i32,
    pub region_id: i32,
    pub invoked: bool,

    /// GB received, keyed by source region.
    pub tracked_data_input_sizes: HashMap<i32, f64>,
    /// GB sent, keyed by destination region.
    pub tracked_data_output_sizes: HashMap<i32, f64>,
    /// One entry per outbound SNS call, keyed by destination region. Kept as
    /// individual calls because each one is billed with its own round-up.
    pub sns_data_call_output_sizes: HashMap<i32, Vec<f64>>,
    /// GB moved during execution that no edge accounts for.
    pub data_transfer_during_execution: f64,

    pub tracked_dynamodb_read_capacity: f64,
    pub tracked_dynamodb_write_capacity: f64,

    pub cumulative_runtime: CumulativeRuntime,
    pub execution_time: f64,
    pub is_redirector: bool,
}

impl InstanceNode {
    pub fn new(nominal_instance_id: i32) -> Self {
        InstanceNode {
            nominal_instance_id,
            actual_instance_id: if nominal_instance_id >= 0 { nominal_instance_id } else { -1 },
            region_id: -1,
            invoked: false,
            tracked_data_input_sizes: HashMap::new(),
            tracked_data_output_sizes: HashMap::new(),
            sns_data_call_output_sizes: HashMap::new(),
            data_transfer_during_execution: 0.0,
            tracked_dynamodb_read_capacity: 0.0,
            tracked_dynamodb_write_capacity: 0.0,
            cumulative_runtime: CumulativeRuntime::default(),
            execution_time: 0.0,
            is_redirector: nominal_instance_id == -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_node_defaults() {
        let node = InstanceNode::new(3);
        assert_eq!(node.nominal_instance_id, 3);
        assert_eq!(node.actual_instance_id, 3);
        assert_eq!(node.region_id, -1);
        assert!(!node.invoked);
        assert!(!node.is_redirector);
        assert_eq!(node.cumulative_runtime.current, 0.0);
    }

    #[test]
    fn test_sentinel_nodes() {
        let virtual_client = InstanceNode::new(-1);
        assert_eq!(virtual_client.actual_instance_id, -1);
        assert!(virtual_client.is_redirector);

        let shifted_client = InstanceNode::new(-2);
        assert_eq!(shifted_client.actual_instance_id, -1);
        assert!(!shifted_client.is_redirector);
    }
}
