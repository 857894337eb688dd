/// An edge of the per-trial graph. Both kinds share their endpoint node
/// keys; neither holds a reference back into the graph, so the containing
/// workflow instance resolves endpoints on demand.
#[derive(Debug, Clone, Copy)]
pub struct InstanceEdge {
    pub from_instance_id: i32,
    pub to_instance_id: i32,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Copy)]
pub enum EdgeKind {
    /// An edge of the workflow itself. `conditionally_invoked` is true only
    /// if the trial's random draw actually took the edge.
    Real { conditionally_invoked: bool },
    /// A synthetic edge standing in for an ancestor that was never invoked
    /// but whose sync node still receives bookkeeping writes.
    Simulated { uninvoked_instance_id: i32, simulated_sync_predecessor_id: i32 },
}

impl InstanceEdge {
    pub fn real(from_instance_id: i32, to_instance_id: i32, conditionally_invoked: bool) -> Self {
        InstanceEdge { from_instance_id, to_instance_id, kind: EdgeKind::Real { conditionally_invoked } }
    }

    pub fn simulated(
        from_instance_id: i32,
        to_instance_id: i32,
        uninvoked_instance_id: i32,
        simulated_sync_predecessor_id: i32,
    ) -> Self {
        InstanceEdge {
            from_instance_id,
            to_instance_id,
            kind: EdgeKind::Simulated { uninvoked_instance_id, simulated_sync_predecessor_id },
        }
    }
}
