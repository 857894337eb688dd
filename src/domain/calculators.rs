pub mod carbon;
pub mod cost;
pub mod runtime;

/// Region charged for the workflow-placement-decision table reads at the
/// virtual start, regardless of the deployment under evaluation.
pub const GLOBAL_SYSTEM_REGION: &str = "us-west-2";

pub fn system_region_name() -> String {
    format!("aws:{}", GLOBAL_SYSTEM_REGION)
}
