use crate::api::setup_dto::SetupDto;
use crate::domain::metrics_calculator::DeploymentMetricsCalculator;
use crate::error::Result;

pub mod api;
pub mod coprocess;
pub mod domain;
pub mod error;
pub mod logger;
pub mod lookup;

/// Builds a ready-to-run metrics calculator from a JSON `Setup` payload.
pub fn setup_from_json(payload: &str, seed: u64) -> Result<DeploymentMetricsCalculator> {
    let dto: SetupDto = serde_json::from_str(payload)?;
    log::info!("Setup payload parsed successfully.");

    let calculator = DeploymentMetricsCalculator::from_setup(&dto, seed)?;
    log::info!("Metrics calculator constructed successfully.");

    Ok(calculator)
}
