use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::statistics::Statistics;

use crate::api::setup_dto::SetupDto;
use crate::domain::input_manager::InputManager;
use crate::domain::workflow_instance::{WorkflowInstance, WorkflowMetrics};
use crate::error::{Error, Result};

const BATCH_SIZE: usize = 200;
const MAX_NUMBER_OF_ITERATIONS: usize = 2000;
const CONFIDENCE_THRESHOLD: f64 = 0.05;

/// Averages and tail quantiles over all Monte Carlo trials of a deployment.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DeploymentMetrics {
    pub average_cost: f64,
    pub average_runtime: f64,
    pub average_carbon: f64,
    pub tail_cost: f64,
    pub tail_runtime: f64,
    pub tail_carbon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_execution_carbon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_transmission_carbon: Option<f64>,
}

/// Repeats single-trial workflow simulations in batches until the relative
/// confidence-interval width of every tracked metric falls under the
/// threshold (or the iteration cap is hit), then reduces the collected
/// distributions to averages and tail quantiles.
///
/// Owns the seeded PRNG: identical seeds and inputs replay identical trial
/// sequences.
#[derive(Debug)]
pub struct DeploymentMetricsCalculator {
    input_manager: InputManager,
    rng: ChaCha8Rng,
    tail_latency_threshold: f64,
    prerequisites_dictionary: HashMap<i32, Vec<i32>>,
    successor_dictionary: HashMap<i32, Vec<i32>>,
    topological_order: Vec<i32>,
    record_transmission_execution_carbon: bool,
    consider_from_client_latency: bool,
    batch_size: usize,
}

impl DeploymentMetricsCalculator {
    pub fn from_setup(dto: &SetupDto, seed: u64) -> Result<Self> {
        Ok(DeploymentMetricsCalculator {
            input_manager: InputManager::from_setup(dto),
            rng: ChaCha8Rng::seed_from_u64(seed),
            tail_latency_threshold: dto.tail_latency_threshold,
            prerequisites_dictionary: parse_adjacency(&dto.prerequisites_dictionary)?,
            successor_dictionary: parse_adjacency(&dto.successor_dictionary)?,
            topological_order: dto.topological_order.clone(),
            record_transmission_execution_carbon: dto.record_transmission_execution_carbon,
            consider_from_client_latency: dto.consider_from_client_latency,
            batch_size: BATCH_SIZE,
        })
    }

    /// One trial: materialize the workflow instance along the topological
    /// order, drawing edge invocations as it goes, and account it.
    pub fn calculate_workflow(&mut self, deployment: &[i32]) -> Result<WorkflowMetrics> {
        let start_hop_instance_index = *self.topological_order.first().ok_or(Error::EmptyTopologicalOrder)?;
        let mut workflow_instance = WorkflowInstance::new(
            &mut self.input_manager,
            deployment,
            start_hop_instance_index,
            self.consider_from_client_latency,
            &mut self.rng,
        )?;

        let topological_order = self.topological_order.clone();
        for instance_index in topological_order {
            let has_predecessors =
                self.prerequisites_dictionary.get(&instance_index).map(|p| !p.is_empty()).unwrap_or(false);
            if !has_predecessors {
                workflow_instance.add_start_hop(&mut self.input_manager, instance_index, &mut self.rng)?;
            }
            let node_invoked = workflow_instance.add_node(&mut self.input_manager, instance_index, &mut self.rng)?;
            let successor_indices = self.successor_dictionary.get(&instance_index).cloned().unwrap_or_default();
            for successor_index in successor_indices {
                let is_invoked = node_invoked && self.is_invoked(instance_index, successor_index)?;
                workflow_instance.add_edge(instance_index, successor_index, is_invoked)?;
            }
        }

        workflow_instance.calculate_overall_cost_runtime_carbon(&mut self.input_manager)
    }

    fn is_invoked(&mut self, from_instance_index: i32, to_instance_index: i32) -> Result<bool> {
        let invocation_probability = self.input_manager.invocation_probability(from_instance_index, to_instance_index)?;
        Ok(self.rng.random::<f64>() < invocation_probability)
    }

    /// Monte Carlo estimate of average and tail cost, runtime and carbon.
    pub fn perform_monte_carlo_simulation(&mut self, deployment: &[i32]) -> Result<DeploymentMetrics> {
        let mut costs_distribution: Vec<f64> = Vec::new();
        let mut runtimes_distribution: Vec<f64> = Vec::new();
        let mut carbons_distribution: Vec<f64> = Vec::new();
        let mut execution_carbon_distribution: Vec<f64> = Vec::new();
        let mut transmission_carbon_distribution: Vec<f64> = Vec::new();

        let mut number_of_iterations = 0;
        loop {
            for _ in 0..self.batch_size {
                let metrics = self.calculate_workflow(deployment)?;
                costs_distribution.push(metrics.cost);
                runtimes_distribution.push(metrics.runtime);
                carbons_distribution.push(metrics.carbon);
                if self.record_transmission_execution_carbon {
                    execution_carbon_distribution.push(metrics.execution_carbon);
                    transmission_carbon_distribution.push(metrics.transmission_carbon);
                }
            }
            number_of_iterations += self.batch_size;

            let mut all_within_threshold = [&costs_distribution, &runtimes_distribution, &carbons_distribution]
                .iter()
                .all(|distribution| within_confidence_threshold(distribution, CONFIDENCE_THRESHOLD));
            if self.record_transmission_execution_carbon {
                all_within_threshold = all_within_threshold
                    && within_confidence_threshold(&execution_carbon_distribution, CONFIDENCE_THRESHOLD)
                    && within_confidence_threshold(&transmission_carbon_distribution, CONFIDENCE_THRESHOLD);
            }
            if all_within_threshold || number_of_iterations >= MAX_NUMBER_OF_ITERATIONS {
                break;
            }
        }
        log::debug!("Monte Carlo simulation converged after {} trials", number_of_iterations);

        costs_distribution.sort_by(f64::total_cmp);
        runtimes_distribution.sort_by(f64::total_cmp);
        carbons_distribution.sort_by(f64::total_cmp);

        let tail_quantile = self.tail_latency_threshold / 100.0;
        Ok(DeploymentMetrics {
            average_cost: costs_distribution.iter().mean(),
            average_runtime: runtimes_distribution.iter().mean(),
            average_carbon: carbons_distribution.iter().mean(),
            tail_cost: empirical_quantile(&costs_distribution, tail_quantile),
            tail_runtime: empirical_quantile(&runtimes_distribution, tail_quantile),
            tail_carbon: empirical_quantile(&carbons_distribution, tail_quantile),
            average_execution_carbon: self
                .record_transmission_execution_carbon
                .then(|| execution_carbon_distribution.iter().mean()),
            average_transmission_carbon: self
                .record_transmission_execution_carbon
                .then(|| transmission_carbon_distribution.iter().mean()),
        })
    }

    /// Re-reads grid intensities for the given hour on the next trial.
    pub fn update_data_for_new_hour(&mut self, hour: &str) {
        self.input_manager.alter_carbon_setting(Some(hour.to_string()));
    }
}

fn parse_adjacency(dictionary: &HashMap<String, Vec<i32>>) -> Result<HashMap<i32, Vec<i32>>> {
    let mut parsed = HashMap::with_capacity(dictionary.len());
    for (key, value) in dictionary {
        let index = key.parse::<i32>().map_err(|_| Error::InvalidIndexKey(key.clone()))?;
        parsed.insert(index, value.clone());
    }
    Ok(parsed)
}

/// Whether the two-sided Student's-t confidence interval of the sample mean
/// is narrower than `threshold`, relative to the mean.
fn within_confidence_threshold(distribution: &[f64], threshold: f64) -> bool {
    if distribution.len() < 2 {
        return false;
    }
    let mean = distribution.iter().mean();
    let sem = distribution.iter().std_dev() / (distribution.len() as f64).sqrt();
    let critical_value = match StudentsT::new(0.0, 1.0, (distribution.len() - 1) as f64) {
        Ok(students_t) => students_t.inverse_cdf(1.0 - threshold / 2.0),
        Err(_) => return false,
    };
    let relative_ci_width = 2.0 * critical_value * sem / mean;
    // A degenerate all-zero distribution yields NaN and counts as converged
    !(relative_ci_width > threshold)
}

/// Empirical (linear-rank) quantile of an ascending-sorted sample: the
/// smallest element whose cumulative fraction reaches `quantile`.
fn empirical_quantile(sorted_distribution: &[f64], quantile: f64) -> f64 {
    if sorted_distribution.is_empty() {
        return 0.0;
    }
    let rank = (quantile * sorted_distribution.len() as f64).ceil() as usize;
    sorted_distribution[rank.saturating_sub(1).min(sorted_distribution.len() - 1)]
}
