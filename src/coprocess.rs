use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};

use serde_json::Value;

use crate::api::command_dto::{CommandRequestDto, CommandResponseDto};
use crate::api::setup_dto::SetupDto;
use crate::domain::metrics_calculator::DeploymentMetricsCalculator;
use crate::error::Result;

/// Serialized command execution over the coprocess lifetime. One calculator
/// lives at a time; `Setup` replaces it atomically, and every failure is
/// answered with "nil" while the process keeps serving.
#[derive(Debug, Default)]
pub struct Coprocess {
    calculator: Option<DeploymentMetricsCalculator>,
    seed: u64,
}

impl Coprocess {
    pub fn new(seed: u64) -> Self {
        Coprocess { calculator: None, seed }
    }

    /// Handles one raw request record and renders the reply record.
    pub fn handle_message(&mut self, raw_message: &str) -> String {
        let response = match serde_json::from_str::<CommandRequestDto>(raw_message) {
            Ok(request) => self.dispatch(&request.command, &request.data),
            Err(e) => {
                log::error!("Failed to parse command record: {}", e);
                CommandResponseDto::nil()
            }
        };
        serde_json::to_string(&response).unwrap_or_else(|_| "{\"data\":\"nil\"}".to_string())
    }

    fn dispatch(&mut self, command: &str, data: &str) -> CommandResponseDto {
        match command {
            "Setup" => match self.setup(data) {
                Ok(()) => CommandResponseDto::void(),
                Err(e) => {
                    log::error!("Setup failed: {}", e);
                    CommandResponseDto::nil()
                }
            },
            "CalculateDeploymentMetrics" => match self.calculate_deployment_metrics(data) {
                Ok(metrics) => CommandResponseDto::result(metrics),
                Err(e) => {
                    log::error!("CalculateDeploymentMetrics failed: {}", e);
                    CommandResponseDto::nil()
                }
            },
            "UpdateDataForNewHour" => match self.update_data_for_new_hour(data) {
                Ok(()) => CommandResponseDto::void(),
                Err(e) => {
                    log::error!("UpdateDataForNewHour failed: {}", e);
                    CommandResponseDto::nil()
                }
            },
            unknown => {
                log::error!("Unknown command: {}", unknown);
                CommandResponseDto::nil()
            }
        }
    }

    fn setup(&mut self, data: &str) -> Result<()> {
        let dto: SetupDto = serde_json::from_str(data)?;
        self.calculator = Some(DeploymentMetricsCalculator::from_setup(&dto, self.seed)?);
        log::info!("Input manager and metrics calculator created");
        Ok(())
    }

    fn calculate_deployment_metrics(&mut self, data: &str) -> Result<Value> {
        let deployment: Vec<i32> = serde_json::from_str(data)?;
        let calculator = self.calculator.as_mut().ok_or(crate::error::Error::NotSetUp)?;
        let metrics = calculator.perform_monte_carlo_simulation(&deployment)?;
        Ok(serde_json::to_value(metrics)?)
    }

    fn update_data_for_new_hour(&mut self, data: &str) -> Result<()> {
        let calculator = self.calculator.as_mut().ok_or(crate::error::Error::NotSetUp)?;
        // The payload is the bare hour label; tolerate a JSON-quoted one
        let hour = serde_json::from_str::<String>(data).unwrap_or_else(|_| data.to_string());
        calculator.update_data_for_new_hour(&hour);
        Ok(())
    }
}

/// Blocking command loop over two named pipes. Each request is a single
/// text record; pipes are reopened per message so the peer can open and
/// close its ends freely.
pub fn run(receive_pipe_path: &str, send_pipe_path: &str, seed: u64) -> Result<()> {
    let mut coprocess = Coprocess::new(seed);
    log::info!("Serving commands on '{}' -> '{}'", receive_pipe_path, send_pipe_path);
    loop {
        let request = match receive_message(receive_pipe_path) {
            Ok(request) => request,
            Err(e) => {
                log::error!("Failed to read request: {}", e);
                send_message(send_pipe_path, "{\"data\":\"nil\"}")?;
                continue;
            }
        };
        let reply = coprocess.handle_message(&request);
        send_message(send_pipe_path, &reply)?;
    }
}

fn receive_message(receive_pipe_path: &str) -> Result<String> {
    let pipe = OpenOptions::new().read(true).open(receive_pipe_path)?;
    let mut reader = BufReader::new(pipe);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    Ok(line)
}

fn send_message(send_pipe_path: &str, message: &str) -> Result<()> {
    let mut pipe = OpenOptions::new().write(true).open(send_pipe_path)?;
    pipe.write_all(message.as_bytes())?;
    pipe.write_all(b"\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_failure_replies_nil() {
        let mut coprocess = Coprocess::new(0);
        let reply = coprocess.handle_message("not json at all");
        assert_eq!(reply, "{\"data\":\"nil\"}");
    }

    #[test]
    fn test_unknown_command_replies_nil() {
        let mut coprocess = Coprocess::new(0);
        let reply = coprocess.handle_message("{\"command\":\"DoesNotExist\",\"data\":\"{}\"}");
        assert_eq!(reply, "{\"data\":\"nil\"}");
    }

    #[test]
    fn test_commands_before_setup_reply_nil() {
        let mut coprocess = Coprocess::new(0);
        let reply = coprocess.handle_message("{\"command\":\"CalculateDeploymentMetrics\",\"data\":\"[0]\"}");
        assert_eq!(reply, "{\"data\":\"nil\"}");
        let reply = coprocess.handle_message("{\"command\":\"UpdateDataForNewHour\",\"data\":\"5\"}");
        assert_eq!(reply, "{\"data\":\"nil\"}");
    }
}
