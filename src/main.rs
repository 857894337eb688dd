use deployment_metrics_sim::coprocess;
use deployment_metrics_sim::error::Result;
use deployment_metrics_sim::logger;

const RECEIVE_PIPE_DEFAULT: &str = "data_in";
const SEND_PIPE_DEFAULT: &str = "data_out";

fn main() -> Result<()> {
    logger::init();

    let args: Vec<String> = std::env::args().collect();
    let receive_pipe_path = args.get(1).map(String::as_str).unwrap_or(RECEIVE_PIPE_DEFAULT);
    let send_pipe_path = args.get(2).map(String::as_str).unwrap_or(SEND_PIPE_DEFAULT);
    let seed = args.get(3).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);

    coprocess::run(receive_pipe_path, send_pipe_path, seed)
}
