use deployment_metrics_sim::coprocess::Coprocess;

const KB: f64 = 1.0 / 1_048_576.0;

fn setup_payload() -> serde_json::Value {
    serde_json::json!({
        "region_viability_loader": ["aws:us-west-2"],
        "datacenter_loader": {},
        "performance_loader": {},
        "carbon_loader": {},
        "workflow_loader": {
            "workflow_data": {
                "start_hop_summary": {
                    "workflow_placement_decision_size_gb": 4.0 * KB,
                    "wpd_at_function_probability": 0.0
                },
                "instance_summary": {
                    "start_instance": {
                        "executions": {
                            "auxiliary_index_translation": {"data_transfer_during_execution_gb": 0},
                            "at_region": {
                                "aws:us-west-2": {"durations_s": [2.0], "auxiliary_data": {"2.0": [[0.0]]}}
                            }
                        }
                    }
                }
            },
            "instances_regions_and_providers": {
                "start_instance": {"aws": {"config": {"memory": 1024.0}}}
            },
            "home_region": "aws:us-west-2"
        },
        "consider_cfe": false,
        "energy_factor": 0.001,
        "carbon_free_intra_region_transmission": false,
        "carbon_free_dt_during_execution_at_home_region": false,
        "instance_indexer": {
            "value_indices": {"start_instance": 0},
            "indices_to_values": {"0": "start_instance"}
        },
        "region_indexer": {
            "value_indices": {"aws:us-west-2": 0},
            "indices_to_values": {"0": "aws:us-west-2"}
        },
        "prerequisites_dictionary": {"0": []},
        "successor_dictionary": {"0": []},
        "topological_order": [0],
        "tail_latency_threshold": 99.0,
        "home_region_index": 0,
        "record_transmission_execution_carbon": false
    })
}

fn request(command: &str, data: &str) -> String {
    serde_json::json!({"command": command, "data": data}).to_string()
}

#[test]
fn test_full_command_sequence() {
    let mut coprocess = Coprocess::new(0);

    let reply = coprocess.handle_message(&request("Setup", &setup_payload().to_string()));
    assert_eq!(reply, "{\"data\":\"void\"}");

    let reply = coprocess.handle_message(&request("CalculateDeploymentMetrics", "[0]"));
    let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
    let metrics = &parsed["data"];
    assert!((metrics["average_runtime"].as_f64().unwrap() - 2.0).abs() < 1e-9);
    assert!(metrics["average_cost"].as_f64().unwrap() > 0.0);
    assert!(metrics["tail_carbon"].as_f64().unwrap() > 0.0);
    // Split carbon was not requested in the setup payload
    assert!(metrics.get("average_execution_carbon").is_none());

    let reply = coprocess.handle_message(&request("UpdateDataForNewHour", "5"));
    assert_eq!(reply, "{\"data\":\"void\"}");
}

#[test]
fn test_setup_replaces_previous_calculator() {
    let mut coprocess = Coprocess::new(0);
    let payload = setup_payload().to_string();
    assert_eq!(coprocess.handle_message(&request("Setup", &payload)), "{\"data\":\"void\"}");
    assert_eq!(coprocess.handle_message(&request("Setup", &payload)), "{\"data\":\"void\"}");

    let reply = coprocess.handle_message(&request("CalculateDeploymentMetrics", "[0]"));
    let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert!(parsed["data"].is_object());
}

#[test]
fn test_malformed_payloads_reply_nil_without_terminating() {
    let mut coprocess = Coprocess::new(0);
    assert_eq!(coprocess.handle_message(&request("Setup", "{not json")), "{\"data\":\"nil\"}");

    // The coprocess keeps serving after a failure
    assert_eq!(coprocess.handle_message(&request("Setup", &setup_payload().to_string())), "{\"data\":\"void\"}");

    // A deployment of the wrong shape fails the command, not the process
    assert_eq!(coprocess.handle_message(&request("CalculateDeploymentMetrics", "\"oops\"")), "{\"data\":\"nil\"}");
    let reply = coprocess.handle_message(&request("CalculateDeploymentMetrics", "[0]"));
    assert!(reply.starts_with("{\"data\":{"));
}
