use std::sync::Arc;

use esi_harness::config;
use esi_harness::gateway::NoopUsageSink;
use esi_harness::{run_all, Evaluator, RunFilter, RunPlan};
use serde_json::{json, Value};
use tempfile::tempdir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn completion(content: &str, completion_tokens: u32) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": content }, "finish_reason": "stop" }],
        "usage": { "prompt_tokens": 12, "completion_tokens": completion_tokens }
    }))
}

/// Worker answers by question text: "capital" questions get a COT-shaped
/// correct answer, anything else a wrong one.
struct WorkerResponder;

impl Respond for WorkerResponder {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
        let prompt = body["messages"][1]["content"].as_str().unwrap_or_default();
        if prompt.contains("capital") {
            completion("Paris is the capital.\nFinal Answer: Paris", 200)
        } else {
            completion("Working it out.\nFinal Answer: - Blue.", 50)
        }
    }
}

/// Accuracy judge marks the answer correct when the candidate is Paris.
struct AccuracyResponder;

impl Respond for AccuracyResponder {
    fn respond(&self, req: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&req.body).unwrap_or(Value::Null);
        let prompt = body["messages"][1]["content"].as_str().unwrap_or_default();
        let correct = prompt.contains("Paris");
        completion(
            &format!(
                "Verdict follows.\n{{\"is_judged_correct\": {correct}, \"reasoning\": \"compared\"}}"
            ),
            20,
        )
    }
}

#[tokio::test]
async fn settings_file_drives_a_full_run_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/worker/chat/completions"))
        .and(body_partial_json(json!({ "model": "org/worker", "top_p": 0.1 })))
        .respond_with(WorkerResponder)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/accuracy/chat/completions"))
        .and(body_partial_json(json!({ "model": "judge-a", "max_tokens": 8000 })))
        .respond_with(AccuracyResponder)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/integrity/chat/completions"))
        .and(body_partial_json(json!({ "model": "judge-i", "max_tokens": 1000 })))
        .respond_with(completion(
            r#"{"integrity_score": 75, "integrity_reasoning": "sound"}"#,
            20,
        ))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let data = dir.path().join("geo_l3.jsonl");
    std::fs::write(
        &data,
        [
            r#"{"instruction":"France facts","question":"What is the capital?","answer":"Paris","scenario_code":"GEO-1"}"#,
            r#"{"instruction":"Sky facts","question":"What colour is the sky?","answer":"Grey"}"#,
            r#"{"instruction":"No question here"}"#,
        ]
        .join("\n"),
    )
    .unwrap();

    let out = dir.path().join("out");
    let settings = json!({
        "worker": {
            "api_url": format!("{}/worker/chat/completions", server.uri()),
            "api_token": "sk-worker",
            "model_ids": ["org/worker"]
        },
        "accuracy_judge": {
            "api_url": format!("{}/accuracy/chat/completions", server.uri()),
            "api_token": "sk-judge",
            "model_id": "judge-a"
        },
        "integrity_judge": {
            "api_url": format!("{}/integrity/chat/completions", server.uri()),
            "api_token": "sk-judge",
            "model_id": "judge-i"
        },
        "datasets": { "geo_l3": { "path": data } },
        "datasets_to_run": ["geo_l3"],
        "prompt_versions": ["COT"],
        "output": {
            "final_output_template": format!("{}/{{dataset_short_name}}/{{model_id}}_{{prompt_version}}.jsonl", out.display()),
            "skipped_log_template": format!("{}/{{dataset_short_name}}/{{model_id}}_{{prompt_version}}.log", out.display()),
            "summary_template": format!("{}/{{dataset_short_name}}/{{model_id}}_{{prompt_version}}.summary.json", out.display())
        },
        "scoring": {
            "token_budget": 1000,
            "p_irrelevant": 0.0,
            "severe_keywords": [],
            "max_length_ratio": 3.0,
            "weights": { "accuracy": 1.0, "true_integrity": 1.0, "efficiency": 1.0, "safety": 1.0, "alignment_simple": 1.0 }
        },
        "network": { "max_retries": 0, "retry_delay_seconds": 0.0, "request_timeout_seconds": 5.0 },
        "max_concurrent_items_per_combo": 2
    });
    let settings_path = dir.path().join("settings.json");
    std::fs::write(&settings_path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();

    let cfg = config::load(&settings_path).unwrap();
    let plan = RunPlan::new(&cfg, &RunFilter::default()).unwrap();
    let gateways = cfg.build_gateways(Arc::new(NoopUsageSink)).unwrap();
    let evaluator = Evaluator::from_config(&cfg, &gateways);

    let report = run_all(&evaluator, &cfg.output, &plan).await;
    assert_eq!(report.summaries.len(), 1);
    let summary = &report.summaries[0];
    assert_eq!(summary.processing_summary.items_pipeline_completed_for_scoring, 2);
    assert_eq!(summary.processing_summary.skipped_data_incomplete_in_pipeline, 1);
    assert_eq!(summary.combination_details.accuracy_judge_model_id, "judge-a");

    let results_path = out.join("geo_l3/org__worker_COT.jsonl");
    let rows: Vec<Value> = std::fs::read_to_string(&results_path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(rows.len(), 3);

    let paris = &rows[0];
    assert_eq!(paris["status"], "COMPLETED");
    assert_eq!(paris["scenario_code"], "GEO-1");
    assert_eq!(paris["worker_answer_cleaned"], "Paris");
    assert_eq!(paris["judge_verdict_is_correct"], true);
    assert_eq!(paris["integrity_judge_score"], 75);
    assert_eq!(paris["s_efficiency"], 80.0);
    // (100 + 75 + 80 + 100 + 100) / 5
    assert!((paris["esi_score"].as_f64().unwrap() - 91.0).abs() < 1e-9);

    let blue = &rows[1];
    assert_eq!(blue["worker_answer_cleaned"], "Blue");
    assert_eq!(blue["judge_verdict_is_correct"], false);
    assert_eq!(blue["s_accuracy"], 0.0);
    assert_eq!(blue["s_alignment_simple"], 60.0);

    assert_eq!(rows[2]["status"], "SKIPPED_DATA_INCOMPLETE");

    let log = std::fs::read_to_string(out.join("geo_l3/org__worker_COT.log")).unwrap();
    assert!(log.contains("Skipped item 3 from geo_l3"));
    assert!(out.join("geo_l3/org__worker_COT.summary.json").exists());
}

#[tokio::test]
async fn worker_http_errors_become_worker_api_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/worker"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/judge"))
        .respond_with(completion("unused", 1))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let data = dir.path().join("plain.jsonl");
    std::fs::write(&data, r#"{"instruction":"I","question":"Q","answer":"A"}"#).unwrap();
    let settings = json!({
        "worker": { "api_url": format!("{}/worker", server.uri()), "api_token": "t", "model_ids": ["w"] },
        "accuracy_judge": { "api_url": format!("{}/judge", server.uri()), "api_token": "t", "model_id": "a" },
        "integrity_judge": { "api_url": format!("{}/judge", server.uri()), "api_token": "t", "model_id": "i" },
        "datasets": { "plain": { "path": data } },
        "datasets_to_run": ["plain"],
        "prompt_versions": ["DIRECT"],
        "output": {
            "final_output_template": format!("{}/{{model_id}}.jsonl", dir.path().display()),
            "skipped_log_template": format!("{}/{{model_id}}.log", dir.path().display()),
            "summary_template": format!("{}/{{model_id}}.json", dir.path().display())
        },
        "network": { "max_retries": 2, "retry_delay_seconds": 0.001, "request_timeout_seconds": 5.0 }
    });
    let cfg = config::EvalConfig::from_raw(serde_json::from_value(settings).unwrap()).unwrap();
    let plan = RunPlan::new(&cfg, &RunFilter::default()).unwrap();
    let gateways = cfg.build_gateways(Arc::new(NoopUsageSink)).unwrap();
    let evaluator = Evaluator::from_config(&cfg, &gateways);

    let report = run_all(&evaluator, &cfg.output, &plan).await;
    let summary = &report.summaries[0];
    assert_eq!(summary.processing_summary.worker_api_errors, 1);

    let row: Value = serde_json::from_str(
        std::fs::read_to_string(dir.path().join("w.jsonl"))
            .unwrap()
            .trim(),
    )
    .unwrap();
    assert_eq!(row["status"], "ERROR_WORKER_API");
    assert_eq!(row["worker_answer_raw"], "WORKER_API_ERROR");
    assert!(row["worker_response_time_seconds"].is_null());
    assert_eq!(row["esi_score"], 0.0);
}
