//! End-to-end flows through `Engine::execute`, driven by the simulated
//! desktop backend.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use deskpilot_core::Config;
use deskpilot_core::Engine;
use deskpilot_core::platform::Bounds;
use deskpilot_core::platform::ElementProps;
use deskpilot_core::platform::OcrWord;
use deskpilot_core::platform::sim::SimDesktop;
use deskpilot_protocol::ConfirmationMode;
use deskpilot_protocol::ToolRequest;
use pretty_assertions::assert_eq;
use serde_json::Value as JsonValue;
use serde_json::json;

fn engine_fixture() -> (tempfile::TempDir, Arc<SimDesktop>, Arc<Engine>) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.security.confirmation_mode = ConfirmationMode::Autonomous;
    config.automation.agent_screen_only = false;
    config.save(dir.path()).unwrap();

    let sim = Arc::new(SimDesktop::new());
    let engine = Engine::new(dir.path().to_path_buf(), sim.clone());
    (dir, sim, engine)
}

async fn call(engine: &Arc<Engine>, tool: &str, params: JsonValue) -> JsonValue {
    let request = ToolRequest::parse(tool, params).unwrap();
    match engine.execute(&request).await {
        Ok(value) => value,
        Err(e) => e.to_value(),
    }
}

#[tokio::test]
async fn memory_round_trip_and_not_found() {
    let (_dir, _sim, engine) = engine_fixture();

    let saved = call(
        &engine,
        "memory_save",
        json!({"key": "proj/path", "value": "/tmp/x", "category": "projects"}),
    )
    .await;
    assert_eq!(saved["success"], json!(true));

    let recalled = call(
        &engine,
        "memory_recall",
        json!({"key": "proj/path", "category": "projects"}),
    )
    .await;
    assert_eq!(recalled["value"], json!("/tmp/x"));

    let deleted = call(
        &engine,
        "memory_delete",
        json!({"key": "proj/path", "category": "projects"}),
    )
    .await;
    assert_eq!(deleted["success"], json!(true));

    let missing = call(
        &engine,
        "memory_recall",
        json!({"key": "proj/path", "category": "projects"}),
    )
    .await;
    assert!(missing["error"].as_str().unwrap().contains("not found"));

    let listing = call(&engine, "memory_recall", json!({"category": "projects"})).await;
    assert!(
        !listing["keys"]
            .as_array()
            .unwrap()
            .iter()
            .any(|k| k == "proj/path")
    );
}

#[tokio::test]
async fn smart_find_learns_across_calls() {
    let (_dir, sim, engine) = engine_fixture();
    sim.add_window(
        "Login - Portal",
        Bounds {
            x: 0,
            y: 0,
            width: 400,
            height: 300,
        },
        1,
    );
    sim.set_ocr_words(vec![OcrWord {
        text: "Sign In".to_string(),
        x: 50,
        y: 40,
        width: 60,
        height: 14,
        confidence: Some(97.0),
    }]);

    let params = json!({"target": "Sign In", "window_title": "Portal"});
    let first = call(&engine, "smart_find", params.clone()).await;
    assert_eq!(first["method"], json!("ocr"));
    let methods = first["methods_tried"].as_array().unwrap();
    assert_eq!(methods[0]["method"], json!("ui_automation"));
    assert_eq!(methods[0]["success"], json!(false));

    // The journal now steers the second call straight to OCR.
    let second = call(&engine, "smart_find", params).await;
    let methods = second["methods_tried"].as_array().unwrap();
    assert_eq!(
        methods[0]["reason"],
        json!("journal_says_uia_fails_on_this_app")
    );

    let journal = call(&engine, "get_error_journal", json!({"window": "Portal"})).await;
    let entries = journal["entries"].as_array().unwrap();
    assert!(
        entries
            .iter()
            .any(|e| e["method_worked"] == json!("ocr") && e["tool"] == json!("smart_find"))
    );
}

#[tokio::test]
async fn visual_diff_idempotence_law() {
    let (_dir, sim, engine) = engine_fixture();
    sim.add_window(
        "Still Life",
        Bounds {
            x: 0,
            y: 0,
            width: 120,
            height: 90,
        },
        1,
    );

    let snap = call(&engine, "visual_diff", json!({"window_title": "Still"})).await;
    let id = snap["snapshot_id"].as_str().unwrap();
    let compared = call(
        &engine,
        "visual_diff_compare",
        json!({"snapshot_id": id}),
    )
    .await;
    assert_eq!(compared["changed"], json!(false));
}

#[tokio::test]
async fn workflow_replay_applies_safety_per_step() {
    let (_dir, _sim, engine) = engine_fixture();

    call(&engine, "workflow_record", json!({"name": "combo"})).await;
    engine
        .workflows
        .record_step("click", &json!({"x": 1, "y": 1}), true, false);
    engine.workflows.record_step(
        "run_command",
        &json!({"command": "rm -rf /tmp/target"}),
        true,
        false,
    );
    call(&engine, "workflow_stop", JsonValue::Null).await;

    let replay = call(&engine, "workflow_run", json!({"name": "combo"})).await;
    assert_eq!(replay["success"], json!(false));
    assert_eq!(replay["stopped_reason"], json!("safety_blocked"));
    assert_eq!(replay["completed_steps"], json!(1));
}

#[tokio::test]
async fn diagnostics_reflect_engine_state() {
    let (_dir, _sim, engine) = engine_fixture();

    call(&engine, "kill_switch", json!({"action": "activate"})).await;
    let diag = call(&engine, "get_diagnostics", JsonValue::Null).await;
    assert_eq!(diag["kill_switch_active"], json!(true));

    call(&engine, "kill_switch", json!({"action": "reset"})).await;
    let diag = call(&engine, "get_diagnostics", JsonValue::Null).await;
    assert_eq!(diag["kill_switch_active"], json!(false));
    assert_eq!(diag["workflow_recording"], json!(false));
}

#[tokio::test]
async fn capabilities_cover_the_tool_contract() {
    let (_dir, _sim, engine) = engine_fixture();
    let capabilities = call(&engine, "get_capabilities", JsonValue::Null).await;
    let groups = capabilities["groups"].as_object().unwrap();
    let mut all: Vec<String> = groups
        .values()
        .flat_map(|tools| tools.as_array().unwrap().iter())
        .map(|t| t.as_str().unwrap().to_string())
        .collect();
    all.sort();

    // Every advertised name must be a recognized tool (it may still
    // demand parameters).
    for tool in &all {
        if let Err(deskpilot_protocol::ParseError::UnknownTool(_)) =
            ToolRequest::parse(tool, JsonValue::Null)
        {
            panic!("capabilities lists unrecognized tool {tool}");
        }
    }
    for expected in [
        "smart_find",
        "kill_switch",
        "cdp_send",
        "watch_folder",
        "schedule_task",
        "run_app_script",
    ] {
        assert!(all.contains(&expected.to_string()), "missing {expected}");
    }
}

#[tokio::test]
async fn extensions_lifecycle_through_the_engine() {
    let (_dir, _sim, engine) = engine_fixture();
    let manifest = json!({
        "name": "sheet-sync",
        "version": "0.3.0",
        "permissions": {
            "com_automation": ["Excel.Application"],
            "file_system": ["read", "write"],
            "network": true,
            "shell_commands": false,
        },
    });
    let installed = call(&engine, "install_extension", json!({"manifest": manifest})).await;
    assert_eq!(installed["success"], json!(true));

    let audit = call(&engine, "audit_extensions", JsonValue::Null).await;
    assert_eq!(audit["reports"][0]["risk"], json!("review"));

    let removed = call(&engine, "uninstall_extension", json!({"name": "sheet-sync"})).await;
    assert_eq!(removed["success"], json!(true));
}
