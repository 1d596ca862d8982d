#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;

fn taskmaster(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("taskmaster").unwrap();
    cmd.current_dir(dir.path())
        .env("TASKMASTER_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn init_project(dir: &TempDir) {
    taskmaster(dir).arg("init").assert().success();
}

fn write_tasks(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("tasks.json");
    std::fs::write(&path, body).unwrap();
    path
}

/// Init, then create a set named "auth" from `tasks`.
fn seed(dir: &TempDir, tasks: &str) {
    init_project(dir);
    let file = write_tasks(dir, &format!(r#"{{"title": "Auth", "tasks": {tasks}}}"#));
    taskmaster(dir)
        .args(["create-tasks", "--file"])
        .arg(&file)
        .assert()
        .success();
}

fn json_of(dir: &TempDir, args: &[&str]) -> Value {
    let out = taskmaster(dir)
        .arg("--json")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&out).unwrap()
}

const CHAIN: &str = r#"[
    {"title": "Schema", "complexity": 2},
    {"title": "Endpoints", "complexity": 3, "blockedBy": ["T-001"]},
    {"title": "Docs page", "complexity": 1}
]"#;

// ---------------------------------------------------------------------------
// init / create-tasks
// ---------------------------------------------------------------------------

#[test]
fn init_creates_store() {
    let dir = TempDir::new().unwrap();
    taskmaster(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .taskmaster/config.yaml"));
    assert!(dir.path().join(".taskmaster/sets").is_dir());
    assert!(dir.path().join(".taskmaster/index.json").exists());

    taskmaster(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:  .taskmaster/config.yaml"));
}

#[test]
fn commands_require_init() {
    let dir = TempDir::new().unwrap();
    taskmaster(&dir)
        .arg("list-tasks")
        .assert()
        .failure()
        .stderr(predicate::str::contains("taskmaster init"));
}

#[test]
fn create_tasks_persists_set_and_index() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);

    let state = dir.path().join(".taskmaster/sets/auth/state.json");
    let raw: Value = serde_json::from_str(&std::fs::read_to_string(state).unwrap()).unwrap();
    assert_eq!(raw["tasks"].as_array().unwrap().len(), 3);
    assert_eq!(raw["tasks"][0]["blocks"][0], "T-002");

    let sets = json_of(&dir, &["sets"]);
    assert_eq!(sets["sets"][0]["id"], "auth");
    assert_eq!(sets["sets"][0]["status"], "active");
    assert_eq!(sets["sets"][0]["progress"]["total"], 3);
}

#[test]
fn create_tasks_splits_tasks_above_ceiling() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let file = write_tasks(
        &dir,
        r#"[{"title": "Login flow", "complexity": 8, "subtasks": [
            {"title": "form"}, {"title": "session"}, {"title": "logout"}, {"title": "reset"}
        ]}]"#,
    );
    let out = taskmaster(&dir)
        .args(["--json", "create-tasks", "--title", "Login", "--file"])
        .arg(&file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(report["set"], "login");
    assert_eq!(report["decomposition"]["outcome"], "converged");
    assert_eq!(report["decomposition"]["splits"][0]["parent"], "T-001");

    let list = json_of(&dir, &["list-tasks"]);
    let ids: Vec<&str> = list["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["T-002", "T-003"]);
    for task in list["tasks"].as_array().unwrap() {
        assert!(task["complexity"].as_u64().unwrap() <= 4);
    }
}

#[test]
fn cycle_is_rejected_with_exit_code_3() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let file = write_tasks(
        &dir,
        r#"[
            {"title": "a", "complexity": 1, "blockedBy": ["T-002"]},
            {"title": "b", "complexity": 1, "blockedBy": ["T-001"]}
        ]"#,
    );
    taskmaster(&dir)
        .args(["create-tasks", "--title", "Loop", "--file"])
        .arg(&file)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("cycle"));

    taskmaster(&dir)
        .args(["--set", "loop", "list-tasks"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task set not found: loop"));
    let sets = json_of(&dir, &["sets"]);
    assert!(sets["sets"].as_array().unwrap().is_empty());
    assert!(!dir.path().join(".taskmaster/sets/loop").exists());
}

#[test]
fn dangling_reference_exits_with_code_4() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    let file = write_tasks(&dir, r#"[{"title": "a", "complexity": 1, "blockedBy": ["T-042"]}]"#);
    taskmaster(&dir)
        .args(["create-tasks", "--title", "Orphan", "--file"])
        .arg(&file)
        .assert()
        .code(4)
        .stderr(predicate::str::contains("T-042"));
    let sets = json_of(&dir, &["sets"]);
    assert!(sets["sets"].as_array().unwrap().is_empty());
}

#[test]
fn rejected_batch_leaves_existing_set_untouched() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    let file = write_tasks(&dir, r#"[{"title": "late", "complexity": 1, "blockedBy": ["T-042"]}]"#);
    taskmaster(&dir)
        .args(["create-tasks", "--file"])
        .arg(&file)
        .assert()
        .code(4);
    let list = json_of(&dir, &["list-tasks"]);
    assert_eq!(list["tasks"].as_array().unwrap().len(), 3);
}

#[test]
fn set_flag_rejects_path_like_slugs() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    taskmaster(&dir)
        .args(["--set", "../auth", "list-tasks"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid slug '../auth'"));
    taskmaster(&dir)
        .args(["--set", "../x", "create-tasks", "--file"])
        .arg(dir.path().join("tasks.json"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid slug"));
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[test]
fn next_task_prefers_quick_wins() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);

    let next = json_of(&dir, &["next-task"]);
    assert_eq!(next["selection"]["state"], "ready");
    assert_eq!(next["selection"]["task"]["id"], "T-003");
    assert_eq!(next["selection"]["candidates"], serde_json::json!(["T-003", "T-001"]));

    let next = json_of(&dir, &["next-task", "--strategy", "critical-path"]);
    assert_eq!(next["selection"]["task"]["id"], "T-001");
}

#[test]
fn start_with_unmet_dependency_exits_with_code_5() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    taskmaster(&dir)
        .args(["start-task", "T-002"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("T-001"));
}

#[test]
fn start_above_ceiling_exits_with_code_6() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    taskmaster(&dir)
        .args(["score-task", "T-001", "8"])
        .assert()
        .success()
        .stdout(predicate::str::contains("above ceiling"));
    taskmaster(&dir).args(["start-task", "T-001"]).assert().code(6);
}

#[test]
fn complete_unblocks_dependents() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    taskmaster(&dir).args(["start-task", "T-001"]).assert().success();

    let done = json_of(&dir, &["complete-task", "T-001", "--lint", "pass", "--tests", "pass"]);
    assert_eq!(done["completion"]["unblocked"], serde_json::json!(["T-002"]));
    assert_eq!(done["completion"]["task"]["status"], "completed");
    assert_eq!(done["completion"]["task"]["qualityGate"]["lint"], "pass");

    taskmaster(&dir).args(["start-task", "T-002"]).assert().success();
}

#[test]
fn failed_gate_blocks_completion_and_is_recorded() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    taskmaster(&dir).args(["start-task", "T-001"]).assert().success();
    taskmaster(&dir)
        .args(["complete-task", "T-001", "--tests", "fail"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("tests"));

    let task = json_of(&dir, &["show-task", "T-001"]);
    assert_eq!(task["status"], "in-progress");
    assert_eq!(task["qualityGate"]["tests"], "fail");

    taskmaster(&dir)
        .args(["complete-task", "T-001", "--tests", "pass"])
        .assert()
        .success();
}

#[test]
fn completing_pending_task_is_invalid_transition() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    taskmaster(&dir)
        .args(["complete-task", "T-003"])
        .assert()
        .code(5);
}

#[test]
fn hold_and_release_round_trip() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    taskmaster(&dir)
        .args(["hold-task", "T-003", "waiting", "on", "design"])
        .assert()
        .success()
        .stdout(predicate::str::contains("blocked: waiting on design"));
    let next = json_of(&dir, &["next-task"]);
    assert_eq!(next["selection"]["task"]["id"], "T-001");

    taskmaster(&dir).args(["release-task", "T-003"]).assert().success();
    let next = json_of(&dir, &["next-task"]);
    assert_eq!(next["selection"]["task"]["id"], "T-003");
}

#[test]
fn check_subtask_ticks_and_clears_items() {
    let dir = TempDir::new().unwrap();
    seed(
        &dir,
        r#"[{"title": "Login", "complexity": 3, "subtasks": [{"title": "form"}, {"title": "session"}]}]"#,
    );
    taskmaster(&dir)
        .args(["check-subtask", "T-001", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1/2 checklist items done"));
    let shown = json_of(&dir, &["show-task", "T-001"]);
    assert_eq!(shown["subtasks"][1]["completed"], true);

    taskmaster(&dir)
        .args(["check-subtask", "T-001", "2", "--undo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0/2 checklist items done"));

    taskmaster(&dir)
        .args(["check-subtask", "T-001", "3"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no item 3"));
}

#[test]
fn phase_boundary_waits_for_confirmation() {
    let dir = TempDir::new().unwrap();
    seed(
        &dir,
        r#"[
            {"title": "Scaffold", "complexity": 1, "phase": "setup"},
            {"title": "Feature", "complexity": 2, "phase": "core"}
        ]"#,
    );
    taskmaster(&dir).args(["start-task", "T-001"]).assert().success();
    taskmaster(&dir)
        .args(["complete-task", "T-001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("confirm-phase"));

    let next = json_of(&dir, &["next-task"]);
    assert_eq!(next["selection"]["state"], "awaiting-confirmation");
    assert_eq!(next["selection"]["boundary"]["from"], "setup");
    assert_eq!(next["selection"]["boundary"]["to"], "core");

    taskmaster(&dir)
        .arg("confirm-phase")
        .assert()
        .success()
        .stdout(predicate::str::contains("setup -> core"));
    let next = json_of(&dir, &["next-task"]);
    assert_eq!(next["selection"]["task"]["id"], "T-002");
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[test]
fn show_graph_reports_levels_and_critical_path() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    let graph = json_of(&dir, &["show-graph"]);
    assert_eq!(graph["graph"]["levels"][0]["tasks"], serde_json::json!(["T-001", "T-003"]));
    assert_eq!(
        graph["graph"]["critical_path"]["tasks"],
        serde_json::json!(["T-001", "T-002"])
    );
}

#[test]
fn validate_graph_repairs_missing_inverse_edges() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    let state = dir.path().join(".taskmaster/sets/auth/state.json");
    let mut raw: Value = serde_json::from_str(&std::fs::read_to_string(&state).unwrap()).unwrap();
    raw["tasks"][0]["blocks"] = serde_json::json!([]);
    std::fs::write(&state, serde_json::to_string_pretty(&raw).unwrap()).unwrap();

    let report = json_of(&dir, &["validate-graph"]);
    assert_eq!(report["valid"], true);
    assert_eq!(report["repairs"][0]["kind"], "added_inverse");
    assert_eq!(report["repairs"][0]["task"], "T-001");

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&state).unwrap()).unwrap();
    assert_eq!(raw["tasks"][0]["blocks"][0], "T-002");
}

#[test]
fn validate_graph_fix_cycles_breaks_cycle() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    let state = dir.path().join(".taskmaster/sets/auth/state.json");
    let mut raw: Value = serde_json::from_str(&std::fs::read_to_string(&state).unwrap()).unwrap();
    raw["tasks"][0]["blockedBy"] = serde_json::json!(["T-002"]);
    std::fs::write(&state, serde_json::to_string_pretty(&raw).unwrap()).unwrap();

    taskmaster(&dir).arg("next-task").assert().code(3);
    taskmaster(&dir).arg("validate-graph").assert().code(3);
    let report = json_of(&dir, &["validate-graph", "--fix-cycles"]);
    assert_eq!(report["removedEdges"].as_array().unwrap().len(), 1);
    taskmaster(&dir).arg("next-task").assert().success();
}

// ---------------------------------------------------------------------------
// Auto-loop
// ---------------------------------------------------------------------------

fn enable_loop_command(dir: &TempDir) {
    std::fs::write(
        dir.path().join(".taskmaster/config.yaml"),
        "auto_loop:\n  command: \"true\"\n",
    )
    .unwrap();
}

#[test]
fn loop_run_stops_at_max_iterations() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    enable_loop_command(&dir);

    taskmaster(&dir)
        .args(["loop", "start", "--max-iterations", "2"])
        .assert()
        .success();
    assert!(dir.path().join(".taskmaster/sets/auth/loop.json").exists());

    let report = json_of(&dir, &["loop", "run"]);
    assert_eq!(report["completed"], serde_json::json!(["T-003", "T-001"]));
    assert_eq!(report["outcome"]["reason"], "max-iterations-reached");
    assert!(!dir.path().join(".taskmaster/sets/auth/loop.json").exists());

    let task = json_of(&dir, &["show-task", "T-002"]);
    assert_eq!(task["status"], "pending");
}

#[test]
fn loop_run_requires_command() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    taskmaster(&dir).args(["loop", "start"]).assert().success();
    taskmaster(&dir)
        .args(["loop", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("auto_loop.command"));
}

#[test]
fn loop_run_without_loop_fails() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    enable_loop_command(&dir);
    taskmaster(&dir)
        .args(["loop", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no active auto-loop"));
}

#[test]
fn second_loop_start_is_refused() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    taskmaster(&dir).args(["loop", "start"]).assert().success();
    taskmaster(&dir)
        .args(["loop", "start"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already active"));
}

#[test]
fn cancel_loop_removes_metadata_only() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    taskmaster(&dir).args(["start-task", "T-003"]).assert().success();
    taskmaster(&dir).args(["loop", "start"]).assert().success();

    taskmaster(&dir).arg("cancel-loop").assert().success();
    let status = json_of(&dir, &["loop", "status"]);
    assert_eq!(status["active"], false);

    let task = json_of(&dir, &["show-task", "T-003"]);
    assert_eq!(task["status"], "in-progress");

    taskmaster(&dir).arg("cancel-loop").assert().failure();
}

// ---------------------------------------------------------------------------
// Sets / config
// ---------------------------------------------------------------------------

#[test]
fn several_sets_need_explicit_set_flag() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    let file = write_tasks(&dir, r#"[{"title": "Invoice", "complexity": 2}]"#);
    taskmaster(&dir)
        .args(["create-tasks", "--title", "Billing", "--file"])
        .arg(&file)
        .assert()
        .success();

    taskmaster(&dir)
        .arg("list-tasks")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--set"));
    let list = json_of(&dir, &["--set", "billing", "list-tasks"]);
    assert_eq!(list["tasks"][0]["title"], "Invoice");
}

#[test]
fn run_gates_requires_configured_commands() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    taskmaster(&dir).args(["start-task", "T-003"]).assert().success();
    taskmaster(&dir)
        .args(["run-gates", "T-003"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no quality gates configured"));
}

#[test]
fn run_gates_records_outcomes() {
    let dir = TempDir::new().unwrap();
    seed(&dir, CHAIN);
    std::fs::write(
        dir.path().join(".taskmaster/config.yaml"),
        "quality_gates:\n  lint: \"true\"\n  tests: \"false\"\n",
    )
    .unwrap();
    taskmaster(&dir).args(["start-task", "T-003"]).assert().success();
    taskmaster(&dir).args(["run-gates", "T-003"]).assert().code(7);

    let task = json_of(&dir, &["show-task", "T-003"]);
    assert_eq!(task["qualityGate"]["lint"], "pass");
    assert_eq!(task["qualityGate"]["tests"], "fail");
    assert!(task["qualityGate"]["typecheck"].is_null());
}

#[test]
fn config_validate_flags_errors() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    taskmaster(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No warnings"));

    std::fs::write(
        dir.path().join(".taskmaster/config.yaml"),
        "auto_loop:\n  max_iterations: 0\n",
    )
    .unwrap();
    taskmaster(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("max_iterations"));
}
