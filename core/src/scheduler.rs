//! Recurring-command scheduler. Each task owns a runner loop that
//! sleeps in one-second ticks (so deactivation is prompt), re-checks the
//! kill switch before every execution, and records a bounded history.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::info;

use deskpilot_protocol::ScheduleTaskParams;
use deskpilot_protocol::ShellKind;

use crate::error::Result;
use crate::error::ToolError;
use crate::safety::SafetyEngine;
use crate::system::run_shell_command;
use crate::util::now_iso;
use crate::util::truncate_chars;

const MIN_INTERVAL_SECS: u64 = 10;
const RUN_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_HISTORY: usize = 200;

struct ScheduledTask {
    command: String,
    interval_seconds: u64,
    shell: ShellKind,
    max_runs: Option<u32>,
    created: String,
    active: Arc<AtomicBool>,
    run_count: Arc<AtomicU32>,
}

pub struct TaskScheduler {
    safety: Arc<SafetyEngine>,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    history: Arc<Mutex<VecDeque<JsonValue>>>,
}

fn push_history(history: &Mutex<VecDeque<JsonValue>>, entry: JsonValue) {
    if let Ok(mut history) = history.lock() {
        history.push_back(entry);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }
}

impl TaskScheduler {
    pub fn new(safety: Arc<SafetyEngine>) -> Self {
        Self {
            safety,
            tasks: Mutex::new(HashMap::new()),
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn schedule(&self, params: &ScheduleTaskParams) -> Result<JsonValue> {
        if params.interval_seconds < MIN_INTERVAL_SECS {
            return Err(ToolError::invalid(format!(
                "Minimum interval is {MIN_INTERVAL_SECS} seconds"
            )));
        }
        {
            let tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            if tasks.contains_key(&params.name) {
                return Err(ToolError::invalid(format!(
                    "Task '{}' already exists. Remove it first.",
                    params.name
                )));
            }
        }

        let active = Arc::new(AtomicBool::new(true));
        let run_count = Arc::new(AtomicU32::new(0));

        let task = ScheduledTask {
            command: params.command.clone(),
            interval_seconds: params.interval_seconds,
            shell: params.shell,
            max_runs: params.max_runs,
            created: now_iso(),
            active: Arc::clone(&active),
            run_count: Arc::clone(&run_count),
        };

        tokio::spawn(runner_loop(
            params.name.clone(),
            params.command.clone(),
            params.interval_seconds,
            params.shell,
            params.max_runs,
            active,
            run_count,
            Arc::clone(&self.safety),
            Arc::clone(&self.history),
        ));

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(params.name.clone(), task);
        }
        info!(
            "scheduled task '{}': '{}' every {}s",
            params.name, params.command, params.interval_seconds
        );

        Ok(json!({
            "success": true,
            "task": params.name,
            "command": params.command,
            "interval_seconds": params.interval_seconds,
            "max_runs": params.max_runs,
            "next_run_in": format!("{} seconds", params.interval_seconds),
        }))
    }

    pub fn list(&self) -> Result<JsonValue> {
        let tasks: Vec<JsonValue> = self
            .tasks
            .lock()
            .map(|tasks| {
                tasks
                    .iter()
                    .map(|(name, task)| {
                        json!({
                            "name": name,
                            "command": task.command,
                            "interval_seconds": task.interval_seconds,
                            "shell": task.shell.to_string(),
                            "active": task.active.load(Ordering::Relaxed),
                            "run_count": task.run_count.load(Ordering::Relaxed),
                            "max_runs": task.max_runs,
                            "created": task.created,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(json!({"tasks": tasks, "count": tasks.len()}))
    }

    pub fn remove(&self, task_name: &str) -> Result<JsonValue> {
        let removed = self
            .tasks
            .lock()
            .ok()
            .and_then(|mut tasks| tasks.remove(task_name));
        let Some(task) = removed else {
            return Err(ToolError::invalid(format!("Task '{task_name}' not found")));
        };
        task.active.store(false, Ordering::Relaxed);
        info!("removed scheduled task: {task_name}");
        Ok(json!({
            "success": true,
            "task": task_name,
            "action": "removed",
        }))
    }

    pub fn history(&self, task_name: Option<&str>, limit: usize) -> Result<JsonValue> {
        let entries: Vec<JsonValue> = self
            .history
            .lock()
            .map(|history| {
                history
                    .iter()
                    .filter(|e| task_name.map(|n| e["task"] == json!(n)).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let total = entries.len();
        let tail: Vec<JsonValue> = entries
            .into_iter()
            .skip(total.saturating_sub(limit))
            .collect();
        Ok(json!({"history": tail, "total": total}))
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .map(|tasks| {
                tasks
                    .values()
                    .filter(|t| t.active.load(Ordering::Relaxed))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Deactivate every runner; wired to kill-driven shutdown.
    pub fn stop_all(&self) {
        if let Ok(tasks) = self.tasks.lock() {
            for task in tasks.values() {
                task.active.store(false, Ordering::Relaxed);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn runner_loop(
    name: String,
    command: String,
    interval_seconds: u64,
    shell: ShellKind,
    max_runs: Option<u32>,
    active: Arc<AtomicBool>,
    run_count: Arc<AtomicU32>,
    safety: Arc<SafetyEngine>,
    history: Arc<Mutex<VecDeque<JsonValue>>>,
) {
    loop {
        if let Some(max) = max_runs {
            if run_count.load(Ordering::Relaxed) >= max {
                active.store(false, Ordering::Relaxed);
                return;
            }
        }

        // Sleep the interval in one-second ticks so a removed task stops
        // waiting promptly.
        for _ in 0..interval_seconds {
            if !active.load(Ordering::Relaxed) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        if !active.load(Ordering::Relaxed) {
            return;
        }

        // Kill state is re-checked before every execution.
        if safety.is_killed() {
            push_history(
                &history,
                json!({
                    "task": name,
                    "error": "kill switch active - execution skipped",
                    "timestamp": now_iso(),
                }),
            );
            continue;
        }

        match run_shell_command(shell, &command, RUN_TIMEOUT).await {
            Ok(output) => {
                let run_number = run_count.fetch_add(1, Ordering::Relaxed) + 1;
                push_history(
                    &history,
                    json!({
                        "task": name,
                        "command": command,
                        "exit_code": output.exit_code,
                        "stdout": truncate_chars(output.stdout.trim(), 500),
                        "stderr": truncate_chars(output.stderr.trim(), 200),
                        "success": output.exit_code == 0,
                        "run_number": run_number,
                        "timestamp": now_iso(),
                    }),
                );
            }
            Err(e) => {
                push_history(
                    &history,
                    json!({
                        "task": name,
                        "error": e.message,
                        "timestamp": now_iso(),
                    }),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::config::Config;
    use pretty_assertions::assert_eq;
    use std::sync::RwLock;

    fn scheduler() -> TaskScheduler {
        let config = Arc::new(RwLock::new(Config::default()));
        TaskScheduler::new(Arc::new(SafetyEngine::new(config)))
    }

    fn params(name: &str, command: &str, interval: u64) -> ScheduleTaskParams {
        ScheduleTaskParams {
            name: name.to_string(),
            command: command.to_string(),
            interval_seconds: interval,
            shell: ShellKind::Sh,
            max_runs: Some(1),
        }
    }

    #[tokio::test]
    async fn interval_below_minimum_is_rejected() {
        let scheduler = scheduler();
        let err = scheduler.schedule(&params("fast", "echo hi", 5)).unwrap_err();
        assert!(err.message.contains("Minimum interval"));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let scheduler = scheduler();
        scheduler.schedule(&params("job", "echo hi", 60)).unwrap();
        let err = scheduler.schedule(&params("job", "echo hi", 60)).unwrap_err();
        assert!(err.message.contains("already exists"));
        scheduler.remove("job").unwrap();
    }

    #[tokio::test]
    async fn remove_deactivates_the_runner() {
        let scheduler = scheduler();
        scheduler.schedule(&params("job", "echo hi", 60)).unwrap();
        assert_eq!(scheduler.active_count(), 1);
        scheduler.remove("job").unwrap();
        assert_eq!(scheduler.active_count(), 0);
        let err = scheduler.remove("job").unwrap_err();
        assert!(err.message.contains("not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn kill_switch_skips_execution_with_a_history_entry() {
        let config = Arc::new(RwLock::new(Config::default()));
        let safety = Arc::new(SafetyEngine::new(config));
        let scheduler = TaskScheduler::new(Arc::clone(&safety));

        scheduler
            .schedule(&params("guarded", "echo scheduler_ok", 10))
            .unwrap();
        safety.activate_kill();

        // Advance paused time past the first interval.
        for _ in 0..15 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tokio::task::yield_now().await;

        let history = scheduler.history(Some("guarded"), 10).unwrap();
        let entries = history["history"].as_array().unwrap().clone();
        assert!(!entries.is_empty());
        assert!(
            entries
                .iter()
                .all(|e| e["error"].as_str().unwrap_or("").contains("kill switch active"))
        );
        scheduler.remove("guarded").unwrap();
    }

    #[tokio::test]
    async fn max_runs_limits_executions() {
        let scheduler = scheduler();
        scheduler
            .schedule(&ScheduleTaskParams {
                name: "once".to_string(),
                command: "echo scheduler_ok".to_string(),
                interval_seconds: 10,
                shell: ShellKind::Sh,
                max_runs: Some(1),
            })
            .unwrap();

        // Real time: wait out one interval plus slack for the run.
        for _ in 0..140 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let history = scheduler.history(Some("once"), 10).unwrap();
            if history["total"] != json!(0) {
                break;
            }
        }

        let history = scheduler.history(Some("once"), 10).unwrap();
        let entries = history["history"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0]["stdout"].as_str().unwrap().contains("scheduler_ok"));
        assert_eq!(entries[0]["run_number"], json!(1));
    }
}
