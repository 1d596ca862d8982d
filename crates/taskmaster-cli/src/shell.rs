use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Output kept from a command, in bytes (the tail is kept).
const MAX_OUTPUT: usize = 10 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct ShellResult {
    pub name: String,
    pub passed: bool,
    pub output: String,
    pub duration_ms: u64,
}

fn shell() -> anyhow::Result<PathBuf> {
    which::which("sh").context("no 'sh' found on PATH; quality gates need a POSIX shell")
}

/// Run `command` through `sh -c` in `cwd` with an optional timeout.
///
/// stdout and stderr are drained on their own threads so a chatty command
/// cannot fill a pipe and stall; the wait happens on a third thread so the
/// timeout is a plain `recv_timeout`.
pub fn run(
    name: &str,
    command: &str,
    cwd: &Path,
    env: &[(&str, String)],
    timeout: Option<Duration>,
) -> anyhow::Result<ShellResult> {
    let start = Instant::now();
    let finish = |passed: bool, output: String| ShellResult {
        name: name.to_string(),
        passed,
        output,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    if command.trim().is_empty() {
        return Ok(finish(false, "command is empty".to_string()));
    }

    let mut cmd = Command::new(shell()?);
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        cmd.env(key, value);
    }
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return Ok(finish(false, format!("failed to spawn: {e}"))),
    };
    let child_pid = child.id();

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_thread = std::thread::spawn(move || read_all(stdout_handle));
    let stderr_thread = std::thread::spawn(move || read_all(stderr_handle));

    let wait_result = match timeout {
        None => child.wait(),
        Some(limit) => {
            let (tx, rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let _ = tx.send(child.wait());
            });
            match rx.recv_timeout(limit) {
                Ok(result) => result,
                Err(_) => {
                    kill_process(child_pid);
                    tracing::warn!(gate = %name, secs = limit.as_secs(), "command timed out");
                    return Ok(finish(
                        false,
                        format!("timed out after {}s", limit.as_secs()),
                    ));
                }
            }
        }
    };

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();
    let status = match wait_result {
        Ok(s) => s,
        Err(e) => return Ok(finish(false, format!("wait failed: {e}"))),
    };
    Ok(finish(status.success(), combine_output(&stdout, &stderr)))
}

fn read_all<R: std::io::Read>(handle: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut r) = handle {
        let _ = r.read_to_string(&mut buf);
    }
    buf
}

/// Join stdout and stderr and keep at most the last [`MAX_OUTPUT`] bytes.
fn combine_output(stdout: &str, stderr: &str) -> String {
    let output = match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (false, false) => format!("{stdout}\n{stderr}"),
    };
    let trimmed = output.trim();
    if trimmed.len() <= MAX_OUTPUT {
        return trimmed.to_string();
    }
    let mut cut = trimmed.len() - MAX_OUTPUT;
    while !trimmed.is_char_boundary(cut) {
        cut += 1;
    }
    trimmed[cut..].to_string()
}

/// SIGKILL by pid. Best-effort.
fn kill_process(pid: u32) {
    let _ = Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}
