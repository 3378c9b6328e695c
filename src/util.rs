use std::env;
use std::io::{Read, Write};
use std::process::{Command as ProcessCommand, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const STREAM_CAP_BYTES: usize = 256 * 1024;
const CHILD_POLL_SLEEP_MS: u64 = 10;

pub(crate) fn log_info(component: &str, msg: &str) {
    eprintln!("[{component}] {msg}");
}

pub(crate) fn log_warn(component: &str, msg: &str) {
    eprintln!("[{component}] warning: {msg}");
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Short hex fingerprint of a secret, for rate-limit keys and logs.
/// Never log or key on the secret itself.
pub(crate) fn fingerprint_hex(bytes: &[u8]) -> String {
    let hash = blake3::hash(bytes);
    hash.to_hex()[..16].to_string()
}

/// Read a request body up to `max_bytes`, rejecting anything larger before
/// it is buffered in full.
pub(crate) fn read_body_capped(reader: &mut dyn Read, max_bytes: usize) -> Result<String, String> {
    let mut limited = reader.take(max_bytes as u64 + 1);
    let mut buf = Vec::new();
    limited
        .read_to_end(&mut buf)
        .map_err(|e| format!("read body: {e}"))?;
    if buf.len() > max_bytes {
        return Err(format!("request body exceeds {max_bytes} bytes"));
    }
    String::from_utf8(buf).map_err(|_| "request body is not valid utf-8".to_string())
}

pub(crate) fn command_wrapper() -> Option<Vec<String>> {
    env_optional("NEXUSGATE_COMMAND_WRAPPER").map(|raw| {
        raw.split_whitespace()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
    })
}

pub(crate) fn build_external_command(program: &str, args: &[String]) -> ProcessCommand {
    let mut cmd = if let Some(wrapper) = command_wrapper() {
        let mut c = ProcessCommand::new(&wrapper[0]);
        c.args(&wrapper[1..]).arg(program).args(args);
        c
    } else {
        let mut c = ProcessCommand::new(program);
        c.args(args);
        c
    };

    // Process group isolation: the child becomes its own process group leader
    // so the entire tree can be killed without affecting the gateway.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    cmd
}

/// Kill a child process and its entire process group.
/// On Unix, sends SIGTERM first for graceful shutdown, then SIGKILL after 2 seconds.
#[cfg(unix)]
pub(crate) fn kill_process_tree(child: &mut std::process::Child) {
    let pid = child.id() as i32;
    unsafe {
        libc::kill(-pid, libc::SIGTERM);
    }
    std::thread::sleep(std::time::Duration::from_secs(2));
    match child.try_wait() {
        Ok(Some(_)) => {}
        _ => unsafe {
            libc::killpg(pid, libc::SIGKILL);
        },
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
pub(crate) fn kill_process_tree(child: &mut std::process::Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[derive(Debug)]
pub(crate) struct CommandCapture {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) exit: serde_json::Value,
    pub(crate) success: bool,
    pub(crate) timed_out: bool,
}

fn capture_stream(mut reader: impl Read) -> (Vec<u8>, bool) {
    let mut captured: Vec<u8> = Vec::new();
    let mut truncated = false;
    let mut buffer = [0_u8; 4096];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                let remaining = STREAM_CAP_BYTES.saturating_sub(captured.len());
                if remaining > 0 {
                    let take = remaining.min(n);
                    captured.extend_from_slice(&buffer[..take]);
                    if n > take {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    (captured, truncated)
}

/// Run an external command with optional JSON on stdin, a wall-clock timeout,
/// and capped stdout/stderr capture.
pub(crate) fn run_captured_command(
    command: &[String],
    cwd: Option<&std::path::Path>,
    stdin_payload: Option<&serde_json::Value>,
    timeout_ms: u64,
) -> Result<CommandCapture, String> {
    if command.is_empty() {
        return Err("command is empty".to_string());
    }
    let mut cmd = build_external_command(&command[0], &command[1..]);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| format!("spawn failed: {e}"))?;
    if let Some(mut stdin) = child.stdin.take() {
        if let Some(payload) = stdin_payload {
            let bytes = serde_json::to_vec(payload).map_err(|e| format!("encode stdin: {e}"))?;
            stdin
                .write_all(&bytes)
                .and_then(|_| stdin.flush())
                .map_err(|e| format!("write stdin: {e}"))?;
        }
        // Dropping stdin closes the pipe either way.
    }

    let start = Instant::now();
    let timeout = Duration::from_millis(timeout_ms.max(1));
    let mut stdout_handle = child
        .stdout
        .take()
        .map(|stdout| thread::spawn(move || capture_stream(stdout)));
    let mut stderr_handle = child
        .stderr
        .take()
        .map(|stderr| thread::spawn(move || capture_stream(stderr)));

    let mut timed_out = false;
    let status = loop {
        if start.elapsed() >= timeout {
            timed_out = true;
            kill_process_tree(&mut child);
            break child.try_wait().ok().flatten();
        }
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => thread::sleep(Duration::from_millis(CHILD_POLL_SLEEP_MS)),
            Err(_) => {
                kill_process_tree(&mut child);
                break None;
            }
        }
    };

    let collect = |handle: &mut Option<thread::JoinHandle<(Vec<u8>, bool)>>| -> (Vec<u8>, bool) {
        handle
            .take()
            .and_then(|join| join.join().ok())
            .unwrap_or_else(|| (Vec::new(), false))
    };
    let (stdout, stdout_truncated) = collect(&mut stdout_handle);
    let (stderr, _stderr_truncated) = collect(&mut stderr_handle);

    let mut stdout = String::from_utf8_lossy(&stdout).to_string();
    if stdout_truncated {
        stdout.push_str("\n[output truncated]");
    }
    let stderr = String::from_utf8_lossy(&stderr).to_string();

    let (exit, success) = match status {
        Some(status) => (subprocess_exit_info(&status), status.success() && !timed_out),
        None => (serde_json::json!("unknown"), false),
    };

    Ok(CommandCapture {
        stdout,
        stderr,
        exit,
        success,
        timed_out,
    })
}

/// Build a descriptive exit code value for subprocess results.
/// On Unix, reports the signal number when a process is killed by a signal.
pub(crate) fn subprocess_exit_info(status: &std::process::ExitStatus) -> serde_json::Value {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            serde_json::json!(code)
        } else if let Some(sig) = status.signal() {
            serde_json::json!(format!("signal {sig}"))
        } else {
            serde_json::json!("unknown")
        }
    }
    #[cfg(not(unix))]
    {
        serde_json::json!(status.code())
    }
}

/// Build primary output text for subprocess results, surfacing stderr when relevant.
pub(crate) fn subprocess_output_text(stdout: &str, stderr: &str, is_error: bool) -> String {
    if is_error {
        let mut out = String::new();
        if !stdout.is_empty() {
            out.push_str(stdout);
        }
        if !stderr.is_empty() {
            if !out.is_empty() {
                out.push_str("\n--- stderr ---\n");
            }
            out.push_str(stderr);
        }
        if out.is_empty() {
            "Command failed with no output.".to_string()
        } else {
            out
        }
    } else if stdout.is_empty() && !stderr.is_empty() {
        // Some tools write informational output to stderr even on success
        stderr.to_string()
    } else if stdout.is_empty() {
        "Command executed.".to_string()
    } else {
        stdout.to_string()
    }
}
