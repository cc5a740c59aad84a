// portal-watch: CLI for controlling portal-watch-daemon
//
// Commands:
//   portal-watch start
//   portal-watch stop
//   portal-watch status [--json]

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use portal_watch_lib::monitor::{
    config::RuntimePaths,
    persistence::{MonitorStatus, StatusFile},
    runner::CycleOutcome,
};
use std::{
    env,
    path::PathBuf,
    process::{Command, Stdio},
    thread,
    time::Duration,
};

const DAEMON_BIN: &str = "portal-watch-daemon";
const START_WAIT_ATTEMPTS: u32 = 50;
const STOP_WAIT_ATTEMPTS: u32 = 100;
const POLL_DELAY: Duration = Duration::from_millis(100);

fn print_help() {
    println!(
        r#"portal-watch - watch the placement portal for new companies

USAGE:
    portal-watch <COMMAND> [OPTIONS]

COMMANDS:
    start       Start the daemon in the background
    stop        Stop the daemon after its current cycle
    status      Show what the daemon last did
    help        Show this help message

OPTIONS:
    --json      Output status as JSON

CONFIGURATION:
    The daemon reads its settings from the environment (and from .env in
    the working directory). Required: PORTAL_USERNAME, PORTAL_PASSWORD and,
    for email alerts, EMAIL_FROM, EMAIL_TO, EMAIL_PASSWORD.
    Runtime files live in PORTAL_WATCH_DIR (default ~/.portal-watch).
"#
    );
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let json_output = args[2..].iter().any(|a| a == "--json");
    let paths = RuntimePaths::from_env();

    match args[1].as_str() {
        "start" => start(&paths),
        "stop" => stop(&paths),
        "status" => status(&paths, json_output),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n", other);
            print_help();
            std::process::exit(1);
        }
    }
}

fn start(paths: &RuntimePaths) -> Result<()> {
    if paths.is_daemon_running() {
        println!("Daemon already running (PID: {})", paths.read_pid().unwrap_or_default());
        return Ok(());
    }

    let daemon_path = resolve_daemon_path()
        .ok_or_else(|| anyhow!("Could not find {} next to this executable", DAEMON_BIN))?;

    let mut child = Command::new(&daemon_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start daemon at {}", daemon_path.display()))?;

    for _ in 0..START_WAIT_ATTEMPTS {
        thread::sleep(POLL_DELAY);
        if paths.is_daemon_running() {
            println!("Daemon started (PID: {})", child.id());
            return Ok(());
        }
        // Exited before taking the lock: bad configuration or another instance
        if let Some(exit) = child.try_wait()? {
            bail!(
                "Daemon exited during startup ({}). Run {} directly to see the error.",
                exit,
                DAEMON_BIN
            );
        }
    }

    bail!(
        "Timed out waiting for daemon to start. PID file not found at: {}",
        paths.pid_file.display()
    )
}

fn stop(paths: &RuntimePaths) -> Result<()> {
    let Some(pid) = paths.read_pid().filter(|_| paths.is_daemon_running()) else {
        println!("Daemon not running");
        return Ok(());
    };

    send_terminate(pid)?;
    println!("Stop requested (PID: {}), waiting for the current cycle to finish...", pid);

    for _ in 0..STOP_WAIT_ATTEMPTS {
        thread::sleep(POLL_DELAY);
        if !paths.is_daemon_running() {
            println!("Daemon stopped");
            return Ok(());
        }
    }

    println!("Daemon is still finishing its cycle; it will exit on its own");
    Ok(())
}

fn status(paths: &RuntimePaths, json_output: bool) -> Result<()> {
    let running = paths.is_daemon_running();
    let status = StatusFile::new(&paths.status_file).read()?;

    if json_output {
        let value = serde_json::json!({
            "running": running,
            "pid": paths.read_pid().filter(|_| running),
            "status": status,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if running {
        println!("Daemon running (PID: {})", paths.read_pid().unwrap_or_default());
    } else {
        println!("Daemon not running");
    }

    match status {
        Some(status) => print_status(&status),
        None => println!("No status recorded yet ({})", paths.status_file.display()),
    }
    Ok(())
}

fn print_status(status: &MonitorStatus) {
    println!(
        "Started:      {}",
        status.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "Last update:  {}",
        status.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    println!("Cycles:       {}", status.cycles);
    println!("Session:      {:?}", status.session);
    if status.has_baseline {
        println!("Baseline:     {} companies", status.baseline_len);
    } else {
        println!("Baseline:     not yet established");
    }
    if status.consecutive_failures > 0 {
        println!("Failures:     {} in a row", status.consecutive_failures);
    }
    if let Some(outcome) = &status.last_outcome {
        println!("Last cycle:   {}", describe_outcome(outcome));
    }
}

fn describe_outcome(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::AuthFailed { error } => format!("login failed: {}", error),
        CycleOutcome::FetchFailed {
            error,
            recovered: Some(true),
        } => format!("fetch failed ({}), session re-established", error),
        CycleOutcome::FetchFailed {
            error,
            recovered: Some(false),
        } => format!("fetch failed ({}), re-login failed", error),
        CycleOutcome::FetchFailed {
            error,
            recovered: None,
        } => format!("fetch failed: {}", error),
        CycleOutcome::BaselineEstablished { items } => {
            format!("baseline established with {} companies", items)
        }
        CycleOutcome::NoChange => "no new companies".to_string(),
        CycleOutcome::Notified { count } => format!("alerted on {} new companies", count),
        CycleOutcome::DeliveryFailed {
            count,
            committed,
            error,
        } => format!(
            "alert for {} companies failed ({}); {}",
            count,
            error,
            if *committed {
                "baseline advanced"
            } else {
                "will retry next cycle"
            }
        ),
    }
}

fn resolve_daemon_path() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    let candidate = exe.parent()?.join(DAEMON_BIN);
    candidate.exists().then_some(candidate)
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<()> {
    let pid = i32::try_from(pid)
        .ok()
        .filter(|&pid| pid > 0)
        .ok_or_else(|| anyhow!("Refusing to signal invalid PID {}", pid))?;
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("Failed to signal daemon (PID: {})", pid));
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_terminate(_pid: u32) -> Result<()> {
    bail!("Stopping the daemon is only supported on Unix")
}
