// Command-line front end for the agent relay core.
//
// Reads task lines, submits them through the dispatcher, waits for the
// system to drain, prints a status summary, and stops all sessions.
// Exit codes: 0 success, 1 at least one task failed, 2 fatal persistence
// or configuration error.

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use agent_relay::{
    AgentIdentity, Dispatcher, RelayConfig, RelayError, SystemSnapshot, DEFAULT_ROLES,
};

#[derive(Parser, Debug)]
#[command(name = "agent-relay", version, about = "Dispatch tasks to cooperating agent sessions")]
struct Cli {
    /// Path of the append-only journal file
    #[arg(long, default_value = "agent-relay.jsonl")]
    journal: PathBuf,

    /// Bound on concurrently live sessions
    #[arg(long, default_value_t = 10)]
    max_sessions: usize,

    /// Host program spawned per session
    #[arg(long, default_value = "agent-relay-host")]
    host: String,

    /// Host program argument; repeatable, `{identity}` is substituted
    #[arg(long = "host-arg")]
    host_args: Vec<String>,

    /// Task file with one `identity: payload` (or tab-separated) line each;
    /// stdin when omitted
    #[arg(long)]
    tasks: Option<PathBuf>,

    /// Eagerly start sessions for the default role set
    #[arg(long)]
    prestart: bool,

    /// Seconds an idle session may live before being stopped
    #[arg(long, default_value_t = 60)]
    idle_timeout: u64,

    /// Seconds to wait for the system to drain before giving up
    #[arg(long, default_value_t = 300)]
    drain_timeout: u64,

    /// Print the final snapshot as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("agent-relay: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> agent_relay::Result<ExitCode> {
    let config = RelayConfig::builder()
        .journal_path(cli.journal)
        .max_concurrent_sessions(cli.max_sessions)
        .host_program(cli.host)
        .host_args(cli.host_args)
        .idle_timeout(Duration::from_secs(cli.idle_timeout))
        .build()?;

    let dispatcher = Dispatcher::new(config)?;

    if cli.prestart {
        let roles = DEFAULT_ROLES.into_iter().map(AgentIdentity::from).collect();
        dispatcher.prestart(roles).await?;
    }

    let submitted = submit_tasks(&dispatcher, cli.tasks.as_deref()).await?;
    log::info!("{submitted} task(s) submitted");

    let snapshot = wait_for_drain(&dispatcher, Duration::from_secs(cli.drain_timeout)).await?;
    dispatcher.stop_all().await?;

    let final_snapshot = dispatcher.status().await?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&final_snapshot).map_err(RelayError::JsonDecode)?
        );
    } else {
        print_summary(&final_snapshot);
    }

    if !snapshot.is_drained() {
        log::warn!(
            "{} task(s) still pending at drain timeout",
            snapshot.queued + snapshot.dispatched
        );
    }

    if final_snapshot.failed > 0 {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Submit every parseable task line from the file or stdin
async fn submit_tasks(
    dispatcher: &Dispatcher,
    tasks: Option<&std::path::Path>,
) -> agent_relay::Result<usize> {
    let lines: Vec<String> = match tasks {
        Some(path) => {
            let file = std::fs::File::open(path)?;
            std::io::BufReader::new(file)
                .lines()
                .collect::<std::io::Result<_>>()?
        }
        None => std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<_>>()?,
    };

    let mut submitted = 0;
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_task_line(line) {
            Some((target, payload)) => {
                dispatcher.submit(target, payload).await?;
                submitted += 1;
            }
            None => log::warn!("Skipping unparseable task line: {line}"),
        }
    }
    Ok(submitted)
}

/// Parse `identity<TAB>payload` or `identity: payload`
fn parse_task_line(line: &str) -> Option<(AgentIdentity, String)> {
    let (identity, payload) = line
        .split_once('\t')
        .or_else(|| line.split_once(": "))?;
    let identity = identity.trim();
    let payload = payload.trim();
    if identity.is_empty() || payload.is_empty() {
        return None;
    }
    Some((AgentIdentity::from(identity), payload.to_string()))
}

/// Poll status until no task is queued or in flight
async fn wait_for_drain(
    dispatcher: &Dispatcher,
    timeout: Duration,
) -> agent_relay::Result<SystemSnapshot> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = dispatcher.status().await?;
        if snapshot.is_drained() || tokio::time::Instant::now() >= deadline {
            return Ok(snapshot);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn print_summary(snapshot: &SystemSnapshot) {
    println!(
        "tasks: {} delivered, {} failed, {} queued, {} in flight",
        snapshot.delivered, snapshot.failed, snapshot.queued, snapshot.dispatched
    );
    println!(
        "sessions: {} live (bound {})",
        snapshot.live_sessions, snapshot.max_concurrent_sessions
    );
    for (identity, agent) in &snapshot.agents {
        let last_seen = agent
            .last_seen
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {identity}: {} ({} delivered, {} failed, last seen {last_seen})",
            agent.state, agent.delivered, agent.failed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tab_separated_lines() {
        let (identity, payload) = parse_task_line("worker1\tdo the thing").unwrap();
        assert_eq!(identity.as_str(), "worker1");
        assert_eq!(payload, "do the thing");
    }

    #[test]
    fn parses_colon_separated_lines() {
        let (identity, payload) = parse_task_line("boss1: plan the sprint").unwrap();
        assert_eq!(identity.as_str(), "boss1");
        assert_eq!(payload, "plan the sprint");
    }

    #[test]
    fn rejects_lines_without_separator() {
        assert!(parse_task_line("just some words").is_none());
        assert!(parse_task_line("worker1:").is_none());
        assert!(parse_task_line(": payload").is_none());
    }
}
