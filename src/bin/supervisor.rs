//! Supervisor process (SPEC_FULL.md §4.10): spawns the `gateway` child,
//! tails its stderr for crash signatures, restarts with back-off, and
//! replays journaled in-flight requests once the child is healthy again.
//! No teacher exemplar for process supervision existed; grounded on the
//! teacher's `shutdown_signal`/`tokio::select!` process-lifecycle idiom and
//! generalized to a child-process state machine.

use std::{
    collections::VecDeque,
    path::PathBuf,
    process::Stdio,
    time::{Duration, Instant},
};

use anyhow::Context;
use llm_gateway::journal::{Journal, JournalStatus};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
};
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct SupervisorConfig {
    restart_delay_secs: u64,
    restart_window_secs: u64,
    max_restarts: u32,
    startup_delay_secs: u64,
    memory_soft_limit_gb: f64,
    crash_signatures: Vec<String>,
    gateway_bin: PathBuf,
    health_url: String,
    journal_dir: PathBuf,
}

impl SupervisorConfig {
    fn from_env() -> anyhow::Result<Self> {
        let mut config = Self {
            restart_delay_secs: env_parsed("SUPERVISOR_RESTART_DELAY_SECS", 2),
            restart_window_secs: env_parsed("SUPERVISOR_RESTART_WINDOW_SECS", 300),
            max_restarts: env_parsed("SUPERVISOR_MAX_RESTARTS", 5),
            startup_delay_secs: env_parsed("SUPERVISOR_STARTUP_DELAY_SECS", 3),
            memory_soft_limit_gb: env_parsed("SUPERVISOR_MEMORY_SOFT_LIMIT_GB", 20.0),
            crash_signatures: default_crash_signatures(),
            gateway_bin: std::env::var("SUPERVISOR_GATEWAY_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("gateway")),
            health_url: format!(
                "http://127.0.0.1:{}/healthz",
                std::env::var("SERVER_PORT").unwrap_or_else(|_| "8555".into())
            ),
            journal_dir: PathBuf::from(std::env::var("JOURNAL_DIR").unwrap_or_else(|_| "./queue".into())),
        };

        if let Ok(raw) = std::env::var("SUPERVISOR_CRASH_SIGNATURES") {
            let parsed: Vec<String> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
            if !parsed.is_empty() {
                config.crash_signatures = parsed;
            }
        }

        if let Some(path) = config_file_path() {
            config.apply_toml_override(&path)?;
        }

        Ok(config)
    }

    /// Merge an optional TOML settings file over the `SUPERVISOR_*` env
    /// defaults, for operators who prefer a file to an environment block.
    fn apply_toml_override(&mut self, path: &PathBuf) -> anyhow::Result<()> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read supervisor config file {}", path.display()))?;
        let table: TomlOverride = toml::from_str(&raw)
            .with_context(|| format!("failed to parse supervisor config file {}", path.display()))?;

        if let Some(v) = table.restart_delay_secs {
            self.restart_delay_secs = v;
        }
        if let Some(v) = table.restart_window_secs {
            self.restart_window_secs = v;
        }
        if let Some(v) = table.max_restarts {
            self.max_restarts = v;
        }
        if let Some(v) = table.startup_delay_secs {
            self.startup_delay_secs = v;
        }
        if let Some(v) = table.memory_soft_limit_gb {
            self.memory_soft_limit_gb = v;
        }
        if let Some(v) = table.crash_signatures {
            self.crash_signatures = v;
        }
        Ok(())
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct TomlOverride {
    restart_delay_secs: Option<u64>,
    restart_window_secs: Option<u64>,
    max_restarts: Option<u32>,
    startup_delay_secs: Option<u64>,
    memory_soft_limit_gb: Option<f64>,
    crash_signatures: Option<Vec<String>>,
}

fn default_crash_signatures() -> Vec<String> {
    [
        "failed assertion",
        "Segmentation fault",
        "Killed",
        "out of memory",
        "SIGKILL",
        "SIGTERM",
        "addCompletedHandler",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// `supervisor --config <path>` is the only flag this binary accepts.
fn config_file_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Starting,
    Running,
    Crashed,
    Abandoned,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "supervisor=info".into()),
        )
        .init();

    let config = SupervisorConfig::from_env()?;
    let journal = Journal::new(config.journal_dir.clone());

    let mut state = State::Stopped;
    let mut crash_times: VecDeque<Instant> = VecDeque::new();

    loop {
        state = match state {
            State::Stopped | State::Crashed => State::Starting,
            State::Abandoned => {
                warn!("supervisor abandoning child after repeated crashes");
                std::process::exit(1);
            }
            other => other,
        };

        info!(?state, "supervisor transition");

        let mut child = spawn_child(&config)?;
        tokio::time::sleep(Duration::from_secs(config.startup_delay_secs)).await;
        state = State::Running;
        info!(?state, "child past startup delay, beginning health probes");

        let crashed = run_until_crash(&mut child, &config, &journal).await;
        let _ = child.kill().await;

        if crashed {
            state = State::Crashed;
            let now = Instant::now();
            crash_times.push_back(now);
            while crash_times
                .front()
                .is_some_and(|t| now.duration_since(*t) > Duration::from_secs(config.restart_window_secs))
            {
                crash_times.pop_front();
            }

            if crash_times.len() as u32 > config.max_restarts {
                state = State::Abandoned;
                continue;
            }

            warn!(
                restarts_in_window = crash_times.len(),
                delay_secs = config.restart_delay_secs,
                "child crashed, restarting after back-off"
            );
            tokio::time::sleep(Duration::from_secs(config.restart_delay_secs)).await;
        } else {
            // Clean exit with no crash signature observed: treat as a
            // deliberate shutdown and stop supervising.
            info!("child exited cleanly, supervisor stopping");
            return Ok(());
        }
    }
}

fn spawn_child(config: &SupervisorConfig) -> anyhow::Result<Child> {
    Command::new(&config.gateway_bin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn gateway child at {}", config.gateway_bin.display()))
}

/// Drives one child's lifetime: tails stdout/stderr for crash signatures,
/// probes health once running, replays the journal on the first healthy
/// probe, and polls RSS for the memory alarm. Returns `true` if the child
/// crashed (exit or crash signature), `false` on a clean exit.
async fn run_until_crash(child: &mut Child, config: &SupervisorConfig, journal: &Journal) -> bool {
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");
    let pid = child.id();

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    let mut replayed = false;
    let mut health_interval = tokio::time::interval(Duration::from_secs(2));
    let mut memory_interval = tokio::time::interval(Duration::from_secs(15));

    loop {
        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => info!(%status, "child exited"),
                    Err(error) => warn!(%error, "failed to wait on child"),
                }
                return true;
            }
            line = stdout_lines.next_line() => {
                if let Ok(Some(line)) = line {
                    tracing::debug!(target: "child.stdout", "{line}");
                }
            }
            line = stderr_lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        tracing::debug!(target: "child.stderr", "{line}");
                        if config.crash_signatures.iter().any(|sig| line.contains(sig.as_str())) {
                            warn!(signature_line = %line, "crash signature observed on stderr");
                            return true;
                        }
                    }
                    Ok(None) => {}
                    Err(error) => warn!(%error, "error reading child stderr"),
                }
            }
            _ = health_interval.tick() => {
                if probe_health(&config.health_url).await && !replayed {
                    replay_journal(journal, &config.health_url).await;
                    replayed = true;
                }
            }
            _ = memory_interval.tick() => {
                if let Some(pid) = pid {
                    if let Some(rss_gb) = read_rss_gb(pid) {
                        if rss_gb > config.memory_soft_limit_gb {
                            warn!(rss_gb, limit_gb = config.memory_soft_limit_gb, "child RSS above soft limit");
                        }
                    }
                }
            }
        }
    }
}

async fn probe_health(url: &str) -> bool {
    let client = match reqwest::Client::builder().timeout(Duration::from_secs(10)).build() {
        Ok(client) => client,
        Err(_) => return false,
    };
    matches!(client.get(url).send().await, Ok(response) if response.status().is_success())
}

/// Re-POST every `pending`/`processing` journal entry to the now-healthy
/// child, preserving method, path, headers, body, and `X-Request-ID`.
/// At-least-once: idempotency is not guaranteed here.
async fn replay_journal(journal: &Journal, health_url: &str) {
    let base = health_url.trim_end_matches("/healthz");
    let entries = match journal.pending_entries().await {
        Ok(entries) => entries,
        Err(error) => {
            warn!(%error, "failed to scan journal for replay");
            return;
        }
    };

    if entries.is_empty() {
        return;
    }
    info!(count = entries.len(), "replaying in-flight journal entries");

    let client = reqwest::Client::new();
    for mut entry in entries {
        if matches!(entry.status, JournalStatus::Completed | JournalStatus::Failed(_)) {
            continue;
        }

        entry.retry += 1;
        if let Err(error) = journal.mark_processing(&mut entry).await {
            warn!(request_id = %entry.id, %error, "failed to persist retry count before replay");
        }

        let url = format!("{base}{}", entry.path);
        let method = entry.method.parse().unwrap_or(reqwest::Method::POST);
        let mut request = client.request(method, url).body(entry.body.clone());
        for (name, value) in &entry.headers {
            request = request.header(name, value);
        }
        request = request.header("x-request-id", &entry.id);

        match request.send().await {
            Ok(response) => {
                info!(request_id = %entry.id, retry = entry.retry, status = %response.status(), "replayed journal entry")
            }
            Err(error) => warn!(request_id = %entry.id, retry = entry.retry, %error, "failed to replay journal entry"),
        }
    }
}

#[cfg(target_os = "linux")]
fn read_rss_gb(pid: u32) -> Option<f64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: f64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb / (1024.0 * 1024.0));
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_rss_gb(_pid: u32) -> Option<f64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_gateway::journal::JournalEntry;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("supervisor-test-{}", uuid::Uuid::new_v4()));
        p
    }

    fn entry(id: &str, body: &str) -> JournalEntry {
        JournalEntry {
            id: id.into(),
            path: "/api/v1/chat/completions".into(),
            method: "POST".into(),
            headers: vec![],
            body: body.into(),
            timestamp: chrono::Utc::now(),
            model: Some("default".into()),
            status: JournalStatus::Pending,
            retry: 0,
        }
    }

    #[tokio::test]
    async fn probe_health_reflects_mock_server_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let url = format!("{}/healthz", server.uri());
        assert!(probe_health(&url).await);
    }

    #[tokio::test]
    async fn probe_health_is_false_on_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthz"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = format!("{}/healthz", server.uri());
        assert!(!probe_health(&url).await);
    }

    #[tokio::test]
    async fn replay_increments_retry_and_reposts_pending_entries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempdir();
        let journal = Journal::new(dir.clone());
        let e = entry("replay-1", "{}");
        journal.record_pending(&e).await.unwrap();

        let health_url = format!("{}/healthz", server.uri());
        replay_journal(&journal, &health_url).await;

        let reloaded = journal.pending_entries().await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].retry, 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
