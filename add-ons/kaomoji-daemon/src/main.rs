//! kaomoji-daemon: hosts the persona session for the overlay UI.
//!
//! Reads one JSON command per stdin line, applies it, and answers with the resolved
//! tier decision as a JSON line on stdout. Re-checks device stress on a fixed interval
//! and prints a decision again whenever the tier or notice changes.

use std::sync::Arc;
use std::time::Duration;

use kaomoji_core::{
    now_ms, CoreConfig, Decision, PersonaEvent, PersonaSession, PersonaStore, SimulatedTelemetry,
    SledPersonaStore, SysfsTelemetry, TelemetrySource, TelemetrySourceKind, TierResolver,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

type DaemonResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// One line of input. Persona events use their own `type` tags; the daemon adds two more.
#[derive(Debug, PartialEq)]
enum Command {
    Event(PersonaEvent),
    /// `{"type": "latency_sample", "duration_ms": 840}`
    LatencySample(u64),
    /// `{"type": "resolve"}`
    Resolve,
}

fn parse_command(line: &str) -> DaemonResult<Command> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    match value.get("type").and_then(|t| t.as_str()) {
        Some("latency_sample") => {
            let ms = value
                .get("duration_ms")
                .and_then(|v| v.as_u64())
                .ok_or("latency_sample requires a non-negative integer duration_ms")?;
            Ok(Command::LatencySample(ms))
        }
        Some("resolve") => Ok(Command::Resolve),
        _ => Ok(Command::Event(serde_json::from_value(value)?)),
    }
}

struct Daemon<S: PersonaStore> {
    session: PersonaSession<S>,
    resolver: TierResolver,
    telemetry: Arc<dyn TelemetrySource>,
}

impl<S: PersonaStore> Daemon<S> {
    fn handle_line(&self, line: &str, now: i64) -> DaemonResult<Decision> {
        match parse_command(line)? {
            Command::Event(event) => {
                if let Err(e) = self.session.apply(event, now) {
                    // In-memory state already advanced; the next save retries the write.
                    tracing::warn!(target: "kaomoji::daemon", error = %e, "Persona save failed");
                }
            }
            Command::LatencySample(ms) => self.telemetry.record_latency_sample(ms),
            Command::Resolve => {}
        }
        Ok(self.resolve(now))
    }

    fn resolve(&self, now: i64) -> Decision {
        self.session.resolve_tier(&self.resolver, self.telemetry.as_ref(), now)
    }
}

async fn write_decision<W>(out: &mut W, decision: &Decision) -> DaemonResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(decision)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

/// Serves commands until the input closes. Pending commands are drained before a re-check.
async fn serve<S, R, W>(
    daemon: &Daemon<S>,
    input: R,
    mut out: W,
    recheck: Duration,
) -> DaemonResult<()>
where
    S: PersonaStore,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::info!(
        target: "kaomoji::daemon",
        recheck_interval_secs = recheck.as_secs(),
        "Stress re-check loop started"
    );
    let mut lines = input.lines();
    let mut interval = tokio::time::interval(recheck);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last: Option<Decision> = None;

    loop {
        tokio::select! {
            biased;
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                if line.trim().is_empty() {
                    continue;
                }
                match daemon.handle_line(&line, now_ms()) {
                    Ok(decision) => {
                        write_decision(&mut out, &decision).await?;
                        last = Some(decision);
                    }
                    Err(e) => tracing::warn!(
                        target: "kaomoji::daemon",
                        error = %e,
                        "Ignoring malformed command"
                    ),
                }
            }
            _ = interval.tick() => {
                let decision = daemon.resolve(now_ms());
                let changed = last.as_ref().map_or(true, |prev| {
                    prev.tier != decision.tier || prev.notice != decision.notice
                });
                if changed {
                    write_decision(&mut out, &decision).await?;
                    last = Some(decision);
                }
            }
        }
    }
    tracing::info!(target: "kaomoji::daemon", "Input closed; shutting down");
    Ok(())
}

fn telemetry_from_config(config: &CoreConfig) -> Arc<dyn TelemetrySource> {
    match config.telemetry.source {
        TelemetrySourceKind::Sysfs => Arc::new(SysfsTelemetry::new(&config.telemetry.sysfs_root)),
        TelemetrySourceKind::Simulated => Arc::new(SimulatedTelemetry::new()),
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[kaomoji-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with_writer(std::io::stderr)
        .init();

    let config = match CoreConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[kaomoji-daemon] failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        target: "kaomoji::daemon",
        backend_url = %config.backend_url,
        compute_mode = config.compute_mode.as_str(),
        storage_path = %config.storage_path,
        "Config loaded"
    );

    let store = match SledPersonaStore::open_path(config.persona_store_path()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("[kaomoji-daemon] failed to open persona store: {}", e);
            std::process::exit(1);
        }
    };
    let session = match PersonaSession::open(store, &config.onboarding, now_ms()) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("[kaomoji-daemon] failed to load persona: {}", e);
            std::process::exit(1);
        }
    };

    let daemon = Daemon {
        session,
        resolver: TierResolver::new(config.policy.clone()),
        telemetry: telemetry_from_config(&config),
    };
    let recheck = Duration::from_secs(config.telemetry.recheck_interval_secs.max(1));
    let input = tokio::io::BufReader::new(tokio::io::stdin());

    tokio::select! {
        result = serve(&daemon, input, tokio::io::stdout(), recheck) => {
            if let Err(e) = result {
                tracing::error!(target: "kaomoji::daemon", error = %e, "Daemon stopped");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "kaomoji::daemon", "Interrupted; shutting down");
        }
    }
}
