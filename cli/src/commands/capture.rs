use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use wiretap_core::capture::{CaptureMessage, CaptureStats};
use wiretap_core::AppConfig;
use wiretap_plugins::context::TabRegistry;
use wiretap_plugins::factory;

use super::cli::CaptureArgs;
use super::print_json;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct CaptureSummary {
    messages: u64,
    malformed: u64,
    still_pending: usize,
    handed_off: u64,
    rejected: u64,
    expired: u64,
    persisted: u64,
    persist_failed: u64,
}

/// Event-time clock for recorded input: the newest timestamp seen so far,
/// and when the next sweep is due on that timeline.
#[derive(Debug, Default)]
struct RecordedClock {
    latest: Option<DateTime<Utc>>,
    next_sweep: Option<DateTime<Utc>>,
}

impl RecordedClock {
    fn observe(&mut self, msg: &CaptureMessage) {
        let at = match msg {
            CaptureMessage::Lifecycle(event) => event.timestamp,
            CaptureMessage::Telemetry(sample) => sample.observed_at,
        };
        if self.latest.map_or(true, |latest| at > latest) {
            self.latest = Some(at);
        }
    }

    /// The instant to sweep at, once per `period` of event time.
    fn sweep_due(&mut self, period: chrono::Duration) -> Option<DateTime<Utc>> {
        let latest = self.latest?;
        match self.next_sweep {
            Some(next) if latest < next => None,
            _ => {
                self.next_sweep = Some(latest + period);
                Some(latest)
            }
        }
    }
}

/// Feeds a JSONL message stream through the capture engine until EOF.
pub async fn run(args: CaptureArgs, mut cfg: AppConfig, json: bool) -> Result<i32, CliError> {
    if args.backfill {
        cfg.capture.backfill_unmatched_samples = true;
    }

    let registry = Arc::new(TabRegistry::new());
    let persist = factory::build_persist(&cfg).await?;
    let engine = factory::build_capture(&cfg, registry.clone(), persist.clone());
    let sweep_ms = cfg.capture.sweep_interval_ms.max(1);

    // Stdin is treated as a live feed and swept on the wall clock. A file is
    // a recording, so entries age against the newest ingested timestamp.
    let live = args.input == "-";
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if live {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        Box::new(BufReader::new(tokio::fs::File::open(&args.input).await?))
    };
    let sweeper = live.then(|| engine.spawn_sweeper(Duration::from_millis(sweep_ms)));
    let sweep_period = chrono::Duration::milliseconds(sweep_ms as i64);
    let mut clock = RecordedClock::default();

    let mut lines = reader.lines();
    let mut messages = 0u64;
    let mut malformed = 0u64;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CaptureMessage>(&line) {
            Ok(msg) => {
                if let CaptureMessage::Lifecycle(event) = &msg {
                    registry.observe(event);
                }
                clock.observe(&msg);
                engine.ingest(msg);
                messages += 1;
                if !live {
                    if let Some(at) = clock.sweep_due(sweep_period) {
                        engine.sweep_expired_at(at);
                    }
                }
            }
            Err(err) => {
                malformed += 1;
                tracing::warn!(
                    target: "wiretap.capture",
                    stage = "capture.input.malformed",
                    error = %err
                );
            }
        }
        // Lets spawned context resolutions keep up with the stream.
        tokio::task::yield_now().await;
    }

    tokio::task::yield_now().await;
    match (sweeper, clock.latest) {
        (Some(sweeper), _) => {
            sweeper.abort();
            engine.sweep_expired();
        }
        (None, Some(latest)) => {
            engine.sweep_expired_at(latest);
        }
        (None, None) => {}
    }
    engine.flush().await;

    let stats: CaptureStats = engine.stats();
    let persisted = persist.stats();
    let summary = CaptureSummary {
        messages,
        malformed,
        still_pending: engine.pending_count(),
        handed_off: stats.handed_off,
        rejected: stats.rejected,
        expired: stats.expired,
        persisted: persisted.persisted,
        persist_failed: persisted.failed,
    };

    if json {
        print_json(&summary)?;
    } else {
        eprintln!(
            "messages={} malformed={} handed_off={} rejected={} expired={} pending={}",
            summary.messages,
            summary.malformed,
            summary.handed_off,
            summary.rejected,
            summary.expired,
            summary.still_pending
        );
    }
    Ok(0)
}
