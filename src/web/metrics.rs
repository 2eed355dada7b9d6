use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use once_cell::sync::OnceCell;
use salvo::prelude::*;

use crate::bridge::outcome::{Direction, RelayError, RelayOutcome};

static STARTED_AT: OnceCell<Instant> = OnceCell::new();

static MATRIX_EVENTS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static MATRIX_EVENTS_RELAYED: AtomicU64 = AtomicU64::new(0);
static MATRIX_EVENTS_EDITED: AtomicU64 = AtomicU64::new(0);
static MATRIX_EVENTS_IGNORED: AtomicU64 = AtomicU64::new(0);
static MATRIX_EVENTS_FAILED: AtomicU64 = AtomicU64::new(0);
static DISCORD_EVENTS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static DISCORD_EVENTS_RELAYED: AtomicU64 = AtomicU64::new(0);
static DISCORD_EVENTS_EDITED: AtomicU64 = AtomicU64::new(0);
static DISCORD_EVENTS_IGNORED: AtomicU64 = AtomicU64::new(0);
static DISCORD_EVENTS_FAILED: AtomicU64 = AtomicU64::new(0);
static IDENTITY_CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static IDENTITIES_CREATED: AtomicU64 = AtomicU64::new(0);
static CORRELATIONS_RECORDED: AtomicU64 = AtomicU64::new(0);
static PERSISTENCE_FAILURES: AtomicU64 = AtomicU64::new(0);

struct DirectionCounters {
    received: &'static AtomicU64,
    relayed: &'static AtomicU64,
    edited: &'static AtomicU64,
    ignored: &'static AtomicU64,
    failed: &'static AtomicU64,
}

fn counters(direction: Direction) -> DirectionCounters {
    match direction {
        Direction::MatrixToDiscord => DirectionCounters {
            received: &MATRIX_EVENTS_RECEIVED,
            relayed: &MATRIX_EVENTS_RELAYED,
            edited: &MATRIX_EVENTS_EDITED,
            ignored: &MATRIX_EVENTS_IGNORED,
            failed: &MATRIX_EVENTS_FAILED,
        },
        Direction::DiscordToMatrix => DirectionCounters {
            received: &DISCORD_EVENTS_RECEIVED,
            relayed: &DISCORD_EVENTS_RELAYED,
            edited: &DISCORD_EVENTS_EDITED,
            ignored: &DISCORD_EVENTS_IGNORED,
            failed: &DISCORD_EVENTS_FAILED,
        },
    }
}

/// Process-wide relay counters.
pub struct Metrics;

impl Metrics {
    /// Starts the uptime clock. Later calls keep the first start time.
    pub fn mark_started() {
        let _ = STARTED_AT.set(Instant::now());
    }

    pub fn uptime_seconds() -> u64 {
        STARTED_AT
            .get()
            .map(|started| started.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn event_received(direction: Direction) {
        counters(direction).received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(direction: Direction, result: &Result<RelayOutcome, RelayError>) {
        let counters = counters(direction);
        let counter = match result {
            Ok(RelayOutcome::Relayed { .. }) => counters.relayed,
            Ok(RelayOutcome::Edited { .. }) => counters.edited,
            Ok(RelayOutcome::Ignored(_)) => counters.ignored,
            Err(_) => counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn identity_cache_hit() {
        IDENTITY_CACHE_HITS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn identity_created() {
        IDENTITIES_CREATED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn correlation_recorded() {
        CORRELATIONS_RECORDED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persistence_failure() {
        PERSISTENCE_FAILURES.fetch_add(1, Ordering::Relaxed);
    }
}

fn write_metric(out: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n\n"));
}

fn write_direction(out: &mut String, prefix: &str, label: &str, direction: Direction) {
    let counters = counters(direction);
    let rows = [
        ("received", "received", counters.received),
        ("relayed", "relayed as new messages", counters.relayed),
        ("edited", "relayed as edits", counters.edited),
        ("ignored", "ignored", counters.ignored),
        ("failed", "dropped after a relay failure", counters.failed),
    ];
    for (suffix, help, counter) in rows {
        write_metric(
            out,
            &format!("{prefix}_events_{suffix}_total"),
            "counter",
            &format!("{label} events {help}"),
            counter.load(Ordering::Relaxed),
        );
    }
}

pub fn format_prometheus() -> String {
    let mut out = String::new();

    write_metric(
        &mut out,
        "relay_uptime_seconds",
        "gauge",
        "Number of seconds the relay has been running",
        Metrics::uptime_seconds(),
    );
    write_direction(&mut out, "matrix", "Matrix", Direction::MatrixToDiscord);
    write_direction(&mut out, "discord", "Discord", Direction::DiscordToMatrix);
    write_metric(
        &mut out,
        "identity_cache_hits_total",
        "counter",
        "Webhook lookups answered from the identity cache",
        IDENTITY_CACHE_HITS.load(Ordering::Relaxed),
    );
    write_metric(
        &mut out,
        "identities_created_total",
        "counter",
        "Webhooks created to impersonate Matrix senders",
        IDENTITIES_CREATED.load(Ordering::Relaxed),
    );
    write_metric(
        &mut out,
        "correlations_recorded_total",
        "counter",
        "Message correlations recorded",
        CORRELATIONS_RECORDED.load(Ordering::Relaxed),
    );
    write_metric(
        &mut out,
        "persistence_failures_total",
        "counter",
        "State file writes that failed",
        PERSISTENCE_FAILURES.load(Ordering::Relaxed),
    );

    out
}

#[handler]
pub async fn metrics_endpoint(res: &mut Response) {
    res.render(Text::Plain(format_prometheus()));
}
