use crate::alerts::EmailOutcome;
use crate::engine::{RunOutcome, RunReport};
use crate::snapshot::Component;
use crate::state::write_atomic;
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
    #[error("failed to write metrics to {path}: {source}")]
    Write { path: String, source: io::Error },
}

/// Per-run gauges for the node_exporter textfile collector.
pub struct RunMetrics {
    registry: Registry,
    pub drift_changes_detected: Gauge,
    pub drift_component_changed: GaugeVec,
    pub drift_alert_episode_open: Gauge,
    pub drift_alert_email_sent: Gauge,
    pub drift_alert_email_failed: Gauge,
    pub drift_notifications_failed: Gauge,
    pub drift_baseline_seeded: Gauge,
    pub drift_last_run_timestamp_seconds: Gauge,
}

impl RunMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let drift_changes_detected = Gauge::with_opts(opts!(
            "hostdrift_changes_detected",
            "Components that differ from the baseline in the last run"
        ))?;
        let drift_component_changed = GaugeVec::new(
            opts!(
                "hostdrift_component_changed",
                "1 when the component differs from the baseline in the last run"
            ),
            &["component"],
        )?;
        let drift_alert_episode_open = Gauge::with_opts(opts!(
            "hostdrift_alert_episode_open",
            "1 while an unresolved change has already been mailed"
        ))?;
        let drift_alert_email_sent = Gauge::with_opts(opts!(
            "hostdrift_alert_email_sent",
            "1 when the last run sent an alert mail"
        ))?;
        let drift_alert_email_failed = Gauge::with_opts(opts!(
            "hostdrift_alert_email_failed",
            "1 when the last run failed to deliver an alert mail"
        ))?;
        let drift_notifications_failed = Gauge::with_opts(opts!(
            "hostdrift_notifications_failed",
            "Change notifications that failed or timed out in the last run"
        ))?;
        let drift_baseline_seeded = Gauge::with_opts(opts!(
            "hostdrift_baseline_seeded",
            "1 when the last run (re)created the baseline"
        ))?;
        let drift_last_run_timestamp_seconds = Gauge::with_opts(opts!(
            "hostdrift_last_run_timestamp_seconds",
            "Unix time of the last completed run"
        ))?;

        register(&registry, &drift_changes_detected)?;
        register(&registry, &drift_component_changed)?;
        register(&registry, &drift_alert_episode_open)?;
        register(&registry, &drift_alert_email_sent)?;
        register(&registry, &drift_alert_email_failed)?;
        register(&registry, &drift_notifications_failed)?;
        register(&registry, &drift_baseline_seeded)?;
        register(&registry, &drift_last_run_timestamp_seconds)?;

        Ok(Self {
            registry,
            drift_changes_detected,
            drift_component_changed,
            drift_alert_episode_open,
            drift_alert_email_sent,
            drift_alert_email_failed,
            drift_notifications_failed,
            drift_baseline_seeded,
            drift_last_run_timestamp_seconds,
        })
    }

    pub fn update_from_report(&self, report: &RunReport, now: SystemTime) {
        self.drift_changes_detected.set(report.changes.len() as f64);
        for component in Component::ALL {
            let changed = report.changes.iter().any(|c| c.component == component);
            self.drift_component_changed
                .with_label_values(&[component.as_str()])
                .set(if changed { 1.0 } else { 0.0 });
        }

        let seeded = matches!(report.outcome, RunOutcome::Seeded | RunOutcome::Reset);
        self.drift_baseline_seeded.set(bool_gauge(seeded));

        let (episode_open, sent, failed, notify_failed) = match &report.dispatch {
            Some(d) => (
                d.episode.is_open(),
                d.email == EmailOutcome::Sent,
                d.email == EmailOutcome::Failed,
                d.notifications_failed,
            ),
            None => (false, false, false, 0),
        };
        self.drift_alert_episode_open.set(bool_gauge(episode_open));
        self.drift_alert_email_sent.set(bool_gauge(sent));
        self.drift_alert_email_failed.set(bool_gauge(failed));
        self.drift_notifications_failed.set(notify_failed as f64);

        let ts = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as f64)
            .unwrap_or(0.0);
        self.drift_last_run_timestamp_seconds.set(ts);
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    pub fn write_textfile(&self, path: impl AsRef<Path>) -> Result<(), MetricsError> {
        let path = path.as_ref();
        let buf = self.encode_metrics()?;
        write_atomic(path, &buf).map_err(|source| MetricsError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

fn bool_gauge(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
