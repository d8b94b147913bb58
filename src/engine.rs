use crate::alerts::{DispatchResult, Dispatcher};
use crate::changelog::{ChangeLog, HEARTBEAT};
use crate::diff::{accept, diff, ChangeRecord};
use crate::mail::Mailer;
use crate::notify::Notifier;
use crate::profile::UserProfile;
use crate::snapshot::Snapshot;
use crate::state::{EpisodeState, StateStore, StoreError};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{info, warn};

pub trait SnapshotProvider {
    fn collect(&mut self) -> Snapshot;
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("state store failure: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No usable baseline existed; the current snapshot became the baseline.
    Seeded,
    /// Reset requested; the current snapshot replaced the baseline.
    Reset,
    Checked,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub changes: Vec<ChangeRecord>,
    pub accepted: usize,
    pub dispatch: Option<DispatchResult>,
}

impl RunReport {
    fn without_diff(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            changes: Vec::new(),
            accepted: 0,
            dispatch: None,
        }
    }
}

/// Operator callback deciding whether a detected change is legitimate.
pub type Confirm<'a> = &'a mut dyn FnMut(&ChangeRecord) -> bool;

pub struct Engine<'a, S: ?Sized, N, M> {
    pub store: &'a mut S,
    pub log: ChangeLog,
    pub dispatcher: &'a Dispatcher<N, M>,
    pub profile: Option<&'a UserProfile>,
}

impl<'a, S, N, M> Engine<'a, S, N, M>
where
    S: StateStore + ?Sized,
    N: Notifier,
    M: Mailer,
{
    /// One poll: snapshot, diff against the baseline, log, alert, persist.
    ///
    /// Only store failures abort the run. The baseline is saved last and
    /// only moves forward for changes that `confirm` accepted.
    pub async fn run_once<P: SnapshotProvider + ?Sized>(
        &mut self,
        provider: &mut P,
        confirm: Option<Confirm<'_>>,
        reset: bool,
        now: SystemTime,
    ) -> Result<RunReport, RunError> {
        let current = provider.collect();

        if reset {
            self.store.save_baseline(&current)?;
            self.store.set_episode(EpisodeState::NoEpisode)?;
            self.log
                .append(&mut *self.store, "Baseline reset to current snapshot.", now)?;
            info!("baseline reset to current snapshot");
            return Ok(RunReport::without_diff(RunOutcome::Reset));
        }

        let baseline = match self.store.load_baseline() {
            Ok(baseline) => baseline,
            Err(StoreError::Parse { path, source }) => {
                warn!(path = %path, error = %source, "baseline is malformed, reseeding");
                None
            }
            Err(err) => return Err(err.into()),
        };
        let Some(mut baseline) = baseline else {
            self.store.save_baseline(&current)?;
            self.log
                .append(&mut *self.store, "Baseline created from current snapshot.", now)?;
            info!("baseline created, nothing to compare on first run");
            return Ok(RunReport::without_diff(RunOutcome::Seeded));
        };

        let changes = diff(&current, &baseline, now);
        if changes.is_empty() {
            self.log.append(&mut *self.store, HEARTBEAT, now)?;
        } else {
            info!(changes = changes.len(), "hardware drift detected");
        }

        let mut dispatch = self
            .dispatcher
            .dispatch(&mut *self.store, &self.log, &changes, self.profile, now)
            .await?;

        let mut accepted = 0;
        if let Some(confirm) = confirm {
            for change in &changes {
                if confirm(change) {
                    accept(&mut baseline, change);
                    accepted += 1;
                    info!(component = %change.component, "change confirmed, baseline updated");
                }
            }
        }

        // Nothing left unresolved once every change is merged into the baseline.
        if !changes.is_empty() && accepted == changes.len() {
            self.store.set_episode(EpisodeState::NoEpisode)?;
            dispatch.episode = EpisodeState::NoEpisode;
        }

        self.store.save_baseline(&baseline)?;

        Ok(RunReport {
            outcome: RunOutcome::Checked,
            changes,
            accepted,
            dispatch: Some(dispatch),
        })
    }
}
