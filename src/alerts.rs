use crate::changelog::ChangeLog;
use crate::diff::ChangeRecord;
use crate::mail::{compose_alert, Mailer};
use crate::notify::{Notifier, CHANGE_TITLE};
use crate::profile::UserProfile;
use crate::state::{EpisodeState, StateStore, StoreError};
use std::time::{Duration, SystemTime};
use tokio::time;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailOutcome {
    /// No changes this poll.
    NotNeeded,
    Sent,
    /// The current episode was already mailed.
    Suppressed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub email: EmailOutcome,
    pub episode: EpisodeState,
}

pub struct Dispatcher<N, M> {
    notifier: N,
    mailer: M,
    operator_address: Option<String>,
    timeout: Duration,
}

impl<N: Notifier, M: Mailer> Dispatcher<N, M> {
    pub fn new(notifier: N, mailer: M, operator_address: Option<String>, timeout: Duration) -> Self {
        Self {
            notifier,
            mailer,
            operator_address,
            timeout,
        }
    }

    /// Notifies about `changes` and mails at most once per alert episode.
    ///
    /// An episode spans consecutive polls that report changes. An empty
    /// `changes` closes it and re-arms mailing. Delivery problems are logged
    /// and never returned; only store failures are.
    pub async fn dispatch<S: StateStore + ?Sized>(
        &self,
        store: &mut S,
        log: &ChangeLog,
        changes: &[ChangeRecord],
        profile: Option<&UserProfile>,
        now: SystemTime,
    ) -> Result<DispatchResult, StoreError> {
        let previous = store.episode()?;

        if changes.is_empty() {
            if previous.is_open() {
                store.set_episode(EpisodeState::NoEpisode)?;
                info!("hardware back at baseline, alert episode closed");
            }
            return Ok(DispatchResult {
                notifications_sent: 0,
                notifications_failed: 0,
                email: EmailOutcome::NotNeeded,
                episode: EpisodeState::NoEpisode,
            });
        }

        let mut notifications_sent = 0;
        let mut notifications_failed = 0;
        for change in changes {
            let message = format!(
                "{} has changed. Detected at {}.",
                change.component,
                humantime::format_rfc3339_seconds(change.detected_at)
            );
            match time::timeout(self.timeout, self.notifier.notify(CHANGE_TITLE, &message)).await {
                Ok(Ok(())) => notifications_sent += 1,
                Ok(Err(err)) => {
                    notifications_failed += 1;
                    warn!(component = %change.component, error = %err, "change notification failed");
                }
                Err(_elapsed) => {
                    notifications_failed += 1;
                    warn!(component = %change.component, "change notification timed out");
                }
            }
            log.append(store, &change.summary(), now)?;
        }

        if previous == EpisodeState::OpenNotified {
            info!(changes = changes.len(), "alert already mailed for this episode, skipping email");
            return Ok(DispatchResult {
                notifications_sent,
                notifications_failed,
                email: EmailOutcome::Suppressed,
                episode: EpisodeState::OpenNotified,
            });
        }

        let mail = compose_alert(changes, profile, self.operator_address.as_deref());
        let (email, episode) = match time::timeout(self.timeout, self.mailer.send(&mail)).await {
            Ok(Ok(())) => {
                info!(to = ?mail.to, changes = changes.len(), "change alert mailed");
                store.set_episode(EpisodeState::OpenNotified)?;
                (EmailOutcome::Sent, EpisodeState::OpenNotified)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "failed to deliver change alert, will retry next poll");
                (EmailOutcome::Failed, EpisodeState::OpenUnnotified)
            }
            Err(_elapsed) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "change alert delivery timed out, will retry next poll"
                );
                (EmailOutcome::Failed, EpisodeState::OpenUnnotified)
            }
        };

        Ok(DispatchResult {
            notifications_sent,
            notifications_failed,
            email,
            episode,
        })
    }
}
