use crate::telegram::{TelegramError, TelegramNotifier};
use std::future::Future;
use std::io;
use std::process::ExitStatus;
use thiserror::Error;
use tokio::process::Command;

pub const CHANGE_TITLE: &str = "Device Change Detected";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: &'static str,
        source: io::Error,
    },
    #[error("{program} exited with {status}")]
    Status {
        program: &'static str,
        status: ExitStatus,
    },
    #[error(transparent)]
    Telegram(#[from] TelegramError),
}

pub trait Notifier {
    fn notify(
        &self,
        title: &str,
        message: &str,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Pops a native desktop notification through the platform's command line
/// notifier.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

impl Notifier for DesktopNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let (program, args) = desktop_command(&self.app_name, title, message);
        let status = Command::new(program)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| NotifyError::Spawn { program, source })?;
        if !status.success() {
            return Err(NotifyError::Status { program, status });
        }
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn desktop_command(_app_name: &str, title: &str, message: &str) -> (&'static str, Vec<String>) {
    (
        "osascript",
        vec![
            "-e".to_string(),
            format!(
                "display notification {} with title {}",
                applescript_quote(message),
                applescript_quote(title)
            ),
        ],
    )
}

#[cfg(target_os = "windows")]
fn desktop_command(_app_name: &str, title: &str, message: &str) -> (&'static str, Vec<String>) {
    (
        "msg",
        vec![
            "*".to_string(),
            "/TIME:60".to_string(),
            format!("{title}: {message}"),
        ],
    )
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn desktop_command(app_name: &str, title: &str, message: &str) -> (&'static str, Vec<String>) {
    (
        "notify-send",
        vec![
            format!("--app-name={app_name}"),
            title.to_string(),
            message.to_string(),
        ],
    )
}

#[cfg(any(target_os = "macos", test))]
fn applescript_quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Every enabled notification channel. A failure on one channel does not
/// stop delivery on the others; the last error is returned.
#[derive(Default)]
pub struct NotifierSet {
    pub desktop: Option<DesktopNotifier>,
    pub telegram: Option<TelegramNotifier>,
}

impl Notifier for NotifierSet {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let mut result = Ok(());
        if let Some(desktop) = &self.desktop {
            if let Err(err) = desktop.notify(title, message).await {
                result = Err(err);
            }
        }
        if let Some(telegram) = &self.telegram {
            if let Err(err) = telegram.notify(title, message).await {
                result = Err(err);
            }
        }
        result
    }
}
