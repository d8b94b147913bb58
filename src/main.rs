mod alerts;
mod changelog;
mod collectors;
mod config;
mod diff;
mod engine;
mod mail;
mod metrics;
mod notify;
mod profile;
mod snapshot;
mod state;
mod telegram;

use alerts::Dispatcher;
use changelog::ChangeLog;
use clap::Parser;
use collectors::SysinfoProvider;
use config::{Config, ConfigError};
use diff::ChangeRecord;
use engine::{Confirm, Engine};
use mail::MailTransport;
use metrics::RunMetrics;
use notify::{DesktopNotifier, NotifierSet};
use profile::UserProfile;
use state::FileStore;
use std::io::{self, BufRead, Write};
use std::time::SystemTime;
use telegram::TelegramNotifier;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "./config.yaml";

#[derive(Parser, Debug)]
#[command(name = "hostdrift")]
#[command(version, about = "Detects hardware changes against a saved baseline")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Replace the baseline with the current snapshot without diffing.
    #[arg(long)]
    reset: bool,
    /// Ask whether each detected change is legitimate.
    #[arg(long, conflicts_with = "no_confirm")]
    confirm: bool,
    #[arg(long, conflicts_with = "confirm")]
    no_confirm: bool,
    /// Store the name and email used in alert mails, then exit.
    #[arg(long)]
    setup_profile: bool,
    #[arg(long, requires = "setup_profile")]
    name: Option<String>,
    #[arg(long, requires = "setup_profile")]
    email: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if cli.setup_profile {
        match setup_profile(&cfg, cli.name, cli.email) {
            Ok(profile) => {
                info!(path = %cfg.profile_path, name = %profile.full_name, "user profile saved");
            }
            Err(err) => {
                error!(error = %err, "failed to save user profile");
                std::process::exit(1);
            }
        }
        return;
    }

    let retention = match cfg.log_retention() {
        Ok(r) => r,
        Err(err) => {
            error!(error = %err, "invalid log retention");
            std::process::exit(1);
        }
    };
    let confirm_changes = if cli.confirm {
        true
    } else if cli.no_confirm {
        false
    } else {
        cfg.confirm_changes
    };

    let telegram = if cfg.notifications.telegram.enabled {
        match telegram::resolve_token(&cfg.notifications.telegram) {
            Ok(token) => Some(TelegramNotifier::new(token, &cfg.notifications.telegram)),
            Err(err) => {
                error!(error = %err, "failed to prepare Telegram settings");
                std::process::exit(1);
            }
        }
    } else {
        None
    };
    let notifiers = NotifierSet {
        desktop: cfg
            .notifications
            .desktop
            .then(|| DesktopNotifier::new(cfg.notifications.app_name.clone())),
        telegram,
    };
    let dispatcher = Dispatcher::new(
        notifiers,
        MailTransport::from_config(&cfg.mail),
        cfg.mail.operator_address.clone(),
        cfg.dispatch_timeout(),
    );

    let profile = UserProfile::load(&cfg.profile_path);
    if profile.is_none() {
        info!(path = %cfg.profile_path, "no user profile, alerts go out as Unknown User");
    }

    info!(
        baseline = %cfg.baseline_path,
        reset = cli.reset,
        confirm = confirm_changes,
        "starting hostdrift run"
    );

    let mut store = FileStore::new(&cfg.baseline_path, &cfg.log_path, &cfg.alert_marker_path);
    let mut provider = SysinfoProvider::new();
    let mut prompt = prompt_confirm;
    let confirm: Option<Confirm<'_>> = if confirm_changes {
        Some(&mut prompt)
    } else {
        None
    };
    let now = SystemTime::now();

    let mut engine = Engine {
        store: &mut store,
        log: ChangeLog::new(retention),
        dispatcher: &dispatcher,
        profile: profile.as_ref(),
    };
    let report = match engine.run_once(&mut provider, confirm, cli.reset, now).await {
        Ok(report) => report,
        Err(err) => {
            error!(error = %err, "run aborted, state may be stale");
            std::process::exit(1);
        }
    };

    info!(
        outcome = ?report.outcome,
        changes = report.changes.len(),
        accepted = report.accepted,
        notified = report.dispatch.as_ref().map_or(0, |d| d.notifications_sent),
        email = ?report.dispatch.as_ref().map(|d| d.email),
        "run complete"
    );

    if let Some(path) = &cfg.metrics.textfile_path {
        match RunMetrics::new() {
            Ok(metrics) => {
                metrics.update_from_report(&report, now);
                if let Err(err) = metrics.write_textfile(path) {
                    warn!(error = %err, "failed to write metrics textfile");
                }
            }
            Err(err) => warn!(error = %err, "failed to initialise metrics"),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// A missing config at the default location means "run with defaults".
fn load_config(path: &str) -> Result<Config, ConfigError> {
    match Config::load_from_file(path) {
        Err(ConfigError::Read { ref source, .. })
            if source.kind() == io::ErrorKind::NotFound && path == DEFAULT_CONFIG =>
        {
            info!(path, "config file not found, using defaults");
            Ok(Config::default())
        }
        other => other,
    }
}

fn prompt_confirm(change: &ChangeRecord) -> bool {
    let question = format!(
        "Change detected in {} ({} -> {}). Is this a legitimate change? (y/n): ",
        change.component,
        change.old_display(),
        change.new_display()
    );
    match ask(&question) {
        Ok(answer) => answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"),
        Err(err) => {
            warn!(error = %err, "could not read confirmation, treating change as unconfirmed");
            false
        }
    }
}

fn setup_profile(
    cfg: &Config,
    name: Option<String>,
    email: Option<String>,
) -> Result<UserProfile, String> {
    let full_name = match name {
        Some(v) => v,
        None => ask("Enter your full name: ").map_err(|e| e.to_string())?,
    };
    let email = match email {
        Some(v) => v,
        None => ask("Enter your email address: ").map_err(|e| e.to_string())?,
    };

    let profile = UserProfile {
        full_name: full_name.trim().to_string(),
        email: email.trim().to_string(),
    };
    if profile.full_name.is_empty() {
        return Err("full name must not be empty".to_string());
    }
    if !profile.email.contains('@') {
        return Err(format!("'{}' is not an email address", profile.email));
    }

    profile
        .save(&cfg.profile_path)
        .map_err(|e| format!("failed to write {}: {e}", cfg.profile_path))?;
    Ok(profile)
}

fn ask(question: &str) -> io::Result<String> {
    let mut stdout = io::stdout();
    stdout.write_all(question.as_bytes())?;
    stdout.flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}
