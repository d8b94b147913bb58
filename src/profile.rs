use crate::state::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

pub const UNKNOWN_USER: &str = "Unknown User";

/// Owner details used to personalise alert mails.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserProfile {
    pub full_name: String,
    pub email: String,
}

impl UserProfile {
    /// Missing file is silently `None`; an unreadable or malformed one is
    /// logged and treated the same way.
    pub fn load(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read user profile");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(profile) => Some(profile),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring malformed user profile");
                None
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        write_atomic(path.as_ref(), text.as_bytes())
    }

    pub fn display_name(profile: Option<&Self>) -> &str {
        profile
            .map(|p| p.full_name.trim())
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_USER)
    }
}
