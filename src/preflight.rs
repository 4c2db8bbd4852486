//! Pre-flight Check System
//!
//! Verifies credentials and the data directory BEFORE connecting to Discord.
//! Prevents a bot that logs in fine and then fails on every message.

use crate::config::{BackendKind, Config};
use std::fs;
use std::path::Path;
use tracing::debug;

const WRITE_CHECK_FILE: &str = ".write-check";

/// Result of pre-flight checks
#[derive(Debug, Default)]
pub struct PreflightResult {
    /// Whether the bot can start
    pub ready: bool,
    /// Missing or invalid credentials
    pub missing_creds: Vec<String>,
    /// Non-blocking warnings
    pub warnings: Vec<String>,
}

impl PreflightResult {
    pub fn ok() -> Self {
        Self {
            ready: true,
            ..Default::default()
        }
    }

    /// Format as user-friendly error message
    pub fn format_error(&self) -> String {
        let mut msg = String::from("Cannot start - missing requirements:\n\n");

        if !self.missing_creds.is_empty() {
            msg.push_str("Missing credentials:\n");
            for cred in &self.missing_creds {
                msg.push_str(&format!("  - {}\n", cred));
            }
        }

        msg
    }

    /// Format warnings for display
    pub fn format_warnings(&self) -> String {
        if self.warnings.is_empty() {
            return String::new();
        }
        let mut msg = String::from("Warnings:\n");
        for warn in &self.warnings {
            msg.push_str(&format!("  - {}\n", warn));
        }
        msg
    }
}

/// Credential check configuration
struct CredentialCheck {
    name: &'static str,
    env_var: &'static str,
    present: bool,
}

/// Check credentials and the data directory
pub fn check(config: &Config) -> PreflightResult {
    let mut result = PreflightResult::ok();

    let mut credential_checks = vec![
        CredentialCheck {
            name: "Discord bot token",
            env_var: "DISCORD_TOKEN",
            present: !config.discord_token.is_empty(),
        },
        CredentialCheck {
            name: "OpenAI API key",
            env_var: "OPENAI_API_KEY",
            present: !config.openai_api_key.is_empty(),
        },
        CredentialCheck {
            name: "Authorized channel",
            env_var: "AUTHORIZED_CHANNEL_ID",
            present: is_channel_id(&config.authorized_channel_id),
        },
    ];
    if config.backend == BackendKind::Assistants {
        credential_checks.push(CredentialCheck {
            name: "Assistant ID",
            env_var: "OPENAI_ASSISTANT_ID",
            present: !config.assistant_id.is_empty(),
        });
    }

    for cred in &credential_checks {
        if !cred.present {
            result
                .missing_creds
                .push(format!("{}: set {}", cred.name, cred.env_var));
            result.ready = false;
        }
    }

    if let Err(e) = check_writable(&config.data_dir) {
        result.warnings.push(format!(
            "Data directory {} is not writable ({}); topic and session mappings will not persist",
            config.data_dir.display(),
            e
        ));
    }

    result
}

/// Non-zero numeric snowflake
fn is_channel_id(id: &str) -> bool {
    matches!(id.parse::<u64>(), Ok(n) if n != 0)
}

/// Create the directory if needed and round-trip a small file through it
fn check_writable(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let marker = dir.join(WRITE_CHECK_FILE);
    fs::write(&marker, b"ok")?;
    fs::remove_file(&marker)?;
    debug!("Data directory {} is writable", dir.display());
    Ok(())
}
