use std::env;
use std::fs;
use std::path::PathBuf;

use outlay_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file = ConfigFile::detect();

    let api_token = match &config.sync.api_token {
        Some(token) if !token.expose_secret().trim().is_empty() => "<redacted>".to_string(),
        Some(_) => "<empty>".to_string(),
        None => "<unset>".to_string(),
    };

    // (key path, effective value, env override key)
    let entries: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "OUTLAY_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "OUTLAY_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "OUTLAY_DATABASE_TIMEOUT_SECS",
        ),
        (
            "approvals.bypass_on_no_flow",
            config.approvals.bypass_on_no_flow.to_string(),
            "OUTLAY_APPROVALS_BYPASS_ON_NO_FLOW",
        ),
        (
            "approvals.marketplace_approver",
            config.approvals.marketplace_approver.clone().unwrap_or_else(|| "<unset>".to_string()),
            "OUTLAY_APPROVALS_MARKETPLACE_APPROVER",
        ),
        ("sync.enabled", config.sync.enabled.to_string(), "OUTLAY_SYNC_ENABLED"),
        (
            "sync.endpoint",
            config.sync.endpoint.clone().unwrap_or_else(|| "<unset>".to_string()),
            "OUTLAY_SYNC_ENDPOINT",
        ),
        ("sync.api_token", api_token, "OUTLAY_SYNC_API_TOKEN"),
        ("server.bind_address", config.server.bind_address.clone(), "OUTLAY_SERVER_BIND_ADDRESS"),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            "OUTLAY_SERVER_HEALTH_CHECK_PORT",
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "OUTLAY_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        ("logging.level", config.logging.level.clone(), "OUTLAY_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "OUTLAY_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in entries {
        lines.push(format!("- {key} = {value} (source: {})", file.source_for(key, env_key)));
    }
    lines.join("\n")
}

/// The optional TOML patch file, loaded once so source attribution can
/// distinguish file-provided keys from defaults.
struct ConfigFile {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

impl ConfigFile {
    fn detect() -> Self {
        let path = ["outlay.toml", "config/outlay.toml"]
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists());
        let doc = path
            .as_deref()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|raw| raw.parse::<Value>().ok());
        Self { path, doc }
    }

    fn source_for(&self, key_path: &str, env_key: &str) -> String {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
        if self.doc.as_ref().is_some_and(|doc| contains_path(doc, key_path)) {
            let display = self
                .path
                .as_deref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({display})");
        }
        "default".to_string()
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        match current.get(key) {
            Some(next) => current = next,
            None => return false,
        }
    }
    true
}
