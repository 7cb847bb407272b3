pub mod config;
pub mod doctor;
pub mod migrate;
pub mod seed;

use std::future::Future;

use serde::Serialize;

use outlay_core::config::{AppConfig, LoadOptions};
use outlay_db::{connect_with_settings, DbPool};

/// What a subcommand hands back: the process exit code plus the rendered
/// stdout line.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    command: &'a str,
    status: &'a str,
    error_class: Option<&'a str>,
    message: &'a str,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::render(command, "ok", None, &message.into(), 0)
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Self::render(command, "error", Some(error_class), &message.into(), exit_code)
    }

    fn render(
        command: &str,
        status: &str,
        error_class: Option<&str>,
        message: &str,
        exit_code: u8,
    ) -> Self {
        let envelope = Envelope { command, status, error_class, message };
        let output =
            serde_json::to_string(&envelope).unwrap_or_else(|error| fallback_line(&error.to_string()));
        Self { exit_code, output }
    }
}

/// Shared preamble for the database-touching subcommands: load and validate
/// configuration (exit 2), stand up a current-thread runtime (exit 3), open
/// the pool (exit 4), then hand the pool to the command body. The body
/// returns its success message or an `(error_class, message, exit_code)`
/// triple.
pub(crate) fn run_with_pool<F, Fut>(command: &'static str, body: F) -> CommandResult
where
    F: FnOnce(DbPool) -> Fut,
    Fut: Future<Output = Result<String, (&'static str, String, u8)>>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let outcome = body(pool.clone()).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(message) => CommandResult::success(command, message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}

// A broken envelope must still be valid JSON for whatever parses stdout.
fn fallback_line(detail: &str) -> String {
    format!(
        "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
        detail.replace('\\', "\\\\").replace('"', "\\\"")
    )
}
