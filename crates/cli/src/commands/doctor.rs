use outlay_core::config::{AppConfig, LoadOptions};
use outlay_db::connect_with_settings;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum ProbeStatus {
    Ok,
    Failed,
    Skipped,
}

#[derive(Debug, Serialize)]
struct Probe {
    name: &'static str,
    status: ProbeStatus,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    healthy: bool,
    probes: Vec<Probe>,
}

pub fn run(json_output: bool) -> String {
    let probes = run_probes();
    let healthy = probes.iter().all(|probe| probe.status != ProbeStatus::Failed);
    let report = DoctorReport { healthy, probes };

    if json_output {
        return serde_json::to_string_pretty(&report)
            .unwrap_or_else(|error| format!("{{\"healthy\":false,\"error\":\"{error}\"}}"));
    }

    let mut lines = Vec::with_capacity(report.probes.len() + 1);
    lines.push(
        if report.healthy { "doctor: ready" } else { "doctor: not ready" }.to_string(),
    );
    for probe in &report.probes {
        let marker = match probe.status {
            ProbeStatus::Ok => "ok",
            ProbeStatus::Failed => "fail",
            ProbeStatus::Skipped => "skip",
        };
        lines.push(format!("  [{marker}] {}: {}", probe.name, probe.detail));
    }
    lines.join("\n")
}

fn run_probes() -> Vec<Probe> {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            // Nothing downstream is meaningful without valid configuration.
            return vec![
                Probe {
                    name: "config_validation",
                    status: ProbeStatus::Failed,
                    detail: error.to_string(),
                },
                skipped("approvals_readiness"),
                skipped("database_connectivity"),
            ];
        }
    };

    vec![
        Probe {
            name: "config_validation",
            status: ProbeStatus::Ok,
            detail: "configuration loaded and validated".to_string(),
        },
        approvals_probe(&config),
        database_probe(&config),
    ]
}

fn skipped(name: &'static str) -> Probe {
    Probe {
        name,
        status: ProbeStatus::Skipped,
        detail: "skipped because configuration did not load".to_string(),
    }
}

fn approvals_probe(config: &AppConfig) -> Probe {
    let bypass = if config.approvals.bypass_on_no_flow {
        "expenses with no matching flow are auto-approved (bypass on)"
    } else {
        "expenses with no matching flow fail initiation (bypass off)"
    };
    let marketplace = match &config.approvals.marketplace_approver {
        Some(approver) => format!("marketplace pass acts as `{approver}`"),
        None => "marketplace auto-approval disabled (no approver identity)".to_string(),
    };
    Probe {
        name: "approvals_readiness",
        status: ProbeStatus::Ok,
        detail: format!("{bypass}; {marketplace}"),
    }
}

fn database_probe(config: &AppConfig) -> Probe {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return Probe {
                name: "database_connectivity",
                status: ProbeStatus::Failed,
                detail: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let outcome = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| error.to_string())?;
        pool.close().await;
        Ok::<(), String>(())
    });

    match outcome {
        Ok(()) => Probe {
            name: "database_connectivity",
            status: ProbeStatus::Ok,
            detail: format!("connected using `{}`", config.database.url),
        },
        Err(error) => Probe {
            name: "database_connectivity",
            status: ProbeStatus::Failed,
            detail: format!("failed to connect to database: {error}"),
        },
    }
}
