use crate::commands::{run_with_pool, CommandResult};
use outlay_db::{migrations, SeedDataset};

pub fn run() -> CommandResult {
    run_with_pool("seed", |pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seed_result = SeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = SeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        if !verification.all_present {
            return Err(("seed_verification", verification_failure_message(&verification.checks), 6u8));
        }

        let flow_lines: Vec<String> = seed_result
            .flows_seeded
            .iter()
            .map(|(flow_id, description)| format!("  - {flow_id}: {description}"))
            .collect();
        Ok(format!(
            "seed dataset loaded: {} expenses and flows:\n{}",
            seed_result.expenses_seeded,
            flow_lines.join("\n")
        ))
    })
}

fn verification_failure_message(checks: &[(&'static str, bool)]) -> String {
    let failed: Vec<&str> = checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect();
    if failed.is_empty() {
        return "Some seed data failed to load".to_string();
    }
    format!("Seed verification failed for checks: {}", failed.join(", "))
}

#[cfg(test)]
mod tests {
    use super::verification_failure_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks =
            [("flow-small", true), ("flow-engineering-scope", false), ("EXP-seed-001", false)];

        assert_eq!(
            verification_failure_message(&checks),
            "Seed verification failed for checks: flow-engineering-scope, EXP-seed-001"
        );
    }

    #[test]
    fn all_passing_checks_fall_back_to_the_generic_message() {
        assert_eq!(verification_failure_message(&[]), "Some seed data failed to load");
    }
}
