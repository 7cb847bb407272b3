use crate::commands::{run_with_pool, CommandResult};
use outlay_db::migrations;

pub fn run() -> CommandResult {
    run_with_pool("migrate", |pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        Ok("applied pending migrations".to_string())
    })
}
