use async_trait::async_trait;

use crate::command::{Command, CommandContext, Reply};
use crate::error::CommandError;

pub struct CancelCommand;

#[async_trait]
impl Command for CancelCommand {
    fn name(&self) -> &str {
        "/cancel"
    }

    fn description(&self) -> &str {
        "Cancel the command in progress"
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
        let Some(session) = &ctx.session else {
            return Ok(Reply::text("❌ There is nothing to cancel."));
        };

        ctx.sessions.clear(&ctx.key).await;
        Ok(Reply::text(format!("✅ Cancelled {}.", session.command)))
    }
}
