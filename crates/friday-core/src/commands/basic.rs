use async_trait::async_trait;
use friday_storage::{NewUser, StorageError};
use tracing::info;

use crate::command::{Command, CommandContext, Reply};
use crate::error::CommandError;

pub struct StartCommand;

#[async_trait]
impl Command for StartCommand {
    fn name(&self) -> &str {
        "/start"
    }

    fn description(&self) -> &str {
        "Get started"
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
        let new_user = NewUser {
            user_id: ctx.user_id().to_string(),
            user_name: ctx.user_name.clone(),
            chat_id: ctx.chat_id(),
            notifications_enabled: true,
        };

        let created = ctx.services.users.lock().await.create_user(&new_user);
        match created {
            Ok(user) => {
                info!(user_id = %user.user_id, chat_id = user.chat_id, "User registered");
                Ok(Reply::text(format!(
                    "👋 Hello {}! Welcome aboard! 🎉\nSend /help to see what I can do.",
                    ctx.user_name
                )))
            }
            Err(StorageError::Conflict(_)) => Ok(Reply::text(format!(
                "👋 Hello {}! Good to see you again! 😊",
                ctx.user_name
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct HelpCommand;

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &str {
        "/help"
    }

    fn description(&self) -> &str {
        "Show available commands"
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
        let lines: Vec<String> = ctx
            .registry
            .list_all()
            .iter()
            .map(|command| format!("{} - {}", command.name(), command.description()))
            .collect();
        Ok(Reply::text(format!("📖 Help\n{}", lines.join("\n"))))
    }
}

pub struct EchoCommand;

#[async_trait]
impl Command for EchoCommand {
    fn name(&self) -> &str {
        "/echo"
    }

    fn description(&self) -> &str {
        "Repeat a message"
    }

    fn usage(&self) -> Option<&str> {
        Some("/echo_hello - replies with hello")
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
        Ok(match ctx.argument() {
            Some(text) => Reply::text(format!("Echo: {}", text)),
            None => Reply::text("Please type a message. Example: /echo_hello"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Invocation;
    use crate::commands::testing::Fixture;
    use friday_storage::UserStore;

    #[tokio::test]
    async fn start_registers_then_welcomes_back() {
        let fx = Fixture::new();

        let first = StartCommand
            .execute(&fx.ctx(Invocation::Start, None).await)
            .await
            .expect("first start");
        assert!(first.body().expect("text").contains("Welcome aboard"));

        let user = fx
            .storage
            .lock()
            .await
            .get_user_by_id("42")
            .expect("query")
            .expect("user");
        assert_eq!(user.chat_id, 7);
        assert!(user.notifications_enabled);

        let second = StartCommand
            .execute(&fx.ctx(Invocation::Start, None).await)
            .await
            .expect("second start");
        assert!(second.body().expect("text").contains("Good to see you again"));
    }

    #[tokio::test]
    async fn help_lists_every_command() {
        let fx = Fixture::new();
        let reply = HelpCommand
            .execute(&fx.ctx(Invocation::Start, None).await)
            .await
            .expect("help");
        let text = reply.body().expect("text");
        assert!(text.starts_with("📖 Help\n/start - Get started"));
        assert!(text.contains("/weather - "));
        assert!(text.ends_with("/cancel - Cancel the command in progress"));
    }

    #[tokio::test]
    async fn echo_repeats_or_explains() {
        let fx = Fixture::new();
        let reply = EchoCommand
            .execute(&fx.ctx(Invocation::Start, Some("hi there")).await)
            .await
            .expect("echo");
        assert_eq!(reply, Reply::text("Echo: hi there"));

        let reply = EchoCommand
            .execute(&fx.ctx(Invocation::Start, None).await)
            .await
            .expect("echo");
        assert!(reply.body().expect("text").contains("/echo_hello"));
    }
}
