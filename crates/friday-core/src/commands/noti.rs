use async_trait::async_trait;
use friday_storage::UserUpdate;

use crate::command::{Command, CommandContext, Reply};
use crate::error::CommandError;

const USAGE: &str = "/noti_on - turn notifications on
/noti_off - turn notifications off
/noti_status - show the current setting";

pub(crate) const UNKNOWN_USER: &str = "❌ I don't know you yet. Send /start first.";

fn status_label(enabled: bool) -> &'static str {
    if enabled {
        "🔔 on"
    } else {
        "🔕 off"
    }
}

/// Shared by `/noti` and `/rss_noti_*`. Returns `false` for unknown users.
pub(crate) async fn set_notifications(
    ctx: &CommandContext<'_>,
    enabled: bool,
) -> Result<bool, CommandError> {
    let mut users = ctx.services.users.lock().await;
    if users.get_user_by_id(ctx.user_id())?.is_none() {
        return Ok(false);
    }
    users.update_user(
        ctx.user_id(),
        &UserUpdate {
            notifications_enabled: Some(enabled),
            ..Default::default()
        },
    )?;
    Ok(true)
}

pub struct NotiCommand;

impl NotiCommand {
    async fn status(
        &self,
        ctx: &CommandContext<'_>,
        with_usage: bool,
    ) -> Result<Reply, CommandError> {
        let user = ctx.services.users.lock().await.get_user_by_id(ctx.user_id())?;
        let Some(user) = user else {
            return Ok(Reply::text(UNKNOWN_USER));
        };

        let mut text = format!(
            "📱 Notifications are {}",
            status_label(user.notifications_enabled)
        );
        if with_usage {
            text.push_str("\n\n💡 Usage:\n");
            text.push_str(USAGE);
        }
        Ok(Reply::Text(text))
    }
}

#[async_trait]
impl Command for NotiCommand {
    fn name(&self) -> &str {
        "/noti"
    }

    fn description(&self) -> &str {
        "Notification settings"
    }

    fn usage(&self) -> Option<&str> {
        Some(USAGE)
    }

    async fn execute(&self, ctx: &CommandContext<'_>) -> Result<Reply, CommandError> {
        let Some(action) = ctx.argument() else {
            return self.status(ctx, true).await;
        };

        let enabled = match action.to_lowercase().as_str() {
            "on" => true,
            "off" => false,
            "status" => return self.status(ctx, false).await,
            _ => {
                return Ok(Reply::text(format!(
                    "❌ Unknown option.\n\n💡 Usage:\n{}",
                    USAGE
                )))
            }
        };

        if !set_notifications(ctx, enabled).await? {
            return Ok(Reply::text(UNKNOWN_USER));
        }
        Ok(if enabled {
            Reply::text("🔔 Notifications are now on!")
        } else {
            Reply::text("🔕 Notifications are now off.")
        })
    }
}
