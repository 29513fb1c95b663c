//! Built-in chat commands.

mod basic;
mod cancel;
mod dice;
mod noti;
mod rss;
mod weather;

pub use basic::{EchoCommand, HelpCommand, StartCommand};
pub use cancel::CancelCommand;
pub use dice::DiceCommand;
pub use noti::NotiCommand;
pub use rss::RssCommand;
pub use weather::WeatherCommand;

use std::sync::Arc;

use crate::registry::CommandRegistry;

/// Registry with every built-in command, in menu order.
pub fn default_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(Arc::new(StartCommand));
    registry.register(Arc::new(HelpCommand));
    registry.register(Arc::new(EchoCommand));
    registry.register(Arc::new(DiceCommand));
    registry.register(Arc::new(WeatherCommand));
    registry.register(Arc::new(NotiCommand));
    registry.register(Arc::new(RssCommand));
    registry.register(Arc::new(CancelCommand));
    registry
}

#[cfg(test)]
pub(crate) mod testing;
