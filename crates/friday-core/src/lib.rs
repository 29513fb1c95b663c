//! Friday Core
//!
//! Session-aware command dispatch and runtime orchestration for the bot:
//! inbound events from the transport are routed through the command
//! registry, multi-step commands keep per-(user, chat) sessions, and the RSS
//! check runs on a fixed schedule next to the chat loop.

pub mod command;
pub mod commands;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod session;

pub use command::{Command, CommandContext, Invocation, Reply, Services};
pub use commands::default_registry;
pub use dispatcher::{
    parse_command, parse_selection, selection_data, Dispatcher, Inbound, InboundEvent,
    ParsedCommand, EXPIRED_SELECTION_ALERT, MAX_INBOUND_CONCURRENCY, RECOVERY_REPLY,
};
pub use error::CommandError;
pub use registry::CommandRegistry;
pub use runtime::FridayRuntime;
pub use session::{FlowData, Session, SessionKey, SessionPatch, SessionStore, WeatherFlow};
