use friday_ipc::MenuEntry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::command::Command;

/// Commands by token, listed in the order they were first registered.
#[derive(Default)]
pub struct CommandRegistry {
    order: Vec<String>,
    handlers: HashMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering a token again replaces its handler but keeps its place.
    pub fn register(&mut self, handler: Arc<dyn Command>) {
        let token = handler.name().to_string();
        if self.handlers.insert(token.clone(), handler).is_none() {
            self.order.push(token);
        }
    }

    pub fn resolve(&self, token: &str) -> Option<Arc<dyn Command>> {
        self.handlers.get(token).cloned()
    }

    pub fn list_all(&self) -> Vec<Arc<dyn Command>> {
        self.order
            .iter()
            .filter_map(|token| self.handlers.get(token).cloned())
            .collect()
    }

    pub fn menu(&self) -> Vec<MenuEntry> {
        self.list_all()
            .iter()
            .map(|handler| MenuEntry {
                command: handler.name().trim_start_matches('/').to_string(),
                description: handler.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
