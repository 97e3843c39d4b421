//! Shared application state handed to every handler.

use tokio::sync::watch;

use courier_core::MessagingConfig;
use courier_messaging::{ListenerState, Publisher};

pub struct AppState {
    pub publisher: Publisher,
    /// Adapter name reported by `/health`.
    pub broker: &'static str,
    pub messaging: MessagingConfig,
    /// Present when a listener runs in this process.
    pub listener: Option<watch::Receiver<ListenerState>>,
}

impl AppState {
    pub fn new(publisher: Publisher, broker: &'static str, messaging: MessagingConfig) -> Self {
        Self {
            publisher,
            broker,
            messaging,
            listener: None,
        }
    }

    pub fn with_listener(mut self, states: watch::Receiver<ListenerState>) -> Self {
        self.listener = Some(states);
        self
    }

    pub fn listener_state(&self) -> Option<ListenerState> {
        self.listener.as_ref().map(|rx| *rx.borrow())
    }
}
