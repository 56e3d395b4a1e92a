pub mod admin;
pub mod exam;
pub mod health;
pub mod lessons;
pub mod registration;
pub mod router;
pub mod session;

use std::sync::Arc;

use crate::bot::messenger::Messenger;
use crate::config::Config;
use crate::database::store::{ObjectStore, Store};
use crate::services::session::SessionStore;
use crate::utils::feedback::CommandFeedback;

/// Everything a flow needs to handle one event.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub objects: Arc<dyn ObjectStore>,
    pub messenger: Arc<dyn Messenger>,
    pub sessions: SessionStore,
}

impl AppContext {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        objects: Arc<dyn ObjectStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        let sessions = SessionStore::new(config.session_ttl);
        Self {
            config: Arc::new(config),
            store,
            objects,
            messenger,
            sessions,
        }
    }

    pub fn feedback(&self, chat_id: i64) -> CommandFeedback<'_> {
        CommandFeedback::new(self.messenger.as_ref(), chat_id)
    }
}

/// How a button press is acknowledged to the user who pressed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Silent,
    /// Short toast.
    Notice(String),
    /// Modal alert the user has to dismiss.
    Alert(String),
}

impl Ack {
    pub fn notice(text: impl Into<String>) -> Self {
        Ack::Notice(text.into())
    }

    pub fn alert(text: impl Into<String>) -> Self {
        Ack::Alert(text.into())
    }
}
