use std::sync::Arc;

use teloxide::types::UserId;

use crate::{
    config::Config,
    database::Database,
    sessions::{SessionStore, AWAITING_CONTACT_TTL},
    tracker::Tracker,
};

/// What a user is in the middle of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    /// Was asked to share their contact.
    AwaitingContact,
}

/// Everything the handlers need, injected into the dispatcher.
pub struct AppContext {
    pub config: Config,
    pub tracker: Tracker,
    pub sessions: SessionStore<Session>,
}

impl AppContext {
    #[must_use]
    pub fn new(config: Config, database: Arc<Database>) -> Arc<AppContext> {
        let tracker = Tracker::new(database, config.policy);
        Arc::new(AppContext {
            config,
            tracker,
            sessions: SessionStore::new(AWAITING_CONTACT_TTL),
        })
    }

    pub fn database(&self) -> &Database {
        self.tracker.database()
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        user == self.config.admin_id
    }
}
