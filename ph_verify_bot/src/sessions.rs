use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use teloxide::types::UserId;
use tokio::sync::Mutex;

/// How long the bot waits for a contact after asking for one.
pub const AWAITING_CONTACT_TTL: Duration = Duration::from_secs(30 * 60);

/// Short-lived per-user state for multi-step conversations. Entries expire after a
/// fixed time-to-live and are purged lazily, whenever the store is touched.
pub struct SessionStore<V> {
    ttl: Duration,
    entries: Mutex<HashMap<UserId, (Instant, V)>>,
}

impl<V: Clone> SessionStore<V> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Starts, or restarts, a session for this user.
    pub async fn insert(&self, user: UserId, value: V) {
        self.insert_at(user, value, Instant::now()).await;
    }

    /// The user's session, if they have one that hasn't expired.
    pub async fn get(&self, user: UserId) -> Option<V> {
        self.get_at(user, Instant::now()).await
    }

    /// Ends this user's session, returning it if it was still live.
    pub async fn remove(&self, user: UserId) -> Option<V> {
        self.remove_at(user, Instant::now()).await
    }

    async fn insert_at(&self, user: UserId, value: V, now: Instant) {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries, now);
        entries.insert(user, (now, value));
    }

    async fn get_at(&self, user: UserId, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries, now);
        entries.get(&user).map(|(_, value)| value.clone())
    }

    async fn remove_at(&self, user: UserId, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock().await;
        self.purge(&mut entries, now);
        entries.remove(&user).map(|(_, value)| value)
    }

    fn purge(&self, entries: &mut HashMap<UserId, (Instant, V)>, now: Instant) {
        entries.retain(|_, (started, _)| now.saturating_duration_since(*started) < self.ttl);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_expire() {
        let store = SessionStore::new(Duration::from_secs(60));
        let start = Instant::now();

        store.insert_at(UserId(1), "waiting", start).await;
        assert_eq!(
            store.get_at(UserId(1), start + Duration::from_secs(59)).await,
            Some("waiting")
        );
        assert_eq!(
            store.get_at(UserId(1), start + Duration::from_secs(60)).await,
            None
        );
    }

    #[tokio::test]
    async fn reinserting_restarts_the_clock() {
        let store = SessionStore::new(Duration::from_secs(60));
        let start = Instant::now();

        store.insert_at(UserId(1), 1, start).await;
        store
            .insert_at(UserId(1), 2, start + Duration::from_secs(50))
            .await;
        assert_eq!(
            store.get_at(UserId(1), start + Duration::from_secs(100)).await,
            Some(2)
        );
    }

    #[tokio::test]
    async fn expired_entries_are_purged() {
        let store = SessionStore::new(Duration::from_secs(60));
        let start = Instant::now();

        for id in 0..10 {
            store.insert_at(UserId(id), (), start).await;
        }
        assert_eq!(store.len().await, 10);

        store
            .insert_at(UserId(100), (), start + Duration::from_secs(61))
            .await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn removing() {
        let store = SessionStore::new(Duration::from_secs(60));
        let start = Instant::now();

        store.insert_at(UserId(1), 'a', start).await;
        assert_eq!(
            store.remove_at(UserId(1), start + Duration::from_secs(1)).await,
            Some('a')
        );
        assert_eq!(
            store.remove_at(UserId(1), start + Duration::from_secs(2)).await,
            None
        );
    }
}
