//! ConversationSessionCache: one long-lived agent per conversation key.

use async_trait::async_trait;
use pollbridge_core::agent::Agent;
use pollbridge_core::error::GenerationError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Builds a fresh agent session for a conversation key.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, conversation_key: &str) -> Result<Arc<dyn Agent>, GenerationError>;
}

struct Session {
    agent: Arc<dyn Agent>,
    last_activity: Instant,
}

pub struct ConversationSessionCache {
    factory: Arc<dyn SessionFactory>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl ConversationSessionCache {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The session for `conversation_key`, created on first use.
    ///
    /// Creation happens under the cache lock, so two racing callers for a
    /// new key still end up sharing one session.
    pub async fn get_or_create(
        &self,
        conversation_key: &str,
    ) -> Result<Arc<dyn Agent>, GenerationError> {
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get_mut(conversation_key) {
            session.last_activity = Instant::now();
            return Ok(session.agent.clone());
        }

        let agent = self.factory.create(conversation_key).await?;
        sessions.insert(
            conversation_key.to_string(),
            Session {
                agent: agent.clone(),
                last_activity: Instant::now(),
            },
        );
        info!(conversation = conversation_key, total = sessions.len(), "Created conversation session");
        Ok(agent)
    }

    /// Drop sessions idle for longer than `max_idle`. Returns how many went.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|key, session| {
            let keep = session.last_activity.elapsed() <= max_idle;
            if !keep {
                debug!(conversation = %key, "Evicting idle session");
            }
            keep
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.sessions.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedFactory, chunks};

    #[tokio::test(start_paused = true)]
    async fn reuses_one_session_per_key() {
        let factory = ScriptedFactory::new(chunks(&["hi"]));
        let cache = ConversationSessionCache::new(factory.clone());

        let a = cache.get_or_create("single_alice").await.unwrap();
        let b = cache.get_or_create("single_alice").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        cache.get_or_create("group_ops").await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn racing_lookups_create_once() {
        let factory = ScriptedFactory::new(chunks(&["hi"]));
        let cache = Arc::new(ConversationSessionCache::new(factory.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_or_create("single_bob").await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_idle_sessions() {
        let factory = ScriptedFactory::new(chunks(&["hi"]));
        let cache = ConversationSessionCache::new(factory.clone());

        cache.get_or_create("old").await.unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        cache.get_or_create("fresh").await.unwrap();

        assert_eq!(cache.evict_idle(Duration::from_secs(300)).await, 1);
        assert_eq!(cache.len().await, 1);

        // the evicted key gets a new session next time
        cache.get_or_create("old").await.unwrap();
        assert_eq!(factory.created(), 3);
    }

    #[tokio::test]
    async fn factory_failure_is_not_cached() {
        let factory = ScriptedFactory::new(chunks(&["hi"]));
        factory.fail_next("no provider configured");
        let cache = ConversationSessionCache::new(factory.clone());

        assert!(matches!(
            cache.get_or_create("single_carol").await,
            Err(GenerationError::Session(_))
        ));
        assert!(cache.is_empty().await);
        assert!(cache.get_or_create("single_carol").await.is_ok());
    }
}
