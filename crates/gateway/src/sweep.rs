//! Periodic housekeeping: expire old tasks and evict idle sessions.

use pollbridge_agent::GenerationTaskRegistry;
use pollbridge_config::{SessionConfig, TaskConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    pub interval: Duration,
    pub task_ttl: Duration,
    /// `None` keeps sessions forever
    pub session_idle: Option<Duration>,
}

impl SweepPolicy {
    pub fn from_config(tasks: &TaskConfig, sessions: &SessionConfig) -> Self {
        Self {
            interval: Duration::from_secs(tasks.sweep_interval_secs.max(1)),
            task_ttl: Duration::from_secs(tasks.task_ttl_secs),
            session_idle: (sessions.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(sessions.idle_timeout_secs)),
        }
    }
}

/// Returns `(expired_tasks, evicted_sessions)`.
pub async fn sweep_once(registry: &GenerationTaskRegistry, policy: &SweepPolicy) -> (usize, usize) {
    let expired = registry.expire_older_than(policy.task_ttl);
    let evicted = match policy.session_idle {
        Some(idle) => registry.sessions().evict_idle(idle).await,
        None => 0,
    };
    if expired > 0 || evicted > 0 {
        info!(expired, evicted, "Housekeeping sweep");
    } else {
        debug!(remaining = registry.len(), "Housekeeping sweep found nothing to do");
    }
    (expired, evicted)
}

pub fn spawn_sweeper(registry: Arc<GenerationTaskRegistry>, policy: SweepPolicy) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(policy.interval);
        // the first tick completes at once
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&registry, &policy).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::registry_with_answer;

    #[test]
    fn policy_from_config() {
        let policy = SweepPolicy::from_config(&TaskConfig::default(), &SessionConfig::default());
        assert_eq!(policy.interval, Duration::from_secs(300));
        assert_eq!(policy.task_ttl, Duration::from_secs(600));
        assert!(policy.session_idle.is_none());

        let sessions = SessionConfig {
            idle_timeout_secs: 1800,
        };
        let policy = SweepPolicy::from_config(&TaskConfig::default(), &sessions);
        assert_eq!(policy.session_idle, Some(Duration::from_secs(1800)));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_expires_tasks_and_idle_sessions() {
        let registry = registry_with_answer("done");
        registry.start("q1", "single_a");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(registry.sessions().len().await, 1);

        let policy = SweepPolicy {
            interval: Duration::from_secs(60),
            task_ttl: Duration::from_secs(90),
            session_idle: Some(Duration::from_secs(90)),
        };
        let handle = spawn_sweeper(registry.clone(), policy);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(registry.len(), 1, "too young to expire");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(registry.is_empty());
        assert!(registry.sessions().is_empty().await);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_kept_without_idle_timeout() {
        let registry = registry_with_answer("done");
        registry.start("q1", "single_a");
        tokio::time::sleep(Duration::from_secs(1000)).await;

        let policy = SweepPolicy::from_config(&TaskConfig::default(), &SessionConfig::default());
        assert_eq!(sweep_once(&registry, &policy).await, (1, 0));
        assert_eq!(registry.sessions().len().await, 1);
    }
}
