//! Per-user conversation memory.
//!
//! Each user has one [`Session`] behind its own async mutex. Holding the
//! guard returned by [`SessionStore::lock`] for a whole transition serializes
//! events from the same user, so a double tap cannot advance a dialogue twice.
//! Sessions idle longer than the TTL are reset on next access and evicted by
//! [`SessionSweeper`].

use dashmap::DashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::debug;

use crate::services::exam::ExamSession;
use crate::services::registration::RegistrationDraft;

#[derive(Debug, Default)]
pub struct Session {
    pub registration: Option<RegistrationDraft>,
    pub exam: Option<ExamSession>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.registration.is_none() && self.exam.is_none()
    }

    pub fn clear(&mut self) {
        self.registration = None;
        self.exam = None;
    }
}

struct Slot {
    session: Session,
    touched: Instant,
}

/// Exclusive access to one user's session until dropped.
pub struct SessionGuard {
    slot: OwnedMutexGuard<Slot>,
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.slot.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.slot.session
    }
}

#[derive(Clone)]
pub struct SessionStore {
    slots: Arc<DashMap<i64, Arc<Mutex<Slot>>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Waits for exclusive access to `user_id`'s session.
    pub async fn lock(&self, user_id: i64) -> SessionGuard {
        let slot = Arc::clone(
            self.slots
                .entry(user_id)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Slot {
                        session: Session::default(),
                        touched: Instant::now(),
                    }))
                })
                .value(),
        );

        let mut slot = slot.lock_owned().await;
        if slot.touched.elapsed() >= self.ttl && !slot.session.is_empty() {
            debug!(user_id, "session expired, starting fresh");
            slot.session.clear();
        }
        slot.touched = Instant::now();

        SessionGuard { slot }
    }

    /// Drops idle sessions nobody is using. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(inner) => inner.touched.elapsed() < self.ttl,
                Err(_) => true,
            }
        });
        before.saturating_sub(self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Periodic eviction of idle sessions.
pub struct SessionSweeper {
    sessions: SessionStore,
    scheduler: JobScheduler,
}

impl SessionSweeper {
    pub async fn new(sessions: SessionStore) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { sessions, scheduler })
    }

    pub async fn start(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Every ten minutes
        let sessions = self.sessions.clone();
        let sweep_job = Job::new_async("0 */10 * * * *", move |_uuid, _l| {
            let sessions = sessions.clone();
            Box::pin(async move {
                let removed = sessions.sweep();
                if removed > 0 {
                    tracing::info!("Evicted {} idle sessions, {} remaining", removed, sessions.len());
                }
            })
        })?;

        self.scheduler.add(sweep_job).await?;
        self.scheduler.start().await?;

        tracing::info!("Session sweeper started - running every 10 minutes");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.scheduler.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registration::{RegistrationDraft, RegistrationStep};

    #[tokio::test]
    async fn test_session_persists_between_locks() {
        let store = SessionStore::new(Duration::from_secs(60));
        {
            let mut session = store.lock(1).await;
            session.registration = Some(RegistrationDraft::new(RegistrationStep::WaitingName));
        }
        let session = store.lock(1).await;
        assert!(session.registration.is_some());

        // Another user's session stays available while this one is held.
        let other = tokio::time::timeout(Duration::from_millis(50), store.lock(2)).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_expired_session_is_reset() {
        let store = SessionStore::new(Duration::ZERO);
        {
            let mut session = store.lock(1).await;
            session.registration = Some(RegistrationDraft::new(RegistrationStep::WaitingName));
        }
        let session = store.lock(1).await;
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_skips_sessions_in_use() {
        let store = SessionStore::new(Duration::ZERO);
        let held = store.lock(1).await;
        drop(store.lock(2).await);

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
        drop(held);
        assert_eq!(store.sweep(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_lock_serializes_same_user() {
        let store = SessionStore::new(Duration::from_secs(60));
        let first = store.lock(7).await;

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut session = store.lock(7).await;
                session.registration = Some(RegistrationDraft::new(RegistrationStep::WaitingPhone));
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(first);
        contender.await.unwrap();

        let session = store.lock(7).await;
        assert_eq!(
            session.registration.as_ref().map(|d| d.step),
            Some(RegistrationStep::WaitingPhone)
        );
    }
}
