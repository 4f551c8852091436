//! Session resolver: attach to the owner's in-progress session or create one.
//!
//! Attach-or-create is serialized per owner by an async mutex. Across
//! processes the store's one-active-session index decides the race, and the
//! loser re-reads and attaches to the winner.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use netguide_core::error::NetGuideError;
use netguide_core::store::LedgerStore;
use netguide_core::types::{Session, SessionStatus};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AssessmentError;
use crate::synchronizer::LedgerSynchronizer;

/// Per-owner guard. The slot remembers the session last resolved for the
/// owner in this process, which is the only handle on anonymous sessions.
/// Identified owners' guards are dropped once idle; the store finds their
/// active session again.
type OwnerGuard = Arc<tokio::sync::Mutex<Option<Uuid>>>;

pub struct SessionResolver {
    store: Arc<dyn LedgerStore>,
    synchronizer: Arc<LedgerSynchronizer>,
    guards: Mutex<HashMap<Option<String>, OwnerGuard>>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn LedgerStore>, synchronizer: Arc<LedgerSynchronizer>) -> Self {
        Self {
            store,
            synchronizer,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Return the owner's in-progress session, creating one if none exists.
    ///
    /// `None` is the anonymous identity of this device.
    pub async fn resolve(&self, owner: Option<&str>) -> Result<Session, AssessmentError> {
        let guard = self.guard_for(owner)?;
        let mut slot = guard.lock().await;

        let session = match owner {
            Some(owner) => self.attach_or_create(owner).await?,
            None => self.attach_or_create_anonymous(*slot).await?,
        };
        *slot = Some(session.id);
        Ok(session)
    }

    /// Recent sessions of an identified owner, newest first.
    pub async fn history(
        &self,
        owner: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Session>, AssessmentError> {
        match owner {
            Some(owner) => Ok(self.store.list_sessions(owner, limit).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Abandon a session so that the next `resolve` starts a fresh one.
    pub async fn abandon(&self, session_id: Uuid) -> Result<bool, AssessmentError> {
        let changed = self
            .synchronizer
            .mark_status(session_id, SessionStatus::Abandoned)
            .await?;
        if changed {
            info!(session_id = %session_id, "Session abandoned");
        }
        Ok(changed)
    }

    /// Leave an in-progress session without finishing it.
    ///
    /// An identified owner's session stays `in_progress` for a later run and
    /// `true` is returned. An anonymous session cannot be found by a later
    /// run, so it is abandoned and `false` is returned.
    pub async fn release(
        &self,
        owner: Option<&str>,
        session_id: Uuid,
    ) -> Result<bool, AssessmentError> {
        if owner.is_some() {
            debug!(session_id = %session_id, "Session left for resumption");
            return Ok(true);
        }
        self.abandon(session_id).await?;
        Ok(false)
    }

    async fn attach_or_create(&self, owner: &str) -> Result<Session, AssessmentError> {
        if let Some(active) = self.store.find_active_session(owner).await? {
            debug!(session_id = %active.id, owner, "Attached to active session");
            return Ok(active);
        }

        match self.store.insert_session(Some(owner)).await {
            Ok(created) => {
                info!(session_id = %created.id, owner, "Session created");
                Ok(created)
            }
            Err(NetGuideError::Conflict(_)) => {
                debug!(owner, "Lost session creation race; re-reading");
                self.store
                    .find_active_session(owner)
                    .await?
                    .ok_or_else(|| {
                        AssessmentError::StoreUnavailable(format!(
                            "active session for {} vanished after conflict",
                            owner
                        ))
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn attach_or_create_anonymous(
        &self,
        remembered: Option<Uuid>,
    ) -> Result<Session, AssessmentError> {
        if let Some(id) = remembered {
            if let Some(session) = self.store.get_session(id).await? {
                if session.is_in_progress() {
                    debug!(session_id = %id, "Attached to anonymous session");
                    return Ok(session);
                }
            }
        }

        let created = self.store.insert_session(None).await?;
        info!(session_id = %created.id, "Anonymous session created");
        Ok(created)
    }

    fn guard_for(&self, owner: Option<&str>) -> Result<OwnerGuard, AssessmentError> {
        let mut guards = self.guards.lock().map_err(|e| {
            AssessmentError::StoreUnavailable(format!("resolver lock poisoned: {}", e))
        })?;
        guards.retain(|key, guard| key.is_none() || Arc::strong_count(guard) > 1);
        Ok(Arc::clone(
            guards.entry(owner.map(str::to_string)).or_default(),
        ))
    }
}

#[cfg(test)]
impl SessionResolver {
    fn guard_count(&self) -> usize {
        self.guards.lock().map(|g| g.len()).unwrap_or_default()
    }
}
