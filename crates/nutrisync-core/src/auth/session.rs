use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Identity file name in cache directory
const IDENTITY_FILE: &str = "identity.json";

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.id.is_empty()
    }
}

/// Identity transition delivered to every [`SessionObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn {
        previous: Option<Identity>,
        current: Identity,
        generation: u64,
    },
    LoggedOut {
        previous: Option<Identity>,
        generation: u64,
    },
}

impl SessionEvent {
    pub fn generation(&self) -> u64 {
        match self {
            SessionEvent::LoggedIn { generation, .. } | SessionEvent::LoggedOut { generation, .. } => {
                *generation
            }
        }
    }

    pub fn current(&self) -> Option<&Identity> {
        match self {
            SessionEvent::LoggedIn { current, .. } => Some(current),
            SessionEvent::LoggedOut { .. } => None,
        }
    }
}

/// Receives identity transitions synchronously, before `login`/`logout` return.
///
/// Observers must not call back into `login`/`logout` from the callback.
pub trait SessionObserver: Send + Sync {
    fn identity_changed(&self, event: &SessionEvent);
}

struct SessionInner {
    identity: Option<Identity>,
    generation: u64,
}

/// Single source of truth for who is signed in.
///
/// Every transition bumps a monotonic generation so that work started under
/// one identity can tell it has been overtaken.
pub struct SessionState {
    path: Option<PathBuf>,
    inner: Mutex<SessionInner>,
    // Held for the whole transition so observers see events in order.
    observers: Mutex<Vec<Weak<dyn SessionObserver>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionState {
    /// A session that is never written to disk.
    pub fn in_memory() -> Self {
        Self::with_identity(None, None)
    }

    /// Load the persisted identity from `cache_dir`, if any.
    pub fn load(cache_dir: PathBuf) -> Self {
        let path = cache_dir.join(IDENTITY_FILE);
        let identity = match Self::read_identity(&path) {
            Ok(identity) => identity.filter(Identity::is_authenticated),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable identity file");
                let _ = std::fs::remove_file(&path);
                None
            }
        };
        debug!(signed_in = identity.is_some(), "Session loaded");
        Self::with_identity(Some(path), identity)
    }

    fn with_identity(path: Option<PathBuf>, identity: Option<Identity>) -> Self {
        Self {
            path,
            inner: Mutex::new(SessionInner {
                identity,
                generation: 0,
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    fn read_identity(path: &PathBuf) -> Result<Option<Identity>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).context("Failed to read identity file")?;
        let identity = serde_json::from_str(&contents).context("Failed to parse identity file")?;
        Ok(Some(identity))
    }

    /// Register an observer. Dropped observers are pruned on the next dispatch.
    pub fn subscribe(&self, observer: Weak<dyn SessionObserver>) {
        lock(&self.observers).push(observer);
    }

    pub fn current(&self) -> Option<Identity> {
        lock(&self.inner).identity.clone()
    }

    /// Current identity together with the generation it was observed at.
    pub fn snapshot(&self) -> (Option<Identity>, u64) {
        let inner = lock(&self.inner);
        (inner.identity.clone(), inner.generation)
    }

    pub fn generation(&self) -> u64 {
        lock(&self.inner).generation
    }

    pub fn is_authenticated(&self) -> bool {
        lock(&self.inner)
            .identity
            .as_ref()
            .is_some_and(Identity::is_authenticated)
    }

    pub fn login(&self, id: &str, name: &str) {
        if id.is_empty() {
            warn!("Login with empty identifier treated as logout");
            self.logout();
            return;
        }
        self.transition(Some(Identity::new(id, name)), None);
    }

    pub fn logout(&self) {
        self.transition(None, None);
    }

    /// Log out only if nothing has changed since `generation` was observed.
    ///
    /// Returns whether the session was invalidated.
    pub fn invalidate(&self, generation: u64) -> bool {
        self.transition(None, Some(generation))
    }

    fn transition(&self, next: Option<Identity>, expected_generation: Option<u64>) -> bool {
        let mut observers = lock(&self.observers);

        let event = {
            let mut inner = lock(&self.inner);
            if let Some(expected) = expected_generation {
                if inner.generation != expected {
                    debug!(
                        expected,
                        actual = inner.generation,
                        "Ignoring invalidation from an earlier session"
                    );
                    return false;
                }
            }
            let previous = std::mem::replace(&mut inner.identity, next.clone());
            inner.generation += 1;
            let generation = inner.generation;
            match next {
                Some(current) => SessionEvent::LoggedIn {
                    previous,
                    current,
                    generation,
                },
                None => SessionEvent::LoggedOut {
                    previous,
                    generation,
                },
            }
        };

        match event.current() {
            Some(identity) => {
                info!(user_id = %identity.id, "Signed in");
                if let Err(e) = self.persist(identity) {
                    warn!(error = %e, "Failed to persist identity");
                }
            }
            None => {
                info!("Signed out");
                if let Err(e) = self.clear_persisted() {
                    warn!(error = %e, "Failed to clear persisted identity");
                }
            }
        }

        observers.retain(|weak| match weak.upgrade() {
            Some(observer) => {
                observer.identity_changed(&event);
                true
            }
            None => false,
        });
        true
    }

    fn persist(&self, identity: &Identity) -> Result<()> {
        if let Some(ref path) = self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(identity)?;
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    fn clear_persisted(&self) -> Result<()> {
        if let Some(ref path) = self.path {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<SessionEvent>>,
    }

    impl SessionObserver for Recorder {
        fn identity_changed(&self, event: &SessionEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_authenticated_is_derived_from_identifier() {
        let session = SessionState::in_memory();
        assert!(!session.is_authenticated());

        session.login("u1", "Ada");
        assert!(session.is_authenticated());

        session.logout();
        assert!(!session.is_authenticated());
        assert!(session.current().is_none());
    }

    #[test]
    fn test_empty_identifier_logs_out() {
        let session = SessionState::in_memory();
        session.login("u1", "Ada");
        session.login("", "Nobody");
        assert!(session.current().is_none());
    }

    #[test]
    fn test_observers_receive_events_in_order() {
        let session = SessionState::in_memory();
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn SessionObserver> = Arc::downgrade(&recorder) as Weak<dyn SessionObserver>;
        session.subscribe(weak);

        session.login("u1", "Ada");
        session.login("u2", "Grace");
        session.logout();

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            SessionEvent::LoggedIn {
                previous: Some(Identity::new("u1", "Ada")),
                current: Identity::new("u2", "Grace"),
                generation: 2,
            }
        );
        assert_eq!(
            events[2],
            SessionEvent::LoggedOut {
                previous: Some(Identity::new("u2", "Grace")),
                generation: 3,
            }
        );
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let session = SessionState::in_memory();
        let recorder = Arc::new(Recorder::default());
        session.subscribe(Arc::downgrade(&recorder) as Weak<dyn SessionObserver>);
        drop(recorder);

        session.login("u1", "Ada");
        assert!(lock(&session.observers).is_empty());
    }

    #[test]
    fn test_stale_invalidation_is_ignored() {
        let session = SessionState::in_memory();
        session.login("u1", "Ada");
        let stale = session.generation();
        session.login("u2", "Grace");

        assert!(!session.invalidate(stale));
        assert_eq!(session.current(), Some(Identity::new("u2", "Grace")));

        assert!(session.invalidate(session.generation()));
        assert!(session.current().is_none());
    }

    #[test]
    fn test_identity_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();

        let session = SessionState::load(dir.path().to_path_buf());
        session.login("u1", "Ada");

        let reloaded = SessionState::load(dir.path().to_path_buf());
        assert_eq!(reloaded.current(), Some(Identity::new("u1", "Ada")));

        reloaded.logout();
        assert!(!dir.path().join(IDENTITY_FILE).exists());
        assert!(SessionState::load(dir.path().to_path_buf()).current().is_none());
    }

    #[test]
    fn test_corrupt_identity_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(IDENTITY_FILE), "{not json").unwrap();

        let session = SessionState::load(dir.path().to_path_buf());
        assert!(session.current().is_none());
        assert!(!dir.path().join(IDENTITY_FILE).exists());
    }
}
