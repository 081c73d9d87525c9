//! Profile store: the signed-in user's profile, kept fresh.
//!
//! The store reconciles three copies of the profile (memory, the on-disk
//! cache, and the server) for whichever identity is current. It serves
//! fresh cached values without touching the network, shares one in-flight
//! fetch between concurrent callers, retries transient failures, and drops
//! any result that was overtaken by a newer request or an identity change.
//!
//! Identity changes reach the store through [`SessionObserver`], dispatched
//! synchronously by `SessionState`, so state for a departed user is gone
//! before `login`/`logout` returns.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, TransportKind};
use crate::auth::{Identity, SessionEvent, SessionObserver, SessionState};
use crate::cache::{CacheEntry, CacheManager};
use crate::models::Profile;

// ============================================================================
// Constants
// ============================================================================

/// A fetched profile is served without a network call for 5 minutes.
const FRESHNESS_WINDOW_SECS: u64 = 5 * 60;

/// A persisted profile older than an hour is not restored at startup.
const MAX_CACHE_AGE_SECS: u64 = 60 * 60;

/// Attempts per fetch session, including the first.
const MAX_FETCH_ATTEMPTS: u32 = 3;

/// Wait after a timeout or connection failure before trying again.
const TRANSPORT_RETRY_DELAY_SECS: u64 = 2;

/// Wait after a 5xx before trying again.
const SERVER_RETRY_DELAY_SECS: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub transport_delay: Duration,
    pub server_error_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_FETCH_ATTEMPTS,
            transport_delay: Duration::from_secs(TRANSPORT_RETRY_DELAY_SECS),
            server_error_delay: Duration::from_secs(SERVER_RETRY_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, err: &ApiError) -> Duration {
        match err {
            ApiError::ServerError { .. } => self.server_error_delay,
            _ => self.transport_delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub freshness_window: Duration,
    pub max_cache_age: Duration,
    pub retry: RetryPolicy,
    /// Start fetching as soon as someone signs in.
    pub prefetch_on_login: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            freshness_window: Duration::from_secs(FRESHNESS_WINDOW_SECS),
            max_cache_age: Duration::from_secs(MAX_CACHE_AGE_SECS),
            retry: RetryPolicy::default(),
            prefetch_on_login: true,
        }
    }
}

// ============================================================================
// Public Types
// ============================================================================

/// How a fetch resolved for the current identity.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileState {
    Ready(Profile),
    /// The server has no profile for this user yet.
    NeedsSetup,
}

impl ProfileState {
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            ProfileState::Ready(profile) => Some(profile),
            ProfileState::NeedsSetup => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
    Idle,
    Fetching { attempt: u32 },
    Loaded,
    NeedsSetup,
    Failed(String),
}

/// What observers see after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot {
    pub owner_id: Option<String>,
    pub status: FetchStatus,
    pub profile: Option<Profile>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Session expired - please sign in again")]
    AuthRequired,

    #[error("{}", exhausted_message(.last))]
    RetriesExhausted { attempts: u32, last: ApiError },

    #[error("{}", .0.user_message())]
    Api(ApiError),

    #[error("Profile belongs to a different account")]
    OwnerMismatch,

    #[error("Superseded by a newer request")]
    Superseded,
}

fn exhausted_message(last: &ApiError) -> String {
    match last {
        ApiError::Transport {
            kind: TransportKind::Timeout,
            ..
        } => "Connection timeout - the server did not respond. Please try again.".to_string(),
        ApiError::Transport { .. } => {
            "Unable to reach the server. Check your internet connection.".to_string()
        }
        _ => "Server temporarily unavailable. Please try again later.".to_string(),
    }
}

// ============================================================================
// Internal State
// ============================================================================

type FetchResult = Result<ProfileState, StoreError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct Resolved {
    state: ProfileState,
    fetched_at: DateTime<Utc>,
    /// Sequence the resolution was committed under.
    seq: u64,
}

struct InFlight {
    seq: u64,
    owner_id: String,
    cancel: watch::Sender<bool>,
    result: SharedFetch,
}

struct StoreState {
    /// Identity everything below belongs to.
    owner_id: Option<String>,
    resolved: Option<Resolved>,
    status: FetchStatus,
    /// Bumped by every fetch start, save and reset; commits must match it.
    sequence: u64,
    /// Last session generation applied to this state.
    generation: u64,
    in_flight: Option<InFlight>,
}

enum FetchTicket {
    Cached(ProfileState),
    Pending {
        result: SharedFetch,
        seq: u64,
        generation: u64,
    },
}

struct StoreInner {
    api: Arc<ApiClient>,
    session: Arc<SessionState>,
    cache: CacheManager,
    config: StoreConfig,
    state: Mutex<StoreState>,
    updates: watch::Sender<StoreSnapshot>,
    me: Weak<StoreInner>,
}

/// Cached, deduplicated access to the current user's profile.
///
/// Clone is cheap; clones share state.
#[derive(Clone)]
pub struct ProfileStore {
    inner: Arc<StoreInner>,
}

impl ProfileStore {
    /// Create the store, subscribe it to the session, and restore any
    /// persisted profile that still belongs to the current identity.
    pub fn new(api: Arc<ApiClient>, cache: CacheManager, config: StoreConfig) -> Self {
        let session = Arc::clone(api.session());
        let (updates, _) = watch::channel(StoreSnapshot {
            owner_id: None,
            status: FetchStatus::Idle,
            profile: None,
        });

        let inner = Arc::new_cyclic(|me| StoreInner {
            api,
            session,
            cache,
            config,
            state: Mutex::new(StoreState {
                owner_id: None,
                resolved: None,
                status: FetchStatus::Idle,
                sequence: 0,
                generation: 0,
                in_flight: None,
            }),
            updates,
            me: me.clone(),
        });

        let observer: Weak<dyn SessionObserver> = Arc::<StoreInner>::downgrade(&inner);
        inner.session.subscribe(observer);
        inner.restore();

        Self { inner }
    }

    /// Profile for the current identity.
    ///
    /// Unless `force` is set, a result younger than the freshness window is
    /// returned without a network call, and a fetch already in flight for
    /// this identity is joined instead of starting another.
    ///
    /// A fetch overtaken by a forced fetch or a save for the same session
    /// resolves to the newer outcome; only an identity change or a reset
    /// yields [`StoreError::Superseded`].
    pub async fn fetch(&self, force: bool) -> Result<ProfileState, StoreError> {
        let mut ticket = self.inner.begin_fetch(force)?;
        loop {
            let (result, seq, generation) = match ticket {
                FetchTicket::Cached(state) => return Ok(state),
                FetchTicket::Pending {
                    result,
                    seq,
                    generation,
                } => (result.await, seq, generation),
            };
            match result {
                Err(StoreError::Superseded) => match self.inner.successor(seq, generation) {
                    Some(next) => {
                        debug!(seq, "Following the request that overtook this fetch");
                        ticket = next;
                    }
                    None => return Err(StoreError::Superseded),
                },
                result => return result,
            }
        }
    }

    /// Write `profile` for the current identity.
    ///
    /// Not retried. On success the saved profile replaces the held one
    /// exactly as a fetch would; on failure nothing changes.
    pub async fn save(&self, profile: Profile) -> Result<Profile, StoreError> {
        self.inner.save(profile).await
    }

    /// The held profile, if it belongs to the current identity.
    pub fn current(&self) -> Option<Profile> {
        self.state().and_then(|state| match state {
            ProfileState::Ready(profile) => Some(profile),
            ProfileState::NeedsSetup => None,
        })
    }

    /// The held resolution, if it belongs to the current identity.
    pub fn state(&self) -> Option<ProfileState> {
        let identity = self.inner.session.current()?;
        let st = self.inner.lock_state();
        if st.owner_id.as_deref() != Some(identity.id.as_str()) {
            return None;
        }
        st.resolved.as_ref().and_then(|resolved| match &resolved.state {
            ProfileState::Ready(profile) if !profile.belongs_to(&identity.id) => None,
            state => Some(state.clone()),
        })
    }

    pub fn status(&self) -> FetchStatus {
        self.inner.lock_state().status.clone()
    }

    /// When the held resolution was obtained.
    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lock_state()
            .resolved
            .as_ref()
            .map(|resolved| resolved.fetched_at)
    }

    /// The held profile with its fetch time, for reporting its age.
    pub fn entry(&self) -> Option<CacheEntry> {
        let profile = self.current()?;
        let fetched_at = self.last_fetched()?;
        Some(CacheEntry::new(profile, fetched_at))
    }

    /// Notified with a fresh snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.inner.updates.subscribe()
    }

    /// Forget the held profile and its persisted copy.
    pub fn clear(&self) {
        let mut st = self.inner.lock_state();
        let owner = st.owner_id.clone();
        self.inner.reset_locked(&mut st, owner);
        self.inner.purge_cache();
        self.inner.publish(&st);
        info!("Profile cache cleared");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once the fetch session is cancelled or abandoned.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

impl StoreInner {
    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        lock(&self.state)
    }

    fn publish(&self, st: &StoreState) {
        let profile = st
            .resolved
            .as_ref()
            .and_then(|resolved| resolved.state.profile().cloned());
        self.updates.send_replace(StoreSnapshot {
            owner_id: st.owner_id.clone(),
            status: st.status.clone(),
            profile,
        });
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>) -> bool {
        (Utc::now() - fetched_at)
            .to_std()
            .is_ok_and(|age| age < self.config.freshness_window)
    }

    fn purge_cache(&self) {
        if let Err(e) = self.cache.clear_profile() {
            warn!(error = %e, "Failed to purge profile cache");
        }
    }

    fn cancel_in_flight(st: &mut StoreState) {
        if let Some(in_flight) = st.in_flight.take() {
            debug!(seq = in_flight.seq, owner = %in_flight.owner_id, "Cancelling in-flight fetch");
            in_flight.cancel.send_replace(true);
        }
    }

    /// Drop everything held and make `owner_id` the owner.
    fn reset_locked(&self, st: &mut StoreState, owner_id: Option<String>) {
        Self::cancel_in_flight(st);
        st.sequence += 1;
        st.resolved = None;
        st.status = FetchStatus::Idle;
        st.owner_id = owner_id;
    }

    /// Load the persisted entry if it is usable for `owner_id`, else purge it.
    fn restore_locked(&self, st: &mut StoreState, owner_id: &str) {
        match self.cache.load_profile() {
            Ok(Some(entry)) if entry.is_usable_for(owner_id, self.config.max_cache_age) => {
                info!(owner = owner_id, age = %entry.age_display(), "Restored cached profile");
                st.resolved = Some(Resolved {
                    state: ProfileState::Ready(entry.profile),
                    fetched_at: entry.fetched_at,
                    seq: st.sequence,
                });
                st.status = FetchStatus::Loaded;
            }
            Ok(Some(entry)) => {
                debug!(
                    cached_owner = %entry.owner_id,
                    owner = owner_id,
                    "Purging cached profile that is stale or not ours"
                );
                self.purge_cache();
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Purging unreadable profile cache");
                self.purge_cache();
            }
        }
    }

    fn restore(&self) {
        let (identity, generation) = self.session.snapshot();
        let mut st = self.lock_state();
        st.generation = generation;
        match identity.filter(Identity::is_authenticated) {
            Some(identity) => {
                st.owner_id = Some(identity.id.clone());
                self.restore_locked(&mut st, &identity.id);
            }
            None => self.purge_cache(),
        }
        self.publish(&st);
    }

    /// Apply the session transition that produced `generation`, once.
    ///
    /// Whoever gets here first, the session observer or a caller that saw
    /// the new generation, resets the state; later arrivals are no-ops.
    /// Every sign-in and sign-out starts from an empty cache.
    fn reconcile_locked(
        &self,
        st: &mut StoreState,
        identity: Option<&Identity>,
        generation: u64,
    ) -> bool {
        if generation <= st.generation {
            return false;
        }
        debug!(
            held = ?st.owner_id,
            current = ?identity.map(|i| i.id.as_str()),
            generation,
            "Session changed, resetting profile state"
        );
        st.generation = generation;
        self.reset_locked(st, identity.map(|i| i.id.clone()));
        self.purge_cache();
        true
    }

    /// Where a waiter of the superseded fetch `seq` should look next.
    ///
    /// Only a newer fetch or a newer commit within the same session counts.
    fn successor(&self, seq: u64, generation: u64) -> Option<FetchTicket> {
        let st = self.lock_state();
        if st.generation != generation || self.session.generation() != generation {
            return None;
        }
        if let Some(ref in_flight) = st.in_flight {
            if in_flight.seq > seq {
                return Some(FetchTicket::Pending {
                    result: in_flight.result.clone(),
                    seq: in_flight.seq,
                    generation,
                });
            }
        }
        st.resolved
            .as_ref()
            .filter(|resolved| resolved.seq > seq)
            .map(|resolved| FetchTicket::Cached(resolved.state.clone()))
    }

    fn begin_fetch(self: &Arc<Self>, force: bool) -> Result<FetchTicket, StoreError> {
        loop {
            let (identity, generation) = self.session.snapshot();
            let identity = identity
                .filter(Identity::is_authenticated)
                .ok_or(StoreError::NotAuthenticated)?;

            let mut st = self.lock_state();
            if self.session.generation() != generation {
                // Identity moved while we were getting here; look again.
                continue;
            }
            self.reconcile_locked(&mut st, Some(&identity), generation);

            if !force {
                if let Some(ref resolved) = st.resolved {
                    if self.is_fresh(resolved.fetched_at) {
                        debug!(owner = %identity.id, "Serving fresh profile from memory");
                        return Ok(FetchTicket::Cached(resolved.state.clone()));
                    }
                }
                if let Some(ref in_flight) = st.in_flight {
                    if in_flight.owner_id == identity.id {
                        debug!(seq = in_flight.seq, "Joining in-flight profile fetch");
                        return Ok(FetchTicket::Pending {
                            result: in_flight.result.clone(),
                            seq: in_flight.seq,
                            generation,
                        });
                    }
                }
            }

            Self::cancel_in_flight(&mut st);
            st.sequence += 1;
            let seq = st.sequence;
            let (cancel, cancel_rx) = watch::channel(false);

            let task = tokio::spawn(Arc::clone(self).run_fetch(
                seq,
                generation,
                identity.clone(),
                cancel_rx,
            ));
            let result = async move {
                task.await.unwrap_or_else(|e| {
                    warn!(error = %e, "Profile fetch task ended abnormally");
                    Err(StoreError::Superseded)
                })
            }
            .boxed()
            .shared();

            debug!(seq, owner = %identity.id, force, "Starting profile fetch");
            st.in_flight = Some(InFlight {
                seq,
                owner_id: identity.id,
                cancel,
                result: result.clone(),
            });
            st.status = FetchStatus::Fetching { attempt: 1 };
            self.publish(&st);
            return Ok(FetchTicket::Pending {
                result,
                seq,
                generation,
            });
        }
    }

    /// One fetch session: attempts, retry delays, and the final commit.
    async fn run_fetch(
        self: Arc<Self>,
        seq: u64,
        generation: u64,
        identity: Identity,
        mut cancel: watch::Receiver<bool>,
    ) -> FetchResult {
        let policy = self.config.retry;
        let mut attempt = 1;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => {
                    debug!(seq, "Profile fetch cancelled");
                    return Err(StoreError::Superseded);
                }
                result = self.api.get_profile(&identity.id) => result,
            };

            match outcome {
                Ok(profile) if profile.belongs_to(&identity.id) => {
                    return self.commit(seq, generation, &identity.id, ProfileState::Ready(profile));
                }
                Ok(profile) => {
                    warn!(
                        expected = %identity.id,
                        received = %profile.owner_id,
                        "Server returned a profile for another account"
                    );
                    let err = StoreError::OwnerMismatch;
                    self.fail(seq, &err);
                    return Err(err);
                }
                Err(ApiError::NotFound) => {
                    info!(owner = %identity.id, "No profile on server yet");
                    return self.commit(seq, generation, &identity.id, ProfileState::NeedsSetup);
                }
                Err(ApiError::AuthRequired { .. }) => {
                    // The client has already dropped the credential and signed out.
                    return Err(StoreError::AuthRequired);
                }
                Err(err) if err.is_retryable() => {
                    if attempt >= policy.max_attempts {
                        warn!(attempts = attempt, error = %err, "Giving up on profile fetch");
                        let err = StoreError::RetriesExhausted {
                            attempts: attempt,
                            last: err,
                        };
                        self.fail(seq, &err);
                        return Err(err);
                    }

                    let delay = policy.delay_for(&err);
                    warn!(attempt, ?delay, error = %err, "Profile fetch failed, retrying");
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut cancel) => {
                            debug!(seq, "Profile fetch cancelled during backoff");
                            return Err(StoreError::Superseded);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                    self.set_attempt(seq, attempt);
                }
                Err(err) => {
                    warn!(error = %err, "Profile fetch failed");
                    let err = StoreError::Api(err);
                    self.fail(seq, &err);
                    return Err(err);
                }
            }
        }
    }

    /// Whether a result tagged `seq`/`generation` may still touch state.
    fn is_current(&self, st: &StoreState, seq: u64, generation: u64, owner_id: &str) -> bool {
        st.sequence == seq
            && st.owner_id.as_deref() == Some(owner_id)
            && self.session.generation() == generation
    }

    fn commit(&self, seq: u64, generation: u64, owner_id: &str, state: ProfileState) -> FetchResult {
        let mut st = self.lock_state();
        if !self.is_current(&st, seq, generation, owner_id) {
            debug!(seq, current = st.sequence, "Discarding superseded profile response");
            return Err(StoreError::Superseded);
        }
        if st.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
            st.in_flight = None;
        }
        self.apply(&mut st, state.clone());
        Ok(state)
    }

    /// Replace the held resolution and its persisted copy.
    fn apply(&self, st: &mut StoreState, state: ProfileState) {
        let fetched_at = Utc::now();
        match &state {
            ProfileState::Ready(profile) => {
                let entry = CacheEntry::new(profile.clone(), fetched_at);
                if let Err(e) = self.cache.save_profile(&entry) {
                    warn!(error = %e, "Failed to persist profile cache");
                }
                st.status = FetchStatus::Loaded;
            }
            ProfileState::NeedsSetup => {
                self.purge_cache();
                st.status = FetchStatus::NeedsSetup;
            }
        }
        st.resolved = Some(Resolved {
            state,
            fetched_at,
            seq: st.sequence,
        });
        self.publish(st);
    }

    fn fail(&self, seq: u64, err: &StoreError) {
        let mut st = self.lock_state();
        if st.sequence != seq {
            return;
        }
        if st.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
            st.in_flight = None;
        }
        st.status = FetchStatus::Failed(err.to_string());
        self.publish(&st);
    }

    fn set_attempt(&self, seq: u64, attempt: u32) {
        let mut st = self.lock_state();
        if st.sequence == seq {
            st.status = FetchStatus::Fetching { attempt };
            self.publish(&st);
        }
    }

    async fn save(&self, mut profile: Profile) -> Result<Profile, StoreError> {
        let (identity, generation) = self.session.snapshot();
        let identity = identity
            .filter(Identity::is_authenticated)
            .ok_or(StoreError::NotAuthenticated)?;

        if profile.owner_id.is_empty() {
            profile.owner_id = identity.id.clone();
        } else if !profile.belongs_to(&identity.id) {
            return Err(StoreError::OwnerMismatch);
        }

        match self.api.save_profile(&profile).await {
            Ok(()) => {}
            Err(ApiError::AuthRequired { .. }) => return Err(StoreError::AuthRequired),
            Err(err) => {
                warn!(error = %err, "Profile save failed");
                return Err(StoreError::Api(err));
            }
        }

        let mut st = self.lock_state();
        if self.session.generation() != generation {
            debug!("Identity changed while saving, not applying saved profile");
            return Err(StoreError::Superseded);
        }
        self.reconcile_locked(&mut st, Some(&identity), generation);
        // Anything still in flight predates this write.
        Self::cancel_in_flight(&mut st);
        st.sequence += 1;
        self.apply(&mut st, ProfileState::Ready(profile.clone()));
        info!(owner = %identity.id, "Profile saved");
        Ok(profile)
    }
}

impl SessionObserver for StoreInner {
    fn identity_changed(&self, event: &SessionEvent) {
        {
            let mut st = self.lock_state();
            if !self.reconcile_locked(&mut st, event.current(), event.generation()) {
                debug!(
                    generation = event.generation(),
                    "Session change already applied to profile state"
                );
                return;
            }
            self.publish(&st);
        }

        if event.current().is_some()
            && self.config.prefetch_on_login
            && tokio::runtime::Handle::try_current().is_ok()
        {
            if let Some(me) = self.me.upgrade() {
                if let Err(e) = me.begin_fetch(false) {
                    debug!(error = %e, "Prefetch after sign-in skipped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_matches_documented_values() {
        let config = StoreConfig::default();
        assert_eq!(config.freshness_window, Duration::from_secs(300));
        assert_eq!(config.max_cache_age, Duration::from_secs(3600));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.prefetch_on_login);
    }

    #[test]
    fn test_retry_delay_depends_on_failure() {
        let policy = RetryPolicy::default();
        let timeout = ApiError::Transport {
            kind: TransportKind::Timeout,
            message: "timed out".to_string(),
        };
        let server = ApiError::ServerError {
            status: 503,
            message: "busy".to_string(),
        };
        assert_eq!(policy.delay_for(&timeout), Duration::from_secs(2));
        assert_eq!(policy.delay_for(&server), Duration::from_secs(3));
    }

    #[test]
    fn test_exhausted_messages_distinguish_causes() {
        let timeout = StoreError::RetriesExhausted {
            attempts: 3,
            last: ApiError::Transport {
                kind: TransportKind::Timeout,
                message: "timed out".to_string(),
            },
        };
        let server = StoreError::RetriesExhausted {
            attempts: 3,
            last: ApiError::ServerError {
                status: 500,
                message: "boom".to_string(),
            },
        };
        assert!(timeout.to_string().contains("Connection timeout"));
        assert!(server.to_string().contains("Server temporarily unavailable"));
    }

    #[test]
    fn test_request_errors_surface_server_message() {
        let err = StoreError::Api(ApiError::ClientError {
            status: 400,
            message: "Missing user_id".to_string(),
        });
        assert_eq!(err.to_string(), "Missing user_id");
    }

    #[test]
    fn test_profile_state_accessor() {
        assert!(ProfileState::NeedsSetup.profile().is_none());
    }

    /// Starts a fetch from inside session dispatch, before the store hears about the sign-in.
    #[derive(Default)]
    struct EagerFetcher {
        store: Mutex<Option<ProfileStore>>,
        ticket: Mutex<Option<FetchTicket>>,
    }

    impl SessionObserver for EagerFetcher {
        fn identity_changed(&self, event: &SessionEvent) {
            if event.current().is_none() {
                return;
            }
            let store = self.store.lock().unwrap().clone();
            if let Some(store) = store {
                *self.ticket.lock().unwrap() = Some(store.inner.begin_fetch(false).unwrap());
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_started_before_sign_in_is_delivered_survives_it() {
        use wiremock::{
            matchers::{method, path},
            Mock, MockServer, ResponseTemplate,
        };

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get-profile"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "user_id": "u1",
                        "age": 34,
                        "gender": "female",
                        "activity_level": 3,
                        "calorie_target": 2000,
                        "is_vegetarian": false,
                        "is_keto": false,
                        "is_gluten_free": false,
                        "updated_at": null
                    }))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(SessionState::in_memory());
        // Registered ahead of the store, so it runs first on every transition
        let fetcher = Arc::new(EagerFetcher::default());
        let weak: Weak<dyn SessionObserver> = Arc::<EagerFetcher>::downgrade(&fetcher);
        session.subscribe(weak);

        let api = ApiClient::new(
            &server.uri(),
            crate::config::Timeouts::default(),
            Arc::clone(&session),
            crate::auth::TokenStore::in_memory(),
        )
        .unwrap();
        let store = ProfileStore::new(
            Arc::new(api),
            CacheManager::new(dir.path().to_path_buf()).unwrap(),
            StoreConfig {
                prefetch_on_login: false,
                ..StoreConfig::default()
            },
        );
        *fetcher.store.lock().unwrap() = Some(store.clone());

        session.login("u1", "Ada");

        let ticket = fetcher.ticket.lock().unwrap().take();
        let result = match ticket {
            Some(FetchTicket::Pending { result, .. }) => result.await,
            _ => panic!("expected a pending fetch"),
        };
        let state = result.unwrap();
        assert_eq!(state.profile().map(|p| p.calorie_target), Some(2000));
        assert_eq!(store.status(), FetchStatus::Loaded);
    }
}
