//! Authenticated session state.
//!
//! One `SessionStore` per process holds the bearer token, the user identity
//! and the absolute expiry instant. Every mutation is written through to
//! durable storage while the state lock is held, so the persisted record and
//! the in-memory copy never disagree.

pub mod storage;
pub mod sweeper;

use crate::clock::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::Storage;
use tracing::{debug, info, warn};

/// Storage key of the persisted session record
pub const SESSION_KEY: &str = "auth-storage";

const RECORD_FIELDS: [&str; 4] = ["token", "user", "expiresAt", "isAuthenticated"];

/// Minimal identity attached to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }
}

/// Snapshot of the session; also the persisted record layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub is_authenticated: bool,
    pub token: Option<String>,
    pub user: Option<User>,
    /// Epoch milliseconds
    pub expires_at: Option<i64>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        *self == Session::default()
    }

    fn expired_at(&self, now: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => true,
        }
    }
}

/// Why a request could not proceed with the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No token when one was required
    Unauthenticated,
    /// Local clock is past `expires_at`
    Expired,
    /// Server answered 401
    Unauthorized,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Expired => "expired",
            Self::Unauthorized => "unauthorized",
        }
    }
}

/// What initialization found in durable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No record, or a logged-out record
    Empty,
    Restored,
    /// Record was complete but past its expiry; discarded
    Expired,
    /// Record was partial or malformed; discarded
    Corrupt(String),
}

/// Handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&Session) + Send + Sync>;

struct Inner {
    state: Mutex<Session>,
    storage: Box<dyn Storage>,
    clock: Box<dyn Clock>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
}

/// Process-wide session holder; clones share state
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SessionStore")
            .field("is_authenticated", &state.is_authenticated)
            .field("user", &state.user)
            .field("expires_at", &state.expires_at)
            .finish()
    }
}

impl SessionStore {
    /// Create a store and load any previously persisted session.
    /// Expired or partial records are removed, never resurrected.
    pub fn open(storage: impl Storage + 'static, clock: impl Clock + 'static) -> (Self, LoadOutcome) {
        let store = Self {
            inner: Arc::new(Inner {
                state: Mutex::new(Session::default()),
                storage: Box::new(storage),
                clock: Box::new(clock),
                listeners: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
            }),
        };
        let outcome = store.load();
        (store, outcome)
    }

    fn load(&self) -> LoadOutcome {
        let raw = match self.inner.storage.get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return LoadOutcome::Empty,
            Err(e) => {
                warn!("Failed to read persisted session: {:#}", e);
                return LoadOutcome::Empty;
            }
        };

        let now = self.inner.clock.now_millis();
        let mut state = self.inner.state.lock();
        let outcome = match parse_record(&raw, now) {
            Ok(Some(session)) => {
                info!(
                    user = session.user.as_ref().map(|u| u.username.as_str()),
                    "Restored persisted session"
                );
                *state = session;
                LoadOutcome::Restored
            }
            Ok(None) => LoadOutcome::Empty,
            Err(RecordError::Expired) => {
                info!("Persisted session has expired, discarding");
                LoadOutcome::Expired
            }
            Err(RecordError::Corrupt(reason)) => {
                warn!("Persisted session is corrupt ({}), discarding", reason);
                LoadOutcome::Corrupt(reason)
            }
        };

        if matches!(outcome, LoadOutcome::Expired | LoadOutcome::Corrupt(_)) {
            *state = Session::default();
            self.persist(&state);
        }
        outcome
    }

    /// Overwrite the session with a freshly issued token
    pub fn set_auth(&self, token: &str, expires_in_secs: u64, user: User) {
        let now = self.inner.clock.now_millis();
        let expires_in_millis = i64::try_from(expires_in_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        let snapshot = {
            let mut state = self.inner.state.lock();
            *state = Session {
                is_authenticated: true,
                token: Some(token.to_string()),
                user: Some(user),
                expires_at: Some(now.saturating_add(expires_in_millis)),
            };
            self.persist(&state);
            state.clone()
        };
        info!(
            user = snapshot.user.as_ref().map(|u| u.username.as_str()),
            expires_in_secs, "Session established"
        );
        self.notify(&snapshot);
    }

    /// Reset to the empty session and drop the persisted record.
    /// Clearing an empty session changes nothing and notifies no one.
    pub fn clear_auth(&self) {
        let snapshot = {
            let mut state = self.inner.state.lock();
            if state.is_empty() {
                return;
            }
            *state = Session::default();
            self.persist(&state);
            state.clone()
        };
        debug!("Session cleared");
        self.notify(&snapshot);
    }

    /// Replace the identity of the current session; expiry is untouched.
    /// Returns false when there is no session to update.
    pub fn update_user(&self, user: User) -> bool {
        let snapshot = {
            let mut state = self.inner.state.lock();
            if state.token.is_none() {
                return false;
            }
            state.user = Some(user);
            self.persist(&state);
            state.clone()
        };
        self.notify(&snapshot);
        true
    }

    /// True when there is no expiry or the clock has reached it
    #[allow(dead_code)] // Read-only check; callers that act use check_token_expiry
    pub fn is_token_expired(&self) -> bool {
        let now = self.inner.clock.now_millis();
        self.inner.state.lock().expired_at(now)
    }

    /// Clear a session whose token has expired. Returns true if it did.
    pub fn check_token_expiry(&self) -> bool {
        let now = self.inner.clock.now_millis();
        let snapshot = {
            let mut state = self.inner.state.lock();
            if state.token.is_none() || !state.expired_at(now) {
                return false;
            }
            *state = Session::default();
            self.persist(&state);
            state.clone()
        };
        info!("Session expired, cleared");
        self.notify(&snapshot);
        true
    }

    /// Pre-flight check for an authenticated request.
    ///
    /// Read and possible clear happen under one lock acquisition.
    pub fn bearer_token(&self) -> Result<String, AuthFailure> {
        let now = self.inner.clock.now_millis();
        let snapshot = {
            let mut state = self.inner.state.lock();
            let token = match &state.token {
                Some(token) => token.clone(),
                None => return Err(AuthFailure::Unauthenticated),
            };
            if !state.expired_at(now) {
                return Ok(token);
            }
            *state = Session::default();
            self.persist(&state);
            state.clone()
        };
        self.notify(&snapshot);
        Err(AuthFailure::Expired)
    }

    pub fn snapshot(&self) -> Session {
        self.inner.state.lock().clone()
    }

    #[allow(dead_code)] // Requests go through bearer_token
    pub fn token(&self) -> Option<String> {
        self.inner.state.lock().token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.lock().user.clone()
    }

    #[allow(dead_code)] // Callers needing several fields take a snapshot
    pub fn expires_at(&self) -> Option<i64> {
        self.inner.state.lock().expires_at
    }

    #[allow(dead_code)] // Callers needing several fields take a snapshot
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().is_authenticated
    }

    /// Time left before expiry, if a live session exists
    pub fn remaining(&self) -> Option<Duration> {
        let now = self.inner.clock.now_millis();
        let expires_at = self.inner.state.lock().expires_at?;
        let left = expires_at.checked_sub(now)?;
        u64::try_from(left).ok().filter(|ms| *ms > 0).map(Duration::from_millis)
    }

    /// Register a listener called with a snapshot after every mutation
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Session) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn notify(&self, snapshot: &Session) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    // Caller holds the state lock.
    fn persist(&self, session: &Session) {
        let result = if session.is_empty() {
            self.inner.storage.remove(SESSION_KEY)
        } else {
            serde_json::to_string(session)
                .map_err(anyhow::Error::from)
                .and_then(|json| self.inner.storage.set(SESSION_KEY, &json))
        };
        if let Err(e) = result {
            warn!("Failed to persist session: {:#}", e);
        }
    }
}

enum RecordError {
    Expired,
    Corrupt(String),
}

/// Validate a persisted record. `Ok(None)` is a well-formed logged-out record.
fn parse_record(raw: &str, now: i64) -> Result<Option<Session>, RecordError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| RecordError::Corrupt(format!("invalid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| RecordError::Corrupt("record is not an object".to_string()))?;
    for field in RECORD_FIELDS {
        if !object.contains_key(field) {
            return Err(RecordError::Corrupt(format!("missing field '{}'", field)));
        }
    }

    let session: Session = serde_json::from_value(value)
        .map_err(|e| RecordError::Corrupt(format!("malformed field: {}", e)))?;

    match (&session.token, &session.user, session.expires_at) {
        (None, None, None) if !session.is_authenticated => Ok(None),
        (Some(_), Some(_), Some(expires_at)) if session.is_authenticated => {
            if now >= expires_at {
                Err(RecordError::Expired)
            } else {
                Ok(Some(session))
            }
        }
        _ => Err(RecordError::Corrupt("partially populated session".to_string())),
    }
}
