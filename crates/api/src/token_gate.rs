//! Credential usability checks and single-flight refresh.
//!
//! The [`TokenGate`] is the only writer of the session credential besides the
//! API client's unauthorized handler. It guarantees that at most one refresh
//! request is in flight per process: the first caller starts a shared refresh
//! future and parks its handle; every caller arriving while it is pending awaits
//! the same handle and observes the same credential or the same failure. The
//! handle is dropped once the refresh settles, so a later expiry triggers a new
//! refresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bizscope_types::{Credential, CredentialStore};
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_EXPIRY_MARGIN_SECS;
use crate::error::RefreshError;

/// Returns `true` when `credential` should not be used at `now`.
///
/// The credential counts as expired `margin` before its actual expiry so a
/// request cannot start with a token that lapses while it is in flight. A
/// credential without a known expiry is never considered expired here; the
/// server gets the final word.
pub fn is_expired(credential: &Credential, now: DateTime<Utc>, margin: TimeDelta) -> bool {
    match credential.expires_at() {
        Some(expires_at) => expires_at - margin <= now,
        None => false,
    }
}

/// Performs the network exchange of an expiring credential for a fresh one.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, current: Option<&Credential>) -> Result<Credential, RefreshError>;
}

/// Session lifecycle as observed by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// A credential has been stored by login or a successful refresh.
    Active,
    /// No session has been established, or the user logged out.
    SignedOut,
    /// The server rejected the credential; the UI should route to login.
    Rejected,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, RefreshError>>>;

struct InFlightRefresh {
    id: u64,
    future: RefreshFuture,
}

/// Decides whether the held credential is usable and refreshes it when not.
pub struct TokenGate {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    margin: TimeDelta,
    in_flight: Mutex<Option<InFlightRefresh>>,
    next_flight_id: AtomicU64,
    session: watch::Sender<SessionState>,
}

impl TokenGate {
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        let initial = match store.read() {
            Ok(Some(_)) => SessionState::Active,
            _ => SessionState::SignedOut,
        };
        let (session, _) = watch::channel(initial);
        Self {
            store,
            refresher,
            margin: TimeDelta::seconds(DEFAULT_EXPIRY_MARGIN_SECS),
            in_flight: Mutex::new(None),
            next_flight_id: AtomicU64::new(1),
            session,
        }
    }

    /// Override the forward safety margin used by [`TokenGate::is_expired`].
    pub fn with_margin(mut self, margin: TimeDelta) -> Self {
        self.margin = margin;
        self
    }

    pub fn margin(&self) -> TimeDelta {
        self.margin
    }

    /// Whether `credential` is expired right now, including the safety margin.
    pub fn is_expired(&self, credential: &Credential) -> bool {
        is_expired(credential, Utc::now(), self.margin)
    }

    /// The stored credential. Store failures are logged and read as "no credential".
    pub fn current(&self) -> Option<Credential> {
        match self.store.read() {
            Ok(credential) => credential,
            Err(error) => {
                warn!(error = %error, "could not read session credential");
                None
            }
        }
    }

    /// Store the credential obtained at login and mark the session active.
    pub fn login(&self, credential: Credential) -> Result<(), RefreshError> {
        self.store.write(&credential)?;
        self.session.send_replace(SessionState::Active);
        info!("session established");
        Ok(())
    }

    /// Clear the credential at user request.
    pub fn logout(&self) -> Result<(), RefreshError> {
        self.store.clear()?;
        self.session.send_replace(SessionState::SignedOut);
        info!("session cleared by logout");
        Ok(())
    }

    /// Clear the credential after the server rejected it and signal the UI.
    pub fn reject_session(&self) {
        if let Err(error) = self.store.clear() {
            warn!(error = %error, "could not clear rejected credential");
        }
        self.session.send_replace(SessionState::Rejected);
        warn!("session rejected by server; credential cleared");
    }

    /// Subscribe to session lifecycle changes.
    pub fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        *self.session.borrow()
    }

    /// Refresh the credential, sharing any refresh already in flight.
    ///
    /// On success the new credential has replaced the old one in the store.
    /// On failure the old credential is left untouched.
    pub async fn refresh(&self) -> Result<Credential, RefreshError> {
        let (flight_id, flight) = self.join_or_start_refresh();
        let outcome = flight.await;
        self.settle(flight_id);
        match &outcome {
            Ok(_) => {
                self.session.send_if_modified(|state| {
                    let changed = *state != SessionState::Active;
                    *state = SessionState::Active;
                    changed
                });
            }
            Err(error) => debug!(flight_id, error = %error, "credential refresh failed"),
        }
        outcome
    }

    fn join_or_start_refresh(&self) -> (u64, RefreshFuture) {
        let mut slot = self.lock_in_flight();
        if let Some(existing) = slot.as_ref() {
            debug!(flight_id = existing.id, "joining in-flight credential refresh");
            return (existing.id, existing.future.clone());
        }

        let flight_id = self.next_flight_id.fetch_add(1, Ordering::Relaxed);
        let store = Arc::clone(&self.store);
        let refresher = Arc::clone(&self.refresher);
        let future = async move {
            let current = store.read()?;
            let refreshed = refresher.refresh(current.as_ref()).await?;
            store.write(&refreshed)?;
            Ok(refreshed)
        }
        .boxed()
        .shared();

        debug!(flight_id, "starting credential refresh");
        *slot = Some(InFlightRefresh {
            id: flight_id,
            future: future.clone(),
        });
        (flight_id, future)
    }

    fn settle(&self, flight_id: u64) {
        let mut slot = self.lock_in_flight();
        if slot.as_ref().is_some_and(|flight| flight.id == flight_id) {
            *slot = None;
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<InFlightRefresh>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
