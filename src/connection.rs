//! Lifecycle of the primary and cursor connections to one logical database.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{RelationalServer, Session};
use crate::config::{ConnectionProfile, EngineConfig};
use crate::error::TransferError;
use crate::executor::{StatementExecutor, with_timeout};
use crate::types::ConnectionKind;

/// Owns at most one primary and one cursor session, both opened from the same
/// [`ConnectionProfile`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tabular_bridge::prelude::*;
///
/// # async fn demo() -> Result<(), TransferError> {
/// let mut manager = ConnectionManager::new(Arc::new(SqliteServer::new()), EngineConfig::default());
/// manager.connect(ConnectionProfile::integrated(":memory:", "demo")).await?;
/// assert!(manager.is_live());
/// manager.terminate().await;
/// assert!(!manager.is_live());
/// # Ok(()) }
/// ```
pub struct ConnectionManager {
    server: Arc<dyn RelationalServer>,
    config: EngineConfig,
    profile: Option<ConnectionProfile>,
    primary: Option<Box<dyn Session>>,
    cursor: Option<Box<dyn Session>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("profile", &self.profile)
            .field("primary_open", &self.primary.as_ref().map(|s| s.is_open()))
            .field("cursor_open", &self.cursor.as_ref().map(|s| s.is_open()))
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    #[must_use]
    pub fn new(server: Arc<dyn RelationalServer>, config: EngineConfig) -> Self {
        Self {
            server,
            config,
            profile: None,
            primary: None,
            cursor: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Profile of the current connection, if any.
    #[must_use]
    pub fn profile(&self) -> Option<&ConnectionProfile> {
        self.profile.as_ref()
    }

    /// Open the primary connection for `profile`.
    ///
    /// Any existing connections (primary and cursor) are torn down first. On
    /// failure the manager is left unconnected.
    ///
    /// # Errors
    /// Returns `ConnectionError` (or `Timeout`) if the session cannot be opened.
    pub async fn connect(
        &mut self,
        profile: ConnectionProfile,
    ) -> Result<&ConnectionProfile, TransferError> {
        self.terminate().await;
        let session = self.open(&profile, ConnectionKind::Primary).await?;
        info!(server = %profile.server, catalog = %profile.catalog, "connected");
        self.primary = Some(session);
        Ok(self.profile.insert(profile))
    }

    /// True iff the primary connection exists and is open.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.primary.as_ref().is_some_and(|s| s.is_open())
    }

    fn require_live(&self) -> Result<&ConnectionProfile, TransferError> {
        match &self.profile {
            Some(profile) if self.is_live() => Ok(profile),
            _ => Err(TransferError::NotConnected(ConnectionKind::Primary)),
        }
    }

    /// Open the cursor connection unless a usable one is already open.
    ///
    /// # Errors
    /// Returns `NotConnected` without a live primary connection, or
    /// `ConnectionError` if the cursor session cannot be opened.
    pub async fn ensure_cursor_connection(&mut self) -> Result<(), TransferError> {
        self.require_live()?;
        if self.cursor.as_ref().is_some_and(|s| s.is_open()) {
            return Ok(());
        }
        self.reopen_cursor_connection().await
    }

    /// Close the current cursor connection (if any) and open a fresh one.
    ///
    /// # Errors
    /// Same as [`ConnectionManager::ensure_cursor_connection`].
    pub async fn reopen_cursor_connection(&mut self) -> Result<(), TransferError> {
        let profile = self.require_live()?.clone();
        if let Some(mut stale) = self.cursor.take() {
            close_quietly(stale.as_mut()).await;
        }
        let session = self.open(&profile, ConnectionKind::Cursor).await?;
        self.cursor = Some(session);
        Ok(())
    }

    /// Replace a primary session that a timed-out statement left unusable.
    /// Does nothing while the primary is open, or after `terminate`.
    async fn revive_primary(&mut self) -> Result<(), TransferError> {
        if self.primary.as_ref().is_none_or(|s| s.is_open()) {
            return Ok(());
        }
        let Some(profile) = self.profile.clone() else {
            return Ok(());
        };
        if let Some(mut stale) = self.primary.take() {
            close_quietly(stale.as_mut()).await;
        }
        warn!(
            server = %profile.server,
            catalog = %profile.catalog,
            "primary connection unusable; reopening"
        );
        let session = self.open(&profile, ConnectionKind::Primary).await?;
        self.primary = Some(session);
        Ok(())
    }

    async fn open(
        &self,
        profile: &ConnectionProfile,
        kind: ConnectionKind,
    ) -> Result<Box<dyn Session>, TransferError> {
        let description = profile.describe(kind);
        debug!(connection = %description, "opening {kind} connection");
        with_timeout(
            self.config.connect_timeout(),
            &format!("opening {kind} connection"),
            self.server.open_session(profile, kind, &self.config),
        )
        .await
        .map_err(|err| match err {
            TransferError::ConnectionError(_) | TransferError::Timeout { .. } => err,
            other => TransferError::ConnectionError(format!("{description}: {other}")),
        })
    }

    /// Close both connections. Never fails; close-time errors are logged and dropped.
    pub async fn terminate(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            close_quietly(cursor.as_mut()).await;
        }
        if let Some(mut primary) = self.primary.take() {
            close_quietly(primary.as_mut()).await;
        }
        if self.profile.take().is_some() {
            debug!("connections terminated");
        }
    }

    /// The open session of `kind`, reopening a primary session that a timed-out
    /// statement left unusable.
    ///
    /// # Errors
    /// Returns `NotConnected` when that slot is empty or closed, or the
    /// reconnect error.
    pub async fn live_session(
        &mut self,
        kind: ConnectionKind,
    ) -> Result<&mut dyn Session, TransferError> {
        self.revive_primary().await?;
        if kind == ConnectionKind::Cursor {
            self.ensure_cursor_connection().await?;
        }
        self.session(kind)
    }

    /// The open session of `kind`.
    ///
    /// # Errors
    /// Returns `NotConnected` when that slot is empty or closed.
    pub fn session(&mut self, kind: ConnectionKind) -> Result<&mut dyn Session, TransferError> {
        let slot = match kind {
            ConnectionKind::Primary => &mut self.primary,
            ConnectionKind::Cursor => &mut self.cursor,
        };
        match slot {
            Some(session) if session.is_open() => Ok(session.as_mut()),
            _ => Err(TransferError::NotConnected(kind)),
        }
    }

    /// Statement executor bound to the connection of `kind`.
    ///
    /// The cursor connection is opened on demand, and a primary connection left
    /// unusable by a timed-out statement is reopened. The executor itself checks
    /// liveness on every call.
    ///
    /// # Errors
    /// Returns `NotConnected` without a live primary connection.
    pub async fn executor(
        &mut self,
        kind: ConnectionKind,
    ) -> Result<StatementExecutor<'_>, TransferError> {
        self.revive_primary().await?;
        self.require_live()?;
        if kind == ConnectionKind::Cursor {
            self.ensure_cursor_connection().await?;
        }
        let timeout = self.config.command_timeout();
        let session = self.session(kind)?;
        Ok(StatementExecutor::new(session, timeout))
    }
}

async fn close_quietly(session: &mut dyn Session) {
    let kind = session.kind();
    if let Err(err) = session.close().await {
        warn!(%kind, "error while closing connection ignored: {err}");
    }
}
