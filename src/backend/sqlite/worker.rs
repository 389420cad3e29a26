use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, InterruptHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::channel::Command;
use super::dispatcher::run_sqlite_worker;
use crate::backend::StatementInterrupt;
use crate::error::TransferError;

/// Handle to the thread that owns one `rusqlite::Connection`.
pub(super) struct SqliteWorker {
    sender: mpsc::UnboundedSender<Command>,
    closed: Arc<AtomicBool>,
    interrupt: Arc<SqliteInterrupt>,
}

impl SqliteWorker {
    pub(super) fn spawn(
        conn: Connection,
        label: String,
        live: Arc<AtomicUsize>,
    ) -> Result<Self, TransferError> {
        let (sender, receiver) = mpsc::unbounded_channel::<Command>();
        let closed = Arc::new(AtomicBool::new(false));
        let interrupt = Arc::new(SqliteInterrupt {
            handle: conn.get_interrupt_handle(),
            sender: sender.clone(),
            broken: AtomicBool::new(false),
        });
        let closed_flag = Arc::clone(&closed);
        live.fetch_add(1, Ordering::SeqCst);
        let counter = Arc::clone(&live);
        let spawned = thread::Builder::new()
            .name(format!("sqlite-{label}"))
            .spawn(move || {
                let guard = LiveGuard {
                    counter,
                    closed: closed_flag,
                };
                run_sqlite_worker(conn, receiver, guard);
            });
        if let Err(err) = spawned {
            live.fetch_sub(1, Ordering::SeqCst);
            return Err(TransferError::ConnectionError(format!(
                "failed to spawn SQLite worker thread: {err}"
            )));
        }
        Ok(Self {
            sender,
            closed,
            interrupt,
        })
    }

    pub(super) fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && !self.interrupt.broken.load(Ordering::SeqCst)
            && !self.sender.is_closed()
    }

    pub(super) fn interrupter(&self) -> Arc<dyn StatementInterrupt> {
        Arc::clone(&self.interrupt) as Arc<dyn StatementInterrupt>
    }

    pub(super) fn send_command(&self, command: Command) -> Result<(), TransferError> {
        self.sender
            .send(command)
            .map_err(|_| TransferError::ConnectionError("SQLite worker closed".into()))
    }

    pub(super) async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, TransferError>>) -> Command,
        drop_message: &'static str,
    ) -> Result<T, TransferError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(build(tx))?;
        rx.await
            .map_err(|_| TransferError::ConnectionError(drop_message.into()))?
    }

    /// Stop the worker and wait until its connection is closed.
    pub(super) async fn shutdown(&self) {
        if !self.is_open() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.sender.send(Command::Shutdown { ack: Some(tx) }).is_ok() {
            let _ = rx.await;
        }
    }
}

impl Drop for SqliteWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown { ack: None });
    }
}

/// Interrupts the worker's connection, then waits for the worker to drain its queue.
pub(super) struct SqliteInterrupt {
    handle: InterruptHandle,
    sender: mpsc::UnboundedSender<Command>,
    broken: AtomicBool,
}

#[async_trait]
impl StatementInterrupt for SqliteInterrupt {
    async fn interrupt(&self, grace: Duration) -> bool {
        self.handle.interrupt();
        let (ack, idle) = oneshot::channel();
        if self.sender.send(Command::Ping { ack }).is_err() {
            return true;
        }
        match tokio::time::timeout(grace, idle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    grace_secs = grace.as_secs(),
                    "sqlite worker still busy after interrupt; session marked closed"
                );
                self.broken.store(true, Ordering::SeqCst);
                false
            }
        }
    }
}

/// Marks the session closed and releases its slot in the live counter once the
/// worker thread lets go of the connection.
pub(super) struct LiveGuard {
    counter: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
