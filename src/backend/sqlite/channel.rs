use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::params::BoundParam;
use crate::error::TransferError;
use crate::results::ResultSet;
use crate::schema::DestinationTableSchema;
use crate::types::RowValues;

pub(super) type Reply<T> = oneshot::Sender<Result<T, TransferError>>;

/// Rows streamed back from a running query.
pub(super) type RowSender = mpsc::Sender<Result<Vec<RowValues>, TransferError>>;

pub(super) enum BulkMessage {
    Row(Vec<RowValues>),
    /// All rows sent; commit what is pending.
    Finish,
}

pub(super) enum Command {
    Execute {
        query: String,
        params: Vec<BoundParam>,
        respond_to: Reply<u64>,
    },
    Stream {
        query: String,
        params: Vec<BoundParam>,
        columns_to: Reply<Arc<Vec<String>>>,
        rows_to: RowSender,
    },
    FetchAll {
        query: String,
        params: Vec<BoundParam>,
        respond_to: Reply<ResultSet>,
    },
    Scalar {
        query: String,
        params: Vec<BoundParam>,
        respond_to: Reply<Option<RowValues>>,
    },
    TableInfo {
        table: String,
        respond_to: Reply<DestinationTableSchema>,
    },
    BulkCopy {
        table: String,
        columns: Vec<String>,
        batch_size: usize,
        rows: mpsc::Receiver<BulkMessage>,
        respond_to: Reply<u64>,
    },
    /// Answered once every earlier command has finished.
    Ping {
        ack: oneshot::Sender<()>,
    },
    Shutdown {
        ack: Option<oneshot::Sender<()>>,
    },
}

impl Command {
    /// The caller stopped waiting for the answer (it timed out) before the
    /// worker got to this command.
    pub(super) fn abandoned(&self) -> bool {
        match self {
            Command::Execute { respond_to, .. } | Command::BulkCopy { respond_to, .. } => {
                respond_to.is_closed()
            }
            Command::Stream { columns_to, .. } => columns_to.is_closed(),
            Command::FetchAll { respond_to, .. } => respond_to.is_closed(),
            Command::Scalar { respond_to, .. } => respond_to.is_closed(),
            Command::TableInfo { respond_to, .. } => respond_to.is_closed(),
            Command::Ping { .. } | Command::Shutdown { .. } => false,
        }
    }
}
