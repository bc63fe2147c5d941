use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::config::Config;
use crate::connection::{Connection, Event, Status};
use crate::frame::{serialize_command, Frame};
use crate::pipeline::{Pipeline, Target};
use crate::pool::Lease;
use crate::transaction::Transaction;
use crate::Error;

/// A single-connection client.
///
/// The connection sits behind an async mutex, so concurrent submitters queue
/// in lock order and the wire never sees more than one command in flight.
/// Cloning is cheap and shares the connection.
#[derive(Clone, Debug)]
pub struct Client {
    conn: Arc<Mutex<Connection>>,
    status: Arc<Status>,
    events: broadcast::Sender<Event>,
    auto_close_transaction: bool,
}

impl Client {
    /// Dials the server and returns a ready client.
    pub async fn connect(config: Config) -> Result<Client, Error> {
        let auto_close_transaction = config.auto_close_transaction;
        let mut conn = Connection::new(config);
        conn.connect().await?;
        Ok(Client {
            status: conn.status(),
            events: conn.events(),
            conn: Arc::new(Mutex::new(conn)),
            auto_close_transaction,
        })
    }

    /// Serializes and submits one command, waiting for its reply.
    pub(crate) async fn raw(&self, args: Vec<String>, expects_map: bool) -> Result<Frame, Error> {
        let serialized = serialize_command(&args);
        let mut conn = self.conn.lock().await;
        conn.send_raw(serialized, expects_map).await
    }

    /// A batch that flushes as one write when sent.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            Target::Client(self.conn.clone()),
            self.auto_close_transaction,
        )
    }

    /// A pipeline already opened with MULTI.
    pub fn pmulti(&self) -> Pipeline {
        self.pipeline().multi()
    }

    /// Opens a MULTI block, reserving the connection until EXEC or DISCARD.
    /// Other submitters queue behind the transaction.
    pub async fn multi(&self) -> Result<Transaction, Error> {
        let guard = self.conn.clone().lock_owned().await;
        Transaction::begin(Lease::Direct(guard)).await
    }

    /// Closes the connection for good and fails anything still queued.
    pub async fn disconnect(&self) {
        self.conn.lock().await.disconnect().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// True when the connection is up and has no command in flight.
    pub fn is_ready(&self) -> bool {
        self.status.is_ready() && !self.status.is_busy()
    }
}
