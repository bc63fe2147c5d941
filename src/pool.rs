use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, Notify, OwnedMutexGuard};
use tracing::{debug, info};

use crate::config::Config;
use crate::connection::{Connection, Event, Status};
use crate::frame::{serialize_command, Frame};
use crate::pipeline::{Pipeline, Target};
use crate::transaction::Transaction;
use crate::Error;

/// Pool-level notifications. Per-connection lifecycle events are re-emitted
/// here with the member index attached.
#[derive(Clone, Debug)]
pub enum PoolEvent {
    /// The first member reached ready.
    Connected,
    ClientConnected(usize),
    ClientDisconnected(usize, bool),
    ClientError(usize, String),
}

#[derive(Debug)]
struct Member {
    conn: Arc<Mutex<Connection>>,
    status: Arc<Status>,
    index: usize,
}

#[derive(Debug)]
struct PoolShared {
    members: Vec<Member>,
    idle: Notify,
    events: broadcast::Sender<PoolEvent>,
    auto_close_transaction: bool,
}

/// A fixed set of connections sharing one command surface.
///
/// Submits go to the first connection that is ready, not busy and not
/// holding an open transaction; when none qualifies the submitter parks on
/// the pool and rescans as soon as any command completes or any member
/// connects. Wakeup order across waiting submitters is not FIFO, which is
/// acceptable because commands are short-lived and the scan is bounded by
/// the pool size.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Creates `size` connections and dials them concurrently. Resolves as
    /// soon as one member is ready; the rest keep connecting in the
    /// background. Fails only when every member failed.
    pub async fn connect(config: Config, size: usize) -> Result<Pool, Error> {
        if size == 0 {
            return Err(Error::Usage("pool size must be at least 1".to_string()));
        }

        let (events, _) = broadcast::channel(64);
        let mut members = Vec::with_capacity(size);
        for index in 0..size {
            let mut conn = Connection::new(config.clone());
            conn.set_pool_index(index);
            tokio::spawn(forward_events(conn.subscribe(), index, events.clone()));
            members.push(Member {
                status: conn.status(),
                conn: Arc::new(Mutex::new(conn)),
                index,
            });
        }

        let pool = Pool {
            shared: Arc::new(PoolShared {
                members,
                idle: Notify::new(),
                events,
                auto_close_transaction: config.auto_close_transaction,
            }),
        };

        let (tx, mut rx) = mpsc::channel(size);
        for member in &pool.shared.members {
            let conn = member.conn.clone();
            let shared = pool.shared.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let result = conn.lock().await.connect().await;
                if result.is_ok() {
                    shared.idle.notify_one();
                }
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut last_error = Error::Connect("pool is empty".to_string());
        while let Some(result) = rx.recv().await {
            match result {
                Ok(()) => {
                    let _ = pool.shared.events.send(PoolEvent::Connected);
                    info!(size, "pool connected");
                    return Ok(pool);
                }
                Err(err) => last_error = err,
            }
        }
        Err(last_error)
    }

    pub fn size(&self) -> usize {
        self.shared.members.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.shared.events.subscribe()
    }

    /// Serializes and submits one command on the first free connection.
    pub(crate) async fn raw(&self, args: Vec<String>, expects_map: bool) -> Result<Frame, Error> {
        let serialized = serialize_command(&args);
        let mut lease = self.acquire().await?;
        lease.send_raw(serialized, expects_map).await
    }

    /// A pipeline bound to this pool; the connection is picked at send time.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            Target::Pool(self.clone()),
            self.shared.auto_close_transaction,
        )
    }

    /// A pipeline already opened with MULTI. Self-contained to whichever
    /// connection the send picks, and the recommended way to run a
    /// transaction against a pool.
    pub fn pmulti(&self) -> Pipeline {
        self.pipeline().multi()
    }

    /// Reserves an idle connection and opens a MULTI block on it. Fails
    /// right away when no connection is free; see `pmulti` for the
    /// self-contained alternative.
    pub async fn multi(&self) -> Result<Transaction, Error> {
        let lease = self.try_acquire_idle().ok_or_else(|| {
            Error::Usage("no idle connection available to open a transaction".to_string())
        })?;
        Transaction::begin(lease).await
    }

    /// Disconnects every member and wakes parked submitters so their calls
    /// fail instead of hanging.
    pub async fn disconnect(&self) {
        for member in &self.shared.members {
            member.conn.lock().await.disconnect().await;
        }
        self.shared.idle.notify_waiters();
    }

    /// First-free scan, parking on the pool until a connection frees up.
    pub(crate) async fn acquire(&self) -> Result<Lease, Error> {
        loop {
            // Register interest before scanning so a release landing between
            // the scan and the await still wakes this caller.
            let waiter = self.shared.idle.notified();
            tokio::pin!(waiter);
            waiter.as_mut().enable();

            if let Some(lease) = self.try_acquire() {
                return Ok(lease);
            }
            waiter.await;
        }
    }

    fn try_acquire(&self) -> Option<Lease> {
        if let Some(lease) = self.try_acquire_idle() {
            return Some(lease);
        }
        // Nothing is ready. Lease a closed member instead so the submit
        // drives its reconnect, or surfaces the connect error to the caller.
        for member in &self.shared.members {
            if member.status.transaction_open() {
                continue;
            }
            if let Ok(guard) = member.conn.clone().try_lock_owned() {
                debug!(index = member.index, "leasing unready connection");
                return Some(Lease::Pooled(PooledConnection {
                    guard,
                    shared: self.shared.clone(),
                }));
            }
        }
        None
    }

    fn try_acquire_idle(&self) -> Option<Lease> {
        for member in &self.shared.members {
            if !member.status.is_ready()
                || member.status.is_busy()
                || member.status.transaction_open()
            {
                continue;
            }
            if let Ok(guard) = member.conn.clone().try_lock_owned() {
                debug!(index = member.index, "connection leased");
                return Some(Lease::Pooled(PooledConnection {
                    guard,
                    shared: self.shared.clone(),
                }));
            }
        }
        None
    }
}

async fn forward_events(
    mut events: broadcast::Receiver<Event>,
    index: usize,
    pool_events: broadcast::Sender<PoolEvent>,
) {
    loop {
        let forwarded = match events.recv().await {
            Ok(Event::Connected) => PoolEvent::ClientConnected(index),
            Ok(Event::Disconnected { had_error }) => PoolEvent::ClientDisconnected(index, had_error),
            Ok(Event::ConnectError(reason)) | Ok(Event::Error(reason)) => {
                PoolEvent::ClientError(index, reason)
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let _ = pool_events.send(forwarded);
    }
}

/// Exclusive use of one connection, released back to its owner on drop.
///
/// For pooled leases the drop wakes one parked submitter, which is how
/// command completion doubles as the pool's idle signal.
#[derive(Debug)]
pub(crate) enum Lease {
    Direct(OwnedMutexGuard<Connection>),
    Pooled(PooledConnection),
}

impl Deref for Lease {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Lease::Direct(guard) => guard,
            Lease::Pooled(pooled) => &pooled.guard,
        }
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Connection {
        match self {
            Lease::Direct(guard) => guard,
            Lease::Pooled(pooled) => &mut pooled.guard,
        }
    }
}

#[derive(Debug)]
pub(crate) struct PooledConnection {
    guard: OwnedMutexGuard<Connection>,
    shared: Arc<PoolShared>,
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // A transaction nobody closed would otherwise pin this member
        // forever; flag it for a lazy DISCARD before waking a waiter.
        self.guard.mark_abandoned();
        self.shared.idle.notify_one();
    }
}
