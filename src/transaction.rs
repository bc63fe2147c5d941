use tracing::debug;

use crate::frame::{serialize_command, Frame};
use crate::pool::Lease;
use crate::Error;

/// An open MULTI block, pinned to one reserved connection.
///
/// Commands issued here are queued server-side and acknowledged with QUEUED;
/// `exec` runs the block atomically and returns the array of replies,
/// `discard` drops it. Either way the connection goes back to its owner.
///
/// Dropping a transaction without closing it marks the connection so a
/// DISCARD is sent before its next command; the reservation ends at drop.
#[derive(Debug)]
pub struct Transaction {
    lease: Lease,
    open: bool,
}

impl Transaction {
    /// Sends MULTI on the reserved connection and hands back the open block.
    pub(crate) async fn begin(mut lease: Lease) -> Result<Transaction, Error> {
        let serialized = serialize_command(&["MULTI"]);
        lease.send_raw(serialized, false).await?;
        debug!("transaction opened");
        Ok(Transaction { lease, open: true })
    }

    /// Queues one command inside the block. The reply is the server's
    /// QUEUED acknowledgement, not the command's result.
    pub(crate) async fn raw(
        &mut self,
        args: Vec<String>,
        expects_map: bool,
    ) -> Result<Frame, Error> {
        let serialized = serialize_command(&args);
        self.lease.send_raw(serialized, expects_map).await
    }

    /// Runs the queued commands atomically and returns their replies as one
    /// array. A null EXEC reply means a watched key changed and the block
    /// was thrown away.
    pub async fn exec(mut self) -> Result<Frame, Error> {
        self.open = false;
        let reply = self
            .lease
            .send_raw(serialize_command(&["EXEC"]), false)
            .await?;
        match reply {
            Frame::Array(None) => Err(Error::Server("transaction aborted".to_string())),
            reply => Ok(reply),
        }
    }

    /// Throws the queued commands away.
    pub async fn discard(mut self) -> Result<(), Error> {
        self.open = false;
        self.lease
            .send_raw(serialize_command(&["DISCARD"]), false)
            .await?;
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.open {
            self.lease.mark_abandoned();
        }
    }
}
