use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::Mutex;
use tracing::debug;

use crate::commands::{hmset_args, mset_args, set_args, spop_args, with_items, SetOptions};
use crate::connection::Connection;
use crate::frame::{serialize_command, Frame};
use crate::pool::{Lease, Pool};
use crate::Error;

/// A deferred batch of commands flushed as a single socket write.
///
/// Builder calls append to the batch and nothing touches the network until
/// `send`, which picks a connection, writes the whole buffer and reads the
/// replies back in submission order. Sending consumes the pipeline.
///
/// A pipeline whose first command is MULTI is a transaction: an EXEC is
/// appended at send time when the caller did not close the block (and
/// `auto_close_transaction` is on), and the aggregate becomes the EXEC reply
/// array instead of the QUEUED acknowledgements.
pub struct Pipeline {
    target: Target,
    slots: Vec<Slot>,
    buf: BytesMut,
    auto_close_transaction: bool,
}

pub(crate) enum Target {
    Client(Arc<Mutex<Connection>>),
    Pool(Pool),
}

struct Slot {
    verb: String,
    expects_map: bool,
}

impl Pipeline {
    pub(crate) fn new(target: Target, auto_close_transaction: bool) -> Pipeline {
        Pipeline {
            target,
            slots: Vec::new(),
            buf: BytesMut::new(),
            auto_close_transaction,
        }
    }

    /// Appends one command to the batch.
    pub fn push<S: AsRef<str>>(mut self, args: &[S], expects_map: bool) -> Pipeline {
        let serialized = serialize_command(args);
        let verb = args
            .first()
            .map(|verb| verb.as_ref().to_uppercase())
            .unwrap_or_default();
        self.buf.extend_from_slice(&serialized);
        self.slots.push(Slot { verb, expects_map });
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Flushes the batch and returns all replies in submission order.
    ///
    /// Per-command server errors stay in the reply list as `Frame::Error`
    /// values; reading always continues to the end of the batch.
    pub async fn send(self) -> Result<Frame, Error> {
        self.dispatch(None).await
    }

    /// Flushes the batch and returns only the reply at `index`; negative
    /// indexes count from the end. For a transactional pipeline the index
    /// addresses the EXEC reply array.
    pub async fn send_nth(self, index: isize) -> Result<Frame, Error> {
        self.dispatch(Some(index)).await
    }

    async fn dispatch(mut self, index: Option<isize>) -> Result<Frame, Error> {
        if self.slots.is_empty() {
            return pick(Vec::new(), index);
        }

        let multi_start = self.slots[0].verb == "MULTI";
        let closes_itself = self
            .slots
            .last()
            .map(|slot| slot.verb == "EXEC")
            .unwrap_or(false);
        if multi_start && self.auto_close_transaction && !closes_itself {
            self = self.exec();
        }
        let exec_last = multi_start
            && self
                .slots
                .last()
                .map(|slot| slot.verb == "EXEC")
                .unwrap_or(false);

        let mut lease = match &self.target {
            Target::Client(conn) => Lease::Direct(conn.clone().lock_owned().await),
            Target::Pool(pool) => pool.acquire().await?,
        };

        lease.ensure_ready().await?;
        debug!(commands = self.slots.len(), "flushing pipeline");
        lease.begin_batch();
        let outcome = flush(&mut lease, &self.buf, &self.slots).await;
        lease.end_batch();
        // A transaction this batch opened but did not close cannot be
        // continued once the pipeline is spent; discard it before the
        // connection goes back to its owner.
        lease.mark_abandoned();
        let replies = outcome?;

        if exec_last {
            // The QUEUED acknowledgements were observable per slot; the
            // aggregate is the transaction's own reply array.
            return match replies.into_iter().last() {
                Some(Frame::Array(Some(items))) => pick(items, index),
                Some(Frame::Array(None)) => Err(Error::Server("transaction aborted".to_string())),
                Some(Frame::Error(message)) => Err(Error::Server(message)),
                _ => Err(Error::Protocol("unexpected EXEC reply".to_string())),
            };
        }

        pick(replies, index)
    }

    fn cmd(self, args: Vec<String>) -> Pipeline {
        self.push(&args, false)
    }

    // Command builders. Each appends one slot and returns the pipeline for
    // chaining; replies come back from `send` in the same order.

    pub fn multi(self) -> Pipeline {
        self.cmd(vec!["MULTI".into()])
    }

    pub fn exec(self) -> Pipeline {
        self.cmd(vec!["EXEC".into()])
    }

    pub fn discard(self) -> Pipeline {
        self.cmd(vec!["DISCARD".into()])
    }

    pub fn ping(self) -> Pipeline {
        self.cmd(vec!["PING".into()])
    }

    pub fn echo(self, message: &str) -> Pipeline {
        self.cmd(vec!["ECHO".into(), message.into()])
    }

    pub fn select(self, db: i64) -> Pipeline {
        self.cmd(vec!["SELECT".into(), db.to_string()])
    }

    pub fn flushdb(self) -> Pipeline {
        self.cmd(vec!["FLUSHDB".into()])
    }

    pub fn dbsize(self) -> Pipeline {
        self.cmd(vec!["DBSIZE".into()])
    }

    pub fn get(self, key: &str) -> Pipeline {
        self.cmd(vec!["GET".into(), key.into()])
    }

    pub fn set(self, key: &str, value: &str) -> Pipeline {
        self.cmd(vec!["SET".into(), key.into(), value.into()])
    }

    pub fn set_with_options(self, key: &str, value: &str, options: &SetOptions) -> Pipeline {
        self.cmd(set_args(key, value, options))
    }

    pub fn setnx(self, key: &str, value: &str) -> Pipeline {
        self.cmd(vec!["SETNX".into(), key.into(), value.into()])
    }

    pub fn append(self, key: &str, value: &str) -> Pipeline {
        self.cmd(vec!["APPEND".into(), key.into(), value.into()])
    }

    pub fn strlen(self, key: &str) -> Pipeline {
        self.cmd(vec!["STRLEN".into(), key.into()])
    }

    pub fn getdel(self, key: &str) -> Pipeline {
        self.cmd(vec!["GETDEL".into(), key.into()])
    }

    pub fn mset(self, pairs: &[(&str, &str)]) -> Pipeline {
        self.cmd(mset_args(pairs))
    }

    pub fn mget(self, keys: &[&str]) -> Pipeline {
        self.cmd(with_items(vec!["MGET".into()], keys))
    }

    pub fn del(self, keys: &[&str]) -> Pipeline {
        self.cmd(with_items(vec!["DEL".into()], keys))
    }

    pub fn exists(self, key: &str) -> Pipeline {
        self.cmd(vec!["EXISTS".into(), key.into()])
    }

    pub fn expire(self, key: &str, seconds: i64) -> Pipeline {
        self.cmd(vec!["EXPIRE".into(), key.into(), seconds.to_string()])
    }

    pub fn persist(self, key: &str) -> Pipeline {
        self.cmd(vec!["PERSIST".into(), key.into()])
    }

    pub fn ttl(self, key: &str) -> Pipeline {
        self.cmd(vec!["TTL".into(), key.into()])
    }

    pub fn type_of(self, key: &str) -> Pipeline {
        self.cmd(vec!["TYPE".into(), key.into()])
    }

    pub fn keys(self, pattern: &str) -> Pipeline {
        self.cmd(vec!["KEYS".into(), pattern.into()])
    }

    pub fn rename(self, key: &str, new_key: &str) -> Pipeline {
        self.cmd(vec!["RENAME".into(), key.into(), new_key.into()])
    }

    pub fn incr(self, key: &str) -> Pipeline {
        self.cmd(vec!["INCR".into(), key.into()])
    }

    pub fn incr_by(self, key: &str, by: i64) -> Pipeline {
        self.cmd(vec!["INCRBY".into(), key.into(), by.to_string()])
    }

    pub fn incr_by_float(self, key: &str, by: f64) -> Pipeline {
        self.cmd(vec!["INCRBYFLOAT".into(), key.into(), by.to_string()])
    }

    pub fn decr(self, key: &str) -> Pipeline {
        self.cmd(vec!["DECR".into(), key.into()])
    }

    pub fn decr_by(self, key: &str, by: i64) -> Pipeline {
        self.cmd(vec!["DECRBY".into(), key.into(), by.to_string()])
    }

    pub fn decr_by_float(self, key: &str, by: f64) -> Pipeline {
        self.cmd(vec!["INCRBYFLOAT".into(), key.into(), (-by).to_string()])
    }

    pub fn hset(self, key: &str, field: &str, value: &str) -> Pipeline {
        self.cmd(vec!["HSET".into(), key.into(), field.into(), value.into()])
    }

    pub fn hsetnx(self, key: &str, field: &str, value: &str) -> Pipeline {
        self.cmd(vec![
            "HSETNX".into(),
            key.into(),
            field.into(),
            value.into(),
        ])
    }

    pub fn hget(self, key: &str, field: &str) -> Pipeline {
        self.cmd(vec!["HGET".into(), key.into(), field.into()])
    }

    pub fn hdel(self, key: &str, fields: &[&str]) -> Pipeline {
        self.cmd(with_items(vec!["HDEL".into(), key.into()], fields))
    }

    pub fn hexists(self, key: &str, field: &str) -> Pipeline {
        self.cmd(vec!["HEXISTS".into(), key.into(), field.into()])
    }

    pub fn hgetall(self, key: &str) -> Pipeline {
        self.push(&["HGETALL".to_string(), key.to_string()], true)
    }

    pub fn hkeys(self, key: &str) -> Pipeline {
        self.cmd(vec!["HKEYS".into(), key.into()])
    }

    pub fn hvals(self, key: &str) -> Pipeline {
        self.cmd(vec!["HVALS".into(), key.into()])
    }

    pub fn hlen(self, key: &str) -> Pipeline {
        self.cmd(vec!["HLEN".into(), key.into()])
    }

    pub fn hmget(self, key: &str, fields: &[&str]) -> Pipeline {
        self.cmd(with_items(vec!["HMGET".into(), key.into()], fields))
    }

    pub fn hmset(self, key: &str, pairs: &[(&str, &str)]) -> Pipeline {
        self.cmd(hmset_args(key, pairs))
    }

    pub fn hincr_by(self, key: &str, field: &str, by: i64) -> Pipeline {
        self.cmd(vec![
            "HINCRBY".into(),
            key.into(),
            field.into(),
            by.to_string(),
        ])
    }

    pub fn hincr_by_float(self, key: &str, field: &str, by: f64) -> Pipeline {
        self.cmd(vec![
            "HINCRBYFLOAT".into(),
            key.into(),
            field.into(),
            by.to_string(),
        ])
    }

    pub fn lpush(self, key: &str, values: &[&str]) -> Pipeline {
        self.cmd(with_items(vec!["LPUSH".into(), key.into()], values))
    }

    pub fn rpush(self, key: &str, values: &[&str]) -> Pipeline {
        self.cmd(with_items(vec!["RPUSH".into(), key.into()], values))
    }

    pub fn lpop(self, key: &str) -> Pipeline {
        self.cmd(vec!["LPOP".into(), key.into()])
    }

    pub fn rpop(self, key: &str) -> Pipeline {
        self.cmd(vec!["RPOP".into(), key.into()])
    }

    pub fn llen(self, key: &str) -> Pipeline {
        self.cmd(vec!["LLEN".into(), key.into()])
    }

    pub fn lrange(self, key: &str, start: i64, stop: i64) -> Pipeline {
        self.cmd(vec![
            "LRANGE".into(),
            key.into(),
            start.to_string(),
            stop.to_string(),
        ])
    }

    pub fn lindex(self, key: &str, index: i64) -> Pipeline {
        self.cmd(vec!["LINDEX".into(), key.into(), index.to_string()])
    }

    pub fn lset(self, key: &str, index: i64, value: &str) -> Pipeline {
        self.cmd(vec![
            "LSET".into(),
            key.into(),
            index.to_string(),
            value.into(),
        ])
    }

    pub fn lrem(self, key: &str, count: i64, value: &str) -> Pipeline {
        self.cmd(vec![
            "LREM".into(),
            key.into(),
            count.to_string(),
            value.into(),
        ])
    }

    pub fn ltrim(self, key: &str, start: i64, stop: i64) -> Pipeline {
        self.cmd(vec![
            "LTRIM".into(),
            key.into(),
            start.to_string(),
            stop.to_string(),
        ])
    }

    pub fn sadd(self, key: &str, members: &[&str]) -> Pipeline {
        self.cmd(with_items(vec!["SADD".into(), key.into()], members))
    }

    pub fn srem(self, key: &str, members: &[&str]) -> Pipeline {
        self.cmd(with_items(vec!["SREM".into(), key.into()], members))
    }

    pub fn smembers(self, key: &str) -> Pipeline {
        self.cmd(vec!["SMEMBERS".into(), key.into()])
    }

    pub fn sismember(self, key: &str, member: &str) -> Pipeline {
        self.cmd(vec!["SISMEMBER".into(), key.into(), member.into()])
    }

    pub fn scard(self, key: &str) -> Pipeline {
        self.cmd(vec!["SCARD".into(), key.into()])
    }

    pub fn spop(self, key: &str) -> Pipeline {
        self.cmd(spop_args(key, None))
    }

    pub fn spop_count(self, key: &str, count: u64) -> Pipeline {
        self.cmd(spop_args(key, Some(count)))
    }

    pub fn srandmember(self, key: &str) -> Pipeline {
        self.cmd(vec!["SRANDMEMBER".into(), key.into()])
    }

    pub fn zadd(self, key: &str, score: f64, member: &str) -> Pipeline {
        self.cmd(vec![
            "ZADD".into(),
            key.into(),
            score.to_string(),
            member.into(),
        ])
    }

    pub fn zrem(self, key: &str, members: &[&str]) -> Pipeline {
        self.cmd(with_items(vec!["ZREM".into(), key.into()], members))
    }

    pub fn zscore(self, key: &str, member: &str) -> Pipeline {
        self.cmd(vec!["ZSCORE".into(), key.into(), member.into()])
    }

    pub fn zcard(self, key: &str) -> Pipeline {
        self.cmd(vec!["ZCARD".into(), key.into()])
    }

    pub fn zincr_by(self, key: &str, delta: f64, member: &str) -> Pipeline {
        self.cmd(vec![
            "ZINCRBY".into(),
            key.into(),
            delta.to_string(),
            member.into(),
        ])
    }

    pub fn zrange(self, key: &str, start: i64, stop: i64) -> Pipeline {
        self.cmd(vec![
            "ZRANGE".into(),
            key.into(),
            start.to_string(),
            stop.to_string(),
        ])
    }

    pub fn zrange_withscores(self, key: &str, start: i64, stop: i64) -> Pipeline {
        self.cmd(vec![
            "ZRANGE".into(),
            key.into(),
            start.to_string(),
            stop.to_string(),
            "WITHSCORES".into(),
        ])
    }

    pub fn watch(self, keys: &[&str]) -> Pipeline {
        self.cmd(with_items(vec!["WATCH".into()], keys))
    }

    pub fn unwatch(self) -> Pipeline {
        self.cmd(vec!["UNWATCH".into()])
    }
}

async fn flush(conn: &mut Connection, buf: &[u8], slots: &[Slot]) -> Result<Vec<Frame>, Error> {
    conn.write_raw(buf).await?;

    let mut replies = Vec::with_capacity(slots.len());
    for slot in slots {
        let reply = conn.read_reply(slot.expects_map).await?;
        conn.observe_reply(&slot.verb, &reply);
        replies.push(reply);
    }
    Ok(replies)
}

fn pick(mut replies: Vec<Frame>, index: Option<isize>) -> Result<Frame, Error> {
    let index = match index {
        None => return Ok(Frame::Array(Some(replies))),
        Some(index) => index,
    };

    let len = replies.len() as isize;
    let at = if index < 0 { len + index } else { index };
    if at < 0 || at >= len {
        return Err(Error::Usage(format!(
            "pipeline index {} out of range for {} replies",
            index, len
        )));
    }

    match replies.swap_remove(at as usize) {
        Frame::Error(message) => Err(Error::Server(message)),
        frame => Ok(frame),
    }
}
