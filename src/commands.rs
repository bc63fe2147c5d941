use crate::frame::Frame;
use crate::Error;

/// Options for SET. Tokens are appended in the order EX, PX, NX, XX.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
#[derive(Clone, Debug, Default)]
pub struct SetOptions {
    ex: Option<i64>,
    px: Option<i64>,
    nx: bool,
    xx: bool,
}

impl SetOptions {
    pub fn new() -> SetOptions {
        SetOptions::default()
    }

    /// Expire after `seconds`.
    pub fn ex(mut self, seconds: i64) -> SetOptions {
        self.ex = Some(seconds);
        self
    }

    /// Expire after `millis`.
    pub fn px(mut self, millis: i64) -> SetOptions {
        self.px = Some(millis);
        self
    }

    /// Only set when the key does not exist.
    pub fn nx(mut self) -> SetOptions {
        self.nx = true;
        self
    }

    /// Only set when the key already exists.
    pub fn xx(mut self) -> SetOptions {
        self.xx = true;
        self
    }

    fn append_to(&self, args: &mut Vec<String>) {
        if let Some(seconds) = self.ex {
            args.push("EX".to_string());
            args.push(seconds.to_string());
        }
        if let Some(millis) = self.px {
            args.push("PX".to_string());
            args.push(millis.to_string());
        }
        if self.nx {
            args.push("NX".to_string());
        }
        if self.xx {
            args.push("XX".to_string());
        }
    }
}

pub(crate) fn set_args(key: &str, value: &str, options: &SetOptions) -> Vec<String> {
    let mut args = vec!["SET".to_string(), key.to_string(), value.to_string()];
    options.append_to(&mut args);
    args
}

pub(crate) fn mset_args(pairs: &[(&str, &str)]) -> Vec<String> {
    let mut args = Vec::with_capacity(1 + pairs.len() * 2);
    args.push("MSET".to_string());
    for (key, value) in pairs {
        args.push(key.to_string());
        args.push(value.to_string());
    }
    args
}

pub(crate) fn hmset_args(key: &str, pairs: &[(&str, &str)]) -> Vec<String> {
    let mut args = Vec::with_capacity(2 + pairs.len() * 2);
    args.push("HMSET".to_string());
    args.push(key.to_string());
    for (field, value) in pairs {
        args.push(field.to_string());
        args.push(value.to_string());
    }
    args
}

// The count is omitted entirely when absent; SPOP with an explicit count
// replies with an array even for a single member.
pub(crate) fn spop_args(key: &str, count: Option<u64>) -> Vec<String> {
    let mut args = vec!["SPOP".to_string(), key.to_string()];
    if let Some(count) = count {
        args.push(count.to_string());
    }
    args
}

pub(crate) fn with_items(mut args: Vec<String>, items: &[&str]) -> Vec<String> {
    args.extend(items.iter().map(|item| item.to_string()));
    args
}

/// The flat command surface.
///
/// Every helper builds an argv and submits it through `raw_command`; replies
/// come back as raw `Frame`s, with `-` replies already turned into
/// `Error::Server`. Implemented by `Client`, `Pool` and `Transaction` (where
/// each call is acknowledged with QUEUED until EXEC).
#[allow(async_fn_in_trait)]
pub trait Commands {
    async fn raw_command(&mut self, args: Vec<String>, expects_map: bool) -> Result<Frame, Error>;

    // Server.

    async fn ping(&mut self) -> Result<Frame, Error> {
        self.raw_command(vec!["PING".into()], false).await
    }

    async fn echo(&mut self, message: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["ECHO".into(), message.into()], false)
            .await
    }

    async fn select(&mut self, db: i64) -> Result<Frame, Error> {
        self.raw_command(vec!["SELECT".into(), db.to_string()], false)
            .await
    }

    async fn flushdb(&mut self) -> Result<Frame, Error> {
        self.raw_command(vec!["FLUSHDB".into()], false).await
    }

    async fn dbsize(&mut self) -> Result<Frame, Error> {
        self.raw_command(vec!["DBSIZE".into()], false).await
    }

    // Strings.

    async fn get(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["GET".into(), key.into()], false).await
    }

    async fn set(&mut self, key: &str, value: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["SET".into(), key.into(), value.into()], false)
            .await
    }

    async fn set_with_options(
        &mut self,
        key: &str,
        value: &str,
        options: &SetOptions,
    ) -> Result<Frame, Error> {
        self.raw_command(set_args(key, value, options), false).await
    }

    async fn setnx(&mut self, key: &str, value: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["SETNX".into(), key.into(), value.into()], false)
            .await
    }

    async fn append(&mut self, key: &str, value: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["APPEND".into(), key.into(), value.into()], false)
            .await
    }

    async fn strlen(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["STRLEN".into(), key.into()], false)
            .await
    }

    async fn getdel(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["GETDEL".into(), key.into()], false)
            .await
    }

    /// Sets several keys at once; pairs go on the wire in slice order.
    async fn mset(&mut self, pairs: &[(&str, &str)]) -> Result<Frame, Error> {
        self.raw_command(mset_args(pairs), false).await
    }

    async fn mget(&mut self, keys: &[&str]) -> Result<Frame, Error> {
        self.raw_command(with_items(vec!["MGET".into()], keys), false)
            .await
    }

    // Keyspace.

    async fn del(&mut self, keys: &[&str]) -> Result<Frame, Error> {
        self.raw_command(with_items(vec!["DEL".into()], keys), false)
            .await
    }

    async fn exists(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["EXISTS".into(), key.into()], false)
            .await
    }

    async fn expire(&mut self, key: &str, seconds: i64) -> Result<Frame, Error> {
        self.raw_command(
            vec!["EXPIRE".into(), key.into(), seconds.to_string()],
            false,
        )
        .await
    }

    async fn persist(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["PERSIST".into(), key.into()], false)
            .await
    }

    async fn ttl(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["TTL".into(), key.into()], false).await
    }

    async fn type_of(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["TYPE".into(), key.into()], false)
            .await
    }

    async fn keys(&mut self, pattern: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["KEYS".into(), pattern.into()], false)
            .await
    }

    async fn rename(&mut self, key: &str, new_key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["RENAME".into(), key.into(), new_key.into()], false)
            .await
    }

    // Counters. The verb is picked by the delta type: integers go through
    // INCRBY/DECRBY, fractional deltas through INCRBYFLOAT with the sign
    // folded into the argument.

    async fn incr(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["INCR".into(), key.into()], false)
            .await
    }

    async fn incr_by(&mut self, key: &str, by: i64) -> Result<Frame, Error> {
        self.raw_command(vec!["INCRBY".into(), key.into(), by.to_string()], false)
            .await
    }

    async fn incr_by_float(&mut self, key: &str, by: f64) -> Result<Frame, Error> {
        self.raw_command(
            vec!["INCRBYFLOAT".into(), key.into(), by.to_string()],
            false,
        )
        .await
    }

    async fn decr(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["DECR".into(), key.into()], false)
            .await
    }

    async fn decr_by(&mut self, key: &str, by: i64) -> Result<Frame, Error> {
        self.raw_command(vec!["DECRBY".into(), key.into(), by.to_string()], false)
            .await
    }

    async fn decr_by_float(&mut self, key: &str, by: f64) -> Result<Frame, Error> {
        self.raw_command(
            vec!["INCRBYFLOAT".into(), key.into(), (-by).to_string()],
            false,
        )
        .await
    }

    // Hashes.

    async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<Frame, Error> {
        self.raw_command(
            vec!["HSET".into(), key.into(), field.into(), value.into()],
            false,
        )
        .await
    }

    async fn hsetnx(&mut self, key: &str, field: &str, value: &str) -> Result<Frame, Error> {
        self.raw_command(
            vec!["HSETNX".into(), key.into(), field.into(), value.into()],
            false,
        )
        .await
    }

    async fn hget(&mut self, key: &str, field: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["HGET".into(), key.into(), field.into()], false)
            .await
    }

    async fn hdel(&mut self, key: &str, fields: &[&str]) -> Result<Frame, Error> {
        self.raw_command(with_items(vec!["HDEL".into(), key.into()], fields), false)
            .await
    }

    async fn hexists(&mut self, key: &str, field: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["HEXISTS".into(), key.into(), field.into()], false)
            .await
    }

    /// The reply array is folded into a `Frame::Map` of field to value.
    async fn hgetall(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["HGETALL".into(), key.into()], true)
            .await
    }

    async fn hkeys(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["HKEYS".into(), key.into()], false)
            .await
    }

    async fn hvals(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["HVALS".into(), key.into()], false)
            .await
    }

    async fn hlen(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["HLEN".into(), key.into()], false)
            .await
    }

    async fn hmget(&mut self, key: &str, fields: &[&str]) -> Result<Frame, Error> {
        self.raw_command(with_items(vec!["HMGET".into(), key.into()], fields), false)
            .await
    }

    async fn hmset(&mut self, key: &str, pairs: &[(&str, &str)]) -> Result<Frame, Error> {
        self.raw_command(hmset_args(key, pairs), false).await
    }

    async fn hincr_by(&mut self, key: &str, field: &str, by: i64) -> Result<Frame, Error> {
        self.raw_command(
            vec!["HINCRBY".into(), key.into(), field.into(), by.to_string()],
            false,
        )
        .await
    }

    async fn hincr_by_float(&mut self, key: &str, field: &str, by: f64) -> Result<Frame, Error> {
        self.raw_command(
            vec![
                "HINCRBYFLOAT".into(),
                key.into(),
                field.into(),
                by.to_string(),
            ],
            false,
        )
        .await
    }

    // Lists.

    async fn lpush(&mut self, key: &str, values: &[&str]) -> Result<Frame, Error> {
        self.raw_command(with_items(vec!["LPUSH".into(), key.into()], values), false)
            .await
    }

    async fn rpush(&mut self, key: &str, values: &[&str]) -> Result<Frame, Error> {
        self.raw_command(with_items(vec!["RPUSH".into(), key.into()], values), false)
            .await
    }

    async fn lpop(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["LPOP".into(), key.into()], false)
            .await
    }

    async fn rpop(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["RPOP".into(), key.into()], false)
            .await
    }

    async fn llen(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["LLEN".into(), key.into()], false)
            .await
    }

    async fn lrange(&mut self, key: &str, start: i64, stop: i64) -> Result<Frame, Error> {
        self.raw_command(
            vec![
                "LRANGE".into(),
                key.into(),
                start.to_string(),
                stop.to_string(),
            ],
            false,
        )
        .await
    }

    async fn lindex(&mut self, key: &str, index: i64) -> Result<Frame, Error> {
        self.raw_command(vec!["LINDEX".into(), key.into(), index.to_string()], false)
            .await
    }

    async fn lset(&mut self, key: &str, index: i64, value: &str) -> Result<Frame, Error> {
        self.raw_command(
            vec![
                "LSET".into(),
                key.into(),
                index.to_string(),
                value.into(),
            ],
            false,
        )
        .await
    }

    async fn lrem(&mut self, key: &str, count: i64, value: &str) -> Result<Frame, Error> {
        self.raw_command(
            vec![
                "LREM".into(),
                key.into(),
                count.to_string(),
                value.into(),
            ],
            false,
        )
        .await
    }

    async fn ltrim(&mut self, key: &str, start: i64, stop: i64) -> Result<Frame, Error> {
        self.raw_command(
            vec![
                "LTRIM".into(),
                key.into(),
                start.to_string(),
                stop.to_string(),
            ],
            false,
        )
        .await
    }

    // Sets. Both SADD and SREM spread their members.

    async fn sadd(&mut self, key: &str, members: &[&str]) -> Result<Frame, Error> {
        self.raw_command(with_items(vec!["SADD".into(), key.into()], members), false)
            .await
    }

    async fn srem(&mut self, key: &str, members: &[&str]) -> Result<Frame, Error> {
        self.raw_command(with_items(vec!["SREM".into(), key.into()], members), false)
            .await
    }

    async fn smembers(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["SMEMBERS".into(), key.into()], false)
            .await
    }

    async fn sismember(&mut self, key: &str, member: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["SISMEMBER".into(), key.into(), member.into()], false)
            .await
    }

    async fn scard(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["SCARD".into(), key.into()], false)
            .await
    }

    async fn spop(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(spop_args(key, None), false).await
    }

    async fn spop_count(&mut self, key: &str, count: u64) -> Result<Frame, Error> {
        self.raw_command(spop_args(key, Some(count)), false).await
    }

    async fn srandmember(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["SRANDMEMBER".into(), key.into()], false)
            .await
    }

    // Sorted sets.

    async fn zadd(&mut self, key: &str, score: f64, member: &str) -> Result<Frame, Error> {
        self.raw_command(
            vec![
                "ZADD".into(),
                key.into(),
                score.to_string(),
                member.into(),
            ],
            false,
        )
        .await
    }

    async fn zrem(&mut self, key: &str, members: &[&str]) -> Result<Frame, Error> {
        self.raw_command(with_items(vec!["ZREM".into(), key.into()], members), false)
            .await
    }

    async fn zscore(&mut self, key: &str, member: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["ZSCORE".into(), key.into(), member.into()], false)
            .await
    }

    async fn zcard(&mut self, key: &str) -> Result<Frame, Error> {
        self.raw_command(vec!["ZCARD".into(), key.into()], false)
            .await
    }

    async fn zincr_by(&mut self, key: &str, delta: f64, member: &str) -> Result<Frame, Error> {
        self.raw_command(
            vec![
                "ZINCRBY".into(),
                key.into(),
                delta.to_string(),
                member.into(),
            ],
            false,
        )
        .await
    }

    async fn zrange(&mut self, key: &str, start: i64, stop: i64) -> Result<Frame, Error> {
        self.raw_command(
            vec![
                "ZRANGE".into(),
                key.into(),
                start.to_string(),
                stop.to_string(),
            ],
            false,
        )
        .await
    }

    async fn zrange_withscores(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Frame, Error> {
        self.raw_command(
            vec![
                "ZRANGE".into(),
                key.into(),
                start.to_string(),
                stop.to_string(),
                "WITHSCORES".into(),
            ],
            false,
        )
        .await
    }

    // Transactions.

    async fn watch(&mut self, keys: &[&str]) -> Result<Frame, Error> {
        self.raw_command(with_items(vec!["WATCH".into()], keys), false)
            .await
    }

    async fn unwatch(&mut self) -> Result<Frame, Error> {
        self.raw_command(vec!["UNWATCH".into()], false).await
    }
}

impl Commands for crate::Client {
    async fn raw_command(&mut self, args: Vec<String>, expects_map: bool) -> Result<Frame, Error> {
        crate::Client::raw(self, args, expects_map).await
    }
}

impl Commands for crate::Pool {
    async fn raw_command(&mut self, args: Vec<String>, expects_map: bool) -> Result<Frame, Error> {
        crate::Pool::raw(self, args, expects_map).await
    }
}

impl Commands for crate::Transaction {
    async fn raw_command(&mut self, args: Vec<String>, expects_map: bool) -> Result<Frame, Error> {
        crate::Transaction::raw(self, args, expects_map).await
    }
}
