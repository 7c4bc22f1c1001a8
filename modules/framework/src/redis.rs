//! Redis key/value storage and pub/sub events for rkyv-encoded messages.

use std::future::Future;
use std::time::Duration;
use tracing::instrument;

pub type RedisConnection = redis::aio::ConnectionManager;

pub async fn connect(redis_url: &str) -> Result<RedisConnection, crate::Error> {
    let client = redis::Client::open(redis_url)?;
    Ok(RedisConnection::new(client).await?)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RedisKey(String);

impl From<String> for RedisKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RedisKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl RedisKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl redis::ToRedisArgs for RedisKey {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + redis::RedisWrite,
    {
        out.write_arg(self.0.as_bytes())
    }
}

/// A value with a stable binary encoding, stored in redis or sent as an event payload.
pub trait RkyvMessage: Sized {
    fn to_bytes(&self) -> Result<Vec<u8>, crate::Error>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, crate::Error>;
}

/// Implements [`RkyvMessage`] for types deriving `rkyv::Archive`, `rkyv::Serialize` and
/// `rkyv::Deserialize`.
#[macro_export]
macro_rules! rkyv_message {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::redis::RkyvMessage for $ty {
                fn to_bytes(&self) -> Result<Vec<u8>, $crate::Error> {
                    ::rkyv::to_bytes::<::rkyv::rancor::Error>(self)
                        .map(|bytes| bytes.to_vec())
                        .map_err(|e| $crate::Error::Serialization(e.to_string()))
                }

                fn from_bytes(bytes: &[u8]) -> Result<Self, $crate::Error> {
                    let mut aligned = ::rkyv::util::AlignedVec::<16>::new();
                    aligned.extend_from_slice(bytes);
                    ::rkyv::from_bytes::<Self, ::rkyv::rancor::Error>(&aligned)
                        .map_err(|_| $crate::Error::DeserializeError)
                }
            }
        )+
    };
}

pub trait KeyValue: Sized {
    type Key: redis::ToRedisArgs + Send + Sync;
    type Value: RkyvMessage + Send;

    fn key(&self) -> Self::Key;
    fn value(&self) -> Self::Value;
    fn into_value(self) -> Self::Value;
    fn new(key: Self::Key, value: Self::Value) -> Self;
}

pub trait KeyValueRead: KeyValue {
    fn read(
        conn: &mut RedisConnection,
        key: Self::Key,
    ) -> impl Future<Output = Result<Option<Self::Value>, crate::Error>> + Send {
        async move {
            let bytes: Option<Vec<u8>> = redis::cmd("GET").arg(&key).query_async(conn).await?;
            bytes
                .map(|bytes| Self::Value::from_bytes(&bytes))
                .transpose()
        }
    }
}

const DELETE_IF_MATCHES: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

pub trait KeyValueWrite: KeyValue {
    fn write_kv(
        conn: &mut RedisConnection,
        key: Self::Key,
        value: Self::Value,
    ) -> impl Future<Output = Result<(), crate::Error>> + Send {
        async move {
            let bytes = value.to_bytes()?;
            let _: () = redis::cmd("SET")
                .arg(&key)
                .arg(bytes)
                .query_async(conn)
                .await?;
            Ok(())
        }
    }

    fn write(
        &self,
        conn: &mut RedisConnection,
    ) -> impl Future<Output = Result<(), crate::Error>> + Send {
        Self::write_kv(conn, self.key(), self.value())
    }

    fn write_with_ttl(
        &self,
        conn: &mut RedisConnection,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), crate::Error>> + Send {
        let key = self.key();
        let value = self.value();
        async move {
            let bytes = value.to_bytes()?;
            let _: () = redis::cmd("SET")
                .arg(&key)
                .arg(bytes)
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async(conn)
                .await?;
            Ok(())
        }
    }

    /// `SET NX PX`: returns `false` when the key is already held.
    fn write_if_absent_with_ttl(
        &self,
        conn: &mut RedisConnection,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, crate::Error>> + Send {
        let key = self.key();
        let value = self.value();
        async move {
            let bytes = value.to_bytes()?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(bytes)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async(conn)
                .await?;
            Ok(reply.is_some())
        }
    }

    /// Deletes the key only while it still holds this exact value.
    fn delete_if_matches(
        &self,
        conn: &mut RedisConnection,
    ) -> impl Future<Output = Result<bool, crate::Error>> + Send {
        let key = self.key();
        let value = self.value();
        async move {
            let bytes = value.to_bytes()?;
            let deleted: i64 = redis::Script::new(DELETE_IF_MATCHES)
                .key(&key)
                .arg(bytes)
                .invoke_async(conn)
                .await?;
            Ok(deleted == 1)
        }
    }

    fn delete(
        conn: &mut RedisConnection,
        key: Self::Key,
    ) -> impl Future<Output = Result<(), crate::Error>> + Send {
        async move {
            let _: i64 = redis::cmd("DEL").arg(&key).query_async(conn).await?;
            Ok(())
        }
    }
}

/// A message published on a redis pub/sub channel.
pub trait EventRouting: RkyvMessage {
    const CHANNEL: &'static str;
}

#[instrument(skip_all, err, fields(channel = T::CHANNEL))]
pub async fn publish_event<T: EventRouting>(
    conn: &mut RedisConnection,
    event: &T,
) -> Result<(), crate::Error> {
    let payload = event.to_bytes()?;
    let _: i64 = redis::cmd("PUBLISH")
        .arg(T::CHANNEL)
        .arg(payload)
        .query_async(conn)
        .await?;
    Ok(())
}
