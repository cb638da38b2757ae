//! memcached store over the text protocol.

use crate::config::MemcachedConfig;
use async_trait::async_trait;
use pagecache_core::{Clock, Error, Expiration, KvStore, Result, SystemClock};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Longest key memcached accepts.
const MAX_KEY_LEN: usize = 250;

/// memcached-backed store.
///
/// Connections are opened lazily and reused; a connection that saw an I/O
/// error or a timeout is discarded.
pub struct MemcachedStore {
    config: MemcachedConfig,
    idle: Mutex<Vec<Connection>>,
    clock: Arc<dyn Clock>,
}

impl MemcachedStore {
    /// Create a store without contacting the server.
    pub fn new(config: MemcachedConfig) -> Self {
        Self {
            config,
            idle: Mutex::new(Vec::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a store and verify the server answers.
    pub async fn connect(config: MemcachedConfig) -> Result<Self> {
        info!("Connecting to memcached at {}", config.address);
        let store = Self::new(config);
        let version = store.version().await?;
        info!(version = %version, "Connected to memcached");
        Ok(store)
    }

    /// Clock used to encode absolute expirations.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &MemcachedConfig {
        &self.config
    }

    /// Server version string.
    pub async fn version(&self) -> Result<String> {
        let mut conn = self.checkout().await?;
        let result = timeout(self.config.request_timeout, conn.version()).await;
        self.finish(conn, result)
    }

    async fn checkout(&self) -> Result<Connection> {
        let pooled = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        match pooled {
            Some(conn) => Ok(conn),
            None => Connection::open(&self.config).await,
        }
    }

    fn checkin(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.config.pool_size {
                idle.push(conn);
            }
        }
    }

    fn finish<T>(
        &self,
        conn: Connection,
        result: std::result::Result<Result<T>, tokio::time::error::Elapsed>,
    ) -> Result<T> {
        match result {
            Ok(Ok(value)) => {
                self.checkin(conn);
                Ok(value)
            }
            // The server answered with an error line; the stream is still in sync.
            Ok(Err(e @ Error::Store(_))) => {
                self.checkin(conn);
                Err(e)
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Discarding memcached connection");
                Err(e)
            }
            Err(_) => {
                warn!(address = %self.config.address, "memcached request timed out");
                Err(Error::StoreUnavailable(format!(
                    "request to {} timed out",
                    self.config.address
                )))
            }
        }
    }

    async fn store(
        &self,
        verb: StorageVerb,
        key: &str,
        value: &[u8],
        expiration: Expiration,
    ) -> Result<bool> {
        validate_key(key)?;
        let exptime = expiration.to_wire(self.clock.now());
        let mut conn = self.checkout().await?;
        let result = timeout(
            self.config.request_timeout,
            conn.store(verb, key, exptime, value),
        )
        .await;
        self.finish(conn, result)
    }
}

#[async_trait]
impl KvStore for MemcachedStore {
    fn name(&self) -> &'static str {
        "memcached"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let mut conn = self.checkout().await?;
        let result = timeout(self.config.request_timeout, conn.get(key)).await;
        self.finish(conn, result)
    }

    async fn add(&self, key: &str, value: &[u8], expiration: Expiration) -> Result<bool> {
        self.store(StorageVerb::Add, key, value, expiration).await
    }

    async fn set(&self, key: &str, value: &[u8], expiration: Expiration) -> Result<()> {
        if self.store(StorageVerb::Set, key, value, expiration).await? {
            Ok(())
        } else {
            Err(Error::Store(format!("set of {key} was not stored")))
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut conn = self.checkout().await?;
        let result = timeout(self.config.request_timeout, conn.delete(key)).await;
        self.finish(conn, result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageVerb {
    Add,
    Set,
}

impl StorageVerb {
    fn as_str(&self) -> &'static str {
        match self {
            StorageVerb::Add => "add",
            StorageVerb::Set => "set",
        }
    }
}

struct Connection {
    stream: BufReader<TcpStream>,
}

impl Connection {
    async fn open(config: &MemcachedConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| {
                Error::StoreUnavailable(format!("connection to {} timed out", config.address))
            })?
            .map_err(|e| {
                Error::StoreUnavailable(format!("failed to connect to {}: {}", config.address, e))
            })?;
        stream.set_nodelay(true).map_err(unavailable)?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    async fn send(&mut self, request: &[u8]) -> Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(request).await.map_err(unavailable)?;
        stream.flush().await.map_err(unavailable)
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self
            .stream
            .read_line(&mut line)
            .await
            .map_err(unavailable)?;
        if read == 0 {
            return Err(Error::StoreUnavailable("connection closed by server".into()));
        }
        match line.strip_suffix("\r\n") {
            Some(stripped) => Ok(stripped.to_string()),
            None => Err(Error::StoreUnavailable(format!("truncated reply: {line:?}"))),
        }
    }

    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.send(&encode_get(key)).await?;

        let mut found = None;
        loop {
            let line = self.read_line().await?;
            match parse_retrieval_line(&line)? {
                Retrieval::Value { key: returned, len } => {
                    let mut data = vec![0u8; len + 2];
                    self.stream
                        .read_exact(&mut data)
                        .await
                        .map_err(unavailable)?;
                    if !data.ends_with(b"\r\n") {
                        return Err(Error::StoreUnavailable(
                            "data block not terminated".into(),
                        ));
                    }
                    data.truncate(len);
                    if returned == key {
                        found = Some(data);
                    }
                }
                Retrieval::End => return Ok(found),
            }
        }
    }

    async fn store(
        &mut self,
        verb: StorageVerb,
        key: &str,
        exptime: i64,
        value: &[u8],
    ) -> Result<bool> {
        self.send(&encode_storage(verb, key, exptime, value)).await?;
        let line = self.read_line().await?;
        parse_storage_reply(&line)
    }

    async fn delete(&mut self, key: &str) -> Result<()> {
        self.send(&encode_delete(key)).await?;
        let line = self.read_line().await?;
        parse_delete_reply(&line)
    }

    async fn version(&mut self) -> Result<String> {
        self.send(b"version\r\n").await?;
        let line = self.read_line().await?;
        match line.strip_prefix("VERSION ") {
            Some(version) => Ok(version.to_string()),
            None => Err(reply_error(&line)),
        }
    }
}

fn unavailable(err: std::io::Error) -> Error {
    Error::StoreUnavailable(err.to_string())
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(Error::Store(format!("invalid memcached key {key:?}")));
    }
    Ok(())
}

fn encode_get(key: &str) -> Vec<u8> {
    format!("get {key}\r\n").into_bytes()
}

fn encode_storage(verb: StorageVerb, key: &str, exptime: i64, value: &[u8]) -> Vec<u8> {
    let mut request = format!("{} {} 0 {} {}\r\n", verb.as_str(), key, exptime, value.len())
        .into_bytes();
    request.extend_from_slice(value);
    request.extend_from_slice(b"\r\n");
    request
}

fn encode_delete(key: &str) -> Vec<u8> {
    format!("delete {key}\r\n").into_bytes()
}

#[derive(Debug, PartialEq, Eq)]
enum Retrieval {
    Value { key: String, len: usize },
    End,
}

fn parse_retrieval_line(line: &str) -> Result<Retrieval> {
    if line == "END" {
        return Ok(Retrieval::End);
    }
    let Some(rest) = line.strip_prefix("VALUE ") else {
        return Err(reply_error(line));
    };

    // VALUE <key> <flags> <bytes> [<cas unique>]
    let mut fields = rest.split(' ');
    let (Some(key), Some(_flags), Some(len)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(Error::StoreUnavailable(format!("malformed VALUE line: {line:?}")));
    };
    let len = len
        .parse::<usize>()
        .map_err(|_| Error::StoreUnavailable(format!("malformed VALUE length: {line:?}")))?;

    Ok(Retrieval::Value {
        key: key.to_string(),
        len,
    })
}

fn parse_storage_reply(line: &str) -> Result<bool> {
    match line {
        "STORED" => Ok(true),
        "NOT_STORED" | "EXISTS" | "NOT_FOUND" => Ok(false),
        _ => Err(reply_error(line)),
    }
}

fn parse_delete_reply(line: &str) -> Result<()> {
    match line {
        "DELETED" | "NOT_FOUND" => Ok(()),
        _ => Err(reply_error(line)),
    }
}

fn reply_error(line: &str) -> Error {
    if let Some(message) = line.strip_prefix("SERVER_ERROR ") {
        Error::Store(format!("server error: {message}"))
    } else if let Some(message) = line.strip_prefix("CLIENT_ERROR ") {
        Error::Store(format!("client error: {message}"))
    } else if line == "ERROR" {
        Error::Store("unknown command".to_string())
    } else {
        Error::StoreUnavailable(format!("unexpected reply: {line:?}"))
    }
}
