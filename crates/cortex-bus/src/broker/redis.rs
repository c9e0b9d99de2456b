//! Redis pub/sub adapter (feature `redis`).
//!
//! Events are published on channel `<prefix><event type>`. Subscriptions
//! use `PSUBSCRIBE` with the bus pattern translated to a Redis glob:
//!
//! | Bus pattern    | Redis glob            |
//! |----------------|-----------------------|
//! | `*`            | `<prefix>*`           |
//! | `cognitive:*`  | `<prefix>cognitive:*` |
//! | `case.created` | `<prefix>case.created`|
//!
//! Glob metacharacters in the prefix or type are escaped. Redis pub/sub is
//! fire-and-forget, so messages published while a subscriber is
//! disconnected are lost, as with the in-memory hub.

use crate::broker::{BrokerMessage, BrokerTransport};
use crate::domain::pattern::Pattern;
use crate::error::BrokerError;
use ::redis::aio::MultiplexedConnection;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Messages buffered per subscription.
const SUBSCRIPTION_BUFFER: usize = 256;

pub struct RedisTransport {
    name: String,
    client: ::redis::Client,
    channel_prefix: String,
    publisher: Mutex<Option<MultiplexedConnection>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl RedisTransport {
    /// Transport for `url` (`redis://host:port/db`). Nothing connects until
    /// `connect`.
    ///
    /// # Errors
    ///
    /// `BrokerError::Unavailable` when the URL does not parse.
    pub fn new(url: &str) -> Result<Self, BrokerError> {
        let client = ::redis::Client::open(url).map_err(unavailable)?;
        Ok(Self {
            name: format!("redis@{}", client.get_connection_info().addr),
            client,
            channel_prefix: String::new(),
            publisher: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Namespace every channel, e.g. `cortex:`.
    #[must_use]
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    /// Channel an event of `topic` is published on.
    #[must_use]
    pub fn channel(&self, topic: &str) -> String {
        format!("{}{topic}", self.channel_prefix)
    }

    /// `PSUBSCRIBE` glob for `pattern`.
    #[must_use]
    pub fn glob(&self, pattern: &Pattern) -> String {
        let prefix = escape_glob(&self.channel_prefix);
        match pattern {
            Pattern::All => format!("{prefix}*"),
            Pattern::Prefix(start) => format!("{prefix}{}*", escape_glob(start)),
            Pattern::Exact(event_type) => format!("{prefix}{}", escape_glob(event_type)),
        }
    }
}

fn unavailable(e: ::redis::RedisError) -> BrokerError {
    BrokerError::Unavailable(e.to_string())
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl BrokerTransport for RedisTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        let connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        *self.publisher.lock() = Some(connection);
        info!(broker = %self.name, "Redis connection established");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.publisher.lock().is_some()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let Some(mut connection) = self.publisher.lock().clone() else {
            return Err(BrokerError::NotConnected);
        };
        let published: Result<i64, _> = connection.publish(self.channel(topic), payload).await;
        match published {
            Ok(receivers) => {
                debug!(topic, receivers, "Published to Redis");
                Ok(())
            }
            Err(e) => {
                // Force a reconnect through the bridge pump.
                *self.publisher.lock() = None;
                Err(unavailable(e))
            }
        }
    }

    async fn subscribe(
        &self,
        pattern: &Pattern,
    ) -> Result<mpsc::Receiver<BrokerMessage>, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        let glob = self.glob(pattern);
        let mut pubsub = self.client.get_async_pubsub().await.map_err(unavailable)?;
        pubsub.psubscribe(glob.as_str()).await.map_err(unavailable)?;

        let (sender, output) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let prefix = self.channel_prefix.clone();
        let pattern = pattern.clone();
        let listener = tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            while let Some(message) = messages.next().await {
                let Some(topic) = message.get_channel_name().strip_prefix(prefix.as_str()) else {
                    continue;
                };
                if !pattern.matches(topic) {
                    continue;
                }
                let forwarded = BrokerMessage::new(topic, message.get_payload_bytes().to_vec());
                if sender.send(forwarded).await.is_err() {
                    return;
                }
            }
            debug!(glob = %glob, "Redis subscription ended");
        });
        self.listeners.lock().push(listener);

        Ok(output)
    }

    async fn close(&self) {
        drop(self.publisher.lock().take());
        for listener in self.listeners.lock().drain(..) {
            listener.abort();
        }
    }
}
