//! Upstream entity sources.
//!
//! The gateway consumes any [`EntitySource`]. [`RelaySource`] speaks
//! newline-delimited JSON over TCP to a relay in front of the game server:
//!
//! ```text
//! -> {"type":"auth","steam_id":76561198000000000,"player_token":123}
//! -> {"type":"subscribe","entity_id":42}
//! <- {"entity_id":42,"value":true}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::UpstreamError;
use crate::types::EntityId;

/// One state change reported by the upstream source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntityChange {
    pub entity_id: EntityId,
    #[serde(default)]
    pub value: Value,
}

impl EntityChange {
    pub fn new(entity_id: EntityId, value: impl Into<Value>) -> Self {
        Self {
            entity_id,
            value: value.into(),
        }
    }

    pub fn is_on(&self) -> bool {
        is_truthy(&self.value)
    }
}

/// A stream of entity changes.
///
/// Notifications are only produced for entities that were subscribed
/// first.
#[async_trait]
pub trait EntitySource: Send {
    async fn subscribe(&mut self, entity: EntityId) -> Result<(), UpstreamError>;

    /// Next change, or `None` once the source is exhausted.
    async fn next_change(&mut self) -> Result<Option<EntityChange>, UpstreamError>;
}

/// Connection details and credentials for the upstream server.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub host: String,
    pub port: u16,
    pub steam_id: u64,
    pub player_token: i64,
}

impl UpstreamSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RelayRequest<'a> {
    Auth { steam_id: u64, player_token: i64 },
    Subscribe { entity_id: &'a EntityId },
}

/// Newline-delimited JSON source over TCP.
pub struct RelaySource {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl RelaySource {
    /// Connect and authenticate.
    pub async fn connect(settings: &UpstreamSettings) -> Result<Self, UpstreamError> {
        let stream = TcpStream::connect(settings.address())
            .await
            .map_err(UpstreamError::Connect)?;
        let mut source = Self::from_stream(stream);
        source
            .send(&RelayRequest::Auth {
                steam_id: settings.steam_id,
                player_token: settings.player_token,
            })
            .await?;
        tracing::info!(address = %settings.address(), "connected to upstream relay");
        Ok(source)
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn send(&mut self, request: &RelayRequest<'_>) -> Result<(), UpstreamError> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EntitySource for RelaySource {
    async fn subscribe(&mut self, entity: EntityId) -> Result<(), UpstreamError> {
        self.send(&RelayRequest::Subscribe { entity_id: &entity }).await
    }

    async fn next_change(&mut self) -> Result<Option<EntityChange>, UpstreamError> {
        while let Some(line) = self.lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<EntityChange>(line) {
                Ok(change) => return Ok(Some(change)),
                Err(err) => {
                    tracing::warn!(error = %err, line, "skipping malformed upstream notification");
                }
            }
        }
        Ok(None)
    }
}

/// Boolean view of an upstream value.
///
/// Booleans as-is, numbers when non-zero, strings, arrays and objects when
/// non-empty, null is false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Parse a comma separated entity id list such as `"123, 456,,789"`.
pub fn parse_entity_ids(raw: &str) -> Result<Vec<EntityId>, UpstreamError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map(EntityId)
                .map_err(|_| UpstreamError::InvalidEntityIds(format!("'{s}' is not an entity id")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if ids.is_empty() {
        return Err(UpstreamError::InvalidEntityIds("no entity ids given".to_string()));
    }
    Ok(ids)
}
