use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// HTTP destination for forwarded events.
///
/// A `Target` describes *where* and *how* a payload is delivered.
/// It is a pure configuration object with no internal state and is
/// referenced from rules by name only.
#[derive(Debug, Clone)]
pub struct Target {
    /// Unique name, used as the lookup key from rules.
    pub name: TargetName,

    /// Destination URL.
    pub url: String,

    /// Request method for every attempt.
    pub method: HttpMethod,

    /// Maximum time allowed for a single delivery attempt.
    pub timeout: Duration,

    /// Extra request headers.
    pub headers: HashMap<String, String>,

    /// Optional secret for HMAC signing.
    pub secret: Option<Vec<u8>>,
}

impl Target {
    /// Create a new target with default delivery settings.
    ///
    /// Defaults:
    /// - method: POST
    /// - timeout: 3 seconds
    /// - no extra headers, no signing
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: TargetName(name.into()),
            url: url.into(),
            method: HttpMethod::Post,
            timeout: Duration::from_secs(3),
            headers: HashMap::new(),
            secret: None,
        }
    }

    /// Set the request method.
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Set a custom timeout for delivery attempts.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set a secret for HMAC signing.
    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// Unique name of a target.
///
/// Strongly typed so rule references cannot be mixed up with
/// event kinds or other string keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetName(pub String);

impl TargetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Identifier of an upstream entity (e.g. a smart alarm).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request method of a target.
///
/// Parsing never fails: anything other than GET, POST or PUT is kept as
/// `Unsupported` and rejected when a delivery is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Unsupported(String),
}

impl HttpMethod {
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Unsupported(raw) => raw,
        }
    }
}

impl From<String> for HttpMethod {
    fn from(raw: String) -> Self {
        let normalized = raw.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            _ => HttpMethod::Unsupported(normalized),
        }
    }
}

impl From<&str> for HttpMethod {
    fn from(raw: &str) -> Self {
        HttpMethod::from(raw.to_string())
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routes one event kind to an ordered list of targets.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Event kind this rule answers to.
    pub event: String,

    /// Target names in delivery-report order. Repeats are delivered
    /// independently.
    pub targets: Vec<TargetName>,

    /// Fixed fields merged over every payload built for this rule.
    pub payload_template: Option<Map<String, Value>>,
}

impl Rule {
    pub fn new<I, S>(event: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            event: event.into(),
            targets: targets.into_iter().map(|t| TargetName(t.into())).collect(),
            payload_template: None,
        }
    }

    pub fn with_payload_template(mut self, template: Map<String, Value>) -> Self {
        self.payload_template = Some(template);
        self
    }
}

/// Process-wide delivery tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Retries after the initial attempt.
    pub forward_retries: u32,

    /// Base of the exponential backoff between attempts.
    pub forward_retry_backoff: Duration,

    /// Maximum simultaneous HTTP attempts across all targets.
    pub forward_concurrency: usize,

    /// Minimum time between admitted fires of one (entity, event kind).
    pub cooldown: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            forward_retries: 1,
            forward_retry_backoff: Duration::from_millis(300),
            forward_concurrency: 10,
            cooldown: Duration::from_secs(10),
        }
    }
}

/// Outcome of delivering one payload to one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryResult {
    pub target: TargetName,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

impl DeliveryResult {
    /// A response was received, successful or not.
    pub fn responded(target: TargetName, status: u16, body: String) -> Self {
        let ok = (200..300).contains(&status);
        Self {
            target,
            ok,
            status: Some(status),
            body: Some(body),
            error: if ok { None } else { Some(format!("HTTP {status}")) },
            attempts: 1,
        }
    }

    /// No response was received.
    pub fn failed(target: TargetName, error: impl Into<String>) -> Self {
        Self {
            target,
            ok: false,
            status: None,
            body: None,
            error: Some(error.into()),
            attempts: 1,
        }
    }
}

/// Aggregated outcome of one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forwarded: Vec<DeliveryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    /// `ok` is the conjunction of every per-target flag.
    pub fn from_results(forwarded: Vec<DeliveryResult>) -> Self {
        Self {
            ok: forwarded.iter().all(|r| r.ok),
            forwarded,
            error: None,
        }
    }

    pub fn no_rule(event: &str) -> Self {
        Self {
            ok: false,
            forwarded: Vec::new(),
            error: Some(format!("No rule for event '{event}'")),
        }
    }
}

/// Current Unix time in whole seconds; zero if the clock is before the epoch.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
