//! Routing configuration: settings, targets and rules.
//!
//! The document is YAML. `${VAR}` references are expanded from the process
//! environment before parsing so secrets and URLs can stay out of the file.
//! Every rule is validated against the declared targets at load time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::error::ConfigError;
use crate::types::{HttpMethod, Rule, Settings, Target, TargetName};

/// Validated, immutable routing configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub targets: HashMap<TargetName, Arc<Target>>,
    pub rules: HashMap<String, Rule>,
}

impl Config {
    /// Build a configuration from already-typed parts.
    ///
    /// Fails on duplicate target names, duplicate rule events, out of
    /// range settings, or any rule naming an undeclared target.
    pub fn new(
        settings: Settings,
        targets: Vec<Target>,
        rules: Vec<Rule>,
    ) -> Result<Self, ConfigError> {
        validate_settings(&settings)?;

        let mut target_map = HashMap::with_capacity(targets.len());
        for target in targets {
            if target.timeout.is_zero() {
                return Err(ConfigError::InvalidSetting {
                    field: "timeout_s",
                    reason: format!("target '{}' must have a positive timeout", target.name),
                });
            }
            let name = target.name.clone();
            if target_map.insert(name.clone(), Arc::new(target)).is_some() {
                return Err(ConfigError::DuplicateTarget(name));
            }
        }

        let mut rule_map = HashMap::with_capacity(rules.len());
        for rule in rules {
            if let Some(unknown) = rule.targets.iter().find(|t| !target_map.contains_key(*t)) {
                return Err(ConfigError::UnknownTarget {
                    event: rule.event.clone(),
                    target: unknown.clone(),
                });
            }
            let event = rule.event.clone();
            if rule_map.insert(event.clone(), rule).is_some() {
                return Err(ConfigError::DuplicateRule(event));
            }
        }

        Ok(Self {
            settings,
            targets: target_map,
            rules: rule_map,
        })
    }

    /// Read and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&expand_env(&raw))
    }

    /// Parse and validate a YAML document. An empty document yields the
    /// default settings with no targets and no rules.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let doc: Option<RawConfig> = serde_yaml::from_str(raw)?;
        doc.unwrap_or_default().into_config()
    }

    pub fn rule(&self, event: &str) -> Option<&Rule> {
        self.rules.get(event)
    }

    pub fn target(&self, name: &TargetName) -> Option<&Arc<Target>> {
        self.targets.get(name)
    }
}

fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    if settings.forward_retry_backoff.is_zero() {
        return Err(ConfigError::InvalidSetting {
            field: "forward_retry_backoff_s",
            reason: "must be greater than zero".to_string(),
        });
    }
    if settings.forward_concurrency == 0 {
        return Err(ConfigError::InvalidSetting {
            field: "forward_concurrency",
            reason: "must be at least 1".to_string(),
        });
    }
    if settings.forward_concurrency > Semaphore::MAX_PERMITS {
        return Err(ConfigError::InvalidSetting {
            field: "forward_concurrency",
            reason: format!("must be at most {}", Semaphore::MAX_PERMITS),
        });
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    settings: Option<RawSettings>,
    #[serde(default)]
    targets: Option<Vec<RawTarget>>,
    #[serde(default)]
    rules: Option<Vec<RawRule>>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawSettings {
    forward_retries: u32,
    forward_retry_backoff_s: f64,
    forward_concurrency: usize,
    cooldown_s: f64,
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            forward_retries: 1,
            forward_retry_backoff_s: 0.3,
            forward_concurrency: 10,
            cooldown_s: 10.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    name: String,
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default = "default_timeout_s")]
    timeout_s: f64,
    #[serde(default)]
    headers: Option<HashMap<String, String>>,
    #[serde(default)]
    secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    event: String,
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    payload_template: Option<Map<String, Value>>,
}

fn default_timeout_s() -> f64 {
    3.0
}

impl RawConfig {
    fn into_config(self) -> Result<Config, ConfigError> {
        let settings = self.settings.unwrap_or_default().into_settings()?;

        let targets = self
            .targets
            .unwrap_or_default()
            .into_iter()
            .map(RawTarget::into_target)
            .collect::<Result<Vec<_>, _>>()?;

        let rules = self
            .rules
            .unwrap_or_default()
            .into_iter()
            .map(|r| Rule {
                event: r.event,
                targets: r.targets.into_iter().map(TargetName).collect(),
                payload_template: r.payload_template,
            })
            .collect();

        Config::new(settings, targets, rules)
    }
}

impl RawSettings {
    fn into_settings(self) -> Result<Settings, ConfigError> {
        Ok(Settings {
            forward_retries: self.forward_retries,
            forward_retry_backoff: seconds("forward_retry_backoff_s", self.forward_retry_backoff_s)?,
            forward_concurrency: self.forward_concurrency,
            cooldown: seconds("cooldown_s", self.cooldown_s)?,
        })
    }
}

impl RawTarget {
    fn into_target(self) -> Result<Target, ConfigError> {
        let method = self
            .method
            .filter(|m| !m.trim().is_empty())
            .map(HttpMethod::from)
            .unwrap_or_default();

        Ok(Target {
            name: TargetName(self.name),
            url: self.url,
            method,
            timeout: seconds("timeout_s", self.timeout_s)?,
            headers: self.headers.unwrap_or_default(),
            secret: self.secret.map(String::into_bytes),
        })
    }
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidSetting {
        field,
        reason: format!("{value} is not a valid non-negative number of seconds"),
    })
}

/// Replace `${NAME}` with the value of environment variable `NAME`.
///
/// References to unset variables, and an unterminated `${`, are kept
/// verbatim so a typo shows up in the loaded value instead of vanishing.
fn expand_env(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        match std::env::var(name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}
