use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::warn;

/// Environment variable selecting [`AfterResponse`] (`continue` or `stop`).
pub const ENV_AFTER_RESPONSE: &str = "FILEROUTE_AFTER_RESPONSE";
/// Environment variable holding the manifest cache TTL in milliseconds.
pub const ENV_MANIFEST_TTL_MS: &str = "FILEROUTE_MANIFEST_TTL_MS";
/// Environment variable holding the handler timeout in milliseconds.
pub const ENV_HANDLER_TIMEOUT_MS: &str = "FILEROUTE_HANDLER_TIMEOUT_MS";

/// What the dispatcher does with the rest of the chain after it has responded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterResponse {
    /// Run downstream middleware anyway and discard its response.
    #[default]
    Continue,
    /// Return the dispatcher's response without touching the rest of the chain.
    Stop,
}

#[derive(Debug, Error)]
#[error("unknown after-response policy `{0}` (expected `continue` or `stop`)")]
pub struct ParseAfterResponseError(String);

impl FromStr for AfterResponse {
    type Err = ParseAfterResponseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "stop" => Ok(Self::Stop),
            _ => Err(ParseAfterResponseError(s.to_owned())),
        }
    }
}

/// Tuning knobs for [`Dispatcher`](super::Dispatcher).
///
/// The defaults keep every request fresh: the manifest is fetched per
/// request, handlers may run indefinitely and downstream middleware still runs
/// after a route has answered.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fileroute::dispatch::{AfterResponse, DispatchConfig};
///
/// let config = DispatchConfig::default()
///     .after_response(AfterResponse::Stop)
///     .handler_timeout(Duration::from_secs(10));
/// assert_eq!(config.handler_timeout, Some(Duration::from_secs(10)));
/// assert_eq!(config.manifest_ttl, None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub after_response: AfterResponse,
    #[serde(rename = "manifest_ttl_ms", deserialize_with = "millis")]
    pub manifest_ttl: Option<Duration>,
    #[serde(rename = "handler_timeout_ms", deserialize_with = "millis")]
    pub handler_timeout: Option<Duration>,
}

impl DispatchConfig {
    #[must_use]
    pub fn after_response(mut self, policy: AfterResponse) -> Self {
        self.after_response = policy;
        self
    }

    /// Caches the manifest for `ttl` instead of fetching it per request.
    #[must_use]
    pub fn manifest_ttl(mut self, ttl: Duration) -> Self {
        self.manifest_ttl = Some(ttl);
        self
    }

    /// Fails handlers that have not settled after `timeout` with a `500`.
    #[must_use]
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Reads the configuration from the process environment.
    ///
    /// See [`DispatchConfig::from_lookup`] for the rules.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from `lookup`, starting from the defaults.
    ///
    /// Reads [`ENV_AFTER_RESPONSE`], [`ENV_MANIFEST_TTL_MS`] and
    /// [`ENV_HANDLER_TIMEOUT_MS`]. Values that do not parse are logged and
    /// ignored; a duration of `0` disables the setting.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_AFTER_RESPONSE) {
            match raw.parse() {
                Ok(policy) => config.after_response = policy,
                Err(e) => warn!(key = ENV_AFTER_RESPONSE, error = %e, "ignoring invalid value"),
            }
        }
        config.manifest_ttl = duration_var(&lookup, ENV_MANIFEST_TTL_MS);
        config.handler_timeout = duration_var(&lookup, ENV_HANDLER_TIMEOUT_MS);

        config
    }
}

fn duration_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(0) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring invalid duration");
            None
        }
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let ms = Option::<u64>::deserialize(deserializer)?;
    Ok(ms.filter(|&ms| ms > 0).map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_fresh_and_unbounded() {
        let config = DispatchConfig::default();
        assert_eq!(config.after_response, AfterResponse::Continue);
        assert_eq!(config.manifest_ttl, None);
        assert_eq!(config.handler_timeout, None);
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!(" Stop ".parse::<AfterResponse>().unwrap(), AfterResponse::Stop);
        assert_eq!("continue".parse::<AfterResponse>().unwrap(), AfterResponse::Continue);
        assert!("halt".parse::<AfterResponse>().is_err());
    }

    #[test]
    fn lookup_reads_all_keys() {
        let config = DispatchConfig::from_lookup(lookup_from(&[
            (ENV_AFTER_RESPONSE, "stop"),
            (ENV_MANIFEST_TTL_MS, "2500"),
            (ENV_HANDLER_TIMEOUT_MS, "100"),
        ]));
        assert_eq!(config.after_response, AfterResponse::Stop);
        assert_eq!(config.manifest_ttl, Some(Duration::from_millis(2500)));
        assert_eq!(config.handler_timeout, Some(Duration::from_millis(100)));
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = DispatchConfig::from_lookup(lookup_from(&[
            (ENV_AFTER_RESPONSE, "sometimes"),
            (ENV_MANIFEST_TTL_MS, "soon"),
            (ENV_HANDLER_TIMEOUT_MS, "0"),
        ]));
        assert_eq!(config, DispatchConfig::default());
    }

    #[test]
    fn deserializes_from_json() {
        let config: DispatchConfig = serde_json::from_value(json!({
            "after_response": "stop",
            "manifest_ttl_ms": 1000
        }))
        .unwrap();
        assert_eq!(config.after_response, AfterResponse::Stop);
        assert_eq!(config.manifest_ttl, Some(Duration::from_secs(1)));
        assert_eq!(config.handler_timeout, None);
    }
}
