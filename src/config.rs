use std::{env, path::PathBuf, time::Duration};

use crate::error::ChatError;
use crate::orchestrator::TypingDelay;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Base URL of the tenant Q&A API. Without it lookups are local only.
    pub qa_api_base_url: Option<String>,
    pub qa_seed_path: Option<PathBuf>,
    pub remote_timeout: Duration,
    pub typing_delay: TypingDelay,
    pub bot_name: String,
    pub greeting_template: Option<String>,
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            qa_api_base_url: None,
            qa_seed_path: None,
            remote_timeout: Duration::from_millis(5000),
            typing_delay: TypingDelay::default(),
            bot_name: "Assistant".to_string(),
            greeting_template: None,
            rng_seed: None,
        }
    }
}

impl Config {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self, ChatError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let port = parse_var(&text, "PORT")?.unwrap_or(defaults.port);
        let remote_timeout = parse_var::<u64>(&text, "QA_REMOTE_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.remote_timeout);
        let delay_min = parse_var::<u64>(&text, "TYPING_DELAY_MIN_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.typing_delay.min());
        let delay_max = parse_var::<u64>(&text, "TYPING_DELAY_MAX_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.typing_delay.max());

        Ok(Self {
            port,
            qa_api_base_url: text("QA_API_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            qa_seed_path: text("QA_SEED_PATH").map(PathBuf::from),
            remote_timeout,
            typing_delay: TypingDelay::new(delay_min, delay_max)?,
            bot_name: text("BOT_NAME").unwrap_or(defaults.bot_name),
            greeting_template: text("GREETING_TEMPLATE"),
            rng_seed: parse_var(&text, "CHAT_RNG_SEED")?,
        })
    }
}

fn parse_var<T>(text: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ChatError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    text(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|err| ChatError::config(format!("{key}={raw:?}: {err}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 4000);
        assert!(config.qa_api_base_url.is_none());
        assert_eq!(config.remote_timeout, Duration::from_millis(5000));
        assert_eq!(config.typing_delay, TypingDelay::default());
        assert_eq!(config.bot_name, "Assistant");
        assert!(config.rng_seed.is_none());
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("QA_API_BASE_URL", " http://localhost:5000/api/ "),
            ("TYPING_DELAY_MIN_MS", "0"),
            ("TYPING_DELAY_MAX_MS", "10"),
            ("BOT_NAME", "Nova"),
            ("CHAT_RNG_SEED", "99"),
            ("GREETING_TEMPLATE", "   "),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.qa_api_base_url.as_deref(), Some("http://localhost:5000/api"));
        assert_eq!(config.typing_delay.max(), Duration::from_millis(10));
        assert_eq!(config.bot_name, "Nova");
        assert_eq!(config.rng_seed, Some(99));
        assert!(config.greeting_template.is_none());
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        let err = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));

        let err = Config::from_lookup(lookup(&[
            ("TYPING_DELAY_MIN_MS", "500"),
            ("TYPING_DELAY_MAX_MS", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }
}
