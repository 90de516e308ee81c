use thiserror::Error;

use crate::jobs::MAX_BG_CAPACITY;

const DEFAULT_PROMPT: &str = "% ";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("JSH_MAX_BG: expected a number between 1 and {max}, got '{value}'")]
    InvalidMaxBackground { value: String, max: usize },
}

/// Startup settings, read once from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Background member processes tracked at once.
    pub max_background: usize,
    pub prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_background: MAX_BG_CAPACITY,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl Config {
    /// Read `JSH_MAX_BG` and `JSH_PROMPT`. Invalid values fall back to the
    /// defaults; the errors are returned for reporting.
    pub fn from_env() -> (Self, Vec<ConfigError>) {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<ConfigError>) {
        let mut config = Config::default();
        let mut errors = Vec::new();

        if let Some(value) = lookup("JSH_MAX_BG") {
            match parse_max_background(&value) {
                Ok(max) => config.max_background = max,
                Err(err) => errors.push(err),
            }
        }
        if let Some(prompt) = lookup("JSH_PROMPT") {
            config.prompt = prompt;
        }

        (config, errors)
    }
}

fn parse_max_background(value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if (1..=MAX_BG_CAPACITY).contains(&n) => Ok(n),
        _ => Err(ConfigError::InvalidMaxBackground {
            value: value.to_string(),
            max: MAX_BG_CAPACITY,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> (Config, Vec<ConfigError>) {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let (config, errors) = load(&[]);
        assert_eq!(config, Config::default());
        assert_eq!(config.max_background, 16);
        assert_eq!(config.prompt, "% ");
        assert!(errors.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let (config, errors) = load(&[("JSH_MAX_BG", " 4 "), ("JSH_PROMPT", "jsh> ")]);
        assert_eq!(config.max_background, 4);
        assert_eq!(config.prompt, "jsh> ");
        assert!(errors.is_empty());
    }

    #[test]
    fn out_of_range_limit_falls_back() {
        for bad in ["0", "17", "many", "-1"] {
            let (config, errors) = load(&[("JSH_MAX_BG", bad)]);
            assert_eq!(config.max_background, MAX_BG_CAPACITY);
            assert_eq!(errors.len(), 1, "value {bad}");
        }
    }
}
