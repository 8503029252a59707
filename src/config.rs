use crate::gate::GatePolicy;
use std::{path::PathBuf, time::Duration};
use url::Url;

const DEFAULT_PORT: u16 = 10000;
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is missing")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub admin_id: u64,
    pub base_url: Url,
    pub port: u16,
    pub data_dir: PathBuf,
    pub gate_policy: GatePolicy,
    pub session_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Разбор конфигурации из произвольного источника (ENV в проде, карта в тестах).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bot_token = get("BOT_TOKEN").ok_or(ConfigError::Missing("BOT_TOKEN"))?;

        let admin_id = get("ADMIN_ID")
            .ok_or(ConfigError::Missing("ADMIN_ID"))?
            .parse::<u64>()
            .map_err(|e| invalid("ADMIN_ID", e))?;

        let base_url = get("WEBHOOK_URL")
            .or_else(|| get("RENDER_EXTERNAL_URL"))
            .ok_or(ConfigError::Missing("WEBHOOK_URL"))?;
        let base_url = Url::parse(&base_url).map_err(|e| invalid("WEBHOOK_URL", e))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("WEBHOOK_URL", "not a base url"));
        }

        let port = match get("PORT") {
            Some(p) => p.parse::<u16>().map_err(|e| invalid("PORT", e))?,
            None => DEFAULT_PORT,
        };

        let data_dir = get("DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

        let gate_policy = match get("GATE_POLICY") {
            Some(p) => p.parse::<GatePolicy>().map_err(|e| invalid("GATE_POLICY", e))?,
            None => GatePolicy::default(),
        };

        let session_timeout = match get("ADMIN_SESSION_TIMEOUT_SECS") {
            Some(s) => s
                .parse::<u64>()
                .map_err(|e| invalid("ADMIN_SESSION_TIMEOUT_SECS", e))?,
            None => DEFAULT_SESSION_TIMEOUT_SECS,
        };

        Ok(Self {
            bot_token,
            admin_id,
            base_url,
            port,
            data_dir,
            gate_policy,
            session_timeout: Duration::from_secs(session_timeout),
        })
    }

    /// Путь вебхука — сам токен, как в Bot API-примерах: `/<token>`.
    pub fn webhook_path(&self) -> String {
        format!("/{}", self.bot_token)
    }

    pub fn webhook_url(&self) -> Result<Url, ConfigError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{}", self.bot_token)).map_err(|e| invalid("WEBHOOK_URL", e))
    }
}

fn invalid(name: &'static str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid { name, reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    const BASE: [(&str, &str); 3] = [
        ("BOT_TOKEN", "123:ABC"),
        ("ADMIN_ID", "777"),
        ("WEBHOOK_URL", "https://kino.example.com"),
    ];

    #[test]
    fn defaults_apply() {
        let cfg = parse(&BASE).unwrap();

        assert_eq!(cfg.admin_id, 777);
        assert_eq!(cfg.port, 10000);
        assert_eq!(cfg.data_dir, PathBuf::from("."));
        assert_eq!(cfg.gate_policy, GatePolicy::Lenient);
        assert_eq!(cfg.session_timeout, Duration::from_secs(600));
        assert_eq!(cfg.webhook_path(), "/123:ABC");
        assert_eq!(cfg.webhook_url().unwrap().as_str(), "https://kino.example.com/123:ABC");
    }

    #[test]
    fn overrides_apply() {
        let mut vars = BASE.to_vec();
        vars.retain(|(k, _)| *k != "WEBHOOK_URL");
        vars.extend([
            ("RENDER_EXTERNAL_URL", "https://kino.onrender.com/"),
            ("PORT", "8080"),
            ("DATA_DIR", "/var/lib/kino"),
            ("GATE_POLICY", "strict"),
            ("ADMIN_SESSION_TIMEOUT_SECS", "30"),
        ]);

        let cfg = parse(&vars).unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/kino"));
        assert_eq!(cfg.gate_policy, GatePolicy::Strict);
        assert_eq!(cfg.session_timeout, Duration::from_secs(30));
        assert_eq!(cfg.webhook_url().unwrap().as_str(), "https://kino.onrender.com/123:ABC");
    }

    #[test]
    fn required_values_are_enforced() {
        for missing in ["BOT_TOKEN", "ADMIN_ID", "WEBHOOK_URL"] {
            let vars: Vec<_> = BASE.iter().copied().filter(|(k, _)| *k != missing).collect();
            assert_eq!(parse(&vars).unwrap_err(), ConfigError::Missing(missing));
        }
    }

    #[test]
    fn malformed_values_are_rejected() {
        let mut vars = BASE.to_vec();
        vars[1] = ("ADMIN_ID", "admin");
        assert!(matches!(parse(&vars), Err(ConfigError::Invalid { name: "ADMIN_ID", .. })));

        let mut vars = BASE.to_vec();
        vars.push(("PORT", "http"));
        assert!(matches!(parse(&vars), Err(ConfigError::Invalid { name: "PORT", .. })));

        let mut vars = BASE.to_vec();
        vars[2] = ("WEBHOOK_URL", "not a url");
        assert!(matches!(parse(&vars), Err(ConfigError::Invalid { name: "WEBHOOK_URL", .. })));
    }
}
