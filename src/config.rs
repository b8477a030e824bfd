//! Environment-driven configuration for the console host

use crate::state_machine::DEFAULT_MAX_HOPS;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_SESSION_ID: &str = "console";
const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;

/// Where the provider list comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    Http { url: String, timeout: Duration },
    File(PathBuf),
    /// Built-in sample list
    Sample,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub session_id: String,
    pub catalog: CatalogSource,
    pub max_hops: usize,
    /// How long a session may sit in `AwaitCallback` before it is reported
    pub callback_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparseable numbers fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str, default: u64| -> u64 {
            lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
        };

        let db_path = lookup("ADVISOR_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.advisor-bot/sessions.db"))
            },
            PathBuf::from,
        );

        let catalog = if let Some(url) = lookup("ADVISOR_CATALOG_URL").filter(|u| !u.is_empty()) {
            CatalogSource::Http {
                url,
                timeout: Duration::from_secs(number(
                    "ADVISOR_CATALOG_TIMEOUT_SECS",
                    DEFAULT_CATALOG_TIMEOUT_SECS,
                )),
            }
        } else if let Some(path) = lookup("ADVISOR_CATALOG_FILE").filter(|p| !p.is_empty()) {
            CatalogSource::File(PathBuf::from(path))
        } else {
            CatalogSource::Sample
        };

        let max_hops = usize::try_from(number("ADVISOR_MAX_HOPS", DEFAULT_MAX_HOPS as u64))
            .unwrap_or(DEFAULT_MAX_HOPS)
            .max(1);

        Self {
            db_path,
            session_id: lookup("ADVISOR_SESSION_ID")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string()),
            catalog,
            max_hops,
            callback_timeout: Duration::from_secs(number(
                "ADVISOR_CALLBACK_TIMEOUT_SECS",
                DEFAULT_CALLBACK_TIMEOUT_SECS,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("HOME", "/home/advisor")]);
        assert_eq!(cfg.db_path, PathBuf::from("/home/advisor/.advisor-bot/sessions.db"));
        assert_eq!(cfg.session_id, "console");
        assert_eq!(cfg.catalog, CatalogSource::Sample);
        assert_eq!(cfg.max_hops, DEFAULT_MAX_HOPS);
        assert_eq!(cfg.callback_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_url_takes_precedence_over_file() {
        let cfg = config(&[
            ("ADVISOR_CATALOG_URL", "http://catalog.local/providers"),
            ("ADVISOR_CATALOG_FILE", "/etc/providers.json"),
            ("ADVISOR_CATALOG_TIMEOUT_SECS", "3"),
        ]);
        assert_eq!(
            cfg.catalog,
            CatalogSource::Http {
                url: "http://catalog.local/providers".to_string(),
                timeout: Duration::from_secs(3),
            }
        );

        let cfg = config(&[("ADVISOR_CATALOG_FILE", "/etc/providers.json")]);
        assert_eq!(cfg.catalog, CatalogSource::File(PathBuf::from("/etc/providers.json")));
    }

    #[test]
    fn test_unparseable_numbers_fall_back() {
        let cfg = config(&[
            ("ADVISOR_MAX_HOPS", "lots"),
            ("ADVISOR_CALLBACK_TIMEOUT_SECS", "-5"),
            ("ADVISOR_SESSION_ID", "  "),
        ]);
        assert_eq!(cfg.max_hops, DEFAULT_MAX_HOPS);
        assert_eq!(cfg.callback_timeout, Duration::from_secs(300));
        assert_eq!(cfg.session_id, "console");

        let cfg = config(&[("ADVISOR_MAX_HOPS", "0")]);
        assert_eq!(cfg.max_hops, 1);
    }
}
