//! Legal service provider catalog collaborator

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub short_desc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_slot: Option<String>,
}

impl Provider {
    /// Card text shown to the human
    pub fn card(&self) -> String {
        let mut text = self.short_desc.clone();
        if let Some(url) = &self.url {
            text.push_str(&format!("\nURL: {url}"));
        }
        if let Some(fee) = &self.base_fee {
            text.push_str(&format!("\nBase Fee: {fee}"));
        }
        if let Some(slot) = &self.available_slot {
            text.push_str(&format!("\nAvailable Slot: {slot}"));
        }
        text
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unreachable: {0}")]
    Network(String),
    #[error("catalog returned status {code}: {body}")]
    Status { code: u16, body: String },
    #[error("catalog returned no providers")]
    Empty,
    #[error("malformed catalog payload: {0}")]
    Malformed(String),
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of providers for the booking part of the flow.
///
/// Called synchronously from a hook; implementations own their timeout.
pub trait ProviderCatalog: Send + Sync {
    fn search(&self) -> Result<Vec<Provider>, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct CatalogPayload {
    providers: Vec<Provider>,
}

/// Fixed provider list, in memory or loaded from a JSON file
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    providers: Vec<Provider>,
}

impl StaticCatalog {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self { providers }
    }

    /// Load `{"providers": [...]}` from disk
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let payload: CatalogPayload =
            serde_json::from_str(&raw).map_err(|e| CatalogError::Malformed(e.to_string()))?;
        Ok(Self::new(payload.providers))
    }

    /// Small built-in list used when nothing is configured
    pub fn sample() -> Self {
        Self::new(vec![
            Provider {
                id: "lsp-1".to_string(),
                name: "Mehta & Associates".to_string(),
                short_desc: "Negotiable Instruments Act specialists".to_string(),
                url: Some("https://example.org/mehta".to_string()),
                base_fee: Some("Rs. 2500".to_string()),
                available_slot: Some("Mon-Fri 10:00-13:00".to_string()),
            },
            Provider {
                id: "lsp-2".to_string(),
                name: "Rao Legal".to_string(),
                short_desc: "Cheque dishonour notices and mediation".to_string(),
                url: None,
                base_fee: Some("Rs. 1800".to_string()),
                available_slot: Some("Sat 11:00-16:00".to_string()),
            },
        ])
    }
}

impl ProviderCatalog for StaticCatalog {
    fn search(&self) -> Result<Vec<Provider>, CatalogError> {
        if self.providers.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(self.providers.clone())
    }
}

/// Catalog served over HTTP as `{"providers": [...]}`
pub struct HttpCatalog {
    agent: ureq::Agent,
    url: String,
}

impl HttpCatalog {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: url.into(),
        }
    }
}

impl ProviderCatalog for HttpCatalog {
    fn search(&self) -> Result<Vec<Provider>, CatalogError> {
        let start = std::time::Instant::now();
        let response = self.agent.get(&self.url).call().map_err(|e| match e {
            ureq::Error::Status(code, resp) => CatalogError::Status {
                code,
                body: resp.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(t) => CatalogError::Network(t.to_string()),
        })?;

        let payload: CatalogPayload = response
            .into_json()
            .map_err(|e| CatalogError::Malformed(e.to_string()))?;

        tracing::info!(
            url = %self.url,
            duration_ms = %start.elapsed().as_millis(),
            providers = payload.providers.len(),
            "Catalog search completed"
        );

        if payload.providers.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(payload.providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_static_catalog_is_failure() {
        let catalog = StaticCatalog::default();
        assert!(matches!(catalog.search(), Err(CatalogError::Empty)));
    }

    #[test]
    fn test_load_catalog_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"providers": [{{"id": "p1", "name": "One", "base_fee": "Rs. 100"}}]}}"#
        )
        .unwrap();

        let catalog = StaticCatalog::from_json_file(file.path()).unwrap();
        let providers = catalog.search().unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name, "One");
        assert_eq!(providers[0].short_desc, "");
        assert!(providers[0].card().contains("Base Fee: Rs. 100"));
    }

    #[test]
    fn test_malformed_catalog_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            StaticCatalog::from_json_file(file.path()),
            Err(CatalogError::Malformed(_))
        ));
    }

    #[test]
    fn test_unreachable_http_catalog_is_network_error() {
        // Port 9 (discard) on localhost is not expected to serve HTTP
        let catalog = HttpCatalog::new("http://127.0.0.1:9/providers", Duration::from_millis(200));
        assert!(matches!(
            catalog.search(),
            Err(CatalogError::Network(_) | CatalogError::Status { .. })
        ));
    }
}
