//! Bundled conversational flows and the collaborators they call

pub mod advisory;
pub mod catalog;

pub use catalog::{CatalogError, HttpCatalog, Provider, ProviderCatalog, StaticCatalog};
