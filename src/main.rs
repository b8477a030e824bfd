//! Advisor bot - console host for the cheque-bounce advisory flow
//!
//! Each stdin line is one turn. Messages for the human go to stdout;
//! messages for a collaborator are printed with their tag so the operator
//! can paste the collaborator's reply back as the next line.

use advisor_flow::config::{CatalogSource, Config};
use advisor_flow::db::Database;
use advisor_flow::flows::{advisory, HttpCatalog, ProviderCatalog, StaticCatalog};
use advisor_flow::runtime::{DatabaseStorage, ProductionRuntime, RuntimeError};
use advisor_flow::state_machine::{Destination, OutboundMessage};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; stdout carries the conversation
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "advisor_flow=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let catalog: Arc<dyn ProviderCatalog> = match &config.catalog {
        CatalogSource::Http { url, timeout } => {
            tracing::info!(url = %url, "Using HTTP provider catalog");
            Arc::new(HttpCatalog::new(url.clone(), *timeout))
        }
        CatalogSource::File(path) => {
            tracing::info!(path = %path.display(), "Loading provider catalog file");
            Arc::new(StaticCatalog::from_json_file(path)?)
        }
        CatalogSource::Sample => {
            tracing::warn!("No provider catalog configured. Using the built-in sample list.");
            Arc::new(StaticCatalog::sample())
        }
    };

    let flow = advisory::build(catalog, config.max_hops)?;
    let runtime = ProductionRuntime::new(flow, DatabaseStorage::new(db));

    for stale in runtime.stale_callbacks(config.callback_timeout).await? {
        tracing::warn!(
            session_id = %stale.id,
            state = %stale.snapshot.state,
            since = %stale.updated_at,
            "Session still waiting on a collaborator"
        );
    }

    tracing::info!(session_id = %config.session_id, "Advisor bot ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = Some(line.trim().to_string()).filter(|l| !l.is_empty());

        match runtime.handle_turn(&config.session_id, input).await {
            Ok(outcome) => {
                for message in &outcome.messages {
                    println!("{}", render(message));
                }
                if outcome.report.ended {
                    println!("-- conversation ended; type anything to start again --");
                }
            }
            Err(RuntimeError::Engine(e)) => {
                tracing::error!(error = %e, "Turn failed");
                println!("Sorry, something went wrong. Please try again.");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

fn render(message: &OutboundMessage) -> String {
    let mut out = String::new();
    if let Destination::Collaborator(tag) = &message.destination {
        out.push_str(&format!("[-> {tag}] "));
    }
    if let Some(header) = &message.header {
        out.push_str(&format!("== {header} ==\n"));
    }
    out.push_str(&message.body);
    for option in &message.options {
        out.push_str(&format!("\n  [{}] {}", option.id, option.label));
    }
    if let Some(attachment) = &message.attachment {
        out.push_str(&format!("\n  (attachment: {})", attachment.filename));
    }
    if let Some(dialog) = &message.dialog {
        out.push_str(&format!("\n  (dialog {dialog}; reply with the channel's result)"));
    }
    if let Some(form) = &message.form {
        out.push_str(&format!("\n  (form {} token {}; reply with the submission JSON)", form.form_id, form.token));
    }
    out
}
