use serde::Serialize;

use crate::orchestrator::Orchestrator;
use crate::traits::Connector;

/// Health snapshot for one configured connector.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source: String,
    pub description: String,
    pub healthy: bool,
    pub processed_items: usize,
}

/// Probe every registered connector with its own `connect()` check.
pub async fn source_statuses(orch: &Orchestrator) -> Vec<SourceStatus> {
    let mut statuses = Vec::new();
    for connector in orch.registry().connectors() {
        let healthy = connector.connect().await.unwrap_or(false);
        statuses.push(SourceStatus {
            source: connector.source_label(),
            description: connector.description().to_string(),
            healthy,
            processed_items: connector.processed_items().len(),
        });
    }
    statuses
}

pub async fn list_sources(orch: &Orchestrator) {
    let statuses = source_statuses(orch).await;
    if statuses.is_empty() {
        println!("No connectors configured.");
        return;
    }

    println!("{:<24} {:<10} {:<10} DESCRIPTION", "SOURCE", "HEALTHY", "PROCESSED");
    for status in statuses {
        println!(
            "{:<24} {:<10} {:<10} {}",
            status.source,
            if status.healthy { "ok" } else { "unavailable" },
            status.processed_items,
            status.description
        );
    }
}
