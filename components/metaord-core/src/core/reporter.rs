use std::time::Duration;

use config::{Config, Network};
use serde_json::json;

use crate::utils::Context;
use crate::{try_debug, try_info, try_warn};

use super::Protocol;

/// Posts per-block digests to the central aggregator so independent nodes can be compared. Failures never reach the main
/// loop; after the configured retries the report is dropped.
pub struct Reporter {
    enabled: bool,
    url: String,
    name: String,
    retries: u32,
    network: Network,
    client: reqwest::Client,
}

/// Reports are throttled while catching up: only blocks near the upstream tip are reported, plus a heartbeat every 100
/// blocks.
pub fn should_report(upstream_tip: u32, block_height: u32, last_report_height: u32) -> bool {
    upstream_tip - block_height < 10 || block_height - last_report_height > 100
}

impl Reporter {
    pub fn new(config: &Config) -> Reporter {
        Reporter {
            enabled: config.report_enabled(),
            url: config.report.url.clone(),
            name: config.report.name.clone(),
            retries: config.report.retries,
            network: config.network,
            client: reqwest::Client::new(),
        }
    }

    pub async fn report_block(
        &self,
        protocol: &Protocol,
        block_height: u32,
        block_hash: &str,
        block_event_hash: &str,
        cumulative_event_hash: &str,
        ctx: &Context,
    ) {
        if !self.enabled {
            try_debug!(ctx, "Reporting to the metaprotocol aggregator is disabled");
            return;
        }
        let mut body = json!({
            "name": self.name,
            "type": protocol.name(),
            "node_type": "full_node",
            "network_type": self.network.as_str(),
            "version": protocol.indexer_version(),
            "db_version": protocol.db_version(),
            "block_height": block_height,
            "block_hash": block_hash,
            "block_event_hash": block_event_hash,
            "cumulative_event_hash": cumulative_event_hash,
        });
        if let Some(event_hash_version) = protocol.event_hash_version() {
            body["event_hash_version"] = json!(event_hash_version);
        }
        for _ in 0..self.retries {
            match self.client.post(&self.url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    try_info!(
                        ctx,
                        "Reported block #{block_height} hashes to the metaprotocol aggregator"
                    );
                    return;
                }
                Ok(response) => {
                    try_warn!(
                        ctx,
                        "Error reporting hashes to the metaprotocol aggregator, status code: {}",
                        response.status()
                    );
                }
                Err(e) => {
                    try_warn!(
                        ctx,
                        "Error reporting hashes to the metaprotocol aggregator, retrying: {e}"
                    );
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        try_warn!(
            ctx,
            "Error reporting hashes to the metaprotocol aggregator, giving up"
        );
    }
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::should_report;

    #[test_case(100, 99, 0 => true; "near the tip")]
    #[test_case(100, 91, 0 => true; "nine blocks behind the tip")]
    #[test_case(1000, 500, 0 => true; "heartbeat after a hundred blocks")]
    #[test_case(1000, 500, 450 => false; "catching up between heartbeats")]
    #[test_case(1000, 990, 989 => true; "near tip reports every block")]
    fn gates_reports(upstream_tip: u32, block_height: u32, last_report_height: u32) -> bool {
        should_report(upstream_tip, block_height, last_report_height)
    }
}
