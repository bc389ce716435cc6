pub mod ord_pg;
pub mod rpc;

use config::Network;
use deadpool_postgres::Pool;
use indexer_postgres::pg_pool_client;
use serde_json::Value;

use crate::utils::Context;
use crate::{try_crit, try_info};

use rpc::OrdRpcClient;

/// One row of the upstream `ord_transfers` join consumed by the BRC-20 state machine, in ascending `id` order. An empty
/// `old_satpoint` marks the inscription's creation event.
#[derive(Debug, Clone)]
pub struct OrdTransferRow {
    pub id: i64,
    pub inscription_id: String,
    pub old_satpoint: String,
    pub new_pkscript: String,
    pub new_wallet: Option<String>,
    pub sent_as_fee: bool,
    pub content: Option<Value>,
    pub content_type: Option<String>,
    pub parent_id: Option<String>,
}

/// A `text/plain*` or `application/json*` inscription revealed at a block, ordered by inscription number. `text_content`
/// is hex-encoded raw content; `content` is set when the upstream already parsed the body as JSON.
#[derive(Debug, Clone)]
pub struct OrdTextInscriptionRow {
    pub inscription_id: String,
    pub inscription_number: i64,
    pub content: Option<Value>,
    pub text_content: Option<String>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct OrdBitmapInscriptionRow {
    pub inscription_id: String,
    pub inscription_number: i64,
    pub content_hex: String,
}

/// Where the replay engine reads chain state from. The metaprotocol Postgres database is the primary source; the bitmap
/// indexer can alternatively run against the ord JSON-RPC endpoint, which exposes the same data but no contract metadata.
pub enum UpstreamSource {
    Postgres(Pool),
    Rpc(OrdRpcClient),
}

impl UpstreamSource {
    /// Highest block the upstream indexer has committed, if any.
    pub async fn max_block_height(&self) -> Result<Option<u32>, String> {
        match self {
            UpstreamSource::Postgres(pool) => {
                let client = pg_pool_client(pool).await?;
                ord_pg::get_max_block_height(&client).await
            }
            UpstreamSource::Rpc(rpc) => Ok(Some(rpc.get_latest_block_height().await?)),
        }
    }

    pub async fn block_hash_at(&self, block_height: u32) -> Result<Option<String>, String> {
        match self {
            UpstreamSource::Postgres(pool) => {
                let client = pg_pool_client(pool).await?;
                ord_pg::get_block_hash(block_height, &client).await
            }
            UpstreamSource::Rpc(rpc) => rpc.get_block_hash(block_height).await,
        }
    }

    /// Refuses to run against an upstream indexed for another network or with a transfer budget too small to observe the
    /// protocol's inscription lifecycle. The RPC source carries no contract metadata, matching the original deployment.
    pub async fn verify_contract(
        &self,
        network: &Network,
        min_transfer_count: i32,
        ctx: &Context,
    ) -> Result<(), String> {
        let UpstreamSource::Postgres(pool) = self else {
            return Ok(());
        };
        let client = pg_pool_client(pool).await?;
        let Some(upstream_network) = ord_pg::get_network_type(&client).await? else {
            try_crit!(ctx, "ord_network_type not found, the upstream metaprotocol db must be re-indexed");
            return Err("upstream network type missing".to_string());
        };
        if upstream_network != network.as_str() {
            try_crit!(
                ctx,
                "network_type mismatch between the upstream index ({upstream_network}) and this indexer ({})",
                network.as_str()
            );
            return Err("network_type mismatch".to_string());
        }
        let Some(max_transfer_count) = ord_pg::get_default_max_transfer_count(&client).await? else {
            try_crit!(ctx, "ord_transfer_counts not found, the upstream metaprotocol db must be re-indexed");
            return Err("upstream transfer counts missing".to_string());
        };
        if max_transfer_count < min_transfer_count {
            try_crit!(
                ctx,
                "upstream max_transfer_cnt is {max_transfer_count} but this indexer requires at least {min_transfer_count}, re-index the upstream with a larger transfer budget"
            );
            return Err("upstream max_transfer_cnt too small".to_string());
        }
        try_info!(ctx, "Upstream contract verified for {}", network.as_str());
        Ok(())
    }

    /// The ordered BRC-20 candidate transfers of a block. Only available on the Postgres source.
    pub async fn brc20_transfers(&self, block_height: u32) -> Result<Vec<OrdTransferRow>, String> {
        match self {
            UpstreamSource::Postgres(pool) => {
                let client = pg_pool_client(pool).await?;
                ord_pg::get_brc20_transfers(block_height, &client).await
            }
            UpstreamSource::Rpc(_) => {
                Err("brc20 indexing requires the upstream metaprotocol db".to_string())
            }
        }
    }

    /// The `text/plain*` / `application/json*` inscriptions of a block. Only available on the Postgres source.
    pub async fn text_inscriptions(
        &self,
        block_height: u32,
    ) -> Result<Vec<OrdTextInscriptionRow>, String> {
        match self {
            UpstreamSource::Postgres(pool) => {
                let client = pg_pool_client(pool).await?;
                ord_pg::get_text_inscriptions(block_height, &client).await
            }
            UpstreamSource::Rpc(_) => {
                Err("sns indexing requires the upstream metaprotocol db".to_string())
            }
        }
    }

    pub async fn bitmap_inscriptions(
        &self,
        block_height: u32,
    ) -> Result<Vec<OrdBitmapInscriptionRow>, String> {
        match self {
            UpstreamSource::Postgres(pool) => {
                let client = pg_pool_client(pool).await?;
                ord_pg::get_bitmap_inscriptions(block_height, &client).await
            }
            UpstreamSource::Rpc(rpc) => rpc.get_block_bitmap_inscriptions(block_height).await,
        }
    }
}
