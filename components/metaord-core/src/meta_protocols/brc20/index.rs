use config::Config;
use deadpool_postgres::{Object, Pool, Transaction};
use indexer_postgres::{pg_begin, pg_pool_client};

use crate::core::upstream::UpstreamSource;
use crate::core::{chain, Protocol, EVENT_SEPARATOR};
use crate::service::ProtocolIndexer;
use crate::utils::Context;
use crate::{try_debug, try_info};

use super::brc20_pg;
use super::cache::Brc20MemoryCache;
use super::models::{
    Brc20DeployEvent, Brc20EventType, Brc20MintEvent, Brc20TransferInscribeEvent,
    Brc20TransferTransferEvent,
};
use super::parser::{normalize_content_type, parse_brc20_operation};
use super::verifier::{verify_brc20_operation, VerifiedBrc20Operation};
use super::{brc20_activation_height, extras};

/// Applies one block of BRC-20 events and returns the canonicalized block event string. Events are processed strictly in
/// ascending upstream transfer id; all writes stay inside the given transaction.
pub async fn index_block(
    block_height: u32,
    upstream: &UpstreamSource,
    cache: &mut Brc20MemoryCache,
    config: &Config,
    db_tx: &Transaction<'_>,
    ctx: &Context,
) -> Result<String, String> {
    if block_height < brc20_activation_height(&config.network) {
        return Ok(String::new());
    }
    let transfers = upstream.brc20_transfers(block_height).await?;
    if !transfers.is_empty() {
        try_debug!(ctx, "BRC-20 transfer count: {}", transfers.len());
    }
    let mut events: Vec<String> = vec![];
    for row in transfers.iter() {
        // Inscribed directly as a fee: the inscription never had an owner.
        if row.sent_as_fee && row.old_satpoint.is_empty() {
            continue;
        }
        let Some(content_type) = row
            .content_type
            .as_deref()
            .and_then(normalize_content_type)
        else {
            continue;
        };
        if content_type != "application/json" && content_type != "text/plain" {
            continue;
        }
        let Some(content) = &row.content else {
            continue;
        };
        let Some(parsed) = parse_brc20_operation(content) else {
            continue;
        };
        let Some(operation) =
            verify_brc20_operation(&parsed, row, block_height, cache, db_tx, ctx).await?
        else {
            continue;
        };
        match operation {
            VerifiedBrc20Operation::TokenDeploy(data) => {
                events.push(cache.insert_token_deploy(&data, row, block_height)?);
                try_info!(
                    ctx,
                    "BRC-20 deploy {} ({}) at block {block_height}",
                    data.tick,
                    row.new_pkscript
                );
            }
            VerifiedBrc20Operation::TokenMint(data) => {
                events.push(
                    cache
                        .insert_token_mint(&data, row, block_height, db_tx)
                        .await?,
                );
                try_info!(
                    ctx,
                    "BRC-20 mint {} {} ({}) at block {block_height}",
                    data.tick,
                    data.amount,
                    row.new_pkscript
                );
            }
            VerifiedBrc20Operation::TokenTransferInscribe(data) => {
                events.push(
                    cache
                        .insert_transfer_inscribe(&data, row, block_height, db_tx)
                        .await?,
                );
                try_info!(
                    ctx,
                    "BRC-20 transfer inscribe {} {} ({}) at block {block_height}",
                    data.tick,
                    data.amount,
                    row.new_pkscript
                );
            }
            VerifiedBrc20Operation::TokenTransferSend(data) => {
                let spent = if data.sent_as_fee {
                    None
                } else {
                    Some((row.new_pkscript.as_str(), row.new_wallet.as_deref()))
                };
                events.push(
                    cache
                        .insert_transfer_send(
                            &data.tick,
                            &data.original_tick,
                            data.amount,
                            spent,
                            row,
                            block_height,
                            db_tx,
                        )
                        .await?,
                );
                try_info!(
                    ctx,
                    "BRC-20 transfer send {} {} at block {block_height}",
                    data.tick,
                    data.amount
                );
            }
        }
    }
    cache.db_cache.flush(db_tx).await?;
    Ok(events.join(EVENT_SEPARATOR))
}

/// The BRC-20 adapter plugged into the shared replay engine.
pub struct Brc20Indexer {
    config: Config,
    cache: Brc20MemoryCache,
    pg_pool: Pool,
    extra_tables: bool,
}

impl Brc20Indexer {
    pub fn new(config: &Config, pg_pool: Pool) -> Result<Self, String> {
        let brc20_config = config.assert_brc20_config()?;
        Ok(Brc20Indexer {
            config: config.clone(),
            cache: Brc20MemoryCache::new(brc20_config.lru_cache_size),
            pg_pool,
            extra_tables: brc20_config.extra_tables,
        })
    }
}

impl ProtocolIndexer for Brc20Indexer {
    fn protocol(&self) -> Protocol {
        Protocol::Brc20
    }

    async fn index_block(
        &mut self,
        block_height: u32,
        upstream: &UpstreamSource,
        db_tx: &Transaction<'_>,
        ctx: &Context,
    ) -> Result<String, String> {
        index_block(
            block_height,
            upstream,
            &mut self.cache,
            &self.config,
            db_tx,
            ctx,
        )
        .await
    }

    async fn roll_back(
        &mut self,
        ancestor_height: i32,
        db_tx: &Transaction<'_>,
        _ctx: &Context,
    ) -> Result<(), String> {
        brc20_pg::roll_back(ancestor_height, db_tx).await
    }

    async fn residue_block_height(&self, client: &Object) -> Result<Option<u32>, String> {
        let height = brc20_pg::get_max_protocol_block_height(client).await?;
        Ok(height.map(|h| h as u32))
    }

    async fn warm_up(&mut self, client: &mut Object, ctx: &Context) -> Result<(), String> {
        self.cache.warm_up(&*client).await?;
        try_info!(ctx, "BRC-20 caches warmed up");
        if self.extra_tables {
            extras::check_residue(&self.config, &*client, ctx).await?;
            extras::check_extra_tables(&self.config, client, ctx).await?;
        }
        Ok(())
    }

    async fn after_block_commit(&mut self, _block_height: u32, ctx: &Context) -> Result<(), String> {
        if !self.extra_tables {
            return Ok(());
        }
        let mut client = pg_pool_client(&self.pg_pool).await?;
        extras::check_extra_tables(&self.config, &mut client, ctx).await
    }
}

/// Wipes and recomputes the whole digest chain from the persisted event log. Maintenance operation for operators
/// recovering a corrupted `brc20_cumulative_event_hashes` table.
pub async fn reindex_cumulative_hashes(
    pg_pool: &Pool,
    ctx: &Context,
) -> Result<(), String> {
    let mut client = pg_pool_client(pg_pool).await?;
    let db_tx = pg_begin(&mut client).await?;
    db_tx
        .execute("DELETE FROM brc20_cumulative_event_hashes", &[])
        .await
        .map_err(|e| format!("reindex_cumulative_hashes: {e}"))?;
    let Some((min_height, max_height)) = brc20_pg::get_block_height_bounds(&db_tx).await? else {
        try_info!(ctx, "No indexed blocks, nothing to reindex");
        return Ok(());
    };
    let decimals_by_tick: std::collections::HashMap<String, u8> = brc20_pg::get_tickers(&db_tx)
        .await?
        .into_iter()
        .map(|t| (t.tick.clone(), t.decimals))
        .collect();
    try_info!(ctx, "Reindexing cumulative hashes from #{min_height} to #{max_height}");
    for block_height in min_height..=max_height {
        let mut events: Vec<String> = vec![];
        for (event, event_type, inscription_id) in
            brc20_pg::get_block_events(block_height, &db_tx).await?.into_iter()
        {
            let event_str = if event_type == Brc20EventType::DeployInscribe.id() {
                let deploy: Brc20DeployEvent = serde_json::from_value(event)
                    .map_err(|e| format!("reindex deploy event: {e}"))?;
                deploy.to_event_string(&inscription_id)?
            } else {
                let tick = event
                    .get("tick")
                    .and_then(|t| t.as_str())
                    .ok_or("reindex: event without tick")?;
                let decimals = *decimals_by_tick
                    .get(tick)
                    .ok_or(format!("reindex: unknown ticker {tick}"))?;
                if event_type == Brc20EventType::MintInscribe.id() {
                    let mint: Brc20MintEvent = serde_json::from_value(event)
                        .map_err(|e| format!("reindex mint event: {e}"))?;
                    mint.to_event_string(&inscription_id, decimals)?
                } else if event_type == Brc20EventType::TransferInscribe.id() {
                    let inscribe: Brc20TransferInscribeEvent = serde_json::from_value(event)
                        .map_err(|e| format!("reindex transfer inscribe event: {e}"))?;
                    inscribe.to_event_string(&inscription_id, decimals)?
                } else {
                    let transfer: Brc20TransferTransferEvent = serde_json::from_value(event)
                        .map_err(|e| format!("reindex transfer transfer event: {e}"))?;
                    transfer.to_event_string(&inscription_id, decimals)?
                }
            };
            events.push(event_str);
        }
        chain::update_event_hashes(
            &Protocol::Brc20,
            block_height,
            &events.join(EVENT_SEPARATOR),
            &db_tx,
        )
        .await?;
    }
    db_tx
        .commit()
        .await
        .map_err(|e| format!("reindex_cumulative_hashes commit: {e}"))?;
    try_info!(ctx, "Cumulative hashes reindexed");
    Ok(())
}
