pub mod runloops;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use config::Config;
use deadpool_postgres::{Object, Pool, Transaction};
use indexer_postgres::{pg_begin, pg_pool_client};

use crate::core::reporter::{should_report, Reporter};
use crate::core::upstream::UpstreamSource;
use crate::core::{chain, first_inscription_height, Protocol, REORG_WINDOW};
use crate::db::check_db_version;
use crate::utils::Context;
use crate::{try_error, try_info, try_warn};

const NEW_BLOCK_POLL_SECS: u64 = 5;
const TRANSIENT_ERROR_SLEEP_SECS: u64 = 10;

/// Protocol-specific half of the replay engine. The service owns the loop, the digest chain, the anchors and the
/// reporter; the indexer applies a block's events and reverses its own tables on rollback.
#[allow(async_fn_in_trait)]
pub trait ProtocolIndexer {
    fn protocol(&self) -> Protocol;

    /// Applies one block's events inside the given transaction and returns the canonicalized block event string.
    async fn index_block(
        &mut self,
        block_height: u32,
        upstream: &UpstreamSource,
        db_tx: &Transaction<'_>,
        ctx: &Context,
    ) -> Result<String, String>;

    /// Deletes every protocol row above the ancestor and restores derived columns. An ancestor of `-1` drops
    /// everything.
    async fn roll_back(
        &mut self,
        ancestor_height: i32,
        db_tx: &Transaction<'_>,
        ctx: &Context,
    ) -> Result<(), String>;

    /// Highest block with protocol rows, for residue detection.
    async fn residue_block_height(&self, client: &Object) -> Result<Option<u32>, String>;

    /// Invalidates in-memory caches and reloads them from the store. Called on startup and after every rollback.
    async fn warm_up(&mut self, _client: &mut Object, _ctx: &Context) -> Result<(), String> {
        Ok(())
    }

    /// Runs after a block's transaction committed; the BRC-20 extras projector hooks in here.
    async fn after_block_commit(&mut self, _block_height: u32, _ctx: &Context) -> Result<(), String> {
        Ok(())
    }
}

/// Failures the main loop distinguishes: transient errors roll back, sleep and retry; fatal inconsistencies terminate
/// the process with an operator hint.
#[derive(Debug)]
pub enum ServiceError {
    Transient(String),
    Fatal(String),
}

impl From<String> for ServiceError {
    fn from(message: String) -> Self {
        ServiceError::Transient(message)
    }
}

/// The replay engine: a single-threaded loop that detects residue, guards against reorgs, applies one block atomically,
/// extends the digest chain and reports it.
pub struct Service<P: ProtocolIndexer> {
    pub config: Config,
    pub indexer: P,
    pg_pool: Pool,
    upstream: UpstreamSource,
    reporter: Reporter,
    shutdown: Arc<AtomicBool>,
    ctx: Context,
}

impl<P: ProtocolIndexer> Service<P> {
    pub fn new(
        config: &Config,
        indexer: P,
        pg_pool: Pool,
        upstream: UpstreamSource,
        shutdown: Arc<AtomicBool>,
        ctx: &Context,
    ) -> Self {
        Service {
            config: config.clone(),
            indexer,
            pg_pool,
            upstream,
            reporter: Reporter::new(config),
            shutdown,
            ctx: ctx.clone(),
        }
    }

    pub async fn get_index_chain_tip(&self) -> Result<Option<u32>, String> {
        let client = pg_pool_client(&self.pg_pool).await?;
        chain::get_last_block_height(&self.indexer.protocol(), &client).await
    }

    pub async fn run(&mut self) -> Result<(), String> {
        let protocol = self.indexer.protocol();
        {
            let mut client = pg_pool_client(&self.pg_pool).await?;
            check_db_version(&protocol, &client).await?;
            self.upstream
                .verify_contract(&self.config.network, protocol.min_transfer_count(), &self.ctx)
                .await?;
            self.indexer.warm_up(&mut client, &self.ctx).await?;
        }
        try_info!(
            self.ctx,
            "Service: {} indexer streaming blocks",
            protocol.name()
        );
        let mut last_report_height: u32 = 0;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                try_info!(self.ctx, "Service: terminating runloop");
                return Ok(());
            }
            match self.run_iteration(&mut last_report_height).await {
                Ok(()) => {}
                Err(ServiceError::Fatal(e)) => {
                    try_error!(self.ctx, "Fatal indexer error: {e}");
                    return Err(e);
                }
                Err(ServiceError::Transient(e)) => {
                    try_warn!(self.ctx, "Transient indexer error, will retry: {e}");
                    tokio::time::sleep(Duration::from_secs(TRANSIENT_ERROR_SLEEP_SECS)).await;
                }
            }
        }
    }

    /// One pass of the main loop: residue check, tip comparison, reorg guard, then at most one block applied and
    /// reported. Any in-flight transaction is dropped (and thereby rolled back) when this returns an error.
    async fn run_iteration(&mut self, last_report_height: &mut u32) -> Result<(), ServiceError> {
        let protocol = self.indexer.protocol();
        let mut client = pg_pool_client(&self.pg_pool).await?;

        self.check_residue(&client).await?;

        let Some(upstream_tip) = self.upstream.max_block_height().await? else {
            try_info!(self.ctx, "Upstream has no blocks yet, waiting");
            tokio::time::sleep(Duration::from_secs(NEW_BLOCK_POLL_SECS)).await;
            return Ok(());
        };
        let block_height = match chain::get_last_block_height(&protocol, &client).await? {
            Some(tip) => tip + 1,
            None => first_inscription_height(&self.config.network),
        };
        if block_height > upstream_tip {
            try_info!(self.ctx, "Waiting for new blocks");
            tokio::time::sleep(Duration::from_secs(NEW_BLOCK_POLL_SECS)).await;
            return Ok(());
        }

        if let Some(ancestor_height) = self.check_for_reorg(&client).await? {
            try_warn!(self.ctx, "Rolling back to common ancestor #{ancestor_height}");
            drop(client);
            self.roll_back(ancestor_height as i32).await?;
            return Ok(());
        }

        let block_hash = self
            .upstream
            .block_hash_at(block_height)
            .await?
            .ok_or(ServiceError::Transient(format!(
                "upstream block hash missing at #{block_height}"
            )))?;
        let db_tx = pg_begin(&mut client).await?;
        let block_events_str = self
            .indexer
            .index_block(block_height, &self.upstream, &db_tx, &self.ctx)
            .await?;
        chain::update_event_hashes(&protocol, block_height, &block_events_str, &db_tx).await?;
        chain::insert_block_hash(&protocol, block_height, &block_hash, &db_tx).await?;
        db_tx
            .commit()
            .await
            .map_err(|e| ServiceError::Transient(format!("unable to commit block: {e}")))?;
        try_info!(self.ctx, "Block #{block_height} indexed");

        if upstream_tip - block_height < 10 {
            self.indexer
                .after_block_commit(block_height, &self.ctx)
                .await?;
        }
        if should_report(upstream_tip, block_height, *last_report_height) {
            self.report_block(block_height, &client).await?;
            *last_report_height = block_height;
        }
        Ok(())
    }

    /// Rows above the last committed anchor are leftovers of a crashed run; roll them back before moving forward.
    async fn check_residue(&mut self, client: &Object) -> Result<(), ServiceError> {
        let protocol = self.indexer.protocol();
        let next_block = match chain::get_last_block_height(&protocol, client).await? {
            Some(tip) => tip + 1,
            None => first_inscription_height(&self.config.network),
        };
        let Some(residue_height) = self.indexer.residue_block_height(client).await? else {
            return Ok(());
        };
        if residue_height >= next_block {
            let ancestor_height = next_block as i32 - 1;
            try_warn!(
                self.ctx,
                "Found residue from a previous run at #{residue_height}, rolling back to #{ancestor_height}"
            );
            self.roll_back(ancestor_height).await?;
        }
        Ok(())
    }

    /// Compares the most recent anchors against the upstream. Returns the common ancestor height when a divergence is
    /// found; a divergence deeper than the anchor window is fatal.
    async fn check_for_reorg(&self, client: &Object) -> Result<Option<u32>, ServiceError> {
        let protocol = self.indexer.protocol();
        let anchors = chain::get_last_anchors(&protocol, REORG_WINDOW, client).await?;
        let Some((tip_height, tip_hash)) = anchors.first() else {
            return Ok(None);
        };
        let upstream_tip_hash = self.upstream.block_hash_at(*tip_height).await?;
        if upstream_tip_hash.as_deref() == Some(tip_hash.as_str()) {
            return Ok(None);
        }
        try_warn!(self.ctx, "Reorg detected at #{tip_height}");
        for (block_height, block_hash) in anchors.iter() {
            let upstream_hash = self.upstream.block_hash_at(*block_height).await?;
            if upstream_hash.as_deref() == Some(block_hash.as_str()) {
                return Ok(Some(*block_height));
            }
        }
        Err(ServiceError::Fatal(format!(
            "reorg deeper than the {REORG_WINDOW}-block anchor window, re-initialize the {} database",
            protocol.name()
        )))
    }

    /// Atomically deletes all rows above the ancestor, truncates the digest chain, then re-warms the in-memory caches.
    pub async fn roll_back(&mut self, ancestor_height: i32) -> Result<(), ServiceError> {
        let protocol = self.indexer.protocol();
        let mut client = pg_pool_client(&self.pg_pool).await?;
        let db_tx = pg_begin(&mut client).await?;
        self.indexer
            .roll_back(ancestor_height, &db_tx, &self.ctx)
            .await?;
        chain::roll_back_chain(&protocol, ancestor_height, &db_tx).await?;
        db_tx
            .commit()
            .await
            .map_err(|e| ServiceError::Transient(format!("unable to commit rollback: {e}")))?;
        self.indexer.warm_up(&mut client, &self.ctx).await?;
        try_info!(self.ctx, "Rolled back to #{ancestor_height}");
        Ok(())
    }

    async fn report_block(&self, block_height: u32, client: &Object) -> Result<(), ServiceError> {
        let protocol = self.indexer.protocol();
        let Some(digest) = chain::get_block_digest(&protocol, block_height, client).await? else {
            return Ok(());
        };
        let Some(block_hash) = chain::get_block_hash(&protocol, block_height, client).await? else {
            return Ok(());
        };
        self.reporter
            .report_block(
                &protocol,
                block_height,
                &block_hash,
                &digest.block_event_hash,
                &digest.cumulative_event_hash,
                &self.ctx,
            )
            .await;
        Ok(())
    }
}
