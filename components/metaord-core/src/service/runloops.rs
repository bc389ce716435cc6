use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use config::Config;
use indexer_postgres::pg_pool;

use crate::core::upstream::rpc::OrdRpcClient;
use crate::core::upstream::UpstreamSource;
use crate::meta_protocols::bitmap::BitmapIndexer;
use crate::meta_protocols::brc20::index::Brc20Indexer;
use crate::meta_protocols::sns::SnsIndexer;
use crate::utils::Context;

use super::Service;

fn upstream_db_source(config: &Config) -> Result<UpstreamSource, String> {
    let db = config.assert_upstream_db_config()?;
    Ok(UpstreamSource::Postgres(pg_pool(db)?))
}

pub fn build_brc20_service(
    config: &Config,
    shutdown: Arc<AtomicBool>,
    ctx: &Context,
) -> Result<Service<Brc20Indexer>, String> {
    let brc20_config = config.assert_brc20_config()?;
    let pool = pg_pool(&brc20_config.db)?;
    let indexer = Brc20Indexer::new(config, pool.clone())?;
    Ok(Service::new(
        config,
        indexer,
        pool,
        upstream_db_source(config)?,
        shutdown,
        ctx,
    ))
}

/// The bitmap indexer prefers the metaprotocol db but can run entirely against the ord JSON-RPC endpoint when only
/// `upstream.ord_rpc_url` is configured.
pub fn build_bitmap_service(
    config: &Config,
    shutdown: Arc<AtomicBool>,
    ctx: &Context,
) -> Result<Service<BitmapIndexer>, String> {
    let bitmap_config = config.assert_bitmap_config()?;
    let pool = pg_pool(&bitmap_config.db)?;
    let upstream = if config.upstream.db.is_some() {
        upstream_db_source(config)?
    } else {
        let url = config
            .upstream
            .ord_rpc_url
            .as_ref()
            .ok_or("Config has neither an upstream db nor an ord_rpc_url".to_string())?;
        UpstreamSource::Rpc(OrdRpcClient::new(url))
    };
    Ok(Service::new(
        config,
        BitmapIndexer,
        pool,
        upstream,
        shutdown,
        ctx,
    ))
}

pub fn build_sns_service(
    config: &Config,
    shutdown: Arc<AtomicBool>,
    ctx: &Context,
) -> Result<Service<SnsIndexer>, String> {
    let sns_config = config.assert_sns_config()?;
    let pool = pg_pool(&sns_config.db)?;
    Ok(Service::new(
        config,
        SnsIndexer,
        pool,
        upstream_db_source(config)?,
        shutdown,
        ctx,
    ))
}
