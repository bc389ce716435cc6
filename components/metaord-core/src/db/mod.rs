use config::Config;
use deadpool_postgres::GenericClient;
use indexer_postgres::pg_connect_with_retry;

use crate::core::Protocol;
use crate::meta_protocols::bitmap::bitmap_pg;
use crate::meta_protocols::brc20::{brc20_pg, extras};
use crate::meta_protocols::sns::sns_pg;
use crate::utils::Context;
use crate::{try_info, try_warn};

/// Runs the migrations of every enabled protocol database.
pub async fn migrate_dbs(config: &Config, ctx: &Context) -> Result<(), String> {
    if let Some(brc20) = &config.brc20 {
        if brc20.enabled {
            try_info!(ctx, "Running brc20 DB migrations");
            let mut pg_client = pg_connect_with_retry(&brc20.db).await;
            brc20_pg::migrate(&mut pg_client).await?;
            if brc20.extra_tables {
                try_info!(ctx, "Running brc20 extra tables DB migrations");
                extras::migrate(&mut pg_client).await?;
            }
        }
    }
    if let Some(bitmap) = &config.bitmap {
        if bitmap.enabled {
            try_info!(ctx, "Running bitmap DB migrations");
            let mut pg_client = pg_connect_with_retry(&bitmap.db).await;
            bitmap_pg::migrate(&mut pg_client).await?;
        }
    }
    if let Some(sns) = &config.sns {
        if sns.enabled {
            try_info!(ctx, "Running sns DB migrations");
            let mut pg_client = pg_connect_with_retry(&sns.db).await;
            sns_pg::migrate(&mut pg_client).await?;
        }
    }
    Ok(())
}

/// Drops every table of every enabled protocol database. The operator's answer to a fatal inconsistency.
pub async fn reset_dbs(config: &Config, ctx: &Context) -> Result<(), String> {
    if let Some(brc20) = &config.brc20 {
        if brc20.enabled {
            try_warn!(ctx, "Resetting brc20 DB");
            let mut pg_client = pg_connect_with_retry(&brc20.db).await;
            pg_reset_db(&mut pg_client).await?;
        }
    }
    if let Some(bitmap) = &config.bitmap {
        if bitmap.enabled {
            try_warn!(ctx, "Resetting bitmap DB");
            let mut pg_client = pg_connect_with_retry(&bitmap.db).await;
            pg_reset_db(&mut pg_client).await?;
        }
    }
    if let Some(sns) = &config.sns {
        if sns.enabled {
            try_warn!(ctx, "Resetting sns DB");
            let mut pg_client = pg_connect_with_retry(&sns.db).await;
            pg_reset_db(&mut pg_client).await?;
        }
    }
    Ok(())
}

pub async fn pg_reset_db(pg_client: &mut tokio_postgres::Client) -> Result<(), String> {
    pg_client
        .batch_execute(
            "
            DO $$ DECLARE
                r RECORD;
            BEGIN
                FOR r IN (SELECT tablename FROM pg_tables WHERE schemaname = current_schema()) LOOP
                    EXECUTE 'DROP TABLE IF EXISTS ' || quote_ident(r.tablename) || ' CASCADE';
                END LOOP;
            END $$;",
        )
        .await
        .map_err(|e| format!("unable to reset db: {e}"))?;
    Ok(())
}

/// The stored db version must match the compiled one, or be listed as recoverable. Everything else is fatal and asks the
/// operator to re-initialize.
pub async fn check_db_version<T: GenericClient>(
    protocol: &Protocol,
    client: &T,
) -> Result<(), String> {
    let row = client
        .query_opt(
            &format!("SELECT db_version FROM {} LIMIT 1", protocol.version_table()),
            &[],
        )
        .await
        .map_err(|e| format!("check_db_version: {e}"))?;
    let Some(row) = row else {
        return Err(format!(
            "indexer version not found, run `metaprotocol-indexer {} db migrate` first",
            protocol.name()
        ));
    };
    let db_version: i32 = row.get("db_version");
    if db_version == protocol.db_version() {
        return Ok(());
    }
    if protocol.recoverable_db_versions().contains(&db_version) {
        return Err(format!(
            "db version {db_version} is older than {}, run `metaprotocol-indexer {} db migrate` to upgrade",
            protocol.db_version(),
            protocol.name()
        ));
    }
    Err(format!(
        "db version {db_version} cannot be upgraded to {}, re-initialize with `metaprotocol-indexer {} db reset`",
        protocol.db_version(),
        protocol.name()
    ))
}
