//! Extra-tables projector: materialized current-balance and unused-transfer-inscription views derived from the
//! authoritative event and historic-balance log. The projector trails the main index and is reconciled against it by
//! comparing `brc20_extras_block_hashes` with `brc20_block_hashes`; on any drift it is re-derived from the log.

use config::Config;
use deadpool_postgres::{GenericClient, Object};
use indexer_postgres::pg_begin;
use indexer_postgres::types::PgNumericU128;
use indexer_postgres::utils::pg_reset_table_sequence;
use serde_json::Value;

use crate::core::first_inscription_height;
use crate::utils::Context;
use crate::{try_info, try_warn};

use super::models::{Brc20EventType, Brc20TransferInscribeEvent};

// refinery generates a `migrations` module at the macro call site, so the extras migrations live in their own module to
// keep them apart from the main brc20 set.
mod extras_migrations {
    use refinery::embed_migrations;
    embed_migrations!("../../migrations/brc20-extras");

    pub async fn migrate(pg_client: &mut tokio_postgres::Client) -> Result<(), String> {
        migrations::runner()
            .set_migration_table_name("pgmigrations_extras")
            .run_async(pg_client)
            .await
            .map_err(|e| format!("Error running extras pg migrations: {e}"))?;
        Ok(())
    }
}

pub use extras_migrations::migrate;

/// Inserts the unused transfer-inscribe row for an event payload.
async fn insert_unused_tx<T: GenericClient>(
    event: &Value,
    event_id: i64,
    block_height: i32,
    inscription_id: &str,
    client: &T,
) -> Result<(), String> {
    let inscribe: Brc20TransferInscribeEvent = serde_json::from_value(event.clone())
        .map_err(|e| format!("insert_unused_tx payload: {e}"))?;
    let amount: u128 = inscribe
        .amount
        .parse()
        .map_err(|e| format!("insert_unused_tx amount: {e}"))?;
    client
        .execute(
            "INSERT INTO brc20_unused_tx_inscrs
             (inscription_id, tick, amount, current_holder_pkscript, current_holder_wallet, event_id, block_height)
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (inscription_id) DO NOTHING",
            &[
                &inscription_id,
                &inscribe.tick,
                &PgNumericU128(amount),
                &inscribe.source_pkscript,
                &inscribe.source_wallet,
                &event_id,
                &block_height,
            ],
        )
        .await
        .map_err(|e| format!("insert_unused_tx: {e}"))?;
    Ok(())
}

/// Transfer-inscribe events without a matching transfer-transfer, bounded by height when given.
async fn select_unused_transfer_events<T: GenericClient>(
    up_to_height: Option<i32>,
    client: &T,
) -> Result<Vec<(Value, i64, i32, String)>, String> {
    let rows = match up_to_height {
        Some(height) => {
            client
                .query(
                    "WITH inscribes AS (
                        SELECT inscription_id, event, id, block_height FROM brc20_events
                        WHERE event_type = 2 AND block_height <= $1
                    ), transfers AS (
                        SELECT inscription_id FROM brc20_events
                        WHERE event_type = 3 AND block_height <= $1
                    )
                    SELECT i.event, i.id, i.block_height, i.inscription_id
                    FROM inscribes i
                    LEFT JOIN transfers t ON i.inscription_id = t.inscription_id
                    WHERE t.inscription_id IS NULL",
                    &[&height],
                )
                .await
        }
        None => {
            client
                .query(
                    "WITH inscribes AS (
                        SELECT inscription_id, event, id, block_height FROM brc20_events
                        WHERE event_type = 2
                    ), transfers AS (
                        SELECT inscription_id FROM brc20_events
                        WHERE event_type = 3
                    )
                    SELECT i.event, i.id, i.block_height, i.inscription_id
                    FROM inscribes i
                    LEFT JOIN transfers t ON i.inscription_id = t.inscription_id
                    WHERE t.inscription_id IS NULL",
                    &[],
                )
                .await
        }
    }
    .map_err(|e| format!("select_unused_transfer_events: {e}"))?;
    Ok(rows
        .iter()
        .map(|r| {
            (
                r.get("event"),
                r.get("id"),
                r.get("block_height"),
                r.get("inscription_id"),
            )
        })
        .collect())
}

async fn get_extras_tip<T: GenericClient>(client: &T) -> Result<Option<i32>, String> {
    let row = client
        .query_one(
            "SELECT MAX(block_height) AS block_height FROM brc20_extras_block_hashes",
            &[],
        )
        .await
        .map_err(|e| format!("get_extras_tip: {e}"))?;
    Ok(row.get("block_height"))
}

/// Residue check for the projector's own tables, run at startup before the main loop advances.
pub async fn check_residue(
    config: &Config,
    client: &Object,
    ctx: &Context,
) -> Result<(), String> {
    let next_block = match get_extras_tip(client).await? {
        Some(tip) => tip + 1,
        None => first_inscription_height(&config.network) as i32,
    };
    let row = client
        .query_one(
            "SELECT GREATEST(
                (SELECT MAX(block_height) FROM brc20_unused_tx_inscrs),
                (SELECT MAX(block_height) FROM brc20_current_balances)
             ) AS block_height",
            &[],
        )
        .await
        .map_err(|e| format!("extras residue: {e}"))?;
    let residue_height: Option<i32> = row.get("block_height");
    if residue_height.is_some_and(|h| h >= next_block) {
        try_warn!(
            ctx,
            "Found residue on the extra tables, rolling back to #{}",
            next_block - 1
        );
        roll_back_extras(next_block - 1, client, ctx).await?;
    }
    Ok(())
}

/// Re-derives the projector state at the ancestor from the historic log: touched balances are reset to their latest
/// surviving row and the unused-transfer view is rebuilt.
pub async fn roll_back_extras<T: GenericClient>(
    ancestor_height: i32,
    client: &T,
    ctx: &Context,
) -> Result<(), String> {
    let deleted = client
        .query(
            "DELETE FROM brc20_current_balances WHERE block_height > $1 RETURNING pkscript, tick",
            &[&ancestor_height],
        )
        .await
        .map_err(|e| format!("roll_back_extras balances: {e}"))?;
    for row in deleted.iter() {
        let pkscript: String = row.get("pkscript");
        let tick: String = row.get("tick");
        let last = client
            .query_opt(
                "SELECT overall_balance, available_balance, wallet, block_height
                 FROM brc20_historic_balances
                 WHERE block_height <= $1 AND pkscript = $2 AND tick = $3
                 ORDER BY id DESC LIMIT 1",
                &[&ancestor_height, &pkscript, &tick],
            )
            .await
            .map_err(|e| format!("roll_back_extras last balance: {e}"))?;
        if let Some(last) = last {
            let overall: PgNumericU128 = last.get("overall_balance");
            let available: PgNumericU128 = last.get("available_balance");
            let wallet: Option<String> = last.get("wallet");
            let block_height: i32 = last.get("block_height");
            client
                .execute(
                    "INSERT INTO brc20_current_balances
                     (pkscript, wallet, tick, overall_balance, available_balance, block_height)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    &[&pkscript, &wallet, &tick, &overall, &available, &block_height],
                )
                .await
                .map_err(|e| format!("roll_back_extras reinsert balance: {e}"))?;
        }
    }

    client
        .execute("TRUNCATE TABLE brc20_unused_tx_inscrs RESTART IDENTITY", &[])
        .await
        .map_err(|e| format!("roll_back_extras unused: {e}"))?;
    for (event, event_id, block_height, inscription_id) in
        select_unused_transfer_events(Some(ancestor_height), client).await?
    {
        insert_unused_tx(&event, event_id, block_height, &inscription_id, client).await?;
    }

    client
        .execute(
            "DELETE FROM brc20_extras_block_hashes WHERE block_height > $1",
            &[&ancestor_height],
        )
        .await
        .map_err(|e| format!("roll_back_extras anchors: {e}"))?;
    pg_reset_table_sequence("brc20_extras_block_hashes", client).await?;
    try_info!(ctx, "Extra tables rolled back to #{ancestor_height}");
    Ok(())
}

/// Full rebuild of both views and the projector anchors from the historic log.
async fn initial_index_of_extra_tables<T: GenericClient>(
    client: &T,
    ctx: &Context,
) -> Result<(), String> {
    try_info!(ctx, "Initial indexing of extra tables, this may take a few minutes");
    client
        .execute("TRUNCATE TABLE brc20_unused_tx_inscrs RESTART IDENTITY", &[])
        .await
        .map_err(|e| format!("initial extras unused: {e}"))?;
    for (event, event_id, block_height, inscription_id) in
        select_unused_transfer_events(None, client).await?
    {
        insert_unused_tx(&event, event_id, block_height, &inscription_id, client).await?;
    }

    client
        .execute("TRUNCATE TABLE brc20_current_balances RESTART IDENTITY", &[])
        .await
        .map_err(|e| format!("initial extras balances: {e}"))?;
    client
        .execute(
            "INSERT INTO brc20_current_balances
             (pkscript, wallet, tick, overall_balance, available_balance, block_height)
             SELECT bhb.pkscript, bhb.wallet, bhb.tick, bhb.overall_balance, bhb.available_balance, bhb.block_height
             FROM (SELECT MAX(id) AS id FROM brc20_historic_balances GROUP BY pkscript, tick) latest
             LEFT JOIN brc20_historic_balances bhb ON bhb.id = latest.id",
            &[],
        )
        .await
        .map_err(|e| format!("initial extras balance fill: {e}"))?;

    client
        .execute("TRUNCATE TABLE brc20_extras_block_hashes RESTART IDENTITY", &[])
        .await
        .map_err(|e| format!("initial extras anchors: {e}"))?;
    client
        .execute(
            "INSERT INTO brc20_extras_block_hashes (block_height, block_hash)
             SELECT block_height, block_hash FROM brc20_block_hashes ORDER BY block_height ASC",
            &[],
        )
        .await
        .map_err(|e| format!("initial extras anchor fill: {e}"))?;
    Ok(())
}

/// Projects one committed block onto the extra tables and records its anchor.
async fn index_extras_block<T: GenericClient>(
    block_height: i32,
    block_hash: &str,
    client: &T,
    ctx: &Context,
) -> Result<(), String> {
    if get_extras_tip(client).await?.is_some_and(|tip| tip >= block_height) {
        try_warn!(ctx, "Reorg detected on extra tables, rolling back to #{block_height}");
        roll_back_extras(block_height - 1, client, ctx).await?;
    }

    let balance_changes = client
        .query(
            "SELECT pkscript, wallet, tick, overall_balance, available_balance
             FROM brc20_historic_balances WHERE block_height = $1 ORDER BY id ASC",
            &[&block_height],
        )
        .await
        .map_err(|e| format!("index_extras_block balances: {e}"))?;
    // Later rows win per key: rows are in apply order, so the upsert leaves the final balance of the block.
    for row in balance_changes.iter() {
        let pkscript: String = row.get("pkscript");
        let wallet: Option<String> = row.get("wallet");
        let tick: String = row.get("tick");
        let overall: PgNumericU128 = row.get("overall_balance");
        let available: PgNumericU128 = row.get("available_balance");
        client
            .execute(
                "INSERT INTO brc20_current_balances
                 (pkscript, wallet, tick, overall_balance, available_balance, block_height)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (pkscript, tick)
                 DO UPDATE SET overall_balance = EXCLUDED.overall_balance,
                               available_balance = EXCLUDED.available_balance,
                               block_height = EXCLUDED.block_height",
                &[&pkscript, &wallet, &tick, &overall, &available, &block_height],
            )
            .await
            .map_err(|e| format!("index_extras_block upsert: {e}"))?;
    }

    let events = client
        .query(
            "SELECT event, id, event_type, inscription_id FROM brc20_events
             WHERE block_height = $1 AND (event_type = $2 OR event_type = $3)
             ORDER BY id ASC",
            &[
                &block_height,
                &Brc20EventType::TransferInscribe.id(),
                &Brc20EventType::TransferTransfer.id(),
            ],
        )
        .await
        .map_err(|e| format!("index_extras_block events: {e}"))?;
    for row in events.iter() {
        let event: Value = row.get("event");
        let event_id: i64 = row.get("id");
        let event_type: i16 = row.get("event_type");
        let inscription_id: String = row.get("inscription_id");
        if event_type == Brc20EventType::TransferInscribe.id() {
            insert_unused_tx(&event, event_id, block_height, &inscription_id, client).await?;
        } else {
            client
                .execute(
                    "DELETE FROM brc20_unused_tx_inscrs WHERE inscription_id = $1",
                    &[&inscription_id],
                )
                .await
                .map_err(|e| format!("index_extras_block delete unused: {e}"))?;
        }
    }

    client
        .execute(
            "INSERT INTO brc20_extras_block_hashes (block_height, block_hash) VALUES ($1, $2)",
            &[&block_height, &block_hash],
        )
        .await
        .map_err(|e| format!("index_extras_block anchor: {e}"))?;
    Ok(())
}

/// Advances the projector to the main index tip. Drift between the projector anchors and the main anchors picks the
/// lowest mismatching height as the restart point; an empty projector triggers the initial rebuild.
pub async fn check_extra_tables(
    config: &Config,
    client: &mut Object,
    ctx: &Context,
) -> Result<(), String> {
    let first_height = first_inscription_height(&config.network) as i32;
    let row = client
        .query_one(
            "SELECT MIN(ebh.block_height) AS block_height
             FROM brc20_extras_block_hashes ebh
             LEFT JOIN brc20_block_hashes bh ON bh.block_height = ebh.block_height
             WHERE bh.block_hash != ebh.block_hash",
            &[],
        )
        .await
        .map_err(|e| format!("check_extra_tables drift: {e}"))?;
    let mut to_check: Option<i32> = row.get("block_height");
    if let Some(height) = to_check {
        try_warn!(ctx, "Extras anchor mismatch found at block #{height}");
    }
    if to_check.is_none() {
        to_check = get_extras_tip(client).await?.map(|tip| tip + 1);
    }
    let mut to_check = to_check.unwrap_or(first_height);

    let row = client
        .query_one("SELECT MAX(block_height) AS block_height FROM brc20_block_hashes", &[])
        .await
        .map_err(|e| format!("check_extra_tables tip: {e}"))?;
    let main_tip: Option<i32> = row.get("block_height");
    let main_tip = main_tip.unwrap_or(first_height);
    if to_check > main_tip {
        return Ok(());
    }

    while to_check <= main_tip {
        let db_tx = pg_begin(client).await?;
        if to_check == first_height {
            initial_index_of_extra_tables(&db_tx, ctx).await?;
            db_tx
                .commit()
                .await
                .map_err(|e| format!("check_extra_tables commit: {e}"))?;
            return Ok(());
        }
        let Some(block_hash) = db_tx
            .query_opt(
                "SELECT block_hash FROM brc20_block_hashes WHERE block_height = $1",
                &[&to_check],
            )
            .await
            .map_err(|e| format!("check_extra_tables block hash: {e}"))?
            .map(|r| r.get::<_, String>("block_hash"))
        else {
            return Err(format!("main anchor missing at #{to_check}"));
        };
        index_extras_block(to_check, &block_hash, &db_tx, ctx).await?;
        db_tx
            .commit()
            .await
            .map_err(|e| format!("check_extra_tables commit: {e}"))?;
        try_info!(ctx, "Extra tables indexed for block #{to_check}");
        to_check += 1;
    }
    Ok(())
}
