use std::collections::BTreeMap;

use deadpool_postgres::GenericClient;
use indexer_postgres::types::PgNumericU128;
use indexer_postgres::utils::pg_reset_table_sequence;
use indexer_postgres::{FromPgRow, BATCH_QUERY_CHUNK_SIZE};
use refinery::embed_migrations;
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use crate::core::Protocol;

use super::cache::Balance;
use super::models::{Brc20EventType, DbEvent, DbHistoricBalance, DbTicker, Ticker};

embed_migrations!("../../migrations/brc20");

pub async fn migrate(pg_client: &mut Client) -> Result<(), String> {
    migrations::runner()
        .set_migration_table_name("pgmigrations")
        .run_async(pg_client)
        .await
        .map_err(|e| format!("Error running pg migrations: {e}"))?;
    let protocol = Protocol::Brc20;
    pg_client
        .execute(
            "INSERT INTO brc20_indexer_version (indexer_version, db_version)
             SELECT $1, $2 WHERE NOT EXISTS (SELECT 1 FROM brc20_indexer_version)",
            &[&protocol.indexer_version(), &protocol.db_version()],
        )
        .await
        .map_err(|e| format!("Error inserting indexer version: {e}"))?;
    Ok(())
}

pub async fn get_tickers<T: GenericClient>(client: &T) -> Result<Vec<Ticker>, String> {
    let rows = client
        .query(
            "SELECT tick, remaining_supply, limit_per_mint, decimals, is_self_mint, deploy_inscription_id
             FROM brc20_tickers",
            &[],
        )
        .await
        .map_err(|e| format!("get_tickers: {e}"))?;
    Ok(rows.iter().map(Ticker::from_pg_row).collect())
}

pub async fn get_max_event_id<T: GenericClient>(client: &T) -> Result<Option<i64>, String> {
    let row = client
        .query_one("SELECT MAX(id) AS id FROM brc20_events", &[])
        .await
        .map_err(|e| format!("get_max_event_id: {e}"))?;
    Ok(row.get("id"))
}

/// Latest historic balance for a (pkscript, tick) pair, used to re-warm the balance cache after an eviction or rollback.
pub async fn get_last_balance<T: GenericClient>(
    pkscript: &str,
    tick: &str,
    client: &T,
) -> Result<Option<Balance>, String> {
    let row = client
        .query_opt(
            "SELECT overall_balance, available_balance FROM brc20_historic_balances
             WHERE pkscript = $1 AND tick = $2
             ORDER BY block_height DESC, id DESC LIMIT 1",
            &[&pkscript, &tick],
        )
        .await
        .map_err(|e| format!("get_last_balance: {e}"))?;
    Ok(row.map(|r| {
        let overall: PgNumericU128 = r.get("overall_balance");
        let available: PgNumericU128 = r.get("available_balance");
        Balance {
            overall: overall.0,
            available: available.0,
        }
    }))
}

/// Counts the transfer-inscribe and transfer-transfer events recorded for an inscription.
pub async fn get_transfer_event_counts<T: GenericClient>(
    inscription_id: &str,
    client: &T,
) -> Result<(i64, i64), String> {
    let row = client
        .query_one(
            "SELECT COALESCE(SUM(CASE WHEN event_type = $1 THEN 1 ELSE 0 END), 0) AS inscribe_cnt,
                    COALESCE(SUM(CASE WHEN event_type = $2 THEN 1 ELSE 0 END), 0) AS transfer_cnt
             FROM brc20_events WHERE inscription_id = $3",
            &[
                &Brc20EventType::TransferInscribe.id(),
                &Brc20EventType::TransferTransfer.id(),
                &inscription_id,
            ],
        )
        .await
        .map_err(|e| format!("get_transfer_event_counts: {e}"))?;
    Ok((row.get("inscribe_cnt"), row.get("transfer_cnt")))
}

pub async fn get_transfer_inscribe_event<T: GenericClient>(
    inscription_id: &str,
    client: &T,
) -> Result<super::models::Brc20TransferInscribeEvent, String> {
    let row = client
        .query_opt(
            "SELECT event FROM brc20_events WHERE event_type = $1 AND inscription_id = $2",
            &[&Brc20EventType::TransferInscribe.id(), &inscription_id],
        )
        .await
        .map_err(|e| format!("get_transfer_inscribe_event: {e}"))?
        .ok_or(format!(
            "transfer inscribe event missing for {inscription_id}"
        ))?;
    let event: Value = row.get("event");
    serde_json::from_value(event).map_err(|e| format!("get_transfer_inscribe_event: {e}"))
}

fn chunk_insert_values_param_str(rows: usize, columns: usize) -> String {
    let mut arg_num = 1;
    let mut arg_str = String::new();
    for _ in 0..rows {
        arg_str.push('(');
        for i in 0..columns {
            arg_str.push_str(format!("${},", arg_num + i).as_str());
        }
        arg_str.pop();
        arg_str.push_str("),");
        arg_num += columns;
    }
    arg_str.pop();
    arg_str
}

pub async fn insert_events<T: GenericClient>(
    events: &Vec<DbEvent>,
    client: &T,
) -> Result<(), String> {
    for chunk in events.chunks(BATCH_QUERY_CHUNK_SIZE) {
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![];
        for row in chunk.iter() {
            params.push(&row.id);
            params.push(&row.event_type);
            params.push(&row.block_height);
            params.push(&row.inscription_id);
            params.push(&row.event);
        }
        client
            .query(
                &format!(
                    "INSERT INTO brc20_events (id, event_type, block_height, inscription_id, event) VALUES {}",
                    chunk_insert_values_param_str(chunk.len(), 5)
                ),
                &params,
            )
            .await
            .map_err(|e| format!("insert_events: {e}"))?;
    }
    Ok(())
}

pub async fn insert_tickers<T: GenericClient>(
    tickers: &Vec<DbTicker>,
    client: &T,
) -> Result<(), String> {
    for chunk in tickers.chunks(BATCH_QUERY_CHUNK_SIZE) {
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![];
        for row in chunk.iter() {
            params.push(&row.tick);
            params.push(&row.original_tick);
            params.push(&row.max_supply);
            params.push(&row.decimals);
            params.push(&row.limit_per_mint);
            params.push(&row.remaining_supply);
            params.push(&row.is_self_mint);
            params.push(&row.deploy_inscription_id);
            params.push(&row.block_height);
        }
        client
            .query(
                &format!(
                    "INSERT INTO brc20_tickers
                     (tick, original_tick, max_supply, decimals, limit_per_mint, remaining_supply, is_self_mint,
                      deploy_inscription_id, block_height)
                     VALUES {}",
                    chunk_insert_values_param_str(chunk.len(), 9)
                ),
                &params,
            )
            .await
            .map_err(|e| format!("insert_tickers: {e}"))?;
    }
    Ok(())
}

pub async fn insert_historic_balances<T: GenericClient>(
    balances: &Vec<DbHistoricBalance>,
    client: &T,
) -> Result<(), String> {
    for chunk in balances.chunks(BATCH_QUERY_CHUNK_SIZE) {
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![];
        for row in chunk.iter() {
            params.push(&row.pkscript);
            params.push(&row.wallet);
            params.push(&row.tick);
            params.push(&row.overall_balance);
            params.push(&row.available_balance);
            params.push(&row.block_height);
            params.push(&row.event_id);
        }
        client
            .query(
                &format!(
                    "INSERT INTO brc20_historic_balances
                     (pkscript, wallet, tick, overall_balance, available_balance, block_height, event_id)
                     VALUES {}",
                    chunk_insert_values_param_str(chunk.len(), 7)
                ),
                &params,
            )
            .await
            .map_err(|e| format!("insert_historic_balances: {e}"))?;
    }
    Ok(())
}

pub async fn decrease_remaining_supply<T: GenericClient>(
    tick: &str,
    amount: PgNumericU128,
    client: &T,
) -> Result<(), String> {
    client
        .execute(
            "UPDATE brc20_tickers SET remaining_supply = remaining_supply - $1 WHERE tick = $2",
            &[&amount, &tick],
        )
        .await
        .map_err(|e| format!("decrease_remaining_supply: {e}"))?;
    Ok(())
}

pub async fn increase_burned_supply<T: GenericClient>(
    tick: &str,
    amount: PgNumericU128,
    client: &T,
) -> Result<(), String> {
    client
        .execute(
            "UPDATE brc20_tickers SET burned_supply = burned_supply + $1 WHERE tick = $2",
            &[&amount, &tick],
        )
        .await
        .map_err(|e| format!("increase_burned_supply: {e}"))?;
    Ok(())
}

/// Highest block with protocol rows, across every table a block commit writes to. Used by residue detection.
pub async fn get_max_protocol_block_height<T: GenericClient>(
    client: &T,
) -> Result<Option<i32>, String> {
    let row = client
        .query_one(
            "SELECT GREATEST(
                (SELECT MAX(block_height) FROM brc20_events),
                (SELECT MAX(block_height) FROM brc20_historic_balances),
                (SELECT MAX(block_height) FROM brc20_tickers),
                (SELECT MAX(block_height) FROM brc20_cumulative_event_hashes)
             ) AS block_height",
            &[],
        )
        .await
        .map_err(|e| format!("get_max_protocol_block_height: {e}"))?;
    Ok(row.get("block_height"))
}

/// Reverses every protocol table past the common ancestor. Minted amounts are re-credited to their tickers from the
/// removed mint events before those events are deleted.
pub async fn roll_back<T: GenericClient>(
    ancestor_height: i32,
    client: &T,
) -> Result<(), String> {
    client
        .execute("DELETE FROM brc20_tickers WHERE block_height > $1", &[&ancestor_height])
        .await
        .map_err(|e| format!("roll_back tickers: {e}"))?;

    let rows = client
        .query(
            "SELECT event FROM brc20_events WHERE event_type = $1 AND block_height > $2",
            &[&Brc20EventType::MintInscribe.id(), &ancestor_height],
        )
        .await
        .map_err(|e| format!("roll_back mint events: {e}"))?;
    let mut tick_credits: BTreeMap<String, u128> = BTreeMap::new();
    for row in rows.iter() {
        let event: Value = row.get("event");
        let mint: super::models::Brc20MintEvent =
            serde_json::from_value(event).map_err(|e| format!("roll_back mint event: {e}"))?;
        let amount: u128 = mint
            .amount
            .parse()
            .map_err(|e| format!("roll_back mint amount: {e}"))?;
        *tick_credits.entry(mint.tick).or_default() += amount;
    }
    for (tick, amount) in tick_credits.into_iter() {
        client
            .execute(
                "UPDATE brc20_tickers SET remaining_supply = remaining_supply + $1 WHERE tick = $2",
                &[&PgNumericU128(amount), &tick],
            )
            .await
            .map_err(|e| format!("roll_back remaining_supply: {e}"))?;
    }

    for table in ["brc20_historic_balances", "brc20_events"] {
        client
            .execute(
                &format!("DELETE FROM {table} WHERE block_height > $1"),
                &[&ancestor_height],
            )
            .await
            .map_err(|e| format!("roll_back {table}: {e}"))?;
    }
    for table in ["brc20_tickers", "brc20_historic_balances", "brc20_events"] {
        pg_reset_table_sequence(table, client).await?;
    }
    Ok(())
}

/// Events of a block in apply order, for digest chain reindexing.
pub async fn get_block_events<T: GenericClient>(
    block_height: u32,
    client: &T,
) -> Result<Vec<(Value, i16, String)>, String> {
    let rows = client
        .query(
            "SELECT event, event_type, inscription_id FROM brc20_events
             WHERE block_height = $1 ORDER BY id ASC",
            &[&(block_height as i32)],
        )
        .await
        .map_err(|e| format!("get_block_events: {e}"))?;
    Ok(rows
        .iter()
        .map(|r| (r.get("event"), r.get("event_type"), r.get("inscription_id")))
        .collect())
}

pub async fn get_block_height_bounds<T: GenericClient>(
    client: &T,
) -> Result<Option<(u32, u32)>, String> {
    let row = client
        .query_one(
            "SELECT MIN(block_height) AS min_height, MAX(block_height) AS max_height FROM brc20_block_hashes",
            &[],
        )
        .await
        .map_err(|e| format!("get_block_height_bounds: {e}"))?;
    let min_height: Option<i32> = row.get("min_height");
    let max_height: Option<i32> = row.get("max_height");
    match (min_height, max_height) {
        (Some(min), Some(max)) => Ok(Some((min as u32, max as u32))),
        _ => Ok(None),
    }
}
