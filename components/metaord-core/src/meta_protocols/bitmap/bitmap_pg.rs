use deadpool_postgres::GenericClient;
use indexer_postgres::utils::pg_reset_table_sequence;
use refinery::embed_migrations;
use tokio_postgres::Client;

use crate::core::upstream::OrdBitmapInscriptionRow;
use crate::core::Protocol;

embed_migrations!("../../migrations/bitmap");

pub async fn migrate(pg_client: &mut Client) -> Result<(), String> {
    migrations::runner()
        .set_migration_table_name("pgmigrations")
        .run_async(pg_client)
        .await
        .map_err(|e| format!("Error running pg migrations: {e}"))?;
    let protocol = Protocol::Bitmap;
    pg_client
        .execute(
            "INSERT INTO bitmap_indexer_version (indexer_version, db_version)
             SELECT $1, $2 WHERE NOT EXISTS (SELECT 1 FROM bitmap_indexer_version)",
            &[&protocol.indexer_version(), &protocol.db_version()],
        )
        .await
        .map_err(|e| format!("Error inserting indexer version: {e}"))?;
    Ok(())
}

/// Claims a bitmap number. Returns false when the number was already claimed by an earlier inscription.
pub async fn insert_bitmap<T: GenericClient>(
    inscription: &OrdBitmapInscriptionRow,
    bitmap_number: u64,
    block_height: u32,
    client: &T,
) -> Result<bool, String> {
    let rows = client
        .query(
            "INSERT INTO bitmaps (inscription_id, inscription_number, bitmap_number, block_height)
             VALUES ($1, $2, $3, $4) ON CONFLICT (bitmap_number) DO NOTHING RETURNING id",
            &[
                &inscription.inscription_id,
                &inscription.inscription_number,
                &(bitmap_number as i64),
                &(block_height as i32),
            ],
        )
        .await
        .map_err(|e| format!("insert_bitmap: {e}"))?;
    Ok(!rows.is_empty())
}

pub async fn get_max_protocol_block_height<T: GenericClient>(
    client: &T,
) -> Result<Option<i32>, String> {
    let row = client
        .query_one("SELECT MAX(block_height) AS block_height FROM bitmaps", &[])
        .await
        .map_err(|e| format!("get_max_protocol_block_height: {e}"))?;
    Ok(row.get("block_height"))
}

pub async fn roll_back<T: GenericClient>(
    ancestor_height: i32,
    client: &T,
) -> Result<(), String> {
    client
        .execute(
            "DELETE FROM bitmaps WHERE block_height > $1",
            &[&ancestor_height],
        )
        .await
        .map_err(|e| format!("roll_back bitmaps: {e}"))?;
    pg_reset_table_sequence("bitmaps", client).await?;
    Ok(())
}
