use deadpool_postgres::GenericClient;
use indexer_postgres::utils::pg_reset_table_sequence;
use refinery::embed_migrations;
use tokio_postgres::Client;

use crate::core::upstream::OrdTextInscriptionRow;
use crate::core::Protocol;

use super::SnsNameRegistration;

embed_migrations!("../../migrations/sns");

pub async fn migrate(pg_client: &mut Client) -> Result<(), String> {
    migrations::runner()
        .set_migration_table_name("pgmigrations")
        .run_async(pg_client)
        .await
        .map_err(|e| format!("Error running pg migrations: {e}"))?;
    let protocol = Protocol::Sns;
    pg_client
        .execute(
            "INSERT INTO sns_names_indexer_version (indexer_version, db_version)
             SELECT $1, $2 WHERE NOT EXISTS (SELECT 1 FROM sns_names_indexer_version)",
            &[&protocol.indexer_version(), &protocol.db_version()],
        )
        .await
        .map_err(|e| format!("Error inserting indexer version: {e}"))?;
    Ok(())
}

/// Registers a name. Returns false when the name was already taken by an earlier inscription.
pub async fn insert_name<T: GenericClient>(
    inscription: &OrdTextInscriptionRow,
    registration: &SnsNameRegistration,
    block_height: u32,
    client: &T,
) -> Result<bool, String> {
    let rows = client
        .query(
            "INSERT INTO sns_names (inscription_id, inscription_number, \"name\", domain, block_height)
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (\"name\") DO NOTHING RETURNING id",
            &[
                &inscription.inscription_id,
                &inscription.inscription_number,
                &registration.name,
                &registration.domain,
                &(block_height as i32),
            ],
        )
        .await
        .map_err(|e| format!("insert_name: {e}"))?;
    Ok(!rows.is_empty())
}

/// Registers a namespace. Returns false when the namespace was already taken.
pub async fn insert_namespace<T: GenericClient>(
    inscription: &OrdTextInscriptionRow,
    namespace: &str,
    block_height: u32,
    client: &T,
) -> Result<bool, String> {
    let rows = client
        .query(
            "INSERT INTO sns_namespaces (inscription_id, inscription_number, \"namespace\", block_height)
             VALUES ($1, $2, $3, $4) ON CONFLICT (\"namespace\") DO NOTHING RETURNING id",
            &[
                &inscription.inscription_id,
                &inscription.inscription_number,
                &namespace,
                &(block_height as i32),
            ],
        )
        .await
        .map_err(|e| format!("insert_namespace: {e}"))?;
    Ok(!rows.is_empty())
}

pub async fn get_max_protocol_block_height<T: GenericClient>(
    client: &T,
) -> Result<Option<i32>, String> {
    let row = client
        .query_one(
            "SELECT GREATEST(
                (SELECT MAX(block_height) FROM sns_names),
                (SELECT MAX(block_height) FROM sns_namespaces)
             ) AS block_height",
            &[],
        )
        .await
        .map_err(|e| format!("get_max_protocol_block_height: {e}"))?;
    Ok(row.get("block_height"))
}

pub async fn roll_back<T: GenericClient>(
    ancestor_height: i32,
    client: &T,
) -> Result<(), String> {
    for table in ["sns_names", "sns_namespaces"] {
        client
            .execute(
                &format!("DELETE FROM {table} WHERE block_height > $1"),
                &[&ancestor_height],
            )
            .await
            .map_err(|e| format!("roll_back {table}: {e}"))?;
        pg_reset_table_sequence(table, client).await?;
    }
    Ok(())
}
