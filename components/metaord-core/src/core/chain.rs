use deadpool_postgres::GenericClient;
use indexer_postgres::utils::pg_reset_table_sequence;
use sha2::{Digest, Sha256};

use super::Protocol;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDigest {
    pub block_event_hash: String,
    pub cumulative_event_hash: String,
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Links a block digest into the cumulative chain. The first block of the chain has no previous cumulative hash and is its
/// own cumulative digest.
pub fn chain_digest(previous_cumulative: Option<&str>, block_event_hash: &str) -> String {
    match previous_cumulative {
        Some(previous) => sha256_hex(&format!("{previous}{block_event_hash}")),
        None => block_event_hash.to_string(),
    }
}

pub async fn get_cumulative_event_hash<T: GenericClient>(
    protocol: &Protocol,
    block_height: u32,
    client: &T,
) -> Result<Option<String>, String> {
    let row = client
        .query_opt(
            &format!(
                "SELECT cumulative_event_hash FROM {} WHERE block_height = $1",
                protocol.event_hashes_table()
            ),
            &[&(block_height as i32)],
        )
        .await
        .map_err(|e| format!("get_cumulative_event_hash: {e}"))?;
    Ok(row.map(|r| r.get("cumulative_event_hash")))
}

pub async fn get_block_digest<T: GenericClient>(
    protocol: &Protocol,
    block_height: u32,
    client: &T,
) -> Result<Option<BlockDigest>, String> {
    let row = client
        .query_opt(
            &format!(
                "SELECT block_event_hash, cumulative_event_hash FROM {} WHERE block_height = $1",
                protocol.event_hashes_table()
            ),
            &[&(block_height as i32)],
        )
        .await
        .map_err(|e| format!("get_block_digest: {e}"))?;
    Ok(row.map(|r| BlockDigest {
        block_event_hash: r.get("block_event_hash"),
        cumulative_event_hash: r.get("cumulative_event_hash"),
    }))
}

/// Hashes the canonicalized event string of a block, links it into the cumulative chain and persists the digest row. An
/// empty-event block still produces a digest of the empty string.
pub async fn update_event_hashes<T: GenericClient>(
    protocol: &Protocol,
    block_height: u32,
    block_events_str: &str,
    client: &T,
) -> Result<BlockDigest, String> {
    let block_event_hash = sha256_hex(block_events_str);
    let previous = match block_height.checked_sub(1) {
        Some(previous_height) => {
            get_cumulative_event_hash(protocol, previous_height, client).await?
        }
        None => None,
    };
    let cumulative_event_hash = chain_digest(previous.as_deref(), &block_event_hash);
    client
        .execute(
            &format!(
                "INSERT INTO {} (block_height, block_event_hash, cumulative_event_hash) VALUES ($1, $2, $3)",
                protocol.event_hashes_table()
            ),
            &[
                &(block_height as i32),
                &block_event_hash,
                &cumulative_event_hash,
            ],
        )
        .await
        .map_err(|e| format!("update_event_hashes: {e}"))?;
    Ok(BlockDigest {
        block_event_hash,
        cumulative_event_hash,
    })
}

/// Records the anchor for a fully committed block. This is the last write of a block's unit of work.
pub async fn insert_block_hash<T: GenericClient>(
    protocol: &Protocol,
    block_height: u32,
    block_hash: &str,
    client: &T,
) -> Result<(), String> {
    client
        .execute(
            &format!(
                "INSERT INTO {} (block_height, block_hash) VALUES ($1, $2)",
                protocol.block_hashes_table()
            ),
            &[&(block_height as i32), &block_hash],
        )
        .await
        .map_err(|e| format!("insert_block_hash: {e}"))?;
    Ok(())
}

pub async fn get_last_block_height<T: GenericClient>(
    protocol: &Protocol,
    client: &T,
) -> Result<Option<u32>, String> {
    let row = client
        .query_one(
            &format!(
                "SELECT MAX(block_height) AS block_height FROM {}",
                protocol.block_hashes_table()
            ),
            &[],
        )
        .await
        .map_err(|e| format!("get_last_block_height: {e}"))?;
    let height: Option<i32> = row.get("block_height");
    Ok(height.map(|h| h as u32))
}

pub async fn get_block_hash<T: GenericClient>(
    protocol: &Protocol,
    block_height: u32,
    client: &T,
) -> Result<Option<String>, String> {
    let row = client
        .query_opt(
            &format!(
                "SELECT block_hash FROM {} WHERE block_height = $1",
                protocol.block_hashes_table()
            ),
            &[&(block_height as i32)],
        )
        .await
        .map_err(|e| format!("get_block_hash: {e}"))?;
    Ok(row.map(|r| r.get("block_hash")))
}

/// Returns the most recent anchors, highest block first.
pub async fn get_last_anchors<T: GenericClient>(
    protocol: &Protocol,
    limit: usize,
    client: &T,
) -> Result<Vec<(u32, String)>, String> {
    let rows = client
        .query(
            &format!(
                "SELECT block_height, block_hash FROM {} ORDER BY block_height DESC LIMIT {}",
                protocol.block_hashes_table(),
                limit
            ),
            &[],
        )
        .await
        .map_err(|e| format!("get_last_anchors: {e}"))?;
    Ok(rows
        .iter()
        .map(|r| (r.get::<_, i32>("block_height") as u32, r.get("block_hash")))
        .collect())
}

/// Truncates the digest chain and the anchors back to the common ancestor.
pub async fn roll_back_chain<T: GenericClient>(
    protocol: &Protocol,
    ancestor_height: i32,
    client: &T,
) -> Result<(), String> {
    for table in [protocol.event_hashes_table(), protocol.block_hashes_table()] {
        client
            .execute(
                &format!("DELETE FROM {table} WHERE block_height > $1"),
                &[&ancestor_height],
            )
            .await
            .map_err(|e| format!("roll_back_chain {table}: {e}"))?;
        pg_reset_table_sequence(table, client).await?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::{chain_digest, sha256_hex};

    #[test]
    fn hashes_the_empty_block_event_string() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digests_are_lowercase_hex() {
        let digest = sha256_hex("inscribe;inscr1i0;839000");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test_case(None, "abc" => "abc".to_string(); "first block is its own cumulative digest")]
    #[test_case(Some("aa"), "bb" => sha256_hex("aabb"); "chained digest hashes previous and current")]
    fn chains_digests(previous: Option<&str>, block_event_hash: &str) -> String {
        chain_digest(previous, block_event_hash)
    }

    #[test]
    fn cumulative_chain_is_order_dependent() {
        let h1 = sha256_hex("a");
        let h2 = sha256_hex("b");
        let c2 = chain_digest(Some(&chain_digest(None, &h1)), &h2);
        let c2_swapped = chain_digest(Some(&chain_digest(None, &h2)), &h1);
        assert_ne!(c2, c2_swapped);
    }
}
