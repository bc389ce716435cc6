//! Read-only queries against the upstream metaprotocol database. The upstream stores `content_type` hex-encoded, hence
//! the hex prefixes in the LIKE filters (`746578742f706c61696e` = `text/plain`, `6170706c69636174696f6e2f6a736f6e` =
//! `application/json`).

use deadpool_postgres::GenericClient;

use super::{OrdBitmapInscriptionRow, OrdTextInscriptionRow, OrdTransferRow};

pub async fn get_max_block_height<T: GenericClient>(client: &T) -> Result<Option<u32>, String> {
    let row = client
        .query_one("SELECT MAX(block_height) AS block_height FROM block_hashes", &[])
        .await
        .map_err(|e| format!("get_max_block_height: {e}"))?;
    let height: Option<i32> = row.get("block_height");
    Ok(height.map(|h| h as u32))
}

pub async fn get_block_hash<T: GenericClient>(
    block_height: u32,
    client: &T,
) -> Result<Option<String>, String> {
    let row = client
        .query_opt(
            "SELECT block_hash FROM block_hashes WHERE block_height = $1",
            &[&(block_height as i32)],
        )
        .await
        .map_err(|e| format!("get_block_hash: {e}"))?;
    Ok(row.map(|r| r.get("block_hash")))
}

pub async fn get_network_type<T: GenericClient>(client: &T) -> Result<Option<String>, String> {
    let row = client
        .query_opt("SELECT network_type FROM ord_network_type LIMIT 1", &[])
        .await
        .map_err(|e| format!("get_network_type: {e}"))?;
    Ok(row.map(|r| r.get("network_type")))
}

/// The transfer budget the upstream was indexed with, from the `default` row of `ord_transfer_counts`.
pub async fn get_default_max_transfer_count<T: GenericClient>(
    client: &T,
) -> Result<Option<i32>, String> {
    let rows = client
        .query("SELECT event_type, max_transfer_cnt FROM ord_transfer_counts", &[])
        .await
        .map_err(|e| format!("get_default_max_transfer_count: {e}"))?;
    for row in rows.iter() {
        let event_type: String = row.get("event_type");
        if event_type == "default" {
            return Ok(Some(row.get("max_transfer_cnt")));
        }
    }
    Ok(None)
}

/// The ordered BRC-20 candidate events of a block: transfers whose content parsed as JSON with `p == "brc-20"` and whose
/// inscription is not cursed for BRC-20.
pub async fn get_brc20_transfers<T: GenericClient>(
    block_height: u32,
    client: &T,
) -> Result<Vec<OrdTransferRow>, String> {
    let rows = client
        .query(
            "SELECT ot.id, ot.inscription_id, ot.old_satpoint, ot.new_pkscript, ot.new_wallet, ot.sent_as_fee,
                    oc.content, oc.content_type, onti.parent_id
             FROM ord_transfers ot
             LEFT JOIN ord_content oc ON ot.inscription_id = oc.inscription_id
             LEFT JOIN ord_number_to_id onti ON ot.inscription_id = onti.inscription_id
             WHERE ot.block_height = $1
                AND onti.cursed_for_brc20 = false
                AND oc.content IS NOT NULL AND oc.content->>'p' = 'brc-20'
             ORDER BY ot.id ASC",
            &[&(block_height as i32)],
        )
        .await
        .map_err(|e| format!("get_brc20_transfers: {e}"))?;
    Ok(rows
        .iter()
        .map(|row| OrdTransferRow {
            id: row.get("id"),
            inscription_id: row.get("inscription_id"),
            old_satpoint: row.get("old_satpoint"),
            new_pkscript: row.get("new_pkscript"),
            new_wallet: row.get("new_wallet"),
            sent_as_fee: row.get("sent_as_fee"),
            content: row.get("content"),
            content_type: row.get("content_type"),
            parent_id: row.get("parent_id"),
        })
        .collect())
}

/// The SNS candidate inscriptions of a block: plain-text or JSON content at a non-negative inscription number, ordered by
/// inscription number.
pub async fn get_text_inscriptions<T: GenericClient>(
    block_height: u32,
    client: &T,
) -> Result<Vec<OrdTextInscriptionRow>, String> {
    let rows = client
        .query(
            "SELECT oc.inscription_id, onti.inscription_number, oc.content, oc.text_content, oc.content_type
             FROM ord_content oc
             LEFT JOIN ord_number_to_id onti ON oc.inscription_id = onti.inscription_id
             WHERE oc.block_height = $1 AND
                   (oc.content_type LIKE '746578742f706c61696e%' OR
                    oc.content_type LIKE '6170706c69636174696f6e2f6a736f6e%') AND
                   onti.inscription_number >= 0
             ORDER BY onti.inscription_number ASC",
            &[&(block_height as i32)],
        )
        .await
        .map_err(|e| format!("get_text_inscriptions: {e}"))?;
    Ok(rows
        .iter()
        .map(|row| OrdTextInscriptionRow {
            inscription_id: row.get("inscription_id"),
            inscription_number: row.get("inscription_number"),
            content: row.get("content"),
            text_content: row.get("text_content"),
            content_type: row.get("content_type"),
        })
        .collect())
}

/// The bitmap candidate inscriptions of a block: uncursed `text/plain*` content ordered by inscription number, which is
/// the first-valid-wins order.
pub async fn get_bitmap_inscriptions<T: GenericClient>(
    block_height: u32,
    client: &T,
) -> Result<Vec<OrdBitmapInscriptionRow>, String> {
    let rows = client
        .query(
            "SELECT oc.inscription_id, onti.inscription_number, oc.text_content
             FROM ord_content oc
             LEFT JOIN ord_number_to_id onti ON oc.inscription_id = onti.inscription_id
             WHERE oc.block_height = $1 AND oc.text_content IS NOT NULL AND
                   oc.content_type LIKE '746578742f706c61696e%' AND
                   onti.inscription_number >= 0
             ORDER BY onti.inscription_number ASC",
            &[&(block_height as i32)],
        )
        .await
        .map_err(|e| format!("get_bitmap_inscriptions: {e}"))?;
    Ok(rows
        .iter()
        .map(|row| OrdBitmapInscriptionRow {
            inscription_id: row.get("inscription_id"),
            inscription_number: row.get("inscription_number"),
            content_hex: row.get("text_content"),
        })
        .collect())
}
