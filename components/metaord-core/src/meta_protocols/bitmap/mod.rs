pub mod bitmap_pg;

use deadpool_postgres::{Object, Transaction};

use crate::core::upstream::UpstreamSource;
use crate::core::{Protocol, EVENT_SEPARATOR};
use crate::service::ProtocolIndexer;
use crate::utils::Context;
use crate::{try_debug, try_info};

/// Parses bitmap content: an ASCII decimal number followed by `.bitmap`, with no leading zero except the single digit
/// `0` and no other bytes.
pub fn parse_bitmap_number(content_hex: &str) -> Option<u64> {
    let bytes = hex::decode(content_hex).ok()?;
    let content = String::from_utf8(bytes).ok()?;
    let number = content.strip_suffix(".bitmap")?;
    if number.is_empty() {
        return None;
    }
    if !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if number.starts_with('0') && number.len() != 1 {
        return None;
    }
    number.parse::<u64>().ok()
}

pub fn get_event_string(bitmap_number: u64, inscription_id: &str) -> String {
    format!("inscribe;{inscription_id};{bitmap_number}")
}

/// Applies one block of bitmap claims. Claims are first-valid-wins in ascending inscription number order, enforced by
/// the unique `bitmap_number` constraint; a claimed number must not exceed its block height.
pub async fn index_block(
    block_height: u32,
    upstream: &UpstreamSource,
    db_tx: &Transaction<'_>,
    ctx: &Context,
) -> Result<String, String> {
    let inscriptions = upstream.bitmap_inscriptions(block_height).await?;
    let mut events: Vec<String> = vec![];
    for inscription in inscriptions.iter() {
        let Some(bitmap_number) = parse_bitmap_number(&inscription.content_hex) else {
            continue;
        };
        if bitmap_number > block_height as u64 {
            try_debug!(
                ctx,
                "Bitmap number {bitmap_number} is above block height {block_height}, skipping"
            );
            continue;
        }
        if !bitmap_pg::insert_bitmap(inscription, bitmap_number, block_height, db_tx).await? {
            try_debug!(ctx, "Bitmap number {bitmap_number} already claimed, skipping");
            continue;
        }
        try_info!(
            ctx,
            "Bitmap {bitmap_number} claimed by {} at block {block_height}",
            inscription.inscription_id
        );
        events.push(get_event_string(bitmap_number, &inscription.inscription_id));
    }
    Ok(events.join(EVENT_SEPARATOR))
}

/// The bitmap adapter plugged into the shared replay engine.
pub struct BitmapIndexer;

impl ProtocolIndexer for BitmapIndexer {
    fn protocol(&self) -> Protocol {
        Protocol::Bitmap
    }

    async fn index_block(
        &mut self,
        block_height: u32,
        upstream: &UpstreamSource,
        db_tx: &Transaction<'_>,
        ctx: &Context,
    ) -> Result<String, String> {
        index_block(block_height, upstream, db_tx, ctx).await
    }

    async fn roll_back(
        &mut self,
        ancestor_height: i32,
        db_tx: &Transaction<'_>,
        _ctx: &Context,
    ) -> Result<(), String> {
        bitmap_pg::roll_back(ancestor_height, db_tx).await
    }

    async fn residue_block_height(&self, client: &Object) -> Result<Option<u32>, String> {
        let height = bitmap_pg::get_max_protocol_block_height(client).await?;
        Ok(height.map(|h| h as u32))
    }
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::{get_event_string, parse_bitmap_number};

    fn to_hex(content: &str) -> String {
        hex::encode(content.as_bytes())
    }

    #[test_case("839000.bitmap" => Some(839000); "plain number")]
    #[test_case("0.bitmap" => Some(0); "single zero")]
    #[test_case("007.bitmap" => None; "leading zeros")]
    #[test_case("01.bitmap" => None; "leading zero")]
    #[test_case(".bitmap" => None; "empty number")]
    #[test_case("839000.bitmap " => None; "trailing data")]
    #[test_case("839 000.bitmap" => None; "embedded whitespace")]
    #[test_case("839000" => None; "missing suffix")]
    #[test_case("839000.BITMAP" => None; "uppercase suffix")]
    #[test_case("-1.bitmap" => None; "negative")]
    #[test_case("1e3.bitmap" => None; "scientific notation")]
    #[test_case("99999999999999999999999999.bitmap" => None; "number beyond u64")]
    fn parses_bitmap_numbers(content: &str) -> Option<u64> {
        parse_bitmap_number(&to_hex(content))
    }

    #[test]
    fn rejects_non_utf8_and_non_hex_content() {
        assert_eq!(parse_bitmap_number("zz"), None);
        assert_eq!(parse_bitmap_number("ff839000"), None);
    }

    #[test]
    fn formats_the_claim_event() {
        assert_eq!(
            get_event_string(839000, "inscr1i0"),
            "inscribe;inscr1i0;839000"
        );
    }
}
