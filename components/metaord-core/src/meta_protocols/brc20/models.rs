use indexer_postgres::types::{PgNumericU128, PgSmallIntU8};
use indexer_postgres::FromPgRow;
use serde_json::Value;
use tokio_postgres::Row;

use super::amount_to_decimals_str;

/// Event type ids as persisted in `brc20_event_types`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Brc20EventType {
    DeployInscribe = 0,
    MintInscribe = 1,
    TransferInscribe = 2,
    TransferTransfer = 3,
}

impl Brc20EventType {
    pub fn id(&self) -> i16 {
        *self as i16
    }
}

fn parse_amount(value: &str, field: &str) -> Result<u128, String> {
    value
        .parse::<u128>()
        .map_err(|e| format!("corrupted event payload, invalid {field}: {e}"))
}

/// Payload of a `deploy-inscribe` event. Field names match the persisted JSON consumed by rollback and the extras
/// projector; amounts are decimal strings of 18dp-scaled integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brc20DeployEvent {
    #[serde(rename = "deployer_pkScript")]
    pub deployer_pkscript: String,
    pub deployer_wallet: Option<String>,
    pub tick: String,
    pub original_tick: String,
    pub max_supply: String,
    pub decimals: String,
    pub limit_per_mint: String,
    pub is_self_mint: String,
}

impl Brc20DeployEvent {
    pub fn to_event_string(&self, inscription_id: &str) -> Result<String, String> {
        let decimals: u8 = self
            .decimals
            .parse()
            .map_err(|e| format!("corrupted event payload, invalid decimals: {e}"))?;
        Ok(format!(
            "deploy-inscribe;{};{};{};{};{};{};{};{}",
            inscription_id,
            self.deployer_pkscript,
            self.tick,
            self.original_tick,
            amount_to_decimals_str(parse_amount(&self.max_supply, "max_supply")?, decimals),
            self.decimals,
            amount_to_decimals_str(parse_amount(&self.limit_per_mint, "limit_per_mint")?, decimals),
            self.is_self_mint,
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brc20MintEvent {
    #[serde(rename = "minted_pkScript")]
    pub minted_pkscript: String,
    pub minted_wallet: Option<String>,
    pub tick: String,
    pub original_tick: String,
    pub amount: String,
    pub parent_id: String,
}

impl Brc20MintEvent {
    pub fn to_event_string(&self, inscription_id: &str, decimals: u8) -> Result<String, String> {
        Ok(format!(
            "mint-inscribe;{};{};{};{};{};{}",
            inscription_id,
            self.minted_pkscript,
            self.tick,
            self.original_tick,
            amount_to_decimals_str(parse_amount(&self.amount, "amount")?, decimals),
            self.parent_id,
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brc20TransferInscribeEvent {
    #[serde(rename = "source_pkScript")]
    pub source_pkscript: String,
    pub source_wallet: Option<String>,
    pub tick: String,
    pub original_tick: String,
    pub amount: String,
}

impl Brc20TransferInscribeEvent {
    pub fn to_event_string(&self, inscription_id: &str, decimals: u8) -> Result<String, String> {
        Ok(format!(
            "transfer-inscribe;{};{};{};{};{}",
            inscription_id,
            self.source_pkscript,
            self.tick,
            self.original_tick,
            amount_to_decimals_str(parse_amount(&self.amount, "amount")?, decimals),
        ))
    }
}

/// Payload of a `transfer-transfer` event. `spent_pkScript` is null when the transfer was spent as a transaction fee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brc20TransferTransferEvent {
    #[serde(rename = "source_pkScript")]
    pub source_pkscript: String,
    pub source_wallet: Option<String>,
    #[serde(rename = "spent_pkScript")]
    pub spent_pkscript: Option<String>,
    pub spent_wallet: Option<String>,
    pub tick: String,
    pub original_tick: String,
    pub amount: String,
    pub using_tx_id: String,
}

impl Brc20TransferTransferEvent {
    pub fn to_event_string(&self, inscription_id: &str, decimals: u8) -> Result<String, String> {
        Ok(format!(
            "transfer-transfer;{};{};{};{};{};{}",
            inscription_id,
            self.source_pkscript,
            self.spent_pkscript.as_deref().unwrap_or(""),
            self.tick,
            self.original_tick,
            amount_to_decimals_str(parse_amount(&self.amount, "amount")?, decimals),
        ))
    }
}

/// In-memory ticker state used by the verifier, mirroring the columns reloaded from `brc20_tickers` after a rollback.
#[derive(Debug, Clone)]
pub struct Ticker {
    pub tick: String,
    pub remaining_supply: u128,
    pub limit_per_mint: u128,
    pub decimals: u8,
    pub is_self_mint: bool,
    pub deploy_inscription_id: String,
}

impl FromPgRow for Ticker {
    fn from_pg_row(row: &Row) -> Self {
        let remaining_supply: PgNumericU128 = row.get("remaining_supply");
        let limit_per_mint: PgNumericU128 = row.get("limit_per_mint");
        let decimals: PgSmallIntU8 = row.get("decimals");
        Ticker {
            tick: row.get("tick"),
            remaining_supply: remaining_supply.0,
            limit_per_mint: limit_per_mint.0,
            decimals: decimals.0,
            is_self_mint: row.get("is_self_mint"),
            deploy_inscription_id: row.get("deploy_inscription_id"),
        }
    }
}

/// A pending `brc20_events` row. Event ids are assigned by the indexer, monotonically across blocks.
#[derive(Debug, Clone)]
pub struct DbEvent {
    pub id: i64,
    pub event_type: i16,
    pub block_height: i32,
    pub inscription_id: String,
    pub event: Value,
}

#[derive(Debug, Clone)]
pub struct DbTicker {
    pub tick: String,
    pub original_tick: String,
    pub max_supply: PgNumericU128,
    pub decimals: PgSmallIntU8,
    pub limit_per_mint: PgNumericU128,
    pub remaining_supply: PgNumericU128,
    pub is_self_mint: bool,
    pub deploy_inscription_id: String,
    pub block_height: i32,
}

/// A pending `brc20_historic_balances` row. `event_id` is negated for the credit side of a debit/credit pair so the
/// column stays globally unique.
#[derive(Debug, Clone)]
pub struct DbHistoricBalance {
    pub pkscript: String,
    pub wallet: Option<String>,
    pub tick: String,
    pub overall_balance: PgNumericU128,
    pub available_balance: PgNumericU128,
    pub block_height: i32,
    pub event_id: i64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deploy_event_string_carries_self_mint_fields() {
        let event = Brc20DeployEvent {
            deployer_pkscript: "5120aa".to_string(),
            deployer_wallet: Some("bc1paa".to_string()),
            tick: "ordix".to_string(),
            original_tick: "ORDIX".to_string(),
            max_supply: (u64::MAX as u128 * 10u128.pow(18)).to_string(),
            decimals: "18".to_string(),
            limit_per_mint: (u64::MAX as u128 * 10u128.pow(18)).to_string(),
            is_self_mint: "true".to_string(),
        };
        assert_eq!(
            event.to_event_string("inscr1i0").unwrap(),
            "deploy-inscribe;inscr1i0;5120aa;ordix;ORDIX;18446744073709551615.000000000000000000;18;18446744073709551615.000000000000000000;true"
        );
    }

    #[test]
    fn mint_event_string_carries_parent_id() {
        let event = Brc20MintEvent {
            minted_pkscript: "5120bb".to_string(),
            minted_wallet: None,
            tick: "ordi".to_string(),
            original_tick: "ORDI".to_string(),
            amount: (5 * 10u128.pow(18)).to_string(),
            parent_id: "parent1i0".to_string(),
        };
        assert_eq!(
            event.to_event_string("inscr2i0", 18).unwrap(),
            "mint-inscribe;inscr2i0;5120bb;ordi;ORDI;5.000000000000000000;parent1i0"
        );
    }

    #[test]
    fn transfer_event_strings_mark_fee_spends_with_an_empty_receiver() {
        let inscribe = Brc20TransferInscribeEvent {
            source_pkscript: "5120bb".to_string(),
            source_wallet: None,
            tick: "ordi".to_string(),
            original_tick: "ORDI".to_string(),
            amount: (3 * 10u128.pow(18)).to_string(),
        };
        assert_eq!(
            inscribe.to_event_string("inscr3i0", 18).unwrap(),
            "transfer-inscribe;inscr3i0;5120bb;ordi;ORDI;3.000000000000000000"
        );
        let send = Brc20TransferTransferEvent {
            source_pkscript: "5120bb".to_string(),
            source_wallet: None,
            spent_pkscript: None,
            spent_wallet: None,
            tick: "ordi".to_string(),
            original_tick: "ORDI".to_string(),
            amount: (3 * 10u128.pow(18)).to_string(),
            using_tx_id: "77".to_string(),
        };
        assert_eq!(
            send.to_event_string("inscr3i0", 18).unwrap(),
            "transfer-transfer;inscr3i0;5120bb;;ordi;ORDI;3.000000000000000000"
        );
    }

    #[test]
    fn event_payloads_serialize_with_original_field_names() {
        let event = Brc20TransferTransferEvent {
            source_pkscript: "aa".to_string(),
            source_wallet: Some("w1".to_string()),
            spent_pkscript: Some("bb".to_string()),
            spent_wallet: None,
            tick: "ordi".to_string(),
            original_tick: "ordi".to_string(),
            amount: "1".to_string(),
            using_tx_id: "9".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("source_pkScript").is_some());
        assert!(value.get("spent_pkScript").is_some());
        assert!(value.get("using_tx_id").is_some());
    }
}
