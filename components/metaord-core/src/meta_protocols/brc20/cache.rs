use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;

use deadpool_postgres::{GenericClient, Transaction};
use indexer_postgres::types::{PgNumericU128, PgSmallIntU8};
use lru::LruCache;

use crate::core::upstream::OrdTransferRow;

use super::brc20_pg;
use super::models::{
    Brc20DeployEvent, Brc20EventType, Brc20MintEvent, Brc20TransferInscribeEvent,
    Brc20TransferTransferEvent, DbEvent, DbHistoricBalance, DbTicker, Ticker,
};
use super::verifier::{VerifiedBrc20BalanceData, VerifiedBrc20TokenDeploy};

#[derive(Debug, Clone, Copy, Default)]
pub struct Balance {
    pub overall: u128,
    pub available: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferValidity {
    Valid,
    Used,
    Invalid,
}

/// Rows accumulated during a block and written to the open transaction in one batch. Must be flushed before any SQL read
/// that could observe this block's own activity.
#[derive(Default)]
pub struct Brc20DbCache {
    events: Vec<DbEvent>,
    tickers: Vec<DbTicker>,
    remaining_supply_decreases: BTreeMap<String, u128>,
    burned_supply_increases: BTreeMap<String, u128>,
    historic_balances: Vec<DbHistoricBalance>,
}

impl Brc20DbCache {
    pub async fn flush(&mut self, db_tx: &Transaction<'_>) -> Result<(), String> {
        brc20_pg::insert_events(&self.events, db_tx).await?;
        self.events.clear();
        brc20_pg::insert_tickers(&self.tickers, db_tx).await?;
        self.tickers.clear();
        for (tick, amount) in self.remaining_supply_decreases.iter() {
            brc20_pg::decrease_remaining_supply(tick, PgNumericU128(*amount), db_tx).await?;
        }
        self.remaining_supply_decreases.clear();
        for (tick, amount) in self.burned_supply_increases.iter() {
            brc20_pg::increase_burned_supply(tick, PgNumericU128(*amount), db_tx).await?;
        }
        self.burned_supply_increases.clear();
        brc20_pg::insert_historic_balances(&self.historic_balances, db_tx).await?;
        self.historic_balances.clear();
        Ok(())
    }
}

/// In-memory view of BRC-20 state, write-through against the historic log. Tickers are few and loaded whole; balances and
/// transfer lookups go through bounded LRU caches with a DB fallback. All of it is dropped and re-warmed on rollback.
pub struct Brc20MemoryCache {
    tickers: HashMap<String, Ticker>,
    balances: LruCache<String, Balance>,
    unsent_transfers: LruCache<String, Brc20TransferInscribeEvent>,
    transfer_validity: LruCache<String, TransferValidity>,
    pub db_cache: Brc20DbCache,
    next_event_id: i64,
}

fn balance_key(pkscript: &str, tick: &str) -> String {
    format!("{pkscript}{tick}")
}

impl Brc20MemoryCache {
    pub fn new(lru_cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(lru_cache_size.max(1)).unwrap();
        Brc20MemoryCache {
            tickers: HashMap::new(),
            balances: LruCache::new(capacity),
            unsent_transfers: LruCache::new(capacity),
            transfer_validity: LruCache::new(capacity),
            db_cache: Brc20DbCache::default(),
            next_event_id: 0,
        }
    }

    /// Drops everything and reloads the ticker table and the event id cursor. Called on startup and after every rollback.
    pub async fn warm_up<T: GenericClient>(&mut self, client: &T) -> Result<(), String> {
        self.balances.clear();
        self.unsent_transfers.clear();
        self.transfer_validity.clear();
        self.db_cache = Brc20DbCache::default();
        self.tickers = brc20_pg::get_tickers(client)
            .await?
            .into_iter()
            .map(|t| (t.tick.clone(), t))
            .collect();
        self.next_event_id = brc20_pg::get_max_event_id(client).await?.unwrap_or(-1) + 1;
        Ok(())
    }

    pub fn get_ticker(&self, tick: &str) -> Option<&Ticker> {
        self.tickers.get(tick)
    }

    fn assign_event_id(&mut self) -> i64 {
        let event_id = self.next_event_id;
        self.next_event_id += 1;
        event_id
    }

    async fn get_balance(
        &mut self,
        pkscript: &str,
        tick: &str,
        db_tx: &Transaction<'_>,
    ) -> Result<Balance, String> {
        let key = balance_key(pkscript, tick);
        if let Some(balance) = self.balances.get(&key) {
            return Ok(*balance);
        }
        // Pending rows must be visible to the fallback query.
        self.db_cache.flush(db_tx).await?;
        let balance = brc20_pg::get_last_balance(pkscript, tick, db_tx)
            .await?
            .unwrap_or_default();
        self.balances.put(key, balance);
        Ok(balance)
    }

    pub async fn get_available_balance(
        &mut self,
        pkscript: &str,
        tick: &str,
        db_tx: &Transaction<'_>,
    ) -> Result<u128, String> {
        Ok(self.get_balance(pkscript, tick, db_tx).await?.available)
    }

    /// A transfer inscription may be spent at most once, and only if a matching transfer-inscribe event exists.
    pub async fn is_used_or_invalid(
        &mut self,
        inscription_id: &str,
        db_tx: &Transaction<'_>,
    ) -> Result<bool, String> {
        if let Some(validity) = self.transfer_validity.get(inscription_id) {
            return Ok(*validity != TransferValidity::Valid);
        }
        self.db_cache.flush(db_tx).await?;
        let (inscribe_count, transfer_count) =
            brc20_pg::get_transfer_event_counts(inscription_id, db_tx).await?;
        let validity = if inscribe_count != 1 {
            TransferValidity::Invalid
        } else if transfer_count != 0 {
            TransferValidity::Used
        } else {
            TransferValidity::Valid
        };
        self.transfer_validity
            .put(inscription_id.to_string(), validity);
        Ok(validity != TransferValidity::Valid)
    }

    /// Retrieves and consumes the transfer-inscribe event backing a transfer-transfer. Single use: the entry leaves the
    /// cache with this call, matching the at-most-one-spend rule.
    async fn take_transfer_inscribe_event(
        &mut self,
        inscription_id: &str,
        db_tx: &Transaction<'_>,
    ) -> Result<Brc20TransferInscribeEvent, String> {
        if let Some(event) = self.unsent_transfers.pop(inscription_id) {
            return Ok(event);
        }
        self.db_cache.flush(db_tx).await?;
        brc20_pg::get_transfer_inscribe_event(inscription_id, db_tx).await
    }

    pub fn insert_token_deploy(
        &mut self,
        data: &VerifiedBrc20TokenDeploy,
        row: &OrdTransferRow,
        block_height: u32,
    ) -> Result<String, String> {
        let event = Brc20DeployEvent {
            deployer_pkscript: row.new_pkscript.clone(),
            deployer_wallet: row.new_wallet.clone(),
            tick: data.tick.clone(),
            original_tick: data.original_tick.clone(),
            max_supply: data.max_supply.to_string(),
            decimals: data.decimals.to_string(),
            limit_per_mint: data.limit_per_mint.to_string(),
            is_self_mint: data.is_self_mint.to_string(),
        };
        let event_str = event.to_event_string(&row.inscription_id)?;
        let event_id = self.assign_event_id();
        self.db_cache.events.push(DbEvent {
            id: event_id,
            event_type: Brc20EventType::DeployInscribe.id(),
            block_height: block_height as i32,
            inscription_id: row.inscription_id.clone(),
            event: serde_json::to_value(&event).map_err(|e| format!("deploy event: {e}"))?,
        });
        self.db_cache.tickers.push(DbTicker {
            tick: data.tick.clone(),
            original_tick: data.original_tick.clone(),
            max_supply: PgNumericU128(data.max_supply),
            decimals: PgSmallIntU8(data.decimals),
            limit_per_mint: PgNumericU128(data.limit_per_mint),
            remaining_supply: PgNumericU128(data.max_supply),
            is_self_mint: data.is_self_mint,
            deploy_inscription_id: row.inscription_id.clone(),
            block_height: block_height as i32,
        });
        self.tickers.insert(
            data.tick.clone(),
            Ticker {
                tick: data.tick.clone(),
                remaining_supply: data.max_supply,
                limit_per_mint: data.limit_per_mint,
                decimals: data.decimals,
                is_self_mint: data.is_self_mint,
                deploy_inscription_id: row.inscription_id.clone(),
            },
        );
        Ok(event_str)
    }

    pub async fn insert_token_mint(
        &mut self,
        data: &VerifiedBrc20BalanceData,
        row: &OrdTransferRow,
        block_height: u32,
        db_tx: &Transaction<'_>,
    ) -> Result<String, String> {
        let decimals = self.expect_decimals(&data.tick)?;
        let event = Brc20MintEvent {
            minted_pkscript: row.new_pkscript.clone(),
            minted_wallet: row.new_wallet.clone(),
            tick: data.tick.clone(),
            original_tick: data.original_tick.clone(),
            amount: data.amount.to_string(),
            parent_id: row.parent_id.clone().unwrap_or_default(),
        };
        let event_str = event.to_event_string(&row.inscription_id, decimals)?;
        let event_id = self.assign_event_id();
        self.db_cache.events.push(DbEvent {
            id: event_id,
            event_type: Brc20EventType::MintInscribe.id(),
            block_height: block_height as i32,
            inscription_id: row.inscription_id.clone(),
            event: serde_json::to_value(&event).map_err(|e| format!("mint event: {e}"))?,
        });
        *self
            .db_cache
            .remaining_supply_decreases
            .entry(data.tick.clone())
            .or_default() += data.amount;

        let mut balance = self.get_balance(&row.new_pkscript, &data.tick, db_tx).await?;
        balance.overall += data.amount;
        balance.available += data.amount;
        self.balances
            .put(balance_key(&row.new_pkscript, &data.tick), balance);
        self.push_historic_balance(
            &row.new_pkscript,
            row.new_wallet.as_deref(),
            &data.tick,
            balance,
            block_height,
            event_id,
        );

        let ticker = self
            .tickers
            .get_mut(&data.tick)
            .ok_or(format!("minted ticker {} missing from cache", data.tick))?;
        ticker.remaining_supply -= data.amount;
        Ok(event_str)
    }

    pub async fn insert_transfer_inscribe(
        &mut self,
        data: &VerifiedBrc20BalanceData,
        row: &OrdTransferRow,
        block_height: u32,
        db_tx: &Transaction<'_>,
    ) -> Result<String, String> {
        let decimals = self.expect_decimals(&data.tick)?;
        let event = Brc20TransferInscribeEvent {
            source_pkscript: row.new_pkscript.clone(),
            source_wallet: row.new_wallet.clone(),
            tick: data.tick.clone(),
            original_tick: data.original_tick.clone(),
            amount: data.amount.to_string(),
        };
        let event_str = event.to_event_string(&row.inscription_id, decimals)?;
        let event_id = self.assign_event_id();
        self.db_cache.events.push(DbEvent {
            id: event_id,
            event_type: Brc20EventType::TransferInscribe.id(),
            block_height: block_height as i32,
            inscription_id: row.inscription_id.clone(),
            event: serde_json::to_value(&event)
                .map_err(|e| format!("transfer inscribe event: {e}"))?,
        });
        self.transfer_validity
            .put(row.inscription_id.clone(), TransferValidity::Valid);

        let mut balance = self.get_balance(&row.new_pkscript, &data.tick, db_tx).await?;
        balance.available = balance
            .available
            .checked_sub(data.amount)
            .ok_or("transfer inscribe below available balance")?;
        self.balances
            .put(balance_key(&row.new_pkscript, &data.tick), balance);
        self.push_historic_balance(
            &row.new_pkscript,
            row.new_wallet.as_deref(),
            &data.tick,
            balance,
            block_height,
            event_id,
        );

        self.unsent_transfers.put(row.inscription_id.clone(), event);
        Ok(event_str)
    }

    /// Settles a transfer inscription. With a receiver, the reserved amount moves from the source to `spent_pkscript`
    /// (and burns when the receiver is the `6a` OP_RETURN script); spent as a fee, the reservation is released back to
    /// the source's available balance.
    pub async fn insert_transfer_send(
        &mut self,
        tick: &str,
        original_tick: &str,
        amount: u128,
        spent: Option<(&str, Option<&str>)>,
        row: &OrdTransferRow,
        block_height: u32,
        db_tx: &Transaction<'_>,
    ) -> Result<String, String> {
        let decimals = self.expect_decimals(tick)?;
        let inscribe_event = self
            .take_transfer_inscribe_event(&row.inscription_id, db_tx)
            .await?;
        let source_pkscript = inscribe_event.source_pkscript.clone();
        let source_wallet = inscribe_event.source_wallet.clone();
        let event = Brc20TransferTransferEvent {
            source_pkscript: source_pkscript.clone(),
            source_wallet: source_wallet.clone(),
            spent_pkscript: spent.map(|(pkscript, _)| pkscript.to_string()),
            spent_wallet: spent.and_then(|(_, wallet)| wallet.map(|w| w.to_string())),
            tick: tick.to_string(),
            original_tick: original_tick.to_string(),
            amount: amount.to_string(),
            using_tx_id: row.id.to_string(),
        };
        let event_str = event.to_event_string(&row.inscription_id, decimals)?;
        let event_id = self.assign_event_id();
        self.db_cache.events.push(DbEvent {
            id: event_id,
            event_type: Brc20EventType::TransferTransfer.id(),
            block_height: block_height as i32,
            inscription_id: row.inscription_id.clone(),
            event: serde_json::to_value(&event)
                .map_err(|e| format!("transfer transfer event: {e}"))?,
        });
        self.transfer_validity
            .put(row.inscription_id.clone(), TransferValidity::Used);

        match spent {
            Some((spent_pkscript, spent_wallet)) => {
                let mut source_balance =
                    self.get_balance(&source_pkscript, tick, db_tx).await?;
                source_balance.overall = source_balance
                    .overall
                    .checked_sub(amount)
                    .ok_or("transfer send below overall balance")?;
                self.balances
                    .put(balance_key(&source_pkscript, tick), source_balance);
                self.push_historic_balance(
                    &source_pkscript,
                    source_wallet.as_deref(),
                    tick,
                    source_balance,
                    block_height,
                    event_id,
                );

                let mut receiver_balance = if spent_pkscript == source_pkscript {
                    source_balance
                } else {
                    self.get_balance(spent_pkscript, tick, db_tx).await?
                };
                receiver_balance.overall += amount;
                receiver_balance.available += amount;
                self.balances
                    .put(balance_key(spent_pkscript, tick), receiver_balance);
                self.push_historic_balance(
                    spent_pkscript,
                    spent_wallet,
                    tick,
                    receiver_balance,
                    block_height,
                    -event_id,
                );

                if spent_pkscript == "6a" {
                    *self
                        .db_cache
                        .burned_supply_increases
                        .entry(tick.to_string())
                        .or_default() += amount;
                }
            }
            None => {
                // Spent as fee: release the reservation, overall unchanged.
                let mut source_balance =
                    self.get_balance(&source_pkscript, tick, db_tx).await?;
                source_balance.available += amount;
                self.balances
                    .put(balance_key(&source_pkscript, tick), source_balance);
                self.push_historic_balance(
                    &source_pkscript,
                    source_wallet.as_deref(),
                    tick,
                    source_balance,
                    block_height,
                    event_id,
                );
            }
        }
        Ok(event_str)
    }

    fn push_historic_balance(
        &mut self,
        pkscript: &str,
        wallet: Option<&str>,
        tick: &str,
        balance: Balance,
        block_height: u32,
        event_id: i64,
    ) {
        self.db_cache.historic_balances.push(DbHistoricBalance {
            pkscript: pkscript.to_string(),
            wallet: wallet.map(|w| w.to_string()),
            tick: tick.to_string(),
            overall_balance: PgNumericU128(balance.overall),
            available_balance: PgNumericU128(balance.available),
            block_height: block_height as i32,
            event_id,
        });
    }

    fn expect_decimals(&self, tick: &str) -> Result<u8, String> {
        Ok(self
            .tickers
            .get(tick)
            .ok_or(format!("ticker {tick} missing from cache"))?
            .decimals)
    }
}

#[cfg(test)]
mod test {
    use crate::core::upstream::OrdTransferRow;
    use crate::meta_protocols::brc20::verifier::VerifiedBrc20TokenDeploy;

    use super::Brc20MemoryCache;

    fn reveal_row(inscription_id: &str, pkscript: &str) -> OrdTransferRow {
        OrdTransferRow {
            id: 1,
            inscription_id: inscription_id.to_string(),
            old_satpoint: String::new(),
            new_pkscript: pkscript.to_string(),
            new_wallet: Some("bc1q".to_string()),
            sent_as_fee: false,
            content: None,
            content_type: None,
            parent_id: None,
        }
    }

    #[test]
    fn deploy_updates_the_ticker_table_and_emits_the_event_string() {
        let mut cache = Brc20MemoryCache::new(100);
        let data = VerifiedBrc20TokenDeploy {
            tick: "ordi".to_string(),
            original_tick: "ORDI".to_string(),
            max_supply: 1000 * 10u128.pow(18),
            limit_per_mint: 10 * 10u128.pow(18),
            decimals: 18,
            is_self_mint: false,
        };
        let event_str = cache
            .insert_token_deploy(&data, &reveal_row("inscr1i0", "5120aa"), 840000)
            .unwrap();
        assert_eq!(
            event_str,
            "deploy-inscribe;inscr1i0;5120aa;ordi;ORDI;1000.000000000000000000;18;10.000000000000000000;false"
        );
        let ticker = cache.get_ticker("ordi").unwrap();
        assert_eq!(ticker.remaining_supply, 1000 * 10u128.pow(18));
        assert_eq!(ticker.limit_per_mint, 10 * 10u128.pow(18));
        assert!(!ticker.is_self_mint);
        assert_eq!(ticker.deploy_inscription_id, "inscr1i0");
    }

    #[test]
    fn deploys_are_unique_per_normalized_tick() {
        let mut cache = Brc20MemoryCache::new(100);
        let data = VerifiedBrc20TokenDeploy {
            tick: "ordi".to_string(),
            original_tick: "OrDi".to_string(),
            max_supply: 100,
            limit_per_mint: 100,
            decimals: 0,
            is_self_mint: false,
        };
        cache
            .insert_token_deploy(&data, &reveal_row("inscr1i0", "aa"), 840000)
            .unwrap();
        // The verifier consults the same map the deploy wrote to.
        assert!(cache.get_ticker("ordi").is_some());
        assert!(cache.get_ticker("OrDi").is_none());
    }
}
