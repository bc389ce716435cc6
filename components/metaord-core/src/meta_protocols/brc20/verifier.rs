use deadpool_postgres::Transaction;

use crate::core::upstream::OrdTransferRow;
use crate::utils::Context;

use super::cache::Brc20MemoryCache;
use super::models::Ticker;
use super::parser::{ParsedBrc20BalanceOp, ParsedBrc20Operation, ParsedBrc20TokenDeploy};
use super::{amount_to_18dp, MAX_AMOUNT_18DP, SELF_MINT_ENABLE_HEIGHT};

/// A BRC-20 operation that passed every validity rule and is ready to mutate state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedBrc20Operation {
    TokenDeploy(VerifiedBrc20TokenDeploy),
    TokenMint(VerifiedBrc20BalanceData),
    TokenTransferInscribe(VerifiedBrc20BalanceData),
    TokenTransferSend(VerifiedBrc20TransferSend),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedBrc20TokenDeploy {
    pub tick: String,
    pub original_tick: String,
    pub max_supply: u128,
    pub limit_per_mint: u128,
    pub decimals: u8,
    pub is_self_mint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedBrc20BalanceData {
    pub tick: String,
    pub original_tick: String,
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedBrc20TransferSend {
    pub tick: String,
    pub original_tick: String,
    pub amount: u128,
    pub sent_as_fee: bool,
}

/// Resolves the numeric terms of a deploy. Self-mint tickers are 5 bytes, gated by height and the `self_mint` field, and
/// reinterpret `max == 0` (and a then-zero `lim`) as the representable upper bound. The zero checks for `max` and `lim`
/// run after that rewrite. Returns `(max_supply, limit_per_mint, decimals, is_self_mint)`.
pub fn resolve_deploy_terms(
    deploy: &ParsedBrc20TokenDeploy,
    block_height: u32,
) -> Option<(u128, u128, u8, bool)> {
    let decimals = deploy.dec.unwrap_or(18);
    let mut max_supply = amount_to_18dp(&deploy.max, decimals)?;
    if max_supply > MAX_AMOUNT_18DP {
        return None;
    }
    let mut limit_per_mint = match &deploy.lim {
        Some(lim) => {
            let lim = amount_to_18dp(lim, decimals)?;
            if lim > MAX_AMOUNT_18DP {
                return None;
            }
            lim
        }
        None => max_supply,
    };
    let mut is_self_mint = false;
    if deploy.tick.len() == 5 {
        if block_height < SELF_MINT_ENABLE_HEIGHT {
            return None;
        }
        if !deploy.self_mint {
            return None;
        }
        is_self_mint = true;
        if max_supply == 0 {
            max_supply = MAX_AMOUNT_18DP;
            if limit_per_mint == 0 {
                limit_per_mint = MAX_AMOUNT_18DP;
            }
        }
    }
    if max_supply == 0 {
        return None;
    }
    if limit_per_mint == 0 {
        return None;
    }
    Some((max_supply, limit_per_mint, decimals, is_self_mint))
}

/// Resolves a mint against the ticker: amount within the per-mint limit, clipped to the remaining supply, and carrying
/// the deploy inscription as parent for self-mint tokens.
pub fn resolve_mint_amount(amt: &str, ticker: &Ticker, parent_id: &str) -> Option<u128> {
    let amount = amount_to_18dp(amt, ticker.decimals)?;
    if amount == 0 || amount > MAX_AMOUNT_18DP {
        return None;
    }
    if ticker.remaining_supply == 0 {
        return None;
    }
    if amount > ticker.limit_per_mint {
        return None;
    }
    let amount = amount.min(ticker.remaining_supply);
    if ticker.is_self_mint && parent_id != ticker.deploy_inscription_id {
        return None;
    }
    Some(amount)
}

/// Parses a transfer amount against the ticker's decimals and bounds. Balance and used-transfer checks are stateful and
/// stay with the caller.
pub fn resolve_transfer_amount(amt: &str, ticker: &Ticker) -> Option<u128> {
    let amount = amount_to_18dp(amt, ticker.decimals)?;
    if amount == 0 || amount > MAX_AMOUNT_18DP {
        return None;
    }
    Some(amount)
}

/// Applies the BRC-20 validity rules to a parsed operation. `Ok(None)` is the expected case: the inscription is silently
/// ignored for the protocol. Errors are infrastructure failures only.
pub async fn verify_brc20_operation(
    parsed: &ParsedBrc20Operation,
    row: &OrdTransferRow,
    block_height: u32,
    cache: &mut Brc20MemoryCache,
    db_tx: &Transaction<'_>,
    _ctx: &Context,
) -> Result<Option<VerifiedBrc20Operation>, String> {
    match parsed {
        ParsedBrc20Operation::Deploy(deploy) => {
            if !row.old_satpoint.is_empty() {
                return Ok(None);
            }
            let tick = deploy.tick.to_lowercase();
            if cache.get_ticker(&tick).is_some() {
                return Ok(None);
            }
            let Some((max_supply, limit_per_mint, decimals, is_self_mint)) =
                resolve_deploy_terms(deploy, block_height)
            else {
                return Ok(None);
            };
            Ok(Some(VerifiedBrc20Operation::TokenDeploy(
                VerifiedBrc20TokenDeploy {
                    tick,
                    original_tick: deploy.tick.clone(),
                    max_supply,
                    limit_per_mint,
                    decimals,
                    is_self_mint,
                },
            )))
        }
        ParsedBrc20Operation::Mint(mint) => {
            if !row.old_satpoint.is_empty() {
                return Ok(None);
            }
            let tick = mint.tick.to_lowercase();
            let Some(ticker) = cache.get_ticker(&tick) else {
                return Ok(None);
            };
            let parent_id = row.parent_id.as_deref().unwrap_or("");
            let Some(amount) = resolve_mint_amount(&mint.amt, ticker, parent_id) else {
                return Ok(None);
            };
            Ok(Some(VerifiedBrc20Operation::TokenMint(
                VerifiedBrc20BalanceData {
                    tick,
                    original_tick: mint.tick.clone(),
                    amount,
                },
            )))
        }
        ParsedBrc20Operation::Transfer(transfer) => {
            let tick = transfer.tick.to_lowercase();
            let Some(ticker) = cache.get_ticker(&tick) else {
                return Ok(None);
            };
            let Some(amount) = resolve_transfer_amount(&transfer.amt, ticker) else {
                return Ok(None);
            };
            if row.old_satpoint.is_empty() {
                let available = cache
                    .get_available_balance(&row.new_pkscript, &tick, db_tx)
                    .await?;
                if available < amount {
                    return Ok(None);
                }
                Ok(Some(VerifiedBrc20Operation::TokenTransferInscribe(
                    VerifiedBrc20BalanceData {
                        tick,
                        original_tick: transfer.tick.clone(),
                        amount,
                    },
                )))
            } else {
                if cache.is_used_or_invalid(&row.inscription_id, db_tx).await? {
                    return Ok(None);
                }
                Ok(Some(VerifiedBrc20Operation::TokenTransferSend(
                    VerifiedBrc20TransferSend {
                        tick,
                        original_tick: transfer.tick.clone(),
                        amount,
                        sent_as_fee: row.sent_as_fee,
                    },
                )))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use crate::meta_protocols::brc20::models::Ticker;
    use crate::meta_protocols::brc20::parser::ParsedBrc20TokenDeploy;
    use crate::meta_protocols::brc20::{MAX_AMOUNT_18DP, SELF_MINT_ENABLE_HEIGHT};

    use super::{resolve_deploy_terms, resolve_mint_amount, resolve_transfer_amount};

    fn deploy(tick: &str, max: &str, lim: Option<&str>, dec: Option<u8>, self_mint: bool) -> ParsedBrc20TokenDeploy {
        ParsedBrc20TokenDeploy {
            tick: tick.to_string(),
            max: max.to_string(),
            lim: lim.map(|l| l.to_string()),
            dec,
            self_mint,
        }
    }

    #[test]
    fn resolves_a_plain_deploy() {
        let terms = resolve_deploy_terms(&deploy("ordi", "1000", Some("10"), None, false), 800000);
        assert_eq!(
            terms,
            Some((1000 * 10u128.pow(18), 10 * 10u128.pow(18), 18, false))
        );
    }

    #[test]
    fn limit_defaults_to_max_supply() {
        let terms = resolve_deploy_terms(&deploy("ordi", "21000000", None, Some(8), false), 800000);
        assert_eq!(
            terms,
            Some((21000000 * 10u128.pow(18), 21000000 * 10u128.pow(18), 8, false))
        );
    }

    #[test_case("0", None => None; "zero max without self mint")]
    #[test_case("100", Some("0") => None; "explicit zero limit without self mint")]
    #[test_case("18446744073709551616", None => None; "max above the bound")]
    fn rejects_bad_deploys(max: &str, lim: Option<&str>) -> Option<(u128, u128, u8, bool)> {
        resolve_deploy_terms(&deploy("ordi", max, lim, None, false), 900000)
    }

    #[test]
    fn self_mint_zero_max_becomes_the_upper_bound() {
        let terms = resolve_deploy_terms(
            &deploy("ordix", "0", Some("0"), None, true),
            SELF_MINT_ENABLE_HEIGHT,
        );
        assert_eq!(terms, Some((MAX_AMOUNT_18DP, MAX_AMOUNT_18DP, 18, true)));
    }

    #[test]
    fn self_mint_requires_the_enable_height() {
        let terms = resolve_deploy_terms(
            &deploy("ordix", "0", Some("0"), None, true),
            SELF_MINT_ENABLE_HEIGHT - 1,
        );
        assert_eq!(terms, None);
    }

    #[test]
    fn five_byte_tick_requires_the_self_mint_field() {
        let terms = resolve_deploy_terms(&deploy("ordix", "100", None, None, false), 900000);
        assert_eq!(terms, None);
    }

    #[test]
    fn four_byte_tick_ignores_the_self_mint_field() {
        // A 4-byte deploy carrying self_mint deploys as a regular token.
        let terms = resolve_deploy_terms(&deploy("ordi", "100", None, None, true), 900000);
        assert_eq!(terms, Some((100 * 10u128.pow(18), 100 * 10u128.pow(18), 18, false)));
    }

    fn ticker(remaining: u128, limit: u128, decimals: u8, self_mint: bool) -> Ticker {
        Ticker {
            tick: "ordi".to_string(),
            remaining_supply: remaining,
            limit_per_mint: limit,
            decimals,
            is_self_mint: self_mint,
            deploy_inscription_id: "deployi0".to_string(),
        }
    }

    #[test]
    fn mint_clips_to_remaining_supply() {
        let t = ticker(3 * 10u128.pow(18), 10 * 10u128.pow(18), 18, false);
        assert_eq!(resolve_mint_amount("5", &t, ""), Some(3 * 10u128.pow(18)));
    }

    #[test_case(0 => None; "mint ended")]
    #[test_case(10u128.pow(18) => Some(10u128.pow(18)); "mint within supply")]
    fn mint_respects_remaining_supply(remaining: u128) -> Option<u128> {
        let t = ticker(remaining, 10 * 10u128.pow(18), 18, false);
        resolve_mint_amount("1", &t, "")
    }

    #[test]
    fn mint_rejects_amounts_above_the_limit() {
        let t = ticker(100 * 10u128.pow(18), 10 * 10u128.pow(18), 18, false);
        assert_eq!(resolve_mint_amount("11", &t, ""), None);
    }

    #[test]
    fn self_mint_requires_the_deploy_parent() {
        let t = ticker(100 * 10u128.pow(18), 10 * 10u128.pow(18), 18, true);
        assert_eq!(resolve_mint_amount("1", &t, "otheri0"), None);
        assert_eq!(
            resolve_mint_amount("1", &t, "deployi0"),
            Some(10u128.pow(18))
        );
    }

    #[test]
    fn mint_amount_uses_the_ticker_decimals() {
        let t = ticker(100 * 10u128.pow(18), 10 * 10u128.pow(18), 2, false);
        assert_eq!(resolve_mint_amount("0.123", &t, ""), None);
        assert_eq!(
            resolve_mint_amount("0.12", &t, ""),
            Some(120_000_000_000_000_000)
        );
    }

    #[test_case("0" => None; "zero transfer")]
    #[test_case("5" => Some(5 * 10u128.pow(18)); "valid transfer")]
    fn transfer_amounts_are_bounded(amt: &str) -> Option<u128> {
        let t = ticker(100 * 10u128.pow(18), 10 * 10u128.pow(18), 18, false);
        resolve_transfer_amount(amt, &t)
    }
}
