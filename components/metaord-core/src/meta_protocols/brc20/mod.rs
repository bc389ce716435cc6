pub mod brc20_pg;
pub mod cache;
pub mod extras;
pub mod index;
pub mod models;
pub mod parser;
pub mod verifier;

use config::Network;

pub const EVENT_HASH_VERSION: i32 = 2;

/// Mainnet height at which 5-byte self-mint tickers become deployable.
pub const SELF_MINT_ENABLE_HEIGHT: u32 = 837090;

/// Largest representable token amount: `(2^64 - 1)` whole tokens scaled to 18 decimal places. Self-mint deploys with
/// `max == 0` are reinterpreted as this bound.
pub const MAX_AMOUNT_18DP: u128 = (u64::MAX as u128) * 10u128.pow(18);

pub fn brc20_activation_height(network: &Network) -> u32 {
    match network {
        Network::Mainnet => 779832,
        Network::Testnet => 2413343,
        Network::Testnet4 => 0,
        Network::Signet => 112402,
        Network::Regtest => 0,
    }
}

/// True for a non-empty all-ASCII-digits string. Used for the `dec` field.
pub fn is_positive_number(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// True for a non-empty decimal string of ASCII digits with at most one `.`, not at either end. Used for amount fields.
pub fn is_positive_number_with_dot(value: &str) -> bool {
    if value.is_empty() || value.starts_with('.') || value.ends_with('.') {
        return false;
    }
    let mut dot_found = false;
    for byte in value.bytes() {
        if !byte.is_ascii_digit() {
            if byte != b'.' {
                return false;
            }
            if dot_found {
                return false;
            }
            dot_found = true;
        }
    }
    true
}

/// Parses a decimal amount string into an integer scaled to 18 fractional digits. The fractional part must be non-empty
/// and no longer than the ticker's decimals. Returns `None` on malformed input or overflow; any value that overflows a
/// `u128` is far beyond `MAX_AMOUNT_18DP` and would be rejected anyway.
pub fn amount_to_18dp(value: &str, decimals: u8) -> Option<u128> {
    let scale = 10u128.pow(18);
    match value.split_once('.') {
        Some((integer_part, fractional_part)) => {
            if fractional_part.is_empty() || fractional_part.len() > decimals as usize {
                return None;
            }
            let integer: u128 = integer_part.parse().ok()?;
            let fractional: u128 = fractional_part.parse().ok()?;
            let fractional_scaled =
                fractional.checked_mul(10u128.pow(18 - fractional_part.len() as u32))?;
            integer.checked_mul(scale)?.checked_add(fractional_scaled)
        }
        None => value.parse::<u128>().ok()?.checked_mul(scale),
    }
}

/// Formats an 18dp-scaled amount the way the digest chain expects: the decimal string of the scaled integer, with a dot
/// placed so the fractional width equals the ticker's decimals, and the dot dropped at zero decimals. No other trimming
/// happens; the emitted bytes are hashed and must match every other node.
pub fn amount_to_decimals_str(amount: u128, decimals: u8) -> String {
    let mut num_str = amount.to_string();
    if num_str.len() <= 18 {
        num_str = format!("0.{:0>18}", num_str);
    } else {
        num_str.insert(num_str.len() - 18, '.');
    }
    if decimals < 18 {
        num_str.truncate(num_str.len() - (18 - decimals as usize));
    }
    if num_str.ends_with('.') {
        num_str.pop();
    }
    num_str
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::{
        amount_to_18dp, amount_to_decimals_str, is_positive_number, is_positive_number_with_dot,
        MAX_AMOUNT_18DP,
    };

    #[test_case("0" => true)]
    #[test_case("18" => true)]
    #[test_case("007" => true)]
    #[test_case("" => false; "empty string")]
    #[test_case("1.5" => false; "has decimal point")]
    #[test_case("-1" => false; "negative sign")]
    #[test_case(" 1" => false; "leading space")]
    #[test_case("١٢" => false; "non-ascii digits")]
    fn validates_positive_numbers(value: &str) -> bool {
        is_positive_number(value)
    }

    #[test_case("21000000" => true)]
    #[test_case("0.5" => true)]
    #[test_case("1.000000000000000001" => true)]
    #[test_case("" => false; "empty string")]
    #[test_case("." => false; "dot only")]
    #[test_case(".5" => false; "missing leading digit")]
    #[test_case("5." => false; "missing trailing digit")]
    #[test_case("1.2.3" => false; "two dots")]
    #[test_case("1,5" => false; "comma separator")]
    #[test_case("1e5" => false; "exponent notation")]
    fn validates_decimal_strings(value: &str) -> bool {
        is_positive_number_with_dot(value)
    }

    #[test_case("1000", 18 => Some(1000 * 10u128.pow(18)); "integer amount")]
    #[test_case("0", 18 => Some(0); "zero")]
    #[test_case("1.5", 18 => Some(15 * 10u128.pow(17)); "fractional amount")]
    #[test_case("1.5", 0 => None; "fraction rejected at zero decimals")]
    #[test_case("1.123", 2 => None; "fraction longer than decimals")]
    #[test_case("1.12", 2 => Some(1_120_000_000_000_000_000); "fraction at the decimals limit")]
    #[test_case("18446744073709551615", 18 => Some(MAX_AMOUNT_18DP); "amount upper bound")]
    #[test_case("999999999999999999999999999999999999999999", 18 => None; "u128 overflow")]
    fn extends_amounts_to_18_decimals(value: &str, decimals: u8) -> Option<u128> {
        amount_to_18dp(value, decimals)
    }

    #[test_case(5 * 10u128.pow(18), 18 => "5.000000000000000000"; "whole amount keeps full fractional width")]
    #[test_case(5 * 10u128.pow(18), 0 => "5"; "dot dropped at zero decimals")]
    #[test_case(5_250_000_000_000_000_000, 2 => "5.25"; "fraction truncated to decimals width")]
    #[test_case(1, 18 => "0.000000000000000001"; "smallest unit")]
    #[test_case(1, 0 => "0"; "smallest unit truncated away at zero decimals")]
    #[test_case(0, 18 => "0.000000000000000000"; "zero at full width")]
    #[test_case(1000 * 10u128.pow(18), 18 => "1000.000000000000000000"; "deploy max at default decimals")]
    #[test_case(MAX_AMOUNT_18DP, 18 => "18446744073709551615.000000000000000000"; "amount upper bound")]
    fn formats_amounts(amount: u128, decimals: u8) -> String {
        amount_to_decimals_str(amount, decimals)
    }

    #[test]
    fn formatting_round_trips_parsing() {
        for (value, decimals) in [("123.456", 6u8), ("1", 18), ("0.000001", 6)] {
            let scaled = amount_to_18dp(value, decimals).unwrap();
            let formatted = amount_to_decimals_str(scaled, decimals);
            assert_eq!(amount_to_18dp(&formatted, decimals).unwrap(), scaled);
        }
    }
}
