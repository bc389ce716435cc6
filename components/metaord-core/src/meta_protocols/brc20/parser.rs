use serde_json::Value;

use super::{is_positive_number, is_positive_number_with_dot};

/// A structurally valid BRC-20 inscription body. Amounts stay as raw strings; the verifier resolves them against the
/// ticker's decimals because the scale is stateful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedBrc20Operation {
    Deploy(ParsedBrc20TokenDeploy),
    Mint(ParsedBrc20BalanceOp),
    Transfer(ParsedBrc20BalanceOp),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBrc20TokenDeploy {
    pub tick: String,
    pub max: String,
    pub lim: Option<String>,
    pub dec: Option<u8>,
    pub self_mint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBrc20BalanceOp {
    pub tick: String,
    pub amt: String,
}

/// Decodes the upstream's hex-encoded content type, lowercases it and strips parameters after the first `;`. Only
/// `application/json` and `text/plain` bodies can carry BRC-20 operations.
pub fn normalize_content_type(content_type_hex: &str) -> Option<String> {
    let bytes = hex::decode(content_type_hex).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    let lowered = decoded.to_lowercase();
    Some(lowered.split(';').next()?.to_string())
}

/// Parses an upstream-provided JSON body into a BRC-20 operation. `None` means the inscription is silently ignored; any
/// missing field, non-string value, bad tick length or malformed number disqualifies it.
pub fn parse_brc20_operation(content: &Value) -> Option<ParsedBrc20Operation> {
    let tick = content.get("tick")?.as_str()?;
    let op = content.get("op")?.as_str()?;
    let tick_byte_len = tick.len();
    if tick_byte_len != 4 && tick_byte_len != 5 {
        return None;
    }
    match op {
        "deploy" => {
            let max = content.get("max")?.as_str()?;
            if !is_positive_number_with_dot(max) {
                return None;
            }
            let dec = match content.get("dec") {
                Some(dec) => {
                    let dec = dec.as_str()?;
                    if !is_positive_number(dec) {
                        return None;
                    }
                    let dec: u8 = dec.parse().ok()?;
                    if dec > 18 {
                        return None;
                    }
                    Some(dec)
                }
                None => None,
            };
            let lim = match content.get("lim") {
                Some(lim) => {
                    let lim = lim.as_str()?;
                    if !is_positive_number_with_dot(lim) {
                        return None;
                    }
                    Some(lim.to_string())
                }
                None => None,
            };
            let self_mint = content.get("self_mint").and_then(|v| v.as_str()) == Some("true");
            Some(ParsedBrc20Operation::Deploy(ParsedBrc20TokenDeploy {
                tick: tick.to_string(),
                max: max.to_string(),
                lim,
                dec,
                self_mint,
            }))
        }
        "mint" | "transfer" => {
            let amt = content.get("amt")?.as_str()?;
            if !is_positive_number_with_dot(amt) {
                return None;
            }
            let op_data = ParsedBrc20BalanceOp {
                tick: tick.to_string(),
                amt: amt.to_string(),
            };
            if op == "mint" {
                Some(ParsedBrc20Operation::Mint(op_data))
            } else {
                Some(ParsedBrc20Operation::Transfer(op_data))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use test_case::test_case;

    use super::{normalize_content_type, parse_brc20_operation, ParsedBrc20Operation};

    #[test_case("6170706c69636174696f6e2f6a736f6e" => Some("application/json".to_string()); "json")]
    #[test_case("746578742f706c61696e3b636861727365743d7574662d38" => Some("text/plain".to_string()); "plain with charset param")]
    #[test_case("544558542f504c41494e" => Some("text/plain".to_string()); "uppercase folded")]
    #[test_case("696d6167652f706e67" => Some("image/png".to_string()); "other type decodes")]
    #[test_case("zz" => None; "invalid hex")]
    #[test_case("ff" => None; "invalid utf8")]
    fn normalizes_content_types(content_type_hex: &str) -> Option<String> {
        normalize_content_type(content_type_hex)
    }

    #[test]
    fn parses_a_deploy() {
        let content = json!({"p": "brc-20", "op": "deploy", "tick": "ordi", "max": "21000000", "lim": "1000"});
        let Some(ParsedBrc20Operation::Deploy(deploy)) = parse_brc20_operation(&content) else {
            panic!();
        };
        assert_eq!(deploy.tick, "ordi");
        assert_eq!(deploy.max, "21000000");
        assert_eq!(deploy.lim, Some("1000".to_string()));
        assert_eq!(deploy.dec, None);
        assert!(!deploy.self_mint);
    }

    #[test]
    fn parses_a_self_mint_deploy() {
        let content = json!({"p": "brc-20", "op": "deploy", "tick": "ordix", "max": "0", "lim": "0", "self_mint": "true"});
        let Some(ParsedBrc20Operation::Deploy(deploy)) = parse_brc20_operation(&content) else {
            panic!();
        };
        assert!(deploy.self_mint);
        assert_eq!(deploy.tick.len(), 5);
    }

    #[test_case(json!({"op": "mint", "tick": "ordi", "amt": "5"}) => matches Some(ParsedBrc20Operation::Mint(_)); "mint")]
    #[test_case(json!({"op": "transfer", "tick": "ordi", "amt": "5"}) => matches Some(ParsedBrc20Operation::Transfer(_)); "transfer")]
    #[test_case(json!({"op": "mint", "tick": "ordi"}) => None; "mint without amt")]
    #[test_case(json!({"op": "mint", "tick": "ordi", "amt": "5.0.0"}) => None; "malformed amt")]
    #[test_case(json!({"op": "mint", "tick": "ordi", "amt": 5}) => None; "non-string amt")]
    #[test_case(json!({"op": "mint", "tick": "abc", "amt": "5"}) => None; "three byte tick")]
    #[test_case(json!({"op": "mint", "tick": "abcdef", "amt": "5"}) => None; "six byte tick")]
    #[test_case(json!({"op": "mint", "tick": 4, "amt": "5"}) => None; "non-string tick")]
    #[test_case(json!({"op": "burn", "tick": "ordi", "amt": "5"}) => None; "unknown op")]
    #[test_case(json!({"tick": "ordi", "amt": "5"}) => None; "missing op")]
    #[test_case(json!({"op": "deploy", "tick": "ordi"}) => None; "deploy without max")]
    #[test_case(json!({"op": "deploy", "tick": "ordi", "max": "100", "dec": "19"}) => None; "decimals above 18")]
    #[test_case(json!({"op": "deploy", "tick": "ordi", "max": "100", "dec": "1.5"}) => None; "fractional decimals")]
    #[test_case(json!({"op": "deploy", "tick": "ordi", "max": "100", "lim": "x"}) => None; "malformed lim")]
    fn parses_operations(content: serde_json::Value) -> Option<ParsedBrc20Operation> {
        parse_brc20_operation(&content)
    }

    #[test]
    fn utf8_tick_length_is_counted_in_bytes() {
        // Two 2-byte characters make a valid 4-byte tick.
        let content = json!({"op": "mint", "tick": "éé", "amt": "5"});
        assert!(parse_brc20_operation(&content).is_some());
        // A 4-character tick of 2-byte characters is 8 bytes and invalid.
        let content = json!({"op": "mint", "tick": "éééé", "amt": "5"});
        assert!(parse_brc20_operation(&content).is_none());
    }
}
