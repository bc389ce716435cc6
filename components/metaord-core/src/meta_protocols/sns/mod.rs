pub mod sns_pg;

use deadpool_postgres::{Object, Transaction};
use serde_json::{Map, Value};

use crate::core::upstream::UpstreamSource;
use crate::core::{Protocol, EVENT_SEPARATOR};
use crate::service::ProtocolIndexer;
use crate::utils::Context;
use crate::{try_debug, try_info, try_warn};

const MAX_NAME_BYTE_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnsNameRegistration {
    pub name: String,
    pub domain: String,
}

/// Lowercases, takes the first whitespace-delimited token, and rejects all-whitespace values.
fn first_token_lowercased(value: &str) -> Option<String> {
    Some(value.to_lowercase().split_whitespace().next()?.to_string())
}

/// A name has exactly one dot; the suffix after it is the namespace binding.
fn finish_name(candidate: &str) -> Option<SnsNameRegistration> {
    let name = first_token_lowercased(candidate)?;
    if name.matches('.').count() != 1 {
        return None;
    }
    let domain = name.split('.').nth(1)?.to_string();
    Some(SnsNameRegistration { name, domain })
}

/// A namespace has no dot at all.
fn finish_namespace(candidate: &str) -> Option<String> {
    let namespace = first_token_lowercased(candidate)?;
    if namespace.contains('.') {
        return None;
    }
    Some(namespace)
}

fn object_name_candidate(map: &Map<String, Value>) -> Option<&str> {
    if map.get("p")?.as_str()? != "sns" {
        return None;
    }
    if map.get("op")?.as_str()? != "reg" {
        return None;
    }
    map.get("name")?.as_str()
}

fn object_namespace_candidate(map: &Map<String, Value>) -> Option<&str> {
    if map.get("p")?.as_str()? != "sns" {
        return None;
    }
    if map.get("op")?.as_str()? != "ns" {
        return None;
    }
    map.get("ns")?.as_str()
}

/// Extracts a name registration from raw inscription content. Valid JSON5 objects must be well-formed `sns`/`reg`
/// payloads; content that does not parse as JSON5 (or parses to a bare number, boolean or null) is itself the
/// registration candidate, which is how plain-text names like `myname.sats` register.
pub fn parse_name(content: &str) -> Option<SnsNameRegistration> {
    let candidate = match json5::from_str::<Value>(content) {
        Ok(Value::Object(map)) => object_name_candidate(&map)?.to_string(),
        Ok(Value::String(_)) | Ok(Value::Array(_)) => return None,
        Ok(_) | Err(_) => content.to_string(),
    };
    finish_name(&candidate)
}

pub fn parse_namespace(content: &str) -> Option<String> {
    let candidate = match json5::from_str::<Value>(content) {
        Ok(Value::Object(map)) => object_namespace_candidate(&map)?.to_string(),
        Ok(Value::String(_)) | Ok(Value::Array(_)) => return None,
        Ok(_) | Err(_) => content.to_string(),
    };
    finish_namespace(&candidate)
}

/// Strict variants used when the upstream already parsed the content as JSON: no plain-text fallback.
pub fn parse_name_from_json(value: &Value) -> Option<SnsNameRegistration> {
    let Value::Object(map) = value else {
        return None;
    };
    finish_name(object_name_candidate(map)?)
}

pub fn parse_namespace_from_json(value: &Value) -> Option<String> {
    let Value::Object(map) = value else {
        return None;
    };
    finish_namespace(object_namespace_candidate(map)?)
}

/// The upstream LIKE filter is a prefix match over hex; re-check that any parameters start right after the media type.
fn is_sns_content_type(content_type_hex: &str) -> bool {
    let Ok(bytes) = hex::decode(content_type_hex) else {
        return false;
    };
    let Ok(content_type) = String::from_utf8(bytes) else {
        return false;
    };
    content_type == "text/plain"
        || content_type == "application/json"
        || content_type.starts_with("text/plain;")
        || content_type.starts_with("application/json;")
}

pub fn get_register_event_string(registration: &SnsNameRegistration, inscription_id: &str) -> String {
    format!(
        "register;{};{};{}",
        inscription_id, registration.name, registration.domain
    )
}

pub fn get_ns_register_event_string(namespace: &str, inscription_id: &str) -> String {
    format!("ns_register;{inscription_id};{namespace}")
}

/// Applies one block of SNS registrations, first-valid-wins per name and per namespace in ascending inscription number
/// order. A name candidate shadows a namespace candidate from the same inscription.
pub async fn index_block(
    block_height: u32,
    upstream: &UpstreamSource,
    db_tx: &Transaction<'_>,
    ctx: &Context,
) -> Result<String, String> {
    let inscriptions = upstream.text_inscriptions(block_height).await?;
    let mut events: Vec<String> = vec![];
    for inscription in inscriptions.iter() {
        if !is_sns_content_type(&inscription.content_type) {
            continue;
        }
        let mut name = None;
        let mut namespace = None;
        if let Some(text_hex) = &inscription.text_content {
            if let Some(content) = hex::decode(text_hex)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
            {
                name = parse_name(&content);
                namespace = parse_namespace(&content);
            }
        }
        if let Some(content) = &inscription.content {
            name = parse_name_from_json(content);
            namespace = parse_namespace_from_json(content);
        }
        if let Some(registration) = name {
            if registration.name.contains('\0') {
                continue;
            }
            if registration.name.len() > MAX_NAME_BYTE_LEN {
                try_warn!(ctx, "Name is too long, skipping: {}", registration.name);
                continue;
            }
            if !sns_pg::insert_name(inscription, &registration, block_height, db_tx).await? {
                try_debug!(ctx, "Name already registered: {}", registration.name);
                continue;
            }
            try_info!(
                ctx,
                "SNS name {} registered by {} at block {block_height}",
                registration.name,
                inscription.inscription_id
            );
            events.push(get_register_event_string(
                &registration,
                &inscription.inscription_id,
            ));
        } else if let Some(namespace) = namespace {
            if namespace.contains('\0') {
                continue;
            }
            if namespace.len() > MAX_NAME_BYTE_LEN {
                try_warn!(ctx, "Namespace is too long, skipping: {namespace}");
                continue;
            }
            if !sns_pg::insert_namespace(inscription, &namespace, block_height, db_tx).await? {
                try_debug!(ctx, "Namespace already registered: {namespace}");
                continue;
            }
            try_info!(
                ctx,
                "SNS namespace {namespace} registered by {} at block {block_height}",
                inscription.inscription_id
            );
            events.push(get_ns_register_event_string(
                &namespace,
                &inscription.inscription_id,
            ));
        }
    }
    Ok(events.join(EVENT_SEPARATOR))
}

/// The SNS adapter plugged into the shared replay engine.
pub struct SnsIndexer;

impl ProtocolIndexer for SnsIndexer {
    fn protocol(&self) -> Protocol {
        Protocol::Sns
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
        sns_pg::roll_back(ancestor_height, db_tx).await
    }

    async fn residue_block_height(&self, client: &Object) -> Result<Option<u32>, String> {
        let height = sns_pg::get_max_protocol_block_height(client).await?;
        Ok(height.map(|h| h as u32))
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use test_case::test_case;

    use super::{
        parse_name, parse_name_from_json, parse_namespace, parse_namespace_from_json,
        SnsNameRegistration,
    };

    fn reg(name: &str, domain: &str) -> Option<SnsNameRegistration> {
        Some(SnsNameRegistration {
            name: name.to_string(),
            domain: domain.to_string(),
        })
    }

    #[test]
    fn parses_a_json_registration() {
        let content = r#"{"p":"sns","op":"reg","name":"Satoshi.sats"}"#;
        assert_eq!(parse_name(content), reg("satoshi.sats", "sats"));
    }

    #[test]
    fn parses_json5_with_comments_and_trailing_commas() {
        let content = "{p: 'sns', op: 'reg', name: 'satoshi.sats', /* registered early */ }";
        assert_eq!(parse_name(content), reg("satoshi.sats", "sats"));
    }

    #[test_case(r#"{"p":"sns","op":"reg","name":"a.b.c"}"# => None; "two dots")]
    #[test_case(r#"{"p":"sns","op":"reg","name":"nodots"}"# => None; "no dot")]
    #[test_case(r#"{"p":"sns","op":"reg","name":42}"# => None; "non-string name")]
    #[test_case(r#"{"p":"other","op":"reg","name":"a.b"}"# => None; "wrong protocol")]
    #[test_case(r#"{"p":"sns","op":"ns","name":"a.b"}"# => None; "wrong op")]
    #[test_case(r#"{"p":"sns","op":"reg"}"# => None; "missing name")]
    fn rejects_malformed_json_registrations(content: &str) -> Option<SnsNameRegistration> {
        parse_name(content)
    }

    #[test]
    fn plain_text_content_is_the_registration_candidate() {
        assert_eq!(parse_name("MyName.sats"), reg("myname.sats", "sats"));
        assert_eq!(
            parse_name("first.sats second.sats"),
            reg("first.sats", "sats")
        );
        assert_eq!(parse_name("  \n\t "), None);
        assert_eq!(parse_name("a.b.c"), None);
    }

    #[test]
    fn bare_json5_strings_and_arrays_do_not_fall_back() {
        assert_eq!(parse_name("\"quoted.sats\""), None);
        assert_eq!(parse_name("[\"a.b\"]"), None);
        // Bare numbers fail the object checks with a type error and fall back to the raw content.
        assert_eq!(parse_name("123.456"), reg("123.456", "456"));
    }

    #[test]
    fn whitespace_splits_before_the_dot_count() {
        assert_eq!(parse_name("one.two three.four.five"), reg("one.two", "two"));
        assert_eq!(parse_name("one.two.three four.five"), None);
    }

    #[test]
    fn parses_namespaces() {
        assert_eq!(
            parse_namespace(r#"{"p":"sns","op":"ns","ns":"Sats"}"#),
            Some("sats".to_string())
        );
        assert_eq!(parse_namespace(r#"{"p":"sns","op":"ns","ns":"a.b"}"#), None);
        assert_eq!(parse_namespace("plainspace"), Some("plainspace".to_string()));
        assert_eq!(parse_namespace("dotted.space"), None);
    }

    #[test]
    fn jsonb_content_has_no_plain_text_fallback() {
        assert_eq!(parse_name_from_json(&json!("text.sats")), None);
        assert_eq!(parse_name_from_json(&json!(123.456)), None);
        assert_eq!(
            parse_name_from_json(&json!({"p":"sns","op":"reg","name":"A.b"})),
            reg("a.b", "b")
        );
        assert_eq!(parse_namespace_from_json(&json!("plainspace")), None);
        assert_eq!(
            parse_namespace_from_json(&json!({"p":"sns","op":"ns","ns":"space"})),
            Some("space".to_string())
        );
    }

    #[test]
    fn name_wins_over_namespace_for_the_same_content() {
        // Dotted plain text is a name candidate and not a namespace; dotless is the reverse.
        assert!(parse_name("a.b").is_some() && parse_namespace("a.b").is_none());
        assert!(parse_name("ab").is_none() && parse_namespace("ab").is_some());
    }
}
