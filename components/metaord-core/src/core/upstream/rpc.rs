use serde_json::{json, Value};

use super::OrdBitmapInscriptionRow;

/// JSON-RPC 2.0 client for the alternate ord upstream. Exposes the same chain data as the metaprotocol database for
/// deployments where the bitmap indexer has no direct database access.
pub struct OrdRpcClient {
    url: String,
    client: reqwest::Client,
}

impl OrdRpcClient {
    pub fn new(url: &str) -> OrdRpcClient {
        OrdRpcClient {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, String> {
        let mut body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
        });
        if let Some(params) = params {
            body["params"] = params;
        }
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("{method}: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("{method}: status code {}", response.status()));
        }
        let frame: Value = response
            .json()
            .await
            .map_err(|e| format!("{method}: invalid json response: {e}"))?;
        if let Some(error) = frame.get("error") {
            if !error.is_null() {
                return Err(format!("{method}: {error}"));
            }
        }
        frame
            .get("result")
            .cloned()
            .ok_or(format!("{method}: no result in response"))
    }

    pub async fn get_latest_block_height(&self) -> Result<u32, String> {
        let result = self.call("getLatestBlockHeight", None).await?;
        result
            .as_u64()
            .map(|h| h as u32)
            .ok_or("getLatestBlockHeight: result is not a block height".to_string())
    }

    pub async fn get_block_hash(&self, block_height: u32) -> Result<Option<String>, String> {
        let result = self
            .call("getBlockHashAndTs", Some(json!([block_height])))
            .await?;
        Ok(result
            .get("block_hash")
            .and_then(|h| h.as_str())
            .map(|h| h.to_string()))
    }

    pub async fn get_block_bitmap_inscriptions(
        &self,
        block_height: u32,
    ) -> Result<Vec<OrdBitmapInscriptionRow>, String> {
        let result = self
            .call("getBlockBitmapInscrs", Some(json!([block_height])))
            .await?;
        let entries = result
            .as_array()
            .ok_or("getBlockBitmapInscrs: result is not an array".to_string())?;
        let mut inscriptions = vec![];
        for entry in entries.iter() {
            let inscription_id = entry
                .get("inscription_id")
                .and_then(|v| v.as_str())
                .ok_or("getBlockBitmapInscrs: entry without inscription_id".to_string())?;
            let content_hex = entry
                .get("content_hex")
                .and_then(|v| v.as_str())
                .ok_or("getBlockBitmapInscrs: entry without content_hex".to_string())?;
            let inscription_number = entry
                .get("inscription_number")
                .and_then(|v| v.as_i64())
                .ok_or("getBlockBitmapInscrs: entry without inscription_number".to_string())?;
            inscriptions.push(OrdBitmapInscriptionRow {
                inscription_id: inscription_id.to_string(),
                inscription_number,
                content_hex: content_hex.to_string(),
            });
        }
        Ok(inscriptions)
    }
}
