//! Minimal Solana JSON-RPC reader: raw account data and token supply, which
//! is all the hedge calculators need.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};

use super::default_client;

pub struct SolanaRpc {
    client: Client,
    url: String,
}

impl SolanaRpc {
    pub fn new(url: &str) -> Self {
        SolanaRpc {
            client: default_client(),
            url: url.to_string(),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let resp: Value = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .with_context(|| format!("POST solana rpc {method}"))?
            .error_for_status()
            .context("solana rpc status")?
            .json()
            .await
            .context("parse solana rpc response")?;

        if let Some(error) = resp.get("error") {
            bail!("solana rpc error for {method}: {error}");
        }
        Ok(resp["result"].clone())
    }

    /// Raw bytes of an account, base64-decoded.
    pub async fn account_data(&self, pubkey: &str) -> Result<Vec<u8>> {
        let result = self
            .call(
                "getAccountInfo",
                json!([pubkey, { "encoding": "base64" }]),
            )
            .await?;

        let encoded = result["value"]["data"][0]
            .as_str()
            .with_context(|| format!("no account data for {pubkey}"))?;
        BASE64
            .decode(encoded)
            .with_context(|| format!("invalid base64 account data for {pubkey}"))
    }

    /// UI-scaled total supply of a token mint.
    pub async fn token_supply(&self, mint: &str) -> Result<f64> {
        let result = self.call("getTokenSupply", json!([mint])).await?;

        let amount: f64 = result["value"]["amount"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .with_context(|| format!("no supply amount for {mint}"))?;
        let decimals = result["value"]["decimals"]
            .as_u64()
            .with_context(|| format!("no supply decimals for {mint}"))?;

        Ok(amount / 10f64.powi(decimals as i32))
    }
}

/// Little-endian u64 at a fixed offset into account data.
pub fn read_u64_le(data: &[u8], offset: usize) -> Result<u64> {
    let end = offset
        .checked_add(8)
        .context("u64 offset overflows")?;
    if data.len() < end {
        bail!(
            "account data too short: need {} bytes, have {}",
            end,
            data.len()
        );
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..end]);
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_u64_at_offset() {
        let mut data = vec![0u8; 24];
        data[8..16].copy_from_slice(&1_234_567_890u64.to_le_bytes());

        assert_eq!(read_u64_le(&data, 8).unwrap(), 1_234_567_890);
        assert_eq!(read_u64_le(&data, 0).unwrap(), 0);
        assert!(read_u64_le(&data, 17).is_err());
        assert!(read_u64_le(&data, usize::MAX).is_err());
    }
}
