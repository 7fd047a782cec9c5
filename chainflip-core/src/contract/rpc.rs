use super::{abi, ChainFlipContract, ContractValue, RawLog, ReadCall, WriteCall};
use crate::config::ClientConfig;
use crate::error::{ChainFlipError, Result};
use crate::types::{Address, TxHash};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Wallet rejection code from EIP-1193.
const USER_REJECTED: i64 = 4001;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    topics: Vec<String>,
    data: String,
    block_number: Option<String>,
    log_index: Option<String>,
    transaction_hash: Option<String>,
}

/// ChainFlip contract reached through a JSON-RPC node.
///
/// Writes go through `eth_sendTransaction`, so the sending account must be
/// managed by the node (local dev chains, or a signing proxy in front of it).
pub struct RpcContract {
    client: reqwest::Client,
    rpc_url: String,
    address: Address,
    next_id: AtomicU64,
}

impl RpcContract {
    pub fn new(rpc_url: &str, address: Address, timeout: Duration) -> Result<Self> {
        if rpc_url.is_empty() {
            return Err(ChainFlipError::config("RPC URL cannot be empty"));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            address,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let address = config.contract_address()?;
        Self::new(&config.rpc_url, address, config.request_timeout)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::debug!("rpc {} #{}", method, id);

        let response: RpcResponse<T> = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(map_rpc_error(error));
        }

        response
            .result
            .ok_or_else(|| ChainFlipError::rpc(format!("{} returned no result", method)))
    }
}

fn map_rpc_error(error: RpcErrorObject) -> ChainFlipError {
    if error.code == USER_REJECTED {
        return ChainFlipError::rejected(error.message);
    }

    let revert_data = error
        .data
        .as_ref()
        .and_then(|d| match d {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get("data").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .and_then(|s| decode_hex(&s).ok());

    if let Some(reason) = revert_data.as_deref().and_then(abi::decode_revert_reason) {
        return ChainFlipError::reverted(reason);
    }

    if error.message.to_ascii_lowercase().contains("revert") {
        return ChainFlipError::reverted(error.message);
    }

    ChainFlipError::rpc(format!("{} (code {})", error.message, error.code))
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let digits = s.trim().trim_start_matches("0x");
    hex::decode(digits).map_err(|e| ChainFlipError::decode(format!("invalid hex data: {}", e)))
}

fn parse_quantity(s: &str) -> Result<u64> {
    let digits = s.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainFlipError::decode(format!("invalid quantity {}: {}", s, e)))
}

fn quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

fn parse_topic(s: &str) -> Result<[u8; 32]> {
    let bytes = decode_hex(s)?;
    bytes
        .try_into()
        .map_err(|_| ChainFlipError::decode(format!("topic is not 32 bytes: {}", s)))
}

impl TryFrom<RpcLog> for RawLog {
    type Error = ChainFlipError;

    fn try_from(log: RpcLog) -> Result<Self> {
        Ok(RawLog {
            topics: log
                .topics
                .iter()
                .map(|t| parse_topic(t))
                .collect::<Result<Vec<_>>>()?,
            data: decode_hex(&log.data)?,
            block_number: log.block_number.as_deref().map(parse_quantity).transpose()?.unwrap_or(0),
            log_index: log.log_index.as_deref().map(parse_quantity).transpose()?.unwrap_or(0),
            tx_hash: log
                .transaction_hash
                .as_deref()
                .map(str::parse::<TxHash>)
                .transpose()?,
        })
    }
}

#[async_trait]
impl ChainFlipContract for RpcContract {
    async fn read(&self, call: &ReadCall) -> Result<ContractValue> {
        let data = abi::encode_call(call.signature(), &call.args())?;
        let params = json!([
            {
                "to": self.address.to_string(),
                "data": format!("0x{}", hex::encode(data)),
            },
            "latest"
        ]);

        let raw: String = self.request("eth_call", params).await?;
        let bytes = decode_hex(&raw)?;
        let outputs = abi::decode(&call.outputs(), &bytes)
            .map_err(|e| ChainFlipError::decode(format!("{}: {}", call, e)))?;

        Ok(ContractValue::from_outputs(outputs))
    }

    async fn submit(&self, from: Address, call: &WriteCall) -> Result<TxHash> {
        let data = call.calldata()?;
        let params = json!([{
            "from": from.to_string(),
            "to": self.address.to_string(),
            "data": format!("0x{}", hex::encode(data)),
            "value": format!("0x{:x}", call.value().as_wei()),
        }]);

        let raw: String = self.request("eth_sendTransaction", params).await?;
        let tx = raw.parse()?;
        tracing::info!("Submitted {} from {}: {}", call.signature(), from, tx);
        Ok(tx)
    }

    async fn block_number(&self) -> Result<u64> {
        let raw: String = self.request("eth_blockNumber", json!([])).await?;
        parse_quantity(&raw)
    }

    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawLog>> {
        let params = json!([{
            "address": self.address.to_string(),
            "fromBlock": quantity(from_block),
            "toBlock": quantity(to_block),
        }]);

        let logs: Vec<RpcLog> = self.request("eth_getLogs", params).await?;
        logs.into_iter().map(RawLog::try_from).collect()
    }
}
