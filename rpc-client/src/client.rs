use crate::envelope::{JsonRpcRequest, JsonRpcResponse, RPC_INVALID_ADDRESS_OR_KEY};
use btcwatch_error::RpcError;
use btcwatch_logger::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A single-request outcome: `Ok` on success, `Err(RpcError::NotFound)` when
/// the node's well-known not-found code is returned, any other `RpcError`
/// otherwise. Kept as a type alias so call sites read naturally.
pub type RpcResult<T> = Result<T, RpcError>;

/// HTTP JSON-RPC client against a single node endpoint, with HTTP Basic
/// auth and a hard per-call deadline (§4.1, §6).
#[derive(Debug, Clone)]
pub struct RawRpcClient {
    http: reqwest::Client,
    url: String,
    user: String,
    password: String,
    timeout: Duration,
    next_id: std::sync::Arc<AtomicU64>,
}

impl RawRpcClient {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            user: user.into(),
            password: password.into(),
            timeout,
            next_id: std::sync::Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// A single JSON-RPC call. `not_found_means_absent` controls whether the
    /// node's "invalid address or key" code is mapped to `RpcError::NotFound`
    /// (true for `getrawtransaction`/`getblock`/`getmempoolentry`) or left as
    /// a generic protocol error (methods with no "absent" concept).
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
        not_found_means_absent: bool,
    ) -> RpcResult<T> {
        let id = self.next_id();
        let request = JsonRpcRequest::new(id, method, params);
        let response = self.send_one(&request).await?;
        self.extract(response, id, not_found_means_absent)
    }

    /// Send every request in one HTTP round trip, correlate by id, and
    /// return one outcome per input in the same order (§4.1 "batch mode").
    pub async fn call_batch<T: DeserializeOwned>(
        &self,
        calls: Vec<(&'static str, Value, bool)>,
    ) -> Vec<RpcResult<T>> {
        if calls.is_empty() {
            return Vec::new();
        }
        let requests: Vec<JsonRpcRequest> = calls
            .iter()
            .map(|(method, params, _)| JsonRpcRequest::new(self.next_id(), method, params.clone()))
            .collect();

        let responses = match self.send_batch(&requests).await {
            Ok(responses) => responses,
            Err(err) => return calls.iter().map(|_| Err(err.clone())).collect(),
        };

        requests
            .into_iter()
            .zip(calls.into_iter())
            .map(|(request, (_, _, not_found_means_absent))| {
                let found = responses.iter().find(|r| matches_id(r, request.id));
                match found {
                    Some(response) => self.extract(response.clone(), request.id, not_found_means_absent),
                    None => Err(RpcError::Protocol(format!(
                        "no response correlated to request id {}",
                        request.id
                    ))),
                }
            })
            .collect()
    }

    fn extract<T: DeserializeOwned>(
        &self,
        response: JsonRpcResponse,
        expected_id: u64,
        not_found_means_absent: bool,
    ) -> RpcResult<T> {
        if !matches_id(&response, expected_id) {
            return Err(RpcError::Protocol(format!(
                "response id did not match request id {expected_id}"
            )));
        }
        if let Some(error) = response.error {
            if not_found_means_absent && error.code == RPC_INVALID_ADDRESS_OR_KEY {
                return Err(RpcError::NotFound);
            }
            return Err(RpcError::Protocol(format!(
                "node returned error {}: {}",
                error.code, error.message
            )));
        }
        let result = response
            .result
            .ok_or_else(|| RpcError::Protocol("response has neither result nor error".into()))?;
        serde_json::from_value(result).map_err(|e| RpcError::Protocol(e.to_string()))
    }

    async fn send_one(&self, request: &JsonRpcRequest) -> RpcResult<JsonRpcResponse> {
        debug!("rpc -> {} (id={})", request.method, request.id);
        let fut = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(request)
            .send();

        let response = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RpcError::Timeout(self.timeout))?
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if !response.status().is_success() && response.status().as_u16() != 500 {
            // Bitcoin Core returns HTTP 500 with a JSON-RPC error body for
            // application-level errors; anything else is a transport fault.
            return Err(RpcError::Transport(format!(
                "unexpected HTTP status {}",
                response.status()
            )));
        }

        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| RpcError::Protocol(e.to_string()))
    }

    async fn send_batch(&self, requests: &[JsonRpcRequest]) -> RpcResult<Vec<JsonRpcResponse>> {
        debug!("rpc batch -> {} requests", requests.len());
        let fut = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(requests)
            .send();

        let response = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| RpcError::Timeout(self.timeout))?
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        if !response.status().is_success() && response.status().as_u16() != 500 {
            return Err(RpcError::Transport(format!(
                "unexpected HTTP status {}",
                response.status()
            )));
        }

        let responses: Vec<JsonRpcResponse> = response
            .json()
            .await
            .map_err(|e| RpcError::Protocol(e.to_string()))?;
        if responses.len() != requests.len() {
            warn!(
                "batch response count {} did not match request count {}",
                responses.len(),
                requests.len()
            );
        }
        Ok(responses)
    }
}

fn matches_id(response: &JsonRpcResponse, expected: u64) -> bool {
    response
        .id
        .as_u64()
        .map(|id| id == expected)
        .unwrap_or(false)
}
