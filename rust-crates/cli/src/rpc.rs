//! Node access over HTTP JSON-RPC through an alloy provider.

use alloy::{
    providers::RootProvider,
    rpc::client::ClientBuilder,
    transports::{
        TransportError,
        http::Http,
    },
};
use anyhow::{
    Context,
    Result,
};
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct RpcClient {
    url: Url,
    provider: RootProvider,
}

impl RpcClient {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid RPC URL {url:?}"))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client for the RPC endpoint")?;
        let transport = Http::with_client(http, url.clone());
        let client = ClientBuilder::default().transport(transport, is_local(&url));
        Ok(Self {
            url,
            provider: RootProvider::new(client),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn provider(&self) -> &RootProvider {
        &self.provider
    }
}

fn is_local(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"))
}

/// Code and message of the node's error object, if `err` came from the node
/// rather than from the transport.
pub fn node_error(err: &TransportError) -> Option<(i64, &str)> {
    err.as_error_resp()
        .map(|payload| (payload.code, &*payload.message))
}

#[cfg(test)]
pub(crate) fn error_response(code: i64, message: &str) -> TransportError {
    let payload = serde_json::json!({ "code": code, "message": message });
    TransportError::ErrorResp(serde_json::from_value(payload).unwrap())
}
