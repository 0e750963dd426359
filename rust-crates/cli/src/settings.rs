//! Resolves what the client talks to from flags, environment and the
//! recorded deployment for the selected network. Flags and environment
//! win over the deployment record.

use anyhow::{
    Context,
    Result,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
};
use lottery_client::{
    Address,
    Amount,
    ChainId,
    ClientConfig,
    NetworkConfig,
};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: DeploymentEnv,
    pub rpc_url: String,
    pub account: Option<Address>,
    pub client: ClientConfig,
    pub deployment: Option<DeploymentRecord>,
}

pub fn network_config(env: DeploymentEnv, rpc_url: &str) -> NetworkConfig {
    match env {
        DeploymentEnv::Sepolia => NetworkConfig::sepolia().with_rpc_url(rpc_url),
        DeploymentEnv::Local => NetworkConfig {
            chain_id: ChainId(env.chain_id()),
            chain_name: "Localhost".to_string(),
            rpc_urls: vec![rpc_url.to_string()],
            block_explorer_urls: Vec::new(),
        },
    }
}

impl Settings {
    pub fn resolve(
        env: DeploymentEnv,
        deployments_root: impl AsRef<Path>,
        rpc_url: Option<&str>,
        contract: Option<&str>,
        account: Option<&str>,
    ) -> Result<Self> {
        let store = DeploymentStore::new_in(deployments_root, env)
            .context("opening deployment store")?;
        let deployment = store.load().context("loading deployment record")?;
        if let Some(record) = &deployment
            && !record.is_on_chain(env.chain_id())
        {
            warn!(
                recorded = record.chain_id,
                expected = env.chain_id(),
                "deployment record belongs to a different chain"
            );
        }

        let rpc_url = rpc_url
            .map(str::to_string)
            .or_else(|| deployment.as_ref().map(|record| record.rpc_url.clone()))
            .unwrap_or_else(|| env.default_rpc_url().to_string());

        let account = account
            .map(|raw| {
                raw.parse::<Address>()
                    .with_context(|| format!("invalid --account {raw:?}"))
            })
            .transpose()?;

        let raw_contract = contract.or_else(|| {
            deployment
                .as_ref()
                .map(|record| record.contract_address.as_str())
        });
        let mut client = ClientConfig {
            network: network_config(env, &rpc_url),
            ..ClientConfig::default()
        }
        .with_raw_contract_address(raw_contract);

        if let Some(raw) = deployment
            .as_ref()
            .and_then(|record| record.ticket_price_wei.as_deref())
        {
            let wei = raw
                .parse::<u128>()
                .with_context(|| format!("invalid recorded ticket price {raw:?}"))?;
            client.ticket_price = Amount::from_wei(wei);
        }

        Ok(Self {
            env,
            rpc_url,
            account,
            client,
            deployment,
        })
    }

    pub fn explorer_url(&self) -> Option<&str> {
        self.client
            .network
            .block_explorer_urls
            .first()
            .map(String::as_str)
    }
}
