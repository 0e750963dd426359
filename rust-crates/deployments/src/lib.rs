use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Sepolia,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Sepolia => "sepolia",
            DeploymentEnv::Local => "local",
        }
    }

    pub fn chain_id(self) -> u64 {
        match self {
            DeploymentEnv::Sepolia => 11_155_111,
            DeploymentEnv::Local => 31_337,
        }
    }

    pub fn default_rpc_url(self) -> &'static str {
        match self {
            DeploymentEnv::Sepolia => "https://rpc.sepolia.org",
            DeploymentEnv::Local => "http://127.0.0.1:8545",
        }
    }

    pub fn explorer_url(self) -> Option<&'static str> {
        match self {
            DeploymentEnv::Sepolia => Some("https://sepolia.etherscan.io/"),
            DeploymentEnv::Local => None,
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Sepolia => "Sepolia",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DeploymentEnv {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sepolia" => Ok(DeploymentEnv::Sepolia),
            "local" => Ok(DeploymentEnv::Local),
            other => Err(anyhow!("unknown deployment environment {other:?}")),
        }
    }
}

/// Where a lottery contract lives on one network. Addresses and amounts are
/// kept as the text the user supplied; the client validates them on load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub recorded_at: String,
    pub contract_address: String,
    pub chain_id: u64,
    pub chain_name: String,
    pub rpc_url: String,
    #[serde(default)]
    pub explorer_url: Option<String>,
    /// Ticket price in wei, decimal.
    #[serde(default)]
    pub ticket_price_wei: Option<String>,
    #[serde(default)]
    pub deployment_block: Option<u64>,
}

impl DeploymentRecord {
    pub fn new(env: DeploymentEnv, contract_address: impl Into<String>) -> Self {
        Self {
            recorded_at: Utc::now().to_rfc3339(),
            contract_address: contract_address.into(),
            chain_id: env.chain_id(),
            chain_name: env.to_string(),
            rpc_url: env.default_rpc_url().to_string(),
            explorer_url: env.explorer_url().map(str::to_string),
            ticket_price_wei: None,
            deployment_block: None,
        }
    }

    pub fn with_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = rpc_url.into();
        self
    }

    pub fn is_on_chain(&self, chain_id: u64) -> bool {
        self.chain_id == chain_id
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    /// Store under `.deployments/` in the working directory.
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        Self::new_in(DEPLOYMENTS_ROOT, env)
    }

    pub fn new_in(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<DeploymentRecord>> {
        read_record(&self.path)
    }

    pub fn save(&self, record: &DeploymentRecord) -> Result<()> {
        write_record(&self.path, record)
    }
}

pub fn ensure_structure(root: impl AsRef<Path>) -> Result<()> {
    for env in [DeploymentEnv::Sepolia, DeploymentEnv::Local] {
        let _ = ensure_store(root.as_ref(), env)?;
    }
    Ok(())
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!(
                "Failed to create deployments directory {}",
                env_dir.display()
            )
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        fs::write(&file_path, b"").with_context(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
    }

    Ok(file_path)
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).context("Failed to read deployment records")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    if let Ok(record) = serde_json::from_slice::<DeploymentRecord>(&data) {
        return Ok(Some(record));
    }
    if let Ok(mut records) = serde_json::from_slice::<Vec<DeploymentRecord>>(&data) {
        return Ok(records.pop());
    }
    Err(anyhow!(
        "Failed to parse deployment record JSON; expected a single deployment object"
    ))
}

fn write_record(path: impl AsRef<Path>, record: &DeploymentRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record)
        .context("Failed to serialize deployment record")?;
    fs::write(path.as_ref(), json).context("Failed to write deployment record")?;
    Ok(())
}

/// Records `contract_address` as the active deployment for `env`.
pub fn record_deployment(
    root: impl AsRef<Path>,
    env: DeploymentEnv,
    contract_address: impl AsRef<str>,
    rpc_url: Option<impl AsRef<str>>,
) -> Result<DeploymentRecord> {
    let store = DeploymentStore::new_in(root, env)?;
    let mut record = DeploymentRecord::new(env, contract_address.as_ref());
    if let Some(rpc_url) = rpc_url {
        record = record.with_rpc_url(rpc_url.as_ref());
    }
    store.save(&record)?;
    Ok(record)
}
