use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    record_deployment,
};
use lottery_cli::{
    NodeWallet,
    RpcClient,
    RpcConnector,
    Settings,
    render,
};
use lottery_client::{
    ConnectionManager,
    LotterySync,
};
use std::{
    io::{
        BufRead,
        Write,
    },
    path::PathBuf,
    time::Duration,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

const BIND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(
    name = "lottery",
    about = "Play and administer the charity lottery contract",
    version,
    group(
        ArgGroup::new("network")
            .args(["sepolia", "local"])
            .required(true)
    )
)]
struct Args {
    /// Use the Sepolia test network
    #[arg(long)]
    sepolia: bool,

    /// Use a local development node
    #[arg(long)]
    local: bool,

    /// Override RPC URL
    #[arg(long, env = "LOTTERY_RPC_URL")]
    rpc_url: Option<String>,

    /// Lottery contract address (defaults to the recorded deployment)
    #[arg(long, env = "LOTTERY_CONTRACT_ADDRESS")]
    contract: Option<String>,

    /// Play as this node-managed account instead of the node's first one
    #[arg(long)]
    account: Option<String>,

    /// Write logs to daily files in this directory instead of stderr
    #[arg(long)]
    log_dir: Option<String>,

    /// Directory holding per-network deployment records
    #[arg(long, default_value = deployments::DEPLOYMENTS_ROOT)]
    deployments_dir: PathBuf,

    /// How often to poll the node for new blocks, receipts and account changes
    #[arg(long, default_value_t = 2_000)]
    poll_interval_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current round
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Show the winners of recent rounds
    History {
        #[arg(long)]
        json: bool,
    },
    /// Buy one ticket at the configured price
    Enter,
    /// Draw the winner of the current round (admin only)
    Draw {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Close the current round without drawing (admin only)
    Pause,
    /// Reopen a paused round (admin only)
    Resume,
    /// Follow the lottery and print every change until interrupted
    Watch,
    /// Show or record the deployment used for the selected network
    Config {
        #[arg(long)]
        set_address: Option<String>,
    },
}

impl Args {
    fn env(&self) -> DeploymentEnv {
        if self.sepolia {
            DeploymentEnv::Sepolia
        } else {
            DeploymentEnv::Local
        }
    }
}

fn init_tracing(log_dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(raw) => {
            let dir = shellexpand::tilde(raw).into_owned();
            std::fs::create_dir_all(&dir)
                .wrap_err_with(|| format!("creating log directory {dir}"))?;
            let appender = rolling::daily(&dir, "lottery.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| eyre!(e))?;
            Ok(Some(guard))
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| eyre!(e))?;
            Ok(None)
        }
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn show_config(settings: &Settings) {
    println!("Network:  {} ({})", settings.env, settings.client.network.chain_id);
    println!("RPC URL:  {}", settings.rpc_url);
    match settings.client.contract_address {
        Some(address) => println!("Contract: {address}"),
        None => println!("Contract: not configured"),
    }
    if let Some(record) = &settings.deployment {
        println!("Recorded: {}", record.recorded_at);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_dir.as_deref())?;
    deployments::ensure_structure(&args.deployments_dir)
        .map_err(|e| eyre!(e))
        .wrap_err("initializing deployment directories")?;

    let env = args.env();
    let settings = Settings::resolve(
        env,
        &args.deployments_dir,
        args.rpc_url.as_deref(),
        args.contract.as_deref(),
        args.account.as_deref(),
    )
    .map_err(|e| eyre!(e))?;

    if let Command::Config { set_address } = &args.command {
        if let Some(address) = set_address {
            address
                .parse::<lottery_client::Address>()
                .wrap_err_with(|| format!("invalid contract address {address:?}"))?;
            let record = record_deployment(
                &args.deployments_dir,
                env,
                address,
                args.rpc_url.as_deref(),
            )
            .map_err(|e| eyre!(e))?;
            println!("Recorded {} for {env}", record.contract_address);
            return Ok(());
        }
        show_config(&settings);
        return Ok(());
    }

    if settings.client.contract_address.is_none() {
        return Err(eyre!(
            "No lottery contract configured for {env}. Pass --contract, set \
             LOTTERY_CONTRACT_ADDRESS or run `lottery config --set-address <address>`"
        ));
    }

    tracing::info!(%env, rpc = %settings.rpc_url, "starting lottery client");
    let poll_interval = Duration::from_millis(args.poll_interval_ms);
    let rpc = RpcClient::new(&settings.rpc_url).map_err(|e| eyre!(e))?;
    let wallet = NodeWallet::new(rpc.clone(), settings.account, poll_interval);
    let connection = ConnectionManager::new(Some(wallet), settings.client.network.clone());
    let ticket_price = settings.client.ticket_price;
    let sync = LotterySync::new(
        RpcConnector::new(rpc, poll_interval),
        settings.client.clone(),
    );
    sync.follow(connection.subscribe());

    connection.init().await;
    if !connection.state().is_connected() {
        connection.connect().await?;
    }

    let mut state = sync.subscribe();
    let bound = tokio::time::timeout(
        BIND_TIMEOUT,
        state.wait_for(|state| state.is_bound || state.error.is_some()),
    )
    .await
    .map_err(|_| eyre!("timed out binding the lottery contract"))?
    .map(|state| state.is_bound)
    .map_err(|_| eyre!("lottery synchronizer stopped"))?;
    if !bound {
        return Err(sync
            .state()
            .error
            .map(color_eyre::Report::from)
            .unwrap_or_else(|| eyre!("lottery contract is not bound")));
    }
    sync.refresh().await?;

    let explorer = settings.explorer_url();
    let result: Result<()> = match args.command {
        Command::Status { json } => {
            let current = sync.state();
            let connection = connection.state();
            if json {
                let view = render::StatusView::new(&connection, &current, ticket_price);
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print!("{}", render::status(&connection, &current, ticket_price));
            }
            Ok(())
        }
        Command::History { json } => {
            let records = sync.refresh_history().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print!("{}", render::history(&records));
            }
            Ok(())
        }
        Command::Enter => sync
            .enter()
            .await
            .map(|receipt| println!("{}", render::receipt("Entry", &receipt, explorer)))
            .map_err(Into::into),
        Command::Draw { yes } => {
            let token = sync.request_draw()?;
            let prompt = format!(
                "Draw the winner of round #{} among {} entries?",
                token.round_id(),
                token.players_count()
            );
            if yes || confirm(&prompt)? {
                sync.confirm_draw(token)
                    .await
                    .map(|receipt| println!("{}", render::receipt("Draw", &receipt, explorer)))
                    .map_err(Into::into)
            } else {
                println!("Draw cancelled.");
                Ok(())
            }
        }
        Command::Pause => sync
            .pause()
            .await
            .map(|receipt| println!("{}", render::receipt("Pause", &receipt, explorer)))
            .map_err(Into::into),
        Command::Resume => sync
            .resume()
            .await
            .map(|receipt| println!("{}", render::receipt("Resume", &receipt, explorer)))
            .map_err(Into::into),
        Command::Watch => watch(&connection, &sync, ticket_price).await,
        Command::Config { .. } => Ok(()),
    };

    sync.dispose().await;
    connection.shutdown();
    result
}

async fn watch(
    connection: &ConnectionManager<NodeWallet>,
    sync: &LotterySync<RpcConnector>,
    ticket_price: lottery_client::Amount,
) -> Result<()> {
    let mut lottery = sync.subscribe();
    let mut session = connection.subscribe();
    let mut last_round = None;
    print!("{}", render::status(&session.borrow(), &lottery.borrow(), ticket_price));
    loop {
        tokio::select! {
            biased;
            signal = tokio::signal::ctrl_c() => {
                signal.wrap_err("listening for ctrl-c")?;
                println!();
                return Ok(());
            }
            changed = session.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = session.borrow_and_update().clone();
                match current.account() {
                    Some(account) => println!("[{}] account {account}", render::timestamp()),
                    None => println!("[{}] wallet disconnected", render::timestamp()),
                }
            }
            changed = lottery.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = lottery.borrow_and_update().clone();
                if current.is_refreshing {
                    continue;
                }
                let summary = (
                    current.round.round_id,
                    current.round.players_count,
                    current.round.is_open,
                    current.pending.clone(),
                );
                if last_round.as_ref() == Some(&summary) {
                    continue;
                }
                last_round = Some(summary);
                println!("[{}]", render::timestamp());
                print!("{}", render::status(&session.borrow(), &current, ticket_price));
            }
        }
    }
}
