//! Lottery contract port over JSON-RPC: `eth_call` for reads,
//! `eth_sendTransaction` for writes, receipt polling for confirmation and
//! `eth_getLogs` polling for events.

use crate::rpc::{
    RpcClient,
    node_error,
};
use alloy::{
    network::TransactionBuilder,
    primitives::{
        self,
        B256,
        U64,
        U256,
    },
    providers::Provider,
    rpc::types::{
        Filter,
        TransactionRequest,
    },
    sol_types::SolCall,
    transports::TransportError,
};
use anyhow::anyhow;
use lottery_abi::{
    ILottery,
    LotteryLog,
    decode_log,
    subscribed_topics,
};
use lottery_client::{
    Address,
    Amount,
    CallError,
    ClientError,
    ContractConnector,
    EventSubscription,
    FeeInfo,
    LotteryContract,
    LotteryEvent,
    SigningHandle,
    TxHash,
    TxReceipt,
    WriteCall,
};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{
    debug,
    warn,
};

/// EIP-1193 "user rejected".
const USER_REJECTED_CODE: i64 = 4001;
/// Geth and most nodes report execution reverts with code 3.
const EXECUTION_REVERTED_CODE: i64 = 3;

fn call_error(err: TransportError) -> CallError {
    match node_error(&err) {
        Some((USER_REJECTED_CODE, _)) => CallError::Rejected,
        Some((code, message))
            if code == EXECUTION_REVERTED_CODE || message.contains("revert") =>
        {
            CallError::Reverted {
                reason: message.to_string(),
            }
        }
        _ => CallError::Transport(err.to_string()),
    }
}

fn out_of_range(what: &str, value: U256) -> CallError {
    CallError::Transport(format!("{what} {value} out of range"))
}

fn percentage(value: U256) -> Result<u8, CallError> {
    u8::try_from(value)
        .ok()
        .filter(|pct| *pct <= 100)
        .ok_or_else(|| out_of_range("fee percentage", value))
}

fn amount(value: U256) -> Result<Amount, CallError> {
    u128::try_from(value)
        .map(Amount::from_wei)
        .map_err(|_| out_of_range("amount", value))
}

fn count(what: &str, value: U256) -> Result<u64, CallError> {
    u64::try_from(value).map_err(|_| out_of_range(what, value))
}

fn client_address(address: primitives::Address) -> Address {
    Address::new(address.into_array())
}

fn node_address(address: Address) -> primitives::Address {
    primitives::Address::from(*address.as_bytes())
}

#[derive(Clone)]
pub struct RpcConnector {
    rpc: RpcClient,
    poll_interval: Duration,
}

impl RpcConnector {
    pub fn new(rpc: RpcClient, poll_interval: Duration) -> Self {
        Self { rpc, poll_interval }
    }
}

impl ContractConnector for RpcConnector {
    type Contract = RpcLottery;

    fn bind(
        &self,
        address: Address,
        signer: &SigningHandle,
    ) -> Result<RpcLottery, ClientError> {
        Ok(RpcLottery {
            rpc: self.rpc.clone(),
            address: node_address(address),
            from: node_address(signer.account()),
            poll_interval: self.poll_interval,
        })
    }
}

pub struct RpcLottery {
    rpc: RpcClient,
    address: primitives::Address,
    from: primitives::Address,
    poll_interval: Duration,
}

/// The two receipt fields confirmation needs. Receipts from nodes that
/// predate Byzantium carry a state root and no status.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptStatus {
    #[serde(default)]
    block_number: Option<U64>,
    #[serde(default)]
    status: Option<U64>,
}

fn confirmation(tx: TxHash, receipt: ReceiptStatus) -> Result<TxReceipt, CallError> {
    if receipt.status.is_some_and(|status| status.is_zero()) {
        return Err(CallError::Reverted {
            reason: "transaction reverted on chain".to_string(),
        });
    }
    Ok(TxReceipt {
        tx,
        block_number: receipt.block_number.map(|block| block.to::<u64>()),
    })
}

fn round_id(value: U256) -> anyhow::Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("round id {value} out of range"))
}

fn event_amount(value: U256) -> anyhow::Result<Amount> {
    u128::try_from(value)
        .map(Amount::from_wei)
        .map_err(|_| anyhow!("amount {value} out of range"))
}

pub fn lottery_event(log: LotteryLog) -> anyhow::Result<LotteryEvent> {
    Ok(match log {
        LotteryLog::LotteryEnter(event) => LotteryEvent::Entered {
            player: client_address(event.player),
            round_id: round_id(event.lotteryId)?,
            timestamp: u64::try_from(event.timestamp)
                .map_err(|_| anyhow!("timestamp {} out of range", event.timestamp))?,
        },
        LotteryLog::GuaranteedWinner(event) => LotteryEvent::GuaranteedWinner {
            winner: client_address(event.winner),
            round_id: round_id(event.lotteryId)?,
            prize: event_amount(event.prizeAmount)?,
        },
        LotteryLog::JackpotWinner(event) => LotteryEvent::JackpotWinner {
            winner: client_address(event.winner),
            round_id: round_id(event.lotteryId)?,
            jackpot: event_amount(event.jackpotAmount)?,
        },
        LotteryLog::JackpotMiss(event) => LotteryEvent::JackpotMissed {
            round_id: round_id(event.lotteryId)?,
            carry_over: event_amount(event.carryOver)?,
        },
        LotteryLog::DonationMade(event) => LotteryEvent::DonationMade {
            charity: client_address(event.charity),
            round_id: round_id(event.lotteryId)?,
            amount: event_amount(event.amount)?,
        },
        LotteryLog::LotteryReset(event) => LotteryEvent::RoundReset {
            new_round_id: round_id(event.newLotteryId)?,
        },
    })
}

fn write_data(call: WriteCall) -> (Vec<u8>, Amount) {
    match call {
        WriteCall::Enter { value } => (ILottery::enterCall {}.abi_encode(), value),
        WriteCall::PickWinner => (ILottery::pickWinnerCall {}.abi_encode(), Amount::ZERO),
        WriteCall::Pause => (ILottery::pauseLotteryCall {}.abi_encode(), Amount::ZERO),
        WriteCall::Resume => (ILottery::resumeLotteryCall {}.abi_encode(), Amount::ZERO),
    }
}

async fn poll_logs(
    rpc: RpcClient,
    address: primitives::Address,
    mut next_block: u64,
    interval: Duration,
    events: mpsc::UnboundedSender<LotteryEvent>,
) {
    let topics = subscribed_topics().to_vec();
    loop {
        tokio::select! {
            _ = events.closed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let latest = match rpc.provider().get_block_number().await {
            Ok(latest) => latest,
            Err(err) => {
                warn!(%err, "block number poll failed");
                continue;
            }
        };
        if latest < next_block {
            continue;
        }
        let filter = Filter::new()
            .address(address)
            .from_block(next_block)
            .to_block(latest)
            .event_signature(topics.clone());
        let logs = match rpc.provider().get_logs(&filter).await {
            Ok(logs) => logs,
            Err(err) => {
                warn!(%err, "log poll failed");
                continue;
            }
        };
        for log in &logs {
            let event = match decode_log(&log.inner.data) {
                Ok(Some(decoded)) => lottery_event(decoded),
                Ok(None) => continue,
                Err(err) => Err(anyhow::Error::from(err)),
            };
            match event {
                Ok(event) => {
                    if events.send(event).is_err() {
                        return;
                    }
                }
                Err(err) => warn!(%err, "skipping undecodable lottery log"),
            }
        }
        next_block = latest + 1;
    }
    debug!("log polling stopped");
}

impl RpcLottery {
    async fn read<C: SolCall>(&self, call: C) -> Result<C::Return, CallError> {
        let tx = TransactionRequest::default()
            .with_to(self.address)
            .with_input(call.abi_encode());
        let data = self.rpc.provider().call(tx).await.map_err(call_error)?;
        C::abi_decode_returns(&data).map_err(|err| {
            CallError::Transport(format!("malformed {} result: {err}", C::SIGNATURE))
        })
    }
}

impl LotteryContract for RpcLottery {
    async fn lottery_id(&self) -> Result<u64, CallError> {
        let id = self.read(ILottery::lotteryIdCall {}).await?;
        count("round id", id)
    }

    async fn prize_pool(&self) -> Result<Amount, CallError> {
        amount(self.read(ILottery::getPrizePoolCall {}).await?)
    }

    async fn players_count(&self) -> Result<u64, CallError> {
        let players = self.read(ILottery::getPlayersCountCall {}).await?;
        count("player count", players)
    }

    async fn players(&self) -> Result<Vec<Address>, CallError> {
        let players = self.read(ILottery::getPlayersCall {}).await?;
        Ok(players.into_iter().map(client_address).collect())
    }

    async fn lottery_open(&self) -> Result<bool, CallError> {
        self.read(ILottery::lotteryOpenCall {}).await
    }

    async fn total_donated(&self) -> Result<Amount, CallError> {
        amount(self.read(ILottery::getTotalDonatedCall {}).await?)
    }

    async fn fee_info(&self) -> Result<FeeInfo, CallError> {
        let fees = self.read(ILottery::getFeeInfoCall {}).await?;
        Ok(FeeInfo {
            winner_percentage: percentage(fees.winnerPercentage)?,
            donation_percentage: percentage(fees.donationPercentage)?,
            admin_percentage: percentage(fees.adminPercentage)?,
            charity: client_address(fees.charity),
        })
    }

    async fn admin(&self) -> Result<Address, CallError> {
        self.read(ILottery::adminCall {}).await.map(client_address)
    }

    async fn winner(&self, round: u64) -> Result<Address, CallError> {
        self.read(ILottery::getWinnerCall {
            lotteryId: U256::from(round),
        })
        .await
        .map(client_address)
    }

    async fn guaranteed_prize(&self, round: u64) -> Result<Amount, CallError> {
        amount(
            self.read(ILottery::getGuaranteedPrizeCall {
                lotteryId: U256::from(round),
            })
            .await?,
        )
    }

    async fn jackpot_prize(&self, round: u64) -> Result<Amount, CallError> {
        amount(
            self.read(ILottery::getJackpotPrizeCall {
                lotteryId: U256::from(round),
            })
            .await?,
        )
    }

    async fn donation_amount(&self, round: u64) -> Result<Amount, CallError> {
        amount(
            self.read(ILottery::getDonationAmountCall {
                lotteryId: U256::from(round),
            })
            .await?,
        )
    }

    async fn jackpot_won(&self, round: u64) -> Result<bool, CallError> {
        self.read(ILottery::wasJackpotWonCall {
            lotteryId: U256::from(round),
        })
        .await
    }

    async fn submit(&self, call: WriteCall) -> Result<TxHash, CallError> {
        let (data, value) = write_data(call);
        let tx = TransactionRequest::default()
            .with_from(self.from)
            .with_to(self.address)
            .with_input(data)
            .with_value(U256::from(value.wei()));
        let pending = self
            .rpc
            .provider()
            .send_transaction(tx)
            .await
            .map_err(call_error)?;
        Ok(TxHash::new(pending.tx_hash().0))
    }

    async fn wait_for_confirmation(&self, tx: TxHash) -> Result<TxReceipt, CallError> {
        let hash = B256::from(*tx.as_bytes());
        loop {
            let receipt: Option<ReceiptStatus> = self
                .rpc
                .provider()
                .raw_request("eth_getTransactionReceipt".into(), (hash,))
                .await
                .map_err(call_error)?;
            match receipt {
                Some(receipt) => return confirmation(tx, receipt),
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn subscribe(&self) -> Result<EventSubscription, CallError> {
        let from_block = self
            .rpc
            .provider()
            .get_block_number()
            .await
            .map_err(call_error)?
            + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(poll_logs(
            self.rpc.clone(),
            self.address,
            from_block,
            self.poll_interval,
            tx,
        ));
        Ok(rx)
    }
}
