pub mod agent;
pub mod config;
pub mod connection;
pub mod contract;
pub mod dispatcher;
pub mod error;
pub mod state;
pub mod sync;
pub mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use agent::{
    AgentError,
    AgentNotification,
    SigningAgent,
};
pub use config::{
    ClientConfig,
    NetworkConfig,
};
pub use connection::{
    ConnectionManager,
    ConnectionState,
    Session,
    SigningHandle,
};
pub use contract::{
    CallError,
    ContractConnector,
    EventSubscription,
    LotteryContract,
    LotteryEvent,
    OperationKind,
    TxReceipt,
    WriteCall,
};
pub use error::{
    ClientError,
    ErrorCategory,
    Operation,
};
pub use state::{
    DonationInfo,
    FeeInfo,
    LotteryState,
    OperationStatus,
    PendingOperation,
    RoundState,
    WinnerRecord,
};
pub use sync::{
    DrawToken,
    LotterySync,
};
pub use types::{
    Address,
    Amount,
    ChainId,
    ParseError,
    TxHash,
};
