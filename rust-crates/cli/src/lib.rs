pub mod node_wallet;
pub mod render;
pub mod rpc;
pub mod rpc_lottery;
pub mod settings;

pub use node_wallet::NodeWallet;
pub use rpc::RpcClient;
pub use rpc_lottery::{
    RpcConnector,
    RpcLottery,
};
pub use settings::Settings;
