//! JSON-RPC clients for claiming peg-ins: the Elements node for the side chain and the
//! Bitcoin Core node it validates against.

mod claim;
mod errors;
mod rpc;

pub use claim::ElementsClaimClient;
pub use rpc::RpcEndpoint;
