//! The RPC substrate: a symmetric, multiplexed message link plus a router
//! for dispatching inbound requests and an explicit typed client.

mod client;
mod envelope;
mod link;
mod router;
mod server;

pub use client::{RegisterResponse, RpcClient};
pub use envelope::Envelope;
pub use link::{Link, Peer};
pub use router::{HandlerResult, Router};
pub use server::Server;
