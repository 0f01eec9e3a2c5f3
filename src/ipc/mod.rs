//! IPC (Inter-Process Communication) module
//!
//! This module provides a Unix socket-based IPC server through which the
//! browser side delivers intercepted requests and user intents.
//!
//! # Protocol
//!
//! Messages are length-prefixed JSON:
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: JSON-encoded command or response
//!
//! A connection that sends `subscribe` is answered once and then receives a
//! `pendingChanged` frame for every change to a tab's paused requests.
//!
//! # Example
//!
//! ```no_run
//! use container_gate::ipc::{IpcClient, IpcCommand, IpcResponse};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IpcClient::new("/run/container-gate/gate.sock");
//!
//! // Check if server is alive
//! if client.ping().await? {
//!     println!("Server is alive!");
//! }
//!
//! // Inspect a tab's paused requests
//! let response = client.send(IpcCommand::GetPendingRequests { tab_id: 7 }).await?;
//! if let IpcResponse::PendingRequests { requests, .. } = response {
//!     println!("{} domains waiting", requests.len());
//! }
//! # Ok(())
//! # }
//! ```

mod handler;
mod protocol;
mod server;

pub use handler::IpcHandler;
pub use protocol::{
    decode_message, encode_message, ErrorCode, IpcCommand, IpcError, IpcResponse, ServerStatus,
    StateSnapshot, LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE,
};
pub use server::{IpcClient, IpcServer, PendingSubscription};
