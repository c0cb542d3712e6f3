//! IPC module for out-of-process key features

mod protocol;
mod server;

pub use protocol::{
    DaemonStatus, ErrorCode, Notification, Request, Response, SubscriptionId, MAX_MESSAGE_LEN,
};
pub use server::{read_frame, read_message, write_message, Server, ServerContext};
