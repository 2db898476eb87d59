//! WebSocket connection layer: lobby and game session sockets

pub mod lobby;
pub mod protocol;
pub mod seats;
pub mod session;

use std::borrow::Cow;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use serde::Serialize;

pub use lobby::lobby_ws_handler;
pub use session::session_ws_handler;

/// Close code for protocol errors
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Close code for policy violations, e.g. a bad token
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_NORMAL: u16 = 1000;

pub(crate) type WsSink = SplitSink<WebSocket, Message>;

/// Send a message over WebSocket
pub(crate) async fn send_msg<T: Serialize>(sink: &mut WsSink, msg: &T) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

pub(crate) async fn send_close(sink: &mut WsSink, code: u16, reason: &'static str) -> Result<(), String> {
    sink.send(Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    })))
    .await
    .map_err(|e| e.to_string())
}
