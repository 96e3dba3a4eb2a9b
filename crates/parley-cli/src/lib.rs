//! Streaming conversation client for parley.
//!
//! This crate wires the message model, session lifecycle and auth contract
//! into a working client:
//!
//! - [`ws`]: the conversation stream channel (WebSocket transport, sequence
//!   tokens, client stop)
//! - [`client`]: gateway REST collaborators (sessions, history, uploads)
//! - [`app`]: the [`Conversation`] view and its single dispatch function
//! - [`command`], [`transcript`]: the line-mode front-end used by the
//!   `parley` binary

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod app;
pub mod client;
pub mod command;
pub mod config;
pub mod transcript;
pub mod types;
pub mod ws;

pub use app::{Conversation, EventOutcome, Notice, NoticeLevel, Services};
pub use client::{ClientError, GatewayClient, HistoryClient, UploadClient};
pub use command::Command;
pub use config::ClientConfig;
pub use transcript::Transcript;
pub use ws::{Channel, ChannelError, ChannelEvent, ChannelState, Connector, WsConnector};
