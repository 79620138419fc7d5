//! A JSON-message server and client library over TCP.
//!
//! Applications exchange structured objects (JSON-serialisable maps,
//! arrays, scalars) across a connection using a framed, length-prefixed,
//! integrity-checked wire protocol. The library provides a client with
//! bounded connect-retry, a single-connection server that runs an
//! owner-supplied handler, a multi-connection server that spawns one
//! worker per accepted client, and a per-client statistics view describing
//! connection lifecycle, throughput, and failure counts.
//!
//! ```no_run
//! use json_socket::{Client, SocketConfig};
//! use serde_json::json;
//!
//! let mut client = Client::new(SocketConfig::default());
//! if client.connect() {
//!   client.send_obj(&json!({"echo": "hello"})).unwrap();
//!   let reply = client.read_obj().unwrap();
//!   println!("{reply}");
//! }
//! ```

mod config;
mod endpoint;
mod error;
mod frame;
mod handler;
mod message_loop;
mod stats;
mod wakeup;

pub mod client;
pub mod factory;
pub mod server;
pub mod worker;

pub use client::Client;
pub use config::SocketConfig;
pub use error::{Error, FailureKind, Result};
pub use factory::FactoryServer;
pub use frame::DEFAULT_MAX_MESSAGE_SIZE;
pub use handler::{HandlerError, MessageHandler, WorkerFactory};
pub use server::Server;
pub use stats::{ClientStatsView, FailureCounts, StatsSnapshot};
pub use worker::Worker;
