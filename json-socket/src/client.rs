//! Client (C3): connects with bounded retry, exchanges framed objects.
//!
//! Grounded on `jsocket_base.py`'s `JsonClient.connect()` (10 attempts,
//! fixed 3 s backoff, socket recreated before each attempt) and the
//! teacher's `PrimitiveClient`/`GenericClient` active-connect path using
//! `TcpStream::connect_timeout` plus `set_read_timeout`/`set_write_timeout`.

use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::config::SocketConfig;
use crate::endpoint::Endpoint;
use crate::error::Result;

/// Hard bound on connect attempts (spec §4.3, §5).
const CONNECT_ATTEMPTS: u32 = 10;
/// Fixed backoff between failed attempts (spec §4.3, §5).
const CONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// ## CLIENT
///
/// Connects to a listening [Server] or [FactoryServer] and exchanges framed
/// JSON objects over one TCP connection.
///
/// A `Client` is active-only — it never listens. [Client::connect] owns the
/// entire retry procedure: up to [CONNECT_ATTEMPTS] attempts, a completely
/// fresh socket built for each one, [CONNECT_BACKOFF] of sleep between
/// failures. Every other method assumes `connect()` has already returned
/// `true`; calling them beforehand, or after the peer has gone away, reads
/// back as a broken connection rather than panicking.
///
/// [Server]: crate::server::Server
/// [FactoryServer]: crate::factory::FactoryServer
pub struct Client {
  endpoint: Endpoint,
  config: SocketConfig,
}

impl Client {
  pub fn new(config: SocketConfig) -> Self {
    let endpoint = Endpoint::new(config.max_message_size, config.effective_recv_timeout());
    Self { endpoint, config }
  }

  pub fn address(&self) -> &str {
    &self.config.address
  }

  pub fn port(&self) -> u16 {
    self.config.port
  }

  pub fn timeout(&self) -> Duration {
    self.config.timeout
  }

  pub fn recv_timeout(&self) -> Duration {
    self.config.effective_recv_timeout()
  }

  pub fn max_message_size(&self) -> usize {
    self.config.max_message_size
  }

  pub fn set_max_message_size(&mut self, size: usize) {
    self.config.max_message_size = size;
    self.endpoint.set_max_message_size(size);
  }

  pub fn set_recv_timeout(&mut self, timeout: Duration) {
    self.config.recv_timeout = Some(timeout);
    let _ = self.endpoint.set_recv_timeout(timeout);
  }

  /// Attempts to connect up to [`CONNECT_ATTEMPTS`] times with
  /// [`CONNECT_BACKOFF`] between failures, recreating the socket before
  /// every attempt. Returns `true` on success, `false` after the final
  /// failure — never an error (spec §4.3, §7).
  pub fn connect(&mut self) -> bool {
    for attempt in 1..=CONNECT_ATTEMPTS {
      self.endpoint = Endpoint::new(self.config.max_message_size, self.config.effective_recv_timeout());
      match self.endpoint.connect(&self.config.address, self.config.port, self.config.timeout) {
        Ok(()) => {
          tracing::info!(
            address = %self.config.address,
            port = self.config.port,
            attempt,
            "client connected"
          );
          return true;
        }
        Err(error) => {
          tracing::debug!(attempt, %error, "connect attempt failed");
          if attempt < CONNECT_ATTEMPTS {
            thread::sleep(CONNECT_BACKOFF);
          }
        }
      }
    }
    tracing::warn!(
      address = %self.config.address,
      port = self.config.port,
      attempts = CONNECT_ATTEMPTS,
      "exhausted connect attempts"
    );
    false
  }

  pub fn send_obj(&mut self, value: &Value) -> Result<()> {
    self.endpoint.send_obj(value)?;
    Ok(())
  }

  pub fn read_obj(&mut self) -> Result<Value> {
    Ok(self.endpoint.read_obj()?.value)
  }

  pub fn close(&mut self) {
    self.endpoint.close_connection();
  }
}
