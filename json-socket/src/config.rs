//! Plain-field configuration, grounded on the teacher's `ParameterSettings`
//! and the original `JsonSocket.__init__` defaults (`address='127.0.0.1'`,
//! `port=5489`, `timeout=2.0`). No config files/env vars (spec §6):
//! construction always takes one of these structs directly.

use std::time::Duration;

use crate::frame::DEFAULT_MAX_MESSAGE_SIZE;

/// Fields shared by [`crate::client::Client`], [`crate::server::Server`],
/// and [`crate::factory::FactoryServer`].
///
/// `accept_timeout`/`recv_timeout` independently override `timeout`
/// (mirroring the original's `_get_accept_timeout`/`_get_recv_timeout`
/// fallback onto `self._timeout` when not set explicitly). `accept_timeout`
/// is unused by `Client`, which never listens.
#[derive(Debug, Clone)]
pub struct SocketConfig {
  pub address: String,
  pub port: u16,
  pub timeout: Duration,
  pub accept_timeout: Option<Duration>,
  pub recv_timeout: Option<Duration>,
  pub max_message_size: usize,
}

impl SocketConfig {
  /// The timeout to apply to the listening socket's accept wait.
  pub fn effective_accept_timeout(&self) -> Duration {
    self.accept_timeout.unwrap_or(self.timeout)
  }

  /// The timeout to apply to reads on an accepted/connected socket.
  pub fn effective_recv_timeout(&self) -> Duration {
    self.recv_timeout.unwrap_or(self.timeout)
  }
}

impl Default for SocketConfig {
  fn default() -> Self {
    Self {
      address: "127.0.0.1".to_string(),
      port: 5489,
      timeout: Duration::from_secs(2),
      accept_timeout: None,
      recv_timeout: None,
      max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
    }
  }
}
