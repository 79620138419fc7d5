//! Worker (C5): owns exactly one accepted connection handed to it by the
//! multi-connection server, runs a message loop identical in shape to the
//! single-connection server's (spec §4.5).

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::SocketConfig;
use crate::endpoint::{format_peer_identity, Endpoint};
use crate::handler::MessageHandler;
use crate::message_loop::{self, Outcome};
use crate::stats::StatsRegistry;

/// One worker thread and the connection it owns.
pub struct Worker {
  endpoint: Option<Endpoint>,
  handler: Option<Box<dyn MessageHandler>>,
  stats: Arc<StatsRegistry>,
  running: Arc<AtomicBool>,
  terminated: Arc<AtomicBool>,
  archived: AtomicBool,
  thread: Option<JoinHandle<()>>,
}

impl Worker {
  pub fn new(config: &SocketConfig, handler: Box<dyn MessageHandler>) -> Self {
    Self {
      endpoint: Some(Endpoint::new(config.max_message_size, config.effective_recv_timeout())),
      handler: Some(handler),
      stats: StatsRegistry::new(),
      running: Arc::new(AtomicBool::new(true)),
      terminated: Arc::new(AtomicBool::new(false)),
      archived: AtomicBool::new(false),
      thread: None,
    }
  }

  /// Hands this worker the socket accepted by the factory server.
  pub fn swap_socket(&mut self, stream: TcpStream) -> std::io::Result<()> {
    self.endpoint
      .as_mut()
      .expect("swap_socket called after start()")
      .swap_socket(stream)
  }

  /// Launches the worker's message loop on its own thread.
  pub fn start(&mut self) {
    let mut endpoint = self.endpoint.take().expect("start() called twice");
    let handler = self.handler.take().expect("start() called twice");
    let stats = self.stats.clone();
    let running = self.running.clone();
    let terminated = self.terminated.clone();

    let join_handle = std::thread::spawn(move || {
      let peer = endpoint.peer_addr();
      let client_id = peer.map(format_peer_identity).unwrap_or_else(|| "unknown".to_string());
      stats.record_connect(client_id.clone());
      tracing::info!(client = %client_id, "worker accepted connection");

      while running.load(Ordering::SeqCst) {
        match message_loop::run_iteration(&mut endpoint, handler.as_ref(), &stats) {
          Outcome::Continue => continue,
          Outcome::Stop => break,
        }
      }

      stats.record_disconnect();
      endpoint.close_connection();
      terminated.store(true, Ordering::SeqCst);
      tracing::info!(client = %client_id, "worker terminated");
    });
    self.thread = Some(join_handle);
  }

  /// Signals the worker's loop to stop at its next iteration boundary.
  /// The loop notices within one `recv_timeout` at most.
  pub fn force_stop(&self) {
    self.running.store(false, Ordering::SeqCst);
  }

  pub fn is_terminated(&self) -> bool {
    self.terminated.load(Ordering::SeqCst)
  }

  pub fn join(&mut self) {
    if let Some(handle) = self.thread.take() {
      let _ = handle.join();
    }
  }

  pub fn stats(&self) -> Arc<StatsRegistry> {
    self.stats.clone()
  }

  /// Merges this worker's stats into `archive`, exactly once (spec
  /// §4.7: "idempotent on the worker").
  pub fn archive_into(&self, archive: &StatsRegistry) {
    if self.archived.swap(true, Ordering::SeqCst) {
      return;
    }
    self.stats.drain_into(archive);
  }
}
