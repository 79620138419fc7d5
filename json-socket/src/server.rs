//! Single-connection server (C4): accept loop, per-connection message loop,
//! wakeup for shutdown, owner-supplied handler (spec §4.4).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::SocketConfig;
use crate::endpoint::{format_peer_identity, AcceptOutcome, Endpoint};
use crate::handler::MessageHandler;
use crate::message_loop::{self, Outcome};
use crate::stats::{StatsRegistry, StatsSnapshot};
use crate::wakeup::{Waker, Wakeup};

/// How often the accept loop polls listener + wakeup. Small enough that
/// `stop()` is observed promptly; large enough not to busy-spin.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

pub struct Server {
  config: SocketConfig,
  endpoint: Option<Endpoint>,
  handler: Option<Box<dyn MessageHandler>>,
  wakeup: Option<Wakeup>,
  waker: Waker,
  local_addr: SocketAddr,
  running: Arc<AtomicBool>,
  alive: Arc<AtomicBool>,
  stats: Arc<StatsRegistry>,
  thread: Option<JoinHandle<()>>,
}

impl Server {
  /// Binds and starts listening immediately, per C2's responsibilities;
  /// `start()` only launches the accept-loop thread. This lets callers
  /// read back an ephemeral port (`port: 0`) before starting.
  pub fn new(config: SocketConfig, handler: impl MessageHandler + 'static) -> std::io::Result<Self> {
    let mut endpoint = Endpoint::new(config.max_message_size, config.effective_recv_timeout());
    let local_addr = endpoint.listen(&config.address, config.port)?;
    let (wakeup, waker) = Wakeup::new()?;
    Ok(Self {
      config,
      endpoint: Some(endpoint),
      handler: Some(Box::new(handler)),
      wakeup: Some(wakeup),
      waker,
      local_addr,
      running: Arc::new(AtomicBool::new(false)),
      alive: Arc::new(AtomicBool::new(false)),
      stats: StatsRegistry::new(),
      thread: None,
    })
  }

  pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
    Ok(self.local_addr)
  }

  /// Launches the accept-loop thread. No-op if already running.
  pub fn start(&mut self) {
    if self.thread.is_some() {
      return;
    }
    let endpoint = self.endpoint.take().expect("start() called twice");
    let handler = self.handler.take().expect("start() called twice");
    let mut wakeup = self.wakeup.take().expect("start() called twice");
    let stats = self.stats.clone();
    let running = self.running.clone();
    let alive = self.alive.clone();
    let accept_timeout = Some(self.config.effective_accept_timeout());

    running.store(true, Ordering::SeqCst);
    alive.store(true, Ordering::SeqCst);

    let join_handle = std::thread::spawn(move || {
      Self::run(endpoint, &mut wakeup, handler.as_ref(), &stats, &running, accept_timeout);
      alive.store(false, Ordering::SeqCst);
    });
    self.thread = Some(join_handle);
  }

  fn run(
    mut endpoint: Endpoint,
    wakeup: &mut Wakeup,
    handler: &dyn MessageHandler,
    stats: &StatsRegistry,
    running: &AtomicBool,
    accept_timeout: Option<Duration>,
  ) {
    while running.load(Ordering::SeqCst) {
      match endpoint.accept_connection(wakeup, accept_timeout, POLL_INTERVAL) {
        Ok(AcceptOutcome::Woken) | Ok(AcceptOutcome::TimedOut) => continue,
        Ok(AcceptOutcome::Accepted(addr)) => {
          let client_id = format_peer_identity(addr);
          stats.record_connect(client_id.clone());
          tracing::info!(client = %client_id, "accepted connection");

          while running.load(Ordering::SeqCst) {
            match message_loop::run_iteration(&mut endpoint, handler, stats) {
              Outcome::Continue => continue,
              Outcome::Stop => break,
            }
          }

          stats.record_disconnect();
          endpoint.close_connection();
          tracing::info!(client = %client_id, "connection closed");
        }
        Err(err) => {
          tracing::debug!(error = %err, "accept_connection error, continuing");
        }
      }
    }
    endpoint.close();
  }

  /// Clears the running flag and signals the wakeup; does not join.
  pub fn stop(&self) {
    self.running.store(false, Ordering::SeqCst);
    self.waker.signal();
  }

  pub fn join(&mut self) {
    if let Some(handle) = self.thread.take() {
      let _ = handle.join();
    }
  }

  /// True while the accept-loop thread is running.
  pub fn is_alive(&self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }

  pub fn get_client_stats(&self) -> StatsSnapshot {
    self.stats.snapshot()
  }

  /// Best-effort close. If the accept loop is running, it already closes
  /// its endpoint on exit from `stop()`/`join()`; this only matters for a
  /// server that was constructed but never started.
  pub fn close(&mut self) {
    if let Some(endpoint) = self.endpoint.as_mut() {
      endpoint.close();
    }
  }
}
