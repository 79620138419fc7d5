//! Multi-connection server (C6): accept loop handing each new connection to
//! a fresh worker, tracking the live set, archiving terminated workers'
//! stats, and joining on shutdown (spec §4.6).

use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::SocketConfig;
use crate::endpoint::{AcceptOutcome, Endpoint};
use crate::handler::WorkerFactory;
use crate::stats::{combine_raw, StatsRegistry, StatsSnapshot};
use crate::wakeup::{Waker, Wakeup};
use crate::worker::Worker;

/// Matches the teacher's/spec's "`_wait_to_exit` polls... at 0.2 s
/// intervals — an intentionally simple poll since worker counts are small
/// and shutdown is a rare event" (spec §4.6).
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// ## FACTORY SERVER
///
/// Multi-connection server: accepts any number of simultaneous clients,
/// handing each one to a freshly constructed [Worker].
///
/// Unlike [Server], which serves one connection at a time on its own accept
/// thread, a `FactoryServer` keeps a live set of workers and purges it once
/// per trip around the accept loop — a terminated worker is joined and its
/// stats merged into an archive before the set is touched again, so the
/// live set never grows a backlog of dead entries between accepts.
///
/// Shutdown ([FactoryServer::stop_all]) drains the live set at a fixed poll
/// interval rather than interrupting worker threads directly: a worker
/// notices the stop request the same way it notices the end of any other
/// iteration, and the drain loop just waits for that to happen.
///
/// [Server]: crate::server::Server
/// [Worker]: crate::worker::Worker
pub struct FactoryServer {
  config: SocketConfig,
  worker_factory: Option<Box<dyn WorkerFactory>>,
  endpoint: Option<Endpoint>,
  wakeup: Option<Wakeup>,
  waker: Waker,
  local_addr: std::net::SocketAddr,
  running: Arc<AtomicBool>,
  alive: Arc<AtomicBool>,
  live_workers: Arc<Mutex<Vec<Worker>>>,
  archive: Arc<StatsRegistry>,
  thread: Option<JoinHandle<()>>,
}

impl FactoryServer {
  pub fn new(config: SocketConfig, worker_factory: impl WorkerFactory + 'static) -> std::io::Result<Self> {
    let mut endpoint = Endpoint::new(config.max_message_size, config.effective_recv_timeout());
    let local_addr = endpoint.listen(&config.address, config.port)?;
    let (wakeup, waker) = Wakeup::new()?;
    Ok(Self {
      config,
      worker_factory: Some(Box::new(worker_factory)),
      endpoint: Some(endpoint),
      wakeup: Some(wakeup),
      waker,
      local_addr,
      running: Arc::new(AtomicBool::new(false)),
      alive: Arc::new(AtomicBool::new(false)),
      live_workers: Arc::new(Mutex::new(Vec::new())),
      archive: StatsRegistry::new(),
      thread: None,
    })
  }

  pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
    Ok(self.local_addr)
  }

  pub fn start(&mut self) {
    if self.thread.is_some() {
      return;
    }
    let mut endpoint = self.endpoint.take().expect("start() called twice");
    let worker_factory = self.worker_factory.take().expect("start() called twice");
    let mut wakeup = self.wakeup.take().expect("start() called twice");
    let running = self.running.clone();
    let alive = self.alive.clone();
    let live_workers = self.live_workers.clone();
    let archive = self.archive.clone();
    let config = self.config.clone();

    running.store(true, Ordering::SeqCst);
    alive.store(true, Ordering::SeqCst);

    let join_handle = std::thread::spawn(move || {
      Self::run(&mut endpoint, &mut wakeup, worker_factory.as_ref(), &running, &live_workers, &archive, &config);
      endpoint.close();
      alive.store(false, Ordering::SeqCst);
    });
    self.thread = Some(join_handle);
  }

  fn run(
    endpoint: &mut Endpoint,
    wakeup: &mut Wakeup,
    worker_factory: &dyn WorkerFactory,
    running: &AtomicBool,
    live_workers: &Mutex<Vec<Worker>>,
    archive: &StatsRegistry,
    config: &SocketConfig,
  ) {
    while running.load(Ordering::SeqCst) {
      Self::purge_terminated(live_workers, archive);

      match endpoint.accept_connection(wakeup, Some(config.effective_accept_timeout()), ACCEPT_POLL_INTERVAL) {
        Ok(AcceptOutcome::Woken) | Ok(AcceptOutcome::TimedOut) => continue,
        Ok(AcceptOutcome::Accepted(_addr)) => {
          let Some(stream) = endpoint.take_conn() else { continue };

          if !running.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            break;
          }

          let mut worker = Worker::new(config, worker_factory.spawn_handler());
          match worker.swap_socket(stream) {
            Ok(()) => {
              worker.start();
              live_workers.lock().unwrap().push(worker);
            }
            Err(error) => {
              tracing::warn!(%error, "failed to hand connection to a new worker");
            }
          }
        }
        Err(error) => {
          tracing::debug!(%error, "accept_connection error, continuing");
        }
      }
    }

    Self::stop_all_workers(live_workers, archive);
  }

  fn purge_terminated(live_workers: &Mutex<Vec<Worker>>, archive: &StatsRegistry) {
    let mut terminated = Vec::new();
    {
      let mut guard = live_workers.lock().unwrap();
      let mut i = 0;
      while i < guard.len() {
        if guard[i].is_terminated() {
          terminated.push(guard.remove(i));
        } else {
          i += 1;
        }
      }
    }
    for mut worker in terminated {
      worker.join();
      worker.archive_into(archive);
    }
  }

  fn stop_all_workers(live_workers: &Mutex<Vec<Worker>>, archive: &StatsRegistry) {
    loop {
      let drained: Vec<Worker> = {
        let mut guard = live_workers.lock().unwrap();
        std::mem::take(&mut *guard)
      };
      if drained.is_empty() {
        break;
      }
      for mut worker in drained {
        worker.force_stop();
        worker.join();
        worker.archive_into(archive);
      }
      std::thread::sleep(DRAIN_POLL_INTERVAL);
      if live_workers.lock().unwrap().is_empty() {
        break;
      }
    }
  }

  /// Clears the running flag and signals the wakeup; does not wait for
  /// live workers to finish. Use [`FactoryServer::stop_all`] for that.
  pub fn stop(&self) {
    self.running.store(false, Ordering::SeqCst);
    self.waker.signal();
  }

  /// `stop()` plus `join()`: blocks until the accept loop and every live
  /// worker has terminated (spec §4.6 "Shutdown").
  pub fn stop_all(&mut self) {
    self.stop();
    self.join();
  }

  pub fn join(&mut self) {
    if let Some(handle) = self.thread.take() {
      let _ = handle.join();
    }
  }

  pub fn is_alive(&self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }

  /// Count of currently live (not-yet-terminated) workers.
  pub fn active(&self) -> usize {
    self.live_workers.lock().unwrap().len()
  }

  /// Aggregates live workers' stats with the archive, per spec §9 "Stats
  /// aggregation": copy worker handles under the live-set lock only long
  /// enough to clone their `Arc<StatsRegistry>`, then read each
  /// registry's record without holding the live-set lock.
  pub fn get_client_stats(&self) -> StatsSnapshot {
    let live_registries: Vec<Arc<StatsRegistry>> = {
      let guard = self.live_workers.lock().unwrap();
      guard.iter().map(|w| w.stats()).collect()
    };
    let mut maps: Vec<_> = live_registries.iter().map(|r| r.raw_snapshot()).collect();
    maps.push(self.archive.raw_snapshot());
    combine_raw(maps)
  }
}
