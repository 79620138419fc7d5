//! Per-client statistics subsystem (C7).
//!
//! Every server and worker owns a [`StatsRegistry`] guarding a map of
//! [`ClientStats`] keyed by client id, plus the id of whichever client is
//! currently active on that owner's single connection. A factory server
//! additionally owns an *archive* registry that absorbed workers merge
//! into on termination (§4.7 "Archival").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::FailureKind;

fn now_unix() -> f64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs_f64()
}

fn max_option(a: Option<f64>, b: Option<f64>) -> Option<f64> {
  match (a, b) {
    (Some(a), Some(b)) => Some(a.max(b)),
    (Some(a), None) => Some(a),
    (None, b) => b,
  }
}

/// Counters for the closed set of failure kinds in spec §3.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FailureCounts {
  pub timeout: u64,
  pub bad_write: u64,
  pub bad_crc: u64,
  pub bad_header: u64,
  pub oversize: u64,
  pub invalid_utf8: u64,
  pub invalid_json: u64,
  pub handler: u64,
  pub framing: u64,
}

impl FailureCounts {
  fn increment(&mut self, kind: FailureKind) {
    let counter = match kind {
      FailureKind::Timeout => &mut self.timeout,
      FailureKind::BadWrite => &mut self.bad_write,
      FailureKind::BadCrc => &mut self.bad_crc,
      FailureKind::BadHeader => &mut self.bad_header,
      FailureKind::Oversize => &mut self.oversize,
      FailureKind::InvalidUtf8 => &mut self.invalid_utf8,
      FailureKind::InvalidJson => &mut self.invalid_json,
      FailureKind::Handler => &mut self.handler,
      FailureKind::Framing => &mut self.framing,
    };
    *counter += 1;
  }

  fn merge(&mut self, other: &FailureCounts) {
    self.timeout += other.timeout;
    self.bad_write += other.bad_write;
    self.bad_crc += other.bad_crc;
    self.bad_header += other.bad_header;
    self.oversize += other.oversize;
    self.invalid_utf8 += other.invalid_utf8;
    self.invalid_json += other.invalid_json;
    self.handler += other.handler;
    self.framing += other.framing;
  }
}

/// Raw per-client record, as stored in a [`StatsRegistry`]. `connected_since`
/// is the hidden monotonic timestamp from spec §3; it never serialises.
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
  pub client_id: String,
  pub connected: bool,
  pub connects: u64,
  pub disconnects: u64,
  pub messages_in: u64,
  pub messages_out: u64,
  pub bytes_in: u64,
  pub bytes_out: u64,
  pub total_connected_duration: f64,
  pub failures: FailureCounts,
  pub last_connect_ts: Option<f64>,
  pub last_disconnect_ts: Option<f64>,
  pub last_message_ts: Option<f64>,
  connected_since: Option<Instant>,
}

impl ClientStats {
  /// Folds `other` into `self` per the merge rule in spec §4.7 and §3:
  /// counters sum, failure maps sum element-wise, timestamps take the
  /// max, `connected` is OR, `connected_since` keeps the earliest.
  fn merge_from(&mut self, other: ClientStats) {
    self.connects += other.connects;
    self.disconnects += other.disconnects;
    self.messages_in += other.messages_in;
    self.messages_out += other.messages_out;
    self.bytes_in += other.bytes_in;
    self.bytes_out += other.bytes_out;
    self.total_connected_duration += other.total_connected_duration;
    self.failures.merge(&other.failures);
    self.last_connect_ts = max_option(self.last_connect_ts, other.last_connect_ts);
    self.last_disconnect_ts = max_option(self.last_disconnect_ts, other.last_disconnect_ts);
    self.last_message_ts = max_option(self.last_message_ts, other.last_message_ts);
    self.connected = self.connected || other.connected;
    self.connected_since = match (self.connected_since, other.connected_since) {
      (Some(a), Some(b)) => Some(a.min(b)),
      (Some(a), None) => Some(a),
      (None, b) => b,
    };
  }
}

/// A client record as returned by [`StatsRegistry::snapshot`], with the
/// snapshot-only derived fields (`avg_payload_in/out`, `connected_duration`)
/// filled in per spec §4.7.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatsView {
  pub client_id: String,
  pub connected: bool,
  pub connects: u64,
  pub disconnects: u64,
  pub messages_in: u64,
  pub messages_out: u64,
  pub bytes_in: u64,
  pub bytes_out: u64,
  pub avg_payload_in: f64,
  pub avg_payload_out: f64,
  pub total_connected_duration: f64,
  pub connected_duration: f64,
  pub failures: FailureCounts,
  pub last_connect_ts: Option<f64>,
  pub last_disconnect_ts: Option<f64>,
  pub last_message_ts: Option<f64>,
}

/// `{connected_clients, clients}` as returned by `get_client_stats()`.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
  pub connected_clients: usize,
  pub clients: HashMap<String, ClientStatsView>,
}

fn view_from_raw(rec: &ClientStats, now: Instant) -> (ClientStatsView, bool) {
  let live = rec.connected;
  let connected_duration = if live {
    rec.connected_since
      .map(|since| now.saturating_duration_since(since).as_secs_f64())
      .unwrap_or(0.0)
  } else {
    0.0
  };
  let avg_payload_in = if rec.messages_in > 0 {
    rec.bytes_in as f64 / rec.messages_in as f64
  } else {
    0.0
  };
  let avg_payload_out = if rec.messages_out > 0 {
    rec.bytes_out as f64 / rec.messages_out as f64
  } else {
    0.0
  };
  let view = ClientStatsView {
    client_id: rec.client_id.clone(),
    connected: rec.connected,
    connects: rec.connects,
    disconnects: rec.disconnects,
    messages_in: rec.messages_in,
    messages_out: rec.messages_out,
    bytes_in: rec.bytes_in,
    bytes_out: rec.bytes_out,
    avg_payload_in,
    avg_payload_out,
    total_connected_duration: rec.total_connected_duration + connected_duration,
    connected_duration,
    failures: rec.failures,
    last_connect_ts: rec.last_connect_ts,
    last_disconnect_ts: rec.last_disconnect_ts,
    last_message_ts: rec.last_message_ts,
  };
  (view, live)
}

fn build_snapshot(raw: HashMap<String, ClientStats>) -> StatsSnapshot {
  let now = Instant::now();
  let mut clients = HashMap::with_capacity(raw.len());
  let mut connected_clients = 0usize;
  for (id, rec) in raw {
    let (view, live) = view_from_raw(&rec, now);
    if live {
      connected_clients += 1;
    }
    clients.insert(id, view);
  }
  StatsSnapshot { connected_clients, clients }
}

/// Merges raw per-client maps (e.g. a live worker's stats and the server's
/// archive) into one combined snapshot, per spec §9 "Stats aggregation":
/// a pure function over frozen copies, taken without holding any I/O lock.
pub fn combine_raw(maps: impl IntoIterator<Item = HashMap<String, ClientStats>>) -> StatsSnapshot {
  let mut combined: HashMap<String, ClientStats> = HashMap::new();
  for map in maps {
    for (id, rec) in map {
      match combined.remove(&id) {
        Some(mut existing) => {
          existing.merge_from(rec);
          combined.insert(id, existing);
        }
        None => {
          combined.insert(id, rec);
        }
      }
    }
  }
  build_snapshot(combined)
}

#[derive(Default)]
struct Inner {
  clients: HashMap<String, ClientStats>,
  active_client_id: Option<String>,
}

/// ## STATS REGISTRY
///
/// Thread-safe per-owner stats map. One registry per [`crate::server::Server`],
/// [`crate::worker::Worker`], or factory server archive.
///
/// A registry tracks at most one *active* client at a time — the id most
/// recently passed to [`StatsRegistry::record_connect`] — because every
/// owner of a registry (a [`crate::server::Server`]'s single connection, a
/// [`crate::worker::Worker`]'s single connection) only ever serves one peer
/// at once. [`StatsRegistry::reconcile_identity`] re-keys that active
/// client's record when it later asserts a different id (e.g. a `client`
/// field on some message past the first), merging into whatever record
/// already exists under the new id rather than discarding either history.
///
/// A factory server's archive registry is different in kind: nothing ever
/// calls `record_connect` on it directly. It only grows by absorbing
/// terminated workers' registries wholesale via
/// [`StatsRegistry::drain_into`].
pub struct StatsRegistry {
  inner: Mutex<Inner>,
}

impl StatsRegistry {
  pub fn new() -> Arc<Self> {
    Arc::new(Self { inner: Mutex::new(Inner::default()) })
  }

  /// Records a connect event and makes `client_id` the active identity.
  pub fn record_connect(&self, client_id: String) {
    let mut inner = self.inner.lock().unwrap();
    let now = now_unix();
    let since = Instant::now();
    let entry = inner
      .clients
      .entry(client_id.clone())
      .or_insert_with(|| ClientStats { client_id: client_id.clone(), ..Default::default() });
    entry.connected = true;
    entry.connects += 1;
    entry.last_connect_ts = Some(now);
    if entry.connected_since.is_none() {
      entry.connected_since = Some(since);
    }
    inner.active_client_id = Some(client_id);
  }

  /// Records a disconnect against the currently active client, if any.
  pub fn record_disconnect(&self) {
    let mut inner = self.inner.lock().unwrap();
    let Some(active_id) = inner.active_client_id.take() else { return };
    if let Some(entry) = inner.clients.get_mut(&active_id) {
      if entry.connected {
        entry.disconnects += 1;
        entry.last_disconnect_ts = Some(now_unix());
        if let Some(since) = entry.connected_since.take() {
          entry.total_connected_duration += since.elapsed().as_secs_f64();
        }
        entry.connected = false;
      }
    }
  }

  pub fn record_message_in(&self, size: usize) {
    let mut inner = self.inner.lock().unwrap();
    let Some(active_id) = inner.active_client_id.clone() else { return };
    let now = now_unix();
    if let Some(entry) = inner.clients.get_mut(&active_id) {
      entry.messages_in += 1;
      entry.bytes_in += size as u64;
      entry.last_message_ts = Some(now);
    }
  }

  pub fn record_message_out(&self, size: usize) {
    let mut inner = self.inner.lock().unwrap();
    let Some(active_id) = inner.active_client_id.clone() else { return };
    let now = now_unix();
    if let Some(entry) = inner.clients.get_mut(&active_id) {
      entry.messages_out += 1;
      entry.bytes_out += size as u64;
      entry.last_message_ts = Some(now);
    }
  }

  pub fn record_failure(&self, kind: FailureKind) {
    let mut inner = self.inner.lock().unwrap();
    let Some(active_id) = inner.active_client_id.clone() else { return };
    if let Some(entry) = inner.clients.get_mut(&active_id) {
      entry.failures.increment(kind);
    }
  }

  /// Re-keys the active client to `new_id` (its self-asserted identity),
  /// merging with any existing record under that key. No-op if the active
  /// client already has this id, or if there is no active client.
  pub fn reconcile_identity(&self, new_id: &str) {
    let mut inner = self.inner.lock().unwrap();
    let Some(old_id) = inner.active_client_id.clone() else { return };
    if old_id == new_id {
      return;
    }
    let Some(mut record) = inner.clients.remove(&old_id) else { return };
    record.client_id = new_id.to_string();
    match inner.clients.remove(new_id) {
      Some(mut existing) => {
        existing.merge_from(record);
        inner.clients.insert(new_id.to_string(), existing);
      }
      None => {
        inner.clients.insert(new_id.to_string(), record);
      }
    }
    inner.active_client_id = Some(new_id.to_string());
  }

  /// A deep copy of the raw per-client map, for aggregation across
  /// multiple registries (factory server snapshot).
  pub fn raw_snapshot(&self) -> HashMap<String, ClientStats> {
    self.inner.lock().unwrap().clients.clone()
  }

  pub fn snapshot(&self) -> StatsSnapshot {
    build_snapshot(self.raw_snapshot())
  }

  /// Drains all records into `archive`, clearing self. Archived records
  /// are forced `connected = false` per §4.7. Call exactly once per
  /// worker termination; calling again is harmless (drains nothing).
  pub fn drain_into(&self, archive: &StatsRegistry) {
    let mut inner = self.inner.lock().unwrap();
    let mut archive_inner = archive.inner.lock().unwrap();
    for (id, mut rec) in inner.clients.drain() {
      if let Some(since) = rec.connected_since.take() {
        rec.total_connected_duration += since.elapsed().as_secs_f64();
      }
      rec.connected = false;
      match archive_inner.clients.remove(&id) {
        Some(mut existing) => {
          existing.merge_from(rec);
          archive_inner.clients.insert(id, existing);
        }
        None => {
          archive_inner.clients.insert(id, rec);
        }
      }
    }
    inner.active_client_id = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn connect_then_message_then_disconnect() {
    let registry = StatsRegistry::new();
    registry.record_connect("127.0.0.1:9000".to_string());
    registry.record_message_in(10);
    registry.record_message_out(4);
    let snap = registry.snapshot();
    assert_eq!(snap.connected_clients, 1);
    let rec = &snap.clients["127.0.0.1:9000"];
    assert!(rec.connected);
    assert_eq!(rec.messages_in, 1);
    assert_eq!(rec.bytes_in, 10);
    assert_eq!(rec.avg_payload_out, 4.0);

    registry.record_disconnect();
    let snap = registry.snapshot();
    assert_eq!(snap.connected_clients, 0);
    let rec = &snap.clients["127.0.0.1:9000"];
    assert!(!rec.connected);
    assert_eq!(rec.disconnects, 1);
    assert!(rec.total_connected_duration >= 0.0);
  }

  #[test]
  fn reconciliation_merges_anonymous_and_named_identity() {
    let registry = StatsRegistry::new();
    registry.record_connect("127.0.0.1:9001".to_string());
    registry.record_message_in(5);
    registry.reconcile_identity("svc-42");
    registry.record_message_in(5);
    let snap = registry.snapshot();
    assert_eq!(snap.clients.len(), 1);
    let rec = &snap.clients["svc-42"];
    assert_eq!(rec.messages_in, 2);
    assert!(!snap.clients.contains_key("127.0.0.1:9001"));
  }

  #[test]
  fn disconnects_never_exceed_connects() {
    let registry = StatsRegistry::new();
    registry.record_connect("a".to_string());
    registry.record_disconnect();
    registry.record_disconnect();
    let snap = registry.snapshot();
    let rec = &snap.clients["a"];
    assert!(rec.disconnects <= rec.connects);
  }

  #[test]
  fn failure_merge_sums_elementwise() {
    let a = StatsRegistry::new();
    a.record_connect("x".to_string());
    a.record_failure(FailureKind::Timeout);
    a.record_disconnect();

    let b = StatsRegistry::new();
    b.record_connect("x".to_string());
    b.record_failure(FailureKind::Timeout);
    b.record_disconnect();

    let combined = combine_raw([a.raw_snapshot(), b.raw_snapshot()]);
    assert_eq!(combined.clients["x"].failures.timeout, 2);
    assert_eq!(combined.clients["x"].connects, 2);
  }

  #[test]
  fn drain_into_archives_with_connected_false() {
    let worker_stats = StatsRegistry::new();
    worker_stats.record_connect("127.0.0.1:9002".to_string());
    let archive = StatsRegistry::new();
    worker_stats.drain_into(&archive);

    let snap = archive.snapshot();
    let rec = &snap.clients["127.0.0.1:9002"];
    assert!(!rec.connected);
    assert_eq!(rec.connected_duration, 0.0);

    let empty = worker_stats.snapshot();
    assert!(empty.clients.is_empty());
  }
}
