//! Integration tests for the eight literal scenarios and the top-level
//! invariants in spec §8, exercised purely through the public API.
//! Mirrors the original project's `tests/test_e2e.py`,
//! `test_integration_failures.py`, `test_listener_persistence.py`,
//! `test_reconnect_restart.py`, and `test_serverfactory_concurrent.py`.

use std::io::Write;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use json_socket::{Client, Error, FactoryServer, FailureKind, MessageHandler, Server, SocketConfig};
use serde_json::{json, Value};

fn echo_handler(value: Value) -> Result<Option<Value>, json_socket::HandlerError> {
  if value.get("echo").is_some() {
    Ok(Some(value))
  } else {
    Ok(None)
  }
}

fn echo_worker_factory() -> Box<dyn MessageHandler> {
  Box::new(echo_handler)
}

fn start_echo_server() -> (Server, u16) {
  let mut server = Server::new(SocketConfig { port: 0, ..Default::default() }, echo_handler).unwrap();
  let port = server.local_addr().unwrap().port();
  server.start();
  (server, port)
}

fn client_config(port: u16) -> SocketConfig {
  SocketConfig { port, timeout: Duration::from_millis(500), ..Default::default() }
}

/// Short `recv_timeout` so worker threads notice `force_stop()` quickly,
/// keeping shutdown-related assertions comfortably inside their deadlines.
fn factory_config(port: u16) -> SocketConfig {
  SocketConfig { port, recv_timeout: Some(Duration::from_millis(150)), ..Default::default() }
}

fn write_raw_frame(stream: &mut TcpStream, payload: &[u8]) {
  let checksum = crc32fast::hash(payload);
  let mut header = Vec::with_capacity(12);
  header.extend_from_slice(b"JSN1");
  header.extend_from_slice(&(payload.len() as u32).to_be_bytes());
  header.extend_from_slice(&checksum.to_be_bytes());
  stream.write_all(&header).unwrap();
  stream.write_all(payload).unwrap();
}

#[test]
fn scenario_1_echo_round_trip() {
  let (mut server, port) = start_echo_server();
  let mut client = Client::new(client_config(port));
  assert!(client.connect());

  client.send_obj(&json!({"echo": "hello", "i": 1})).unwrap();
  let reply = client.read_obj().unwrap();
  assert_eq!(reply, json!({"echo": "hello", "i": 1}));

  client.close();
  server.stop();
  server.join();
  assert!(!server.is_alive());
}

#[test]
fn scenario_2_sequential_reconnect() {
  let (mut server, port) = start_echo_server();

  let mut client_a = Client::new(client_config(port));
  assert!(client_a.connect());
  client_a.send_obj(&json!({"echo": "one"})).unwrap();
  assert_eq!(client_a.read_obj().unwrap(), json!({"echo": "one"}));
  client_a.close();

  std::thread::sleep(Duration::from_millis(200));

  let mut client_b = Client::new(client_config(port));
  assert!(client_b.connect());
  client_b.send_obj(&json!({"echo": "two"})).unwrap();
  assert_eq!(client_b.read_obj().unwrap(), json!({"echo": "two"}));
  client_b.close();

  server.stop();
  server.join();
}

#[test]
fn scenario_3_partial_message_recovery() {
  let (mut server, port) = start_echo_server();

  {
    let mut raw = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let payload = br#"{"echo":"abcdefghijklmno"}"#;
    let checksum = crc32fast::hash(payload);
    let mut header = Vec::with_capacity(12);
    header.extend_from_slice(b"JSN1");
    header.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    header.extend_from_slice(&checksum.to_be_bytes());
    raw.write_all(&header).unwrap();
    raw.write_all(&payload[..5]).unwrap();
    // `raw` drops here, closing mid-payload.
  }
  std::thread::sleep(Duration::from_millis(100));

  let mut client = Client::new(client_config(port));
  assert!(client.connect());
  client.send_obj(&json!({"echo": "after partial"})).unwrap();
  assert_eq!(client.read_obj().unwrap(), json!({"echo": "after partial"}));

  server.stop();
  server.join();
}

#[test]
fn scenario_4_invalid_json_tolerance() {
  let (mut server, port) = start_echo_server();

  {
    let mut raw = TcpStream::connect(("127.0.0.1", port)).unwrap();
    write_raw_frame(&mut raw, b"not-json");
  }
  std::thread::sleep(Duration::from_millis(150));

  let stats = server.get_client_stats();
  let invalid_json_total: u64 = stats.clients.values().map(|c| c.failures.invalid_json).sum();
  assert_eq!(invalid_json_total, 1);

  let mut client = Client::new(client_config(port));
  assert!(client.connect());
  client.send_obj(&json!({"echo": "ok"})).unwrap();
  assert_eq!(client.read_obj().unwrap(), json!({"echo": "ok"}));

  server.stop();
  server.join();
}

#[test]
fn scenario_5_multi_client_fairness() {
  let mut server = FactoryServer::new(factory_config(0), echo_worker_factory).unwrap();
  let port = server.local_addr().unwrap().port();
  server.start();

  let mut client1 = Client::new(client_config(port));
  assert!(client1.connect());
  std::thread::sleep(Duration::from_millis(50));

  let mut client2 = Client::new(client_config(port));
  assert!(client2.connect());
  std::thread::sleep(Duration::from_millis(50));

  assert!(server.active() >= 2);

  let started = Instant::now();
  client2.send_obj(&json!({"echo": "fast"})).unwrap();
  let reply = client2.read_obj().unwrap();
  assert_eq!(reply, json!({"echo": "fast"}));
  assert!(started.elapsed() < Duration::from_secs(1));

  client1.close();
  client2.close();
  server.stop_all();
}

#[test]
fn scenario_6_stop_with_active_clients() {
  let mut server = FactoryServer::new(factory_config(0), echo_worker_factory).unwrap();
  let port = server.local_addr().unwrap().port();
  server.start();

  let mut client1 = Client::new(client_config(port));
  assert!(client1.connect());
  client1.send_obj(&json!({"echo": "a"})).unwrap();
  assert_eq!(client1.read_obj().unwrap(), json!({"echo": "a"}));

  let mut client2 = Client::new(client_config(port));
  assert!(client2.connect());
  client2.send_obj(&json!({"echo": "b"})).unwrap();
  assert_eq!(client2.read_obj().unwrap(), json!({"echo": "b"}));

  server.stop();

  let deadline = Instant::now() + Duration::from_secs(3);
  while server.is_alive() && Instant::now() < deadline {
    std::thread::sleep(Duration::from_millis(50));
  }
  assert!(!server.is_alive());

  let result: Result<Value, Error> = client1.send_obj(&json!({"echo": "after-stop"})).and_then(|_| client1.read_obj());
  assert!(result.is_err());

  server.join();
}

#[test]
fn scenario_7_oversize_rejection_leaves_socket_open() {
  let (mut server, port) = start_echo_server();
  let mut client = Client::new(SocketConfig {
    port,
    max_message_size: 1024,
    timeout: Duration::from_millis(500),
    ..Default::default()
  });
  assert!(client.connect());

  let big = json!({"echo": "x".repeat(2048)});
  let err = client.send_obj(&big).unwrap_err();
  assert!(matches!(err, Error::Framing(FailureKind::Oversize)));

  client.send_obj(&json!({"echo": "small"})).unwrap();
  assert_eq!(client.read_obj().unwrap(), json!({"echo": "small"}));

  server.stop();
  server.join();
}

#[test]
fn scenario_8_identity_reconciliation() {
  let mut server = FactoryServer::new(factory_config(0), echo_worker_factory).unwrap();
  let port = server.local_addr().unwrap().port();
  server.start();

  let mut client = Client::new(client_config(port));
  assert!(client.connect());

  client.send_obj(&json!({"hello": "world"})).unwrap();
  std::thread::sleep(Duration::from_millis(100));

  client.send_obj(&json!({"client": "svc-42", "echo": "hi"})).unwrap();
  assert_eq!(client.read_obj().unwrap(), json!({"client": "svc-42", "echo": "hi"}));
  std::thread::sleep(Duration::from_millis(100));

  let stats = server.get_client_stats();
  assert_eq!(stats.clients.len(), 1);
  let record = stats.clients.get("svc-42").expect("reconciled record present");
  assert_eq!(record.messages_in, 2);

  client.close();
  server.stop_all();
}
