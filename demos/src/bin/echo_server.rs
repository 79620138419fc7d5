//! Example echo server (spec SPEC_FULL.md §4.8): replies with the input
//! unchanged when it is an object containing key `echo`, else replies
//! with nothing. Not part of the core library.

use clap::Parser;
use json_socket::{Server, SocketConfig};
use serde_json::Value;
use std::time::Duration;

#[derive(Parser)]
struct Args {
  #[arg(long, default_value = "127.0.0.1")]
  address: String,

  #[arg(long, default_value_t = 5489)]
  port: u16,

  #[arg(long, default_value_t = 2.0)]
  timeout: f64,
}

fn echo(value: Value) -> Result<Option<Value>, json_socket::HandlerError> {
  Ok(value.get("echo").map(|_| value))
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let args = Args::parse();
  let config = SocketConfig {
    address: args.address.clone(),
    port: args.port,
    timeout: Duration::from_secs_f64(args.timeout),
    ..Default::default()
  };

  let mut server = Server::new(config, echo).expect("failed to bind echo server");
  let local_addr = server.local_addr().expect("server must have a local address");
  tracing::info!(%local_addr, "echo server listening");
  server.start();

  ctrlc_wait();

  server.stop();
  server.join();
}

/// Blocks until Ctrl-C, without pulling in a signal-handling crate the
/// teacher's own stack doesn't use: a simple blocking read on stdin works
/// fine for a demo binary meant to be stopped by the terminal.
fn ctrlc_wait() {
  let mut line = String::new();
  println!("press enter to stop the server");
  let _ = std::io::stdin().read_line(&mut line);
}
