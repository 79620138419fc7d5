//! Example echo client (spec SPEC_FULL.md §4.8): connects with retry,
//! sends one JSON object, prints the reply or reports a timeout. Not part
//! of the core library.

use clap::Parser;
use json_socket::{Client, SocketConfig};
use std::time::Duration;

#[derive(Parser)]
struct Args {
  #[arg(long, default_value = "127.0.0.1")]
  address: String,

  #[arg(long, default_value_t = 5489)]
  port: u16,

  #[arg(long, default_value_t = 2.0)]
  timeout: f64,

  /// JSON text to send, e.g. '{"echo":"hello"}'.
  #[arg(long, default_value = r#"{"echo":"hello"}"#)]
  message: String,
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let args = Args::parse();
  let value: serde_json::Value = serde_json::from_str(&args.message).expect("--message must be valid JSON");

  let config = SocketConfig {
    address: args.address,
    port: args.port,
    timeout: Duration::from_secs_f64(args.timeout),
    ..Default::default()
  };
  let mut client = Client::new(config);

  if !client.connect() {
    eprintln!("failed to connect after retrying");
    std::process::exit(1);
  }

  if let Err(error) = client.send_obj(&value) {
    eprintln!("send failed: {error}");
    std::process::exit(1);
  }

  match client.read_obj() {
    Ok(reply) => println!("{reply}"),
    Err(json_socket::Error::Timeout) => println!("(no reply within timeout)"),
    Err(error) => {
      eprintln!("read failed: {error}");
      std::process::exit(1);
    }
  }

  client.close();
}
