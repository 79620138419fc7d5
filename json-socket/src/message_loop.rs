//! One iteration of the message loop shared by the single-connection server
//! (C4) and the worker (C5) — spec §4.4 steps 2-5, reused verbatim by §4.5.

use serde_json::Value;

use crate::endpoint::Endpoint;
use crate::error::{Error, FailureKind};
use crate::handler::MessageHandler;
use crate::stats::StatsRegistry;

pub(crate) enum Outcome {
  Continue,
  Stop,
}

/// A decoded object's self-asserted identity, if any (spec §3, §4.7):
/// an object with a `client` or `client_id` field, string or numeric.
fn extract_identity(value: &Value) -> Option<String> {
  let object = value.as_object()?;
  let field = object.get("client").or_else(|| object.get("client_id"))?;
  match field {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// Runs one read-decode-handle-reply cycle. Never panics on protocol or
/// handler faults: every failure path records a stat and returns
/// `Outcome::Stop` so the caller closes the connection, per spec §4.4.
pub(crate) fn run_iteration(endpoint: &mut Endpoint, handler: &dyn MessageHandler, stats: &StatsRegistry) -> Outcome {
  let decoded = match endpoint.read_obj() {
    Ok(decoded) => decoded,
    Err(Error::Timeout) => {
      stats.record_failure(FailureKind::Timeout);
      return Outcome::Continue;
    }
    Err(Error::ConnectionBroken) => {
      tracing::info!("connection closed by peer");
      return Outcome::Stop;
    }
    Err(err) => {
      if let Some(kind) = err.failure_kind() {
        stats.record_failure(kind);
      }
      tracing::warn!(error = %err, "framing fault, closing connection");
      return Outcome::Stop;
    }
  };

  if let Some(identity) = extract_identity(&decoded.value) {
    stats.reconcile_identity(&identity);
  }
  stats.record_message_in(decoded.payload_len);

  let reply = match handler.handle(decoded.value) {
    Ok(reply) => reply,
    Err(handler_err) => {
      stats.record_failure(FailureKind::Handler);
      tracing::warn!(error = %handler_err, "handler error, closing connection");
      return Outcome::Stop;
    }
  };

  let Some(reply) = reply else {
    return Outcome::Continue;
  };

  match endpoint.send_obj(&reply) {
    Ok(len) => {
      stats.record_message_out(len);
      Outcome::Continue
    }
    Err(err) => {
      if let Some(kind) = err.failure_kind() {
        stats.record_failure(kind);
      }
      tracing::warn!(error = %err, "send failed, closing connection");
      Outcome::Stop
    }
  }
}
