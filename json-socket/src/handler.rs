//! Runtime polymorphism for message handlers (spec §9: "Re-express as an
//! interface... no hierarchy is required").
//!
//! The source this spec was distilled from uses subclassing with a virtual
//! `_process_message`. A trait object plays that role here, with a blanket
//! impl so any `Fn(Value) -> Result<Option<Value>, HandlerError>` closure
//! can be passed directly to `Server::new` without naming a type.

use serde_json::Value;

/// An error raised by a handler while processing one decoded message.
/// Recorded as a `handler` failure and closes the connection (spec §4.4
/// step 3).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
  pub fn new(message: impl Into<String>) -> Self {
    Self(message.into())
  }
}

/// Decodes one JSON value, optionally produces a reply. `Ok(None)` means
/// "no reply" (spec §4.4: "the handler... returns either a JSON-serialisable
/// value... or a null sentinel").
pub trait MessageHandler: Send + Sync {
  fn handle(&self, message: Value) -> Result<Option<Value>, HandlerError>;
}

impl<F> MessageHandler for F
where
  F: Fn(Value) -> Result<Option<Value>, HandlerError> + Send + Sync,
{
  fn handle(&self, message: Value) -> Result<Option<Value>, HandlerError> {
    self(message)
  }
}

/// A capability object handing the multi-connection server a fresh
/// handler-endowed worker per accepted connection (spec §9: "parameterised
/// by a worker constructor").
pub trait WorkerFactory: Send + Sync {
  fn spawn_handler(&self) -> Box<dyn MessageHandler>;
}

impl<F> WorkerFactory for F
where
  F: Fn() -> Box<dyn MessageHandler> + Send + Sync,
{
  fn spawn_handler(&self) -> Box<dyn MessageHandler> {
    self()
  }
}
