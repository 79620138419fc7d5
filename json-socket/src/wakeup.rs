//! Cross-thread cancellation of a blocking accept loop (spec §4.4, §9
//! "Cancellation of blocking accept").
//!
//! Platform `accept` cannot be interrupted by setting a flag, so `stop()`
//! pokes a loopback TCP pair the accept loop also polls. A true
//! `socketpair(2)` would be the Unix-native choice, but it has no portable
//! std equivalent without an extra crate; a loopback pair gives the same
//! readable-selector contract spec §9 asks for ("a socket pair or
//! equivalent cross-thread notifier"). `Wakeup::new` hands back the read
//! half (kept by the accept loop) and a cloneable [`Waker`] (the write
//! half, handed to whoever calls `stop()`), matching spec §4.4's phrasing.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};

/// The write half. Cheaply cloned (one underlying socket, shared) so both
/// a `Server` and anything joining it can hold a copy.
#[derive(Clone)]
pub struct Waker {
  writer: TcpStream,
}

impl Waker {
  /// Non-blocking; a `WouldBlock` just means a wakeup byte is already
  /// pending, which is equivalent for our purposes.
  pub fn signal(&self) {
    let _ = (&self.writer).write(&[1u8]);
  }
}

/// The read half, polled by the accept loop alongside the listener.
pub struct Wakeup {
  reader: TcpStream,
}

impl Wakeup {
  pub fn new() -> io::Result<(Wakeup, Waker)> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let addr = listener.local_addr()?;
    let writer = TcpStream::connect(addr)?;
    let (reader, _) = listener.accept()?;
    reader.set_nonblocking(true)?;
    writer.set_nonblocking(true)?;
    Ok((Wakeup { reader }, Waker { writer }))
  }

  /// True if the wakeup has an unread byte, without consuming it.
  pub fn is_signalled(&self) -> bool {
    let mut byte = [0u8; 1];
    match (&self.reader).peek(&mut byte) {
      Ok(n) => n > 0,
      Err(_) => false,
    }
  }

  /// Consumes all pending wakeup bytes.
  pub fn drain(&mut self) {
    let mut buf = [0u8; 64];
    loop {
      match self.reader.read(&mut buf) {
        Ok(0) => break,
        Ok(_) => continue,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
        Err(_) => break,
      }
    }
  }
}
