//! Socket endpoint (C2): owns at most one listening socket and at most one
//! connection socket, with independent accept/recv timeouts.
//!
//! Grounded on the teacher's `rx`/`tx` free functions operating on a raw
//! `&TcpStream` plus its `connect()`/`disconnect()` bind-or-connect split,
//! generalised here into one type reused by [`crate::client::Client`],
//! [`crate::server::Server`], and [`crate::worker::Worker`].
//!
//! `listen()` reaches for `socket2` to set `SO_REUSEADDR` and an explicit
//! backlog before handing the socket back to `std::net::TcpListener` —
//! `std`'s own `bind` has no portable pre-bind hook for either.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use serde_json::Value;
use socket2::{Domain, Socket, Type};

use crate::error::Result;
use crate::frame::{self, Decoded};
use crate::wakeup::Wakeup;

/// Matches both spec.md §4.2 and the original's `self.socket.listen(5)`.
const LISTEN_BACKLOG: i32 = 5;

/// The outcome of one `accept_connection` call.
pub enum AcceptOutcome {
  Accepted(SocketAddr),
  /// The wakeup fired; caller should re-check its running flag.
  Woken,
  /// `accept_timeout` elapsed with neither a client nor a wakeup.
  TimedOut,
}

/// Peer-address identity string per spec §4.7: `host:port`, bracketed for
/// IPv6. `SocketAddr`'s `Display` impl already produces exactly this.
pub fn format_peer_identity(addr: SocketAddr) -> String {
  addr.to_string()
}

pub struct Endpoint {
  listener: Option<TcpListener>,
  conn: Option<TcpStream>,
  max_message_size: usize,
  recv_timeout: Duration,
}

impl Endpoint {
  pub fn new(max_message_size: usize, recv_timeout: Duration) -> Self {
    Self { listener: None, conn: None, max_message_size, recv_timeout }
  }

  /// Binds and listens with `SO_REUSEADDR` set and a backlog of
  /// [`LISTEN_BACKLOG`], matching `setsockopt(SO_REUSEADDR)` +
  /// `listen(5)` in the original (see DESIGN.md). `std::net::TcpListener`
  /// has no portable way to set either before `bind`, so the socket is
  /// built with `socket2` and converted back into a std listener.
  pub fn listen(&mut self, address: &str, port: u16) -> Result<SocketAddr> {
    let addr = (address, port)
      .to_socket_addrs()?
      .next()
      .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to no candidates"))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    let listener: TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    self.listener = Some(listener);
    Ok(local_addr)
  }

  /// Connects as a client with a bounded attempt timeout. No retry here;
  /// [`crate::client::Client::connect`] owns the retry loop (spec §4.3).
  pub fn connect(&mut self, address: &str, port: u16, connect_timeout: Duration) -> io::Result<()> {
    let addr = (address, port)
      .to_socket_addrs()?
      .next()
      .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to no candidates"))?;
    let stream = TcpStream::connect_timeout(&addr, connect_timeout)?;
    stream.set_read_timeout(Some(self.recv_timeout))?;
    stream.set_write_timeout(Some(self.recv_timeout))?;
    self.conn = Some(stream);
    Ok(())
  }

  /// Blocking accept bounded by the wakeup and, if set, `accept_timeout`.
  /// Polls both the listener and the wakeup at `poll_interval` since
  /// platform `accept` cannot itself be handed a cross-thread cancel
  /// signal (spec §9).
  pub fn accept_connection(
    &mut self,
    wakeup: &mut Wakeup,
    accept_timeout: Option<Duration>,
    poll_interval: Duration,
  ) -> Result<AcceptOutcome> {
    let listener = self.listener.as_ref().expect("listen() must be called before accept_connection()");
    let started = std::time::Instant::now();
    loop {
      match listener.accept() {
        Ok((stream, addr)) => {
          stream.set_read_timeout(Some(self.recv_timeout))?;
          stream.set_write_timeout(Some(self.recv_timeout))?;
          self.conn = Some(stream);
          return Ok(AcceptOutcome::Accepted(addr));
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
          if wakeup.is_signalled() {
            wakeup.drain();
            return Ok(AcceptOutcome::Woken);
          }
          if let Some(deadline) = accept_timeout {
            if started.elapsed() >= deadline {
              return Ok(AcceptOutcome::TimedOut);
            }
          }
          thread::sleep(poll_interval);
        }
        Err(e) => {
          tracing::debug!(error = %e, "accept() failed, continuing to accept");
          thread::sleep(poll_interval);
        }
      }
    }
  }

  /// Hands an already-accepted socket to this endpoint (worker handoff,
  /// spec §4.6: "hand the accepted socket to it via `swap_socket`").
  pub fn swap_socket(&mut self, stream: TcpStream) -> io::Result<()> {
    stream.set_read_timeout(Some(self.recv_timeout))?;
    stream.set_write_timeout(Some(self.recv_timeout))?;
    self.conn = Some(stream);
    Ok(())
  }

  /// Takes the connection socket without closing it, resetting this
  /// endpoint's reference so it won't double-close on its own `close()`
  /// (spec §5: "the server must reset its own reference").
  pub fn take_conn(&mut self) -> Option<TcpStream> {
    self.conn.take()
  }

  pub fn connected(&self) -> bool {
    self.conn.is_some()
  }

  pub fn set_max_message_size(&mut self, size: usize) {
    self.max_message_size = size;
  }

  pub fn set_recv_timeout(&mut self, timeout: Duration) -> io::Result<()> {
    self.recv_timeout = timeout;
    if let Some(conn) = &self.conn {
      conn.set_read_timeout(Some(timeout))?;
      conn.set_write_timeout(Some(timeout))?;
    }
    Ok(())
  }

  pub fn peer_addr(&self) -> Option<SocketAddr> {
    self.conn.as_ref().and_then(|c| c.peer_addr().ok())
  }

  pub fn send_obj(&mut self, value: &Value) -> Result<usize> {
    let stream = self.conn.as_mut().ok_or(crate::error::Error::ConnectionBroken)?;
    frame::encode(stream, value, self.max_message_size)
  }

  pub fn read_obj(&mut self) -> Result<Decoded> {
    let stream = self.conn.as_mut().ok_or(crate::error::Error::ConnectionBroken)?;
    frame::decode(stream, self.max_message_size)
  }

  /// Shuts down and drops the active connection. All OS errors are
  /// swallowed (spec §4.2: "idempotent `close()`... with all OS errors
  /// swallowed").
  pub fn close_connection(&mut self) {
    if let Some(conn) = self.conn.take() {
      let _ = conn.shutdown(Shutdown::Both);
    }
  }

  /// Drops the listening socket, if owned.
  pub fn close_listener(&mut self) {
    self.listener = None;
  }

  /// Closes both the connection and, if owned, the listener.
  pub fn close(&mut self) {
    self.close_connection();
    self.close_listener();
  }
}
