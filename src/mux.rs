// Single-threaded, poll-driven connection multiplexer.
//
// Grounded on infod/server.c's `struct server`: one listener-or-connection
// table driven by a single `poll()`/`server_poll` call, backpressure that
// disables listening sockets once `max_sockets` connections are open and
// re-enables it as soon as one closes, and `shutdown_read` for a race-free
// half-close when a peer needs to stop sending without losing buffered
// output. `mio::Poll` replaces raw `poll(2)`, and every socket -- TCP
// listener, TCP stream, the `SOCK_SEQPACKET` unix listener, even stdin --
// is registered the same way, as a `mio::unix::SourceFd`, the same way the
// original treats every socket as an untyped `int fd`.
//
// Two simplifications from the original, both because the Rust collections
// doing the same job don't need the help:
//   - `server_resize`'s manual 16-slot-increment array reallocation with
//     one-step-smaller hysteresis existed to amortize `realloc()` calls on a
//     packed C array. A `HashMap` already amortizes its own growth, so
//     there's nothing to hand-roll here.
//   - `server_del_socket`'s swap-the-last-entry-into-the-hole compaction
//     existed so the packed array never had gaps. Keying connections by a
//     monotonically increasing `Token` in a map needs no compaction and,
//     unlike the swap, never requires re-registering a moved-but-otherwise
//     untouched connection's interest with the OS poller.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::error::Result;

const DEFAULT_EVENTS_CAPACITY: usize = 256;

struct Slot<D> {
	fd: RawFd,
	is_listener: bool,
	data: Option<D>,
}

/// Readiness multiplexer over listening and connected sockets, each
/// carrying an arbitrary per-connection payload `D` (the session layer's
/// state, in practice).
pub struct Multiplexer<D> {
	poll: Poll,
	events: Events,
	slots: HashMap<Token, Slot<D>>,
	next_token: usize,
	max_sockets: usize,
	listening_enabled: bool,
}

impl<D> Multiplexer<D> {
	/// `max_sockets == 0` means no cap: listeners are never throttled.
	pub fn new(max_sockets: usize) -> Result<Self> {
		Ok(Multiplexer {
			poll: Poll::new()?,
			events: Events::with_capacity(DEFAULT_EVENTS_CAPACITY),
			slots: HashMap::new(),
			next_token: 0,
			max_sockets,
			listening_enabled: true,
		})
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	fn alloc_token(&mut self) -> Token {
		let token = Token(self.next_token);
		self.next_token += 1;
		token
	}

	/// Registers a listening socket. A readiness event on its token means
	/// one or more connections are waiting to be `accept()`ed; callers should
	/// drain with a loop until `WouldBlock`, since mio's edge-triggered
	/// readiness won't re-notify for connections that arrived before the
	/// drain finished.
	pub fn add_listener(&mut self, fd: RawFd) -> Result<Token> {
		let token = self.alloc_token();
		if self.listening_enabled {
			self.poll.registry().register(&mut SourceFd(&fd), token, Interest::READABLE)?;
		}
		self.slots.insert(token, Slot { fd, is_listener: true, data: None });
		Ok(token)
	}

	/// Registers an accepted (or otherwise opened, e.g. stdin) connection,
	/// setting it non-blocking first. Mirrors `server_add_fd`/`server_add_socket`.
	/// Applies `max_sockets` backpressure by disabling all listeners once the
	/// cap is reached.
	pub fn add_connection(&mut self, fd: RawFd, data: D) -> Result<Token> {
		set_nonblocking(fd)?;
		let token = self.alloc_token();
		self.poll.registry().register(&mut SourceFd(&fd), token, Interest::READABLE)?;
		self.slots.insert(token, Slot { fd, is_listener: false, data: Some(data) });
		if self.max_sockets != 0 && self.connection_count() >= self.max_sockets {
			self.set_listening_enabled(false)?;
		}
		Ok(token)
	}

	fn connection_count(&self) -> usize {
		self.slots.values().filter(|s| !s.is_listener).count()
	}

	/// Closes and deregisters `token`, returning its payload. Re-enables
	/// listening once the connection count drops back under `max_sockets`,
	/// mirroring `server_del_socket`'s `server->n == max_sockets - 1` check.
	pub fn remove(&mut self, token: Token) -> Option<D> {
		let slot = self.slots.remove(&token)?;
		let _ = self.poll.registry().deregister(&mut SourceFd(&slot.fd));
		unsafe {
			libc::close(slot.fd);
		}
		if self.max_sockets != 0 && self.connection_count() + 1 == self.max_sockets {
			let _ = self.set_listening_enabled(true);
		}
		slot.data
	}

	fn set_listening_enabled(&mut self, enable: bool) -> Result<()> {
		if self.listening_enabled == enable {
			return Ok(());
		}
		self.listening_enabled = enable;
		for (token, slot) in self.slots.iter() {
			if !slot.is_listener {
				continue;
			}
			if enable {
				self.poll.registry().register(&mut SourceFd(&slot.fd), *token, Interest::READABLE)?;
			} else {
				let _ = self.poll.registry().deregister(&mut SourceFd(&slot.fd));
			}
		}
		Ok(())
	}

	pub fn is_listener(&self, token: Token) -> bool {
		self.slots.get(&token).map_or(false, |s| s.is_listener)
	}

	pub fn fd(&self, token: Token) -> Option<RawFd> {
		self.slots.get(&token).map(|s| s.fd)
	}

	pub fn data(&self, token: Token) -> Option<&D> {
		self.slots.get(&token).and_then(|s| s.data.as_ref())
	}

	pub fn data_mut(&mut self, token: Token) -> Option<&mut D> {
		self.slots.get_mut(&token).and_then(|s| s.data.as_mut())
	}

	/// Every connection's token and payload, for operations (subscription
	/// fan-out) that need to look at all of them rather than just the one
	/// that's ready.
	pub fn connections_mut(&mut self) -> impl Iterator<Item = (Token, &mut D)> {
		self.slots.iter_mut().filter_map(|(t, s)| s.data.as_mut().map(|d| (*t, d)))
	}

	/// Blocks for up to `timeout` (or indefinitely, if `None`) for readiness,
	/// then returns every token with events pending this round. Mirrors
	/// `server_poll`'s single `poll(2)` call followed by a scan of `revents`.
	pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<Token>> {
		self.poll.poll(&mut self.events, timeout)?;
		Ok(self.events.iter().map(|e| e.token()).collect())
	}
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
	unsafe {
		let flags = libc::fcntl(fd, libc::F_GETFL);
		if flags == -1 {
			return Err(std::io::Error::last_os_error().into());
		}
		if flags & libc::O_NONBLOCK == 0 && libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
			return Err(std::io::Error::last_os_error().into());
		}
	}
	Ok(())
}

/// Half-closes the read side of `fd`: a race-free way to stop accepting
/// input from a peer (e.g. after it ignored backpressure) without losing
/// output already queued for it. Grounded on `server.c`'s `shutdown_read`.
pub fn shutdown_read(fd: RawFd) -> Result<()> {
	if unsafe { libc::shutdown(fd, libc::SHUT_RD) } == -1 {
		return Err(std::io::Error::last_os_error().into());
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use std::net::TcpListener as StdTcpListener;
	use std::os::unix::io::IntoRawFd;

	#[test]
	fn add_and_remove_round_trips_the_payload() {
		let mut mux: Multiplexer<u32> = Multiplexer::new(0).unwrap();
		let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
		listener.set_nonblocking(true).unwrap();
		let fd = listener.into_raw_fd();
		let token = mux.add_connection(fd, 42).unwrap();
		assert_eq!(mux.data(token), Some(&42));
		assert_eq!(mux.remove(token), Some(42));
		assert_eq!(mux.data(token), None);
	}

	#[test]
	fn max_sockets_disables_and_reenables_listening() {
		let mut mux: Multiplexer<()> = Multiplexer::new(1).unwrap();
		let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
		listener.set_nonblocking(true).unwrap();
		let listener_fd = listener.into_raw_fd();
		let listener_token = mux.add_listener(listener_fd).unwrap();
		assert!(mux.listening_enabled);

		let conn = StdTcpListener::bind("127.0.0.1:0").unwrap().into_raw_fd();
		mux.add_connection(conn, ()).unwrap();
		assert!(!mux.listening_enabled);

		mux.remove(listener_token);
	}
}
