// Wires `Store`, `Multiplexer`, and `Session` into a runnable service.
//
// Grounded on daemon/infod.c's `main`: a dual-stack TCP listener (separate
// v4 and v6 sockets, `IPV6_V6ONLY` set on the v6 one so it doesn't also
// claim v4-mapped addresses), a `SOCK_SEQPACKET` unix listener fixed to
// framed mode (a seqpacket socket already preserves message boundaries, so
// there's no length prefix to get wrong), and an optional stdin/stdout
// connection for `-i`. Everything drives one `Multiplexer::poll` loop.
// SIGTERM/SIGINT set a static `AtomicBool` checked once per iteration,
// replacing the original's plain global `terminated` int -- signal-handler
// safety only needs a single atomic store, so that's the whole of it.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::Token;

use crate::codec::{self, CodecError, Decoder, Mode};
use crate::error::Result;
use crate::mux::{self, Multiplexer};
use crate::options::ServiceOptions;
use crate::proto::{self, Pdu};
use crate::session::{Effect, Session};
use crate::store::Store;

const READ_CHUNK: usize = 16 * 1024;
const LISTEN_BACKLOG: i32 = 128;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

static TERMINATED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_terminate_signal(_: libc::c_int) {
	TERMINATED.store(true, Ordering::SeqCst);
}

/// Per-connection transport state: its decode mode, output buffer, and the
/// fd replies actually go to (equal to the registered fd for every socket,
/// but `1` rather than `0` for a stdin connection).
struct Connection {
	session: Session,
	decoder: Decoder,
	write_fd: RawFd,
	out_buf: Vec<u8>,
}

impl Connection {
	fn new(mode: Mode, write_fd: RawFd, options: &ServiceOptions) -> Self {
		Connection { session: Session::new(options), decoder: Decoder::new(mode), write_fd, out_buf: Vec::new() }
	}
}

pub struct Service {
	options: ServiceOptions,
	store: Store,
	mux: Multiplexer<Connection>,
	/// Mode newly accepted connections get, keyed by the listener they came
	/// from: `Unknown` (auto-detect) for TCP, `Framed` for the unix socket.
	listener_modes: HashMap<Token, Mode>,
}

impl Service {
	pub fn new(options: ServiceOptions) -> Result<Self> {
		let store = Store::open(options.store.clone())?;
		let mux = Multiplexer::new(options.max_sockets)?;
		Ok(Service { options, store, mux, listener_modes: HashMap::new() })
	}

	pub fn store(&self) -> &Store {
		&self.store
	}

	fn install_signal_handlers(&self) -> Result<()> {
		unsafe {
			if libc::signal(libc::SIGTERM, on_terminate_signal as libc::sighandler_t) == libc::SIG_ERR {
				return Err(io::Error::last_os_error().into());
			}
			if libc::signal(libc::SIGINT, on_terminate_signal as libc::sighandler_t) == libc::SIG_ERR {
				return Err(io::Error::last_os_error().into());
			}
		}
		Ok(())
	}

	/// Binds every listener the options ask for. Mirrors `main`'s call to
	/// `add_tcp_listeners`/`add_unix_listener`, plus the `-i` stdin hookup.
	pub fn listen(&mut self) -> Result<()> {
		let mut any = false;
		if self.options.tcp_port != 0 {
			any |= self.add_tcp_listeners(self.options.tcp_port)?;
		}
		if !self.options.unix_path.is_empty() {
			self.add_unix_listener()?;
			any = true;
		}
		if self.options.listen_stdin {
			self.add_stdin()?;
			any = true;
		}
		if !any {
			return Err(crate::error::Error::InvalidArg("no listeners configured".into()));
		}
		Ok(())
	}

	fn add_tcp_listeners(&mut self, port: u16) -> Result<bool> {
		let mut bound = false;
		match bind_tcp_v4(port) {
			Ok(fd) => {
				let token = self.mux.add_listener(fd)?;
				self.listener_modes.insert(token, Mode::Unknown);
				bound = true;
			}
			Err(e) => log::warn!(target: "infod3", "IPv4 listener on port {}: {}", port, e),
		}
		match bind_tcp_v6(port) {
			Ok(fd) => {
				let token = self.mux.add_listener(fd)?;
				self.listener_modes.insert(token, Mode::Unknown);
				bound = true;
			}
			Err(e) => log::warn!(target: "infod3", "IPv6 listener on port {}: {}", port, e),
		}
		Ok(bound)
	}

	fn add_unix_listener(&mut self) -> Result<()> {
		let fd = bind_unix_seqpacket(&self.options.unix_path)?;
		let token = self.mux.add_listener(fd)?;
		self.listener_modes.insert(token, Mode::Framed);
		Ok(())
	}

	fn add_stdin(&mut self) -> Result<()> {
		let conn = Connection::new(Mode::Unknown, 1, &self.options);
		self.mux.add_connection(0, conn)?;
		Ok(())
	}

	/// Runs the poll loop until SIGTERM/SIGINT. Call `listen` first.
	pub fn run(&mut self) -> Result<()> {
		self.install_signal_handlers()?;
		while !TERMINATED.load(Ordering::SeqCst) {
			let ready = self.mux.poll(Some(POLL_INTERVAL))?;
			for token in ready {
				if self.mux.is_listener(token) {
					self.accept_loop(token);
				} else {
					// Readiness direction isn't tracked per-token; trying
					// both is harmless on a non-blocking fd; a spurious
					// attempt just returns `WouldBlock`.
					self.flush(token);
					self.on_readable(token);
				}
			}
		}
		Ok(())
	}

	fn accept_loop(&mut self, token: Token) {
		let Some(fd) = self.mux.fd(token) else { return };
		let mode = *self.listener_modes.get(&token).unwrap_or(&Mode::Unknown);
		loop {
			let client_fd = unsafe { libc::accept(fd, std::ptr::null_mut(), std::ptr::null_mut()) };
			if client_fd < 0 {
				let err = io::Error::last_os_error();
				if err.kind() != io::ErrorKind::WouldBlock {
					log::warn!(target: "infod3", "accept: {}", err);
				}
				break;
			}
			let conn = Connection::new(mode, client_fd, &self.options);
			if self.mux.add_connection(client_fd, conn).is_err() {
				unsafe {
					libc::close(client_fd);
				}
			}
		}
	}

	fn on_readable(&mut self, token: Token) {
		let Some(fd) = self.mux.fd(token) else { return };
		let mut buf = [0u8; READ_CHUNK];
		loop {
			let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
			if n < 0 {
				let err = io::Error::last_os_error();
				if err.kind() != io::ErrorKind::WouldBlock {
					self.close_connection(token);
				}
				return;
			}
			if n == 0 {
				self.handle_eof(token);
				return;
			}
			let (pdus, errors) = {
				let Some(conn) = self.mux.data_mut(token) else { return };
				conn.decoder.feed(&buf[..n as usize])
			};
			for pdu in pdus {
				if !self.handle_pdu(token, pdu) {
					return;
				}
			}
			for err in errors {
				self.reply_error(token, err);
			}
		}
	}

	fn handle_eof(&mut self, token: Token) {
		let pdus = {
			let Some(conn) = self.mux.data_mut(token) else { return };
			conn.decoder.eof().0
		};
		for pdu in pdus {
			if !self.handle_pdu(token, pdu) {
				return;
			}
		}
	}

	/// Dispatches one PDU through this connection's session and applies its
	/// effects. Returns `false` once the connection has been closed, so the
	/// caller stops touching a now-absent token.
	fn handle_pdu(&mut self, token: Token, pdu: Pdu) -> bool {
		let effects = {
			let Some(conn) = self.mux.data_mut(token) else { return false };
			conn.session.on_pdu(pdu, &self.store)
		};
		for effect in effects {
			match effect {
				Effect::Reply(reply) => self.send(token, &reply),
				Effect::Close => {
					self.close_connection(token);
					return false;
				}
				Effect::Put { key, value } => self.apply_mutation(token, key, Some(value)),
				Effect::Delete { key } => self.apply_mutation(token, key, None),
			}
		}
		true
	}

	/// Applies a store write and, if it actually changed anything, fans
	/// `MSG_INFO` out to every connection (including the one that triggered
	/// it) whose subscriptions match `key`: a put carries `key\0value`, a
	/// delete carries the bare key with no embedded NUL -- the tombstone
	/// shape, distinct from a put of an empty value. Mirrors
	/// `on_app_input`'s broadcast-after-write, including using
	/// `shutdown_read` rather than dropping a subscriber outright when its
	/// output can't be written.
	fn apply_mutation(&mut self, _origin: Token, key: Vec<u8>, value: Option<Vec<u8>>) {
		let changed = match &value {
			Some(v) => self.store.put(&key, v).unwrap_or(false),
			None => self.store.del(&key),
		};
		if !changed {
			return;
		}
		let targets: Vec<Token> = self
			.mux
			.connections_mut()
			.filter(|(_, conn)| conn.session.matches(&key))
			.map(|(token, _)| token)
			.collect();
		let pdu = match value {
			Some(v) => proto::info(&key, &v),
			None => proto::Pdu { msg: proto::MSG_INFO, tokens: vec![proto::Token::Str(key)] },
		};
		for token in targets {
			self.send(token, &pdu);
		}
	}

	fn reply_error(&mut self, token: Token, err: CodecError) {
		self.send(token, &proto::error(err.to_string().as_bytes()));
	}

	fn send(&mut self, token: Token, pdu: &Pdu) {
		let Some(conn) = self.mux.data_mut(token) else { return };
		let mode = conn.decoder.mode();
		match codec::encode(mode, pdu) {
			Ok(bytes) => conn.out_buf.extend_from_slice(&bytes),
			Err(e) => {
				log::warn!(target: "infod3", "dropping unencodable reply: {}", e);
				return;
			}
		}
		self.flush(token);
	}

	/// Writes as much of the connection's output buffer as the fd will take
	/// right now. A would-block is treated the same as a hard write error --
	/// `on_net_sendv`'s EAGAIN handling drops the client rather than queuing
	/// -- so either one `shutdown_read`s the peer (rather than closing
	/// outright, which would drop output other sessions may still be relying
	/// on) and stops writing to it.
	fn flush(&mut self, token: Token) {
		let Some(write_fd) = self.mux.data(token).map(|c| c.write_fd) else { return };
		loop {
			let (ptr, len) = {
				let Some(conn) = self.mux.data(token) else { return };
				if conn.out_buf.is_empty() {
					break;
				}
				(conn.out_buf.as_ptr(), conn.out_buf.len())
			};
			let n = unsafe { libc::write(write_fd, ptr as *const libc::c_void, len) };
			if n < 0 {
				let _ = mux::shutdown_read(write_fd);
				return;
			}
			if let Some(conn) = self.mux.data_mut(token) {
				conn.out_buf.drain(0..n as usize);
			}
		}
	}

	fn close_connection(&mut self, token: Token) {
		self.mux.remove(token);
	}
}

fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
	let one: libc::c_int = 1;
	let ret = unsafe {
		libc::setsockopt(
			fd,
			libc::SOL_SOCKET,
			libc::SO_REUSEADDR,
			&one as *const _ as *const libc::c_void,
			mem::size_of::<libc::c_int>() as libc::socklen_t,
		)
	};
	if ret < 0 {
		Err(io::Error::last_os_error())
	} else {
		Ok(())
	}
}

fn bind_tcp_v4(port: u16) -> io::Result<RawFd> {
	unsafe {
		let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
		if fd < 0 {
			return Err(io::Error::last_os_error());
		}
		if let Err(e) = set_reuseaddr(fd) {
			libc::close(fd);
			return Err(e);
		}
		let mut addr: libc::sockaddr_in = mem::zeroed();
		addr.sin_family = libc::AF_INET as libc::sa_family_t;
		addr.sin_port = port.to_be();
		addr.sin_addr.s_addr = libc::INADDR_ANY;
		let ret = libc::bind(
			fd,
			&addr as *const _ as *const libc::sockaddr,
			mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
		);
		if ret < 0 {
			let e = io::Error::last_os_error();
			libc::close(fd);
			return Err(e);
		}
		if libc::listen(fd, LISTEN_BACKLOG) < 0 {
			let e = io::Error::last_os_error();
			libc::close(fd);
			return Err(e);
		}
		Ok(fd)
	}
}

fn bind_tcp_v6(port: u16) -> io::Result<RawFd> {
	unsafe {
		let fd = libc::socket(libc::AF_INET6, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
		if fd < 0 {
			return Err(io::Error::last_os_error());
		}
		if let Err(e) = set_reuseaddr(fd) {
			libc::close(fd);
			return Err(e);
		}
		let one: libc::c_int = 1;
		let ret = libc::setsockopt(
			fd,
			libc::IPPROTO_IPV6,
			libc::IPV6_V6ONLY,
			&one as *const _ as *const libc::c_void,
			mem::size_of::<libc::c_int>() as libc::socklen_t,
		);
		if ret < 0 {
			let e = io::Error::last_os_error();
			libc::close(fd);
			return Err(e);
		}
		// `mem::zeroed` already gives an all-zero `in6_addr`, i.e. `::`
		// (`IN6ADDR_ANY`), so there's nothing further to set there.
		let mut addr: libc::sockaddr_in6 = mem::zeroed();
		addr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
		addr.sin6_port = port.to_be();
		let ret = libc::bind(
			fd,
			&addr as *const _ as *const libc::sockaddr,
			mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
		);
		if ret < 0 {
			let e = io::Error::last_os_error();
			libc::close(fd);
			return Err(e);
		}
		if libc::listen(fd, LISTEN_BACKLOG) < 0 {
			let e = io::Error::last_os_error();
			libc::close(fd);
			return Err(e);
		}
		Ok(fd)
	}
}

/// Binds a `SOCK_SEQPACKET` unix socket in the abstract namespace (a leading
/// NUL byte in `sun_path`, Linux-only): no filesystem entry to clean up
/// after a crash, matching the original's own abstract-namespace default.
fn bind_unix_seqpacket(name: &str) -> io::Result<RawFd> {
	unsafe {
		let fd = libc::socket(libc::AF_UNIX, libc::SOCK_SEQPACKET | libc::SOCK_NONBLOCK, 0);
		if fd < 0 {
			return Err(io::Error::last_os_error());
		}
		let mut addr: libc::sockaddr_un = mem::zeroed();
		addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
		let name_bytes = name.as_bytes();
		if name_bytes.len() + 1 > addr.sun_path.len() {
			libc::close(fd);
			return Err(io::Error::new(io::ErrorKind::InvalidInput, "unix socket path too long"));
		}
		for (i, &b) in name_bytes.iter().enumerate() {
			addr.sun_path[i + 1] = b as libc::c_char;
		}
		let len = (mem::size_of::<libc::sa_family_t>() + 1 + name_bytes.len()) as libc::socklen_t;
		let ret = libc::bind(fd, &addr as *const _ as *const libc::sockaddr, len);
		if ret < 0 {
			let e = io::Error::last_os_error();
			libc::close(fd);
			return Err(e);
		}
		if libc::listen(fd, LISTEN_BACKLOG) < 0 {
			let e = io::Error::last_os_error();
			libc::close(fd);
			return Err(e);
		}
		Ok(fd)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::options::StoreOptions;
	use std::io::{Read, Write};
	use std::net::TcpStream;

	fn temp_options(tcp_port: u16) -> (tempfile::TempDir, ServiceOptions) {
		let dir = tempfile::tempdir().unwrap();
		let store = StoreOptions::new(dir.path().join("t.store"));
		let mut options = ServiceOptions::new(store);
		options.tcp_port = tcp_port;
		options.unix_path = String::new();
		(dir, options)
	}

	#[test]
	fn hello_roundtrips_over_a_real_tcp_connection() {
		let (_dir, options) = temp_options(0);
		let mut service = Service::new(options).unwrap();
		// Port 0 above would ask the kernel to pick one, but since we bind
		// manually in `add_tcp_listeners` we need a fixed port for the test
		// client to dial; bind directly to a known-free ephemeral port via
		// std first to discover one.
		let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let port = probe.local_addr().unwrap().port();
		drop(probe);
		service.options.tcp_port = port;
		service.listen().unwrap();

		let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
		client.write_all(b"HELLO 1\r\n").unwrap();

		// Drive one iteration of accept + read + reply by hand instead of
		// running the blocking poll loop.
		let ready = service.mux.poll(Some(Duration::from_secs(1))).unwrap();
		for token in &ready {
			if service.mux.is_listener(*token) {
				service.accept_loop(*token);
			}
		}
		let ready = service.mux.poll(Some(Duration::from_secs(1))).unwrap();
		for token in ready {
			service.on_readable(token);
		}

		let mut buf = [0u8; 256];
		client.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
		let n = client.read(&mut buf).unwrap();
		let reply = String::from_utf8_lossy(&buf[..n]);
		assert!(reply.starts_with("VERSION"), "unexpected reply: {:?}", reply);
	}

	/// Drives one round of accept + read + reply by hand, the way
	/// `hello_roundtrips_over_a_real_tcp_connection` does, for scenarios that
	/// need several rounds (one client writing, another reading the fan-out).
	fn pump(service: &mut Service) {
		let ready = service.mux.poll(Some(Duration::from_secs(1))).unwrap();
		for token in ready {
			if service.mux.is_listener(token) {
				service.accept_loop(token);
			} else {
				service.on_readable(token);
			}
		}
	}

	fn start_service() -> (tempfile::TempDir, Service, u16) {
		let (dir, mut options) = temp_options(0);
		let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let port = probe.local_addr().unwrap().port();
		drop(probe);
		options.tcp_port = port;
		let mut service = Service::new(options).unwrap();
		service.listen().unwrap();
		(dir, service, port)
	}

	fn connect(port: u16) -> TcpStream {
		let c = TcpStream::connect(("127.0.0.1", port)).unwrap();
		c.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
		c
	}

	fn read_available(client: &mut TcpStream) -> Vec<u8> {
		let mut buf = [0u8; 4096];
		let n = client.read(&mut buf).unwrap();
		buf[..n].to_vec()
	}

	/// Like `read_available`, but a timeout (no bytes arrived) is reported as
	/// `None` instead of the `read` error it actually produces, for
	/// asserting that a peer received nothing.
	fn try_read(client: &mut TcpStream) -> Option<Vec<u8>> {
		let mut buf = [0u8; 4096];
		match client.read(&mut buf) {
			Ok(n) => Some(buf[..n].to_vec()),
			Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
				None
			}
			Err(e) => panic!("unexpected read error: {}", e),
		}
	}

	/// S1 -- read-miss then write then read-hit, all in binary mode.
	#[test]
	fn scenario_read_miss_then_write_then_read_hit() {
		let (_dir, mut service, port) = start_service();
		let mut client = connect(port);

		client.write_all(&[0x03, 0x00, 0x03, b'k', b'e', b'y']).unwrap();
		pump(&mut service);
		pump(&mut service);
		assert_eq!(read_available(&mut client), vec![0x81, 0x00, 0x03, b'k', b'e', b'y']);

		// "key"+NUL+"val" is 7 bytes -- the length byte must match its own
		// payload for the binary decoder to frame correctly.
		let mut put = vec![0x04, 0x00, 0x07];
		put.extend_from_slice(b"key");
		put.push(0);
		put.extend_from_slice(b"val");
		client.write_all(&put).unwrap();
		pump(&mut service);

		client.write_all(&[0x03, 0x00, 0x03, b'k', b'e', b'y']).unwrap();
		pump(&mut service);
		let mut expect = vec![0x81, 0x00, 0x07];
		expect.extend_from_slice(b"key");
		expect.push(0);
		expect.extend_from_slice(b"val");
		assert_eq!(read_available(&mut client), expect);
	}

	/// S2 -- subscribe catch-up, then notified on a write from another client.
	#[test]
	fn scenario_subscribe_catchup_then_fanout() {
		let (_dir, mut service, port) = start_service();
		service.store.put(b"a", b"1").unwrap();
		service.store.put(b"b", b"2").unwrap();

		let mut c1 = connect(port);
		c1.write_all(&[0x01, 0x00, 0x01, b'*']).unwrap();
		pump(&mut service);
		pump(&mut service);
		let mut expect = vec![0x81, 0x00, 0x03, b'a', 0, b'1'];
		expect.extend_from_slice(&[0x81, 0x00, 0x03, b'b', 0, b'2']);
		assert_eq!(read_available(&mut c1), expect);

		let mut c2 = connect(port);
		// As above, the payload is 3 bytes ("c"+NUL+"3").
		let mut put = vec![0x04, 0x00, 0x03];
		put.extend_from_slice(b"c");
		put.push(0);
		put.extend_from_slice(b"3");
		c2.write_all(&put).unwrap();
		pump(&mut service);
		pump(&mut service);

		assert_eq!(read_available(&mut c1), vec![0x81, 0x00, 0x03, b'c', 0, b'3']);
		c2.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
		assert_eq!(try_read(&mut c2), None, "c2 should receive nothing back for its own write");
	}

	/// A delete fans out a key-only INFO (the tombstone shape), not an
	/// INFO carrying an empty value -- the two are wire-distinguishable.
	#[test]
	fn scenario_delete_fans_out_a_key_only_tombstone() {
		let (_dir, mut service, port) = start_service();
		service.store.put(b"a", b"1").unwrap();

		let mut c1 = connect(port);
		c1.write_all(&[0x01, 0x00, 0x01, b'*']).unwrap();
		pump(&mut service);
		pump(&mut service);
		assert_eq!(read_available(&mut c1), vec![0x81, 0x00, 0x03, b'a', 0, b'1']);

		let mut c2 = connect(port);
		c2.write_all(&[0x04, 0x00, 0x01, b'a']).unwrap(); // CMD_PUT, bare key => delete
		pump(&mut service);
		pump(&mut service);

		assert_eq!(read_available(&mut c1), vec![0x81, 0x00, 0x01, b'a']);
		assert_eq!(service.store.get(b"a"), None);
	}

	/// S3 -- a BEGIN/COMMIT transaction applies both writes once committed.
	#[test]
	fn scenario_transaction_applies_both_writes_on_commit() {
		let (_dir, mut service, port) = start_service();
		let mut c1 = connect(port);

		c1.write_all(&[0x05, 0x00, 0x00]).unwrap(); // BEGIN
		let mut px = vec![0x04, 0x00, 0x03]; // "x" + NUL + "1" = 3 bytes
		px.extend_from_slice(b"x");
		px.push(0);
		px.extend_from_slice(b"1");
		c1.write_all(&px).unwrap();
		let mut py = vec![0x04, 0x00, 0x03]; // "y" + NUL + "2" = 3 bytes
		py.extend_from_slice(b"y");
		py.push(0);
		py.extend_from_slice(b"2");
		c1.write_all(&py).unwrap();
		c1.write_all(&[0x06, 0x00, 0x00]).unwrap(); // COMMIT
		pump(&mut service);
		pump(&mut service);

		assert_eq!(service.store.get(b"x"), Some(b"1".to_vec()));
		assert_eq!(service.store.get(b"y"), Some(b"2".to_vec()));
	}

	/// S4 -- an invalid subscription pattern draws an ERROR reply.
	#[test]
	fn scenario_invalid_pattern_draws_error() {
		let (_dir, mut service, port) = start_service();
		let mut client = connect(port);
		client.write_all(&[0x01, 0x00, 0x02, b'*', b'*']).unwrap();
		pump(&mut service);
		pump(&mut service);
		let reply = read_available(&mut client);
		assert_eq!(reply[0], 0x83); // MSG_ERROR
	}

	/// S6 -- a connection that sends a text command line first auto-detects
	/// text mode for its reply.
	#[test]
	fn scenario_text_mode_is_autodetected_from_first_byte() {
		let (_dir, mut service, port) = start_service();
		let mut client = connect(port);
		client.write_all(b"HELLO 0\r\n").unwrap();
		pump(&mut service);
		pump(&mut service);
		let reply = read_available(&mut client);
		assert!(reply.starts_with(b"VERSION"), "expected a text reply, got {:?}", reply);
	}
}
