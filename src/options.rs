// Configuration structs, in the spirit of parity-db's `options.rs`
// (referenced elsewhere as `crate::options::ColumnOptions`): small, plain
// structs with a `Default` impl, constructed by library callers directly or
// by the `admin` binary from parsed CLI flags.

use std::path::PathBuf;

/// Tunables for `crate::store::Store::open`.
#[derive(Debug, Clone)]
pub struct StoreOptions {
	/// Path to the backing file. Created if it does not exist.
	pub path: PathBuf,
	/// Pages of slack to retain past `space` before truncating the file,
	/// so growth/shrink cycles near a page boundary don't thrash.
	pub trim_hysteresis_pages: u32,
}

impl StoreOptions {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		StoreOptions { path: path.into(), trim_hysteresis_pages: 2 }
	}
}

/// Tunables for a running `crate::service::Service`.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
	pub store: StoreOptions,
	/// TCP port to bind on both IPv4 and IPv6 (0 disables TCP).
	pub tcp_port: u16,
	/// Abstract-namespace path for the SOCK_SEQPACKET unix listener
	/// (empty disables it).
	pub unix_path: String,
	/// Register stdin as an extra, non-listening connection (`-i`).
	pub listen_stdin: bool,
	/// Soft cap on concurrently open connections (0 = unlimited).
	pub max_sockets: usize,
	/// Per-session subscription cap.
	pub max_subscriptions: usize,
	/// Per-session buffered-transaction-command cap.
	pub max_buffered_commands: usize,
	pub verbose: u8,
}

pub const DEFAULT_TCP_PORT: u16 = 26931; // IANA-ish default service "infod3"
pub const DEFAULT_UNIX_PATH: &str = "infod3.socket"; // prefixed with NUL at bind time
pub const DEFAULT_MAX_SOCKETS: usize = 64;
pub const DEFAULT_MAX_SUBS: usize = 16;
pub const DEFAULT_MAX_BUFCMDS: usize = 32;

impl ServiceOptions {
	pub fn new(store: StoreOptions) -> Self {
		ServiceOptions {
			store,
			tcp_port: DEFAULT_TCP_PORT,
			unix_path: DEFAULT_UNIX_PATH.to_string(),
			listen_stdin: false,
			max_sockets: DEFAULT_MAX_SOCKETS,
			max_subscriptions: DEFAULT_MAX_SUBS,
			max_buffered_commands: DEFAULT_MAX_BUFCMDS,
			verbose: 0,
		}
	}
}
