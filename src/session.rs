// Per-connection protocol state and command dispatch.
//
// Grounded on daemon/infod.c's `struct client` and `on_app_input`: each
// connection owns a decode mode, a list of subscription patterns, and a
// transaction-buffering depth counter. Dispatch is kept free of any global
// connection table or store reference -- `on_pdu` takes the store by
// reference for reads, and reports writes as an `Effect` instead of
// reaching into other sessions itself, the way `on_app_input` walks
// `all_clients` directly. `service.rs` is the thing that owns every
// session and the store, so it's the thing that performs the broadcast.

use crate::options::ServiceOptions;
use crate::proto::{self, Pdu};
use crate::store::Store;

/// What a dispatched PDU asks the caller to do. A single PDU may produce
/// several effects in order (e.g. `SUB` replies once per already-matching
/// key already in the store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
	/// Send this PDU back to the session that triggered it.
	Reply(Pdu),
	/// Apply a write to the shared store, then -- if it actually changed
	/// anything -- fan `MSG_INFO(key, value)` out to every session (this one
	/// included) whose subscriptions match `key`.
	Put { key: Vec<u8>, value: Vec<u8> },
	/// Apply a delete to the shared store, then fan out the same way on
	/// success.
	Delete { key: Vec<u8> },
	/// Close this connection: either the peer sent EOF, or it broke protocol
	/// badly enough that there's nothing sensible left to reply with.
	Close,
}

/// A connection's subscriptions and in-progress transaction state.
/// Doesn't own a socket or decoder itself -- `service.rs` pairs this with
/// the `mio::Token`/`codec::Decoder` the multiplexer already tracks.
pub struct Session {
	subs: Vec<Vec<u8>>,
	max_subs: usize,
	/// Buffered `(msg, payload)` pairs awaiting replay on the outermost
	/// `COMMIT`. Stored pre-dispatch, in `to_wire` form, since a buffered
	/// command is replayed through the exact same dispatch path as a live
	/// one.
	bufcmds: Vec<(u8, Vec<u8>)>,
	max_bufcmds: usize,
	/// Nesting depth of open `BEGIN`s. Zero means not in a transaction.
	begins: u32,
}

impl Session {
	pub fn new(options: &ServiceOptions) -> Self {
		Session {
			subs: Vec::new(),
			max_subs: options.max_subscriptions,
			bufcmds: Vec::new(),
			max_bufcmds: options.max_buffered_commands,
			begins: 0,
		}
	}

	/// Subscription patterns currently held by this session. Exposed so
	/// `service.rs` can test a changed key against every session without
	/// reaching into private fields.
	pub fn subscriptions(&self) -> &[Vec<u8>] {
		&self.subs
	}

	/// True if any of this session's subscriptions match `key`. A malformed
	/// stored pattern (which `on_pdu` should never have accepted) is treated
	/// as a non-match rather than propagating an error into the broadcast path.
	pub fn matches(&self, key: &[u8]) -> bool {
		self.subs.iter().any(|p| crate::pattern::matches(p, key).unwrap_or(false))
	}

	/// Dispatches one received PDU, mirroring `on_app_input`. `store` is read
	/// for `GET`/`SUB`'s initial snapshot only; writes are reported as
	/// `Effect::Put`/`Effect::Delete` for the caller to apply and broadcast.
	pub fn on_pdu(&mut self, pdu: Pdu, store: &Store) -> Vec<Effect> {
		if pdu.msg == proto::MSG_EOF {
			return vec![Effect::Close];
		}

		// While a transaction is open, BEGIN/COMMIT themselves nest or
		// unwind it; every other command is queued for replay instead of
		// acted on now. Mirrors `buffer_command`.
		if self.begins > 0 {
			return self.buffer_or_commit(pdu, store);
		}

		self.dispatch(pdu, store)
	}

	fn buffer_or_commit(&mut self, pdu: Pdu, store: &Store) -> Vec<Effect> {
		match pdu.msg {
			proto::CMD_BEGIN => {
				self.begins += 1;
				vec![]
			}
			proto::CMD_COMMIT => {
				self.begins -= 1;
				if self.begins > 0 {
					return vec![];
				}
				let buffered = std::mem::take(&mut self.bufcmds);
				let mut effects = Vec::new();
				for (msg, payload) in buffered {
					match Pdu::from_wire(msg, &payload) {
						Ok(pdu) => effects.extend(self.dispatch(pdu, store)),
						Err(_) => effects.push(Effect::Reply(proto::error(b"buffered command corrupt"))),
					}
				}
				effects
			}
			_ => {
				if self.bufcmds.len() >= self.max_bufcmds {
					return vec![Effect::Reply(proto::error(b"commit buffer overflow"))];
				}
				self.bufcmds.push(pdu.to_wire());
				vec![]
			}
		}
	}

	fn dispatch(&mut self, pdu: Pdu, store: &Store) -> Vec<Effect> {
		match pdu.msg {
			proto::CMD_HELLO => vec![Effect::Reply(proto::version(0, Some(b"infod3")))],

			proto::CMD_SUB => {
				let pattern = match pdu.as_str() {
					Some(p) => p,
					None => return vec![Effect::Reply(proto::error(b"malformed SUB"))],
				};
				if pattern.contains(&0) {
					return vec![Effect::Reply(proto::error(b"SUB: pattern contains NUL"))];
				}
				if !crate::pattern::is_valid(pattern) {
					return vec![Effect::Reply(proto::error(b"sub: invalid pattern"))];
				}
				if self.subs.len() > self.max_subs {
					return vec![Effect::Reply(proto::error(b"sub: too many subscriptions"))];
				}
				self.subs.push(pattern.to_vec());
				store
					.iter()
					.filter(|(k, _)| crate::pattern::matches(pattern, k).unwrap_or(false))
					.map(|(k, v)| Effect::Reply(proto::info(k, v)))
					.collect()
			}

			proto::CMD_UNSUB => {
				let pattern = match pdu.as_str() {
					Some(p) => p,
					None => return vec![Effect::Reply(proto::error(b"malformed UNSUB"))],
				};
				if let Some(i) = self.subs.iter().position(|p| p == pattern) {
					self.subs.remove(i);
				}
				vec![]
			}

			proto::CMD_GET => {
				let key = match pdu.as_str() {
					Some(k) => k,
					None => return vec![Effect::Reply(proto::error(b"malformed GET"))],
				};
				if key.contains(&0) {
					return vec![Effect::Reply(proto::error(b"GET: key contains NUL"))];
				}
				match store.get(key) {
					Some(value) => vec![Effect::Reply(proto::info(key, &value))],
					// No such key: echo the bare key back, same as the server
					// does for a miss, rather than a key/empty-value pair --
					// the two decode identically, but this keeps the wire
					// bytes identical to what a real client expects.
					None => vec![Effect::Reply(Pdu {
						msg: proto::MSG_INFO,
						tokens: vec![crate::proto::Token::Str(key.to_vec())],
					})],
				}
			}

			proto::CMD_PUT => match pdu.as_put() {
				Some(proto::PutRequest::Delete(key)) => vec![Effect::Delete { key: key.to_vec() }],
				Some(proto::PutRequest::Set(key, value)) => {
					if is_ephemeral(key) {
						// Ephemeral keys (trailing `!`) are accepted but
						// never stored or broadcast: a stub left over from
						// the reference implementation, which never
						// finished this branch either.
						vec![]
					} else {
						vec![Effect::Put { key: key.to_vec(), value: value.to_vec() }]
					}
				}
				None => vec![Effect::Reply(proto::error(b"malformed PUT"))],
			},

			proto::CMD_BEGIN => {
				self.begins = 1;
				vec![]
			}

			proto::CMD_COMMIT => vec![Effect::Reply(proto::error(b"commit: no begin"))],

			proto::CMD_PING => {
				let id = pdu.as_optional_str().unwrap_or(None);
				vec![Effect::Reply(proto::pong(id))]
			}

			_ => vec![Effect::Reply(proto::error(b"unexpected message"))],
		}
	}
}

/// A PUT key ending in `!` marks an ephemeral write. Grounded on
/// `is_ephemeral`'s "byte before the NUL is `!`" check.
fn is_ephemeral(key: &[u8]) -> bool {
	key.last() == Some(&b'!')
}
