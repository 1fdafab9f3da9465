// Message IDs and the protocol data unit (PDU) shared by every wire codec.
//
// Grounded on proto.h's CMD_*/MSG_* table and the format-string comment next
// to each one (e.g. `CMD_PUT  /* %s, <key> | %s%c%*s <key>,0,<value> | %*s
// <key\0val> */`). proto_output()'s printf-like interface is the thing
// flagged for a redesign: a `%*s` binary blob spliced into a format string
// next to a `%c` byte invites exactly the kind of argument-count/type
// mismatch printf itself is famous for, and the C version's check for it
// happens at runtime, per call. Here a `Pdu` carries a typed, pre-validated
// `Vec<Token>` instead of a format string, and `validate()` checks the
// token shape once, at construction, against the same shapes proto.h
// documents.

/// Client-to-server commands.
pub const CMD_HELLO: u8 = 0x00;
pub const CMD_SUB: u8 = 0x01;
pub const CMD_UNSUB: u8 = 0x02;
pub const CMD_GET: u8 = 0x03;
pub const CMD_PUT: u8 = 0x04;
pub const CMD_BEGIN: u8 = 0x05;
pub const CMD_COMMIT: u8 = 0x06;
pub const CMD_PING: u8 = 0x07;

/// Server-to-client messages.
pub const MSG_VERSION: u8 = 0x80;
pub const MSG_INFO: u8 = 0x81;
pub const MSG_PONG: u8 = 0x82;
pub const MSG_ERROR: u8 = 0x83;

/// Pseudo-message reported to the session layer when the peer closes.
/// Never appears on the wire.
pub const MSG_EOF: u8 = 0xff;

/// One value within a PDU's payload, in argument order. Replaces proto.h's
/// `%c` / `%s` / `%*s` format specifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
	/// `%c` -- a single unsigned byte.
	Byte(u8),
	/// `%s` -- an opaque byte string (never itself NUL-terminated on the wire).
	Str(Vec<u8>),
	/// PUT/INFO's `<key>\0<value>` payload: two strings joined by one NUL.
	KeyValue(Vec<u8>, Vec<u8>),
}

impl Token {
	fn kind(&self) -> TokenKind {
		match self {
			Token::Byte(_) => TokenKind::Byte,
			Token::Str(_) => TokenKind::Str,
			Token::KeyValue(_, _) => TokenKind::KeyValue,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
	Byte,
	Str,
	KeyValue,
}

/// A fully-formed protocol data unit: a message ID plus its ordered tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
	pub msg: u8,
	pub tokens: Vec<Token>,
}

impl Pdu {
	pub fn new(msg: u8, tokens: Vec<Token>) -> Result<Pdu, ShapeError> {
		let pdu = Pdu { msg, tokens };
		pdu.validate()?;
		Ok(pdu)
	}

	/// Checks `self.tokens` against one of `self.msg`'s documented shapes.
	pub fn validate(&self) -> Result<(), ShapeError> {
		let kinds: Vec<TokenKind> = self.tokens.iter().map(Token::kind).collect();
		let ok = match self.msg {
			CMD_HELLO | MSG_VERSION => matches!(
				kinds.as_slice(),
				[TokenKind::Byte] | [TokenKind::Byte, TokenKind::Str]
			),
			CMD_SUB | CMD_UNSUB | CMD_GET => matches!(kinds.as_slice(), [TokenKind::Str]),
			CMD_PUT | MSG_INFO => matches!(
				kinds.as_slice(),
				[TokenKind::Str] | [TokenKind::KeyValue]
			),
			CMD_BEGIN | CMD_COMMIT => kinds.is_empty(),
			CMD_PING | MSG_PONG => matches!(kinds.as_slice(), [] | [TokenKind::Str]),
			MSG_ERROR => matches!(kinds.as_slice(), [TokenKind::Str]),
			MSG_EOF => kinds.is_empty(),
			_ => false,
		};
		if ok {
			Ok(())
		} else {
			Err(ShapeError { msg: self.msg })
		}
	}
}

impl Pdu {
	/// Flattens this PDU's tokens into the `(msg, payload)` shape every wire
	/// codec frames: a `Byte` is one byte, a `Str` is copied as-is, and a
	/// `KeyValue` is joined with a NUL. Binary, framed, and text modes differ
	/// only in how they frame/escape this payload, not in what it contains.
	pub fn to_wire(&self) -> (u8, Vec<u8>) {
		let mut payload = Vec::new();
		for tok in &self.tokens {
			match tok {
				Token::Byte(b) => payload.push(*b),
				Token::Str(s) => payload.extend_from_slice(s),
				Token::KeyValue(k, v) => {
					payload.extend_from_slice(k);
					payload.push(0);
					payload.extend_from_slice(v);
				}
			}
		}
		(self.msg, payload)
	}

	/// Rebuilds a typed `Pdu` from a decoded `(msg, payload)` pair. The
	/// inverse of `to_wire`, and the single place that knows how each
	/// message's payload bytes are carved back into tokens.
	pub fn from_wire(msg: u8, payload: &[u8]) -> Result<Pdu, ShapeError> {
		let tokens = match msg {
			CMD_HELLO | MSG_VERSION => {
				if payload.is_empty() {
					return Err(ShapeError { msg });
				}
				let mut t = vec![Token::Byte(payload[0])];
				if payload.len() > 1 {
					t.push(Token::Str(payload[1..].to_vec()));
				}
				t
			}
			CMD_SUB | CMD_UNSUB | CMD_GET | MSG_ERROR => vec![Token::Str(payload.to_vec())],
			CMD_PUT | MSG_INFO => {
				// A payload with no NUL at all is a bare key (PUT's
				// delete-by-key form, or INFO's "no such key" echo); one
				// with an embedded NUL splits into key and value, even if
				// the value is empty. Collapsing both into the same shape
				// would make an empty-value PUT indistinguishable from a
				// delete.
				match payload.iter().position(|&b| b == 0) {
					Some(pos) => {
						vec![Token::KeyValue(payload[..pos].to_vec(), payload[pos + 1..].to_vec())]
					}
					None => vec![Token::Str(payload.to_vec())],
				}
			}
			CMD_BEGIN | CMD_COMMIT | MSG_EOF => {
				if !payload.is_empty() {
					return Err(ShapeError { msg });
				}
				vec![]
			}
			CMD_PING | MSG_PONG => {
				if payload.is_empty() {
					vec![]
				} else {
					vec![Token::Str(payload.to_vec())]
				}
			}
			_ => return Err(ShapeError { msg }),
		};
		Ok(Pdu { msg, tokens })
	}
}

/// A PUT's decoded intent, from `Pdu::as_put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutRequest<'a> {
	Delete(&'a [u8]),
	Set(&'a [u8], &'a [u8]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeError {
	pub msg: u8,
}

impl std::fmt::Display for ShapeError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "PDU for message 0x{:02x} does not match any of its documented shapes", self.msg)
	}
}

impl std::error::Error for ShapeError {}

// Convenience constructors, one per message, so callers never build a Pdu's
// token list by hand.

pub fn hello(id: u8, text: Option<&[u8]>) -> Pdu {
	let mut tokens = vec![Token::Byte(id)];
	if let Some(text) = text {
		tokens.push(Token::Str(text.to_vec()));
	}
	Pdu { msg: CMD_HELLO, tokens }
}

pub fn version(id: u8, text: Option<&[u8]>) -> Pdu {
	let mut tokens = vec![Token::Byte(id)];
	if let Some(text) = text {
		tokens.push(Token::Str(text.to_vec()));
	}
	Pdu { msg: MSG_VERSION, tokens }
}

pub fn sub(pattern: &[u8]) -> Pdu {
	Pdu { msg: CMD_SUB, tokens: vec![Token::Str(pattern.to_vec())] }
}

pub fn unsub(pattern: &[u8]) -> Pdu {
	Pdu { msg: CMD_UNSUB, tokens: vec![Token::Str(pattern.to_vec())] }
}

pub fn get(key: &[u8]) -> Pdu {
	Pdu { msg: CMD_GET, tokens: vec![Token::Str(key.to_vec())] }
}

pub fn put(key: &[u8], value: &[u8]) -> Pdu {
	Pdu { msg: CMD_PUT, tokens: vec![Token::KeyValue(key.to_vec(), value.to_vec())] }
}

pub fn begin() -> Pdu {
	Pdu { msg: CMD_BEGIN, tokens: vec![] }
}

pub fn commit() -> Pdu {
	Pdu { msg: CMD_COMMIT, tokens: vec![] }
}

pub fn ping(id: Option<&[u8]>) -> Pdu {
	Pdu { msg: CMD_PING, tokens: id.map(|id| vec![Token::Str(id.to_vec())]).unwrap_or_default() }
}

pub fn pong(id: Option<&[u8]>) -> Pdu {
	Pdu { msg: MSG_PONG, tokens: id.map(|id| vec![Token::Str(id.to_vec())]).unwrap_or_default() }
}

pub fn info(key: &[u8], value: &[u8]) -> Pdu {
	Pdu { msg: MSG_INFO, tokens: vec![Token::KeyValue(key.to_vec(), value.to_vec())] }
}

pub fn error(text: &[u8]) -> Pdu {
	Pdu { msg: MSG_ERROR, tokens: vec![Token::Str(text.to_vec())] }
}

pub fn eof() -> Pdu {
	Pdu { msg: MSG_EOF, tokens: vec![] }
}

impl Pdu {
	/// Returns this PDU's lone `Str` token, if its shape is exactly that.
	pub fn as_str(&self) -> Option<&[u8]> {
		match self.tokens.as_slice() {
			[Token::Str(s)] => Some(s),
			_ => None,
		}
	}

	/// Returns this PDU's key/value pair, accepting either the `KeyValue`
	/// token form or a lone `Str` holding `<key>\0<value>` already joined
	/// (the form a NUL-splitting decoder may hand back).
	pub fn as_keyvalue(&self) -> Option<(&[u8], &[u8])> {
		match self.tokens.as_slice() {
			[Token::KeyValue(k, v)] => Some((k, v)),
			[Token::Str(kv)] => {
				let pos = kv.iter().position(|&b| b == 0)?;
				Some((&kv[..pos], &kv[pos + 1..]))
			}
			_ => None,
		}
	}

	/// Returns this PUT's intent: a bare key means delete, a key/value pair
	/// means set (even when the value is empty). See `from_wire`'s comment
	/// on why these two shapes must stay distinct.
	pub fn as_put(&self) -> Option<PutRequest<'_>> {
		match self.tokens.as_slice() {
			[Token::Str(k)] => Some(PutRequest::Delete(k)),
			[Token::KeyValue(k, v)] => Some(PutRequest::Set(k, v)),
			_ => None,
		}
	}

	/// Returns the leading `Byte` token (HELLO/VERSION's protocol id) plus
	/// an optional trailing `Str` (free text), if the shape matches.
	pub fn as_byte_and_text(&self) -> Option<(u8, Option<&[u8]>)> {
		match self.tokens.as_slice() {
			[Token::Byte(b)] => Some((*b, None)),
			[Token::Byte(b), Token::Str(s)] => Some((*b, Some(s))),
			_ => None,
		}
	}

	/// Returns an optional lone `Str` token (PING/PONG's optional id).
	pub fn as_optional_str(&self) -> Option<Option<&[u8]>> {
		match self.tokens.as_slice() {
			[] => Some(None),
			[Token::Str(s)] => Some(Some(s)),
			_ => None,
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn constructors_produce_valid_shapes() {
		assert!(hello(1, Some(b"infod3")).validate().is_ok());
		assert!(hello(1, None).validate().is_ok());
		assert!(sub(b"host.*").validate().is_ok());
		assert!(put(b"k", b"v").validate().is_ok());
		assert!(begin().validate().is_ok());
		assert!(ping(None).validate().is_ok());
		assert!(ping(Some(b"42")).validate().is_ok());
		assert!(eof().validate().is_ok());
	}

	#[test]
	fn validate_rejects_wrong_shape() {
		let bad = Pdu { msg: CMD_SUB, tokens: vec![Token::Byte(1)] };
		assert!(bad.validate().is_err());
		let bad = Pdu { msg: CMD_BEGIN, tokens: vec![Token::Str(b"x".to_vec())] };
		assert!(bad.validate().is_err());
	}

	#[test]
	fn as_keyvalue_accepts_both_shapes() {
		let a = put(b"key", b"value");
		assert_eq!(a.as_keyvalue(), Some((&b"key"[..], &b"value"[..])));

		let b = Pdu { msg: CMD_PUT, tokens: vec![Token::Str(b"key\0value".to_vec())] };
		assert_eq!(b.as_keyvalue(), Some((&b"key"[..], &b"value"[..])));
	}

	#[test]
	fn as_byte_and_text_handles_optional_trailer() {
		assert_eq!(hello(3, None).as_byte_and_text(), Some((3, None)));
		assert_eq!(hello(3, Some(b"hi")).as_byte_and_text(), Some((3, Some(&b"hi"[..]))));
	}

	#[test]
	fn wire_roundtrip_preserves_shape() {
		for pdu in [
			hello(1, Some(b"infod3")),
			hello(1, None),
			sub(b"host.*"),
			get(b"host.name"),
			put(b"host.name", b"localhost"),
			begin(),
			commit(),
			ping(None),
			ping(Some(b"42")),
			pong(Some(b"42")),
			info(b"host.name", b"localhost"),
			error(b"bad command"),
			eof(),
		] {
			let (msg, payload) = pdu.to_wire();
			assert_eq!(msg, pdu.msg);
			let back = Pdu::from_wire(msg, &payload).unwrap();
			assert_eq!(back, pdu);
		}
	}

	#[test]
	fn from_wire_rejects_malformed_payloads() {
		assert!(Pdu::from_wire(CMD_HELLO, &[]).is_err());
		assert!(Pdu::from_wire(CMD_BEGIN, b"x").is_err());
		assert!(Pdu::from_wire(MSG_EOF, b"x").is_err());
		assert!(Pdu::from_wire(0xaa, b"x").is_err());
	}

	#[test]
	fn from_wire_splits_put_payload_on_embedded_nul() {
		let pdu = Pdu::from_wire(CMD_PUT, b"host.name\0localhost").unwrap();
		assert_eq!(pdu.as_keyvalue(), Some((&b"host.name"[..], &b"localhost"[..])));
	}
}
