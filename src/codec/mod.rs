// Wire codecs: turn a stream of bytes into `Pdu`s and back.
//
// Grounded on proto.c's `proto_recv`/`proto_outputv` dispatch: every mode
// converges on the same `(msg, payload)` shape (`Pdu::to_wire`/`from_wire` in
// proto.rs), and only differs in how that payload is framed on the wire.
// `proto_recv` also auto-detects text vs. binary from the first received
// byte when the connection's mode hasn't been pinned yet; framed mode is
// never auto-detected, it's selected up front by the listener that accepted
// the connection (a `SOCK_SEQPACKET` unix socket preserves datagram
// boundaries, so there's no length prefix to get wrong).

pub mod binary;
pub mod framed;
pub mod text;

use crate::proto::Pdu;

/// Maximum payload a binary-mode PDU may declare, matching the 16-bit length
/// field's natural ceiling. Guards against a peer claiming an absurd length
/// and the decoder buffering forever waiting for bytes that never arrive.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
	/// A binary-mode length prefix exceeded `MAX_PAYLOAD`.
	TooBig,
	/// A decoded payload didn't match its message's documented shape.
	Shape(crate::proto::ShapeError),
	/// A text-mode line didn't parse: unknown command, bad escape, etc.
	/// Carries a message suitable for echoing back as `MSG_ERROR`.
	Syntax(String),
}

impl std::fmt::Display for CodecError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			CodecError::TooBig => write!(f, "payload too large"),
			CodecError::Shape(e) => write!(f, "{}", e),
			CodecError::Syntax(s) => write!(f, "{}", s),
		}
	}
}

impl std::error::Error for CodecError {}

impl From<crate::proto::ShapeError> for CodecError {
	fn from(e: crate::proto::ShapeError) -> Self {
		CodecError::Shape(e)
	}
}

/// The three wire representations a connection can speak.
/// `Unknown` is resolved to `Binary` or `Text` on the first received byte;
/// `Framed` is fixed at construction and never auto-detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Unknown,
	Binary,
	Text,
	Framed,
}

/// Decides binary vs. text from a connection's first byte, mirroring
/// `proto_recv`'s autodetection: printable ASCII (and the whitespace that
/// starts a text command line) means text, anything else means binary.
fn detect_mode(first_byte: u8) -> Mode {
	match first_byte {
		b'\n' | b'\r' | b' ' => Mode::Text,
		0x40..=0x7e => Mode::Text,
		_ => Mode::Binary,
	}
}

/// A stream decoder that dispatches to the right mode, auto-detecting
/// text/binary on first use. Construct with `Mode::Framed` for datagram
/// transports where the mode is already known.
pub struct Decoder {
	mode: Mode,
	binary: binary::BinaryDecoder,
	text: text::TextDecoder,
}

impl Decoder {
	pub fn new(mode: Mode) -> Self {
		Decoder { mode, binary: binary::BinaryDecoder::new(), text: text::TextDecoder::new() }
	}

	pub fn mode(&self) -> Mode {
		self.mode
	}

	/// Feeds newly-received bytes (never empty; callers detect EOF
	/// themselves and synthesize `crate::proto::eof()` instead of routing a
	/// zero-length read through here). Returns zero or more decoded PDUs and
	/// zero or more decode errors, in the order they were recognized within
	/// this chunk.
	pub fn feed(&mut self, data: &[u8]) -> (Vec<Pdu>, Vec<CodecError>) {
		if self.mode == Mode::Unknown {
			self.mode = data.first().map(|&b| detect_mode(b)).unwrap_or(Mode::Unknown);
		}
		match self.mode {
			Mode::Binary => self.binary.feed(data),
			Mode::Text => self.text.feed(data),
			Mode::Framed => {
				let mut pdus = Vec::new();
				let mut errors = Vec::new();
				match framed::decode(data) {
					Ok(pdu) => pdus.push(pdu),
					Err(e) => errors.push(e),
				}
				(pdus, errors)
			}
			Mode::Unknown => (Vec::new(), Vec::new()),
		}
	}

	/// Signals that the peer closed the connection. For text mode this
	/// forces any unterminated line through the decoder first, the way
	/// `recv_text`'s `netlen == 0` case feeds a synthetic `'\n'` before
	/// reporting EOF; for the other modes a bare `Pdu::eof()` is enough,
	/// since neither keeps partially-decoded state worth flushing.
	pub fn eof(&mut self) -> (Vec<Pdu>, Vec<CodecError>) {
		match self.mode {
			Mode::Text => self.text.eof(),
			_ => (vec![Pdu::eof()], Vec::new()),
		}
	}
}

/// Encodes a PDU for the wire according to `mode`. `mode` must already be
/// resolved (never `Unknown`); callers pick binary as the default outbound
/// mode the same way `proto_outputv` does when nothing's been received yet.
pub fn encode(mode: Mode, pdu: &Pdu) -> Result<Vec<u8>, CodecError> {
	match mode {
		Mode::Binary | Mode::Unknown => binary::encode(pdu),
		Mode::Framed => Ok(framed::encode(pdu)),
		Mode::Text => text::encode(pdu),
	}
}
