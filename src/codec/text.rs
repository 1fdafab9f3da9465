// Text mode: human-typeable command lines, one PDU per `\r\n`-terminated
// line.
//
// Grounded on prototext.c's `cmdtab[]`, `recv_text_1ch`'s nine-state
// machine, and `output_text`/`output_text_string`. The original interprets
// a per-message printf-style format string (`"i|t"`, `"t|0t"`, ...) against
// a `va_list` at both encode and decode time; here the format string
// survives only as each message's *shape*, matched against a typed `Pdu`
// (decode goes through `Pdu::from_wire` on the same packed payload bytes
// the other two modes produce, so PUT/INFO's "`t|0t`" -- one string, or a
// string plus an injected NUL plus a second string -- collapses to "append
// whatever bytes arrive, optionally with a NUL spliced in where `0`
// appears" exactly as it does in C).
//
// One simplification from the original: when a decode error forces a reset
// to the error-recovery state, this version always treats the triggering
// byte as consumed under that state, rather than replicating the original's
// same-byte fallthrough into "skip blank lines" when that byte happens to
// be a line terminator. `State::Error` treats every non-terminator byte
// identically, so the two only differ by at most one resynchronization
// byte and never in which PDUs or errors are produced.

use super::CodecError;
use crate::proto::{self, Pdu};

const MAX_CMD_LEN: usize = 16;

struct CmdEntry {
	word: &'static str,
	id: u8,
	fmt: &'static [u8],
}

const CMDTAB: &[CmdEntry] = &[
	CmdEntry { word: "HELLO", id: proto::CMD_HELLO, fmt: b"i|t" },
	CmdEntry { word: "SUB", id: proto::CMD_SUB, fmt: b"t" },
	CmdEntry { word: "UNSUB", id: proto::CMD_UNSUB, fmt: b"t" },
	CmdEntry { word: "GET", id: proto::CMD_GET, fmt: b"t" },
	CmdEntry { word: "PUT", id: proto::CMD_PUT, fmt: b"t|0t" },
	CmdEntry { word: "BEGIN", id: proto::CMD_BEGIN, fmt: b"" },
	CmdEntry { word: "COMMIT", id: proto::CMD_COMMIT, fmt: b"" },
	CmdEntry { word: "PING", id: proto::CMD_PING, fmt: b"|t" },
	CmdEntry { word: "VERSION", id: proto::MSG_VERSION, fmt: b"i|t" },
	CmdEntry { word: "INFO", id: proto::MSG_INFO, fmt: b"t|0t" },
	CmdEntry { word: "PONG", id: proto::MSG_PONG, fmt: b"|t" },
	CmdEntry { word: "ERROR", id: proto::MSG_ERROR, fmt: b"t" },
];

fn find_by_word(word: &[u8]) -> Option<&'static CmdEntry> {
	CMDTAB.iter().find(|e| e.word.len() == word.len() && e.word.as_bytes().eq_ignore_ascii_case(word))
}

fn find_by_id(msg: u8) -> Option<&'static CmdEntry> {
	CMDTAB.iter().find(|e| e.id == msg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Error,
	Bol,
	Cmd,
	ArgSp,
	Int,
	StrBeg,
	Str,
	QStr,
	QOct,
}

/// Decodes one connection's text-mode stream, one byte at a time, exactly
/// as `recv_text_1ch` does.
pub struct TextDecoder {
	state: State,
	cmd: Vec<u8>,
	msg: u8,
	buf: Vec<u8>,
	fmt: &'static [u8],
	fmt_pos: usize,
	optional: bool,
	intval: u32,
	counter: u8,
}

impl TextDecoder {
	pub fn new() -> Self {
		TextDecoder {
			state: State::Bol,
			cmd: Vec::new(),
			msg: 0,
			buf: Vec::new(),
			fmt: b"",
			fmt_pos: 0,
			optional: false,
			intval: 0,
			counter: 0,
		}
	}

	pub fn feed(&mut self, data: &[u8]) -> (Vec<Pdu>, Vec<CodecError>) {
		let mut pdus = Vec::new();
		let mut errors = Vec::new();
		for &ch in data {
			match self.feed_char(ch) {
				Some(Ok((msg, payload))) => match Pdu::from_wire(msg, &payload) {
					Ok(pdu) => pdus.push(pdu),
					Err(e) => errors.push(CodecError::from(e)),
				},
				Some(Err(text)) => errors.push(CodecError::Syntax(text)),
				None => {}
			}
		}
		(pdus, errors)
	}

	/// Forces a premature end-of-line through the state machine, the way
	/// `recv_text`'s `netlen == 0` case feeds a synthetic `'\n'` before
	/// reporting EOF, so a command left unterminated by a closed connection
	/// still gets a chance to complete or error out.
	pub fn eof(&mut self) -> (Vec<Pdu>, Vec<CodecError>) {
		let (mut pdus, errors) = self.feed(b"\n");
		pdus.push(proto::eof());
		(pdus, errors)
	}

	fn fmt_peek(&self) -> Option<u8> {
		self.fmt.get(self.fmt_pos).copied()
	}

	fn feed_char(&mut self, ch: u8) -> Option<Result<(u8, Vec<u8>), String>> {
		loop {
			match self.state {
				State::Error => {
					if ch != b'\n' && ch != b'\r' {
						return None;
					}
					self.state = State::Bol;
					continue;
				}
				State::Bol => {
					if ch == b' ' || ch == b'\n' || ch == b'\r' {
						return None;
					}
					self.cmd.clear();
					self.state = State::Cmd;
					continue;
				}
				State::Cmd => {
					if ch != b' ' && ch != b'\n' && ch != b'\r' {
						self.cmd.push(ch);
						if self.cmd.len() >= MAX_CMD_LEN {
							self.state = State::Error;
							return Some(Err("long command".to_string()));
						}
						return None;
					}
					match find_by_word(&self.cmd) {
						None => {
							self.state = State::Error;
							return Some(Err(format!(
								"unknown command '{}'",
								String::from_utf8_lossy(&self.cmd)
							)));
						}
						Some(entry) => {
							self.msg = entry.id;
							self.buf.clear();
							self.fmt = entry.fmt;
							self.fmt_pos = 0;
							self.optional = false;
							self.state = State::ArgSp;
							continue;
						}
					}
				}
				State::ArgSp => {
					if ch == b' ' {
						return None;
					}
					if self.fmt_peek() == Some(b'|') {
						self.fmt_pos += 1;
						self.optional = true;
					}
					if ch == b'\n' || ch == b'\r' {
						self.state = State::Bol;
						if !self.optional && self.fmt_pos < self.fmt.len() {
							return Some(Err(format!(
								"missing arg for '{}'",
								String::from_utf8_lossy(&self.cmd)
							)));
						}
						let msg = self.msg;
						let payload = std::mem::take(&mut self.buf);
						return Some(Ok((msg, payload)));
					}
					if self.fmt_pos >= self.fmt.len() {
						self.state = State::Error;
						return Some(Err(format!(
							"unexpected arg for '{}'",
							String::from_utf8_lossy(&self.cmd)
						)));
					}
					let f = self.fmt[self.fmt_pos];
					self.fmt_pos += 1;
					match f {
						b'i' => {
							self.state = State::Int;
							self.intval = 0;
							continue;
						}
						b't' => {
							self.state = State::StrBeg;
							continue;
						}
						b'0' => {
							self.buf.push(0);
							continue;
						}
						_ => unreachable!("bad shape table entry"),
					}
				}
				State::Int => {
					if ch.is_ascii_digit() {
						self.intval = self.intval * 10 + (ch - b'0') as u32;
						if self.intval > 255 {
							self.state = State::Error;
							return Some(Err("integer overflow".to_string()));
						}
						return None;
					}
					self.buf.push(self.intval as u8);
					self.state = State::ArgSp;
					continue;
				}
				State::StrBeg => {
					if ch == b'"' {
						self.state = State::QStr;
						return None;
					}
					self.state = State::Str;
					continue;
				}
				State::Str => {
					let more_args = self.fmt_pos < self.fmt.len();
					if ch == b'\r' || ch == b'\n' || (more_args && ch == b' ') {
						if !more_args {
							while self.buf.last() == Some(&b' ') {
								self.buf.pop();
							}
						}
						self.state = State::ArgSp;
						continue;
					}
					self.buf.push(ch);
					return None;
				}
				State::QStr => {
					if ch == b'\r' || ch == b'\n' {
						self.state = State::Bol;
						return Some(Err("unclosed \"".to_string()));
					} else if ch == b'\\' {
						self.counter = 3;
						self.intval = 0;
						self.state = State::QOct;
						return None;
					} else if ch == b'"' {
						self.state = State::ArgSp;
						return None;
					} else {
						self.buf.push(ch);
						return None;
					}
				}
				State::QOct => {
					if !(b'0'..=b'7').contains(&ch) {
						self.state = State::Error;
						return Some(Err("expected octal after backslash".to_string()));
					}
					self.intval = (self.intval << 3) | (ch - b'0') as u32;
					self.counter -= 1;
					if self.counter == 0 {
						self.buf.push(self.intval as u8);
						self.state = State::QStr;
					}
					return None;
				}
			}
		}
	}
}

/// Quotes `s` the way `output_text_string` does, if it needs it: empty,
/// starting with `"`, or containing a space/CR/LF forces `"..."` quoting
/// with `\DDD` octal escapes for `"`, `\`, CR and LF.
fn encode_string(out: &mut Vec<u8>, s: &[u8]) {
	let needs_quote =
		s.is_empty() || s[0] == b'"' || s.iter().any(|&b| b == b' ' || b == b'\r' || b == b'\n');
	if !needs_quote {
		out.extend_from_slice(s);
		return;
	}
	out.push(b'"');
	for &ch in s {
		if ch == b'\n' || ch == b'\r' || ch == b'"' || ch == b'\\' {
			out.push(b'\\');
			out.push(b'0' + ((ch >> 6) & 7));
			out.push(b'0' + ((ch >> 3) & 7));
			out.push(b'0' + (ch & 7));
		} else {
			out.push(ch);
		}
	}
	out.push(b'"');
}

/// Encodes `pdu` as one `\r\n`-terminated text line. Always renders a
/// `KeyValue` token as two separate space-separated strings rather than
/// `output_text`'s embedded-NUL `%*s` shortcut; `TextDecoder` accepts both
/// forms, since `"t|0t"` is satisfied either way.
pub fn encode(pdu: &Pdu) -> Result<Vec<u8>, CodecError> {
	let entry =
		find_by_id(pdu.msg).ok_or_else(|| CodecError::Syntax(format!("unknown msg 0x{:02x}", pdu.msg)))?;
	let mut out = Vec::new();
	out.extend_from_slice(entry.word.as_bytes());
	for tok in &pdu.tokens {
		out.push(b' ');
		match tok {
			proto::Token::Byte(b) => out.extend_from_slice(b.to_string().as_bytes()),
			proto::Token::Str(s) => encode_string(&mut out, s),
			proto::Token::KeyValue(k, v) => {
				encode_string(&mut out, k);
				out.push(b' ');
				encode_string(&mut out, v);
			}
		}
	}
	out.extend_from_slice(b"\r\n");
	Ok(out)
}
