// Binary mode: `[msg:u8][len:u16 big-endian][payload]`.
//
// Grounded on lib/protobin.c's `recv_binary`/`binary_pkt_len` (decode) and
// `output_binary` (encode). The original accumulates into a growable
// `rxbuf`, resizing it first to 3 bytes (to learn the length) and then to
// `3 + sz` once the length is known; a `Vec<u8>` with `drain` does the same
// job without a dedicated buffer type.

use super::{CodecError, MAX_PAYLOAD};
use crate::proto::Pdu;

pub struct BinaryDecoder {
	buf: Vec<u8>,
}

impl BinaryDecoder {
	pub fn new() -> Self {
		BinaryDecoder { buf: Vec::new() }
	}

	/// Feeds newly-received bytes, returning every PDU and decode error
	/// completed by this call, in wire order. A length-prefix decode error
	/// discards the whole accumulator, since there is no way to resynchronize
	/// mid-stream without a framing marker.
	pub fn feed(&mut self, data: &[u8]) -> (Vec<Pdu>, Vec<CodecError>) {
		let mut pdus = Vec::new();
		let mut errors = Vec::new();
		self.buf.extend_from_slice(data);

		loop {
			if self.buf.len() < 3 {
				break;
			}
			let sz = u16::from_be_bytes([self.buf[1], self.buf[2]]) as usize;
			if sz > MAX_PAYLOAD {
				errors.push(CodecError::TooBig);
				self.buf.clear();
				break;
			}
			if self.buf.len() < 3 + sz {
				break;
			}
			let msg = self.buf[0];
			match Pdu::from_wire(msg, &self.buf[3..3 + sz]) {
				Ok(pdu) => pdus.push(pdu),
				Err(e) => errors.push(e.into()),
			}
			self.buf.drain(0..3 + sz);
		}
		(pdus, errors)
	}
}

/// Encodes `pdu` as a binary frame. Fails if the payload can't fit the
/// 16-bit length field, mirroring `output_binary`'s "packet too large" check.
pub fn encode(pdu: &Pdu) -> Result<Vec<u8>, CodecError> {
	let (msg, payload) = pdu.to_wire();
	if payload.len() > MAX_PAYLOAD {
		return Err(CodecError::TooBig);
	}
	let mut out = Vec::with_capacity(3 + payload.len());
	out.push(msg);
	out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
	out.extend_from_slice(&payload);
	Ok(out)
}
