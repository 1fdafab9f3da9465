// Framed mode: `[msg:u8][payload]`, no length prefix.
//
// Grounded on lib/protofram.c's `recv_framed`/`output_framed`: this mode
// only makes sense over a transport that already preserves message
// boundaries (a `SOCK_SEQPACKET` unix socket), so the whole of one read (or
// one packet, over a datagram socket) is exactly one PDU -- there's nothing
// to accumulate across calls, unlike binary mode.

use super::CodecError;
use crate::proto::Pdu;

/// Decodes one complete datagram into a PDU. `data` must be non-empty;
/// EOF is signalled by the caller reading a zero-length datagram and is
/// handled above this layer the same way as the other modes.
pub fn decode(data: &[u8]) -> Result<Pdu, CodecError> {
	let (&msg, payload) = data.split_first().ok_or(CodecError::Syntax("empty datagram".into()))?;
	Pdu::from_wire(msg, payload).map_err(CodecError::from)
}

pub fn encode(pdu: &Pdu) -> Vec<u8> {
	let (msg, payload) = pdu.to_wire();
	let mut out = Vec::with_capacity(1 + payload.len());
	out.push(msg);
	out.extend_from_slice(&payload);
	out
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::proto;

	#[test]
	fn encode_then_decode_recovers_the_pdu() {
		let pdu = proto::sub(b"host.*");
		let wire = encode(&pdu);
		assert_eq!(decode(&wire).unwrap(), pdu);
	}

	#[test]
	fn empty_datagram_is_a_decode_error() {
		assert!(decode(&[]).is_err());
	}

	#[test]
	fn malformed_payload_is_a_decode_error() {
		// CMD_BEGIN must carry an empty payload.
		assert!(decode(&[proto::CMD_BEGIN, 0xaa]).is_err());
	}
}
