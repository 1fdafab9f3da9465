// Small formatting helpers used by trace/debug logging.
//
// Mirrors parity-db's `display::hex`, used throughout `table.rs`/`column.rs`
// to render key bytes in `log::trace!`/`log::debug!` calls without requiring
// the bytes to be valid UTF-8.

/// Renders `bytes` as a lowercase hex string, for use in log messages.
pub fn hex(bytes: &[u8]) -> String {
	hex::encode(bytes)
}

/// Renders a key/value byte string for logging, escaping non-printable bytes.
/// Truncates long payloads so a single bad write can't flood the log.
pub fn lossy(bytes: &[u8]) -> String {
	const MAX: usize = 200;
	let truncated = bytes.len() > MAX;
	let shown = &bytes[..bytes.len().min(MAX)];
	let mut out = String::with_capacity(shown.len());
	for &b in shown {
		if b.is_ascii_graphic() || b == b' ' {
			out.push(b as char);
		} else {
			out.push_str(&format!("\\x{:02x}", b));
		}
	}
	if truncated {
		out.push_str("...");
	}
	out
}
