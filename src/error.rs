// Error type shared across the store, codec, multiplexer and session layers.
//
// Modeled on parity-db's hand-rolled error enum: one flat set of variants,
// a `Result` alias, and `From` impls at the boundaries that produce errors
// (mostly `std::io::Error`). No `thiserror`/`anyhow`: the surface here is
// small enough that a hand-rolled enum stays simpler than pulling in either.

use std::fmt;

#[derive(Debug)]
pub enum Error {
	/// Wraps an underlying OS/filesystem error.
	Io(std::io::Error),
	/// Another process already holds the exclusive advisory lock on the store file.
	Locked,
	/// The store file is, or would become, too large to address with a 32-bit offset.
	TooLarge,
	/// The store cannot grow further without exceeding the 32-bit offset space.
	NoSpace,
	/// A caller-supplied value did not satisfy a documented precondition.
	InvalidArg(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Io(e) => write!(f, "I/O error: {}", e),
			Error::Locked => write!(f, "store file is locked by another process"),
			Error::TooLarge => write!(f, "store file exceeds the 32-bit size limit"),
			Error::NoSpace => write!(f, "store cannot be grown further"),
			Error::InvalidArg(msg) => write!(f, "invalid argument: {}", msg),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		Error::Io(e)
	}
}
