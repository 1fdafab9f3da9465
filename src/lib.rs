// infod3: a compact file-backed key/value store with a subscribing
// notification protocol, speakable in binary, framed, or line-oriented
// text form over TCP, a `SOCK_SEQPACKET` unix socket, or stdin.

pub mod codec;
pub mod display;
pub mod error;
pub mod mux;
pub mod options;
pub mod pattern;
pub mod proto;
pub mod record;
pub mod service;
pub mod session;
pub mod store;

pub use error::{Error, Result};
pub use options::{ServiceOptions, StoreOptions};
pub use service::Service;
pub use store::Store;
