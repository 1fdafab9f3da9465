// `infod3` admin binary: flag parsing, logging facility selection, and the
// process entry point. Everything below is a thin external collaborator --
// the core lives in the library (`Store`, the codecs, `Multiplexer`,
// `Session`) and is exercised here only through `infod3::Service`.
//
// Grounded on daemon/infod.c's `main`: `-f` store path, `-s` syslog,
// `-p` TCP port, `-i` stdin listener, `-v` verbose, exit codes 0 (clean
// signal exit), 1 (startup/runtime fatal), 2 (usage). `structopt` replaces
// `getopt`'s hand-rolled switch, the way the `admin` feature on this crate
// mirrors parity-db's own `admin` sub-binary shape.

use std::path::PathBuf;
use std::process::ExitCode;

use structopt::StructOpt;

use infod3::{options, Service, ServiceOptions, StoreOptions};

#[derive(Debug, StructOpt)]
#[structopt(name = "infod3", about = "A compact key/value notification service")]
struct Opt {
	/// Path to the store file, created if it doesn't already exist.
	#[structopt(short = "f", long = "file", parse(from_os_str), default_value = "infod3.store")]
	store_path: PathBuf,

	/// Log to syslog instead of stderr.
	///
	/// Syslog forwarding itself is an external-collaborator concern: this
	/// flag is recorded and logged, but the process keeps using
	/// `env_logger`/stderr regardless.
	#[structopt(short = "s")]
	syslog: bool,

	/// TCP port to listen on, bound on both IPv4 and IPv6. Zero disables TCP.
	#[structopt(short = "p", long = "port", default_value = "26931")]
	port: u16,

	/// Also register standard input as an ad-hoc, non-listening connection.
	#[structopt(short = "i")]
	stdin: bool,

	/// Increase logging verbosity. May be repeated.
	#[structopt(short = "v", parse(from_occurrences))]
	verbose: u8,
}

fn main() -> ExitCode {
	let opt = Opt::from_args();

	let mut builder = env_logger::Builder::from_default_env();
	let level = match opt.verbose {
		0 => log::LevelFilter::Warn,
		1 => log::LevelFilter::Info,
		2 => log::LevelFilter::Debug,
		_ => log::LevelFilter::Trace,
	};
	builder.filter_module("infod3", level);
	builder.init();

	if opt.syslog {
		log::info!(
			target: "infod3",
			"-s requested syslog, but syslog forwarding is not built into this binary; logging to stderr"
		);
	}

	let store_options = StoreOptions::new(opt.store_path);

	let mut service_options = ServiceOptions::new(store_options);
	service_options.tcp_port = opt.port;
	service_options.unix_path = options::DEFAULT_UNIX_PATH.to_string();
	service_options.listen_stdin = opt.stdin;
	service_options.verbose = opt.verbose;

	let mut service = match Service::new(service_options) {
		Ok(service) => service,
		Err(e) => {
			log::error!(target: "infod3", "store_open: {}", e);
			return ExitCode::from(1);
		}
	};

	if let Err(e) = service.listen() {
		log::error!(target: "infod3", "listen: {}", e);
		return ExitCode::from(1);
	}

	log::info!(target: "infod3", "infod3 listening on port {} (store {})", opt.port, service.store().path().display());

	match service.run() {
		Ok(()) => ExitCode::from(0),
		Err(e) => {
			log::error!(target: "infod3", "run: {}", e);
			ExitCode::from(1)
		}
	}
}
