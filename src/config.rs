//! Line-oriented configuration file parsing and validation
//!
//! Each non-empty line is `<name><whitespace><value>`; `#` starts an
//! end-of-line comment. The parsed settings are read-only after startup.
//! TLS material referenced here is loaded separately into a
//! [`crate::tls::TlsContext`], so the plain settings stay a dumb value.

use crate::error::ConfigError;
use crate::filter::DatasetFilter;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the config file, overridable with `-c`
pub const DEFAULT_CONFIG_PATH: &str = "/opt/autosync/conf/autosync.conf";

/// Operating role selected by the `mode` directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Server,
	Client,
}

/// Parsed and validated process configuration
#[derive(Debug, Clone)]
pub struct Config {
	pub mode: Mode,

	/// Bind host (server mode)
	pub listen: String,

	/// Peer host (client mode)
	pub remote: String,

	/// TCP port, both modes
	pub port: u16,

	/// Per-direction bandwidth cap in KiB/s; 0 disables shaping
	pub bwlimit: u64,

	/// CA bundle, certificate and private key (PEM)
	pub ca: PathBuf,
	pub cert: PathBuf,
	pub key: PathBuf,

	/// Dataset include/exclude rules
	pub filter: DatasetFilter,

	/// Destination dataset root (client mode)
	pub storage: String,

	/// Pause between replication cycles (client mode)
	pub delay: Duration,
}

impl Config {
	/// Parse and validate the config file at `path`
	pub fn load(path: &Path) -> Result<Config, ConfigError> {
		let text = fs::read_to_string(path)?;
		Config::parse(&text)
	}

	/// Parse and validate config text
	pub fn parse(text: &str) -> Result<Config, ConfigError> {
		let mut mode = String::new();
		let mut listen = String::new();
		let mut remote = String::new();
		let mut port: u16 = 0;
		let mut bwlimit: u64 = 0;
		let mut ca = PathBuf::new();
		let mut cert = PathBuf::new();
		let mut key = PathBuf::new();
		let mut filter = DatasetFilter::new();
		let mut storage = String::new();
		let mut delay_secs: u64 = 0;

		for (index, raw) in text.lines().enumerate() {
			let number = index + 1;
			let line = match raw.find('#') {
				Some(pos) => &raw[..pos],
				None => raw,
			};
			let line = line.trim().replace('\t', " ");
			if line.is_empty() {
				continue;
			}

			let (name, value) = match line.split_once(' ') {
				Some((name, value)) => (name.trim(), value.trim()),
				None => {
					return Err(ConfigError::Syntax {
						line: number,
						message: format!("directive '{}' has no value", line),
					})
				}
			};

			match name {
				"mode" => mode = value.to_string(),
				"listen" => listen = value.to_string(),
				"remote" => remote = value.to_string(),
				"port" => {
					port = value.parse().map_err(|_| ConfigError::BadValue {
						directive: "port",
						value: value.to_string(),
					})?
				}
				"bwlimit" => {
					bwlimit = value.parse().map_err(|_| ConfigError::BadValue {
						directive: "bwlimit",
						value: value.to_string(),
					})?
				}
				"ca" => ca = PathBuf::from(value),
				"cert" => cert = PathBuf::from(value),
				"key" => key = PathBuf::from(value),
				"include" => filter.include(value).map_err(|e| ConfigError::Syntax {
					line: number,
					message: e.to_string(),
				})?,
				"exclude" => filter.exclude(value).map_err(|e| ConfigError::Syntax {
					line: number,
					message: e.to_string(),
				})?,
				"storage" => storage = value.to_string(),
				"delay" => {
					delay_secs = value.parse().map_err(|_| ConfigError::BadValue {
						directive: "delay",
						value: value.to_string(),
					})?
				}
				_ => {
					return Err(ConfigError::UnknownDirective {
						line: number,
						name: name.to_string(),
					})
				}
			}
		}

		let mode = match mode.as_str() {
			"server" => Mode::Server,
			"client" => Mode::Client,
			other => {
				return Err(ConfigError::Invalid {
					message: format!(
						"unknown mode directive value '{}', must be 'server' or 'client'",
						other
					),
				})
			}
		};

		let config = Config {
			mode,
			listen,
			remote,
			port,
			bwlimit,
			ca,
			cert,
			key,
			filter,
			storage,
			delay: Duration::from_secs(delay_secs),
		};
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		match self.mode {
			Mode::Server => {
				if self.listen.is_empty() {
					return Err(invalid("server mode requires a 'listen' directive"));
				}
				if !self.remote.is_empty() {
					return Err(invalid("'remote' is not allowed in server mode"));
				}
				if !self.storage.is_empty() {
					return Err(invalid("'storage' is not allowed in server mode"));
				}
				if !self.delay.is_zero() {
					return Err(invalid("'delay' is not allowed in server mode"));
				}
			}
			Mode::Client => {
				if self.remote.is_empty() {
					return Err(invalid("client mode requires a 'remote' directive"));
				}
				if !self.listen.is_empty() {
					return Err(invalid("'listen' is not allowed in client mode"));
				}
				if self.storage.is_empty() {
					return Err(invalid("client mode requires a 'storage' directive"));
				}
				validate_storage(&self.storage)?;
				if self.delay < Duration::from_secs(1) {
					return Err(invalid("client mode requires a 'delay' of at least 1 second"));
				}
			}
		}

		if self.port == 0 {
			return Err(invalid("'port' must be between 1 and 65535"));
		}

		for (directive, path) in
			[("ca", &self.ca), ("cert", &self.cert), ("key", &self.key)]
		{
			if path.as_os_str().is_empty() {
				return Err(invalid(&format!("missing '{}' directive", directive)));
			}
			if !path.exists() {
				return Err(ConfigError::Invalid {
					message: format!("bad '{}' value '{}': no such file", directive, path.display()),
				});
			}
		}

		Ok(())
	}
}

fn invalid(message: &str) -> ConfigError {
	ConfigError::Invalid { message: message.to_string() }
}

// The storage root doubles as a string prefix for destination dataset
// enumeration, so shapes that would make that match ambiguous are
// rejected up front.
fn validate_storage(storage: &str) -> Result<(), ConfigError> {
	if storage.starts_with('/') || storage.ends_with('/') {
		return Err(ConfigError::Invalid {
			message: format!("bad 'storage' value '{}': leading or trailing '/'", storage),
		});
	}
	if storage.contains('@') || storage.chars().any(char::is_whitespace) {
		return Err(ConfigError::Invalid {
			message: format!("bad 'storage' value '{}': '@' and whitespace not allowed", storage),
		});
	}
	Ok(())
}


// vim: ts=4
