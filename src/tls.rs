//! Mutually authenticated TLS contexts for both peer roles
//!
//! Certificate material is loaded once at startup and the resulting
//! contexts are read-only afterwards, shared by every connection worker.
//! Policy: TLS 1.2 only, AEAD ECDHE cipher suites only, no session
//! resumption, and the server demands a client certificate chained to the
//! same CA bundle the client uses to verify the server.

use crate::config::Config;
use crate::error::TlsError;
use rustls::client::Resumption;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{NoServerSessionStorage, WebPkiClientVerifier};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Read-only TLS configuration for both roles
#[derive(Clone, Debug)]
pub struct TlsContext {
	server: Arc<ServerConfig>,
	client: Arc<ClientConfig>,
}

impl TlsContext {
	/// Build the context from the `ca`/`cert`/`key` paths in the config
	pub fn from_config(conf: &Config) -> Result<Self, TlsError> {
		Self::from_files(&conf.ca, &conf.cert, &conf.key)
	}

	/// Build the context from PEM files on disk
	pub fn from_files(ca: &Path, cert: &Path, key: &Path) -> Result<Self, TlsError> {
		let certs = load_certs(cert)?;
		let key = load_key(key)?;
		let roots = load_roots(ca)?;
		let provider = Arc::new(provider());

		let verifier = WebPkiClientVerifier::builder_with_provider(
			Arc::new(roots.clone()),
			provider.clone(),
		)
		.build()
		.map_err(|e| TlsError::Verifier(e.to_string()))?;

		let mut server = ServerConfig::builder_with_provider(provider.clone())
			.with_protocol_versions(&[&rustls::version::TLS12])?
			.with_client_cert_verifier(verifier)
			.with_single_cert(certs.clone(), key.clone_key())?;
		server.session_storage = Arc::new(NoServerSessionStorage {});

		let mut client = ClientConfig::builder_with_provider(provider)
			.with_protocol_versions(&[&rustls::version::TLS12])?
			.with_root_certificates(roots)
			.with_client_auth_cert(certs, key)?;
		client.resumption = Resumption::disabled();

		Ok(TlsContext { server: Arc::new(server), client: Arc::new(client) })
	}

	pub fn acceptor(&self) -> TlsAcceptor {
		TlsAcceptor::from(self.server.clone())
	}

	pub fn connector(&self) -> TlsConnector {
		TlsConnector::from(self.client.clone())
	}
}

fn provider() -> CryptoProvider {
	CryptoProvider {
		cipher_suites: vec![
			ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
			ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
		],
		..ring::default_provider()
	}
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
	let file = File::open(path).map_err(|e| TlsError::Io {
		path: path.display().to_string(),
		source: e,
	})?;
	let certs: Vec<CertificateDer<'static>> =
		rustls_pemfile::certs(&mut BufReader::new(file))
			.collect::<Result<Vec<_>, _>>()
			.map_err(|e| TlsError::Pem {
				path: path.display().to_string(),
				message: e.to_string(),
			})?;
	if certs.is_empty() {
		return Err(TlsError::Pem {
			path: path.display().to_string(),
			message: "no certificate found".to_string(),
		});
	}
	Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
	let file = File::open(path).map_err(|e| TlsError::Io {
		path: path.display().to_string(),
		source: e,
	})?;
	rustls_pemfile::private_key(&mut BufReader::new(file))
		.map_err(|e| TlsError::Pem {
			path: path.display().to_string(),
			message: e.to_string(),
		})?
		.ok_or_else(|| TlsError::Pem {
			path: path.display().to_string(),
			message: "no private key found".to_string(),
		})
}

fn load_roots(path: &Path) -> Result<RootCertStore, TlsError> {
	let certs = load_certs(path)?;
	let mut roots = RootCertStore::empty();
	let (added, _ignored) = roots.add_parsable_certificates(certs);
	if added == 0 {
		return Err(TlsError::EmptyCaBundle { path: path.display().to_string() });
	}
	Ok(roots)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa};
	use std::fs;
	use tempfile::TempDir;

	fn write_material(dir: &TempDir) {
		let mut ca_params = CertificateParams::new(Vec::<String>::new());
		ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
		ca_params.distinguished_name.push(DnType::CommonName, "autosync test ca");
		let ca = Certificate::from_params(ca_params).unwrap();

		let mut params = CertificateParams::new(vec!["localhost".to_string()]);
		params.distinguished_name.push(DnType::CommonName, "peer");
		let cert = Certificate::from_params(params).unwrap();

		fs::write(dir.path().join("ca.pem"), ca.serialize_pem().unwrap()).unwrap();
		fs::write(
			dir.path().join("cert.pem"),
			cert.serialize_pem_with_signer(&ca).unwrap(),
		)
		.unwrap();
		fs::write(dir.path().join("key.pem"), cert.serialize_private_key_pem()).unwrap();
	}

	#[test]
	fn test_context_from_generated_material() {
		let dir = TempDir::new().unwrap();
		write_material(&dir);
		let context = TlsContext::from_files(
			&dir.path().join("ca.pem"),
			&dir.path().join("cert.pem"),
			&dir.path().join("key.pem"),
		)
		.unwrap();
		let _ = context.acceptor();
		let _ = context.connector();
	}

	#[test]
	fn test_missing_file_is_io_error() {
		let dir = TempDir::new().unwrap();
		write_material(&dir);
		let err = TlsContext::from_files(
			&dir.path().join("nope.pem"),
			&dir.path().join("cert.pem"),
			&dir.path().join("key.pem"),
		)
		.unwrap_err();
		assert!(matches!(err, TlsError::Io { .. }));
	}

	#[test]
	fn test_garbage_pem_rejected() {
		let dir = TempDir::new().unwrap();
		write_material(&dir);
		fs::write(dir.path().join("junk.pem"), "this is not PEM").unwrap();
		let err = TlsContext::from_files(
			&dir.path().join("junk.pem"),
			&dir.path().join("cert.pem"),
			&dir.path().join("key.pem"),
		)
		.unwrap_err();
		assert!(matches!(err, TlsError::Pem { .. }));
	}
}

// vim: ts=4
