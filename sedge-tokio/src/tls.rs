use std::io;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

use sedge_errors::{ClientError, Error, ErrorKind};

use crate::builder::{Config, TlsSecurity};

/// The protocol selected via ALPN on every connection.
pub const ALPN_PROTOCOL: &[u8] = b"edgedb-binary";

pub fn read_root_cert_pem(data: &str) -> Result<Vec<CertificateDer<'static>>, Error> {
    let mut cursor = io::Cursor::new(data);
    let open_data = rustls_pemfile::read_all(&mut cursor);
    let mut certs = Vec::new();
    for item in open_data {
        match item {
            Ok(rustls_pemfile::Item::X509Certificate(data)) => {
                certs.push(data);
            }
            Ok(rustls_pemfile::Item::Pkcs1Key(_))
            | Ok(rustls_pemfile::Item::Pkcs8Key(_))
            | Ok(rustls_pemfile::Item::Sec1Key(_)) => {
                log::debug!("Skipping private key in cert data");
            }
            Ok(rustls_pemfile::Item::Crl(_)) => {
                log::debug!("Skipping CRL in cert data");
            }
            Ok(_) => {
                log::debug!("Skipping unknown item cert data");
            }
            Err(e) => {
                log::error!("could not parse item in PEM file: {:?}", e);
            }
        }
    }
    Ok(certs)
}

pub fn client_config(config: &Config) -> Result<rustls::ClientConfig, Error> {
    let builder = rustls::ClientConfig::builder();
    let mut tls = match config.tls_security {
        TlsSecurity::Strict => {
            let mut roots = rustls::RootCertStore::empty();
            match &config.tls_ca {
                Some(pem) => {
                    let (_, ignored) = roots.add_parsable_certificates(read_root_cert_pem(pem)?);
                    if ignored > 0 {
                        log::warn!("ignored {ignored} certificates in the provided CA bundle");
                    }
                }
                None => {
                    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                }
            }
            builder
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
        TlsSecurity::NoHostVerification => {
            let roots = match &config.tls_ca {
                Some(pem) => {
                    let mut roots = rustls::RootCertStore::empty();
                    roots.add_parsable_certificates(read_root_cert_pem(pem)?);
                    roots
                }
                None => {
                    let mut roots = rustls::RootCertStore::empty();
                    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                    roots
                }
            };
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoHostnameVerifier::new(roots)?))
                .with_no_client_auth()
        }
        TlsSecurity::Insecure => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NullVerifier))
            .with_no_client_auth(),
    };
    tls.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
    Ok(tls)
}

pub fn server_name(config: &Config) -> Result<ServerName<'static>, Error> {
    let name = config
        .tls_server_name
        .clone()
        .unwrap_or_else(|| config.host.clone());
    ServerName::try_from(name)
        .map_err(|e| ClientError::with_source(e).context("invalid TLS server name"))
}

/// Validates the chain against the trust roots but skips name checks.
#[derive(Debug)]
pub struct NoHostnameVerifier {
    verifier: Arc<rustls::client::WebPkiServerVerifier>,
}

impl NoHostnameVerifier {
    pub fn new(roots: rustls::RootCertStore) -> Result<NoHostnameVerifier, Error> {
        let verifier = rustls::client::WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| {
                ClientError::with_source(e).context("cannot build certificate verifier")
            })?;
        Ok(NoHostnameVerifier { verifier })
    }
}

impl ServerCertVerifier for NoHostnameVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        // Any syntactically valid name will do, the point is to check the
        // chain only.
        let placeholder = ServerName::try_from("placeholder.invalid").unwrap();
        match self.verifier.verify_server_cert(
            end_entity,
            intermediates,
            &placeholder,
            ocsp_response,
            now,
        ) {
            Ok(ok) => Ok(ok),
            Err(rustls::Error::InvalidCertificate(rustls::CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.verifier.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.verifier.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.verifier.supported_verify_schemes()
    }
}

/// Accepts everything. Only reachable via [`TlsSecurity::Insecure`].
#[derive(Debug)]
pub struct NullVerifier;

impl ServerCertVerifier for NullVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}
