// Copyright (c) Liftnet Contributors
// SPDX-License-Identifier: Apache-2.0

//! TLS material for the peer transport.
//!
//! Peers are a closed, trusted set on a lab network: the listener presents a
//! fresh self-signed certificate and dialers skip verification. TLS here
//! provides QUIC's required crypto layer, not peer authentication.

use std::sync::Arc;
use std::time::Duration;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};

use crate::error::{NetworkError, Result};

/// ALPN identifier for the peer protocol.
pub const ALPN: &[u8] = b"networkmod-quic";

fn install_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn transport_config(keep_alive: Duration, max_idle: Duration) -> Result<quinn::TransportConfig> {
    let mut transport = quinn::TransportConfig::default();
    transport.keep_alive_interval(Some(keep_alive));
    transport.max_idle_timeout(Some(
        quinn::VarInt::from_u64(max_idle.as_millis() as u64)
            .map_err(|_| NetworkError::Tls("idle timeout out of range".into()))?
            .into(),
    ));
    Ok(transport)
}

/// Server config with an ephemeral self-signed certificate.
pub fn server_config(keep_alive: Duration, max_idle: Duration) -> Result<quinn::ServerConfig> {
    install_provider();

    let cert = rcgen::generate_simple_self_signed(vec!["liftnet".to_string()])
        .map_err(|e| NetworkError::Tls(format!("self-signed cert: {e}")))?;
    let cert_der = CertificateDer::from(cert.cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(cert.key_pair.serialize_der())
        .map_err(|e| NetworkError::Tls(format!("private key: {e}")))?;

    let mut crypto = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .map_err(|e| NetworkError::Tls(format!("server crypto: {e}")))?;
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let mut config = quinn::ServerConfig::with_crypto(Arc::new(
        QuicServerConfig::try_from(crypto)
            .map_err(|e| NetworkError::Tls(format!("quic server config: {e}")))?,
    ));
    config.transport_config(Arc::new(transport_config(keep_alive, max_idle)?));
    Ok(config)
}

/// Client config that accepts any server certificate.
pub fn client_config(keep_alive: Duration, max_idle: Duration) -> Result<quinn::ClientConfig> {
    install_provider();

    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let mut config = quinn::ClientConfig::new(Arc::new(
        QuicClientConfig::try_from(crypto)
            .map_err(|e| NetworkError::Tls(format!("quic client config: {e}")))?,
    ));
    config.transport_config(Arc::new(transport_config(keep_alive, max_idle)?));
    Ok(config)
}

/// Accepts every server certificate; the peer set is closed and trusted.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
