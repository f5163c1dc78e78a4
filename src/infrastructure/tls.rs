use crate::config::{TlsConfig, TlsVersion};
use axum_server::tls_rustls::RustlsConfig;
use rustls::crypto::{CryptoProvider, SupportedKxGroup, aws_lc_rs};
use rustls::server::WantsServerCert;
use rustls::{ConfigBuilder, ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("unknown cipher suite '{0}'")]
    UnknownCipherSuite(String),

    #[error("unknown curve '{0}'")]
    UnknownCurve(String),

    #[error("TLS setup failed: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Builds the rustls server config: protocol floor, cipher suite and curve
/// preferences from `config`, server-side suite ordering, h2 and http/1.1
/// over ALPN.
pub async fn load_tls_config(config: &TlsConfig) -> Result<RustlsConfig, TlsError> {
    let cert_pem = read_pem("Certificate", &config.cert_path).await?;
    let key_pem = read_pem("Private key", &config.key_path).await?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice()).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(config.cert_path.display().to_string()));
    }
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())?
        .ok_or_else(|| TlsError::NoPrivateKey(config.key_path.display().to_string()))?;

    let mut server_config = server_builder(config)?.with_single_cert(certs, key)?;
    server_config.ignore_client_order = true;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

async fn read_pem(what: &str, path: &Path) -> io::Result<Vec<u8>> {
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} file not found: {}", what, path.display()),
        ));
    }
    tokio::fs::read(path).await
}

fn server_builder(
    config: &TlsConfig,
) -> Result<ConfigBuilder<ServerConfig, WantsServerCert>, TlsError> {
    let versions: &[&'static SupportedProtocolVersion] = match config.min_version {
        TlsVersion::Tls12 => &[&rustls::version::TLS13, &rustls::version::TLS12],
        TlsVersion::Tls13 => &[&rustls::version::TLS13],
    };

    Ok(ServerConfig::builder_with_provider(Arc::new(crypto_provider(config)?))
        .with_protocol_versions(versions)?
        .with_no_client_auth())
}

/// The aws-lc-rs provider narrowed to the configured suites and curves, in
/// the configured order. Empty lists keep the provider defaults.
pub fn crypto_provider(config: &TlsConfig) -> Result<CryptoProvider, TlsError> {
    let mut provider = aws_lc_rs::default_provider();

    if !config.cipher_suites.is_empty() {
        provider.cipher_suites = config
            .cipher_suites
            .iter()
            .map(|name| find_cipher_suite(name))
            .collect::<Result<Vec<_>, _>>()?;
    }

    if !config.curve_preferences.is_empty() {
        provider.kx_groups = config
            .curve_preferences
            .iter()
            .map(|name| find_kx_group(name))
            .collect::<Result<Vec<_>, _>>()?;
    }

    Ok(provider)
}

fn find_cipher_suite(name: &str) -> Result<SupportedCipherSuite, TlsError> {
    aws_lc_rs::ALL_CIPHER_SUITES
        .iter()
        .copied()
        .find(|suite| {
            let known = format!("{:?}", suite.suite());
            // TLS 1.3 suites are also accepted under their IANA names
            known.eq_ignore_ascii_case(name)
                || known.replacen("TLS13_", "TLS_", 1).eq_ignore_ascii_case(name)
        })
        .ok_or_else(|| TlsError::UnknownCipherSuite(name.to_string()))
}

fn find_kx_group(name: &str) -> Result<&'static dyn SupportedKxGroup, TlsError> {
    let wanted = match name.to_ascii_lowercase().as_str() {
        "p256" | "p-256" | "curvep256" | "prime256v1" => "secp256r1".to_string(),
        "p384" | "p-384" | "curvep384" => "secp384r1".to_string(),
        other => other.to_string(),
    };

    aws_lc_rs::ALL_KX_GROUPS
        .iter()
        .copied()
        .find(|group| format!("{:?}", group.name()).eq_ignore_ascii_case(&wanted))
        .ok_or_else(|| TlsError::UnknownCurve(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls_config(dir: &Path) -> TlsConfig {
        TlsConfig::new(dir.join("cert.pem"), dir.join("key.pem"))
    }

    fn suite_names(provider: &CryptoProvider) -> Vec<String> {
        provider
            .cipher_suites
            .iter()
            .map(|s| format!("{:?}", s.suite()))
            .collect()
    }

    #[tokio::test]
    async fn test_missing_files_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = tls_config(dir.path());

        let err = load_tls_config(&config).await.err().unwrap();
        assert!(matches!(&err, TlsError::Io(e) if e.kind() == io::ErrorKind::NotFound));
        assert!(err.to_string().contains("Certificate"));

        std::fs::write(&config.cert_path, "not a cert").unwrap();
        let err = load_tls_config(&config).await.err().unwrap();
        assert!(matches!(&err, TlsError::Io(e) if e.kind() == io::ErrorKind::NotFound));
        assert!(err.to_string().contains("Private key"));
    }

    #[tokio::test]
    async fn test_garbage_pem_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = tls_config(dir.path());
        std::fs::write(&config.cert_path, "not a cert").unwrap();
        std::fs::write(&config.key_path, "not a key").unwrap();

        let err = load_tls_config(&config).await.err().unwrap();
        assert!(matches!(err, TlsError::NoCertificates(_)));
    }

    #[tokio::test]
    async fn test_missing_private_key_block() {
        let dir = tempfile::tempdir().unwrap();
        let config = tls_config(dir.path());
        std::fs::write(
            &config.cert_path,
            "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n",
        )
        .unwrap();
        std::fs::write(&config.key_path, "not a key").unwrap();

        let err = load_tls_config(&config).await.err().unwrap();
        assert!(matches!(err, TlsError::NoPrivateKey(_)));
    }

    #[test]
    fn test_default_provider_is_kept() {
        let config = TlsConfig::new("cert.pem", "key.pem");
        let provider = crypto_provider(&config).unwrap();
        let defaults = aws_lc_rs::default_provider();

        assert_eq!(suite_names(&provider), suite_names(&defaults));
        assert_eq!(provider.kx_groups.len(), defaults.kx_groups.len());
    }

    #[test]
    fn test_suites_and_curves_follow_configured_order() {
        let mut config = TlsConfig::new("cert.pem", "key.pem");
        config.cipher_suites = vec![
            "TLS_CHACHA20_POLY1305_SHA256".to_string(),
            "tls13_aes_256_gcm_sha384".to_string(),
            "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".to_string(),
        ];
        config.curve_preferences = vec!["secp384r1".to_string(), "X25519".to_string()];

        let provider = crypto_provider(&config).unwrap();
        assert_eq!(
            suite_names(&provider),
            vec![
                "TLS13_CHACHA20_POLY1305_SHA256",
                "TLS13_AES_256_GCM_SHA384",
                "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
            ]
        );
        let curves: Vec<String> = provider
            .kx_groups
            .iter()
            .map(|g| format!("{:?}", g.name()))
            .collect();
        assert_eq!(curves, vec!["secp384r1", "X25519"]);
    }

    #[test]
    fn test_curve_aliases() {
        let mut config = TlsConfig::new("cert.pem", "key.pem");
        config.curve_preferences = vec!["P-256".to_string(), "CurveP384".to_string()];

        let provider = crypto_provider(&config).unwrap();
        let curves: Vec<String> = provider
            .kx_groups
            .iter()
            .map(|g| format!("{:?}", g.name()))
            .collect();
        assert_eq!(curves, vec!["secp256r1", "secp384r1"]);
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        let mut config = TlsConfig::new("cert.pem", "key.pem");
        config.cipher_suites = vec!["TLS_RSA_WITH_RC4_128_SHA".to_string()];
        assert!(matches!(
            crypto_provider(&config),
            Err(TlsError::UnknownCipherSuite(name)) if name == "TLS_RSA_WITH_RC4_128_SHA"
        ));

        let mut config = TlsConfig::new("cert.pem", "key.pem");
        config.curve_preferences = vec!["brainpool".to_string()];
        assert!(matches!(
            crypto_provider(&config),
            Err(TlsError::UnknownCurve(name)) if name == "brainpool"
        ));
    }

    #[test]
    fn test_tls13_floor_needs_tls13_suites() {
        let mut config = TlsConfig::new("cert.pem", "key.pem");
        config.min_version = TlsVersion::Tls13;
        config.cipher_suites = vec!["TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".to_string()];
        assert!(matches!(server_builder(&config), Err(TlsError::Rustls(_))));

        config.min_version = TlsVersion::Tls12;
        assert!(server_builder(&config).is_ok());
    }
}
