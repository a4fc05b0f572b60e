//! Certificate handling for TLS termination
//!
//! The proxy terminates TLS with per-host leaf certificates signed by a CA
//! key pair supplied on disk by an external collaborator. This module loads
//! that pair, signs leaves on demand, and caches them; it never generates or
//! installs the CA itself.

use crate::error::{Error, Result};
use moka::future::Cache;
use rand::Rng;
use rcgen::{CertificateParams, DistinguishedName, DnType, Issuer, KeyPair, SanType};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::fs;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// Leaf certificate validity period in seconds (1 year)
const TTL_SECS: i64 = 365 * 24 * 60 * 60;
/// Cache time-to-live in seconds (6 months)
const CACHE_TTL: u64 = (TTL_SECS / 2) as u64;
/// Offset for not_before timestamp to handle clock skew (60 seconds)
const NOT_BEFORE_OFFSET: i64 = 60;

type CertPair = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// Loads a supplied CA and signs per-host server certificates.
pub struct CertificateStore {
  issuer: Issuer<'static, KeyPair>,
  ca_cert_der: CertificateDer<'static>,
  ca_cert_path: PathBuf,
  cache: Cache<String, Arc<CertPair>>,
}

impl CertificateStore {
  /// Load the CA key pair from `ca_cert.pem` / `ca_key.pem` under the given
  /// directory. Fails when the pair is absent; generating a CA and trusting
  /// it in the OS store is the CA tool's job, not the proxy's.
  pub async fn load(dir: impl AsRef<Path>) -> Result<Self> {
    let dir = dir.as_ref();
    let cert_path = dir.join("ca_cert.pem");
    let key_path = dir.join("ca_key.pem");

    if !cert_path.exists() || !key_path.exists() {
      return Err(Error::certificate(format!(
        "CA key pair not found in {} (expected ca_cert.pem and ca_key.pem); run the CA setup first",
        dir.display()
      )));
    }

    let cert_pem = fs::read_to_string(&cert_path).await?;
    let key_pem = fs::read_to_string(&key_path).await?;

    let key_pair = KeyPair::from_pem(&key_pem)
      .map_err(|e| Error::certificate(format!("Failed to parse CA key: {}", e)))?;

    let issuer = Issuer::from_ca_cert_pem(&cert_pem, key_pair)
      .map_err(|e| Error::certificate(format!("Failed to create issuer from CA cert: {}", e)))?;

    let ca_cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
      .next()
      .ok_or_else(|| Error::certificate("No certificate found in CA PEM"))?
      .map_err(|e| Error::certificate(format!("Failed to parse CA PEM: {}", e)))?;

    let cache = Cache::builder()
      .max_capacity(1000)
      .time_to_live(std::time::Duration::from_secs(CACHE_TTL))
      .build();

    Ok(Self {
      issuer,
      ca_cert_der,
      ca_cert_path: cert_path,
      cache,
    })
  }

  /// Path of the loaded CA certificate, for startup banners.
  pub fn ca_cert_path(&self) -> &Path {
    &self.ca_cert_path
  }

  /// Get or sign a server certificate for the given host.
  pub async fn server_cert(&self, host: &str) -> Result<CertPair> {
    // IP literals always get a freshly signed certificate so a cached entry
    // without an iPAddress SAN can never be handed out.
    if host.parse::<IpAddr>().is_ok() {
      let (chain, key) = self.sign_leaf(host)?;
      let cached = (chain.clone(), key.clone_key());
      self.cache.insert(host.to_string(), Arc::new(cached)).await;
      return Ok((chain, key));
    }

    if let Some(cached) = self.cache.get(host).await {
      let (chain, key) = cached.as_ref();
      return Ok((chain.clone(), key.clone_key()));
    }

    let (chain, key) = self.sign_leaf(host)?;
    let cached = (chain.clone(), key.clone_key());
    self.cache.insert(host.to_string(), Arc::new(cached)).await;
    Ok((chain, key))
  }

  /// Sign a leaf certificate for a host with the loaded CA.
  fn sign_leaf(&self, host: &str) -> Result<CertPair> {
    let mut params = CertificateParams::default();

    // Random serial so regenerated leaves never collide.
    params.serial_number = Some(rand::thread_rng().gen::<u64>().into());

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, host);
    params.distinguished_name = dn;

    // IP targets get both SAN forms: some clients check iPAddress strictly,
    // others fall back to dNSName.
    params.subject_alt_names = if let Ok(ip) = host.parse::<IpAddr>() {
      let mut sans = vec![SanType::IpAddress(ip)];
      if let Ok(dns_name) = host.try_into() {
        sans.push(SanType::DnsName(dns_name));
      }
      sans
    } else {
      vec![SanType::DnsName(host.try_into().map_err(|_| {
        Error::certificate(format!("Invalid host name: {}", host))
      })?)]
    };

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::seconds(NOT_BEFORE_OFFSET);
    params.not_after = now + Duration::seconds(TTL_SECS);

    let key_pair = KeyPair::generate()
      .map_err(|e| Error::certificate(format!("Failed to generate key pair: {}", e)))?;

    let cert = params
      .signed_by(&key_pair, &self.issuer)
      .map_err(|e| Error::certificate(format!("Failed to sign server cert: {}", e)))?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der())
      .map_err(|_| Error::certificate("Failed to serialize server key"))?;

    // Chain order: [server_cert, ca_cert]
    Ok((vec![cert_der, self.ca_cert_der.clone()], key_der))
  }
}
