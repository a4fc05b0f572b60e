//! Integration tests for the certificate store

use pcf_mitm::CertificateStore;
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use std::path::PathBuf;
use tokio_rustls::rustls::ServerConfig;

/// Write a fixture CA pair the way the external CA tool would.
fn write_fixture_ca(dir: &PathBuf) {
  let mut params = CertificateParams::default();
  let mut dn = DistinguishedName::new();
  dn.push(DnType::CommonName, "pcf-dev-proxy test CA");
  params.distinguished_name = dn;
  params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

  let key_pair = KeyPair::generate().expect("generate CA key");
  let cert = params.self_signed(&key_pair).expect("self-sign CA");

  std::fs::create_dir_all(dir).expect("create CA dir");
  std::fs::write(dir.join("ca_cert.pem"), cert.pem()).expect("write CA cert");
  std::fs::write(dir.join("ca_key.pem"), key_pair.serialize_pem()).expect("write CA key");
}

fn scratch_dir(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("pcf-mitm-ca-{name}"));
  if dir.exists() {
    std::fs::remove_dir_all(&dir).ok();
  }
  dir
}

#[tokio::test]
async fn load_fails_without_supplied_ca() {
  let dir = scratch_dir("absent");
  let result = CertificateStore::load(&dir).await;
  assert!(result.is_err(), "loading an empty CA dir must fail");
  let message = result.err().map(|e| e.to_string()).unwrap_or_default();
  assert!(message.contains("ca_cert.pem"), "error names the expected files: {message}");
}

#[tokio::test]
async fn signs_leaf_with_ca_in_chain() {
  let dir = scratch_dir("leaf");
  write_fixture_ca(&dir);

  let store = CertificateStore::load(&dir).await.expect("load CA");
  let (chain, _key) = store.server_cert("x.dynamics.com").await.expect("sign leaf");
  assert_eq!(chain.len(), 2, "chain is [leaf, ca]");

  std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn cached_leaf_still_builds_a_tls_config() {
  let dir = scratch_dir("cache");
  write_fixture_ca(&dir);

  let store = CertificateStore::load(&dir).await.expect("load CA");

  let (chain1, key1) = store.server_cert("env.crm.dynamics.com").await.expect("first leaf");
  ServerConfig::builder()
    .with_no_client_auth()
    .with_single_cert(chain1, key1)
    .expect("TLS config from fresh leaf");

  // Second request comes from the cache; a key mismatch would surface here.
  let (chain2, key2) = store.server_cert("env.crm.dynamics.com").await.expect("cached leaf");
  ServerConfig::builder()
    .with_no_client_auth()
    .with_single_cert(chain2, key2)
    .expect("TLS config from cached leaf");

  std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn ip_hosts_get_certificates() {
  let dir = scratch_dir("ip");
  write_fixture_ca(&dir);

  let store = CertificateStore::load(&dir).await.expect("load CA");
  let (chain, _key) = store.server_cert("127.0.0.1").await.expect("sign IP leaf");
  assert_eq!(chain.len(), 2);

  std::fs::remove_dir_all(&dir).ok();
}
