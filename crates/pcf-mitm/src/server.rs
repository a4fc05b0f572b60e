//! HTTPS MITM proxy server
//!
//! Terminates TLS with per-host leaf certificates, serves the intercepted
//! control namespace from the local serving root (rewriting `bundle.js` in
//! hot mode), and forwards everything else to its original destination.

use crate::assets::{AssetResolver, AssetStatus, NO_STORE};
use crate::ca::CertificateStore;
use crate::control::ControlName;
use crate::error::{Error, Result};
use crate::inject::BundleInjector;
use crate::matcher::BundleMatcher;
use http::header::HeaderMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

const MAX_REQUEST_LINE: usize = 8 * 1024;
const MAX_HEADER_SIZE: usize = 64 * 1024;
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Proxy server configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
  /// Listener address (default `127.0.0.1:8642`)
  pub listen: SocketAddr,
  /// Control identifier whose bundle namespace is intercepted
  pub control: ControlName,
  /// Serving root for intercepted assets
  pub serve_dir: PathBuf,
  /// Hot mode: inject the in-page runtime and strip CSP on passthrough
  pub hot: bool,
}

/// HTTPS MITM proxy server
pub struct ProxyServer {
  config: ProxyConfig,
  certs: Arc<CertificateStore>,
  matcher: BundleMatcher,
  resolver: AssetResolver,
  injector: Option<BundleInjector>,
  client: reqwest::Client,
  forward_error_logged: AtomicBool,
  handle_error_logged: AtomicBool,
}

impl ProxyServer {
  /// Create a new proxy server.
  ///
  /// `injector` carries the pre-rendered runtime prefix and must be present
  /// exactly when hot mode is enabled.
  pub fn new(
    config: ProxyConfig,
    certs: Arc<CertificateStore>,
    injector: Option<BundleInjector>,
  ) -> Result<Self> {
    let matcher = BundleMatcher::new(&config.control)?;
    let resolver = AssetResolver::new(&config.serve_dir);
    // Redirects pass through to the browser untouched.
    let client = reqwest::Client::builder()
      .redirect(reqwest::redirect::Policy::none())
      .build()?;
    Ok(Self {
      config,
      certs,
      matcher,
      resolver,
      injector,
      client,
      forward_error_logged: AtomicBool::new(false),
      handle_error_logged: AtomicBool::new(false),
    })
  }

  /// Run the accept loop until the shutdown channel fires.
  pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let listener = TcpListener::bind(self.config.listen)
      .await
      .map_err(|e| Error::bind(self.config.listen.to_string(), e))?;
    tracing::info!(
      "intercepting https traffic for {} on {}",
      self.config.control,
      self.config.listen
    );

    loop {
      tokio::select! {
        _ = shutdown.changed() => {
          tracing::info!("proxy listener shutting down");
          return Ok(());
        }
        accepted = listener.accept() => match accepted {
          Ok((stream, _peer)) => {
            let server = Arc::clone(&self);
            tokio::spawn(async move {
              if let Err(e) = server.handle_connection(stream).await {
                server.log_handle_error(&e);
              }
            });
          }
          Err(e) => {
            tracing::error!("Failed to accept connection: {}", e);
          }
        }
      }
    }
  }

  /// Handle a client connection: CONNECT tunnels are TLS-terminated, plain
  /// proxy requests are forwarded directly.
  async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
    let mut request_line = Vec::new();
    let mut buf = [0u8; 1];
    loop {
      stream.read_exact(&mut buf).await?;
      request_line.push(buf[0]);
      if buf[0] == b'\n' {
        break;
      }
      if request_line.len() > MAX_REQUEST_LINE {
        return Err(Error::invalid_request("Request line too long"));
      }
    }

    let line = String::from_utf8_lossy(&request_line);
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
      return Err(Error::invalid_request("Invalid request line"));
    }
    let method = parts[0].to_string();
    let uri = parts[1].to_string();

    if method == "CONNECT" {
      let mut reader = BufReader::new(stream);
      let mut drained = 0usize;
      loop {
        let mut header_line = String::new();
        let n = reader.read_line(&mut header_line).await?;
        if n == 0 {
          break;
        }
        drained += n;
        if drained > MAX_HEADER_SIZE {
          return Err(Error::invalid_request("CONNECT headers exceed maximum size"));
        }
        if header_line == "\r\n" || header_line == "\n" || header_line.is_empty() {
          break;
        }
      }
      self.handle_connect(reader.into_inner(), &uri).await
    } else {
      self.handle_plain_http(&method, &uri, BufReader::new(stream)).await
    }
  }

  /// Terminate TLS on a CONNECT tunnel and serve the request inside it.
  async fn handle_connect(&self, mut stream: TcpStream, authority: &str) -> Result<()> {
    let (host, port) = parse_host_port(authority)?;

    stream
      .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
      .await?;
    stream.flush().await?;

    let (cert_chain, key) = self.certs.server_cert(&host).await?;
    let tls_config = ServerConfig::builder()
      .with_no_client_auth()
      .with_single_cert(cert_chain, key)
      .map_err(|e| Error::tls(format!("Failed to create TLS config: {}", e)))?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let mut tls_stream = acceptor
      .accept(stream)
      .await
      .map_err(|e| Error::tls(format!("TLS handshake failed: {}", e)))?;

    self.handle_tls_stream(&mut tls_stream, &host, port).await
  }

  /// Read one request off the TLS stream, then either serve it from the
  /// intercepted namespace or forward it upstream.
  async fn handle_tls_stream<S>(&self, stream: &mut S, host: &str, port: u16) -> Result<()>
  where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
  {
    let mut buffer = Vec::new();
    let mut tmp = [0u8; 8192];
    let header_end = loop {
      let n = stream.read(&mut tmp).await?;
      if n == 0 {
        // Client closed before sending a request.
        return Ok(());
      }
      buffer.extend_from_slice(&tmp[..n]);
      if let Some(end) = find_header_end(&buffer) {
        break end;
      }
      if buffer.len() > MAX_HEADER_SIZE {
        return Err(Error::invalid_request("Request headers exceed maximum size"));
      }
    };

    let parsed = parse_request_head(&buffer[..header_end])?;

    let content_length = parsed
      .header("content-length")
      .and_then(|v| v.parse::<usize>().ok())
      .unwrap_or(0);
    if content_length > MAX_BODY_SIZE {
      return Err(Error::invalid_request("Request body exceeds maximum size"));
    }
    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
      let n = stream.read(&mut tmp).await?;
      if n == 0 {
        break;
      }
      body.extend_from_slice(&tmp[..n]);
    }
    body.truncate(content_length);

    let response = if let Some(relative) = self.matcher.matches(&parsed.target) {
      self.intercept(&relative).await
    } else {
      let authority = if port == 443 {
        host.to_string()
      } else {
        format!("{host}:{port}")
      };
      let url = format!("https://{}{}", authority, parsed.target);
      self.forward(&parsed, &url, body).await?
    };

    stream.write_all(&response).await?;
    stream.flush().await?;
    Ok(())
  }

  /// Serve an intercepted asset request from the serving root.
  async fn intercept(&self, relative: &str) -> Vec<u8> {
    let resolved = self.resolver.resolve(relative).await;
    match resolved.status {
      AssetStatus::Forbidden => {
        tracing::info!("403  {} (path traversal blocked)", relative);
        simple_response(403, "Forbidden", b"Forbidden")
      }
      AssetStatus::NotFound => {
        tracing::info!("404  {} (not found)", relative);
        simple_response(404, "Not Found", b"Not Found")
      }
      AssetStatus::Ok => {
        let (bytes, injected) = match &self.injector {
          Some(injector) if relative == "bundle.js" => (injector.inject(&resolved.bytes), true),
          _ => (resolved.bytes, false),
        };
        let kb = (bytes.len() as f64 / 1024.0).round() as u64;
        let tag = if injected { " [+HMR]" } else { "" };
        tracing::info!("200  {} ({} KB){}", relative, kb, tag);
        asset_response(&bytes, resolved.content_type)
      }
    }
  }

  /// Forward a request upstream and serialize the response for the client.
  async fn forward(&self, parsed: &ParsedRequest, url: &str, body: Vec<u8>) -> Result<Vec<u8>> {
    let method = http::Method::from_bytes(parsed.method.as_bytes())
      .map_err(|_| Error::invalid_request(format!("Invalid method: {}", parsed.method)))?;

    let mut builder = self.client.request(method, url);
    for (name, value) in &parsed.headers {
      if skip_forward_header(name) {
        continue;
      }
      builder = builder.header(name.as_str(), value.as_str());
    }
    if !body.is_empty() {
      builder = builder.body(body);
    }

    match builder.send().await {
      Ok(response) => {
        let status = response.status();
        let mut headers = response.headers().clone();
        if self.config.hot {
          strip_csp(&mut headers);
        }
        let body = response.bytes().await?;
        Ok(serialize_response(
          status.as_u16(),
          status.canonical_reason().unwrap_or("Unknown"),
          &headers,
          &body,
        ))
      }
      Err(e) => {
        self.log_forward_error(&e);
        Ok(simple_response(502, "Bad Gateway", b""))
      }
    }
  }

  /// Handle a plain (non-CONNECT) proxy request in absolute form.
  async fn handle_plain_http(
    &self,
    method: &str,
    uri: &str,
    mut reader: BufReader<TcpStream>,
  ) -> Result<()> {
    let mut headers = Vec::new();
    let mut drained = 0usize;
    loop {
      let mut line = String::new();
      let n = reader.read_line(&mut line).await?;
      if n == 0 || line == "\r\n" || line == "\n" {
        break;
      }
      drained += n;
      if drained > MAX_HEADER_SIZE {
        return Err(Error::invalid_request("Headers exceed maximum size"));
      }
      if let Some(idx) = line.find(':') {
        let (name, value) = line.split_at(idx);
        headers.push((name.trim().to_string(), value[1..].trim().to_string()));
      }
    }

    let parsed = ParsedRequest {
      method: method.to_string(),
      target: uri.to_string(),
      headers,
    };

    let content_length = parsed
      .header("content-length")
      .and_then(|v| v.parse::<usize>().ok())
      .unwrap_or(0);
    if content_length > MAX_BODY_SIZE {
      return Err(Error::invalid_request("Request body exceeds maximum size"));
    }
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
      reader.read_exact(&mut body).await?;
    }

    let response = self.forward(&parsed, uri, body).await?;
    let mut stream = reader.into_inner();
    stream.write_all(&response).await?;
    stream.flush().await?;
    Ok(())
  }

  fn log_forward_error(&self, e: &reqwest::Error) {
    if !self.forward_error_logged.swap(true, Ordering::Relaxed) {
      tracing::warn!(
        "Failed to forward request upstream: {} (further forwarding errors suppressed)",
        e
      );
    } else {
      tracing::debug!("Failed to forward request upstream: {}", e);
    }
  }

  fn log_handle_error(&self, e: &Error) {
    if !self.handle_error_logged.swap(true, Ordering::Relaxed) {
      tracing::warn!("Failed to handle request: {} (repeats suppressed)", e);
    } else {
      tracing::debug!("Failed to handle request: {}", e);
    }
  }
}

/// A request head parsed off the wire.
#[derive(Debug)]
struct ParsedRequest {
  method: String,
  target: String,
  headers: Vec<(String, String)>,
}

impl ParsedRequest {
  fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Locate the end of the header block (`\r\n\r\n`); returns the offset just
/// past it.
fn find_header_end(buffer: &[u8]) -> Option<usize> {
  buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Parse the request line and headers from the head bytes.
fn parse_request_head(head: &[u8]) -> Result<ParsedRequest> {
  let text = String::from_utf8_lossy(head);
  let mut lines = text.lines();

  let request_line = lines
    .next()
    .ok_or_else(|| Error::invalid_request("Empty request"))?;
  let parts: Vec<&str> = request_line.split_whitespace().collect();
  if parts.len() < 3 {
    return Err(Error::invalid_request("Invalid request line"));
  }

  let mut headers = Vec::new();
  for line in lines {
    if line.is_empty() {
      break;
    }
    if let Some(idx) = line.find(':') {
      let (name, value) = line.split_at(idx);
      headers.push((name.trim().to_string(), value[1..].trim().to_string()));
    }
  }

  Ok(ParsedRequest {
    method: parts[0].to_string(),
    target: parts[1].to_string(),
    headers,
  })
}

/// Parse host and port from a CONNECT authority.
fn parse_host_port(authority: &str) -> Result<(String, u16)> {
  let parts: Vec<&str> = authority.split(':').collect();
  if parts.len() != 2 {
    return Err(Error::invalid_request(format!("Invalid authority: {}", authority)));
  }
  let host = parts[0].to_string();
  let port = parts[1]
    .parse::<u16>()
    .map_err(|_| Error::invalid_request(format!("Invalid port: {}", parts[1])))?;
  Ok((host, port))
}

/// Hop-by-hop and recomputed headers are never forwarded upstream.
fn skip_forward_header(name: &str) -> bool {
  name.eq_ignore_ascii_case("host")
    || name.eq_ignore_ascii_case("content-length")
    || name.eq_ignore_ascii_case("connection")
    || name.eq_ignore_ascii_case("proxy-connection")
    || name.eq_ignore_ascii_case("transfer-encoding")
    || name.eq_ignore_ascii_case("keep-alive")
    || name.eq_ignore_ascii_case("te")
    || name.eq_ignore_ascii_case("upgrade")
}

/// Remove CSP response headers so the injected runtime's WebSocket is not
/// rejected by the host page's policy. Hot mode only.
fn strip_csp(headers: &mut HeaderMap) {
  headers.remove("content-security-policy");
  headers.remove("content-security-policy-report-only");
}

/// Serialize a full HTTP/1.1 response from parts.
fn serialize_response(status: u16, reason: &str, headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
  let mut out = format!("HTTP/1.1 {} {}\r\n", status, reason).into_bytes();
  for (name, value) in headers.iter() {
    if name == http::header::CONTENT_LENGTH
      || name == http::header::TRANSFER_ENCODING
      || name == http::header::CONNECTION
    {
      continue;
    }
    out.extend_from_slice(name.as_str().as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
  }
  out.extend_from_slice(format!("content-length: {}\r\nconnection: close\r\n\r\n", body.len()).as_bytes());
  out.extend_from_slice(body);
  out
}

/// Response for a successfully served asset, with the mandatory no-store
/// and CORS headers.
fn asset_response(body: &[u8], content_type: &str) -> Vec<u8> {
  let mut out = format!(
    "HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\ncache-control: {NO_STORE}\r\naccess-control-allow-origin: *\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
    body.len()
  )
  .into_bytes();
  out.extend_from_slice(body);
  out
}

/// Minimal response with a fixed status and plain-text body.
fn simple_response(status: u16, reason: &str, body: &[u8]) -> Vec<u8> {
  let mut out = format!(
    "HTTP/1.1 {} {}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
    status,
    reason,
    body.len()
  )
  .into_bytes();
  out.extend_from_slice(body);
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_request_head() {
    let head = b"GET /cc_Acme.Widget/bundle.js?v=1 HTTP/1.1\r\nHost: x.dynamics.com\r\nAccept: */*\r\n\r\n";
    let parsed = parse_request_head(head).unwrap();
    assert_eq!(parsed.method, "GET");
    assert_eq!(parsed.target, "/cc_Acme.Widget/bundle.js?v=1");
    assert_eq!(parsed.header("host"), Some("x.dynamics.com"));
    assert_eq!(parsed.header("accept"), Some("*/*"));
  }

  #[test]
  fn rejects_short_request_line() {
    assert!(parse_request_head(b"GET /\r\n\r\n").is_err());
  }

  #[test]
  fn finds_header_end() {
    assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(18));
    assert_eq!(find_header_end(b"GET / HTTP/1.1\r\n"), None);
  }

  #[test]
  fn parses_connect_authority() {
    assert_eq!(
      parse_host_port("x.dynamics.com:443").unwrap(),
      ("x.dynamics.com".to_string(), 443)
    );
    assert!(parse_host_port("no-port").is_err());
    assert!(parse_host_port("host:not-a-port").is_err());
  }

  #[test]
  fn asset_response_carries_no_store_and_cors() {
    let bytes = asset_response(b"var a=1;", "application/javascript");
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("content-type: application/javascript\r\n"));
    assert!(text.contains("cache-control: no-cache, no-store, must-revalidate\r\n"));
    assert!(text.contains("access-control-allow-origin: *\r\n"));
    assert!(text.contains("content-length: 8\r\n"));
    assert!(text.ends_with("\r\n\r\nvar a=1;"));
  }

  #[test]
  fn forbidden_response_body_is_forbidden() {
    let text = String::from_utf8(simple_response(403, "Forbidden", b"Forbidden")).unwrap();
    assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(text.ends_with("Forbidden"));
  }

  #[test]
  fn csp_headers_are_stripped() {
    let mut headers = HeaderMap::new();
    headers.insert("content-security-policy", "default-src 'self'".parse().unwrap());
    headers.insert(
      "content-security-policy-report-only",
      "default-src 'self'".parse().unwrap(),
    );
    headers.insert("content-type", "text/html".parse().unwrap());
    strip_csp(&mut headers);
    assert!(headers.get("content-security-policy").is_none());
    assert!(headers.get("content-security-policy-report-only").is_none());
    assert_eq!(headers.get("content-type").unwrap(), "text/html");
  }

  #[test]
  fn serialized_response_recomputes_framing_headers() {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", "text/html".parse().unwrap());
    headers.insert("transfer-encoding", "chunked".parse().unwrap());
    let out = serialize_response(200, "OK", &headers, b"<html/>");
    let text = String::from_utf8(out).unwrap();
    assert!(!text.contains("transfer-encoding"));
    assert!(text.contains("content-length: 7\r\n"));
    assert!(text.contains("connection: close\r\n"));
    assert!(text.ends_with("<html/>"));
  }

  #[test]
  fn hop_by_hop_headers_are_not_forwarded() {
    assert!(skip_forward_header("Host"));
    assert!(skip_forward_header("connection"));
    assert!(skip_forward_header("Content-Length"));
    assert!(!skip_forward_header("authorization"));
    assert!(!skip_forward_header("cookie"));
  }
}
