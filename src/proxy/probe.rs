//! Layered connectivity probe for a single proxy
//!
//! A probe runs up to three stages against one record: a raw TCP connect,
//! an HTTP request routed through the proxy, and an optional HTTPS request.
//! The network capabilities are abstracted behind [`ProbeTransport`] so the
//! probe and the engine can be tested without live endpoints.

use crate::proxy::models::{ProxyRecord, ProxyType};
use crate::Result;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Local;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::debug;

/// Options for one probe invocation
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Timeout applied to each stage
    pub timeout: Duration,
    /// URL requested through the proxy in the HTTP stage
    pub test_url: String,
    /// URL requested through the proxy in the HTTPS stage
    pub https_test_url: String,
    /// Whether the HTTPS stage runs at all
    pub test_https: bool,
}

/// Network capabilities the probe depends on.
///
/// Implementations must be safe to share across concurrently running
/// probes; the only mutable state of a probe is the record it was given.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Raw TCP connect to the proxy endpoint itself.
    async fn tcp_connect(&self, host: &str, port: u16, timeout: Duration) -> Result<()>;

    /// One GET for `url`, routed through the proxy, with connect and
    /// response both bounded by `timeout`. A non-2xx response is an error.
    async fn http_get(&self, proxy: &ProxyRecord, url: &str, timeout: Duration) -> Result<()>;
}

/// Probe one record through the three stages, mutating it in place.
///
/// Stage order is fixed: connect, then HTTP, then (for valid non-SOCKS4
/// records, when enabled) HTTPS. An HTTPS failure never invalidates a
/// proxy that passed the HTTP stage. The record always ends up with its
/// latency and check timestamp set, whatever the outcome.
pub async fn run(record: &mut ProxyRecord, options: &ProbeOptions, transport: &dyn ProbeTransport) {
    let start = Instant::now();
    record.valid = false;
    record.anonymous = false;
    record.error_message = None;

    match transport
        .tcp_connect(&record.host, record.port, options.timeout)
        .await
    {
        Ok(()) => {
            match transport
                .http_get(record, &options.test_url, options.timeout)
                .await
            {
                Ok(()) => {
                    record.valid = true;
                    if options.test_https && record.kind != ProxyType::Socks4 {
                        match transport
                            .http_get(record, &options.https_test_url, options.timeout)
                            .await
                        {
                            Ok(()) => record.anonymous = true,
                            Err(err) => {
                                debug!("HTTPS test failed for {}: {}", record.address(), err)
                            }
                        }
                    }
                }
                Err(err) => record.error_message = Some(format!("HTTP test failed: {}", err)),
            }
        }
        Err(err) => record.error_message = Some(format!("Connection failed: {}", err)),
    }

    record.latency_ms = start.elapsed().as_millis() as i64;
    record.last_checked = Some(Local::now());
}

/// Default transport backed by tokio sockets and reqwest
pub struct NetTransport;

#[async_trait]
impl ProbeTransport for NetTransport {
    async fn tcp_connect(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| anyhow!("connect timed out after {}ms", timeout.as_millis()))??;
        Ok(())
    }

    async fn http_get(&self, proxy: &ProxyRecord, url: &str, timeout: Duration) -> Result<()> {
        let client = build_client(proxy, timeout)?;
        let response = tokio::time::timeout(timeout, client.get(url).send())
            .await
            .map_err(|_| anyhow!("request timed out after {}ms", timeout.as_millis()))??;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(anyhow!("HTTP status: {}", response.status()))
        }
    }
}

/// Create a reqwest client routing through the proxy
fn build_client(proxy: &ProxyRecord, timeout: Duration) -> Result<Client> {
    let proxy_url = proxy.full_address();

    let reqwest_proxy = match proxy.kind {
        ProxyType::Http | ProxyType::Https => ReqwestProxy::http(&proxy_url)?,
        ProxyType::Socks4 | ProxyType::Socks5 => ReqwestProxy::all(&proxy_url)?,
    };

    let client = Client::builder()
        .proxy(reqwest_proxy)
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()?;

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedTransport {
        connect_ok: bool,
        http_ok: bool,
        https_ok: bool,
        http_calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(connect_ok: bool, http_ok: bool, https_ok: bool) -> Self {
            Self {
                connect_ok,
                http_ok,
                https_ok,
                http_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProbeTransport for ScriptedTransport {
        async fn tcp_connect(&self, _host: &str, _port: u16, _timeout: Duration) -> Result<()> {
            if self.connect_ok {
                Ok(())
            } else {
                Err(anyhow!("connection refused"))
            }
        }

        async fn http_get(
            &self,
            _proxy: &ProxyRecord,
            url: &str,
            _timeout: Duration,
        ) -> Result<()> {
            self.http_calls.fetch_add(1, Ordering::SeqCst);
            let ok = if url.starts_with("https") {
                self.https_ok
            } else {
                self.http_ok
            };
            if ok {
                Ok(())
            } else {
                Err(anyhow!("no route through proxy"))
            }
        }
    }

    fn options() -> ProbeOptions {
        ProbeOptions {
            timeout: Duration::from_secs(1),
            test_url: "http://test.invalid/ip".to_string(),
            https_test_url: "https://test.invalid/ip".to_string(),
            test_https: true,
        }
    }

    fn record(kind: ProxyType) -> ProxyRecord {
        ProxyRecord::new("10.0.0.1".to_string(), 8080, kind)
    }

    #[tokio::test]
    async fn test_connect_failure_marks_invalid() {
        let transport = ScriptedTransport::new(false, true, true);
        let mut rec = record(ProxyType::Http);
        run(&mut rec, &options(), &transport).await;

        assert!(!rec.valid);
        assert!(!rec.anonymous);
        assert!(rec.error_message.as_deref().unwrap().starts_with("Connection failed"));
        assert!(rec.latency_ms >= 0);
        assert!(rec.last_checked.is_some());
        // No HTTP request goes out when the connect stage fails.
        assert_eq!(transport.http_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_http_failure_marks_invalid() {
        let transport = ScriptedTransport::new(true, false, true);
        let mut rec = record(ProxyType::Http);
        run(&mut rec, &options(), &transport).await;

        assert!(!rec.valid);
        assert!(rec.error_message.as_deref().unwrap().starts_with("HTTP test failed"));
        assert_eq!(transport.http_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_full_success_marks_valid_and_anonymous() {
        let transport = ScriptedTransport::new(true, true, true);
        let mut rec = record(ProxyType::Http);
        run(&mut rec, &options(), &transport).await;

        assert!(rec.valid);
        assert!(rec.anonymous);
        assert!(rec.error_message.is_none());
        assert!(rec.latency_ms >= 0);
        assert!(rec.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_https_failure_keeps_proxy_valid() {
        let transport = ScriptedTransport::new(true, true, false);
        let mut rec = record(ProxyType::Http);
        run(&mut rec, &options(), &transport).await;

        assert!(rec.valid);
        assert!(!rec.anonymous);
        assert!(rec.error_message.is_none());
    }

    #[tokio::test]
    async fn test_socks4_skips_https_stage() {
        let transport = ScriptedTransport::new(true, true, true);
        let mut rec = record(ProxyType::Socks4);
        run(&mut rec, &options(), &transport).await;

        assert!(rec.valid);
        assert!(!rec.anonymous);
        assert_eq!(transport.http_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_https_stage_disabled() {
        let transport = ScriptedTransport::new(true, true, true);
        let mut opts = options();
        opts.test_https = false;
        let mut rec = record(ProxyType::Http);
        run(&mut rec, &opts, &transport).await;

        assert!(rec.valid);
        assert!(!rec.anonymous);
        assert_eq!(transport.http_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reprobe_clears_stale_outcome() {
        let transport = ScriptedTransport::new(true, true, true);
        let mut rec = record(ProxyType::Http);
        rec.error_message = Some("old failure".to_string());
        run(&mut rec, &options(), &transport).await;

        assert!(rec.valid);
        assert!(rec.error_message.is_none());
    }
}
