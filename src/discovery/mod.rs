//! Discovery engine
//!
//! ## Responsibilities
//!
//! - Sweep the host's /24 with unicast WS-Discovery probes
//! - Gate each host behind a short TCP connect so dead addresses cost
//!   500 ms, not an HTTP timeout
//! - Bound the sweep: 32 probes in flight, 3 minutes total, cancellable
//!
//! An empty result is a successful scan, not an error.

use crate::error::{Error, Result};
use crate::onvif::xml;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

const CONCURRENCY_LIMIT: usize = 32;
const TCP_PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const PROBE_HTTP_TIMEOUT: Duration = Duration::from_secs(4);
const SCAN_BUDGET: Duration = Duration::from_secs(180);

/// A camera that answered the WS-Discovery probe
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    pub address: String,
    pub port: i64,
    pub hostname: String,
    pub name: String,
    pub manufacturer: String,
    pub xaddr: Option<String>,
}

pub struct DiscoveryEngine {
    client: reqwest::Client,
    /// Cancel handle of the sweep in flight, if any
    active: Mutex<Option<watch::Sender<bool>>>,
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryEngine {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_HTTP_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            active: Mutex::new(None),
        }
    }

    /// Sweep the local /24. Returns the devices found before completion,
    /// timeout, or cancellation, deduplicated by address.
    pub async fn scan(&self) -> Result<Vec<DiscoveredDevice>> {
        let local_ip = local_ip_address::local_ip()
            .map_err(|e| Error::Unreachable(format!("No local IPv4 interface: {e}")))?;
        let ipv4 = match local_ip {
            IpAddr::V4(ip) => ip,
            _ => {
                return Err(Error::InvalidInput(
                    "Discovery requires an IPv4 interface".into(),
                ))
            }
        };

        let octets = ipv4.octets();
        let subnet = format!("{}.{}.{}", octets[0], octets[1], octets[2]);
        tracing::info!(subnet = %subnet, "Scanning subnet .1-254");

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        {
            let mut active = self.active.lock().await;
            *active = Some(cancel_tx);
        }

        let tasks = (1..=254u16).map(|i| {
            let host = format!("{subnet}.{i}");
            let client = self.client.clone();
            async move { probe_host(&client, &host).await }
        });

        let mut probes = stream::iter(tasks).buffer_unordered(CONCURRENCY_LIMIT);
        let deadline = tokio::time::sleep(SCAN_BUDGET);
        tokio::pin!(deadline);

        let mut devices: Vec<DiscoveredDevice> = Vec::new();
        loop {
            tokio::select! {
                next = probes.next() => match next {
                    Some(Some(device)) => {
                        if !devices.iter().any(|d| d.address == device.address) {
                            devices.push(device);
                        }
                    }
                    Some(None) => {}
                    None => break,
                },
                _ = &mut deadline => {
                    tracing::warn!(found = devices.len(), "Discovery sweep hit the time budget");
                    break;
                }
                changed = cancel_rx.changed() => {
                    // A closed sender means this sweep was superseded
                    if changed.is_err() || *cancel_rx.borrow() {
                        tracing::info!(found = devices.len(), "Discovery sweep cancelled");
                        break;
                    }
                }
            }
        }

        {
            let mut active = self.active.lock().await;
            *active = None;
        }

        tracing::info!(found = devices.len(), "Discovery sweep finished");
        Ok(devices)
    }

    /// Interrupt the sweep in flight, if any.
    pub async fn cancel(&self) {
        let active = self.active.lock().await;
        if let Some(tx) = active.as_ref() {
            let _ = tx.send(true);
        }
    }
}

/// Probe one host: TCP gate on :80, then an HTTP WS-Discovery Probe.
async fn probe_host(client: &reqwest::Client, host: &str) -> Option<DiscoveredDevice> {
    let connect = TcpStream::connect((host, 80u16));
    match tokio::time::timeout(TCP_PROBE_TIMEOUT, connect).await {
        Ok(Ok(_)) => {}
        _ => return None,
    }

    let url = format!("http://{host}/onvif/device_service");
    let response = client
        .post(&url)
        .header("Content-Type", "application/soap+xml; charset=utf-8")
        .body(probe_envelope())
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        return None;
    }

    let body = response.text().await.ok()?;
    parse_probe_match(&body, host)
}

/// WS-Discovery Probe envelope with a fresh MessageID
fn probe_envelope() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope xmlns="http://www.w3.org/2003/05/soap-envelope" xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
    <Header>
        <wsa:MessageID xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing">urn:uuid:{}</wsa:MessageID>
        <wsa:To xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing">urn:schemas-xmlsoap-org:ws:2005:04:discovery</wsa:To>
        <wsa:Action xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing">http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</wsa:Action>
    </Header>
    <Body>
        <Probe xmlns="http://schemas.xmlsoap.org/ws/2005/04/discovery">
            <Types>dn:NetworkVideoTransmitter</Types>
            <Scopes />
        </Probe>
    </Body>
</Envelope>"#,
        Uuid::new_v4()
    )
}

/// Extract device identity from a ProbeMatch reply.
fn parse_probe_match(body: &str, host: &str) -> Option<DiscoveredDevice> {
    if !body.contains("ProbeMatch") {
        return None;
    }

    let xaddrs = xml::extract_value(body, "XAddrs")?;
    let xaddr = xaddrs.split_whitespace().next().map(str::to_string);

    let scopes = xml::extract_value(body, "Scopes").unwrap_or_default();
    let mut name = "Unknown Camera".to_string();
    let mut hardware = String::new();

    for scope in scopes.split_whitespace() {
        let decoded = urlencoding::decode(scope).unwrap_or(std::borrow::Cow::Borrowed(scope));
        let scope_str = decoded.as_ref();

        if let Some(value) = scope_str.split("/name/").nth(1) {
            name = value.to_string();
        } else if let Some(value) = scope_str.split("/hardware/").nth(1) {
            hardware = value.to_string();
        }
    }

    let manufacturer = if hardware.is_empty() {
        "Unknown".to_string()
    } else {
        hardware
    };

    let mut port = 80;
    if let Some(ref addr) = xaddr {
        if let Ok(parsed) = url::Url::parse(addr) {
            if let Some(p) = parsed.port() {
                port = p as i64;
            }
        }
    }

    Some(DiscoveredDevice {
        address: host.to_string(),
        port,
        hostname: String::new(),
        name,
        manufacturer,
        xaddr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_MATCH: &str = r#"<SOAP-ENV:Envelope>
  <SOAP-ENV:Body>
    <d:ProbeMatches>
      <d:ProbeMatch>
        <d:Scopes>onvif://www.onvif.org/name/FrontGate%20Cam onvif://www.onvif.org/hardware/IPC-1234 onvif://www.onvif.org/location/</d:Scopes>
        <d:XAddrs>http://192.0.2.10:8899/onvif/device_service http://[fe80::1]/onvif/device_service</d:XAddrs>
      </d:ProbeMatch>
    </d:ProbeMatches>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

    #[test]
    fn probe_match_parses_identity() {
        let device = parse_probe_match(PROBE_MATCH, "192.0.2.10").unwrap();
        assert_eq!(device.address, "192.0.2.10");
        assert_eq!(device.name, "FrontGate Cam");
        assert_eq!(device.manufacturer, "IPC-1234");
        assert_eq!(device.port, 8899);
        assert_eq!(
            device.xaddr.as_deref(),
            Some("http://192.0.2.10:8899/onvif/device_service")
        );
    }

    #[test]
    fn non_probe_match_body_is_ignored() {
        assert!(parse_probe_match("<html>not soap</html>", "192.0.2.10").is_none());
    }

    #[test]
    fn default_port_when_xaddr_has_none() {
        let body = r#"<ProbeMatches><ProbeMatch>
            <Scopes>onvif://www.onvif.org/name/Cam</Scopes>
            <XAddrs>http://192.0.2.11/onvif/device_service</XAddrs>
        </ProbeMatch></ProbeMatches>"#;
        let device = parse_probe_match(body, "192.0.2.11").unwrap();
        assert_eq!(device.port, 80);
    }

    #[test]
    fn probe_envelope_is_unique_per_call() {
        let a = probe_envelope();
        let b = probe_envelope();
        assert!(a.contains("urn:uuid:"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn cancel_without_active_sweep_is_a_no_op() {
        let engine = DiscoveryEngine::new();
        engine.cancel().await;
    }
}
