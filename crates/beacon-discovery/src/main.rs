//! `beacon` command-line entry point.
//!
//! Loads the configuration, initialises logging, runs one discovery and prints
//! every result as it arrives.  Ctrl-C cancels the run; the sockets are closed
//! before the process exits.
//!
//! ```text
//! beacon ssdp [SEARCH_TARGET]          UPnP M-SEARCH (default: ssdp:all)
//! beacon wsd [TYPE ...]                WS-Discovery probe (default: every type)
//! beacon raw GROUP PORT PAYLOAD        send PAYLOAD, print raw answers
//! beacon init-config                   write the default config file
//! ```

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use beacon_core::protocol::{ProbeMatch, SsdpResponse, SsdpSearch, WsProbe};
use beacon_core::{DiscoveryError, DiscoveryProtocol, DiscoveryRequest};
use beacon_discovery::application::search::search_with;
use beacon_discovery::infrastructure::storage::config::{self, AppConfig};
use beacon_discovery::DiscoverySession;

const USAGE: &str = "usage: beacon <ssdp [ST] | wsd [TYPE ...] | raw GROUP PORT PAYLOAD | init-config>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (cfg, cfg_error) = match config::load_config() {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.general.log_level)),
        )
        .init();

    if let Some(e) = cfg_error {
        warn!("using default configuration: {e}");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    match command.as_str() {
        "ssdp" => {
            let target = args
                .get(1)
                .cloned()
                .unwrap_or_else(|| cfg.ssdp.search_target.clone());
            let mx = u32::try_from(cfg.discovery.timeout_secs).unwrap_or(u32::MAX);
            let protocol = SsdpSearch::new(target).with_mx(mx);
            run_search(protocol, &cfg, render_ssdp).await
        }
        "wsd" => {
            let types = if args.len() > 1 {
                args[1..].to_vec()
            } else {
                cfg.ws_discovery.types.clone()
            };
            let protocol = WsProbe::new()
                .with_types(types)
                .with_timeout(cfg.discovery.timeout());
            run_search(protocol, &cfg, render_probe_match).await
        }
        "raw" => {
            let [group, port, payload] = &args[1..] else {
                bail!(USAGE);
            };
            let port: u16 = port.parse().with_context(|| format!("invalid port {port:?}"))?;
            let request = DiscoveryRequest::new(payload.as_bytes())
                .with_target(group.as_str(), port)
                .with_timeout(cfg.discovery.timeout())
                .with_response_size(cfg.discovery.response_size);
            run_raw(request, &cfg).await
        }
        "init-config" => {
            let path = config::config_file_path()?;
            config::save_config(&cfg)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        other => bail!("unknown command {other:?}\n{USAGE}"),
    }
}

/// Runs `protocol` and prints each decoded result until the run ends.
async fn run_search<P, F>(protocol: P, cfg: &AppConfig, render: F) -> anyhow::Result<()>
where
    P: DiscoveryProtocol,
    P::Item: Clone + Eq + std::hash::Hash,
    F: Fn(&P::Item) -> String,
{
    let mut stream = search_with(
        protocol,
        cfg.discovery.interface_source(),
        cfg.discovery.session_options(),
    )
    .await?;

    let mut found = 0usize;
    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; cancelling discovery");
                stream.cancel();
                stream.closed().await;
                break;
            }
        };
        match next {
            Some(Ok(item)) => {
                found += 1;
                println!("{}", render(&item));
            }
            Some(Err(e)) => return Err(fatal(e)),
            None => break,
        }
    }

    info!(
        "{found} result(s), {} unrecognised response(s)",
        stream.discarded()
    );
    Ok(())
}

/// Runs a raw request and prints each answer as text.
async fn run_raw(request: DiscoveryRequest, cfg: &AppConfig) -> anyhow::Result<()> {
    let mut stream = DiscoverySession::with_interfaces(request, cfg.discovery.interface_source())
        .with_options(cfg.discovery.session_options())
        .start()
        .await?;

    loop {
        let next = tokio::select! {
            next = stream.recv() => next,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; cancelling discovery");
                stream.cancel();
                stream.closed().await;
                break;
            }
        };
        match next {
            Some(Ok(response)) => {
                println!("── {} ({} bytes)", response.sender, response.data.len());
                println!("{}", response.text());
            }
            Some(Err(e)) => return Err(fatal(e)),
            None => break,
        }
    }
    Ok(())
}

/// One line per SSDP answer: sender, search target, location and USN.
fn render_ssdp(r: &SsdpResponse) -> String {
    format!("{}  {}  {}  ({})", r.from, r.st, r.location, r.usn)
}

/// One line per WS-Discovery match; `-` stands for a missing endpoint.
fn render_probe_match(m: &ProbeMatch) -> String {
    format!(
        "{}  {}  [{}]",
        m.endpoint.as_deref().unwrap_or("-"),
        m.xaddrs.join(" "),
        m.types.join(" ")
    )
}

fn fatal(e: DiscoveryError) -> anyhow::Error {
    anyhow::Error::new(e).context("discovery aborted")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_render_probe_match_lists_endpoint_addresses_and_types() {
        // Arrange
        let m = ProbeMatch {
            endpoint: Some("urn:uuid:cam-1".to_string()),
            types: vec!["dn:NetworkVideoTransmitter".to_string()],
            xaddrs: vec![
                "http://192.168.1.30/onvif/device_service".to_string(),
                "http://[fe80::1]/onvif/device_service".to_string(),
            ],
            from: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 30))),
            ..Default::default()
        };

        // Act
        let line = render_probe_match(&m);

        // Assert
        assert_eq!(
            line,
            "urn:uuid:cam-1  http://192.168.1.30/onvif/device_service \
             http://[fe80::1]/onvif/device_service  [dn:NetworkVideoTransmitter]"
        );
    }

    #[test]
    fn test_render_ssdp_shows_sender_target_location_and_usn() {
        // Arrange
        let r = SsdpResponse {
            location: "http://192.168.1.20:49152/description.xml".to_string(),
            st: "upnp:rootdevice".to_string(),
            usn: "uuid:abc::upnp:rootdevice".to_string(),
            server: None,
            max_age: None,
            headers: Default::default(),
            from: "192.168.1.20:1900".parse().unwrap(),
        };

        // Act
        let line = render_ssdp(&r);

        // Assert
        assert_eq!(
            line,
            "192.168.1.20:1900  upnp:rootdevice  \
             http://192.168.1.20:49152/description.xml  (uuid:abc::upnp:rootdevice)"
        );
    }

    #[test]
    fn test_render_probe_match_without_endpoint_uses_placeholder() {
        let line = render_probe_match(&ProbeMatch::default());
        assert_eq!(line, "-    []");
    }
}
