//! WS-Discovery probe codec.
//!
//! WS-Discovery (used by ONVIF cameras, printers and Windows network devices)
//! multicasts a SOAP 1.2 `Probe` to `239.255.255.250:3702`.  Each matching
//! target answers with a unicast `ProbeMatches` envelope listing its endpoint
//! reference, the types it implements, its scopes, and the transport addresses
//! (`XAddrs`) where its services can be reached.
//!
//! Every retransmission of the probe triggers a fresh answer, so decoded
//! matches are de-duplicated before reaching the caller.

use std::net::IpAddr;
use std::time::Duration;

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::trace;
use uuid::Uuid;

use super::DiscoveryProtocol;
use crate::request::{
    DiscoveryRequest, DEFAULT_TIMEOUT_SECS, DEFAULT_WS_DISCOVERY_MULTICAST_ADDR,
    DEFAULT_WS_DISCOVERY_PORT,
};
use crate::response::DiscoveryResponse;

/// ONVIF device type, the most common probe filter.
pub const ONVIF_NETWORK_VIDEO_TRANSMITTER: &str = "dn:NetworkVideoTransmitter";

/// Probe answers are SOAP documents and routinely exceed 1 KiB.
pub const WS_DISCOVERY_RESPONSE_SIZE: usize = 4096;

/// A WS-Discovery `Probe` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsProbe {
    /// Qualified type names to match (`dn:` and `tds:` prefixes are declared);
    /// empty matches every target.
    pub types: Vec<String>,
    /// `wsa:MessageID` of the probe.
    pub message_id: Uuid,
    /// Listening window.
    pub timeout: Duration,
}

impl WsProbe {
    /// Creates a probe matching every target type.
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            message_id: Uuid::new_v4(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Creates a probe for ONVIF video devices.
    pub fn onvif() -> Self {
        Self::new().with_types([ONVIF_NETWORK_VIDEO_TRANSMITTER])
    }

    /// Sets the type filter.
    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the listening window.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Renders the SOAP envelope.
    pub fn envelope(&self) -> String {
        let types = if self.types.is_empty() {
            String::new()
        } else {
            format!("<d:Types>{}</d:Types>", self.types.join(" "))
        };
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<e:Envelope xmlns:e=\"http://www.w3.org/2003/05/soap-envelope\" \
xmlns:w=\"http://schemas.xmlsoap.org/ws/2004/08/addressing\" \
xmlns:d=\"http://schemas.xmlsoap.org/ws/2005/04/discovery\" \
xmlns:dn=\"http://www.onvif.org/ver10/network/wsdl\" \
xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\">\
<e:Header>\
<w:MessageID>urn:uuid:{}</w:MessageID>\
<w:To e:mustUnderstand=\"true\">urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To>\
<w:Action e:mustUnderstand=\"true\">http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action>\
</e:Header>\
<e:Body><d:Probe>{}</d:Probe></e:Body>\
</e:Envelope>",
            self.message_id, types
        )
    }
}

impl Default for WsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryProtocol for WsProbe {
    type Item = ProbeMatch;

    fn request(&self) -> DiscoveryRequest {
        DiscoveryRequest::new(self.envelope())
            .with_target(DEFAULT_WS_DISCOVERY_MULTICAST_ADDR, DEFAULT_WS_DISCOVERY_PORT)
            .with_timeout(self.timeout)
            .with_response_size(WS_DISCOVERY_RESPONSE_SIZE)
    }

    fn decode(&self, response: &DiscoveryResponse) -> Option<ProbeMatch> {
        ProbeMatch::parse(&response.text(), response.sender.ip())
    }

    /// A target host may answer for several endpoints in one envelope.
    fn decode_all(&self, response: &DiscoveryResponse) -> Vec<ProbeMatch> {
        ProbeMatch::parse_all(&response.text(), response.sender.ip())
    }

    fn deduplicate(&self) -> bool {
        true
    }
}

/// One target found by a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ProbeMatch {
    /// Endpoint reference address, usually `urn:uuid:...`.
    pub endpoint: Option<String>,
    /// Qualified type names the target implements.
    pub types: Vec<String>,
    /// Scope URIs (ONVIF puts name, location and hardware here).
    pub scopes: Vec<String>,
    /// Service transport addresses.
    pub xaddrs: Vec<String>,
    /// Metadata version, bumped by the target when its metadata changes.
    pub metadata_version: Option<u32>,
    /// Address of the answering host.
    pub from: Option<IpAddr>,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Address,
    Types,
    Scopes,
    XAddrs,
    MetadataVersion,
}

impl ProbeMatch {
    /// Parses the first `ProbeMatch` element of a `ProbeMatches` envelope.
    ///
    /// See [`ProbeMatch::parse_all`] for envelopes listing several targets.
    pub fn parse(xml: &str, from: IpAddr) -> Option<Self> {
        Self::parse_all(xml, from).into_iter().next()
    }

    /// Parses every `ProbeMatch` element of a `ProbeMatches` envelope, in
    /// document order.
    ///
    /// Element names are matched by local name, so any namespace prefix works.
    /// Documents without a `ProbeMatch` (including our own looped-back probe)
    /// yield nothing.  On malformed XML the matches completed before the error
    /// are kept.
    pub fn parse_all(xml: &str, from: IpAddr) -> Vec<Self> {
        let mut reader = Reader::from_str(xml);
        let fresh = || ProbeMatch {
            from: Some(from),
            ..Default::default()
        };
        let mut matches = Vec::new();
        let mut current = fresh();
        let mut in_match = false;
        let mut field: Option<Field> = None;
        let mut text = String::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = e.local_name();
                    match name.as_ref() {
                        b"ProbeMatch" => {
                            in_match = true;
                            current = fresh();
                        }
                        b"Address" if in_match => field = Some(Field::Address),
                        b"Types" if in_match => field = Some(Field::Types),
                        b"Scopes" if in_match => field = Some(Field::Scopes),
                        b"XAddrs" if in_match => field = Some(Field::XAddrs),
                        b"MetadataVersion" if in_match => field = Some(Field::MetadataVersion),
                        _ => {}
                    }
                    text.clear();
                }
                Ok(Event::Text(t)) => {
                    if field.is_some() {
                        match t.decode() {
                            Ok(s) => text.push_str(&s),
                            Err(e) => {
                                trace!("undecodable text in probe match from {from}: {e}");
                                return matches;
                            }
                        }
                    }
                }
                Ok(Event::GeneralRef(r)) => {
                    if field.is_some() {
                        if let Ok(Some(ch)) = r.resolve_char_ref() {
                            text.push(ch);
                        } else if let Some(s) = r
                            .decode()
                            .ok()
                            .and_then(|name| resolve_predefined_entity(&name))
                        {
                            text.push_str(s);
                        }
                    }
                }
                Ok(Event::End(e)) => {
                    if let Some(f) = field.take() {
                        current.assign(f, text.trim());
                        text.clear();
                    }
                    if in_match && e.local_name().as_ref() == b"ProbeMatch" {
                        in_match = false;
                        matches.push(std::mem::replace(&mut current, fresh()));
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    trace!("malformed probe match XML from {from}: {e}");
                    return matches;
                }
                _ => {}
            }
        }

        if matches.is_empty() {
            trace!("no ProbeMatch element in datagram from {from}");
        }
        matches
    }

    fn assign(&mut self, field: Field, value: &str) {
        let list = || -> Vec<String> { value.split_whitespace().map(str::to_string).collect() };
        match field {
            Field::Address => self.endpoint = Some(value.to_string()),
            Field::Types => self.types = list(),
            Field::Scopes => self.scopes = list(),
            Field::XAddrs => self.xaddrs = list(),
            Field::MetadataVersion => self.metadata_version = value.parse().ok(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE_MATCHES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope"
    xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing"
    xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery"
    xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
  <SOAP-ENV:Header>
    <wsa:MessageID>urn:uuid:11111111-2222-3333-4444-555555555555</wsa:MessageID>
    <wsa:Action>http://schemas.xmlsoap.org/ws/2005/04/discovery/ProbeMatches</wsa:Action>
  </SOAP-ENV:Header>
  <SOAP-ENV:Body>
    <d:ProbeMatches>
      <d:ProbeMatch>
        <wsa:EndpointReference>
          <wsa:Address>urn:uuid:cafe0000-0000-0000-0000-00000000beef</wsa:Address>
        </wsa:EndpointReference>
        <d:Types>dn:NetworkVideoTransmitter tds:Device</d:Types>
        <d:Scopes>onvif://www.onvif.org/name/Cam onvif://www.onvif.org/location/Hall</d:Scopes>
        <d:XAddrs>http://192.168.1.64/onvif/device_service?a=1&amp;b=2</d:XAddrs>
        <d:MetadataVersion>7</d:MetadataVersion>
      </d:ProbeMatch>
    </d:ProbeMatches>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;

    fn from() -> IpAddr {
        "192.168.1.64".parse().unwrap()
    }

    #[test]
    fn test_envelope_carries_message_id_and_types() {
        // Arrange
        let probe = WsProbe::onvif();

        // Act
        let xml = probe.envelope();

        // Assert
        assert!(xml.contains(&format!("urn:uuid:{}", probe.message_id)));
        assert!(xml.contains("<d:Types>dn:NetworkVideoTransmitter</d:Types>"));
        assert!(xml.contains("discovery/Probe</w:Action>"));
    }

    #[test]
    fn test_envelope_without_types_omits_types_element() {
        let xml = WsProbe::new().envelope();
        assert!(!xml.contains("Types"));
        assert!(xml.contains("<d:Probe></d:Probe>"));
    }

    #[test]
    fn test_each_probe_gets_a_fresh_message_id() {
        assert_ne!(WsProbe::new().message_id, WsProbe::new().message_id);
    }

    #[test]
    fn test_request_targets_ws_discovery_port() {
        // Arrange
        let probe = WsProbe::new().with_timeout(Duration::from_secs(2));

        // Act
        let req = probe.request();

        // Assert
        assert_eq!(req.validate().unwrap(), "239.255.255.250:3702".parse().unwrap());
        assert_eq!(req.max_response_size, 4096);
        assert_eq!(req.timeout, Duration::from_secs(2));
        assert!(probe.deduplicate());
    }

    #[test]
    fn test_parse_probe_match_extracts_fields() {
        // Act
        let m = ProbeMatch::parse(PROBE_MATCHES, from()).expect("probe match");

        // Assert
        assert_eq!(
            m.endpoint.as_deref(),
            Some("urn:uuid:cafe0000-0000-0000-0000-00000000beef")
        );
        assert_eq!(m.types, vec!["dn:NetworkVideoTransmitter", "tds:Device"]);
        assert_eq!(m.scopes.len(), 2);
        assert_eq!(
            m.xaddrs,
            vec!["http://192.168.1.64/onvif/device_service?a=1&b=2"]
        );
        assert_eq!(m.metadata_version, Some(7));
        assert_eq!(m.from, Some(from()));
    }

    #[test]
    fn test_parse_all_returns_every_match_in_order() {
        // Arrange: the same envelope with a second target appended.
        let second = r#"<d:ProbeMatch>
        <wsa:EndpointReference><wsa:Address>urn:uuid:second</wsa:Address></wsa:EndpointReference>
        <d:XAddrs>http://192.168.1.64:8080/onvif/device_service</d:XAddrs>
      </d:ProbeMatch>
    </d:ProbeMatches>"#;
        let xml = PROBE_MATCHES.replacen("</d:ProbeMatches>", second, 1);

        // Act
        let matches = ProbeMatch::parse_all(&xml, from());

        // Assert
        assert_eq!(matches.len(), 2);
        assert_eq!(
            matches[0].endpoint.as_deref(),
            Some("urn:uuid:cafe0000-0000-0000-0000-00000000beef")
        );
        assert_eq!(matches[1].endpoint.as_deref(), Some("urn:uuid:second"));
        assert!(matches[1].types.is_empty(), "fields must not leak between matches");
        assert_eq!(matches[1].metadata_version, None);
    }

    #[test]
    fn test_decode_all_yields_every_match_of_one_datagram() {
        // Arrange
        let second = "<d:ProbeMatch><wsa:EndpointReference><wsa:Address>urn:uuid:second\
</wsa:Address></wsa:EndpointReference></d:ProbeMatch></d:ProbeMatches>";
        let xml = PROBE_MATCHES.replacen("</d:ProbeMatches>", second, 1);
        let raw = DiscoveryResponse::new(xml, "192.168.1.64:3702".parse().unwrap());

        // Act
        let all = WsProbe::new().decode_all(&raw);

        // Assert
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].endpoint.as_deref(), Some("urn:uuid:second"));
    }

    #[test]
    fn test_parse_own_probe_returns_none() {
        let xml = WsProbe::onvif().envelope();
        assert!(ProbeMatch::parse(&xml, from()).is_none());
    }

    #[test]
    fn test_parse_garbage_returns_none() {
        assert!(ProbeMatch::parse("PONG", from()).is_none());
        assert!(ProbeMatch::parse("<a><b></a>", from()).is_none());
    }

    #[test]
    fn test_identical_answers_decode_to_equal_matches() {
        // Arrange
        let probe = WsProbe::new();
        let raw = DiscoveryResponse::new(
            PROBE_MATCHES.as_bytes().to_vec(),
            "192.168.1.64:3702".parse().unwrap(),
        );

        // Act
        let a = probe.decode(&raw);
        let b = probe.decode(&raw);

        // Assert
        assert!(a.is_some());
        assert_eq!(a, b);
    }
}
