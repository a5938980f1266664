//! ONVIF SOAP and WS-Discovery XML templates
//!
//! Every response body is rendered here; callers pass plain values and get
//! complete XML documents back.

use chrono::{DateTime, Datelike, Timelike, Utc};
use quick_xml::escape::escape;

const DEVICE_NAMESPACE: &str = "http://www.onvif.org/ver10/device/wsdl";
const MEDIA_NAMESPACE: &str = "http://www.onvif.org/ver10/media/wsdl";

pub const MANUFACTURER: &str = "Virtual ONVIF";
pub const MODEL: &str = "Virtual ONVIF Relay";
pub const FIRMWARE_VERSION: &str = "1.0.0";

/// Escape a string for safe inclusion in XML content/attributes.
fn xml_escape(s: &str) -> String {
    escape(s).to_string()
}

/// Wrap body content in the fixed SOAP envelope shared by all responses
pub fn envelope(content: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:tds="http://www.onvif.org/ver10/device/wsdl" xmlns:trt="http://www.onvif.org/ver10/media/wsdl" xmlns:tt="http://www.onvif.org/ver10/schema">
  <s:Body>{content}</s:Body>
</s:Envelope>"#
    )
}

pub fn get_system_date_and_time(now: DateTime<Utc>) -> String {
    envelope(&format!(
        r#"
    <tds:GetSystemDateAndTimeResponse>
      <tds:SystemDateAndTime>
        <tt:DateTimeType>NTP</tt:DateTimeType>
        <tt:DaylightSavings>false</tt:DaylightSavings>
        <tt:TimeZone><tt:TZ>UTC+00:00</tt:TZ></tt:TimeZone>
        <tt:UTCDateTime>
          <tt:Time><tt:Hour>{}</tt:Hour><tt:Minute>{}</tt:Minute><tt:Second>{}</tt:Second></tt:Time>
          <tt:Date><tt:Year>{}</tt:Year><tt:Month>{}</tt:Month><tt:Day>{}</tt:Day></tt:Date>
        </tt:UTCDateTime>
      </tds:SystemDateAndTime>
    </tds:GetSystemDateAndTimeResponse>
  "#,
        now.hour(),
        now.minute(),
        now.second(),
        now.year(),
        now.month(),
        now.day()
    ))
}

pub fn get_capabilities(device_xaddr: &str, media_xaddr: &str) -> String {
    envelope(&format!(
        r#"
    <tds:GetCapabilitiesResponse>
      <tds:Capabilities>
        <tt:Device>
          <tt:XAddr>{}</tt:XAddr>
          <tt:Network><tt:IPFilter>false</tt:IPFilter><tt:ZeroConfiguration>false</tt:ZeroConfiguration><tt:IPVersion6>false</tt:IPVersion6><tt:DynDNS>false</tt:DynDNS></tt:Network>
          <tt:System><tt:DiscoveryResolve>false</tt:DiscoveryResolve><tt:DiscoveryBye>false</tt:DiscoveryBye><tt:RemoteDiscovery>false</tt:RemoteDiscovery><tt:SupportedVersions><tt:Major>2</tt:Major><tt:Minor>5</tt:Minor></tt:SupportedVersions></tt:System>
        </tt:Device>
        <tt:Media>
          <tt:XAddr>{}</tt:XAddr>
          <tt:StreamingCapabilities><tt:RTPMulticast>false</tt:RTPMulticast><tt:RTP_TCP>true</tt:RTP_TCP><tt:RTP_RTSP_TCP>true</tt:RTP_RTSP_TCP></tt:StreamingCapabilities>
        </tt:Media>
      </tds:Capabilities>
    </tds:GetCapabilitiesResponse>
  "#,
        xml_escape(device_xaddr),
        xml_escape(media_xaddr)
    ))
}

fn service_entry(namespace: &str, xaddr: &str) -> String {
    format!(
        r#"
      <tds:Service>
        <tds:Namespace>{}</tds:Namespace>
        <tds:XAddr>{}</tds:XAddr>
        <tds:Version><tt:Major>2</tt:Major><tt:Minor>5</tt:Minor></tds:Version>
      </tds:Service>"#,
        namespace,
        xml_escape(xaddr)
    )
}

pub fn get_services(device_xaddr: &str, media_xaddr: &str) -> String {
    envelope(&format!(
        "\n    <tds:GetServicesResponse>{}{}\n    </tds:GetServicesResponse>\n  ",
        service_entry(DEVICE_NAMESPACE, device_xaddr),
        service_entry(MEDIA_NAMESPACE, media_xaddr)
    ))
}

pub fn get_device_information(serial_number: &str, hardware_id: &str) -> String {
    envelope(&format!(
        r#"
    <tds:GetDeviceInformationResponse>
      <tds:Manufacturer>{MANUFACTURER}</tds:Manufacturer>
      <tds:Model>{MODEL}</tds:Model>
      <tds:FirmwareVersion>{FIRMWARE_VERSION}</tds:FirmwareVersion>
      <tds:SerialNumber>{}</tds:SerialNumber>
      <tds:HardwareId>{}</tds:HardwareId>
    </tds:GetDeviceInformationResponse>
  "#,
        xml_escape(serial_number),
        xml_escape(hardware_id)
    ))
}

/// Values rendered into one `trt:Profiles` element
pub struct ProfileView<'a> {
    pub token: &'a str,
    pub name: &'a str,
    pub encoder_token: &'a str,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate: u32,
}

fn profile_entry(profile: &ProfileView<'_>) -> String {
    format!(
        r#"
      <trt:Profiles token="{token}" fixed="true">
        <tt:Name>{name}</tt:Name>
        <tt:VideoSourceConfiguration token="video_src_config_token">
          <tt:Name>VideoSource</tt:Name>
          <tt:UseCount>2</tt:UseCount>
          <tt:SourceToken>video_src_token</tt:SourceToken>
          <tt:Bounds x="0" y="0" width="{width}" height="{height}"/>
        </tt:VideoSourceConfiguration>
        <tt:VideoEncoderConfiguration token="{encoder_token}">
          <tt:Name>{encoder_token}</tt:Name>
          <tt:UseCount>1</tt:UseCount>
          <tt:Encoding>H264</tt:Encoding>
          <tt:Resolution><tt:Width>{width}</tt:Width><tt:Height>{height}</tt:Height></tt:Resolution>
          <tt:RateControl><tt:FrameRateLimit>{framerate}</tt:FrameRateLimit><tt:EncodingInterval>1</tt:EncodingInterval><tt:BitrateLimit>{bitrate}</tt:BitrateLimit></tt:RateControl>
        </tt:VideoEncoderConfiguration>
      </trt:Profiles>"#,
        token = xml_escape(profile.token),
        name = xml_escape(profile.name),
        encoder_token = xml_escape(profile.encoder_token),
        width = profile.width,
        height = profile.height,
        framerate = profile.framerate,
        bitrate = profile.bitrate,
    )
}

pub fn get_profiles(profiles: &[ProfileView<'_>]) -> String {
    let entries: String = profiles.iter().map(profile_entry).collect();
    envelope(&format!(
        "\n    <trt:GetProfilesResponse>{entries}\n    </trt:GetProfilesResponse>\n  "
    ))
}

pub fn get_video_sources(framerate: u32, width: u32, height: u32) -> String {
    envelope(&format!(
        r#"
    <trt:GetVideoSourcesResponse>
      <trt:VideoSources token="video_src_token">
        <tt:Framerate>{framerate}</tt:Framerate>
        <tt:Resolution><tt:Width>{width}</tt:Width><tt:Height>{height}</tt:Height></tt:Resolution>
      </trt:VideoSources>
    </trt:GetVideoSourcesResponse>
  "#
    ))
}

/// `GetSnapshotUriResponse` / `GetStreamUriResponse` share one MediaUri shape
pub fn media_uri(response: &str, uri: &str) -> String {
    envelope(&format!(
        r#"
    <trt:{response}>
      <trt:MediaUri>
        <tt:Uri>{}</tt:Uri>
        <tt:InvalidAfterConnect>false</tt:InvalidAfterConnect>
        <tt:InvalidAfterReboot>false</tt:InvalidAfterReboot>
        <tt:Timeout>PT30S</tt:Timeout>
      </trt:MediaUri>
    </trt:{response}>
  "#,
        xml_escape(uri)
    ))
}

/// WS-Discovery ProbeMatches reply for one device
pub fn probe_matches(
    message_id: &str,
    relates_to: &str,
    endpoint_uuid: &str,
    name: &str,
    xaddr: &str,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://www.w3.org/2003/05/soap-envelope" xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery" xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
  <SOAP-ENV:Header>
    <wsa:MessageID>uuid:{message_id}</wsa:MessageID>
    <wsa:RelatesTo>uuid:{relates_to}</wsa:RelatesTo>
    <wsa:To SOAP-ENV:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</wsa:To>
    <wsa:Action SOAP-ENV:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2005/04/discovery/ProbeMatches</wsa:Action>
  </SOAP-ENV:Header>
  <SOAP-ENV:Body>
    <d:ProbeMatches>
      <d:ProbeMatch>
        <wsa:EndpointReference><wsa:Address>urn:uuid:{endpoint_uuid}</wsa:Address></wsa:EndpointReference>
        <d:Types>dn:NetworkVideoTransmitter</d:Types>
        <d:Scopes>onvif://www.onvif.org/type/video_encoder onvif://www.onvif.org/name/{}</d:Scopes>
        <d:XAddrs>{}</d:XAddrs>
        <d:MetadataVersion>1</d:MetadataVersion>
      </d:ProbeMatch>
    </d:ProbeMatches>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#,
        xml_escape(name),
        xml_escape(xaddr)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_envelope() {
        let xml = envelope("");
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<s:Body></s:Body>"));
        assert!(xml.contains(r#"xmlns:trt="http://www.onvif.org/ver10/media/wsdl""#));
    }

    #[test]
    fn test_date_and_time_fields() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 42).unwrap();
        let xml = get_system_date_and_time(now);

        assert!(xml.contains("<tt:Hour>7</tt:Hour><tt:Minute>5</tt:Minute><tt:Second>42</tt:Second>"));
        assert!(xml.contains("<tt:Year>2024</tt:Year><tt:Month>3</tt:Month><tt:Day>9</tt:Day>"));
        assert!(xml.contains("<tt:DateTimeType>NTP</tt:DateTimeType>"));
        assert!(xml.contains("<tt:TZ>UTC+00:00</tt:TZ>"));
    }

    #[test]
    fn test_values_are_escaped() {
        let xml = get_device_information("R&D<1>-0000", "R&D<1>-1001");
        assert!(xml.contains("R&amp;D&lt;1&gt;-0000"));
        assert!(!xml.contains("R&D"));

        let xml = media_uri("GetStreamUriResponse", "rtsp://h:1/live?a=1&b=2");
        assert!(xml.contains("rtsp://h:1/live?a=1&amp;b=2"));
    }
}
