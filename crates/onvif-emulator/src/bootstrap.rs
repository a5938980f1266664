//! Configuration bootstrap from a real ONVIF camera
//!
//! Queries the camera's media service for its profiles and stream/snapshot
//! URIs and turns them into an emulator configuration, one device per video
//! source.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use common::config::{
    DeviceConfig, DevicePorts, EmulatorConfig, StreamConfig, TargetConfig, TargetPorts,
};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub const MAC_PLACEHOLDER: &str = "<ONVIF PROXY MAC ADDRESS HERE>";

const FIRST_SERVER_PORT: u16 = 8081;
const RTSP_PORT: u16 = 8554;
const SNAPSHOT_PORT: u16 = 8580;
const BACKEND_RTSP_PORT: u16 = 554;
const HIGH_QUALITY: f32 = 4.0;
const LOW_QUALITY: f32 = 1.0;

/// `host[:port]` of the camera to copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraAddress {
    pub host: String,
    pub port: u16,
}

impl CameraAddress {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (host, port) = match input.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .with_context(|| format!("invalid port in '{input}'"))?,
            ),
            None => (input, 80),
        };

        if host.is_empty() {
            return Err(anyhow!("missing camera host"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn media_service_url(&self) -> String {
        format!("http://{}:{}/onvif/media_service", self.host, self.port)
    }
}

/// One media profile as reported by the real camera
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraProfile {
    pub token: String,
    pub source_token: String,
    pub source_name: String,
    pub quality: f32,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate: u32,
}

/// Media service operations the bootstrap needs
#[async_trait]
pub trait MediaService: Send + Sync {
    async fn get_profiles(&self) -> Result<Vec<CameraProfile>>;

    async fn get_snapshot_uri(&self, profile_token: &str) -> Result<String>;

    async fn get_stream_uri(&self, profile_token: &str) -> Result<String>;
}

/// ONVIF media service client over HTTP
pub struct OnvifMediaClient {
    service_url: String,
    username: Option<String>,
    password: Option<String>,
    http_client: reqwest::Client,
}

impl OnvifMediaClient {
    pub fn new(
        service_url: String,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            service_url,
            username,
            password,
            http_client,
        })
    }

    fn build_soap_envelope(&self, body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:trt="http://www.onvif.org/ver10/media/wsdl"
            xmlns:tt="http://www.onvif.org/ver10/schema">
  <s:Body>
    {}
  </s:Body>
</s:Envelope>"#,
            body
        )
    }

    async fn send_onvif_request(&self, soap_body: &str) -> Result<String> {
        let envelope = self.build_soap_envelope(soap_body);

        debug!("sending ONVIF media request to {}", self.service_url);

        let mut request = self
            .http_client
            .post(&self.service_url)
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .body(envelope);

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(anyhow!("ONVIF request failed: {} - {}", status, body));
        }

        Ok(body)
    }
}

#[async_trait]
impl MediaService for OnvifMediaClient {
    async fn get_profiles(&self) -> Result<Vec<CameraProfile>> {
        let response = self
            .send_onvif_request("<trt:GetProfiles/>")
            .await
            .context("GetProfiles failed")?;
        parse_profiles(&response).context("invalid GetProfiles response")
    }

    async fn get_snapshot_uri(&self, profile_token: &str) -> Result<String> {
        let body = format!(
            "<trt:GetSnapshotUri><trt:ProfileToken>{}</trt:ProfileToken></trt:GetSnapshotUri>",
            quick_xml::escape::escape(profile_token)
        );
        let response = self
            .send_onvif_request(&body)
            .await
            .context("GetSnapshotUri failed")?;
        parse_media_uri(&response).ok_or_else(|| anyhow!("GetSnapshotUri response has no Uri"))
    }

    async fn get_stream_uri(&self, profile_token: &str) -> Result<String> {
        let body = format!(
            r#"<trt:GetStreamUri>
      <trt:StreamSetup>
        <tt:Stream>RTP-Unicast</tt:Stream>
        <tt:Transport><tt:Protocol>RTSP</tt:Protocol></tt:Transport>
      </trt:StreamSetup>
      <trt:ProfileToken>{}</trt:ProfileToken>
    </trt:GetStreamUri>"#,
            quick_xml::escape::escape(profile_token)
        );
        let response = self
            .send_onvif_request(&body)
            .await
            .context("GetStreamUri failed")?;
        parse_media_uri(&response).ok_or_else(|| anyhow!("GetStreamUri response has no Uri"))
    }
}

/// Parse a `GetProfilesResponse` into the fields the bootstrap needs.
///
/// Elements are matched by local name, so any namespace prefixes work.
/// Malformed or truncated XML is an error.
pub fn parse_profiles(xml: &str) -> Result<Vec<CameraProfile>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut profiles = Vec::new();
    let mut current: Option<CameraProfile> = None;
    let mut path: Vec<String> = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Profiles" && current.is_none() {
                    let token = e
                        .try_get_attribute("token")
                        .ok()
                        .flatten()
                        .and_then(|attr| attr.unescape_value().ok())
                        .map(|value| value.into_owned())
                        .unwrap_or_default();
                    current = Some(CameraProfile {
                        token,
                        ..Default::default()
                    });
                    path.clear();
                }
                path.push(name);
            }
            Ok(Event::End(e)) => {
                depth = depth.saturating_sub(1);
                if e.local_name().as_ref() == b"Profiles" && path.len() == 1 {
                    if let Some(profile) = current.take() {
                        profiles.push(profile);
                    }
                }
                path.pop();
            }
            Ok(Event::Text(e)) => {
                let (Some(profile), Ok(text)) = (current.as_mut(), e.unescape()) else {
                    continue;
                };
                apply_profile_field(profile, &path, text.trim());
            }
            Ok(Event::Eof) if depth == 0 => break,
            Ok(Event::Eof) => return Err(anyhow!("truncated XML: {depth} unclosed elements")),
            Err(e) => {
                return Err(anyhow!(
                    "malformed XML at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
    }

    Ok(profiles)
}

fn apply_profile_field(profile: &mut CameraProfile, path: &[String], text: &str) {
    let names: Vec<&str> = path.iter().map(String::as_str).collect();
    let number = || text.parse::<f64>().ok().map(|v| v.max(0.0) as u32);

    match names.as_slice() {
        [.., "VideoSourceConfiguration", "SourceToken"] => profile.source_token = text.to_string(),
        [.., "VideoSourceConfiguration", "Name"] => profile.source_name = text.to_string(),
        [.., "VideoEncoderConfiguration", "Quality"] => {
            profile.quality = text.parse().unwrap_or_default()
        }
        [.., "VideoEncoderConfiguration", "Resolution", "Width"] => {
            profile.width = number().unwrap_or_default()
        }
        [.., "VideoEncoderConfiguration", "Resolution", "Height"] => {
            profile.height = number().unwrap_or_default()
        }
        [.., "VideoEncoderConfiguration", "RateControl", "FrameRateLimit"] => {
            profile.framerate = number().unwrap_or_default()
        }
        [.., "VideoEncoderConfiguration", "RateControl", "BitrateLimit"] => {
            profile.bitrate = number().unwrap_or_default()
        }
        _ => {}
    }
}

/// First `Uri` element of a media URI response
pub fn parse_media_uri(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_uri = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => in_uri = e.local_name().as_ref() == b"Uri",
            Ok(Event::Text(e)) if in_uri => {
                return e.unescape().ok().map(|uri| uri.trim().to_string());
            }
            Ok(Event::End(_)) => in_uri = false,
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Path and query of a camera URI, e.g. `/Streaming/Channels/101?transport=tcp`
pub fn uri_path(uri: &str) -> String {
    match reqwest::Url::parse(uri) {
        Ok(url) => match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        },
        Err(_) => String::new(),
    }
}

/// A profile together with the URIs fetched for it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProfile {
    pub profile: CameraProfile,
    pub stream_uri: String,
    pub snapshot_uri: String,
}

/// Turn profiles grouped by video source into device entries
pub fn build_config(profiles: Vec<ResolvedProfile>, camera: &CameraAddress) -> EmulatorConfig {
    // Group by video source, keeping the camera's order
    let mut sources: Vec<(String, Vec<ResolvedProfile>)> = Vec::new();
    for profile in profiles {
        let source = profile.profile.source_token.clone();
        match sources.iter_mut().find(|(token, _)| *token == source) {
            Some((_, group)) => group.push(profile),
            None => sources.push((source, vec![profile])),
        }
    }

    let mut devices = Vec::with_capacity(sources.len());
    let mut server_port = FIRST_SERVER_PORT;

    for (_, group) in sources {
        let Some(first) = group.first() else {
            continue;
        };
        let mut main = first;
        let mut sub = group.get(1).unwrap_or(first);

        let swap = sub.profile.quality > main.profile.quality
            || (sub.profile.quality == main.profile.quality
                && sub.profile.width > main.profile.width);
        if swap {
            std::mem::swap(&mut main, &mut sub);
        }

        devices.push(DeviceConfig {
            mac: Some(MAC_PLACEHOLDER.to_string()),
            hostname: None,
            ports: DevicePorts {
                server: server_port,
                rtsp: RTSP_PORT,
                snapshot: SNAPSHOT_PORT,
            },
            name: main.profile.source_name.clone(),
            uuid: Uuid::new_v4(),
            high_quality: stream_config(main, HIGH_QUALITY),
            low_quality: Some(stream_config(sub, LOW_QUALITY)),
            target: TargetConfig {
                hostname: camera.host.clone(),
                ports: TargetPorts {
                    rtsp: Some(BACKEND_RTSP_PORT),
                    snapshot: Some(camera.port),
                },
            },
        });
        server_port = server_port.saturating_add(1);
    }

    EmulatorConfig { onvif: devices }
}

fn stream_config(resolved: &ResolvedProfile, quality: f32) -> StreamConfig {
    let snapshot = uri_path(&resolved.snapshot_uri);
    StreamConfig {
        rtsp: uri_path(&resolved.stream_uri),
        snapshot: (!snapshot.is_empty()).then_some(snapshot),
        width: resolved.profile.width,
        height: resolved.profile.height,
        framerate: resolved.profile.framerate,
        bitrate: resolved.profile.bitrate,
        quality: Some(quality),
    }
}

/// Query `client` for every profile and build the configuration
pub async fn create_config(
    client: &dyn MediaService,
    camera: &CameraAddress,
) -> Result<EmulatorConfig> {
    let profiles = client.get_profiles().await?;
    if profiles.is_empty() {
        return Err(anyhow!("camera reported no media profiles"));
    }
    info!(profiles = profiles.len(), "camera profiles retrieved");

    let mut resolved = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let snapshot_uri = client.get_snapshot_uri(&profile.token).await?;
        let stream_uri = client.get_stream_uri(&profile.token).await?;
        debug!(
            token = %profile.token,
            stream_uri = %stream_uri,
            snapshot_uri = %snapshot_uri,
            "profile resolved"
        );
        resolved.push(ResolvedProfile {
            profile,
            stream_uri,
            snapshot_uri,
        });
    }

    Ok(build_config(resolved, camera))
}
