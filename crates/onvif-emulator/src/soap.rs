//! ONVIF SOAP action routing and response synthesis
//!
//! Dispatch is by action name only: the local name of the first element inside
//! the SOAP `Body`. Which device answers is decided by the listener the request
//! arrived on, so the request path is informational.

use crate::templates::{self, ProfileView};
use crate::types::{DeviceModel, SUB_STREAM_TOKEN};
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// ONVIF operations the emulator answers; everything else is `Unknown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoapAction {
    GetSystemDateAndTime,
    GetCapabilities,
    GetServices,
    GetDeviceInformation,
    GetProfiles,
    GetVideoSources,
    GetSnapshotUri,
    GetStreamUri,
    Unknown,
}

impl SoapAction {
    /// Map a wire tag name (prefix already stripped) to an action
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "GetSystemDateAndTime" => Self::GetSystemDateAndTime,
            "GetCapabilities" => Self::GetCapabilities,
            "GetServices" => Self::GetServices,
            "GetDeviceInformation" => Self::GetDeviceInformation,
            "GetProfiles" => Self::GetProfiles,
            "GetVideoSources" => Self::GetVideoSources,
            "GetSnapshotUri" => Self::GetSnapshotUri,
            "GetStreamUri" => Self::GetStreamUri,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetSystemDateAndTime => "GetSystemDateAndTime",
            Self::GetCapabilities => "GetCapabilities",
            Self::GetServices => "GetServices",
            Self::GetDeviceInformation => "GetDeviceInformation",
            Self::GetProfiles => "GetProfiles",
            Self::GetVideoSources => "GetVideoSources",
            Self::GetSnapshotUri => "GetSnapshotUri",
            Self::GetStreamUri => "GetStreamUri",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SoapAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract the action name from a SOAP request body.
///
/// Returns the local name of the first child element of `Body`, or `None` when
/// the body is not well-formed XML or carries no operation.
pub fn extract_action(body: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut in_body = false;
    let mut action = None;
    // Open elements; quick-xml does not report unclosed ones at EOF
    let mut depth = 0usize;

    let mut visit = |local_name: &[u8]| {
        if in_body {
            if action.is_none() {
                action = Some(String::from_utf8_lossy(local_name).into_owned());
            }
        } else if local_name == b"Body" {
            in_body = true;
        }
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                visit(e.local_name().as_ref());
                depth += 1;
            }
            Ok(Event::Empty(e)) => visit(e.local_name().as_ref()),
            Ok(Event::End(_)) => depth = depth.checked_sub(1)?,
            Ok(Event::Eof) if depth == 0 => break,
            // Truncated body, or one that fails to parse anywhere, counts as unknown
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }

    action
}

/// Synthesizes SOAP responses for one emulated device
pub struct SoapResponder {
    device: Arc<DeviceModel>,
}

impl SoapResponder {
    pub fn new(device: Arc<DeviceModel>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &DeviceModel {
        &self.device
    }

    /// Answer one request. Never fails: unsupported actions get an envelope
    /// with an empty body.
    pub fn handle(&self, path: &str, action: &str, body: &str) -> String {
        let action = SoapAction::from_tag(action);
        debug!(
            device = %self.device.name,
            path = %path,
            action = %action,
            "SOAP request"
        );
        self.respond(action, body, Utc::now())
    }

    /// Render the response for `action` with `now` as the device clock
    pub fn respond(&self, action: SoapAction, body: &str, now: DateTime<Utc>) -> String {
        let device = &self.device;
        match action {
            SoapAction::GetSystemDateAndTime => templates::get_system_date_and_time(now),
            SoapAction::GetCapabilities => templates::get_capabilities(
                &device.device_service_url(),
                &device.media_service_url(),
            ),
            SoapAction::GetServices => {
                templates::get_services(&device.device_service_url(), &device.media_service_url())
            }
            SoapAction::GetDeviceInformation => {
                templates::get_device_information(&device.serial_number(), &device.hardware_id())
            }
            SoapAction::GetProfiles => {
                let profiles: Vec<ProfileView<'_>> = device
                    .profiles()
                    .map(|p| ProfileView {
                        token: &p.token,
                        name: &p.name,
                        encoder_token: &p.encoder_token,
                        width: p.width,
                        height: p.height,
                        framerate: p.framerate,
                        bitrate: p.bitrate,
                    })
                    .collect();
                templates::get_profiles(&profiles)
            }
            SoapAction::GetVideoSources => {
                let hq = device.high_quality();
                templates::get_video_sources(hq.framerate, hq.width, hq.height)
            }
            SoapAction::GetSnapshotUri => {
                templates::media_uri("GetSnapshotUriResponse", &self.snapshot_uri(body))
            }
            SoapAction::GetStreamUri => {
                templates::media_uri("GetStreamUriResponse", &self.stream_uri(body))
            }
            SoapAction::Unknown => templates::envelope(""),
        }
    }

    /// Snapshot URI for the profile the request names.
    ///
    /// Falls back to the main profile, then to the built-in `/snapshot.png`
    /// on the SOAP port when no snapshot path is configured.
    pub fn snapshot_uri(&self, body: &str) -> String {
        let device = &self.device;
        let sub_snapshot = device
            .low_quality()
            .and_then(|low| low.snapshot_path.as_deref())
            .filter(|_| body.contains(SUB_STREAM_TOKEN));

        match sub_snapshot.or(device.high_quality().snapshot_path.as_deref()) {
            Some(path) => format!("http://{}:{}{}", device.hostname, device.snapshot_port, path),
            None => format!(
                "http://{}:{}/snapshot.png",
                device.hostname, device.server_port
            ),
        }
    }

    /// RTSP URI for the profile the request names
    pub fn stream_uri(&self, body: &str) -> String {
        let device = &self.device;
        let profile = device
            .low_quality()
            .filter(|_| body.contains(SUB_STREAM_TOKEN))
            .unwrap_or_else(|| device.high_quality());

        format!(
            "rtsp://{}:{}{}",
            device.hostname, device.rtsp_port, profile.rtsp_path
        )
    }
}
