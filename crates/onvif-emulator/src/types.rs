use crate::error::DeviceError;
use common::config::{DeviceConfig, StreamConfig};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Token ONVIF clients put in `ProfileToken` to select the low quality stream
pub const SUB_STREAM_TOKEN: &str = "sub_stream";
pub const MAIN_STREAM_TOKEN: &str = "main_stream";

/// One quality tier of an emulated device's video output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamProfile {
    pub name: String,
    pub token: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate: u32,
    /// Path on the relayed RTSP port, e.g. `/stream1`
    pub rtsp_path: String,
    /// Path on the relayed snapshot port
    pub snapshot_path: Option<String>,
    pub encoder_token: String,
}

impl StreamProfile {
    fn from_config(
        device: &str,
        name: &str,
        token: &str,
        encoder_token: &str,
        config: &StreamConfig,
    ) -> Result<Self, DeviceError> {
        let positive = [
            ("width", config.width),
            ("height", config.height),
            ("framerate", config.framerate),
            ("bitrate", config.bitrate),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(DeviceError::NonPositive {
                    name: device.to_string(),
                    field,
                });
            }
        }

        Ok(Self {
            name: name.to_string(),
            token: token.to_string(),
            width: config.width,
            height: config.height,
            framerate: config.framerate,
            bitrate: config.bitrate,
            rtsp_path: config.rtsp.clone(),
            snapshot_path: config.snapshot.clone().filter(|path| !path.is_empty()),
            encoder_token: encoder_token.to_string(),
        })
    }
}

/// Where the relays of a device forward to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub hostname: String,
    pub rtsp_port: Option<u16>,
    pub snapshot_port: Option<u16>,
}

/// In-memory model of one emulated camera, read-only once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceModel {
    pub uuid: Uuid,
    pub name: String,
    pub mac: Option<String>,
    pub hostname: String,
    pub server_port: u16,
    pub rtsp_port: u16,
    pub snapshot_port: u16,
    high_quality: StreamProfile,
    low_quality: Option<StreamProfile>,
    pub target: BackendTarget,
}

/// One TCP pass-through: local listener to backend endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayRoute {
    pub local_port: u16,
    pub backend_host: String,
    pub backend_port: u16,
}

impl DeviceModel {
    /// Build a device from its configuration entry.
    ///
    /// A configured hostname wins; otherwise `resolve_mac` maps the configured
    /// MAC to a local IPv4 address.
    pub fn from_config<F>(config: &DeviceConfig, resolve_mac: F) -> Result<Self, DeviceError>
    where
        F: Fn(&str) -> Option<Ipv4Addr>,
    {
        let name = config.name.clone();

        let hostname = match config.hostname.as_deref().map(str::trim) {
            Some(hostname) if !hostname.is_empty() => hostname.to_string(),
            _ => {
                let mac = config
                    .mac
                    .as_deref()
                    .ok_or_else(|| DeviceError::NoHostname(name.clone()))?;
                resolve_mac(mac)
                    .ok_or_else(|| DeviceError::UnresolvedMac {
                        name: name.clone(),
                        mac: mac.to_string(),
                    })?
                    .to_string()
            }
        };

        let ports = config.ports;
        for (field, port) in [
            ("server", ports.server),
            ("rtsp", ports.rtsp),
            ("snapshot", ports.snapshot),
        ] {
            if port == 0 {
                return Err(DeviceError::ZeroPort {
                    name: name.clone(),
                    field,
                });
            }
        }
        if ports.server == ports.rtsp
            || ports.server == ports.snapshot
            || ports.rtsp == ports.snapshot
        {
            return Err(DeviceError::PortConflict {
                name,
                server: ports.server,
                rtsp: ports.rtsp,
                snapshot: ports.snapshot,
            });
        }

        let high_quality = StreamProfile::from_config(
            &name,
            "MainStream",
            MAIN_STREAM_TOKEN,
            "encoder_hq",
            &config.high_quality,
        )?;
        let low_quality = config
            .low_quality
            .as_ref()
            .map(|low| StreamProfile::from_config(&name, "SubStream", SUB_STREAM_TOKEN, "encoder_lq", low))
            .transpose()?;

        Ok(Self {
            uuid: config.uuid,
            name,
            mac: config.mac.clone(),
            hostname,
            server_port: ports.server,
            rtsp_port: ports.rtsp,
            snapshot_port: ports.snapshot,
            high_quality,
            low_quality,
            target: BackendTarget {
                hostname: config.target.hostname.clone(),
                rtsp_port: config.target.ports.rtsp,
                snapshot_port: config.target.ports.snapshot,
            },
        })
    }

    pub fn high_quality(&self) -> &StreamProfile {
        &self.high_quality
    }

    pub fn low_quality(&self) -> Option<&StreamProfile> {
        self.low_quality.as_ref()
    }

    /// Profiles in advertised order: main first, then sub if configured
    pub fn profiles(&self) -> impl Iterator<Item = &StreamProfile> {
        std::iter::once(&self.high_quality).chain(self.low_quality.as_ref())
    }

    /// Base URL of the ONVIF services, e.g. `http://192.0.2.5:8081/onvif`
    pub fn onvif_base_url(&self) -> String {
        format!("http://{}:{}/onvif", self.hostname, self.server_port)
    }

    pub fn device_service_url(&self) -> String {
        format!("{}/device_service", self.onvif_base_url())
    }

    pub fn media_service_url(&self) -> String {
        format!("{}/media_service", self.onvif_base_url())
    }

    /// Device name with spaces replaced, the stem of serial and hardware ids
    fn id_stem(&self) -> String {
        self.name.replace(' ', "_")
    }

    pub fn serial_number(&self) -> String {
        format!("{}-0000", self.id_stem())
    }

    pub fn hardware_id(&self) -> String {
        format!("{}-1001", self.id_stem())
    }

    /// Relays this device needs; a route exists only when both ends are set
    pub fn relay_routes(&self) -> Vec<RelayRoute> {
        let mut routes = Vec::with_capacity(2);
        if let Some(backend_port) = self.target.rtsp_port {
            routes.push(RelayRoute {
                local_port: self.rtsp_port,
                backend_host: self.target.hostname.clone(),
                backend_port,
            });
        }
        if let Some(backend_port) = self.target.snapshot_port {
            routes.push(RelayRoute {
                local_port: self.snapshot_port,
                backend_host: self.target.hostname.clone(),
                backend_port,
            });
        }
        routes
    }
}
