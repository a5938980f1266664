use crate::discovery::DiscoveryResponder;
use crate::error::DeviceError;
use crate::relay::Relay;
use crate::server::DeviceServer;
use crate::soap::SoapResponder;
use crate::types::{DeviceModel, RelayRoute};
use common::config::{DeviceConfig, EmulatorConfig};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Image served at `GET /snapshot.png` on every device server
    pub snapshot_image: PathBuf,
    /// Start a WS-Discovery responder per device
    pub discovery: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            snapshot_image: PathBuf::from("./resources/snapshot.png"),
            discovery: true,
        }
    }
}

/// Build the device models, skipping entries that cannot be emulated.
///
/// A device whose `hostname:server_port` was already claimed by an earlier
/// entry is skipped as well.
pub fn build_devices<F>(configs: &[DeviceConfig], resolve_mac: F) -> Vec<Arc<DeviceModel>>
where
    F: Fn(&str) -> Option<Ipv4Addr>,
{
    let mut devices: Vec<Arc<DeviceModel>> = Vec::with_capacity(configs.len());
    let mut claimed: HashMap<(String, u16), String> = HashMap::new();

    for config in configs {
        let device = match DeviceModel::from_config(config, &resolve_mac) {
            Ok(device) => device,
            Err(e) => {
                error!(device = %config.name, error = %e, "skipping device");
                continue;
            }
        };

        let key = (device.hostname.clone(), device.server_port);
        if let Some(owner) = claimed.get(&key) {
            let e = DeviceError::ServerPortTaken {
                name: device.name.clone(),
                host: key.0,
                port: key.1,
                owner: owner.clone(),
            };
            error!(device = %device.name, error = %e, "skipping device");
            continue;
        }
        claimed.insert(key, device.name.clone());

        devices.push(Arc::new(device));
    }

    devices
}

/// Relay routes of all devices, unique by local port (first claim wins)
pub fn plan_relays(devices: &[Arc<DeviceModel>]) -> Vec<RelayRoute> {
    let mut routes: Vec<RelayRoute> = Vec::new();

    for route in devices.iter().flat_map(|device| device.relay_routes()) {
        match routes.iter().find(|r| r.local_port == route.local_port) {
            Some(existing) if *existing == route => {}
            Some(existing) => {
                warn!(
                    local_port = route.local_port,
                    kept = %format!("{}:{}", existing.backend_host, existing.backend_port),
                    dropped = %format!("{}:{}", route.backend_host, route.backend_port),
                    "relay port already claimed"
                );
            }
            None => routes.push(route),
        }
    }

    routes
}

/// All units of a running emulator
pub struct Orchestrator {
    tasks: JoinSet<()>,
}

impl Orchestrator {
    /// Start every device server, discovery responder and relay.
    ///
    /// Units that fail to bind are logged and left out; the rest keep running.
    pub async fn start(config: &EmulatorConfig, options: OrchestratorOptions) -> Self {
        let devices = build_devices(&config.onvif, common::netif::ipv4_for_mac);
        Self::start_devices(devices, options).await
    }

    pub async fn start_devices(devices: Vec<Arc<DeviceModel>>, options: OrchestratorOptions) -> Self {
        let mut tasks = JoinSet::new();

        for device in &devices {
            let responder = SoapResponder::new(Arc::clone(device));
            match DeviceServer::bind(responder, options.snapshot_image.clone()).await {
                Ok(server) => {
                    let name = device.name.clone();
                    tasks.spawn(async move {
                        if let Err(e) = server.run().await {
                            error!(device = %name, error = %e, "ONVIF server stopped");
                        }
                    });
                }
                Err(e) => {
                    error!(
                        device = %device.name,
                        addr = %format!("{}:{}", device.hostname, device.server_port),
                        error = %e,
                        "failed to start ONVIF server"
                    );
                }
            }

            if options.discovery {
                match DiscoveryResponder::bind(Arc::clone(device)) {
                    Ok(responder) => {
                        tasks.spawn(responder.run());
                    }
                    Err(e) => {
                        error!(device = %device.name, error = ?e, "WS-Discovery unavailable");
                    }
                }
            }
        }

        let relays = plan_relays(&devices);
        for route in &relays {
            match Relay::bind(route.clone()).await {
                Ok(relay) => {
                    tasks.spawn(relay.run());
                }
                Err(e) => {
                    error!(local_port = route.local_port, error = %e, "failed to start TCP relay");
                }
            }
        }

        info!(
            devices = devices.len(),
            relays = relays.len(),
            units = tasks.len(),
            "emulator started"
        );

        Self { tasks }
    }

    /// Number of units still running
    pub fn running_units(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until every unit has stopped
    pub async fn wait(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "emulator unit panicked");
                }
            }
        }
    }

    pub async fn shutdown(mut self) {
        self.tasks.shutdown().await;
        info!("emulator stopped");
    }
}
