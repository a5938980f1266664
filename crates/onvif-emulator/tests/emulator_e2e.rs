use anyhow::Result;
use common::config::EmulatorConfig;
use onvif_emulator::orchestrator::build_devices;
use onvif_emulator::{DeviceModel, DeviceServer, Relay, RelayRoute, SoapResponder};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const GET_DEVICE_INFORMATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Body xmlns:tds="http://www.onvif.org/ver10/device/wsdl">
    <tds:GetDeviceInformation/>
  </s:Body>
</s:Envelope>"#;

const GET_STREAM_URI: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Body xmlns:trt="http://www.onvif.org/ver10/media/wsdl" xmlns:tt="http://www.onvif.org/ver10/schema">
    <trt:GetStreamUri>
      <trt:StreamSetup><tt:Stream>RTP-Unicast</tt:Stream></trt:StreamSetup>
      <trt:ProfileToken>sub_stream</trt:ProfileToken>
    </trt:GetStreamUri>
  </s:Body>
</s:Envelope>"#;

fn device_yaml(name: &str, server_port: u16, uuid: &str) -> String {
    format!(
        r#"
  - hostname: 127.0.0.1
    ports:
      server: {server_port}
      rtsp: 18554
      snapshot: 18580
    name: {name}
    uuid: {uuid}
    highQuality:
      rtsp: /stream1
      snapshot: /snap1.jpg
      width: 1920
      height: 1080
      framerate: 25
      bitrate: 4096
    lowQuality:
      rtsp: /stream2
      width: 640
      height: 360
      framerate: 15
      bitrate: 512
    target:
      hostname: 127.0.0.1
      ports:
        rtsp: 554
"#
    )
}

/// Write `entries` as a config file and load it back through the public API
fn load_devices(entries: &[String]) -> Result<Vec<Arc<DeviceModel>>> {
    let mut file = NamedTempFile::new()?;
    write!(file, "onvif:{}", entries.concat())?;

    let config = EmulatorConfig::load(file.path())?;
    Ok(build_devices(&config.onvif, |_| None))
}

/// Serve `device` on an already bound listener
fn serve(listener: TcpListener, device: Arc<DeviceModel>) {
    let server = DeviceServer::with_listener(
        listener,
        SoapResponder::new(device),
        PathBuf::from("/nonexistent/snapshot.png"),
    );
    tokio::spawn(server.run());
}

async fn soap_post(port: u16, path: &str, body: &'static str) -> Result<String> {
    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}{path}"))
        .header("Content-Type", "application/soap+xml; charset=utf-8")
        .body(body)
        .send()
        .await?;
    assert!(response.status().is_success());
    Ok(response.text().await?)
}

#[tokio::test]
async fn test_device_information_over_http() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let devices = load_devices(&[device_yaml(
        "Front Door",
        port,
        "6f0c1d52-7a4c-4b7e-9a55-3a2c5e0e9f11",
    )])?;
    assert_eq!(devices.len(), 1);
    serve(listener, Arc::clone(&devices[0]));

    let body = soap_post(port, "/onvif/device_service", GET_DEVICE_INFORMATION).await?;
    assert!(body.contains("<tds:Manufacturer>Virtual ONVIF</tds:Manufacturer>"));
    assert!(body.contains("<tds:SerialNumber>Front_Door-0000</tds:SerialNumber>"));
    assert!(body.contains("<tds:HardwareId>Front_Door-1001</tds:HardwareId>"));

    let body = soap_post(port, "/onvif/media_service", GET_STREAM_URI).await?;
    assert!(body.contains("rtsp://127.0.0.1:18554/stream2"));

    Ok(())
}

#[tokio::test]
async fn test_devices_are_served_independently() -> Result<()> {
    let first_listener = TcpListener::bind("127.0.0.1:0").await?;
    let second_listener = TcpListener::bind("127.0.0.1:0").await?;
    let first_port = first_listener.local_addr()?.port();
    let second_port = second_listener.local_addr()?.port();

    let devices = load_devices(&[
        device_yaml("Front Door", first_port, "6f0c1d52-7a4c-4b7e-9a55-3a2c5e0e9f11"),
        device_yaml("Back Yard", second_port, "0b8e4a0e-2c7f-4f43-9d61-4f0f3c1a2b3c"),
    ])?;
    assert_eq!(devices.len(), 2);

    serve(first_listener, Arc::clone(&devices[0]));
    serve(second_listener, Arc::clone(&devices[1]));

    let first = soap_post(first_port, "/onvif/device_service", GET_DEVICE_INFORMATION).await?;
    let second = soap_post(second_port, "/onvif/device_service", GET_DEVICE_INFORMATION).await?;

    assert!(first.contains("Front_Door-0000"));
    assert!(!first.contains("Back_Yard"));
    assert!(second.contains("Back_Yard-0000"));
    assert!(!second.contains("Front_Door"));

    Ok(())
}

#[tokio::test]
async fn test_relay_closes_client_when_backend_refuses() -> Result<()> {
    let placeholder = TcpListener::bind("127.0.0.1:0").await?;
    let backend_port = placeholder.local_addr()?.port();
    drop(placeholder);

    let relay = Relay::with_listener(
        TcpListener::bind("127.0.0.1:0").await?,
        RelayRoute {
            local_port: 0,
            backend_host: "127.0.0.1".to_string(),
            backend_port,
        },
    );
    let relay_addr = relay.local_addr()?;
    tokio::spawn(relay.run());

    let mut client = TcpStream::connect(relay_addr).await?;
    let _ = client.write_all(b"OPTIONS * RTSP/1.0\r\n\r\n").await;

    let mut received = Vec::new();
    let read = timeout(Duration::from_secs(5), client.read_to_end(&mut received)).await?;
    if read.is_ok() {
        assert!(received.is_empty());
    }

    Ok(())
}

#[tokio::test]
async fn test_relay_forwards_to_backend() -> Result<()> {
    let backend = TcpListener::bind("127.0.0.1:0").await?;
    let backend_port = backend.local_addr()?.port();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = backend.accept().await {
            let mut request = [0u8; 128];
            if let Ok(size) = stream.read(&mut request).await {
                let _ = stream.write_all(b"HTTP/1.0 200 OK\r\n\r\n").await;
                let _ = stream.write_all(&request[..size]).await;
            }
        }
    });

    let relay = Relay::with_listener(
        TcpListener::bind("127.0.0.1:0").await?,
        RelayRoute {
            local_port: 0,
            backend_host: "127.0.0.1".to_string(),
            backend_port,
        },
    );
    let relay_addr = relay.local_addr()?;
    tokio::spawn(relay.run());

    let mut client = TcpStream::connect(relay_addr).await?;
    client.write_all(b"GET /snap1.jpg").await?;

    let mut received = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut received)).await??;
    assert_eq!(received, b"HTTP/1.0 200 OK\r\n\r\nGET /snap1.jpg".to_vec());

    Ok(())
}
