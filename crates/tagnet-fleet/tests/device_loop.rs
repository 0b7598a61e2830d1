//! End-to-end exercise of the fleet engine over real sockets: a server on
//! an ephemeral loopback port, scripted fake devices on plain TcpStreams.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::sleep;

use tagnet_core::{DeviceRole, Garment, ReaderKind, Season, TagConfig};
use tagnet_fleet::{AckOutcome, FleetConfig, FleetError, FleetHandle, FleetServer, NullSink, Reply};

// =============================================================================
// Helpers
// =============================================================================

async fn start_server() -> FleetHandle {
    let mut config = FleetConfig::default();
    config.server.bind_addr = "127.0.0.1".to_string();
    config.server.port = 0;
    FleetServer::new(config, Arc::new(NullSink))
        .start()
        .await
        .expect("server start")
}

/// Waits for the registry to settle at `count` connections.
async fn wait_for_devices(handle: &FleetHandle, count: usize) {
    for _ in 0..200 {
        if handle.device_count().await == count {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("registry never reached {count} devices");
}

/// Spawns a well-behaved fake device: answers PING with PONG EMPTY, SET
/// with the matching ACK, READUID with a fixed UID.
fn spawn_echo_device(stream: TcpStream) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let response = if let Some(rid) = line.strip_prefix("PING ") {
                format!("PONG {rid} EMPTY\n")
            } else if let Some(json) = line.strip_prefix("SET ") {
                let config: TagConfig = serde_json::from_str(json).expect("SET payload");
                format!("ACK ID={}\n", config.id)
            } else if let Some(rid) = line.strip_prefix("READUID ") {
                format!("UID {rid} 04A3B2C1\n")
            } else {
                continue;
            };
            if write_half.write_all(response.as_bytes()).await.is_err() {
                break;
            }
        }
    })
}

async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("device connect")
}

fn sample_config(id: i64) -> TagConfig {
    TagConfig {
        id,
        temporada: Season::Invierno,
        tipo: Garment::Pantalones,
        ubicacion: "Pasillo 2".to_string(),
        precio: 29.95,
        uid: None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_role_announcement_shows_in_snapshot() {
    let handle = start_server().await;

    let mut stream = connect(handle.local_addr()).await;
    stream.write_all(b"ROLE NFC DOOR\n").await.unwrap();
    wait_for_devices(&handle, 1).await;

    // Role application races the read loop by a hair; poll briefly.
    let mut role = DeviceRole::Tag;
    for _ in 0..100 {
        role = handle.devices().await[0].role;
        if role.is_reader() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(role, DeviceRole::Nfc(ReaderKind::Door));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_poll_collects_replies_and_reports_missing() {
    let handle = start_server().await;

    // One device answers polls, the other stays silent.
    let responsive = connect(handle.local_addr()).await;
    let _silent = connect(handle.local_addr()).await;
    spawn_echo_device(responsive);
    wait_for_devices(&handle, 2).await;

    let started = Instant::now();
    let report = handle
        .poll_timeout(Duration::from_millis(400))
        .await
        .unwrap();

    assert_eq!(report.replies.len(), 1);
    assert_eq!(report.missing.len(), 1);
    assert!(!report.satisfied);
    assert!(report.replies.values().all(|r| *r == Reply::Empty));
    // Returned at the deadline, within scheduling slack
    assert!(started.elapsed() >= Duration::from_millis(380));
    assert!(started.elapsed() < Duration::from_secs(3));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_assign_resolves_on_matching_ack() {
    let handle = start_server().await;

    let device = connect(handle.local_addr()).await;
    spawn_echo_device(device);
    wait_for_devices(&handle, 1).await;
    let id = handle.devices().await[0].id;

    let started = Instant::now();
    let outcome = handle
        .assign_timeout(id, &sample_config(5), Duration::from_secs(5))
        .await
        .unwrap();

    // Early resolution: nowhere near the 5 s budget
    assert_eq!(outcome, AckOutcome::Applied);
    assert!(started.elapsed() < Duration::from_secs(2));

    // The ack value is also retained on the connection state
    let info = handle.device(id).await.unwrap();
    assert_eq!(info.last_ack, Some(5));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_assign_with_wrong_ack_reports_timeout() {
    let handle = start_server().await;

    let stream = connect(handle.local_addr()).await;
    // Misbehaving device: always acks id 999
    tokio::spawn(async move {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.starts_with("SET ") {
                let _ = write_half.write_all(b"ACK ID=999\n").await;
            }
        }
    });
    wait_for_devices(&handle, 1).await;
    let id = handle.devices().await[0].id;

    let outcome = handle
        .assign_timeout(id, &sample_config(5), Duration::from_millis(300))
        .await
        .unwrap();

    // Reported, not thrown
    assert_eq!(outcome, AckOutcome::TimedOut);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_read_uid_round_trip() {
    let handle = start_server().await;

    let device = connect(handle.local_addr()).await;
    spawn_echo_device(device);
    wait_for_devices(&handle, 1).await;
    let id = handle.devices().await[0].id;

    let uid = handle
        .read_uid_timeout(id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(uid.as_deref(), Some("04A3B2C1"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_request_to_absent_target_fails_immediately() {
    let handle = start_server().await;

    let started = Instant::now();
    let result = handle
        .assign_timeout(42, &sample_config(1), Duration::from_secs(30))
        .await;

    assert!(matches!(result, Err(FleetError::TargetNotConnected(42))));
    // Synchronous failure, not a waited-out timeout
    assert!(started.elapsed() < Duration::from_millis(500));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_mid_poll_resolves_with_partial_result() {
    let handle = start_server().await;

    let responsive = connect(handle.local_addr()).await;
    let doomed = connect(handle.local_addr()).await;
    spawn_echo_device(responsive);
    wait_for_devices(&handle, 2).await;

    // Drop the second device shortly after the poll goes out
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        drop(doomed);
    });

    let started = Instant::now();
    let report = handle
        .poll_timeout(Duration::from_millis(400))
        .await
        .unwrap();

    // The disconnected participant is missing, the call did not hang
    assert_eq!(report.replies.len(), 1);
    assert_eq!(report.missing.len(), 1);
    assert!(started.elapsed() < Duration::from_secs(3));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_gets_a_fresh_identifier() {
    let handle = start_server().await;

    let first = connect(handle.local_addr()).await;
    wait_for_devices(&handle, 1).await;
    let first_id = handle.devices().await[0].id;

    drop(first);
    wait_for_devices(&handle, 0).await;

    let _second = connect(handle.local_addr()).await;
    wait_for_devices(&handle, 1).await;
    let second_id = handle.devices().await[0].id;

    // No identity continuity across reconnects
    assert!(second_id > first_id);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_split_frames_across_writes_still_dispatch() {
    let handle = start_server().await;

    let device = connect(handle.local_addr()).await;
    wait_for_devices(&handle, 1).await;
    let id = handle.devices().await[0].id;

    // Device writes its role announcement in two fragments
    let (read_half, mut write_half) = device.into_split();
    drop(read_half); // nothing to read in this test
    write_half.write_all(b"ROLE NF").await.unwrap();
    sleep(Duration::from_millis(30)).await;
    write_half.write_all(b"C BOX\n").await.unwrap();

    let mut role = DeviceRole::Tag;
    for _ in 0..100 {
        role = handle.device(id).await.unwrap().role;
        if role.is_reader() {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(role, DeviceRole::Nfc(ReaderKind::Box));

    handle.shutdown().await.unwrap();
}
