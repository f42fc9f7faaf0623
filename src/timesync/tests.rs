use super::client::{TimeSyncClient, estimate_offset};
use super::frame::{Frame, PING_LEN, PONG_LEN, Ping, Pong};
use super::server::TimeSyncServer;
use crate::utils::clock::{Clock, MonotonicClock, OffsetClock};
use crate::utils::error::NtError;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_ping_layout() {
    let bytes = Ping {
        client_time: 0x0102030405060708,
    }
    .encode();
    assert_eq!(bytes.len(), PING_LEN);
    assert_eq!(bytes, [1, 1, 1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_pong_layout_and_decode() {
    let pong = Pong {
        client_time: 5,
        server_time: 6,
    };
    let bytes = pong.encode();
    assert_eq!(bytes.len(), PONG_LEN);
    assert_eq!(&bytes[..2], &[1, 2]);
    assert_eq!(bytes[9], 5);
    assert_eq!(bytes[17], 6);
    assert_eq!(Frame::decode(&bytes).unwrap(), Frame::Pong(pong));
}

#[test]
fn test_decode_rejects_bad_frames() {
    assert!(matches!(Frame::decode(&[1]), Err(NtError::Protocol(_))));
    assert!(matches!(
        Frame::decode(&[2, 1, 0, 0, 0, 0, 0, 0, 0, 0]),
        Err(NtError::UnsupportedVersion(2))
    ));
    assert!(matches!(
        Frame::decode(&[1, 9, 0, 0, 0, 0, 0, 0, 0, 0]),
        Err(NtError::Protocol(_))
    ));
    assert!(matches!(Frame::decode(&[1, 1, 0, 0]), Err(NtError::Protocol(_))));
}

#[test]
fn test_estimate_offset() {
    // ping at 1000, reply at 1200 (rtt 200), server said 6100
    let sample = estimate_offset(1000, 1200, 6100);
    assert_eq!(sample.rtt, 200);
    assert_eq!(sample.offset, 5000);

    let behind = estimate_offset(10_000, 10_000, 4_000);
    assert_eq!(behind.offset, -6_000);
}

#[tokio::test]
async fn test_server_only_answers_pings() {
    let server = TimeSyncServer::bind("127.0.0.1:0", Arc::new(MonotonicClock::new()))
        .await
        .unwrap();
    let reply = server.respond(&Ping { client_time: 77 }.encode()).unwrap();
    match Frame::decode(&reply).unwrap() {
        Frame::Pong(pong) => {
            assert_eq!(pong.client_time, 77);
            assert!(pong.server_time > 0);
        }
        other => panic!("unexpected {other:?}"),
    }

    let pong = Pong {
        client_time: 1,
        server_time: 2,
    }
    .encode();
    assert!(server.respond(&pong).is_none());
    assert!(server.respond(&[9, 9, 9]).is_none());
}

#[tokio::test]
async fn test_round_trip_recovers_offset() {
    let base: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let server_clock = Arc::new(OffsetClock::new(base.clone(), 5_000_000));
    let server = TimeSyncServer::bind("127.0.0.1:0", server_clock).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let client = TimeSyncClient::connect(
        addr,
        base,
        Duration::from_millis(50),
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    let sample = client.sync_once().await.unwrap().expect("no pong received");
    assert!(
        (sample.offset - 5_000_000).abs() < 50_000,
        "offset {} too far from 5s",
        sample.offset
    );

    let handle = client.spawn();
    let mut updates = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(5), updates.wait_for(|s| s.is_some()))
        .await
        .unwrap()
        .unwrap();
    let offset = handle.offset().unwrap();
    assert!((offset - 5_000_000).abs() < 50_000);
}

#[tokio::test]
async fn test_missing_server_times_out() {
    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    let client = TimeSyncClient::connect(
        addr,
        Arc::new(MonotonicClock::new()),
        Duration::from_millis(50),
        Duration::from_millis(100),
    )
    .await
    .unwrap();

    // The socket above never answers.
    assert_eq!(client.sync_once().await.unwrap(), None);
}
