#![cfg(all(feature = "host", feature = "listener"))]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use roomcast::audio::OfflineBackend;
use roomcast::config::{AudioStreamConfig, PlaybackConfig};
use roomcast::service::{CaptureService, PlaybackService};
use roomcast::session::{HostSession, ListenerSession, ListenerState};
use roomcast::transport::LocalHub;

const CHUNK: usize = 256;

fn host_session(backend: &OfflineBackend, hub: &LocalHub) -> HostSession {
    let config = AudioStreamConfig {
        chunk_size: CHUNK,
        ..AudioStreamConfig::default()
    };
    let capture = CaptureService::new(Arc::new(backend.clone()), config);
    HostSession::new("host", Arc::new(hub.channel("room")), capture)
}

fn listener_session(backend: &OfflineBackend, hub: &LocalHub, name: &str) -> ListenerSession {
    let playback = PlaybackService::new(Arc::new(backend.clone()), PlaybackConfig::default());
    ListenerSession::new(name, Arc::new(hub.channel("room")), playback)
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn host_end_disconnects_listener_exactly_once() {
    let backend = OfflineBackend::new();
    let hub = LocalHub::new();

    let mut host = host_session(&backend, &hub);
    host.go_live().await.unwrap();

    let mut listener = listener_session(&backend, &hub, "listener");
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    listener
        .join(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    assert_eq!(listener.state(), ListenerState::Listening);
    assert!(listener.is_active());
    assert!(eventually(|| host.listener_count() == 1).await);

    host.end().await;

    assert!(eventually(|| calls.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(listener.state(), ListenerState::HostLeft);
    assert!(!listener.is_active());

    listener.leave().await;
    assert_eq!(listener.state(), ListenerState::Idle);
    assert_eq!(hub.member_count("room"), 0);
}

#[tokio::test]
async fn host_crash_is_seen_through_presence() {
    let backend = OfflineBackend::new();
    let hub = LocalHub::new();

    let mut host = host_session(&backend, &hub);
    host.go_live().await.unwrap();

    let mut listener = listener_session(&backend, &hub, "listener");
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    listener
        .join(move || {
            let _ = tx.send(());
        })
        .await
        .unwrap();

    // No host_left broadcast: the host's channel simply goes away
    drop(host);

    assert_eq!(rx.recv().await, Some(()));
    assert_eq!(listener.state(), ListenerState::HostLeft);
    assert!(!listener.is_active());
}

#[tokio::test]
async fn closed_room_puts_listener_in_error() {
    let backend = OfflineBackend::new();
    let hub = LocalHub::new();
    hub.close_topic("room");

    let mut listener = listener_session(&backend, &hub, "listener");
    assert!(listener.join(|| {}).await.is_err());
    assert!(matches!(listener.state(), ListenerState::Error(_)));
    assert!(!listener.is_active());

    listener.leave().await;
    assert_eq!(listener.state(), ListenerState::Idle);
}

#[tokio::test]
async fn closing_the_room_mid_session_disconnects_listener_once() {
    let backend = OfflineBackend::new();
    let hub = LocalHub::new();

    let mut host = host_session(&backend, &hub);
    host.go_live().await.unwrap();

    let mut listener = listener_session(&backend, &hub, "listener");
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    listener
        .join(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    assert!(eventually(|| host.listener_count() == 1).await);

    // No host_left and no presence leave: the transport goes away underneath
    hub.close_topic("room");

    assert!(eventually(|| calls.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(listener.state(), ListenerState::HostLeft);
    assert!(!listener.is_active());
    assert!(!backend.playback_connected());

    listener.leave().await;
    host.end().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn host_can_go_live_once_microphone_is_granted() {
    let backend = OfflineBackend::new();
    let hub = LocalHub::new();
    let mut host = host_session(&backend, &hub);

    backend.deny_microphone();
    assert!(host.go_live().await.is_err());
    assert!(!host.is_live());
    assert_eq!(backend.live_tracks(), 0);

    backend.allow_microphone();
    host.go_live().await.unwrap();
    assert!(host.is_live());
    assert!(host.is_active());
    assert_eq!(backend.live_tracks(), 1);

    host.end().await;
}

#[tokio::test]
async fn unmute_continues_the_sequence() {
    let backend = OfflineBackend::new();
    let hub = LocalHub::new();

    let mut host = host_session(&backend, &hub);
    host.go_live().await.unwrap();
    let mut listener = listener_session(&backend, &hub, "listener");
    listener.join(|| {}).await.unwrap();

    backend.render_input(&[0.5; CHUNK]);
    assert!(eventually(|| listener.stats().chunks_received == 1).await);

    host.set_muted(true).unwrap();
    assert!(!backend.render_input(&[0.5; CHUNK]));
    assert_eq!(backend.live_tracks(), 0);

    host.set_muted(false).unwrap();
    backend.render_input(&[0.25; CHUNK]);
    assert!(eventually(|| listener.stats().chunks_received == 2).await);

    let stats = listener.stats();
    assert_eq!(stats.stale, 0);
    assert_eq!(stats.lost, 0);

    let output = backend.render_output(2 * CHUNK);
    assert_eq!(output[0], 0.5);
    assert_eq!(output[CHUNK], 0.25);

    host.end().await;
    listener.leave().await;
}
