//! Session controller integration tests
//!
//! Drives the controller against fake devices and a fake transport, so no
//! audio hardware or network is needed.

use std::time::Duration;

use elio_live::live::InboundMessage;
use elio_live::session::ConnectionState;
use elio_live::Error;
use tokio_test::{assert_err, assert_ok, assert_pending, assert_ready_eq};

mod common;

use common::{OpenBehavior, Rig, speech_chunk, test_config};

#[tokio::test]
async fn test_connect_waits_for_open_acknowledgement() {
    let mut rig = Rig::new();
    rig.controller.connect().await.unwrap();

    assert_eq!(rig.controller.state(), ConnectionState::Connecting);
    assert_eq!(rig.handle.state(), ConnectionState::Connecting);
    assert!(rig.controller.session_id().is_some());

    rig.transport.push(InboundMessage::Opened);
    rig.step().await;
    assert_eq!(rig.handle.state(), ConnectionState::Connected);

    let log = rig.transport.log.lock().unwrap();
    assert_eq!(log.opened, 1);
    assert_eq!(log.setups[0].voice, "Fenrir");
}

#[tokio::test]
async fn test_three_chunks_are_gapless_from_clock_zero() {
    let mut rig = Rig::connected().await;

    for _ in 0..3 {
        rig.transport.push(speech_chunk(500));
    }
    rig.steps(3).await;

    let spans: Vec<_> = rig
        .controller
        .scheduled()
        .iter()
        .map(|e| (e.start, e.end))
        .collect();
    assert_eq!(
        spans,
        vec![
            (Duration::ZERO, Duration::from_millis(500)),
            (Duration::from_millis(500), Duration::from_millis(1000)),
            (Duration::from_millis(1000), Duration::from_millis(1500)),
        ]
    );

    let started = rig.devices.log.lock().unwrap().started.clone();
    assert_eq!(started.len(), 3);
    assert!(started.iter().all(|(_, frames)| *frames == 12_000));
}

#[tokio::test]
async fn test_finished_chunks_leave_active_set() {
    let mut rig = Rig::connected().await;
    rig.transport.push(speech_chunk(500));
    rig.transport.push(speech_chunk(500));
    rig.steps(2).await;

    let ids: Vec<_> = rig.devices.started().iter().map(|e| e.id).collect();
    rig.devices.clock.set(Duration::from_millis(1000));
    rig.devices.finish(ids[0]);
    rig.devices.finish(ids[1]);
    rig.steps(2).await;

    assert!(rig.controller.scheduled().is_empty());
}

#[tokio::test]
async fn test_late_chunk_starts_at_clock() {
    let mut rig = Rig::connected().await;
    rig.transport.push(speech_chunk(500));
    rig.step().await;

    // Underrun: the next chunk arrives after the first finished
    rig.devices.clock.set(Duration::from_millis(800));
    rig.transport.push(speech_chunk(500));
    rig.step().await;

    let started = rig.devices.started();
    assert_eq!(started[1].start, Duration::from_millis(800));
    assert_eq!(started[1].end, Duration::from_millis(1300));
}

#[tokio::test]
async fn test_muted_capture_transmits_nothing() {
    let mut rig = Rig::connected().await;

    assert!(rig.handle.toggle_mute());
    for seq in 0..5 {
        rig.devices.capture(seq);
    }
    rig.steps(5).await;
    assert_eq!(rig.transport.sent(), 0);
    assert_eq!(rig.handle.state(), ConnectionState::Connected);

    assert!(!rig.handle.toggle_mute());
    rig.devices.capture(5);
    rig.step().await;
    assert_eq!(rig.transport.sent(), 1);
}

#[tokio::test]
async fn test_frames_transmitted_in_capture_order() {
    let mut rig = Rig::connected().await;
    for seq in 0..4 {
        rig.devices.capture(seq);
    }
    rig.steps(4).await;

    let log = rig.transport.log.lock().unwrap();
    assert_eq!(log.sent.len(), 4);
    assert!(log.sent.iter().all(|f| f.mime_type == "audio/pcm;rate=16000"));
    assert_eq!(rig.controller.frames_sent(), 4);
}

#[tokio::test]
async fn test_frames_before_open_are_not_sent() {
    let mut rig = Rig::new();
    rig.controller.connect().await.unwrap();
    rig.devices.capture(0);
    rig.step().await;
    assert_eq!(rig.transport.sent(), 0);
}

#[tokio::test]
async fn test_start_muted_from_config() {
    let mut config = test_config();
    config.audio.start_muted = true;
    let rig = Rig::with_config(config);
    assert!(rig.handle.is_muted());
}

#[tokio::test]
async fn test_interruption_mid_chunk_two_cancels_rest() {
    let mut rig = Rig::connected().await;
    for _ in 0..3 {
        rig.transport.push(speech_chunk(500));
    }
    rig.steps(3).await;
    let ids: Vec<_> = rig.devices.started().iter().map(|e| e.id).collect();

    // Chunk 1 done, chunk 2 playing
    rig.devices.clock.set(Duration::from_millis(700));
    rig.devices.finish(ids[0]);
    rig.step().await;

    rig.transport.push(InboundMessage::Interrupted);
    rig.step().await;

    assert_eq!(rig.devices.stopped(), vec![ids[1], ids[2]]);
    assert!(rig.controller.scheduled().is_empty());
    assert_eq!(rig.handle.state(), ConnectionState::Connected);

    // Fresh speech starts right away
    rig.transport.push(speech_chunk(500));
    rig.step().await;
    assert_eq!(rig.controller.scheduled()[0].start, Duration::from_millis(700));
}

#[tokio::test]
async fn test_bad_chunk_is_dropped_and_session_continues() {
    let mut rig = Rig::connected().await;
    rig.transport.push(InboundMessage::AudioDelivery {
        data: "AQID".to_string(),
    });
    rig.transport.push(speech_chunk(100));
    rig.steps(2).await;

    assert_eq!(rig.handle.state(), ConnectionState::Connected);
    assert_eq!(rig.devices.started().len(), 1);
}

#[tokio::test]
async fn test_disconnect_twice_is_noop() {
    let mut rig = Rig::connected().await;
    rig.transport.push(speech_chunk(500));
    rig.step().await;

    rig.controller.disconnect();
    assert_eq!(rig.controller.state(), ConnectionState::Disconnected);
    assert!(rig.devices.all_released());
    assert_eq!(rig.transport.closed(), 1);
    assert_eq!(rig.devices.stopped().len(), 1);

    rig.controller.disconnect();
    assert_eq!(rig.controller.state(), ConnectionState::Disconnected);
    assert_eq!(rig.transport.closed(), 1);
    assert!(rig.controller.session_id().is_none());
}

#[tokio::test]
async fn test_disconnect_through_handle() {
    let mut rig = Rig::connected().await;
    rig.handle.disconnect().unwrap();
    rig.step().await;
    assert_eq!(rig.handle.state(), ConnectionState::Disconnected);
    assert!(rig.devices.all_released());
}

#[tokio::test]
async fn test_connect_through_handle_publishes_states() {
    let mut rig = Rig::new();
    let mut states = rig.handle.subscribe();

    rig.handle.connect().unwrap();
    rig.step().await;
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connecting);

    rig.transport.push(InboundMessage::Opened);
    rig.step().await;
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_while_connected_is_rejected() {
    let mut rig = Rig::connected().await;
    let err = rig.controller.connect().await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            state: ConnectionState::Connected,
            ..
        }
    ));
    assert_eq!(rig.transport.log.lock().unwrap().opened, 1);
}

#[tokio::test]
async fn test_microphone_failure_releases_output() {
    let mut rig = Rig::new();
    rig.devices.log.lock().unwrap().fail_microphone = true;

    let err = rig.controller.connect().await.unwrap_err();
    assert!(matches!(err, Error::Acquisition(_)));
    assert_eq!(rig.handle.state(), ConnectionState::Error);

    let log = rig.devices.log.lock().unwrap();
    assert_eq!(log.outputs_opened, 1);
    assert_eq!(log.outputs_closed, 1);
    assert_eq!(log.microphones_acquired, 0);
    drop(log);
    assert_eq!(rig.transport.log.lock().unwrap().opened, 0);
}

#[tokio::test]
async fn test_failed_connect_publishes_error_to_watchers() {
    let mut rig = Rig::new();
    rig.devices.log.lock().unwrap().fail_microphone = true;
    let mut states = rig.handle.subscribe();

    assert_ok!(rig.handle.connect());
    rig.step().await;

    // CONNECTING was replaced before the watcher looked
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), ConnectionState::Error);
    assert!(rig.devices.all_released());
}

#[tokio::test]
async fn test_step_waits_for_events() {
    let mut rig = Rig::connected().await;
    {
        let mut step = tokio_test::task::spawn(rig.controller.step());
        assert_pending!(step.poll());
    }

    rig.transport.push(speech_chunk(100));
    {
        let mut step = tokio_test::task::spawn(rig.controller.step());
        assert_ready_eq!(step.poll(), true);
    }
    assert_eq!(rig.devices.started().len(), 1);
}

#[tokio::test]
async fn test_transport_failure_releases_devices() {
    let mut rig = Rig::new();
    rig.transport.log.lock().unwrap().behavior = OpenBehavior::Fail;

    let err = rig.controller.connect().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(rig.handle.state(), ConnectionState::Error);
    assert!(rig.devices.all_released());
}

#[tokio::test]
async fn test_reconnect_after_error() {
    let mut rig = Rig::new();
    rig.devices.log.lock().unwrap().fail_output = true;
    assert!(rig.controller.connect().await.is_err());
    assert_eq!(rig.controller.state(), ConnectionState::Error);

    rig.devices.log.lock().unwrap().fail_output = false;
    rig.controller.connect().await.unwrap();
    rig.transport.push(InboundMessage::Opened);
    rig.step().await;
    assert_eq!(rig.controller.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_disconnect_from_error_resets_state() {
    let mut rig = Rig::new();
    rig.devices.log.lock().unwrap().fail_output = true;
    assert!(rig.controller.connect().await.is_err());

    rig.controller.disconnect();
    assert_eq!(rig.controller.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_peer_close_disconnects() {
    let mut rig = Rig::connected().await;
    rig.transport.push(speech_chunk(500));
    rig.step().await;

    rig.transport.push(InboundMessage::Closed {
        reason: Some("session expired".to_string()),
    });
    rig.step().await;

    assert_eq!(rig.handle.state(), ConnectionState::Disconnected);
    assert!(rig.devices.all_released());
    assert_eq!(rig.transport.closed(), 1);
    assert_eq!(rig.devices.stopped().len(), 1);
}

#[tokio::test]
async fn test_stream_error_moves_to_error_with_cleanup() {
    let mut rig = Rig::connected().await;
    rig.transport
        .push(InboundMessage::Error("connection reset".to_string()));
    rig.step().await;

    assert_eq!(rig.handle.state(), ConnectionState::Error);
    assert!(rig.devices.all_released());
    assert_eq!(rig.handle.amplitude(), 0.0);
}

#[tokio::test]
async fn test_dropped_stream_counts_as_close() {
    let mut rig = Rig::connected().await;
    rig.transport.log.lock().unwrap().inbound = None;
    rig.step().await;
    assert_eq!(rig.handle.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_without_acknowledgement() {
    let mut config = test_config();
    config.connect_timeout = Some(Duration::from_secs(2));
    let mut rig = Rig::with_config(config);

    rig.controller.connect().await.unwrap();
    assert_eq!(rig.controller.state(), ConnectionState::Connecting);

    rig.step().await;
    assert_eq!(rig.controller.state(), ConnectionState::Error);
    assert!(rig.devices.all_released());
    assert_eq!(rig.transport.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_while_opening() {
    let mut config = test_config();
    config.connect_timeout = Some(Duration::from_secs(2));
    let mut rig = Rig::with_config(config);
    rig.transport.log.lock().unwrap().behavior = OpenBehavior::Hang;

    let err = rig.controller.connect().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert_eq!(rig.controller.state(), ConnectionState::Error);
    assert!(rig.devices.all_released());
}

#[tokio::test(start_paused = true)]
async fn test_amplitude_follows_output_tap() {
    let mut config = test_config();
    config.audio.amplitude_interval = Duration::from_millis(16);
    let mut rig = Rig::with_config(config);
    rig.controller.connect().await.unwrap();
    rig.transport.push(InboundMessage::Opened);
    rig.step().await;

    // Silence reads as the floor
    rig.step().await;
    assert_eq!(rig.handle.amplitude(), 0.0);

    let tone: Vec<f32> = (0..256)
        .map(|i| (i as f32 * 0.3).sin() * 0.8)
        .collect();
    rig.devices.tap.push(&tone);
    rig.steps(3).await;
    assert!(rig.handle.amplitude() > 0.0);

    rig.controller.disconnect();
    assert_eq!(rig.handle.amplitude(), 0.0);
}

#[tokio::test]
async fn test_shutdown_stops_run() {
    let rig = Rig::connected().await;
    let Rig {
        controller,
        handle,
        devices,
        transport,
    } = rig;

    handle.shutdown().unwrap();
    controller.run().await;

    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(devices.all_released());
    assert_eq!(transport.closed(), 1);
    assert_err!(handle.connect());
}
