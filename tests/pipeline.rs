mod common;

use common::*;
use deckinput::{
    ControllerError, ControllerHandle, Diagnostic, Field, FieldChange, FieldValue, InputLoop,
    ListenerError, Polling, RawReportConfig, SourceMessage,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LEFT_STICK_X: usize = 48;
const LEFT_PAD_X: usize = 16;

fn a_pressed(report: &mut Vec<u8>) {
    report[8] |= 1 << 7;
}

fn polling_loop(platform: ScriptedPlatform) -> (InputLoop<Polling>, Recorder) {
    let recorder = Recorder::default();
    let mut input = InputLoop::create(test_config(), Box::new(platform)).unwrap();
    input.add_listener(recorder.clone());
    (input.initialize().unwrap(), recorder)
}

#[tokio::test]
async fn test_press_hold_and_stick_move() {
    let platform = ScriptedPlatform::new().script(
        HIDRAW,
        vec![
            Step::Messages(vec![SourceMessage::Report(blank_report())]),
            Step::Messages(vec![report_with(a_pressed)]),
            Step::Messages(vec![report_with(a_pressed)]),
            Step::Messages(vec![report_with(|r| {
                a_pressed(r);
                set_axis(r, LEFT_STICK_X, 500);
            })]),
        ],
    );
    let (mut input, recorder) = polling_loop(platform);

    // First report: every decoded field is observed for the first time.
    assert_eq!(input.tick(), 36);
    assert_eq!(recorder.count("A", "false"), 1);
    recorder.clear();

    assert_eq!(input.tick(), 1);
    assert_eq!(recorder.values(), vec![("A".to_string(), "true".to_string())]);

    assert_eq!(input.tick(), 0);
    assert_eq!(recorder.count("A", "true"), 1);

    assert_eq!(input.tick(), 1);
    assert_eq!(recorder.count("LEFT_STICK_X", "500"), 1);
    assert_eq!(input.snapshot().get(Field::A), FieldValue::Button(true));
    assert_eq!(input.snapshot().get(Field::LeftStickX), FieldValue::Axis(500));
}

#[tokio::test]
async fn test_axis_jitter_is_filtered_against_last_reported_value() {
    let axis = |value: i16| Step::Messages(vec![report_with(move |r| set_axis(r, LEFT_STICK_X, value))]);
    let pad = |value: i16| Step::Messages(vec![report_with(move |r| set_axis(r, LEFT_PAD_X, value))]);
    let platform = ScriptedPlatform::new().script(
        HIDRAW,
        vec![
            axis(0),
            axis(150),
            axis(300),
            axis(200),
            pad(0),
            pad(100),
            pad(101),
        ],
    );
    let (mut input, recorder) = polling_loop(platform);

    input.tick();
    recorder.clear();

    // 150 is under the stick threshold, but the state still tracks it.
    assert_eq!(input.tick(), 0);
    assert_eq!(input.snapshot().get(Field::LeftStickX), FieldValue::Axis(150));

    // Drift accumulates against the last dispatched value (0), not the last read.
    assert_eq!(input.tick(), 1);
    assert_eq!(recorder.count("LEFT_STICK_X", "300"), 1);

    // |200 - 300| == 100, not significant.
    assert_eq!(input.tick(), 0);

    // Stick back to 0 (|0 - 300| > 200) while the pad stays at 0.
    recorder.clear();
    input.tick();
    assert_eq!(recorder.count("LEFT_STICK_X", "0"), 1);

    // Pad threshold is strict: 100 is not enough, 101 is.
    assert_eq!(input.tick(), 0);
    assert_eq!(input.tick(), 1);
    assert_eq!(recorder.count("LEFT_PAD_X", "101"), 1);
}

#[tokio::test]
async fn test_key_and_report_paths_merge_independently() {
    let platform = ScriptedPlatform::new()
        .script(
            KEYS,
            vec![
                Step::Messages(vec![power(true), volume_up(true)]),
                Step::Messages(vec![]),
                Step::Messages(vec![power(false)]),
            ],
        )
        .script(
            HIDRAW,
            vec![
                Step::Messages(vec![]),
                Step::Messages(vec![report_with(a_pressed)]),
                Step::Messages(vec![report_with(a_pressed)]),
            ],
        );
    let (mut input, recorder) = polling_loop(platform);

    assert_eq!(input.tick(), 2);
    assert_eq!(recorder.count("POWER", "true"), 1);
    assert_eq!(recorder.count("VOLUME_UP", "true"), 1);

    // A report never touches the key fields.
    input.tick();
    let snapshot = input.snapshot();
    assert_eq!(snapshot.get(Field::Power), FieldValue::Button(true));
    assert_eq!(snapshot.get(Field::VolumeUp), FieldValue::Button(true));
    assert_eq!(snapshot.get(Field::A), FieldValue::Button(true));
    assert_eq!(snapshot.observed(Field::VolumeDown), None);

    // And a key event never touches report fields.
    recorder.clear();
    assert_eq!(input.tick(), 1);
    assert_eq!(recorder.values(), vec![("POWER".to_string(), "false".to_string())]);
    assert_eq!(input.snapshot().get(Field::A), FieldValue::Button(true));
}

#[tokio::test]
async fn test_events_from_grab_only_devices_are_ignored() {
    let platform = ScriptedPlatform::new()
        .script(GRAB_ONLY, vec![Step::Messages(vec![power(true)])])
        .script(KEYS, vec![Step::Messages(vec![])]);
    let (mut input, recorder) = polling_loop(platform);

    assert_eq!(input.tick(), 0);
    assert!(recorder.changes().is_empty());
    assert_eq!(input.snapshot().observed(Field::Power), None);
}

fn sequence_with_failing_first_listener(fail: bool) -> Vec<(String, String)> {
    let platform = ScriptedPlatform::new()
        .script(KEYS, vec![Step::Messages(vec![power(true)]), Step::Messages(vec![power(false)])])
        .script(HIDRAW, vec![Step::Messages(vec![report_with(a_pressed)])]);
    let mut input = InputLoop::create(test_config(), Box::new(platform)).unwrap();
    if fail {
        input.add_listener(|_: &FieldChange| -> Result<(), ListenerError> {
            Err(ListenerError::new("refused"))
        });
    }
    let recorder = Recorder::default();
    input.add_listener(recorder.clone());
    let mut input = input.initialize().unwrap();
    input.tick();
    input.tick();
    recorder.values()
}

#[tokio::test]
async fn test_failing_listener_does_not_affect_later_listeners() {
    let alone = sequence_with_failing_first_listener(false);
    let behind_failure = sequence_with_failing_first_listener(true);
    assert!(!alone.is_empty());
    assert_eq!(alone, behind_failure);
}

#[tokio::test]
async fn test_panicking_listener_is_reported() {
    let platform = ScriptedPlatform::new().script(KEYS, vec![Step::Messages(vec![power(true)])]);
    let mut input = InputLoop::create(test_config(), Box::new(platform)).unwrap();
    let mut diagnostics = input.handle().diagnostics();
    input.add_listener(|_: &FieldChange| -> Result<(), ListenerError> { panic!("listener bug") });
    let recorder = Recorder::default();
    input.add_listener(recorder.clone());
    let mut input = input.initialize().unwrap();

    assert_eq!(input.tick(), 1);
    assert_eq!(recorder.count("POWER", "true"), 1);
    assert_eq!(input.stats().callback_failures, 1);

    match diagnostics.try_recv() {
        Ok(Diagnostic::CallbackFailure { field, message, .. }) => {
            assert_eq!(field, Field::Power);
            assert!(message.contains("listener bug"));
        }
        other => panic!("unexpected diagnostic: {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_report_is_skipped_and_loop_continues() {
    let mut bad_header = blank_report();
    bad_header[2] = 0x42;
    let platform = ScriptedPlatform::new().script(
        HIDRAW,
        vec![
            Step::Messages(vec![SourceMessage::Report(vec![0x01, 0x00, 0x09])]),
            Step::Messages(vec![SourceMessage::Report(bad_header)]),
            Step::Messages(vec![report_with(a_pressed)]),
        ],
    );
    let mut input = InputLoop::create(test_config(), Box::new(platform)).unwrap();
    let mut diagnostics = input.handle().diagnostics();
    let recorder = Recorder::default();
    input.add_listener(recorder.clone());
    let mut input = input.initialize().unwrap();

    assert_eq!(input.tick(), 0);
    assert_eq!(input.tick(), 0);
    assert!(input.snapshot().is_empty());
    assert!(matches!(
        diagnostics.try_recv(),
        Ok(Diagnostic::MalformedReport { ref path, .. }) if path == HIDRAW
    ));
    assert!(matches!(
        diagnostics.try_recv(),
        Ok(Diagnostic::MalformedReport { .. })
    ));

    input.tick();
    assert_eq!(recorder.count("A", "true"), 1);
    assert_eq!(input.stats().malformed_reports, 2);
}

#[tokio::test]
async fn test_required_device_unavailable_releases_opened_sources() {
    let platform = ScriptedPlatform::new().unavailable(HIDRAW);
    let journal = platform.journal.clone();

    let result = InputLoop::create(test_config(), Box::new(platform))
        .unwrap()
        .start()
        .await;

    match result {
        Err(ControllerError::DeviceUnavailable { path, .. }) => assert_eq!(path, HIDRAW),
        other => panic!("expected DeviceUnavailable, got {:?}", other),
    }
    // Both event devices were opened before the failure and released exactly once,
    // newest first.
    assert_eq!(journal.releases(), vec![GRAB_ONLY.to_string(), KEYS.to_string()]);
}

#[tokio::test]
async fn test_optional_device_unavailable_runs_degraded() {
    let platform = ScriptedPlatform::new()
        .unavailable(GRAB_ONLY)
        .script(KEYS, vec![Step::Messages(vec![power(true)])]);
    let mut input = InputLoop::create(test_config(), Box::new(platform)).unwrap();
    let mut diagnostics = input.handle().diagnostics();
    let recorder = Recorder::default();
    input.add_listener(recorder.clone());
    let mut input = input.initialize().unwrap();

    assert!(matches!(
        diagnostics.try_recv(),
        Ok(Diagnostic::SourceDegraded { ref path, .. }) if path == GRAB_ONLY
    ));
    assert_eq!(input.stats().degraded_sources, vec![GRAB_ONLY.to_string()]);
    assert_eq!(input.tick(), 1);
    assert_eq!(recorder.count("POWER", "true"), 1);
}

#[tokio::test]
async fn test_read_failures_are_retried_then_disconnect() {
    let platform = ScriptedPlatform::new()
        .script(
            KEYS,
            vec![
                Step::Fail,
                Step::Fail,
                Step::Messages(vec![power(true)]),
                Step::Fail,
                Step::Fail,
                Step::Fail,
                Step::Messages(vec![power(false)]),
            ],
        )
        .script(
            HIDRAW,
            vec![
                Step::Messages(vec![]),
                Step::Messages(vec![]),
                Step::Messages(vec![]),
                Step::Messages(vec![]),
                Step::Messages(vec![]),
                Step::Messages(vec![]),
                Step::Messages(vec![report_with(a_pressed)]),
            ],
        );
    let journal = platform.journal.clone();
    let (mut input, recorder) = polling_loop(platform);

    // Two failures stay under the budget of three; the source recovers.
    input.tick();
    input.tick();
    input.tick();
    assert_eq!(recorder.count("POWER", "true"), 1);
    assert_eq!(input.stats().read_errors, 2);

    // Three in a row exhaust it.
    input.tick();
    input.tick();
    input.tick();
    assert_eq!(input.stats().disconnected_sources, vec![KEYS.to_string()]);
    assert_eq!(journal.releases(), vec![KEYS.to_string()]);

    // The remaining sources are still served; the dropped one is not read again.
    input.tick();
    assert_eq!(recorder.count("A", "true"), 1);
    assert_eq!(recorder.count("POWER", "false"), 0);

    input.cancellation_token().cancel();
    let report = input.run().await.shutdown().into_report();
    assert_eq!(report.released_sources, 2);
    assert_eq!(
        journal.releases(),
        vec![KEYS.to_string(), HIDRAW.to_string(), GRAB_ONLY.to_string()]
    );
}

#[tokio::test]
async fn test_vanished_source_disconnects_immediately() {
    let platform = ScriptedPlatform::new().script(KEYS, vec![Step::Gone]);
    let (mut input, _recorder) = polling_loop(platform);

    input.tick();
    assert_eq!(input.stats().disconnected_sources, vec![KEYS.to_string()]);
}

#[tokio::test]
async fn test_cancellation_stops_within_one_tick_and_releases_in_reverse() {
    let platform = ScriptedPlatform::new();
    let journal = platform.journal.clone();
    let config = deckinput::ControllerConfig {
        tick_interval_ms: 60_000,
        ..test_config()
    };
    let (handle, task) = ControllerHandle::spawn(config, Box::new(platform)).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();

    let report = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("loop did not stop after cancellation")
        .unwrap()
        .unwrap();

    assert_eq!(report.released_sources, 3);
    assert_eq!(
        journal.releases(),
        vec![HIDRAW.to_string(), GRAB_ONLY.to_string(), KEYS.to_string()]
    );
}

#[tokio::test]
async fn test_start_runs_script_to_completion() {
    let cancel = CancellationToken::new();
    let platform = ScriptedPlatform::new()
        .script(KEYS, vec![Step::Messages(vec![power(true)]), Step::Messages(vec![power(false)])])
        .script(HIDRAW, vec![Step::Messages(vec![report_with(a_pressed)])])
        .cancel_when_exhausted(cancel.clone());

    let recorder = Recorder::default();
    let mut input = InputLoop::create(test_config(), Box::new(platform))
        .unwrap()
        .with_cancellation(cancel);
    input.add_listener(recorder.clone());

    let report = tokio::time::timeout(Duration::from_secs(5), input.start())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(recorder.count("POWER", "true"), 1);
    assert_eq!(recorder.count("POWER", "false"), 1);
    assert_eq!(recorder.count("A", "true"), 1);
    assert_eq!(report.opened_sources.len(), 3);
    assert_eq!(report.dispatched as usize, recorder.changes().len());
}

#[tokio::test]
async fn test_handle_subscribes_and_unsubscribes_live() {
    let platform = ScriptedPlatform::new().script(
        KEYS,
        vec![
            Step::Messages(vec![power(true)]),
            Step::Messages(vec![power(false)]),
            Step::Messages(vec![power(true)]),
        ],
    );
    let input = InputLoop::create(test_config(), Box::new(platform)).unwrap();
    let handle = input.handle();
    let mut watch = handle.watch_state();
    let mut input = input.initialize().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let id = handle
        .add_listener(move |change: &FieldChange| -> Result<(), ListenerError> {
            sink.lock().unwrap().push(change.value);
            Ok(())
        })
        .unwrap();

    // The subscription is applied at the start of the next tick.
    input.tick();
    assert_eq!(*seen.lock().unwrap(), vec![FieldValue::Button(true)]);
    assert!(watch.has_changed().unwrap());
    assert_eq!(
        watch.borrow_and_update().get(Field::Power),
        FieldValue::Button(true)
    );
    assert_eq!(handle.snapshot().get(Field::Power), FieldValue::Button(true));

    handle.remove_listener(id).unwrap();
    input.tick();
    input.tick();
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(handle.snapshot().get(Field::Power), FieldValue::Button(true));
}

#[tokio::test]
async fn test_optional_raw_report_device() {
    let platform = ScriptedPlatform::new()
        .unavailable(HIDRAW)
        .script(KEYS, vec![Step::Messages(vec![volume_up(true)])]);
    let config = deckinput::ControllerConfig {
        raw_report: Some(RawReportConfig {
            path: HIDRAW.to_string(),
            optional: true,
        }),
        ..test_config()
    };
    let mut input = InputLoop::create(config, Box::new(platform))
        .unwrap()
        .initialize()
        .unwrap();

    assert_eq!(input.tick(), 1);
    assert_eq!(input.stats().opened_sources.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawned_loop_delivers_initialization_diagnostics() {
    let platform = ScriptedPlatform::new().unavailable(GRAB_ONLY);
    let (handle, task) = ControllerHandle::spawn(test_config(), Box::new(platform)).unwrap();

    // Let the loop open its sources before anyone subscribes.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut diagnostics = handle.diagnostics();

    match tokio::time::timeout(Duration::from_secs(1), diagnostics.recv()).await {
        Ok(Ok(Diagnostic::SourceDegraded { path, .. })) => assert_eq!(path, GRAB_ONLY),
        other => panic!("expected SourceDegraded, got {:?}", other),
    }

    handle.cancel();
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.degraded_sources, vec![GRAB_ONLY.to_string()]);
}

#[tokio::test]
async fn test_drain_bound_spreads_messages_across_ticks_in_order() {
    let platform = ScriptedPlatform::new().script(
        KEYS,
        vec![Step::Messages(vec![
            power(true),
            power(false),
            power(true),
            volume_up(true),
            volume_up(false),
        ])],
    );
    let config = deckinput::ControllerConfig {
        max_messages_per_tick: 2,
        ..test_config()
    };
    let recorder = Recorder::default();
    let mut input = InputLoop::create(config, Box::new(platform)).unwrap();
    input.add_listener(recorder.clone());
    let mut input = input.initialize().unwrap();

    assert_eq!(input.tick(), 2);
    assert_eq!(input.tick(), 2);
    assert_eq!(input.tick(), 1);
    assert_eq!(input.tick(), 0);
    assert_eq!(input.stats().messages, 5);

    let expected = [
        ("POWER", "true"),
        ("POWER", "false"),
        ("POWER", "true"),
        ("VOLUME_UP", "true"),
        ("VOLUME_UP", "false"),
    ]
    .iter()
    .map(|(f, v)| (f.to_string(), v.to_string()))
    .collect::<Vec<_>>();
    assert_eq!(recorder.values(), expected);
}

#[tokio::test]
async fn test_loop_keeps_running_after_every_source_is_lost() {
    let platform = ScriptedPlatform::new()
        .script(KEYS, vec![Step::Gone])
        .script(GRAB_ONLY, vec![Step::Gone])
        .script(HIDRAW, vec![Step::Fail, Step::Fail, Step::Fail]);
    let journal = platform.journal.clone();
    let (mut input, _recorder) = polling_loop(platform);
    assert_eq!(input.active_sources(), 3);

    input.tick();
    assert_eq!(input.active_sources(), 1);
    input.tick();
    input.tick();
    assert_eq!(input.active_sources(), 0);
    assert_eq!(input.stats().disconnected_sources.len(), 3);

    assert_eq!(input.tick(), 0);
    assert_eq!(input.stats().ticks, 4);

    input.cancellation_token().cancel();
    let report = input.run().await.shutdown().into_report();
    assert_eq!(report.released_sources, 0);
    assert_eq!(journal.releases().len(), 3);
}
