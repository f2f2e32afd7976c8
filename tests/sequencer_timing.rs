use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use opends4::{
    Animation, Button, Channel, ImuMode, InputReport, Pose, ReportPump, Sequencer,
    SequencerSettings, StateTracker, Target, TransferStatus, TriggerSide,
};

fn running() -> (Arc<StateTracker>, Sequencer) {
    let tracker = Arc::new(StateTracker::new());
    let sequencer = Sequencer::new(tracker.clone(), SequencerSettings::default());
    sequencer.start().unwrap();
    (tracker, sequencer)
}

// Polls the pump like a host would and keeps every decoded report
fn spawn_host(
    tracker: Arc<StateTracker>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<Vec<InputReport>> {
    thread::spawn(move || {
        let pump = ReportPump::new(tracker);
        let mut reports = vec![InputReport::from_bytes(&pump.first_report()).unwrap()];
        while !stop.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
            if let Some(bytes) = pump.on_in_complete(TransferStatus::Completed).unwrap() {
                reports.push(InputReport::from_bytes(&bytes).unwrap());
            }
        }
        reports
    })
}

#[test]
fn concurrent_callers_on_distinct_channels() {
    let (tracker, sequencer) = running();
    let sequencer = Arc::new(sequencer);

    let buttons = [
        Button::Square,
        Button::Cross,
        Button::Circle,
        Button::Triangle,
        Button::L1,
        Button::R1,
        Button::Share,
        Button::Options,
    ];
    let handles: Vec<_> = buttons
        .iter()
        .map(|&button| {
            let sequencer = sequencer.clone();
            thread::spawn(move || {
                sequencer
                    .press(&[Target::Button(button)], Duration::from_millis(150))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    {
        let state = tracker.modify();
        for button in buttons {
            assert!(state.report().button(button), "{:?} not pressed", button);
        }
    }

    thread::sleep(Duration::from_millis(500));
    let state = tracker.modify();
    for button in buttons {
        assert!(!state.report().button(button), "{:?} not released", button);
        assert!(!sequencer.is_active(Channel::Button(button)));
    }
    assert_eq!(sequencer.pending_events(), 0);
}

#[test]
fn repress_is_visible_to_the_host() {
    let (tracker, sequencer) = running();
    let stop = Arc::new(AtomicBool::new(false));
    let host = spawn_host(tracker.clone(), stop.clone());

    let r1 = [Target::Button(Button::R1)];
    sequencer.press(&r1, Duration::from_millis(200)).unwrap();
    thread::sleep(Duration::from_millis(60));
    sequencer.press(&r1, Duration::from_millis(200)).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(tracker.modify().report().button(Button::R1));

    thread::sleep(Duration::from_millis(400));
    stop.store(true, Ordering::SeqCst);
    let reports = host.join().unwrap();

    // Collapse runs: pressed, released, pressed again, released
    let mut edges: Vec<bool> = Vec::new();
    for report in &reports {
        let pressed = report.button(Button::R1);
        if edges.last() != Some(&pressed) {
            edges.push(pressed);
        }
    }
    let first_press = edges.iter().position(|&p| p).unwrap();
    assert_eq!(&edges[first_press..], &[true, false, true, false]);
}

#[test]
fn trigger_tween_is_monotonic_across_reports() {
    let (tracker, sequencer) = running();
    let stop = Arc::new(AtomicBool::new(false));
    let host = spawn_host(tracker.clone(), stop.clone());

    sequencer
        .tween_trigger(
            TriggerSide::Left,
            0.0,
            1.0,
            Animation::new(Duration::from_millis(200)),
        )
        .unwrap();
    thread::sleep(Duration::from_millis(400));
    stop.store(true, Ordering::SeqCst);
    let reports = host.join().unwrap();

    let values: Vec<u8> = reports.iter().map(|r| r.triggers[0]).collect();
    assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", values);
    assert_eq!(values.last(), Some(&255));
    assert!(values.iter().any(|&v| v > 0 && v < 255));
    assert!(!sequencer.is_active(Channel::Trigger(TriggerSide::Left)));
}

#[test]
fn release_leaves_nothing_scheduled() {
    let (tracker, sequencer) = running();
    let r1 = Channel::Button(Button::R1);
    sequencer
        .press(&[Target::Button(Button::R1)], Duration::from_secs(5))
        .unwrap();
    assert!(sequencer.is_active(r1));

    sequencer.release(&[r1]).unwrap();
    assert!(!sequencer.is_active(r1));
    assert_eq!(sequencer.pending_events(), 0);
    assert!(!tracker.modify().report().button(Button::R1));

    thread::sleep(Duration::from_millis(50));
    assert!(!sequencer.is_halted());
}

#[test]
fn attitude_tween_from_a_tilted_pose_settles() {
    let (tracker, sequencer) = running();
    let from = Pose {
        pitch: 30.0,
        ..Default::default()
    };
    let to = Pose {
        pitch: 40.0,
        ..Default::default()
    };
    sequencer
        .tween_attitude(from, to, Animation::new(Duration::from_millis(200)))
        .unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(!sequencer.is_halted(), "{:?}", sequencer.halt_reason());

    thread::sleep(Duration::from_millis(300));
    assert!(!sequencer.is_halted(), "{:?}", sequencer.halt_reason());
    assert!(!sequencer.is_active(Channel::Imu));
    {
        let state = tracker.modify();
        assert_eq!(state.imu().mode(), ImuMode::AttitudePosition);
        assert_eq!(state.imu().pose().1, to);
    }

    let pump = ReportPump::new(tracker);
    for _ in 0..50 {
        let bytes = pump
            .on_in_complete(TransferStatus::Completed)
            .unwrap()
            .unwrap();
        assert_eq!(InputReport::from_bytes(&bytes).unwrap().gyro, [0; 3]);
    }
}

#[test]
fn report_counter_advances_per_submission() {
    let tracker = Arc::new(StateTracker::new());
    let pump = ReportPump::new(tracker);
    let first = InputReport::from_bytes(&pump.first_report()).unwrap();
    let mut expected = first.report_index();
    for _ in 0..100 {
        let bytes = pump
            .on_in_complete(TransferStatus::Completed)
            .unwrap()
            .unwrap();
        expected = (expected + 1) & 0x3f;
        assert_eq!(InputReport::from_bytes(&bytes).unwrap().report_index(), expected);
    }
}
