//! Shared harness: a leveling engine wired to the simulated rig.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use plumbline::settings::SettingsDoc;
use plumbline::sim::{SimClock, SimRig};
use plumbline::{EngineEvent, LevelingEngine, RelayPins, SettingsStore, SharedTransport};

pub struct TestRig {
    pub engine: LevelingEngine,
    pub rig: SimRig,
}

/// Engine over a simulated rig with a linear count model and the factory
/// presets. `rate` is minutes of arc moved per second of pulse; a rate of
/// zero simulates stuck actuators.
pub fn sim_engine(rate: f64) -> TestRig {
    let _ = env_logger::builder().is_test(true).try_init();

    let settings_path = std::env::temp_dir().join(format!(
        "plumbline_it_{}.json",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));

    let mut doc = SettingsDoc::seed();
    let points = SimRig::calibration_points();
    doc.sensor_setup.pitch_raw = points.iter().map(|p| p.0).collect();
    doc.sensor_setup.pitch_minutes = points.iter().map(|p| p.1).collect();
    doc.sensor_setup.roll_raw = doc.sensor_setup.pitch_raw.clone();
    doc.sensor_setup.roll_minutes = doc.sensor_setup.pitch_minutes.clone();
    doc.sensor_setup.order = 1;
    std::fs::write(&settings_path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
    let settings = SettingsStore::load(settings_path.clone()).unwrap();

    let clock = Arc::new(SimClock::new());
    let rig = SimRig::new(RelayPins::default(), rate, clock.clone());
    let transport: SharedTransport = Arc::new(Mutex::new(rig.adc()));
    let engine = LevelingEngine::new(
        settings,
        transport,
        Box::new(rig.switch_bank()),
        RelayPins::default(),
        clock.clone(),
    )
    .unwrap();

    TestRig { engine, rig }
}

/// Record every emitted event for later assertions.
pub fn record_events(engine: &LevelingEngine) -> Arc<Mutex<Vec<EngineEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.register_callback(move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    events
}
