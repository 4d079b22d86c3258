//! Controller tests with simulated sensors and the file-backed store
//!
//! Run with: cargo test -p abs-tests --test ecu_test

use abs_core::{SystemState, WheelPosition};
use abs_ecu::config::SimulationConfig;
use abs_ecu::{AbsController, EcuConfig, FileStore, SimulatedSensors};
use pretty_assertions::assert_eq;

fn controller(dir: &std::path::Path, simulation: SimulationConfig) -> AbsController {
    let config = EcuConfig {
        simulation: simulation.clone(),
        ..EcuConfig::default()
    };
    AbsController::new(
        &config,
        Box::new(FileStore::new(dir)),
        Box::new(SimulatedSensors::new(simulation)),
    )
}

fn quiet() -> SimulationConfig {
    SimulationConfig {
        noise_kmh: 0.0,
        seed: Some(1),
        ..SimulationConfig::default()
    }
}

#[test]
fn test_written_calibration_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let ecu = controller(dir.path(), quiet());
    assert_eq!(ecu.handle_request(&[0x10, 0x03], 0)[0], 0x50);
    // FR: cf 1.0200, offset 0, 60 pulses/rev, 2100 mm
    let write = [0x2E, 0xF1, 0x11, 0x27, 0xD8, 0x00, 0x00, 0x00, 0x3C, 0x08, 0x34];
    assert_eq!(ecu.handle_request(&write, 10), vec![0x6E, 0xF1, 0x11]);
    drop(ecu);

    let restarted = controller(dir.path(), quiet());
    assert_eq!(
        restarted.handle_request(&[0x22, 0xF1, 0x11], 0),
        vec![0x62, 0xF1, 0x11, 0x27, 0xD8, 0x00, 0x00, 0x00, 0x3C, 0x08, 0x34, 0x01]
    );
}

#[test]
fn test_corrupt_block_falls_back_and_raises_nvm_dtc() {
    let dir = tempfile::tempdir().unwrap();
    let block = WheelPosition::RearLeft.block_id();
    std::fs::write(dir.path().join(format!("block_{:04X}.json", block)), "{}").unwrap();

    let ecu = controller(dir.path(), quiet());
    let coefficients = ecu.system().calibration().coefficients(WheelPosition::RearLeft);
    assert_eq!(coefficients.correction_factor, 1.0);

    ecu.detection_step(0);
    let dtcs = ecu.service().dtc_snapshot();
    assert_eq!(dtcs.len(), 1);
    assert_eq!(dtcs[0].code, 0xC1_4387);
    assert_eq!(dtcs[0].wheel, Some(WheelPosition::RearLeft));
}

#[test]
fn test_worn_tyre_is_detected_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut simulation = quiet();
    // rear-right far outside the 30 km/h plausibility window
    simulation.wheel_scale[3] = 1.6;
    let ecu = controller(dir.path(), simulation);

    let mut state = SystemState::Inactive;
    for i in 0..10 {
        state = ecu.detection_step(i * 20);
        ecu.calibration_step(i * 20);
    }
    assert_ne!(state, SystemState::Monitoring);

    let snapshot = ecu.snapshot(200);
    assert_eq!(snapshot.confirmed_wheels, vec![WheelPosition::RearRight]);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["confirmed_wheels"][0], "rear_right");
    assert_eq!(json["dtcs"][0]["code"], 0xC1_4400);
}
