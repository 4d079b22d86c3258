//! Mapping of detector and calibration state onto the DTC table
//!
//! Runs once per detection cycle. Every confirmed detector record and every
//! calibration fault raised since the previous step counts as one failed
//! test for its DTC; entries not reported in the step have TEST_FAILED
//! dropped.

use abs_core::{CalibrationFault, MalfunctionRecord, WheelPosition};
use tracing::warn;

use crate::service::ServiceContext;
use crate::uds::dtc::{code_for_calibration_fault, code_for_fault, DtcSource};

/// Update the DTC table from the latest cycle; returns the number of DTCs reported
pub fn update_dtcs(ctx: &ServiceContext, now_ms: u64) -> usize {
    // component locks are released before the DTC table is taken
    let records = ctx.system.detector().records();
    let faults = ctx.system.calibration().take_faults();

    let reports = collect_reports(&records, &faults);

    let mut dtcs = ctx.dtcs.lock();
    let mut observed = Vec::with_capacity(reports.len());
    for (code, wheel, source) in reports {
        if let Err(e) = dtcs.report_failed(code, wheel, source, now_ms) {
            warn!(error = %e, "DTC not stored");
            continue;
        }
        observed.push(code);
    }
    dtcs.age(&observed);
    observed.len()
}

type Report = (u32, Option<WheelPosition>, DtcSource);

/// One report per distinct DTC; a code shared by several wheels keeps the first wheel
fn collect_reports(records: &[MalfunctionRecord], faults: &[CalibrationFault]) -> Vec<Report> {
    let mut reports: Vec<Report> = Vec::new();
    let mut push = |report: Report| {
        if !reports.iter().any(|r| r.0 == report.0) {
            reports.push(report);
        }
    };

    for wheel in WheelPosition::ALL {
        let record = &records[wheel.index()];
        if !record.confirmed {
            continue;
        }
        if let Some(code) = code_for_fault(record.kind, wheel) {
            push((code, Some(wheel), DtcSource::Detector(record.kind)));
        }
    }

    for fault in faults {
        push((
            code_for_calibration_fault(fault),
            Some(fault.wheel()),
            DtcSource::Calibration,
        ));
    }

    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::{service, service_with_store};
    use crate::service::DiagnosticService;
    use crate::uds::dtc::dtc_code;
    use abs_core::processor::pulses_for_speed;
    use abs_core::{CalibrationCoefficients, CycleInput, FaultKind, RawSample, SharedMemoryStore};
    use pretty_assertions::assert_eq;

    fn steady() -> CycleInput {
        CycleInput {
            raw: [RawSample::new(pulses_for_speed(60.0, 100, 60, 2.1), 100); 4],
            ..Default::default()
        }
    }

    fn cycles(svc: &DiagnosticService, input: &CycleInput, from_ms: u64, count: u64) -> u64 {
        let mut now = from_ms;
        for _ in 0..count {
            svc.context().system.detection_cycle(input, now);
            svc.monitor(now);
            now += 20;
        }
        now
    }

    #[test]
    fn test_nothing_reported_when_healthy() {
        let svc = service();
        cycles(&svc, &steady(), 0, 10);
        assert!(svc.dtc_snapshot().is_empty());
    }

    #[test]
    fn test_confirmed_miscalibration_becomes_dtc() {
        let svc = service();
        let drifted = CalibrationCoefficients {
            correction_factor: 1.2,
            ..CalibrationCoefficients::factory()
        };
        svc.context()
            .system
            .calibration()
            .set_coefficients(WheelPosition::FrontLeft, drifted, 0)
            .unwrap();

        // confirmation after 5 cycles, then 3 reports
        cycles(&svc, &steady(), 0, 7);

        let entry = *svc
            .context()
            .dtcs
            .lock()
            .get(dtc_code::MISCALIBRATION_BASE)
            .unwrap();
        assert_eq!(entry.occurrence_count, 3);
        assert_eq!(entry.status.bits(), 0x2B);
        assert_eq!(entry.wheel, Some(WheelPosition::FrontLeft));
        assert_eq!(entry.source, DtcSource::Detector(FaultKind::Miscalibration));
    }

    #[test]
    fn test_shared_code_counted_once_per_cycle() {
        let svc = service();
        let mut input = steady();
        input.raw[2].valid = false;
        input.raw[3].valid = false;

        cycles(&svc, &input, 0, 5);

        let snapshot = svc.dtc_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].code, dtc_code::SPEED_DIFFERENCE);
        assert_eq!(snapshot[0].occurrence_count, 1);
        assert_eq!(snapshot[0].wheel, Some(WheelPosition::RearLeft));
    }

    #[test]
    fn test_recovered_fault_drops_test_failed() {
        let svc = service();
        let mut input = steady();
        input.raw[0].valid = false;
        let now = cycles(&svc, &input, 0, 6);
        assert!(svc.dtc_snapshot()[0].status.test_failed());

        cycles(&svc, &steady(), now, 1);
        let entry = svc.dtc_snapshot()[0];
        assert!(!entry.status.test_failed());
        assert!(entry.status.test_failed_since_last_clear());
    }

    #[test]
    fn test_calibration_fault_becomes_dtc() {
        let store = SharedMemoryStore::default();
        let svc = service_with_store(store.clone());
        store.set_fail_writes(true);
        assert!(svc
            .context()
            .system
            .calibration()
            .reset_to_factory(WheelPosition::RearRight, 0)
            .is_err());

        assert_eq!(svc.monitor(0), 1);
        let entry = svc.dtc_snapshot()[0];
        assert_eq!(entry.code, dtc_code::CALIBRATION_NVM);
        assert_eq!(entry.wheel, Some(WheelPosition::RearRight));
        assert_eq!(entry.source, DtcSource::Calibration);

        // faults are drained, nothing new next step
        assert_eq!(svc.monitor(20), 0);
        assert!(!svc.dtc_snapshot()[0].status.test_failed());
    }
}
