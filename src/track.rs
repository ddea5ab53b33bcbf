//! Synthetic GPS track for the emulated tracker

use std::f64::consts::TAU;
use trackgate_shared::{AvlRecord, IoElement};

/// Digital input 1 / ignition
const IO_IGNITION: u16 = 239;
/// External voltage in mV
const IO_EXTERNAL_VOLTAGE: u16 = 66;

/// Walks a circle around a fixed centre, one step per record
#[derive(Debug, Clone)]
pub struct TrackGenerator {
    center_lat: f64,
    center_lon: f64,
    radius_deg: f64,
    steps_per_lap: u32,
    step: u32,
    last: Option<AvlRecord>,
}

impl TrackGenerator {
    pub fn new(center_lat: f64, center_lon: f64) -> Self {
        Self {
            center_lat,
            center_lon,
            radius_deg: 0.01,
            steps_per_lap: 360,
            step: 0,
            last: None,
        }
    }

    /// Produce the next record on the track, stamped `timestamp_ms`
    pub fn next_record(&mut self, timestamp_ms: u64) -> AvlRecord {
        let phase = self.step as f64 / self.steps_per_lap as f64;
        let angle = phase * TAU;

        let mut record = AvlRecord::at(
            timestamp_ms,
            round7(self.center_lat + self.radius_deg * angle.sin()),
            round7(self.center_lon + self.radius_deg * angle.cos()),
        );
        record.altitude = 110;
        record.angle = ((phase * 360.0) as u16 + 270) % 360;
        record.satellites = 9;
        record.speed = 36;
        record.io = vec![
            IoElement::new(IO_IGNITION, vec![1u8]),
            IoElement::new(IO_EXTERNAL_VOLTAGE, 12_400u16.to_be_bytes().to_vec()),
        ];

        self.step = (self.step + 1) % self.steps_per_lap;
        self.last = Some(record.clone());
        record
    }

    /// Most recently produced record
    pub fn last(&self) -> Option<&AvlRecord> {
        self.last.as_ref()
    }
}

/// Coordinates travel as `i32` scaled by 1e7
fn round7(value: f64) -> f64 {
    (value * 1e7).round() / 1e7
}
