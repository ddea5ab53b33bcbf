//! Command responder - turns a received command into the reply text

use std::time::{Duration, Instant};
use trackgate_shared::AvlRecord;

pub const UNKNOWN_COMMAND: &str = "Unknown command";

const FIRMWARE: &str = "03.28.07_R";
const GPS_MODULE: &str = "AXN_5.10_3333";
const HARDWARE: &str = "FMB920";

/// Answers commands on behalf of one emulated tracker
#[derive(Debug, Clone)]
pub struct CommandResponder {
    imei: String,
    started: Instant,
}

impl CommandResponder {
    pub fn new(imei: impl Into<String>) -> Self {
        Self {
            imei: imei.into(),
            started: Instant::now(),
        }
    }

    /// Reply text for `command`, given the tracker's latest position fix
    pub fn respond(&self, command: &str, position: Option<&AvlRecord>) -> String {
        let uptime = self.started.elapsed();
        match command.trim() {
            "getver" => format!(
                "Ver:{} GPS:{} Hw:{} IMEI:{} Uptime:{}",
                FIRMWARE,
                GPS_MODULE,
                HARDWARE,
                self.imei,
                uptime.as_secs()
            ),
            "getgps" => match position {
                Some(p) => format!(
                    "GPS:1 Sat:{} Lat:{:.6} Long:{:.6} Alt:{} Speed:{} Dir:{}",
                    p.satellites, p.lat, p.lon, p.altitude, p.speed, p.angle
                ),
                None => "GPS:0 Sat:0 Lat:0 Long:0 Alt:0 Speed:0 Dir:0".to_string(),
            },
            "getinfo" => format!("RTC:{} Init:1 UpTime:{}s", now_secs(), uptime.as_secs()),
            _ => UNKNOWN_COMMAND.to_string(),
        }
    }
}

fn now_secs() -> u64 {
    Duration::from_millis(trackgate_shared::now_ms()).as_secs()
}
