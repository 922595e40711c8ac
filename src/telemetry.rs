/*! Satellite telemetry frames.

A frame is exactly [`FRAME_LEN`] bytes: the sentinel `T`, a little endian
frame counter, then at [`RECORD_OFFSET`] a [`RECORD_LEN`] byte telemetry
record. Anything else is dropped.

Only the structure is decoded. The record starts with the mission elapsed
time (little endian u32 seconds) and the mission mode byte.
*/
use log::debug;

/// Total frame length.
pub const FRAME_LEN: usize = 371;

/// Offset of the telemetry record.
pub const RECORD_OFFSET: usize = 27;

/// Length of the telemetry record.
pub const RECORD_LEN: usize = 340;

const SENTINEL: u8 = b'T';
const COUNTER_OFFSET: usize = 1;

/// Mission mode, as reported in the record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissionMode {
    EmergencyPower,
    LowPower,
    HighPower,
    TxInhibit,
    /// A value with no known meaning.
    Invalid(u8),
}

impl From<u8> for MissionMode {
    fn from(v: u8) -> Self {
        match v {
            0 => MissionMode::EmergencyPower,
            1 => MissionMode::LowPower,
            2 => MissionMode::HighPower,
            3 => MissionMode::TxInhibit,
            other => MissionMode::Invalid(other),
        }
    }
}

impl std::fmt::Display for MissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MissionMode::EmergencyPower => write!(f, "Emergency Power"),
            MissionMode::LowPower => write!(f, "Low Power"),
            MissionMode::HighPower => write!(f, "High Power"),
            MissionMode::TxInhibit => write!(f, "TX Inhibit"),
            MissionMode::Invalid(_) => write!(f, "Invalid mode"),
        }
    }
}

/// Mission elapsed time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MissionTime {
    /// Seconds since start of mission.
    pub seconds: u32,
}

impl MissionTime {
    /// Split into (days, hours, minutes, seconds).
    #[must_use]
    pub fn dhms(&self) -> (u32, u32, u32, u32) {
        let s = self.seconds;
        (s / 86400, s % 86400 / 3600, s % 3600 / 60, s % 60)
    }
}

impl std::fmt::Display for MissionTime {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let (d, h, m, s) = self.dhms();
        write!(f, "{d}d {h:02}:{m:02}:{s:02}")
    }
}

/// A structurally valid telemetry frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlmFrame {
    counter: u32,
    record: [u8; RECORD_LEN],
}

impl TlmFrame {
    /// Parse a frame. Returns `None`, and logs why, for invalid frames.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.first() != Some(&SENTINEL) {
            debug!("Telemetry frame does not start with 'T': {:?}", data.first());
            return None;
        }
        if data.len() != FRAME_LEN {
            debug!("Telemetry frame is {} bytes, want {FRAME_LEN}", data.len());
            return None;
        }
        let counter = u32::from_le_bytes(
            data[COUNTER_OFFSET..COUNTER_OFFSET + 4].try_into().ok()?,
        );
        let record = data[RECORD_OFFSET..RECORD_OFFSET + RECORD_LEN]
            .try_into()
            .ok()?;
        Some(Self { counter, record })
    }

    /// Frame counter.
    #[must_use]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// The raw telemetry record.
    #[must_use]
    pub fn record(&self) -> &[u8; RECORD_LEN] {
        &self.record
    }

    /// Mission elapsed time.
    #[must_use]
    pub fn mission_time(&self) -> MissionTime {
        let r = &self.record;
        MissionTime {
            seconds: u32::from_le_bytes([r[0], r[1], r[2], r[3]]),
        }
    }

    /// Mission mode.
    #[must_use]
    pub fn mission_mode(&self) -> MissionMode {
        self.record[4].into()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn frame() -> Vec<u8> {
        let mut v = vec![0u8; FRAME_LEN];
        v[0] = b'T';
        v[1..5].copy_from_slice(&1234u32.to_le_bytes());
        v[RECORD_OFFSET..RECORD_OFFSET + 4].copy_from_slice(&(2 * 86400 + 3723u32).to_le_bytes());
        v[RECORD_OFFSET + 4] = 2;
        v[RECORD_OFFSET + RECORD_LEN - 1] = 0xaa;
        // Trailer after the record.
        v[RECORD_OFFSET + RECORD_LEN..].fill(0x55);
        v
    }

    #[test]
    fn parse_valid() {
        let f = TlmFrame::parse(&frame()).expect("valid frame");
        assert_eq!(f.counter(), 1234);
        assert_eq!(f.mission_time().dhms(), (2, 1, 2, 3));
        assert_eq!(f.mission_time().to_string(), "2d 01:02:03");
        assert_eq!(f.mission_mode(), MissionMode::HighPower);
        assert_eq!(f.record()[RECORD_LEN - 1], 0xaa);
        assert!(!f.record().contains(&0x55));
    }

    #[test]
    fn drop_invalid() {
        let mut v = frame();
        v[0] = b'X';
        assert_eq!(TlmFrame::parse(&v), None);
        let mut v = frame();
        v.push(0);
        assert_eq!(TlmFrame::parse(&v), None);
        assert_eq!(TlmFrame::parse(&frame()[..370]), None);
        assert_eq!(TlmFrame::parse(&[]), None);
        let mut v = frame();
        v[RECORD_OFFSET + 4] = 9;
        assert_eq!(
            TlmFrame::parse(&v).map(|f| f.mission_mode()),
            Some(MissionMode::Invalid(9))
        );
        assert_eq!(MissionMode::Invalid(9).to_string(), "Invalid mode");
    }
}
/* vim: textwidth=80
 */
