/*! Receiver configuration.

Stored as JSON. Fields missing from the file get their default value, so
an empty object `{}` is a valid configuration.
*/
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::demod::Demod;
use crate::rx_filter::FilterShape;
use crate::{Error, Float, Result};

/// Intermediate sample rate, after channel decimation.
pub const IF_RATE: f64 = 96_000.0;

/// Audio sample rate.
pub const AUDIO_RATE: f64 = 48_000.0;

/// Receiver start-up settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Source device string, e.g. `sim` or `soapy,driver=rtlsdr`.
    pub input_device: String,

    /// Audio output device name.
    pub output_device: String,

    /// Source sample rate. Must be a multiple of [`IF_RATE`].
    pub input_rate: f64,

    /// RF frequency in Hz.
    pub rf_freq: f64,

    /// Channel offset from the RF frequency, in Hz.
    pub filter_offset: f64,

    /// Pass band low edge, in Hz.
    pub filter_low: Float,

    /// Pass band high edge, in Hz.
    pub filter_high: Float,

    /// Pass band edge steepness.
    pub filter_shape: FilterShape,

    /// Demodulator.
    pub demod: Demod,

    /// Audio gain in dB.
    pub af_gain: Float,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            input_device: "sim".to_string(),
            output_device: "default".to_string(),
            input_rate: 1_920_000.0,
            rf_freq: 144_800_000.0,
            filter_offset: 0.0,
            filter_low: -5000.0,
            filter_high: 5000.0,
            filter_shape: FilterShape::Normal,
            demod: Demod::Fm,
            af_gain: -20.0,
        }
    }
}

impl ReceiverConfig {
    /// Load from JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let f = std::fs::File::open(path).map_err(|e| Error::file_io(e, path))?;
        let cfg: Self = serde_json::from_reader(std::io::BufReader::new(f))?;
        debug!("Loaded config from {}: {cfg:?}", path.display());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Save as JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let s = serde_json::to_string_pretty(self)?;
        std::fs::write(path, s).map_err(|e| Error::file_io(e, path))?;
        Ok(())
    }

    /// Decimation from input rate to [`IF_RATE`].
    pub fn decimation(&self) -> Result<usize> {
        let d = self.input_rate / IF_RATE;
        if !(d >= 1.0) || d.fract() != 0.0 {
            return Err(Error::rejected(format!(
                "input rate {} is not a multiple of {IF_RATE}",
                self.input_rate
            )));
        }
        Ok(d as usize)
    }

    /// Check values that can be checked without opening anything.
    pub fn validate(&self) -> Result<()> {
        self.decimation()?;
        self.filter_shape
            .transition_width(self.filter_low, self.filter_high)?;
        if self.filter_offset.abs() > self.input_rate / 2.0 {
            return Err(Error::rejected(format!(
                "filter offset {} outside input band",
                self.filter_offset
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in() -> Result<()> {
        let cfg: ReceiverConfig = serde_json::from_str(r#"{"rf_freq": 433.92e6, "demod": "am"}"#)?;
        assert_eq!(cfg.rf_freq, 433.92e6);
        assert_eq!(cfg.demod, Demod::Am);
        assert_eq!(cfg.input_rate, 1_920_000.0);
        assert_eq!(cfg.decimation()?, 20);
        let empty: ReceiverConfig = serde_json::from_str("{}")?;
        assert_eq!(empty, ReceiverConfig::default());
        Ok(())
    }

    #[test]
    fn save_load() -> Result<()> {
        let tmpd = tempfile::tempdir()?;
        let path = tmpd.path().join("rx.json");
        let cfg = ReceiverConfig {
            input_rate: 96_000.0,
            filter_shape: FilterShape::Sharp,
            ..ReceiverConfig::default()
        };
        cfg.save(&path)?;
        assert_eq!(ReceiverConfig::load(&path)?, cfg);
        Ok(())
    }

    #[test]
    fn invalid() -> Result<()> {
        let tmpd = tempfile::tempdir()?;
        let path = tmpd.path().join("rx.json");
        std::fs::write(&path, r#"{"input_rate": 100000}"#)?;
        assert!(matches!(ReceiverConfig::load(&path), Err(Error::Rejected(_))));
        std::fs::write(&path, "not json")?;
        assert!(matches!(ReceiverConfig::load(&path), Err(Error::Config(_))));
        assert!(matches!(
            ReceiverConfig::load(tmpd.path().join("missing.json")),
            Err(Error::FileIo { .. })
        ));
        Ok(())
    }
}
/* vim: textwidth=80
 */
