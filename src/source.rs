/*! I/Q sources: the hardware side of the receiver.

[`RxSource`] is what the receiver needs from a tuner. [`SimSource`] is a
simulated tuner that needs no hardware. With the `soapysdr` feature,
[`crate::soapysdr_source::SoapySdrSource`] drives real devices.

Device strings are `driver[,key=value...]`. The driver `sim` selects the
simulated source, `soapy` a SoapySDR device with the rest of the string
as device args.
*/
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::block::{Block, BlockHandle, BlockRet};
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::throttle::Throttle;
use crate::{Complex, Error, Float, Result};

/// A tunable source of I/Q samples.
///
/// Setters return the value actually applied, which may differ from the
/// request if the device snaps or clamps.
pub trait RxSource: Block {
    /// (Re)open the named device.
    fn select_device(&mut self, device: &str) -> Result<()>;

    /// Currently open device string.
    fn device(&self) -> &str;

    /// Tune to `hz`.
    fn set_freq(&mut self, hz: f64) -> Result<f64>;

    /// Currently tuned frequency.
    fn get_freq(&self) -> f64;

    /// Set sample rate.
    fn set_sample_rate(&mut self, rate: f64) -> Result<f64>;

    /// Current sample rate.
    fn get_sample_rate(&self) -> f64;

    /// Set gain in dB.
    fn set_gain(&mut self, db: f64) -> Result<f64>;

    /// Current gain in dB.
    fn get_gain(&self) -> f64;

    /// Switch between automatic and manual gain.
    fn set_gain_mode(&mut self, automatic: bool) -> Result<bool>;

    /// True if gain is automatic.
    fn get_gain_mode(&self) -> bool;
}

/// Handle to any source.
pub type SourceHandle = BlockHandle<dyn RxSource + Send>;

/// Wrap a source in a handle.
pub fn source_handle<S: RxSource + Send + 'static>(s: S) -> SourceHandle {
    let h = BlockHandle::new(s);
    let view: Arc<Mutex<dyn RxSource + Send>> = h.typed();
    h.with_view(view)
}

/// Split a device string into driver and arguments.
pub(crate) fn parse_device(device: &str) -> Result<(&str, Vec<(&str, &str)>)> {
    let mut parts = device.split(',').map(str::trim);
    let driver = parts.next().unwrap_or_default();
    if driver.is_empty() {
        return Err(Error::rejected("empty device string"));
    }
    let args = parts
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.split_once('=')
                .ok_or_else(|| Error::rejected(format!("device arg {p:?} is not key=value")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((driver, args))
}

/// Switch `slot` from device `old` to device `new`.
///
/// For sources whose hardware can only be open once: the old device is
/// closed before the new one is opened. If the new one can't be opened,
/// the old one is opened again, and the error returned.
pub fn reopen<T>(
    slot: &mut Option<T>,
    old: &str,
    new: &str,
    open: impl Fn(&str) -> Result<T>,
) -> Result<()> {
    *slot = None;
    match open(new) {
        Ok(t) => {
            *slot = Some(t);
            Ok(())
        }
        Err(e) => {
            match open(old) {
                Ok(t) => *slot = Some(t),
                Err(e2) => error!("Reopening {old:?} after failing to open {new:?}: {e2}"),
            }
            Err(e)
        }
    }
}

/// Open the source named by a device string.
pub fn open(device: &str, sample_rate: f64) -> Result<SourceHandle> {
    let (driver, _) = parse_device(device)?;
    match driver {
        "sim" => {
            let mut s = SimSource::new(sample_rate as Float);
            s.select_device(device)?;
            Ok(source_handle(s))
        }
        #[cfg(feature = "soapysdr")]
        "soapy" => Ok(source_handle(crate::soapysdr_source::SoapySdrSource::new(
            device,
            sample_rate,
        )?)),
        other => Err(Error::construction(
            format!("source {device:?}"),
            Error::msg(format!("unsupported driver {other:?}")),
        )),
    }
}

/// Sample rates the simulated tuner supports.
pub const SIM_SAMPLE_RATES: &[f64] = &[
    96_000.0,
    192_000.0,
    480_000.0,
    960_000.0,
    1_920_000.0,
    2_400_000.0,
];

/// Simulated LNA gain steps, in dB.
pub const SIM_LNA_GAINS: &[f64] = &[
    -5.0, -2.5, 0.0, 2.5, 5.0, 7.5, 10.0, 12.5, 15.0, 17.5, 20.0, 25.0, 30.0,
];

/// Simulated tuning step, in Hz.
pub const SIM_FREQ_STEP: f64 = 10.0;

/// Simulated tuning range, in Hz.
pub const SIM_FREQ_RANGE: (f64, f64) = (24e6, 1766e6);

/**
Simulated tuner.

Produces noise, plus an FM carrier modulated by a 1 kHz tone at a fixed
RF frequency. Tune near the carrier to hear it.

Device args:
* `signal`: carrier frequency in Hz. Default 144.81 MHz.
* `level`: carrier level in dBFS at 0 dB gain. Default -30.
* `noise`: noise level in dBFS at 0 dB gain. Default -70.
*/
pub struct SimSource {
    device: String,
    freq: f64,
    rate: f64,
    gain: f64,
    auto_gain: bool,
    signal_freq: f64,
    signal_level: f64,
    noise_level: f64,
    carrier_phase: f64,
    tone_phase: f64,
    throttle: Throttle,
    rng: StdRng,
}

impl SimSource {
    /// Create new simulated source.
    pub fn new(rate: Float) -> Self {
        Self {
            device: "sim".to_string(),
            freq: 144_800_000.0,
            rate: rate as f64,
            gain: 0.0,
            auto_gain: false,
            signal_freq: 144_810_000.0,
            signal_level: -30.0,
            noise_level: -70.0,
            carrier_phase: 0.0,
            tone_phase: 0.0,
            throttle: Throttle::new(rate),
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    fn generate(&mut self, n: usize) -> Vec<Complex> {
        let gain = if self.auto_gain { 0.0 } else { self.gain };
        let amp = 10f64.powf((self.signal_level + gain) / 20.0);
        let noise = 10f64.powf((self.noise_level + gain) / 20.0) as Float;
        let offset = self.signal_freq - self.freq;
        let audible = offset.abs() < self.rate / 2.0;
        let tone_step = 2.0 * PI * 1000.0 / self.rate;
        let dev = 3000.0;
        (0..n)
            .map(|_| {
                let mut s = Complex::new(
                    noise * (self.rng.random::<Float>() - 0.5),
                    noise * (self.rng.random::<Float>() - 0.5),
                );
                if audible {
                    self.tone_phase = (self.tone_phase + tone_step) % (2.0 * PI);
                    let inst = offset + dev * self.tone_phase.sin();
                    self.carrier_phase =
                        (self.carrier_phase + 2.0 * PI * inst / self.rate) % (2.0 * PI);
                    s += Complex::new(
                        (amp * self.carrier_phase.cos()) as Float,
                        (amp * self.carrier_phase.sin()) as Float,
                    );
                }
                s
            })
            .collect()
    }
}

impl Block for SimSource {
    fn block_name(&self) -> &'static str {
        "SimSource"
    }
    fn outputs(&self) -> &[ItemType] {
        &[ItemType::Complex]
    }
    fn work(&mut self, _r: &InputStreams, w: &mut OutputStreams) -> Result<BlockRet> {
        let n = self.throttle.allowance();
        if n == 0 {
            return Ok(BlockRet::Pending);
        }
        let v = self.generate(n);
        self.throttle.produced(n);
        w.write(0, v)?;
        Ok(BlockRet::Ok)
    }
}

impl RxSource for SimSource {
    fn select_device(&mut self, device: &str) -> Result<()> {
        let (driver, args) = parse_device(device)?;
        if driver != "sim" {
            return Err(Error::rejected(format!(
                "simulated source can't open {device:?}"
            )));
        }
        let (mut signal, mut level, mut noise) = (144_810_000.0, -30.0, -70.0);
        for (k, v) in args {
            let val: f64 = v
                .parse()
                .map_err(|_| Error::rejected(format!("device arg {k}: bad number {v:?}")))?;
            match k {
                "signal" => signal = val,
                "level" => level = val,
                "noise" => noise = val,
                _ => return Err(Error::rejected(format!("unknown device arg {k:?}"))),
            }
        }
        self.signal_freq = signal;
        self.signal_level = level;
        self.noise_level = noise;
        self.device = device.to_string();
        info!("Simulated source: carrier at {signal} Hz, {level} dBFS");
        Ok(())
    }

    fn device(&self) -> &str {
        &self.device
    }

    fn set_freq(&mut self, hz: f64) -> Result<f64> {
        let (lo, hi) = SIM_FREQ_RANGE;
        if !(lo..=hi).contains(&hz) {
            return Err(Error::rejected(format!(
                "frequency {hz} outside tuning range {lo}-{hi}"
            )));
        }
        self.freq = (hz / SIM_FREQ_STEP).round() * SIM_FREQ_STEP;
        debug!("Simulated source tuned to {}", self.freq);
        Ok(self.freq)
    }

    fn get_freq(&self) -> f64 {
        self.freq
    }

    fn set_sample_rate(&mut self, rate: f64) -> Result<f64> {
        if !(rate > 0.0) {
            return Err(Error::rejected(format!("bad sample rate {rate}")));
        }
        let nearest = SIM_SAMPLE_RATES
            .iter()
            .copied()
            .min_by(|a, b| (a - rate).abs().total_cmp(&(b - rate).abs()))
            .unwrap_or(rate);
        self.rate = nearest;
        self.throttle.set_rate(nearest as Float);
        Ok(nearest)
    }

    fn get_sample_rate(&self) -> f64 {
        self.rate
    }

    fn set_gain(&mut self, db: f64) -> Result<f64> {
        if !db.is_finite() {
            return Err(Error::rejected(format!("bad gain {db}")));
        }
        self.gain = SIM_LNA_GAINS
            .iter()
            .copied()
            .min_by(|a, b| (a - db).abs().total_cmp(&(b - db).abs()))
            .unwrap_or(0.0);
        Ok(self.gain)
    }

    fn get_gain(&self) -> f64 {
        self.gain
    }

    fn set_gain_mode(&mut self, automatic: bool) -> Result<bool> {
        self.auto_gain = automatic;
        Ok(automatic)
    }

    fn get_gain_mode(&self) -> bool {
        self.auto_gain
    }
}

/* vim: textwidth=80
 */
