/*! Automatic gain control.

Tracks the peak envelope of the input, and applies gain so that the output
sits near full scale. Signals below the threshold ("knee") get the maximum
gain, `-threshold` dB. Above the knee, the output rises by `slope` dB
between the knee and a 0 dBFS input.

The envelope follows peaks at once, and decays with the `decay` time
constant. With hang on, it is held for [`HANG_TIME`] seconds before it
starts decaying.

With AGC off, a fixed manual gain is applied instead.
*/
use log::trace;

use crate::block::{Block, BlockRet};
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Complex, Error, Float, Result};

/// Seconds the envelope is held after a peak, when hang is on.
pub const HANG_TIME: Float = 0.5;

/// AGC parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AgcParams {
    /// AGC on, or manual gain.
    pub on: bool,
    /// Use hang.
    pub hang: bool,
    /// Knee, in dB. `-160..=0`.
    pub threshold: i32,
    /// Gain with AGC off, in dB. `-160..=160`.
    pub manual_gain: i32,
    /// Output rise above the knee, in dB. `0..=10`.
    pub slope: i32,
    /// Envelope decay time, in ms. `20..=5000`.
    pub decay: i32,
}

impl Default for AgcParams {
    fn default() -> Self {
        Self {
            on: true,
            hang: false,
            threshold: -100,
            manual_gain: 0,
            slope: 2,
            decay: 100,
        }
    }
}

fn check(what: &str, v: i32, lo: i32, hi: i32) -> Result<i32> {
    if !(lo..=hi).contains(&v) {
        return Err(Error::rejected(format!("AGC {what} {v} outside {lo}..{hi}")));
    }
    Ok(v)
}

/// AGC block.
pub struct Agc {
    samp_rate: Float,
    params: AgcParams,
    env: Float,
    decay_factor: Float,
    hang_left: usize,
    gain_db: Float,
}

impl Agc {
    /// Create new AGC.
    pub fn new(samp_rate: Float, params: AgcParams) -> Result<Self> {
        let mut agc = Self {
            samp_rate,
            params: AgcParams::default(),
            env: 0.0,
            decay_factor: 0.0,
            hang_left: 0,
            gain_db: 0.0,
        };
        agc.set_threshold(params.threshold)?;
        agc.set_manual_gain(params.manual_gain)?;
        agc.set_slope(params.slope)?;
        agc.set_decay(params.decay)?;
        agc.set_agc_on(params.on);
        agc.set_use_hang(params.hang);
        Ok(agc)
    }

    /// Turn AGC on or off.
    pub fn set_agc_on(&mut self, on: bool) {
        self.params.on = on;
    }

    /// Turn hang on or off.
    pub fn set_use_hang(&mut self, hang: bool) {
        self.params.hang = hang;
        self.hang_left = 0;
    }

    /// Set the knee, in dB.
    pub fn set_threshold(&mut self, db: i32) -> Result<()> {
        self.params.threshold = check("threshold", db, -160, 0)?;
        Ok(())
    }

    /// Set the gain used with AGC off, in dB.
    pub fn set_manual_gain(&mut self, db: i32) -> Result<()> {
        self.params.manual_gain = check("manual gain", db, -160, 160)?;
        Ok(())
    }

    /// Set output rise above the knee, in dB.
    pub fn set_slope(&mut self, db: i32) -> Result<()> {
        self.params.slope = check("slope", db, 0, 10)?;
        Ok(())
    }

    /// Set envelope decay time, in ms.
    pub fn set_decay(&mut self, ms: i32) -> Result<()> {
        self.params.decay = check("decay", ms, 20, 5000)?;
        let tc = ms as Float / 1000.0 * self.samp_rate;
        self.decay_factor = (-1.0 / tc).exp();
        Ok(())
    }

    /// Current parameters.
    #[must_use]
    pub fn params(&self) -> AgcParams {
        self.params
    }

    /// Gain applied to the latest sample, in dB.
    #[must_use]
    pub fn current_gain_db(&self) -> Float {
        self.gain_db
    }

    fn agc_gain_db(&self, env: Float) -> Float {
        let knee = self.params.threshold as Float;
        let max_gain = -knee;
        let env_db = if env > 0.0 { 20.0 * env.log10() } else { -400.0 };
        let slope = self.params.slope as Float;
        let span = max_gain.max(1.0);
        let target_out = slope * (env_db - knee) / span - slope;
        (target_out - env_db).min(max_gain)
    }

    fn process_one(&mut self, s: Complex) -> Complex {
        if !self.params.on {
            return s * Float::powf(10.0, self.params.manual_gain as Float / 20.0);
        }
        let mag = s.norm();
        if mag >= self.env {
            self.env = mag;
            if self.params.hang {
                self.hang_left = (HANG_TIME * self.samp_rate) as usize;
            }
        } else if self.hang_left > 0 {
            self.hang_left -= 1;
        } else {
            self.env *= self.decay_factor;
        }
        self.gain_db = self.agc_gain_db(self.env);
        s * Float::powf(10.0, self.gain_db / 20.0)
    }
}

impl Block for Agc {
    fn block_name(&self) -> &'static str {
        "Agc"
    }
    fn inputs(&self) -> &[ItemType] {
        &[ItemType::Complex]
    }
    fn outputs(&self) -> &[ItemType] {
        &[ItemType::Complex]
    }
    fn work(&mut self, r: &InputStreams, w: &mut OutputStreams) -> Result<BlockRet> {
        let input = r.get::<Complex>(0);
        if input.is_empty() {
            return Ok(BlockRet::Noop);
        }
        let out: Vec<Complex> = input.iter().map(|s| self.process_one(*s)).collect();
        if self.params.on {
            trace!("AGC gain {:.1} dB", self.gain_db);
        }
        w.write(0, out)?;
        Ok(BlockRet::Ok)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn levels_out() -> Result<()> {
        let mut agc = Agc::new(96_000.0, AgcParams::default())?;
        // -40 dBFS in. Output level 2 dB * 60/100 - 2 = -0.8 dBFS.
        let mut last = Complex::default();
        for _ in 0..1000 {
            last = agc.process_one(Complex::new(0.01, 0.0));
        }
        let out_db = 20.0 * last.norm().log10();
        assert!((out_db + 0.8).abs() < 0.1, "{out_db}");
        Ok(())
    }

    #[test]
    fn gain_capped_at_knee() -> Result<()> {
        let mut agc = Agc::new(96_000.0, AgcParams::default())?;
        agc.process_one(Complex::new(1e-7, 0.0));
        assert!((agc.current_gain_db() - 100.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn manual_gain() -> Result<()> {
        let mut agc = Agc::new(
            96_000.0,
            AgcParams {
                on: false,
                manual_gain: 20,
                ..AgcParams::default()
            },
        )?;
        let out = agc.process_one(Complex::new(0.01, 0.0));
        assert!((out.re - 0.1).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn hang_holds_envelope() -> Result<()> {
        let mut agc = Agc::new(1000.0, AgcParams::default())?;
        agc.set_use_hang(true);
        agc.process_one(Complex::new(1.0, 0.0));
        let g0 = agc.current_gain_db();
        for _ in 0..100 {
            agc.process_one(Complex::new(0.001, 0.0));
        }
        assert_eq!(agc.current_gain_db(), g0);
        agc.set_use_hang(false);
        for _ in 0..100 {
            agc.process_one(Complex::new(0.001, 0.0));
        }
        assert!(agc.current_gain_db() > g0);
        Ok(())
    }

    #[test]
    fn rejects_out_of_range() -> Result<()> {
        let mut agc = Agc::new(96_000.0, AgcParams::default())?;
        assert!(agc.set_threshold(10).is_err());
        assert!(agc.set_slope(11).is_err());
        assert!(agc.set_decay(10).is_err());
        assert!(agc.set_manual_gain(200).is_err());
        agc.set_decay(500)?;
        assert_eq!(agc.params().decay, 500);
        assert_eq!(agc.params().threshold, -100);
        Ok(())
    }
}
/* vim: textwidth=80
 */
