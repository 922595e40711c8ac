//! FM demodulator: quadrature demod, followed by de-emphasis.
use log::debug;

use crate::block::{Block, BlockHandle, BlockRet, DynBlock};
use crate::demod::{Demod, Demodulator};
use crate::single_pole_iir_filter::SinglePoleIIR;
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Complex, Error, Float, Result};

/// FM demodulator block.
pub struct FmDemod {
    samp_rate: Float,
    max_dev: Float,
    tau: Float,
    gain: Float,
    last: Complex,
    deemph: SinglePoleIIR<Float>,
}

fn deemph_alpha(samp_rate: Float, tau: Float) -> Float {
    if tau <= 0.0 {
        1.0
    } else {
        1.0 - (-1.0 / (samp_rate * tau)).exp()
    }
}

impl FmDemod {
    /// Create new FM demodulator.
    ///
    /// Output is 1.0 at `max_dev` Hz deviation. `tau` is the de-emphasis
    /// time constant in seconds, 0 to disable.
    pub fn new(samp_rate: Float, max_dev: Float, tau: Float) -> Result<Self> {
        let mut b = Self {
            samp_rate,
            max_dev: 0.0,
            tau: 0.0,
            gain: 0.0,
            last: Complex::default(),
            deemph: SinglePoleIIR::new(1.0)?,
        };
        b.set_max_dev(max_dev)?;
        b.set_tau(tau)?;
        Ok(b)
    }

    /// Set maximum deviation, in Hz.
    pub fn set_max_dev(&mut self, max_dev: Float) -> Result<()> {
        if !(max_dev > 0.0 && max_dev <= self.samp_rate / 2.0) {
            return Err(Error::rejected(format!(
                "FM deviation {max_dev} Hz outside 0-{} Hz",
                self.samp_rate / 2.0
            )));
        }
        self.max_dev = max_dev;
        self.gain = self.samp_rate / (2.0 * std::f64::consts::PI as Float * max_dev);
        debug!("FM max deviation {max_dev} Hz");
        Ok(())
    }

    /// Current maximum deviation, in Hz.
    #[must_use]
    pub fn max_dev(&self) -> Float {
        self.max_dev
    }

    /// Set de-emphasis time constant, in seconds. 0 disables it.
    pub fn set_tau(&mut self, tau: Float) -> Result<()> {
        if !(tau >= 0.0 && tau < 1.0) {
            return Err(Error::rejected(format!("FM de-emphasis tau {tau}")));
        }
        self.deemph.set_taps(deemph_alpha(self.samp_rate, tau))?;
        self.tau = tau;
        Ok(())
    }

    /// Current de-emphasis time constant.
    #[must_use]
    pub fn tau(&self) -> Float {
        self.tau
    }

    fn process_one(&mut self, s: Complex) -> Float {
        let t = s * self.last.conj();
        self.last = s;
        self.deemph.filter(self.gain * t.im.atan2(t.re))
    }
}

impl Block for FmDemod {
    fn block_name(&self) -> &'static str {
        "FmDemod"
    }
    fn inputs(&self) -> &[ItemType] {
        &[ItemType::Complex]
    }
    fn outputs(&self) -> &[ItemType] {
        &[ItemType::Float]
    }
    fn work(&mut self, r: &InputStreams, w: &mut OutputStreams) -> Result<BlockRet> {
        let input = r.get::<Complex>(0);
        if input.is_empty() {
            return Ok(BlockRet::Noop);
        }
        let out: Vec<Float> = input.iter().map(|s| self.process_one(*s)).collect();
        w.write(0, out)?;
        Ok(BlockRet::Ok)
    }
}

impl Demodulator for BlockHandle<FmDemod> {
    fn variant(&self) -> Demod {
        Demod::Fm
    }
    fn block(&self) -> DynBlock {
        self.erase()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn constant_offset() -> Result<()> {
        // A carrier 2500 Hz off, with 5000 Hz max deviation, demodulates
        // to 0.5.
        let rate = 96_000.0;
        let mut b = FmDemod::new(rate, 5000.0, 0.0)?;
        let mut last = 0.0;
        for n in 0..1000 {
            let ph = 2.0 * std::f64::consts::PI * 2500.0 * n as f64 / rate as f64;
            last = b.process_one(Complex::new(ph.cos() as Float, ph.sin() as Float));
        }
        assert!((last - 0.5).abs() < 1e-3, "{last}");
        Ok(())
    }

    #[test]
    fn deemphasis_smooths() -> Result<()> {
        let mut b = FmDemod::new(96_000.0, 5000.0, 75e-6)?;
        assert_eq!(b.tau(), 75e-6);
        // One sample step: de-emphasized output rises slowly.
        b.process_one(Complex::new(1.0, 0.0));
        let first = b.process_one(Complex::new(0.0, 1.0));
        let full = 96_000.0 / (2.0 * std::f64::consts::PI as Float * 5000.0)
            * (std::f64::consts::PI as Float / 2.0);
        assert!(first > 0.0 && first < full / 2.0, "{first} vs {full}");
        Ok(())
    }

    #[test]
    fn setters() -> Result<()> {
        let mut b = FmDemod::new(96_000.0, 5000.0, 75e-6)?;
        b.set_max_dev(2500.0)?;
        assert_eq!(b.max_dev(), 2500.0);
        assert!(matches!(b.set_max_dev(0.0), Err(Error::Rejected(_))));
        assert!(b.set_max_dev(60_000.0).is_err());
        assert!(b.set_tau(-1.0).is_err());
        b.set_tau(0.0)?;
        assert_eq!(b.max_dev(), 2500.0);
        Ok(())
    }
}
/* vim: textwidth=80
 */
