//! Power squelch.
//!
//! Mutes (outputs zeros) while the average input power is below the
//! threshold.
use crate::block::{Block, BlockRet};
use crate::single_pole_iir_filter::SinglePoleIIR;
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Complex, Error, Float, Result};

/// Power squelch block.
pub struct Squelch {
    threshold_db: Float,
    threshold: Float,
    power: SinglePoleIIR<Float>,
    muted: bool,
}

impl Squelch {
    /// Create new squelch.
    pub fn new(threshold_db: Float, alpha: Float) -> Result<Self> {
        let mut s = Self {
            threshold_db: 0.0,
            threshold: 0.0,
            power: SinglePoleIIR::new(alpha)?,
            muted: true,
        };
        s.set_threshold(threshold_db)?;
        Ok(s)
    }

    /// Set threshold, in dBFS.
    pub fn set_threshold(&mut self, db: Float) -> Result<()> {
        if !db.is_finite() || db > 0.0 {
            return Err(Error::rejected(format!("squelch level {db} dB")));
        }
        self.threshold_db = db;
        self.threshold = Float::powf(10.0, db / 10.0);
        Ok(())
    }

    /// Current threshold, in dBFS.
    #[must_use]
    pub fn threshold(&self) -> Float {
        self.threshold_db
    }

    /// Set averaging factor, in `[0, 1]`.
    pub fn set_alpha(&mut self, alpha: Float) -> Result<()> {
        self.power.set_taps(alpha)
    }

    /// Current averaging factor.
    #[must_use]
    pub fn alpha(&self) -> Float {
        self.power.alpha()
    }

    /// True if currently muting.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted
    }
}

impl Block for Squelch {
    fn block_name(&self) -> &'static str {
        "Squelch"
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
        let out: Vec<Complex> = input
            .iter()
            .map(|s| {
                let p = self.power.filter(s.norm_sqr());
                self.muted = p < self.threshold;
                if self.muted { Complex::default() } else { *s }
            })
            .collect();
        w.write(0, out)?;
        Ok(BlockRet::Ok)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::stream::Samples;

    fn run(s: &mut Squelch, level: Float, n: usize) -> Result<Vec<Complex>> {
        let r = InputStreams::new(vec![Some(Samples::Complex(vec![Complex::new(level, 0.0); n]))]);
        let mut w = OutputStreams::new(&[ItemType::Complex], vec![true]);
        s.work(&r, &mut w)?;
        match w.into_inner().pop() {
            Some(Samples::Complex(v)) => Ok(v),
            _ => Err(Error::msg("no output")),
        }
    }

    #[test]
    fn gates() -> Result<()> {
        let mut s = Squelch::new(-30.0, 0.1)?;
        // -40 dB signal.
        let out = run(&mut s, 0.01, 100)?;
        assert!(s.is_muted());
        assert!(out.iter().all(|x| *x == Complex::default()));
        // -20 dB signal opens it.
        let out = run(&mut s, 0.1, 100)?;
        assert!(!s.is_muted());
        assert_eq!(out[99], Complex::new(0.1, 0.0));
        Ok(())
    }

    #[test]
    fn setters() -> Result<()> {
        let mut s = Squelch::new(-150.0, 0.001)?;
        s.set_threshold(-80.0)?;
        assert_eq!(s.threshold(), -80.0);
        assert!(s.set_threshold(10.0).is_err());
        assert!(s.set_alpha(1.5).is_err());
        s.set_alpha(0.5)?;
        assert_eq!(s.alpha(), 0.5);
        Ok(())
    }
}
/* vim: textwidth=80
 */
