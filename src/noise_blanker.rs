/*! Noise blanker.

Two independent impulse blankers, both comparing each sample's magnitude
against a running average of the magnitude:

* NB1 blanks (zeroes) the impulse and a few samples after it.
* NB2 replaces the impulse with the last good sample.

Both are off by default.
*/
use crate::block::{Block, BlockRet};
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Complex, Error, Float, Result};

/// Samples zeroed after each NB1 trigger, including the trigger.
const NB1_HANG: usize = 8;

/// Weight of each new magnitude in the running average.
const AVG_ALPHA: Float = 1.0 / 1024.0;

/// Don't blank until the average has seen this many samples.
const WARMUP: usize = 1024;

/// Noise blanker block.
pub struct NoiseBlanker {
    nb1_on: bool,
    nb2_on: bool,
    threshold1: Float,
    threshold2: Float,
    avg_mag: Float,
    seen: usize,
    hang: usize,
    last_good: Complex,
    blanked: u64,
}

impl NoiseBlanker {
    /// Create new noise blanker, with both blankers off.
    pub fn new(threshold1: Float, threshold2: Float) -> Self {
        Self {
            nb1_on: false,
            nb2_on: false,
            threshold1,
            threshold2,
            avg_mag: 0.0,
            seen: 0,
            hang: 0,
            last_good: Complex::default(),
            blanked: 0,
        }
    }

    /// Turn NB1 on or off.
    pub fn set_nb1_on(&mut self, on: bool) {
        self.nb1_on = on;
    }

    /// Turn NB2 on or off.
    pub fn set_nb2_on(&mut self, on: bool) {
        self.nb2_on = on;
    }

    /// Set NB1 threshold, as a factor of the average magnitude.
    pub fn set_threshold1(&mut self, t: Float) -> Result<()> {
        self.threshold1 = check_threshold(t)?;
        Ok(())
    }

    /// Set NB2 threshold, as a factor of the average magnitude.
    pub fn set_threshold2(&mut self, t: Float) -> Result<()> {
        self.threshold2 = check_threshold(t)?;
        Ok(())
    }

    /// On/off state of (NB1, NB2).
    #[must_use]
    pub fn enabled(&self) -> (bool, bool) {
        (self.nb1_on, self.nb2_on)
    }

    /// Thresholds of (NB1, NB2).
    #[must_use]
    pub fn thresholds(&self) -> (Float, Float) {
        (self.threshold1, self.threshold2)
    }

    /// Number of samples blanked or replaced so far.
    #[must_use]
    pub fn blanked(&self) -> u64 {
        self.blanked
    }

    fn process_one(&mut self, s: Complex) -> Complex {
        let mag = s.norm();
        let armed = self.seen >= WARMUP;
        if self.nb1_on && armed && (self.hang > 0 || mag > self.threshold1 * self.avg_mag) {
            if self.hang == 0 {
                self.hang = NB1_HANG;
            }
            self.hang -= 1;
            self.blanked += 1;
            return Complex::default();
        }
        if self.nb2_on && armed && mag > self.threshold2 * self.avg_mag {
            self.blanked += 1;
            return self.last_good;
        }
        self.avg_mag = self.avg_mag * (1.0 - AVG_ALPHA) + mag * AVG_ALPHA;
        self.seen = self.seen.saturating_add(1);
        self.last_good = s;
        s
    }
}

fn check_threshold(t: Float) -> Result<Float> {
    if !(1.0..=20.0).contains(&t) {
        return Err(Error::rejected(format!(
            "noise blanker threshold {t} outside 1-20"
        )));
    }
    Ok(t)
}

impl Block for NoiseBlanker {
    fn block_name(&self) -> &'static str {
        "NoiseBlanker"
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
        let out: Vec<Complex> = if self.nb1_on || self.nb2_on {
            input.iter().map(|s| self.process_one(*s)).collect()
        } else {
            // Keep the average current, so that switching on works at once.
            for s in input {
                self.process_one(*s);
            }
            input.to_vec()
        };
        w.write(0, out)?;
        Ok(BlockRet::Ok)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn with_impulse() -> Vec<Complex> {
        let mut v = vec![Complex::new(0.1, 0.0); 4000];
        v[3000] = Complex::new(5.0, 0.0);
        v
    }

    #[test]
    fn nb1_blanks_impulse() {
        let mut nb = NoiseBlanker::new(3.3, 2.5);
        nb.set_nb1_on(true);
        let out: Vec<_> = with_impulse().into_iter().map(|s| nb.process_one(s)).collect();
        assert_eq!(out[2999], Complex::new(0.1, 0.0));
        for s in &out[3000..3000 + NB1_HANG] {
            assert_eq!(*s, Complex::default());
        }
        assert_eq!(out[3000 + NB1_HANG], Complex::new(0.1, 0.0));
        assert_eq!(nb.blanked(), NB1_HANG as u64);
    }

    #[test]
    fn nb2_replaces_impulse() {
        let mut nb = NoiseBlanker::new(3.3, 2.5);
        nb.set_nb2_on(true);
        let out: Vec<_> = with_impulse().into_iter().map(|s| nb.process_one(s)).collect();
        assert_eq!(out[3000], Complex::new(0.1, 0.0));
        assert_eq!(nb.blanked(), 1);
        assert_eq!(nb.enabled(), (false, true));
    }

    #[test]
    fn off_passes_through() -> Result<()> {
        let mut nb = NoiseBlanker::new(3.3, 2.5);
        let input = with_impulse();
        let r = InputStreams::new(vec![Some(crate::stream::Samples::Complex(input.clone()))]);
        let mut w = OutputStreams::new(&[ItemType::Complex], vec![true]);
        nb.work(&r, &mut w)?;
        assert_eq!(
            w.into_inner(),
            vec![crate::stream::Samples::Complex(input)]
        );
        Ok(())
    }

    #[test]
    fn thresholds() -> Result<()> {
        let mut nb = NoiseBlanker::new(3.3, 2.5);
        nb.set_threshold1(5.0)?;
        assert!(matches!(nb.set_threshold2(0.5), Err(Error::Rejected(_))));
        assert_eq!(nb.thresholds(), (5.0, 2.5));
        Ok(())
    }
}
/* vim: textwidth=80
 */
