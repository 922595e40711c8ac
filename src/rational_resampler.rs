/*! Rational resampler for real samples.

Upsamples by `interp`, low pass filters, and downsamples by `deci`, all in
one polyphase step, so the zero stuffed stream never exists.
*/
use crate::block::{Block, BlockRet};
use crate::fir::low_pass;
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::window::WindowType;
use crate::{Error, Float, Result};

/// Largest supported interpolation factor, after reducing the ratio.
const MAX_INTERP: usize = 1000;

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let temp = b;
        b = a % b;
        a = temp;
    }
    a
}

/// Rational resampler block.
pub struct RationalResampler {
    interp: usize,
    deci: usize,
    taps: Vec<Float>,
    history: Vec<Float>,
    // Upsampled index of the next output, relative to history[0].
    t: usize,
}

impl RationalResampler {
    /// Create new resampler, reducing the ratio first.
    pub fn new(interp: usize, deci: usize) -> Result<Self> {
        if interp == 0 || deci == 0 {
            return Err(Error::rejected(format!(
                "resampling ratio {interp}/{deci} must be positive"
            )));
        }
        let g = gcd(deci, interp);
        let (interp, deci) = (interp / g, deci / g);
        if interp > MAX_INTERP {
            return Err(Error::rejected(format!(
                "resampling ratio {interp}/{deci} too fine grained"
            )));
        }
        let taps = if interp == 1 && deci == 1 {
            vec![1.0]
        } else {
            // Design at the upsampled rate, with the input rate as unit.
            let l = interp as Float;
            let band = Float::min(1.0, l / deci as Float);
            low_pass(l, 0.4 * band, 0.2 * band, &WindowType::Hamming)
                .into_iter()
                .map(|t| t * l)
                .collect()
        };
        Ok(Self {
            interp,
            deci,
            taps,
            history: Vec::new(),
            t: 0,
        })
    }

    /// Create resampler converting between two sample rates.
    pub fn from_rates(in_rate: Float, out_rate: Float) -> Result<Self> {
        if !(in_rate >= 1.0 && out_rate >= 1.0) {
            return Err(Error::rejected(format!(
                "can't resample {in_rate} to {out_rate}"
            )));
        }
        Self::new(out_rate.round() as usize, in_rate.round() as usize)
    }

    /// Interpolation and decimation, after reduction.
    #[must_use]
    pub fn ratio(&self) -> (usize, usize) {
        (self.interp, self.deci)
    }

    /// Resample another chunk of the stream.
    pub fn process(&mut self, input: &[Float]) -> Vec<Float> {
        self.history.extend_from_slice(input);
        let l = self.interp;
        let ntaps = self.taps.len();
        let mut out = Vec::with_capacity(input.len() * l / self.deci + 1);
        while self.t / l < self.history.len() {
            let mut acc = 0.0;
            let mut i = self.t / l;
            loop {
                let j = self.t - i * l;
                if j >= ntaps {
                    break;
                }
                acc += self.history[i] * self.taps[j];
                if i == 0 {
                    break;
                }
                i -= 1;
            }
            out.push(acc);
            self.t += self.deci;
        }
        let drop = if self.t >= ntaps {
            ((self.t - ntaps) / l + 1).min(self.history.len())
        } else {
            0
        };
        self.history.drain(..drop);
        self.t -= drop * l;
        out
    }
}

impl Block for RationalResampler {
    fn block_name(&self) -> &'static str {
        "RationalResampler"
    }
    fn inputs(&self) -> &[ItemType] {
        &[ItemType::Float]
    }
    fn outputs(&self) -> &[ItemType] {
        &[ItemType::Float]
    }
    fn work(&mut self, r: &InputStreams, w: &mut OutputStreams) -> Result<BlockRet> {
        let input = r.get::<Float>(0);
        if input.is_empty() {
            return Ok(BlockRet::Noop);
        }
        let out = self.process(input);
        w.write(0, out)?;
        Ok(BlockRet::Ok)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn runtest(inputsize: usize, interp: usize, deci: usize, finalcount: usize) -> Result<()> {
        let input: Vec<Float> = (0..inputsize).map(|i| i as Float).collect();
        let mut resamp = RationalResampler::new(interp, deci)?;
        let mut got = Vec::new();
        for chunk in input.chunks(7) {
            got.extend(resamp.process(chunk));
        }
        assert_eq!(finalcount, got.len(), "{interp}/{deci}: {got:?}");
        Ok(())
    }

    #[test]
    fn output_counts() -> Result<()> {
        runtest(10, 1, 1, 10)?;
        runtest(10, 1, 2, 5)?;
        runtest(10, 2, 1, 20)?;
        runtest(100, 2, 3, 67)?;
        runtest(100, 3, 2, 150)?;
        runtest(100, 300, 200, 150)?;
        runtest(100, 200000, 1024000, 20)?;
        Ok(())
    }

    #[test]
    fn unity_dc_gain() -> Result<()> {
        for (interp, deci) in [(1, 2), (3, 2), (147, 160), (1, 1)] {
            let mut resamp = RationalResampler::new(interp, deci)?;
            let out = resamp.process(&vec![1.0; 4000]);
            let tail = &out[out.len() / 2..];
            for s in tail {
                assert!((s - 1.0).abs() < 0.02, "{interp}/{deci}: {s}");
            }
        }
        Ok(())
    }

    #[test]
    fn from_rates() -> Result<()> {
        assert_eq!(RationalResampler::from_rates(96000.0, 48000.0)?.ratio(), (1, 2));
        assert_eq!(RationalResampler::from_rates(48000.0, 44100.0)?.ratio(), (147, 160));
        assert!(RationalResampler::from_rates(0.0, 48000.0).is_err());
        assert!(RationalResampler::new(0, 1).is_err());
        assert!(RationalResampler::from_rates(48000.0, 47999.0).is_err());
        Ok(())
    }

    #[test]
    fn block_noop_without_input() -> Result<()> {
        let mut b = RationalResampler::new(1, 2)?;
        let r = InputStreams::new(vec![Some(crate::stream::Samples::Float(vec![]))]);
        let mut w = OutputStreams::new(&[ItemType::Float], vec![true]);
        assert_eq!(b.work(&r, &mut w)?, BlockRet::Noop);
        Ok(())
    }
}
/* vim: textwidth=80
 */
