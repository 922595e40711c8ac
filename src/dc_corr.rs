//! Remove DC offset from I/Q samples.
//!
//! Cheap tuners leave a spike at zero offset. Subtracting a slow running
//! mean removes it.
use crate::block::{Block, BlockRet};
use crate::single_pole_iir_filter::SinglePoleIIR;
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Complex, Float, Result};

/// DC correction block.
pub struct DcCorr {
    mean: SinglePoleIIR<Complex>,
}

impl DcCorr {
    /// Create new DC corrector. Smaller `alpha` tracks the mean more slowly.
    pub fn new(alpha: Float) -> Result<Self> {
        Ok(Self {
            mean: SinglePoleIIR::new(alpha)?,
        })
    }

    /// Current DC estimate.
    #[must_use]
    pub fn offset(&self) -> Complex {
        self.mean.prev_output()
    }
}

impl Block for DcCorr {
    fn block_name(&self) -> &'static str {
        "DcCorr"
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
        let out: Vec<Complex> = input.iter().map(|s| *s - self.mean.filter(*s)).collect();
        w.write(0, out)?;
        Ok(BlockRet::Ok)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::stream::Samples;

    #[test]
    fn removes_offset() -> Result<()> {
        let mut b = DcCorr::new(0.01)?;
        let input: Vec<Complex> = (0..2000)
            .map(|n| Complex::new(0.5 + if n % 2 == 0 { 0.1 } else { -0.1 }, -0.25))
            .collect();
        let r = InputStreams::new(vec![Some(Samples::Complex(input))]);
        let mut w = OutputStreams::new(&[ItemType::Complex], vec![true]);
        b.work(&r, &mut w)?;
        assert!((b.offset() - Complex::new(0.5, -0.25)).norm() < 0.01, "{}", b.offset());
        let Samples::Complex(out) = &w.into_inner()[0] else {
            panic!("wrong type");
        };
        assert!((out[1999].re + 0.1).abs() < 0.01, "{}", out[1999]);
        assert!(out[1999].im.abs() < 0.01);
        Ok(())
    }
}
/* vim: textwidth=80
 */
