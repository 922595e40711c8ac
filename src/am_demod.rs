//! AM demodulator: envelope detector with optional DC removal.
use crate::block::{Block, BlockHandle, BlockRet, DynBlock};
use crate::demod::{Demod, Demodulator};
use crate::single_pole_iir_filter::SinglePoleIIR;
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Complex, Float, Result};

/// AM demodulator block.
pub struct AmDemod {
    dcr: bool,
    mean: SinglePoleIIR<Float>,
}

impl AmDemod {
    /// Create new AM demodulator.
    pub fn new(dcr: bool) -> Result<Self> {
        Ok(Self {
            dcr,
            mean: SinglePoleIIR::new(0.001)?,
        })
    }

    /// Turn DC removal on or off.
    pub fn set_dcr(&mut self, dcr: bool) {
        self.dcr = dcr;
    }

    /// True if DC removal is on.
    #[must_use]
    pub fn dcr(&self) -> bool {
        self.dcr
    }
}

impl Block for AmDemod {
    fn block_name(&self) -> &'static str {
        "AmDemod"
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
        let out: Vec<Float> = input
            .iter()
            .map(|s| {
                let m = s.norm();
                let dc = self.mean.filter(m);
                if self.dcr { m - dc } else { m }
            })
            .collect();
        w.write(0, out)?;
        Ok(BlockRet::Ok)
    }
}

impl Demodulator for BlockHandle<AmDemod> {
    fn variant(&self) -> Demod {
        Demod::Am
    }
    fn block(&self) -> DynBlock {
        self.erase()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::stream::Samples;

    fn demod(b: &mut AmDemod, input: Vec<Complex>) -> Result<Vec<Float>> {
        let r = InputStreams::new(vec![Some(Samples::Complex(input))]);
        let mut w = OutputStreams::new(&[ItemType::Float], vec![true]);
        b.work(&r, &mut w)?;
        match w.into_inner().pop() {
            Some(Samples::Float(v)) => Ok(v),
            _ => Err(crate::Error::msg("no output")),
        }
    }

    #[test]
    fn envelope() -> Result<()> {
        let mut b = AmDemod::new(false)?;
        let out = demod(&mut b, vec![Complex::new(3.0, 4.0), Complex::new(0.0, -2.0)])?;
        assert_eq!(out, vec![5.0, 2.0]);
        Ok(())
    }

    #[test]
    fn dc_removed() -> Result<()> {
        let mut b = AmDemod::new(true)?;
        assert!(b.dcr());
        let out = demod(&mut b, vec![Complex::new(0.5, 0.0); 20_000])?;
        assert!(out[19_999].abs() < 1e-3, "{}", out[19_999]);
        b.set_dcr(false);
        let out = demod(&mut b, vec![Complex::new(0.5, 0.0); 10])?;
        assert_eq!(out[9], 0.5);
        Ok(())
    }
}
/* vim: textwidth=80
 */
