//! Take the real part of I/Q samples. Used as the SSB demodulator.
//!
//! The channel filter has already removed the unwanted sideband, so the
//! real part is the audio.
use crate::block::{Block, BlockHandle, BlockRet, DynBlock};
use crate::demod::{Demod, Demodulator};
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Complex, Float, Result};

/// Complex to real block.
#[derive(Default)]
pub struct ComplexToReal {}

impl ComplexToReal {
    /// Create new ComplexToReal block.
    pub fn new() -> Self {
        Self {}
    }
}

impl Block for ComplexToReal {
    fn block_name(&self) -> &'static str {
        "ComplexToReal"
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
        w.write(0, input.iter().map(|s| s.re).collect::<Vec<Float>>())?;
        Ok(BlockRet::Ok)
    }
}

impl Demodulator for BlockHandle<ComplexToReal> {
    fn variant(&self) -> Demod {
        Demod::Ssb
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

    #[test]
    fn real_part() -> Result<()> {
        let mut b = ComplexToReal::new();
        let r = InputStreams::new(vec![Some(Samples::Complex(vec![
            Complex::new(1.0, 2.0),
            Complex::new(-3.0, 4.0),
        ]))]);
        let mut w = OutputStreams::new(&[ItemType::Float], vec![true]);
        b.work(&r, &mut w)?;
        assert_eq!(w.into_inner(), vec![Samples::Float(vec![1.0, -3.0])]);
        Ok(())
    }
}
/* vim: textwidth=80
 */
