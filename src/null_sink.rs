//! Discard anything written to this block.
use crate::block::{Block, BlockRet};
use crate::stream::{InputStreams, ItemType, OutputStreams, StreamItem};
use crate::Result;

/// Discard anything written to this block.
///
/// Counts what it discards.
pub struct NullSink<T> {
    count: u64,
    _t: std::marker::PhantomData<T>,
}

impl<T: StreamItem> NullSink<T> {
    /// Create new NullSink block.
    pub fn new() -> Self {
        Self {
            count: 0,
            _t: std::marker::PhantomData,
        }
    }

    /// Number of samples discarded so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<T: StreamItem> Default for NullSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StreamItem> Block for NullSink<T> {
    fn block_name(&self) -> &'static str {
        "NullSink"
    }
    fn inputs(&self) -> &[ItemType] {
        T::ITEM_TYPE.one()
    }
    fn work(&mut self, r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
        let n = r.get::<T>(0).len();
        self.count += n as u64;
        Ok(if n == 0 { BlockRet::Noop } else { BlockRet::Ok })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::stream::Samples;
    use crate::{Complex, Float};

    #[test]
    fn counts() -> Result<()> {
        let mut s = NullSink::<Complex>::new();
        assert_eq!(s.inputs(), &[ItemType::Complex]);
        let r = InputStreams::new(vec![Some(Samples::Complex(vec![Complex::default(); 3]))]);
        let mut w = OutputStreams::new(&[], vec![]);
        assert_eq!(s.work(&r, &mut w)?, BlockRet::Ok);
        assert_eq!(s.count(), 3);
        assert_eq!(NullSink::<Float>::default().inputs(), &[ItemType::Float]);
        Ok(())
    }
}
/* vim: textwidth=80
 */
