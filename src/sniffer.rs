//! Keep the latest samples around for someone to pick up.
use std::collections::VecDeque;

use log::debug;

use crate::block::{Block, BlockRet};
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Error, Float, Result};

/// Sniffer sink.
///
/// Stores up to a fixed number of samples. When full, the oldest samples
/// are overwritten.
pub struct Sniffer {
    buf: VecDeque<Float>,
    size: usize,
    overwritten: u64,
}

impl Sniffer {
    /// Create new sniffer holding up to `size` samples.
    pub fn new(size: usize) -> Result<Self> {
        let mut s = Self {
            buf: VecDeque::new(),
            size: 0,
            overwritten: 0,
        };
        s.set_buffer_size(size)?;
        Ok(s)
    }

    /// Change capacity. If shrinking, the newest samples are kept.
    pub fn set_buffer_size(&mut self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(Error::rejected("sniffer buffer size must be nonzero"));
        }
        self.size = size;
        while self.buf.len() > size {
            self.buf.pop_front();
        }
        self.buf.reserve(size.saturating_sub(self.buf.len()));
        debug!("Sniffer buffer size {size}");
        Ok(())
    }

    /// Capacity.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.size
    }

    /// Number of samples waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if no samples are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Samples lost to overwriting, since creation.
    #[must_use]
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    /// Take up to `max` samples, oldest first.
    pub fn get_samples(&mut self, max: usize) -> Vec<Float> {
        let n = max.min(self.buf.len());
        self.buf.drain(..n).collect()
    }
}

impl Block for Sniffer {
    fn block_name(&self) -> &'static str {
        "Sniffer"
    }
    fn inputs(&self) -> &[ItemType] {
        &[ItemType::Float]
    }
    fn work(&mut self, r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
        let input = r.get::<Float>(0);
        if input.is_empty() {
            return Ok(BlockRet::Noop);
        }
        // Only the newest `size` samples of this batch can survive.
        let skip = input.len().saturating_sub(self.size);
        let keep = &input[skip..];
        let excess = (self.buf.len() + keep.len()).saturating_sub(self.size);
        self.buf.drain(..excess);
        self.buf.extend(keep);
        self.overwritten += (skip + excess) as u64;
        Ok(BlockRet::Ok)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::stream::Samples;

    fn feed(s: &mut Sniffer, v: Vec<Float>) -> Result<BlockRet> {
        let r = InputStreams::new(vec![Some(Samples::Float(v))]);
        s.work(&r, &mut OutputStreams::new(&[], vec![]))
    }

    #[test]
    fn keeps_newest() -> Result<()> {
        let mut s = Sniffer::new(4)?;
        assert_eq!(feed(&mut s, vec![])?, BlockRet::Noop);
        feed(&mut s, vec![1.0, 2.0, 3.0])?;
        feed(&mut s, vec![4.0, 5.0])?;
        assert_eq!(s.len(), 4);
        assert_eq!(s.overwritten(), 1);
        assert_eq!(s.get_samples(3), vec![2.0, 3.0, 4.0]);
        assert_eq!(s.get_samples(3), vec![5.0]);
        assert!(s.is_empty());
        feed(&mut s, (0..10).map(|x| x as Float).collect())?;
        assert_eq!(s.get_samples(100), vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(s.overwritten(), 7);
        Ok(())
    }

    #[test]
    fn resize() -> Result<()> {
        let mut s = Sniffer::new(8)?;
        feed(&mut s, vec![1.0, 2.0, 3.0, 4.0])?;
        s.set_buffer_size(2)?;
        assert_eq!(s.buffer_size(), 2);
        assert_eq!(s.get_samples(10), vec![3.0, 4.0]);
        assert!(matches!(s.set_buffer_size(0), Err(Error::Rejected(_))));
        assert!(Sniffer::new(0).is_err());
        Ok(())
    }
}
/* vim: textwidth=80
 */
