//! Multiply stream by a constant value.
//!
//! Used as the audio (AF) gain stage.
use crate::block::{Block, BlockRet};
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Float, Result};

/// Multiply stream by a constant value.
pub struct MultiplyConst {
    val: Float,
}

impl MultiplyConst {
    /// Create new MultiplyConst block.
    pub fn new(val: Float) -> Self {
        Self { val }
    }

    /// Change the constant.
    pub fn set_k(&mut self, val: Float) {
        self.val = val;
    }

    /// Current constant.
    #[must_use]
    pub fn k(&self) -> Float {
        self.val
    }
}

impl Block for MultiplyConst {
    fn block_name(&self) -> &'static str {
        "MultiplyConst"
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
        w.write(0, input.iter().map(|x| x * self.val).collect::<Vec<_>>())?;
        Ok(BlockRet::Ok)
    }
}

/* vim: textwidth=80
 */
