//! Signal strength meter.
use crate::block::{Block, BlockRet};
use crate::single_pole_iir_filter::SinglePoleIIR;
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Complex, Float, Result};

/// Lowest level reported, in dB.
pub const FLOOR_DB: Float = -200.0;

/// Signal meter sink.
///
/// Tracks a running average of the input power.
pub struct RxMeter {
    power: SinglePoleIIR<Float>,
}

impl RxMeter {
    /// Create new meter. Larger `alpha` reacts faster.
    pub fn new(alpha: Float) -> Result<Self> {
        Ok(Self {
            power: SinglePoleIIR::new(alpha)?,
        })
    }

    /// Average power, linear.
    #[must_use]
    pub fn get_level(&self) -> Float {
        self.power.prev_output()
    }

    /// Average power, in dB relative to full scale.
    #[must_use]
    pub fn get_level_db(&self) -> Float {
        let p = self.get_level();
        if p > 0.0 {
            (10.0 * p.log10()).max(FLOOR_DB)
        } else {
            FLOOR_DB
        }
    }
}

impl Block for RxMeter {
    fn block_name(&self) -> &'static str {
        "RxMeter"
    }
    fn inputs(&self) -> &[ItemType] {
        &[ItemType::Complex]
    }
    fn work(&mut self, r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
        let input = r.get::<Complex>(0);
        if input.is_empty() {
            return Ok(BlockRet::Noop);
        }
        for s in input {
            self.power.filter(s.norm_sqr());
        }
        Ok(BlockRet::Ok)
    }
}

/* vim: textwidth=80
 */
