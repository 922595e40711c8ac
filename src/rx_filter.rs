//! Channel filter.
//!
//! Complex band pass with independent low and high edges, so that it can
//! select one sideband. Filtering is FFT based, since a narrow pass band
//! with a sharp edge means a lot of taps.
use log::debug;
use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockRet};
use crate::fft_filter::FftFilter;
use crate::fir::complex_band_pass;
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::window::WindowType;
use crate::{Complex, Error, Float, Result};

/// Narrowest pass band allowed, in Hz.
pub const MIN_WIDTH: Float = 100.0;

/// Filter edge steepness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterShape {
    /// Transition 20% of the pass band.
    Soft,
    /// Transition 10% of the pass band.
    #[default]
    Normal,
    /// Transition 1% of the pass band.
    Sharp,
}

impl FilterShape {
    /// Transition width as a fraction of pass band width.
    #[must_use]
    pub fn transition_fraction(&self) -> Float {
        match self {
            FilterShape::Soft => 0.2,
            FilterShape::Normal => 0.1,
            FilterShape::Sharp => 0.01,
        }
    }

    /// Transition width for the pass band `low..high`.
    ///
    /// Rejects empty bands and bands narrower than [`MIN_WIDTH`].
    pub fn transition_width(&self, low: Float, high: Float) -> Result<Float> {
        if !(low < high) || high - low < MIN_WIDTH {
            return Err(Error::rejected(format!(
                "filter {low}..{high} Hz narrower than {MIN_WIDTH} Hz"
            )));
        }
        Ok((high - low) * self.transition_fraction())
    }
}

impl std::str::FromStr for FilterShape {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "soft" => FilterShape::Soft,
            "normal" => FilterShape::Normal,
            "sharp" => FilterShape::Sharp,
            _ => return Err(Error::rejected(format!("unknown filter shape {s:?}"))),
        })
    }
}

/// Channel filter block.
pub struct RxFilter {
    samp_rate: Float,
    low: Float,
    high: Float,
    trans_width: Float,
    fft: FftFilter,
}

fn make_taps(rate: Float, low: Float, high: Float, tw: Float) -> Result<Vec<Complex>> {
    if !(low < high) || !(tw > 0.0) {
        return Err(Error::rejected(format!(
            "bad filter {low}..{high} Hz, transition {tw} Hz"
        )));
    }
    if low < -rate / 2.0 || high > rate / 2.0 {
        return Err(Error::rejected(format!(
            "filter {low}..{high} Hz outside +-{} Hz",
            rate / 2.0
        )));
    }
    Ok(complex_band_pass(rate, low, high, tw, &WindowType::Hamming))
}

impl RxFilter {
    /// Create new filter.
    pub fn new(samp_rate: Float, low: Float, high: Float, trans_width: Float) -> Result<Self> {
        let taps = make_taps(samp_rate, low, high, trans_width)?;
        Ok(Self {
            samp_rate,
            low,
            high,
            trans_width,
            fft: FftFilter::new(&taps),
        })
    }

    /// Change the pass band.
    pub fn set_param(&mut self, low: Float, high: Float, trans_width: Float) -> Result<()> {
        let taps = make_taps(self.samp_rate, low, high, trans_width)?;
        self.fft.set_taps(&taps);
        self.low = low;
        self.high = high;
        self.trans_width = trans_width;
        debug!("RxFilter: {low}..{high} Hz, transition {trans_width} Hz, {} taps", taps.len());
        Ok(())
    }

    /// Current (low, high, transition width).
    #[must_use]
    pub fn param(&self) -> (Float, Float, Float) {
        (self.low, self.high, self.trans_width)
    }
}

impl Block for RxFilter {
    fn block_name(&self) -> &'static str {
        "RxFilter"
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
        w.write(0, self.fft.process(input))?;
        Ok(BlockRet::Ok)
    }
}

/* vim: textwidth=80
 */
