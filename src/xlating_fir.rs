/*! Frequency translating, decimating FIR filter.

Shifts `center_freq` down to zero, low pass filters, and decimates. This
is how the receiver picks the channel it listens to out of the wideband
input.
*/
use log::debug;

use crate::block::{Block, BlockRet};
use crate::fir::FirState;
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Complex, Error, Float, Result};

/// Frequency translating FIR filter block.
pub struct FreqXlatingFir {
    fir: FirState<Complex, Float>,
    samp_rate: f64,
    center_freq: f64,
    phase: f64,
    phase_inc: f64,
}

impl FreqXlatingFir {
    /// Create new filter.
    pub fn new(taps: &[Float], decim: usize, center_freq: f64, samp_rate: f64) -> Result<Self> {
        if decim == 0 || samp_rate <= 0.0 {
            return Err(Error::rejected(format!(
                "bad xlating filter decimation {decim} or rate {samp_rate}"
            )));
        }
        let mut ret = Self {
            fir: FirState::new(taps, decim),
            samp_rate,
            center_freq: 0.0,
            phase: 0.0,
            phase_inc: 0.0,
        };
        ret.set_center_freq(center_freq);
        Ok(ret)
    }

    /// Frequency, relative to the input, that ends up at zero.
    pub fn set_center_freq(&mut self, freq: f64) {
        self.center_freq = freq;
        self.phase_inc = -2.0 * std::f64::consts::PI * freq / self.samp_rate;
        debug!("Xlating filter center frequency {freq}");
    }

    /// Current center frequency.
    #[must_use]
    pub fn center_freq(&self) -> f64 {
        self.center_freq
    }

    /// Input rate and decimation.
    #[must_use]
    pub fn rates(&self) -> (f64, usize) {
        (self.samp_rate, self.fir.decim())
    }

    /// Change input rate, decimation, and taps together.
    pub fn set_input_rate(&mut self, samp_rate: f64, decim: usize, taps: &[Float]) -> Result<()> {
        if decim == 0 || samp_rate <= 0.0 {
            return Err(Error::rejected(format!(
                "bad xlating filter decimation {decim} or rate {samp_rate}"
            )));
        }
        self.samp_rate = samp_rate;
        self.fir.set_taps(taps);
        self.fir.set_decim(decim);
        self.set_center_freq(self.center_freq);
        Ok(())
    }
}

impl Block for FreqXlatingFir {
    fn block_name(&self) -> &'static str {
        "FreqXlatingFir"
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
        let tau = 2.0 * std::f64::consts::PI;
        let mixed: Vec<Complex> = input
            .iter()
            .map(|s| {
                let lo = Complex::new(self.phase.cos() as Float, self.phase.sin() as Float);
                self.phase = (self.phase + self.phase_inc) % tau;
                *s * lo
            })
            .collect();
        w.write(0, self.fir.process(&mixed))?;
        Ok(BlockRet::Ok)
    }
}

/* vim: textwidth=80
 */
