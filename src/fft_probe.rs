/*! Spectrum analyzer tap.

Remembers the latest `size` input samples. The FFT is only computed when
someone asks for it with [`FftProbe::get_fft_data`], so a probe nobody
reads costs next to nothing.
*/
use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use rustfft::FftPlanner;

use crate::block::{Block, BlockRet};
use crate::stream::{InputStreams, ItemType, OutputStreams, StreamItem};
use crate::window::WindowType;
use crate::{Complex, Error, Float, Result};

/// FFT probe block, for `Complex` (I/Q) or `Float` (audio) input.
pub struct FftProbe<T> {
    size: usize,
    fft: Arc<dyn rustfft::Fft<Float>>,
    window: Vec<Float>,
    buf: VecDeque<T>,
}

impl<T: StreamItem + Into<Complex>> FftProbe<T> {
    /// Create new probe with the given FFT size.
    pub fn new(size: usize) -> Result<Self> {
        let mut planner = FftPlanner::new();
        let mut p = Self {
            size: 1,
            fft: planner.plan_fft_forward(1),
            window: vec![1.0],
            buf: VecDeque::new(),
        };
        p.set_fft_size(size)?;
        Ok(p)
    }

    /// Change the FFT size. Stored samples are kept.
    pub fn set_fft_size(&mut self, size: usize) -> Result<()> {
        if size < 2 {
            return Err(Error::rejected(format!("FFT size {size} too small")));
        }
        self.fft = FftPlanner::new().plan_fft_forward(size);
        self.window = WindowType::BlackmanHarris.make_window(size).0;
        self.size = size;
        while self.buf.len() > size {
            self.buf.pop_front();
        }
        debug!("FFT probe size {size}");
        Ok(())
    }

    /// FFT size.
    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.size
    }

    /// Windowed FFT of the latest samples.
    ///
    /// Always `fft_size()` bins, in FFT order (DC first). If fewer samples
    /// than that have arrived, the rest is zero.
    #[must_use]
    pub fn get_fft_data(&self) -> Vec<Complex> {
        let mut v: Vec<Complex> = self
            .buf
            .iter()
            .zip(&self.window)
            .map(|(s, w)| Into::<Complex>::into(*s) * *w)
            .collect();
        v.resize(self.size, Complex::default());
        self.fft.process(&mut v);
        v
    }
}

impl<T: StreamItem + Into<Complex>> Block for FftProbe<T> {
    fn block_name(&self) -> &'static str {
        match T::ITEM_TYPE {
            ItemType::Complex => "FftProbe<Complex>",
            ItemType::Float => "FftProbe<Float>",
        }
    }
    fn inputs(&self) -> &[ItemType] {
        T::ITEM_TYPE.one()
    }
    fn work(&mut self, r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
        let input = r.get::<T>(0);
        if input.is_empty() {
            return Ok(BlockRet::Noop);
        }
        let keep = &input[input.len().saturating_sub(self.size)..];
        let excess = (self.buf.len() + keep.len()).saturating_sub(self.size);
        self.buf.drain(..excess);
        self.buf.extend(keep);
        Ok(BlockRet::Ok)
    }
}

/* vim: textwidth=80
 */
