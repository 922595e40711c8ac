/*! FFT filter. Like a FIR filter, but more efficient when there are many taps.

Overlap-add: the input is cut into blocks, each block is filtered by
multiplication in the frequency domain, and the part of the result that
spills past the block is added to the start of the next one.

Output comes in whole blocks, so a filter with many taps also has a
delay of many samples.

```
use rustrx::Complex;
use rustrx::fft_filter::FftFilter;
use rustrx::fir::low_pass_complex;
use rustrx::window::WindowType;

// 100kHz low pass filter with 1kHz transition width.
let taps = low_pass_complex(1_000_000.0, 100_000.0, 1000.0, &WindowType::Hamming);
let mut f = FftFilter::new(&taps);
let out = f.process(&vec![Complex::new(1.0, 0.0); 10_000]);
assert!(out.len() <= 10_000);
```
*/
use std::sync::Arc;

use log::trace;
use rustfft::FftPlanner;

use crate::{Complex, Float};

/// FFT filter. Like a FIR filter, but more efficient when there are many taps.
pub struct FftFilter {
    buf: Vec<Complex>,
    taps_fft: Vec<Complex>,
    nsamples: usize,
    fft_size: usize,
    tail: Vec<Complex>,
    fft: Arc<dyn rustfft::Fft<Float>>,
    ifft: Arc<dyn rustfft::Fft<Float>>,
}

impl FftFilter {
    fn calc_fft_size(from: usize) -> usize {
        let mut n = 1;
        while n < from {
            n <<= 1;
        }
        2 * n
    }

    /// Create new FftFilter, given filter taps.
    pub fn new(taps: &[Complex]) -> Self {
        let fft_size = Self::calc_fft_size(taps.len());
        let nsamples = fft_size - taps.len();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let ifft = planner.plan_fft_inverse(fft_size);

        // Pre-FFT the taps.
        let mut taps_fft = taps.to_vec();
        taps_fft.resize(fft_size, Complex::default());
        fft.process(&mut taps_fft);

        // Both transforms are unnormalized. Scale once, here, for the
        // round trip.
        let f = 1.0 / fft_size as Float;
        taps_fft.iter_mut().for_each(|s| *s *= f);

        Self {
            buf: Vec::with_capacity(fft_size),
            taps_fft,
            nsamples,
            fft_size,
            tail: vec![Complex::default(); taps.len()],
            fft,
            ifft,
        }
    }

    /// Input samples per block, and so output samples per block.
    #[must_use]
    pub fn block_len(&self) -> usize {
        self.nsamples
    }

    /// Replace the taps.
    ///
    /// Buffered input and the overlap from the previous block are kept, as
    /// far as they fit the new block size.
    pub fn set_taps(&mut self, taps: &[Complex]) {
        let mut next = Self::new(taps);
        let keep = self.buf.len().min(next.nsamples);
        if keep < self.buf.len() {
            trace!("FftFilter: dropping {} buffered samples", self.buf.len() - keep);
        }
        next.buf
            .extend_from_slice(&self.buf[self.buf.len() - keep..]);
        for (n, o) in next.tail.iter_mut().zip(&self.tail) {
            *n = *o;
        }
        *self = next;
    }

    /// Filter more of the stream. Returns whole blocks only; the rest
    /// of the input waits for the next call.
    pub fn process(&mut self, mut input: &[Complex]) -> Vec<Complex> {
        let mut out = Vec::with_capacity(input.len() + self.buf.len());
        while !input.is_empty() {
            let add = (self.nsamples - self.buf.len()).min(input.len());
            self.buf.extend_from_slice(&input[..add]);
            input = &input[add..];
            if self.buf.len() < self.nsamples {
                break;
            }

            self.buf.resize(self.fft_size, Complex::default());
            self.fft.process(&mut self.buf);
            self.buf
                .iter_mut()
                .zip(&self.taps_fft)
                .for_each(|(x, t)| *x *= t);
            self.ifft.process(&mut self.buf);

            // Add overlapping tail.
            for (x, t) in self.buf.iter_mut().zip(&self.tail) {
                *x += t;
            }
            out.extend_from_slice(&self.buf[..self.nsamples]);
            self.tail.copy_from_slice(&self.buf[self.nsamples..]);
            self.buf.clear();
        }
        out
    }
}

/* vim: textwidth=80
 */
