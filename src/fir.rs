/*! Finite impulse response filters, and filter design.

[`FIR`] filters one window of samples. [`FirState`] keeps the history
needed to filter a stream that arrives in arbitrary chunks, optionally
decimating.
*/
use std::ops::{Add, Mul};

use crate::window::WindowType;
use crate::{Complex, Float};

/// Finite impulse response filter.
pub struct FIR<T, Tap = T> {
    taps: Vec<Tap>,
    _t: std::marker::PhantomData<T>,
}

impl<T, Tap> FIR<T, Tap>
where
    T: Copy + Default + Mul<Tap, Output = T> + Add<T, Output = T>,
    Tap: Copy,
{
    /// Create new FIR.
    pub fn new(taps: &[Tap]) -> Self {
        Self {
            taps: taps.iter().copied().rev().collect(),
            _t: std::marker::PhantomData,
        }
    }

    /// Number of taps.
    #[must_use]
    pub fn ntaps(&self) -> usize {
        self.taps.len()
    }

    /// Run filter once, creating one sample from the taps and an
    /// equal number of input samples.
    pub fn filter(&self, input: &[T]) -> T {
        input
            .iter()
            .zip(&self.taps)
            .fold(T::default(), |acc, (x, t)| acc + *x * *t)
    }

    /// Call `filter()` multiple times, across an input range.
    pub fn filter_n(&self, input: &[T]) -> Vec<T> {
        if input.len() < self.taps.len() {
            return Vec::new();
        }
        let n = input.len() - self.taps.len() + 1;
        (0..n).map(|i| self.filter(&input[i..])).collect()
    }
}

/// Stream filter with history, and optional decimation.
pub struct FirState<T, Tap = T> {
    fir: FIR<T, Tap>,
    history: Vec<T>,
    decim: usize,
    skip: usize,
}

impl<T, Tap> FirState<T, Tap>
where
    T: Copy + Default + Mul<Tap, Output = T> + Add<T, Output = T>,
    Tap: Copy,
{
    /// Create new stream filter. One output per `decim` inputs.
    pub fn new(taps: &[Tap], decim: usize) -> Self {
        let decim = decim.max(1);
        Self {
            history: vec![T::default(); taps.len().saturating_sub(1)],
            fir: FIR::new(taps),
            decim,
            skip: 0,
        }
    }

    /// Decimation factor.
    #[must_use]
    pub fn decim(&self) -> usize {
        self.decim
    }

    /// Replace taps, keeping as much history as the new taps need.
    pub fn set_taps(&mut self, taps: &[Tap]) {
        self.fir = FIR::new(taps);
        let want = taps.len().saturating_sub(1);
        let have = self.history.len();
        if have > want {
            self.history.drain(..have - want);
        } else {
            let mut h = vec![T::default(); want - have];
            h.append(&mut self.history);
            self.history = h;
        }
    }

    /// Change the decimation factor.
    pub fn set_decim(&mut self, decim: usize) {
        self.decim = decim.max(1);
        self.skip = 0;
    }

    /// Filter another chunk of the stream.
    pub fn process(&mut self, input: &[T]) -> Vec<T> {
        self.history.extend_from_slice(input);
        let n = self.fir.ntaps().max(1);
        let mut out = Vec::with_capacity(input.len() / self.decim + 1);
        let mut pos = self.skip;
        while pos + n <= self.history.len() {
            out.push(self.fir.filter(&self.history[pos..pos + n]));
            pos += self.decim;
        }
        let keep_from = pos.min(self.history.len());
        self.history.drain(..keep_from);
        self.skip = pos - keep_from;
        out
    }
}

fn compute_ntaps(samp_rate: Float, twidth: Float, window_type: &WindowType) -> usize {
    let a = window_type.max_attenuation();
    let t = (a * samp_rate / (22.0 * twidth)) as usize;
    if (t & 1) == 0 { t + 1 } else { t }
}

/// Create taps for a low pass filter.
pub fn low_pass(
    samp_rate: Float,
    cutoff: Float,
    twidth: Float,
    window_type: &WindowType,
) -> Vec<Float> {
    let pi = std::f64::consts::PI as Float;
    let ntaps = compute_ntaps(samp_rate, twidth, window_type);
    let window = window_type.make_window(ntaps);
    let m = (ntaps - 1) / 2;
    let fwt0 = 2.0 * pi * cutoff / samp_rate;
    let taps: Vec<_> = window
        .0
        .iter()
        .enumerate()
        .map(|(nm, win)| {
            let n = nm as i64 - m as i64;
            let nf = n as Float;
            if n == 0 {
                fwt0 / pi * win
            } else {
                ((nf * fwt0).sin() / (nf * pi)) * win
            }
        })
        .collect();
    let fmax = taps[m] + 2.0 * taps[m + 1..].iter().sum::<Float>();
    taps.into_iter().map(|t| t / fmax).collect()
}

/// Create taps for a low pass filter as complex taps.
pub fn low_pass_complex(
    samp_rate: Float,
    cutoff: Float,
    twidth: Float,
    window_type: &WindowType,
) -> Vec<Complex> {
    low_pass(samp_rate, cutoff, twidth, window_type)
        .into_iter()
        .map(|t| Complex::new(t, 0.0))
        .collect()
}

/// Create complex taps passing `low..high` Hz, which may be asymmetric
/// around zero.
///
/// A low pass of half the width, shifted to the center of the band.
pub fn complex_band_pass(
    samp_rate: Float,
    low: Float,
    high: Float,
    twidth: Float,
    window_type: &WindowType,
) -> Vec<Complex> {
    let pi = std::f64::consts::PI as Float;
    let lp = low_pass(samp_rate, (high - low) / 2.0, twidth, window_type);
    let center = (high + low) / 2.0;
    let m = (lp.len() - 1) / 2;
    lp.into_iter()
        .enumerate()
        .map(|(n, t)| {
            let ph = 2.0 * pi * center * (n as Float - m as Float) / samp_rate;
            Complex::new(t * ph.cos(), t * ph.sin())
        })
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::tests::{assert_almost_equal_complex, assert_almost_equal_float};

    #[test]
    fn test_complex() {
        let input = vec![
            Complex::new(1.0, 0.0),
            Complex::new(2.0, 0.0),
            Complex::new(3.0, 0.2),
            Complex::new(4.1, 0.0),
            Complex::new(5.0, 0.0),
            Complex::new(6.0, 0.2),
        ];
        let taps = vec![
            Complex::new(0.1, 0.0),
            Complex::new(1.0, 0.0),
            Complex::new(0.0, 0.2),
        ];
        let filter = FIR::new(&taps);
        assert_almost_equal_complex(
            &filter.filter_n(&input),
            &[
                Complex::new(2.3, 0.22),
                Complex::new(3.41, 0.6),
                Complex::new(4.56, 0.6),
                Complex::new(5.6, 0.84),
            ],
        );
    }

    #[test]
    fn stream_matches_block() {
        let taps: Vec<Float> = vec![0.5, 0.25, 0.125, 0.0625];
        let input: Vec<Float> = (0..50).map(|n| (n as Float * 0.3).sin()).collect();
        let mut padded = vec![0.0; taps.len() - 1];
        padded.extend(&input);
        let want = FIR::new(&taps).filter_n(&padded);

        // Feed in odd sized chunks.
        let mut st = FirState::new(&taps, 1);
        let mut got = Vec::new();
        for chunk in input.chunks(7) {
            got.extend(st.process(chunk));
        }
        assert_almost_equal_float(&got, &want);
    }

    #[test]
    fn decimating_stream() {
        let taps: Vec<Float> = vec![1.0];
        let input: Vec<Float> = (0..20).map(|n| n as Float).collect();
        let mut st = FirState::new(&taps, 3);
        let mut got = Vec::new();
        for chunk in input.chunks(4) {
            got.extend(st.process(chunk));
        }
        assert_eq!(got, vec![0.0, 3.0, 6.0, 9.0, 12.0, 15.0, 18.0]);
    }

    #[test]
    fn complex_input_float_taps() {
        let mut st = FirState::<Complex, Float>::new(&[0.5, 0.5], 1);
        let got = st.process(&[Complex::new(2.0, 2.0), Complex::new(4.0, 0.0)]);
        assert_almost_equal_complex(&got, &[Complex::new(1.0, 1.0), Complex::new(3.0, 1.0)]);
    }

    #[test]
    fn set_taps_keeps_history() {
        let mut st = FirState::<Float>::new(&[1.0, 0.0, 0.0], 1);
        assert_eq!(st.process(&[1.0, 2.0, 3.0]), vec![1.0, 2.0, 3.0]);
        // Output is now the sample two back.
        st.set_taps(&[0.0, 0.0, 1.0]);
        assert_eq!(st.process(&[4.0]), vec![2.0]);
        st.set_taps(&[0.0, 1.0]);
        assert_eq!(st.process(&[5.0]), vec![4.0]);
    }

    #[test]
    fn test_filter_generator() {
        let taps = low_pass_complex(10000.0, 1000.0, 1000.0, &WindowType::Hamming);
        assert_eq!(taps.len(), 25);
        let want: Vec<Complex> = [
            0.002010403,
            0.0016210203,
            7.851862e-10,
            -0.0044467063,
            -0.011685465,
            -0.018134259,
            -0.016773716,
            -3.6538055e-9,
            0.0358771,
            0.08697697,
            0.14148787,
            0.18345332,
            0.19922684,
            0.1834533,
            0.14148785,
            0.08697697,
            0.035877097,
            -3.6538053e-9,
            -0.016773716,
            -0.018134257,
            -0.011685458,
            -0.0044467044,
            7.851859e-10,
            0.0016210207,
            0.002010403,
        ]
        .iter()
        .map(|t| Complex::new(*t, 0.0))
        .collect();
        assert_almost_equal_complex(&taps, &want);
    }

    #[test]
    fn band_pass_response() {
        // Pass 1000..3000 Hz, but not -2000 Hz.
        let rate = 48000.0;
        let taps = complex_band_pass(rate, 1000.0, 3000.0, 500.0, &WindowType::Hamming);
        let resp = |f: Float| {
            taps.iter()
                .enumerate()
                .map(|(n, t)| {
                    let ph = -2.0 * std::f64::consts::PI as Float * f * n as Float / rate;
                    *t * Complex::new(ph.cos(), ph.sin())
                })
                .sum::<Complex>()
                .norm()
        };
        assert!((resp(2000.0) - 1.0).abs() < 0.05, "{}", resp(2000.0));
        assert!(resp(-2000.0) < 0.01, "{}", resp(-2000.0));
        assert!(resp(6000.0) < 0.01, "{}", resp(6000.0));
    }
}
/* vim: textwidth=80
 */
