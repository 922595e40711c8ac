//! Window functions
//!
//! Used both for FIR filter design and for the spectrum probes.
//!
//! https://en.wikipedia.org/wiki/Window_function
//! https://en.wikipedia.org/wiki/Spectral_leakage
use crate::Float;

const PI: Float = std::f64::consts::PI as Float;

/// A window, ready to be multiplied with taps or samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Window(pub Vec<Float>);

impl Window {
    /// Sum of the window coefficients.
    ///
    /// Used to normalize spectrum magnitudes.
    #[must_use]
    pub fn gain(&self) -> Float {
        self.0.iter().sum()
    }
}

/// Window type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowType {
    /// No windowing.
    Rectangular,
    /// Hamming window. The usual choice for filter design.
    Hamming,
    /// Blackman window.
    Blackman,
    /// Blackman-Harris window. The usual choice for spectrum plots.
    BlackmanHarris,
}

impl WindowType {
    /// Stop band attenuation in dB, roughly, for a filter designed with
    /// this window.
    #[must_use]
    pub fn max_attenuation(&self) -> Float {
        match self {
            WindowType::Rectangular => 21.0,
            WindowType::Hamming => 53.0,
            WindowType::Blackman => 74.0,
            WindowType::BlackmanHarris => 92.0,
        }
    }

    /// Create window of this type and size.
    #[must_use]
    pub fn make_window(&self, ntaps: usize) -> Window {
        Window(match self {
            WindowType::Rectangular => vec![1.0; ntaps],
            WindowType::Hamming => hamming(ntaps),
            WindowType::Blackman => blackman(ntaps),
            WindowType::BlackmanHarris => blackman_harris(ntaps),
        })
    }
}

/// Create Hamming window.
///
/// https://en.wikipedia.org/wiki/Window_function#Hann_and_Hamming_windows
#[must_use]
pub fn hamming(ntaps: usize) -> Vec<Float> {
    if ntaps < 2 {
        return vec![1.0; ntaps];
    }
    // Hamming's paper has 25/46. 0.54 is what filter design tools use.
    let a0 = 0.54;
    let a1 = 0.46;
    let m = (ntaps - 1) as Float;
    (0..ntaps)
        .map(|n| a0 - a1 * (2.0 * PI * (n as Float) / m).cos())
        .collect()
}

/// Create Blackman window.
///
/// https://en.wikipedia.org/wiki/Window_function#Blackman_window
#[must_use]
pub fn blackman(m: usize) -> Vec<Float> {
    // Blackman's "not very serious proposal" magic value.
    let a = 0.16;
    let a0 = (1.0 - a) / 2.0;
    let a1 = 0.5;
    let a2 = a / 2.0;
    let mf = m as Float;
    (0..m)
        .map(|n| {
            let n = n as Float;
            a0 - a1 * (2.0 * PI * n / mf).cos() + a2 * (4.0 * PI * n / mf).cos()
        })
        .collect()
}

/// Create Blackman-Harris window.
///
/// https://en.wikipedia.org/wiki/Window_function#Blackman%E2%80%93Harris_window
#[must_use]
pub fn blackman_harris(m: usize) -> Vec<Float> {
    const A0: Float = 0.35875;
    const A1: Float = 0.48829;
    const A2: Float = 0.14128;
    const A3: Float = 0.01168;
    let mf = m as Float;
    (0..m)
        .map(|n| {
            let n = n as Float;
            let t = 2.0 * PI * n / mf;
            A0 - A1 * t.cos() + A2 * (2.0 * t).cos() - A3 * (3.0 * t).cos()
        })
        .collect()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn hamming_symmetric() {
        let w = hamming(11);
        assert_eq!(w.len(), 11);
        for i in 0..5 {
            assert!((w[i] - w[10 - i]).abs() < 1e-6, "{w:?}");
        }
        assert!((w[5] - 1.0).abs() < 1e-6);
        assert!((w[0] - 0.08).abs() < 1e-6);
    }

    #[test]
    fn blackman_harris_shape() {
        let w = WindowType::BlackmanHarris.make_window(64);
        assert_eq!(w.0.len(), 64);
        assert!(w.0[0] < 0.001);
        assert!((w.0[32] - 1.0).abs() < 1e-3);
        assert!(w.gain() > 20.0 && w.gain() < 30.0, "{}", w.gain());
    }

    #[test]
    fn tiny_windows() {
        assert!(hamming(0).is_empty());
        assert_eq!(hamming(1), vec![1.0]);
        assert_eq!(WindowType::Rectangular.make_window(3).gain(), 3.0);
    }
}
/* vim: textwidth=80
 */
