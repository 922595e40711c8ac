//! Single pole Infinite Impulse Response (IIR) filter.
//!
//! `y[n] = alpha * x[n] + (1 - alpha) * y[n-1]`
//!
//! Used as a running average by the squelch, the DC blocker, and the
//! signal meter.
use crate::{Error, Float, Result};

/// Single pole IIR filter state.
#[derive(Clone, Debug)]
pub struct SinglePoleIIR<T> {
    alpha: Float,
    one_minus_alpha: Float,
    prev_output: T,
}

impl<T> SinglePoleIIR<T>
where
    T: Copy + Default + std::ops::Mul<Float, Output = T> + std::ops::Add<Output = T>,
{
    /// Create new filter. `alpha` must be in `[0, 1]`.
    pub fn new(alpha: Float) -> Result<Self> {
        let mut r = Self {
            alpha: Float::default(),
            one_minus_alpha: Float::default(),
            prev_output: T::default(),
        };
        r.set_taps(alpha)?;
        Ok(r)
    }

    /// Filter one sample.
    pub fn filter(&mut self, sample: T) -> T {
        let o = sample * self.alpha + self.prev_output * self.one_minus_alpha;
        self.prev_output = o;
        o
    }

    /// Latest output.
    #[must_use]
    pub fn prev_output(&self) -> T {
        self.prev_output
    }

    /// Current alpha.
    #[must_use]
    pub fn alpha(&self) -> Float {
        self.alpha
    }

    /// Change alpha, keeping the state.
    pub fn set_taps(&mut self, alpha: Float) -> Result<()> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(Error::rejected(format!(
                "IIR alpha {alpha} outside [0, 1]"
            )));
        }
        self.alpha = alpha;
        self.one_minus_alpha = 1.0 - alpha;
        Ok(())
    }

    /// Reset the filter state.
    pub fn reset(&mut self, value: T) {
        self.prev_output = value;
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::Complex;

    #[test]
    fn iir_ff() -> Result<()> {
        let mut iir = SinglePoleIIR::<Float>::new(0.5)?;
        assert_eq!(iir.filter(1.0), 0.5);
        assert_eq!(iir.filter(1.0), 0.75);
        assert_eq!(iir.filter(0.0), 0.375);
        assert_eq!(iir.prev_output(), 0.375);
        Ok(())
    }

    #[test]
    fn iir_cc() -> Result<()> {
        let mut iir = SinglePoleIIR::<Complex>::new(0.2)?;
        let mut last = Complex::default();
        for _ in 0..200 {
            last = iir.filter(Complex::new(1.0, 0.1));
        }
        assert!((last - Complex::new(1.0, 0.1)).norm() < 1e-4, "{last}");
        Ok(())
    }

    #[test]
    fn reject_bad_alpha() -> Result<()> {
        for tv in [0.0, 0.1, 1.0] {
            SinglePoleIIR::<Float>::new(tv)?;
        }
        assert!(matches!(
            SinglePoleIIR::<Float>::new(-0.1),
            Err(Error::Rejected(_))
        ));
        let mut iir = SinglePoleIIR::<Float>::new(0.3)?;
        assert!(iir.set_taps(1.1).is_err());
        assert_eq!(iir.alpha(), 0.3);
        iir.reset(2.0);
        assert_eq!(iir.prev_output(), 2.0);
        Ok(())
    }
}
/* vim: textwidth=80
 */
