/*! Demodulator selection.

Each demodulator variant is a [`Demodulator`]: something that knows how to
attach itself between the AGC output and the audio resampler input, and
how to detach itself again. Switching demodulator is then just a detach
of the old one and an attach of the new one, in one graph transaction.
*/
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockHandle, BlockRet, DynBlock};
use crate::graph::MutationGuard;
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Complex, Error, Float, Result};

/// Demodulator variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Demod {
    /// No demodulator. Audio is silent.
    None,
    /// Single sideband. Which sideband is picked by the filter.
    Ssb,
    /// Amplitude modulation.
    Am,
    /// Frequency modulation.
    #[default]
    Fm,
}

impl TryFrom<i32> for Demod {
    type Error = Error;
    fn try_from(v: i32) -> Result<Self> {
        Ok(match v {
            0 => Demod::None,
            1 => Demod::Ssb,
            2 => Demod::Am,
            3 => Demod::Fm,
            _ => return Err(Error::rejected(format!("demodulator {v} out of range"))),
        })
    }
}

impl From<Demod> for i32 {
    fn from(d: Demod) -> i32 {
        match d {
            Demod::None => 0,
            Demod::Ssb => 1,
            Demod::Am => 2,
            Demod::Fm => 3,
        }
    }
}

impl FromStr for Demod {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Demod::None,
            "ssb" | "usb" | "lsb" => Demod::Ssb,
            "am" => Demod::Am,
            "fm" | "nfm" => Demod::Fm,
            _ => return Err(Error::rejected(format!("unknown demodulator {s:?}"))),
        })
    }
}

impl std::fmt::Display for Demod {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Demod::None => "none",
            Demod::Ssb => "ssb",
            Demod::Am => "am",
            Demod::Fm => "fm",
        };
        write!(f, "{s}")
    }
}

/// One port of a block, as seen by a demodulator.
pub struct Port<'a> {
    /// Block.
    pub block: &'a DynBlock,
    /// Port number.
    pub port: usize,
}

/// A pluggable demodulator path.
///
/// The default methods fit demodulators that are a single block with one
/// `Complex` input and one `Float` output.
pub trait Demodulator {
    /// Which variant this is.
    fn variant(&self) -> Demod;

    /// The block to put in the graph.
    fn block(&self) -> DynBlock;

    /// Connect between `upstream` (complex) and `downstream` (real).
    fn attach(&self, m: &mut MutationGuard<'_>, upstream: &Port, downstream: &Port) -> Result<()> {
        let b = self.block();
        m.connect(upstream.block, upstream.port, &b, 0)?;
        m.connect(&b, 0, downstream.block, downstream.port)
    }

    /// Undo `attach()`.
    fn detach(&self, m: &mut MutationGuard<'_>, upstream: &Port, downstream: &Port) -> Result<()> {
        let b = self.block();
        m.disconnect(&b, 0, downstream.block, downstream.port)?;
        m.disconnect(upstream.block, upstream.port, &b, 0)
    }
}

/// Output one zero per input sample.
///
/// Stands in for a demodulator when there is none, so the audio chain
/// keeps its pace.
#[derive(Default)]
pub struct Silence {}

impl Silence {
    /// Create new Silence block.
    pub fn new() -> Self {
        Self {}
    }
}

impl Block for Silence {
    fn block_name(&self) -> &'static str {
        "Silence"
    }
    fn inputs(&self) -> &[ItemType] {
        &[ItemType::Complex]
    }
    fn outputs(&self) -> &[ItemType] {
        &[ItemType::Float]
    }
    fn work(&mut self, r: &InputStreams, w: &mut OutputStreams) -> Result<BlockRet> {
        let n = r.get::<Complex>(0).len();
        if n == 0 {
            return Ok(BlockRet::Noop);
        }
        w.write(0, vec![0.0 as Float; n])?;
        Ok(BlockRet::Ok)
    }
}

impl Demodulator for BlockHandle<Silence> {
    fn variant(&self) -> Demod {
        Demod::None
    }
    fn block(&self) -> DynBlock {
        self.erase()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::null_sink::NullSink;

    #[test]
    fn conversions() -> Result<()> {
        for d in [Demod::None, Demod::Ssb, Demod::Am, Demod::Fm] {
            assert_eq!(Demod::try_from(i32::from(d))?, d);
            assert_eq!(d.to_string().parse::<Demod>()?, d);
        }
        assert!(matches!(Demod::try_from(4), Err(Error::Rejected(_))));
        assert!(matches!(Demod::try_from(-1), Err(Error::Rejected(_))));
        assert!(matches!("wfm".parse::<Demod>(), Err(Error::Rejected(_))));
        assert_eq!("USB".parse::<Demod>()?, Demod::Ssb);
        assert_eq!(Demod::default(), Demod::Fm);
        assert_eq!(serde_json::to_string(&Demod::Am)?, "\"am\"");
        Ok(())
    }

    #[test]
    fn attach_detach() -> Result<()> {
        struct Src;
        impl Block for Src {
            fn block_name(&self) -> &'static str {
                "Src"
            }
            fn outputs(&self) -> &[ItemType] {
                &[ItemType::Complex]
            }
            fn work(&mut self, _r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
                Ok(BlockRet::Noop)
            }
        }
        let g = Graph::new("test");
        let up = BlockHandle::new(Src).erase();
        let down = BlockHandle::new(NullSink::<Float>::new()).erase();
        let silence = BlockHandle::new(Silence::new());
        let upp = Port { block: &up, port: 0 };
        let downp = Port { block: &down, port: 0 };
        let mut m = g.lock()?;
        silence.attach(&mut m, &upp, &downp)?;
        assert!(m.is_connected(&up, 0, &silence, 0));
        assert!(m.is_connected(&silence, 0, &down, 0));
        silence.detach(&mut m, &upp, &downp)?;
        // Detaching twice fails.
        assert!(silence.detach(&mut m, &upp, &downp).is_err());
        m.commit();
        assert!(g.connections()?.is_empty());
        assert_eq!(silence.variant(), Demod::None);
        Ok(())
    }
}
/* vim: textwidth=80
 */
