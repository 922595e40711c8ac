/*! This crate is a software defined radio receiver, built around a flow
graph that can be rewired while samples are flowing.

It's heavily inspired by the receiver in [Gqrx][gqrx] and by
[GNURadio][gnuradio] top blocks, except of course written in Rust.

# Architecture overview

A receiver consists of blocks that are connected port to port. Each block
has zero or more input ports, and zero or more output ports, and each port
carries either real (`Float`) or I/Q (`Complex`) samples.

The [`graph::Graph`] owns the blocks and connections, and runs them on a
background thread once started. Changing the topology is only possible
through a [`graph::MutationGuard`], which locks the graph for the duration
of the change, and rolls back anything not explicitly committed.

The [`receiver::Receiver`] owns the graph and hides it. Callers tune,
change demodulator, start and stop recordings, and the receiver turns each
of those into a short transaction on the graph.

The default receiver graph looks like this:

```text
      [ RxSource ]
           ↓
    [ NoiseBlanker ]
           ↓
      [ DcCorr ] → [ FftProbe (I/Q) ]
           ↓
 [ FreqXlatingFir, decimating ]
           ↓
      [ RxFilter ] → [ RxMeter ]
           ↓
      [ Squelch ]
           ↓
        [ Agc ]
           ↓
   [ Demodulator (None/SSB/AM/FM) ]
           ↓
 [ RationalResampler to audio rate ] → [ FftProbe (audio) ]
           ↓
   [ MultiplyConst AF gain ]
           ↓
      [ Audio sink ]
```

Recorders, players and the sniffer are spliced in at "tap points" of this
graph on demand.

# Example

```
use rustrx::config::ReceiverConfig;
use rustrx::demod::Demod;
use rustrx::receiver::Receiver;

let mut rx = Receiver::new(&ReceiverConfig::default())?;
rx.start()?;
rx.set_demod(Demod::Am)?;
rx.set_demod(Demod::Fm)?;
rx.stop()?;
assert_eq!(rx.demod(), Demod::Fm);
# Ok::<(), rustrx::Error>(())
```

[gqrx]: https://gqrx.dk/
[gnuradio]: https://www.gnuradio.org/
 */

pub mod agc;
pub mod am_demod;
pub mod audio_sink;
pub mod block;
pub mod complex_to_real;
pub mod config;
pub mod dc_corr;
pub mod demod;
pub mod fft_filter;
pub mod fft_probe;
pub mod file_sink;
pub mod file_source;
pub mod fir;
pub mod fm_demod;
pub mod graph;
pub mod meter;
pub mod multiply_const;
pub mod noise_blanker;
pub mod null_sink;
pub mod rational_resampler;
pub mod receiver;
pub mod rx_filter;
pub mod single_pole_iir_filter;
pub mod sniffer;
pub mod source;
pub mod squelch;
pub mod stream;
pub mod telemetry;
pub mod throttle;
pub mod wav;
pub mod window;
pub mod xlating_fir;

#[cfg(feature = "soapysdr")]
pub mod soapysdr_source;

/// Float type used. Usually f32, but not guaranteed.
pub type Float = f32;

/// Complex (I/Q) data.
pub type Complex = num_complex::Complex<Float>;

/// RustRX error.
///
/// The first four variants are the receiver's control-path taxonomy. The rest
/// carry lower level failures up to the caller.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid argument. Nothing was changed.
    #[error("rejected: {0}")]
    Rejected(String),

    /// A collaborator applied something other than what was requested.
    #[error("{what}: requested {requested}, got {actual}")]
    CollaboratorMismatch {
        what: &'static str,
        requested: f64,
        actual: f64,
    },

    /// Request to enter a state that is already active, or leave one that
    /// isn't.
    #[error("already in state: {0}")]
    AlreadyInState(String),

    /// A file or device could not be opened. Topology was not touched.
    #[error("failed to construct {what}: {source}")]
    ConstructionFailure {
        what: String,
        #[source]
        source: Box<Error>,
    },

    #[error("IO Error on file {path:?}: {source}")]
    FileIo {
        #[source]
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device error: {msg}: {source}")]
    Device {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
        msg: String,
    },

    #[error("{msg}: {source}")]
    Wrap {
        #[source]
        source: Box<Error>,
        msg: String,
    },

    #[error("config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("An error occurred: {0}")]
    Msg(String),
}

impl Error {
    /// Create error from message.
    pub fn msg<S: Into<String>>(msg: S) -> Self {
        Self::Msg(msg.into())
    }

    /// Create a `Rejected` error.
    pub fn rejected<S: Into<String>>(msg: S) -> Self {
        Self::Rejected(msg.into())
    }

    /// Create an `AlreadyInState` error.
    pub fn already<S: Into<String>>(msg: S) -> Self {
        Self::AlreadyInState(msg.into())
    }

    /// Wrap an error in a `ConstructionFailure`.
    pub fn construction<S: Into<String>>(what: S, source: Error) -> Self {
        Self::ConstructionFailure {
            what: what.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an IO error also including the path.
    pub fn file_io<P: Into<std::path::PathBuf>>(source: std::io::Error, path: P) -> Self {
        Self::FileIo {
            source,
            path: path.into(),
        }
    }

    /// Wrap a device error, adding a message.
    pub fn device<E, S>(source: E, msg: S) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
        S: Into<String>,
    {
        Self::Device {
            source: Box::new(source),
            msg: msg.into(),
        }
    }

    /// Wrap an existing error, adding a message.
    pub fn wrap<S: Into<String>>(source: Error, msg: S) -> Self {
        Self::Wrap {
            source: Box::new(source),
            msg: msg.into(),
        }
    }
}

/// Result convenience type.
pub type Result<T> = std::result::Result<T, Error>;

/// A trait for sample types that can be written to and read from raw files.
pub trait Sample: Copy + Default {
    /// The serialized size of one sample.
    fn size() -> usize;

    /// Parse one sample.
    fn parse(data: &[u8]) -> Result<Self>;

    /// Serialize one sample.
    fn serialize(&self) -> Vec<u8>;
}

impl Sample for Complex {
    fn size() -> usize {
        std::mem::size_of::<Self>()
    }
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != Self::size() {
            return Err(Error::msg(format!(
                "Complex: want {} bytes, got {}",
                Self::size(),
                data.len()
            )));
        }
        let half = Self::size() / 2;
        let i = Float::from_le_bytes(data[0..half].try_into().map_err(|_| {
            Error::msg("Complex: bad I slice")
        })?);
        let q = Float::from_le_bytes(data[half..].try_into().map_err(|_| {
            Error::msg("Complex: bad Q slice")
        })?);
        Ok(Complex::new(i, q))
    }
    fn serialize(&self) -> Vec<u8> {
        let mut ret = Vec::with_capacity(Self::size());
        ret.extend(Float::to_le_bytes(self.re));
        ret.extend(Float::to_le_bytes(self.im));
        ret
    }
}

impl Sample for Float {
    fn size() -> usize {
        std::mem::size_of::<Self>()
    }
    fn parse(data: &[u8]) -> Result<Self> {
        let b: [u8; 4] = data
            .try_into()
            .map_err(|_| Error::msg(format!("Float: want 4 bytes, got {}", data.len())))?;
        Ok(Float::from_le_bytes(b))
    }
    fn serialize(&self) -> Vec<u8> {
        Float::to_le_bytes(*self).to_vec()
    }
}
