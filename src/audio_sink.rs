/*! Audio output.

The receiver asks an [`AudioBackend`] for a sink block by device name. The
default [`DiscardBackend`] plays nothing, which is what tests and headless
use want. With the `audio` feature, [`CpalBackend`] plays through the
system sound card.
*/
use log::{debug, info};

use crate::block::{Block, BlockHandle, BlockRet, DynBlock};
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Error, Float, Result};

/// Something that can open audio sinks.
pub trait AudioBackend: Send {
    /// Backend name, for logging.
    fn name(&self) -> &'static str;

    /// Open a sink for `device`, consuming `rate` samples per second.
    ///
    /// Fails with `ConstructionFailure` if the device can't be opened.
    fn open(&self, device: &str, rate: Float) -> Result<DynBlock>;
}

/// Backend whose sinks throw the audio away.
///
/// Only the device names it was created with can be opened.
pub struct DiscardBackend {
    devices: Vec<String>,
}

impl Default for DiscardBackend {
    fn default() -> Self {
        Self::with_devices(&["default", "discard"])
    }
}

impl DiscardBackend {
    /// Create a backend knowing the default devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend knowing exactly these devices.
    #[must_use]
    pub fn with_devices(devices: &[&str]) -> Self {
        Self {
            devices: devices.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AudioBackend for DiscardBackend {
    fn name(&self) -> &'static str {
        "discard"
    }
    fn open(&self, device: &str, rate: Float) -> Result<DynBlock> {
        if !self.devices.iter().any(|d| d == device) {
            return Err(Error::construction(
                format!("audio sink {device:?}"),
                Error::msg(format!("no such device; have {:?}", self.devices)),
            ));
        }
        debug!("Opened discarding audio sink {device:?} at {rate} S/s");
        Ok(BlockHandle::new(AudioSink::discard(device)).erase())
    }
}

enum Output {
    Discard,
    #[cfg(feature = "audio")]
    Cpal(cpal_output::CpalOutput),
}

/// Audio sink block.
pub struct AudioSink {
    device: String,
    output: Output,
    played: u64,
    dropped: u64,
}

impl AudioSink {
    fn discard(device: &str) -> Self {
        Self {
            device: device.to_string(),
            output: Output::Discard,
            played: 0,
            dropped: 0,
        }
    }

    /// Device this sink plays to.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Samples handed to the device so far.
    #[must_use]
    pub fn played(&self) -> u64 {
        self.played
    }

    /// Samples dropped because the device didn't keep up.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        info!(
            "Closing audio sink {:?}: {} samples played, {} dropped",
            self.device, self.played, self.dropped
        );
    }
}

impl Block for AudioSink {
    fn block_name(&self) -> &'static str {
        "AudioSink"
    }
    fn inputs(&self) -> &[ItemType] {
        &[ItemType::Float]
    }
    fn work(&mut self, r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
        let input = r.get::<Float>(0);
        if input.is_empty() {
            return Ok(BlockRet::Noop);
        }
        match &self.output {
            Output::Discard => self.played += input.len() as u64,
            #[cfg(feature = "audio")]
            Output::Cpal(out) => {
                let sent = out.send(input)?;
                self.played += sent as u64;
                let lost = (input.len() - sent) as u64;
                if lost > 0 {
                    log::trace!("Audio sink {:?} dropped {lost} samples", self.device);
                }
                self.dropped += lost;
            }
        }
        Ok(BlockRet::Ok)
    }
}

#[cfg(feature = "audio")]
pub use cpal_output::CpalBackend;

#[cfg(feature = "audio")]
mod cpal_output {
    use std::sync::mpsc::{Receiver, Sender, SyncSender, TrySendError, channel, sync_channel};
    use std::thread::JoinHandle;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use log::{debug, error, info, trace};

    use super::{AudioBackend, AudioSink, Output};
    use crate::block::{BlockHandle, DynBlock};
    use crate::{Error, Float, Result};

    /// Seconds of audio buffered between the graph and the sound card.
    const BUFFER_SECONDS: usize = 3;

    /// Backend playing through the default cpal host.
    ///
    /// The device `default` is the host's default output device. Other
    /// names must match a device name exactly.
    #[derive(Default)]
    pub struct CpalBackend {}

    impl CpalBackend {
        /// Create new cpal backend.
        #[must_use]
        pub fn new() -> Self {
            Self {}
        }
    }

    impl AudioBackend for CpalBackend {
        fn name(&self) -> &'static str {
            "cpal"
        }
        fn open(&self, device: &str, rate: Float) -> Result<DynBlock> {
            let out = CpalOutput::new(device, rate as u32)
                .map_err(|e| Error::construction(format!("audio sink {device:?}"), e))?;
            Ok(BlockHandle::new(AudioSink {
                device: device.to_string(),
                output: Output::Cpal(out),
                played: 0,
                dropped: 0,
            })
            .erase())
        }
    }

    /// A running cpal output stream.
    ///
    /// `cpal::Stream` can't move between threads, so it lives on its own
    /// thread until the sender half of `stop` is dropped.
    pub(super) struct CpalOutput {
        sender: SyncSender<f32>,
        stop: Option<Sender<()>>,
        thread: Option<JoinHandle<()>>,
    }

    fn find_device(host: &cpal::Host, name: &str) -> Result<cpal::Device> {
        let dev = if name == "default" {
            host.default_output_device()
        } else {
            host.output_devices()
                .map_err(|e| Error::device(e, "listing audio output devices"))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        };
        dev.ok_or_else(|| Error::msg(format!("no audio output device {name:?}")))
    }

    fn build(name: &str, rate: u32, receiver: Receiver<f32>) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        debug!("Audio sink using host {}", host.id().name());
        let device = find_device(&host, name)?;
        info!(
            "Audio sink output device: {}",
            device.name().unwrap_or_else(|_| name.to_string())
        );
        if let Ok(confs) = device.supported_output_configs() {
            trace!("Audio sink supported output configs:");
            for conf in confs {
                trace!("  {conf:?}");
            }
        }
        let mut config: cpal::StreamConfig = device
            .default_output_config()
            .map_err(|e| Error::device(e, "default audio output config"))?
            .into();
        config.sample_rate = cpal::SampleRate(rate);
        config.channels = 1;
        let channels = config.channels as usize;
        debug!("Audio sink starting output stream {config:?}");
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        // Underrun plays silence.
                        frame.fill(receiver.try_recv().unwrap_or(0.0));
                    }
                },
                |err| error!("Audio output stream: {err}"),
                None,
            )
            .map_err(|e| Error::device(e, "building audio output stream"))?;
        stream
            .play()
            .map_err(|e| Error::device(e, "starting audio output stream"))?;
        Ok(stream)
    }

    impl CpalOutput {
        fn new(device: &str, rate: u32) -> Result<Self> {
            let (sender, receiver) = sync_channel::<f32>(rate as usize * BUFFER_SECONDS);
            let (ready_tx, ready_rx) = sync_channel::<Result<()>>(1);
            let (stop, stop_rx) = channel::<()>();
            let name = device.to_string();
            let thread = std::thread::Builder::new()
                .name("audio-out".to_string())
                .spawn(move || {
                    let stream = match build(&name, rate, receiver) {
                        Ok(s) => s,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    // Returns Err once the sink is dropped.
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("Audio output stream {name:?} closed");
                })?;
            ready_rx
                .recv()
                .map_err(|_| Error::msg("audio output thread died"))??;
            Ok(Self {
                sender,
                stop: Some(stop),
                thread: Some(thread),
            })
        }

        /// Queue samples. Returns how many fit in the buffer.
        pub(super) fn send(&self, data: &[Float]) -> Result<usize> {
            for (n, s) in data.iter().enumerate() {
                match self.sender.try_send(*s as f32) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => return Ok(n),
                    Err(TrySendError::Disconnected(_)) => {
                        return Err(Error::msg("audio output stream went away"));
                    }
                }
            }
            Ok(data.len())
        }
    }

    impl Drop for CpalOutput {
        fn drop(&mut self) {
            self.stop.take();
            if let Some(t) = self.thread.take()
                && t.join().is_err()
            {
                error!("Audio output thread panicked");
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::stream::Samples;

    #[test]
    fn discard_known_devices() -> Result<()> {
        let b = DiscardBackend::new();
        assert_eq!(b.name(), "discard");
        let sink = b.open("default", 48_000.0)?;
        assert_eq!(sink.name(), "AudioSink");
        assert!(matches!(
            b.open("hw:7", 48_000.0),
            Err(Error::ConstructionFailure { .. })
        ));
        let b = DiscardBackend::with_devices(&["hw:7"]);
        b.open("hw:7", 48_000.0)?;
        assert!(b.open("default", 48_000.0).is_err());
        Ok(())
    }

    #[test]
    fn counts_played() -> Result<()> {
        let mut sink = AudioSink::discard("default");
        let r = InputStreams::new(vec![Some(Samples::Float(vec![0.1; 480]))]);
        assert_eq!(sink.work(&r, &mut OutputStreams::new(&[], vec![]))?, BlockRet::Ok);
        let r = InputStreams::new(vec![Some(Samples::Float(vec![]))]);
        assert_eq!(sink.work(&r, &mut OutputStreams::new(&[], vec![]))?, BlockRet::Noop);
        assert_eq!(sink.played(), 480);
        assert_eq!(sink.dropped(), 0);
        assert_eq!(sink.device(), "default");
        Ok(())
    }
}
/* vim: textwidth=80
 */
