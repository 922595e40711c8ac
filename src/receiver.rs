/*! The receiver controller.

[`Receiver`] owns the flow graph and every block in it, and offers a
control API that doesn't mention blocks or ports. Each control change that
needs the topology changed is one transaction on the graph: lock, a few
connects and disconnects, commit. Any error on the way drops the guard
uncommitted, which puts the graph back the way it was, and the receiver
state is only updated after the commit.

Features that can be turned on and off (recording, playback, sniffing)
each have a [`Toggle`]. Turning on something that is on, or off something
that is off, fails with `AlreadyInState`.

```text
src → nb → dc_corr ─┬→ iq_fft
                    └→ xlate → filter ─┬→ meter
                                       └→ sql → agc → [demod] → audio_rr ─┬→ audio_fft
                                                                          └→ audio_gain → audio_sink
```
*/
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::agc::{Agc, AgcParams};
use crate::am_demod::AmDemod;
use crate::audio_sink::{AudioBackend, DiscardBackend};
use crate::block::{BlockHandle, DynBlock};
use crate::complex_to_real::ComplexToReal;
use crate::config::{AUDIO_RATE, IF_RATE, ReceiverConfig};
use crate::dc_corr::DcCorr;
use crate::demod::{Demod, Demodulator, Port, Silence};
use crate::fft_probe::FftProbe;
use crate::file_sink::{FileSink, Mode};
use crate::file_source::FileSource;
use crate::fir::low_pass;
use crate::fm_demod::FmDemod;
use crate::graph::{Graph, Snapshot};
use crate::meter::RxMeter;
use crate::multiply_const::MultiplyConst;
use crate::noise_blanker::NoiseBlanker;
use crate::null_sink::NullSink;
use crate::rational_resampler::RationalResampler;
use crate::rx_filter::{FilterShape, RxFilter};
use crate::sniffer::Sniffer;
use crate::source::{self, SourceHandle};
use crate::squelch::Squelch;
use crate::wav::{WavSink, WavSource};
use crate::window::WindowType;
use crate::xlating_fir::FreqXlatingFir;
use crate::{Complex, Error, Float, Result};

/// I/Q spectrum size.
pub const IQ_FFT_SIZE: usize = 4096;

/// Audio spectrum size.
pub const AUDIO_FFT_SIZE: usize = 3072;

const XLATE_CUTOFF: Float = 40_000.0;
const XLATE_TRANSITION: Float = 15_000.0;
const DC_CORR_ALPHA: Float = 0.01;
const METER_ALPHA: Float = 0.01;
const SQL_LEVEL: Float = -150.0;
const SQL_ALPHA: Float = 0.001;
const NB_THRESHOLDS: (Float, Float) = (3.3, 2.5);
const FM_MAX_DEV: Float = 5000.0;
const FM_TAU: Float = 75e-6;
const SNIFFER_DEFAULT_SIZE: usize = 48_000;

/// Whether the graph is streaming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

/// State of one feature that can be turned on and off.
///
/// While on, it holds whatever the feature needs to turn itself off.
#[derive(Debug)]
pub enum Toggle<T> {
    Off,
    On(T),
}

impl<T> Toggle<T> {
    /// True if on.
    #[must_use]
    pub fn is_on(&self) -> bool {
        matches!(self, Toggle::On(_))
    }

    /// Get the contents, if on.
    #[must_use]
    pub fn active(&self) -> Option<&T> {
        match self {
            Toggle::Off => None,
            Toggle::On(t) => Some(t),
        }
    }

    fn require_off(&self, what: &str) -> Result<()> {
        if self.is_on() {
            return Err(Error::already(format!("{what} already active")));
        }
        Ok(())
    }

    fn require_on(&self, what: &str) -> Result<&T> {
        self.active()
            .ok_or_else(|| Error::already(format!("{what} not active")))
    }
}

/// A block spliced in for a file, and its file name.
pub struct FileTap<B> {
    block: BlockHandle<B>,
    path: PathBuf,
}

impl<B> FileTap<B> {
    /// File being read or written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn xlate_taps(input_rate: f64) -> Vec<Float> {
    low_pass(
        input_rate as Float,
        XLATE_CUTOFF,
        XLATE_TRANSITION,
        &WindowType::Hamming,
    )
}

fn decimation(input_rate: f64) -> Result<usize> {
    ReceiverConfig {
        input_rate,
        ..ReceiverConfig::default()
    }
    .decimation()
}

fn af_factor(db: Float) -> Float {
    Float::powf(10.0, db / 20.0)
}

fn check_readback(what: &'static str, requested: f64, actual: f64) -> Result<()> {
    if requested != actual {
        return Err(Error::CollaboratorMismatch {
            what,
            requested,
            actual,
        });
    }
    Ok(())
}

/// The receiver.
pub struct Receiver {
    graph: Graph,
    backend: Box<dyn AudioBackend>,

    input_rate: f64,
    rf_freq: f64,
    filter_offset: f64,
    demod: Demod,
    af_gain: Float,
    output_device: String,

    audio_rec: Toggle<FileTap<WavSink>>,
    audio_play: Toggle<FileTap<WavSource>>,
    iq_rec: Toggle<FileTap<FileSink<Complex>>>,
    iq_play: Toggle<FileTap<FileSource<Complex>>>,
    sniffer_tap: Toggle<BlockHandle<RationalResampler>>,

    src: SourceHandle,
    nb: BlockHandle<NoiseBlanker>,
    dc_corr: BlockHandle<DcCorr>,
    iq_fft: BlockHandle<FftProbe<Complex>>,
    xlate: BlockHandle<FreqXlatingFir>,
    filter: BlockHandle<RxFilter>,
    meter: BlockHandle<RxMeter>,
    sql: BlockHandle<Squelch>,
    agc: BlockHandle<Agc>,
    demod_none: BlockHandle<Silence>,
    demod_ssb: BlockHandle<ComplexToReal>,
    demod_am: BlockHandle<AmDemod>,
    demod_fm: BlockHandle<FmDemod>,
    audio_rr: BlockHandle<RationalResampler>,
    audio_fft: BlockHandle<FftProbe<Float>>,
    audio_gain: BlockHandle<MultiplyConst>,
    audio_sink: DynBlock,
    audio_null_sink: BlockHandle<NullSink<Float>>,
    sniffer: BlockHandle<Sniffer>,
}

impl Receiver {
    /// Create a receiver whose audio goes nowhere.
    pub fn new(cfg: &ReceiverConfig) -> Result<Self> {
        Self::with_backend(cfg, Box::new(DiscardBackend::new()))
    }

    /// Create a receiver playing audio through `backend`.
    ///
    /// Opens the source and audio devices, and builds the default graph.
    /// The receiver starts out stopped.
    pub fn with_backend(cfg: &ReceiverConfig, backend: Box<dyn AudioBackend>) -> Result<Self> {
        cfg.validate()?;
        let src = source::open(&cfg.input_device, cfg.input_rate)?;
        Self::with_source(cfg, src, backend)
    }

    /// Create a receiver around a source that's already open.
    ///
    /// `cfg.input_device` is only used for logging.
    pub fn with_source(
        cfg: &ReceiverConfig,
        src: SourceHandle,
        backend: Box<dyn AudioBackend>,
    ) -> Result<Self> {
        cfg.validate()?;
        let decim = cfg.decimation()?;
        let (rf_freq, input_rate) = {
            let mut s = src.lock()?;
            let rate = s.set_sample_rate(cfg.input_rate)?;
            check_readback("input sample rate", cfg.input_rate, rate)?;
            (s.set_freq(cfg.rf_freq)?, rate)
        };
        let tw = cfg
            .filter_shape
            .transition_width(cfg.filter_low, cfg.filter_high)?;
        let audio_sink = backend.open(&cfg.output_device, AUDIO_RATE as Float)?;
        info!(
            "Receiver: {} at {input_rate} S/s, audio to {} via {}",
            cfg.input_device,
            cfg.output_device,
            backend.name()
        );

        let if_rate = IF_RATE as Float;
        let rx = Self {
            graph: Graph::new("receiver"),
            backend,
            input_rate,
            rf_freq,
            filter_offset: cfg.filter_offset,
            demod: cfg.demod,
            af_gain: cfg.af_gain,
            output_device: cfg.output_device.clone(),
            audio_rec: Toggle::Off,
            audio_play: Toggle::Off,
            iq_rec: Toggle::Off,
            iq_play: Toggle::Off,
            sniffer_tap: Toggle::Off,
            src,
            nb: BlockHandle::new(NoiseBlanker::new(NB_THRESHOLDS.0, NB_THRESHOLDS.1)),
            dc_corr: BlockHandle::new(DcCorr::new(DC_CORR_ALPHA)?),
            iq_fft: BlockHandle::new(FftProbe::new(IQ_FFT_SIZE)?),
            xlate: BlockHandle::new(FreqXlatingFir::new(
                &xlate_taps(input_rate),
                decim,
                -cfg.filter_offset,
                input_rate,
            )?),
            filter: BlockHandle::new(RxFilter::new(
                if_rate,
                cfg.filter_low,
                cfg.filter_high,
                tw,
            )?),
            meter: BlockHandle::new(RxMeter::new(METER_ALPHA)?),
            sql: BlockHandle::new(Squelch::new(SQL_LEVEL, SQL_ALPHA)?),
            agc: BlockHandle::new(Agc::new(if_rate, AgcParams::default())?),
            demod_none: BlockHandle::new(Silence::new()),
            demod_ssb: BlockHandle::new(ComplexToReal::new()),
            demod_am: BlockHandle::new(AmDemod::new(true)?),
            demod_fm: BlockHandle::new(FmDemod::new(if_rate, FM_MAX_DEV, FM_TAU)?),
            audio_rr: BlockHandle::new(RationalResampler::from_rates(
                if_rate,
                AUDIO_RATE as Float,
            )?),
            audio_fft: BlockHandle::new(FftProbe::new(AUDIO_FFT_SIZE)?),
            audio_gain: BlockHandle::new(MultiplyConst::new(af_factor(cfg.af_gain))),
            audio_sink,
            audio_null_sink: BlockHandle::new(NullSink::new()),
            sniffer: BlockHandle::new(Sniffer::new(SNIFFER_DEFAULT_SIZE)?),
        };
        rx.connect_default()?;
        Ok(rx)
    }

    fn connect_default(&self) -> Result<()> {
        let mut m = self.graph.lock()?;
        m.connect(&self.src, 0, &self.nb, 0)?;
        m.connect(&self.nb, 0, &self.dc_corr, 0)?;
        m.connect(&self.dc_corr, 0, &self.iq_fft, 0)?;
        m.connect(&self.dc_corr, 0, &self.xlate, 0)?;
        m.connect(&self.xlate, 0, &self.filter, 0)?;
        m.connect(&self.filter, 0, &self.meter, 0)?;
        m.connect(&self.filter, 0, &self.sql, 0)?;
        m.connect(&self.sql, 0, &self.agc, 0)?;
        let (agc, rr) = (self.agc.erase(), self.audio_rr.erase());
        self.demodulator(self.demod)
            .attach(&mut m, &Port { block: &agc, port: 0 }, &Port { block: &rr, port: 0 })?;
        m.connect(&self.audio_rr, 0, &self.audio_fft, 0)?;
        m.connect(&self.audio_rr, 0, &self.audio_gain, 0)?;
        m.connect(&self.audio_gain, 0, &self.audio_sink, 0)?;
        m.commit();
        Ok(())
    }

    fn demodulator(&self, d: Demod) -> &dyn Demodulator {
        match d {
            Demod::None => &self.demod_none,
            Demod::Ssb => &self.demod_ssb,
            Demod::Am => &self.demod_am,
            Demod::Fm => &self.demod_fm,
        }
    }

    /// The block currently producing raw I/Q: the source, or the I/Q
    /// playback.
    fn raw_tap(&self) -> DynBlock {
        match &self.iq_play {
            Toggle::On(p) => p.block.erase(),
            Toggle::Off => self.src.erase(),
        }
    }

    /// Start streaming. A no-op if already running.
    ///
    /// If the graph runner died, it's started over.
    pub fn start(&mut self) -> Result<()> {
        if self.graph.is_running() {
            return Ok(());
        }
        self.graph.start()?;
        info!("Receiver started");
        Ok(())
    }

    /// Stop streaming, and wait until no block runs. A no-op if stopped.
    ///
    /// If the graph runner died, its error is returned, and the receiver is
    /// stopped anyway.
    pub fn stop(&mut self) -> Result<()> {
        let was_running = self.graph.is_running();
        let ret = self.graph.stop();
        if was_running {
            info!("Receiver stopped");
        }
        ret
    }

    /// Run state, as the graph runner sees it.
    #[must_use]
    pub fn run_state(&self) -> RunState {
        if self.graph.is_running() {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }

    /// True if running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    /// Names of blocks that failed while running, and are no longer fed.
    ///
    /// A failed recorder stays failed until it's stopped and started again.
    pub fn failed_blocks(&self) -> Result<Vec<&'static str>> {
        Ok(self.graph.failed()?.into_iter().map(|(_, name)| name).collect())
    }

    /// Switch source device.
    ///
    /// A device of the same driver is reopened in place. A different
    /// driver means a new source block, which takes the old one's place in
    /// the graph, tuned to the same frequency.
    pub fn set_input_device(&mut self, device: &str) -> Result<()> {
        let (new_driver, _) = source::parse_device(device)?;
        let same = {
            let s = self.src.lock()?;
            source::parse_device(s.device())?.0 == new_driver
        };
        if same {
            self.src.lock()?.select_device(device)?;
            info!("Input device now {device}");
            return Ok(());
        }
        let new = source::open(device, self.input_rate)?;
        let rf_freq = {
            let mut s = new.lock()?;
            let rate = s.set_sample_rate(self.input_rate)?;
            check_readback("input sample rate", self.input_rate, rate)?;
            s.set_freq(self.rf_freq)?
        };
        if self.iq_play.is_on() {
            // The hardware source isn't in the graph during playback.
            debug!("Replacing idle source");
        } else {
            let mut m = self.graph.lock()?;
            m.disconnect(&self.src, 0, &self.nb, 0)?;
            m.connect(&new, 0, &self.nb, 0)?;
            if let Toggle::On(rec) = &self.iq_rec {
                m.disconnect(&self.src, 0, &rec.block, 0)?;
                m.connect(&new, 0, &rec.block, 0)?;
            }
            m.commit();
        }
        self.src = new;
        self.rf_freq = rf_freq;
        info!("Input device now {device}");
        Ok(())
    }

    /// Switch audio output device.
    ///
    /// The new sink is opened before the old one is touched, so a device
    /// that can't be opened leaves the old one playing.
    pub fn set_output_device(&mut self, device: &str) -> Result<()> {
        let new = self.backend.open(device, AUDIO_RATE as Float)?;
        {
            let mut m = self.graph.lock()?;
            m.disconnect(&self.audio_gain, 0, &self.audio_sink, 0)?;
            m.connect(&self.audio_gain, 0, &new, 0)?;
            m.commit();
        }
        let old = std::mem::replace(&mut self.audio_sink, new);
        drop(old);
        self.output_device = device.to_string();
        info!("Audio output now {device}");
        Ok(())
    }

    /// Current audio output device.
    #[must_use]
    pub fn output_device(&self) -> &str {
        &self.output_device
    }

    /// Tune. Returns the frequency the source actually tuned to.
    pub fn set_rf_freq(&mut self, hz: f64) -> Result<f64> {
        let applied = self.src.lock()?.set_freq(hz)?;
        self.rf_freq = applied;
        debug!("RF frequency {applied} Hz");
        Ok(applied)
    }

    /// Frequency the source is tuned to.
    pub fn get_rf_freq(&self) -> Result<f64> {
        Ok(self.src.lock()?.get_freq())
    }

    /// Set source sample rate.
    ///
    /// Must be a multiple of the intermediate rate. Rejected during I/Q
    /// playback, whose pace is fixed at the rate it was started with.
    ///
    /// If the source settles on a rate that isn't a multiple of the
    /// intermediate rate, it's put back to the old rate and
    /// `CollaboratorMismatch` is returned.
    pub fn set_rf_sample_rate(&mut self, rate: f64) -> Result<()> {
        decimation(rate)?;
        if self.iq_play.is_on() {
            return Err(Error::rejected("can't change sample rate during I/Q playback"));
        }
        let applied = self.src.lock()?.set_sample_rate(rate)?;
        if applied != self.input_rate {
            let Ok(decim) = decimation(applied) else {
                warn!(
                    "Source rate {applied} is not a multiple of {IF_RATE}, going back to {}",
                    self.input_rate
                );
                let back = self.src.lock()?.set_sample_rate(self.input_rate)?;
                if back != self.input_rate {
                    error!("Source can't go back to {} S/s, now at {back}", self.input_rate);
                }
                return check_readback("input sample rate", rate, applied);
            };
            self.xlate
                .lock()?
                .set_input_rate(applied, decim, &xlate_taps(applied))?;
            self.input_rate = applied;
            if self.filter_offset.abs() > applied / 2.0 {
                self.filter_offset = 0.0;
                self.xlate.lock()?.set_center_freq(0.0);
            }
            info!("Input rate {applied} S/s, decimation {decim}");
        }
        check_readback("input sample rate", rate, applied)
    }

    /// Current input sample rate.
    #[must_use]
    pub fn input_rate(&self) -> f64 {
        self.input_rate
    }

    /// Set source gain.
    pub fn set_rf_gain(&mut self, db: f64) -> Result<()> {
        let applied = self.src.lock()?.set_gain(db)?;
        debug!("RF gain {applied} dB");
        check_readback("RF gain", db, applied)
    }

    /// Current source gain, in dB.
    pub fn get_rf_gain(&self) -> Result<f64> {
        Ok(self.src.lock()?.get_gain())
    }

    /// Turn automatic source gain on or off. Returns the mode applied.
    pub fn set_rf_gain_mode(&mut self, automatic: bool) -> Result<bool> {
        self.src.lock()?.set_gain_mode(automatic)
    }

    /// Tune within the input band.
    pub fn set_filter_offset(&mut self, hz: f64) -> Result<()> {
        if !(hz.abs() <= self.input_rate / 2.0) {
            return Err(Error::rejected(format!(
                "filter offset {hz} outside +-{}",
                self.input_rate / 2.0
            )));
        }
        self.xlate.lock()?.set_center_freq(-hz);
        self.filter_offset = hz;
        Ok(())
    }

    /// Current filter offset.
    #[must_use]
    pub fn get_filter_offset(&self) -> f64 {
        self.filter_offset
    }

    /// Set channel filter pass band. Returns the transition width used.
    pub fn set_filter(&mut self, low: Float, high: Float, shape: FilterShape) -> Result<Float> {
        let tw = shape.transition_width(low, high)?;
        self.filter.lock()?.set_param(low, high, tw)?;
        Ok(tw)
    }

    /// Channel filter (low, high, transition width).
    pub fn filter_param(&self) -> Result<(Float, Float, Float)> {
        Ok(self.filter.lock()?.param())
    }

    /// Change demodulator. A no-op if it's already the current one.
    pub fn set_demod(&mut self, demod: Demod) -> Result<()> {
        if demod == self.demod {
            return Ok(());
        }
        let (agc, rr) = (self.agc.erase(), self.audio_rr.erase());
        let up = Port { block: &agc, port: 0 };
        let down = Port { block: &rr, port: 0 };
        let mut m = self.graph.lock()?;
        self.demodulator(self.demod).detach(&mut m, &up, &down)?;
        self.demodulator(demod).attach(&mut m, &up, &down)?;
        m.commit();
        info!("Demodulator {} -> {demod}", self.demod);
        self.demod = demod;
        Ok(())
    }

    /// Current demodulator.
    #[must_use]
    pub fn demod(&self) -> Demod {
        self.demod
    }

    /// Turn noise blanker 1 or 2 on or off.
    pub fn set_nb_on(&mut self, id: u32, on: bool) -> Result<()> {
        let mut nb = self.nb.lock()?;
        match id {
            1 => nb.set_nb1_on(on),
            2 => nb.set_nb2_on(on),
            _ => return Err(Error::rejected(format!("no noise blanker {id}"))),
        }
        Ok(())
    }

    /// Set threshold of noise blanker 1 or 2.
    pub fn set_nb_threshold(&mut self, id: u32, threshold: Float) -> Result<()> {
        let mut nb = self.nb.lock()?;
        match id {
            1 => nb.set_threshold1(threshold),
            2 => nb.set_threshold2(threshold),
            _ => Err(Error::rejected(format!("no noise blanker {id}"))),
        }
    }

    /// Set squelch level, in dBFS.
    pub fn set_sql_level(&mut self, db: Float) -> Result<()> {
        self.sql.lock()?.set_threshold(db)
    }

    /// Set squelch averaging.
    pub fn set_sql_alpha(&mut self, alpha: Float) -> Result<()> {
        self.sql.lock()?.set_alpha(alpha)
    }

    /// Turn AGC on, or off for manual gain.
    pub fn set_agc_on(&mut self, on: bool) -> Result<()> {
        self.agc.lock()?.set_agc_on(on);
        Ok(())
    }

    /// Turn AGC hang on or off.
    pub fn set_agc_hang(&mut self, hang: bool) -> Result<()> {
        self.agc.lock()?.set_use_hang(hang);
        Ok(())
    }

    /// Set AGC knee, in dB.
    pub fn set_agc_threshold(&mut self, db: i32) -> Result<()> {
        self.agc.lock()?.set_threshold(db)
    }

    /// Set AGC slope, in dB.
    pub fn set_agc_slope(&mut self, db: i32) -> Result<()> {
        self.agc.lock()?.set_slope(db)
    }

    /// Set AGC decay, in ms.
    pub fn set_agc_decay(&mut self, ms: i32) -> Result<()> {
        self.agc.lock()?.set_decay(ms)
    }

    /// Set gain used while AGC is off, in dB.
    pub fn set_agc_manual_gain(&mut self, db: i32) -> Result<()> {
        self.agc.lock()?.set_manual_gain(db)
    }

    /// AGC settings.
    pub fn agc_params(&self) -> Result<AgcParams> {
        Ok(self.agc.lock()?.params())
    }

    /// Set FM maximum deviation, in Hz.
    pub fn set_fm_maxdev(&mut self, hz: Float) -> Result<()> {
        self.demod_fm.lock()?.set_max_dev(hz)
    }

    /// Set FM de-emphasis time constant, in seconds.
    pub fn set_fm_deemph(&mut self, tau: Float) -> Result<()> {
        self.demod_fm.lock()?.set_tau(tau)
    }

    /// Turn AM DC removal on or off.
    pub fn set_am_dcr(&mut self, on: bool) -> Result<()> {
        self.demod_am.lock()?.set_dcr(on);
        Ok(())
    }

    /// Set audio gain, in dB.
    pub fn set_af_gain(&mut self, db: Float) -> Result<()> {
        if !db.is_finite() {
            return Err(Error::rejected(format!("audio gain {db} dB")));
        }
        self.audio_gain.lock()?.set_k(af_factor(db));
        self.af_gain = db;
        Ok(())
    }

    /// Audio gain, in dB.
    #[must_use]
    pub fn af_gain(&self) -> Float {
        self.af_gain
    }

    /// Signal level in the channel, in dBFS or linear power.
    pub fn get_signal_pwr(&self, dbfs: bool) -> Result<Float> {
        let m = self.meter.lock()?;
        Ok(if dbfs { m.get_level_db() } else { m.get_level() })
    }

    /// Spectrum of the input.
    pub fn get_iq_fft_data(&self) -> Result<Vec<Complex>> {
        Ok(self.iq_fft.lock()?.get_fft_data())
    }

    /// Spectrum of the audio.
    pub fn get_audio_fft_data(&self) -> Result<Vec<Complex>> {
        Ok(self.audio_fft.lock()?.get_fft_data())
    }

    /// Take up to `max` sniffed samples, oldest first.
    pub fn get_sniffer_data(&self, max: usize) -> Result<Vec<Float>> {
        Ok(self.sniffer.lock()?.get_samples(max))
    }

    /// Start recording audio to a WAV file.
    ///
    /// Only possible while running.
    pub fn start_audio_recording<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.audio_rec.require_off("audio recording")?;
        if !self.is_running() {
            return Err(Error::rejected("can't record audio while stopped"));
        }
        let path = path.as_ref();
        let sink = BlockHandle::new(WavSink::new(path, AUDIO_RATE as u32).map_err(|e| {
            Error::construction(format!("audio recorder {}", path.display()), e)
        })?);
        let mut m = self.graph.lock()?;
        m.connect(&self.audio_gain, 0, &sink, 0)?;
        m.commit();
        info!("Recording audio to {}", path.display());
        self.audio_rec = Toggle::On(FileTap {
            block: sink,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Stop recording audio.
    pub fn stop_audio_recording(&mut self) -> Result<()> {
        let rec = self.audio_rec.require_on("audio recording")?;
        let mut m = self.graph.lock()?;
        m.disconnect(&self.audio_gain, 0, &rec.block, 0)?;
        m.commit();
        let ret = rec.block.lock()?.close();
        info!("Audio recording to {} stopped", rec.path.display());
        self.audio_rec = Toggle::Off;
        ret
    }

    /// Audio recording state.
    #[must_use]
    pub fn audio_recording(&self) -> &Toggle<FileTap<WavSink>> {
        &self.audio_rec
    }

    /// Play a WAV file instead of the demodulated audio.
    ///
    /// The file must be at the audio rate.
    pub fn start_audio_playback<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.audio_play.require_off("audio playback")?;
        let path = path.as_ref();
        let wav = WavSource::new(path, false)?;
        if wav.sample_rate() as f64 != AUDIO_RATE {
            return Err(Error::rejected(format!(
                "{} is {} S/s, want {AUDIO_RATE}",
                path.display(),
                wav.sample_rate()
            )));
        }
        let wav = BlockHandle::new(wav);
        let mut m = self.graph.lock()?;
        m.disconnect(&self.audio_rr, 0, &self.audio_gain, 0)?;
        m.disconnect(&self.audio_rr, 0, &self.audio_fft, 0)?;
        m.connect(&self.audio_rr, 0, &self.audio_null_sink, 0)?;
        m.connect(&wav, 0, &self.audio_gain, 0)?;
        m.connect(&wav, 0, &self.audio_fft, 0)?;
        m.commit();
        info!("Playing audio from {}", path.display());
        self.audio_play = Toggle::On(FileTap {
            block: wav,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Go back to demodulated audio.
    pub fn stop_audio_playback(&mut self) -> Result<()> {
        let play = self.audio_play.require_on("audio playback")?;
        let mut m = self.graph.lock()?;
        m.disconnect(&play.block, 0, &self.audio_gain, 0)?;
        m.disconnect(&play.block, 0, &self.audio_fft, 0)?;
        m.disconnect(&self.audio_rr, 0, &self.audio_null_sink, 0)?;
        m.connect(&self.audio_rr, 0, &self.audio_gain, 0)?;
        m.connect(&self.audio_rr, 0, &self.audio_fft, 0)?;
        m.commit();
        info!("Audio playback of {} stopped", play.path.display());
        self.audio_play = Toggle::Off;
        Ok(())
    }

    /// Audio playback state.
    #[must_use]
    pub fn audio_playback(&self) -> &Toggle<FileTap<WavSource>> {
        &self.audio_play
    }

    /// Start recording raw I/Q, as little endian complex floats.
    pub fn start_iq_recording<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.iq_rec.require_off("I/Q recording")?;
        let path = path.as_ref();
        let sink = BlockHandle::new(FileSink::<Complex>::new(path, Mode::Overwrite).map_err(
            |e| Error::construction(format!("I/Q recorder {}", path.display()), e),
        )?);
        let tap = self.raw_tap();
        let mut m = self.graph.lock()?;
        m.connect(&tap, 0, &sink, 0)?;
        m.commit();
        info!("Recording I/Q to {}", path.display());
        self.iq_rec = Toggle::On(FileTap {
            block: sink,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Stop recording raw I/Q.
    pub fn stop_iq_recording(&mut self) -> Result<()> {
        let rec = self.iq_rec.require_on("I/Q recording")?;
        let tap = self.raw_tap();
        let mut m = self.graph.lock()?;
        m.disconnect(&tap, 0, &rec.block, 0)?;
        m.commit();
        let ret = rec.block.lock()?.close();
        info!("I/Q recording to {} stopped", rec.path.display());
        self.iq_rec = Toggle::Off;
        ret
    }

    /// I/Q recording state.
    #[must_use]
    pub fn iq_recording(&self) -> &Toggle<FileTap<FileSink<Complex>>> {
        &self.iq_rec
    }

    /// Feed the receiver from a raw I/Q file instead of the source.
    ///
    /// `rate` must be the current input rate. The file loops.
    pub fn start_iq_playback<P: AsRef<Path>>(&mut self, path: P, rate: f64) -> Result<()> {
        self.iq_play.require_off("I/Q playback")?;
        if rate != self.input_rate {
            return Err(Error::rejected(format!(
                "I/Q playback at {rate} S/s, receiver runs at {}",
                self.input_rate
            )));
        }
        let path = path.as_ref();
        let file = BlockHandle::new(
            FileSource::<Complex>::new(path, true, rate as Float).map_err(|e| {
                Error::construction(format!("I/Q player {}", path.display()), e)
            })?,
        );
        let mut m = self.graph.lock()?;
        m.disconnect(&self.src, 0, &self.nb, 0)?;
        m.connect(&file, 0, &self.nb, 0)?;
        if let Toggle::On(rec) = &self.iq_rec {
            m.disconnect(&self.src, 0, &rec.block, 0)?;
            m.connect(&file, 0, &rec.block, 0)?;
        }
        m.commit();
        info!("Playing I/Q from {}", path.display());
        self.iq_play = Toggle::On(FileTap {
            block: file,
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Go back to the source.
    pub fn stop_iq_playback(&mut self) -> Result<()> {
        let play = self.iq_play.require_on("I/Q playback")?;
        let mut m = self.graph.lock()?;
        m.disconnect(&play.block, 0, &self.nb, 0)?;
        m.connect(&self.src, 0, &self.nb, 0)?;
        if let Toggle::On(rec) = &self.iq_rec {
            m.disconnect(&play.block, 0, &rec.block, 0)?;
            m.connect(&self.src, 0, &rec.block, 0)?;
        }
        m.commit();
        info!("I/Q playback of {} stopped", play.path.display());
        self.iq_play = Toggle::Off;
        Ok(())
    }

    /// I/Q playback state.
    #[must_use]
    pub fn iq_playback(&self) -> &Toggle<FileTap<FileSource<Complex>>> {
        &self.iq_play
    }

    /// Start collecting demodulated audio, resampled to `rate`, into a
    /// buffer of `bufsize` samples.
    pub fn start_sniffer(&mut self, rate: u32, bufsize: usize) -> Result<()> {
        self.sniffer_tap.require_off("sniffer")?;
        if bufsize == 0 {
            return Err(Error::rejected("sniffer buffer size must be nonzero"));
        }
        let rr = BlockHandle::new(RationalResampler::from_rates(
            AUDIO_RATE as Float,
            rate as Float,
        )?);
        let mut m = self.graph.lock()?;
        m.connect(&self.audio_rr, 0, &rr, 0)?;
        m.connect(&rr, 0, &self.sniffer, 0)?;
        self.sniffer.lock()?.set_buffer_size(bufsize)?;
        m.commit();
        info!("Sniffer on at {rate} S/s, {bufsize} samples");
        self.sniffer_tap = Toggle::On(rr);
        Ok(())
    }

    /// Stop the sniffer. Samples already collected can still be read.
    pub fn stop_sniffer(&mut self) -> Result<()> {
        let rr = self.sniffer_tap.require_on("sniffer")?;
        let mut m = self.graph.lock()?;
        m.disconnect(&self.audio_rr, 0, rr, 0)?;
        m.disconnect(rr, 0, &self.sniffer, 0)?;
        m.commit();
        info!("Sniffer off");
        self.sniffer_tap = Toggle::Off;
        Ok(())
    }

    /// True if the sniffer is on.
    #[must_use]
    pub fn sniffer_active(&self) -> bool {
        self.sniffer_tap.is_on()
    }

    /// Copy of the graph topology, with block names.
    pub fn topology(&self) -> Result<Snapshot> {
        self.graph.snapshot()
    }

    /// Samples lost because a block couldn't keep up.
    pub fn dropped(&self) -> Result<u64> {
        self.graph.dropped()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Stopping receiver: {e}");
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::block::{Block, BlockRet};
    use crate::source::RxSource;
    use crate::stream::{InputStreams, ItemType, OutputStreams};

    fn small() -> ReceiverConfig {
        ReceiverConfig {
            input_rate: 96_000.0,
            ..ReceiverConfig::default()
        }
    }

    #[test]
    fn default_topology() -> Result<()> {
        let rx = Receiver::new(&small())?;
        let t = rx.topology()?;
        for (a, b) in [
            ("SimSource", "NoiseBlanker"),
            ("NoiseBlanker", "DcCorr"),
            ("DcCorr", "FftProbe<Complex>"),
            ("DcCorr", "FreqXlatingFir"),
            ("FreqXlatingFir", "RxFilter"),
            ("RxFilter", "RxMeter"),
            ("RxFilter", "Squelch"),
            ("Squelch", "Agc"),
            ("Agc", "FmDemod"),
            ("FmDemod", "RationalResampler"),
            ("RationalResampler", "FftProbe<Float>"),
            ("RationalResampler", "MultiplyConst"),
            ("MultiplyConst", "AudioSink"),
        ] {
            assert!(t.connected(a, b), "{a} -> {b}\n{}", t.describe());
        }
        assert_eq!(t.edges.len(), 13);
        assert_eq!(t.max_producers(), 1);
        assert_eq!(rx.demod(), Demod::Fm);
        assert_eq!(rx.run_state(), RunState::Stopped);
        Ok(())
    }

    #[test]
    fn toggle_transitions() {
        let mut t: Toggle<u32> = Toggle::Off;
        assert!(t.require_off("x").is_ok());
        assert!(matches!(t.require_on("x"), Err(Error::AlreadyInState(_))));
        t = Toggle::On(3);
        assert!(matches!(t.require_off("x"), Err(Error::AlreadyInState(_))));
        assert_eq!(t.active(), Some(&3));
    }

    #[test]
    fn demod_switch_rewires() -> Result<()> {
        let mut rx = Receiver::new(&small())?;
        rx.set_demod(Demod::Ssb)?;
        let t = rx.topology()?;
        assert!(t.connected("Agc", "ComplexToReal"));
        assert!(t.connected("ComplexToReal", "RationalResampler"));
        assert!(!t.contains("FmDemod"));
        rx.set_demod(Demod::None)?;
        let t = rx.topology()?;
        assert!(t.connected("Agc", "Silence"));
        assert!(!t.contains("ComplexToReal"));
        assert_eq!(t.edges.len(), 13);
        Ok(())
    }

    #[test]
    fn af_gain() -> Result<()> {
        let mut rx = Receiver::new(&small())?;
        assert!((rx.audio_gain.lock()?.k() - 0.1).abs() < 1e-6);
        rx.set_af_gain(0.0)?;
        assert_eq!(rx.audio_gain.lock()?.k(), 1.0);
        assert_eq!(rx.af_gain(), 0.0);
        assert!(rx.set_af_gain(Float::NAN).is_err());
        Ok(())
    }

    #[test]
    fn filter_offset() -> Result<()> {
        let mut rx = Receiver::new(&small())?;
        rx.set_filter_offset(12_000.0)?;
        assert_eq!(rx.get_filter_offset(), 12_000.0);
        assert_eq!(rx.xlate.lock()?.center_freq(), -12_000.0);
        assert!(matches!(rx.set_filter_offset(48_001.0), Err(Error::Rejected(_))));
        assert_eq!(rx.get_filter_offset(), 12_000.0);
        Ok(())
    }

    #[test]
    fn sample_rate_change() -> Result<()> {
        let mut rx = Receiver::new(&small())?;
        rx.set_rf_sample_rate(192_000.0)?;
        assert_eq!(rx.input_rate(), 192_000.0);
        assert_eq!(rx.xlate.lock()?.rates(), (192_000.0, 2));
        assert!(matches!(rx.set_rf_sample_rate(100_000.0), Err(Error::Rejected(_))));
        // The simulated tuner has no 288 kS/s mode.
        let e = rx.set_rf_sample_rate(288_000.0);
        assert!(matches!(e, Err(Error::CollaboratorMismatch { .. })), "{e:?}");
        assert_ne!(rx.input_rate(), 288_000.0);
        Ok(())
    }

    /// Tuner that only does 96 kS/s and 250 kS/s.
    struct OddRates {
        rate: f64,
        freq: f64,
    }

    impl Block for OddRates {
        fn block_name(&self) -> &'static str {
            "OddRates"
        }
        fn outputs(&self) -> &[ItemType] {
            &[ItemType::Complex]
        }
        fn work(&mut self, _r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
            Ok(BlockRet::Pending)
        }
    }

    impl RxSource for OddRates {
        fn select_device(&mut self, _device: &str) -> Result<()> {
            Ok(())
        }
        fn device(&self) -> &str {
            "odd"
        }
        fn set_freq(&mut self, hz: f64) -> Result<f64> {
            self.freq = hz;
            Ok(hz)
        }
        fn get_freq(&self) -> f64 {
            self.freq
        }
        fn set_sample_rate(&mut self, rate: f64) -> Result<f64> {
            self.rate = if rate < 150_000.0 { 96_000.0 } else { 250_000.0 };
            Ok(self.rate)
        }
        fn get_sample_rate(&self) -> f64 {
            self.rate
        }
        fn set_gain(&mut self, db: f64) -> Result<f64> {
            Ok(db)
        }
        fn get_gain(&self) -> f64 {
            0.0
        }
        fn set_gain_mode(&mut self, automatic: bool) -> Result<bool> {
            Ok(automatic)
        }
        fn get_gain_mode(&self) -> bool {
            false
        }
    }

    #[test]
    fn source_settles_on_odd_rate() -> Result<()> {
        let src = source::source_handle(OddRates {
            rate: 0.0,
            freq: 0.0,
        });
        let mut rx = Receiver::with_source(&small(), src, Box::new(DiscardBackend::new()))?;
        assert_eq!(rx.topology()?.edges.len(), 13);
        let e = rx.set_rf_sample_rate(192_000.0);
        assert!(
            matches!(e, Err(Error::CollaboratorMismatch { actual, .. }) if actual == 250_000.0),
            "{e:?}"
        );
        // Nothing downstream saw the odd rate.
        assert_eq!(rx.input_rate(), 96_000.0);
        assert_eq!(rx.xlate.lock()?.rates(), (96_000.0, 1));
        assert_eq!(rx.src.lock()?.get_sample_rate(), 96_000.0);
        Ok(())
    }

    #[test]
    fn failed_demod_switch_rolls_back() -> Result<()> {
        let mut rx = Receiver::new(&small())?;
        {
            // AM demodulator input already taken.
            let mut m = rx.graph.lock()?;
            m.connect(&rx.agc, 0, &rx.demod_am, 0)?;
            m.commit();
        }
        let before = rx.topology()?.describe();
        // Detaching FM works, attaching AM does not.
        assert!(matches!(rx.set_demod(Demod::Am), Err(Error::Rejected(_))));
        assert_eq!(rx.topology()?.describe(), before);
        assert_eq!(rx.demod(), Demod::Fm);
        assert!(rx.topology()?.connected("FmDemod", "RationalResampler"));
        Ok(())
    }

    #[test]
    fn failed_audio_playback_rolls_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let wav = dir.path().join("48k.wav");
        WavSink::new(&wav, AUDIO_RATE as u32)?.close()?;
        let mut rx = Receiver::new(&small())?;
        {
            // Null sink input already taken.
            let mut m = rx.graph.lock()?;
            m.connect(&rx.demod_ssb, 0, &rx.audio_null_sink, 0)?;
            m.commit();
        }
        let before = rx.topology()?.describe();
        // Two disconnects go through before the third step fails.
        assert!(matches!(
            rx.start_audio_playback(&wav),
            Err(Error::Rejected(_))
        ));
        assert_eq!(rx.topology()?.describe(), before);
        assert!(!rx.audio_playback().is_on());
        assert!(rx.topology()?.connected("RationalResampler", "MultiplyConst"));
        Ok(())
    }

    /// Panics when fed.
    struct Boom;

    impl Block for Boom {
        fn block_name(&self) -> &'static str {
            "Boom"
        }
        fn inputs(&self) -> &[ItemType] {
            &[ItemType::Float]
        }
        fn work(&mut self, r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
            assert!(r.get::<Float>(0).is_empty(), "boom");
            Ok(BlockRet::Noop)
        }
    }

    #[test]
    fn dead_runner_is_noticed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut rx = Receiver::new(&small())?;
        let boom = BlockHandle::new(Boom);
        {
            let mut m = rx.graph.lock()?;
            m.connect(&rx.audio_rr, 0, &boom, 0)?;
            m.commit();
        }
        rx.start()?;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while rx.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(rx.run_state(), RunState::Stopped);
        assert!(matches!(
            rx.start_audio_recording(dir.path().join("a.wav")),
            Err(Error::Rejected(_))
        ));
        {
            let mut m = rx.graph.lock()?;
            m.disconnect(&rx.audio_rr, 0, &boom, 0)?;
            m.commit();
        }
        // Starting again replaces the dead runner.
        rx.start()?;
        assert!(rx.is_running());
        rx.start_audio_recording(dir.path().join("b.wav"))?;
        rx.stop_audio_recording()?;
        rx.stop()?;
        assert!(!rx.is_running());
        Ok(())
    }

    #[test]
    fn input_device() -> Result<()> {
        let mut rx = Receiver::new(&small())?;
        rx.set_input_device("sim,signal=145e6")?;
        assert!(rx.set_input_device("nosuchdriver").is_err());
        assert!(rx.set_input_device("").is_err());
        let t = rx.topology()?;
        assert!(t.connected("SimSource", "NoiseBlanker"));
        assert_eq!(t.edges.len(), 13);
        Ok(())
    }
}
/* vim: textwidth=80
 */
