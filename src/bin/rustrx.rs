/*!
Command line receiver.

Tunes, demodulates, and plays audio until Ctrl-C, or for a given time.
Settings come from a JSON config file if given, overridden by options.

```text
$ rustrx -v 2 --freq 144.81e6 --demod fm --record
$ rustrx --config rx.json --save-config rx.json --duration 10
$ rustrx --tlm frames.bin
```
*/
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use rustrx::audio_sink::AudioBackend;
use rustrx::config::ReceiverConfig;
use rustrx::demod::Demod;
use rustrx::receiver::Receiver;
use rustrx::rx_filter::FilterShape;
use rustrx::telemetry::{FRAME_LEN, TlmFrame};
use rustrx::Float;

#[derive(clap::Parser, Debug)]
#[command(version, about = "Software defined radio receiver")]
struct Opt {
    /// JSON config file to start from.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the resulting config to this file.
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Input device, e.g. `sim` or `soapy,driver=rtlsdr`.
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Audio output device.
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// Input sample rate. Must be a multiple of 96000.
    #[arg(long)]
    rate: Option<f64>,

    /// RF frequency, in Hz.
    #[arg(short = 'f', long)]
    freq: Option<f64>,

    /// Offset of the channel from the RF frequency, in Hz.
    #[arg(long)]
    offset: Option<f64>,

    /// RF gain, in dB.
    #[arg(short = 'g', long)]
    gain: Option<f64>,

    /// Demodulator: none, ssb, am, fm.
    #[arg(long)]
    demod: Option<Demod>,

    /// Low edge of the channel filter, in Hz.
    #[arg(long, allow_hyphen_values = true)]
    filter_low: Option<Float>,

    /// High edge of the channel filter, in Hz.
    #[arg(long, allow_hyphen_values = true)]
    filter_high: Option<Float>,

    /// Filter shape: soft, normal, sharp.
    #[arg(long)]
    shape: Option<FilterShape>,

    /// Audio gain, in dB.
    #[arg(long, allow_hyphen_values = true)]
    af_gain: Option<Float>,

    /// Squelch level, in dBFS.
    #[arg(long, allow_hyphen_values = true)]
    squelch: Option<Float>,

    /// Record audio to a timestamped WAV file.
    #[arg(long)]
    record: bool,

    /// Record raw I/Q to a timestamped file.
    #[arg(long)]
    record_iq: bool,

    /// Feed the receiver from this raw I/Q file, instead of the device.
    #[arg(long)]
    play_iq: Option<PathBuf>,

    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<f64>,

    /// Seconds between signal level reports. 0 disables them.
    #[arg(long, default_value = "1")]
    report: f64,

    /// Parse a file of telemetry frames, print them, and exit.
    #[arg(long)]
    tlm: Option<PathBuf>,

    #[arg(short, action=clap::ArgAction::Count)]
    verbose: u8,
}

fn build_config(opt: &Opt) -> Result<ReceiverConfig> {
    let mut cfg = match &opt.config {
        Some(path) => ReceiverConfig::load(path)?,
        None => ReceiverConfig::default(),
    };
    if let Some(d) = &opt.device {
        cfg.input_device = d.clone();
    }
    if let Some(o) = &opt.output {
        cfg.output_device = o.clone();
    }
    if let Some(r) = opt.rate {
        cfg.input_rate = r;
    }
    if let Some(f) = opt.freq {
        cfg.rf_freq = f;
    }
    if let Some(o) = opt.offset {
        cfg.filter_offset = o;
    }
    if let Some(d) = opt.demod {
        cfg.demod = d;
    }
    if let Some(l) = opt.filter_low {
        cfg.filter_low = l;
    }
    if let Some(h) = opt.filter_high {
        cfg.filter_high = h;
    }
    if let Some(s) = opt.shape {
        cfg.filter_shape = s;
    }
    if let Some(g) = opt.af_gain {
        cfg.af_gain = g;
    }
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(feature = "audio")]
fn backend() -> Box<dyn AudioBackend> {
    Box::new(rustrx::audio_sink::CpalBackend::new())
}

#[cfg(not(feature = "audio"))]
fn backend() -> Box<dyn AudioBackend> {
    Box::new(rustrx::audio_sink::DiscardBackend::new())
}

fn timestamped(prefix: &str, ext: &str) -> PathBuf {
    let now = chrono::Local::now();
    PathBuf::from(format!("{prefix}_{}.{ext}", now.format("%Y%m%d_%H%M%S")))
}

fn dump_tlm(path: &PathBuf) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut good = 0;
    for chunk in data.chunks(FRAME_LEN) {
        let Some(frame) = TlmFrame::parse(chunk) else {
            continue;
        };
        good += 1;
        println!(
            "#{:<8} {} {}",
            frame.counter(),
            frame.mission_time(),
            frame.mission_mode()
        );
    }
    eprintln!(
        "{good} of {} frames valid",
        data.len().div_ceil(FRAME_LEN)
    );
    Ok(())
}

fn run(opt: &Opt, cfg: &ReceiverConfig) -> Result<()> {
    let mut rx = Receiver::with_backend(cfg, backend())?;
    if let Some(g) = opt.gain
        && let Err(e) = rx.set_rf_gain(g)
    {
        warn!("RF gain: {e}");
    }
    if let Some(s) = opt.squelch {
        rx.set_sql_level(s)?;
    }
    if let Some(path) = &opt.play_iq {
        rx.start_iq_playback(path, cfg.input_rate)?;
    }
    if opt.record_iq {
        rx.start_iq_recording(timestamped("rustrx_iq", "c32"))?;
    }

    let (tx, done) = mpsc::channel();
    ctrlc::set_handler(move || {
        warn!("Got Ctrl-C");
        let _ = tx.send(());
    })
    .context("setting Ctrl-C handler")?;

    rx.start()?;
    if opt.record {
        rx.start_audio_recording(timestamped("rustrx", "wav"))?;
    }
    info!(
        "Listening to {} Hz, {}",
        rx.get_rf_freq()? + rx.get_filter_offset(),
        rx.demod()
    );

    let st = Instant::now();
    let deadline = opt.duration.map(|d| st + Duration::from_secs_f64(d));
    let tick = if opt.report > 0.0 {
        Duration::from_secs_f64(opt.report)
    } else {
        Duration::from_secs(1)
    };
    loop {
        let wait = match deadline {
            Some(d) => match d.checked_duration_since(Instant::now()) {
                Some(left) => left.min(tick),
                None => break,
            },
            None => tick,
        };
        match done.recv_timeout(wait) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        if opt.report > 0.0 {
            eprintln!("Signal {:6.1} dBFS", rx.get_signal_pwr(true)?);
        }
    }

    if rx.audio_recording().is_on() {
        rx.stop_audio_recording()?;
    }
    if rx.iq_recording().is_on() {
        rx.stop_iq_recording()?;
    }
    rx.stop()?;
    let dropped = rx.dropped()?;
    if dropped > 0 {
        warn!("Dropped {dropped} samples");
    }
    eprintln!("Ran for {:.1}s", st.elapsed().as_secs_f64());
    Ok(())
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("rustrx")
        .quiet(false)
        .verbosity(opt.verbose as usize)
        .timestamp(stderrlog::Timestamp::Second)
        .init()?;

    if let Some(path) = &opt.tlm {
        return dump_tlm(path);
    }
    let cfg = build_config(&opt)?;
    if let Some(path) = &opt.save_config {
        cfg.save(path)?;
        info!("Saved config to {}", path.display());
    }
    run(&opt, &cfg)
}
/* vim: textwidth=80
 */
