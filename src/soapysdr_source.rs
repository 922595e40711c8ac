//! SoapySDR source.
use log::{debug, info};
use soapysdr::Direction::Rx;

use crate::block::{Block, BlockRet};
use crate::source::{RxSource, parse_device, reopen};
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::{Complex, Error, Result};

impl From<soapysdr::Error> for Error {
    fn from(e: soapysdr::Error) -> Self {
        Error::device(e, "soapysdr")
    }
}

const CHANNEL: usize = 0;

/// SoapySDR source.
///
/// Device string is `soapy,key=value,...`, where the key/values are
/// passed to SoapySDR as device args, e.g. `soapy,driver=rtlsdr`.
pub struct SoapySdrSource {
    device: String,
    hw: Option<Hw>,
    buf: Vec<Complex>,
    freq: f64,
    rate: f64,
    gain: f64,
    auto_gain: bool,
}

// Fields drop in order: the stream is closed before the device.
struct Hw {
    stream: soapysdr::RxStream<Complex>,
    dev: soapysdr::Device,
}

fn device_args(device: &str) -> Result<String> {
    let (driver, args) = parse_device(device)?;
    if driver != "soapy" {
        return Err(Error::rejected(format!(
            "SoapySDR source can't open {device:?}"
        )));
    }
    Ok(args
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(","))
}

fn open_device(device: &str) -> Result<Hw> {
    let args = device_args(device)?;
    let dev = soapysdr::Device::new(args.as_str())?;
    debug!("SoapySDR RX driver: {}", dev.driver_key()?);
    debug!("SoapySDR RX hardware: {}", dev.hardware_key()?);
    debug!(
        "SoapySDR RX channel {CHANNEL} gain range: {:?}",
        dev.gain_range(Rx, CHANNEL)?
    );
    debug!(
        "SoapySDR RX channel {CHANNEL} frequency range: {:?}",
        dev.frequency_range(Rx, CHANNEL)?
    );
    let mut stream = dev.rx_stream(&[CHANNEL])?;
    stream.activate(None)?;
    Ok(Hw { stream, dev })
}

impl SoapySdrSource {
    /// Open device and start streaming.
    pub fn new(device: &str, sample_rate: f64) -> Result<Self> {
        let hw = open_device(device)
            .map_err(|e| Error::construction(format!("source {device:?}"), e))?;
        let mut s = Self {
            device: device.to_string(),
            hw: Some(hw),
            buf: vec![Complex::default(); 16384],
            freq: 0.0,
            rate: 0.0,
            gain: 0.0,
            auto_gain: false,
        };
        s.set_sample_rate(sample_rate)?;
        s.freq = s.dev()?.frequency(Rx, CHANNEL)?;
        s.gain = s.dev()?.gain(Rx, CHANNEL)?;
        Ok(s)
    }

    fn dev(&self) -> Result<&soapysdr::Device> {
        self.hw
            .as_ref()
            .map(|hw| &hw.dev)
            .ok_or_else(|| Error::msg(format!("SoapySDR device {:?} not open", self.device)))
    }
}

impl Block for SoapySdrSource {
    fn block_name(&self) -> &'static str {
        "SoapySdrSource"
    }
    fn outputs(&self) -> &[ItemType] {
        &[ItemType::Complex]
    }
    fn work(&mut self, _r: &InputStreams, w: &mut OutputStreams) -> Result<BlockRet> {
        let timeout_us = 10_000;
        let Some(hw) = self.hw.as_mut() else {
            return Err(Error::msg(format!("SoapySDR device {:?} not open", self.device)));
        };
        let n = match hw.stream.read(&mut [&mut self.buf[..]], timeout_us) {
            Ok(x) => x,
            Err(e) => {
                if e.code == soapysdr::ErrorCode::Timeout {
                    return Ok(BlockRet::Pending);
                }
                return Err(e.into());
            }
        };
        w.write_slice(0, &self.buf[..n])?;
        Ok(BlockRet::Ok)
    }
}

impl RxSource for SoapySdrSource {
    fn select_device(&mut self, device: &str) -> Result<()> {
        device_args(device)?;
        let old = self.device.clone();
        let ret = reopen(&mut self.hw, &old, device, open_device);
        if ret.is_ok() {
            self.device = device.to_string();
            info!("SoapySDR source switched to {device}");
        }
        if self.hw.is_some() {
            self.set_sample_rate(self.rate)?;
            self.set_freq(self.freq)?;
        }
        ret
    }

    fn device(&self) -> &str {
        &self.device
    }

    fn set_freq(&mut self, hz: f64) -> Result<f64> {
        self.dev()?
            .set_frequency(Rx, CHANNEL, hz, soapysdr::Args::new())?;
        self.freq = self.dev()?.frequency(Rx, CHANNEL)?;
        Ok(self.freq)
    }

    fn get_freq(&self) -> f64 {
        self.freq
    }

    fn set_sample_rate(&mut self, rate: f64) -> Result<f64> {
        self.dev()?.set_sample_rate(Rx, CHANNEL, rate)?;
        self.rate = self.dev()?.sample_rate(Rx, CHANNEL)?;
        Ok(self.rate)
    }

    fn get_sample_rate(&self) -> f64 {
        self.rate
    }

    fn set_gain(&mut self, db: f64) -> Result<f64> {
        self.dev()?.set_gain(Rx, CHANNEL, db)?;
        self.gain = self.dev()?.gain(Rx, CHANNEL)?;
        Ok(self.gain)
    }

    fn get_gain(&self) -> f64 {
        self.gain
    }

    fn set_gain_mode(&mut self, automatic: bool) -> Result<bool> {
        self.dev()?.set_gain_mode(Rx, CHANNEL, automatic)?;
        self.auto_gain = self.dev()?.gain_mode(Rx, CHANNEL)?;
        Ok(self.auto_gain)
    }

    fn get_gain_mode(&self) -> bool {
        self.auto_gain
    }
}
/* vim: textwidth=80
 */
