/*! Blocks for the WAV file format.

Only the plain RIFF layout is handled: a `fmt ` chunk and a `data` chunk,
with other chunks skipped. [`WavSink`] writes mono 16 bit PCM.
[`WavSource`] reads 16 bit PCM or 32 bit float, any number of channels,
and outputs the first channel.

Unlike .au, a .wav header carries the data size, so the sink writes a
placeholder header and patches it when closed.
*/
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, error, info};

use crate::block::{Block, BlockRet};
use crate::stream::{InputStreams, ItemType, OutputStreams};
use crate::throttle::Throttle;
use crate::{Error, Float, Result};

const HEADER_LEN: u64 = 44;
const FORMAT_PCM: u16 = 1;
const FORMAT_FLOAT: u16 = 3;

fn header(rate: u32, data_len: u32) -> Vec<u8> {
    let channels: u16 = 1;
    let bits: u16 = 16;
    let align = channels * bits / 8;
    let mut v = Vec::with_capacity(HEADER_LEN as usize);
    v.extend(b"RIFF");
    v.extend((36u32.saturating_add(data_len)).to_le_bytes());
    v.extend(b"WAVE");
    v.extend(b"fmt ");
    v.extend(16u32.to_le_bytes());
    v.extend(FORMAT_PCM.to_le_bytes());
    v.extend(channels.to_le_bytes());
    v.extend(rate.to_le_bytes());
    v.extend((rate * align as u32).to_le_bytes());
    v.extend(align.to_le_bytes());
    v.extend(bits.to_le_bytes());
    v.extend(b"data");
    v.extend(data_len.to_le_bytes());
    v
}

/** WAV writer block.

Takes floats between -1 and 1, and writes them as 16 bit mono PCM. Values
outside that range are clipped.
*/
pub struct WavSink {
    path: PathBuf,
    f: Option<BufWriter<std::fs::File>>,
    rate: u32,
    written: u64,
}

impl WavSink {
    /// Create new WAV file, overwriting any existing file.
    pub fn new<P: AsRef<Path>>(path: P, rate: u32) -> Result<Self> {
        let path = path.as_ref();
        let f = std::fs::File::create(path).map_err(|e| Error::file_io(e, path))?;
        let mut f = BufWriter::new(f);
        f.write_all(&header(rate, 0))
            .map_err(|e| Error::file_io(e, path))?;
        debug!("Opened WAV sink {} at {rate} S/s", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            f: Some(f),
            rate,
            written: 0,
        })
    }

    /// Number of samples written.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Sample rate written to the header.
    #[must_use]
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Finish the file by writing the final header.
    ///
    /// Input after closing is discarded. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut f) = self.f.take() else {
            return Ok(());
        };
        let data_len = u32::try_from(self.written * 2).unwrap_or(u32::MAX);
        let io = |e: std::io::Error| Error::file_io(e, &self.path);
        f.seek(SeekFrom::Start(0)).map_err(io)?;
        f.write_all(&header(self.rate, data_len)).map_err(io)?;
        f.flush().map_err(io)?;
        info!(
            "Closed WAV file {} with {} samples",
            self.path.display(),
            self.written
        );
        Ok(())
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Closing WAV file: {e}");
        }
    }
}

impl Block for WavSink {
    fn block_name(&self) -> &'static str {
        "WavSink"
    }
    fn inputs(&self) -> &[ItemType] {
        &[ItemType::Float]
    }
    fn work(&mut self, r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
        let input = r.get::<Float>(0);
        let Some(f) = &mut self.f else {
            return Ok(BlockRet::Noop);
        };
        if input.is_empty() {
            return Ok(BlockRet::Noop);
        }
        let mut v = Vec::with_capacity(2 * input.len());
        for s in input {
            let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as Float) as i16;
            v.extend(pcm.to_le_bytes());
        }
        f.write_all(&v).map_err(|e| Error::file_io(e, &self.path))?;
        self.written += input.len() as u64;
        Ok(BlockRet::Ok)
    }
}

/// Layout of the sample data in a WAV file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WavFormat {
    /// 1 for integer PCM, 3 for IEEE float.
    pub format: u16,
    /// Interleaved channels.
    pub channels: u16,
    /// Frames per second.
    pub rate: u32,
    /// Bits per sample.
    pub bits: u16,
}

impl WavFormat {
    fn frame_len(&self) -> usize {
        self.channels as usize * self.bits as usize / 8
    }

    fn decode(&self, frame: &[u8]) -> Float {
        match self.format {
            FORMAT_FLOAT => f32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as Float,
            _ => i16::from_le_bytes([frame[0], frame[1]]) as Float / i16::MAX as Float,
        }
    }
}

fn read_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn read_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Parse the header, leaving `f` at the start of the data.
///
/// Returns the format, and the data length in bytes.
fn parse_header<R: Read + Seek>(f: &mut R) -> Result<(WavFormat, u64)> {
    let mut riff = [0u8; 12];
    f.read_exact(&mut riff)?;
    if &riff[0..4] != b"RIFF" || &riff[8..12] != b"WAVE" {
        return Err(Error::rejected("not a RIFF/WAVE file"));
    }
    let mut format = None;
    loop {
        let mut ch = [0u8; 8];
        f.read_exact(&mut ch)
            .map_err(|_| Error::rejected("WAV file has no data chunk"))?;
        let len = read_u32(&ch, 4) as u64;
        match &ch[0..4] {
            b"fmt " => {
                if len < 16 {
                    return Err(Error::rejected(format!("WAV fmt chunk too short: {len}")));
                }
                let mut b = vec![0u8; len as usize];
                f.read_exact(&mut b)?;
                let fmt = WavFormat {
                    format: read_u16(&b, 0),
                    channels: read_u16(&b, 2),
                    rate: read_u32(&b, 4),
                    bits: read_u16(&b, 14),
                };
                match (fmt.format, fmt.bits) {
                    (FORMAT_PCM, 16) | (FORMAT_FLOAT, 32) => {}
                    (fo, bi) => {
                        return Err(Error::rejected(format!(
                            "unsupported WAV encoding {fo} with {bi} bits"
                        )));
                    }
                }
                if fmt.channels == 0 {
                    return Err(Error::rejected("WAV file with zero channels"));
                }
                if len % 2 == 1 {
                    f.seek(SeekFrom::Current(1))?;
                }
                format = Some(fmt);
            }
            b"data" => {
                let fmt = format.ok_or_else(|| Error::rejected("WAV data before fmt chunk"))?;
                return Ok((fmt, len));
            }
            other => {
                debug!("Skipping WAV chunk {:?}", String::from_utf8_lossy(other));
                f.seek(SeekFrom::Current((len + len % 2) as i64))?;
            }
        }
    }
}

/** WAV reader block.

Output is paced to the file's sample rate.
*/
pub struct WavSource {
    path: PathBuf,
    f: BufReader<std::fs::File>,
    format: WavFormat,
    data_start: u64,
    data_len: u64,
    left: u64,
    repeat: bool,
    throttle: Throttle,
}

impl WavSource {
    /// Open a WAV file.
    ///
    /// Fails with `ConstructionFailure` if the file can't be opened or
    /// isn't a supported WAV file.
    pub fn new<P: AsRef<Path>>(path: P, repeat: bool) -> Result<Self> {
        let path = path.as_ref();
        Self::open(path, repeat)
            .map_err(|e| Error::construction(format!("WAV source {}", path.display()), e))
    }

    fn open(path: &Path, repeat: bool) -> Result<Self> {
        let f = std::fs::File::open(path).map_err(|e| Error::file_io(e, path))?;
        let mut f = BufReader::new(f);
        let (format, data_len) = parse_header(&mut f)?;
        let data_start = f.stream_position()?;
        debug!(
            "Opened WAV source {}: {format:?}, {data_len} data bytes",
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            f,
            format,
            data_start,
            data_len,
            left: data_len,
            repeat,
            throttle: Throttle::new(format.rate as Float),
        })
    }

    /// Sample rate of the file.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.format.rate
    }

    /// Sample layout of the file.
    #[must_use]
    pub fn format(&self) -> WavFormat {
        self.format
    }

    fn read(&mut self, frames: usize) -> Result<Vec<Float>> {
        let flen = self.format.frame_len();
        let want = (frames as u64 * flen as u64).min(self.left);
        let mut buf = Vec::with_capacity(want as usize);
        (&mut self.f)
            .take(want)
            .read_to_end(&mut buf)
            .map_err(|e| Error::file_io(e, &self.path))?;
        let got = buf.len() - buf.len() % flen;
        if buf.len() < want as usize {
            // File shorter than the header claims.
            self.left = 0;
        } else {
            self.left -= want;
        }
        Ok(buf[..got]
            .chunks_exact(flen)
            .map(|fr| self.format.decode(fr))
            .collect())
    }

    fn rewind(&mut self) -> Result<()> {
        self.f
            .seek(SeekFrom::Start(self.data_start))
            .map_err(|e| Error::file_io(e, &self.path))?;
        self.left = self.data_len;
        Ok(())
    }
}

impl Block for WavSource {
    fn block_name(&self) -> &'static str {
        "WavSource"
    }
    fn outputs(&self) -> &[ItemType] {
        &[ItemType::Float]
    }
    fn work(&mut self, _r: &InputStreams, w: &mut OutputStreams) -> Result<BlockRet> {
        let n = self.throttle.allowance();
        if n == 0 {
            return Ok(BlockRet::Pending);
        }
        let mut v = self.read(n)?;
        if v.is_empty() {
            if !self.repeat {
                info!("WAV playback of {} finished", self.path.display());
                return Ok(BlockRet::EOF);
            }
            self.rewind()?;
            v = self.read(n)?;
            if v.is_empty() {
                return Ok(BlockRet::EOF);
            }
        }
        self.throttle.produced(v.len());
        w.write(0, v)?;
        Ok(BlockRet::Ok)
    }
}

/* vim: textwidth=80
 */
