//! Read stream from raw file.
//!
//! The counterpart of [`crate::file_sink::FileSink`]. Output is paced to a
//! sample rate, so that a recording plays back in real time.
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::block::{Block, BlockRet};
use crate::stream::{InputStreams, ItemType, OutputStreams, StreamItem};
use crate::throttle::Throttle;
use crate::{Error, Float, Result, Sample};

/// Read stream from raw file.
pub struct FileSource<T> {
    path: PathBuf,
    f: BufReader<std::fs::File>,
    repeat: bool,
    throttle: Throttle,
    partial: Vec<u8>,
    _t: std::marker::PhantomData<T>,
}

impl<T: Sample + StreamItem> FileSource<T> {
    /// Create new FileSource block, producing `rate` samples per second.
    pub fn new<P: AsRef<Path>>(path: P, repeat: bool, rate: Float) -> Result<Self> {
        let path = path.as_ref();
        let f = std::fs::File::open(path).map_err(|e| Error::file_io(e, path))?;
        debug!("Opening source {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            f: BufReader::new(f),
            repeat,
            throttle: Throttle::new(rate),
            partial: Vec::new(),
            _t: std::marker::PhantomData,
        })
    }

    /// Read up to `n` samples. Empty means end of file.
    fn read(&mut self, n: usize) -> Result<Vec<T>> {
        let size = T::size();
        let mut buf = std::mem::take(&mut self.partial);
        let want = n * size;
        let have = buf.len();
        buf.resize(want.max(have), 0);
        let mut got = have;
        while got < want {
            let r = self
                .f
                .read(&mut buf[got..])
                .map_err(|e| Error::file_io(e, &self.path))?;
            if r == 0 {
                break;
            }
            got += r;
        }
        buf.truncate(got);
        let whole = got - got % size;
        self.partial = buf.split_off(whole);
        buf.chunks_exact(size).map(T::parse).collect()
    }
}

impl<T: Sample + StreamItem> Block for FileSource<T> {
    fn block_name(&self) -> &'static str {
        "FileSource"
    }
    fn outputs(&self) -> &[ItemType] {
        T::ITEM_TYPE.one()
    }
    fn work(&mut self, _r: &InputStreams, w: &mut OutputStreams) -> Result<BlockRet> {
        let n = self.throttle.allowance();
        if n == 0 {
            return Ok(BlockRet::Pending);
        }
        let mut v = self.read(n)?;
        if v.is_empty() {
            if !self.repeat {
                info!("{} reached end of file", self.path.display());
                return Ok(BlockRet::EOF);
            }
            debug!("{} rewinding", self.path.display());
            self.partial.clear();
            self.f
                .seek(SeekFrom::Start(0))
                .map_err(|e| Error::file_io(e, &self.path))?;
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
