//! Send stream to raw file.
//!
//! Samples are written in their [`Sample`] encoding: little endian 32 bit
//! floats, I before Q for complex samples.
use std::io::BufWriter;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, error};

use crate::block::{Block, BlockRet};
use crate::stream::{InputStreams, ItemType, OutputStreams, StreamItem};
use crate::{Error, Result, Sample};

/// File write mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Create a new file. Fail if file already exists.
    Create,

    /// Overwrite existing file, or create a new file if it doesn't exist.
    Overwrite,

    /// Append to existing file, or create a new file if it doesn't exist.
    Append,
}

/// Send stream to raw file.
pub struct FileSink<T> {
    path: PathBuf,
    f: Option<BufWriter<std::fs::File>>,
    written: u64,
    _t: std::marker::PhantomData<T>,
}

impl<T: Sample + StreamItem> FileSink<T> {
    /// Create new FileSink block.
    pub fn new<P: AsRef<Path>>(path: P, mode: Mode) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening sink {}", path.display());
        let f = match mode {
            Mode::Create => std::fs::File::options()
                .write(true)
                .create_new(true)
                .open(path),
            Mode::Overwrite => std::fs::File::create(path),
            Mode::Append => std::fs::File::options()
                .create(true)
                .append(true)
                .open(path),
        }
        .map_err(|e| Error::file_io(e, path))?;
        Ok(Self {
            path: path.to_path_buf(),
            f: Some(BufWriter::new(f)),
            written: 0,
            _t: std::marker::PhantomData,
        })
    }

    /// Number of samples written.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and close the file. Further input is discarded.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut f) = self.f.take() {
            f.flush().map_err(|e| Error::file_io(e, &self.path))?;
            debug!("Closed sink {} after {} samples", self.path.display(), self.written);
        }
        Ok(())
    }
}

impl<T> Drop for FileSink<T> {
    fn drop(&mut self) {
        if let Some(f) = &mut self.f
            && let Err(e) = f.flush()
        {
            error!("Flushing {}: {e}", self.path.display());
        }
    }
}

impl<T: Sample + StreamItem> Block for FileSink<T> {
    fn block_name(&self) -> &'static str {
        "FileSink"
    }
    fn inputs(&self) -> &[ItemType] {
        T::ITEM_TYPE.one()
    }
    fn work(&mut self, r: &InputStreams, _w: &mut OutputStreams) -> Result<BlockRet> {
        let input = r.get::<T>(0);
        let Some(f) = &mut self.f else {
            return Ok(BlockRet::Noop);
        };
        if input.is_empty() {
            return Ok(BlockRet::Noop);
        }
        let mut v = Vec::with_capacity(T::size() * input.len());
        for s in input {
            v.extend(s.serialize());
        }
        f.write_all(&v).map_err(|e| Error::file_io(e, &self.path))?;
        self.written += input.len() as u64;
        Ok(BlockRet::Ok)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::stream::Samples;
    use crate::{Complex, Float};

    #[test]
    fn sink_f32() -> Result<()> {
        let tmpd = tempfile::tempdir()?;
        let tmpfn = tmpd.path().join("delme.bin");
        {
            let mut sink = FileSink::<Float>::new(&tmpfn, Mode::Create)?;
            let r = InputStreams::new(vec![Some(Samples::Float(vec![1.0, 3.0, 3.14, -3.14]))]);
            sink.work(&r, &mut OutputStreams::new(&[], vec![]))?;
            sink.close()?;
            assert_eq!(sink.written(), 4);
        }
        let out = std::fs::read(&tmpfn)?;
        assert_eq!(
            out,
            vec![0, 0, 128, 63, 0, 0, 64, 64, 195, 245, 72, 64, 195, 245, 72, 192]
        );
        // Create refuses to overwrite.
        assert!(matches!(
            FileSink::<Float>::new(&tmpfn, Mode::Create),
            Err(Error::FileIo { .. })
        ));
        Ok(())
    }

    #[test]
    fn sink_c32() -> Result<()> {
        let tmpd = tempfile::tempdir()?;
        let tmpfn = tmpd.path().join("delme.bin");
        {
            let mut sink = FileSink::<Complex>::new(&tmpfn, Mode::Overwrite)?;
            let r = InputStreams::new(vec![Some(Samples::Complex(vec![
                Complex::new(0.0, 0.0),
                Complex::new(3.14, -2.7),
            ]))]);
            sink.work(&r, &mut OutputStreams::new(&[], vec![]))?;
        }
        let out = std::fs::read(&tmpfn)?;
        assert_eq!(
            out,
            vec![0, 0, 0, 0, 0, 0, 0, 0, 195, 245, 72, 64, 205, 204, 44, 192]
        );
        Ok(())
    }
}
/* vim: textwidth=80
 */
