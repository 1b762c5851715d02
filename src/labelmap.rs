//! Per-pixel user label frames stored next to a recording.
//!
//! Every frame is `width * height` little endian `u16` values in row-major
//! order, frames follow each other without any header.

use crate::error::Error;
use ndarray::Array2;
use std::{
    fs::File,
    io::{BufWriter, Read, Seek, SeekFrom, Write},
    path::Path,
};
use tracing::trace;

/// Labels of one frame, indexed `[row, column]`. Zero is background, other
/// values are user ids.
pub type LabelFrame = Array2<u16>;

const BYTES_PER_LABEL: u64 = 2;

pub struct LabelMapWriter {
    writer: BufWriter<File>,
    frames: u32,
}

impl LabelMapWriter {
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = File::create(path).map_err(|e| Error::CreateFile(e, path.to_path_buf()))?;
        Ok(Self {
            writer: BufWriter::new(file),
            frames: 0,
        })
    }

    pub fn write_frame(&mut self, labels: &LabelFrame) -> Result<(), Error> {
        let bytes = labels
            .iter()
            .flat_map(|label| label.to_le_bytes())
            .collect::<Vec<_>>();
        self.writer.write_all(&bytes).map_err(Error::WriteLabelMap)?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn finish(mut self) -> Result<(), Error> {
        self.writer.flush().map_err(Error::WriteLabelMap)
    }
}

pub struct LabelMapReader {
    file: File,
    len: u64,
}

impl LabelMapReader {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|e| Error::ReadFile(e, path.to_path_buf()))?;
        let len = file
            .metadata()
            .map_err(|e| Error::ReadFile(e, path.to_path_buf()))?
            .len();
        Ok(Self { file, len })
    }

    /// Read the labels of a one-based player frame.
    ///
    /// Frame `n` starts at `max(n - 1, 0) * width * height * 2`. The stride
    /// is derived from the current resolution, so a recording whose
    /// resolution changes midway reads the wrong bytes. Returns `None` when
    /// the frame is not fully contained in the file.
    pub fn read_frame(
        &mut self,
        frame: u32,
        width: usize,
        height: usize,
    ) -> Result<Option<LabelFrame>, Error> {
        let stride = (width * height) as u64 * BYTES_PER_LABEL;
        let position = u64::from(frame.saturating_sub(1)) * stride;
        if stride == 0 || position + stride > self.len {
            trace!(message = "label frame out of range", frame, position, len = self.len);
            return Ok(None);
        }

        self.file
            .seek(SeekFrom::Start(position))
            .map_err(|e| Error::ReadLabelMap(e, frame))?;
        let mut bytes = vec![0; stride as usize];
        self.file
            .read_exact(&mut bytes)
            .map_err(|e| Error::ReadLabelMap(e, frame))?;

        let labels = bytes
            .chunks_exact(BYTES_PER_LABEL as usize)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        let len = labels.len();
        Array2::from_shape_vec((height, width), labels)
            .map(Some)
            .map_err(|_| Error::LabelMapShape(len, width, height))
    }
}
