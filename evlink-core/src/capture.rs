//! Recorded USB byte streams.
//!
//! A capture file is an optional text header of `%`-prefixed lines followed
//! by the raw bytes exactly as the device sent them:
//!
//! ```text
//! % family davis
//! % chip davis240c
//! % geometry 240x180
//! % end
//! <raw little-endian words>
//! ```

use crate::chip::ChipId;
use crate::decoder::FamilyKind;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Default chunk size handed to the decoder, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid capture header: {0}")]
    InvalidHeader(String),

    #[error("Chunk size must be a nonzero even number, got {0}")]
    InvalidChunkSize(usize),
}

/// Metadata found in a capture header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureHeader {
    pub family: Option<FamilyKind>,
    pub chip: Option<ChipId>,
    /// Sensor geometry as (width, height).
    pub geometry: Option<(u16, u16)>,
}

impl CaptureHeader {
    /// Parses the header lines at the start of `reader`, leaving it at the first data byte.
    pub fn parse<R: BufRead>(reader: &mut R) -> Result<Self, CaptureError> {
        let mut header = Self::default();

        loop {
            let bytes_peeked = reader.fill_buf()?;

            if bytes_peeked.is_empty() || bytes_peeked[0] != b'%' {
                break;
            }

            let mut line = String::new();
            reader.read_line(&mut line)?;

            if line.starts_with("% end") {
                break;
            }

            header.parse_line(&line)?;
        }

        Ok(header)
    }

    fn parse_line(&mut self, line: &str) -> Result<(), CaptureError> {
        let line = line.trim_end();

        if let Some(family) = line.strip_prefix("% family ") {
            self.family = Some(family.parse().map_err(CaptureError::InvalidHeader)?);
        } else if let Some(chip) = line.strip_prefix("% chip ") {
            self.chip = Some(chip.parse().map_err(CaptureError::InvalidHeader)?);
        } else if let Some(geometry) = line.strip_prefix("% geometry ") {
            // Format: "% geometry 240x180"
            let parsed = geometry
                .split_once('x')
                .and_then(|(w, h)| Some((w.trim().parse().ok()?, h.trim().parse().ok()?)));
            match parsed {
                Some(size) => self.geometry = Some(size),
                None => {
                    return Err(CaptureError::InvalidHeader(format!(
                        "bad geometry '{}'",
                        geometry
                    )))
                }
            }
        }
        // Other header lines are informational.

        Ok(())
    }

    /// Writes the header, terminated by `% end`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        if let Some(family) = self.family {
            writeln!(writer, "% family {}", family)?;
        }
        if let Some(chip) = self.chip {
            writeln!(writer, "% chip {}", chip)?;
        }
        if let Some((w, h)) = self.geometry {
            writeln!(writer, "% geometry {}x{}", w, h)?;
        }
        writeln!(writer, "% end")
    }
}

/// Reads a capture in fixed-size chunks.
///
/// Chunks are filled completely before being handed out, so only the last
/// one can end in the middle of a word.
pub struct CaptureReader<R> {
    reader: R,
    header: CaptureHeader,
    buffer: Vec<u8>,
    bytes_read: u64,
}

impl CaptureReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self, CaptureError> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file), chunk_size)
    }
}

impl<R: BufRead> CaptureReader<R> {
    pub fn new(mut reader: R, chunk_size: usize) -> Result<Self, CaptureError> {
        if chunk_size == 0 || chunk_size % 2 != 0 {
            return Err(CaptureError::InvalidChunkSize(chunk_size));
        }
        let header = CaptureHeader::parse(&mut reader)?;
        Ok(Self {
            reader,
            header,
            buffer: vec![0u8; chunk_size],
            bytes_read: 0,
        })
    }

    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    /// Data bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Next chunk of raw bytes, `None` at end of file.
    pub fn next_chunk(&mut self) -> Result<Option<&[u8]>, CaptureError> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            match self.reader.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        self.bytes_read += filled as u64;
        Ok(Some(&self.buffer[..filled]))
    }
}
