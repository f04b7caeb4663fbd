//! Raw output file

use crate::utils::error::Result;
use log::{error, info};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Buffered writer over the output file.
///
/// The file is created (or truncated) when the sink is opened, so a bad
/// path fails the run before any stage starts.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileSink {
    /// Create or truncate `path`
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            error!("Can't open output file {}: {}", path.display(), e);
            e
        })?;
        info!("Writing decoded frames to {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    /// Destination path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
