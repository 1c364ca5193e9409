use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::domain::distribution::cleanup_pattern::CleanupPattern;
use crate::domain::distribution::progress::{ProgressEvent, TransferFailure, TransferOutcome};

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Copies one source file into one destination directory.
///
/// Steps, each a separate failure point:
/// 1. The destination directory must exist.
/// 2. Entries matching the cleanup pattern are removed. If any removal fails nothing is written,
///    so two generations of output never coexist.
/// 3. The source is copied to `destination/<file name>` chunk by chunk, emitting the copied
///    fraction after every chunk. A copy error leaves the partial file in place.
#[derive(Debug, Clone)]
pub struct TransferJob<'a> {
    source: &'a Path,
    destination: &'a Path,
    cleanup: &'a CleanupPattern,
    chunk_size: usize,
}

impl<'a> TransferJob<'a> {
    pub fn new(source: &'a Path, destination: &'a Path, cleanup: &'a CleanupPattern) -> Self {
        TransferJob { source, destination, cleanup, chunk_size: DEFAULT_CHUNK_SIZE }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Runs the transfer, reporting every event through `emit`. Returns the terminal outcome.
    pub fn execute(&self, mut emit: impl FnMut(ProgressEvent)) -> TransferOutcome {
        match self.run(&mut emit) {
            Ok(()) => TransferOutcome::Succeeded,
            Err(failure) => {
                log::warn!("Staging '{}' into '{}' failed: {}", self.source.display(), self.destination.display(), failure);
                emit(ProgressEvent::Failed(failure.clone()));
                TransferOutcome::Failed(failure)
            }
        }
    }

    fn run(&self, emit: &mut impl FnMut(ProgressEvent)) -> Result<(), TransferFailure> {
        if !self.destination.is_dir() {
            return Err(TransferFailure::DestinationMissing);
        }

        self.remove_stale_artifacts()?;
        self.copy(emit)
    }

    fn remove_stale_artifacts(&self) -> Result<(), TransferFailure> {
        let stale = self.cleanup.stale_entries(self.destination).map_err(|e| TransferFailure::Cleanup(e.to_string()))?;

        for path in stale {
            fs::remove_file(&path).map_err(|e| TransferFailure::Cleanup(format!("{}: {}", path.display(), e)))?;
            log::debug!("Removed stale artifact '{}'.", path.display());
        }
        Ok(())
    }

    pub fn target_path(&self) -> Option<PathBuf> {
        self.source.file_name().map(|name| self.destination.join(name))
    }

    fn copy(&self, emit: &mut impl FnMut(ProgressEvent)) -> Result<(), TransferFailure> {
        let copy_error = |e: io::Error| TransferFailure::Copy(e.to_string());

        let target = self.target_path().ok_or_else(|| TransferFailure::Copy(format!("'{}' has no file name", self.source.display())))?;
        let mut reader = File::open(self.source).map_err(copy_error)?;
        let total = reader.metadata().map_err(copy_error)?.len();
        let mut writer = File::create(&target).map_err(copy_error)?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut copied: u64 = 0;
        let mut last_fraction: Option<f64> = None;

        loop {
            let n = read_chunk(&mut reader, &mut buf).map_err(copy_error)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).map_err(copy_error)?;
            copied += n as u64;

            let fraction = if total == 0 { 1.0 } else { (copied as f64 / total as f64).min(1.0) };
            emit(ProgressEvent::Progress(fraction));
            last_fraction = Some(fraction);
        }

        writer.flush().map_err(copy_error)?;

        // A source that shrank while being read, or an empty one, still ends on 1.0.
        if last_fraction.is_none_or(|f| f < 1.0) {
            emit(ProgressEvent::Progress(1.0));
        }

        log::debug!("Copied {} bytes to '{}'.", copied, target.display());
        Ok(())
    }
}

/// Fills `buf` unless the end of the input is reached first.
fn read_chunk(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
