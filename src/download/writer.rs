//! Concurrency-safe positional file writer.
//!
//! Exposes one output file as a random-access sink shared by all chunk
//! fetchers of a download. Writes at disjoint offsets may be issued
//! concurrently; they are serialized internally behind an exclusive lock so
//! the handle's state stays consistent. The file is never truncated, which is
//! what allows a paused or crashed download to resume in place.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Mutex-guarded file handle permitting concurrent writes at distinct
/// offsets.
#[derive(Debug)]
pub struct PositionalWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl PositionalWriter {
    /// Opens the file read-write, creating it if absent (0644 on Unix),
    /// without truncating existing content.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or created.
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let file = options.open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(Some(file)),
        })
    }

    /// Writes all of `buffer` at `offset`, returning the count written.
    ///
    /// Safe to call concurrently; callers are serialized internally.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write fails, or an error of kind
    /// [`io::ErrorKind::BrokenPipe`] if the writer has been closed.
    #[allow(clippy::unwrap_used)]
    pub fn write_at(&self, buffer: &[u8], offset: u64) -> io::Result<usize> {
        let mut guard = self.file.lock().unwrap();
        let Some(file) = guard.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "positional writer is closed",
            ));
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            file.write_all_at(buffer, offset)?;
        }
        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom, Write};
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buffer)?;
        }

        Ok(buffer.len())
    }

    /// Flushes and releases the handle. Subsequent writes fail.
    ///
    /// Idempotent: closing an already-closed writer is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if syncing buffered data to disk fails.
    #[allow(clippy::unwrap_used)]
    pub fn close(&self) -> io::Result<()> {
        let file = self.file.lock().unwrap().take();
        match file {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
