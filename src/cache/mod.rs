use std::fmt;
use std::fs;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;
use tracing::trace;

mod key;
mod payload;

pub use key::{CacheKey, KeyError};
pub use payload::{Payload, PayloadError};

pub(crate) const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// Cache state for a key, in decision order. Staleness is checked before
/// force, so an expired entry reports `Stale` even when `force` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Miss,
    Hit,
    Stale,
    Error,
    Force,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheStatus::Miss => "miss",
            CacheStatus::Hit => "hit",
            CacheStatus::Stale => "stale",
            CacheStatus::Error => "error",
            CacheStatus::Force => "force",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Cache root directory.
    pub dir: PathBuf,
    /// Entries older than this are stale. None means entries never expire.
    pub expires: Option<Duration>,
    /// Bypass cache reads (but still write).
    pub force: bool,
    /// Bypass cache reads only for stored transport failures.
    pub force_errors: bool,
}

/// Disk cache mapping cache keys to gzip-compressed payloads. Owns the files
/// under its root directory; concurrent readers and writers (in-process or
/// across processes) are safe because writes replace files atomically.
#[derive(Debug, Clone)]
pub struct Cache {
    options: CacheOptions,
}

enum Probe {
    State(CacheStatus),
    Open(fs::File),
}

impl Cache {
    pub fn new(options: CacheOptions) -> Self {
        Self { options }
    }

    /// Absolute path for a cache key. Pure path composition, useful for
    /// diagnostics even when the entry does not exist.
    pub fn disk_path(&self, key: &CacheKey) -> PathBuf {
        self.options.dir.join(key.disk_path())
    }

    /// Cache status for a key. Side-effect free. Note that `force_errors`
    /// affects only `read`: a stored transport failure still reports `Error`
    /// here so the state remains observable.
    pub fn status(&self, key: &CacheKey) -> Result<CacheStatus> {
        let path = self.disk_path(key);
        let file = match self.probe(&path)? {
            Probe::State(state) => return Ok(state),
            Probe::Open(file) => file,
        };
        let status = decode(file, |mut reader| Payload::peek_status(&mut reader))
            .with_context(|| format!("{}: malformed cache entry", path.display()))?;
        if status == crate::ERROR_STATUS {
            return Ok(CacheStatus::Error);
        }
        Ok(CacheStatus::Hit)
    }

    /// Read the stored payload, or None when the entry is absent, stale, or
    /// bypassed by `force`/`force_errors`. A present-but-corrupt file is a
    /// hard error with the path attached, not a miss.
    pub fn read(&self, key: &CacheKey) -> Result<Option<Payload>> {
        let path = self.disk_path(key);
        let file = match self.probe(&path)? {
            Probe::State(_) => return Ok(None),
            Probe::Open(file) => file,
        };
        let payload = decode(file, |mut reader| Payload::deserialize(&mut reader))
            .with_context(|| format!("{}: malformed cache entry", path.display()))?;
        if self.options.force_errors && payload.is_error() {
            return Ok(None);
        }
        Ok(Some(payload))
    }

    /// Serialize, compress, and atomically replace any existing entry. The
    /// payload is composed in a temp file in the destination directory and
    /// renamed into place, so readers never observe a partial file; the temp
    /// file is cleaned up on every exit path.
    pub fn write(&self, key: &CacheKey, payload: &Payload) -> Result<()> {
        let path = self.disk_path(key);
        let parent = path.parent().context("cache path missing parent")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache dir {}", parent.display()))?;

        let temp = NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
        let mut encoder = GzEncoder::new(temp, Compression::default());
        payload.serialize(&mut encoder)?;
        let mut temp = encoder.finish()?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to persist cache entry {}", path.display()))?;
        trace!(path = %path.display(), "cache entry written");
        Ok(())
    }

    /// Remove the entry if present; no-op otherwise.
    pub fn delete(&self, key: &CacheKey) -> Result<()> {
        let path = self.disk_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to delete {}", path.display()))
            }
        }
    }

    /// Decide miss/stale/force without touching file contents; hand back an
    /// open file for the states that require decoding.
    fn probe(&self, path: &Path) -> Result<Probe> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Probe::State(CacheStatus::Miss));
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to stat {}", path.display()));
            }
        };
        if let Some(expires) = self.options.expires {
            let mtime = metadata
                .modified()
                .with_context(|| format!("failed to read mtime of {}", path.display()))?;
            let age = SystemTime::now()
                .duration_since(mtime)
                .unwrap_or(Duration::ZERO);
            if age > expires {
                return Ok(Probe::State(CacheStatus::Stale));
            }
        }
        if self.options.force {
            return Ok(Probe::State(CacheStatus::Force));
        }
        let file =
            fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Probe::Open(file))
    }
}

/// Run `parse` over the decompressed file contents. Entries are normally gzip
/// streams, but plain files are accepted too (sniffed via the magic number).
fn decode<T, E>(
    mut file: fs::File,
    parse: impl FnOnce(&mut dyn std::io::BufRead) -> Result<T, E>,
) -> Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let mut magic = [0u8; 3];
    let n = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;
    if n == 3 && magic == GZIP_MAGIC {
        let mut reader = BufReader::new(GzDecoder::new(file));
        Ok(parse(&mut reader)?)
    } else {
        let mut reader = BufReader::new(file);
        Ok(parse(&mut reader)?)
    }
}
