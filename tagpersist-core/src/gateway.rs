/*!
Persistence gateway: validates a destination, encodes, and writes the file.

Both variants share validation and encoding; they differ only in how the
bytes reach the disk. [`PersistenceGateway::save_blocking`] writes on the
calling thread. [`PersistenceGateway::save_suspending`] encodes synchronously
and then awaits tokio's file I/O, so the task yields at the write and nothing
else.

Neither variant offers cancellation or a timeout. Dropping the future of
`save_suspending` after the write has started may still leave a file behind.
Concurrent saves to the same path are last-writer-wins.

The compression flag is not written into the file. A reader must know out of
band whether to gunzip it.
*/

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compression::EncodingConfig;
use crate::config::PersistConfig;
use crate::encoder::{FieldEncoder, ProstEncoder};
use crate::orchestrator::EncodingOrchestrator;
use crate::pool::BufferPool;
use crate::{PersistError, Result};

/// Suffix every destination path must end with
pub const REQUIRED_SUFFIX: &str = ".bin";

/// How the destination file is opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Create the file; fail if it already exists
    CreateNew,
    /// Create the file, overwriting any existing one
    #[default]
    Create,
    /// Open an existing file and write from its start without truncating
    Open,
    /// Open the file if it exists, otherwise create it; no truncation
    OpenOrCreate,
    /// Open an existing file and truncate it
    Truncate,
    /// Append to the file, creating it if missing
    Append,
}

impl WriteMode {
    /// All modes, in declaration order
    pub const ALL: [WriteMode; 6] = [
        WriteMode::CreateNew,
        WriteMode::Create,
        WriteMode::Open,
        WriteMode::OpenOrCreate,
        WriteMode::Truncate,
        WriteMode::Append,
    ];

    /// Open options implementing this mode
    pub fn open_options(self) -> fs::OpenOptions {
        let mut options = fs::OpenOptions::new();
        match self {
            WriteMode::CreateNew => options.write(true).create_new(true),
            WriteMode::Create => options.write(true).create(true).truncate(true),
            WriteMode::Open => options.write(true),
            WriteMode::OpenOrCreate => options.write(true).create(true),
            WriteMode::Truncate => options.write(true).truncate(true),
            WriteMode::Append => options.append(true).create(true),
        };
        options
    }

    /// Options that create the file and fail if it already exists, for the
    /// modes that may create one
    fn exclusive_open_options(self) -> Option<fs::OpenOptions> {
        let mut options = fs::OpenOptions::new();
        match self {
            WriteMode::CreateNew | WriteMode::Create | WriteMode::OpenOrCreate => {
                options.write(true).create_new(true)
            }
            WriteMode::Append => options.append(true).create_new(true),
            WriteMode::Open | WriteMode::Truncate => return None,
        };
        Some(options)
    }

    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            WriteMode::CreateNew => "create_new",
            WriteMode::Create => "create",
            WriteMode::Open => "open",
            WriteMode::OpenOrCreate => "open_or_create",
            WriteMode::Truncate => "truncate",
            WriteMode::Append => "append",
        }
    }
}

impl std::str::FromStr for WriteMode {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self> {
        WriteMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| PersistError::config(format!("unknown write mode: {s}")))
    }
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how one value is persisted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Destination {
    path: Option<PathBuf>,
    mode: WriteMode,
    compress: bool,
}

impl Destination {
    /// Destination at `path`, created/overwritten, uncompressed
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Destination with no path; saving to it fails with `ArgumentMissing`
    pub fn absent() -> Self {
        Self::default()
    }

    /// Use the given write mode
    #[must_use]
    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Gzip-compress the encoded value
    #[must_use]
    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Target path, if one was given
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// How the file will be opened
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Whether the value is gzip-compressed before writing
    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    /// Check the path is present and carries the reserved suffix
    pub fn validate(&self) -> Result<&Path> {
        let path = self
            .path
            .as_deref()
            .ok_or(PersistError::ArgumentMissing("path"))?;

        if !path
            .as_os_str()
            .as_encoded_bytes()
            .ends_with(REQUIRED_SUFFIX.as_bytes())
        {
            return Err(PersistError::invalid_destination(
                path.to_string_lossy().into_owned(),
            ));
        }
        Ok(path)
    }
}

/// File-writing behaviour of a [`PersistenceGateway`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Create missing parent directories before opening the file
    pub create_parent_dirs: bool,
    /// Call `sync_data` after writing
    pub sync_data: bool,
    /// Delete the destination if this call created it and the write then failed.
    /// Off by default: a partially written file is left in place.
    pub remove_partial_on_error: bool,
}

/// Saves values to `.bin` files
///
/// # Example
/// ```rust
/// use tagpersist_core::{Destination, PersistenceGateway, WriteMode};
///
/// #[derive(Clone, PartialEq, prost::Message)]
/// struct Counter {
///     #[prost(uint64, tag = "1")]
///     hits: u64,
/// }
///
/// let dir = tempfile::tempdir()?;
/// let gateway = PersistenceGateway::protobuf();
/// let destination = Destination::new(dir.path().join("counter.bin"))
///     .with_mode(WriteMode::Create)
///     .compressed(true);
///
/// let saved = gateway.save_blocking(Some(&Counter { hits: 3 }), &destination)?;
/// assert!(saved.exists());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct PersistenceGateway<E = ProstEncoder> {
    orchestrator: EncodingOrchestrator<E>,
    config: GatewayConfig,
}

impl<E> PersistenceGateway<E> {
    /// Create a gateway around an orchestrator
    pub fn new(orchestrator: EncodingOrchestrator<E>, config: GatewayConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// The orchestrator producing the bytes
    pub fn orchestrator(&self) -> &EncodingOrchestrator<E> {
        &self.orchestrator
    }

    /// File-writing settings in effect
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Encode without writing; see [`EncodingOrchestrator::encode`]
    pub fn encode<T>(&self, value: Option<&T>, compress: bool) -> Result<Bytes>
    where
        T: ?Sized,
        E: FieldEncoder<T>,
    {
        self.orchestrator.encode(value, compress)
    }

    /// Encode `value` and write it to `destination` on the calling thread
    ///
    /// # Returns
    /// The destination path, unchanged
    ///
    /// # Errors
    /// * `PersistError::ArgumentMissing` - If the value or the path is absent
    /// * `PersistError::InvalidDestination` - If the path does not end with `.bin`;
    ///   nothing is encoded and no file is touched
    /// * `PersistError::Encoding` - If the encoder rejects the value
    /// * `PersistError::Io` - If opening or writing the file fails
    pub fn save_blocking<T>(&self, value: Option<&T>, destination: &Destination) -> Result<PathBuf>
    where
        T: ?Sized,
        E: FieldEncoder<T>,
    {
        let value = value.ok_or(PersistError::ArgumentMissing("value"))?;
        let path = destination.validate()?;

        let span = tracing::debug_span!(
            "save_blocking",
            path = %path.display(),
            mode = %destination.mode(),
            compress = destination.is_compressed()
        );
        let _entered = span.enter();

        let bytes = self
            .orchestrator
            .encode(Some(value), destination.is_compressed())?;

        if self.config.create_parent_dirs {
            ensure_parent_dir(path)?;
        }

        let sync_data = self.config.sync_data;
        let written = self.write_blocking(path, destination.mode(), |file| {
            file.write_all(&bytes)?;
            if sync_data {
                file.sync_data()?;
            }
            Ok(())
        });
        if let Err(err) = written {
            record_write(false);
            return Err(err);
        }

        record_write(true);
        debug!(written = bytes.len(), "file written");
        Ok(path.to_path_buf())
    }

    /// Open `path` per `mode` and run `write` on it. A file this call created
    /// is removed when `write` fails and `remove_partial_on_error` is set.
    fn write_blocking<F>(&self, path: &Path, mode: WriteMode, write: F) -> Result<()>
    where
        F: FnOnce(&mut fs::File) -> std::io::Result<()>,
    {
        let (mut file, created) = open_tracking_creation(path, mode)?;
        if let Err(err) = write(&mut file) {
            drop(file);
            if created && self.config.remove_partial_on_error {
                discard_partial(path);
            }
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(feature = "async-rt")]
impl<E> PersistenceGateway<E> {
    /// Encode `value` and write it to `destination`, suspending the calling
    /// task while the file is written
    ///
    /// Validation and encoding run before the first await. Errors match
    /// [`save_blocking`](Self::save_blocking). There is no cancellation or
    /// timeout; wrap the call if one is needed.
    pub async fn save_suspending<T>(
        &self,
        value: Option<&T>,
        destination: &Destination,
    ) -> Result<PathBuf>
    where
        T: ?Sized,
        E: FieldEncoder<T>,
    {
        use tracing::Instrument;

        let value = value.ok_or(PersistError::ArgumentMissing("value"))?;
        let path = destination.validate()?.to_path_buf();
        let bytes = self
            .orchestrator
            .encode(Some(value), destination.is_compressed())?;

        let span = tracing::debug_span!(
            "save_suspending",
            path = %path.display(),
            mode = %destination.mode(),
            compress = destination.is_compressed()
        );
        self.write_suspending(&path, destination.mode(), bytes)
            .instrument(span)
            .await?;

        Ok(path)
    }

    async fn write_suspending(&self, path: &Path, mode: WriteMode, bytes: Bytes) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        if self.config.create_parent_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let len = bytes.len();
        let sync_data = self.config.sync_data;
        let written = self
            .write_tracked_async(path, mode, move |mut file| async move {
                file.write_all(&bytes).await?;
                // tokio completes writes in the background; flush before the handle drops.
                file.flush().await?;
                if sync_data {
                    file.sync_data().await?;
                }
                Ok::<(), std::io::Error>(())
            })
            .await;
        if let Err(err) = written {
            record_write(false);
            return Err(err);
        }

        record_write(true);
        debug!(written = len, "file written");
        Ok(())
    }

    /// Async counterpart of `write_blocking`: the file handle is moved into
    /// `write`, and a file this call created is removed if it fails.
    async fn write_tracked_async<F, Fut>(&self, path: &Path, mode: WriteMode, write: F) -> Result<()>
    where
        F: FnOnce(tokio::fs::File) -> Fut,
        Fut: std::future::Future<Output = std::io::Result<()>>,
    {
        let (file, created) = open_tracking_creation_async(path, mode).await?;
        if let Err(err) = write(file).await {
            if created && self.config.remove_partial_on_error {
                if let Err(cleanup) = tokio::fs::remove_file(path).await {
                    debug!(error = %cleanup, "partial file not removed");
                }
            }
            return Err(err.into());
        }
        Ok(())
    }
}

impl PersistenceGateway<ProstEncoder> {
    /// Protobuf gateway with default pool, compression, and file settings
    pub fn protobuf() -> Self {
        Self::new(EncodingOrchestrator::protobuf(), GatewayConfig::default())
    }

    /// Build a protobuf gateway from configuration
    ///
    /// # Errors
    /// * `PersistError::Config` - If any section of the configuration is invalid
    pub fn from_config(config: &PersistConfig) -> Result<Self> {
        config.validate()?;
        let orchestrator = EncodingOrchestrator::protobuf_with(
            BufferPool::new(config.pool.clone()),
            config.encoding.clone(),
        );
        Ok(Self::new(orchestrator, config.gateway.clone()))
    }
}

impl Default for PersistenceGateway<ProstEncoder> {
    fn default() -> Self {
        Self::protobuf()
    }
}

/// Convenience function to create a gateway with default components
///
/// Creates a gateway with:
/// - Protobuf encoding
/// - A default buffer pool
/// - Gzip level 6 behind a 64 KiB batching window
pub fn create_default_gateway() -> PersistenceGateway<ProstEncoder> {
    PersistenceGateway::new(
        EncodingOrchestrator::protobuf_with(BufferPool::default(), EncodingConfig::default()),
        GatewayConfig::default(),
    )
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Open `path` for `mode`, reporting whether this open created the file.
///
/// Creating modes first try an exclusive create. Only when that reports
/// `AlreadyExists` is the path opened the ordinary way, and then the file is
/// never counted as created. A dangling symlink counts as existing.
fn open_tracking_creation(path: &Path, mode: WriteMode) -> std::io::Result<(fs::File, bool)> {
    if let Some(exclusive) = mode.exclusive_open_options() {
        match exclusive.open(path) {
            Ok(file) => return Ok((file, true)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists && mode != WriteMode::CreateNew => {}
            Err(err) => return Err(err),
        }
    }
    Ok((mode.open_options().open(path)?, false))
}

#[cfg(feature = "async-rt")]
async fn open_tracking_creation_async(
    path: &Path,
    mode: WriteMode,
) -> std::io::Result<(tokio::fs::File, bool)> {
    if let Some(exclusive) = mode.exclusive_open_options() {
        match tokio::fs::OpenOptions::from(exclusive).open(path).await {
            Ok(file) => return Ok((file, true)),
            Err(err) if err.kind() == ErrorKind::AlreadyExists && mode != WriteMode::CreateNew => {}
            Err(err) => return Err(err),
        }
    }
    let file = tokio::fs::OpenOptions::from(mode.open_options())
        .open(path)
        .await?;
    Ok((file, false))
}

fn discard_partial(path: &Path) {
    if let Err(cleanup) = fs::remove_file(path) {
        debug!(error = %cleanup, "partial file not removed");
    }
}

#[cfg(feature = "metrics")]
fn record_write(ok: bool) {
    crate::observability::PersistMetrics::global().record_file_write(ok);
}

#[cfg(not(feature = "metrics"))]
fn record_write(_ok: bool) {}
