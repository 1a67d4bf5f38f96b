/*!
Writer chains placed between the structured encoder and a pooled buffer.

Uncompressed encodes write straight into the buffer. Compressed encodes stack
a write-batching layer on top of a gzip stream on top of the buffer:

```text
encoder -> BufWriter (batch window) -> GzEncoder -> PooledBuffer
```

The layers must be finalized innermost-first: the batching layer is flushed
into gzip, then gzip writes its trailer, and only then may the buffer be read.
[`SinkChain::finish`] performs these steps in that order and returns a
[`FinalizeTrace`] recording it. Reading the buffer any earlier yields a
truncated gzip member.
*/

use std::io::{BufWriter, Write};

use flate2::{write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};

use crate::pool::PooledBuffer;
use crate::{PersistError, Result};

/// Default size of the write-batching window in front of the gzip stream
pub const DEFAULT_BATCH_WINDOW: usize = 64 * 1024;

/// Default gzip compression level
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Tuning for the compressed encoding path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Gzip level (0-9, where 0 is stored and 9 is maximum)
    pub gzip_level: u32,
    /// Bytes coalesced before they reach the compressor
    pub batch_window: usize,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            gzip_level: DEFAULT_GZIP_LEVEL,
            batch_window: DEFAULT_BATCH_WINDOW,
        }
    }
}

impl EncodingConfig {
    /// Fast compression (level 1)
    pub fn fast() -> Self {
        Self {
            gzip_level: 1,
            ..Self::default()
        }
    }

    /// Maximum compression (level 9)
    pub fn max() -> Self {
        Self {
            gzip_level: 9,
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.gzip_level > 9 {
            return Err(PersistError::config(format!(
                "gzip level {} is out of range (0-9)",
                self.gzip_level
            )));
        }
        if self.batch_window == 0 {
            return Err(PersistError::config("batch window must be non-zero"));
        }
        Ok(())
    }
}

/// One stage of a writer chain, named in the order it is finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// The structured encoder has written its last byte
    Encoder,
    /// The batching window was flushed into the compressor
    WriteBatch,
    /// The gzip trailer (CRC32 and length) was written
    Gzip,
    /// The pooled buffer holds the complete output and may be read
    Buffer,
}

/// Order in which a [`SinkChain`] released its layers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeTrace {
    layers: Vec<Layer>,
}

impl FinalizeTrace {
    fn record(&mut self, layer: Layer) {
        tracing::trace!(?layer, "layer finalized");
        self.layers.push(layer);
    }

    /// Layers in the order they were finalized
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }
}

/// Writer stack terminating in a pooled buffer
#[derive(Debug)]
pub enum SinkChain {
    /// Encoder output lands in the buffer unchanged
    Direct(PooledBuffer),
    /// Encoder output is batched, gzip-compressed, then buffered
    Compressed(BufWriter<GzEncoder<PooledBuffer>>),
}

impl SinkChain {
    /// Chain that writes into `buffer` unchanged
    pub fn direct(buffer: PooledBuffer) -> Self {
        Self::Direct(buffer)
    }

    /// Chain that batches and gzip-compresses into `buffer`
    pub fn compressed(buffer: PooledBuffer, config: &EncodingConfig) -> Self {
        let gzip = GzEncoder::new(buffer, Compression::new(config.gzip_level));
        Self::Compressed(BufWriter::with_capacity(config.batch_window, gzip))
    }

    /// Whether this chain compresses its input
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }

    /// The buffer itself when nothing sits in front of it
    pub fn direct_buffer(&mut self) -> Option<&mut PooledBuffer> {
        match self {
            Self::Direct(buffer) => Some(buffer),
            Self::Compressed(_) => None,
        }
    }

    /// The head of the chain, where the encoder writes
    pub fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Direct(buffer) => buffer,
            Self::Compressed(batch) => batch,
        }
    }

    /// Finalize every layer in reverse order of construction and hand back
    /// the buffer.
    ///
    /// Call only after the encoder has finished writing. On error the
    /// remaining layers are dropped and the buffer returns to its pool.
    pub fn finish(self) -> Result<(PooledBuffer, FinalizeTrace)> {
        let mut trace = FinalizeTrace::default();
        trace.record(Layer::Encoder);

        let buffer = match self {
            Self::Direct(buffer) => buffer,
            Self::Compressed(batch) => {
                let gzip = batch.into_inner().map_err(|e| e.into_error())?;
                trace.record(Layer::WriteBatch);
                let buffer = gzip.finish()?;
                trace.record(Layer::Gzip);
                buffer
            }
        };

        trace.record(Layer::Buffer);
        Ok((buffer, trace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_direct_chain_passes_bytes_through() {
        let pool = BufferPool::default();
        let mut chain = SinkChain::direct(pool.acquire());
        chain.writer().write_all(b"raw bytes").unwrap();

        let (buffer, trace) = chain.finish().unwrap();
        assert_eq!(buffer.bytes(), b"raw bytes");
        assert_eq!(trace.layers(), &[Layer::Encoder, Layer::Buffer]);
    }

    #[test]
    fn test_direct_buffer_only_exposed_without_compression() {
        let pool = BufferPool::default();
        let mut direct = SinkChain::direct(pool.acquire());
        direct
            .direct_buffer()
            .unwrap()
            .bytes_mut()
            .extend_from_slice(b"in place");
        let (buffer, _) = direct.finish().unwrap();
        assert_eq!(buffer.bytes(), b"in place");

        let mut compressed = SinkChain::compressed(pool.acquire(), &EncodingConfig::default());
        assert!(compressed.direct_buffer().is_none());
    }

    #[test]
    fn test_compressed_chain_finalizes_innermost_first() {
        let pool = BufferPool::default();
        let mut chain = SinkChain::compressed(pool.acquire(), &EncodingConfig::default());
        assert!(chain.is_compressed());

        let payload = b"repetitive payload ".repeat(100);
        chain.writer().write_all(&payload).unwrap();

        let (buffer, trace) = chain.finish().unwrap();
        assert_eq!(
            trace.layers(),
            &[Layer::Encoder, Layer::WriteBatch, Layer::Gzip, Layer::Buffer]
        );
        assert_eq!(gunzip(buffer.bytes()).unwrap(), payload);
        assert!(buffer.len() < payload.len());
    }

    #[test]
    fn test_many_small_writes_are_coalesced() {
        let pool = BufferPool::default();
        let mut chain = SinkChain::compressed(pool.acquire(), &EncodingConfig::default());

        let mut expected = Vec::new();
        for i in 0..5000u32 {
            let chunk = i.to_le_bytes();
            chain.writer().write_all(&chunk).unwrap();
            expected.extend_from_slice(&chunk);
        }

        let (buffer, _) = chain.finish().unwrap();
        assert_eq!(gunzip(buffer.bytes()).unwrap(), expected);
    }

    #[test]
    fn test_payload_larger_than_batch_window() {
        let pool = BufferPool::default();
        let config = EncodingConfig {
            batch_window: 128,
            ..EncodingConfig::default()
        };
        let mut chain = SinkChain::compressed(pool.acquire(), &config);

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        chain.writer().write_all(&payload).unwrap();

        let (buffer, _) = chain.finish().unwrap();
        assert_eq!(gunzip(buffer.bytes()).unwrap(), payload);
    }

    #[test]
    fn test_reading_before_batch_flush_sees_nothing_usable() {
        let pool = BufferPool::default();
        let mut chain = SinkChain::compressed(pool.acquire(), &EncodingConfig::default());
        chain.writer().write_all(b"still sitting in the batch window").unwrap();

        let SinkChain::Compressed(batch) = &chain else {
            panic!("expected compressed chain");
        };
        let premature = batch.get_ref().get_ref().bytes().to_vec();
        assert!(premature.is_empty());
        assert!(gunzip(&premature).map_or(true, |out| out.is_empty()));
    }

    #[test]
    fn test_reading_before_gzip_trailer_is_truncated() {
        let pool = BufferPool::default();
        let mut chain = SinkChain::compressed(pool.acquire(), &EncodingConfig::default());
        let payload = b"needs a trailer ".repeat(64);
        chain.writer().write_all(&payload).unwrap();

        let SinkChain::Compressed(batch) = chain else {
            panic!("expected compressed chain");
        };
        // Flush the batch layer but skip the gzip trailer.
        let mut gzip = batch.into_inner().map_err(|e| e.into_error()).unwrap();
        gzip.flush().unwrap();
        let premature = gzip.get_ref().bytes().to_vec();

        assert!(gunzip(&premature).is_err());

        let complete = gzip.finish().unwrap();
        assert_eq!(gunzip(complete.bytes()).unwrap(), payload);
    }

    #[test]
    fn test_stored_level_still_produces_valid_gzip() {
        let pool = BufferPool::default();
        let config = EncodingConfig {
            gzip_level: 0,
            ..EncodingConfig::default()
        };
        let mut chain = SinkChain::compressed(pool.acquire(), &config);
        chain.writer().write_all(b"stored").unwrap();

        let (buffer, _) = chain.finish().unwrap();
        assert_eq!(gunzip(buffer.bytes()).unwrap(), b"stored");
    }

    #[test]
    fn test_empty_input_yields_empty_gzip_member() {
        let pool = BufferPool::default();
        let chain = SinkChain::compressed(pool.acquire(), &EncodingConfig::default());

        let (buffer, _) = chain.finish().unwrap();
        assert!(!buffer.is_empty());
        assert!(gunzip(buffer.bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_buffer_returns_to_pool_when_chain_is_dropped() {
        let pool = BufferPool::default();
        {
            let mut chain = SinkChain::compressed(pool.acquire(), &EncodingConfig::default());
            chain.writer().write_all(b"abandoned").unwrap();
        }
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_encoding_config_validation() {
        assert!(EncodingConfig::default().validate().is_ok());
        assert!(EncodingConfig::fast().validate().is_ok());
        assert!(EncodingConfig::max().validate().is_ok());

        let bad_level = EncodingConfig {
            gzip_level: 10,
            ..EncodingConfig::default()
        };
        assert!(bad_level.validate().is_err());

        let bad_window = EncodingConfig {
            batch_window: 0,
            ..EncodingConfig::default()
        };
        assert!(bad_window.validate().is_err());
    }
}
