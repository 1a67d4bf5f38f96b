/*!
Encoding orchestrator.

Drives a [`FieldEncoder`] into a pooled buffer, optionally through the
batching + gzip chain, and copies the finished output into owned [`Bytes`].
*/

use bytes::Bytes;
use tracing::debug;

use crate::compression::{EncodingConfig, FinalizeTrace, SinkChain};
use crate::encoder::{FieldEncoder, ProstEncoder};
use crate::pool::BufferPool;
use crate::{PersistError, Result};

/// Turns values into encoded byte sequences
///
/// The orchestrator is stateless apart from its buffer pool, which it shares
/// with its clones.
///
/// # Example
/// ```rust
/// use tagpersist_core::EncodingOrchestrator;
///
/// #[derive(Clone, PartialEq, prost::Message)]
/// struct Greeting {
///     #[prost(string, tag = "1")]
///     text: String,
/// }
///
/// let orchestrator = EncodingOrchestrator::protobuf();
/// let greeting = Greeting { text: "hi".into() };
///
/// let raw = orchestrator.encode(Some(&greeting), false)?;
/// assert_eq!(&raw[..], &[0x0a, 0x02, b'h', b'i']);
///
/// let gz = orchestrator.encode(Some(&greeting), true)?;
/// assert_eq!(&gz[..2], &[0x1f, 0x8b]);
/// # Ok::<(), tagpersist_core::PersistError>(())
/// ```
#[derive(Debug, Clone)]
pub struct EncodingOrchestrator<E = ProstEncoder> {
    encoder: E,
    pool: BufferPool,
    config: EncodingConfig,
}

impl<E> EncodingOrchestrator<E> {
    /// Create an orchestrator from its parts
    ///
    /// # Arguments
    /// * `encoder` - The structured encoder that owns the wire format
    /// * `pool` - Buffer pool to draw scratch buffers from
    /// * `config` - Gzip level and batching window for compressed encodes
    pub fn new(encoder: E, pool: BufferPool, config: EncodingConfig) -> Self {
        Self {
            encoder,
            pool,
            config,
        }
    }

    /// The pool backing this orchestrator
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Compression settings in effect
    pub fn config(&self) -> &EncodingConfig {
        &self.config
    }

    /// The structured encoder in use
    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Encode a value, optionally gzip-compressed
    ///
    /// Uncompressed output is exactly what the encoder produced. Compressed
    /// output is a single gzip member whose payload is that same output. The
    /// result does not record which of the two it is.
    ///
    /// # Errors
    /// * `PersistError::ArgumentMissing` - If `value` is `None`; no buffer is acquired
    /// * `PersistError::Encoding` - If the encoder rejects the value
    /// * `PersistError::Io` - If a compression layer fails to finalize
    pub fn encode<T>(&self, value: Option<&T>, compress: bool) -> Result<Bytes>
    where
        T: ?Sized,
        E: FieldEncoder<T>,
    {
        self.encode_traced(value, compress).map(|(bytes, _)| bytes)
    }

    /// Like [`encode`](Self::encode), also returning the order in which the
    /// writer chain was finalized
    pub fn encode_traced<T>(
        &self,
        value: Option<&T>,
        compress: bool,
    ) -> Result<(Bytes, FinalizeTrace)>
    where
        T: ?Sized,
        E: FieldEncoder<T>,
    {
        let value = value.ok_or(PersistError::ArgumentMissing("value"))?;

        let span = tracing::debug_span!(
            "encode",
            format = self.encoder.format_name(),
            compress
        );
        let _entered = span.enter();

        let mut buffer = self.pool.acquire();
        let mut chain = if compress {
            SinkChain::compressed(buffer, &self.config)
        } else {
            if let Some(hint) = self.encoder.size_hint(value) {
                buffer.reserve(hint);
            }
            SinkChain::direct(buffer)
        };

        match chain.direct_buffer() {
            Some(buffer) => self.encoder.encode_to_buf(value, buffer.bytes_mut())?,
            None => self.encoder.encode_into(value, chain.writer())?,
        }
        let (buffer, trace) = chain.finish()?;

        let bytes = Bytes::copy_from_slice(buffer.bytes());
        self.pool.release(buffer)?;

        debug!(encoded_len = bytes.len(), "value encoded");
        #[cfg(feature = "metrics")]
        crate::observability::PersistMetrics::global().record_encode(bytes.len());

        Ok((bytes, trace))
    }
}

impl EncodingOrchestrator<ProstEncoder> {
    /// Protobuf orchestrator with a default pool and default compression settings
    pub fn protobuf() -> Self {
        Self::protobuf_with(BufferPool::default(), EncodingConfig::default())
    }

    /// Protobuf orchestrator over the given pool and compression settings
    pub fn protobuf_with(pool: BufferPool, config: EncodingConfig) -> Self {
        Self::new(ProstEncoder::new(), pool, config)
    }
}

impl Default for EncodingOrchestrator<ProstEncoder> {
    fn default() -> Self {
        Self::protobuf()
    }
}
