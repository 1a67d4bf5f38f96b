/*!
Structured encoder adapters.

The orchestrator never looks inside a value; it hands the value and a byte
sink to a [`FieldEncoder`]. The encoder owns the wire format and knows nothing
about compression or buffering downstream of the sink.
*/

use std::io::Write;

use bytes::{BufMut, BytesMut};
use prost::Message;

use crate::Result;

/// Structured encoding abstraction for persisted values
///
/// Implementations write a value's tag-based field encoding into `sink`.
/// The sink may be a pooled buffer or the head of a compression chain; the
/// output must not depend on which.
pub trait FieldEncoder<T: ?Sized> {
    /// Write the encoding of `value` into `sink`
    ///
    /// # Arguments
    /// * `value` - The value to encode
    /// * `sink` - Destination for the encoded bytes
    ///
    /// # Errors
    /// * `PersistError::Encoding` - If the value cannot be represented
    /// * `PersistError::Io` - If the sink rejects a write
    fn encode_into(&self, value: &T, sink: &mut dyn Write) -> Result<()>;

    /// Append the encoding of `value` straight onto `buf`
    ///
    /// Used for uncompressed encodes, where the pooled buffer is the final
    /// destination. The default goes through [`encode_into`](Self::encode_into);
    /// encoders that can target [`BufMut`] should override it so the pooled
    /// capacity is written in place.
    fn encode_to_buf(&self, value: &T, buf: &mut BytesMut) -> Result<()> {
        let mut writer = BufMut::writer(buf);
        self.encode_into(value, &mut writer)
    }

    /// Hint for how many bytes `value` will encode to, if cheaply known
    fn size_hint(&self, _value: &T) -> Option<usize> {
        None
    }

    /// Name of the wire format, used in trace output
    fn format_name(&self) -> &str;
}

/// Protocol Buffers encoder backed by `prost`
///
/// Fields are written under the numeric tags declared on the message type,
/// so added or removed fields do not break existing readers.
///
/// # Example
/// ```rust
/// use tagpersist_core::{FieldEncoder, ProstEncoder};
///
/// #[derive(Clone, PartialEq, prost::Message)]
/// struct Ping {
///     #[prost(uint32, tag = "1")]
///     seq: u32,
/// }
///
/// let mut out = Vec::new();
/// ProstEncoder::new().encode_into(&Ping { seq: 1 }, &mut out)?;
/// assert_eq!(out, vec![0x08, 0x01]);
/// # Ok::<(), tagpersist_core::PersistError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ProstEncoder;

impl ProstEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl<M: Message> FieldEncoder<M> for ProstEncoder {
    fn encode_into(&self, value: &M, sink: &mut dyn Write) -> Result<()> {
        // prost targets `BufMut`; a plain writer gets an exactly-sized staging copy.
        let mut scratch = Vec::with_capacity(value.encoded_len());
        value.encode(&mut scratch)?;
        sink.write_all(&scratch)?;
        Ok(())
    }

    fn encode_to_buf(&self, value: &M, buf: &mut BytesMut) -> Result<()> {
        buf.reserve(value.encoded_len());
        value.encode(buf)?;
        Ok(())
    }

    fn size_hint(&self, value: &M) -> Option<usize> {
        Some(value.encoded_len())
    }

    fn format_name(&self) -> &str {
        "protobuf"
    }
}
