/*!
# tagpersist Core Engine

Turns typed values into compact, tag-encoded byte sequences and writes them
to `.bin` files.

This crate provides:

- A thread-safe buffer pool that recycles scratch buffers between encodes
- A pluggable structured encoder (Protocol Buffers via `prost` out of the box)
- Optional streaming gzip compression behind a 64 KiB write-batching window
- Blocking and suspend-on-I/O (tokio) file writes sharing one encode path

## Architecture

```text
caller -> PersistenceGateway (validate) -> EncodingOrchestrator (encode [+ gzip])
       -> BufferPool (acquire/release) -> file system
```

The compression flag is not recorded in the output. Whoever reads a file back
must know whether it was written compressed.

## Usage

```rust
use tagpersist_core::{Destination, PersistenceGateway, WriteMode};

#[derive(Clone, PartialEq, prost::Message)]
struct ArticleText {
    #[prost(int64, tag = "1")]
    article_text_id: i64,
    #[prost(string, tag = "2")]
    article_text: String,
}

let dir = tempfile::tempdir()?;
let gateway = PersistenceGateway::protobuf();
let article = ArticleText { article_text_id: 1, article_text: "Hello".into() };

// Encoded bytes only
let bytes = gateway.encode(Some(&article), false)?;

// Encode, gzip, and write
let destination = Destination::new(dir.path().join("article.bin"))
    .with_mode(WriteMode::Create)
    .compressed(true);
let path = gateway.save_blocking(Some(&article), &destination)?;
# assert!(path.exists() && !bytes.is_empty());
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

pub mod compression;
pub mod config;
pub mod encoder;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod orchestrator;
pub mod pool;

#[cfg(test)]
mod error_tests;

pub use compression::{EncodingConfig, FinalizeTrace, Layer, SinkChain, DEFAULT_BATCH_WINDOW};
pub use config::PersistConfig;
pub use encoder::{FieldEncoder, ProstEncoder};
pub use error::{PersistError, Result};
pub use gateway::{
    create_default_gateway, Destination, GatewayConfig, PersistenceGateway, WriteMode,
    REQUIRED_SUFFIX,
};
pub use orchestrator::EncodingOrchestrator;
pub use pool::{BufferPool, PoolConfig, PoolStats, PooledBuffer};
