//! # streamcc
//!
//! Connected components over massive edge streams in near-linear space.
//!
//! The engine maintains one ℓ₀-sampling sketch stack ("supernode") per
//! vertex over a simulated frequency vector with a slot for every
//! possible undirected edge. Insertions and deletions toggle slots in
//! GF(2), so duplicates cancel and updates commute — the stream can be
//! ingested by many threads in any order. Connectivity queries run a
//! parallel Borůvka emulation: each round samples one cut edge per live
//! component and merges the touched sketch stacks, halving the
//! component count per round with high probability.
//!
//! # Architecture
//!
//! - [`Sketch`] / [`Supernode`] — the ℓ₀ sampler and the per-vertex
//!   stack of independent samplers, one consumed per query round
//! - [`EagerDsu`] — lock-free union-find with a live spanning forest,
//!   answering queries in near-constant time until a deletion or cycle
//!   invalidates it
//! - [`Graph`] — the streaming engine: update fast path, gutter-batched
//!   sketch maintenance, the Borůvka driver, and snapshot/restore for
//!   continuation queries
//! - [`BinaryGraphStream`] / [`BinaryGraphStreamMt`] — bulk ingestion
//!   from the binary stream format, with cooperative query barriers
//!
//! # Example
//!
//! ```rust,no_run
//! use streamcc::{Graph, GraphConfiguration, GraphUpdate};
//!
//! let graph = Graph::new(4, GraphConfiguration::default(), 1)?;
//! graph.update(GraphUpdate::insert(0, 1), 0)?;
//! graph.update(GraphUpdate::insert(2, 3), 0)?;
//! let components = graph.connected_components(true)?;
//! assert_eq!(components.len(), 2);
//! # Ok::<(), streamcc::GraphError>(())
//! ```

pub mod backup;
pub mod config;
pub mod dsu;
pub mod error;
pub mod graph;
pub mod gutter;
pub mod hashing;
pub mod pairing;
pub mod serial;
pub mod sketch;
pub mod stream;
pub mod supernode;
pub mod types;
pub mod verify;

mod worker;

pub use config::{GraphConfiguration, GutterSystem};
pub use dsu::EagerDsu;
pub use error::{GraphError, Result, StreamError};
pub use graph::Graph;
pub use gutter::{Batch, BatchQueue, GutteringSystem, StandaloneGutters};
pub use sketch::{Bucket, Sketch};
pub use stream::{
    BinaryGraphStream, BinaryGraphStreamMt, BinaryStreamWriter, MtStreamReader, EDGE_RECORD_SIZE,
    STREAM_HEADER_SIZE,
};
pub use supernode::Supernode;
pub use types::{Edge, EdgeIndex, GraphUpdate, NodeId, SketchSample, SupernodeSample, UpdateType};
pub use verify::{GraphTruth, NoopVerifier, SampleVerifier};
