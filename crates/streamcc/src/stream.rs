//! Binary graph stream: wire format, readers, and a writer.
//!
//! On disk a stream is a little-endian header `(u32 num_nodes,
//! u64 num_edges)` followed by `num_edges` records of
//! `(u8 type, u32 src, u32 dst)` — 12 + 9·num_edges bytes total.
//!
//! The multithreaded reader hands out disjoint byte ranges through a
//! single atomic offset; relaxed ordering is enough because the offset
//! only needs to be monotone — every claim is reconciled against the
//! end-of-file and pending-query bounds afterwards. Query barriers are
//! cooperative: paused or fenced readers see a zero-length read and
//! surface a `Breakpoint` record, and the orchestrator may only query
//! once every reader thread has reported one.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::StreamError;
use crate::types::{Edge, GraphUpdate, NodeId, UpdateType};

/// Bytes of one on-disk record.
pub const EDGE_RECORD_SIZE: usize = 9;
/// Bytes of the stream header.
pub const STREAM_HEADER_SIZE: usize = 12;

const NO_QUERY: u64 = u64::MAX;

type StreamResult<T> = std::result::Result<T, StreamError>;

fn open_stream(path: &Path) -> StreamResult<File> {
    File::open(path).map_err(|source| StreamError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn read_header(file: &mut File, path: &Path) -> StreamResult<(NodeId, u64)> {
    let mut header = [0u8; STREAM_HEADER_SIZE];
    file.read_exact(&mut header).map_err(|_| {
        StreamError::BadHeader(format!("{} is shorter than a stream header", path.display()))
    })?;
    let num_nodes = NodeId::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let num_edges = u64::from_le_bytes([
        header[4], header[5], header[6], header[7], header[8], header[9], header[10], header[11],
    ]);
    Ok((num_nodes, num_edges))
}

fn parse_record(rec: &[u8], offset: u64) -> StreamResult<GraphUpdate> {
    let kind = UpdateType::from_byte(rec[0]).ok_or(StreamError::BadRecord {
        offset,
        value: rec[0],
    })?;
    let src = NodeId::from_le_bytes([rec[1], rec[2], rec[3], rec[4]]);
    let dst = NodeId::from_le_bytes([rec[5], rec[6], rec[7], rec[8]]);
    Ok(GraphUpdate {
        edge: Edge::new(src, dst),
        kind,
    })
}

/// Buffered single-threaded stream reader.
pub struct BinaryGraphStream {
    file: File,
    num_nodes: NodeId,
    num_edges: u64,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
    offset: u64,
}

impl BinaryGraphStream {
    /// Open `path` with a read buffer of roughly `buf_bytes`, rounded
    /// down to a whole number of records.
    pub fn open(path: impl AsRef<Path>, buf_bytes: usize) -> StreamResult<Self> {
        let path = path.as_ref();
        let mut file = open_stream(path)?;
        let (num_nodes, num_edges) = read_header(&mut file, path)?;
        let buf_size = (buf_bytes - buf_bytes % EDGE_RECORD_SIZE).max(EDGE_RECORD_SIZE);
        Ok(Self {
            file,
            num_nodes,
            num_edges,
            buf: vec![0; buf_size],
            pos: 0,
            filled: 0,
            offset: STREAM_HEADER_SIZE as u64,
        })
    }

    pub fn nodes(&self) -> NodeId {
        self.num_nodes
    }

    pub fn edges(&self) -> u64 {
        self.num_edges
    }

    /// Next record. Valid for exactly [`Self::edges`] calls.
    pub fn get_edge(&mut self) -> StreamResult<GraphUpdate> {
        if self.pos >= self.filled {
            self.refill()?;
        }
        let rec_off = self.offset;
        let upd = parse_record(&self.buf[self.pos..self.pos + EDGE_RECORD_SIZE], rec_off)?;
        self.pos += EDGE_RECORD_SIZE;
        self.offset += EDGE_RECORD_SIZE as u64;
        Ok(upd)
    }

    fn refill(&mut self) -> StreamResult<()> {
        self.pos = 0;
        self.filled = 0;
        while self.filled < self.buf.len() {
            let n = self
                .file
                .read(&mut self.buf[self.filled..])
                .map_err(|source| StreamError::Read {
                    offset: self.offset + self.filled as u64,
                    source,
                })?;
            if n == 0 {
                break;
            }
            self.filled += n;
        }
        if self.filled < EDGE_RECORD_SIZE {
            return Err(StreamError::Read {
                offset: self.offset,
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended before the declared record count",
                ),
            });
        }
        Ok(())
    }
}

/// Shared state of the multithreaded stream reader.
///
/// Each reading thread owns an [`MtStreamReader`] over a shared handle.
pub struct BinaryGraphStreamMt {
    file: File,
    num_nodes: NodeId,
    num_edges: u64,
    buf_size: usize,
    end_of_file: u64,
    stream_off: AtomicU64,
    query_index: AtomicU64,
    query_block: AtomicBool,
}

impl BinaryGraphStreamMt {
    pub fn open(path: impl AsRef<Path>, buf_bytes: usize) -> StreamResult<Arc<Self>> {
        let path = path.as_ref();
        let mut file = open_stream(path)?;
        let (num_nodes, num_edges) = read_header(&mut file, path)?;
        let buf_size = (buf_bytes - buf_bytes % EDGE_RECORD_SIZE).max(EDGE_RECORD_SIZE);
        Ok(Arc::new(Self {
            file,
            num_nodes,
            num_edges,
            buf_size,
            end_of_file: STREAM_HEADER_SIZE as u64 + num_edges * EDGE_RECORD_SIZE as u64,
            stream_off: AtomicU64::new(STREAM_HEADER_SIZE as u64),
            query_index: AtomicU64::new(NO_QUERY),
            query_block: AtomicBool::new(false),
        }))
    }

    pub fn nodes(&self) -> NodeId {
        self.num_nodes
    }

    pub fn edges(&self) -> u64 {
        self.num_edges
    }

    /// Pause the stream so a query can run. Every reader thread must
    /// return a `Breakpoint` before the query is actually safe: that is
    /// the only proof no update is still in flight.
    pub fn on_demand_query(&self) {
        self.query_block.store(true, Ordering::Release);
    }

    /// Resume after a query, whether it was on-demand or registered.
    pub fn post_query_resume(&self) {
        self.query_block.store(false, Ordering::Release);
        self.query_index.store(NO_QUERY, Ordering::Release);
    }

    /// Fence the stream at update index `query_idx`: reads never cross
    /// it, and reads at or past it report breakpoints. Fails if that
    /// offset has already been claimed by a reader; registering exactly
    /// at the current claim point is allowed.
    pub fn register_query(&self, query_idx: u64) -> bool {
        let byte_index = STREAM_HEADER_SIZE as u64 + query_idx * EDGE_RECORD_SIZE as u64;
        if byte_index < self.stream_off.load(Ordering::Acquire) {
            return false;
        }
        self.query_index.store(byte_index, Ordering::Release);
        true
    }

    /// Rewind to the first record (single-threaded use only).
    pub fn stream_reset(&self) {
        self.stream_off
            .store(STREAM_HEADER_SIZE as u64, Ordering::Release);
    }

    /// Claim and read the next chunk into `buf`. Returns the byte count
    /// actually read, with 0 signaling a breakpoint (query pending or
    /// stream exhausted). Also returns the byte offset the data came
    /// from, for error reporting upstream.
    fn read_data(&self, buf: &mut [u8]) -> StreamResult<(usize, u64)> {
        let qidx = self.query_index.load(Ordering::Acquire);
        let off = self.stream_off.load(Ordering::Acquire);
        if self.query_block.load(Ordering::Acquire) || off >= self.end_of_file || off >= qidx {
            return Ok((0, off));
        }

        // Several threads can pass the check above at once; the claims
        // below are reconciled against the query fence and end-of-file.
        let read_off = self
            .stream_off
            .fetch_add(self.buf_size as u64, Ordering::Relaxed);
        if read_off >= qidx {
            self.stream_off.store(qidx, Ordering::Release);
            return Ok((0, read_off));
        }
        if read_off >= self.end_of_file {
            return Ok((0, read_off));
        }

        let mut to_read = self.buf_size as u64;
        if qidx >= read_off && qidx < read_off + self.buf_size as u64 {
            // the fence truncates this read
            to_read = qidx - read_off;
            self.stream_off.store(qidx, Ordering::Release);
        }
        if read_off + to_read > self.end_of_file {
            to_read = self.end_of_file - read_off;
        }

        let mut done = 0usize;
        while (done as u64) < to_read {
            let n = self
                .file
                .read_at(&mut buf[done..to_read as usize], read_off + done as u64)
                .map_err(|source| StreamError::Read {
                    offset: read_off + done as u64,
                    source,
                })?;
            if n == 0 {
                return Err(StreamError::Read {
                    offset: read_off + done as u64,
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "stream file shorter than its header declares",
                    ),
                });
            }
            done += n;
        }
        Ok((done, read_off))
    }
}

/// Single-thread view over a shared [`BinaryGraphStreamMt`].
pub struct MtStreamReader {
    stream: Arc<BinaryGraphStreamMt>,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
    base_off: u64,
}

impl MtStreamReader {
    /// A per-thread reading handle with its own buffer.
    pub fn new(stream: Arc<BinaryGraphStreamMt>) -> Self {
        let buf_size = stream.buf_size;
        Self {
            stream,
            buf: vec![0; buf_size],
            pos: 0,
            filled: 0,
            base_off: 0,
        }
    }

    /// Next record, or a `Breakpoint` sentinel when the stream is
    /// paused at a query barrier or fully consumed.
    pub fn get_edge(&mut self) -> StreamResult<GraphUpdate> {
        if self.pos >= self.filled {
            let (filled, base) = self.stream.read_data(&mut self.buf)?;
            if filled == 0 {
                return Ok(GraphUpdate {
                    edge: Edge::new(0, 0),
                    kind: UpdateType::Breakpoint,
                });
            }
            self.filled = filled;
            self.base_off = base;
            self.pos = 0;
        }
        let rec_off = self.base_off + self.pos as u64;
        let upd = parse_record(&self.buf[self.pos..self.pos + EDGE_RECORD_SIZE], rec_off)?;
        self.pos += EDGE_RECORD_SIZE;
        Ok(upd)
    }
}

/// Writes the wire format. The header is written up front with the
/// declared record count; [`BinaryStreamWriter::finish`] verifies the
/// count was honored.
pub struct BinaryStreamWriter {
    out: BufWriter<File>,
    path: PathBuf,
    declared: u64,
    written: u64,
}

impl BinaryStreamWriter {
    pub fn create(path: impl AsRef<Path>, num_nodes: NodeId, num_edges: u64) -> StreamResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| StreamError::Open {
            path: path.clone(),
            source,
        })?;
        let mut out = BufWriter::new(file);
        out.write_all(&num_nodes.to_le_bytes())
            .and_then(|_| out.write_all(&num_edges.to_le_bytes()))
            .map_err(|source| StreamError::Read { offset: 0, source })?;
        Ok(Self {
            out,
            path,
            declared: num_edges,
            written: 0,
        })
    }

    pub fn write_update(&mut self, upd: GraphUpdate) -> StreamResult<()> {
        let kind = match upd.kind {
            UpdateType::Insert => 0u8,
            UpdateType::Delete => 1u8,
            UpdateType::Breakpoint => {
                return Err(StreamError::BadRecord {
                    offset: STREAM_HEADER_SIZE as u64 + self.written * EDGE_RECORD_SIZE as u64,
                    value: UpdateType::Breakpoint as u8,
                })
            }
        };
        let mut rec = [0u8; EDGE_RECORD_SIZE];
        rec[0] = kind;
        rec[1..5].copy_from_slice(&upd.edge.src.to_le_bytes());
        rec[5..9].copy_from_slice(&upd.edge.dst.to_le_bytes());
        let offset = STREAM_HEADER_SIZE as u64 + self.written * EDGE_RECORD_SIZE as u64;
        self.out
            .write_all(&rec)
            .map_err(|source| StreamError::Read { offset, source })?;
        self.written += 1;
        Ok(())
    }

    pub fn finish(mut self) -> StreamResult<()> {
        self.out.flush().map_err(|source| StreamError::Open {
            path: self.path.clone(),
            source,
        })?;
        if self.written != self.declared {
            return Err(StreamError::CountMismatch {
                declared: self.declared,
                written: self.written,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_stream(path: &Path, num_nodes: NodeId, updates: &[GraphUpdate]) {
        let mut w = BinaryStreamWriter::create(path, num_nodes, updates.len() as u64).unwrap();
        for &u in updates {
            w.write_update(u).unwrap();
        }
        w.finish().unwrap();
    }

    fn sample_updates(count: u32) -> Vec<GraphUpdate> {
        (0..count)
            .map(|i| {
                if i % 7 == 3 {
                    GraphUpdate::delete(i % 13, (i + 1) % 13)
                } else {
                    GraphUpdate::insert(i % 13, (i + 1) % 13)
                }
            })
            .collect()
    }

    #[test]
    fn single_threaded_reader_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");
        let updates = sample_updates(500);
        write_stream(&path, 13, &updates);

        let mut s = BinaryGraphStream::open(&path, 128).unwrap();
        assert_eq!(s.nodes(), 13);
        assert_eq!(s.edges(), 500);
        for expected in &updates {
            assert_eq!(&s.get_edge().unwrap(), expected);
        }
    }

    #[test]
    fn file_size_matches_the_formula() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");
        write_stream(&path, 13, &sample_updates(100));
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 12 + 9 * 100);
    }

    #[test]
    fn writer_rejects_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut w =
            BinaryStreamWriter::create(dir.path().join("s.bin"), 4, 2).unwrap();
        w.write_update(GraphUpdate::insert(0, 1)).unwrap();
        assert!(matches!(
            w.finish(),
            Err(StreamError::CountMismatch {
                declared: 2,
                written: 1
            })
        ));
    }

    #[test]
    fn invalid_type_byte_is_reported_with_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&[9u8, 0, 0, 0, 0, 1, 0, 0, 0]);
        std::fs::write(&path, bytes).unwrap();

        let mut s = BinaryGraphStream::open(&path, 64).unwrap();
        match s.get_edge() {
            Err(StreamError::BadRecord { offset, value }) => {
                assert_eq!(offset, 12);
                assert_eq!(value, 9);
            }
            other => panic!("expected BadRecord, got {other:?}"),
        }
    }

    #[test]
    fn mt_readers_cover_the_whole_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mt.bin");
        let updates = sample_updates(2000);
        write_stream(&path, 13, &updates);

        let stream = BinaryGraphStreamMt::open(&path, 64 * EDGE_RECORD_SIZE).unwrap();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let mut r = MtStreamReader::new(Arc::clone(&stream));
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        let upd = r.get_edge().unwrap();
                        if upd.is_breakpoint() {
                            break;
                        }
                        seen.push(upd);
                    }
                    seen
                })
            })
            .collect();
        let mut all: Vec<GraphUpdate> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(all.len(), updates.len());
        let mut expected = updates.clone();
        let key = |u: &GraphUpdate| (u.edge.src, u.edge.dst, u.kind as u8);
        all.sort_by_key(key);
        expected.sort_by_key(key);
        assert_eq!(all, expected);
    }

    #[test]
    fn registered_query_fences_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fence.bin");
        let updates = sample_updates(1000);
        write_stream(&path, 13, &updates);

        let stream = BinaryGraphStreamMt::open(&path, 16 * EDGE_RECORD_SIZE).unwrap();
        assert!(stream.register_query(100));

        let mut r = MtStreamReader::new(Arc::clone(&stream));
        let mut before = 0u64;
        loop {
            let upd = r.get_edge().unwrap();
            if upd.is_breakpoint() {
                break;
            }
            before += 1;
        }
        assert_eq!(before, 100);

        // late registration at an already-claimed offset is rejected
        assert!(!stream.register_query(50));

        stream.post_query_resume();
        let mut after = 0u64;
        loop {
            let upd = r.get_edge().unwrap();
            if upd.is_breakpoint() {
                break;
            }
            after += 1;
        }
        assert_eq!(before + after, 1000);
    }

    #[test]
    fn on_demand_query_blocks_until_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pause.bin");
        let updates = sample_updates(200);
        write_stream(&path, 13, &updates);

        let stream = BinaryGraphStreamMt::open(&path, 16 * EDGE_RECORD_SIZE).unwrap();
        let mut r = MtStreamReader::new(Arc::clone(&stream));
        let first = r.get_edge().unwrap();
        assert!(!first.is_breakpoint());

        stream.on_demand_query();
        // the reader drains its local buffer, then hits the barrier
        let mut drained = 1u64;
        loop {
            let upd = r.get_edge().unwrap();
            if upd.is_breakpoint() {
                break;
            }
            drained += 1;
        }
        assert!(drained <= 16);
        assert!(r.get_edge().unwrap().is_breakpoint());

        stream.post_query_resume();
        let mut rest = 0u64;
        loop {
            let upd = r.get_edge().unwrap();
            if upd.is_breakpoint() {
                break;
            }
            rest += 1;
        }
        assert_eq!(drained + rest, 200);
    }
}
