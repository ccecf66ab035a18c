//! Bit sequence sources.
//!
//! Every source implements the [`BitSource`] trait: an identifier, a kind, the
//! number of bits still available (if known), and a pull operation that hands
//! out packed [`BitBuffer`]s. File and buffer sources are deterministic and can
//! rewind; stream and callback sources generally cannot, and report
//! `reproducible() == false` so the session can record it.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use rand::{RngCore, SeedableRng};
use rngaudit_tests::{Sample, pack_bits, to_bits};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

// ---------------------------------------------------------------------------
// BitBuffer
// ---------------------------------------------------------------------------

/// Fixed bit buffer, packed MSB first. Bits past `len` in the last byte are zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitBuffer {
    bytes: Vec<u8>,
    len: usize,
}

impl BitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() * 8;
        Self { bytes, len }
    }

    /// Build from unpacked bits; any non-zero value is a one.
    pub fn from_bits(bits: &[u8]) -> Self {
        let normalised: Vec<u8> = bits.iter().map(|&b| u8::from(b != 0)).collect();
        Self {
            bytes: pack_bits(&normalised),
            len: bits.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Packed bytes; the last one is zero-padded.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bit(&self, i: usize) -> u8 {
        (self.bytes[i / 8] >> (7 - i % 8)) & 1
    }

    pub fn push_bit(&mut self, bit: u8) {
        if self.len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit != 0 {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (7 - self.len % 8);
        }
        self.len += 1;
    }

    pub fn extend_from(&mut self, other: &BitBuffer) {
        if self.len % 8 == 0 {
            self.bytes.truncate(self.len / 8);
            self.bytes.extend_from_slice(&other.bytes);
            self.len += other.len;
        } else {
            for i in 0..other.len {
                self.push_bit(other.bit(i));
            }
        }
    }

    pub fn truncate(&mut self, n_bits: usize) {
        if n_bits >= self.len {
            return;
        }
        self.len = n_bits;
        self.bytes.truncate(n_bits.div_ceil(8));
        if n_bits % 8 != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= 0xFFu8 << (8 - n_bits % 8);
            }
        }
    }

    /// Copy of bits `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> BitBuffer {
        let end = end.min(self.len);
        let start = start.min(end);
        let n = end - start;
        let first = start / 8;
        let shift = start % 8;
        let out_len = n.div_ceil(8);
        let bytes: Vec<u8> = if shift == 0 {
            self.bytes[first..first + out_len].to_vec()
        } else {
            (0..out_len)
                .map(|k| {
                    let hi = self.bytes[first + k] << shift;
                    let lo = self
                        .bytes
                        .get(first + k + 1)
                        .map_or(0, |&b| b >> (8 - shift));
                    hi | lo
                })
                .collect()
        };
        let mut out = BitBuffer { bytes, len: out_len * 8 };
        out.truncate(n);
        out
    }

    /// A test's private [`Sample`] of bits `start..end`.
    pub fn sample(&self, start: usize, end: usize) -> Sample {
        if start % 8 == 0 && end % 8 == 0 && end <= self.len {
            return Sample::from_bytes(&self.bytes[start / 8..end / 8]);
        }
        let part = self.slice(start, end);
        let mut bits = to_bits(&part.bytes);
        bits.truncate(part.len);
        Sample::from_bits(bits)
    }
}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// Result of a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    /// Up to the requested number of bits; fewer only at the end of the sequence.
    Bits(BitBuffer),
    EndOfSequence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    File,
    Buffer,
    Stream,
    Callback,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Buffer => write!(f, "buffer"),
            Self::Stream => write!(f, "stream"),
            Self::Callback => write!(f, "callback"),
        }
    }
}

/// A finite or unbounded bit sequence produced by the generator under test.
pub trait BitSource {
    fn id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Bits still available from the current position, `None` when unbounded or unknown.
    fn available_bits(&self) -> Option<usize>;

    /// Pull up to `n_bits`. A short read means the source just ran out; the
    /// next pull returns [`Pull::EndOfSequence`].
    fn pull(&mut self, n_bits: usize) -> Result<Pull, SourceError>;

    /// Whether repeated pulls from the same offset return identical data.
    fn reproducible(&self) -> bool;

    fn rewind(&mut self) -> Result<(), SourceError> {
        Err(SourceError::NotRewindable(self.id().to_string()))
    }
}

/// Pull until `n_bits` are collected or the source ends. May return fewer bits.
pub fn read_bits(source: &mut dyn BitSource, n_bits: usize) -> Result<BitBuffer, SourceError> {
    let mut out = BitBuffer::new();
    while out.len() < n_bits {
        match source.pull(n_bits - out.len())? {
            Pull::Bits(chunk) if chunk.is_empty() => break,
            Pull::Bits(chunk) => out.extend_from(&chunk),
            Pull::EndOfSequence => break,
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// In-memory buffer
// ---------------------------------------------------------------------------

pub struct BufferSource {
    id: String,
    data: BitBuffer,
    pos: usize,
}

impl BufferSource {
    pub fn new(id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::from_buffer(id, BitBuffer::from_bytes(bytes))
    }

    pub fn from_bits(id: impl Into<String>, bits: &[u8]) -> Self {
        Self::from_buffer(id, BitBuffer::from_bits(bits))
    }

    pub fn from_buffer(id: impl Into<String>, data: BitBuffer) -> Self {
        Self {
            id: id.into(),
            data,
            pos: 0,
        }
    }
}

impl BitSource for BufferSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Buffer
    }

    fn available_bits(&self) -> Option<usize> {
        Some(self.data.len() - self.pos)
    }

    fn pull(&mut self, n_bits: usize) -> Result<Pull, SourceError> {
        if self.pos >= self.data.len() {
            return Ok(Pull::EndOfSequence);
        }
        let end = (self.pos + n_bits).min(self.data.len());
        let chunk = self.data.slice(self.pos, end);
        self.pos = end;
        Ok(Pull::Bits(chunk))
    }

    fn reproducible(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.pos = 0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Seekable file
// ---------------------------------------------------------------------------

/// Seekable file with a bit-granular cursor.
pub struct FileSource {
    id: String,
    file: File,
    total_bits: usize,
    pos: usize,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let total_bits = file.metadata()?.len() as usize * 8;
        Ok(Self {
            id: path.display().to_string(),
            file,
            total_bits,
            pos: 0,
        })
    }

    /// Expose at most `max_bits` of the file.
    pub fn with_limit(mut self, max_bits: usize) -> Self {
        self.total_bits = self.total_bits.min(max_bits);
        self
    }
}

impl BitSource for FileSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn available_bits(&self) -> Option<usize> {
        Some(self.total_bits - self.pos)
    }

    fn pull(&mut self, n_bits: usize) -> Result<Pull, SourceError> {
        if self.pos >= self.total_bits {
            return Ok(Pull::EndOfSequence);
        }
        let end = (self.pos + n_bits).min(self.total_bits);
        let byte_start = self.pos / 8;
        let byte_end = end.div_ceil(8);
        let mut buf = vec![0u8; byte_end - byte_start];
        self.file.seek(SeekFrom::Start(byte_start as u64))?;
        self.file.read_exact(&mut buf)?;
        let offset = self.pos % 8;
        let chunk = BitBuffer::from_bytes(buf).slice(offset, offset + (end - self.pos));
        self.pos = end;
        Ok(Pull::Bits(chunk))
    }

    fn reproducible(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.pos = 0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Streams and callbacks
// ---------------------------------------------------------------------------

/// Bits received from a byte-oriented producer but not yet handed out.
#[derive(Default)]
struct Pending {
    buf: BitBuffer,
    exhausted: bool,
}

impl Pending {
    /// `next(n_bytes)` returns a chunk, or `None` at the end of the stream.
    fn pull_with(
        &mut self,
        n_bits: usize,
        mut next: impl FnMut(usize) -> Result<Option<Vec<u8>>, SourceError>,
    ) -> Result<Pull, SourceError> {
        while self.buf.len() < n_bits && !self.exhausted {
            let want = (n_bits - self.buf.len()).div_ceil(8);
            match next(want)? {
                Some(chunk) if !chunk.is_empty() => {
                    self.buf.extend_from(&BitBuffer::from_bytes(chunk));
                }
                _ => self.exhausted = true,
            }
        }
        if self.buf.is_empty() && self.exhausted {
            return Ok(Pull::EndOfSequence);
        }
        let take = n_bits.min(self.buf.len());
        let head = self.buf.slice(0, take);
        self.buf = self.buf.slice(take, self.buf.len());
        Ok(Pull::Bits(head))
    }
}

const STREAM_CHUNK: usize = 64 * 1024;

/// Any `io::Read`, consumed once.
pub struct StreamSource<R> {
    id: String,
    reader: R,
    pending: Pending,
}

impl<R: Read> StreamSource<R> {
    pub fn new(id: impl Into<String>, reader: R) -> Self {
        Self {
            id: id.into(),
            reader,
            pending: Pending::default(),
        }
    }
}

impl<R: Read> BitSource for StreamSource<R> {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Stream
    }

    fn available_bits(&self) -> Option<usize> {
        None
    }

    fn pull(&mut self, n_bits: usize) -> Result<Pull, SourceError> {
        let reader = &mut self.reader;
        self.pending.pull_with(n_bits, |want| {
            let mut buf = vec![0u8; want.clamp(1, STREAM_CHUNK)];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => return Ok(None),
                    Ok(got) => {
                        buf.truncate(got);
                        return Ok(Some(buf));
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(SourceError::Io(e)),
                }
            }
        })
    }

    fn reproducible(&self) -> bool {
        false
    }
}

type ChunkFn = Box<dyn FnMut(usize) -> Option<Vec<u8>> + Send>;

/// Closure returning byte chunks on demand; `None` or an empty chunk ends the sequence.
///
/// The closure receives the number of bytes still wanted and may return more
/// or fewer.
pub struct CallbackSource {
    id: String,
    callback: ChunkFn,
    pending: Pending,
}

impl CallbackSource {
    pub fn new(
        id: impl Into<String>,
        callback: impl FnMut(usize) -> Option<Vec<u8>> + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            callback: Box::new(callback),
            pending: Pending::default(),
        }
    }
}

impl BitSource for CallbackSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Callback
    }

    fn available_bits(&self) -> Option<usize> {
        None
    }

    fn pull(&mut self, n_bits: usize) -> Result<Pull, SourceError> {
        let callback = &mut self.callback;
        self.pending.pull_with(n_bits, |want| Ok(callback(want)))
    }

    fn reproducible(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Pull-based source over any `rand` generator.
///
/// Unseeded generators are treated as non-reproducible callbacks. A generator
/// built with [`GeneratorSource::seeded`] can rewind by re-seeding, and is
/// deterministic for a given pull pattern.
pub struct GeneratorSource<R> {
    id: String,
    rng: R,
    limit: Option<usize>,
    produced: usize,
    reseed: Option<(u64, fn(u64) -> R)>,
}

impl<R: RngCore> GeneratorSource<R> {
    pub fn new(id: impl Into<String>, rng: R) -> Self {
        Self {
            id: id.into(),
            rng,
            limit: None,
            produced: 0,
            reseed: None,
        }
    }

    /// Stop after `max_bits`.
    pub fn with_limit(mut self, max_bits: usize) -> Self {
        self.limit = Some(max_bits);
        self
    }
}

impl<R: RngCore + SeedableRng> GeneratorSource<R> {
    pub fn seeded(id: impl Into<String>, seed: u64) -> Self {
        Self {
            id: id.into(),
            rng: R::seed_from_u64(seed),
            limit: None,
            produced: 0,
            reseed: Some((seed, R::seed_from_u64 as fn(u64) -> R)),
        }
    }
}

impl<R: RngCore> BitSource for GeneratorSource<R> {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Callback
    }

    fn available_bits(&self) -> Option<usize> {
        self.limit.map(|l| l.saturating_sub(self.produced))
    }

    fn pull(&mut self, n_bits: usize) -> Result<Pull, SourceError> {
        let take = match self.available_bits() {
            Some(0) => return Ok(Pull::EndOfSequence),
            Some(remaining) => n_bits.min(remaining),
            None => n_bits,
        };
        let mut bytes = vec![0u8; take.div_ceil(8)];
        self.rng.fill_bytes(&mut bytes);
        let mut chunk = BitBuffer::from_bytes(bytes);
        chunk.truncate(take);
        self.produced += take;
        Ok(Pull::Bits(chunk))
    }

    fn reproducible(&self) -> bool {
        self.reseed.is_some()
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        let (seed, make) = self
            .reseed
            .ok_or_else(|| SourceError::NotRewindable(self.id.clone()))?;
        self.rng = make(seed);
        self.produced = 0;
        Ok(())
    }
}
