//! # tap_frame
//!
//! Decoding of raw contact frames delivered by a multitouch surface.
//!
//! Each frame is a flat byte buffer holding one fixed-size record per finger.
//! The record size (the *stride*) is not published and differs between
//! hardware and firmware revisions, so it is inferred from the data the first
//! time a frame with two or more fingers arrives.
//!
//! ## Record layout
//!
//! | Offset | Field | Type |
//! |---|---|---|
//! | 32 | normalized X (0.0–1.0) | `f32` little-endian |
//! | 36 | normalized Y (0.0–1.0) | `f32` little-endian |
//! | … | everything else | ignored |
//!
//! Every read goes through [`read_f32`], which checks the buffer length first.
//! A truncated or malformed buffer never faults; the affected record is just
//! marked invalid.
//!
//! ## Quick start
//!
//! ```rust
//! use tap_frame::{FrameDecoder, FrameEncoder, Point};
//!
//! let raw = FrameEncoder::new(96).encode(&[
//!     Point::new(0.40, 0.50),
//!     Point::new(0.60, 0.50),
//! ]);
//!
//! let mut decoder = FrameDecoder::new();
//! let frame = decoder.decode(&raw, 2, 12.5);
//! assert_eq!(decoder.stride(), Some(96));
//!
//! let c = frame.centroid().unwrap();
//! assert!((c.x - 0.5).abs() < 1e-6);
//! ```

use thiserror::Error;
use tracing::debug;

// ════════════════════════════════════════════════════════════════════════════
// Record layout constants
// ════════════════════════════════════════════════════════════════════════════

/// Byte offset of the normalized X coordinate inside one finger record.
pub const NORM_X_OFFSET: usize = 32;

/// Byte offset of the normalized Y coordinate inside one finger record.
pub const NORM_Y_OFFSET: usize = 36;

/// Smallest record that can hold both coordinates.
pub const MIN_RECORD_LEN: usize = NORM_Y_OFFSET + 4;

/// Record sizes observed on shipping hardware, tried in this order.
pub const CANDIDATE_STRIDES: [usize; 9] = [64, 72, 80, 84, 88, 96, 104, 112, 128];

/// Largest candidate stride.
pub const MAX_STRIDE: usize = 128;

/// Bytes stride detection may read from the start of a frame: the second
/// record's coordinates at the largest candidate.
pub const PROBE_WINDOW: usize = MAX_STRIDE + MIN_RECORD_LEN;

/// A probe must see at least one coordinate above this to accept a stride.
/// Rejects zero padding that happens to line up with the coordinate offsets.
pub const NONZERO_EPSILON: f32 = 0.001;

// ════════════════════════════════════════════════════════════════════════════
// ReadError: typed failure for out-of-range reads
// ════════════════════════════════════════════════════════════════════════════

/// A field read that would run past the end of the supplied buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("read of {len} bytes at offset {offset} exceeds {available}-byte buffer")]
    OutOfBounds {
        offset:    usize,
        len:       usize,
        available: usize,
    },
}

/// Read a little-endian `f32` at `offset`.
pub fn read_f32(buf: &[u8], offset: usize) -> Result<f32, ReadError> {
    let out_of_bounds = ReadError::OutOfBounds { offset, len: 4, available: buf.len() };
    let end   = offset.checked_add(4).ok_or(out_of_bounds)?;
    let bytes = buf.get(offset..end).ok_or(out_of_bounds)?;

    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(f32::from_le_bytes(raw))
}

/// Read the (x, y) pair of the record starting at byte `base`.
pub fn read_position(buf: &[u8], base: usize) -> Result<(f32, f32), ReadError> {
    let overflow = ReadError::OutOfBounds { offset: base, len: MIN_RECORD_LEN, available: buf.len() };
    let x_at = base.checked_add(NORM_X_OFFSET).ok_or(overflow)?;
    let y_at = base.checked_add(NORM_Y_OFFSET).ok_or(overflow)?;
    Ok((read_f32(buf, x_at)?, read_f32(buf, y_at)?))
}

/// True when `v` is a usable normalized coordinate. NaN is rejected.
pub fn in_unit_range(v: f32) -> bool {
    (0.0..=1.0).contains(&v)
}

// ════════════════════════════════════════════════════════════════════════════
// Point: normalized surface position
// ════════════════════════════════════════════════════════════════════════════

/// A position on the sensing surface, both axes normalized to 0.0–1.0.
///
/// Coordinates are widened to `f64` on decode so that centroid and distance
/// arithmetic does not add rounding on top of the device's `f32` values.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self { Point { x, y } }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Arithmetic mean of `points`, or `None` for an empty iterator.
    pub fn mean<I: IntoIterator<Item = Point>>(points: I) -> Option<Point> {
        let (mut sx, mut sy, mut n) = (0.0, 0.0, 0usize);
        for p in points {
            sx += p.x;
            sy += p.y;
            n  += 1;
        }
        if n == 0 { return None; }
        Some(Point::new(sx / n as f64, sy / n as f64))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TouchRecord / TouchFrame: decoder output
// ════════════════════════════════════════════════════════════════════════════

/// One finger's decoded state for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TouchRecord {
    pub position: Point,
    /// Both coordinates were inside the buffer and inside 0.0–1.0.
    pub valid:    bool,
}

impl TouchRecord {
    fn invalid() -> Self {
        TouchRecord { position: Point::default(), valid: false }
    }
}

/// Decoded contents of one raw frame.
///
/// `records` is empty while the stride is still unknown; `finger_count` is
/// always what the device reported.
#[derive(Clone, Debug, PartialEq)]
pub struct TouchFrame {
    pub finger_count: usize,
    /// Device-reported finger order; not stable across frames.
    pub records:      Vec<TouchRecord>,
    /// Monotonic seconds, as supplied by the device.
    pub timestamp:    f64,
}

impl TouchFrame {
    /// A frame carrying only a finger count, as produced in degraded mode.
    pub fn undecoded(finger_count: usize, timestamp: f64) -> Self {
        TouchFrame { finger_count, records: Vec::new(), timestamp }
    }

    /// Build a frame straight from positions; every position is validated.
    pub fn from_positions(positions: &[Point], timestamp: f64) -> Self {
        let records = positions.iter().map(|&p| TouchRecord {
            position: p,
            valid:    (0.0..=1.0).contains(&p.x) && (0.0..=1.0).contains(&p.y),
        }).collect();
        TouchFrame { finger_count: positions.len(), records, timestamp }
    }

    /// Mean position of the valid records.
    pub fn centroid(&self) -> Option<Point> {
        Point::mean(self.valid_positions())
    }

    pub fn valid_positions(&self) -> impl Iterator<Item = Point> + '_ {
        self.records.iter().filter(|r| r.valid).map(|r| r.position)
    }

    pub fn valid_count(&self) -> usize {
        self.records.iter().filter(|r| r.valid).count()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Stride detection: pure functions over (buffer, candidate)
// ════════════════════════════════════════════════════════════════════════════

/// Try `candidate` as the record stride by reading the second record's
/// coordinates. Returns them when they look like a real contact.
pub fn probe_stride(buf: &[u8], candidate: usize) -> Option<(f32, f32)> {
    let (x, y) = read_position(buf, candidate).ok()?;
    let plausible = in_unit_range(x) && in_unit_range(y)
        && (x > NONZERO_EPSILON || y > NONZERO_EPSILON);
    plausible.then_some((x, y))
}

/// First candidate stride whose probe succeeds.
///
/// A single-finger frame has no second record to cross-check, so it never
/// yields a stride.
pub fn detect_stride(buf: &[u8], finger_count: usize) -> Option<usize> {
    if finger_count < 2 { return None; }
    CANDIDATE_STRIDES.iter().copied().find(|&c| probe_stride(buf, c).is_some())
}

/// Bytes to take from a raw contact buffer of `finger_count` records.
///
/// With a known stride this is exactly the records, so a smaller layout is
/// never over-read and a larger one is never truncated. Before detection a
/// multi-finger frame needs [`PROBE_WINDOW`] bytes, the span detection reads;
/// anything else decodes to nothing and needs no bytes.
pub fn capture_len(finger_count: usize, stride: Option<usize>) -> usize {
    match stride {
        Some(stride)               => finger_count.saturating_mul(stride),
        None if finger_count >= 2  => PROBE_WINDOW,
        None                       => 0,
    }
}

// ════════════════════════════════════════════════════════════════════════════
// FrameDecoder: stride cache + per-frame decode
// ════════════════════════════════════════════════════════════════════════════

/// Decodes raw frames, detecting the record stride on first opportunity.
///
/// The stride is written at most once. Frames from one device family share a
/// layout, so later frames never re-detect even if they would disagree.
#[derive(Clone, Debug, Default)]
pub struct FrameDecoder {
    stride: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self { FrameDecoder { stride: None } }

    /// Decoder for a layout known up front. Detection is skipped.
    pub fn with_stride(stride: usize) -> Self { FrameDecoder { stride: Some(stride) } }

    pub fn stride(&self) -> Option<usize> { self.stride }

    /// Run detection if the stride is still unknown. Returns the stride in
    /// effect afterwards.
    pub fn detect(&mut self, buf: &[u8], finger_count: usize) -> Option<usize> {
        if self.stride.is_none() {
            if let Some(stride) = detect_stride(buf, finger_count) {
                debug!(stride, finger_count, "detected contact record stride");
                self.stride = Some(stride);
            }
        }
        self.stride
    }

    /// Decode one raw frame.
    pub fn decode(&mut self, buf: &[u8], finger_count: usize, timestamp: f64) -> TouchFrame {
        let Some(stride) = self.detect(buf, finger_count) else {
            return TouchFrame::undecoded(finger_count, timestamp);
        };

        let records = (0..finger_count)
            .map(|i| decode_record(buf, i, stride))
            .collect();
        TouchFrame { finger_count, records, timestamp }
    }
}

fn decode_record(buf: &[u8], index: usize, stride: usize) -> TouchRecord {
    let Some(base) = index.checked_mul(stride) else { return TouchRecord::invalid(); };
    match read_position(buf, base) {
        Ok((x, y)) if in_unit_range(x) && in_unit_range(y) => TouchRecord {
            position: Point::new(x as f64, y as f64),
            valid:    true,
        },
        _ => TouchRecord::invalid(),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// FrameEncoder: synthetic frames for simulation and tests
// ════════════════════════════════════════════════════════════════════════════

/// Builds raw frames in the layout [`FrameDecoder`] reads.
///
/// Bytes outside the coordinate fields are filled with `0xFF` by default. As
/// an `f32` that pattern is NaN, so a probe at a wrong stride never lands on a
/// plausible coordinate. Use [`FrameEncoder::with_fill`] to model zero-padded
/// layouts.
#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    stride: usize,
    fill:   u8,
}

impl FrameEncoder {
    /// Encoder for records of `stride` bytes, clamped to
    /// [`MIN_RECORD_LEN`]..=[`MAX_STRIDE`].
    pub fn new(stride: usize) -> Self {
        FrameEncoder { stride: stride.clamp(MIN_RECORD_LEN, MAX_STRIDE), fill: 0xFF }
    }

    pub fn with_fill(mut self, fill: u8) -> Self {
        self.fill = fill;
        self
    }

    pub fn stride(&self) -> usize { self.stride }

    /// Encode one record per position.
    pub fn encode(&self, positions: &[Point]) -> Vec<u8> {
        let mut buf = vec![self.fill; positions.len() * self.stride];
        for (i, p) in positions.iter().enumerate() {
            let base = i * self.stride;
            write_f32(&mut buf, base + NORM_X_OFFSET, p.x as f32);
            write_f32(&mut buf, base + NORM_Y_OFFSET, p.y as f32);
        }
        buf
    }
}

fn write_f32(buf: &mut [u8], offset: usize, v: f32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

// ════════════════════════════════════════════════════════════════════════════
// Tests
// ════════════════════════════════════════════════════════════════════════════
