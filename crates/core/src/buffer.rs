use smallvec::{SmallVec, smallvec};
use std::sync::{Arc, Mutex};

use crate::{
    format::{MediaFormat, VideoInfo},
    metrics::Metrics,
};

/// Metadata associated with a frame.
///
/// # Example
/// ```rust
/// use jpegbridge_core::prelude::{ColorSpace, FourCc, FrameMeta, MediaFormat, Resolution};
///
/// let res = Resolution::new(640, 480).unwrap();
/// let fmt = MediaFormat::new(FourCc::new(*b"RG24"), res, ColorSpace::Srgb);
/// let meta = FrameMeta::new(fmt, 123);
/// assert_eq!(meta.timestamp, 123);
/// ```
#[derive(Debug, Clone)]
pub struct FrameMeta {
    /// Format describing layout and resolution.
    pub format: MediaFormat,
    /// Timestamp in ticks or nanoseconds (caller-defined).
    pub timestamp: u64,
}

impl FrameMeta {
    /// Create metadata with the given format and timestamp.
    pub fn new(format: MediaFormat, timestamp: u64) -> Self {
        Self { format, timestamp }
    }
}

/// Handle to a pooled buffer.
///
/// When dropped, the buffer is returned to the originating pool so the next
/// frame can reuse the allocation.
///
/// # Example
/// ```rust
/// use jpegbridge_core::prelude::BufferPool;
///
/// let pool = BufferPool::with_capacity(2, 1024);
/// let mut lease = pool.lease();
/// lease.resize(16);
/// assert_eq!(lease.len(), 16);
/// ```
#[derive(Debug)]
pub struct BufferLease {
    pool: Arc<PoolInner>,
    buf: Option<Vec<u8>>,
}

impl BufferLease {
    /// Borrow as an immutable slice.
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    /// Borrow as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }

    /// Current length of the buffer.
    pub fn len(&self) -> usize {
        self.buf.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ensure the buffer capacity fits `len` bytes and set its length.
    pub fn resize(&mut self, len: usize) {
        if let Some(buf) = self.buf.as_mut() {
            if buf.capacity() < len {
                buf.reserve(len - buf.capacity());
            }
            buf.resize(len, 0);
        }
    }

    /// Replace the leased backing buffer with an owned `Vec<u8>`.
    ///
    /// Lets a stage that already owns its output (e.g. an encoder's bitstream)
    /// hand it off without another copy.
    pub fn replace_owned(&mut self, buf: Vec<u8>) {
        if let Some(old) = self.buf.take() {
            self.pool.recycle(old);
        }
        self.buf = Some(buf);
    }

    fn take(mut self) -> Vec<u8> {
        self.buf.take().unwrap_or_default()
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.recycle(buf);
        }
    }
}

/// Simple buffer pool that hands out reusable owned buffers.
///
/// # Example
/// ```rust
/// use jpegbridge_core::prelude::BufferPool;
///
/// let pool = BufferPool::with_limits(4, 1 << 20, 8);
/// let _lease = pool.lease();
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
    metrics: Arc<Metrics>,
}

impl BufferPool {
    /// Create a pool with `capacity` preallocated buffers of `chunk_size` bytes.
    pub fn with_capacity(capacity: usize, chunk_size: usize) -> Self {
        Self::with_limits(capacity, chunk_size, capacity)
    }

    /// Create a pool with `capacity` preallocated buffers and a maximum retained free list.
    pub fn with_limits(capacity: usize, chunk_size: usize, max_free: usize) -> Self {
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(vec![0; chunk_size]);
        }
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                chunk_size,
                max_free,
            }),
            metrics: Arc::new(Metrics::default()),
        }
    }

    /// Acquire a buffer, allocating if the pool is empty.
    pub fn lease(&self) -> BufferLease {
        let buf = self
            .inner
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop())
            .inspect(|_| {
                self.metrics.hit();
            })
            .unwrap_or_else(|| {
                self.metrics.miss();
                self.metrics.alloc();
                vec![0; self.inner.chunk_size]
            });
        BufferLease {
            pool: self.inner.clone(),
            buf: Some(buf),
        }
    }

    /// Access metrics counters for this pool.
    pub fn metrics(&self) -> BufferPoolMetrics {
        BufferPoolMetrics(self.metrics.clone())
    }
}

#[derive(Debug)]
struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    chunk_size: usize,
    max_free: usize,
}

impl PoolInner {
    fn recycle(&self, mut buf: Vec<u8>) {
        buf.clear();
        if let Ok(mut free) = self.free.lock()
            && free.len() < self.max_free
        {
            free.push(buf);
        }
    }
}

/// Observability for buffer pool behavior.
///
/// # Example
/// ```rust
/// use jpegbridge_core::prelude::BufferPool;
///
/// let pool = BufferPool::with_capacity(1, 128);
/// let metrics = pool.metrics();
/// let _ = metrics.hits();
/// ```
#[derive(Clone)]
pub struct BufferPoolMetrics(Arc<Metrics>);

impl BufferPoolMetrics {
    pub fn hits(&self) -> u64 {
        self.0.hits()
    }

    pub fn misses(&self) -> u64 {
        self.0.misses()
    }

    pub fn allocations(&self) -> u64 {
        self.0.allocations()
    }
}

/// Plane view over a buffer.
///
/// Accessed via `FrameLease::planes`.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    data: &'a [u8],
    stride: usize,
}

/// Mutable plane view.
///
/// Accessed via `FrameLease::planes_mut`.
#[derive(Debug)]
pub struct PlaneMut<'a> {
    data: &'a mut [u8],
    stride: usize,
}

impl<'a> Plane<'a> {
    /// Access the raw bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Stride in bytes for this plane.
    pub fn stride(&self) -> usize {
        self.stride
    }
}

impl<'a> PlaneMut<'a> {
    /// Mutable access to plane bytes.
    pub fn data(&mut self) -> &mut [u8] {
        self.data
    }

    /// Read-only access to plane bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.data
    }

    /// Stride in bytes for this plane.
    pub fn stride(&self) -> usize {
        self.stride
    }
}

/// Plane layout information stored with a frame.
///
/// # Example
/// ```rust
/// use jpegbridge_core::prelude::*;
///
/// let info = VideoInfo::new(VideoFormat::I420, Resolution::new(8, 4).unwrap(), 1);
/// let chroma: PlaneLayout = info.layouts[1];
/// assert_eq!((chroma.offset, chroma.stride, chroma.len), (32, 4, 8));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Byte offset into the owning buffer.
    pub offset: usize,
    /// Length of the plane in bytes.
    pub len: usize,
    /// Stride in bytes.
    pub stride: usize,
}

impl PlaneLayout {
    fn end(&self) -> Option<usize> {
        self.offset.checked_add(self.len)
    }
}

/// Reasons a set of plane layouts cannot describe a buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("frame has no planes")]
    Empty,
    #[error("plane {0} has zero stride or zero length")]
    Degenerate(usize),
    #[error("plane {0} overlaps the previous plane")]
    Overlap(usize),
    #[error("plane {index} ends at {end} but the buffer holds {available} bytes")]
    OutOfBounds {
        index: usize,
        end: usize,
        available: usize,
    },
}

/// Frame container: one backing buffer holding one or more planes plus metadata.
///
/// # Example
/// ```rust
/// use jpegbridge_core::prelude::*;
///
/// let pool = BufferPool::with_capacity(1, 256);
/// let res = Resolution::new(4, 4).unwrap();
/// let fmt = MediaFormat::new(FourCc::new(*b"RG24"), res, ColorSpace::Srgb);
/// let meta = FrameMeta::new(fmt, 0);
/// let frame = FrameLease::single_plane(meta, pool.lease(), 4 * 12, 12);
/// assert_eq!(frame.planes().len(), 1);
/// ```
#[derive(Debug)]
pub struct FrameLease {
    meta: FrameMeta,
    buffer: BufferLease,
    layouts: SmallVec<[PlaneLayout; 3]>,
}

impl FrameLease {
    /// Construct a single-plane frame using the provided buffer.
    pub fn single_plane(
        meta: FrameMeta,
        mut buffer: BufferLease,
        len: usize,
        stride: usize,
    ) -> Self {
        buffer.resize(len);
        Self {
            meta,
            layouts: smallvec![PlaneLayout {
                offset: 0,
                len,
                stride,
            }],
            buffer,
        }
    }

    /// Construct a frame whose planes live at the given offsets of `buffer`.
    ///
    /// Layouts must be in physical order and must not overlap. The buffer is
    /// grown to cover the last plane.
    pub fn with_layouts(
        meta: FrameMeta,
        mut buffer: BufferLease,
        layouts: SmallVec<[PlaneLayout; 3]>,
    ) -> Result<Self, LayoutError> {
        validate_layouts(&layouts, usize::MAX)?;
        let end = layouts.iter().filter_map(PlaneLayout::end).max().unwrap_or(0);
        if buffer.len() < end {
            buffer.resize(end);
        }
        Ok(Self {
            meta,
            buffer,
            layouts,
        })
    }

    /// Allocate a frame for `info` from `pool`.
    ///
    /// # Example
    /// ```rust
    /// use jpegbridge_core::prelude::*;
    ///
    /// let pool = BufferPool::with_capacity(1, 0);
    /// let info = VideoInfo::new(VideoFormat::I420, Resolution::new(4, 4).unwrap(), 1);
    /// let frame = FrameLease::for_info(&pool, &info, 7).unwrap();
    /// assert_eq!(frame.planes().len(), 3);
    /// assert_eq!(frame.meta().timestamp, 7);
    /// ```
    pub fn for_info(pool: &BufferPool, info: &VideoInfo, timestamp: u64) -> Result<Self, LayoutError> {
        let mut buffer = pool.lease();
        buffer.resize(info.size());
        Self::with_layouts(
            FrameMeta::new(info.media_format(), timestamp),
            buffer,
            info.layouts.clone(),
        )
    }

    /// Metadata describing this frame.
    pub fn meta(&self) -> &FrameMeta {
        &self.meta
    }

    /// Mutable metadata, e.g. to stamp the timestamp of the source frame.
    pub fn meta_mut(&mut self) -> &mut FrameMeta {
        &mut self.meta
    }

    /// Iterate planes as borrowed slices (zero-copy).
    pub fn planes(&self) -> SmallVec<[Plane<'_>; 3]> {
        self.layouts
            .iter()
            .map(|layout| {
                let slice = layout
                    .end()
                    .and_then(|end| self.buffer.as_slice().get(layout.offset..end))
                    .unwrap_or(&[]);
                Plane {
                    data: slice,
                    stride: layout.stride,
                }
            })
            .collect()
    }

    /// Split the backing buffer into disjoint mutable planes.
    pub fn planes_mut(&mut self) -> SmallVec<[PlaneMut<'_>; 3]> {
        let mut out = SmallVec::new();
        let mut rest: &mut [u8] = self.buffer.as_mut_slice();
        let mut consumed = 0usize;
        for layout in &self.layouts {
            let skip = layout.offset.saturating_sub(consumed).min(rest.len());
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(skip);
            let take = layout.len.min(tail.len());
            let (data, tail) = tail.split_at_mut(take);
            consumed = consumed.saturating_add(skip + take);
            rest = tail;
            out.push(PlaneMut {
                data,
                stride: layout.stride,
            });
        }
        out
    }

    /// Return a copy of plane layouts.
    pub fn layouts(&self) -> SmallVec<[PlaneLayout; 3]> {
        self.layouts.clone()
    }

    /// The whole backing buffer, covering every plane.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    /// Convert into owned buffer, layouts and metadata.
    pub fn into_parts(self) -> (FrameMeta, SmallVec<[PlaneLayout; 3]>, Vec<u8>) {
        (self.meta, self.layouts, self.buffer.take())
    }
}

/// Check that `layouts` are non-empty, non-degenerate, ordered and fit in `available` bytes.
pub fn validate_layouts(layouts: &[PlaneLayout], available: usize) -> Result<(), LayoutError> {
    if layouts.is_empty() {
        return Err(LayoutError::Empty);
    }
    let mut prev_end = 0usize;
    for (index, layout) in layouts.iter().enumerate() {
        if layout.stride == 0 || layout.len == 0 {
            return Err(LayoutError::Degenerate(index));
        }
        if layout.offset < prev_end {
            return Err(LayoutError::Overlap(index));
        }
        let end = layout.end().ok_or(LayoutError::OutOfBounds {
            index,
            end: usize::MAX,
            available,
        })?;
        if end > available {
            return Err(LayoutError::OutOfBounds {
                index,
                end,
                available,
            });
        }
        prev_end = end;
    }
    Ok(())
}
