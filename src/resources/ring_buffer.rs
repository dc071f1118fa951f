//! Per-frame-slot uniform ring buffer.
//!
//! Shader parameters are written into a CPU-side staging copy laid out as
//! one fixed-size block per frame slot. Every region is padded to the
//! backend's minimum constant-buffer offset alignment so it can be bound
//! with a dynamic offset.
//!
//! # Layout
//!
//! ```text
//! slot 0                                              slot 1
//! ┌────────┬──────────┬──────────┬─────┬──────────┬───┬────────┬─────
//! │ frame  │ object 0 │ object 1 │ ... │ clusters │pad│ frame  │ ...
//! └────────┴──────────┴──────────┴─────┴──────────┴───┴────────┴─────
//! ```
//!
//! Slots never share bytes: while the GPU reads slot K of an earlier frame,
//! the CPU only writes the slot it is currently recording, and the frame
//! scheduler guarantees slot K's previous reads finished before reuse.
//!
//! # Example
//!
//! ```
//! use clustered_renderer::resources::{UniformLayout, UniformRingBuffer};
//!
//! let layout = UniformLayout {
//!     frame_size: 180,
//!     object_size: 192,
//!     max_objects: 4,
//!     cluster_table_size: 1024,
//! };
//! let ring = UniformRingBuffer::new(layout, 2).unwrap();
//!
//! let frame = ring.allocate_frame_region(0).unwrap();
//! let object = ring.allocate_object_region(0, 0).unwrap();
//! assert_eq!(frame.offset, 0);
//! assert_eq!(object.offset, 256);
//! ```

use bytemuck::Pod;

use crate::error::{RenderError, Result};
use crate::scheduler::UniformScope;

/// Sizes of the structs stored per frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLayout {
    /// Size of the frame-scope struct in bytes.
    pub frame_size: usize,
    /// Size of the per-object struct in bytes.
    pub object_size: usize,
    /// Number of object regions per slot.
    pub max_objects: usize,
    /// Size of the cluster light table in bytes.
    pub cluster_table_size: usize,
}

/// An aligned byte range within the ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformRegion {
    /// Byte offset into the ring buffer.
    pub offset: u64,
    /// Size of the region in bytes, a multiple of the alignment.
    pub size: u64,
    pub scope: UniformScope,
}

impl UniformRegion {
    /// Get the end offset (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn overlaps(&self, other: &UniformRegion) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// CPU staging copy of the per-slot uniform regions.
pub struct UniformRingBuffer {
    data: Vec<u8>,
    alignment: u64,
    slots: usize,
    max_objects: usize,
    frame_stride: u64,
    object_stride: u64,
    cluster_stride: u64,
    slot_stride: u64,
}

impl UniformRingBuffer {
    /// Default alignment for regions (256 bytes).
    ///
    /// This matches the typical minimum constant buffer offset alignment.
    pub const DEFAULT_ALIGNMENT: u64 = 256;

    /// Create a ring buffer with the default alignment.
    pub fn new(layout: UniformLayout, slots: usize) -> Result<Self> {
        Self::with_alignment(layout, slots, Self::DEFAULT_ALIGNMENT)
    }

    /// Create a ring buffer with a custom alignment (must be a power of 2).
    pub fn with_alignment(layout: UniformLayout, slots: usize, alignment: u64) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(RenderError::InvalidParameter(format!(
                "alignment must be a power of 2, got {alignment}"
            )));
        }
        if slots == 0 {
            return Err(RenderError::InvalidParameter(
                "ring buffer needs at least one slot".to_string(),
            ));
        }

        let frame_stride = region_size(layout.frame_size, alignment);
        let object_stride = region_size(layout.object_size, alignment);
        let cluster_stride = region_size(layout.cluster_table_size, alignment);
        let slot_stride = frame_stride + object_stride * layout.max_objects as u64 + cluster_stride;

        let total = usize::try_from(slot_stride * slots as u64).map_err(|_| {
            RenderError::CapacityExceeded(format!(
                "{} slots of {} bytes do not fit in memory",
                slots, slot_stride
            ))
        })?;

        log::debug!(
            "Uniform ring: {} slots x {} bytes (frame {}, object {} x {}, clusters {})",
            slots,
            slot_stride,
            frame_stride,
            object_stride,
            layout.max_objects,
            cluster_stride
        );

        Ok(Self {
            data: vec![0; total],
            alignment,
            slots,
            max_objects: layout.max_objects,
            frame_stride,
            object_stride,
            cluster_stride,
            slot_stride,
        })
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    pub fn max_objects(&self) -> usize {
        self.max_objects
    }

    /// Bytes reserved per frame slot.
    pub fn slot_stride(&self) -> u64 {
        self.slot_stride
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The frame-scope region of a slot.
    pub fn allocate_frame_region(&self, slot: usize) -> Result<UniformRegion> {
        let base = self.slot_base(slot)?;
        Ok(UniformRegion {
            offset: base,
            size: self.frame_stride,
            scope: UniformScope::Frame,
        })
    }

    /// The region of one object within a slot.
    pub fn allocate_object_region(&self, slot: usize, object: usize) -> Result<UniformRegion> {
        let base = self.slot_base(slot)?;
        if object >= self.max_objects {
            return Err(RenderError::CapacityExceeded(format!(
                "object {} exceeds the {} object regions per frame",
                object, self.max_objects
            )));
        }
        Ok(UniformRegion {
            offset: base + self.frame_stride + self.object_stride * object as u64,
            size: self.object_stride,
            scope: UniformScope::Object,
        })
    }

    /// The cluster light table region of a slot.
    pub fn allocate_cluster_region(&self, slot: usize) -> Result<UniformRegion> {
        let base = self.slot_base(slot)?;
        Ok(UniformRegion {
            offset: base + self.frame_stride + self.object_stride * self.max_objects as u64,
            size: self.cluster_stride,
            scope: UniformScope::ClusterTable,
        })
    }

    /// Copy `bytes` to the start of `region`.
    pub fn write(&mut self, region: &UniformRegion, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 > region.size {
            return Err(RenderError::RegionOverflow {
                len: bytes.len(),
                capacity: region.size as usize,
            });
        }
        let start = region.offset as usize;
        let end = start + bytes.len();
        let target = self.data.get_mut(start..end).ok_or_else(|| {
            RenderError::InvalidParameter(format!(
                "region {}..{} is outside the ring buffer",
                region.offset,
                region.end()
            ))
        })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Write a plain-old-data struct to the start of `region`.
    pub fn write_pod<T: Pod>(&mut self, region: &UniformRegion, value: &T) -> Result<()> {
        self.write(region, bytemuck::bytes_of(value))
    }

    /// Bytes currently stored in `region`.
    pub fn region_bytes(&self, region: &UniformRegion) -> &[u8] {
        let start = (region.offset as usize).min(self.data.len());
        let end = (region.end() as usize).min(self.data.len());
        &self.data[start..end]
    }

    /// Offset and contents of a whole slot, for uploading to the GPU buffer.
    pub fn slot_bytes(&self, slot: usize) -> Result<(u64, &[u8])> {
        let base = self.slot_base(slot)?;
        let start = base as usize;
        let end = start + self.slot_stride as usize;
        Ok((base, &self.data[start..end]))
    }

    fn slot_base(&self, slot: usize) -> Result<u64> {
        if slot >= self.slots {
            return Err(RenderError::InvalidParameter(format!(
                "slot {} out of range (ring has {} slots)",
                slot, self.slots
            )));
        }
        Ok(self.slot_stride * slot as u64)
    }
}

impl std::fmt::Debug for UniformRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformRingBuffer")
            .field("slots", &self.slots)
            .field("alignment", &self.alignment)
            .field("slot_stride", &self.slot_stride)
            .field("max_objects", &self.max_objects)
            .finish()
    }
}

/// Size of a region holding `size` bytes: at least one alignment unit.
fn region_size(size: usize, alignment: u64) -> u64 {
    align_up((size as u64).max(1), alignment)
}

/// Align a value up to the given alignment.
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> UniformLayout {
        UniformLayout {
            frame_size: 180,
            object_size: 192,
            max_objects: 3,
            cluster_table_size: 600,
        }
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(180, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(100, 64), 128);
    }

    #[test]
    fn test_non_power_of_two_alignment_rejected() {
        assert!(matches!(
            UniformRingBuffer::with_alignment(layout(), 2, 100),
            Err(RenderError::InvalidParameter(_))
        ));
        assert!(UniformRingBuffer::new(layout(), 0).is_err());
    }

    #[test]
    fn test_frame_region_does_not_overlap_first_object() {
        let mut ring = UniformRingBuffer::new(layout(), 2).unwrap();
        let frame = ring.allocate_frame_region(0).unwrap();
        ring.write(&frame, &[0xAB; 180]).unwrap();

        let object = ring.allocate_object_region(0, 0).unwrap();
        assert_eq!(frame.offset, 0);
        assert_eq!(frame.size, 256);
        assert_eq!(object.offset, 256);
        assert!(!frame.overlaps(&object));
        assert!(ring.region_bytes(&object).iter().all(|b| *b == 0));
    }

    #[test]
    fn test_slot_layout() {
        let ring = UniformRingBuffer::new(layout(), 2).unwrap();
        // 256 frame + 3 x 256 objects + 768 clusters
        assert_eq!(ring.slot_stride(), 256 + 3 * 256 + 768);
        assert_eq!(ring.size(), 2 * ring.slot_stride());

        let clusters = ring.allocate_cluster_region(0).unwrap();
        assert_eq!(clusters.offset, 1024);
        assert_eq!(clusters.size, 768);
        assert_eq!(clusters.end(), ring.slot_stride());

        let next = ring.allocate_frame_region(1).unwrap();
        assert_eq!(next.offset, ring.slot_stride());
    }

    #[test]
    fn test_regions_never_shared_across_slots() {
        let ring = UniformRingBuffer::new(layout(), 3).unwrap();
        let mut regions = Vec::new();
        for slot in 0..3 {
            regions.push(ring.allocate_frame_region(slot).unwrap());
            for object in 0..3 {
                regions.push(ring.allocate_object_region(slot, object).unwrap());
            }
            regions.push(ring.allocate_cluster_region(slot).unwrap());
        }
        for (i, a) in regions.iter().enumerate() {
            assert_eq!(a.offset % 256, 0);
            for b in &regions[i + 1..] {
                assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_object_capacity() {
        let ring = UniformRingBuffer::new(layout(), 1).unwrap();
        assert!(matches!(
            ring.allocate_object_region(0, 3),
            Err(RenderError::CapacityExceeded(_))
        ));
        assert!(ring.allocate_frame_region(1).is_err());
    }

    #[test]
    fn test_write_overflow() {
        let mut ring = UniformRingBuffer::new(layout(), 1).unwrap();
        let frame = ring.allocate_frame_region(0).unwrap();
        let err = ring.write(&frame, &[0; 300]).unwrap_err();
        assert!(matches!(
            err,
            RenderError::RegionOverflow {
                len: 300,
                capacity: 256
            }
        ));
    }

    #[test]
    fn test_write_pod_and_slot_bytes() {
        let mut ring = UniformRingBuffer::with_alignment(layout(), 2, 64).unwrap();
        let region = ring.allocate_object_region(1, 2).unwrap();
        ring.write_pod(&region, &[1u32, 2, 3, 4]).unwrap();

        let (offset, bytes) = ring.slot_bytes(1).unwrap();
        assert_eq!(offset, ring.slot_stride());
        let local = (region.offset - offset) as usize;
        assert_eq!(
            &bytes[local..local + 16],
            bytemuck::bytes_of(&[1u32, 2, 3, 4])
        );
    }
}
