//! Owned Ethernet frame buffers.

use std::sync::Arc;

use thiserror::Error;

/// Length of an Ethernet header (dst/src/ethertype).
pub const ETH_HLEN: usize = 14;

/// Largest frame accepted by the engine: a 1514-byte Ethernet frame plus one 802.1Q tag.
pub const MAX_FRAME_LEN: usize = 1518;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    TooLarge { len: usize, max: usize },

    /// A receive buffer could not be obtained (the `netdev_alloc_skb` failure case).
    #[error("could not allocate a {len}-byte receive buffer")]
    AllocationFailure { len: usize },
}

/// One Ethernet frame in flight.
///
/// Frames are deliberately not `Clone`: a frame moves from its producer to exactly one consumer.
/// Copies (e.g. the receive clone taken by a mirror) go through a [`FrameAllocator`], which is
/// allowed to fail.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    data: Box<[u8]>,
}

impl Frame {
    /// Wrap `data`, rejecting anything longer than [`MAX_FRAME_LEN`].
    ///
    /// Zero-length frames are representable; the transmit path is responsible for filtering them.
    pub fn new(data: Vec<u8>) -> Result<Self, FrameError> {
        Self::with_limit(data, MAX_FRAME_LEN)
    }

    pub fn with_limit(data: Vec<u8>, max_len: usize) -> Result<Self, FrameError> {
        if data.len() > max_len {
            return Err(FrameError::TooLarge {
                len: data.len(),
                max: max_len,
            });
        }
        Ok(Self {
            data: data.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data.into_vec()
    }

    /// EtherType field, if the frame is long enough to carry an Ethernet header.
    pub fn ethertype(&self) -> Option<u16> {
        if self.data.len() < ETH_HLEN {
            return None;
        }
        Some(u16::from_be_bytes([self.data[12], self.data[13]]))
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl TryFrom<Vec<u8>> for Frame {
    type Error = FrameError;

    fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
        Self::new(data)
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = FrameError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        Self::new(data.to_vec())
    }
}

/// Source of receive buffers.
///
/// Every place that needs a *copy* of a frame (the synchronous loopback and the mirror's inbound
/// clone) obtains it here, so buffer exhaustion can be modelled and tested.
pub trait FrameAllocator: Send + Sync {
    fn alloc_copy(&self, data: &[u8]) -> Result<Frame, FrameError>;
}

/// Default allocator backed by the global heap.
///
/// Uses `try_reserve_exact` so an allocation failure surfaces as
/// [`FrameError::AllocationFailure`] instead of aborting the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl FrameAllocator for HeapAllocator {
    fn alloc_copy(&self, data: &[u8]) -> Result<Frame, FrameError> {
        if data.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge {
                len: data.len(),
                max: MAX_FRAME_LEN,
            });
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(data.len())
            .map_err(|_| FrameError::AllocationFailure { len: data.len() })?;
        buf.extend_from_slice(data);
        Ok(Frame {
            data: buf.into_boxed_slice(),
        })
    }
}

impl<T: FrameAllocator + ?Sized> FrameAllocator for Arc<T> {
    fn alloc_copy(&self, data: &[u8]) -> Result<Frame, FrameError> {
        <T as FrameAllocator>::alloc_copy(&**self, data)
    }
}

impl<T: FrameAllocator + ?Sized> FrameAllocator for Box<T> {
    fn alloc_copy(&self, data: &[u8]) -> Result<Frame, FrameError> {
        <T as FrameAllocator>::alloc_copy(&**self, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn oversized_frames_are_rejected() {
        assert_eq!(
            Frame::new(vec![0u8; MAX_FRAME_LEN + 1]),
            Err(FrameError::TooLarge {
                len: MAX_FRAME_LEN + 1,
                max: MAX_FRAME_LEN,
            })
        );
        assert_eq!(Frame::new(vec![0u8; MAX_FRAME_LEN]).unwrap().len(), MAX_FRAME_LEN);
    }

    #[test]
    fn empty_frames_are_representable() {
        let frame = Frame::new(Vec::new()).unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.ethertype(), None);
    }

    #[test]
    fn ethertype_reads_header_field() {
        let mut data = vec![0u8; 60];
        data[12] = 0x08;
        data[13] = 0x06;
        assert_eq!(Frame::new(data).unwrap().ethertype(), Some(0x0806));
    }

    #[test]
    fn allocator_is_usable_through_arc_trait_object() {
        let alloc: Arc<dyn FrameAllocator> = Arc::new(HeapAllocator);
        let copy = alloc.alloc_copy(&[1, 2, 3]).unwrap();
        assert_eq!(copy.as_slice(), &[1, 2, 3]);
    }

    proptest! {
        #[test]
        fn heap_copy_preserves_bytes(data in proptest::collection::vec(any::<u8>(), 0..=MAX_FRAME_LEN)) {
            let copy = HeapAllocator.alloc_copy(&data).unwrap();
            prop_assert_eq!(copy.into_vec(), data);
        }
    }
}
