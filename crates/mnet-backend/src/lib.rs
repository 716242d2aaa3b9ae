//! Frame buffers and the contract for real network devices that a virtual interface can mirror.
//!
//! This crate deals exclusively with raw Ethernet frames. It exists so consumers that only need
//! frames or an external-device implementation (tests, host glue) do not need to depend on the
//! packet-path engine in `mnet-core`.
#![forbid(unsafe_code)]

pub mod frame;
pub mod sim_nic;

use std::sync::Arc;

use thiserror::Error;

pub use frame::{Frame, FrameAllocator, FrameError, HeapAllocator, ETH_HLEN, MAX_FRAME_LEN};
pub use sim_nic::{SimNic, SimNicStats};

/// What an [`RxHandler`] did with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxDisposition {
    /// The frame continues to its normal destination on the external device.
    Pass,
    /// The handler took the frame; the external device must not deliver it further.
    Consumed,
}

/// Interception hook run for every frame arriving on an [`ExternalDevice`].
///
/// Handlers only see a borrowed frame: a handler that wants to keep the data must copy it.
pub trait RxHandler: Send + Sync {
    fn on_inbound(&self, frame: &Frame) -> RxDisposition;
}

impl<F> RxHandler for F
where
    F: Fn(&Frame) -> RxDisposition + Send + Sync,
{
    fn on_inbound(&self, frame: &Frame) -> RxDisposition {
        self(frame)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{device} already has an rx handler registered")]
    Busy { device: String },
}

/// A network device the engine does not own (e.g. a physical NIC).
///
/// The engine only needs to know whether the device is operationally up, to push frames onto its
/// transmit path, and to register a single receive interception handler.
pub trait ExternalDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Operational state (`IFF_UP` plus carrier).
    fn is_up(&self) -> bool;

    /// Queue `frame` on the device's own transmit path.
    fn transmit(&self, frame: Frame);

    /// Install the receive interception handler.
    ///
    /// At most one handler may be installed at a time; a second registration fails with
    /// [`HandlerError::Busy`].
    fn register_rx_handler(&self, handler: Arc<dyn RxHandler>) -> Result<(), HandlerError>;

    /// Remove the receive handler. Returns `false` if none was installed.
    fn unregister_rx_handler(&self) -> bool;
}

impl<T: ExternalDevice + ?Sized> ExternalDevice for Arc<T> {
    fn name(&self) -> &str {
        <T as ExternalDevice>::name(&**self)
    }

    fn is_up(&self) -> bool {
        <T as ExternalDevice>::is_up(&**self)
    }

    fn transmit(&self, frame: Frame) {
        <T as ExternalDevice>::transmit(&**self, frame);
    }

    fn register_rx_handler(&self, handler: Arc<dyn RxHandler>) -> Result<(), HandlerError> {
        <T as ExternalDevice>::register_rx_handler(&**self, handler)
    }

    fn unregister_rx_handler(&self) -> bool {
        <T as ExternalDevice>::unregister_rx_handler(&**self)
    }
}

impl<T: ExternalDevice + ?Sized> ExternalDevice for Box<T> {
    fn name(&self) -> &str {
        <T as ExternalDevice>::name(&**self)
    }

    fn is_up(&self) -> bool {
        <T as ExternalDevice>::is_up(&**self)
    }

    fn transmit(&self, frame: Frame) {
        <T as ExternalDevice>::transmit(&**self, frame);
    }

    fn register_rx_handler(&self, handler: Arc<dyn RxHandler>) -> Result<(), HandlerError> {
        <T as ExternalDevice>::register_rx_handler(&**self, handler)
    }

    fn unregister_rx_handler(&self) -> bool {
        <T as ExternalDevice>::unregister_rx_handler(&**self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn closures_are_rx_handlers() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_handler = seen.clone();
        let handler: Arc<dyn RxHandler> = Arc::new(move |frame: &Frame| {
            seen_in_handler.fetch_add(frame.len(), Ordering::Relaxed);
            RxDisposition::Pass
        });

        let frame = Frame::new(vec![0u8; 42]).unwrap();
        assert_eq!(handler.on_inbound(&frame), RxDisposition::Pass);
        assert_eq!(seen.load(Ordering::Relaxed), 42);
    }

    #[test]
    fn external_device_is_implemented_for_boxed_arc() {
        let nic = Arc::new(SimNic::new("eth0"));
        let boxed: Box<dyn ExternalDevice> = Box::new(nic.clone());

        assert_eq!(boxed.name(), "eth0");
        assert!(boxed.is_up());
        boxed.transmit(Frame::new(vec![1, 2, 3]).unwrap());

        assert_eq!(nic.drain_tx_frames().len(), 1);
    }
}
