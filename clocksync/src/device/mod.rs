//! The device seam.
//!
//! A [`DeviceBackend`] knows how to query properties of, and open, a device
//! named by an explicit index. The opened [`ClockDevice`] exposes the few
//! primitives the calibration protocols need: host-mapped flags, the
//! handshake sample task, the spin task and synchronization.

pub mod cuda;
pub mod ptx;
pub mod sim;

use std::sync::atomic::AtomicU32;

use crate::counter::CounterKind;
use crate::error::Result;

pub use cuda::{CudaBackend, CudaDevice};
pub use sim::{SimBackend, SimDevice};

/// The handful of device properties the calibration needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProperties {
    pub compute_major: i32,
    pub compute_minor: i32,
    pub multiprocessor_count: i32,
    pub warp_size: i32,
}

impl DeviceProperties {
    pub fn counter_kind(&self) -> CounterKind {
        CounterKind::for_compute_capability(self.compute_major)
    }
}

/// The three handshake flags, laid out contiguously so a single host-mapped
/// allocation can back them.
///
/// Each flag only ever moves from 0 to 1, is set by one side and polled by
/// the other.
#[repr(C)]
#[derive(Debug, Default)]
pub struct HandshakeFlags {
    /// Set by the device task once it is parked waiting for `start`.
    pub ready: AtomicU32,
    /// Set by the host right after taking T1.
    pub start: AtomicU32,
    /// Set by the device task after storing its clock sample.
    pub end: AtomicU32,
}

/// Storage for one set of [`HandshakeFlags`] that both host and device see.
pub trait FlagSet {
    fn flags(&self) -> &HandshakeFlags;
}

pub trait ClockDevice {
    type Flags: FlagSet;

    fn properties(&self) -> &DeviceProperties;

    /// Counter variant used by this device's routines.
    fn counter(&self) -> CounterKind {
        self.properties().counter_kind()
    }

    /// Allocates a fresh, zeroed set of handshake flags.
    fn map_flags(&mut self) -> Result<Self::Flags>;

    /// Starts the handshake device task: set `ready`, wait for `start`, take
    /// one clock sample, set `end`. Returns without waiting for it.
    fn launch_sample(&mut self, flags: &Self::Flags) -> Result<()>;

    /// Waits for the sample task and copies its clock reading back.
    fn fetch_sample(&mut self) -> Result<u64>;

    /// Starts a task that busy-waits until `ticks` counter ticks elapse.
    fn launch_spin(&mut self, ticks: u64) -> Result<()>;

    /// Blocks until every launched task has finished.
    fn synchronize(&mut self) -> Result<()>;
}

pub trait DeviceBackend {
    type Device: ClockDevice;

    /// Reads properties without creating an execution context.
    fn properties(&self, device_index: i32) -> Result<DeviceProperties>;

    /// Selects the device and prepares it for launches.
    fn open(&self, device_index: i32) -> Result<Self::Device>;
}
