//! Software device: a host thread plays the device task against a synthetic
//! counter derived from the host monotonic clock.
//!
//! The counter runs at a configurable rate from a configurable starting
//! tick, so calibration results are known in advance and 32-bit wraparound
//! can be forced at will.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::debug;

use super::{ClockDevice, DeviceBackend, DeviceProperties, FlagSet, HandshakeFlags};
use crate::counter::{self, CounterKind};
use crate::error::{ClockSyncError, Result};
use crate::host_clock;

/// Synthetic free-running counter.
#[derive(Debug, Clone, Copy)]
pub struct SimClock {
    origin_ns: u64,
    start_ticks: u64,
    ticks_per_ns: f64,
}

impl SimClock {
    pub fn new(origin_ns: u64, start_ticks: u64, ticks_per_ns: f64) -> Self {
        Self {
            origin_ns,
            start_ticks,
            ticks_per_ns,
        }
    }

    pub fn origin_ns(&self) -> u64 {
        self.origin_ns
    }

    /// Full-width tick count at host time `host_ns`.
    pub fn ticks_at(&self, host_ns: u64) -> u64 {
        let elapsed = host_ns.saturating_sub(self.origin_ns) as f64 * self.ticks_per_ns;
        self.start_ticks.wrapping_add(elapsed as u64)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks_at(host_clock::now_ns())
    }

    /// One reading as the device routine for `kind` would see it.
    pub fn read(&self, kind: CounterKind) -> u64 {
        match kind {
            CounterKind::GlobalTimer => {
                counter::read_split(|| (self.ticks() >> 32) as u32, || self.ticks() as u32)
            }
            CounterKind::Clock32 => self.ticks() as u32 as u64,
        }
    }

    fn spin(&self, kind: CounterKind, ticks: u64) -> u64 {
        match kind {
            CounterKind::GlobalTimer => counter::spin_ticks_64(|| self.read(kind), ticks),
            CounterKind::Clock32 => counter::spin_ticks(|| self.ticks() as u32, ticks),
        }
    }
}

/// Configuration for simulated devices; every index below `device_count`
/// opens a device with the same properties and clock.
#[derive(Debug, Clone, Copy)]
pub struct SimBackend {
    pub properties: DeviceProperties,
    pub device_count: i32,
    pub clock: SimClock,
}

impl SimBackend {
    /// One device with a 1 tick/ns counter starting at zero now.
    pub fn new(properties: DeviceProperties) -> Self {
        Self {
            properties,
            device_count: 1,
            clock: SimClock::new(host_clock::now_ns(), 0, 1.0),
        }
    }

    pub fn with_tick_rate(mut self, ticks_per_ns: f64) -> Self {
        self.clock.ticks_per_ns = ticks_per_ns;
        self
    }

    pub fn with_start_ticks(mut self, start_ticks: u64) -> Self {
        self.clock.start_ticks = start_ticks;
        self
    }

    fn check_index(&self, device_index: i32) -> Result<()> {
        if device_index < 0 || device_index >= self.device_count {
            return Err(ClockSyncError::NoSuchDevice(device_index));
        }
        Ok(())
    }
}

impl DeviceBackend for SimBackend {
    type Device = SimDevice;

    fn properties(&self, device_index: i32) -> Result<DeviceProperties> {
        self.check_index(device_index)?;
        Ok(self.properties)
    }

    fn open(&self, device_index: i32) -> Result<SimDevice> {
        self.check_index(device_index)?;
        debug!(
            "sim device {}: counter {}, {} ticks/ns",
            device_index,
            self.properties.counter_kind(),
            self.clock.ticks_per_ns
        );
        Ok(SimDevice {
            clock: self.clock,
            properties: self.properties,
            sample_task: None,
            spin_tasks: Vec::new(),
        })
    }
}

pub struct SimFlags(Arc<HandshakeFlags>);

impl FlagSet for SimFlags {
    fn flags(&self) -> &HandshakeFlags {
        &self.0
    }
}

pub struct SimDevice {
    clock: SimClock,
    properties: DeviceProperties,
    sample_task: Option<JoinHandle<u64>>,
    spin_tasks: Vec<JoinHandle<u64>>,
}

impl SimDevice {
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }
}

impl ClockDevice for SimDevice {
    type Flags = SimFlags;

    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn map_flags(&mut self) -> Result<SimFlags> {
        Ok(SimFlags(Arc::new(HandshakeFlags::default())))
    }

    fn launch_sample(&mut self, flags: &SimFlags) -> Result<()> {
        if self.sample_task.is_some() {
            return Err(ClockSyncError::Protocol("sample task already in flight"));
        }
        let cells = Arc::clone(&flags.0);
        let clock = self.clock;
        let kind = self.counter();
        self.sample_task = Some(thread::spawn(move || {
            cells.ready.store(1, Ordering::Release);
            while cells.start.load(Ordering::Acquire) == 0 {
                std::hint::spin_loop();
            }
            let sample = clock.read(kind);
            cells.end.store(1, Ordering::Release);
            sample
        }));
        Ok(())
    }

    fn fetch_sample(&mut self) -> Result<u64> {
        let task = self
            .sample_task
            .take()
            .ok_or(ClockSyncError::Protocol("no sample task was launched"))?;
        task.join().map_err(|_| ClockSyncError::DeviceTaskPanicked)
    }

    fn launch_spin(&mut self, ticks: u64) -> Result<()> {
        let clock = self.clock;
        let kind = self.counter();
        self.spin_tasks.push(thread::spawn(move || clock.spin(kind, ticks)));
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        for task in self.spin_tasks.drain(..) {
            let elapsed = task.join().map_err(|_| ClockSyncError::DeviceTaskPanicked)?;
            debug!("sim spin task finished after {} ticks", elapsed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(major: i32) -> DeviceProperties {
        DeviceProperties {
            compute_major: major,
            compute_minor: 0,
            multiprocessor_count: 14,
            warp_size: 32,
        }
    }

    #[test]
    fn clock_rate_and_start() {
        let clock = SimClock::new(1_000, 500, 2.0);
        assert_eq!(clock.ticks_at(1_000), 500);
        assert_eq!(clock.ticks_at(1_100), 700);
        // host time before the origin never runs the counter backwards
        assert_eq!(clock.ticks_at(10), 500);
    }

    #[test]
    fn clock32_truncates() {
        let clock = SimClock::new(host_clock::now_ns(), (7u64 << 32) + 5, 0.0);
        assert_eq!(clock.read(CounterKind::Clock32), 5);
        assert_eq!(clock.read(CounterKind::GlobalTimer), (7u64 << 32) + 5);
    }

    #[test]
    fn rejects_unknown_index() {
        let backend = SimBackend::new(props(7));
        assert!(matches!(backend.open(1), Err(ClockSyncError::NoSuchDevice(1))));
        assert!(matches!(backend.properties(-1), Err(ClockSyncError::NoSuchDevice(-1))));
        assert!(backend.open(0).is_ok());
    }

    #[test]
    fn fetch_without_launch_is_a_protocol_error() {
        let mut dev = SimBackend::new(props(7)).open(0).unwrap();
        assert!(matches!(dev.fetch_sample(), Err(ClockSyncError::Protocol(_))));
    }

    #[test]
    fn spin_waits_for_requested_ticks() {
        let mut dev = SimBackend::new(props(2)).open(0).unwrap();
        assert_eq!(dev.counter(), CounterKind::Clock32);
        let t0 = host_clock::now_ns();
        dev.launch_spin(2_000_000).unwrap();
        dev.synchronize().unwrap();
        assert!(host_clock::now_ns() - t0 >= 2_000_000);
    }
}
