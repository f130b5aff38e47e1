//! Host/device clock-domain synchronization for GPU benchmarking.
//!
//! Three operations, each run in a throwaway child process so a faulting
//! driver can never poison the caller:
//!
//! - [`host_device_time_offset`]: the host time matching one device clock
//!   reading, with an error bound.
//! - [`gpu_timer_scale`]: host nanoseconds per device tick.
//! - [`max_resident_threads`]: resident thread capacity of the device.
//!
//! The `get_*` forms return a sentinel on failure instead of an error.

pub mod config;
pub mod counter;
pub mod device;
pub mod error;
pub mod handshake;
pub mod host_clock;
pub mod isolate;
pub mod occupancy;
pub mod shared;
pub mod spin;

use log::error;

pub use config::CalibrationConfig;
pub use counter::CounterKind;
pub use device::{ClockDevice, CudaBackend, DeviceBackend, DeviceProperties, SimBackend};
pub use error::{ClockSyncError, Result};
pub use handshake::TimeOffset;
pub use isolate::run_isolated;

/// Offset estimate for `device_index` on any backend.
pub fn host_device_time_offset_on<B: DeviceBackend>(backend: &B, device_index: i32) -> Result<TimeOffset> {
    run_isolated(|| {
        let mut device = backend.open(device_index)?;
        handshake::estimate_offset(&mut device)
    })
}

/// Resident thread capacity for `device_index` on any backend.
pub fn max_resident_threads_on<B: DeviceBackend>(backend: &B, device_index: i32) -> Result<i32> {
    run_isolated(|| {
        let props = backend.properties(device_index)?;
        Ok(occupancy::max_resident_threads(&props))
    })
}

/// Timer scale for `device_index` on any backend.
pub fn gpu_timer_scale_on<B: DeviceBackend>(
    backend: &B,
    device_index: i32,
    config: &CalibrationConfig,
) -> Result<f64> {
    config.validate()?;
    run_isolated(|| {
        let mut device = backend.open(device_index)?;
        spin::calibrate(&mut device, config)
    })
}

/// [`host_device_time_offset_on`] against the CUDA driver.
pub fn host_device_time_offset(device_index: i32) -> Result<TimeOffset> {
    host_device_time_offset_on(&CudaBackend, device_index)
}

/// [`max_resident_threads_on`] against the CUDA driver.
pub fn max_resident_threads(device_index: i32) -> Result<i32> {
    max_resident_threads_on(&CudaBackend, device_index)
}

/// [`gpu_timer_scale_on`] against the CUDA driver, with spin lengths from
/// [`CalibrationConfig::from_env`].
pub fn gpu_timer_scale(device_index: i32) -> Result<f64> {
    gpu_timer_scale_on(&CudaBackend, device_index, &CalibrationConfig::from_env()?)
}

/// `(host_seconds, device_timestamp)`, or `(0.0, 0)` on failure.
pub fn get_host_device_time_offset(device_index: i32) -> (f64, u64) {
    match host_device_time_offset(device_index) {
        Ok(o) => (o.host_seconds, o.device_timestamp),
        Err(e) => {
            error!("host/device time offset for device {} unavailable: {}", device_index, e);
            (0.0, 0)
        }
    }
}

/// Maximum resident threads, or `0` on failure.
pub fn get_max_resident_threads(device_index: i32) -> i32 {
    max_resident_threads(device_index).unwrap_or_else(|e| {
        error!("max resident threads for device {} unavailable: {}", device_index, e);
        0
    })
}

/// Timer scale, or `-1.0` on failure.
pub fn get_gpu_timer_scale(device_index: i32) -> f64 {
    gpu_timer_scale(device_index).unwrap_or_else(|e| {
        error!("timer scale for device {} unavailable: {}", device_index, e);
        -1.0
    })
}

/// Compute capability major version of `device_index`, queried in a child.
fn compute_major_on<B: DeviceBackend>(backend: &B, device_index: i32) -> Result<i32> {
    run_isolated(|| Ok(backend.properties(device_index)?.compute_major))
}

/// Offset and scale together: enough to place any device timestamp on the
/// host timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockMapping {
    pub offset: TimeOffset,
    /// Host nanoseconds per device tick.
    pub scale: f64,
    /// Counter the timestamps come from; sets the width they wrap at.
    pub counter: CounterKind,
}

impl ClockMapping {
    /// Signed tick distance from the offset sample to `device_timestamp`.
    ///
    /// `Clock32` readings are taken modulo 2^32, so a reading within half a
    /// wrap of the offset sample maps to the nearby side of it.
    pub fn ticks_since_offset(&self, device_timestamp: u64) -> i64 {
        match self.counter {
            CounterKind::GlobalTimer => device_timestamp.wrapping_sub(self.offset.device_timestamp) as i64,
            CounterKind::Clock32 => {
                (device_timestamp as u32).wrapping_sub(self.offset.device_timestamp as u32) as i32 as i64
            }
        }
    }

    /// Host monotonic seconds at which the device counter read
    /// `device_timestamp`.
    pub fn to_host_seconds(&self, device_timestamp: u64) -> f64 {
        let ticks = self.ticks_since_offset(device_timestamp);
        self.offset.host_seconds + ticks as f64 * self.scale * 1e-9
    }
}

/// Runs the offset handshake and the rate calibration, each isolated.
pub fn calibrate_on<B: DeviceBackend>(
    backend: &B,
    device_index: i32,
    config: &CalibrationConfig,
) -> Result<ClockMapping> {
    let counter = CounterKind::for_compute_capability(compute_major_on(backend, device_index)?);
    let offset = host_device_time_offset_on(backend, device_index)?;
    let scale = gpu_timer_scale_on(backend, device_index, config)?;
    Ok(ClockMapping { offset, scale, counter })
}
