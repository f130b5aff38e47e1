//! Device clock rate calibration.
//!
//! A device task spins until its own counter shows the requested number of
//! ticks; the host brackets launch and completion with monotonic
//! timestamps. Launch and synchronize overheads are fixed, so longer spins
//! shrink their relative weight.

use log::debug;

use crate::config::CalibrationConfig;
use crate::device::ClockDevice;
use crate::error::{ClockSyncError, Result};
use crate::host_clock;

/// Host nanoseconds per device tick.
pub fn timer_scale(host_ns: u64, device_ticks: u64) -> Result<f64> {
    let scale = host_ns as f64 / device_ticks as f64;
    if !scale.is_finite() || scale <= 0.0 {
        return Err(ClockSyncError::NonFinite(scale));
    }
    Ok(scale)
}

/// Runs the warm-up spin, then the timed spin, and returns the timer scale.
pub fn calibrate<D: ClockDevice>(device: &mut D, config: &CalibrationConfig) -> Result<f64> {
    config.validate()?;

    device.launch_spin(config.warmup_ticks)?;
    device.synchronize()?;

    let begin = host_clock::now_ns();
    device.launch_spin(config.spin_ticks)?;
    device.synchronize()?;
    let end = host_clock::now_ns();

    let host_ns = end.saturating_sub(begin);
    let scale = timer_scale(host_ns, config.spin_ticks)?;
    debug!(
        "spin of {} ticks ({}) took {} ns on the host: scale {:.6}",
        config.spin_ticks,
        device.counter(),
        host_ns,
        scale
    );
    Ok(scale)
}
