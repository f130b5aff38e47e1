//! Host/device time offset by flag handshake.
//!
//! The device task parks on `start`, the host stamps T1 and raises `start`,
//! the device samples its clock and raises `end`, the host stamps T2 on
//! seeing it. The sample was taken somewhere inside [T1, T2], so the
//! midpoint is the estimate and half the width is the error bound.
//!
//! All waiting is spin-polling with no timeout: a device task that never
//! raises a flag hangs the calling process. Run this inside
//! [`crate::isolate::run_isolated`].

use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;

use crate::device::{ClockDevice, FlagSet};
use crate::error::Result;
use crate::host_clock;
use crate::shared::SharedValue;

/// The host time matching one device clock reading.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeOffset {
    /// Host monotonic seconds, midpoint of the handshake window.
    pub host_seconds: f64,
    /// Device counter value sampled inside the window.
    pub device_timestamp: u64,
    /// Half the handshake window, in seconds.
    pub error_bound: f64,
    /// Half the cost of the final host clock read, in seconds. Diagnostic
    /// floor below which `error_bound` cannot go.
    pub read_floor: f64,
}

unsafe impl SharedValue for TimeOffset {}

/// Host timestamps around one handshake.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeWindow {
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
}

impl HandshakeWindow {
    pub fn midpoint(&self) -> f64 {
        (self.t1 + self.t2) / 2.0
    }

    pub fn error_bound(&self) -> f64 {
        (self.t2 - self.t1) / 2.0
    }

    pub fn read_floor(&self) -> f64 {
        (self.t3 - self.t2) / 2.0
    }

    pub fn offset(&self, device_timestamp: u64) -> TimeOffset {
        TimeOffset {
            host_seconds: self.midpoint(),
            device_timestamp,
            error_bound: self.error_bound(),
            read_floor: self.read_floor(),
        }
    }
}

#[inline]
fn wait_for(flag: &AtomicU32) {
    while flag.load(Ordering::Acquire) == 0 {
        std::hint::spin_loop();
    }
}

/// One complete handshake on fresh flags.
pub fn handshake<D: ClockDevice>(device: &mut D) -> Result<TimeOffset> {
    let cells = device.map_flags()?;
    device.launch_sample(&cells)?;
    let flags = cells.flags();

    wait_for(&flags.ready);
    let t1 = host_clock::now_seconds();
    flags.start.store(1, Ordering::Release);
    wait_for(&flags.end);
    let t2 = host_clock::now_seconds();
    let t3 = host_clock::now_seconds();

    let device_timestamp = device.fetch_sample()?;
    let window = HandshakeWindow { t1, t2, t3 };
    debug!(
        "handshake: T1={:.9} T2={:.9} error +/-{:.3}us floor {:.3}us device={}",
        t1,
        t2,
        window.error_bound() * 1e6,
        window.read_floor() * 1e6,
        device_timestamp
    );
    Ok(window.offset(device_timestamp))
}

/// Warm-up handshake (discarded, absorbs first-launch latency) followed by
/// the measured one.
pub fn estimate_offset<D: ClockDevice>(device: &mut D) -> Result<TimeOffset> {
    handshake(device)?;
    debug!("handshake warm-up done");
    handshake(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_arithmetic() {
        let w = HandshakeWindow {
            t1: 10.0,
            t2: 10.5,
            t3: 10.75,
        };
        assert_eq!(w.midpoint(), 10.25);
        assert_eq!(w.error_bound(), 0.25);
        assert_eq!(w.read_floor(), 0.125);

        let o = w.offset(42);
        assert_eq!(o.host_seconds, 10.25);
        assert_eq!(o.device_timestamp, 42);
        assert_eq!(o.error_bound, 0.25);
    }

    #[test]
    fn zeroed_offset_is_default() {
        let o = TimeOffset::default();
        assert_eq!(o.device_timestamp, 0);
        assert_eq!(o.host_seconds, 0.0);
    }
}
