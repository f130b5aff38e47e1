use clocksync::{
    gpu_timer_scale_on, max_resident_threads_on, CalibrationConfig, ClockSyncError, DeviceProperties, SimBackend,
};

fn props(major: i32) -> DeviceProperties {
    DeviceProperties {
        compute_major: major,
        compute_minor: 5,
        multiprocessor_count: 14,
        warp_size: 32,
    }
}

fn short() -> CalibrationConfig {
    CalibrationConfig::default().with_spin_ticks(20_000_000)
}

#[test]
fn unit_rate_scale() {
    let backend = SimBackend::new(props(7));
    let scale = gpu_timer_scale_on(&backend, 0, &short()).unwrap();
    assert!(scale.is_finite());
    // the spin cannot finish before its ticks elapse; overheads only add
    assert!(scale >= 0.999, "scale {}", scale);
    assert!(scale < 1.5, "scale {}", scale);
}

#[test]
fn fast_counter_scale() {
    let backend = SimBackend::new(props(7)).with_tick_rate(2.0);
    let scale = gpu_timer_scale_on(&backend, 0, &short()).unwrap();
    assert!(scale >= 0.4995, "scale {}", scale);
    assert!(scale < 0.75, "scale {}", scale);
}

#[test]
fn clock32_scale_across_wraparound() {
    // counter wraps about 50ms after the backend is created, inside the
    // 200ms spin
    let backend = SimBackend::new(props(2)).with_start_ticks(u32::MAX as u64 - 50_000_000);
    let config = CalibrationConfig::default().with_spin_ticks(200_000_000);
    let scale = gpu_timer_scale_on(&backend, 0, &config).unwrap();
    assert!(scale >= 0.999, "scale {}", scale);
    assert!(scale < 1.5, "scale {}", scale);
}

#[test]
fn zero_spin_rejected_before_fork() {
    let backend = SimBackend::new(props(7));
    let config = CalibrationConfig::default().with_spin_ticks(0);
    assert!(matches!(
        gpu_timer_scale_on(&backend, 0, &config),
        Err(ClockSyncError::InvalidConfig(_))
    ));
}

#[test]
fn missing_device_fails_in_child() {
    let backend = SimBackend::new(props(7));
    assert!(matches!(
        gpu_timer_scale_on(&backend, 3, &short()),
        Err(ClockSyncError::ChildFailed(1))
    ));
}

#[test]
fn resident_threads_through_harness() {
    assert_eq!(max_resident_threads_on(&SimBackend::new(props(2)), 0).unwrap(), 21_504);
    assert_eq!(max_resident_threads_on(&SimBackend::new(props(3)), 0).unwrap(), 28_672);
    assert!(max_resident_threads_on(&SimBackend::new(props(3)), 1).is_err());
}
