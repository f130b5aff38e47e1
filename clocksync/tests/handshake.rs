use clocksync::handshake;
use clocksync::{
    calibrate_on, host_device_time_offset_on, CalibrationConfig, CounterKind, DeviceBackend, DeviceProperties, SimBackend,
};

fn props(major: i32) -> DeviceProperties {
    DeviceProperties {
        compute_major: major,
        compute_minor: 0,
        multiprocessor_count: 14,
        warp_size: 32,
    }
}

#[test]
fn offset_lies_within_its_error_bound() {
    let backend = SimBackend::new(props(7));
    let o = host_device_time_offset_on(&backend, 0).unwrap();

    assert!(o.error_bound >= 0.0);
    assert!(o.read_floor >= 0.0);

    // 1 tick/ns from zero at the origin: the sample's true host time is
    // origin + timestamp
    let truth = (backend.clock.origin_ns() + o.device_timestamp) as f64 * 1e-9;
    assert!(
        (o.host_seconds - truth).abs() <= o.error_bound + 1e-6,
        "estimate {} truth {} bound {}",
        o.host_seconds,
        truth,
        o.error_bound
    );
}

#[test]
fn device_timestamps_do_not_go_backwards() {
    let backend = SimBackend::new(props(7));
    let a = host_device_time_offset_on(&backend, 0).unwrap();
    let b = host_device_time_offset_on(&backend, 0).unwrap();
    assert!(b.device_timestamp >= a.device_timestamp);
    assert!(b.host_seconds >= a.host_seconds);
}

#[test]
fn clock32_device_offset() {
    let backend = SimBackend::new(props(2)).with_start_ticks(1 << 40);
    let o = host_device_time_offset_on(&backend, 0).unwrap();
    assert!(o.device_timestamp <= u32::MAX as u64);
    assert!(o.error_bound >= 0.0);
}

#[test]
fn handshake_in_process_on_sim_device() {
    let mut dev = SimBackend::new(props(7)).open(0).unwrap();
    let first = handshake::handshake(&mut dev).unwrap();
    let second = handshake::estimate_offset(&mut dev).unwrap();
    assert!(second.device_timestamp > first.device_timestamp);
    assert!(second.host_seconds > first.host_seconds);
}

#[test]
fn mapping_places_device_time_on_host_timeline() {
    let backend = SimBackend::new(props(7)).with_tick_rate(2.0);
    let config = CalibrationConfig::default().with_spin_ticks(20_000_000);
    let m = calibrate_on(&backend, 0, &config).unwrap();
    assert_eq!(m.counter, CounterKind::GlobalTimer);

    // one simulated second later in device ticks is about half a host second
    let later = m.offset.device_timestamp + 1_000_000_000;
    let dt = m.to_host_seconds(later) - m.offset.host_seconds;
    assert!(dt >= 0.49 && dt < 0.75, "dt {}", dt);
}

#[test]
fn clock32_mapping_follows_the_counter_across_its_wrap() {
    // counter wraps about 30ms after the backend is created
    let backend = SimBackend::new(props(2)).with_start_ticks(u32::MAX as u64 - 30_000_000);
    let config = CalibrationConfig::default().with_spin_ticks(20_000_000);
    let m = calibrate_on(&backend, 0, &config).unwrap();
    assert_eq!(m.counter, CounterKind::Clock32);

    // 100M ticks after the offset sample, reduced the way the counter reports it
    let later = (m.offset.device_timestamp + 100_000_000) & u32::MAX as u64;
    let dt = m.to_host_seconds(later) - m.offset.host_seconds;
    assert!(dt >= 0.099 && dt < 0.15, "dt {}", dt);
}
