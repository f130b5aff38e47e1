// The CUDA-backed entry points with an index no driver accepts. Whether or
// not a driver is installed, each must come back with its sentinel.

#[test]
fn offset_sentinel() {
    assert_eq!(clocksync::get_host_device_time_offset(-1), (0.0, 0));
}

#[test]
fn resident_threads_sentinel() {
    assert_eq!(clocksync::get_max_resident_threads(-1), 0);
}

#[test]
fn timer_scale_sentinel() {
    assert_eq!(clocksync::get_gpu_timer_scale(-1), -1.0);
}

#[test]
fn structured_forms_report_errors() {
    assert!(clocksync::host_device_time_offset(-1).is_err());
    assert!(clocksync::max_resident_threads(-1).is_err());
    assert!(clocksync::gpu_timer_scale(-1).is_err());
}
