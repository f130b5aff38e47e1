use clocksync::isolate::{EXIT_OPERATION_FAILED, EXIT_PANICKED};
use clocksync::{run_isolated, ClockSyncError, TimeOffset};

#[test]
fn child_value_reaches_parent_bit_for_bit() {
    let v: i32 = run_isolated(|| Ok(-123_456_789)).unwrap();
    assert_eq!(v, -123_456_789);

    let v: u64 = run_isolated(|| Ok(u64::MAX - 3)).unwrap();
    assert_eq!(v, u64::MAX - 3);

    let pi_bits = 0x4009_21fb_5444_2d18u64;
    let v: f64 = run_isolated(move || Ok(f64::from_bits(pi_bits))).unwrap();
    assert_eq!(v.to_bits(), pi_bits);

    let v: f64 = run_isolated(|| Ok(-0.0)).unwrap();
    assert_eq!(v.to_bits(), (-0.0f64).to_bits());
}

#[test]
fn record_reaches_parent() {
    let sent = TimeOffset {
        host_seconds: 1234.5,
        device_timestamp: 0xdead_beef_0000_0001,
        error_bound: 2.5e-6,
        read_floor: 1e-8,
    };
    let got: TimeOffset = run_isolated(move || Ok(sent)).unwrap();
    assert_eq!(got, sent);
}

#[test]
fn child_killed_by_signal_fails() {
    let r: Result<u64, _> = run_isolated(|| {
        unsafe {
            libc::raise(libc::SIGKILL);
        }
        Ok(42)
    });
    match r {
        Err(ClockSyncError::ChildSignaled(sig)) => assert_eq!(sig, libc::SIGKILL),
        other => panic!("expected signal failure, got {:?}", other),
    }
}

#[test]
fn child_abort_fails() {
    let r: Result<f64, _> = run_isolated(|| {
        std::process::abort();
    });
    assert!(matches!(r, Err(ClockSyncError::ChildSignaled(s)) if s == libc::SIGABRT));
}

#[test]
fn operation_error_fails() {
    let r: Result<i32, _> = run_isolated(|| Err(ClockSyncError::Protocol("device refused")));
    assert!(matches!(r, Err(ClockSyncError::ChildFailed(c)) if c == EXIT_OPERATION_FAILED));
}

#[test]
fn operation_panic_is_contained() {
    let r: Result<u64, _> = run_isolated(|| panic!("driver exploded"));
    assert!(matches!(r, Err(ClockSyncError::ChildFailed(c)) if c == EXIT_PANICKED));
}

#[test]
fn nonzero_exit_fails() {
    let r: Result<u64, _> = run_isolated(|| unsafe { libc::_exit(3) });
    assert!(matches!(r, Err(ClockSyncError::ChildFailed(3))));
}

#[test]
fn parent_state_untouched_by_child() {
    let mut counter = 5u32;
    let v: u32 = run_isolated(|| {
        counter += 100;
        Ok(counter)
    })
    .unwrap();
    assert_eq!(v, 105);
    assert_eq!(counter, 5);
}

#[test]
fn child_threads_and_logging_work_beside_parent_threads() {
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let busy = {
        let stop = stop.clone();
        std::thread::spawn(move || {
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        })
    };

    let v: u64 = run_isolated(|| {
        log::debug!("child spawning helper");
        let helper = std::thread::spawn(|| vec![7u64; 1024].iter().sum::<u64>());
        helper.join().map_err(|_| ClockSyncError::DeviceTaskPanicked)
    })
    .unwrap();
    assert_eq!(v, 7 * 1024);

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    busy.join().unwrap();
}
