// Runs the three clock-domain operations against one device and prints the
// results. `--sim` swaps the CUDA driver for the software device so the
// harness can be exercised on hosts without a GPU.
use std::env;

use clocksync::{
    calibrate_on, max_resident_threads_on, CalibrationConfig, ClockSyncError, DeviceBackend,
    DeviceProperties, SimBackend,
};

fn run<B: DeviceBackend>(backend: &B, device_index: i32, config: &CalibrationConfig) -> Result<(), ClockSyncError> {
    let threads = max_resident_threads_on(backend, device_index)?;
    let mapping = calibrate_on(backend, device_index, config)?;
    let o = mapping.offset;

    println!("========================================");
    println!("DEVICE {} CLOCK DOMAIN", device_index);
    println!("========================================");
    println!("Max resident threads: {}", threads);
    println!("Counter:              {}", mapping.counter);
    println!("Host time:            {:.9} s", o.host_seconds);
    println!("Device timestamp:     {}", o.device_timestamp);
    println!("Error bound:          +/- {:.3} us", o.error_bound * 1e6);
    println!("Read floor:           {:.3} us", o.read_floor * 1e6);
    println!("Timer scale:          {:.6} host ns / device tick", mapping.scale);
    println!("Spin length:          {} ticks", config.spin_ticks);
    println!("========================================");
    Ok(())
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let sim = args.iter().any(|a| a == "--sim");
    let positional: Vec<&String> = args.iter().skip(1).filter(|a| !a.starts_with("--")).collect();

    if positional.is_empty() {
        eprintln!("Usage: {} <device_index> [spin_ticks] [--sim]", args[0]);
        std::process::exit(1);
    }

    let device_index: i32 = positional[0].parse()
        .expect("device_index must be a valid number");

    let mut config = match CalibrationConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(ticks) = positional.get(1) {
        config = config.with_spin_ticks(ticks.parse().expect("spin_ticks must be a valid number"));
    }

    let result = if sim {
        let backend = SimBackend::new(DeviceProperties {
            compute_major: 7,
            compute_minor: 0,
            multiprocessor_count: 80,
            warp_size: 32,
        });
        run(&backend, device_index, &config)
    } else {
        run(&clocksync::CudaBackend, device_index, &config)
    };

    if let Err(e) = result {
        eprintln!("clock_probe: {}", e);
        std::process::exit(1);
    }
}
