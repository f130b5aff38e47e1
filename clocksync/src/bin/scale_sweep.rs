// Repeats the timer-scale calibration at increasing spin lengths and reports
// the spread per length. Fixed launch/sync overhead dominates short spins,
// so the relative deviation should fall as the spin grows.
use std::env;

use clocksync::{gpu_timer_scale_on, CalibrationConfig, DeviceBackend, DeviceProperties, SimBackend};

const SPIN_LENGTHS: [u64; 4] = [1_000_000, 10_000_000, 100_000_000, 1_000_000_000];

fn sweep<B: DeviceBackend>(backend: &B, device_index: i32, trials: u32) {
    println!("\n{:<15} {:<15} {:<15} {:<15}", "Spin ticks", "Mean scale", "Std dev", "Rel. dev");
    println!("{:-<60}", "");

    for ticks in SPIN_LENGTHS {
        let config = CalibrationConfig::default().with_spin_ticks(ticks);
        let mut samples = Vec::with_capacity(trials as usize);
        for _ in 0..trials {
            match gpu_timer_scale_on(backend, device_index, &config) {
                Ok(s) => samples.push(s),
                Err(e) => eprintln!("--- {} ticks: trial failed: {}", ticks, e),
            }
        }
        if samples.is_empty() {
            println!("{:<15} (no successful trials)", ticks);
            continue;
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
        let std = var.sqrt();
        println!("{:<15} {:<15.6} {:<15.3e} {:<15.3e}", ticks, mean, std, std / mean);
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let sim = args.iter().any(|a| a == "--sim");
    let positional: Vec<&String> = args.iter().skip(1).filter(|a| !a.starts_with("--")).collect();

    if positional.len() < 2 {
        eprintln!("Usage: {} <device_index> <trials> [--sim]", args[0]);
        std::process::exit(1);
    }

    let device_index: i32 = positional[0].parse()
        .expect("device_index must be a valid number");
    let trials: u32 = positional[1].parse()
        .expect("trials must be a valid number");

    if sim {
        let backend = SimBackend::new(DeviceProperties {
            compute_major: 7,
            compute_minor: 0,
            multiprocessor_count: 80,
            warp_size: 32,
        });
        sweep(&backend, device_index, trials);
    } else {
        sweep(&clocksync::CudaBackend, device_index, trials);
    }
}
