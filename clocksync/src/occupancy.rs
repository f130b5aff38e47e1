use crate::device::DeviceProperties;

/// Resident warps per multiprocessor: 48 on compute capability 2.x and
/// older, 64 on everything newer.
pub fn warps_per_multiprocessor(compute_major: i32) -> i32 {
    if compute_major <= 2 {
        48
    } else {
        64
    }
}

/// Maximum number of threads the device can hold resident at once.
pub fn max_resident_threads(props: &DeviceProperties) -> i32 {
    warps_per_multiprocessor(props.compute_major) * props.multiprocessor_count * props.warp_size
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
    fn fermi_class() {
        assert_eq!(max_resident_threads(&props(2)), 21_504);
        assert_eq!(max_resident_threads(&props(1)), 48 * 14 * 32);
    }

    #[test]
    fn newer_generations() {
        assert_eq!(max_resident_threads(&props(3)), 28_672);
        assert_eq!(max_resident_threads(&props(8)), 28_672);
    }
}
