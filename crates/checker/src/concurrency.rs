//! Concurrency planning for probe workers.
//!
//! Probing is network bound, so the automatic worker count scales with the
//! CPU count but is capped well below what a large machine could schedule.

use iptv_checker_config::Config;

/// Upper bound for automatically derived worker counts.
pub const MAX_AUTO_WORKERS: usize = 16;

/// Number of entries probed at once.
///
/// - An explicit non-zero `run.concurrency` is used unchanged
/// - `0` derives the count from the logical core count, capped at
///   [`MAX_AUTO_WORKERS`]
pub fn worker_count(cfg: &Config) -> usize {
    derive_workers(cfg.run.concurrency, num_cpus::get())
}

fn derive_workers(configured: u32, cores: usize) -> usize {
    if configured > 0 {
        configured as usize
    } else {
        cores.clamp(1, MAX_AUTO_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_config_is_sequential() {
        assert_eq!(worker_count(&Config::default()), 1);
    }

    #[test]
    fn test_auto_uses_detected_cores() {
        let mut cfg = Config::default();
        cfg.run.concurrency = 0;
        let workers = worker_count(&cfg);
        assert!((1..=MAX_AUTO_WORKERS).contains(&workers));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_explicit_count_is_preserved(configured in 1u32..512, cores in 0usize..256) {
            prop_assert_eq!(derive_workers(configured, cores), configured as usize);
        }

        #[test]
        fn prop_auto_count_is_bounded(cores in 0usize..1024) {
            let workers = derive_workers(0, cores);
            prop_assert!(workers >= 1);
            prop_assert!(workers <= MAX_AUTO_WORKERS);
            prop_assert!(workers <= cores.max(1));
        }
    }
}
