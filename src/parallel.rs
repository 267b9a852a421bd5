//! Sizing of rayon's global pool, which renders patches and scores GA candidates.

use std::thread;

use rayon::ThreadPoolBuilder;
use sysinfo::System;

/// A core above this usage is left to whatever is already running on it.
const BUSY_CORE_USAGE: f32 = 50.0;

/// Workers for a run. An experiment that names a count gets exactly that. Otherwise one
/// worker per core that is not already busy, holding one core back.
pub fn worker_count(configured: Option<usize>) -> usize {
  if let Some(workers) = configured {
    return workers.max(1);
  }
  let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

  let mut system = System::new_all();
  system.refresh_cpu_usage();
  let free = system.cpus().iter().filter(|cpu| cpu.cpu_usage() < BUSY_CORE_USAGE).count();

  cores.min(free.max(1)).saturating_sub(1).max(1)
}

/// Size the global pool for this process and return the worker count asked for. Only the
/// first call takes effect.
pub fn init_global_pool(configured: Option<usize>) -> usize {
  let workers = worker_count(configured);
  match ThreadPoolBuilder::new().num_threads(workers).build_global() {
    Ok(()) => log::debug!("rendering with {} workers", workers),
    Err(e) => log::debug!("worker pool already sized, keeping it: {}", e),
  }
  workers
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_configured_count_is_used() {
    assert_eq!(worker_count(Some(3)), 3);
    assert_eq!(worker_count(Some(1)), 1);
  }

  #[test]
  fn test_idle_core_count_is_positive() {
    let workers = worker_count(None);
    assert!(workers >= 1);
    assert!(workers <= thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
  }
}
