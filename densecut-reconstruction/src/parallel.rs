//! Parallel processing utilities for the meshing pipeline
//!
//! This module provides configurable thread pool management shared by the
//! per-voxel reconstruction tasks and the visibility voting.

use densecut_core::{Aabb, Point3d, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::{Arc, Mutex, OnceLock};

/// Global thread pool used by the meshing pipeline
static GLOBAL_THREAD_POOL: OnceLock<Arc<ThreadPool>> = OnceLock::new();
static THREAD_POOL_CONFIG: Mutex<ThreadPoolConfig> = Mutex::new(ThreadPoolConfig::new());

/// Thread pool configuration for parallel processing
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of threads to use (None = automatic)
    pub num_threads: Option<usize>,
    /// Thread stack size in bytes
    pub stack_size: Option<usize>,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Enable parallel processing (can be disabled for debugging)
    pub enabled: bool,
    /// Inputs shorter than this run sequentially
    pub min_parallel_len: usize,
}

impl ThreadPoolConfig {
    const fn new() -> Self {
        Self {
            num_threads: None,
            stack_size: None,
            thread_name_prefix: String::new(),
            enabled: true,
            min_parallel_len: 2,
        }
    }

    /// Set number of threads
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            stack_size: Some(8 * 1024 * 1024),
            thread_name_prefix: "densecut".to_string(),
            enabled: true,
            min_parallel_len: 2,
        }
    }
}

/// Initialize the global thread pool with custom configuration.
///
/// Without this call work runs on rayon's default pool.
pub fn init_thread_pool(config: ThreadPoolConfig) -> Result<()> {
    if GLOBAL_THREAD_POOL.get().is_some() {
        return Ok(());
    }

    let mut builder = ThreadPoolBuilder::new();

    if let Some(num_threads) = config.num_threads {
        builder = builder.num_threads(num_threads);
    }

    if let Some(stack_size) = config.stack_size {
        builder = builder.stack_size(stack_size);
    }

    if !config.thread_name_prefix.is_empty() {
        let prefix = config.thread_name_prefix.clone();
        builder = builder.thread_name(move |index| format!("{}-{}", prefix, index));
    }

    let pool = builder.build().map_err(|e| {
        densecut_core::Error::Algorithm(format!("Failed to create thread pool: {}", e))
    })?;

    if let Ok(mut global_config) = THREAD_POOL_CONFIG.lock() {
        *global_config = config;
    }

    GLOBAL_THREAD_POOL.set(Arc::new(pool)).map_err(|_| {
        densecut_core::Error::Algorithm("Thread pool already initialized".to_string())
    })?;

    Ok(())
}

/// Get current thread pool configuration
pub fn get_config() -> ThreadPoolConfig {
    THREAD_POOL_CONFIG
        .lock()
        .map(|config| config.clone())
        .unwrap_or_default()
}

/// Check if parallel processing is enabled
pub fn is_parallel_enabled() -> bool {
    get_config().enabled
}

/// Number of worker threads work is spread over
pub fn current_num_threads() -> usize {
    match GLOBAL_THREAD_POOL.get() {
        Some(pool) => pool.current_num_threads(),
        None => rayon::current_num_threads(),
    }
}

/// Execute a parallel operation on the configured pool
pub fn execute_parallel<F, R>(op: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    match GLOBAL_THREAD_POOL.get() {
        Some(pool) if is_parallel_enabled() => pool.install(op),
        _ => op(),
    }
}

fn run_sequentially(len: usize) -> bool {
    let config = get_config();
    !config.enabled || len < config.min_parallel_len
}

/// Parallel map operation, output order follows input order
pub fn parallel_map<T, U, F>(data: &[T], f: F) -> Vec<U>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync + Send,
{
    if run_sequentially(data.len()) {
        return data.iter().map(f).collect();
    }

    execute_parallel(|| data.par_iter().map(f).collect())
}

/// Fold items into per-thread accumulators and merge them.
///
/// `identity` creates a private accumulator for each worker; `reduce`
/// combines two accumulators and must be associative.
pub fn parallel_fold<T, A, I, F, R>(data: &[T], identity: I, fold: F, reduce: R) -> A
where
    T: Sync,
    A: Send,
    I: Fn() -> A + Sync + Send,
    F: Fn(A, &T) -> A + Sync + Send,
    R: Fn(A, A) -> A + Sync + Send,
{
    if run_sequentially(data.len()) {
        return data.iter().fold(identity(), fold);
    }

    execute_parallel(|| data.par_iter().fold(&identity, &fold).reduce(&identity, &reduce))
}

/// Parallel bounding box computation
pub fn parallel_bounding_box(points: &[Point3d]) -> Option<Aabb> {
    if points.is_empty() {
        return None;
    }

    let init = || {
        Aabb::new(
            Point3d::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            Point3d::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        )
    };
    Some(parallel_fold(
        points,
        init,
        |mut aabb, point| {
            aabb.include(point);
            aabb
        },
        |a, b| a.union(&b),
    ))
}
