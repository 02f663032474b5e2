//! Pool sizing constants, configuration sources and construction options.
//!
//! The worker count of a [`TaskPool`](crate::TaskPool) is resolved once, at
//! construction:
//!
//! - an explicit [`PoolOptions::with_size`] request is used if it lies strictly
//!   between `0` and [`MAX_POOL_SIZE`], otherwise [`DEFAULT_POOL_SIZE`] is used;
//! - without a request, the integer stored under [`POOL_SIZE_KEY`] in the
//!   configured [`ConfigSource`] is used under the same bounds, otherwise
//!   [`DEFAULT_POOL_SIZE`].
//!
//! Invalid sizes are never an error.

use std::{collections::HashMap, sync::Arc};
use tracing::Span;

/// Worker count used when neither an override nor the configuration source
/// provides a valid value.
pub const DEFAULT_POOL_SIZE: usize = 5;

/// Exclusive upper bound on the worker count.
pub const MAX_POOL_SIZE: usize = 1000;

/// Configuration key holding the maximum task-pool size.
pub const POOL_SIZE_KEY: &str = "taskpool_max_count";

/// Read-only source of integer configuration values.
pub trait ConfigSource: Send + Sync {
    /// Returns the integer stored under `key`, or `None` if the key is missing
    /// or its value is not an integer.
    fn get_int(&self, key: &str) -> Option<i64>;
}

/// In-memory configuration, the default source when none is supplied.
#[derive(Clone, Debug, Default)]
pub struct MemConfig {
    values: HashMap<String, i64>,
}

impl MemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the config with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: i64) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: i64) {
        self.values.insert(key.into(), value);
    }
}

impl ConfigSource for MemConfig {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.values.get(key).copied()
    }
}

/// Configuration backed by the process environment.
///
/// Keys are upper-cased and prefixed, so with the prefix `APP_` the key
/// `taskpool_max_count` is read from `APP_TASKPOOL_MAX_COUNT`. Values that do
/// not parse as integers are treated as missing.
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    prefix: String,
}

impl EnvConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_ascii_uppercase())
    }
}

impl ConfigSource for EnvConfig {
    fn get_int(&self, key: &str) -> Option<i64> {
        std::env::var(self.var_name(key))
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
    }
}

/// Options accepted when constructing a [`TaskPool`](crate::TaskPool).
///
/// ```
/// use std::sync::Arc;
/// use taskpool::{MemConfig, POOL_SIZE_KEY, PoolOptions, TaskPool};
///
/// let options = PoolOptions::new()
///     .with_config(Arc::new(MemConfig::new().with(POOL_SIZE_KEY, 8)))
///     .with_span(tracing::info_span!("orders"));
/// let pool = TaskPool::new(options);
/// assert_eq!(pool.size(), 8);
/// ```
#[derive(Clone, Default)]
pub struct PoolOptions {
    pub(crate) size: Option<usize>,
    pub(crate) span: Option<Span>,
    pub(crate) config: Option<Arc<dyn ConfigSource>>,
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests an explicit worker count. The configuration source is not
    /// consulted for the size; a value outside `(0, MAX_POOL_SIZE)` yields
    /// [`DEFAULT_POOL_SIZE`].
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Parent span for every event emitted by the pool, its dispatcher and its
    /// workers.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Source consulted for [`POOL_SIZE_KEY`].
    #[must_use]
    pub fn with_config(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.config = Some(config);
        self
    }
}

impl core::fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolOptions")
            .field("size", &self.size)
            .field("span", &self.span)
            .field("config", &self.config.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Returns `true` if `size` is an acceptable worker count.
pub const fn is_valid_size(size: usize) -> bool {
    size > 0 && size < MAX_POOL_SIZE
}

/// Resolves the worker count from an optional request or, without one, from a
/// configuration source, falling back to [`DEFAULT_POOL_SIZE`].
pub fn resolve_pool_size(requested: Option<usize>, config: &dyn ConfigSource) -> usize {
    if let Some(size) = requested {
        if is_valid_size(size) {
            return size;
        }
        tracing::debug!("Ignoring out-of-range pool size {size}, using {DEFAULT_POOL_SIZE}");
        return DEFAULT_POOL_SIZE;
    }

    match config.get_int(POOL_SIZE_KEY) {
        Some(value) if value > 0 && (value as u64) < MAX_POOL_SIZE as u64 => value as usize,
        Some(value) => {
            tracing::debug!(
                "Ignoring out-of-range `{POOL_SIZE_KEY}` = {value}, using {DEFAULT_POOL_SIZE}"
            );
            DEFAULT_POOL_SIZE
        }
        None => DEFAULT_POOL_SIZE,
    }
}
