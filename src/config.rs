//! Configuration Module - Heap Tuning Parameters
//!
//! Manages all configuration parameters for the heap manager. Most knobs
//! have sensible defaults; `validate()` rejects inconsistent combinations.

use crate::segment::SEGMENT_SIZE;

const MB: usize = 1024 * 1024;

/// Target occupancy ratio (live / size) after an old-gen collection.
pub const DEFAULT_OCCUPANCY_TARGET: f64 = 0.5;

/// Main configuration for the Hades heap manager.
///
/// # Examples
///
/// ```rust
/// use hades_gc::GcConfig;
///
/// let config = GcConfig {
///     max_heap_size: 256 * 1024 * 1024,
///     concurrent: false,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct GcConfig {
    /// Minimum heap size in bytes. The heap never shrinks below this.
    pub min_heap_size: usize,

    /// Initial heap size in bytes. Seeds the old-gen target size.
    pub init_heap_size: usize,

    /// Maximum heap size in bytes. Exceeding this is a fatal OOM.
    pub max_heap_size: usize,

    /// Target live/size ratio after an old-gen collection. Lower values
    /// collect earlier and waste more memory; higher values risk blocking
    /// collections. Default 0.5.
    pub occupancy_target: f64,

    /// Allocate new objects in the young generation. When false, every
    /// allocation goes directly to the old generation.
    pub alloc_in_young: bool,

    /// Promote whole young segments to the old generation until
    /// `tti_reached()` is called, then revert to normal young collections.
    pub revert_to_yg_at_tti: bool,

    /// Run the marker and sweeper on a background thread. Only honoured on
    /// 64-bit targets; 32-bit targets always run incrementally inside young
    /// collections.
    pub concurrent: bool,

    /// Heap-size tripwire: when live bytes after an old-gen collection
    /// exceed this limit, the tripwire callback fires once.
    pub tripwire_limit: Option<usize>,

    /// Name published to the crash manager and used in log lines.
    pub name: String,
}

impl Default for GcConfig {
    fn default() -> Self {
        // A background collector thread only helps when there is a spare
        // core for it to run on.
        let concurrent = cfg!(target_pointer_width = "64") && num_cpus::get() > 1;
        GcConfig {
            min_heap_size: 4 * MB,
            init_heap_size: 8 * MB,
            max_heap_size: 512 * MB,
            occupancy_target: DEFAULT_OCCUPANCY_TARGET,
            alloc_in_young: true,
            revert_to_yg_at_tti: false,
            concurrent,
            tripwire_limit: None,
            name: "HadesGC".to_string(),
        }
    }
}

impl GcConfig {
    /// Validate the configuration, returning a description of the first
    /// problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_heap_size < SEGMENT_SIZE {
            return Err(format!(
                "max_heap_size must be at least one segment ({} bytes)",
                SEGMENT_SIZE
            ));
        }
        if self.min_heap_size > self.max_heap_size {
            return Err("min_heap_size cannot exceed max_heap_size".to_string());
        }
        if self.init_heap_size < self.min_heap_size || self.init_heap_size > self.max_heap_size {
            return Err("init_heap_size must be between min and max heap size".to_string());
        }
        if !(0.05..=0.95).contains(&self.occupancy_target) {
            return Err("occupancy_target must be between 0.05 and 0.95".to_string());
        }
        Ok(())
    }

    /// Build a configuration from the environment, overriding defaults with:
    /// - `HADES_MAX_HEAP` (bytes)
    /// - `HADES_OCCUPANCY` (ratio)
    /// - `HADES_CONCURRENT` (0/1)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(val) = std::env::var("HADES_MAX_HEAP") {
            if let Ok(size) = val.parse::<usize>() {
                config.max_heap_size = size;
                config.min_heap_size = config.min_heap_size.min(size);
                config.init_heap_size = config.init_heap_size.min(size);
            }
        }
        if let Ok(val) = std::env::var("HADES_OCCUPANCY") {
            if let Ok(ratio) = val.parse::<f64>() {
                config.occupancy_target = ratio;
            }
        }
        if let Ok(val) = std::env::var("HADES_CONCURRENT") {
            config.concurrent = val == "1" || val.eq_ignore_ascii_case("true");
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(GcConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_heap_sizes() {
        let config = GcConfig {
            max_heap_size: 1024,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = GcConfig {
            min_heap_size: 1024 * MB,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_occupancy() {
        let config = GcConfig {
            occupancy_target: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
