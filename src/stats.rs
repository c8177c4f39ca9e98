//! Collection Statistics
//!
//! Per-collection sections tracking sizes before and after, swept bytes,
//! and wall time, plus crate-wide cumulative counters. Finished sections
//! become serializable analytics events handed to the host's callback.

use std::time::Instant;

use serde::Serialize;

/// Statistics for one collection (young or old). Created when the
/// collection starts and turned into an event when it is submitted.
pub struct CollectionStats {
    pub kind: &'static str,
    pub cause: String,
    start: Instant,
    end: Option<Instant>,
    pub before_allocated: u64,
    pub before_external: u64,
    pub before_footprint: u64,
    pub after_footprint: u64,
    pub swept_bytes: u64,
    pub swept_external_bytes: u64,
    pub collected_cells: u64,
    tags: Vec<&'static str>,
}

impl CollectionStats {
    pub fn new(kind: &'static str, cause: &str) -> Self {
        CollectionStats {
            kind,
            cause: cause.to_string(),
            start: Instant::now(),
            end: None,
            before_allocated: 0,
            before_external: 0,
            before_footprint: 0,
            after_footprint: 0,
            swept_bytes: 0,
            swept_external_bytes: 0,
            collected_cells: 0,
            tags: Vec::new(),
        }
    }

    pub fn set_before(&mut self, allocated: u64, external: u64, footprint: u64) {
        self.before_allocated = allocated;
        self.before_external = external;
        self.before_footprint = footprint;
    }

    /// Tag the collection with the path it took ("promotion", "compact").
    pub fn add_tag(&mut self, tag: &'static str) {
        self.tags.push(tag);
    }

    pub fn set_end(&mut self, footprint: u64) {
        self.after_footprint = footprint;
        if self.end.is_none() {
            self.end = Some(Instant::now());
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        let end = self.end.unwrap_or_else(Instant::now);
        end.duration_since(self.start).as_secs_f64() * 1e3
    }

    pub fn into_event(self) -> GcAnalyticsEvent {
        let duration_ms = self.elapsed_ms();
        GcAnalyticsEvent {
            kind: self.kind,
            cause: self.cause,
            duration_ms,
            before_allocated: self.before_allocated,
            before_external: self.before_external,
            before_footprint: self.before_footprint,
            after_footprint: self.after_footprint,
            swept_bytes: self.swept_bytes,
            swept_external_bytes: self.swept_external_bytes,
            collected_cells: self.collected_cells,
            tags: self.tags,
        }
    }
}

/// A finished collection, as reported to the analytics callback.
#[derive(Debug, Clone, Serialize)]
pub struct GcAnalyticsEvent {
    pub kind: &'static str,
    pub cause: String,
    pub duration_ms: f64,
    pub before_allocated: u64,
    pub before_external: u64,
    pub before_footprint: u64,
    pub after_footprint: u64,
    pub swept_bytes: u64,
    pub swept_external_bytes: u64,
    pub collected_cells: u64,
    pub tags: Vec<&'static str>,
}

/// Counters accumulated over the life of the heap.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CumulativeStats {
    pub young_collections: u64,
    pub old_collections: u64,
    pub compactions: u64,
    pub collected_objects: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_into_event() {
        let mut stats = CollectionStats::new("young", "test");
        stats.set_before(1000, 0, 4096);
        stats.swept_bytes = 600;
        stats.collected_cells = 3;
        stats.add_tag("compact");
        stats.set_end(4096);
        let event = stats.into_event();
        assert_eq!(event.kind, "young");
        assert_eq!(event.swept_bytes, 600);
        assert_eq!(event.collected_cells, 3);
        assert!(event.duration_ms >= 0.0);
        // Events serialize for the analytics sink.
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"compact\""));
    }
}
