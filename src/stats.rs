//! Progress values returned by each pass. They are owned by the driver and
//! only ever updated from the driver's thread.

/// Statistics collected during pass 1 (harvest + stream-write)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HarvestStats {
    pub pages_fetched: u64,
    pub revisions_written: u64,
    pub revisions_dropped: u64,
}

impl HarvestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_page(&mut self, written: u64, dropped: u64) {
        self.pages_fetched += 1;
        self.revisions_written += written;
        self.revisions_dropped += dropped;
    }

    /// Revisions seen on the wire, kept or not
    pub fn revisions_seen(&self) -> u64 {
        self.revisions_written + self.revisions_dropped
    }
}

/// Statistics collected during pass 2 (chunked read + parallel clean)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanStats {
    pub chunks_processed: u64,
    pub revisions_cleaned: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl CleanStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&mut self, revisions: u64, bytes_in: u64, bytes_out: u64) {
        self.chunks_processed += 1;
        self.revisions_cleaned += revisions;
        self.bytes_in += bytes_in;
        self.bytes_out += bytes_out;
    }

    /// Cleaned size relative to raw size, 0.0 when nothing was read
    pub fn reduction_ratio(&self) -> f64 {
        if self.bytes_in == 0 {
            0.0
        } else {
            self.bytes_out as f64 / self.bytes_in as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_zero() {
        let stats = HarvestStats::new();
        assert_eq!(stats.pages_fetched, 0);
        assert_eq!(stats.revisions_written, 0);
        assert_eq!(stats.revisions_dropped, 0);
        assert_eq!(CleanStats::new().revisions_cleaned, 0);
    }

    #[test]
    fn record_page_accumulates() {
        let mut stats = HarvestStats::new();
        stats.record_page(50, 0);
        stats.record_page(12, 3);
        assert_eq!(stats.pages_fetched, 2);
        assert_eq!(stats.revisions_written, 62);
        assert_eq!(stats.revisions_dropped, 3);
        assert_eq!(stats.revisions_seen(), 65);
    }

    #[test]
    fn record_chunk_accumulates() {
        let mut stats = CleanStats::new();
        stats.record_chunk(100, 4000, 1000);
        stats.record_chunk(7, 0, 0);
        assert_eq!(stats.chunks_processed, 2);
        assert_eq!(stats.revisions_cleaned, 107);
        assert!((stats.reduction_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn reduction_ratio_empty() {
        assert_eq!(CleanStats::new().reduction_ratio(), 0.0);
    }
}
