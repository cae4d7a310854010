//! Map record and parity descriptor (§3): the on-disk bookkeeping that
//! survives across runs and lets the parity columns find their disk.

/// One per data-disk slot in the parity layout. The mapping survives
/// across runs; `slot` is the column group this disk occupies.
#[derive(Debug, Clone)]
pub struct MapEntry {
    pub disk_name: String,
    pub uuid: String,
    pub slot: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
}

/// Per-parity-level descriptor.
#[derive(Debug, Clone)]
pub struct ParityDescriptor {
    pub level: u32,
    pub path: String,
    pub uuid: String,
    pub device_id: u64,
    pub total_blocks: u32,
    pub free_blocks: u32,
    /// Cumulative I/O time spent on this parity file, in milliseconds;
    /// informational only, surfaced by `status`.
    pub io_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_entry_is_plain_data() {
        let m = MapEntry {
            disk_name: "d1".into(),
            uuid: "abcd".into(),
            slot: 0,
            total_blocks: 100,
            free_blocks: 10,
        };
        assert_eq!(m.slot, 0);
    }
}
