//! Engine configuration.

/// The options the reactive core consumes. The embedder fills this from
/// whatever configuration source it uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// OpenFlow table id reserved for reactive rules.
    pub table_id: u8,
    /// Open interval in which all tests and leaves are placed.
    pub priority_range: (u16, u16),
    /// Drop and relearn the trace tree when link discovery signals a
    /// change.
    pub invalidate_on_link_change: bool,
    /// Bytes requested on the implicit table-miss inspect rule.
    pub miss_inspect_bytes: u16,
    /// How many times to rebalance and retry after the priority range
    /// collapses.
    pub max_retries_on_priority_exceeded: u8,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            table_id: 0,
            priority_range: (1, 65534),
            invalidate_on_link_change: true,
            miss_inspect_bytes: 128,
            max_retries_on_priority_exceeded: 1,
        }
    }
}
