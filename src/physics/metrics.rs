//! Per-step statistics.

/// Which implementation ran the last step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Cpu,
    Gpu,
}

/// Statistics of the most recent step.
///
/// `pair_count` and `contact_count` never exceed the configured maxima;
/// the `dropped_*` fields tell how much was truncated to stay within them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepMetrics {
    /// Wall-clock duration of the step in milliseconds.
    pub step_time_ms: f32,
    /// Contacts produced by the narrow phase and ground test.
    pub contact_count: u32,
    /// Candidate pairs produced by the broad phase.
    pub pair_count: u32,
    /// Live (non-removed) bodies.
    pub body_count: u32,
    /// Live bodies that are neither static nor sleeping.
    pub active_body_count: u32,
    /// Live bodies that are sleeping.
    pub sleeping_body_count: u32,
    /// Pairs dropped because the pair list was full.
    pub dropped_pairs: u32,
    /// Contacts dropped because the contact list was full.
    pub dropped_contacts: u32,
    /// Grid entries dropped because a cell or the entry array was full.
    pub dropped_cell_entries: u32,
    /// Deepest penetration seen by the narrow phase.
    pub max_penetration: f32,
    pub backend: BackendKind,
}

impl StepMetrics {
    /// True when any capacity limit truncated work this step.
    pub fn saturated(&self) -> bool {
        self.dropped_pairs > 0 || self.dropped_contacts > 0 || self.dropped_cell_entries > 0
    }
}
