/// Identity of one segment of the low-level model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct SegmentId(pub u32);

/// Index of a [`JobTicket`](crate::JobTicket) within its segment's ticket arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct TicketId(pub u32);

impl TicketId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Tag grouping jobs of one play/render process; `0` is always enabled.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ManifestationId(pub u32);

impl ManifestationId {
    /// The implicitly enabled manifestation.
    pub const ALWAYS: Self = Self(0);
}

/// Scheduler slot of a submitted job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct JobHandle(pub u64);
