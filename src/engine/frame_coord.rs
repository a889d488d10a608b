use crate::foundation::ids::SegmentId;
use crate::foundation::time::TimeValue;

/// Identifies one frame of one channel within one segment: *what* to compute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct FrameCoord {
    /// Segment of the low-level model holding the execution plan.
    pub segment: SegmentId,
    /// Output channel of the exit point.
    pub channel: u32,
    /// Nominal (timeline) time of the frame.
    pub nominal_time: TimeValue,
}

impl FrameCoord {
    /// Build a coordinate.
    pub fn new(segment: SegmentId, channel: u32, nominal_time: TimeValue) -> Self {
        Self {
            segment,
            channel,
            nominal_time,
        }
    }

    /// Same frame, different channel.
    pub fn with_channel(self, channel: u32) -> Self {
        Self { channel, ..self }
    }
}
