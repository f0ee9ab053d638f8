pub mod replay;
pub mod visualization;

pub use replay::{list_frames, replay, ReplayOptions, ReplaySummary};
pub use visualization::{annotate_detections, describe_identity};
