pub mod classifier;
pub mod header;

pub use classifier::{headers_to_sweeps, sweep_ids, Sweep};
pub use header::FrameHeader;
