pub mod correction_init;
pub mod distl_stats;
pub mod indexer;
pub mod pointgroup;
pub mod strength;

pub use correction_init::CorrectionInit;
pub use distl_stats::{DistlStats, SpotStatistics};
pub use indexer::Indexer;
pub use pointgroup::Pointgroup;
pub use strength::{IndexingSolution, StrengthEstimator};
