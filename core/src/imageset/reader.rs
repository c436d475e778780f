use std::path::Path;

use crate::prelude::ReduceResult;
use crate::sweep::FrameHeader;

use super::model::{BeamModel, DetectorModel};

/// Boundary to the image-format layer. Header decoding stays outside this
/// crate; the cache only consumes the decoded values.
pub trait ImageReader: Send + Sync {
    /// Read the per-frame header of one image file.
    fn read_header(&self, path: &Path) -> ReduceResult<FrameHeader>;

    /// Read the instrument models recorded alongside the frame data.
    fn read_models(&self, path: &Path) -> ReduceResult<(BeamModel, DetectorModel)>;
}
