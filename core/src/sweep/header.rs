use serde::{Deserialize, Serialize};

/// Per-frame metadata read once from a detector image header.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub index: usize,
    pub wavelength: f64,
    pub distance: f64,
    pub phi_start: f64,
    pub phi_end: f64,
    pub epoch: f64,
}

impl FrameHeader {
    pub fn new(
        index: usize,
        wavelength: f64,
        distance: f64,
        phi_start: f64,
        phi_end: f64,
        epoch: f64,
    ) -> Self {
        Self {
            index,
            wavelength,
            distance,
            phi_start,
            phi_end,
            epoch,
        }
    }
}
