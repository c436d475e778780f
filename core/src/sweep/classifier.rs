use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::header::FrameHeader;

/// A maximal run of frames sharing wavelength and distance with contiguous
/// rotation. Built once per scan from a header mapping, immutable after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub images: Vec<usize>,
    pub wavelength: f64,
    pub distance: f64,
    pub phi_start: f64,
    pub phi_end: f64,
    pub collect_start: f64,
    pub collect_end: f64,
}

impl Sweep {
    fn seed(index: usize, header: &FrameHeader) -> Self {
        Self {
            images: vec![index],
            wavelength: header.wavelength,
            distance: header.distance,
            phi_start: header.phi_start,
            phi_end: header.phi_end,
            collect_start: header.epoch,
            collect_end: header.epoch,
        }
    }

    /// Continuity predicate: same wavelength, same distance, and this frame
    /// picks up the rotation exactly where the sweep left off.
    fn follows(&self, header: &FrameHeader) -> bool {
        header.wavelength == self.wavelength
            && header.distance == self.distance
            && header.phi_start == self.phi_end
    }

    fn extend(&mut self, index: usize, header: &FrameHeader) {
        self.images.push(index);
        self.phi_end = header.phi_end;
        self.collect_end = header.epoch;
    }

    pub fn first_image(&self) -> Option<usize> {
        self.images.first().copied()
    }

    pub fn image_range(&self) -> Option<(usize, usize)> {
        match (self.images.first(), self.images.last()) {
            (Some(&first), Some(&last)) => Some((first, last)),
            _ => None,
        }
    }
}

/// Partition a header mapping into sweeps.
///
/// Greedy single pass in ascending frame order: a frame that fails the
/// continuity predicate closes the current sweep and seeds the next one.
/// Frames are never re-examined once committed to a sweep.
pub fn headers_to_sweeps(headers: &BTreeMap<usize, FrameHeader>) -> Vec<Sweep> {
    let mut frames = headers.iter();
    let Some((&first, header)) = frames.next() else {
        return Vec::new();
    };

    let mut sweeps = Vec::new();
    let mut current = Sweep::seed(first, header);
    for (&index, header) in frames {
        if current.follows(header) {
            current.extend(index, header);
        } else {
            sweeps.push(current);
            current = Sweep::seed(index, header);
        }
    }
    sweeps.push(current);
    sweeps
}

/// First image of each sweep, in sweep order.
pub fn sweep_ids(sweeps: &[Sweep]) -> Vec<usize> {
    sweeps.iter().filter_map(Sweep::first_image).collect()
}
