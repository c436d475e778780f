use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::naming;
use crate::prelude::{ReduceError, ReduceResult};
use crate::sweep::Sweep;

/// Beam model shared by every frame of an imageset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamModel {
    /// Beam centre on the detector face, in mm.
    pub centre: (f64, f64),
    pub wavelength: f64,
}

/// Detector model shared by every frame of an imageset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorModel {
    pub kind: String,
    pub pixel_size: (f64, f64),
    pub panels: (usize, usize),
    pub distance: f64,
}

impl DetectorModel {
    /// Geometric compatibility check applied before a reference geometry may
    /// replace this detector: same family, same panel layout, pixel sizes
    /// within tolerance. Distance is excluded; it varies per sweep.
    pub fn is_similar_to(&self, other: &DetectorModel) -> bool {
        const PIXEL_TOLERANCE: f64 = 1e-4;
        self.kind == other.kind
            && self.panels == other.panels
            && (self.pixel_size.0 - other.pixel_size.0).abs() < PIXEL_TOLERANCE
            && (self.pixel_size.1 - other.pixel_size.1).abs() < PIXEL_TOLERANCE
    }
}

/// Fixed beam/detector pair shared by sweeps collected in one instrument
/// session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceGeometry {
    pub beam: BeamModel,
    pub detector: DetectorModel,
}

/// Handle to one contiguous run of frames resolved from a template.
///
/// Beam, detector and sweep metadata are present when headers were read
/// eagerly and absent after a lazy template import.
#[derive(Debug, Clone, PartialEq)]
pub struct Imageset {
    pub template: String,
    pub directory: PathBuf,
    pub images: Vec<usize>,
    pub beam: Option<BeamModel>,
    pub detector: Option<DetectorModel>,
    pub sweep: Option<Sweep>,
}

impl Imageset {
    pub fn image_range(&self) -> Option<(usize, usize)> {
        match (self.images.first(), self.images.last()) {
            (Some(&first), Some(&last)) => Some((first, last)),
            _ => None,
        }
    }

    pub fn contains_range(&self, first: usize, last: usize) -> bool {
        matches!(self.image_range(), Some((lo, hi)) if lo <= first && last <= hi)
    }

    /// Full path of one frame of this imageset.
    pub fn image_path(&self, number: usize) -> ReduceResult<PathBuf> {
        naming::template_and_index_to_filename(&self.template, &self.directory, number)
    }

    /// A copy restricted to the inclusive `[first, last]` frame window, or
    /// `None` when the window is not fully inside this imageset.
    pub fn slice(&self, first: usize, last: usize) -> Option<Imageset> {
        if !self.contains_range(first, last) {
            return None;
        }
        let mut sliced = self.clone();
        sliced.images = self
            .images
            .iter()
            .copied()
            .filter(|&image| first <= image && image <= last)
            .collect();
        if sliced.images.len() == last - first + 1 {
            Some(sliced)
        } else {
            None
        }
    }

    /// Replace beam and detector with a session-wide reference, refusing
    /// geometrically incompatible references rather than silently applying
    /// them.
    pub fn apply_reference_geometry(
        &mut self,
        reference: &ReferenceGeometry,
    ) -> ReduceResult<()> {
        if let Some(detector) = &self.detector {
            if !reference.detector.is_similar_to(detector) {
                return Err(ReduceError::Configuration(format!(
                    "reference detector {} is not similar to imageset detector {}",
                    reference.detector.kind, detector.kind
                )));
            }
        }
        self.beam = Some(reference.beam);
        self.detector = Some(reference.detector.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(kind: &str, pixel: f64) -> DetectorModel {
        DetectorModel {
            kind: kind.to_string(),
            pixel_size: (pixel, pixel),
            panels: (1, 1),
            distance: 190.0,
        }
    }

    fn imageset(images: Vec<usize>) -> Imageset {
        Imageset {
            template: "scan_####.img".to_string(),
            directory: PathBuf::from("/data"),
            images,
            beam: None,
            detector: Some(detector("pilatus", 0.172)),
            sweep: None,
        }
    }

    #[test]
    fn slice_keeps_only_the_window() {
        let sliced = imageset(vec![1, 2, 3, 4, 5]).slice(2, 4).unwrap();
        assert_eq!(sliced.images, vec![2, 3, 4]);
    }

    #[test]
    fn slice_outside_the_range_is_none() {
        assert!(imageset(vec![1, 2, 3]).slice(2, 7).is_none());
    }

    #[test]
    fn compatible_reference_geometry_replaces_models() {
        let reference = ReferenceGeometry {
            beam: BeamModel {
                centre: (105.0, 108.5),
                wavelength: 0.9795,
            },
            detector: detector("pilatus", 0.172),
        };
        let mut set = imageset(vec![1, 2]);
        set.apply_reference_geometry(&reference).unwrap();
        assert_eq!(set.beam, Some(reference.beam));
        assert_eq!(set.detector, Some(reference.detector));
    }

    #[test]
    fn incompatible_reference_geometry_is_rejected() {
        let reference = ReferenceGeometry {
            beam: BeamModel {
                centre: (105.0, 108.5),
                wavelength: 0.9795,
            },
            detector: detector("eiger", 0.075),
        };
        let mut set = imageset(vec![1, 2]);
        assert!(matches!(
            set.apply_reference_geometry(&reference),
            Err(ReduceError::Configuration(_))
        ));
        assert_eq!(set.detector, Some(detector("pilatus", 0.172)));
    }
}
