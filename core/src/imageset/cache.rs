use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::naming;
use crate::prelude::{ReduceError, ReduceResult};
use crate::sweep::{headers_to_sweeps, FrameHeader};

use super::model::{Imageset, ReferenceGeometry};
use super::reader::ImageReader;

/// How the cache resolves image files on first reference for a key.
#[derive(Clone)]
pub enum LoadMode {
    /// Read every frame header eagerly and group frames into sweeps.
    ReadAllHeaders(Arc<dyn ImageReader>),
    /// Import by template only: contiguous discovered index runs become
    /// imagesets, instrument models stay unknown.
    TemplateImport,
}

/// Selection applied when retrieving imagesets for a key.
#[derive(Debug, Clone, Copy)]
pub enum Selection {
    All,
    /// The imageset whose first frame carries this index.
    Single(usize),
    /// An inclusive frame window; must sit inside one imageset, otherwise
    /// nothing usable is returned and callers must pre-partition by sweep.
    Range(usize, usize),
}

type CacheKey = (String, PathBuf);
type CacheEntry = BTreeMap<usize, Imageset>;

/// Process-wide imageset resolution cache.
///
/// Constructed once per process and passed by reference; the first reference
/// for a (template, directory) key resolves the files and populates the
/// entry, later references reuse it. The interior mutex makes first-use
/// population safe if callers ever run concurrently.
pub struct ImagesetCache {
    mode: LoadMode,
    reference_geometry: Option<ReferenceGeometry>,
    inner: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ImagesetCache {
    pub fn new(mode: LoadMode) -> Self {
        Self {
            mode,
            reference_geometry: None,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_reference_geometry(mode: LoadMode, reference: ReferenceGeometry) -> Self {
        Self {
            mode,
            reference_geometry: Some(reference),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Retrieve imagesets for a key, resolving and caching them on first use.
    pub fn get_or_load(
        &self,
        template: &str,
        directory: &Path,
        selection: Selection,
    ) -> ReduceResult<Vec<Imageset>> {
        let key = (template.to_string(), directory.to_path_buf());
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.contains_key(&key) {
            let entry = self.load(template, directory)?;
            inner.insert(key.clone(), entry);
        }
        let entry = &inner[&key];

        match selection {
            Selection::All => Ok(entry.values().cloned().collect()),
            Selection::Single(id_image) => entry
                .get(&id_image)
                .cloned()
                .map(|imageset| vec![imageset])
                .ok_or_else(|| {
                    ReduceError::Configuration(format!(
                        "no imageset of {template} starts at frame {id_image}"
                    ))
                }),
            Selection::Range(first, last) => Ok(entry
                .values()
                .find_map(|imageset| imageset.slice(first, last))
                .map(|imageset| vec![imageset])
                .unwrap_or_default()),
        }
    }

    /// Drop the entry for a key; the next reference resolves it afresh.
    pub fn invalidate(&self, template: &str, directory: &Path) {
        let key = (template.to_string(), directory.to_path_buf());
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.remove(&key);
    }

    /// Re-resolve a key immediately, replacing any cached entry.
    pub fn refresh(&self, template: &str, directory: &Path) -> ReduceResult<()> {
        let entry = self.load(template, directory)?;
        let key = (template.to_string(), directory.to_path_buf());
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.insert(key, entry);
        Ok(())
    }

    fn load(&self, template: &str, directory: &Path) -> ReduceResult<CacheEntry> {
        let images = naming::discover_matching_files(template, directory)?;
        if images.is_empty() {
            return Err(ReduceError::Configuration(format!(
                "no images matching {template} found in {}",
                directory.display()
            )));
        }
        debug!(
            "resolving {} frames for {template} in {}",
            images.len(),
            directory.display()
        );

        let mut imagesets = match &self.mode {
            LoadMode::ReadAllHeaders(reader) => {
                self.load_from_headers(template, directory, &images, reader.as_ref())?
            }
            LoadMode::TemplateImport => contiguous_runs(&images)
                .into_iter()
                .map(|run| Imageset {
                    template: template.to_string(),
                    directory: directory.to_path_buf(),
                    images: run,
                    beam: None,
                    detector: None,
                    sweep: None,
                })
                .collect(),
        };

        if let Some(reference) = &self.reference_geometry {
            for imageset in &mut imagesets {
                imageset.apply_reference_geometry(reference)?;
            }
        }

        let mut entry = CacheEntry::new();
        for imageset in imagesets {
            if let Some(first) = imageset.images.first() {
                entry.insert(*first, imageset);
            }
        }
        Ok(entry)
    }

    fn load_from_headers(
        &self,
        template: &str,
        directory: &Path,
        images: &[usize],
        reader: &dyn ImageReader,
    ) -> ReduceResult<Vec<Imageset>> {
        let mut headers: BTreeMap<usize, FrameHeader> = BTreeMap::new();
        for &image in images {
            let path = naming::template_and_index_to_filename(template, directory, image)?;
            headers.insert(image, reader.read_header(&path)?);
        }

        let first_path =
            naming::template_and_index_to_filename(template, directory, images[0])?;
        let (beam, detector) = reader.read_models(&first_path)?;

        Ok(headers_to_sweeps(&headers)
            .into_iter()
            .map(|sweep| Imageset {
                template: template.to_string(),
                directory: directory.to_path_buf(),
                images: sweep.images.clone(),
                beam: Some(beam),
                detector: Some(detector.clone()),
                sweep: Some(sweep),
            })
            .collect())
    }
}

/// Split an ascending index list into maximal contiguous runs.
fn contiguous_runs(images: &[usize]) -> Vec<Vec<usize>> {
    let mut runs: Vec<Vec<usize>> = Vec::new();
    for &image in images {
        match runs.last_mut() {
            Some(run) if image > 0 && run.last() == Some(&(image - 1)) => run.push(image),
            _ => runs.push(vec![image]),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imageset::model::{BeamModel, DetectorModel};
    use std::fs::File;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SyntheticReader {
        /// Frames at or past this index report a different wavelength.
        wavelength_change_at: usize,
        headers_read: AtomicUsize,
    }

    impl SyntheticReader {
        fn new(wavelength_change_at: usize) -> Self {
            Self {
                wavelength_change_at,
                headers_read: AtomicUsize::new(0),
            }
        }
    }

    impl ImageReader for SyntheticReader {
        fn read_header(&self, path: &Path) -> ReduceResult<FrameHeader> {
            self.headers_read.fetch_add(1, Ordering::Relaxed);
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let index = crate::naming::filename_to_index(name)?;
            let wavelength = if index >= self.wavelength_change_at {
                1.0
            } else {
                0.9795
            };
            let phi = index as f64 * 0.5;
            Ok(FrameHeader::new(index, wavelength, 190.0, phi, phi + 0.5, 0.0))
        }

        fn read_models(&self, _path: &Path) -> ReduceResult<(BeamModel, DetectorModel)> {
            Ok((
                BeamModel {
                    centre: (105.0, 108.5),
                    wavelength: 0.9795,
                },
                DetectorModel {
                    kind: "pilatus".to_string(),
                    pixel_size: (0.172, 0.172),
                    panels: (1, 1),
                    distance: 190.0,
                },
            ))
        }
    }

    fn image_directory(indices: &[usize]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for &index in indices {
            File::create(dir.path().join(format!("scan_{index:04}.img"))).unwrap();
        }
        dir
    }

    #[test]
    fn template_import_splits_on_index_gaps() {
        let dir = image_directory(&[1, 2, 3, 7, 8]);
        let cache = ImagesetCache::new(LoadMode::TemplateImport);
        let imagesets = cache
            .get_or_load("scan_####.img", dir.path(), Selection::All)
            .unwrap();
        assert_eq!(imagesets.len(), 2);
        assert_eq!(imagesets[0].images, vec![1, 2, 3]);
        assert_eq!(imagesets[1].images, vec![7, 8]);
        assert!(imagesets[0].beam.is_none());
    }

    #[test]
    fn eager_load_groups_frames_into_sweeps() {
        let dir = image_directory(&[1, 2, 3, 4]);
        let reader = Arc::new(SyntheticReader::new(3));
        let cache = ImagesetCache::new(LoadMode::ReadAllHeaders(reader.clone()));
        let imagesets = cache
            .get_or_load("scan_####.img", dir.path(), Selection::All)
            .unwrap();
        assert_eq!(imagesets.len(), 2);
        assert_eq!(imagesets[0].images, vec![1, 2]);
        assert_eq!(imagesets[1].images, vec![3, 4]);
        assert!(imagesets[0].sweep.is_some());
        assert!(imagesets[0].beam.is_some());
        assert_eq!(reader.headers_read.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn second_reference_reuses_the_cached_entry() {
        let dir = image_directory(&[1, 2]);
        let reader = Arc::new(SyntheticReader::new(usize::MAX));
        let cache = ImagesetCache::new(LoadMode::ReadAllHeaders(reader.clone()));
        for _ in 0..2 {
            cache
                .get_or_load("scan_####.img", dir.path(), Selection::All)
                .unwrap();
        }
        assert_eq!(reader.headers_read.load(Ordering::Relaxed), 2);

        cache.invalidate("scan_####.img", dir.path());
        cache
            .get_or_load("scan_####.img", dir.path(), Selection::All)
            .unwrap();
        assert_eq!(reader.headers_read.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn range_selection_must_sit_inside_one_imageset() {
        let dir = image_directory(&[1, 2, 3, 7, 8]);
        let cache = ImagesetCache::new(LoadMode::TemplateImport);

        let inside = cache
            .get_or_load("scan_####.img", dir.path(), Selection::Range(2, 3))
            .unwrap();
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].images, vec![2, 3]);

        let crossing = cache
            .get_or_load("scan_####.img", dir.path(), Selection::Range(2, 8))
            .unwrap();
        assert!(crossing.is_empty());
    }

    #[test]
    fn single_selection_is_keyed_by_first_frame() {
        let dir = image_directory(&[1, 2, 3, 7, 8]);
        let cache = ImagesetCache::new(LoadMode::TemplateImport);

        let found = cache
            .get_or_load("scan_####.img", dir.path(), Selection::Single(7))
            .unwrap();
        assert_eq!(found[0].images, vec![7, 8]);

        assert!(matches!(
            cache.get_or_load("scan_####.img", dir.path(), Selection::Single(2)),
            Err(ReduceError::Configuration(_))
        ));
    }

    #[test]
    fn incompatible_reference_geometry_fails_the_load() {
        let dir = image_directory(&[1, 2]);
        let reader = Arc::new(SyntheticReader::new(usize::MAX));
        let reference = ReferenceGeometry {
            beam: BeamModel {
                centre: (0.0, 0.0),
                wavelength: 1.0,
            },
            detector: DetectorModel {
                kind: "eiger".to_string(),
                pixel_size: (0.075, 0.075),
                panels: (1, 1),
                distance: 150.0,
            },
        };
        let cache =
            ImagesetCache::with_reference_geometry(LoadMode::ReadAllHeaders(reader), reference);
        assert!(matches!(
            cache.get_or_load("scan_####.img", dir.path(), Selection::All),
            Err(ReduceError::Configuration(_))
        ));
    }
}
