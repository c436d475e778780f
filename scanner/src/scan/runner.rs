use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;

use reducecore::imageset::{ImagesetCache, Selection};
use reducecore::prelude::{FrameSummary, ReduceResult};
use reducecore::telemetry::{MetricsRecorder, MetricsSnapshot};
use reducecore::wrappers::{DistlStats, StrengthEstimator};

use super::config::ScanConfig;

/// Per-frame analysis boundary. The production implementation drives the
/// external toolchain; tests substitute stubs.
pub trait FrameAnalyzer {
    fn analyze(&mut self, image: &Path, index: usize) -> ReduceResult<FrameSummary>;
}

/// Analyzer backed by the strength-screening and spot-statistics tools.
/// Each frame gets fresh wrapper instances, so a failed invocation leaves
/// nothing behind for the next frame; invocation ids keep the shared
/// working directory collision-free.
pub struct ToolchainAnalyzer {
    beam: Option<(f64, f64)>,
    working_directory: PathBuf,
    metrics: MetricsRecorder,
}

impl ToolchainAnalyzer {
    pub fn new(config: &ScanConfig, working_directory: PathBuf) -> Self {
        Self {
            beam: config.beam,
            working_directory,
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl FrameAnalyzer for ToolchainAnalyzer {
    fn analyze(&mut self, image: &Path, index: usize) -> ReduceResult<FrameSummary> {
        let mut estimator = StrengthEstimator::new();
        estimator.set_working_directory(&self.working_directory)?;
        estimator.setup_from_image(image)?;
        estimator.add_indexer_image_wedge(index);
        if let Some(beam) = self.beam {
            estimator.set_beam(beam);
        }
        estimator.set_refine_beam(false);
        self.metrics.record_invocation();
        estimator.index()?;
        let solution = estimator.triclinic_solution()?;

        let mut stats = DistlStats::new();
        stats.set_working_directory(&self.working_directory)?;
        self.metrics.record_invocation();
        stats.stats_distl()?;
        let spot_stats = stats.statistics_for(image)?;

        Ok(FrameSummary {
            unit_cell_volume: solution.unit_cell_volume,
            mosaicity: solution.mosaicity,
            spots_good: spot_stats.spots_good,
            spots_total: spot_stats.spots_total,
            resolution_one: spot_stats.resolution_one,
            resolution_two: spot_stats.resolution_two,
            saturation: spot_stats.saturation,
        })
    }
}

/// Result of analysing one frame. Failures stay per-frame; the report step
/// decides what a failed row becomes.
pub struct FrameOutcome {
    pub index: usize,
    pub result: ReduceResult<FrameSummary>,
}

/// The batch scan loop: iterate discovered frames in ascending order,
/// analyse each one inside the scan window, and never let one bad frame
/// abort the batch.
pub struct ScanRunner {
    config: ScanConfig,
    metrics: MetricsRecorder,
}

impl ScanRunner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            metrics: MetricsRecorder::new(),
        }
    }

    /// Run the scan, writing one progress character per frame (`.` skipped,
    /// `o` processed) followed by a newline.
    pub fn execute<A: FrameAnalyzer, W: Write>(
        &self,
        cache: &ImagesetCache,
        analyzer: &mut A,
        progress: &mut W,
    ) -> ReduceResult<Vec<FrameOutcome>> {
        let imagesets =
            cache.get_or_load(&self.config.template, &self.config.directory, Selection::All)?;

        let mut outcomes = Vec::new();
        for imageset in &imagesets {
            for &index in &imageset.images {
                if !self.config.in_window(index) {
                    write!(progress, ".")?;
                    progress.flush()?;
                    continue;
                }
                write!(progress, "o")?;
                progress.flush()?;

                let image = imageset.image_path(index)?;
                let result = analyzer.analyze(&image, index);
                self.metrics.record_frame();
                if let Err(error) = &result {
                    self.metrics.record_failed_frame();
                    warn!("frame {index} failed: {error}");
                }
                outcomes.push(FrameOutcome { index, result });
            }
        }
        writeln!(progress)?;
        Ok(outcomes)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reducecore::imageset::LoadMode;
    use reducecore::prelude::ReduceError;
    use std::fs::File;

    /// Stub that fails on a chosen frame and counts its calls.
    struct FlakyAnalyzer {
        fail_at: usize,
        analyzed: Vec<usize>,
    }

    impl FrameAnalyzer for FlakyAnalyzer {
        fn analyze(&mut self, _image: &Path, index: usize) -> ReduceResult<FrameSummary> {
            self.analyzed.push(index);
            if index == self.fail_at {
                return Err(ReduceError::Execution("tool blew up".to_string()));
            }
            Ok(FrameSummary {
                unit_cell_volume: 501135.0,
                spots_total: 100 + index,
                ..FrameSummary::default()
            })
        }
    }

    fn scan_directory(indices: &[usize]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for &index in indices {
            File::create(dir.path().join(format!("scan_{index:04}.img"))).unwrap();
        }
        dir
    }

    fn config_for(dir: &tempfile::TempDir) -> ScanConfig {
        ScanConfig::from_args(
            "scan_####.img".to_string(),
            dir.path().to_path_buf(),
            None,
            None,
            None,
            false,
        )
    }

    #[test]
    fn one_bad_frame_never_aborts_the_batch() {
        let dir = scan_directory(&[4, 5, 6]);
        let cache = ImagesetCache::new(LoadMode::TemplateImport);
        let runner = ScanRunner::new(config_for(&dir));
        let mut analyzer = FlakyAnalyzer {
            fail_at: 5,
            analyzed: Vec::new(),
        };
        let mut progress = Vec::new();

        let outcomes = runner
            .execute(&cache, &mut analyzer, &mut progress)
            .unwrap();

        assert_eq!(analyzer.analyzed, vec![4, 5, 6]);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_err());
        assert!(outcomes[2].result.is_ok());

        let metrics = runner.metrics();
        assert_eq!(metrics.frames_processed, 3);
        assert_eq!(metrics.frames_failed, 1);
    }

    #[test]
    fn frames_outside_the_window_are_skipped_not_summarised() {
        let dir = scan_directory(&[1, 2, 3, 4, 5]);
        let cache = ImagesetCache::new(LoadMode::TemplateImport);
        let mut config = config_for(&dir);
        config.first = Some(2);
        config.last = Some(4);
        let runner = ScanRunner::new(config);
        let mut analyzer = FlakyAnalyzer {
            fail_at: usize::MAX,
            analyzed: Vec::new(),
        };
        let mut progress = Vec::new();

        let outcomes = runner
            .execute(&cache, &mut analyzer, &mut progress)
            .unwrap();

        assert_eq!(analyzer.analyzed, vec![2, 3, 4]);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(String::from_utf8(progress).unwrap(), ".ooo.\n");
    }
}
