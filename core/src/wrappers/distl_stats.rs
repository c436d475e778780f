use std::collections::BTreeMap;
use std::path::Path;

use crate::driver::{PlainDialect, ProcessDriver};
use crate::prelude::{ReduceError, ReduceResult};
use crate::telemetry::LogManager;

/// Spot statistics reported for one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpotStatistics {
    pub spots_total: usize,
    pub spots_good: usize,
    pub resolution_one: f64,
    pub resolution_two: f64,
    pub saturation: f64,
}

/// Wrapper for the spot-statistics tool.
///
/// The tool reports on every image of the preceding screening run in the
/// same working directory, so it takes no arguments; results are keyed by
/// image filename.
pub struct DistlStats {
    driver: ProcessDriver,
    dialect: PlainDialect,
    logger: LogManager,
    statistics: Option<BTreeMap<String, SpotStatistics>>,
}

impl DistlStats {
    pub fn new() -> Self {
        Self {
            driver: ProcessDriver::new("labelit.stats_distl"),
            dialect: PlainDialect,
            logger: LogManager::new(),
            statistics: None,
        }
    }

    pub fn set_working_directory(&mut self, directory: &Path) -> ReduceResult<()> {
        self.driver.set_working_directory(directory)
    }

    /// Run the statistics tool and parse its per-image report.
    pub fn stats_distl(&mut self) -> ReduceResult<()> {
        self.logger.record_task("extracting spot statistics");
        self.driver.run(&self.dialect)?;
        let statistics = parse_statistics(self.driver.stdout())?;
        self.driver.mark_parsed()?;
        self.statistics = Some(statistics);
        Ok(())
    }

    /// Statistics for one image, looked up by filename.
    pub fn statistics_for(&self, image: &Path) -> ReduceResult<&SpotStatistics> {
        self.driver.ensure_parsed()?;
        let statistics = self
            .statistics
            .as_ref()
            .ok_or_else(|| ReduceError::State("statistics missing".to_string()))?;
        let name = image
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        statistics
            .iter()
            .find(|(reported, _)| reported.ends_with(name))
            .map(|(_, stats)| stats)
            .ok_or_else(|| {
                ReduceError::OutputParse(format!("no statistics reported for {name}"))
            })
    }
}

impl Default for DistlStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the labeled per-image report. A `File :` line opens a block; the
/// labeled fields that follow belong to that image until the next block.
fn parse_statistics(stdout: &str) -> ReduceResult<BTreeMap<String, SpotStatistics>> {
    let mut statistics = BTreeMap::new();
    let mut current: Option<(String, SpotStatistics)> = None;

    for line in stdout.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        let value = value.trim();

        if label == "File" {
            if let Some((name, stats)) = current.take() {
                statistics.insert(name, stats);
            }
            current = Some((value.to_string(), SpotStatistics::default()));
            continue;
        }

        let Some((_, stats)) = current.as_mut() else {
            continue;
        };
        let numeric = |value: &str| -> ReduceResult<f64> {
            value
                .trim_end_matches('%')
                .parse()
                .map_err(|_| ReduceError::OutputParse(format!("bad {label} value {value}")))
        };
        match label {
            "Spot Total" => stats.spots_total = numeric(value)? as usize,
            "Good Bragg Candidates" => stats.spots_good = numeric(value)? as usize,
            "Method 1 Resolution" => stats.resolution_one = numeric(value)?,
            "Method 2 Resolution" => stats.resolution_two = numeric(value)?,
            "Saturation, Top 50 Peaks" => stats.saturation = numeric(value)?,
            _ => {}
        }
    }
    if let Some((name, stats)) = current.take() {
        statistics.insert(name, stats);
    }

    if statistics.is_empty() {
        return Err(ReduceError::OutputParse(
            "no per-image statistics in output".to_string(),
        ));
    }
    Ok(statistics)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISTL_OUTPUT: &str = "\
                     File : /data/xtal/scan_0001.img
               Spot Total : 517
               Remove Ice : 513
      In-Resolution Total : 479
    Good Bragg Candidates : 431
      Method 1 Resolution : 2.29
      Method 2 Resolution : 2.40
        Maximum unit cell : 159.7
 Saturation, Top 50 Peaks : 25.2%

                     File : /data/xtal/scan_0002.img
               Spot Total : 493
    Good Bragg Candidates : 405
      Method 1 Resolution : 2.31
      Method 2 Resolution : 2.44
 Saturation, Top 50 Peaks : 24.8%
";

    #[test]
    fn statistics_are_parsed_per_image() {
        let statistics = parse_statistics(DISTL_OUTPUT).unwrap();
        assert_eq!(statistics.len(), 2);
        let first = &statistics["/data/xtal/scan_0001.img"];
        assert_eq!(first.spots_total, 517);
        assert_eq!(first.spots_good, 431);
        assert!((first.resolution_one - 2.29).abs() < 1e-9);
        assert!((first.resolution_two - 2.40).abs() < 1e-9);
        assert!((first.saturation - 25.2).abs() < 1e-9);
    }

    #[test]
    fn empty_report_is_a_parse_error() {
        assert!(matches!(
            parse_statistics("nothing to report\n"),
            Err(ReduceError::OutputParse(_))
        ));
    }

    #[test]
    fn statistics_before_running_are_a_state_error() {
        let stats = DistlStats::new();
        assert!(matches!(
            stats.statistics_for(Path::new("scan_0001.img")),
            Err(ReduceError::State(_))
        ));
    }
}
