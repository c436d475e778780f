use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::driver::{PlainDialect, ProcessDriver};
use crate::prelude::{ReduceError, ReduceResult};
use crate::telemetry::LogManager;

/// Wrapper for the autoindexing program.
///
/// Known-symmetry cell and space group are independent optional
/// constraints; either or both may be set. The wrapper derives its
/// experiment and reflection output names from the invocation id and
/// exposes them so later jobs can chain on the files without re-deriving
/// paths.
pub struct Indexer {
    driver: ProcessDriver,
    dialect: PlainDialect,
    logger: LogManager,
    sweep_filenames: Vec<PathBuf>,
    spot_filenames: Vec<PathBuf>,
    unit_cell: Option<[f64; 6]>,
    space_group: Option<String>,
    indexing_method: String,
    nproc: Option<usize>,
    reflections_per_degree: Option<usize>,
    min_cell: Option<f64>,
    max_cell: Option<f64>,
    detector_fix: Option<String>,
    beam_fix: Option<String>,
    experiments_filename: Option<PathBuf>,
    reflections_filename: Option<PathBuf>,
    results: Option<IndexingResults>,
}

#[derive(Debug, Clone, PartialEq)]
struct IndexingResults {
    triclinic_cell: [f64; 6],
    reflection_count: usize,
    rmsds: (f64, f64, f64),
}

impl Indexer {
    pub fn new() -> Self {
        Self {
            driver: ProcessDriver::new("dials.index"),
            dialect: PlainDialect,
            logger: LogManager::new(),
            sweep_filenames: Vec::new(),
            spot_filenames: Vec::new(),
            unit_cell: None,
            space_group: None,
            indexing_method: "fft3d".to_string(),
            nproc: None,
            reflections_per_degree: None,
            min_cell: None,
            max_cell: None,
            detector_fix: None,
            beam_fix: None,
            experiments_filename: None,
            reflections_filename: None,
            results: None,
        }
    }

    pub fn set_working_directory(&mut self, directory: &Path) -> ReduceResult<()> {
        self.driver.set_working_directory(directory)
    }

    pub fn add_sweep_filename(&mut self, path: impl Into<PathBuf>) {
        self.sweep_filenames.push(path.into());
    }

    pub fn add_spot_filename(&mut self, path: impl Into<PathBuf>) {
        self.spot_filenames.push(path.into());
    }

    /// Constrain indexing to a known unit cell; exactly six values.
    pub fn set_unit_cell(&mut self, cell: &[f64]) -> ReduceResult<()> {
        let cell: [f64; 6] = cell.try_into().map_err(|_| {
            ReduceError::Configuration("unit cell must be exactly six values".to_string())
        })?;
        self.unit_cell = Some(cell);
        Ok(())
    }

    /// Constrain indexing to a known space group, independently of the cell.
    pub fn set_space_group(&mut self, space_group: &str) {
        self.space_group = Some(space_group.to_string());
    }

    pub fn set_indexing_method(&mut self, method: &str) {
        self.indexing_method = method.to_string();
    }

    pub fn set_nproc(&mut self, nproc: usize) {
        self.nproc = Some(nproc);
    }

    pub fn set_reflections_per_degree(&mut self, count: usize) {
        self.reflections_per_degree = Some(count);
    }

    pub fn set_min_cell(&mut self, min_cell: f64) {
        self.min_cell = Some(min_cell);
    }

    pub fn set_max_cell(&mut self, max_cell: f64) {
        self.max_cell = Some(max_cell);
    }

    pub fn set_detector_fix(&mut self, fix: &str) {
        self.detector_fix = Some(fix.to_string());
    }

    pub fn set_beam_fix(&mut self, fix: &str) {
        self.beam_fix = Some(fix.to_string());
    }

    /// Run the indexing job and parse its results.
    pub fn index(&mut self) -> ReduceResult<()> {
        if self.sweep_filenames.is_empty() {
            return Err(ReduceError::Configuration(
                "no sweep files to index".to_string(),
            ));
        }
        self.logger.record_task("autoindexing the configured sweeps");

        self.driver.clear_command_line()?;
        for path in self.sweep_filenames.clone() {
            self.driver.add_command_line(path.display().to_string())?;
        }
        for path in self.spot_filenames.clone() {
            self.driver.add_command_line(path.display().to_string())?;
        }
        self.driver
            .add_command_line(format!("indexing.method={}", self.indexing_method))?;
        if let Some(nproc) = self.nproc {
            self.driver
                .add_command_line(format!("indexing.nproc={nproc}"))?;
        }
        if let Some(count) = self.reflections_per_degree {
            self.driver
                .add_command_line(format!("reflections_per_degree={count}"))?;
        }
        if let Some(min_cell) = self.min_cell {
            self.driver
                .add_command_line(format!("min_cell={min_cell}"))?;
        }
        if let Some(max_cell) = self.max_cell {
            self.driver
                .add_command_line(format!("max_cell={max_cell}"))?;
        }
        if let Some(space_group) = &self.space_group {
            self.driver
                .add_command_line(format!("known_symmetry.space_group={space_group}"))?;
        }
        if let Some(cell) = self.unit_cell {
            self.driver.add_command_line(format!(
                "known_symmetry.unit_cell=\"{},{},{},{},{},{}\"",
                cell[0], cell[1], cell[2], cell[3], cell[4], cell[5]
            ))?;
        }
        if let Some(fix) = &self.detector_fix {
            self.driver
                .add_command_line(format!("detector.fix={fix}"))?;
        }
        if let Some(fix) = &self.beam_fix {
            self.driver.add_command_line(format!("beam.fix={fix}"))?;
        }

        let pid = self.driver.process_id();
        let working = self.driver.working_directory().to_path_buf();
        let experiments = working.join(format!("{pid}_experiments.json"));
        let reflections = working.join(format!("{pid}_indexed.refl"));
        self.driver
            .add_command_line(format!("output.experiments={}", experiments.display()))?;
        self.driver
            .add_command_line(format!("output.reflections={}", reflections.display()))?;
        self.driver
            .declare_output_file("experiments", experiments.clone())?;
        self.driver
            .declare_output_file("reflections", reflections.clone())?;

        self.driver.run(&self.dialect)?;

        let experiments_text = fs::read_to_string(&experiments)?;
        let triclinic_cell = parse_experiments_cell(&experiments_text)?;
        let (reflection_count, rmsds) = parse_refinement_summary(self.driver.stdout())?;

        self.driver.mark_parsed()?;
        self.experiments_filename = Some(experiments);
        self.reflections_filename = Some(reflections);
        self.results = Some(IndexingResults {
            triclinic_cell,
            reflection_count,
            rmsds,
        });
        Ok(())
    }

    fn results(&self) -> ReduceResult<&IndexingResults> {
        self.driver.ensure_parsed()?;
        self.results
            .as_ref()
            .ok_or_else(|| ReduceError::State("indexing results missing".to_string()))
    }

    /// Cell parameters of the symmetry-free solution.
    pub fn triclinic_cell(&self) -> ReduceResult<[f64; 6]> {
        Ok(self.results()?.triclinic_cell)
    }

    pub fn reflection_count_and_rmsds(&self) -> ReduceResult<(usize, (f64, f64, f64))> {
        let results = self.results()?;
        Ok((results.reflection_count, results.rmsds))
    }

    /// Derived experiment-geometry path, for chaining into later jobs.
    pub fn experiments_filename(&self) -> Option<&Path> {
        self.experiments_filename.as_deref()
    }

    /// Derived reflection-table path; the file is an opaque artifact read
    /// only by the tool family itself.
    pub fn reflections_filename(&self) -> Option<&Path> {
        self.reflections_filename.as_deref()
    }
}

impl Default for Indexer {
    fn default() -> Self {
        Self::new()
    }
}

fn vector_norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

fn vector_angle_deg(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dot = a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
    (dot / (vector_norm(a) * vector_norm(b))).acos().to_degrees()
}

fn real_space_vector(crystal: &serde_json::Value, axis: &str) -> ReduceResult<[f64; 3]> {
    let values: Vec<f64> = crystal
        .get(axis)
        .and_then(|value| value.as_array())
        .map(|array| array.iter().filter_map(|v| v.as_f64()).collect())
        .ok_or_else(|| ReduceError::OutputParse(format!("experiments file lacks {axis}")))?;
    values
        .try_into()
        .map_err(|_| ReduceError::OutputParse(format!("{axis} must carry three components")))
}

/// Read the unit cell of the first crystal out of the experiments file:
/// lengths from the real-space vectors, angles between them.
fn parse_experiments_cell(text: &str) -> ReduceResult<[f64; 6]> {
    let document: serde_json::Value = serde_json::from_str(text)
        .map_err(|error| ReduceError::OutputParse(format!("experiments file: {error}")))?;
    let crystal = document
        .get("crystal")
        .and_then(|value| value.as_array())
        .and_then(|array| array.first())
        .ok_or_else(|| {
            ReduceError::OutputParse("experiments file carries no crystal".to_string())
        })?;

    let a = real_space_vector(crystal, "real_space_a")?;
    let b = real_space_vector(crystal, "real_space_b")?;
    let c = real_space_vector(crystal, "real_space_c")?;

    Ok([
        vector_norm(a),
        vector_norm(b),
        vector_norm(c),
        vector_angle_deg(b, c),
        vector_angle_deg(a, c),
        vector_angle_deg(a, b),
    ])
}

/// Pull the refined reflection count and positional RMSDs out of the
/// tool's stdout summary table.
fn parse_refinement_summary(stdout: &str) -> ReduceResult<(usize, (f64, f64, f64))> {
    let row = Regex::new(
        r"\|\s*\d+\s*\|\s*(\d+)\s*\|\s*([0-9.]+)\s*\|\s*([0-9.]+)\s*\|\s*([0-9.]+)\s*\|",
    )
    .unwrap();

    let mut in_summary = false;
    for line in stdout.lines() {
        if line.contains("RMSDs by experiment") {
            in_summary = true;
            continue;
        }
        if !in_summary {
            continue;
        }
        if let Some(captures) = row.captures(line) {
            let count = captures[1]
                .parse()
                .map_err(|_| ReduceError::OutputParse("bad reflection count".to_string()))?;
            let parse_rmsd = |i: usize| -> ReduceResult<f64> {
                captures[i]
                    .parse()
                    .map_err(|_| ReduceError::OutputParse("bad rmsd value".to_string()))
            };
            return Ok((count, (parse_rmsd(2)?, parse_rmsd(3)?, parse_rmsd(4)?)));
        }
    }
    Err(ReduceError::OutputParse(
        "no refinement summary in output".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_cell_must_carry_six_values() {
        let mut indexer = Indexer::new();
        assert!(matches!(
            indexer.set_unit_cell(&[78.0, 78.0, 37.0]),
            Err(ReduceError::Configuration(_))
        ));
        assert!(indexer
            .set_unit_cell(&[78.0, 78.0, 37.0, 90.0, 90.0, 90.0])
            .is_ok());
    }

    #[test]
    fn cell_is_derived_from_real_space_vectors() {
        let text = r#"{
            "crystal": [{
                "real_space_a": [10.0, 0.0, 0.0],
                "real_space_b": [0.0, 20.0, 0.0],
                "real_space_c": [0.0, 0.0, 30.0]
            }]
        }"#;
        let cell = parse_experiments_cell(text).unwrap();
        assert!((cell[0] - 10.0).abs() < 1e-9);
        assert!((cell[1] - 20.0).abs() < 1e-9);
        assert!((cell[2] - 30.0).abs() < 1e-9);
        for angle in &cell[3..6] {
            assert!((angle - 90.0).abs() < 1e-9);
        }
    }

    #[test]
    fn missing_crystal_is_a_parse_error() {
        assert!(matches!(
            parse_experiments_cell(r#"{"beam": []}"#),
            Err(ReduceError::OutputParse(_))
        ));
    }

    #[test]
    fn refinement_summary_is_read_from_stdout() {
        let stdout = "\
Summary of RMSDs by experiment:
+-------+--------+----------+----------+------------+
|   Exp |   Nref |   RMSD_X |   RMSD_Y |     RMSD_Z |
+-------+--------+----------+----------+------------+
|     0 |   5467 |  0.45121 |  0.38972 |    0.21340 |
+-------+--------+----------+----------+------------+
";
        let (count, rmsds) = parse_refinement_summary(stdout).unwrap();
        assert_eq!(count, 5467);
        assert!((rmsds.0 - 0.45121).abs() < 1e-9);
        assert!((rmsds.2 - 0.2134).abs() < 1e-9);
    }

    #[test]
    fn missing_summary_is_a_parse_error() {
        assert!(matches!(
            parse_refinement_summary("no table here"),
            Err(ReduceError::OutputParse(_))
        ));
    }

    #[test]
    fn indexing_without_sweeps_is_a_configuration_error() {
        let mut indexer = Indexer::new();
        assert!(matches!(
            indexer.index(),
            Err(ReduceError::Configuration(_))
        ));
    }

    #[test]
    fn results_before_indexing_are_a_state_error() {
        let indexer = Indexer::new();
        assert!(matches!(
            indexer.triclinic_cell(),
            Err(ReduceError::State(_))
        ));
    }
}
