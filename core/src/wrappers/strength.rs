use std::fs;
use std::path::{Path, PathBuf};

use crate::driver::{PlainDialect, ProcessDriver};
use crate::naming;
use crate::prelude::{ReduceError, ReduceResult};
use crate::telemetry::LogManager;

/// One autoindexing candidate from the screening tool's solutions table,
/// ordered by solution number. Solution 1 is the symmetry-free triclinic
/// setting.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexingSolution {
    pub number: usize,
    pub metric_fit: f64,
    pub rmsd: f64,
    pub spots: usize,
    pub crystal_system: String,
    pub lattice: String,
    pub cell: [f64; 6],
    pub unit_cell_volume: f64,
    pub mosaicity: f64,
}

/// Wrapper for the diffraction-strength screening tool.
///
/// Configured from one example image; the images actually indexed are
/// named frame by frame. The tool reads its preferences from a file in the
/// working directory, which is how the beam-centre override and the
/// beam-refinement switch travel.
pub struct StrengthEstimator {
    driver: ProcessDriver,
    dialect: PlainDialect,
    logger: LogManager,
    template: Option<String>,
    directory: Option<PathBuf>,
    images: Vec<usize>,
    beam: Option<(f64, f64)>,
    refine_beam: bool,
    solutions: Option<Vec<IndexingSolution>>,
}

impl StrengthEstimator {
    pub fn new() -> Self {
        Self {
            driver: ProcessDriver::new("labelit.screen"),
            dialect: PlainDialect,
            logger: LogManager::new(),
            template: None,
            directory: None,
            images: Vec::new(),
            beam: None,
            refine_beam: true,
            solutions: None,
        }
    }

    pub fn set_working_directory(&mut self, directory: &Path) -> ReduceResult<()> {
        self.driver.set_working_directory(directory)
    }

    /// Configure template and directory from one example image path.
    pub fn setup_from_image(&mut self, image: &Path) -> ReduceResult<()> {
        let (template, directory) = naming::filename_to_template_directory(image)?;
        self.template = Some(template);
        self.directory = Some(directory);
        Ok(())
    }

    /// Add one frame to the wedge handed to the indexer.
    pub fn add_indexer_image_wedge(&mut self, image: usize) {
        self.images.push(image);
    }

    /// Override the beam centre recorded in the image headers, in mm.
    pub fn set_beam(&mut self, beam: (f64, f64)) {
        self.beam = Some(beam);
    }

    /// Allow or forbid refinement of the beam centre during indexing.
    pub fn set_refine_beam(&mut self, refine_beam: bool) {
        self.refine_beam = refine_beam;
    }

    fn preference_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some((x, y)) = self.beam {
            lines.push(format!("autoindex_override_beam=({x:.2},{y:.2})"));
        }
        if !self.refine_beam {
            lines.push("beam_search_scope=0.0".to_string());
        }
        lines
    }

    /// Run the screening tool over the configured image wedge.
    pub fn index(&mut self) -> ReduceResult<()> {
        let template = self
            .template
            .clone()
            .ok_or_else(|| ReduceError::Configuration("no image template".to_string()))?;
        let directory = self
            .directory
            .clone()
            .ok_or_else(|| ReduceError::Configuration("no image directory".to_string()))?;
        if self.images.is_empty() {
            return Err(ReduceError::Configuration(
                "no images in the indexer wedge".to_string(),
            ));
        }

        self.logger
            .record_task(&format!("screening {template} for diffraction strength"));

        let preferences = self.preference_lines();
        if !preferences.is_empty() {
            let path = self
                .driver
                .working_directory()
                .join("dataset_preferences.py");
            fs::write(path, preferences.join("\n") + "\n")?;
        }

        for image in self.images.clone() {
            let path = naming::template_and_index_to_filename(&template, &directory, image)?;
            self.driver.add_command_line(path.display().to_string())?;
        }

        self.driver.run(&self.dialect)?;

        let solutions = parse_solutions(self.driver.stdout())?;
        self.driver.mark_parsed()?;
        self.solutions = Some(solutions);
        Ok(())
    }

    /// All candidate solutions, ordered by solution number ascending.
    pub fn solutions(&self) -> ReduceResult<&[IndexingSolution]> {
        self.driver.ensure_parsed()?;
        self.solutions
            .as_deref()
            .ok_or_else(|| ReduceError::State("solutions missing".to_string()))
    }

    /// The symmetry-free solution. The tool's convention of listing it as
    /// solution 1 is checked here, not assumed: a first solution on any
    /// other lattice is a parse error.
    pub fn triclinic_solution(&self) -> ReduceResult<&IndexingSolution> {
        let solutions = self.solutions()?;
        let first = solutions
            .first()
            .ok_or_else(|| ReduceError::OutputParse("no indexing solutions".to_string()))?;
        if first.lattice != "aP" {
            return Err(ReduceError::OutputParse(format!(
                "lowest-numbered solution is {} rather than triclinic",
                first.lattice
            )));
        }
        Ok(first)
    }
}

impl Default for StrengthEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the solutions table and the mosaicity estimate out of the tool's
/// stdout.
///
/// Table rows look like
/// `:)  9  0.2680 dg 0.061  45  tetragonal tP  57.80 57.80 150.00 90 90 90  501135`
/// with an optional smiley/frowny marker in front; the global mosaicity is
/// reported separately and applied to every solution.
fn parse_solutions(stdout: &str) -> ReduceResult<Vec<IndexingSolution>> {
    let mut solutions = Vec::new();
    let mut mosaicity = 0.0;

    for line in stdout.lines() {
        let trimmed = line.trim();
        if let Some(value) = trimmed.strip_prefix("Mosaicity:") {
            mosaicity = value
                .trim()
                .trim_end_matches("deg")
                .trim()
                .parse()
                .map_err(|_| ReduceError::OutputParse("bad mosaicity value".to_string()))?;
            continue;
        }

        let stripped = trimmed
            .trim_start_matches(":)")
            .trim_start_matches(";(")
            .trim_start();
        let tokens: Vec<&str> = stripped.split_whitespace().collect();
        if tokens.len() != 14 || tokens[2] != "dg" {
            continue;
        }
        let Ok(number) = tokens[0].parse::<usize>() else {
            continue;
        };

        let numeric = |token: &str| -> ReduceResult<f64> {
            token
                .parse()
                .map_err(|_| ReduceError::OutputParse(format!("bad solution field {token}")))
        };
        let mut cell = [0.0; 6];
        for (slot, &token) in cell.iter_mut().zip(&tokens[7..13]) {
            *slot = numeric(token)?;
        }

        solutions.push(IndexingSolution {
            number,
            metric_fit: numeric(tokens[1])?,
            rmsd: numeric(tokens[3])?,
            spots: tokens[4]
                .parse()
                .map_err(|_| ReduceError::OutputParse("bad spot count".to_string()))?,
            crystal_system: tokens[5].to_string(),
            lattice: tokens[6].to_string(),
            cell,
            unit_cell_volume: numeric(tokens[13])?,
            mosaicity: 0.0,
        });
    }

    if solutions.is_empty() {
        return Err(ReduceError::OutputParse(
            "no indexing solutions in output".to_string(),
        ));
    }
    solutions.sort_by_key(|solution| solution.number);
    for solution in &mut solutions {
        solution.mosaicity = mosaicity;
    }
    Ok(solutions)
}
