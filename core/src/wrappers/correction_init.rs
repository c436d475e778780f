use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::driver::{ProcessDriver, XdsDialect};
use crate::imageset::Imageset;
use crate::prelude::{ReduceError, ReduceResult};
use crate::telemetry::LogManager;

/// Correction maps staged into the working directory before the run.
const INPUT_DATA_FILES: [&str; 2] = ["X-CORRECTIONS.cbf", "Y-CORRECTIONS.cbf"];

/// Artifacts the init job must produce.
const OUTPUT_DATA_FILES: [&str; 3] = ["BKGINIT.cbf", "BLANK.cbf", "GAIN.cbf"];

/// Wrapper for the correction-map initialisation job.
///
/// Input travels through an `XDS.INP` file assembled in the working
/// directory; the INP and LP files are copied to process-id-prefixed names
/// so repeated runs in one directory keep their audit trail apart.
pub struct CorrectionInit {
    driver: ProcessDriver,
    dialect: XdsDialect,
    logger: LogManager,
    imageset: Option<Imageset>,
    frame_offset: usize,
    data_range: (usize, usize),
    spot_ranges: Vec<(usize, usize)>,
    background_range: (usize, usize),
    fix_scale: bool,
    input_data_files: BTreeMap<String, Vec<u8>>,
    output_data_files: BTreeMap<String, Vec<u8>>,
}

impl CorrectionInit {
    pub fn new() -> Self {
        Self {
            driver: ProcessDriver::new("xds"),
            dialect: XdsDialect::new(),
            logger: LogManager::new(),
            imageset: None,
            frame_offset: 0,
            data_range: (0, 0),
            spot_ranges: Vec::new(),
            background_range: (0, 0),
            fix_scale: false,
            input_data_files: BTreeMap::new(),
            output_data_files: BTreeMap::new(),
        }
    }

    pub fn set_working_directory(&mut self, directory: &Path) -> ReduceResult<()> {
        self.driver.set_working_directory(directory)
    }

    pub fn set_imageset(&mut self, imageset: Imageset) {
        self.imageset = Some(imageset);
    }

    /// Offset subtracted from caller frame numbers before they land in the
    /// INP ranges.
    pub fn set_frame_offset(&mut self, offset: usize) {
        self.frame_offset = offset;
    }

    pub fn set_data_range(&mut self, start: usize, end: usize) {
        self.data_range = (start - self.frame_offset, end - self.frame_offset);
    }

    pub fn add_spot_range(&mut self, start: usize, end: usize) {
        self.spot_ranges
            .push((start - self.frame_offset, end - self.frame_offset));
    }

    pub fn set_background_range(&mut self, start: usize, end: usize) {
        self.background_range = (start - self.frame_offset, end - self.frame_offset);
    }

    pub fn set_fix_scale(&mut self, fix_scale: bool) {
        self.fix_scale = fix_scale;
    }

    /// Stage a correction map to be written into the working directory
    /// before launch. Only the two known map names are accepted.
    pub fn set_input_data_file(&mut self, name: &str, data: Vec<u8>) -> ReduceResult<()> {
        if !INPUT_DATA_FILES.contains(&name) {
            return Err(ReduceError::Configuration(format!(
                "{name} is not a recognised input data file"
            )));
        }
        self.input_data_files.insert(name.to_string(), data);
        Ok(())
    }

    /// Run the init job.
    pub fn run(&mut self) -> ReduceResult<()> {
        let imageset = self
            .imageset
            .as_ref()
            .ok_or_else(|| ReduceError::Configuration("imageset not set".to_string()))?;

        self.logger.record_task("generating initial correction maps");

        let records = init_job_records(
            imageset,
            self.data_range,
            &self.spot_ranges,
            self.background_range,
            self.fix_scale,
        )?;

        let working = self.driver.working_directory().to_path_buf();
        let inp_file = working.join("XDS.INP");
        fs::write(&inp_file, records.join("\n") + "\n")?;
        fs::copy(&inp_file, self.driver.artifact_path("INIT.INP"))?;

        for name in INPUT_DATA_FILES {
            if let Some(data) = self.input_data_files.get(name) {
                fs::write(working.join(name), data)?;
            }
        }

        for name in OUTPUT_DATA_FILES {
            self.driver.declare_output_file(name, working.join(name))?;
        }

        self.driver.run(&self.dialect)?;

        let lp_copy = self.driver.artifact_path("INIT.LP");
        fs::copy(working.join("INIT.LP"), lp_copy).map_err(|error| {
            ReduceError::Execution(format!("init job produced no INIT.LP: {error}"))
        })?;
        Ok(())
    }

    /// Read the produced correction maps into memory; getters become
    /// available afterwards.
    pub fn reload(&mut self) -> ReduceResult<()> {
        self.driver.ensure_completed()?;
        let mut loaded = BTreeMap::new();
        for name in OUTPUT_DATA_FILES {
            let path = self
                .driver
                .output_file(name)
                .ok_or_else(|| ReduceError::State(format!("{name} was never declared")))?;
            loaded.insert(name.to_string(), fs::read(path)?);
        }
        self.driver.mark_parsed()?;
        self.output_data_files = loaded;
        Ok(())
    }

    pub fn output_data_file(&self, name: &str) -> ReduceResult<&[u8]> {
        self.driver.ensure_parsed()?;
        self.output_data_files
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                ReduceError::OutputParse(format!("{name} is not an output data file"))
            })
    }

    /// Path of a collected artifact, for chaining into later jobs.
    pub fn artifact_file(&self, name: &str) -> Option<&Path> {
        self.driver.output_file(name)
    }
}

impl Default for CorrectionInit {
    fn default() -> Self {
        Self::new()
    }
}

/// Spell a template path the way the tool expects: the placeholder run
/// becomes a run of `?`.
fn template_to_question_marks(template: &str) -> String {
    template.replace('#', "?")
}

/// Geometry keywords derivable from the imageset's models. Unknown models
/// are simply omitted; the tool falls back to its own header reading.
fn geometry_records(imageset: &Imageset) -> Vec<String> {
    let mut records = Vec::new();
    if let Some(beam) = imageset.beam {
        records.push(format!(
            "ORGX= {:.2} ORGY= {:.2}",
            beam.centre.0, beam.centre.1
        ));
        records.push(format!("X-RAY_WAVELENGTH= {:.5}", beam.wavelength));
    }
    if let Some(detector) = &imageset.detector {
        records.push(format!("DETECTOR_DISTANCE= {:.3}", detector.distance));
        records.push(format!(
            "NX= {} NY= {} QX= {:.4} QY= {:.4}",
            detector.panels.0, detector.panels.1, detector.pixel_size.0, detector.pixel_size.1
        ));
    }
    if let Some(sweep) = &imageset.sweep {
        records.push(format!("STARTING_ANGLE= {:.3}", sweep.phi_start));
        if !sweep.images.is_empty() {
            let oscillation = (sweep.phi_end - sweep.phi_start) / sweep.images.len() as f64;
            records.push(format!("OSCILLATION_RANGE= {oscillation:.4}"));
        }
    }
    records
}

fn init_job_records(
    imageset: &Imageset,
    data_range: (usize, usize),
    spot_ranges: &[(usize, usize)],
    background_range: (usize, usize),
    fix_scale: bool,
) -> ReduceResult<Vec<String>> {
    let mut records = vec!["JOB=INIT".to_string()];
    records.extend(geometry_records(imageset));

    let template_path = imageset.directory.join(&imageset.template);
    let template_path = template_path
        .to_str()
        .ok_or_else(|| ReduceError::Template(imageset.template.clone()))?;
    records.push(format!(
        "NAME_TEMPLATE_OF_DATA_FRAMES={}",
        template_to_question_marks(template_path)
    ));

    records.push(format!("DATA_RANGE={} {}", data_range.0, data_range.1));
    for (start, end) in spot_ranges {
        records.push(format!("SPOT_RANGE={start} {end}"));
    }
    records.push(format!(
        "BACKGROUND_RANGE={} {}",
        background_range.0, background_range.1
    ));
    if fix_scale {
        records.push(format!(
            "DATA_RANGE_FIXED_SCALE_FACTOR= {} {} 1",
            data_range.0, data_range.1
        ));
    }
    Ok(records)
}
