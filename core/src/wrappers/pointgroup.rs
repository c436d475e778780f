use std::fs;
use std::path::{Path, PathBuf};

use crate::driver::{CcpDialect, ProcessDriver, ToolDialect};
use crate::prelude::{ReduceError, ReduceResult};
use crate::telemetry::LogManager;

/// Wrapper for the pointgroup-determination program.
///
/// The program is asked for an XMLOUT file and its best-solution element is
/// read back: group name, confidence, total probability, reindex operator
/// and the nine-element reindex matrix. Systematic-absence analysis is
/// switched off via a keyword on the input stream.
pub struct Pointgroup {
    driver: ProcessDriver,
    dialect: CcpDialect,
    logger: LogManager,
    hklin: Option<PathBuf>,
    solution: Option<BestSolution>,
}

#[derive(Debug, Clone, PartialEq)]
struct BestSolution {
    group_name: String,
    reindex_operator: String,
    reindex_matrix: [f64; 9],
    confidence: f64,
    total_probability: f64,
}

impl Pointgroup {
    pub fn new() -> Self {
        Self::with_executable("pointless")
    }

    pub fn with_executable(executable: &str) -> Self {
        Self {
            driver: ProcessDriver::new(executable),
            dialect: CcpDialect,
            logger: LogManager::new(),
            hklin: None,
            solution: None,
        }
    }

    pub fn set_working_directory(&mut self, directory: &Path) -> ReduceResult<()> {
        self.driver.set_working_directory(directory)
    }

    pub fn set_hklin(&mut self, path: impl Into<PathBuf>) -> ReduceResult<()> {
        let path = path.into();
        if !path.exists() {
            return Err(ReduceError::Configuration(format!(
                "reflection file {} does not exist",
                path.display()
            )));
        }
        self.hklin = Some(path);
        Ok(())
    }

    /// Decide the correct pointgroup for the configured reflection file.
    pub fn decide_pointgroup(&mut self) -> ReduceResult<()> {
        let hklin = self
            .hklin
            .clone()
            .ok_or_else(|| ReduceError::Configuration("hklin not set".to_string()))?;

        self.logger
            .record_task(&format!("computing the pointgroup for {}", hklin.display()));
        self.driver
            .set_task(&format!("pointgroup of {}", hklin.display()))?;

        let xml_name = format!("{}_pointless.xml", self.driver.process_id());
        let xml_file = self.driver.working_directory().join(&xml_name);

        for token in self.dialect.file_argument("hklin", &hklin) {
            self.driver.add_command_line(token)?;
        }
        self.driver.add_command_line("xmlout")?;
        self.driver.add_command_line(&xml_name)?;
        self.driver.add_input_line("systematicabsences off")?;
        self.driver.declare_output_file("xmlout", xml_file.clone())?;

        self.driver.run(&self.dialect)?;

        let text = fs::read_to_string(&xml_file)?;
        let solution = parse_best_solution(&text)?;
        self.driver.mark_parsed()?;
        self.solution = Some(solution);
        Ok(())
    }

    fn solution(&self) -> ReduceResult<&BestSolution> {
        self.driver.ensure_parsed()?;
        self.solution
            .as_ref()
            .ok_or_else(|| ReduceError::State("pointgroup solution missing".to_string()))
    }

    pub fn pointgroup(&self) -> ReduceResult<&str> {
        Ok(&self.solution()?.group_name)
    }

    pub fn reindex_operator(&self) -> ReduceResult<&str> {
        Ok(&self.solution()?.reindex_operator)
    }

    pub fn reindex_matrix(&self) -> ReduceResult<[f64; 9]> {
        Ok(self.solution()?.reindex_matrix)
    }

    pub fn confidence(&self) -> ReduceResult<f64> {
        Ok(self.solution()?.confidence)
    }

    pub fn total_probability(&self) -> ReduceResult<f64> {
        Ok(self.solution()?.total_probability)
    }
}

impl Default for Pointgroup {
    fn default() -> Self {
        Self::new()
    }
}

fn child_text<'a>(parent: &roxmltree::Node<'a, '_>, tag: &str) -> ReduceResult<&'a str> {
    parent
        .children()
        .find(|node| node.has_tag_name(tag))
        .and_then(|node| node.text())
        .ok_or_else(|| ReduceError::OutputParse(format!("no {tag} in BestSolution")))
}

fn child_number(parent: &roxmltree::Node<'_, '_>, tag: &str) -> ReduceResult<f64> {
    child_text(parent, tag)?
        .trim()
        .parse()
        .map_err(|_| ReduceError::OutputParse(format!("{tag} is not numeric")))
}

fn parse_best_solution(xml: &str) -> ReduceResult<BestSolution> {
    let document = roxmltree::Document::parse(xml)
        .map_err(|error| ReduceError::OutputParse(format!("xmlout: {error}")))?;
    let best = document
        .descendants()
        .find(|node| node.has_tag_name("BestSolution"))
        .ok_or_else(|| ReduceError::OutputParse("no BestSolution element".to_string()))?;

    let matrix_values = child_text(&best, "ReindexMatrix")?
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|_| ReduceError::OutputParse("non-numeric reindex matrix".to_string()))?;
    let reindex_matrix: [f64; 9] = matrix_values.try_into().map_err(|_| {
        ReduceError::OutputParse("reindex matrix must carry nine elements".to_string())
    })?;

    Ok(BestSolution {
        group_name: child_text(&best, "GroupName")?.trim().to_string(),
        reindex_operator: child_text(&best, "ReindexOperator")?.trim().to_string(),
        reindex_matrix,
        confidence: child_number(&best, "Confidence")?,
        total_probability: child_number(&best, "TotalProb")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const XMLOUT: &str = r#"
<POINTLESS version="1.12.13" RunTime="Fri Jun  2 14:07:59 2023">
<ReflectionFile stream="HKLIN" name="12287_1_E1.mtz">
<cell>
   <a>  51.64</a>
   <b>  51.64</b>
   <c>  157.7</c>
   <alpha>     90</alpha>
   <beta>     90</beta>
   <gamma>     90</gamma>
</cell>
<SpacegroupName> P 43 21 2</SpacegroupName>
</ReflectionFile>
<BestSolution Type="pointgroup">
  <GroupName>P 4 2 2</GroupName>
  <ReindexMatrix>     1     0     0
                      0     1     0
                      0     0     1
   </ReindexMatrix>
   <ReindexOperator> h,k,l</ReindexOperator>
   <Confidence>    1.000</Confidence>
   <TotalProb>  1.071</TotalProb>
</BestSolution>
</POINTLESS>
"#;

    #[test]
    fn best_solution_is_read_from_xmlout() {
        let solution = parse_best_solution(XMLOUT).unwrap();
        assert_eq!(solution.group_name, "P 4 2 2");
        assert_eq!(solution.reindex_operator, "h,k,l");
        assert_eq!(solution.confidence, 1.0);
        assert_eq!(solution.total_probability, 1.071);
        assert_eq!(
            solution.reindex_matrix,
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn missing_best_solution_is_a_parse_error() {
        assert!(matches!(
            parse_best_solution("<POINTLESS></POINTLESS>"),
            Err(ReduceError::OutputParse(_))
        ));
    }

    #[test]
    fn short_reindex_matrix_is_a_parse_error() {
        let xml = r#"
<BestSolution>
  <GroupName>P 1</GroupName>
  <ReindexMatrix> 1 0 0 </ReindexMatrix>
  <ReindexOperator>h,k,l</ReindexOperator>
  <Confidence>0.9</Confidence>
  <TotalProb>1.0</TotalProb>
</BestSolution>
"#;
        assert!(matches!(
            parse_best_solution(xml),
            Err(ReduceError::OutputParse(_))
        ));
    }

    #[test]
    fn getters_before_parsing_are_a_state_error() {
        let wrapper = Pointgroup::new();
        assert!(matches!(wrapper.pointgroup(), Err(ReduceError::State(_))));
    }

    #[test]
    fn hklin_must_exist() {
        let mut wrapper = Pointgroup::new();
        assert!(matches!(
            wrapper.set_hklin("/nonexistent/native.mtz"),
            Err(ReduceError::Configuration(_))
        ));
    }
}
