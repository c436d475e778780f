use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// What the aggregation step does with a frame whose analysis failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedRowPolicy {
    /// Keep one all-zero row per failed frame.
    #[default]
    SentinelFill,
    /// Leave failed frames out of the report.
    Drop,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    pub template: String,
    pub directory: PathBuf,
    #[serde(default)]
    pub beam: Option<(f64, f64)>,
    #[serde(default)]
    pub first: Option<usize>,
    #[serde(default)]
    pub last: Option<usize>,
    #[serde(default)]
    pub omit_empty: bool,
    #[serde(default)]
    pub failed_rows: FailedRowPolicy,
}

impl ScanConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading scan config {}", path_ref.display()))?;
        let config: ScanConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing scan config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(
        template: String,
        directory: PathBuf,
        beam: Option<(f64, f64)>,
        first: Option<usize>,
        last: Option<usize>,
        omit_empty: bool,
    ) -> Self {
        Self {
            template,
            directory,
            beam,
            first,
            last,
            omit_empty,
            failed_rows: FailedRowPolicy::default(),
        }
    }

    /// Whether a frame falls inside the scan window. The window only
    /// applies when both ends are given.
    pub fn in_window(&self, index: usize) -> bool {
        match (self.first, self.last) {
            (Some(first), Some(last)) => first <= index && index <= last,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn window_applies_only_when_both_ends_are_set() {
        let mut config = ScanConfig::from_args(
            "scan_####.img".to_string(),
            PathBuf::from("/data"),
            None,
            None,
            None,
            false,
        );
        assert!(config.in_window(1));

        config.first = Some(3);
        assert!(config.in_window(1), "half-open window must not filter");

        config.last = Some(5);
        assert!(!config.in_window(1));
        assert!(config.in_window(3));
        assert!(config.in_window(5));
        assert!(!config.in_window(6));
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"template: scan_####.img\ndirectory: /data/xtal\nfirst: 2\nlast: 9\nfailed_rows: drop\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.template, "scan_####.img");
        assert_eq!(config.first, Some(2));
        assert_eq!(config.failed_rows, FailedRowPolicy::Drop);
        assert!(!config.omit_empty);
    }
}
