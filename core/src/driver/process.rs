use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;

use crate::prelude::{ReduceError, ReduceResult};

use super::dialect::ToolDialect;

static NEXT_PROCESS_ID: AtomicU32 = AtomicU32::new(1);

fn next_process_id() -> u32 {
    NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle of one external-program invocation. Parsed is reachable only
/// from Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Created,
    Configured,
    Running,
    Completed,
    Failed,
    Parsed,
}

/// Synchronous driver for one external analysis program.
///
/// A tool wrapper owns one `ProcessDriver` plus a `ToolDialect`: the driver
/// handles command assembly, the blocking run, stream capture and artifact
/// bookkeeping; the dialect supplies the tool-family status rules. The
/// per-invocation process id namespaces every generated filename, so runs
/// sharing a working directory never collide.
pub struct ProcessDriver {
    executable: String,
    working_directory: PathBuf,
    command_line: Vec<String>,
    stdin_lines: Vec<String>,
    task: Option<String>,
    state: DriverState,
    process_id: Option<u32>,
    exit_status: Option<i32>,
    stdout: String,
    stderr: String,
    output_files: BTreeMap<String, PathBuf>,
    log_file: Option<PathBuf>,
    retain_artifacts: bool,
}

impl ProcessDriver {
    pub fn new(executable: &str) -> Self {
        Self {
            executable: executable.to_string(),
            working_directory: std::env::current_dir().unwrap_or_default(),
            command_line: Vec::new(),
            stdin_lines: Vec::new(),
            task: None,
            state: DriverState::Created,
            process_id: None,
            exit_status: None,
            stdout: String::new(),
            stderr: String::new(),
            output_files: BTreeMap::new(),
            log_file: None,
            retain_artifacts: false,
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// The per-invocation unique id, allocated on first use.
    pub fn process_id(&mut self) -> u32 {
        *self.process_id.get_or_insert_with(next_process_id)
    }

    /// Working-directory path namespaced by the invocation id, e.g.
    /// `17_INIT.LP`.
    pub fn artifact_path(&mut self, stage: &str) -> PathBuf {
        let name = format!("{}_{stage}", self.process_id());
        self.working_directory.join(name)
    }

    pub fn set_working_directory(&mut self, directory: &Path) -> ReduceResult<()> {
        self.ensure_configurable()?;
        self.working_directory = directory.to_path_buf();
        Ok(())
    }

    pub fn set_task(&mut self, task: &str) -> ReduceResult<()> {
        self.ensure_configurable()?;
        self.task = Some(task.to_string());
        Ok(())
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    pub fn add_command_line(&mut self, token: impl Into<String>) -> ReduceResult<()> {
        self.ensure_configurable()?;
        self.command_line.push(token.into());
        Ok(())
    }

    pub fn clear_command_line(&mut self) -> ReduceResult<()> {
        self.ensure_configurable()?;
        self.command_line.clear();
        Ok(())
    }

    pub fn command_line(&self) -> &[String] {
        &self.command_line
    }

    /// Queue a line to be written to the process's input stream after launch.
    pub fn add_input_line(&mut self, line: &str) -> ReduceResult<()> {
        self.ensure_configurable()?;
        self.stdin_lines.push(line.to_string());
        Ok(())
    }

    /// Declare an output artifact the run must produce; absence after the
    /// process exits fails the invocation.
    pub fn declare_output_file(&mut self, name: &str, path: PathBuf) -> ReduceResult<()> {
        self.ensure_configurable()?;
        self.output_files.insert(name.to_string(), path);
        Ok(())
    }

    pub fn output_file(&self, name: &str) -> Option<&Path> {
        self.output_files.get(name).map(PathBuf::as_path)
    }

    pub fn output_files(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.output_files
            .iter()
            .map(|(name, path)| (name.as_str(), path.as_path()))
    }

    /// Keep the invocation's working files around for audit instead of
    /// removing them in `cleanup`.
    pub fn set_retain_artifacts(&mut self, retain: bool) {
        self.retain_artifacts = retain;
    }

    /// Launch the external process and block until it terminates.
    ///
    /// Queued input lines are written after launch; both streams are
    /// captured and mirrored to `<pid>_<executable>.log` in the working
    /// directory. Verification runs before the state reaches Completed: a
    /// nonzero exit or a missing declared artifact fails the invocation, and
    /// the dialect may fail it even on exit status zero.
    pub fn run(&mut self, dialect: &dyn ToolDialect) -> ReduceResult<()> {
        match self.state {
            DriverState::Created | DriverState::Configured => {}
            _ => {
                return Err(ReduceError::State(format!(
                    "{} driver already started",
                    self.executable
                )))
            }
        }
        let pid = self.process_id();
        self.state = DriverState::Running;
        debug!(
            "[{pid}] {} {} (dialect {})",
            self.executable,
            self.command_line.join(" "),
            dialect.name()
        );

        let spawned = Command::new(&self.executable)
            .args(&self.command_line)
            .current_dir(&self.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(error) => {
                self.state = DriverState::Failed;
                return Err(ReduceError::Execution(format!(
                    "failed to start {}: {error}",
                    self.executable
                )));
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            for line in &self.stdin_lines {
                if let Err(error) = writeln!(stdin, "{line}") {
                    self.state = DriverState::Failed;
                    return Err(ReduceError::Execution(format!(
                        "failed to feed input to {}: {error}",
                        self.executable
                    )));
                }
            }
        }

        let output = match child.wait_with_output() {
            Ok(output) => output,
            Err(error) => {
                self.state = DriverState::Failed;
                return Err(ReduceError::Execution(format!(
                    "failed waiting for {}: {error}",
                    self.executable
                )));
            }
        };
        self.exit_status = output.status.code();
        self.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        self.stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        let log_file = self.write_log_file(pid)?;
        self.log_file = Some(log_file.clone());

        if !output.status.success() {
            self.state = DriverState::Failed;
            return Err(ReduceError::Execution(format!(
                "{} exited with status {:?}, log in {}",
                self.executable,
                self.exit_status,
                log_file.display()
            )));
        }

        for (name, path) in &self.output_files {
            if !path.exists() {
                self.state = DriverState::Failed;
                return Err(ReduceError::Execution(format!(
                    "{} did not produce declared output {name} ({})",
                    self.executable,
                    path.display()
                )));
            }
        }

        if let Err(error) = dialect.check_status(&self.stdout, self.exit_status) {
            self.state = DriverState::Failed;
            return Err(error);
        }

        self.state = DriverState::Completed;
        Ok(())
    }

    fn write_log_file(&self, pid: u32) -> ReduceResult<PathBuf> {
        let stem = Path::new(&self.executable)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("process");
        let log_file = self.working_directory.join(format!("{pid}_{stem}.log"));
        fs::write(&log_file, format!("{}{}", self.stdout, self.stderr))?;
        Ok(log_file)
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    fn ensure_configurable(&mut self) -> ReduceResult<()> {
        match self.state {
            DriverState::Created | DriverState::Configured => {
                self.state = DriverState::Configured;
                Ok(())
            }
            _ => Err(ReduceError::State(format!(
                "cannot reconfigure {} after launch",
                self.executable
            ))),
        }
    }

    pub fn ensure_completed(&self) -> ReduceResult<()> {
        if self.state == DriverState::Completed {
            Ok(())
        } else {
            Err(ReduceError::State(format!(
                "{} has not completed",
                self.executable
            )))
        }
    }

    /// Transition Completed -> Parsed once the wrapper has read its output
    /// artifacts into typed fields.
    pub fn mark_parsed(&mut self) -> ReduceResult<()> {
        self.ensure_completed()?;
        self.state = DriverState::Parsed;
        Ok(())
    }

    /// Result getters call this first: reading a result before the output
    /// has been parsed is a programming error.
    pub fn ensure_parsed(&self) -> ReduceResult<()> {
        if self.state == DriverState::Parsed {
            Ok(())
        } else {
            Err(ReduceError::State(format!(
                "results of {} read before parsing",
                self.executable
            )))
        }
    }

    /// Remove the invocation's generated files unless retention was
    /// requested.
    pub fn cleanup(&mut self) {
        if self.retain_artifacts {
            return;
        }
        if let Some(log_file) = self.log_file.take() {
            let _ = fs::remove_file(log_file);
        }
        for path in self.output_files.values() {
            let _ = fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::dialect::PlainDialect;

    #[test]
    fn process_ids_are_unique_per_invocation() {
        let mut first = ProcessDriver::new("sh");
        let mut second = ProcessDriver::new("sh");
        assert_ne!(first.process_id(), second.process_id());
        assert_eq!(first.process_id(), first.process_id());
    }

    #[test]
    fn run_captures_stdout_and_writes_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = ProcessDriver::new("sh");
        driver.set_working_directory(dir.path()).unwrap();
        driver.add_command_line("-c").unwrap();
        driver.add_command_line("echo orchestration").unwrap();
        driver.run(&PlainDialect).unwrap();

        assert_eq!(driver.state(), DriverState::Completed);
        assert!(driver.stdout().contains("orchestration"));
        let log_file = driver.log_file().unwrap();
        assert!(log_file.exists());
        assert!(fs::read_to_string(log_file).unwrap().contains("orchestration"));
    }

    #[test]
    fn queued_input_lines_reach_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = ProcessDriver::new("cat");
        driver.set_working_directory(dir.path()).unwrap();
        driver.add_input_line("first keyword").unwrap();
        driver.add_input_line("second keyword").unwrap();
        driver.run(&PlainDialect).unwrap();
        assert!(driver.stdout().contains("first keyword"));
        assert!(driver.stdout().contains("second keyword"));
    }

    #[test]
    fn nonzero_exit_fails_the_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = ProcessDriver::new("sh");
        driver.set_working_directory(dir.path()).unwrap();
        driver.add_command_line("-c").unwrap();
        driver.add_command_line("exit 3").unwrap();
        assert!(matches!(
            driver.run(&PlainDialect),
            Err(ReduceError::Execution(_))
        ));
        assert_eq!(driver.state(), DriverState::Failed);
    }

    #[test]
    fn missing_declared_output_fails_the_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = ProcessDriver::new("sh");
        driver.set_working_directory(dir.path()).unwrap();
        driver.add_command_line("-c").unwrap();
        driver.add_command_line("true").unwrap();
        driver
            .declare_output_file("table", dir.path().join("never_written.dat"))
            .unwrap();
        assert!(matches!(
            driver.run(&PlainDialect),
            Err(ReduceError::Execution(_))
        ));
    }

    #[test]
    fn configure_after_launch_is_a_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = ProcessDriver::new("sh");
        driver.set_working_directory(dir.path()).unwrap();
        driver.add_command_line("-c").unwrap();
        driver.add_command_line("true").unwrap();
        driver.run(&PlainDialect).unwrap();
        assert!(matches!(
            driver.add_command_line("late"),
            Err(ReduceError::State(_))
        ));
    }

    #[test]
    fn results_before_parsing_are_a_state_error() {
        let driver = ProcessDriver::new("sh");
        assert!(matches!(driver.ensure_parsed(), Err(ReduceError::State(_))));
    }

    #[test]
    fn parsed_is_only_reachable_from_completed() {
        let mut driver = ProcessDriver::new("sh");
        assert!(matches!(driver.mark_parsed(), Err(ReduceError::State(_))));
    }

    #[test]
    fn cleanup_removes_generated_files_unless_retained() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = ProcessDriver::new("sh");
        driver.set_working_directory(dir.path()).unwrap();
        driver.add_command_line("-c").unwrap();
        driver.add_command_line("echo done > table.dat").unwrap();
        driver
            .declare_output_file("table", dir.path().join("table.dat"))
            .unwrap();
        driver.run(&PlainDialect).unwrap();

        let log_file = driver.log_file().unwrap().to_path_buf();
        driver.cleanup();
        assert!(!log_file.exists());
        assert!(!dir.path().join("table.dat").exists());
    }
}
