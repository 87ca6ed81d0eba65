//! A [`Harness`] for C targets built with gcc `--coverage` and measured with `gcov`.
//!
//! The target source is compiled together with a shim providing its input
//! functions. Each execution adds to the `.gcda` counter file of the binary,
//! `gcov` summarizes it, and a reset deletes it.

use core::time::Duration;
use std::{
    fs, io,
    path::{Path, PathBuf},
    process::Command,
};

use cmafuzz_cc::{CompilerWrapper, GccWrapper};

use crate::{
    executors::{
        command::{CommandBuilder, CommandConfigurator, StdCommandConfigurator},
        ExitKind, Harness,
    },
    inputs::EncodedInput,
    monitors::{PerfFeature, PerfStats},
    observers::{parse_report, CoverageKind},
    Error,
};

/// Builds an instrumented C target and measures its coverage with `gcov`.
#[derive(Debug)]
pub struct GcovHarness {
    name: String,
    program: PathBuf,
    shim: Option<PathBuf>,
    binary: PathBuf,
    work_dir: PathBuf,
    cc: String,
    cc_args: Vec<String>,
    coverage_tool: String,
    kind: CoverageKind,
    /// Where the counter file may appear, the first existing one is read
    coverage_files: Vec<PathBuf>,
    debug_child: bool,
    configurator: StdCommandConfigurator,
    compiled: bool,
}

impl GcovHarness {
    /// Create a builder for a [`GcovHarness`]
    #[must_use]
    pub fn builder() -> GcovHarnessBuilder {
        GcovHarnessBuilder::new()
    }

    /// The name of the target, its source file stem
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instrumented binary
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// The coverage metric this harness reports
    #[must_use]
    pub fn coverage_kind(&self) -> CoverageKind {
        self.kind
    }

    /// The counter file the last executions wrote, if any
    fn existing_coverage_file(&self) -> Option<&Path> {
        self.coverage_files
            .iter()
            .map(PathBuf::as_path)
            .find(|file| file.exists())
    }

    /// Deletes all counter files, returns whether there was one
    fn remove_coverage_files(&self) -> Result<bool, Error> {
        let mut removed = false;
        for file in &self.coverage_files {
            match fs::remove_file(file) {
                Ok(()) => removed = true,
                Err(err) if err.kind() == io::ErrorKind::NotFound => (),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }
}

impl Harness for GcovHarness {
    fn compile(&mut self, perf: &mut PerfStats) -> Result<(), Error> {
        if self.compiled {
            return Ok(());
        }

        perf.start_timer();
        if let Some(parent) = self.binary.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut cc = GccWrapper::new();
        cc.wrapped_cc(self.cc.as_str())
            .source(&self.program)
            .output(&self.binary)
            .current_dir(&self.work_dir)
            .silence(!self.debug_child);
        if let Some(shim) = &self.shim {
            cc.source(shim);
        }
        cc.add_args(&self.cc_args);
        let res = cc.run();
        perf.mark_feature_time(PerfFeature::Compile);
        res?;

        // counters of an earlier build would be merged into ours
        if self.remove_coverage_files()? {
            log::debug!("Removed stale coverage data of {}", self.name);
        }

        log::info!("Compiled {} to {}", self.name, self.binary.display());
        self.compiled = true;
        Ok(())
    }

    fn execute(&mut self, input: &EncodedInput, perf: &mut PerfStats) -> Result<ExitKind, Error> {
        if !self.compiled {
            return Err(Error::illegal_state(format!(
                "{} executed before it was compiled",
                self.name
            )));
        }

        perf.start_timer();
        let res = self.configurator.run_child(input);
        perf.mark_feature_time(PerfFeature::Execute);

        let exit_kind = res?;
        match exit_kind {
            ExitKind::Ok => (),
            ExitKind::Crash => log::debug!("{} crashed on {}", self.name, input.key()),
            ExitKind::Timeout => log::warn!("{} timed out on {}", self.name, input.key()),
        }
        Ok(exit_kind)
    }

    fn extract_coverage(&mut self, perf: &mut PerfStats) -> Result<f64, Error> {
        let Some(file) = self.existing_coverage_file() else {
            log::warn!("No gcda file for {}", self.name);
            return Ok(0.0);
        };

        perf.start_timer();
        let output = Command::new(&self.coverage_tool)
            .args(self.kind.tool_args())
            .arg(file)
            .current_dir(&self.work_dir)
            .output();
        perf.mark_feature_time(PerfFeature::ExtractCoverage);

        let output = output?;
        if !output.status.success() {
            return Err(Error::unknown(format!(
                "{} failed on {}: {}",
                self.coverage_tool,
                file.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let report = String::from_utf8_lossy(&output.stdout);
        log::trace!("{report}");
        parse_report(&report, self.kind)
    }

    fn reset(&mut self, perf: &mut PerfStats) -> Result<(), Error> {
        perf.start_timer();
        let res = self.remove_coverage_files();
        perf.mark_feature_time(PerfFeature::Reset);

        if !res? {
            log::warn!("No gcda file to reset for {}", self.name);
        }
        Ok(())
    }
}

/// The builder for a [`GcovHarness`].
///
/// Relative paths are resolved against the current directory when
/// [`GcovHarnessBuilder::build`] is called.
#[derive(Debug, Clone)]
pub struct GcovHarnessBuilder {
    program: Option<PathBuf>,
    shim: Option<PathBuf>,
    build_dir: PathBuf,
    work_dir: PathBuf,
    cc: String,
    cc_args: Vec<String>,
    coverage_tool: String,
    kind: CoverageKind,
    coverage_file: Option<PathBuf>,
    timeout: Option<Duration>,
    debug_child: bool,
}

impl Default for GcovHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GcovHarnessBuilder {
    /// Create a new [`GcovHarnessBuilder`] with gcc, gcov, and line coverage
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: None,
            shim: None,
            build_dir: PathBuf::from("build"),
            work_dir: PathBuf::from("."),
            cc: "gcc".into(),
            cc_args: vec![],
            coverage_tool: "gcov".into(),
            kind: CoverageKind::Line,
            coverage_file: None,
            timeout: None,
            debug_child: false,
        }
    }

    /// The C source of the target. This option is required.
    #[must_use]
    pub fn program<P: AsRef<Path>>(mut self, program: P) -> Self {
        self.program = Some(program.as_ref().to_path_buf());
        self
    }

    /// The source defining the input functions the target calls
    #[must_use]
    pub fn shim<P: AsRef<Path>>(mut self, shim: P) -> Self {
        self.shim = Some(shim.as_ref().to_path_buf());
        self
    }

    /// Where the binary goes, `build` by default
    #[must_use]
    pub fn build_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.build_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Where the compiler, the target, and the coverage tool run
    #[must_use]
    pub fn work_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.work_dir = dir.as_ref().to_path_buf();
        self
    }

    /// The C compiler, `gcc` by default
    #[must_use]
    pub fn cc<S: Into<String>>(mut self, cc: S) -> Self {
        self.cc = cc.into();
        self
    }

    /// Extra compiler arguments
    #[must_use]
    pub fn cc_args<IT, S>(mut self, args: IT) -> Self
    where
        IT: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cc_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The coverage tool, `gcov` by default
    #[must_use]
    pub fn coverage_tool<S: Into<String>>(mut self, tool: S) -> Self {
        self.coverage_tool = tool.into();
        self
    }

    /// Which metric to report
    #[must_use]
    pub fn coverage_kind(mut self, kind: CoverageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Pin the counter file instead of probing the places gcc puts it
    #[must_use]
    pub fn coverage_file<P: AsRef<Path>>(mut self, file: P) -> Self {
        self.coverage_file = Some(file.as_ref().to_path_buf());
        self
    }

    /// Kill executions taking longer than `timeout`
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep the output of the compiler and the target visible
    #[must_use]
    pub fn debug_child(mut self, debug_child: bool) -> Self {
        self.debug_child = debug_child;
        self
    }

    /// Builds the [`GcovHarness`]. Nothing is compiled yet.
    pub fn build(self) -> Result<GcovHarness, Error> {
        let Some(program) = self.program else {
            return Err(Error::illegal_argument(
                "GcovHarnessBuilder::build: no program set!",
            ));
        };
        let name = program
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| {
                Error::illegal_argument(format!("no file name in {}", program.display()))
            })?;

        let program = absolute(&program)?;
        let shim = self.shim.as_deref().map(absolute).transpose()?;
        let work_dir = absolute(&self.work_dir)?;
        let build_dir = absolute(&self.build_dir)?;
        let binary = build_dir.join(&name);

        let coverage_files = match self.coverage_file {
            Some(file) => vec![work_dir.join(file)],
            // older gcc names the counters after the source, newer ones after the output
            None => vec![
                work_dir.join(format!("{name}.gcda")),
                build_dir.join(format!("{name}-{name}.gcda")),
            ],
        };

        let configurator = CommandBuilder::new()
            .program(&binary)
            .current_dir(&work_dir)
            .debug_child(self.debug_child)
            .timeout(self.timeout)
            .build()?;

        Ok(GcovHarness {
            name,
            program,
            shim,
            binary,
            work_dir,
            cc: self.cc,
            cc_args: self.cc_args,
            coverage_tool: self.coverage_tool,
            kind: self.kind,
            coverage_files,
            debug_child: self.debug_child,
            configurator,
            compiled: false,
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use std::{
        fs,
        process::{Command, Stdio},
    };

    use serial_test::serial;

    use crate::{
        executors::{GcovHarness, Harness},
        inputs::EncodedInput,
        monitors::{PerfFeature, PerfStats},
        Error,
    };

    #[test]
    fn test_builder_defaults() {
        let harness = GcovHarness::builder()
            .program("programs/test.c")
            .build()
            .unwrap();
        assert_eq!(harness.name(), "test");
        assert!(harness.binary().is_absolute());
        assert!(harness.binary().ends_with("build/test"));
        assert!(harness.coverage_files[0].ends_with("test.gcda"));
    }

    #[test]
    fn test_builder_needs_program() {
        assert!(matches!(
            GcovHarness::builder().build(),
            Err(Error::IllegalArgument(_, _))
        ));
    }

    #[test]
    fn test_missing_coverage_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = GcovHarness::builder()
            .program("test.c")
            .work_dir(dir.path())
            .build_dir(dir.path())
            .build()
            .unwrap();
        let mut perf = PerfStats::new();

        assert_eq!(harness.extract_coverage(&mut perf).unwrap(), 0.0);
        // a reset without data only warns
        harness.reset(&mut perf).unwrap();
        assert_eq!(perf.feature_count(PerfFeature::Reset), 1);
    }

    #[test]
    fn test_reset_removes_counters() {
        let dir = tempfile::tempdir().unwrap();
        let gcda = dir.path().join("test.gcda");
        fs::write(&gcda, b"counters").unwrap();

        let mut harness = GcovHarness::builder()
            .program("test.c")
            .work_dir(dir.path())
            .build()
            .unwrap();
        harness.reset(&mut PerfStats::new()).unwrap();
        assert!(!gcda.exists());
    }

    #[test]
    fn test_execute_before_compile() {
        let mut harness = GcovHarness::builder().program("test.c").build().unwrap();
        assert!(matches!(
            harness.execute(&EncodedInput::default(), &mut PerfStats::new()),
            Err(Error::IllegalState(_, _))
        ));
    }

    #[test]
    fn test_compile_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut harness = GcovHarness::builder()
            .program(dir.path().join("missing.c"))
            .build_dir(dir.path())
            .work_dir(dir.path())
            .cc("/nonexistent/cmafuzz-cc")
            .build()
            .unwrap();
        assert!(matches!(
            harness.compile(&mut PerfStats::new()),
            Err(Error::Compile(_, _))
        ));
    }

    /// Whether `tool --version` runs
    fn have_tool(tool: &str) -> bool {
        Command::new(tool)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    #[test]
    #[serial]
    fn test_gcov_measure() {
        if !(have_tool("gcc") && have_tool("gcov")) {
            println!("gcc or gcov not found, skipping");
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("branches.c");
        fs::write(
            &source,
            "#include <stdio.h>\n\
             int main(void) {\n\
             int c = getchar();\n\
             if (c == 'a') {\n\
             return 1;\n\
             }\n\
             return 0;\n\
             }\n",
        )
        .unwrap();

        let mut harness = GcovHarness::builder()
            .program(&source)
            .build_dir(dir.path().join("build"))
            .work_dir(dir.path())
            .build()
            .unwrap();
        let mut perf = PerfStats::new();
        harness.compile(&mut perf).unwrap();

        let a = EncodedInput::new(b"a".to_vec());
        let b = EncodedInput::new(b"b".to_vec());
        let alone = harness.measure(&a, &mut perf).unwrap();
        let both = harness.measure_cumulative(&[b], &a, &mut perf).unwrap();
        assert!(alone > 0.0);
        assert!(both > alone);
        assert!(both <= 100.0);
    }
}
