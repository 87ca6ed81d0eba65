//! Compiler wrapper for `cmafuzz`
//!
//! Builds the coverage-instrumented binary of a target: the target source is
//! linked together with a harness shim (the file providing the
//! `__VERIFIER_*` input functions) and compiled with `--coverage`, so every
//! execution leaves a `.gcda` counter file next to the object.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![warn(missing_debug_implementations, missing_docs, unused_qualifications)]

use std::{
    fmt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// `cmafuzz_cc` error Type
#[derive(Debug)]
pub enum Error {
    /// `cmafuzz_cc` wrapper failed to parse an argument
    InvalidArguments(String),
    /// `cmafuzz_cc` encountered an IO error
    Io(std::io::Error),
    /// The wrapped compiler returned a non-zero exit status
    CompilationFailed(String),
    /// `cmafuzz_cc` error unknown
    Unknown(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidArguments(s) => write!(f, "invalid arguments: {s}"),
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::CompilationFailed(s) => write!(f, "compilation failed: {s}"),
            Error::Unknown(s) => write!(f, "unknown error: {s}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// Wrap a compiler hijacking its arguments
pub trait CompilerWrapper {
    /// Set the wrapper arguments parsing a command line set of arguments
    fn parse_args<S>(&mut self, args: &[S]) -> Result<&'_ mut Self, Error>
    where
        S: AsRef<str>;

    /// Add a compiler argument
    fn add_arg<S>(&mut self, arg: S) -> &'_ mut Self
    where
        S: AsRef<str>;

    /// Add compiler arguments
    fn add_args<S>(&mut self, args: &[S]) -> &'_ mut Self
    where
        S: AsRef<str>,
    {
        for arg in args {
            self.add_arg(arg);
        }
        self
    }

    /// Command to run the compiler
    fn command(&mut self) -> Result<Vec<String>, Error>;

    /// Silences the compiler wrapper output
    fn silence(&mut self, value: bool) -> &'_ mut Self;

    /// Returns `true` if `silence` was called with `true`
    fn is_silent(&self) -> bool;

    /// Directory the compiler runs in, the process' one if `None`
    fn working_dir(&self) -> Option<&Path> {
        None
    }

    /// Run the compiler
    ///
    /// A non-zero exit status of the wrapped compiler is an error: the target
    /// cannot be measured without its instrumented binary.
    fn run(&mut self) -> Result<(), Error> {
        let args = self.command()?;

        if args.is_empty() {
            return Err(Error::InvalidArguments(
                "The number of arguments cannot be 0".into(),
            ));
        }

        if !self.is_silent() {
            log::info!("{args:?}");
        }

        let mut command = Command::new(&args[0]);
        command.args(&args[1..]);
        if let Some(dir) = self.working_dir() {
            command.current_dir(dir);
        }
        if self.is_silent() {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let status = command.status()?;

        if !self.is_silent() {
            log::info!("{status:?}");
        }

        if status.success() {
            Ok(())
        } else {
            Err(Error::CompilationFailed(format!(
                "`{}` exited with {status}",
                args.join(" ")
            )))
        }
    }
}

/// Wrap gcc, producing a binary instrumented with `--coverage`
#[derive(Debug)]
pub struct GccWrapper {
    is_silent: bool,
    coverage: bool,
    wrapped_cc: String,

    sources: Vec<PathBuf>,
    output: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    base_args: Vec<String>,
}

impl Default for GccWrapper {
    /// Create a new gcc wrapper
    fn default() -> Self {
        Self::new()
    }
}

impl CompilerWrapper for GccWrapper {
    fn parse_args<S>(&mut self, args: &[S]) -> Result<&'_ mut Self, Error>
    where
        S: AsRef<str>,
    {
        if args.is_empty() {
            return Err(Error::InvalidArguments(
                "The number of arguments cannot be 0".into(),
            ));
        }

        let mut i = 1;
        while i < args.len() {
            match args[i].as_ref() {
                "-o" => {
                    let out = args.get(i + 1).ok_or_else(|| {
                        Error::InvalidArguments("-o requires an output path".into())
                    })?;
                    self.output = Some(PathBuf::from(out.as_ref()));
                    i += 2;
                    continue;
                }
                "--coverage" => self.coverage = true,
                arg if arg.ends_with(".c") => self.sources.push(PathBuf::from(arg)),
                arg => self.base_args.push(arg.into()),
            }
            i += 1;
        }
        Ok(self)
    }

    fn add_arg<S>(&mut self, arg: S) -> &'_ mut Self
    where
        S: AsRef<str>,
    {
        self.base_args.push(arg.as_ref().into());
        self
    }

    fn command(&mut self) -> Result<Vec<String>, Error> {
        if self.sources.is_empty() {
            return Err(Error::InvalidArguments("no source file to compile".into()));
        }

        let mut args = vec![self.wrapped_cc.clone()];
        args.extend(
            self.sources
                .iter()
                .map(|source| source.to_string_lossy().into_owned()),
        );
        if let Some(output) = &self.output {
            args.push("-o".into());
            args.push(output.to_string_lossy().into_owned());
        }
        args.extend_from_slice(&self.base_args);
        if self.coverage {
            args.push("--coverage".into());
        }
        Ok(args)
    }

    fn silence(&mut self, value: bool) -> &'_ mut Self {
        self.is_silent = value;
        self
    }

    fn is_silent(&self) -> bool {
        self.is_silent
    }

    fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

impl GccWrapper {
    /// Create a new gcc wrapper around `gcc`, with coverage instrumentation on
    #[must_use]
    pub fn new() -> Self {
        Self {
            is_silent: false,
            coverage: true,
            wrapped_cc: "gcc".into(),
            sources: vec![],
            output: None,
            working_dir: None,
            base_args: vec![],
        }
    }

    /// Sets the wrapped `cc` compiler
    pub fn wrapped_cc<S>(&mut self, cc: S) -> &'_ mut Self
    where
        S: Into<String>,
    {
        self.wrapped_cc = cc.into();
        self
    }

    /// Adds a source file (the target, or the harness shim)
    pub fn source<P>(&mut self, path: P) -> &'_ mut Self
    where
        P: AsRef<Path>,
    {
        self.sources.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets the path of the produced binary
    pub fn output<P>(&mut self, path: P) -> &'_ mut Self
    where
        P: AsRef<Path>,
    {
        self.output = Some(path.as_ref().to_path_buf());
        self
    }

    /// Runs the compiler in `dir`. The notes files land there.
    pub fn current_dir<P>(&mut self, dir: P) -> &'_ mut Self
    where
        P: AsRef<Path>,
    {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Enables or disables `--coverage`
    pub fn coverage(&mut self, value: bool) -> &'_ mut Self {
        self.coverage = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::{CompilerWrapper, Error, GccWrapper};

    #[test]
    fn test_gcc_command() {
        let mut cc = GccWrapper::new();
        cc.source("programs/test.c")
            .source("programs/__VERIFIER.c")
            .output("build/test");
        assert_eq!(
            cc.command().unwrap(),
            vec![
                "gcc",
                "programs/test.c",
                "programs/__VERIFIER.c",
                "-o",
                "build/test",
                "--coverage"
            ]
        );
    }

    #[test]
    fn test_gcc_parse_args() {
        let mut cc = GccWrapper::new();
        cc.coverage(false)
            .parse_args(&["cc", "a.c", "-O0", "-o", "a.out", "--coverage"])
            .unwrap();
        let args = cc.command().unwrap();
        assert_eq!(args, vec!["gcc", "a.c", "-o", "a.out", "-O0", "--coverage"]);
    }

    #[test]
    fn test_no_sources() {
        let mut cc = GccWrapper::new();
        assert!(matches!(cc.command(), Err(Error::InvalidArguments(_))));
    }

    #[test]
    fn test_missing_compiler() {
        let mut cc = GccWrapper::new();
        cc.wrapped_cc("/nonexistent/cmafuzz-cc")
            .silence(true)
            .source("test.c");
        assert!(matches!(cc.run(), Err(Error::Io(_))));
    }
}
