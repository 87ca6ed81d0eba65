//! The command executor executes a sub program for each run
use core::{
    fmt::{self, Debug, Formatter},
    time::Duration,
};
use std::{
    ffi::{OsStr, OsString},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread::{self, JoinHandle},
};

use wait_timeout::ChildExt;

use crate::{executors::ExitKind, inputs::EncodedInput, Error};

/// A `CommandConfigurator` takes care of creating and spawning a [`std::process::Command`]
/// for one execution of the target.
pub trait CommandConfigurator: Debug {
    /// Spawns a new process with the given configuration.
    ///
    /// Input delivery must not block, the deadline only starts once this returns.
    fn spawn_child(&mut self, input: &EncodedInput) -> Result<Child, Error>;

    /// Deadline for a single execution, if any
    fn exec_timeout(&self) -> Option<Duration> {
        None
    }

    /// Called after the child exited or was killed, `timed_out` if it was killed
    fn child_exited(&mut self, _timed_out: bool) -> Result<(), Error> {
        Ok(())
    }

    /// Spawns the child and waits for it to exit.
    ///
    /// Past the [`CommandConfigurator::exec_timeout`] the child gets killed.
    fn run_child(&mut self, input: &EncodedInput) -> Result<ExitKind, Error> {
        let mut child = self.spawn_child(input)?;

        let status: io::Result<Option<ExitStatus>> = match self.exec_timeout() {
            Some(timeout) => child.wait_timeout(timeout),
            None => child.wait().map(Some),
        };

        let exit_kind = match status {
            // killed by a signal
            Ok(Some(status)) if status.code().is_none() => ExitKind::Crash,
            Ok(Some(_)) => ExitKind::Ok,
            Ok(None) => {
                // if this fails, there is not much we can do. let's hope it failed because the process finished
                // in the meantime.
                drop(child.kill());
                // finally, try to wait to properly clean up system resources.
                drop(child.wait());
                ExitKind::Timeout
            }
            Err(err) => {
                drop(child.kill());
                drop(child.wait());
                self.child_exited(true)?;
                return Err(err.into());
            }
        };

        self.child_exited(exit_kind == ExitKind::Timeout)?;
        Ok(exit_kind)
    }
}

/// Writes `bytes` to the child's stdin and closes it.
///
/// A target may exit without reading all of its input, that is not an error.
fn feed_stdin<W: Write>(mut stdin: W, bytes: &[u8]) -> io::Result<()> {
    match stdin.write_all(bytes).and_then(|()| stdin.flush()) {
        Err(err) if err.kind() == ErrorKind::BrokenPipe => {
            log::debug!("Target closed stdin before reading the whole input");
            Ok(())
        }
        res => res,
    }
}

/// A simple Configurator that writes the input to the child's stdin.
/// Use [`CommandBuilder`] to construct it.
///
/// The input is written from a helper thread: a target that never reads
/// stdin would otherwise block us on a full pipe, past any deadline.
pub struct StdCommandConfigurator {
    /// The Command to execute
    command: Command,
    /// Kill the child after this long
    timeout: Option<Duration>,
    /// Feeds stdin of the running child
    stdin_writer: Option<JoinHandle<io::Result<()>>>,
}

impl Debug for StdCommandConfigurator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdCommandConfigurator")
            .field("command", &self.command)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CommandConfigurator for StdCommandConfigurator {
    fn spawn_child(&mut self, input: &EncodedInput) -> Result<Child, Error> {
        let mut handle = self.command.spawn()?;
        let Some(stdin) = handle.stdin.take() else {
            drop(handle.kill());
            drop(handle.wait());
            return Err(Error::illegal_state("child stdin was not piped"));
        };
        let bytes = input.bytes().to_vec();
        self.stdin_writer = Some(thread::spawn(move || feed_stdin(stdin, &bytes)));
        Ok(handle)
    }

    fn exec_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn child_exited(&mut self, timed_out: bool) -> Result<(), Error> {
        let Some(writer) = self.stdin_writer.take() else {
            return Ok(());
        };
        if timed_out {
            // a leftover grandchild may still hold the pipe, the writer ends once it is closed
            return Ok(());
        }
        writer
            .join()
            .map_err(|_| Error::unknown("stdin writer panicked"))??;
        Ok(())
    }
}

impl StdCommandConfigurator {
    /// The program this configurator spawns
    #[must_use]
    pub fn program(&self) -> &OsStr {
        self.command.get_program()
    }
}

/// The builder for a [`StdCommandConfigurator`].
///
/// It mimics the api of [`Command`], specifically, you will use
/// `arg`, `args`, `env`, and so on. Input is always delivered on stdin.
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder {
    debug_child: bool,
    program: Option<OsString>,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    timeout: Option<Duration>,
}

impl CommandBuilder {
    /// Create a new [`CommandBuilder`]
    #[must_use]
    pub fn new() -> CommandBuilder {
        CommandBuilder::default()
    }

    /// Set the binary to execute
    /// This option is required.
    pub fn program<O>(&mut self, program: O) -> &mut Self
    where
        O: AsRef<OsStr>,
    {
        self.program = Some(program.as_ref().to_owned());
        self
    }

    /// Adds an argument to the program's commandline.
    pub fn arg<O: AsRef<OsStr>>(&mut self, arg: O) -> &mut CommandBuilder {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Adds a range of arguments to the program's commandline.
    pub fn args<IT, O>(&mut self, args: IT) -> &mut CommandBuilder
    where
        IT: IntoIterator<Item = O>,
        O: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg.as_ref());
        }
        self
    }

    /// Adds an environment variable to the executed command.
    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut CommandBuilder
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.envs
            .push((key.as_ref().to_owned(), val.as_ref().to_owned()));
        self
    }

    /// Sets the working directory for the child process.
    pub fn current_dir<P: AsRef<Path>>(&mut self, dir: P) -> &mut CommandBuilder {
        self.cwd = Some(dir.as_ref().to_owned());
        self
    }

    /// If set to true, the child's output won't be redirecited to `/dev/null`.
    /// Defaults to `false`.
    pub fn debug_child(&mut self, debug_child: bool) -> &mut CommandBuilder {
        self.debug_child = debug_child;
        self
    }

    /// Kill each execution after `timeout`. Defaults to no deadline.
    pub fn timeout(&mut self, timeout: Option<Duration>) -> &mut CommandBuilder {
        self.timeout = timeout;
        self
    }

    /// Builds the [`StdCommandConfigurator`]
    pub fn build(&self) -> Result<StdCommandConfigurator, Error> {
        let Some(program) = &self.program else {
            return Err(Error::illegal_argument(
                "CommandBuilder::build: no program set!",
            ));
        };
        let mut command = Command::new(program);
        command.stdin(Stdio::piped());
        command.args(&self.args);
        command.envs(
            self.envs
                .iter()
                .map(|(k, v)| (k.as_os_str(), v.as_os_str())),
        );
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        if !self.debug_child {
            command.stdout(Stdio::null());
            command.stderr(Stdio::null());
        }

        Ok(StdCommandConfigurator {
            command,
            timeout: self.timeout,
            stdin_writer: None,
        })
    }
}
