use std::{
    ffi::{OsStr, OsString},
    fmt::{self, Display},
    io,
    path::{Path, PathBuf},
    process::Command,
};

use log::trace;

/// A single external command: program, arguments and an optional working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Invocation {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_owned()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Last non-empty line of stderr, falling back to stdout.
    pub fn summary(&self) -> &str {
        [&self.stderr, &self.stdout]
            .into_iter()
            .flat_map(|stream| stream.lines().rev())
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("no output")
    }
}

/// Runs external programs. `Err` means the program could not be started at all.
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;

    /// True when the program starts and exits successfully with the given probe arguments.
    fn succeeds(&self, invocation: &Invocation) -> bool {
        self.run(invocation).is_ok_and(|output| output.success)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        trace!("Running {}", invocation);
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }
        let output = command.output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{cell::RefCell, collections::HashMap, io};

    use super::{CommandOutput, CommandRunner, Invocation};

    /// Answers invocations from a table keyed by their rendered command line.
    /// Commands not in the table fail to start, like a missing binary.
    #[derive(Default)]
    pub struct ScriptedRunner {
        responses: HashMap<String, CommandOutput>,
        ok_prefixes: Vec<String>,
        pub calls: RefCell<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ok(mut self, command: &str, stdout: &str) -> Self {
            self.responses.insert(
                command.to_owned(),
                CommandOutput {
                    success: true,
                    stdout: stdout.to_owned(),
                    stderr: String::new(),
                },
            );
            self
        }

        pub fn fail(mut self, command: &str, stderr: &str) -> Self {
            self.responses.insert(
                command.to_owned(),
                CommandOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: stderr.to_owned(),
                },
            );
            self
        }

        /// Every command starting with `prefix` that has no explicit entry succeeds.
        pub fn ok_prefix(mut self, prefix: &str) -> Self {
            self.ok_prefixes.push(prefix.to_owned());
            self
        }

        pub fn called(&self, command: &str) -> bool {
            self.calls.borrow().iter().any(|call| call == command)
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
            let rendered = invocation.to_string();
            self.calls.borrow_mut().push(rendered.clone());
            if let Some(output) = self.responses.get(&rendered) {
                return Ok(output.clone());
            }
            if self
                .ok_prefixes
                .iter()
                .any(|prefix| rendered.starts_with(prefix))
            {
                return Ok(CommandOutput {
                    success: true,
                    ..CommandOutput::default()
                });
            }
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", invocation.program().display()),
            ))
        }
    }
}
