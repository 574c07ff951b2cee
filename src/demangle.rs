//! Symbol demangling through an external filter process

use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Turns mangled symbol names into readable ones.
///
/// Implementations return exactly one name per input name, in input order,
/// and never fail: a name that cannot be demangled comes back unchanged.
pub trait Demangler {
    fn demangle(&self, names: &[String]) -> Vec<String>;
}

/// Returns every name unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Demangler for Passthrough {
    fn demangle(&self, names: &[String]) -> Vec<String> {
        names.to_vec()
    }
}

/// Demangler backed by a filter executable such as `c++filt` or `rustfilt`.
///
/// The executable is spawned once per call with all names on stdin, one per
/// line, and must print the same number of lines on stdout.
#[derive(Debug, Clone)]
pub struct ProcessDemangler {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessDemangler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, names: &[String]) -> Result<Vec<String>> {
        let program = self.program.display().to_string();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn demangler '{}'", program))?;

        let mut input = names.join("\n");
        input.push('\n');

        let mut stdin = child.stdin.take().context("Demangler stdin unavailable")?;
        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));
        let stdout = spawn_reader(child.stdout.take().context("Demangler stdout unavailable")?);
        let stderr = spawn_reader(child.stderr.take().context("Demangler stderr unavailable")?);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                child.kill().ok();
                child.wait().ok();
                bail!("Demangler '{}' timed out after {:?}", program, self.timeout);
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = join(stdout)?;
        let errors = join(stderr)?;

        if !status.success() {
            bail!(
                "Demangler '{}' exited with {}: {}",
                program,
                status,
                errors.trim()
            );
        }

        writer
            .join()
            .map_err(|_| anyhow!("Demangler stdin writer panicked"))?
            .with_context(|| format!("Failed to write names to demangler '{}'", program))?;

        let demangled: Vec<String> = output.lines().map(|l| l.trim_end().to_string()).collect();
        if demangled.len() != names.len() {
            bail!(
                "Demangler '{}' returned {} names for {} inputs",
                program,
                demangled.len(),
                names.len()
            );
        }

        Ok(demangled)
    }
}

impl Demangler for ProcessDemangler {
    fn demangle(&self, names: &[String]) -> Vec<String> {
        if names.is_empty() {
            return Vec::new();
        }

        match self.run(names) {
            Ok(demangled) => demangled,
            Err(e) => {
                warn(&format!("{:#}; keeping mangled names", e));
                names.to_vec()
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> JoinHandle<std::io::Result<String>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        source.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn join(handle: JoinHandle<std::io::Result<String>>) -> Result<String> {
    handle
        .join()
        .map_err(|_| anyhow!("Demangler output reader panicked"))?
        .context("Failed to read demangler output")
}

fn warn(message: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), message);
}

/// Demangling tools known by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinDemangler {
    CppFilt,
    RustFilt,
}

impl BuiltinDemangler {
    pub fn command(&self) -> &'static str {
        match self {
            BuiltinDemangler::CppFilt => "c++filt",
            BuiltinDemangler::RustFilt => "rustfilt",
        }
    }
}

/// Which demangler a conversion uses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DemanglerSelector {
    #[default]
    None,
    Builtin(BuiltinDemangler),
    Executable(PathBuf),
}

impl DemanglerSelector {
    /// Selector used by a bare `--demangle`
    pub fn default_demangler() -> Self {
        DemanglerSelector::Builtin(BuiltinDemangler::CppFilt)
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, DemanglerSelector::None)
    }

    /// Build the demangler. A built-in missing from `PATH` is reported here
    /// and degrades to passthrough.
    pub fn into_demangler(self, timeout: Duration) -> Box<dyn Demangler> {
        match self {
            DemanglerSelector::None => Box::new(Passthrough),
            DemanglerSelector::Builtin(builtin) => match which::which(builtin.command()) {
                Ok(path) => Box::new(ProcessDemangler::new(path).with_timeout(timeout)),
                Err(_) => {
                    warn(&format!(
                        "demangler '{}' not found on PATH; keeping mangled names",
                        builtin.command()
                    ));
                    Box::new(Passthrough)
                }
            },
            DemanglerSelector::Executable(path) => {
                Box::new(ProcessDemangler::new(path).with_timeout(timeout))
            }
        }
    }
}

impl FromStr for DemanglerSelector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => bail!("Demangler name must not be empty"),
            "none" => Ok(DemanglerSelector::None),
            "c++filt" | "cxxfilt" => Ok(DemanglerSelector::Builtin(BuiltinDemangler::CppFilt)),
            "rustfilt" => Ok(DemanglerSelector::Builtin(BuiltinDemangler::RustFilt)),
            other => Ok(DemanglerSelector::Executable(PathBuf::from(other))),
        }
    }
}

impl fmt::Display for DemanglerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemanglerSelector::None => write!(f, "none"),
            DemanglerSelector::Builtin(builtin) => write!(f, "{}", builtin.command()),
            DemanglerSelector::Executable(path) => write!(f, "{}", path.display()),
        }
    }
}
