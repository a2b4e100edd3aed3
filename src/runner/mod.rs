use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// Wall-clock limit for one engine invocation.
pub const ENGINE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Exit code recorded when an invocation is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;
/// Exit code recorded when the engine could not be started at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -2;
/// Statistics file the engine writes into its output directory.
pub const STATS_FILE_NAME: &str = "info";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Flags passed to every invocation, ahead of everything else.
pub const BASE_FLAGS: &[&str] = &[
    "--libc=uclibc",
    "--posix-runtime",
    "--simplify-sym-indices",
    "--write-cvcs",
    "--write-cov",
    "--stats",
    "--write-smt2s",
    "--output-module",
    "--max-memory=1000",
    "--disable-inlining",
    "--optimize",
    "--use-forked-solver",
    "--use-cex-cache",
    "--external-calls=all",
    "--only-output-states-covering-new",
    "--max-sym-array-size=4096",
    "--max-solver-time=30s",
    "--max-time=1800s",
    "--watchdog",
    "--max-memory-inhibit=false",
    "--max-static-fork-pct=1",
    "--max-static-solve-pct=1",
    "--max-static-cpfork-pct=1",
    "--switch-type=internal",
    "--search=random-path",
    "--search=nurs:covnew",
    "--use-batching-search",
    "--batch-instructions=10000",
];

/// Which of the two compared configurations an invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    Baseline,
    ProfileGuided,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Baseline => f.write_str("baseline"),
            Variant::ProfileGuided => f.write_str("profile-guided"),
        }
    }
}

/// Everything one engine run needs besides the sandbox.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub artifact: PathBuf,
    pub output_dir: PathBuf,
    /// Present only for the profile-guided variant.
    pub map_file: Option<PathBuf>,
    pub symbolic_input: Vec<String>,
    pub extra_args: Vec<String>,
    pub env_file: Option<PathBuf>,
}

impl Invocation {
    pub fn variant(&self) -> Variant {
        if self.map_file.is_some() {
            Variant::ProfileGuided
        } else {
            Variant::Baseline
        }
    }

    /// Engine argument vector, in the positional order the engine requires:
    /// base flags, profile flags, env file, sandbox, output dir, artifact,
    /// symbolic input, extra arguments. The env-file flag is only emitted
    /// when the file exists.
    pub fn engine_args(&self, sandbox: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = BASE_FLAGS.iter().map(OsString::from).collect();

        if let Some(map_file) = &self.map_file {
            args.push("--use-vase".into());
            args.push(flag_with_path("--vase-map=", map_file));
        }

        if let Some(env_file) = &self.env_file {
            if env_file.exists() {
                args.push(flag_with_path("--env-file=", env_file));
            } else {
                tracing::warn!(path = %env_file.display(), "environment file not found, not passing it");
            }
        }

        args.push(flag_with_path("--run-in-dir=", sandbox));
        args.push(flag_with_path("--output-dir=", &self.output_dir));
        args.push(self.artifact.clone().into_os_string());
        args.extend(self.symbolic_input.iter().map(OsString::from));
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }
}

fn flag_with_path(flag: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push(path.as_os_str());
    arg
}

/// Disposable working directory for one run, removed on drop.
///
/// Seeded with `dirA/a.txt` (`hello`) and `dirA/subdir/b.txt` (`world`) so the
/// program under test always sees the same files.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn create(label: &str) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{label}-klee-"))
            .tempdir()?;

        let dir_a = dir.path().join("dirA");
        let subdir = dir_a.join("subdir");
        fs::create_dir_all(&subdir)?;
        fs::write(dir_a.join("a.txt"), "hello")?;
        fs::write(subdir.join("b.txt"), "world")?;

        Ok(Sandbox { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Outcome of one engine invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub success: bool,
    pub exit_code: i32,
    pub output_directory: PathBuf,
    #[serde(rename = "artifactCount")]
    pub generated_artifact_count: usize,
    pub statistics: BTreeMap<String, String>,
    pub combined_output: String,
    #[serde(default)]
    pub timed_out: bool,
}

impl RunRecord {
    fn failed(output_directory: &Path, exit_code: i32, message: String) -> Self {
        RunRecord {
            success: false,
            exit_code,
            output_directory: output_directory.to_path_buf(),
            generated_artifact_count: 0,
            statistics: BTreeMap::new(),
            combined_output: message,
            timed_out: exit_code == TIMEOUT_EXIT_CODE,
        }
    }
}

/// Parsed `key: value` statistics plus what was skipped on the way.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsParse {
    pub statistics: BTreeMap<String, String>,
    pub skipped_lines: usize,
    pub file_missing: bool,
}

/// Splits each line at its first colon; lines without one (or with an empty
/// key) are skipped, and later keys overwrite earlier ones.
pub fn parse_statistics(content: &str) -> StatsParse {
    let mut parsed = StatsParse::default();
    for line in content.lines() {
        match line.trim().split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                parsed.statistics.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => parsed.skipped_lines += 1,
        }
    }
    parsed
}

/// Reads the statistics file of an output directory. Absence is not an error.
pub fn read_statistics(path: &Path) -> StatsParse {
    match fs::read(path) {
        Ok(bytes) => parse_statistics(&String::from_utf8_lossy(&bytes)),
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %err, "failed to read engine statistics");
            }
            StatsParse {
                file_missing: true,
                ..StatsParse::default()
            }
        }
    }
}

/// Counts `test*.ktest` files in `dir`; a missing directory counts as zero.
pub fn count_generated_tests(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with("test") && name.ends_with(".ktest")
        })
        .count()
}

/// Runs the symbolic-execution engine under a timeout, one sandbox per call.
#[derive(Debug, Clone)]
pub struct EngineRunner {
    engine_bin: PathBuf,
    timeout: Duration,
}

impl EngineRunner {
    pub fn new(engine_bin: impl Into<PathBuf>) -> Self {
        EngineRunner {
            engine_bin: engine_bin.into(),
            timeout: ENGINE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn engine_bin(&self) -> &Path {
        &self.engine_bin
    }

    /// Runs one invocation to completion. Never fails: setup errors, non-zero
    /// exits and timeouts all come back as unsuccessful records.
    pub fn run(&self, program: &str, invocation: &Invocation) -> RunRecord {
        let variant = invocation.variant();
        let output_dir = invocation.output_dir.as_path();

        if let Err(err) = reset_dir(output_dir) {
            tracing::error!(program, %variant, error = %err, "cannot prepare output directory");
            return RunRecord::failed(output_dir, SPAWN_FAILURE_EXIT_CODE, err.to_string());
        }

        // Removed when this binding drops, on every path out of this function.
        let sandbox = match Sandbox::create(program) {
            Ok(sandbox) => sandbox,
            Err(err) => {
                tracing::error!(program, %variant, error = %err, "cannot create sandbox");
                return RunRecord::failed(output_dir, SPAWN_FAILURE_EXIT_CODE, err.to_string());
            }
        };

        let args = invocation.engine_args(sandbox.path());
        tracing::info!(program, %variant, "running engine");
        tracing::debug!(
            engine = %self.engine_bin.display(),
            args = ?args,
            "engine command"
        );

        let started = Instant::now();
        let record = match self.execute(&args) {
            Ok(Execution::Exited { status, output }) => {
                let exit_code = exit_code(status);
                let stats = read_statistics(&output_dir.join(STATS_FILE_NAME));
                if stats.file_missing {
                    tracing::warn!(program, %variant, "engine wrote no statistics file");
                }
                RunRecord {
                    success: exit_code == 0,
                    exit_code,
                    output_directory: output_dir.to_path_buf(),
                    generated_artifact_count: count_generated_tests(output_dir),
                    statistics: stats.statistics,
                    combined_output: output,
                    timed_out: false,
                }
            }
            Ok(Execution::TimedOut) => {
                tracing::warn!(program, %variant, timeout_secs = self.timeout.as_secs(), "engine timed out");
                RunRecord::failed(
                    output_dir,
                    TIMEOUT_EXIT_CODE,
                    format!("engine execution timed out after {}s", self.timeout.as_secs()),
                )
            }
            Err(err) => {
                tracing::error!(program, %variant, error = %err, "engine failed to run");
                RunRecord::failed(output_dir, SPAWN_FAILURE_EXIT_CODE, err.to_string())
            }
        };

        tracing::info!(
            program,
            %variant,
            success = record.success,
            exit_code = record.exit_code,
            tests = record.generated_artifact_count,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "engine finished"
        );
        record
    }

    fn execute(&self, args: &[OsString]) -> io::Result<Execution> {
        let mut command = Command::new(&self.engine_bin);
        command.args(args);
        execute_bounded(&mut command, self.timeout)
    }
}

pub(crate) enum Execution {
    Exited { status: ExitStatus, output: String },
    TimedOut,
}

/// Runs `command` in its own process group for at most `timeout`, capturing
/// stdout then stderr. Whatever the process leaves behind in its group is
/// killed once it exits, and output collection never outlives the deadline.
pub(crate) fn execute_bounded(command: &mut Command, timeout: Duration) -> io::Result<Execution> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command.spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) if Instant::now() >= deadline => break None,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                kill_tree(&mut child);
                return Err(err);
            }
        }
    };

    match status {
        Some(status) => {
            // Background children still holding the pipes would block the readers.
            kill_group(child.id());
            let mut output = collect(stdout, deadline);
            output.push_str(&collect(stderr, deadline));
            Ok(Execution::Exited { status, output })
        }
        None => {
            // Partial output of a killed run is discarded; the readers finish
            // once the last writer in the group is gone.
            kill_tree(&mut child);
            Ok(Execution::TimedOut)
        }
    }
}

fn reset_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            let _ = tx.send(buffer);
        });
        rx
    })
}

/// Waits for a reader until `deadline` (at least one poll interval); a pipe
/// still held open past it yields empty output.
fn collect(reader: Option<Receiver<Vec<u8>>>, deadline: Instant) -> String {
    let wait = deadline.saturating_duration_since(Instant::now()).max(POLL_INTERVAL);
    reader
        .and_then(|rx| rx.recv_timeout(wait).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        // SAFETY: signalling a process group we created; no memory is shared.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kills the child's whole process group and reaps the child.
fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

/// Exit code of a finished process. On Unix a signal death maps to `128 + signal`.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    SPAWN_FAILURE_EXIT_CODE
}
