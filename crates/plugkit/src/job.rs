//! Bounded execution of version-control subprocesses.
//!
//! A [`JobRunner`] owns a rayon pool sized to the configured concurrency
//! ceiling. Every job gets its own deadline; a job that overruns is killed and
//! reported as timed out while its siblings keep running. Jobs for the same
//! module never overlap: they are grouped and run in submission order on a
//! single worker.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, LazyLock, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default per-job deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Stderr lines git uses for failures even when the exit code is zero.
static FAILURE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(fatal|error):").expect("valid regex"));

/// Default pool size: three quarters of available parallelism, at least one.
pub fn default_threads() -> usize {
    let available = thread::available_parallelism().map_or(1, usize::from);
    (available * 3).div_ceil(4).max(1)
}

/// What a job does for its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Clone,
    Fetch,
    Checkout,
    Hook,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clone => "clone",
            Self::Fetch => "fetch",
            Self::Checkout => "checkout",
            Self::Hook => "hook",
        })
    }
}

/// One unit of subprocess work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Module this job belongs to
    pub module: String,
    pub phase: Phase,
    pub program: String,
    pub args: Vec<String>,
    /// Working directory
    pub cwd: PathBuf,
    pub timeout: Duration,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl Job {
    pub fn new(
        module: impl Into<String>,
        phase: Phase,
        program: impl Into<String>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            module: module.into(),
            phase,
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            timeout: DEFAULT_TIMEOUT,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Command line for logs and error messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of one job.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job: Job,
    /// Exit code; `None` when killed, timed out or never spawned
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub started: Instant,
    pub elapsed: Duration,
    pub timed_out: bool,
    /// Set when the process could not be started or waited on
    pub spawn_error: Option<String>,
}

impl JobResult {
    /// Zero exit, no timeout, and no failure pattern on stderr.
    pub fn is_success(&self) -> bool {
        self.status == Some(0)
            && !self.timed_out
            && self.spawn_error.is_none()
            && !FAILURE_PATTERN.is_match(&self.stderr)
    }

    /// The error this result represents, if any.
    pub fn error(&self) -> Option<Error> {
        if self.timed_out {
            return Some(Error::JobTimedOut {
                name: self.job.module.clone(),
                phase: self.job.phase,
                timeout: self.job.timeout,
            });
        }
        if self.is_success() {
            return None;
        }

        let message = match &self.spawn_error {
            Some(e) => e.clone(),
            None if !self.stderr.trim().is_empty() => self.stderr.trim().to_string(),
            None => format!("'{}' exited with {:?}", self.job.command_line(), self.status),
        };

        Some(Error::JobFailed {
            name: self.job.module.clone(),
            phase: self.job.phase,
            status: self.status,
            message,
        })
    }

    /// Convert into a `Result`, keeping the successful result.
    pub fn into_result(self) -> Result<JobResult> {
        match self.error() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    pub fn finished(&self) -> Instant {
        self.started + self.elapsed
    }
}

/// Receives per-job progress from worker threads.
pub trait Progress: Sync {
    fn on_batch_start(&self, _total: usize) {}
    fn on_job_complete(&self, _result: &JobResult) {}
    fn on_batch_complete(&self) {}
}

/// No-op progress reporter.
pub struct NoProgress;

impl Progress for NoProgress {}

/// Runs batches of jobs on a bounded pool.
pub struct JobRunner {
    pool: rayon::ThreadPool,
    n_threads: usize,
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("n_threads", &self.n_threads)
            .finish()
    }
}

impl JobRunner {
    pub fn new(n_threads: usize) -> Result<Self> {
        if n_threads == 0 {
            return Err(Error::Config("job.n_threads must be at least 1".into()));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("plugkit-job-{i}"))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        Ok(Self { pool, n_threads })
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Run a batch; results come back in submission order.
    pub fn run(&self, jobs: Vec<Job>) -> Vec<JobResult> {
        self.run_with(jobs, &NoProgress)
    }

    /// Run a batch, reporting each completion to `progress`.
    pub fn run_with(&self, jobs: Vec<Job>, progress: &dyn Progress) -> Vec<JobResult> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let total = jobs.len();
        progress.on_batch_start(total);

        let groups = group_by_module(jobs);
        let mut indexed: Vec<(usize, JobResult)> = self.pool.install(|| {
            groups
                .into_par_iter()
                .flat_map_iter(|group| {
                    group
                        .into_iter()
                        .map(|(index, job)| {
                            let result = execute(job);
                            log::debug!(
                                "{} {} finished in {:?} (status {:?}, timed out: {})",
                                result.job.phase,
                                result.job.module,
                                result.elapsed,
                                result.status,
                                result.timed_out
                            );
                            progress.on_job_complete(&result);
                            (index, result)
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        });

        progress.on_batch_complete();

        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}

/// Group jobs by module, keeping submission order within and across groups.
fn group_by_module(jobs: Vec<Job>) -> Vec<Vec<(usize, Job)>> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<(usize, Job)>> = Vec::new();

    for (index, job) in jobs.into_iter().enumerate() {
        match slots.get(&job.module) {
            Some(&slot) => groups[slot].push((index, job)),
            None => {
                slots.insert(job.module.clone(), groups.len());
                groups.push(vec![(index, job)]);
            }
        }
    }
    groups
}

type Captured = Arc<Mutex<Vec<u8>>>;

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> (Captured, JoinHandle<()>) {
    let buffer: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let handle = thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match source.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => match sink.lock() {
                    Ok(mut locked) => locked.extend_from_slice(&chunk[..n]),
                    Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                },
            }
        }
    });
    (buffer, handle)
}

fn drain(buffer: &Captured) -> String {
    let bytes = match buffer.lock() {
        Ok(locked) => locked.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

fn build_command(job: &Job) -> Command {
    let mut cmd = Command::new(&job.program);
    cmd.args(&job.args)
        .current_dir(&job.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &job.env {
        cmd.env(key, value);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group so a timeout can kill helpers like git-remote-https.
        cmd.process_group(0);
    }

    cmd
}

#[allow(unsafe_code)]
fn kill(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = i32::try_from(child.id()) {
            // SAFETY: signalling a process group we created; no memory is touched.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Run one job to completion or deadline.
fn execute(job: Job) -> JobResult {
    let started = Instant::now();

    let mut child = match build_command(&job).spawn() {
        Ok(child) => child,
        Err(e) => {
            return JobResult {
                spawn_error: Some(format!("failed to execute {}: {e}", job.program)),
                job,
                status: None,
                stdout: String::new(),
                stderr: String::new(),
                started,
                elapsed: started.elapsed(),
                timed_out: false,
            };
        }
    };

    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);
    let deadline = started + job.timeout;

    let mut spawn_error = None;
    let (status, timed_out) = loop {
        match child.try_wait() {
            Ok(Some(status)) => break (status.code(), false),
            Ok(None) if Instant::now() >= deadline => {
                kill(&mut child);
                break (None, true);
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill(&mut child);
                spawn_error = Some(format!("failed to wait for {}: {e}", job.program));
                break (None, false);
            }
        }
    };

    // After a kill, orphaned grandchildren may still hold the pipes open;
    // take what was captured instead of waiting for EOF.
    let collect = |reader: Option<(Captured, JoinHandle<()>)>| match reader {
        Some((buffer, handle)) => {
            if !timed_out {
                let _ = handle.join();
            }
            drain(&buffer)
        }
        None => String::new(),
    };

    JobResult {
        stdout: collect(stdout),
        stderr: collect(stderr),
        job,
        status,
        started,
        elapsed: started.elapsed(),
        timed_out,
        spawn_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(module: &str, script: &str) -> Job {
        Job::new(module, Phase::Fetch, "sh", std::env::temp_dir())
            .arg("-c")
            .arg(script)
    }

    /// Largest number of results whose execution windows overlap.
    fn peak_overlap(results: &[JobResult]) -> usize {
        let mut events: Vec<(Instant, i32)> = Vec::new();
        for r in results {
            events.push((r.started, 1));
            events.push((r.finished(), -1));
        }
        // Ends sort before starts at the same instant.
        events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut current = 0i32;
        let mut peak = 0i32;
        for (_, delta) in events {
            current += delta;
            peak = peak.max(current);
        }
        peak as usize
    }

    #[test]
    fn test_default_threads_is_positive() {
        assert!(default_threads() >= 1);
    }

    #[test]
    fn test_zero_threads_is_config_error() {
        assert!(matches!(JobRunner::new(0), Err(Error::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_results_in_submission_order_with_output() {
        let runner = JobRunner::new(4).unwrap();
        let jobs = (0..6)
            .map(|i| sh(&format!("m{i}"), &format!("sleep 0.0{}; echo out{i}", 6 - i)))
            .collect();

        let results = runner.run(jobs);
        assert_eq!(results.len(), 6);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.job.module, format!("m{i}"));
            assert_eq!(result.stdout.trim(), format!("out{i}"));
            assert!(result.is_success());
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_concurrency_never_exceeds_ceiling() {
        let runner = JobRunner::new(2).unwrap();
        let jobs = (0..6).map(|i| sh(&format!("m{i}"), "sleep 0.15")).collect();

        let results = runner.run(jobs);
        assert!(results.iter().all(JobResult::is_success));
        assert!(peak_overlap(&results) <= 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_same_module_jobs_do_not_overlap() {
        let runner = JobRunner::new(4).unwrap();
        let jobs = (0..3).map(|_| sh("shared", "sleep 0.1")).collect();

        let results = runner.run(jobs);
        assert_eq!(peak_overlap(&results), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_is_isolated() {
        let runner = JobRunner::new(2).unwrap();
        let jobs = vec![
            sh("slow", "sleep 5").timeout(Duration::from_millis(200)),
            sh("fast", "echo ok"),
        ];

        let started = Instant::now();
        let results = runner.run(jobs);
        assert!(started.elapsed() < Duration::from_secs(4));

        assert!(results[0].timed_out);
        assert!(matches!(results[0].error(), Some(Error::JobTimedOut { .. })));
        assert!(results[1].is_success());
        assert_eq!(results[1].stdout.trim(), "ok");
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_does_not_cancel_siblings() {
        let runner = JobRunner::new(2).unwrap();
        let jobs = vec![
            sh("bad", "echo 'fatal: repository not found' >&2; exit 128"),
            sh("good", "echo fine"),
            sh("warns", "echo 'error: pathspec did not match' >&2; exit 0"),
        ];

        let results = runner.run(jobs);
        match results[0].error() {
            Some(Error::JobFailed { status, message, .. }) => {
                assert_eq!(status, Some(128));
                assert_eq!(message, "fatal: repository not found");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(results[1].is_success());
        assert!(!results[2].is_success());
    }

    #[test]
    fn test_missing_program_reports_spawn_error() {
        let runner = JobRunner::new(1).unwrap();
        let job = Job::new(
            "ghost",
            Phase::Clone,
            "plugkit-definitely-missing-binary",
            std::env::temp_dir(),
        );

        let results = runner.run(vec![job]);
        assert!(results[0].spawn_error.is_some());
        assert!(matches!(results[0].error(), Some(Error::JobFailed { .. })));
    }

    #[test]
    fn test_group_by_module_keeps_order() {
        let jobs = vec![
            Job::new("a", Phase::Clone, "git", "."),
            Job::new("b", Phase::Clone, "git", "."),
            Job::new("a", Phase::Checkout, "git", "."),
        ];
        let groups = group_by_module(jobs);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].iter().map(|(i, _)| *i).collect::<Vec<_>>(), [0, 2]);
        assert_eq!(groups[0][1].1.phase, Phase::Checkout);
    }
}
