//! External tool layer.
//!
//! Backends never spawn processes themselves; they go through a
//! [`ToolRunner`] so the whole transform layer can be exercised with a mock.
//! [`SystemTools`] is the real implementation: `which` for discovery and a
//! polled child process for bounded execution.
//!
//! Tool availability is probed **once**, when the engine starts, and frozen
//! into a [`ToolAvailability`]. Backends build their strategy tables from
//! that snapshot and never re-probe, so a tool that disappears mid-run shows
//! up as per-item failures rather than a silent switch to the fallback.

use super::backend::BackendError;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// ImageMagick; handles every format and is the uniform fallback.
pub const MAGICK: &str = "magick";
/// Lossy JPEG optimizer, rewrites in place.
pub const JPEGOPTIM: &str = "jpegoptim";
/// Lossy PNG palette quantizer.
pub const PNGQUANT: &str = "pngquant";
/// WebP encoder.
pub const CWEBP: &str = "cwebp";

/// Every tool a backend may ask for.
pub const KNOWN_TOOLS: &[&str] = &[MAGICK, JPEGOPTIM, PNGQUANT, CWEBP];

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of one tool invocation that ran to exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Collaborator interface to the external transformation tools.
pub trait ToolRunner: Send + Sync {
    /// Is `tool` installed? Called once per tool at startup.
    fn probe(&self, tool: &str) -> bool;

    /// Run `tool` with `args`, killing it if it outlives `timeout`.
    ///
    /// A non-zero exit is *not* an error here; see [`run_checked`].
    fn invoke(
        &self,
        tool: &str,
        args: &[OsString],
        timeout: Duration,
    ) -> Result<ToolOutput, BackendError>;
}

/// Invoke a tool and turn a non-zero exit into [`BackendError::ToolFailed`].
pub fn run_checked(
    runner: &dyn ToolRunner,
    tool: &str,
    args: &[OsString],
    timeout: Duration,
) -> Result<ToolOutput, BackendError> {
    let output = runner.invoke(tool, args, timeout)?;
    if output.success() {
        Ok(output)
    } else {
        Err(BackendError::ToolFailed {
            tool: tool.to_string(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Runs tools found on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTools;

impl ToolRunner for SystemTools {
    fn probe(&self, tool: &str) -> bool {
        match which::which(tool) {
            Ok(path) => {
                tracing::debug!(tool, path = %path.display(), "Tool found");
                true
            }
            Err(_) => false,
        }
    }

    fn invoke(
        &self,
        tool: &str,
        args: &[OsString],
        timeout: Duration,
    ) -> Result<ToolOutput, BackendError> {
        let mut child = Command::new(tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BackendError::Spawn {
                tool: tool.to_string(),
                source,
            })?;

        // Drain both pipes on their own threads so a chatty tool cannot
        // block on a full pipe while we wait for it.
        let stdout_handle = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_handle = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    // Reader threads stay detached: a grandchild holding the
                    // pipes would keep them open past the timeout.
                    tracing::warn!(tool, secs = timeout.as_secs(), "Tool timed out, killed");
                    return Err(BackendError::TimedOut {
                        tool: tool.to_string(),
                        secs: timeout.as_secs(),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(BackendError::Io(err));
                }
            }
        };

        let stdout = stdout_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        Ok(ToolOutput {
            code: status.code(),
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Which tools were found when the engine started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolAvailability {
    tools: BTreeMap<String, bool>,
}

impl ToolAvailability {
    /// Probe each tool exactly once.
    pub fn probe(runner: &dyn ToolRunner, names: &[&str]) -> Self {
        let tools = names
            .iter()
            .map(|name| {
                let found = runner.probe(name);
                if !found {
                    tracing::warn!(tool = name, "Tool not found on PATH");
                }
                (name.to_string(), found)
            })
            .collect();
        Self { tools }
    }

    /// Unknown tools count as unavailable.
    pub fn is_available(&self, tool: &str) -> bool {
        self.tools.get(tool).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.tools.iter().map(|(name, found)| (name.as_str(), *found))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&str, &[OsString]) -> Result<ToolOutput, BackendError> + Send + Sync>;

    /// Mock tool runner. Records every invocation and delegates the result to
    /// a handler, which may also create files to stand in for tool output.
    pub struct MockTools {
        pub installed: HashSet<String>,
        pub probes: Mutex<Vec<String>>,
        pub calls: Mutex<Vec<(String, Vec<String>)>>,
        handler: Handler,
    }

    impl MockTools {
        pub fn new(installed: &[&str]) -> Self {
            Self::with_handler(installed, |_, _| {
                Ok(ToolOutput {
                    code: Some(0),
                    ..Default::default()
                })
            })
        }

        pub fn with_handler(
            installed: &[&str],
            handler: impl Fn(&str, &[OsString]) -> Result<ToolOutput, BackendError>
            + Send
            + Sync
            + 'static,
        ) -> Self {
            Self {
                installed: installed.iter().map(|s| s.to_string()).collect(),
                probes: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
                handler: Box::new(handler),
            }
        }

        pub fn availability(&self) -> ToolAvailability {
            ToolAvailability::probe(self, KNOWN_TOOLS)
        }

        pub fn get_calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ToolRunner for MockTools {
        fn probe(&self, tool: &str) -> bool {
            self.probes.lock().unwrap().push(tool.to_string());
            self.installed.contains(tool)
        }

        fn invoke(
            &self,
            tool: &str,
            args: &[OsString],
            _timeout: Duration,
        ) -> Result<ToolOutput, BackendError> {
            self.calls.lock().unwrap().push((
                tool.to_string(),
                args.iter()
                    .map(|a| a.to_string_lossy().into_owned())
                    .collect(),
            ));
            (self.handler)(tool, args)
        }
    }

    /// The last argument, which is the output path for every tool we drive.
    pub fn last_arg(args: &[OsString]) -> std::path::PathBuf {
        std::path::PathBuf::from(args.last().cloned().unwrap_or_default())
    }

    #[test]
    fn availability_probes_each_tool_once() {
        let tools = MockTools::new(&[MAGICK]);
        let availability = tools.availability();
        assert!(availability.is_available(MAGICK));
        assert!(!availability.is_available(CWEBP));
        assert!(!availability.is_available("not-a-tool"));
        assert_eq!(tools.probes.lock().unwrap().len(), KNOWN_TOOLS.len());
    }

    #[test]
    fn run_checked_maps_nonzero_exit() {
        let tools = MockTools::with_handler(&[], |_, _| {
            Ok(ToolOutput {
                code: Some(1),
                stdout: Vec::new(),
                stderr: "  corrupt file\n".into(),
            })
        });
        let err = run_checked(&tools, MAGICK, &[], Duration::from_secs(1)).unwrap_err();
        match err {
            BackendError::ToolFailed { tool, code, stderr } => {
                assert_eq!(tool, MAGICK);
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "corrupt file");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn availability_lists_tools_in_name_order() {
        let tools = MockTools::new(&[MAGICK]);
        let availability = ToolAvailability::probe(&tools, &[MAGICK, CWEBP]);
        let listed: Vec<_> = availability.iter().collect();
        assert_eq!(listed, vec![(CWEBP, false), (MAGICK, true)]);
    }

    #[test]
    fn system_tools_report_missing_binary_as_spawn_error() {
        let err = SystemTools
            .invoke(
                "media-batch-definitely-not-installed",
                &[],
                Duration::from_secs(1),
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::Spawn { .. }));
        assert!(!SystemTools.probe("media-batch-definitely-not-installed"));
    }

    #[cfg(unix)]
    #[test]
    fn system_tools_capture_exit_code() {
        let output = SystemTools
            .invoke(
                "sh",
                &["-c".into(), "echo oops >&2; exit 3".into()],
                Duration::from_secs(5),
            )
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn system_tools_kill_on_timeout() {
        let started = Instant::now();
        let err = SystemTools
            .invoke("sleep", &["5".into()], Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, BackendError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_is_not_extended_by_background_children() {
        // The backgrounded sleep inherits stdout and outlives the killed shell.
        let started = Instant::now();
        let err = SystemTools
            .invoke(
                "sh",
                &["-c".into(), "sleep 4 & sleep 10".into()],
                Duration::from_millis(200),
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
