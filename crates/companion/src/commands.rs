//! Power command validation and delayed execution
//!
//! # Two-phase design
//!
//! [`CommandExecutor::prepare`] does every check that can fail synchronously
//! (delay, platform support, executable on `PATH`) and hands back a
//! [`PreparedCommand`]. Running that value performs the delay and then the OS
//! command. The HTTP layer answers as soon as `prepare` succeeds and runs the
//! prepared command on a detached task, because a shutdown or reboot can take
//! the host away before any later response could be delivered.
//!
//! ## Command table
//!
//! | Action    | Linux                | macOS              | Windows                   |
//! |-----------|----------------------|--------------------|---------------------------|
//! | Shutdown  | `shutdown -h now`    | `shutdown -h now`  | `shutdown /s /t 0`        |
//! | Reboot    | `reboot` (fallback `shutdown -r now`) | same  | `shutdown /r /t 0`     |
//! | Sleep     | `systemctl suspend`  | `pmset sleepnow`   | `powershell` SetSuspendState |
//! | Hibernate | `systemctl hibernate`| unsupported        | `shutdown /h`             |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use wolite_core::PowerAction;

const WINDOWS_SUSPEND_SCRIPT: &str = "Add-Type -AssemblyName System.Windows.Forms; \
     [System.Windows.Forms.Application]::SetSuspendState('Suspend', $false, $false)";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("delay must be non-negative, got {0}")]
    NegativeDelay(i64),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("{action} is not supported on {platform}")]
    UnsupportedAction {
        action: PowerAction,
        platform: &'static str,
    },

    #[error("{0} executable not found")]
    ExecutableNotFound(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    ExitStatus { program: String, status: String },
}

impl CommandError {
    /// True for failures detected before anything was run
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Spawn { .. } | Self::ExitStatus { .. })
    }
}

/// Operating system family the command table is keyed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
    Unsupported(String),
}

impl Platform {
    /// Platform this binary was compiled for
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => Self::Linux,
            "macos" => Self::MacOs,
            "windows" => Self::Windows,
            other => Self::Unsupported(other.to_string()),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "macos",
            Self::Windows => "windows",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

/// Executable availability check
pub trait ExecutableLookup: Send + Sync {
    fn exists(&self, program: &str) -> bool;
}

/// `PATH` lookup via the `which` crate
pub struct PathLookup;

impl ExecutableLookup for PathLookup {
    fn exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Runs a validated OS command
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<(), CommandError>;
}

/// Spawns the real process and waits for it to exit
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<(), CommandError> {
        let status = tokio::process::Command::new(program)
            .args(args)
            .status()
            .await
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::ExitStatus {
                program: program.to_string(),
                status: status.to_string(),
            })
        }
    }
}

/// A validated action waiting for its delay to elapse
pub struct PreparedCommand {
    action: PowerAction,
    program: String,
    args: Vec<String>,
    delay: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for PreparedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCommand")
            .field("action", &self.action)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("delay", &self.delay)
            .finish()
    }
}

impl PreparedCommand {
    pub fn action(&self) -> PowerAction {
        self.action
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait out the delay, then run the command
    ///
    /// A zero delay runs immediately without touching the timer.
    pub async fn execute(self) -> Result<(), CommandError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        debug!(program = %self.program, args = ?self.args, "running power command");
        self.runner.run(&self.program, &self.args).await
    }
}

/// Platform-aware power command factory
pub struct CommandExecutor {
    platform: Platform,
    lookup: Arc<dyn ExecutableLookup>,
    runner: Arc<dyn CommandRunner>,
}

impl CommandExecutor {
    /// Executor for the current OS using `PATH` lookup and real processes
    pub fn system() -> Self {
        Self::new(Platform::current(), Arc::new(PathLookup), Arc::new(SystemRunner))
    }

    pub fn new(
        platform: Platform,
        lookup: Arc<dyn ExecutableLookup>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            platform,
            lookup,
            runner,
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Validate `action` and return the deferred command
    ///
    /// # Errors
    /// Only validation errors: negative delay, unsupported platform/action, missing executable.
    pub fn prepare(
        &self,
        action: PowerAction,
        delay_secs: i64,
    ) -> Result<PreparedCommand, CommandError> {
        if delay_secs < 0 {
            return Err(CommandError::NegativeDelay(delay_secs));
        }

        let (program, args) = self.resolve(action)?;

        Ok(PreparedCommand {
            action,
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            delay: Duration::from_secs(delay_secs as u64),
            runner: Arc::clone(&self.runner),
        })
    }

    fn resolve(&self, action: PowerAction) -> Result<(&'static str, Vec<&'static str>), CommandError> {
        use PowerAction::*;

        let (program, args) = match (&self.platform, action) {
            (Platform::Unsupported(os), _) => {
                return Err(CommandError::UnsupportedPlatform(os.clone()))
            }

            (Platform::Windows, Shutdown) => ("shutdown", vec!["/s", "/t", "0"]),
            (Platform::Windows, Reboot) => ("shutdown", vec!["/r", "/t", "0"]),
            (Platform::Windows, Sleep) => ("powershell", vec!["-Command", WINDOWS_SUSPEND_SCRIPT]),
            (Platform::Windows, Hibernate) => ("shutdown", vec!["/h"]),

            (Platform::Linux | Platform::MacOs, Shutdown) => ("shutdown", vec!["-h", "now"]),
            (Platform::Linux | Platform::MacOs, Reboot) => {
                if self.lookup.exists("reboot") {
                    ("reboot", vec![])
                } else if self.lookup.exists("shutdown") {
                    ("shutdown", vec!["-r", "now"])
                } else {
                    return Err(CommandError::ExecutableNotFound(
                        "neither reboot nor shutdown".to_string(),
                    ));
                }
            }

            (Platform::Linux, Sleep) => ("systemctl", vec!["suspend"]),
            (Platform::Linux, Hibernate) => ("systemctl", vec!["hibernate"]),
            (Platform::MacOs, Sleep) => ("pmset", vec!["sleepnow"]),
            (Platform::MacOs, Hibernate) => {
                return Err(CommandError::UnsupportedAction {
                    action,
                    platform: self.platform.name(),
                })
            }
        };

        if !self.lookup.exists(program) {
            return Err(CommandError::ExecutableNotFound(program.to_string()));
        }

        Ok((program, args))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeLookup, RecordingRunner};
    use super::*;
    use tokio::time::Instant;

    const ALL_BINARIES: &[&str] = &["shutdown", "reboot", "systemctl", "pmset", "powershell"];

    fn executor(platform: Platform, programs: &[&'static str]) -> (CommandExecutor, Arc<RecordingRunner>) {
        let runner = Arc::new(RecordingRunner::default());
        let exec = CommandExecutor::new(platform, FakeLookup::with(programs), runner.clone());
        (exec, runner)
    }

    fn command_line(exec: &CommandExecutor, action: PowerAction) -> String {
        let prepared = exec.prepare(action, 0).unwrap();
        std::iter::once(prepared.program().to_string())
            .chain(prepared.args().iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_linux_table() {
        let (exec, _) = executor(Platform::Linux, ALL_BINARIES);
        assert_eq!(command_line(&exec, PowerAction::Shutdown), "shutdown -h now");
        assert_eq!(command_line(&exec, PowerAction::Reboot), "reboot");
        assert_eq!(command_line(&exec, PowerAction::Sleep), "systemctl suspend");
        assert_eq!(command_line(&exec, PowerAction::Hibernate), "systemctl hibernate");
    }

    #[test]
    fn test_macos_table() {
        let (exec, _) = executor(Platform::MacOs, ALL_BINARIES);
        assert_eq!(command_line(&exec, PowerAction::Shutdown), "shutdown -h now");
        assert_eq!(command_line(&exec, PowerAction::Sleep), "pmset sleepnow");

        let err = exec.prepare(PowerAction::Hibernate, 0).unwrap_err();
        assert!(matches!(err, CommandError::UnsupportedAction { .. }));
        assert!(err.is_validation());
    }

    #[test]
    fn test_windows_table() {
        let (exec, _) = executor(Platform::Windows, ALL_BINARIES);
        assert_eq!(command_line(&exec, PowerAction::Shutdown), "shutdown /s /t 0");
        assert_eq!(command_line(&exec, PowerAction::Reboot), "shutdown /r /t 0");
        assert_eq!(command_line(&exec, PowerAction::Hibernate), "shutdown /h");

        let sleep = exec.prepare(PowerAction::Sleep, 0).unwrap();
        assert_eq!(sleep.program(), "powershell");
        assert_eq!(sleep.args()[0], "-Command");
        assert!(sleep.args()[1].contains("SetSuspendState('Suspend', $false, $false)"));
    }

    #[test]
    fn test_reboot_falls_back_to_shutdown() {
        let (exec, _) = executor(Platform::Linux, &["shutdown"]);
        assert_eq!(command_line(&exec, PowerAction::Reboot), "shutdown -r now");

        let (exec, _) = executor(Platform::Linux, &[]);
        assert!(matches!(
            exec.prepare(PowerAction::Reboot, 0),
            Err(CommandError::ExecutableNotFound(_))
        ));
    }

    #[test]
    fn test_missing_executable_is_validation_error() {
        let (exec, _) = executor(Platform::Linux, &["shutdown"]);
        let err = exec.prepare(PowerAction::Sleep, 3).unwrap_err();
        assert!(matches!(err, CommandError::ExecutableNotFound(ref p) if p == "systemctl"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_unsupported_platform() {
        let (exec, _) = executor(Platform::Unsupported("plan9".to_string()), ALL_BINARIES);
        for action in PowerAction::ALL {
            let err = exec.prepare(action, 0).unwrap_err();
            assert!(matches!(err, CommandError::UnsupportedPlatform(ref os) if os == "plan9"));
        }
    }

    #[test]
    fn test_negative_delay_rejected() {
        let (exec, _) = executor(Platform::Linux, ALL_BINARIES);
        let err = exec.prepare(PowerAction::Shutdown, -1).unwrap_err();
        assert!(matches!(err, CommandError::NegativeDelay(-1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_runs_immediately() {
        let (exec, runner) = executor(Platform::Linux, ALL_BINARIES);
        let start = Instant::now();

        exec.prepare(PowerAction::Shutdown, 0).unwrap().execute().await.unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_elapses_before_run() {
        let (exec, runner) = executor(Platform::Linux, ALL_BINARIES);
        let prepared = exec.prepare(PowerAction::Reboot, 3).unwrap();
        assert_eq!(prepared.delay(), Duration::from_secs(3));
        assert!(runner.calls.lock().unwrap().is_empty());

        let start = Instant::now();
        prepared.execute().await.unwrap();

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0].0, "reboot");
        assert_eq!(calls[0].2 - start, Duration::from_secs(3));
    }

    #[test]
    fn test_execution_errors_are_not_validation() {
        let err = CommandError::ExitStatus {
            program: "shutdown".to_string(),
            status: "exit status: 1".to_string(),
        };
        assert!(!err.is_validation());
    }
}
