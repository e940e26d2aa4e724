use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Executable '{0}' not found on PATH")]
    #[diagnostic(
        code(stagehand::process::executable_not_found),
        help("Install the service binary or add its location to PATH")
    )]
    ExecutableNotFound(String),

    #[error("Running out of available ports (cursor crossed {floor})")]
    #[diagnostic(
        code(stagehand::port::exhausted),
        help("The broker never reuses a port within one process; restart the test process")
    )]
    PortExhausted { floor: u16 },

    #[error("Failed to write config file '{path}': {source}")]
    #[diagnostic(code(stagehand::process::config_write))]
    ConfigWriteFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Process '{command}' failed: {reason}\n{output}")]
    #[diagnostic(
        code(stagehand::process::start_failed),
        help("The captured output above is the process's combined stdout/stderr")
    )]
    ProcessStartFailed {
        command: String,
        reason: String,
        output: String,
    },

    #[error("'{target}' not ready within {waited:?}")]
    #[diagnostic(
        code(stagehand::wait::readiness_timeout),
        help("The service may be slow to start; raise the retry budget")
    )]
    ReadinessTimeout { target: String, waited: Duration },

    #[error("Failed to create container from image '{image}': {reason}")]
    #[diagnostic(
        code(stagehand::container::create_failed),
        help("Check that the Docker daemon is running with `docker ps` and the image exists")
    )]
    ContainerCreateFailed { image: String, reason: String },

    #[error("Container {container} not running within {waited:?}")]
    #[diagnostic(
        code(stagehand::container::start_timeout),
        help("Inspect the image entrypoint; the container may exit immediately after starting")
    )]
    ContainerStartTimeout { container: String, waited: Duration },

    #[error("Container {container} not reachable at {address} within {waited:?}")]
    #[diagnostic(
        code(stagehand::container::unreachable),
        help("The process inside the container may listen on a different port than the exposed one")
    )]
    ContainerUnreachable {
        container: String,
        address: String,
        waited: Duration,
    },

    #[error("Container operation '{operation}' failed: {reason}")]
    #[diagnostic(code(stagehand::container::command_failed))]
    ContainerCommandFailed { operation: String, reason: String },

    #[error("Invalid lifecycle state: expected {expected}, found {found}")]
    #[diagnostic(
        code(stagehand::guard::invalid_state),
        help("Guards are single-use: one start, one stop. Construct a new instance to retry")
    )]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Unsupported service type '{0}'")]
    #[diagnostic(
        code(stagehand::registry::unsupported),
        help("Register a factory for this type before asking a launcher to start it")
    )]
    UnsupportedServiceType(String),

    #[error("Service type '{0}' is already registered")]
    #[diagnostic(
        code(stagehand::registry::duplicate),
        help("Each service type registers exactly one factory, during process initialization")
    )]
    DuplicateRegistration(String),

    #[error("Service rejected option '{key}': {reason}")]
    #[diagnostic(code(stagehand::service::option_rejected))]
    DirectiveRejected { key: String, reason: String },

    #[error("Operation cancelled while waiting for '{0}'")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Collapse a list of errors into `None` (all succeeded), the single
    /// error, or [`Error::Multiple`]. Used by `stop_all` so teardown reports
    /// every failure instead of short-circuiting on the first.
    pub fn combine(errs: Vec<Error>) -> Option<Error> {
        match errs.len() {
            0 => None,
            1 => errs.into_iter().next(),
            _ => Some(Error::Multiple(errs)),
        }
    }
}
