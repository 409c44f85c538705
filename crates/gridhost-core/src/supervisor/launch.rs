//! Launch plan: how to start the service file for a given runtime language.
//!
//! | language    | file     | command                 |
//! |-------------|----------|-------------------------|
//! | native      | any      | the file itself         |
//! | managed     | `.dll`   | `dotnet <file>`         |
//! | managed     | `.jar`   | `java -jar <file>`      |
//! | interpreted | `.py`    | `python3 <file>`        |
//! | any other   | any      | the file itself         |
//!
//! The child runs in the directory that contains the service file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use crate::config::{ENV_SESSION_ID, ENV_SVC_HOSTNAME, ENV_SVC_PORT, RuntimeLanguage};

pub const DOTNET: &str = "dotnet";
pub const JAVA: &str = "java";
pub const PIP: &str = "pip3";
pub const PYTHON: &str = if cfg!(windows) { "python" } else { "python3" };
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dependency install failed: {0}")]
    DependencyInstall(String),

    #[error("service exited right after start: {0}")]
    ExitedOnStart(ExitStatus),

    #[error("no free local port found")]
    NoFreePort,

    #[error("cannot address service at {address}: {source}")]
    Endpoint {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
    /// `requirements.txt` to install before the first start.
    pub requirements: Option<PathBuf>,
}

impl LaunchPlan {
    /// A relative `service_file` is resolved against the agent's current directory.
    pub fn resolve(language: RuntimeLanguage, service_file: &Path) -> Self {
        let service_file = absolute(service_file);
        let service_file = service_file.as_path();
        let working_dir = service_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let file_name = service_file
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| service_file.as_os_str().to_os_string());
        let extension = service_file
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let as_is = || (service_file.as_os_str().to_os_string(), Vec::new());
        let (program, args) = match (language, extension.as_deref()) {
            (RuntimeLanguage::Managed, Some("dll")) => (DOTNET.into(), vec![file_name]),
            (RuntimeLanguage::Managed, Some("jar")) => {
                (JAVA.into(), vec!["-jar".into(), file_name])
            }
            (RuntimeLanguage::Interpreted, Some("py")) => (PYTHON.into(), vec![file_name]),
            _ => as_is(),
        };

        let requirements = match (language, extension.as_deref()) {
            (RuntimeLanguage::Interpreted, Some("py")) => {
                let manifest = working_dir.join(REQUIREMENTS_FILE);
                manifest.is_file().then_some(manifest)
            }
            _ => None,
        };

        Self {
            program,
            args,
            working_dir,
            requirements,
        }
    }

    /// Command for one start on `port`. The child is killed when its handle drops.
    pub fn command(&self, port: u16, session_id: &str, service_host: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(ENV_SVC_PORT, port.to_string())
            .env(ENV_SESSION_ID, session_id)
            .env(ENV_SVC_HOSTNAME, service_host)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if !self.working_dir.as_os_str().is_empty() {
            command.current_dir(&self.working_dir);
        }
        command
    }

    pub fn display(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().into_owned()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }
}

/// `pip3 install -r <manifest>`, run in the manifest's directory.
pub async fn install_dependencies(manifest: &Path) -> Result<(), LaunchError> {
    let manifest = absolute(manifest);
    info!(manifest = %manifest.display(), "installing service dependencies");
    let mut command = Command::new(PIP);
    command
        .arg("install")
        .arg("-r")
        .arg(&manifest)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = manifest.parent() {
        command.current_dir(dir);
    }

    let status = command
        .status()
        .await
        .map_err(|e| LaunchError::DependencyInstall(format!("{PIP}: {e}")))?;
    if !status.success() {
        return Err(LaunchError::DependencyInstall(format!(
            "{PIP} exited with {status}, check {}",
            manifest.display()
        )));
    }
    info!("service dependencies installed");
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RuntimeLanguage::Native, "/svc/echo", "/svc/echo", &[])]
    #[case(RuntimeLanguage::Native, "/svc/echo.py", "/svc/echo.py", &[])]
    #[case(RuntimeLanguage::Managed, "/svc/Echo.dll", DOTNET, &["Echo.dll"])]
    #[case(RuntimeLanguage::Managed, "/svc/echo.jar", JAVA, &["-jar", "echo.jar"])]
    #[case(RuntimeLanguage::Managed, "/svc/Echo.exe", "/svc/Echo.exe", &[])]
    #[case(RuntimeLanguage::Interpreted, "/svc/echo.py", PYTHON, &["echo.py"])]
    #[case(RuntimeLanguage::Interpreted, "/svc/echo.exe", "/svc/echo.exe", &[])]
    fn command_line_by_language_and_extension(
        #[case] language: RuntimeLanguage,
        #[case] file: &str,
        #[case] program: &str,
        #[case] args: &[&str],
    ) {
        let plan = LaunchPlan::resolve(language, Path::new(file));

        assert_eq!(plan.program, OsString::from(program));
        let expected: Vec<OsString> = args.iter().map(OsString::from).collect();
        assert_eq!(plan.args, expected);
        assert_eq!(plan.working_dir, PathBuf::from("/svc"));
    }

    #[test]
    fn requirements_detected_next_to_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("main.py");
        std::fs::write(&script, "print('hi')\n").unwrap();
        std::fs::write(dir.path().join(REQUIREMENTS_FILE), "grpcio\n").unwrap();

        let plan = LaunchPlan::resolve(RuntimeLanguage::Interpreted, &script);
        assert_eq!(plan.requirements, Some(dir.path().join(REQUIREMENTS_FILE)));
    }

    #[test]
    fn no_requirements_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("main.py");
        std::fs::write(&script, "print('hi')\n").unwrap();

        let plan = LaunchPlan::resolve(RuntimeLanguage::Interpreted, &script);
        assert!(plan.requirements.is_none());
    }

    #[test]
    fn manifest_ignored_for_native_services() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("svc");
        std::fs::write(dir.path().join(REQUIREMENTS_FILE), "grpcio\n").unwrap();

        let plan = LaunchPlan::resolve(RuntimeLanguage::Native, &binary);
        assert!(plan.requirements.is_none());
    }

    #[test]
    fn display_joins_program_and_args() {
        let plan = LaunchPlan::resolve(RuntimeLanguage::Managed, Path::new("/svc/echo.jar"));
        assert_eq!(plan.display(), "java -jar echo.jar");
    }

    #[test]
    fn relative_service_file_is_made_absolute() {
        let cwd = std::env::current_dir().unwrap();

        let plan = LaunchPlan::resolve(RuntimeLanguage::Native, Path::new("work/svc/echo.sh"));

        assert_eq!(plan.program, cwd.join("work/svc/echo.sh").into_os_string());
        assert_eq!(plan.working_dir, cwd.join("work/svc"));
    }
}
