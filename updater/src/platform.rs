use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

/// OS side effects the updater needs once the installer is on disk.
pub trait Launcher: Send + Sync {
    /// Starts the installer and returns without waiting for it.
    fn launch_installer(&self, path: &Path, flags: Option<&str>, as_admin: bool)
        -> io::Result<()>;
    /// Opens `directory` in the platform's file browser.
    fn reveal_directory(&self, directory: &Path) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch_installer(
        &self,
        path: &Path,
        flags: Option<&str>,
        as_admin: bool,
    ) -> io::Result<()> {
        #[cfg(unix)]
        make_executable(path)?;
        let invocation = InstallerInvocation::new(path, flags, as_admin, cfg!(windows));
        log::info!("Launching installer: {:?}", invocation);
        let child = Command::from(&invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        log::info!("Installer running with PID {}", child.id());
        Ok(())
    }

    fn reveal_directory(&self, directory: &Path) -> io::Result<()> {
        let program = file_browser().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                "Could not open file manager. Unsupported operating system.",
            )
        })?;
        Command::new(program).arg(directory).spawn()?;
        Ok(())
    }
}

fn file_browser() -> Option<&'static str> {
    if cfg!(target_os = "windows") {
        Some("explorer")
    } else if cfg!(target_os = "macos") {
        Some("open")
    } else if cfg!(any(target_os = "linux", target_os = "freebsd", target_os = "openbsd")) {
        Some("xdg-open")
    } else {
        None
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    std::fs::set_permissions(path, permissions)
}

/// Program and arguments used to start an installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerInvocation {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl InstallerInvocation {
    /// `.msi` packages go through msiexec on Windows, elevation through `Start-Process -Verb RunAs`.
    /// Elevation is left to the installer itself on other platforms.
    pub fn new(path: &Path, flags: Option<&str>, as_admin: bool, windows: bool) -> Self {
        let flags: Vec<&str> = flags.map(|f| f.split_whitespace().collect()).unwrap_or_default();
        let is_msi = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("msi"))
            .unwrap_or(false);
        let (program, mut args): (OsString, Vec<OsString>) = if windows && is_msi {
            ("msiexec".into(), vec!["/i".into(), path.as_os_str().to_owned()])
        } else {
            (path.as_os_str().to_owned(), Vec::new())
        };
        args.extend(flags.into_iter().map(OsString::from));

        if !(windows && as_admin) {
            return Self { program, args };
        }
        let mut script = format!(
            "Start-Process -FilePath {} -Verb RunAs",
            ps_quote(&program.to_string_lossy())
        );
        if !args.is_empty() {
            let list: Vec<String> = args.iter().map(|a| ps_quote(&a.to_string_lossy())).collect();
            script.push_str(&format!(" -ArgumentList {}", list.join(",")));
        }
        Self {
            program: "powershell".into(),
            args: vec!["-NoProfile".into(), "-Command".into(), script.into()],
        }
    }
}

impl From<&InstallerInvocation> for Command {
    fn from(value: &InstallerInvocation) -> Self {
        let mut command = Command::new(&value.program);
        command.args(&value.args);
        command
    }
}

fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn os(values: &[&str]) -> Vec<OsString> {
        values.iter().map(OsString::from).collect()
    }

    #[test]
    fn plain_installer_gets_flags() {
        let path = PathBuf::from("/tmp/u/setup.sh");
        let invocation = InstallerInvocation::new(&path, Some("--quiet  --prefix=/opt"), true, false);
        assert_eq!(invocation.program, OsString::from("/tmp/u/setup.sh"));
        assert_eq!(invocation.args, os(&["--quiet", "--prefix=/opt"]));
    }

    #[test]
    fn msi_goes_through_msiexec_on_windows() {
        let path = PathBuf::from(r"C:\Temp\MyApp.MSI");
        let invocation = InstallerInvocation::new(&path, Some("/qn"), false, true);
        assert_eq!(invocation.program, OsString::from("msiexec"));
        assert_eq!(invocation.args, os(&["/i", r"C:\Temp\MyApp.MSI", "/qn"]));
    }

    #[test]
    fn admin_launch_is_elevated_on_windows() {
        let path = PathBuf::from(r"C:\Temp\it's setup.exe");
        let invocation = InstallerInvocation::new(&path, Some("/S"), true, true);
        assert_eq!(invocation.program, OsString::from("powershell"));
        assert_eq!(
            invocation.args,
            os(&[
                "-NoProfile",
                "-Command",
                r"Start-Process -FilePath 'C:\Temp\it''s setup.exe' -Verb RunAs -ArgumentList '/S'",
            ])
        );
    }

    #[cfg(unix)]
    #[test]
    fn launch_starts_a_detached_process() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let tmp_dir = tempfile::TempDir::new()?;
        let script = tmp_dir.path().join("install.sh");
        let marker = tmp_dir.path().join("installed");
        std::fs::write(&script, format!("#!/bin/sh\ntouch '{}'\n", marker.display()))?;
        SystemLauncher.launch_installer(&script, None, true)?;
        for _ in 0..100 {
            if marker.exists() {
                return Ok(());
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        panic!("installer script never ran");
    }

    #[test]
    fn launching_a_missing_installer_fails() {
        let result = SystemLauncher.launch_installer(Path::new("/definitely/not/here.exe"), None, false);
        assert!(result.is_err());
    }
}
