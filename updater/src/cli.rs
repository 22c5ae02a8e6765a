use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::settings::{self, PartialRequest, UpdateRequest};

const ABOUT: &str = "Closes the calling application, downloads its new installer and runs it.";

const LONG_ABOUT: &str = "\
Closes the calling application, downloads its new installer and runs it.

Settings are read from the [Updater] section of an INI config file (--config, or update.ini next \
to the executable). Flags passed on the command line overwrite the config file items.
--download_url and --temp_download_directory are required unless the config file provides them.

Example:
    updater --software-to-update MyApp --calling-pid 12345 --current-version 1.0 --noGUI \\
        --download_url https://example.com/myapp/latest --temp_download_directory /tmp/myapp";

#[derive(Debug, Default, Parser)]
#[command(name = "updater", version, about = ABOUT, long_about = LONG_ABOUT)]
pub struct Args {
    /// Name of the software to update
    #[arg(long = "software-to-update", visible_alias = "software_to_update")]
    pub software_to_update: Option<String>,

    /// PID of the program calling the updater
    #[arg(long = "calling-pid", visible_alias = "calling_pid")]
    pub calling_pid: Option<u32>,

    /// Version number of the current program
    #[arg(long = "current-version", visible_alias = "current_version")]
    pub current_version: Option<String>,

    /// Disable the progress bar and only log [default: false]
    #[arg(
        long = "noGUI",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub no_gui: Option<bool>,

    /// Path to the config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Download URL of the installer
    #[arg(long = "download_url")]
    pub download_url: Option<String>,

    /// Directory the installer is downloaded to
    #[arg(long = "temp_download_directory")]
    pub temp_download_directory: Option<PathBuf>,

    /// Run the installer as admin [default: true]
    #[arg(
        long = "run_installer_as_admin",
        action = ArgAction::SetTrue,
        overrides_with = "no_run_installer_as_admin"
    )]
    pub run_installer_as_admin: bool,

    #[arg(
        long = "no-run_installer_as_admin",
        action = ArgAction::SetTrue,
        overrides_with = "run_installer_as_admin"
    )]
    pub no_run_installer_as_admin: bool,

    /// Run the installer once downloaded, otherwise open its folder [default: true]
    #[arg(
        long = "run_after_download",
        action = ArgAction::SetTrue,
        overrides_with = "no_run_after_download"
    )]
    pub run_after_download: bool,

    #[arg(
        long = "no-run_after_download",
        action = ArgAction::SetTrue,
        overrides_with = "run_after_download"
    )]
    pub no_run_after_download: bool,

    /// Extra flags handed to the installer, e.g. "/qn" for MSI installers
    #[arg(long = "installer_flags_msi", allow_hyphen_values = true)]
    pub installer_flags_msi: Option<String>,
}

/// `--flag` / `--no-flag` pair, None when neither was passed
fn toggle(yes: bool, no: bool) -> Option<bool> {
    match (yes, no) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl Args {
    /// The command line as a settings layer, only explicitly passed flags are set.
    pub fn overrides(&self) -> PartialRequest {
        PartialRequest {
            software_to_update: self.software_to_update.clone(),
            calling_pid: self.calling_pid,
            current_version: self.current_version.clone(),
            no_gui: self.no_gui,
            download_url: self.download_url.clone(),
            temp_download_directory: self.temp_download_directory.clone(),
            run_installer_as_admin: toggle(
                self.run_installer_as_admin,
                self.no_run_installer_as_admin,
            ),
            run_after_download: toggle(self.run_after_download, self.no_run_after_download),
            installer_flags_msi: self.installer_flags_msi.clone(),
        }
    }

    /// Config file first, then the command line on top of it.
    pub async fn resolve(&self) -> settings::Result<UpdateRequest> {
        let file = settings::load_config(self.config.as_deref()).await?;
        file.merge(self.overrides()).resolve()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;
    use downloader::util::TestResult;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> PartialRequest {
        let argv = std::iter::once("updater").chain(args.iter().copied());
        Args::try_parse_from(argv).expect("valid args").overrides()
    }

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn nothing_passed_sets_nothing() {
        assert_eq!(parse(&[]), PartialRequest::default());
    }

    #[test]
    fn flags_become_overrides() {
        let layer = parse(&[
            "--software-to-update",
            "MyApp",
            "--calling-pid",
            "12345",
            "--current-version",
            "1.0",
            "--download_url",
            "https://example.com/latest",
            "--temp_download_directory",
            "/tmp/u",
            "--installer_flags_msi",
            "/qn /norestart",
        ]);
        assert_eq!(layer.software_to_update.as_deref(), Some("MyApp"));
        assert_eq!(layer.calling_pid, Some(12345));
        assert_eq!(layer.current_version.as_deref(), Some("1.0"));
        assert_eq!(layer.download_url.as_deref(), Some("https://example.com/latest"));
        assert_eq!(layer.temp_download_directory, Some(PathBuf::from("/tmp/u")));
        assert_eq!(layer.installer_flags_msi.as_deref(), Some("/qn /norestart"));
        assert_eq!(layer.run_after_download, None);
        assert_eq!(layer.no_gui, None);
    }

    #[test]
    fn no_gui_accepts_bare_and_valued_forms() {
        assert_eq!(parse(&["--noGUI"]).no_gui, Some(true));
        assert_eq!(parse(&["--noGUI=True"]).no_gui, Some(true));
        assert_eq!(parse(&["--noGUI=false"]).no_gui, Some(false));
    }

    #[test]
    fn toggles_last_one_wins() {
        assert_eq!(parse(&["--no-run_after_download"]).run_after_download, Some(false));
        assert_eq!(
            parse(&["--no-run_after_download", "--run_after_download"]).run_after_download,
            Some(true)
        );
        assert_eq!(
            parse(&["--run_installer_as_admin", "--no-run_installer_as_admin"])
                .run_installer_as_admin,
            Some(false)
        );
    }

    #[tokio::test]
    async fn command_line_beats_config_file() -> TestResult<()> {
        let tmp_dir = tempfile::TempDir::new()?;
        let path = tmp_dir.path().join("update.ini");
        tokio::fs::write(
            &path,
            "[Updater]\ndownload_url = https://example.com/old\ntemp_download_directory = /tmp/u\nrun_after_download = True\nnoGUI = True\n",
        )
        .await?;
        let config = path.to_string_lossy().to_string();
        let args = Args::try_parse_from([
            "updater",
            "--config",
            config.as_str(),
            "--download_url",
            "https://example.com/new",
            "--no-run_after_download",
        ])?;
        let request = args.resolve().await?;
        assert_eq!(request.download_url, "https://example.com/new");
        assert_eq!(request.download_directory, PathBuf::from("/tmp/u"));
        assert!(!request.run_after_download);
        assert!(request.run_as_admin);
        // headless only through the file still gets progress lines in the log
        assert!(request.headless);
        assert_eq!(crate::presenter::default_log_level(&request), "info");
        Ok(())
    }
}
