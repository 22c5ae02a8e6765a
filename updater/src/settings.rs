use downloader::Url;
use ini::{Ini, ParseOption};
use std::path::{Path, PathBuf};

/// Looked up next to the executable when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "update.ini";
/// Section of the config file holding the update settings
pub const CONFIG_SECTION: &str = "Updater";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("You must pass a URL for the download!")]
    MissingDownloadUrl,
    #[error("You must pass a temp directory for the download!")]
    MissingDownloadDirectory,
    #[error("Invalid download url '{0}': {1}")]
    InvalidUrl(String, String),
    #[error("Could not read config file '{0}': {1}")]
    Read(PathBuf, std::io::Error),
    #[error("Could not parse config file '{0}': {1}")]
    Parse(PathBuf, ini::ParseError),
    #[error("Invalid value '{1}' for config key '{0}'")]
    InvalidValue(String, String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One layer of settings (config file or command line), unset fields are `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialRequest {
    pub software_to_update: Option<String>,
    pub calling_pid: Option<u32>,
    pub current_version: Option<String>,
    pub no_gui: Option<bool>,
    pub download_url: Option<String>,
    pub temp_download_directory: Option<PathBuf>,
    pub run_installer_as_admin: Option<bool>,
    pub run_after_download: Option<bool>,
    pub installer_flags_msi: Option<String>,
}

/// Boolean spellings of INI files, `True`/`False` included
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

impl PartialRequest {
    /// Every field set in `overrides` replaces the one in `self`.
    pub fn merge(self, overrides: PartialRequest) -> PartialRequest {
        PartialRequest {
            software_to_update: overrides.software_to_update.or(self.software_to_update),
            calling_pid: overrides.calling_pid.or(self.calling_pid),
            current_version: overrides.current_version.or(self.current_version),
            no_gui: overrides.no_gui.or(self.no_gui),
            download_url: overrides.download_url.or(self.download_url),
            temp_download_directory: overrides
                .temp_download_directory
                .or(self.temp_download_directory),
            run_installer_as_admin: overrides
                .run_installer_as_admin
                .or(self.run_installer_as_admin),
            run_after_download: overrides.run_after_download.or(self.run_after_download),
            installer_flags_msi: overrides.installer_flags_msi.or(self.installer_flags_msi),
        }
    }

    /// Sets the field named by `key` from its raw config value. Keys are matched
    /// case-insensitively, empty values leave the field unset.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(());
        }
        let invalid = || Error::InvalidValue(key.to_owned(), value.to_owned());
        match key.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "software_to_update" => self.software_to_update = Some(value.to_owned()),
            "calling_pid" => self.calling_pid = Some(value.parse().map_err(|_| invalid())?),
            "current_version" => self.current_version = Some(value.to_owned()),
            "nogui" | "no_gui" => self.no_gui = Some(parse_bool(value).ok_or_else(invalid)?),
            "download_url" => self.download_url = Some(value.to_owned()),
            "temp_download_directory" => {
                self.temp_download_directory = Some(PathBuf::from(value))
            }
            "run_installer_as_admin" => {
                self.run_installer_as_admin = Some(parse_bool(value).ok_or_else(invalid)?)
            }
            "run_after_download" => {
                self.run_after_download = Some(parse_bool(value).ok_or_else(invalid)?)
            }
            "installer_flags_msi" => self.installer_flags_msi = Some(value.to_owned()),
            _ => log::warn!("Ignoring unknown config key '{}'", key),
        }
        Ok(())
    }

    /// Applies the defaults, fails if the download can't be described.
    pub fn resolve(self) -> Result<UpdateRequest> {
        let request = UpdateRequest {
            software_name: self.software_to_update.unwrap_or_default(),
            calling_pid: self.calling_pid,
            current_version: self.current_version.unwrap_or_default(),
            download_url: self.download_url.ok_or(Error::MissingDownloadUrl)?,
            download_directory: self
                .temp_download_directory
                .ok_or(Error::MissingDownloadDirectory)?,
            run_as_admin: self.run_installer_as_admin.unwrap_or(true),
            run_after_download: self.run_after_download.unwrap_or(true),
            installer_flags: self.installer_flags_msi.filter(|f| !f.trim().is_empty()),
            headless: self.no_gui.unwrap_or(false),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Everything needed for one update, immutable once resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub software_name: String,
    pub calling_pid: Option<u32>,
    pub current_version: String,
    pub download_url: String,
    pub download_directory: PathBuf,
    pub run_as_admin: bool,
    pub run_after_download: bool,
    pub installer_flags: Option<String>,
    pub headless: bool,
}

impl UpdateRequest {
    /// Checked before any network activity.
    pub fn validate(&self) -> Result<Url> {
        if self.download_url.trim().is_empty() {
            return Err(Error::MissingDownloadUrl);
        }
        if self.download_directory.as_os_str().is_empty() {
            return Err(Error::MissingDownloadDirectory);
        }
        Url::parse(self.download_url.trim())
            .map_err(|e| Error::InvalidUrl(self.download_url.clone(), e.to_string()))
    }
}

fn default_config_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join(DEFAULT_CONFIG_FILE))
}

/// Reads the `[Updater]` section of the config file.
/// A missing file is an empty layer, a broken one is an error.
pub async fn load_config(path: Option<&Path>) -> Result<PartialRequest> {
    let path = match path {
        Some(p) if tokio::fs::try_exists(p).await.unwrap_or(false) => Some(p.to_owned()),
        Some(p) => {
            log::warn!(
                "Config file not found: {}, falling back to {}",
                p.to_string_lossy(),
                DEFAULT_CONFIG_FILE
            );
            default_config_path()
        }
        None => default_config_path(),
    };
    match path {
        Some(p) if tokio::fs::try_exists(&p).await.unwrap_or(false) => read_config(&p).await,
        _ => {
            log::info!("No config file found, using command line only");
            Ok(PartialRequest::default())
        }
    }
}

pub async fn read_config(p: &Path) -> Result<PartialRequest> {
    log::info!("Found config file at {}, reading...", p.to_string_lossy());
    let content = tokio::fs::read_to_string(p)
        .await
        .map_err(|e| Error::Read(p.to_owned(), e))?;
    let layer = parse_config(p, &content)?;
    log::debug!("Config loaded: {:?}", layer);
    Ok(layer)
}

/// Windows paths keep their backslashes, surrounding quotes are dropped.
fn parse_config(p: &Path, content: &str) -> Result<PartialRequest> {
    let option = ParseOption {
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_str_opt(content, option).map_err(|e| Error::Parse(p.to_owned(), e))?;
    let mut layer = PartialRequest::default();
    let Some(section) = ini.section(Some(CONFIG_SECTION)) else {
        log::info!("Config file has no [{}] section", CONFIG_SECTION);
        return Ok(layer);
    };
    for (key, value) in section.iter() {
        layer.set(key, value)?;
    }
    Ok(layer)
}
