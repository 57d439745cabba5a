use std::{
    env,
    ffi::OsStr,
    fs,
    net::SocketAddr,
    path::{Component, Path, PathBuf},
    str::FromStr,
};

use anyhow::Context as _;
use serde::Deserialize;

pub const PROJECT_CONFIG_FILENAME: &str = "harreplay.toml";
pub const HOME_CONFIG_DIR: &str = ".harreplay";
pub const HOME_CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub pages: PagesConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    #[serde(skip)]
    source_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    pub path: PathBuf,
    pub api_root: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PagesConfig {
    pub index: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Where a loaded config came from, used to label load failures.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigSource {
    Override(PathBuf),
    Project(PathBuf),
    Home(PathBuf),
}

impl ConfigSource {
    fn path(&self) -> &Path {
        match self {
            Self::Override(path) | Self::Project(path) | Self::Home(path) => path,
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Override(path) => format!("override {}", path.display()),
            Self::Project(_) => format!("project ./{PROJECT_CONFIG_FILENAME}"),
            Self::Home(_) => format!("home ~/{HOME_CONFIG_DIR}/{HOME_CONFIG_FILENAME}"),
        }
    }
}

impl Config {
    /// Loads the config from `override_path`, or discovers one in the working
    /// directory and then under `$HOME`.
    pub fn load(override_path: Option<&Path>) -> anyhow::Result<Self> {
        let source = discover_config_source(override_path)?;
        Self::from_path(source.path()).with_context(|| format!("load config ({})", source.label()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let toml =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        let mut config = Self::from_toml_str(&toml)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        toml.parse()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Archive location with `~` expanded and relative paths anchored at the
    /// config file's directory.
    pub fn archive_path(&self) -> anyhow::Result<PathBuf> {
        resolve_config_relative_path(&self.archive.path, self.source_path())
    }

    pub fn index_page_path(&self) -> anyhow::Result<Option<PathBuf>> {
        self.pages
            .index
            .as_deref()
            .map(|path| resolve_config_relative_path(path, self.source_path()))
            .transpose()
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).context("parse config TOML")
    }
}

fn discover_config_source(override_path: Option<&Path>) -> anyhow::Result<ConfigSource> {
    if let Some(path) = override_path {
        return Ok(ConfigSource::Override(path.to_path_buf()));
    }

    let project = PathBuf::from(PROJECT_CONFIG_FILENAME);
    if project.is_file() {
        return Ok(ConfigSource::Project(project));
    }

    if let Some(home) = env::var_os("HOME") {
        let home_config = PathBuf::from(home)
            .join(HOME_CONFIG_DIR)
            .join(HOME_CONFIG_FILENAME);
        if home_config.is_file() {
            return Ok(ConfigSource::Home(home_config));
        }
    }

    anyhow::bail!(
        "no config found; pass `--config`, or create ./{PROJECT_CONFIG_FILENAME} or ~/{HOME_CONFIG_DIR}/{HOME_CONFIG_FILENAME}"
    )
}

fn resolve_config_relative_path(
    path: &Path,
    config_source_path: Option<&Path>,
) -> anyhow::Result<PathBuf> {
    let expanded = expand_tilde_path(path)?;
    if expanded.is_absolute() {
        return Ok(expanded);
    }

    if let Some(config_source_path) = config_source_path
        && let Some(config_dir) = config_source_path.parent()
    {
        return Ok(config_dir.join(expanded));
    }

    Ok(expanded)
}

fn expand_tilde_path(path: &Path) -> anyhow::Result<PathBuf> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(component)) if component == OsStr::new("~") => {
            let home = env::var_os("HOME").ok_or_else(|| {
                anyhow::anyhow!("cannot expand `~` in {}: HOME is not set", path.display())
            })?;
            let mut expanded = PathBuf::from(home);
            for component in components {
                expanded.push(component.as_os_str());
            }
            Ok(expanded)
        }
        _ => Ok(path.to_path_buf()),
    }
}
