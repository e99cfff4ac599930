use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{RelocationMode, WatchOptions};
use crate::error::MeshError;
use crate::watcher::{DEFAULT_ARCHIVE_SUFFIX, DEFAULT_IN_PROGRESS_SUFFIXES};
use crate::webdriver::BrowserOptions;

pub const DEFAULT_CONFIG_FILE: &str = "mesh-fetch.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub base_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub webdriver_url: Option<String>,
    #[serde(default)]
    pub headless: Option<bool>,
    #[serde(default)]
    pub link_selector: Option<String>,
    #[serde(default)]
    pub modal_close_selector: Option<String>,
    #[serde(default)]
    pub page_settle_ms: Option<u64>,
    #[serde(default)]
    pub confirmation_timeout_ms: Option<u64>,
    /// `null` selects discovery: the file name is not known before the click.
    #[serde(default = "default_template_field")]
    pub file_name_template: Option<String>,
    #[serde(default)]
    pub watch: Option<WatchOptions>,
    #[serde(default)]
    pub in_progress_suffixes: Option<Vec<String>>,
    #[serde(default)]
    pub archive_suffix: Option<String>,
    #[serde(default)]
    pub relocation: Option<RelocationMode>,
    #[serde(default)]
    pub verify_archives: Option<bool>,
    #[serde(default)]
    pub clean: Option<bool>,
    #[serde(default)]
    pub log_file: Option<Utf8PathBuf>,
}

fn default_template_field() -> Option<String> {
    Some(DEFAULT_FILE_NAME_TEMPLATE.to_string())
}

pub const DEFAULT_PAGE_URL: &str =
    "https://nlftp.mlit.go.jp/ksj/gml/datalist/KsjTmplt-mesh500h30.html";
pub const DEFAULT_BASE_DIR: &str = "data/paquet_500mメッシュ人口推計";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_LINK_SELECTOR: &str = "a.btn_padding";
pub const DEFAULT_MODAL_CLOSE_SELECTOR: &str = ".modal-close.btn.waves-effect.waves-light";
pub const DEFAULT_FILE_NAME_TEMPLATE: &str = "500m_mesh_suikei_2018_shape_{index}.zip";

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub page_url: Option<String>,
    pub base_dir: Option<Utf8PathBuf>,
    pub webdriver_url: Option<String>,
    pub headless: bool,
    pub max_attempts: Option<u32>,
    pub poll_interval_ms: Option<u64>,
    pub no_size_stability: bool,
    pub discover: bool,
    pub relocation: Option<RelocationMode>,
    pub verify_archives: bool,
    pub clean: bool,
    pub log_file: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub page_url: String,
    pub base_dir: Utf8PathBuf,
    pub browser: BrowserOptions,
    pub confirmation_timeout: Duration,
    pub file_name_template: Option<String>,
    pub watch: WatchOptions,
    pub in_progress_suffixes: Vec<String>,
    pub archive_suffix: String,
    pub relocation: RelocationMode,
    pub verify_archives: bool,
    pub clean: bool,
    pub log_file: Option<Utf8PathBuf>,
}

impl ResolvedConfig {
    /// File name the `index`-th link (0-based) is expected to produce.
    pub fn expected_file_name(&self, index: usize) -> Option<String> {
        self.file_name_template
            .as_ref()
            .map(|template| template.replace("{index}", &format!("{:02}", index + 1)))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `mesh-fetch.json` in the working directory when it
    /// exists. An explicit path that cannot be read is an error.
    pub fn load(path: Option<&Utf8Path>) -> Result<Config, MeshError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config {
                file_name_template: default_template_field(),
                ..Config::default()
            });
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| MeshError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, MeshError> {
        serde_json::from_str(content).map_err(|err| MeshError::ConfigParse(err.to_string()))
    }

    pub fn resolve(
        path: Option<&Utf8Path>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, MeshError> {
        Self::resolve_config(Self::load(path)?, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, MeshError> {
        let mut watch = config.watch.unwrap_or_default();
        if let Some(max_attempts) = overrides.max_attempts {
            watch.max_attempts = max_attempts;
        }
        if let Some(poll_interval_ms) = overrides.poll_interval_ms {
            watch.poll_interval_ms = poll_interval_ms;
        }
        if overrides.no_size_stability {
            watch.size_stability_required = false;
        }
        if watch.max_attempts == 0 {
            return Err(MeshError::InvalidConfig(
                "watch.max_attempts must be at least 1".to_string(),
            ));
        }

        let file_name_template = if overrides.discover {
            None
        } else {
            config.file_name_template
        };
        let relocation = overrides
            .relocation
            .or(config.relocation)
            .unwrap_or_default();
        if file_name_template.is_none() && relocation == RelocationMode::Batch {
            return Err(MeshError::InvalidConfig(
                "discovering file names requires streaming relocation".to_string(),
            ));
        }

        let browser = BrowserOptions {
            webdriver_url: overrides
                .webdriver_url
                .or(config.webdriver_url)
                .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
            headless: overrides.headless || config.headless.unwrap_or(false),
            link_selector: config
                .link_selector
                .unwrap_or_else(|| DEFAULT_LINK_SELECTOR.to_string()),
            modal_close_selector: config
                .modal_close_selector
                .unwrap_or_else(|| DEFAULT_MODAL_CLOSE_SELECTOR.to_string()),
            page_settle: Duration::from_millis(config.page_settle_ms.unwrap_or(2000)),
        };

        Ok(ResolvedConfig {
            page_url: overrides
                .page_url
                .or(config.page_url)
                .unwrap_or_else(|| DEFAULT_PAGE_URL.to_string()),
            base_dir: overrides
                .base_dir
                .or(config.base_dir)
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_BASE_DIR)),
            browser,
            confirmation_timeout: Duration::from_millis(
                config.confirmation_timeout_ms.unwrap_or(5000),
            ),
            file_name_template,
            watch,
            in_progress_suffixes: config.in_progress_suffixes.unwrap_or_else(|| {
                DEFAULT_IN_PROGRESS_SUFFIXES
                    .iter()
                    .map(|suffix| suffix.to_string())
                    .collect()
            }),
            archive_suffix: config
                .archive_suffix
                .unwrap_or_else(|| DEFAULT_ARCHIVE_SUFFIX.to_string()),
            relocation,
            verify_archives: overrides.verify_archives || config.verify_archives.unwrap_or(false),
            clean: overrides.clean || config.clean.unwrap_or(false),
            log_file: overrides.log_file.or(config.log_file),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ConfigLoader::parse("{}").unwrap();
        let resolved = ConfigLoader::resolve_config(config, ConfigOverrides::default()).unwrap();
        assert_eq!(resolved.page_url, DEFAULT_PAGE_URL);
        assert_eq!(resolved.watch, WatchOptions::default());
        assert_eq!(resolved.relocation, RelocationMode::Batch);
        assert_eq!(
            resolved.expected_file_name(12).as_deref(),
            Some("500m_mesh_suikei_2018_shape_13.zip")
        );
    }

    #[test]
    fn discovery_requires_streaming() {
        let config = ConfigLoader::parse(r#"{"file_name_template": null}"#).unwrap();
        let err = ConfigLoader::resolve_config(config, ConfigOverrides::default()).unwrap_err();
        assert_matches!(err, MeshError::InvalidConfig(_));

        let config = ConfigLoader::parse(
            r#"{"file_name_template": null, "relocation": "streaming"}"#,
        )
        .unwrap();
        let resolved = ConfigLoader::resolve_config(config, ConfigOverrides::default()).unwrap();
        assert_eq!(resolved.expected_file_name(0), None);
    }
}
