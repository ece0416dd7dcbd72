//! Project configuration.
//!
//! Every field has a default matching the conventional project layout, so a
//! project without a `tsumiki.toml` builds `app/` into `dist/`:
//!
//! ```toml
//! [paths]
//! source = "app"
//! dist = "dist"
//!
//! [client]
//! entry = "scripts/main.js"
//! legacy_baseline = "chrome41"
//!
//! [worker]
//! library = ["scripts/jsqrcode/*.js"]
//! baseline = "chrome52"
//!
//! [toolchain]
//! transpiler = "swc"
//! ```

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the optional configuration file at the project root.
pub const CONFIG_FILE: &str = "tsumiki.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Project root, every other path is relative to it.
    #[serde(skip)]
    pub root: Utf8PathBuf,
    pub paths: Paths,
    pub client: ClientConfig,
    pub worker: WorkerConfig,
    pub service_worker: ServiceWorkerConfig,
    pub styles: StylesConfig,
    pub images: ImagesConfig,
    pub html: HtmlConfig,
    pub serve: ServeConfig,
    pub toolchain: ToolchainConfig,
}

impl Config {
    /// Loads `tsumiki.toml` from `root` if present, defaults otherwise.
    pub fn load(root: impl Into<Utf8PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        let file = root.join(CONFIG_FILE);

        let mut config = if file.exists() {
            let text = fs::read_to_string(&file).map_err(|e| ConfigError::Io(file.clone(), e))?;
            toml::from_str::<Config>(&text).map_err(|e| ConfigError::Parse(file, e))?
        } else {
            Config::default()
        };

        config.root = root;
        Ok(config)
    }

    /// Defaults rooted at `root`, without looking for a config file.
    pub fn at(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn source_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.paths.source)
    }

    pub fn temp_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.paths.temp)
    }

    pub fn dist_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.paths.dist)
    }

    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.paths.cache)
    }

    /// Path of a source-relative file on disk.
    pub fn source(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.source_dir().join(path)
    }

    /// Path of a temp-relative file on disk.
    pub fn temp(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.temp_dir().join(path)
    }

    /// Path of a dist-relative file on disk.
    pub fn dist(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.dist_dir().join(path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub source: Utf8PathBuf,
    pub temp: Utf8PathBuf,
    pub dist: Utf8PathBuf,
    pub cache: Utf8PathBuf,
    /// Keep the temporary tree after a successful build.
    pub keep_temp: bool,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            source: "app".into(),
            temp: ".tmp".into(),
            dist: "dist".into(),
            cache: ".cache".into(),
            keep_temp: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Entry module, relative to the source tree.
    pub entry: Utf8PathBuf,
    /// Module variant, relative to the dist tree.
    pub module_output: Utf8PathBuf,
    /// Self-executing variant, relative to the dist tree.
    pub legacy_output: Utf8PathBuf,
    pub legacy_baseline: String,
    pub minify: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            entry: "scripts/main.js".into(),
            module_output: "scripts/main.mjs".into(),
            legacy_output: "scripts/main.js".into(),
            legacy_baseline: "chrome41".into(),
            minify: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Library fragments, relative to the source tree, concatenated in this
    /// order. Glob entries expand in sorted path order.
    pub library: Vec<String>,
    /// Concatenated library unit, relative to the temp tree.
    pub library_output: Utf8PathBuf,
    /// Application fragments staged unchanged, relative to the source tree.
    pub application: Vec<String>,
    /// Worker entry, relative to the temp tree after staging.
    pub entry: Utf8PathBuf,
    /// Worker bundle, relative to the dist tree.
    pub output: Utf8PathBuf,
    pub baseline: String,
    pub minify: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            library: vec!["scripts/jsqrcode/*.js".into()],
            library_output: "scripts/qrcode.js".into(),
            application: vec!["scripts/*.js".into()],
            entry: "scripts/qrworker.js".into(),
            output: "scripts/qrworker.js".into(),
            baseline: "chrome52".into(),
            minify: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceWorkerConfig {
    /// Entry, relative to the source tree.
    pub entry: Utf8PathBuf,
    /// Bundle, relative to the dist tree.
    pub output: Utf8PathBuf,
    pub minify: bool,
}

impl Default for ServiceWorkerConfig {
    fn default() -> Self {
        Self {
            entry: "sw.js".into(),
            output: "sw.js".into(),
            minify: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StylesConfig {
    pub sources: Vec<String>,
    /// Concatenated stylesheet, relative to the dist tree.
    pub output: Utf8PathBuf,
    pub browsers: BrowserList,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            sources: vec!["styles/**/*.css".into(), "styles/**/[!_]*.scss".into()],
            output: "styles/app.css".into(),
            browsers: BrowserList::default(),
        }
    }
}

/// Minimum browser versions stylesheets are prefixed for, `None` means the
/// browser is not targeted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserList {
    pub android: Option<String>,
    pub chrome: Option<String>,
    pub edge: Option<String>,
    pub firefox: Option<String>,
    pub ie: Option<String>,
    pub ios: Option<String>,
    pub opera: Option<String>,
    pub safari: Option<String>,
    pub samsung: Option<String>,
}

impl Default for BrowserList {
    fn default() -> Self {
        Self {
            android: Some("4.4".into()),
            chrome: Some("34".into()),
            edge: None,
            firefox: Some("30".into()),
            ie: Some("10".into()),
            ios: Some("7".into()),
            opera: Some("23".into()),
            safari: Some("7".into()),
            samsung: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    pub sources: Vec<String>,
    pub jpeg_quality: u8,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            sources: vec!["images/**/*".into()],
            jpeg_quality: 85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HtmlConfig {
    pub sources: Vec<String>,
    pub minify: bool,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            sources: vec!["**/*.html".into()],
            minify: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranspilerKind {
    /// In-process preset-env lowering, down to ES5.
    #[default]
    Swc,
    /// Lowering by the `esbuild` binary, which can't go below ES2015 for
    /// classes and block scoping.
    Esbuild,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainConfig {
    /// What lowers legacy bundles to their baseline.
    pub transpiler: TranspilerKind,
    /// The `esbuild` executable used for bundling and minification, looked
    /// up in `PATH` unless absolute.
    pub esbuild: Utf8PathBuf,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            transpiler: TranspilerKind::Swc,
            esbuild: "esbuild".into(),
        }
    }
}
