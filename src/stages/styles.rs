//! Stylesheet pipeline: per-file prefixing, then one concatenated and
//! minified stylesheet.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use rayon::prelude::*;
use thiserror::Error;
use tracing::info;

use crate::bundle::Baseline;
use crate::config::{BrowserList, Config};
use crate::error::ConfigError;
use crate::executor::TaskContext;
use crate::stage::{StageOutput, TransformStage, expand_ordered, glob_base};
use crate::toolchain::{Minifier, Prefixer};
use crate::utils::{as_overhead, write_file};

/// Errors that can occur when compiling Stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// An I/O error occurred.
    #[error("Couldn't read {0}:\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    /// A Sass compilation error occurred.
    #[cfg(feature = "grass")]
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    /// Lightning CSS rejected the stylesheet.
    #[error("{path}: {message}")]
    Css { path: Utf8PathBuf, message: String },
}

impl StyleError {
    fn css<T: std::fmt::Display>(path: &Utf8Path, e: lightningcss::error::Error<T>) -> Self {
        StyleError::Css {
            path: path.to_owned(),
            message: e.to_string(),
        }
    }
}

/// Prefixing and minification through Lightning CSS, for a fixed set of
/// browser targets.
#[derive(Debug, Clone)]
pub struct Lightning {
    targets: Targets,
}

impl Lightning {
    pub fn new(browsers: &BrowserList) -> Result<Self, ConfigError> {
        let version = |name: &'static str, value: &Option<String>| {
            value.as_deref().map(|v| parse_version(name, v)).transpose()
        };

        let browsers = Browsers {
            android: version("android", &browsers.android)?,
            chrome: version("chrome", &browsers.chrome)?,
            edge: version("edge", &browsers.edge)?,
            firefox: version("firefox", &browsers.firefox)?,
            ie: version("ie", &browsers.ie)?,
            ios_saf: version("ios", &browsers.ios)?,
            opera: version("opera", &browsers.opera)?,
            safari: version("safari", &browsers.safari)?,
            samsung: version("samsung", &browsers.samsung)?,
        };

        Ok(Self {
            targets: Targets::from(browsers),
        })
    }

    fn process(&self, path: &Utf8Path, css: &str, minify: bool) -> Result<String, StyleError> {
        let options = ParserOptions {
            filename: path.to_string(),
            ..ParserOptions::default()
        };

        let mut sheet = StyleSheet::parse(css, options).map_err(|e| StyleError::css(path, e))?;

        sheet
            .minify(MinifyOptions {
                targets: self.targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| StyleError::css(path, e))?;

        let printed = sheet
            .to_css(PrinterOptions {
                minify,
                targets: self.targets,
                ..PrinterOptions::default()
            })
            .map_err(|e| StyleError::css(path, e))?;

        Ok(printed.code)
    }
}

/// Browser versions are encoded the way Lightning CSS expects them,
/// `major << 16 | minor << 8 | patch`.
fn parse_version(name: &'static str, value: &str) -> Result<u32, ConfigError> {
    let invalid = || ConfigError::BrowserVersion(name, value.to_string());

    let mut parts = value.trim().split('.');
    let mut component = |shift: u32, required: bool| -> Result<u32, ConfigError> {
        match parts.next() {
            Some(part) => {
                let n: u32 = part.parse().map_err(|_| invalid())?;
                if n > 0xFF && shift < 16 {
                    return Err(invalid());
                }
                Ok(n << shift)
            }
            None if required => Err(invalid()),
            None => Ok(0),
        }
    };

    let version = component(16, true)? | component(8, false)? | component(0, false)?;

    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok(version)
}

impl Prefixer for Lightning {
    fn prefix(&self, path: &Utf8Path, css: &str) -> anyhow::Result<String> {
        Ok(self.process(path, css, false)?)
    }
}

impl Minifier for Lightning {
    fn minify(&self, source: &str, _: Option<&Baseline>) -> anyhow::Result<String> {
        Ok(self.process(Utf8Path::new("app.css"), source, true)?)
    }
}

/// Prefixes every stylesheet into the temporary tree, then concatenates them
/// in sorted path order into the one minified distribution stylesheet.
pub struct StyleStage {
    source: Utf8PathBuf,
    temp: Utf8PathBuf,
    sources: Vec<String>,
    output: Utf8PathBuf,
}

impl StyleStage {
    pub fn new(config: &Config) -> Self {
        Self {
            source: config.source_dir(),
            temp: config.temp_dir(),
            sources: config.styles.sources.clone(),
            output: config.dist(&config.styles.output),
        }
    }

    fn staged(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.temp.join(path).with_extension("css")
    }
}

impl TransformStage for StyleStage {
    fn inputs(&self) -> Vec<Utf8PathBuf> {
        self.sources
            .iter()
            .map(|pattern| self.source.join(glob_base(pattern)))
            .collect()
    }

    fn outputs(&self) -> Vec<Utf8PathBuf> {
        let mut outputs: Vec<_> = self
            .sources
            .iter()
            .map(|pattern| self.temp.join(glob_base(pattern)))
            .collect();
        outputs.dedup();
        outputs.push(self.output.clone());
        outputs
    }

    fn run(&self, ctx: &TaskContext) -> anyhow::Result<StageOutput> {
        let s = std::time::Instant::now();

        let mut paths = expand_ordered(&self.source, &self.sources)?;
        paths.sort();

        let prefixed = paths
            .par_iter()
            .map(|path| -> anyhow::Result<String> {
                let css = compile(&self.source.join(path))?;
                let css = ctx.toolchain.prefixer.prefix(path, &css)?;
                write_file(&self.staged(path), &css)?;
                Ok(css)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let bundle = ctx.toolchain.style_minifier.minify(&prefixed.join("\n"), None)?;
        write_file(&self.output, &bundle)?;

        info!("Compiled {} stylesheets {}", paths.len(), as_overhead(s));

        let mut output = StageOutput::default();
        for path in &paths {
            output = output.written(self.staged(path));
        }
        Ok(output.written(self.output.clone()))
    }
}

fn compile(path: &Utf8Path) -> Result<String, StyleError> {
    #[cfg(feature = "grass")]
    if path.extension() == Some("scss") {
        return Ok(grass::from_path(path, &grass::Options::default())?);
    }

    fs::read_to_string(path).map_err(|e| StyleError::Io(path.to_owned(), e))
}
