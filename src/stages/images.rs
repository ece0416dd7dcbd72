//! Image pipeline: every image is recompressed in its own format, results
//! are cached by source hash.

use std::borrow::Cow;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use tracing::{debug, info};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::core::Hash32;
use crate::executor::TaskContext;
use crate::stage::{StageOutput, TransformStage, expand_ordered};
use crate::toolchain::Optimizer;
use crate::utils::{as_overhead, write_file};

/// Lossless PNG recompression and JPEG re-encoding at a fixed quality.
/// Every other format is passed through.
#[cfg(feature = "image")]
#[derive(Debug, Clone, Copy)]
pub struct ImageOptimizer {
    jpeg_quality: u8,
}

#[cfg(feature = "image")]
impl ImageOptimizer {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }
}

#[cfg(feature = "image")]
impl Optimizer for ImageOptimizer {
    fn namespace(&self) -> String {
        format!("img-png-best-jpeg-q{}", self.jpeg_quality)
    }

    fn optimize(&self, _: &Utf8Path, bytes: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        use image::codecs::jpeg::JpegEncoder;
        use image::codecs::png::{CompressionType, FilterType, PngEncoder};
        use image::{ExtendedColorType, ImageEncoder, ImageFormat};

        let Ok(format) = image::guess_format(bytes) else {
            return Ok(None);
        };

        let mut out = Vec::new();

        match format {
            ImageFormat::Png => {
                let img = image::load_from_memory_with_format(bytes, format)?;

                PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive)
                    .write_image(img.as_bytes(), img.width(), img.height(), img.color().into())?;
            }
            ImageFormat::Jpeg => {
                let img = image::load_from_memory_with_format(bytes, format)?;
                let rgb = img.to_rgb8();

                JpegEncoder::new_with_quality(&mut out, self.jpeg_quality).write_image(
                    &rgb,
                    rgb.width(),
                    rgb.height(),
                    ExtendedColorType::Rgb8,
                )?;
            }
            _ => return Ok(None),
        }

        Ok(Some(out))
    }
}

/// Runs `optimizer` on `bytes` unless the cache already holds the result.
///
/// The smaller of input and optimized output is kept and cached, so a second
/// run over the same bytes never calls the optimizer. A failing optimizer is
/// not fatal: the input passes through and a warning is returned.
pub fn optimize_cached<'a>(
    cache: &CacheStore,
    optimizer: &dyn Optimizer,
    path: &Utf8Path,
    bytes: &'a [u8],
) -> (Cow<'a, [u8]>, Option<String>) {
    let namespace = optimizer.namespace();
    let key = Hash32::hash(bytes);

    if let Some(cached) = cache.get(&namespace, key) {
        return (Cow::Owned(cached), None);
    }

    match optimizer.optimize(path, bytes) {
        Ok(Some(optimized)) => {
            let output = if optimized.len() < bytes.len() {
                Cow::Owned(optimized)
            } else {
                debug!(%path, "optimized image is not smaller, keeping the original");
                Cow::Borrowed(bytes)
            };

            let warning = cache
                .put(&namespace, key, &output)
                .err()
                .map(|e| format!("{path}: couldn't cache the optimized image: {e}"));

            (output, warning)
        }
        Ok(None) => (Cow::Borrowed(bytes), None),
        Err(e) => (
            Cow::Borrowed(bytes),
            Some(format!("{path}: optimization failed, copied unchanged: {e:#}")),
        ),
    }
}

pub struct ImageStage {
    source: Utf8PathBuf,
    dist: Utf8PathBuf,
    files: Vec<Utf8PathBuf>,
}

impl ImageStage {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let source = config.source_dir();

        Ok(Self {
            files: expand_ordered(&source, &config.images.sources)?,
            dist: config.dist_dir(),
            source,
        })
    }
}

impl TransformStage for ImageStage {
    fn inputs(&self) -> Vec<Utf8PathBuf> {
        self.files.iter().map(|path| self.source.join(path)).collect()
    }

    fn outputs(&self) -> Vec<Utf8PathBuf> {
        self.files.iter().map(|path| self.dist.join(path)).collect()
    }

    fn run(&self, ctx: &TaskContext) -> anyhow::Result<StageOutput> {
        let s = std::time::Instant::now();
        ctx.span.pb_set_length(self.files.len() as u64);

        let results = self
            .files
            .par_iter()
            .map(|path| -> anyhow::Result<(Utf8PathBuf, Option<String>)> {
                let from = self.source.join(path);
                let bytes = fs::read(&from).map_err(|e| anyhow::anyhow!("Couldn't read {from}: {e}"))?;

                let (output, warning) =
                    optimize_cached(&ctx.cache, ctx.toolchain.optimizer.as_ref(), path, &bytes);

                let target = self.dist.join(path);
                write_file(&target, &output)?;
                ctx.span.pb_inc(1);

                Ok((target, warning))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut output = StageOutput::default();
        for (target, warning) in results {
            output.written.push(target);
            output.warnings.extend(warning);
        }

        info!("Processed {} images {}", output.written.len(), as_overhead(s));
        Ok(output)
    }
}
