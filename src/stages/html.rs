//! HTML pipeline: build-block replacement, then minification.

use std::borrow::Cow;
use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use regex::{Captures, Regex};
use tracing::info;

use crate::bundle::Baseline;
use crate::config::Config;
use crate::executor::TaskContext;
use crate::stage::{StageOutput, TransformStage, expand_ordered};
use crate::toolchain::Minifier;
use crate::utils::{as_overhead, write_file};

static BUILD_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*build:(\w+)(?:\([^)]*\))?(?:\s+([^\s>]+?))?\s*-->(.*?)<!--\s*endbuild\s*-->")
        .unwrap()
});

static PROTECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<pre\b.*?</pre\s*>|<textarea\b.*?</textarea\s*>|<script\b.*?</script\s*>|<style\b.*?</style\s*>",
    )
    .unwrap()
});

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

static SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s*(</?(?:!doctype|html|head|body|meta|link|title|base|div|p|section|article|aside|header|footer|nav|main|ul|ol|li|dl|dt|dd|h[1-6]|table|thead|tbody|tfoot|tr|td|th|form|fieldset|hr|br|figure|figcaption|template|noscript)\b[^>]*>)\s*",
    )
    .unwrap()
});

/// Collapses `<!-- build:<kind> <path> -->…<!-- endbuild -->` blocks into a
/// single reference to `path`, `remove` blocks are dropped. Assets are not
/// generated, the bundles and stylesheet are produced by their own stages.
///
/// A `js` block keeps `type="module"` or `nomodule` from the scripts it
/// replaces, so differential loading survives the replacement.
pub fn replace_blocks(html: &str) -> Cow<'_, str> {
    BUILD_BLOCK.replace_all(html, |caps: &Captures| {
        let path = caps.get(2).map_or("", |m| m.as_str());
        let body = &caps[3];

        match &caps[1] {
            "css" => format!(r#"<link rel="stylesheet" href="{path}">"#),
            "js" => {
                let attr = if body.contains(r#"type="module""#) {
                    r#" type="module""#
                } else if body.contains("nomodule") {
                    " nomodule"
                } else {
                    ""
                };
                format!(r#"<script{attr} src="{path}"></script>"#)
            }
            "remove" => String::new(),
            _ => body.to_string(),
        }
    })
}

/// Whitespace-collapsing HTML minifier.
///
/// Removes comments except conditional ones, collapses whitespace runs to one
/// space and drops whitespace around block-level tags. The contents of
/// `pre`, `textarea`, `script` and `style` are copied verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlMinifier;

impl Minifier for HtmlMinifier {
    fn minify(&self, source: &str, _: Option<&Baseline>) -> anyhow::Result<String> {
        Ok(minify(source))
    }
}

pub fn minify(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    for protected in PROTECTED.find_iter(html) {
        out.push_str(&collapse(&html[cursor..protected.start()]));
        out.push_str(protected.as_str());
        cursor = protected.end();
    }

    out.push_str(&collapse(&html[cursor..]));
    out.trim().to_string()
}

fn collapse(text: &str) -> String {
    let text = COMMENT.replace_all(text, |caps: &Captures| {
        let comment = &caps[0];
        if comment.starts_with("<!--[if") {
            comment.to_string()
        } else {
            String::new()
        }
    });

    let text = SPACE.replace_all(&text, " ");
    BLOCK_TAG.replace_all(&text, "$1").into_owned()
}

/// Processes every HTML file of the source tree into the distribution tree,
/// keeping relative paths.
pub struct HtmlStage {
    source: Utf8PathBuf,
    dist: Utf8PathBuf,
    files: Vec<Utf8PathBuf>,
    minify: bool,
}

impl HtmlStage {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let source = config.source_dir();

        Ok(Self {
            files: expand_ordered(&source, &config.html.sources)?,
            dist: config.dist_dir(),
            minify: config.html.minify,
            source,
        })
    }

    fn process(&self, ctx: &TaskContext, path: &Utf8Path) -> anyhow::Result<Utf8PathBuf> {
        let from = self.source.join(path);
        let html = fs::read_to_string(&from)
            .map_err(|e| anyhow::anyhow!("Couldn't read {from}: {e}"))?;

        let mut html = replace_blocks(&html).into_owned();
        if self.minify {
            html = ctx.toolchain.html_minifier.minify(&html, None)?;
        }

        let target = self.dist.join(path);
        write_file(&target, html)?;
        Ok(target)
    }
}

impl TransformStage for HtmlStage {
    fn inputs(&self) -> Vec<Utf8PathBuf> {
        self.files.iter().map(|path| self.source.join(path)).collect()
    }

    fn outputs(&self) -> Vec<Utf8PathBuf> {
        self.files.iter().map(|path| self.dist.join(path)).collect()
    }

    fn run(&self, ctx: &TaskContext) -> anyhow::Result<StageOutput> {
        let s = std::time::Instant::now();

        let written = self
            .files
            .par_iter()
            .map(|path| self.process(ctx, path))
            .collect::<anyhow::Result<Vec<_>>>()?;

        info!("Processed {} HTML files {}", written.len(), as_overhead(s));

        Ok(StageOutput {
            written,
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Environment;
    use crate::stages::testing::{context, project, read};

    #[test]
    fn build_blocks_collapse_to_one_reference() {
        let html = r#"<head>
<!-- build:css styles/app.css -->
<link rel="stylesheet" href="styles/a.css">
<link rel="stylesheet" href="styles/b.css">
<!-- endbuild -->
</head>
<body>
<!-- build:js scripts/main.mjs -->
<script type="module" src="scripts/main.js"></script>
<!-- endbuild -->
<!-- build:js scripts/main.js -->
<script nomodule src="scripts/a.js"></script>
<script nomodule src="scripts/b.js"></script>
<!-- endbuild -->
<!-- build:remove -->
<script src="livereload.js"></script>
<!-- endbuild -->
</body>"#;

        let out = replace_blocks(html);

        assert!(out.contains(r#"<link rel="stylesheet" href="styles/app.css">"#));
        assert!(!out.contains("styles/a.css"));
        assert!(out.contains(r#"<script type="module" src="scripts/main.mjs"></script>"#));
        assert!(out.contains(r#"<script nomodule src="scripts/main.js"></script>"#));
        assert!(!out.contains("scripts/b.js"));
        assert!(!out.contains("livereload"));
        assert!(!out.contains("endbuild"));
    }

    #[test]
    fn minify_collapses_and_drops_comments() {
        let html = "<!doctype html>\n<html>\n  <head>\n    <!-- note -->\n    <title>QR   Code</title>\n  </head>\n  <body>\n    <p>Hello   <b>world</b></p>\n  </body>\n</html>\n";

        assert_eq!(
            minify(html),
            "<!doctype html><html><head><title>QR Code</title></head><body><p>Hello <b>world</b></p></body></html>"
        );
    }

    #[test]
    fn minify_keeps_protected_content() {
        let html = "<pre>  a\n   b</pre>\n<script>\n  if (a  <  b) {}\n</script>\n<!--[if IE]><p>old</p><![endif]-->";
        let out = minify(html);

        assert!(out.contains("<pre>  a\n   b</pre>"));
        assert!(out.contains("<script>\n  if (a  <  b) {}\n</script>"));
        assert!(out.contains("<!--[if IE]>"));
    }

    #[test]
    fn stage_keeps_relative_paths() {
        let (_dir, config) = project(&[
            ("app/index.html", b"<html>\n  <body>  hi  </body>\n</html>"),
            ("app/pages/about.html", b"<p>about</p>"),
        ]);

        let env = Environment::new(config.clone()).unwrap();
        let output = HtmlStage::new(&config).unwrap().run(&context(&env)).unwrap();

        assert_eq!(output.written.len(), 2);
        assert_eq!(read(config.dist("index.html")), "<html><body>hi</body></html>");
        assert_eq!(read(config.dist("pages/about.html")), "<p>about</p>");
    }
}
