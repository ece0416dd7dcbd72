//! The fixed build graph of a project.
//!
//! ```text
//! clean ─┬─ copy ─────────────────────────────────────┐
//!        ├─ styles                                     │
//!        ├─ html                                       │
//!        ├─ images                                     ├─ finish
//!        ├─ client-module                              │
//!        ├─ client-legacy                              │
//!        ├─ service-worker                             │
//!        └─ worker-library ─ worker-stage ─ worker ────┘
//! ```

use camino::Utf8PathBuf;

use crate::bundle::{Baseline, BundleSpec, BundleStage};
use crate::config::Config;
use crate::error::{BuildError, PreflightError};
use crate::graph::{Task, TaskGraph};
use crate::stage::{expand_ordered, is_glob};
use crate::stages::{CleanStage, CopyStage, FinishStage, HtmlStage, ImageStage, StyleStage};
use crate::worker::{LibraryStage, StagingStage};

pub const CLEAN: &str = "clean";
pub const COPY: &str = "copy";
pub const STYLES: &str = "styles";
pub const HTML: &str = "html";
pub const IMAGES: &str = "images";
pub const CLIENT_MODULE: &str = "client-module";
pub const CLIENT_LEGACY: &str = "client-legacy";
pub const SERVICE_WORKER: &str = "service-worker";
pub const WORKER_LIBRARY: &str = "worker-library";
pub const WORKER_STAGE: &str = "worker-stage";
pub const WORKER: &str = "worker";
pub const FINISH: &str = "finish";

/// Checks everything about the environment that can be known before a task
/// runs, so a broken setup fails fast instead of halfway through a build.
pub fn preflight(config: &Config) -> Result<(), PreflightError> {
    let source = config.source_dir();

    if !source.is_dir() {
        return Err(PreflightError::MissingSource(source));
    }

    let entry = |what: &'static str, path: Utf8PathBuf| {
        if path.is_file() {
            Ok(())
        } else {
            Err(PreflightError::MissingEntry { what, path })
        }
    };

    entry("client entry", config.source(&config.client.entry))?;
    entry("service worker entry", config.source(&config.service_worker.entry))?;

    for fragment in config.worker.library.iter().filter(|f| !is_glob(f)) {
        entry("worker library fragment", config.source(fragment))?;
    }

    let application =
        expand_ordered(&source, &config.worker.application).map_err(PreflightError::Pattern)?;

    if !application.contains(&config.worker.entry) {
        return Err(PreflightError::MissingEntry {
            what: "worker entry",
            path: config.source(&config.worker.entry),
        });
    }

    let outputs = [
        &config.client.module_output,
        &config.client.legacy_output,
        &config.worker.output,
        &config.service_worker.output,
    ];

    for (i, output) in outputs.iter().enumerate() {
        if outputs[i + 1..].contains(output) {
            return Err(PreflightError::SharedOutput(config.dist(output)));
        }
    }

    Ok(())
}

/// Builds the task graph for `config`.
pub fn plan(config: &Config) -> Result<TaskGraph, BuildError> {
    let legacy: Baseline = config.client.legacy_baseline.parse()?;
    let worker: Baseline = config.worker.baseline.parse()?;

    let client_module = BundleStage {
        spec: BundleSpec::modern(config.source(&config.client.entry), config.dist(&config.client.module_output))
            .minify(config.client.minify),
    };

    let client_legacy = BundleStage {
        spec: BundleSpec::legacy(
            config.source(&config.client.entry),
            config.dist(&config.client.legacy_output),
            legacy,
        )
        .minify(config.client.minify),
    };

    let service_worker = BundleStage {
        spec: BundleSpec::classic(
            config.source(&config.service_worker.entry),
            config.dist(&config.service_worker.output),
        )
        .minify(config.service_worker.minify),
    };

    let worker_bundle = BundleStage {
        spec: BundleSpec::legacy(
            config.temp(&config.worker.entry),
            config.dist(&config.worker.output),
            worker,
        )
        .minify(config.worker.minify),
    };

    let other = |e: anyhow::Error| BuildError::Other(e);

    let tasks = vec![
        Task::from_stage(CLEAN, CleanStage::new(config)),
        Task::from_stage(COPY, CopyStage::new(config).map_err(other)?).after(CLEAN),
        Task::from_stage(STYLES, StyleStage::new(config)).after(CLEAN),
        Task::from_stage(HTML, HtmlStage::new(config).map_err(other)?).after(CLEAN),
        Task::from_stage(IMAGES, ImageStage::new(config).map_err(other)?).after(CLEAN),
        Task::from_stage(CLIENT_MODULE, client_module).after(CLEAN),
        Task::from_stage(CLIENT_LEGACY, client_legacy).after(CLEAN),
        Task::from_stage(SERVICE_WORKER, service_worker).after(CLEAN),
        Task::from_stage(WORKER_LIBRARY, LibraryStage::new(config)).after(CLEAN),
        Task::from_stage(WORKER_STAGE, StagingStage::new(config)).after(WORKER_LIBRARY),
        Task::from_stage(WORKER, worker_bundle).after(WORKER_STAGE),
    ];

    let finish = tasks
        .iter()
        .fold(Task::from_stage(FINISH, FinishStage::new(config)), |finish, task| {
            finish.after(task.id.clone())
        });

    Ok(TaskGraph::new(tasks.into_iter().chain([finish]))?)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8Path;

    use super::*;
    use crate::executor::{Environment, execute};
    use crate::stages::testing::{list, project, read};

    const MAIN: &str = "import { greet } from './greet.js';\nexport function f(){return 1}\ngreet(f());\n";
    const GREET: &str = "export function greet(v) {\n    console.log('hello ' + v);\n}\n";
    const WORKER_ENTRY: &str = "import { qrcode } from './qrcode.js';\nself.onmessage = function (e) {\n    self.postMessage(qrcode.decode(e.data));\n};\n";
    const SW: &str = "const VERSION = 'v1';\nself.addEventListener('install', (e) => e.waitUntil(caches.open(VERSION)));\n";

    fn app() -> (tempfile::TempDir, Config) {
        project(&[
            ("app/index.html", b"<html>\n  <body>\n    <p>QR</p>\n  </body>\n</html>\n"),
            ("app/robots.txt", b"User-agent: *\n"),
            ("app/manifest.json", b"{}\n"),
            ("app/sw.js", SW.as_bytes()),
            ("app/styles/main.css", b".qr { user-select: none; }\n"),
            ("app/images/pixel.svg", b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>"),
            ("app/scripts/main.js", MAIN.as_bytes()),
            ("app/scripts/greet.js", GREET.as_bytes()),
            ("app/scripts/qrworker.js", WORKER_ENTRY.as_bytes()),
            ("app/scripts/jsqrcode/b_grid.js", b"var qrcode = { decode: function (d) { return grid(d); } };\nexport { qrcode };\n"),
            ("app/scripts/jsqrcode/a_grid.js", b"function grid(d) { return d; }\n"),
            ("dist/.git/HEAD", b"ref: refs/heads/gh-pages\n"),
            ("dist/stale.txt", b"old"),
        ])
    }

    /// [`app`] bundling through the esbuild stand-in.
    #[cfg(unix)]
    fn stubbed(fixture: (tempfile::TempDir, Config)) -> (tempfile::TempDir, Config) {
        let (dir, mut config) = fixture;
        let tools = Utf8Path::from_path(dir.path()).unwrap().join("tools");
        fs::create_dir_all(&tools).unwrap();
        config.toolchain.esbuild = crate::bundle::testing::stub(&tools);
        (dir, config)
    }

    #[test]
    fn graph_shape() {
        let (_dir, config) = app();
        let graph = plan(&config).unwrap();

        assert_eq!(graph.len(), 12);
        assert_eq!(graph.wave_of(CLEAN), Some(0));
        assert_eq!(graph.wave_of(CLIENT_LEGACY), Some(1));
        assert_eq!(graph.wave_of(WORKER_LIBRARY), Some(1));
        assert_eq!(graph.wave_of(WORKER_STAGE), Some(2));
        assert_eq!(graph.wave_of(WORKER), Some(3));
        assert_eq!(graph.wave_of(FINISH), Some(4));
    }

    #[cfg(unix)]
    #[test]
    fn full_build() {
        let (_dir, config) = stubbed(app());
        preflight(&config).unwrap();

        let env = Environment::new(config.clone()).unwrap();
        let result = execute(&plan(&config).unwrap(), &env).unwrap();

        assert_eq!(
            list(&config.dist_dir()),
            [
                ".git/HEAD",
                "images/pixel.svg",
                "index.html",
                "manifest.json",
                "robots.txt",
                "scripts/main.js",
                "scripts/main.mjs",
                "scripts/qrworker.js",
                "styles/app.css",
                "sw.js",
            ]
            .map(Utf8PathBuf::from)
        );
        assert!(!config.temp_dir().exists());

        let modern = read(config.dist("scripts/main.mjs"));
        assert!(modern.contains("export function f(){return 1}"));
        assert!(!modern.contains("import"));

        let legacy = read(config.dist("scripts/main.js"));
        assert!(legacy.contains("function f()"));
        assert!(!legacy.contains("export"));
        assert!(!legacy.contains("import"));
        assert!(!legacy.contains("=>"));

        let worker = read(config.dist("scripts/qrworker.js"));
        let library = worker.find("function grid").unwrap();
        let unit = worker.find("var qrcode").unwrap();
        let application = worker.find("self.onmessage").unwrap();
        assert!(library < unit && unit < application);
        assert!(!worker.contains("import"));
        assert!(!worker.contains("export"));

        let sw = read(config.dist("sw.js"));
        assert!(sw.contains("=> e.waitUntil"));

        assert!(read(config.dist("styles/app.css")).contains("-webkit-user-select"));
        assert_eq!(read(config.dist("index.html")), "<html><body><p>QR</p></body></html>");

        let stage = result.report(WORKER_STAGE).unwrap();
        let bundle = result.report(WORKER).unwrap();
        assert!(stage.wave < bundle.wave);
        assert!(stage.start_ms + stage.duration_ms <= bundle.start_ms);
    }

    #[cfg(unix)]
    #[test]
    fn second_build_hits_the_image_cache() {
        let (_dir, config) = stubbed(project(&[
            ("app/sw.js", b"self;\n"),
            ("app/scripts/main.js", b"var a = 1;\n"),
            ("app/scripts/qrworker.js", b"self;\n"),
            ("app/scripts/jsqrcode/lib.js", b"var lib;\n"),
            ("app/images/a.bin", b"0123456789"),
        ]));

        struct Halve;

        impl crate::toolchain::Optimizer for Halve {
            fn namespace(&self) -> String {
                "halve".into()
            }

            fn optimize(&self, _: &Utf8Path, bytes: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
                Ok(Some(bytes[..bytes.len() / 2].to_vec()))
            }
        }

        let run = || {
            let mut env = Environment::new(config.clone()).unwrap();
            env.toolchain = env.toolchain.clone().with_optimizer(std::sync::Arc::new(Halve));
            execute(&plan(&config).unwrap(), &env).unwrap()
        };

        let first = run();
        let image = fs::read(config.dist("images/a.bin")).unwrap();
        let second = run();

        assert_eq!(first.cache.hits, 0);
        assert_eq!(second.cache.hits, 1);
        assert_eq!(fs::read(config.dist("images/a.bin")).unwrap(), image);
        assert!(config.cache_dir().exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_bundle_names_the_task() {
        let (_dir, config) = stubbed(app());
        // the stand-in bundler doesn't parse, so only the transpiler sees this
        fs::write(config.source("scripts/greet.js"), "export function greet(v) { return v +; }\n").unwrap();

        let env = Environment::new(config.clone()).unwrap();
        let err = execute(&plan(&config).unwrap(), &env).unwrap_err();

        assert_eq!(err.task_id(), Some(CLIENT_LEGACY));
        assert!(err.to_string().contains("chrome41"));
        assert!(err.to_string().contains("Syntax error"));
    }

    #[test]
    fn real_esbuild_full_build() {
        let Some(esbuild) = crate::bundle::testing::installed() else {
            return;
        };

        let (_dir, mut config) = app();
        config.toolchain.esbuild = esbuild;

        let env = Environment::new(config.clone()).unwrap();
        execute(&plan(&config).unwrap(), &env).unwrap();

        let legacy = read(config.dist("scripts/main.js"));
        assert!(!legacy.contains("export"));
        assert!(!legacy.contains("=>"));

        let worker = read(config.dist("scripts/qrworker.js"));
        assert!(!worker.contains("import"));
        assert!(worker.contains("postMessage"));
    }

    #[test]
    fn preflight_reports_missing_entries() {
        let (_dir, config) = app();
        fs::remove_file(config.source("scripts/qrworker.js")).unwrap();

        assert!(matches!(
            preflight(&config),
            Err(PreflightError::MissingEntry { what: "worker entry", .. })
        ));
    }

    #[test]
    fn preflight_rejects_shared_outputs() {
        let (_dir, mut config) = app();
        config.client.legacy_output = config.client.module_output.clone();

        assert!(matches!(preflight(&config), Err(PreflightError::SharedOutput(_))));
    }

    #[test]
    fn preflight_requires_the_source_tree() {
        let (_dir, mut config) = app();
        config.paths.source = "missing".into();

        assert!(matches!(preflight(&config), Err(PreflightError::MissingSource(_))));
    }
}
