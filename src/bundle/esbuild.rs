use std::io::Write;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use super::OutputFormat;
use super::baseline::Baseline;
use crate::toolchain::{Bundler, Minifier, Transpiler};

/// Errors that can occur when running Esbuild.
#[derive(Debug, Error)]
pub enum EsbuildError {
    /// The process couldn't be started or fed.
    #[error("Couldn't run '{0}':\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    /// The Esbuild process returned a non-zero exit code.
    #[error("Esbuild execution failed:\n{0}")]
    Esbuild(String),

    /// Failed to parse Esbuild output as UTF-8.
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// An external `esbuild` binary.
///
/// Bundling runs it on the entry file with `--bundle`, so module resolution,
/// scope hoisting and renaming of colliding top-level names are all esbuild's.
/// Minification and lowering run it in transform mode, piping the code
/// through stdin and stdout.
#[derive(Debug, Clone)]
pub struct Esbuild {
    binary: Utf8PathBuf,
}

impl Esbuild {
    pub fn new(binary: impl Into<Utf8PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(self.binary.as_str());
        command
            .arg("--log-level=error")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    fn bundle_file(&self, entry: &Utf8Path, format: OutputFormat) -> Result<String, EsbuildError> {
        let format = match format {
            OutputFormat::Module => "esm",
            OutputFormat::SelfExecuting => "iife",
        };

        debug!(%entry, format, "esbuild --bundle");

        let output = self
            .command()
            .arg(entry.as_str())
            .arg("--bundle")
            .arg(format!("--format={format}"))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| EsbuildError::Io(self.binary.clone(), e))?;

        if !output.status.success() {
            return Err(EsbuildError::Esbuild(String::from_utf8(output.stderr)?));
        }

        Ok(String::from_utf8(output.stdout)?)
    }

    fn transform(&self, source: &str, args: &[String]) -> Result<String, EsbuildError> {
        let io = |e| EsbuildError::Io(self.binary.clone(), e);

        let mut child = self
            .command()
            .arg("--loader=js")
            .args(args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(io)?;

        let mut stdin = child.stdin.take();

        // feed stdin from another thread, a large output would otherwise
        // fill the stdout pipe and block both processes
        let output = std::thread::scope(|s| {
            let writer = s.spawn(move || match stdin.as_mut() {
                Some(stdin) => stdin.write_all(source.as_bytes()),
                None => Ok(()),
            });

            let output = child.wait_with_output();
            let written = writer.join().unwrap_or(Ok(()));
            written.and(output)
        })
        .map_err(io)?;

        if !output.status.success() {
            return Err(EsbuildError::Esbuild(String::from_utf8(output.stderr)?));
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

impl Bundler for Esbuild {
    fn bundle(&self, entry: &Utf8Path, format: OutputFormat) -> anyhow::Result<String> {
        Ok(self.bundle_file(entry, format)?)
    }
}

/// Esbuild can't lower every feature to every target, classes and `let` to
/// ES5 being the usual failures. Those surface as errors, not as broken code.
impl Transpiler for Esbuild {
    fn transpile(&self, source: &str, baseline: &Baseline) -> anyhow::Result<String> {
        Ok(self.transform(source, &[format!("--target={baseline}")])?)
    }
}

impl Minifier for Esbuild {
    fn minify(&self, source: &str, baseline: Option<&Baseline>) -> anyhow::Result<String> {
        let mut args = vec!["--minify".to_string()];
        if let Some(baseline) = baseline {
            args.push(format!("--target={baseline}"));
        }

        Ok(self.transform(source, &args)?)
    }
}


#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn missing_binary_is_an_io_error() {
        let esbuild = Esbuild::new("/nonexistent/esbuild");
        let err = esbuild.transform("var a;", &[]).unwrap_err();
        assert!(matches!(err, EsbuildError::Io(..)));
    }

    #[cfg(unix)]
    #[test]
    fn arguments_and_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        let stub = testing::stub(&root);
        fs::write(root.join("main.js"), "export var a = 1;\n").unwrap();

        let esbuild = Esbuild::new(&stub);
        let chrome52 = "chrome52".parse().unwrap();

        let bundled = esbuild.bundle(&root.join("main.js"), OutputFormat::SelfExecuting).unwrap();
        let lowered = esbuild.transpile("var b = 2;", &chrome52).unwrap();
        let minified = esbuild.minify("var c = 3;", Some(&chrome52)).unwrap();

        assert_eq!(bundled, "(() => {\nvar a = 1;\n})();\n");
        assert_eq!(lowered, "var b = 2;");
        assert_eq!(minified, "var c = 3;");
        assert_eq!(
            testing::calls(&stub),
            [
                format!("--log-level=error {root}/main.js --bundle --format=iife"),
                "--log-level=error --loader=js --target=chrome52".to_string(),
                "--log-level=error --loader=js --minify --target=chrome52".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn failure_carries_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        let path = root.join("esbuild");
        fs::write(&path, "#!/bin/sh\necho 'Could not resolve \"./nope.js\"' >&2\nexit 1\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let err = Esbuild::new(&path)
            .bundle_file(&root.join("main.js"), OutputFormat::Module)
            .unwrap_err();

        assert!(matches!(err, EsbuildError::Esbuild(ref stderr) if stderr.contains("./nope.js")));
    }

    #[test]
    fn real_esbuild_renames_colliding_names() {
        let Some(binary) = testing::installed() else {
            return;
        };

        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        fs::write(root.join("a.js"), "var x = 1;\nexport function getA() { return x; }\n").unwrap();
        fs::write(root.join("b.js"), "var x = 2;\nexport function getB() { return x; }\n").unwrap();
        fs::write(
            root.join("main.js"),
            "import { getA } from './a.js';\nimport { getB } from './b.js';\nconsole.log(getA(), getB());\n",
        )
        .unwrap();

        let code = Esbuild::new(binary)
            .bundle(&root.join("main.js"), OutputFormat::SelfExecuting)
            .unwrap();

        assert!(code.contains("var x = 1;"));
        assert!(code.contains("var x2 = 2;"));
        assert!(!code.contains("import"));
    }
}
