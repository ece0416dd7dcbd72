//! The asset stages of the build graph.

pub mod clean;
pub mod copy;
pub mod html;
pub mod images;
pub mod styles;

pub use clean::{CleanStage, FinishStage};
pub use copy::CopyStage;
pub use html::HtmlStage;
pub use images::ImageStage;
pub use styles::StyleStage;

#[cfg(test)]
pub(crate) mod testing {
    use std::fs;

    use camino::{Utf8Path, Utf8PathBuf};

    use crate::config::Config;
    use crate::executor::{Environment, TaskContext};

    /// A project root holding `files`, with the default configuration.
    pub fn project(files: &[(&str, &[u8])]) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();

        for (path, bytes) in files {
            let path = root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, bytes).unwrap();
        }

        (dir, Config::at(root))
    }

    pub fn context(env: &Environment) -> TaskContext<'_> {
        TaskContext {
            env,
            span: tracing::Span::none(),
        }
    }

    pub fn read(path: impl AsRef<Utf8Path>) -> String {
        fs::read_to_string(path.as_ref()).unwrap()
    }

    pub fn list(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
        let mut files: Vec<_> = walk(dir)
            .into_iter()
            .map(|path| path.strip_prefix(dir).unwrap().to_owned())
            .collect();
        files.sort();
        files
    }

    fn walk(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
        let mut out = Vec::new();
        let Ok(entries) = fs::read_dir(dir) else {
            return out;
        };

        for entry in entries {
            let path = Utf8PathBuf::try_from(entry.unwrap().path()).unwrap();
            if path.is_dir() {
                out.extend(walk(&path));
            } else {
                out.push(path);
            }
        }

        out
    }
}
