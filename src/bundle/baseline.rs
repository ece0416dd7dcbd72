use std::fmt::Display;
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Chrome,
    Firefox,
    Safari,
    Edge,
    /// ECMAScript edition, versioned by year.
    Es,
}

/// The oldest runtime a bundle has to run on, e.g. `chrome41` or `es2017`.
///
/// The [`Display`] form is what esbuild takes for `--target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Baseline {
    pub engine: Engine,
    pub version: u32,
}

impl FromStr for Baseline {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Baseline(s.to_owned());
        let lower = s.trim().to_ascii_lowercase();

        let split = lower
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (name, version) = lower.split_at(split);

        // minor versions don't matter at this granularity
        let major = version.split('.').next().unwrap_or(version);
        let version: u32 = major.parse().map_err(|_| invalid())?;

        let (engine, version) = match name {
            "chrome" => (Engine::Chrome, version),
            "firefox" => (Engine::Firefox, version),
            "safari" => (Engine::Safari, version),
            "edge" => (Engine::Edge, version),
            "es" => match version {
                5 => (Engine::Es, 2009),
                6 => (Engine::Es, 2015),
                2015.. => (Engine::Es, version),
                _ => return Err(invalid()),
            },
            _ => return Err(invalid()),
        };

        Ok(Self { engine, version })
    }
}

impl Display for Baseline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.engine {
            Engine::Chrome => write!(f, "chrome{}", self.version),
            Engine::Firefox => write!(f, "firefox{}", self.version),
            Engine::Safari => write!(f, "safari{}", self.version),
            Engine::Edge => write!(f, "edge{}", self.version),
            Engine::Es if self.version == 2009 => write!(f, "es5"),
            Engine::Es => write!(f, "es{}", self.version),
        }
    }
}

impl Baseline {
    /// The baseline as a browserslist query.
    ///
    /// Browserslist has no notion of language editions, so an edition maps to
    /// the first Chrome release implementing all of it.
    pub fn browserslist(&self) -> String {
        let version = self.version;

        match self.engine {
            Engine::Chrome => format!("chrome {version}"),
            Engine::Firefox => format!("firefox {version}"),
            Engine::Safari => format!("safari {version}"),
            Engine::Edge => format!("edge {version}"),
            Engine::Es => {
                #[rustfmt::skip]
                let chrome = match version {
                    ..=2009 => return "ie 11".into(),
                    2015 => 51,
                    2016 => 52,
                    2017 => 58,
                    2018 => 64,
                    2019 => 73,
                    2020 => 80,
                    2021 => 85,
                    _    => 94,
                };

                format!("chrome {chrome}")
            }
        }
    }
}
