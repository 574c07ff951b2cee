use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coverage::{Indent, PackageFilter};
use crate::demangle::{DemanglerSelector, DEFAULT_TIMEOUT};

pub const CONFIG_FILE: &str = "lcov-cobertura.toml";

/// Settings read from `lcov-cobertura.toml`; command-line flags override them
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub base_dir: Option<PathBuf>,
    /// Package-name regexes to drop from the report
    pub excludes: Vec<String>,
    /// `c++filt`, `rustfilt`, `none` or a path to a filter executable
    pub demangler: Option<String>,
    /// Seconds to wait for the demangler before giving up
    pub demangle_timeout: Option<u64>,
    /// Spaces per indentation level (0 for a single line), `"tab"` or `"none"`
    pub indent: Option<IndentSetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IndentSetting {
    Spaces(usize),
    Named(String),
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load `path` when given, else `lcov-cobertura.toml` in the working
    /// directory if present, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(CONFIG_FILE);
                if default.is_file() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        self.package_filter()?;

        if let Some(ref demangler) = self.demangler {
            demangler
                .parse::<DemanglerSelector>()
                .with_context(|| format!("Invalid demangler '{}'", demangler))?;
        }

        if self.demangle_timeout == Some(0) {
            anyhow::bail!("demangle-timeout must be at least 1 second");
        }

        self.indent()?;

        Ok(())
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn package_filter(&self) -> Result<PackageFilter> {
        PackageFilter::new(&self.excludes)
    }

    pub fn demangler(&self) -> Result<DemanglerSelector> {
        match self.demangler {
            Some(ref name) => name.parse(),
            None => Ok(DemanglerSelector::None),
        }
    }

    pub fn demangle_timeout(&self) -> Duration {
        self.demangle_timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn indent(&self) -> Result<Indent> {
        match self.indent {
            Some(IndentSetting::Spaces(size)) => Ok(Indent::spaces(size)),
            Some(IndentSetting::Named(ref name)) => name.parse(),
            None => Ok(Indent::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demangle::BuiltinDemangler;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
base-dir = "/build/project"
excludes = ["tests", "third_party\\..*"]
demangler = "rustfilt"
demangle-timeout = 5
indent = 2
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.base_dir(), PathBuf::from("/build/project"));
        assert_eq!(config.excludes.len(), 2);
        assert_eq!(
            config.demangler().unwrap(),
            DemanglerSelector::Builtin(BuiltinDemangler::RustFilt)
        );
        assert_eq!(config.demangle_timeout(), Duration::from_secs(5));
        assert_eq!(config.indent().unwrap(), Indent::spaces(2));

        let filter = config.package_filter().unwrap();
        assert!(filter.is_excluded("third_party.zlib"));
        assert!(!filter.is_excluded("src"));
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.base_dir(), PathBuf::from("."));
        assert!(config.package_filter().unwrap().is_empty());
        assert_eq!(config.demangler().unwrap(), DemanglerSelector::None);
        assert_eq!(config.demangle_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(config.indent().unwrap(), Indent::default());
    }

    #[test]
    fn test_load_rejects_bad_pattern() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "excludes = [\"(unclosed\"]").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid exclude pattern"));
    }

    #[test]
    fn test_named_indent() {
        let config: Config = toml::from_str("indent = \"tab\"").unwrap();
        assert_eq!(config.indent().unwrap(), Indent::tabs());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "indent = \"wide\"").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid indent"));
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "output = \"coverage.xml\"").unwrap();

        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_discover_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "demangler = \"c++filt\"").unwrap();

        let config = Config::discover(Some(file.path())).unwrap();
        assert_eq!(config.demangler().unwrap(), DemanglerSelector::default_demangler());
    }

    #[test]
    fn test_discover_missing_explicit_path_fails() {
        let err = Config::discover(Some(Path::new("/nonexistent/lcov-cobertura.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
