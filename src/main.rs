use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use lcov_cobertura::{
    generate_cobertura_xml, write_cobertura, Config, CoverageReport, DemanglerSelector, Indent,
    LcovParser, PackageFilter,
};

const STDIN_PATH: &str = "-";

#[derive(Parser)]
#[command(name = "lcov-cobertura")]
#[command(about = "Convert LCOV coverage tracefiles to Cobertura XML")]
#[command(version)]
struct Cli {
    /// LCOV tracefile to convert ("-" reads standard input)
    input: PathBuf,

    /// Write the report here instead of standard output
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory source paths are made relative to (default: .)
    #[arg(short, long)]
    base_dir: Option<PathBuf>,

    /// Comma-separated regexes of package names to exclude
    #[arg(short, long, value_delimiter = ',')]
    excludes: Vec<String>,

    /// Demangle function names with the default demangler (c++filt)
    #[arg(short, long)]
    demangle: bool,

    /// Demangler to use: c++filt, rustfilt, or a path to a filter executable
    #[arg(long, value_name = "NAME")]
    demangler: Option<String>,

    /// Seconds to wait for the demangler (default: 30)
    #[arg(long, value_name = "SECS")]
    demangle_timeout: Option<u64>,

    /// Timestamp written to the report (default: now, in seconds)
    #[arg(long)]
    timestamp: Option<i64>,

    /// Spaces per indentation level, "tab", or 0/"none" for a single line (default: 4)
    #[arg(long, value_name = "N|tab|none")]
    indent: Option<String>,

    /// Path to config file (default: lcov-cobertura.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Effective settings after merging the config file and flags
struct Settings {
    base_dir: PathBuf,
    excludes: PackageFilter,
    demangler: DemanglerSelector,
    demangle_timeout: Duration,
    indent: Indent,
}

impl Settings {
    fn resolve(cli: &Cli, config: &Config) -> Result<Self> {
        let base_dir = cli.base_dir.clone().unwrap_or_else(|| config.base_dir());

        let excludes = if cli.excludes.is_empty() {
            config.package_filter()?
        } else {
            PackageFilter::new(&cli.excludes)?
        };

        let demangler = match cli.demangler {
            Some(ref name) => name
                .parse::<DemanglerSelector>()
                .with_context(|| format!("Invalid demangler '{}'", name))?,
            None => match config.demangler()? {
                DemanglerSelector::None if cli.demangle => DemanglerSelector::default_demangler(),
                selector => selector,
            },
        };

        let demangle_timeout = match cli.demangle_timeout {
            Some(0) => anyhow::bail!("--demangle-timeout must be at least 1 second"),
            Some(secs) => Duration::from_secs(secs),
            None => config.demangle_timeout(),
        };

        let indent = match cli.indent {
            Some(ref indent) => indent.parse::<Indent>()?,
            None => config.indent()?,
        };

        Ok(Self {
            base_dir,
            excludes,
            demangler,
            demangle_timeout,
            indent,
        })
    }

    fn parser(self) -> (LcovParser, Indent) {
        let mut parser = LcovParser::new()
            .with_base_dir(self.base_dir)
            .with_excludes(self.excludes);

        if self.demangler.is_enabled() {
            parser = parser.with_demangler(self.demangler.into_demangler(self.demangle_timeout));
        }

        (parser, self.indent)
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::discover(cli.config.as_deref())?;
    let (parser, indent) = Settings::resolve(&cli, &config)?.parser();

    let content = read_input(&cli.input)?;
    let mut report = parser.parse(&content);
    if let Some(timestamp) = cli.timestamp {
        report = report.with_timestamp(timestamp);
    }

    match cli.output {
        Some(ref path) => {
            write_cobertura(&report, indent, path)?;
            print_summary(&report, path);
        }
        None => {
            let xml = generate_cobertura_xml(&report, indent)?;
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(xml.as_bytes())
                .and_then(|_| stdout.flush())
                .context("Failed to write Cobertura report to stdout")?;
        }
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new(STDIN_PATH) {
        return io::read_to_string(io::stdin()).context("Failed to read LCOV data from stdin");
    }

    fs::read_to_string(path)
        .with_context(|| format!("Failed to read LCOV file: {}", path.display()))
}

fn print_summary(report: &CoverageReport, path: &Path) {
    let summary = &report.summary;
    eprintln!(
        "{} Wrote {} ({} package(s), lines {}/{}, branches {}/{})",
        "✓".green().bold(),
        path.display().to_string().green(),
        report.packages.len(),
        summary.lines_covered,
        summary.lines_total,
        summary.branches_covered,
        summary.branches_total
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use lcov_cobertura::BuiltinDemangler;

    fn resolve(args: &[&str]) -> Result<Settings> {
        let cli = Cli::try_parse_from(args).unwrap();
        Settings::resolve(&cli, &Config::default())
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let settings = resolve(&["lcov-cobertura", "coverage.info"]).unwrap();
        assert_eq!(settings.base_dir, PathBuf::from("."));
        assert!(settings.excludes.is_empty());
        assert_eq!(settings.demangler, DemanglerSelector::None);
        assert_eq!(settings.indent, Indent::spaces(4));
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "lcov-cobertura",
            "coverage.info",
            "--output",
            "coverage.xml",
            "--base-dir",
            "/src",
            "--excludes",
            "tests,vendor",
            "--timestamp",
            "1620211505",
            "--indent",
            "0",
        ])
        .unwrap();
        assert_eq!(cli.output, Some(PathBuf::from("coverage.xml")));
        assert_eq!(cli.timestamp, Some(1620211505));

        let settings = Settings::resolve(&cli, &Config::default()).unwrap();
        assert_eq!(settings.base_dir, PathBuf::from("/src"));
        assert!(settings.excludes.is_excluded("tests"));
        assert!(settings.excludes.is_excluded("vendor.zlib"));
        assert!(!settings.excludes.is_excluded("src"));
        assert_eq!(settings.indent, Indent::none());
    }

    #[test]
    fn test_demangle_flags() {
        let settings = resolve(&["lcov-cobertura", "-d", "in.info"]).unwrap();
        assert_eq!(settings.demangler, DemanglerSelector::default_demangler());

        let settings = resolve(&["lcov-cobertura", "--demangler=rustfilt", "in.info"]).unwrap();
        assert_eq!(
            settings.demangler,
            DemanglerSelector::Builtin(BuiltinDemangler::RustFilt)
        );

        let settings = resolve(&["lcov-cobertura", "--demangler", "/opt/swift-demangle", "in.info"]).unwrap();
        assert_eq!(
            settings.demangler,
            DemanglerSelector::Executable(PathBuf::from("/opt/swift-demangle"))
        );
    }

    #[test]
    fn test_flags_override_config() {
        let config: Config = toml::from_str(
            "base-dir = \"/cfg\"\nexcludes = [\"gen\"]\ndemangler = \"rustfilt\"\nindent = 8\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from(["lcov-cobertura", "in.info"]).unwrap();
        let settings = Settings::resolve(&cli, &config).unwrap();
        assert_eq!(settings.base_dir, PathBuf::from("/cfg"));
        assert!(settings.excludes.is_excluded("gen"));
        assert_eq!(
            settings.demangler,
            DemanglerSelector::Builtin(BuiltinDemangler::RustFilt)
        );
        assert_eq!(settings.indent, Indent::spaces(8));

        let cli = Cli::try_parse_from([
            "lcov-cobertura",
            "-b",
            "/cli",
            "-e",
            "src",
            "--demangler",
            "none",
            "--indent",
            "2",
            "in.info",
        ])
        .unwrap();
        let settings = Settings::resolve(&cli, &config).unwrap();
        assert_eq!(settings.base_dir, PathBuf::from("/cli"));
        assert!(!settings.excludes.is_excluded("gen"));
        assert!(settings.excludes.is_excluded("src"));
        assert_eq!(settings.demangler, DemanglerSelector::None);
        assert_eq!(settings.indent, Indent::spaces(2));
    }

    #[test]
    fn test_indent_names() {
        let settings = resolve(&["lcov-cobertura", "--indent", "tab", "in.info"]).unwrap();
        assert_eq!(settings.indent, Indent::tabs());

        let settings = resolve(&["lcov-cobertura", "--indent", "none", "in.info"]).unwrap();
        assert_eq!(settings.indent, Indent::none());

        assert!(resolve(&["lcov-cobertura", "--indent", "wide", "in.info"]).is_err());
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        assert!(resolve(&["lcov-cobertura", "--demangle-timeout", "0", "in.info"]).is_err());
    }

    #[test]
    fn test_invalid_exclude_is_rejected() {
        assert!(resolve(&["lcov-cobertura", "-e", "foo(", "in.info"]).is_err());
    }

    #[test]
    fn test_read_input_missing_file() {
        let err = read_input(Path::new("/nonexistent/coverage.info")).unwrap_err();
        assert!(err.to_string().contains("Failed to read LCOV file"));
    }
}
