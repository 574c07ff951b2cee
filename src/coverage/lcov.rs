//! LCOV tracefile parser

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};

use super::{refresh, Class, CoverageReport, Line, Method, Package, PackageFilter};
use crate::demangle::Demangler;

/// Parse an LCOV file with default settings
pub fn parse_lcov(path: &Path) -> Result<CoverageReport> {
    LcovParser::new().parse_file(path)
}

/// Parse LCOV content from a string with default settings
pub fn parse_lcov_string(content: &str) -> CoverageReport {
    LcovParser::new().parse(content)
}

/// Builds a [`CoverageReport`] from LCOV text.
///
/// Parsing is best effort: lines that cannot be understood are skipped.
pub struct LcovParser {
    base_dir: PathBuf,
    excludes: PackageFilter,
    demangler: Option<Box<dyn Demangler>>,
}

impl Default for LcovParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LcovParser {
    pub fn new() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            excludes: PackageFilter::default(),
            demangler: None,
        }
    }

    /// Source paths are reported relative to this directory
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_excludes(mut self, excludes: PackageFilter) -> Self {
        self.excludes = excludes;
        self
    }

    pub fn with_demangler(mut self, demangler: Box<dyn Demangler>) -> Self {
        self.demangler = Some(demangler);
        self
    }

    pub fn parse_file(&self, path: &Path) -> Result<CoverageReport> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read LCOV file: {}", path.display()))?;
        Ok(self.parse(&content))
    }

    pub fn parse(&self, content: &str) -> CoverageReport {
        let mut report = CoverageReport {
            source: self.base_dir.display().to_string(),
            ..Default::default()
        };

        let mut current: Option<FileRecord> = None;

        for line in content.lines() {
            let line = line.trim();

            if line == "end_of_record" {
                if let Some(record) = current.take() {
                    self.finish_record(&mut report, record);
                }
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };

            if key == "SF" {
                // A new SF without end_of_record closes the previous file
                if let Some(record) = current.take() {
                    self.finish_record(&mut report, record);
                }
                let path = value.trim();
                if !path.is_empty() {
                    current = Some(FileRecord::new(path));
                }
                continue;
            }

            let Some(record) = current.as_mut() else {
                continue;
            };

            match key {
                "DA" => record.add_line(value),
                "BRDA" => record.add_branch(value),
                "FN" => record.add_function(value),
                "FNDA" => record.add_function_hits(value),
                // TN, LF, LH, BRF, BRH, FNF, FNH, VER and unknown keys
                _ => {}
            }
        }

        if let Some(record) = current.take() {
            self.finish_record(&mut report, record);
        }

        if let Some(ref demangler) = self.demangler {
            demangle_methods(&mut report, &**demangler);
        }

        refresh(&mut report);
        report
    }

    fn finish_record(&self, report: &mut CoverageReport, record: FileRecord) {
        let location = SourceLocation::new(Path::new(&record.path), &self.base_dir);

        if self.excludes.is_excluded(&location.package) {
            return;
        }

        let mut class = Class::new(location.class_name, location.filename.clone());
        class.lines = record.lines;
        class.methods = record.methods;

        let package = report
            .packages
            .entry(location.package.clone())
            .or_insert_with(|| Package::new(location.package));

        match package.classes.get_mut(&location.filename) {
            Some(existing) => existing.merge(class),
            None => {
                package.classes.insert(location.filename, class);
            }
        }
    }
}

/// Accumulators for one `SF` .. `end_of_record` block
struct FileRecord {
    path: String,
    lines: BTreeMap<u32, Line>,
    methods: BTreeMap<String, Method>,
}

impl FileRecord {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            lines: BTreeMap::new(),
            methods: BTreeMap::new(),
        }
    }

    fn line_mut(&mut self, number: u32) -> &mut Line {
        self.lines
            .entry(number)
            .or_insert_with(|| Line::new(number, 0))
    }

    // DA:<line>,<hits>[,<checksum>]
    fn add_line(&mut self, value: &str) {
        let mut fields = value.split(',');
        let (Some(number), Some(hits)) = (fields.next().and_then(parse_line_number), fields.next())
        else {
            return;
        };
        let line = self.line_mut(number);
        line.hits = line.hits.saturating_add(parse_count(hits));
    }

    // BRDA:<line>,<block>,<branch>,<taken>
    fn add_branch(&mut self, value: &str) {
        let Some((number, rest)) = value.split_once(',') else {
            return;
        };
        let Some(number) = parse_line_number(number) else {
            return;
        };
        let Some((outcome, taken)) = rest.rsplit_once(',') else {
            return;
        };
        let Some((block, branch)) = outcome.split_once(',') else {
            return;
        };

        let taken = match taken.trim() {
            "-" => 0,
            count => parse_count(count),
        };
        self.line_mut(number)
            .record_branch(block.trim(), branch.trim(), taken);
    }

    // FN:<line>,<name> or FN:<start>,<end>,<name>
    fn add_function(&mut self, value: &str) {
        let Some((start, rest)) = value.split_once(',') else {
            return;
        };
        let Some(line) = parse_line_number(start) else {
            return;
        };
        let name = match rest.split_once(',') {
            Some((end, name)) if end.trim().parse::<u32>().is_ok() => name,
            _ => rest,
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        self.methods
            .entry(name.to_string())
            .and_modify(|m| {
                if m.line == 0 {
                    m.line = line;
                }
            })
            .or_insert(Method::new(line, 0));
    }

    // FNDA:<hits>,<name>
    fn add_function_hits(&mut self, value: &str) {
        let Some((hits, name)) = value.split_once(',') else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        let method = self.methods.entry(name.to_string()).or_default();
        method.hits = method.hits.saturating_add(parse_count(hits));
    }
}

fn parse_line_number(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok().filter(|n| *n > 0)
}

/// Execution counts that are not integers (e.g. gcov's `=====`) count as zero
fn parse_count(value: &str) -> u64 {
    value.trim().parse::<u64>().unwrap_or(0)
}

/// Package, class name and filename derived from an `SF` path
#[derive(Debug, PartialEq, Eq)]
struct SourceLocation {
    package: String,
    class_name: String,
    filename: String,
}

impl SourceLocation {
    fn new(path: &Path, base_dir: &Path) -> Self {
        let path = normalize(path);
        let base_dir = normalize(base_dir);
        let relative = path.strip_prefix(&base_dir).unwrap_or(path.as_path());

        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                Component::ParentDir => Some("..".to_string()),
                _ => None,
            })
            .collect();

        let package = match parts.split_last() {
            Some((_, dirs)) if !dirs.is_empty() => dirs.join("."),
            _ => ".".to_string(),
        };

        Self {
            package,
            class_name: parts.join("."),
            filename: relative.to_string_lossy().replace('\\', "/"),
        }
    }
}

/// Lexically drop `.` and fold `..` into the preceding directory.
/// A leading `..` of a relative path has nothing to fold into and stays.
fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last().copied() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                // `/..` is `/`
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.into_iter().collect()
}

/// Replace every method name with its demangled form using one batched call
fn demangle_methods(report: &mut CoverageReport, demangler: &dyn Demangler) {
    let names: Vec<String> = report
        .packages
        .values()
        .flat_map(|p| p.classes.values())
        .flat_map(|c| c.methods.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if names.is_empty() {
        return;
    }

    let demangled = demangler.demangle(&names);
    let renames: HashMap<&str, &str> = names
        .iter()
        .map(String::as_str)
        .zip(demangled.iter().map(String::as_str))
        .collect();

    for class in report
        .packages
        .values_mut()
        .flat_map(|p| p.classes.values_mut())
    {
        let methods = std::mem::take(&mut class.methods);
        for (name, method) in methods {
            let name = renames
                .get(name.as_str())
                .map(|s| s.to_string())
                .unwrap_or(name);
            class
                .methods
                .entry(name)
                .and_modify(|m| m.merge(method))
                .or_insert(method);
        }
    }
}
