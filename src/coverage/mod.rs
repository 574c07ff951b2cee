//! Coverage module
//!
//! Provides:
//! - The aggregated coverage model (report, packages, classes, lines, methods)
//! - LCOV parsing
//! - Rate computation and package exclusion
//! - Cobertura XML generation

mod cobertura;
mod lcov;
mod metrics;

pub use cobertura::*;
pub use lcov::*;
pub use metrics::*;

use std::collections::BTreeMap;
use std::ops::AddAssign;

/// Covered/total counters shared by classes, packages and the report summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub lines_covered: u64,
    pub lines_total: u64,
    pub branches_covered: u64,
    pub branches_total: u64,
}

impl Totals {
    pub fn line_rate(&self) -> String {
        rate(self.lines_covered, self.lines_total)
    }

    pub fn branch_rate(&self) -> String {
        rate(self.branches_covered, self.branches_total)
    }
}

impl AddAssign for Totals {
    fn add_assign(&mut self, other: Self) {
        self.lines_covered += other.lines_covered;
        self.lines_total += other.lines_total;
        self.branches_covered += other.branches_covered;
        self.branches_total += other.branches_total;
    }
}

/// Root of the coverage model
#[derive(Debug, Clone)]
pub struct CoverageReport {
    /// Packages keyed by name
    pub packages: BTreeMap<String, Package>,
    pub summary: Totals,
    pub line_rate: String,
    pub branch_rate: String,
    /// Text of the `<source>` element
    pub source: String,
    /// Pinned timestamp; the generator samples the clock when unset
    pub timestamp: Option<i64>,
}

impl Default for CoverageReport {
    fn default() -> Self {
        Self {
            packages: BTreeMap::new(),
            summary: Totals::default(),
            line_rate: rate(0, 0),
            branch_rate: rate(0, 0),
            source: ".".to_string(),
            timestamp: None,
        }
    }
}

impl CoverageReport {
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Look up a class by its filename across all packages
    pub fn class(&self, filename: &str) -> Option<&Class> {
        self.packages.values().find_map(|p| p.classes.get(filename))
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A directory-level group of source files
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    /// Classes keyed by filename
    pub classes: BTreeMap<String, Class>,
    pub totals: Totals,
    pub line_rate: String,
    pub branch_rate: String,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: BTreeMap::new(),
            totals: Totals::default(),
            line_rate: rate(0, 0),
            branch_rate: rate(0, 0),
        }
    }
}

/// Coverage of a single source file
#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub filename: String,
    pub lines: BTreeMap<u32, Line>,
    pub methods: BTreeMap<String, Method>,
    pub totals: Totals,
    pub line_rate: String,
    pub branch_rate: String,
}

impl Class {
    pub fn new(name: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
            lines: BTreeMap::new(),
            methods: BTreeMap::new(),
            totals: Totals::default(),
            line_rate: rate(0, 0),
            branch_rate: rate(0, 0),
        }
    }

    /// Fold another record for the same file into this one
    pub fn merge(&mut self, other: Class) {
        for (number, line) in other.lines {
            match self.lines.get_mut(&number) {
                Some(existing) => existing.merge(line),
                None => {
                    self.lines.insert(number, line);
                }
            }
        }
        for (name, method) in other.methods {
            self.methods
                .entry(name)
                .and_modify(|m| m.merge(method))
                .or_insert(method);
        }
    }
}

/// One executable source line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub number: u32,
    pub hits: u64,
    /// Times taken, keyed by (block, branch)
    pub branches: BTreeMap<(String, String), u64>,
}

impl Line {
    pub fn new(number: u32, hits: u64) -> Self {
        Self {
            number,
            hits,
            branches: BTreeMap::new(),
        }
    }

    pub fn record_branch(&mut self, block: &str, branch: &str, taken: u64) {
        let total = self
            .branches
            .entry((block.to_string(), branch.to_string()))
            .or_insert(0);
        *total = total.saturating_add(taken);
    }

    pub fn is_branch(&self) -> bool {
        !self.branches.is_empty()
    }

    pub fn branches_total(&self) -> u64 {
        self.branches.len() as u64
    }

    pub fn branches_covered(&self) -> u64 {
        self.branches.values().filter(|&&taken| taken > 0).count() as u64
    }

    fn merge(&mut self, other: Line) {
        self.hits = self.hits.saturating_add(other.hits);
        for (key, taken) in other.branches {
            let total = self.branches.entry(key).or_insert(0);
            *total = total.saturating_add(taken);
        }
    }
}

/// A function entry point: declaration line and hit count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Method {
    pub line: u32,
    pub hits: u64,
}

impl Method {
    pub fn new(line: u32, hits: u64) -> Self {
        Self { line, hits }
    }

    /// Combine two entries for one function, keeping the earliest known line
    pub fn merge(&mut self, other: Method) {
        self.hits = self.hits.saturating_add(other.hits);
        self.line = match (self.line, other.line) {
            (0, line) | (line, 0) => line,
            (a, b) => a.min(b),
        };
    }
}
