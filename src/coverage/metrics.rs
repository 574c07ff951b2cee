//! Coverage rates, total roll-up and package exclusion

use anyhow::{Context, Result};
use regex::Regex;

use super::{Class, CoverageReport, Totals};

/// Format `covered/total` with one fractional digit, rounding half up.
///
/// An empty unit (`total == 0`) is reported as fully covered.
pub fn rate(covered: u64, total: u64) -> String {
    if total == 0 {
        return "1.0".to_string();
    }
    let tenths = (covered * 20 + total) / (2 * total);
    format!("{}.{}", tenths / 10, tenths % 10)
}

/// Integer percentage of `covered/total`, rounding half up
pub fn percent(covered: u64, total: u64) -> u64 {
    if total == 0 {
        return 100;
    }
    (covered * 200 + total) / (2 * total)
}

/// Recompute totals and rates for every class, package and the summary
pub fn refresh(report: &mut CoverageReport) {
    let mut summary = Totals::default();

    for package in report.packages.values_mut() {
        let mut totals = Totals::default();

        for class in package.classes.values_mut() {
            refresh_class(class);
            totals += class.totals;
        }

        package.totals = totals;
        package.line_rate = totals.line_rate();
        package.branch_rate = totals.branch_rate();
        summary += totals;
    }

    report.summary = summary;
    report.line_rate = summary.line_rate();
    report.branch_rate = summary.branch_rate();
}

fn refresh_class(class: &mut Class) {
    let mut totals = Totals::default();

    for line in class.lines.values() {
        totals.lines_total += 1;
        if line.hits > 0 {
            totals.lines_covered += 1;
        }
        totals.branches_total += line.branches_total();
        totals.branches_covered += line.branches_covered();
    }

    class.totals = totals;
    class.line_rate = totals.line_rate();
    class.branch_rate = totals.branch_rate();
}

/// Package-name patterns; a package is excluded when any pattern matches at
/// the start of its name.
#[derive(Debug, Clone, Default)]
pub struct PackageFilter {
    patterns: Vec<Regex>,
}

impl PackageFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(&format!("^(?:{})", p))
                    .with_context(|| format!("Invalid exclude pattern: {}", p))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, package: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(package))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
