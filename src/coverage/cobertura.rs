//! Cobertura XML generator

use anyhow::{bail, Context, Result};
use chrono::Utc;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use super::{percent, Class, CoverageReport, Line, Method, Package};

pub const COBERTURA_DOCTYPE: &str =
    "coverage SYSTEM 'http://cobertura.sourceforge.net/xml/coverage-04.dtd'";

const COBERTURA_VERSION: &str = "2.0.3";

/// Indentation of the generated document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indent {
    indent_char: u8,
    size: usize,
}

impl Indent {
    pub fn spaces(size: usize) -> Self {
        Self {
            indent_char: b' ',
            size,
        }
    }

    pub fn tabs() -> Self {
        Self {
            indent_char: b'\t',
            size: 1,
        }
    }

    /// Everything on one line
    pub fn none() -> Self {
        Self {
            indent_char: b' ',
            size: 0,
        }
    }
}

impl Default for Indent {
    fn default() -> Self {
        Self::spaces(4)
    }
}

/// `tab`, `none`, or a number of spaces
impl FromStr for Indent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "tab" | "tabs" => Ok(Self::tabs()),
            "none" => Ok(Self::none()),
            size => match size.parse::<usize>() {
                Ok(size) => Ok(Self::spaces(size)),
                Err(_) => bail!(
                    "Invalid indent '{}': expected a number of spaces, 'tab' or 'none'",
                    size
                ),
            },
        }
    }
}

type XmlWriter = Writer<Vec<u8>>;

/// Render a report as a Cobertura XML document.
///
/// Uses the report's timestamp when set, otherwise the current Unix time in
/// seconds.
pub fn generate_cobertura_xml(report: &CoverageReport, indent: Indent) -> Result<String> {
    let mut writer = if indent.size > 0 {
        Writer::new_with_indent(Vec::new(), indent.indent_char, indent.size)
    } else {
        Writer::new(Vec::new())
    };

    writer.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
    writer.write_event(Event::DocType(BytesText::from_escaped(COBERTURA_DOCTYPE)))?;

    let timestamp = report
        .timestamp
        .unwrap_or_else(|| Utc::now().timestamp())
        .to_string();
    let summary = &report.summary;
    let lines_covered = summary.lines_covered.to_string();
    let lines_valid = summary.lines_total.to_string();
    let branches_covered = summary.branches_covered.to_string();
    let branches_valid = summary.branches_total.to_string();

    let coverage = BytesStart::new("coverage").with_attributes([
        ("line-rate", report.line_rate.as_str()),
        ("branch-rate", report.branch_rate.as_str()),
        ("lines-covered", lines_covered.as_str()),
        ("lines-valid", lines_valid.as_str()),
        ("branches-covered", branches_covered.as_str()),
        ("branches-valid", branches_valid.as_str()),
        ("complexity", "0"),
        ("version", COBERTURA_VERSION),
        ("timestamp", timestamp.as_str()),
    ]);
    writer.write_event(Event::Start(coverage))?;

    writer.write_event(Event::Start(BytesStart::new("sources")))?;
    writer.write_event(Event::Start(BytesStart::new("source")))?;
    writer.write_event(Event::Text(BytesText::new(&report.source)))?;
    writer.write_event(Event::End(BytesEnd::new("source")))?;
    writer.write_event(Event::End(BytesEnd::new("sources")))?;

    if report.packages.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new("packages")))?;
    } else {
        writer.write_event(Event::Start(BytesStart::new("packages")))?;
        for package in report.packages.values() {
            write_package(&mut writer, package)?;
        }
        writer.write_event(Event::End(BytesEnd::new("packages")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("coverage")))?;

    let mut xml = String::from_utf8(writer.into_inner())
        .context("Generated Cobertura XML is not valid UTF-8")?;
    xml.push('\n');
    Ok(xml)
}

/// Render a report and write it to `path` in one piece
pub fn write_cobertura(report: &CoverageReport, indent: Indent, path: &Path) -> Result<()> {
    let xml = generate_cobertura_xml(report, indent)?;
    fs::write(path, xml)
        .with_context(|| format!("Failed to write Cobertura report: {}", path.display()))?;
    Ok(())
}

fn write_package(writer: &mut XmlWriter, package: &Package) -> Result<()> {
    let start = BytesStart::new("package").with_attributes([
        ("name", package.name.as_str()),
        ("line-rate", package.line_rate.as_str()),
        ("branch-rate", package.branch_rate.as_str()),
        ("complexity", "0"),
    ]);
    writer.write_event(Event::Start(start))?;

    writer.write_event(Event::Start(BytesStart::new("classes")))?;
    for class in package.classes.values() {
        write_class(writer, class)?;
    }
    writer.write_event(Event::End(BytesEnd::new("classes")))?;

    writer.write_event(Event::End(BytesEnd::new("package")))?;
    Ok(())
}

fn write_class(writer: &mut XmlWriter, class: &Class) -> Result<()> {
    let start = BytesStart::new("class").with_attributes([
        ("name", class.name.as_str()),
        ("filename", class.filename.as_str()),
        ("line-rate", class.line_rate.as_str()),
        ("branch-rate", class.branch_rate.as_str()),
        ("complexity", "0"),
    ]);
    writer.write_event(Event::Start(start))?;

    if class.methods.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new("methods")))?;
    } else {
        writer.write_event(Event::Start(BytesStart::new("methods")))?;
        for (name, method) in &class.methods {
            write_method(writer, name, method)?;
        }
        writer.write_event(Event::End(BytesEnd::new("methods")))?;
    }

    if class.lines.is_empty() {
        writer.write_event(Event::Empty(BytesStart::new("lines")))?;
    } else {
        writer.write_event(Event::Start(BytesStart::new("lines")))?;
        for line in class.lines.values() {
            writer.write_event(Event::Empty(line_element(line)))?;
        }
        writer.write_event(Event::End(BytesEnd::new("lines")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("class")))?;
    Ok(())
}

fn write_method(writer: &mut XmlWriter, name: &str, method: &Method) -> Result<()> {
    // A method is either entered or not
    let rate = if method.hits > 0 { "1.0" } else { "0.0" };

    let start = BytesStart::new("method").with_attributes([
        ("name", name),
        ("signature", ""),
        ("line-rate", rate),
        ("branch-rate", rate),
    ]);
    writer.write_event(Event::Start(start))?;

    writer.write_event(Event::Start(BytesStart::new("lines")))?;
    let mut line = BytesStart::new("line");
    line.push_attribute(("number", method.line.to_string().as_str()));
    line.push_attribute(("hits", method.hits.to_string().as_str()));
    line.push_attribute(("branch", "false"));
    writer.write_event(Event::Empty(line))?;
    writer.write_event(Event::End(BytesEnd::new("lines")))?;

    writer.write_event(Event::End(BytesEnd::new("method")))?;
    Ok(())
}

fn line_element(line: &Line) -> BytesStart<'static> {
    let mut element = BytesStart::new("line");
    element.push_attribute(("number", line.number.to_string().as_str()));
    element.push_attribute(("hits", line.hits.to_string().as_str()));

    if line.is_branch() {
        let covered = line.branches_covered();
        let total = line.branches_total();
        let condition = format!("{}% ({}/{})", percent(covered, total), covered, total);
        element.push_attribute(("branch", "true"));
        element.push_attribute(("condition-coverage", condition.as_str()));
    } else {
        element.push_attribute(("branch", "false"));
    }

    element
}
