//! lcov-cobertura - LCOV to Cobertura XML converter
//!
//! A library for turning LCOV tracefiles into Cobertura coverage reports:
//! - Tolerant LCOV parsing into packages (directories) and classes (files)
//! - Line and branch rates rolled up per class, package and report
//! - Package exclusion by regular expression
//! - Optional symbol demangling through `c++filt`, `rustfilt` or any filter
//! - Cobertura XML output with the coverage-04 DOCTYPE

pub mod config;
pub mod coverage;
pub mod demangle;

pub use config::Config;
pub use coverage::{
    generate_cobertura_xml, parse_lcov, parse_lcov_string, write_cobertura, Class, CoverageReport,
    Indent, LcovParser, Line, Method, Package, PackageFilter, Totals,
};
pub use demangle::{BuiltinDemangler, Demangler, DemanglerSelector, Passthrough, ProcessDemangler};
