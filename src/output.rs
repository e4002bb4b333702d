//! CLI output formatting for builds.
//!
//! # Information-First Display
//!
//! Output is **information-centric, not file-centric**. Pages lead with
//! their positional index and title, followed by `→` and the output path;
//! the source file is secondary context on an indented `Source:` line. Pages
//! without a title show their source path in parentheses instead.
//!
//! # Output Format
//!
//! ```text
//! Pages
//! 001 Home → index.html
//!     Source: README.md
//! 002 Blog → blog/index.html
//!     Source: blog/page.js
//!     Layout: blog
//!
//! Templates
//! 001 feed.json.template.js
//!     → feed.json
//!
//! Assets
//!     global.css → global-1a2b3c4d.css
//!
//! Static
//!     robots.txt
//!
//! Built 2 pages, 1 template output, 1 asset, 1 static file
//! ```
//!
//! Warnings and errors go to stderr. Each error is followed by its
//! `caused by:` chain:
//!
//! ```text
//! error: Error resolving page vars for blog/page.js
//!     caused by: blog/page.vars.js: `default` failed
//!     caused by: no data
//! ```
//!
//! # Architecture
//!
//! Each report has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes it out. Format functions
//! are pure: no I/O, no side effects.

use crate::build::BuildReport;
use crate::bundle::METAFILE;
use crate::site::{ROOT_LAYOUT, Warning};
use std::error::Error;

// ============================================================================
// Shared entity display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Format an entity header: positional index + title, or the source path in
/// parens when there is no title.
///
/// ```text
/// 001 Getting Started
/// 002 (about/page.html)
/// ```
fn entity_header(index: usize, title: Option<&str>, source: &str) -> String {
    match title {
        Some(t) if !t.trim().is_empty() => format!("{} {}", format_index(index), t),
        _ => format!("{} ({})", format_index(index), source),
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

// ============================================================================
// Build summary
// ============================================================================

/// Format the summary of a build.
pub fn format_build_output(report: &BuildReport) -> Vec<String> {
    let mut lines = Vec::new();

    if !report.pages.is_empty() {
        lines.push("Pages".to_string());
        for (i, page) in report.pages.iter().enumerate() {
            lines.push(format!(
                "{} \u{2192} {}",
                entity_header(i + 1, page.title.as_deref(), &page.source),
                page.output
            ));
            lines.push(format!("{}Source: {}", indent(1), page.source));
            if page.layout != ROOT_LAYOUT {
                lines.push(format!("{}Layout: {}", indent(1), page.layout));
            }
        }
    }

    let template_outputs: usize = report.templates.iter().map(|t| t.outputs.len()).sum();
    if !report.templates.is_empty() {
        push_section(&mut lines, "Templates");
        for (i, template) in report.templates.iter().enumerate() {
            lines.push(format!("{} {}", format_index(i + 1), template.source));
            for output in &template.outputs {
                lines.push(format!("{}\u{2192} {}", indent(1), output));
            }
        }
    }

    let user_assets: Vec<(&str, &str)> = report
        .assets
        .iter()
        .filter(|(source, _)| !source.starts_with("_pagesmith/"))
        .collect();
    if !user_assets.is_empty() {
        push_section(&mut lines, "Assets");
        for (source, output) in &user_assets {
            lines.push(format!("{}{} \u{2192} {}", indent(1), source, output));
        }
    }

    if !report.copied.is_empty() {
        push_section(&mut lines, "Static");
        for file in &report.copied {
            lines.push(format!("{}{}", indent(1), file));
        }
    }

    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(format!(
        "Built {}, {}, {}, {}",
        plural(report.pages.len(), "page"),
        plural(template_outputs, "template output"),
        plural(user_assets.len(), "asset"),
        plural(report.copied.len(), "static file")
    ));
    lines.push(format!(
        "{}Asset map: {}",
        indent(1),
        report.dest.join(METAFILE).display()
    ));
    lines
}

fn push_section(lines: &mut Vec<String>, title: &str) {
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(title.to_string());
}

/// Print a build summary to stdout.
pub fn print_build_output(report: &BuildReport) {
    for line in format_build_output(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Warnings and errors
// ============================================================================

pub fn format_warnings(warnings: &[Warning]) -> Vec<String> {
    warnings
        .iter()
        .map(|warning| format!("warning: {}", warning))
        .collect()
}

/// An error and every cause under it, one per line.
pub fn format_error_chain(err: &dyn Error) -> Vec<String> {
    let mut lines = vec![format!("error: {}", err)];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("{}caused by: {}", indent(1), cause));
        source = cause.source();
    }
    lines
}

/// Every error in a list, each with its cause chain.
pub fn format_errors<E: Error>(errors: &[E]) -> Vec<String> {
    errors
        .iter()
        .flat_map(|err| format_error_chain(err))
        .collect()
}

/// Print warnings to stderr.
pub fn print_warnings(warnings: &[Warning]) {
    for line in format_warnings(warnings) {
        eprintln!("{}", line);
    }
}

/// Print an error and its causes to stderr.
pub fn print_error(err: &dyn Error) {
    for line in format_error_chain(err) {
        eprintln!("{}", line);
    }
}

/// Print every error in a list to stderr.
pub fn print_errors<E: Error>(errors: &[E]) {
    for line in format_errors(errors) {
        eprintln!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
