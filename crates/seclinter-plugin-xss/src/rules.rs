//! Line-oriented XSS heuristics for scripts and markup.

use camino::Utf8Path;
use seclinter_plugins::{ScanResult, Severity};
use serde_json::Value;

use crate::PLUGIN_NAME;

/// APIs that render or evaluate strings.
const DANGEROUS_SINKS: [&str; 11] = [
    "innerHTML",
    "outerHTML",
    "document.write",
    "document.writeln",
    "eval",
    "setTimeout",
    "setInterval",
    "new Function",
    "execScript",
    "dangerouslySetInnerHTML",
    "insertAdjacentHTML",
];

/// Browser values an attacker can influence.
const USER_SOURCES: [&str; 11] = [
    "location",
    "location.href",
    "location.search",
    "location.hash",
    "document.URL",
    "document.documentURI",
    "document.referrer",
    "window.name",
    "document.cookie",
    "localStorage",
    "sessionStorage",
];

const EVENT_HANDLERS: [&str; 11] = [
    "onclick",
    "onload",
    "onmouseover",
    "onerror",
    "onmouseout",
    "onkeydown",
    "onkeyup",
    "onkeypress",
    "onchange",
    "onfocus",
    "onblur",
];

/// Scans JavaScript or TypeScript source.
///
/// ```
/// use camino::Utf8Path;
/// use seclinter_plugin_xss::scan_script;
/// use seclinter_plugins::Severity;
///
/// let results = scan_script("el.innerHTML = location.hash;", Utf8Path::new("app.js"));
/// assert_eq!(results.len(), 1);
/// assert!(results.iter().all(|result| result.level() == Severity::High));
/// ```
#[must_use]
pub fn scan_script(content: &str, file: &Utf8Path) -> Vec<ScanResult> {
    let mut results = Vec::new();
    for (number, line) in (1_u32..).zip(content.lines()) {
        let tainted = USER_SOURCES.iter().any(|source| line.contains(source));
        for sink in DANGEROUS_SINKS {
            let Some(offset) = line.find(sink) else {
                continue;
            };
            let finding = if tainted {
                ScanResult::builder(
                    "xss-dangerous-function-with-user-input",
                    PLUGIN_NAME,
                    Severity::High,
                    format!("Potential XSS vulnerability: {sink} with user input"),
                )
                .suggestion(format!(
                    "Avoid using {sink} with user-controlled data. Use safe alternatives or sanitize input."
                ))
            } else {
                ScanResult::builder(
                    "xss-dangerous-function",
                    PLUGIN_NAME,
                    Severity::Medium,
                    format!("Potential XSS risk: {sink} usage detected"),
                )
                .suggestion(format!("Consider using safer alternatives to {sink}."))
            };
            let mut builder = finding
                .file(file)
                .line(number)
                .metadata("sink", Value::from(sink));
            if let Some(column) = column_of(offset) {
                builder = builder.column(column);
            }
            results.push(builder.build());
        }

        if line.contains("dangerouslySetInnerHTML") && line.contains("__html") {
            results.push(
                ScanResult::builder(
                    "xss-react-dangerous-html",
                    PLUGIN_NAME,
                    Severity::Medium,
                    "Potential XSS vulnerability: dangerouslySetInnerHTML usage",
                )
                .file(file)
                .line(number)
                .suggestion("Use a HTML sanitizer library before setting HTML content.")
                .build(),
            );
        }

        if (line.contains("href=") || line.contains("src=")) && concatenates_literal(line) {
            results.push(
                ScanResult::builder(
                    "xss-url-injection",
                    PLUGIN_NAME,
                    Severity::Medium,
                    "Potential XSS through URL attribute injection",
                )
                .file(file)
                .line(number)
                .suggestion(
                    "Validate and sanitize URL values before using them in href or src attributes.",
                )
                .build(),
            );
        }
    }
    results
}

/// Scans HTML markup.
#[must_use]
pub fn scan_markup(content: &str, file: &Utf8Path) -> Vec<ScanResult> {
    let mut results = Vec::new();
    for (number, line) in (1_u32..).zip(content.lines()) {
        if line.contains("<script>") || line.contains("javascript:") {
            results.push(
                ScanResult::builder(
                    "xss-inline-script",
                    PLUGIN_NAME,
                    Severity::Low,
                    "Inline JavaScript detected",
                )
                .file(file)
                .line(number)
                .suggestion("Consider using external JavaScript files with proper CSP policies.")
                .build(),
            );
        }

        for handler in EVENT_HANDLERS {
            if !line.contains(&format!("{handler}=")) {
                continue;
            }
            results.push(
                ScanResult::builder(
                    "xss-event-handler",
                    PLUGIN_NAME,
                    Severity::Low,
                    format!("Event handler ({handler}) detected"),
                )
                .file(file)
                .line(number)
                .suggestion(
                    "Consider using unobtrusive JavaScript instead of inline event handlers.",
                )
                .build(),
            );
        }

        if line.contains("<form") && !line.contains("autocomplete=\"off\"") {
            results.push(
                ScanResult::builder(
                    "xss-form-autocomplete",
                    PLUGIN_NAME,
                    Severity::Info,
                    "Form without autocomplete=\"off\"",
                )
                .file(file)
                .line(number)
                .suggestion("Consider adding autocomplete=\"off\" for sensitive forms.")
                .build(),
            );
        }
    }
    results
}

/// Whether a string literal is closed and immediately concatenated with an
/// identifier, as in `'<a href="' + url`.
fn concatenates_literal(line: &str) -> bool {
    line.split(['\'', '"']).skip(1).any(|segment| {
        segment
            .trim_start()
            .strip_prefix('+')
            .and_then(|rest| rest.trim_start().chars().next())
            .is_some_and(|first| first.is_ascii_alphanumeric() || first == '_' || first == '$')
    })
}

fn column_of(offset: usize) -> Option<u32> {
    u32::try_from(offset).ok().map(|column| column.saturating_add(1))
}
