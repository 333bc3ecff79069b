//! Unit and behavioural tests for the XSS detector plugin.


use std::io::Cursor;

use camino::{Utf8Path, Utf8PathBuf};
use mockall::mock;
use mockall::predicate::eq;
use rstest::{fixture, rstest};
use seclinter_plugins::Severity;
use seclinter_plugins::guest::{DirEntry, GuestError};
use serde_json::{Value, json};

use crate::{PLUGIN_NAME, ProjectSource, XssDetector, run, scan_markup, scan_script};

mock! {
    pub(crate) Source {}
    impl ProjectSource for Source {
        fn list(&mut self, dir: &Utf8Path) -> Result<Vec<DirEntry>, GuestError>;
        fn read(&mut self, path: &Utf8Path) -> Result<String, GuestError>;
    }
}

pub(crate) fn file(name: &str) -> DirEntry {
    DirEntry {
        name: String::from(name),
        is_dir: false,
    }
}

pub(crate) fn dir(name: &str) -> DirEntry {
    DirEntry {
        name: String::from(name),
        is_dir: true,
    }
}

fn rule_ids(results: &[seclinter_plugins::ScanResult]) -> Vec<&str> {
    results.iter().map(seclinter_plugins::ScanResult::rule_id).collect()
}

#[fixture]
fn script_path() -> &'static Utf8Path {
    Utf8Path::new("src/app.js")
}

// ----------------------------------------------------------------------------
// Script rules
// ----------------------------------------------------------------------------

#[rstest]
#[case::inner_html("el.innerHTML = html;", "innerHTML")]
#[case::document_write("document.write(markup);", "document.write")]
#[case::adjacent("node.insertAdjacentHTML('beforeend', s);", "insertAdjacentHTML")]
#[case::function_constructor("const f = new Function(body);", "new Function")]
fn sink_without_source_is_medium(
    script_path: &Utf8Path,
    #[case] source: &str,
    #[case] sink: &str,
) {
    let results = scan_script(source, script_path);

    let finding = results
        .iter()
        .find(|result| result.metadata().get("sink") == Some(&json!(sink)))
        .expect("sink reported");
    assert_eq!(finding.rule_id(), "xss-dangerous-function");
    assert_eq!(finding.level(), Severity::Medium);
    assert_eq!(finding.plugin(), PLUGIN_NAME);
    assert_eq!(finding.line(), Some(1));
}

#[rstest]
#[case::hash("el.innerHTML = location.hash;")]
#[case::referrer("el.outerHTML = document.referrer;")]
#[case::storage("eval(localStorage.getItem('code'));")]
fn sink_fed_by_user_source_is_high(script_path: &Utf8Path, #[case] source: &str) {
    let results = scan_script(source, script_path);

    assert!(!results.is_empty());
    assert!(results.iter().all(|result| {
        result.rule_id() == "xss-dangerous-function-with-user-input"
            && result.level() == Severity::High
    }));
}

#[rstest]
fn reports_line_and_column_of_the_sink(script_path: &Utf8Path) {
    let source = "const a = 1;\n\n  box.innerHTML = a;\n";

    let results = scan_script(source, script_path);

    assert_eq!(results.len(), 1);
    let finding = results.first().expect("one finding");
    assert_eq!(finding.line(), Some(3));
    assert_eq!(finding.column(), Some(7));
    assert_eq!(finding.file(), Some(&Utf8PathBuf::from("src/app.js")));
}

#[rstest]
fn react_html_injection_is_reported_alongside_the_sink(script_path: &Utf8Path) {
    let source = "<div dangerouslySetInnerHTML={{ __html: body }} />";

    let results = scan_script(source, script_path);

    assert_eq!(
        rule_ids(&results),
        ["xss-dangerous-function", "xss-react-dangerous-html"]
    );
}

#[rstest]
#[case::concatenated("link.setAttribute('x', '<a href=\"' + target);", true)]
#[case::spaced("img = '<img src=' +  $url;", true)]
#[case::static_url("a = '<a href=\"/home\">';", false)]
#[case::number_sum("href= total + 1", false)]
fn url_concatenation(script_path: &Utf8Path, #[case] source: &str, #[case] flagged: bool) {
    let results = scan_script(source, script_path);

    assert_eq!(rule_ids(&results).contains(&"xss-url-injection"), flagged);
}

#[rstest]
fn clean_script_has_no_findings(script_path: &Utf8Path) {
    let source = "export function add(a, b) {\n  return a + b;\n}\n";

    assert!(scan_script(source, script_path).is_empty());
}

// ----------------------------------------------------------------------------
// Markup rules
// ----------------------------------------------------------------------------

#[test]
fn markup_rules_fire_per_line() {
    let page = concat!(
        "<html>\n",
        "<script>boot()</script>\n",
        "<button onclick=\"go()\" onfocus=\"hint()\">Go</button>\n",
        "<a href=\"javascript:void(0)\">x</a>\n",
        "<form action=\"/login\">\n",
        "<form action=\"/pay\" autocomplete=\"off\">\n",
    );

    let results = scan_markup(page, Utf8Path::new("index.html"));

    let summary: Vec<(&str, Option<u32>)> = results
        .iter()
        .map(|result| (result.rule_id(), result.line()))
        .collect();
    assert_eq!(
        summary,
        [
            ("xss-inline-script", Some(2)),
            ("xss-event-handler", Some(3)),
            ("xss-event-handler", Some(3)),
            ("xss-inline-script", Some(4)),
            ("xss-form-autocomplete", Some(5)),
        ]
    );
    assert!(
        results
            .iter()
            .filter(|result| result.rule_id() == "xss-form-autocomplete")
            .all(|result| result.level() == Severity::Info)
    );
}

// ----------------------------------------------------------------------------
// Project walk
// ----------------------------------------------------------------------------

#[test]
fn walks_project_and_skips_vendored_directories() {
    let mut source = MockSource::new();
    source
        .expect_list()
        .with(eq(Utf8Path::new("/srv/app")))
        .returning(|_| {
            Ok(vec![
                dir("node_modules"),
                dir("src"),
                file("README.md"),
                file("index.html"),
            ])
        });
    source
        .expect_list()
        .with(eq(Utf8Path::new("/srv/app/src")))
        .returning(|_| Ok(vec![file("main.ts")]));
    source
        .expect_read()
        .with(eq(Utf8Path::new("/srv/app/index.html")))
        .times(1)
        .returning(|_| Ok(String::from("<script>run()</script>")));
    source
        .expect_read()
        .with(eq(Utf8Path::new("/srv/app/src/main.ts")))
        .times(1)
        .returning(|_| Ok(String::from("document.body.innerHTML = view;")));

    let results = XssDetector::new()
        .scan_project(&mut source, Utf8Path::new("/srv/app"))
        .expect("scan succeeds");

    let files: Vec<Option<&str>> = results
        .iter()
        .map(|result| result.file().map(|path| path.as_str()))
        .collect();
    assert_eq!(files, [Some("index.html"), Some("src/main.ts")]);
}

#[test]
fn listing_failure_aborts_the_scan() {
    let mut source = MockSource::new();
    source.expect_list().returning(|_| {
        Err(GuestError::Refused {
            kind: String::from("permission_denied"),
            message: String::from("missing fs:read"),
        })
    });
    source.expect_read().never();

    let error = XssDetector::new()
        .scan_project(&mut source, Utf8Path::new("/srv/app"))
        .expect_err("scan fails");

    assert!(error.is_permission_denied());
}

#[rstest]
#[case::extra_dirs(json!({"ignore": ["vendor", "coverage"]}), true)]
#[case::no_options(Value::Null, false)]
fn ignore_option_extends_skipped_dirs(#[case] options: Value, #[case] skips_vendor: bool) {
    let mut detector = XssDetector::new();

    detector.configure(&options).expect("valid options");

    assert_eq!(detector.skips("vendor"), skips_vendor);
    assert!(detector.skips("node_modules"));
}

#[rstest]
#[case::not_a_list(json!({"ignore": "vendor"}))]
#[case::not_strings(json!({"ignore": [1, 2]}))]
fn malformed_ignore_option_is_rejected(#[case] options: Value) {
    let mut detector = XssDetector::new();

    let error = detector.configure(&options).expect_err("invalid options");

    assert!(matches!(error, GuestError::Plugin(_)));
}

// ----------------------------------------------------------------------------
// Protocol
// ----------------------------------------------------------------------------

fn serve_lines(input: &str) -> Vec<Value> {
    let mut reader = Cursor::new(input.as_bytes().to_vec());
    let mut writer = Vec::new();
    run(&mut reader, &mut writer).expect("request served");
    String::from_utf8(writer)
        .expect("utf-8 output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

#[test]
fn describe_reports_read_only_metadata() {
    let lines = serve_lines("{\"operation\":\"describe\"}\n");

    let response = lines.last().expect("response line");
    assert_eq!(response["kind"], json!("response"));
    assert_eq!(response["output"]["meta"]["name"], json!(PLUGIN_NAME));
    assert_eq!(response["output"]["meta"]["permissions"], json!(["fs:read"]));
}

#[test]
fn scan_reads_the_project_through_host_calls() {
    let request = json!({"operation": "scan", "project_path": "/srv/app"});
    let listing = json!({"status": "ok", "id": 1, "value": [{"name": "app.js", "is_dir": false}]});
    let content = json!({"status": "ok", "id": 2, "value": "eval(location.hash)"});
    let input = format!("{request}\n{listing}\n{content}\n");

    let lines = serve_lines(&input);

    let calls: Vec<&Value> = lines
        .iter()
        .filter(|line| line["kind"] == json!("call"))
        .map(|line| &line["call"])
        .collect();
    assert_eq!(
        calls,
        [
            &json!({"capability": "read_dir", "path": "/srv/app"}),
            &json!({"capability": "read_file", "path": "/srv/app/app.js"}),
        ]
    );
    let response = lines.last().expect("response line");
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["output"]["results"][0]["level"], json!("high"));
    assert_eq!(response["output"]["results"][0]["file"], json!("app.js"));
}
