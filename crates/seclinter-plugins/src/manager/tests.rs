//! Unit tests for the plugin manager.

use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;

use super::*;
use crate::error::PluginFault;
use crate::events::{EventListener, PluginEventKind};
use crate::finding::{ScanResult, Severity};
use crate::loader::StaticLoader;
use crate::plugin::{ScanPlugin, ScanRequest};
use crate::sandbox::PluginEnvironment;
use crate::tests::support::{
    Failing, Panicking, Reporting, Sleeping, manifest_with_meta, scanning_plugin, shared,
    write_package,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct RefusesInit;

impl ScanPlugin for RefusesInit {
    fn init(&self, _environment: &PluginEnvironment) -> Result<(), PluginFault> {
        Err(PluginFault::message("missing api key"))
    }

    fn scan(&self, _request: &ScanRequest) -> Result<Vec<ScanResult>, PluginFault> {
        Ok(Vec::new())
    }
}

/// Describes itself instead of relying on the manifest.
struct SelfDescribing;

impl ScanPlugin for SelfDescribing {
    fn meta(&self) -> Result<Option<PluginMeta>, PluginFault> {
        Ok(Some(PluginMeta::new("described", "2.0.0", "py")))
    }

    fn scan(&self, _request: &ScanRequest) -> Result<Vec<ScanResult>, PluginFault> {
        Ok(Vec::new())
    }
}

/// Captures the options handed to `init` and `scan`.
#[derive(Default)]
struct Configurable {
    init_options: Mutex<Option<Value>>,
    scan_config: Mutex<Option<Value>>,
}

impl ScanPlugin for Configurable {
    fn init(&self, environment: &PluginEnvironment) -> Result<(), PluginFault> {
        *self.init_options.lock().expect("init lock") = Some(environment.options().clone());
        Ok(())
    }

    fn scan(&self, request: &ScanRequest) -> Result<Vec<ScanResult>, PluginFault> {
        *self.scan_config.lock().expect("scan lock") = Some(request.config().clone());
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn plugins_dir(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    /// Writes a package whose manifest declares metadata.
    fn package(&self, dir_name: &str, name: &str) -> PathBuf {
        write_package(&self.plugins_dir(), dir_name, &manifest_with_meta(name), "exit 0")
    }

    /// Writes a package whose manifest has no metadata.
    fn bare_package(&self, dir_name: &str, name: &str) -> PathBuf {
        let manifest = json!({"name": name, "version": "1.0.0"});
        write_package(&self.plugins_dir(), dir_name, &manifest, "exit 0")
    }

    fn config(&self) -> ManagerConfig {
        ManagerConfig {
            plugins_dir: self.plugins_dir(),
            enable_sandbox: false,
            fs_root: Utf8PathBuf::from_path_buf(self.dir.path().to_path_buf()).ok(),
            timeout: 2_000,
            ..ManagerConfig::default()
        }
    }

    fn manager(&self, loader: StaticLoader) -> PluginManager<StaticLoader> {
        PluginManager::with_loader(self.config(), loader)
    }
}

#[fixture]
fn workspace() -> Workspace {
    Workspace {
        dir: TempDir::new().expect("temp dir"),
    }
}

fn reporting(name: &str, levels: Vec<Severity>) -> Arc<dyn ScanPlugin> {
    Reporting::plugin(name, levels)
}

type Recorded = Arc<Mutex<Vec<(PluginEventKind, String)>>>;

fn record_events<L: PluginLoader>(manager: &PluginManager<L>) -> Recorded {
    let recorded: Recorded = Arc::default();
    let sink = Arc::clone(&recorded);
    let listener = EventListener::infallible(move |event| {
        sink.lock()
            .expect("events lock")
            .push((event.kind(), event.plugin().to_owned()));
    });
    for kind in [
        PluginEventKind::Loaded,
        PluginEventKind::Initialized,
        PluginEventKind::ScanStarted,
        PluginEventKind::ScanCompleted,
        PluginEventKind::ScanError,
        PluginEventKind::Unloaded,
        PluginEventKind::Error,
    ] {
        manager.events().on(kind, listener.clone());
    }
    recorded
}

fn kinds(recorded: &Recorded) -> Vec<PluginEventKind> {
    recorded
        .lock()
        .expect("events lock")
        .iter()
        .map(|(kind, _)| *kind)
        .collect()
}

// ---------------------------------------------------------------------------
// Discovery and loading
// ---------------------------------------------------------------------------

#[rstest]
fn discovery_loads_prefixed_packages_in_name_order(workspace: Workspace) {
    workspace.package("seclinter-plugin-b", "beta");
    workspace.package("seclinter-plugin-a", "alpha");
    workspace.package("unrelated", "ignored");
    let loader = StaticLoader::new()
        .with_plugin("alpha", reporting("alpha", Vec::new()))
        .with_plugin("beta", reporting("beta", Vec::new()))
        .with_plugin("ignored", reporting("ignored", Vec::new()));
    let mut manager = workspace.manager(loader);

    let outcome = manager.auto_discover_plugins();

    assert!(outcome.is_clean());
    assert_eq!(outcome.loaded(), ["alpha", "beta"]);
    assert!(manager.plugin("ignored").is_none());
}

#[rstest]
fn missing_plugins_dir_is_reported_not_raised(workspace: Workspace) {
    let mut manager = workspace.manager(StaticLoader::new());

    let outcome = manager.init();

    assert!(manager.is_empty());
    assert!(matches!(
        outcome.failures(),
        [PluginError::Discovery { .. }]
    ));
}

#[rstest]
fn a_broken_package_does_not_stop_discovery(workspace: Workspace) {
    workspace.package("seclinter-plugin-good", "good");
    fs::create_dir_all(workspace.plugins_dir().join("seclinter-plugin-broken"))
        .expect("broken package dir");
    let loader = StaticLoader::new().with_plugin("good", reporting("good", Vec::new()));
    let mut manager = workspace.manager(loader);

    let outcome = manager.init();

    assert_eq!(outcome.loaded(), ["good"]);
    match outcome.failures() {
        [PluginError::LoadFailed { source, .. }] => {
            assert!(matches!(**source, PluginError::ManifestMissing { .. }));
        }
        other => panic!("unexpected failures: {other:?}"),
    }
}

#[rstest]
fn init_applies_per_plugin_settings(workspace: Workspace) {
    workspace.package("seclinter-plugin-alpha", "alpha");
    workspace.package("seclinter-plugin-beta", "beta");
    workspace.package("gamma", "gamma");
    let mut config = workspace.config();
    config.plugins = serde_json::from_value(json!({
        "beta": false,
        "gamma": {"enabled": true, "strict": true}
    }))
    .expect("settings");
    let loader = StaticLoader::new()
        .with_plugin("alpha", reporting("alpha", Vec::new()))
        .with_plugin("beta", reporting("beta", Vec::new()))
        .with_plugin("gamma", reporting("gamma", Vec::new()));
    let mut manager = PluginManager::with_loader(config, loader);

    let outcome = manager.init();

    assert!(outcome.is_clean(), "{:?}", outcome.failures());
    let names: Vec<&str> = manager.plugins().iter().map(PluginPackage::name).collect();
    assert_eq!(names, ["alpha", "gamma"]);
    let gamma = manager.plugin("gamma").expect("gamma loaded");
    assert_eq!(gamma.config().options_value(), json!({"strict": true}));
}

#[rstest]
fn settings_name_plugins_by_their_unprefixed_directory(workspace: Workspace) {
    workspace.package("seclinter-plugin-delta", "delta");
    let mut config = workspace.config();
    config.auto_discover = false;
    config.plugins = serde_json::from_value(json!({"delta": true})).expect("settings");
    let loader = StaticLoader::new().with_plugin("delta", reporting("delta", Vec::new()));
    let mut manager = PluginManager::with_loader(config, loader);

    let outcome = manager.init();

    assert_eq!(outcome.loaded(), ["delta"]);
}

#[rstest]
fn loading_twice_keeps_the_first_registration(workspace: Workspace) {
    let path = workspace.package("seclinter-plugin-alpha", "alpha");
    let loader = StaticLoader::new().with_plugin("alpha", reporting("alpha", Vec::new()));
    let mut manager = workspace.manager(loader);

    let first = manager.load_plugin(&path).expect("first load");
    let second = manager.load_plugin(&path).expect("second load");

    assert_eq!(first, LoadOutcome::Loaded(String::from("alpha")));
    assert_eq!(second, LoadOutcome::AlreadyLoaded(String::from("alpha")));
    assert_eq!(manager.len(), 1);
}

#[rstest]
fn init_failures_prevent_registration(workspace: Workspace) {
    let path = workspace.package("seclinter-plugin-picky", "picky");
    let loader = StaticLoader::new().with_plugin("picky", Arc::new(RefusesInit));
    let mut manager = workspace.manager(loader);
    let recorded = record_events(&manager);

    let error = manager.load_plugin(&path).expect_err("init fails");

    assert!(manager.is_empty());
    assert!(recorded.lock().expect("events lock").is_empty());
    match error {
        PluginError::LoadFailed { path: failed, source } => {
            assert_eq!(failed, path);
            assert!(source.to_string().contains("missing api key"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn metadata_falls_back_to_the_plugin(workspace: Workspace) {
    let described = workspace.bare_package("seclinter-plugin-described", "described");
    let silent = workspace.bare_package("seclinter-plugin-silent", "silent");
    let loader = StaticLoader::new()
        .with_plugin("described", Arc::new(SelfDescribing))
        .with_plugin("silent", reporting("silent", Vec::new()));
    let mut manager = workspace.manager(loader);

    manager.load_plugin(&described).expect("described loads");
    let error = manager.load_plugin(&silent).expect_err("silent has no metadata");

    let meta = manager.plugin("described").expect("registered").meta();
    assert_eq!(meta.version(), "2.0.0");
    assert_eq!(meta.target(), "py");
    let PluginError::LoadFailed { source, .. } = error else {
        panic!("expected a load failure");
    };
    assert!(matches!(*source, PluginError::MetaMissing { ref name } if name == "silent"));
}

#[rstest]
fn init_receives_plugin_options_and_scans_receive_config(workspace: Workspace) {
    let path = workspace.package("seclinter-plugin-tuned", "tuned");
    let plugin = Arc::new(Configurable::default());
    let mut config = workspace.config();
    config.plugins =
        serde_json::from_value(json!({"tuned": {"threshold": 4}})).expect("settings");
    let loader =
        StaticLoader::new().with_plugin("tuned", Arc::clone(&plugin) as Arc<dyn ScanPlugin>);
    let mut manager = PluginManager::with_loader(config, loader);

    manager.load_plugin(&path).expect("load");
    manager.scan(&ScanOptions::new("/srv/project"));

    let expected = json!({"threshold": 4});
    assert_eq!(*plugin.init_options.lock().expect("init lock"), Some(expected.clone()));
    assert_eq!(*plugin.scan_config.lock().expect("scan lock"), Some(expected));
}

#[rstest]
fn loading_emits_loaded_then_initialized(workspace: Workspace) {
    let path = workspace.package("seclinter-plugin-alpha", "alpha");
    let loader = StaticLoader::new().with_plugin("alpha", reporting("alpha", Vec::new()));
    let mut manager = workspace.manager(loader);
    let recorded = record_events(&manager);

    manager.load_plugin(&path).expect("load");

    assert_eq!(
        kinds(&recorded),
        [PluginEventKind::Loaded, PluginEventKind::Initialized]
    );
}

#[rstest]
fn unloading_runs_cleanup_even_when_it_fails(workspace: Workspace) {
    let path = workspace.package("seclinter-plugin-flaky", "flaky");
    let loader = StaticLoader::new().with_plugin("flaky", shared(Failing));
    let mut manager = workspace.manager(loader);
    manager.load_plugin(&path).expect("load");
    let recorded = record_events(&manager);

    assert!(manager.unload_plugin("flaky"));
    assert!(!manager.unload_plugin("flaky"));
    assert!(manager.is_empty());
    assert_eq!(kinds(&recorded), [PluginEventKind::Unloaded]);
}

#[rstest]
fn unloaded_plugins_can_be_loaded_again(workspace: Workspace) {
    let path = workspace.package("seclinter-plugin-alpha", "alpha");
    let loader = StaticLoader::new().with_plugin("alpha", reporting("alpha", Vec::new()));
    let mut manager = workspace.manager(loader);
    manager.load_plugin(&path).expect("first load");

    assert!(manager.unload_plugin("alpha"));
    let reloaded = manager.load_plugin(&path).expect("reload");

    assert_eq!(reloaded.name(), "alpha");
    assert_eq!(manager.len(), 1);
    assert!(manager.status("alpha").is_some_and(PluginStatus::is_healthy));
}

#[rstest]
fn management_calls_reject_unknown_plugins(workspace: Workspace) {
    let mut manager = workspace.manager(StaticLoader::new());

    assert!(matches!(
        manager.set_enabled("ghost", false),
        Err(PluginError::NotLoaded { .. })
    ));
    assert!(matches!(
        manager.reset_health("ghost"),
        Err(PluginError::NotLoaded { .. })
    ));
    assert!(manager.status("ghost").is_none());
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

fn loaded(
    workspace: &Workspace,
    plugins: Vec<(&'static str, Arc<dyn ScanPlugin>)>,
) -> PluginManager<StaticLoader> {
    let mut loader = StaticLoader::new();
    let mut paths = Vec::new();
    for (name, plugin) in plugins {
        paths.push(workspace.package(&format!("seclinter-plugin-{name}"), name));
        loader.register(name, plugin);
    }
    let mut manager = workspace.manager(loader);
    for path in paths {
        manager.load_plugin(&path).expect("load");
    }
    manager
}

#[rstest]
#[case::serial(false)]
#[case::parallel(true)]
fn scans_aggregate_findings(workspace: Workspace, #[case] parallel: bool) {
    let mut manager = loaded(
        &workspace,
        vec![
            ("alpha", reporting("alpha", vec![Severity::High, Severity::Low])),
            ("beta", reporting("beta", vec![Severity::Critical])),
            ("quiet", reporting("quiet", Vec::new())),
        ],
    );

    let report = manager.scan(&ScanOptions::new("/srv/project").in_parallel(parallel));

    assert_eq!(report.stats.plugins_scanned, 3);
    assert_eq!(report.stats.issues_found, 3);
    assert!(report.stats.failed_plugins.is_empty());
    assert_eq!(report.stats.by_level.get(&Severity::High), Some(&1));
    assert_eq!(report.stats.by_level.get(&Severity::Medium), Some(&0));
    assert_eq!(report.stats.by_plugin.get("alpha"), Some(&2));
    assert_eq!(report.stats.by_plugin.get("quiet"), Some(&0));
    let plugins: Vec<&str> = report.results.iter().map(ScanResult::plugin).collect();
    assert_eq!(plugins, ["alpha", "alpha", "beta"]);
    assert_eq!(report.max_severity(), Some(Severity::Critical));
}

#[rstest]
fn scans_honour_targets_exclusions_and_enablement(workspace: Workspace) {
    let mut manager = loaded(
        &workspace,
        vec![
            ("alpha", reporting("alpha", vec![Severity::Low])),
            ("beta", reporting("beta", vec![Severity::Low])),
            ("gamma", reporting("gamma", vec![Severity::Low])),
        ],
    );
    manager.set_enabled("gamma", false).expect("gamma known");

    let targeted = manager.scan(&ScanOptions::new("/srv").targeting(["alpha", "gamma"]));
    let excluded = manager.scan(&ScanOptions::new("/srv").excluding(["alpha"]));

    assert_eq!(targeted.stats.plugins_scanned, 1);
    assert_eq!(targeted.stats.by_plugin.keys().collect::<Vec<_>>(), ["alpha"]);
    assert_eq!(excluded.stats.by_plugin.keys().collect::<Vec<_>>(), ["beta"]);
}

#[rstest]
fn an_empty_selection_yields_an_empty_report(workspace: Workspace) {
    let mut manager = workspace.manager(StaticLoader::new());

    let report = manager.scan(&ScanOptions::new("/srv"));

    assert_eq!(report.stats.plugins_scanned, 0);
    assert!(report.results.is_empty());
    assert_eq!(report.stats.by_level.len(), Severity::ALL.len());
}

#[rstest]
#[case::serial(false)]
#[case::parallel(true)]
fn failures_are_isolated(workspace: Workspace, #[case] parallel: bool) {
    let mut manager = loaded(
        &workspace,
        vec![
            ("alpha", reporting("alpha", vec![Severity::Medium])),
            ("broken", shared(Failing)),
            ("buggy", shared(Panicking)),
        ],
    );
    let recorded = record_events(&manager);

    let report = manager.scan(&ScanOptions::new("/srv").in_parallel(parallel));

    assert_eq!(report.stats.issues_found, 1);
    assert_eq!(report.stats.failed_plugins, ["broken", "buggy"]);
    assert!(!report.stats.by_plugin.contains_key("broken"));
    let status = manager.status("broken").expect("broken status");
    assert_eq!(status.error_count(), 1);
    assert!(status.last_error().is_some_and(|message| message.contains("boom")));
    assert!(
        manager
            .status("buggy")
            .and_then(PluginStatus::last_error)
            .is_some_and(|message| message.contains("panicked"))
    );
    let errors = kinds(&recorded)
        .into_iter()
        .filter(|kind| *kind == PluginEventKind::ScanError)
        .count();
    assert_eq!(errors, 2);
}

#[rstest]
#[case::serial(false)]
#[case::parallel(true)]
fn slow_plugins_time_out_without_blocking_others(workspace: Workspace, #[case] parallel: bool) {
    let mut manager = loaded(
        &workspace,
        vec![
            ("slow", shared(Sleeping(Duration::from_secs(2)))),
            ("alpha", reporting("alpha", vec![Severity::Info])),
        ],
    );
    let options = ScanOptions::new("/srv")
        .in_parallel(parallel)
        .with_timeout(Duration::from_millis(100));

    let report = manager.scan(&options);

    assert_eq!(report.stats.failed_plugins, ["slow"]);
    assert_eq!(report.stats.by_plugin.get("alpha"), Some(&1));
    assert!(report.stats.scan_time < 2_000);
    let message = manager
        .status("slow")
        .and_then(PluginStatus::last_error)
        .map(str::to_owned)
        .unwrap_or_default();
    assert_eq!(message, "Plugin slow timed out after 100ms");
}

#[rstest]
fn hung_parallel_plugins_share_one_grace_period(workspace: Workspace) {
    let names = ["one", "two", "three", "four", "five", "six"];
    let mut manager = loaded(
        &workspace,
        names
            .iter()
            .map(|&name| (name, shared(Sleeping(Duration::from_secs(3)))))
            .collect(),
    );
    let options = ScanOptions::new("/srv")
        .in_parallel(true)
        .with_timeout(Duration::from_millis(100));

    let report = manager.scan(&options);

    assert_eq!(report.stats.failed_plugins.len(), names.len());
    // One timeout plus one worker grace, not one grace per plugin.
    assert!(
        report.stats.scan_time < 1_500,
        "scan took {}ms",
        report.stats.scan_time
    );
}

#[rstest]
fn repeated_failures_mark_a_plugin_unhealthy_once(workspace: Workspace) {
    let mut manager = loaded(&workspace, vec![("broken", shared(Failing))]);
    let recorded = record_events(&manager);
    let options = ScanOptions::new("/srv");

    for _ in 0..4 {
        manager.scan(&options);
    }

    let status = manager.status("broken").expect("status");
    assert!(!status.is_healthy());
    assert_eq!(status.error_count(), 4);
    let errors = kinds(&recorded)
        .into_iter()
        .filter(|kind| *kind == PluginEventKind::Error)
        .count();
    assert_eq!(errors, 1);
}

#[rstest]
fn unhealthy_plugins_keep_scanning_until_reset(workspace: Workspace) {
    let mut manager = loaded(&workspace, vec![("broken", shared(Failing))]);
    let options = ScanOptions::new("/srv");
    for _ in 0..3 {
        manager.scan(&options);
    }

    let report = manager.scan(&options);
    manager.reset_health("broken").expect("known plugin");

    assert_eq!(report.stats.plugins_scanned, 1);
    let status = manager.status("broken").expect("status");
    assert!(status.is_healthy());
    assert_eq!(status.error_count(), 0);
    assert!(status.last_error().is_some());
}

#[rstest]
fn successes_record_execution_times(workspace: Workspace) {
    let mut manager = loaded(&workspace, vec![("alpha", reporting("alpha", Vec::new()))]);
    let recorded = record_events(&manager);

    manager.scan(&ScanOptions::new("/srv"));
    manager.scan(&ScanOptions::new("/srv"));

    let status = manager.status("alpha").expect("status");
    assert_eq!(status.executions(), 2);
    assert!(status.last_execution_time().is_some());
    assert!(status.average_execution_time().is_some());
    assert_eq!(
        kinds(&recorded),
        [
            PluginEventKind::ScanStarted,
            PluginEventKind::ScanCompleted,
            PluginEventKind::ScanStarted,
            PluginEventKind::ScanCompleted,
        ]
    );
}

// ---------------------------------------------------------------------------
// Process plugins end to end
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[rstest]
fn process_plugins_are_discovered_and_scanned(workspace: Workspace) {
    let meta = json!({"name": "shell", "version": "0.1.0", "target": "sh"});
    let findings = json!([{
        "ruleId": "SH-1",
        "plugin": "shell",
        "level": "medium",
        "message": "unquoted variable"
    }]);
    write_package(
        &workspace.plugins_dir(),
        "seclinter-plugin-shell",
        &json!({"name": "shell", "version": "0.1.0"}),
        &scanning_plugin(&meta, &findings.to_string()),
    );
    let mut manager = PluginManager::new(workspace.config());

    let outcome = manager.init();
    let report = manager.scan(&ScanOptions::new("/srv/project"));

    assert!(outcome.is_clean(), "{:?}", outcome.failures());
    assert_eq!(manager.plugin("shell").map(|package| package.meta().target()), Some("sh"));
    assert_eq!(report.stats.by_level.get(&Severity::Medium), Some(&1));
    assert!(report.has_findings_at_or_above(Severity::Medium));
    assert!(!report.has_findings_at_or_above(Severity::High));
}
