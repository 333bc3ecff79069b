//! Unit tests for the capability facade.

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use mockall::mock;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;
use url::Url;

use super::*;
use crate::protocol::HttpOptions;

mock! {
    Transport {}
    impl HttpTransport for Transport {
        fn get(&self, url: &Url, options: &HttpOptions) -> Result<HttpResponse, CapabilityError>;
        fn post(
            &self,
            url: &Url,
            body: &Value,
            options: &HttpOptions,
        ) -> Result<HttpResponse, CapabilityError>;
    }
}

fn ok_response() -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: std::collections::BTreeMap::new(),
        body: String::from("ok"),
    }
}

struct Project {
    _dir: TempDir,
    root: Utf8PathBuf,
}

#[fixture]
fn project() -> Project {
    let dir = tempfile::tempdir().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp path");
    fs::create_dir(root.join("src")).expect("create src");
    fs::write(root.join("src/app.js"), "eval(location.hash)\n").expect("write app");
    fs::write(root.join("package.json"), "{}").expect("write package");
    Project { _dir: dir, root }
}

fn facade(root: &Utf8Path, permissions: &[PluginPermission]) -> CapabilityFacade {
    CapabilityFacade::builder("test-plugin", root)
        .permissions(permissions.iter().copied().collect())
        .build()
}

#[rstest]
fn reads_files_with_fs_read(project: Project) {
    let facade = facade(&project.root, &[PluginPermission::FsRead]);
    assert_eq!(
        facade.fs().read_file("src/app.js").expect("read"),
        "eval(location.hash)\n"
    );
    assert!(facade.fs().exists("package.json").expect("exists"));
    assert!(!facade.fs().exists("missing.js").expect("exists"));
}

#[rstest]
fn absolute_paths_inside_the_root_are_accepted(project: Project) {
    let facade = facade(&project.root, &[PluginPermission::FsRead]);
    let absolute = project.root.join("src/app.js");
    assert!(facade.fs().read_file(absolute.as_str()).is_ok());
}

#[rstest]
#[case("../outside.txt")]
#[case("src/../../outside.txt")]
#[case("/etc/passwd")]
fn paths_outside_the_root_are_rejected(project: Project, #[case] path: &str) {
    let facade = facade(&project.root, &[PluginPermission::FsRead]);
    let err = facade.fs().read_file(path).expect_err("should reject");
    assert!(
        matches!(err, CapabilityError::PathOutsideRoot { .. }),
        "unexpected error: {err}"
    );
}

#[rstest]
fn writes_require_fs_write(project: Project) {
    let read_only = facade(&project.root, &[PluginPermission::FsRead]);
    let err = read_only
        .fs()
        .write_file("out.txt", "data")
        .expect_err("should deny");
    assert!(matches!(
        err,
        CapabilityError::PermissionDenied {
            permission: PluginPermission::FsWrite,
            ..
        }
    ));
    assert!(!project.root.join("out.txt").exists());
}

#[rstest]
fn write_then_read_round_trips(project: Project) {
    let facade = facade(
        &project.root,
        &[PluginPermission::FsRead, PluginPermission::FsWrite],
    );
    facade
        .fs()
        .write_file("report.txt", "two findings")
        .expect("write");
    assert_eq!(
        facade.fs().read_file("report.txt").expect("read"),
        "two findings"
    );
}

#[rstest]
fn reads_require_fs_read(project: Project) {
    let facade = facade(&project.root, &[PluginPermission::FsWrite]);
    for call in [
        CapabilityCall::ReadFile {
            path: String::from("package.json"),
        },
        CapabilityCall::Exists {
            path: String::from("package.json"),
        },
        CapabilityCall::ReadDir {
            path: String::from("."),
        },
    ] {
        let err = facade.invoke(&call).expect_err("should deny");
        assert_eq!(err.kind(), "permission_denied", "{}", call.name());
    }
}

#[rstest]
fn disabled_filesystem_fails_unconditionally(project: Project) {
    let facade = CapabilityFacade::builder("p", project.root.clone())
        .permissions(PermissionSet::all())
        .without_filesystem()
        .build();
    assert!(facade.fs().root().is_none());
    assert!(matches!(
        facade.fs().exists("package.json"),
        Err(CapabilityError::FilesystemDisabled { .. })
    ));
    assert!(matches!(
        facade.fs().write_file("x", "y"),
        Err(CapabilityError::FilesystemDisabled { .. })
    ));
}

#[rstest]
fn read_dir_lists_sorted_entries(project: Project) {
    let facade = facade(&project.root, &[PluginPermission::FsRead]);
    let listing = facade
        .invoke(&CapabilityCall::ReadDir {
            path: String::from("."),
        })
        .expect("list");
    assert_eq!(
        listing,
        json!([
            {"name": "package.json", "is_dir": false},
            {"name": "src", "is_dir": true}
        ])
    );
}

#[test]
fn http_without_permission_makes_no_request() {
    let mut transport = MockTransport::new();
    transport.expect_get().never();
    transport.expect_post().never();
    let facade = CapabilityFacade::builder("p", "/srv")
        .permissions(PermissionSet::new().with(PluginPermission::FsRead))
        .transport(Arc::new(transport))
        .build();

    let get = facade
        .http()
        .get("https://example.test", &HttpOptions::default())
        .expect_err("should deny");
    let post = facade
        .http()
        .post("https://example.test", &json!({}), &HttpOptions::default())
        .expect_err("should deny");
    assert_eq!(get.kind(), "permission_denied");
    assert_eq!(post.kind(), "permission_denied");
}

#[rstest]
#[case("not a url")]
#[case("file:///etc/passwd")]
#[case("ftp://example.test/data")]
fn http_rejects_non_http_urls(#[case] url: &str) {
    let mut transport = MockTransport::new();
    transport.expect_get().never();
    let facade = CapabilityFacade::builder("p", "/srv")
        .permissions(PermissionSet::new().with(PluginPermission::NetOutbound))
        .transport(Arc::new(transport))
        .build();
    let err = facade
        .http()
        .get(url, &HttpOptions::default())
        .expect_err("should reject");
    assert_eq!(err.kind(), "invalid_url");
}

#[test]
fn http_requests_are_spaced_by_the_minimum_interval() {
    let mut transport = MockTransport::new();
    transport.expect_get().times(2).returning(|_, _| Ok(ok_response()));
    let interval = Duration::from_millis(150);
    let facade = CapabilityFacade::builder("p", "/srv")
        .permissions(PermissionSet::new().with(PluginPermission::NetOutbound))
        .transport(Arc::new(transport))
        .min_request_interval(interval)
        .build();

    let started = Instant::now();
    for _ in 0..2 {
        let response = facade
            .http()
            .get("https://example.test/a", &HttpOptions::default())
            .expect("get");
        assert_eq!(response.status, 200);
    }
    assert!(
        started.elapsed() >= interval,
        "second request should have been delayed, elapsed {:?}",
        started.elapsed()
    );
}

#[test]
fn http_calls_are_served_over_the_wire() {
    let mut transport = MockTransport::new();
    transport
        .expect_post()
        .withf(|url, body, _| url.as_str() == "https://api.test/scan" && body == &json!({"a": 1}))
        .times(1)
        .returning(|_, _, _| Ok(ok_response()));
    let facade = CapabilityFacade::builder("p", "/srv")
        .permissions(PermissionSet::new().with(PluginPermission::NetOutbound))
        .transport(Arc::new(transport))
        .min_request_interval(Duration::ZERO)
        .build();

    let value = facade
        .invoke(&CapabilityCall::HttpPost {
            url: String::from("https://api.test/scan"),
            body: json!({"a": 1}),
            options: HttpOptions::default(),
        })
        .expect("post");
    assert_eq!(value, json!({"status": 200, "headers": {}, "body": "ok"}));
}

#[test]
fn env_access_requires_env_read() {
    let denied = CapabilityFacade::builder("p", "/srv").build();
    assert!(matches!(
        denied.env_var("PATH"),
        Err(CapabilityError::PermissionDenied {
            permission: PluginPermission::EnvRead,
            ..
        })
    ));

    let granted = CapabilityFacade::builder("p", "/srv")
        .permissions(PermissionSet::new().with(PluginPermission::EnvRead))
        .build();
    assert_eq!(
        granted
            .env_var("SECLINTER_SURELY_UNSET_VARIABLE")
            .expect("env read"),
        None
    );
}

#[rstest]
#[case(&["a", "b", "../c"], "a/c")]
#[case(&["./a", "", "b/"], "a/b")]
#[case(&["..", "a"], "../a")]
#[case(&[], ".")]
fn join_normalises(#[case] segments: &[&str], #[case] expected: &str) {
    assert_eq!(PathOps::new("/srv").join(segments), expected);
}

#[rstest]
#[case(&["src"], "/srv/project/src")]
#[case(&["/etc", "hosts"], "/etc/hosts")]
#[case(&["..", "other"], "/srv/other")]
#[case(&["/", "..", ".."], "/")]
fn resolve_is_absolute(#[case] segments: &[&str], #[case] expected: &str) {
    assert_eq!(PathOps::new("/srv/project").resolve(segments), expected);
}

#[rstest]
#[case("src/app.js", "src", "app.js")]
#[case("app.js", ".", "app.js")]
#[case("/", "/", "")]
#[case("/srv/project/", "/srv", "project")]
fn dirname_and_basename(#[case] path: &str, #[case] dir: &str, #[case] base: &str) {
    let ops = PathOps::new("/");
    assert_eq!(ops.dirname(path), dir);
    assert_eq!(ops.basename(path), base);
}

#[test]
fn modules_outside_the_allow_list_are_rejected() {
    let facade = CapabilityFacade::builder("p", "/srv").build();
    assert!(matches!(
        facade.modules().require("child_process"),
        Err(CapabilityError::ModuleNotAllowed { .. })
    ));
}

#[test]
fn allowed_modules_the_host_lacks_are_unavailable() {
    let facade = CapabilityFacade::builder("p", "/srv")
        .allowed_modules(["path", "util"])
        .build();
    assert!(matches!(
        facade.modules().require("util"),
        Err(CapabilityError::ModuleUnavailable { .. })
    ));
    assert!(matches!(
        facade.modules().require("crypto"),
        Err(CapabilityError::ModuleNotAllowed { .. })
    ));
    assert_eq!(facade.modules().allowed().collect::<Vec<_>>(), ["path", "util"]);
}

#[test]
fn crypto_module_hashes_with_sha256() {
    let facade = CapabilityFacade::builder("p", "/srv").build();
    let digest = facade
        .invoke(&CapabilityCall::CallModule {
            module: String::from("crypto"),
            method: String::from("sha256"),
            args: json!("abc"),
        })
        .expect("hash");
    assert_eq!(
        digest,
        json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );
}

#[test]
fn path_module_and_require_describe_methods() {
    let facade = CapabilityFacade::builder("p", "/srv/project").build();
    let described = facade
        .invoke(&CapabilityCall::Require {
            module: String::from("path"),
        })
        .expect("require");
    assert_eq!(described["name"], json!("path"));
    assert_eq!(
        facade
            .modules()
            .call("path", "resolve", &json!(["lib"]))
            .expect("resolve"),
        json!("/srv/project/lib")
    );
    assert!(matches!(
        facade.modules().call("path", "normalize", &json!([])),
        Err(CapabilityError::Module { .. })
    ));
}
