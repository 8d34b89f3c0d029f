//! Server discovery and install E2E tests
//!
//! Run the real process runner against a fake Python interpreter script that
//! answers `--version`, the module check and `pip install`.

#![cfg(unix)]

mod helper;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serial_test::serial;
use tempfile::TempDir;

use helper::ui::RecordingUi;
use mclsp_client::config::ServerConfig;
use mclsp_client::server::{
    INTERPRETER_PATH_KEY, ResolvedServer, ResolverInputs, ServerBootstrap, ServerOrigin,
    StateStore, StateStorer,
};

struct FakePython {
    _dir: TempDir,
    path: PathBuf,
    marker: PathBuf,
}

/// Interpreter whose `-m mclsp --version` only succeeds after a pip install
fn fake_python(version: &str) -> FakePython {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("python3");
    let marker = dir.path().join("installed");
    let script = format!(
        r#"#!/bin/sh
PATH=/usr/bin:/bin
case "$*" in
  "--version") echo "Python {version}" ;;
  "-m mclsp --version") [ -f "{marker}" ] || exit 1; echo "mclsp 0.3.0" ;;
  "-m pip install --upgrade mclsp") touch "{marker}" ;;
  *) exit 2 ;;
esac
"#,
        version = version,
        marker = marker.display()
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    FakePython {
        _dir: dir,
        path,
        marker,
    }
}

/// Hide any real `mclsp` or Python from the bare-command probes
struct IsolatedPath {
    original: Option<std::ffi::OsString>,
    _empty: TempDir,
}

impl IsolatedPath {
    fn new() -> Self {
        let empty = TempDir::new().unwrap();
        let original = std::env::var_os("PATH");
        // SAFETY: tests touching PATH are serialized
        unsafe { std::env::set_var("PATH", empty.path()) };
        Self {
            original,
            _empty: empty,
        }
    }
}

impl Drop for IsolatedPath {
    fn drop(&mut self) {
        // SAFETY: tests touching PATH are serialized
        match &self.original {
            Some(original) => unsafe { std::env::set_var("PATH", original) },
            None => unsafe { std::env::remove_var("PATH") },
        }
    }
}

fn inputs(python: &Path) -> ResolverInputs {
    ResolverInputs::from_config(
        &ServerConfig {
            python_path: Some(python.display().to_string()),
            ..Default::default()
        },
        None,
    )
}

fn bootstrap(state: Arc<StateStore>, consent: bool) -> ServerBootstrap {
    let ui = Arc::new(RecordingUi {
        consent,
        ..Default::default()
    });
    ServerBootstrap::with_process_runner(state, ui)
}

#[tokio::test]
#[serial]
async fn consent_installs_module_and_persists_interpreter() {
    let _path = IsolatedPath::new();
    let python = fake_python("3.12.1");
    let state_dir = TempDir::new().unwrap();
    let state = Arc::new(StateStore::new(&state_dir.path().join("state.db")).unwrap());

    let resolved = bootstrap(state.clone(), true)
        .resolve(&inputs(&python.path))
        .await;

    let python_path = python.path.display().to_string();
    assert_eq!(resolved, Some(ResolvedServer::interpreter(&python_path)));
    assert!(python.marker.exists());
    assert_eq!(
        state.get(INTERPRETER_PATH_KEY).unwrap().as_deref(),
        Some(python_path.as_str())
    );
}

#[tokio::test]
#[serial]
async fn declined_consent_installs_nothing() {
    let _path = IsolatedPath::new();
    let python = fake_python("3.12.1");
    let state = Arc::new(StateStore::in_memory().unwrap());

    let resolved = bootstrap(state.clone(), false)
        .resolve(&inputs(&python.path))
        .await;

    assert_eq!(resolved, None);
    assert!(!python.marker.exists());
    assert_eq!(state.get(INTERPRETER_PATH_KEY).unwrap(), None);
}

#[tokio::test]
#[serial]
async fn installed_module_resolves_without_prompt() {
    let _path = IsolatedPath::new();
    let python = fake_python("3.11.4");
    std::fs::write(&python.marker, "").unwrap();
    let state = Arc::new(StateStore::in_memory().unwrap());

    let resolved = bootstrap(state.clone(), false)
        .resolve(&inputs(&python.path))
        .await
        .unwrap();

    assert_eq!(resolved.origin, ServerOrigin::Interpreter);
    assert_eq!(resolved.args, vec!["-m", "mclsp"]);
    assert_eq!(
        state.get(INTERPRETER_PATH_KEY).unwrap(),
        Some(python.path.display().to_string())
    );
}

#[tokio::test]
#[serial]
async fn reinstall_reuses_persisted_interpreter() {
    let _path = IsolatedPath::new();
    let python = fake_python("3.12.1");
    let state = Arc::new(StateStore::in_memory().unwrap());
    state
        .set(INTERPRETER_PATH_KEY, &python.path.display().to_string())
        .unwrap();

    // No configured interpreter and nothing on PATH: only the persisted one can work
    let outcome = bootstrap(state, true)
        .reinstall(&ResolverInputs::default())
        .await
        .unwrap();

    assert!(python.marker.exists());
    assert!(outcome.reload);
    assert_eq!(outcome.server.command, python.path.display().to_string());
}

#[tokio::test]
#[serial]
async fn explicit_server_path_skips_discovery() {
    let _path = IsolatedPath::new();
    let inputs = ResolverInputs::from_config(
        &ServerConfig {
            path: Some("/opt/mclsp/bin/mclsp".to_string()),
            ..Default::default()
        },
        Some("/env/mclsp".to_string()),
    );

    let resolved = bootstrap(Arc::new(StateStore::in_memory().unwrap()), false)
        .resolve(&inputs)
        .await
        .unwrap();

    assert_eq!(resolved.command, "/opt/mclsp/bin/mclsp");
    assert_eq!(resolved.origin, ServerOrigin::ExplicitPath);
}
