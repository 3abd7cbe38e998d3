//! Dependent-file discovery
//!
//! Before a multi-file operation (rename, move) the files referencing the
//! target are opened in the session so tsserver includes them in its
//! answer. When tsserver cannot answer yet, a time-boxed walk of the
//! project opens every source file it does not already know about.

use crate::protocol::{wire_path, FileReferencesBody, ProjectInfoBody};
use crate::session::ServerSession;
use futures::future::join_all;
use ignore::WalkBuilder;
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tsmill_config::DiscoveryConfig;
use tsmill_foundation::ProjectStatus;

/// Suffixes of declaration-only files, never opened by the fallback walk
const DECLARATION_SUFFIXES: &[&str] = &[".d.ts", ".d.mts", ".d.cts"];

/// Result of the fallback filesystem walk
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub files: Vec<PathBuf>,
    pub timed_out: bool,
}

pub struct FileDiscovery {
    session: Arc<dyn ServerSession>,
    project_root: PathBuf,
    config: DiscoveryConfig,
}

impl FileDiscovery {
    pub fn new(session: Arc<dyn ServerSession>, project_root: impl Into<PathBuf>, config: DiscoveryConfig) -> Self {
        Self {
            session,
            project_root: project_root.into(),
            config,
        }
    }

    /// Open each target and the files that reference it.
    ///
    /// Never fails: open errors are tolerated and a scan timeout is
    /// reported through the returned status.
    pub async fn discover_related_files<I, P>(&self, paths: I) -> ProjectStatus
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut did_scan_timeout = false;

        for path in paths {
            let target = self.resolve(path.as_ref());
            if let Err(e) = self.session.open_file(&target).await {
                warn!(file = %target.display(), error = %e, "Failed to open discovery target");
            }

            match self.poll_references(&target).await {
                Some(referencing) => {
                    let to_open: Vec<PathBuf> = referencing.into_iter().filter(|f| *f != target).collect();
                    debug!(
                        file = %target.display(),
                        referencing = to_open.len(),
                        "Opening referencing files"
                    );
                    self.open_all(&to_open).await;
                }
                None => {
                    if self.fallback_scan(&target).await {
                        did_scan_timeout = true;
                    }
                }
            }
        }

        ProjectStatus {
            is_fully_loaded: self.session.is_project_loaded().await,
            did_scan_timeout,
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.project_root.join(path)
        } else {
            path.to_path_buf()
        }
    }

    /// Ask tsserver for referencing files until it answers or the attempts
    /// run out. `None` means it never answered.
    async fn poll_references(&self, target: &Path) -> Option<Vec<PathBuf>> {
        let arguments = json!({ "file": wire_path(target) });

        for attempt in 1..=self.config.max_reference_attempts {
            match self.session.send_request("fileReferences", Some(arguments.clone())).await {
                Ok(Some(body)) => match serde_json::from_value::<FileReferencesBody>(body) {
                    Ok(parsed) => {
                        return Some(parsed.refs.into_iter().map(|r| PathBuf::from(r.file)).collect());
                    }
                    Err(e) => debug!(attempt, error = %e, "Unexpected fileReferences body"),
                },
                Ok(None) => debug!(attempt, "Empty fileReferences response"),
                Err(e) => debug!(attempt, error = %e, "fileReferences not available yet"),
            }

            if attempt < self.config.max_reference_attempts {
                tokio::time::sleep(self.config.attempt_interval()).await;
            }
        }

        info!(
            file = %target.display(),
            attempts = self.config.max_reference_attempts,
            "tsserver could not list referencing files, scanning project"
        );
        None
    }

    /// Open every source file tsserver does not know yet. Returns whether
    /// the walk timed out.
    async fn fallback_scan(&self, target: &Path) -> bool {
        let (known, walk_root) = self.project_files(target).await;
        let outcome = scan_source_files(walk_root.clone(), &self.config, self.config.scan_timeout()).await;

        let unknown: Vec<PathBuf> = outcome
            .files
            .into_iter()
            .filter(|f| f != target && !known.contains(f))
            .collect();

        info!(
            root = %walk_root.display(),
            known = known.len(),
            opening = unknown.len(),
            timed_out = outcome.timed_out,
            "Fallback scan finished"
        );
        self.open_all(&unknown).await;
        outcome.timed_out
    }

    /// Files tsserver already tracks for the target's project, and the
    /// directory to walk (the tsconfig's directory when known)
    async fn project_files(&self, target: &Path) -> (HashSet<PathBuf>, PathBuf) {
        let arguments = json!({ "file": wire_path(target), "needFileNameList": true });
        let info = match self.session.send_request("projectInfo", Some(arguments)).await {
            Ok(Some(body)) => serde_json::from_value::<ProjectInfoBody>(body).ok(),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "projectInfo unavailable");
                None
            }
        };

        let Some(info) = info else {
            return (HashSet::new(), self.project_root.clone());
        };

        let walk_root = info
            .config_file_name
            .as_deref()
            .map(Path::new)
            .and_then(Path::parent)
            .filter(|dir| dir.is_absolute() && dir.is_dir())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.project_root.clone());

        let known = info
            .file_names
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect();

        (known, walk_root)
    }

    async fn open_all(&self, files: &[PathBuf]) {
        let results = join_all(files.iter().map(|file| self.session.open_file(file))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            debug!(failed, total = files.len(), "Some files could not be opened");
        }
    }
}

/// Depth-first walk of `root` collecting source files, bounded by `timeout`.
///
/// Skips configured dependency/build directories, `.`-prefixed directories
/// and declaration-only files.
pub async fn scan_source_files(root: PathBuf, config: &DiscoveryConfig, timeout: Duration) -> ScanOutcome {
    let skip_dirs = config.skip_dirs.clone();
    let extensions = config.extensions.clone();

    let walk = tokio::task::spawn_blocking(move || walk_sources(&root, skip_dirs, &extensions, timeout));
    match walk.await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "Source scan task failed");
            ScanOutcome {
                files: Vec::new(),
                timed_out: true,
            }
        }
    }
}

fn walk_sources(root: &Path, skip_dirs: Vec<String>, extensions: &[String], timeout: Duration) -> ScanOutcome {
    let deadline = Instant::now() + timeout;
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir || entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !name.starts_with('.') && !skip_dirs.iter().any(|skip| *skip == name)
        })
        .build();

    let mut outcome = ScanOutcome::default();
    for entry in walker {
        if Instant::now() >= deadline {
            outcome.timed_out = true;
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                found = outcome.files.len(),
                "Source scan timed out"
            );
            break;
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if is_source_file(entry.path(), extensions) {
            outcome.files.push(entry.into_path());
        }
    }
    outcome
}

fn is_source_file(path: &Path, extensions: &[String]) -> bool {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return false,
    };
    if DECLARATION_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        return false;
    }
    path.extension()
        .map(|ext| extensions.iter().any(|e| ext == e.as_str()))
        .unwrap_or(false)
}

/// Caveat text for an otherwise successful result; empty when healthy
pub fn build_warning_message(status: &ProjectStatus, context: &str) -> String {
    let mut sentences = Vec::new();
    if !status.is_fully_loaded {
        sentences.push(format!(
            "Warning: TypeScript is still indexing the project, so {} may be incomplete.",
            context
        ));
    }
    if status.did_scan_timeout {
        sentences.push(format!(
            "Warning: file discovery timed out before the whole project was scanned; files outside the scanned area may not be reflected in {}.",
            context
        ));
    }
    sentences.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MockServerSession;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tsmill_foundation::TsMillError;

    fn fast_config() -> DiscoveryConfig {
        DiscoveryConfig {
            max_reference_attempts: 3,
            attempt_interval_ms: 1,
            ..DiscoveryConfig::default()
        }
    }

    fn touch(root: &Path, relative: &str) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "export {};\n").unwrap();
        path
    }

    fn recording_opens(session: &mut MockServerSession) -> Arc<Mutex<Vec<PathBuf>>> {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let sink = opened.clone();
        session.expect_open_file().returning(move |path| {
            sink.lock().unwrap().push(path.to_path_buf());
            Ok(())
        });
        opened
    }

    #[tokio::test]
    async fn test_opens_referencing_files_except_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = touch(dir.path(), "src/target.ts");
        let user = touch(dir.path(), "src/user.ts");

        let mut session = MockServerSession::new();
        let opened = recording_opens(&mut session);
        let refs = json!({
            "refs": [
                {"file": target.to_string_lossy()},
                {"file": user.to_string_lossy()}
            ],
            "symbolName": "\"target\""
        });
        session
            .expect_send_request()
            .withf(|command, _| command == "fileReferences")
            .times(1)
            .returning(move |_, _| Ok(Some(refs.clone())));
        session.expect_is_project_loaded().return_const(true);

        let discovery = FileDiscovery::new(Arc::new(session), dir.path(), fast_config());
        let status = discovery.discover_related_files(["src/target.ts"]).await;

        assert!(status.is_healthy());
        assert_eq!(*opened.lock().unwrap(), vec![target, user]);
    }

    #[tokio::test]
    async fn test_falls_back_to_scan_when_references_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let target = touch(dir.path(), "src/target.ts");
        let known = touch(dir.path(), "src/known.ts");
        let unknown = touch(dir.path(), "src/nested/unknown.tsx");
        touch(dir.path(), "src/types.d.ts");
        touch(dir.path(), "node_modules/pkg/index.ts");
        touch(dir.path(), ".cache/stale.ts");
        touch(dir.path(), "README.md");
        std::fs::write(dir.path().join("tsconfig.json"), "{}").unwrap();

        let mut session = MockServerSession::new();
        let opened = recording_opens(&mut session);
        session
            .expect_send_request()
            .withf(|command, _| command == "fileReferences")
            .times(3)
            .returning(|command, _| Err(TsMillError::server(command, "No Project.")));

        let info = json!({
            "configFileName": dir.path().join("tsconfig.json").to_string_lossy(),
            "fileNames": [target.to_string_lossy(), known.to_string_lossy()]
        });
        session
            .expect_send_request()
            .withf(|command, args| {
                command == "projectInfo"
                    && args.as_ref().and_then(|a| a.get("needFileNameList")) == Some(&json!(true))
            })
            .times(1)
            .returning(move |_, _| Ok(Some(info.clone())));
        session.expect_is_project_loaded().return_const(false);

        let discovery = FileDiscovery::new(Arc::new(session), dir.path(), fast_config());
        let status = discovery.discover_related_files(vec![target.clone()]).await;

        assert!(!status.is_fully_loaded);
        assert!(!status.did_scan_timeout);
        assert_eq!(*opened.lock().unwrap(), vec![target, unknown]);
    }

    #[tokio::test]
    async fn test_open_failures_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();

        let mut session = MockServerSession::new();
        session
            .expect_open_file()
            .returning(|path| Err(TsMillError::io_at(path, std::io::ErrorKind::NotFound.into())));
        session
            .expect_send_request()
            .returning(|_, _| Ok(Some(json!({"refs": [{"file": "/elsewhere/a.ts"}]}))));
        session.expect_is_project_loaded().return_const(true);

        let discovery = FileDiscovery::new(Arc::new(session), dir.path(), fast_config());
        let status = discovery.discover_related_files(["missing.ts"]).await;
        assert!(status.is_healthy());
    }

    #[tokio::test]
    async fn test_scan_reports_timeout() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.ts");

        let outcome = scan_source_files(dir.path().to_path_buf(), &DiscoveryConfig::default(), Duration::ZERO).await;
        assert!(outcome.timed_out);
        assert!(outcome.files.is_empty());
    }

    #[test]
    fn test_source_file_filter() {
        let extensions = DiscoveryConfig::default().extensions;
        assert!(is_source_file(Path::new("/p/a.ts"), &extensions));
        assert!(is_source_file(Path::new("/p/a.mjs"), &extensions));
        assert!(!is_source_file(Path::new("/p/a.d.ts"), &extensions));
        assert!(!is_source_file(Path::new("/p/a.d.mts"), &extensions));
        assert!(!is_source_file(Path::new("/p/a.json"), &extensions));
        assert!(!is_source_file(Path::new("/p/Makefile"), &extensions));
    }

    #[test]
    fn test_warning_message() {
        assert_eq!(build_warning_message(&ProjectStatus::healthy(), "the rename"), "");

        let indexing = ProjectStatus {
            is_fully_loaded: false,
            did_scan_timeout: false,
        };
        let message = build_warning_message(&indexing, "the rename");
        assert!(message.contains("still indexing"));
        assert!(message.contains("the rename"));

        let both = ProjectStatus {
            is_fully_loaded: false,
            did_scan_timeout: true,
        };
        let message = build_warning_message(&both, "the move");
        assert!(message.contains("still indexing"));
        assert!(message.contains("timed out"));
    }
}
