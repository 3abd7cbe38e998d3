//! The refactor pipeline
//!
//! Readiness guard → dependent-file discovery → semantic request → edit
//! application. Thin per-refactor operations call
//! [`RefactorService::run_edit_command`] (or [`RefactorService::rename`])
//! with their tsserver command and arguments.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use tsmill_config::logging::operation_span;
use tsmill_config::AppConfig;
use tsmill_edits::{
    apply_edits, build_file_changes, normalize_edit_indentation, rename_edits, sort_edits, LockManager,
    RenameBody, SourceText,
};
use tsmill_foundation::{
    FileChangeRecord, FileCodeEdits, Location, OperationResult, ProjectStatus, TextEdit, TsMillError,
    TsMillResult,
};
use tsmill_tsserver::protocol::wire_path;
use tsmill_tsserver::{build_warning_message, FileDiscovery, ReadinessGuard, ServerSession};

/// How a batch of edits is applied
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Compute the change records but write nothing
    pub preview: bool,
    /// Completeness of the cross-file view, turned into a caveat
    pub status: ProjectStatus,
    /// Names the operation in caveats, e.g. "the rename"
    pub context: String,
    /// Re-indent multi-line generated code to the host file's style.
    /// Only meant for generated declarations (extract, move to file).
    pub normalize_indentation: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            preview: false,
            status: ProjectStatus::healthy(),
            context: "the operation".to_string(),
            normalize_indentation: false,
        }
    }
}

/// Options for [`RefactorService::run_edit_command`]
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub preview: bool,
    pub context: String,
    pub normalize_indentation: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            preview: false,
            context: "the operation".to_string(),
            normalize_indentation: false,
        }
    }
}

/// Edits for one file, merged across the response
struct PendingFile {
    edits: Vec<TextEdit>,
    is_new_file: bool,
}

/// One file after edits were applied in memory
struct ComputedFile {
    path: PathBuf,
    text: SourceText,
    record: FileChangeRecord,
    is_new_file: bool,
}

pub struct RefactorService {
    session: Arc<dyn ServerSession>,
    locks: Arc<LockManager>,
    config: AppConfig,
    project_root: PathBuf,
}

impl RefactorService {
    pub fn new(session: Arc<dyn ServerSession>, project_root: impl Into<PathBuf>, config: AppConfig) -> Self {
        Self {
            session,
            locks: Arc::new(LockManager::new()),
            config,
            project_root: project_root.into(),
        }
    }

    /// Share file locks with other services working on the same project
    pub fn with_lock_manager(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = locks;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn readiness_guard(&self) -> ReadinessGuard {
        ReadinessGuard::new(self.session.clone(), self.project_root.clone(), &self.config.readiness)
    }

    pub fn discovery(&self) -> FileDiscovery {
        FileDiscovery::new(
            self.session.clone(),
            self.project_root.clone(),
            self.config.discovery.clone(),
        )
    }

    /// Guard, discover, send `command`, and apply the edits it returns.
    ///
    /// The response body may be a `FileCodeEdits[]` or an object with an
    /// `edits` array (as `getEditsForRefactor` answers).
    pub async fn run_edit_command(
        &self,
        command: &str,
        arguments: Value,
        targets: &[PathBuf],
        options: &CommandOptions,
    ) -> OperationResult {
        let target = targets.first().map(|p| p.display().to_string()).unwrap_or_default();
        let span = operation_span(command, &target);

        async move {
            if let Err(not_ready) = self.readiness_guard().ensure_ready_default().await {
                return not_ready.into();
            }
            let status = self.discover(targets).await;

            let body = match self.session.send_request(command, Some(arguments)).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(command = %command, error = %e, "Semantic request failed");
                    return e.into();
                }
            };
            let file_edits = match parse_file_edits(body) {
                Ok(file_edits) => file_edits,
                Err(e) => return e.into(),
            };

            let apply = ApplyOptions {
                preview: options.preview,
                status,
                context: options.context.clone(),
                normalize_indentation: options.normalize_indentation,
            };
            self.apply_file_edits(file_edits, &apply).await
        }
        .instrument(span)
        .await
    }

    /// Run a tsserver refactoring (`refactor`/`action` as listed by
    /// `getApplicableRefactors`) over the `start`..`end` range of `file`.
    ///
    /// Extract and move refactorings generate declarations with a fixed
    /// four-space indent, so their output is re-indented to the host file.
    pub async fn apply_refactor(
        &self,
        file: &Path,
        start: Location,
        end: Location,
        refactor: &str,
        action: &str,
        preview: bool,
    ) -> OperationResult {
        let file = self.absolute(file);
        let arguments = json!({
            "file": wire_path(&file),
            "startLine": start.line,
            "startOffset": start.offset,
            "endLine": end.line,
            "endOffset": end.offset,
            "refactor": refactor,
            "action": action,
        });
        let options = CommandOptions {
            preview,
            context: "the refactoring".to_string(),
            normalize_indentation: true,
        };
        self.run_edit_command("getEditsForRefactor", arguments, &[file], &options)
            .await
    }

    /// Rename the symbol at `line`/`offset` (1-based) in `file` everywhere
    /// tsserver finds it
    pub async fn rename(&self, file: &Path, line: u32, offset: u32, new_name: &str, preview: bool) -> OperationResult {
        let file = self.absolute(file);
        let span = operation_span("rename", &file.display().to_string());

        async move {
            if let Err(not_ready) = self.readiness_guard().ensure_ready_default().await {
                return not_ready.into();
            }
            let status = self.discover(std::slice::from_ref(&file)).await;

            let arguments = json!({
                "file": wire_path(&file),
                "line": line,
                "offset": offset,
                "findInComments": false,
                "findInStrings": false,
            });
            let file_edits = match self.rename_locations(arguments, new_name).await {
                Ok(file_edits) => file_edits,
                Err(e) => return e.into(),
            };

            let apply = ApplyOptions {
                preview,
                status,
                context: "the rename".to_string(),
                normalize_indentation: false,
            };
            self.apply_file_edits(file_edits, &apply).await
        }
        .instrument(span)
        .await
    }

    async fn rename_locations(&self, arguments: Value, new_name: &str) -> TsMillResult<Vec<FileCodeEdits>> {
        let body = self
            .session
            .send_request("rename", Some(arguments))
            .await?
            .ok_or_else(|| TsMillError::protocol("rename response has no body"))?;
        let body: RenameBody = serde_json::from_value(body)?;
        rename_edits(&body, new_name)
    }

    async fn discover(&self, targets: &[PathBuf]) -> ProjectStatus {
        if targets.is_empty() {
            return ProjectStatus {
                is_fully_loaded: self.session.is_project_loaded().await,
                did_scan_timeout: false,
            };
        }
        self.discovery().discover_related_files(targets).await
    }

    /// Apply tsserver edits to disk (or only record them in preview).
    ///
    /// Every touched file is locked, read fresh and edited in memory before
    /// anything is written, so an invalid edit leaves all files untouched.
    pub async fn apply_file_edits(&self, file_edits: Vec<FileCodeEdits>, options: &ApplyOptions) -> OperationResult {
        match self.try_apply(file_edits, options).await {
            Ok(records) => summarize(records, options),
            Err(e) => {
                warn!(error = %e, "Failed to apply edits");
                e.into()
            }
        }
    }

    async fn try_apply(&self, file_edits: Vec<FileCodeEdits>, options: &ApplyOptions) -> TsMillResult<Vec<FileChangeRecord>> {
        let grouped = self.group_by_file(file_edits).await;

        // Acquired in path order so overlapping operations cannot deadlock
        let mut guards = Vec::with_capacity(grouped.len());
        for path in grouped.keys() {
            guards.push(self.locks.get_lock(path).await.write_owned().await);
        }

        let result = compute_and_write(grouped, options).await;
        drop(guards);
        self.locks.cleanup_unused_locks();
        result
    }

    async fn group_by_file(&self, file_edits: Vec<FileCodeEdits>) -> BTreeMap<PathBuf, PendingFile> {
        let mut grouped: BTreeMap<PathBuf, PendingFile> = BTreeMap::new();
        for file in file_edits {
            if file.text_changes.is_empty() && !file.is_new_file {
                continue;
            }
            let path = self.resolve(&file.file_name).await;
            let entry = grouped.entry(path).or_insert_with(|| PendingFile {
                edits: Vec::new(),
                is_new_file: false,
            });
            entry.is_new_file |= file.is_new_file;
            entry.edits.extend(file.to_text_edits());
        }
        grouped
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_relative() {
            self.project_root.join(path)
        } else {
            path.to_path_buf()
        }
    }

    /// Absolute, canonical when the file exists
    async fn resolve(&self, file_name: &str) -> PathBuf {
        let path = self.absolute(Path::new(file_name));
        tokio::fs::canonicalize(&path).await.unwrap_or(path)
    }
}

async fn compute_and_write(
    grouped: BTreeMap<PathBuf, PendingFile>,
    options: &ApplyOptions,
) -> TsMillResult<Vec<FileChangeRecord>> {
    let mut computed = Vec::with_capacity(grouped.len());
    for (path, pending) in grouped {
        let source = read_source(&path, pending.is_new_file).await?;
        computed.push(compute(path, pending, source, options.normalize_indentation)?);
    }

    if options.preview {
        debug!(files = computed.len(), "Preview mode, skipping writes");
    } else {
        for file in &computed {
            write_file(file).await?;
        }
    }

    Ok(computed.into_iter().map(|file| file.record).collect())
}

async fn read_source(path: &Path, is_new_file: bool) -> TsMillResult<SourceText> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(SourceText::parse(&content)),
        Err(e) if is_new_file && e.kind() == std::io::ErrorKind::NotFound => Ok(SourceText::parse("")),
        Err(e) => Err(TsMillError::io_at(path, e)),
    }
}

fn compute(path: PathBuf, pending: PendingFile, source: SourceText, normalize: bool) -> TsMillResult<ComputedFile> {
    let original = source.lines();
    let edits = if normalize {
        pending
            .edits
            .iter()
            .map(|edit| normalize_edit_indentation(edit, original))
            .collect()
    } else {
        pending.edits
    };

    let sorted = sort_edits(&edits);
    let new_lines = apply_edits(original, &sorted).map_err(|e| match e {
        TsMillError::InvalidEdit { message } => {
            TsMillError::invalid_edit(format!("{} in {}", message, path.display()))
        }
        other => other,
    })?;
    let record = build_file_changes(original, &sorted, &path);

    Ok(ComputedFile {
        text: source.with_lines(new_lines),
        record,
        is_new_file: pending.is_new_file,
        path,
    })
}

async fn write_file(file: &ComputedFile) -> TsMillResult<()> {
    if file.is_new_file {
        if let Some(parent) = file.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TsMillError::io_at(parent, e))?;
        }
    }
    tokio::fs::write(&file.path, file.text.join())
        .await
        .map_err(|e| TsMillError::io_at(&file.path, e))?;
    debug!(file = %file.path.display(), edits = file.record.edits.len(), "Wrote edited file");
    Ok(())
}

fn summarize(records: Vec<FileChangeRecord>, options: &ApplyOptions) -> OperationResult {
    let edit_count: usize = records.iter().map(|r| r.edits.len()).sum();
    let file_count = records.len();

    let message = if edit_count == 0 && file_count == 0 {
        "No changes needed".to_string()
    } else if options.preview {
        format!(
            "Preview: {} edit(s) in {} file(s); no files were modified",
            edit_count, file_count
        )
    } else {
        format!("Applied {} edit(s) in {} file(s)", edit_count, file_count)
    };
    info!(edits = edit_count, files = file_count, preview = options.preview, "Edits processed");

    OperationResult::success(message, records)
        .with_preview(options.preview)
        .with_warning(&build_warning_message(&options.status, &options.context))
}

/// Edits from a response body: `FileCodeEdits[]`, `{edits: [...]}` or none
pub fn parse_file_edits(body: Option<Value>) -> TsMillResult<Vec<FileCodeEdits>> {
    match body {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value @ Value::Array(_)) => Ok(serde_json::from_value(value)?),
        Some(Value::Object(mut object)) => match object.remove("edits") {
            Some(edits) => Ok(serde_json::from_value(edits)?),
            None => Err(TsMillError::protocol("response body has no 'edits' field")),
        },
        Some(other) => Err(TsMillError::protocol(format!(
            "unexpected edit response body: {}",
            other
        ))),
    }
}
