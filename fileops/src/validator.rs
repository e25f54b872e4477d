//! Pre-execution static checks over a planned filesystem operation (or
//! batch). Pure: no filesystem mutation ever happens here, only reads
//! (`metadata`, `canonicalize`) used to decide whether a plan is safe to
//! hand to the Transactional File Manager. Generalizes a writable-roots
//! containment check from "is this confined to a set of roots" to the
//! richer per-operation and cross-operation checks this core calls for.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use curator_protocol::FileOperation;
use curator_protocol::OperationType;
use curator_protocol::Severity;

const MAX_PATH_LEN: usize = 260;
const MAX_BASENAME_LEN: usize = 255;
const RESERVED_BASENAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];
const FORBIDDEN_BASENAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub severity: Severity,
    pub paths: Vec<PathBuf>,
    pub message: String,
    pub resolution: Option<String>,
}

impl ValidationIssue {
    fn new(
        code: &'static str,
        severity: Severity,
        paths: Vec<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity,
            paths,
            message: message.into(),
            resolution: None,
        }
    }

    fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub protected_prefixes: Vec<PathBuf>,
    pub reserved_basenames: HashSet<String>,
    /// Fraction of the target filesystem's free space to keep as a buffer
    /// (default 0.10).
    pub disk_space_buffer_fraction: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            protected_prefixes: Vec::new(),
            reserved_basenames: RESERVED_BASENAMES.iter().map(|s| s.to_string()).collect(),
            disk_space_buffer_fraction: 0.10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Warning => self.warnings.push(issue),
            Severity::Error | Severity::Critical => self.errors.push(issue),
        }
    }

    fn finalize(mut self) -> Self {
        self.is_valid = self.errors.is_empty();
        self
    }
}

/// Normalize `.`/`..` components without touching the filesystem — the path
/// may not exist yet (e.g. a rename target).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn is_under_any_prefix(path: &Path, prefixes: &[PathBuf]) -> bool {
    let normalized = normalize(path);
    prefixes
        .iter()
        .any(|prefix| normalized.starts_with(normalize(prefix)))
}

fn basename_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Validate a single operation against static, filesystem-aware checks.
/// Called both standalone and as the per-operation pass inside
/// `validate_batch`.
pub fn validate_operation(op: &FileOperation, cfg: &ValidatorConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if is_under_any_prefix(&op.source_path, &cfg.protected_prefixes) {
        issues.push(
            ValidationIssue::new(
                "protected-path",
                Severity::Critical,
                vec![op.source_path.clone()],
                "source path is inside a system-protected prefix",
            )
            .with_resolution("choose a source outside the protected prefix set"),
        );
    }

    match std::fs::symlink_metadata(&op.source_path) {
        Ok(meta) => {
            if !meta.is_file() {
                issues.push(ValidationIssue::new(
                    "source-not-regular-file",
                    Severity::Error,
                    vec![op.source_path.clone()],
                    "source is not a regular file",
                ));
            }
        }
        Err(_) => {
            issues.push(ValidationIssue::new(
                "source-missing",
                Severity::Error,
                vec![op.source_path.clone()],
                "source path does not exist",
            ));
        }
    }

    if let Some(parent) = op.source_path.parent() {
        if let Ok(meta) = std::fs::metadata(parent) {
            if meta.permissions().readonly() {
                issues.push(ValidationIssue::new(
                    "source-dir-not-writable",
                    Severity::Error,
                    vec![parent.to_path_buf()],
                    "source directory is not writable",
                ));
            }
        }
    }

    if op.op_type == OperationType::Delete {
        return issues;
    }

    let Some(target) = &op.target_path else {
        issues.push(ValidationIssue::new(
            "missing-target",
            Severity::Error,
            vec![op.source_path.clone()],
            "rename/move/copy operation requires a target path",
        ));
        return issues;
    };

    if is_under_any_prefix(target, &cfg.protected_prefixes) {
        issues.push(
            ValidationIssue::new(
                "protected-path",
                Severity::Critical,
                vec![target.clone()],
                "target path is inside a system-protected prefix",
            )
            .with_resolution("choose a target outside the protected prefix set"),
        );
    }

    let target_str = target.to_string_lossy();
    if target_str.len() > MAX_PATH_LEN {
        issues.push(ValidationIssue::new(
            "target-path-too-long",
            Severity::Error,
            vec![target.clone()],
            format!("target path exceeds {MAX_PATH_LEN} characters"),
        ));
    }

    let basename = basename_of(target);
    if basename.len() > MAX_BASENAME_LEN {
        issues.push(ValidationIssue::new(
            "target-basename-too-long",
            Severity::Error,
            vec![target.clone()],
            format!("target basename exceeds {MAX_BASENAME_LEN} characters"),
        ));
    }

    if basename
        .chars()
        .any(|c| c.is_control() || FORBIDDEN_BASENAME_CHARS.contains(&c))
    {
        issues.push(ValidationIssue::new(
            "target-basename-illegal-chars",
            Severity::Error,
            vec![target.clone()],
            "target basename contains control characters or reserved punctuation",
        ));
    }

    let stem_upper = basename
        .split('.')
        .next()
        .unwrap_or(&basename)
        .to_uppercase();
    if cfg.reserved_basenames.contains(&stem_upper) {
        issues.push(ValidationIssue::new(
            "target-basename-reserved",
            Severity::Error,
            vec![target.clone()],
            format!("'{stem_upper}' is a reserved name on this platform"),
        ));
    }

    if basename.starts_with(' ')
        || basename.ends_with(' ')
        || basename.starts_with('.') && basename.len() > 1 && basename.ends_with('.')
        || basename.ends_with('.')
    {
        issues.push(ValidationIssue::new(
            "target-basename-leading-trailing",
            Severity::Warning,
            vec![target.clone()],
            "target basename has leading/trailing spaces or dots",
        ));
    }

    if let Some(parent) = target.parent() {
        match std::fs::metadata(parent) {
            Ok(meta) => {
                if meta.permissions().readonly() {
                    issues.push(ValidationIssue::new(
                        "target-dir-not-writable",
                        Severity::Error,
                        vec![parent.to_path_buf()],
                        "target directory is not writable",
                    ));
                }
            }
            Err(_) => {
                // Directory will be created by the Transactional File Manager;
                // not an error, just informational territory the TFM handles.
            }
        }
    }

    if target.exists() && !op.metadata.force {
        issues.push(
            ValidationIssue::new(
                "target-already-exists",
                Severity::Warning,
                vec![target.clone()],
                "target already exists; execution will fail unless force is set",
            )
            .with_resolution("set force=true to overwrite, or choose a different target"),
        );
    }

    issues
}

/// Validate a batch: runs the per-operation checks for every operation, then
/// the cross-operation checks (collision, chained source-becomes-target,
/// cycles, disk space).
pub fn validate_batch(ops: &[FileOperation], cfg: &ValidatorConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    for op in ops {
        for issue in validate_operation(op, cfg) {
            report.push(issue);
        }
    }

    // Target collision: two operations resolving to the same normalized target.
    let mut targets_seen: HashMap<PathBuf, &FileOperation> = HashMap::new();
    for op in ops {
        let Some(target) = &op.target_path else {
            continue;
        };
        let normalized = normalize(target);
        if let Some(other) = targets_seen.get(&normalized) {
            report.push(ValidationIssue::new(
                "target-collision",
                Severity::Error,
                vec![other.source_path.clone(), op.source_path.clone()],
                format!("multiple operations target {}", normalized.display()),
            ));
        } else {
            targets_seen.insert(normalized, op);
        }
    }

    // Source-becomes-target chain: op A's source equals op B's target.
    let sources: HashSet<PathBuf> = ops.iter().map(|o| normalize(&o.source_path)).collect();
    for op in ops {
        let Some(target) = &op.target_path else {
            continue;
        };
        let normalized_target = normalize(target);
        if sources.contains(&normalized_target) && normalize(&op.source_path) != normalized_target
        {
            report.push(ValidationIssue::new(
                "chained-source-target",
                Severity::Warning,
                vec![op.source_path.clone(), target.clone()],
                "this operation's target is another operation's source",
            ));
        }
    }

    // Cycle detection: an operation's target directory is an ancestor of
    // another operation's source forms an edge; report any cycle.
    if let Some(cycle_paths) = detect_cycle(ops) {
        report.push(ValidationIssue::new(
            "operation-cycle",
            Severity::Error,
            cycle_paths,
            "operations form a circular dependency and cannot be ordered",
        ));
    }

    // Disk space: sum of source sizes vs. available space on the (first)
    // target filesystem, minus a configured buffer.
    if let Some(issue) = check_disk_space(ops, cfg) {
        report.push(issue);
    }

    report.finalize()
}

fn detect_cycle(ops: &[FileOperation]) -> Option<Vec<PathBuf>> {
    // Build edges: op[i] -> op[j] if op[i]'s target directory is an ancestor
    // of op[j]'s source.
    let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, a) in ops.iter().enumerate() {
        let Some(target) = &a.target_path else {
            continue;
        };
        let target_dir = normalize(target);
        for (j, b) in ops.iter().enumerate() {
            if i == j {
                continue;
            }
            let source = normalize(&b.source_path);
            if source.starts_with(&target_dir) && source != target_dir {
                adjacency.entry(i).or_default().push(j);
            }
        }
    }

    let mut state = vec![0u8; ops.len()]; // 0 = unvisited, 1 = in-progress, 2 = done
    for start in 0..ops.len() {
        if state[start] == 0 && has_cycle_from(start, &adjacency, &mut state) {
            return Some(
                ops.iter()
                    .map(|o| o.source_path.clone())
                    .collect::<Vec<_>>(),
            );
        }
    }
    None
}

fn has_cycle_from(node: usize, adjacency: &HashMap<usize, Vec<usize>>, state: &mut [u8]) -> bool {
    state[node] = 1;
    if let Some(neighbors) = adjacency.get(&node) {
        for &next in neighbors {
            if state[next] == 1 {
                return true;
            }
            if state[next] == 0 && has_cycle_from(next, adjacency, state) {
                return true;
            }
        }
    }
    state[node] = 2;
    false
}

fn check_disk_space(ops: &[FileOperation], cfg: &ValidatorConfig) -> Option<ValidationIssue> {
    let total_source_bytes: u64 = ops
        .iter()
        .filter_map(|op| std::fs::metadata(&op.source_path).ok())
        .map(|m| m.len())
        .sum();

    if total_source_bytes == 0 {
        return None;
    }

    let first_target_dir = ops
        .iter()
        .filter_map(|op| op.target_path.as_ref())
        .filter_map(|t| t.parent())
        .next()?;

    let available_bytes = available_space(first_target_dir)?;
    let buffer = (available_bytes as f64 * cfg.disk_space_buffer_fraction) as u64;
    let usable = available_bytes.saturating_sub(buffer);

    if total_source_bytes > usable {
        return Some(
            ValidationIssue::new(
                "insufficient-disk-space",
                Severity::Error,
                vec![first_target_dir.to_path_buf()],
                "not enough free space on the target filesystem",
            )
            .with_resolution("free up space or reduce the batch size"),
        );
    }

    if total_source_bytes * 2 > usable {
        return Some(ValidationIssue::new(
            "low-disk-space-margin",
            Severity::Warning,
            vec![first_target_dir.to_path_buf()],
            "less than 2x the required space remains after this batch",
        ));
    }

    None
}

fn available_space(dir: &Path) -> Option<u64> {
    use sysinfo::Disks;
    let disks = Disks::new_with_refreshed_list();
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    disks
        .list()
        .iter()
        .filter(|d| dir.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space())
}
