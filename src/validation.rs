//! Phase postconditions.
//!
//! This module provides:
//! - Artifact resolution: the phase's artifact file, or its result text when
//!   the file is missing and the text is real content
//! - The status-message heuristic that rejects "Done!"-style results
//! - Workspace scanning and the development/frontend file checks
//! - `FileStructureValidator`, with the manifest-based default implementation

use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::ValidationError;
use crate::phase::Phase;

/// Directories never scanned for created files.
const IGNORED_DIRS: &[&str] = &[".conductor", ".git", "node_modules", "target", "__pycache__"];

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "mjs", "go", "java", "kt", "rb", "php", "cs", "cpp", "cc", "c", "h",
    "swift", "scala", "ex", "exs",
];

const UI_EXTENSIONS: &[&str] = &["html", "css", "scss", "sass", "jsx", "tsx", "vue", "svelte"];

static CONFIRMATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\W*(done|complete[d]?|finished|success(fully)?|task (is )?complete|all set|i have (created|written|saved|completed|finished)|i've (created|written|saved|completed|finished)|the file has been (created|written|saved)|file (created|written|saved)|(created|wrote|saved) .{0,80} successfully)\b",
    )
    .unwrap()
});

static TRACE_MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(Thought|Action|Action Input|Observation):").unwrap());

static BACKTICK_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"`((?:\./)?[A-Za-z0-9_\-.]+(?:/[A-Za-z0-9_\-.\[\]]+)*/[A-Za-z0-9_\-.\[\]]+\.[A-Za-z0-9]{1,8})`").unwrap()
});

const CHECKMARKS: &[&str] = &["✓", "✔", "✅", "- [x]", "[x]", "* [x]"];

/// True when `text` reads like a progress or confirmation message rather
/// than a document.
pub fn is_status_message(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    if TRACE_MARKER_REGEX.is_match(trimmed) {
        return true;
    }

    let lines: Vec<&str> = trimmed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines
        .iter()
        .all(|l| CHECKMARKS.iter().any(|mark| l.starts_with(mark)))
    {
        return true;
    }

    trimmed.len() < 200 && lines.len() <= 3 && CONFIRMATION_REGEX.is_match(trimmed)
}

/// Content of the phase's artifact, falling back to `result_text`.
///
/// Phases without an artifact file use `result_text` as is.
pub fn resolve_artifact(
    phase: Phase,
    workspace: &Path,
    result_text: &str,
) -> Result<String, ValidationError> {
    let Some(file) = phase.artifact_file() else {
        return Ok(result_text.to_string());
    };

    let path = workspace.join(file);
    if let Ok(content) = fs::read_to_string(&path)
        && !content.trim().is_empty()
    {
        debug!(phase = %phase, file, "Using artifact file");
        return Ok(content);
    }

    if is_status_message(result_text) {
        return Err(if result_text.trim().is_empty() {
            ValidationError::MissingArtifact {
                phase,
                file: file.to_string(),
            }
        } else {
            ValidationError::StatusOnlyResult { phase }
        });
    }

    debug!(phase = %phase, file, "Artifact file missing, using result text");
    Ok(result_text.to_string())
}

/// Relative paths (with `/` separators) of every file in the workspace.
pub fn scan_workspace(workspace: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(workspace)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| IGNORED_DIRS.contains(&name))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(workspace)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}

fn extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

pub fn is_ui_file(path: &str) -> bool {
    extension(path).is_some_and(|ext| UI_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_test_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    let in_test_dir = lower
        .split('/')
        .rev()
        .skip(1)
        .any(|dir| matches!(dir, "test" | "tests" | "__tests__" | "spec" | "specs"));
    let name = lower.rsplit('/').next().unwrap_or(&lower);
    in_test_dir
        || name.starts_with("test_")
        || name.contains("_test.")
        || name.contains(".test.")
        || name.contains(".spec.")
        || name.contains("test.java")
}

pub fn is_source_file(path: &str) -> bool {
    extension(path).is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext.as_str()) || UI_EXTENSIONS.contains(&ext.as_str()))
}

/// Development must leave at least one non-test source file and one test file.
pub fn check_development(files: &[String]) -> Result<(), ValidationError> {
    let has_source = files
        .iter()
        .any(|f| is_source_file(f) && !is_test_file(f) && !is_ui_file(f));
    let has_tests = files.iter().any(|f| is_source_file(f) && is_test_file(f));

    match (has_source, has_tests) {
        (true, true) => Ok(()),
        (false, _) => Err(ValidationError::Incomplete {
            phase: Phase::Development,
            reason: "no non-test source files were created".to_string(),
        }),
        (true, false) => Err(ValidationError::Incomplete {
            phase: Phase::Development,
            reason: "no test files were created".to_string(),
        }),
    }
}

/// Frontend must leave at least one UI file.
pub fn check_frontend(files: &[String]) -> Result<(), ValidationError> {
    if files.iter().any(|f| is_ui_file(f)) {
        Ok(())
    } else {
        Err(ValidationError::Incomplete {
            phase: Phase::Frontend,
            reason: "no UI files were created".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub missing_files: Vec<String>,
}

/// Compares an expected file manifest with the files actually created.
pub trait FileStructureValidator: Send + Sync {
    /// Expected relative paths for `phase`, derived from the tech stack description.
    fn expected_files(&self, phase: Phase, tech_stack: &str) -> Vec<String>;

    fn validate(&self, expected: &[String], created: &[String]) -> ValidationReport;
}

/// Default validator: reads file paths out of backticks and tree listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestValidator;

impl ManifestValidator {
    pub fn parse_manifest(text: &str) -> Vec<String> {
        let mut paths: Vec<String> = BACKTICK_PATH_REGEX
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| normalize(m.as_str()))
            .collect();
        paths.extend(parse_tree(text));
        paths.sort();
        paths.dedup();
        paths
    }
}

fn normalize(path: &str) -> String {
    path.trim().trim_start_matches("./").to_string()
}

const TREE_MARKERS: &[&str] = &["├── ", "└── ", "|-- ", "`-- ", "+-- "];

/// Parse `tree`-style listings. The root line (no marker) is not part of the paths.
fn parse_tree(text: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut dirs: Vec<String> = Vec::new();

    for line in text.lines() {
        let Some((byte_pos, marker)) = TREE_MARKERS
            .iter()
            .filter_map(|m| line.find(m).map(|pos| (pos, *m)))
            .min_by_key(|(pos, _)| *pos)
        else {
            continue;
        };

        let depth = line[..byte_pos].chars().count() / 4;
        let rest = &line[byte_pos + marker.len()..];
        let Some(name) = rest.split_whitespace().next() else {
            continue;
        };

        dirs.truncate(depth);
        if let Some(dir) = name.strip_suffix('/') {
            while dirs.len() < depth {
                dirs.push(String::new());
            }
            dirs.push(dir.to_string());
        } else if name.contains('.') {
            let mut parts: Vec<&str> = dirs.iter().map(String::as_str).filter(|d| !d.is_empty()).collect();
            parts.push(name);
            paths.push(parts.join("/"));
        }
    }
    paths
}

impl FileStructureValidator for ManifestValidator {
    fn expected_files(&self, phase: Phase, tech_stack: &str) -> Vec<String> {
        Self::parse_manifest(tech_stack)
            .into_iter()
            .filter(|path| match phase {
                Phase::Frontend => is_ui_file(path),
                Phase::Development => !is_ui_file(path),
                _ => false,
            })
            .collect()
    }

    fn validate(&self, expected: &[String], created: &[String]) -> ValidationReport {
        let missing_files: Vec<String> = expected
            .iter()
            .filter(|path| !created.iter().any(|c| c == *path || c.ends_with(&format!("/{}", path))))
            .cloned()
            .collect();
        ValidationReport {
            valid: missing_files.is_empty(),
            missing_files,
        }
    }
}
