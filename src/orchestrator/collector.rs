//! Form state and its mapping to [`ExecutionParameters`].

use crate::model::ExecutionParameters;
use std::path::{Path, PathBuf};

/// Editable run configuration as the user sees it. Numeric fields stay text until collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormState {
    pub source_dir: String,
    pub target_dir: String,
    pub cache_dir: String,
    pub results_path: String,
    pub cpus: String,
    pub buffer_kb: String,
    pub use_cache: bool,
    pub paranoid_mode: bool,
    pub keep_logs: bool,
}

impl Default for FormState {
    fn default() -> Self {
        Self {
            source_dir: String::new(),
            target_dir: String::new(),
            cache_dir: String::new(),
            results_path: String::new(),
            cpus: "4".into(),
            buffer_kb: "1024".into(),
            use_cache: true,
            paranoid_mode: false,
            keep_logs: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    SourceDir,
    TargetDir,
    CacheDir,
    ResultsPath,
    Cpus,
    BufferKb,
    UseCache,
    ParanoidMode,
    KeepLogs,
}

impl FormField {
    pub const ALL: [FormField; 9] = [
        FormField::SourceDir,
        FormField::TargetDir,
        FormField::CacheDir,
        FormField::ResultsPath,
        FormField::Cpus,
        FormField::BufferKb,
        FormField::UseCache,
        FormField::ParanoidMode,
        FormField::KeepLogs,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FormField::SourceDir => "Source directory",
            FormField::TargetDir => "Target directory",
            FormField::CacheDir => "Cache directory",
            FormField::ResultsPath => "Results file",
            FormField::Cpus => "CPUs (0 = all)",
            FormField::BufferKb => "Buffer size (KB)",
            FormField::UseCache => "Use cache",
            FormField::ParanoidMode => "Paranoid mode",
            FormField::KeepLogs => "Keep logs",
        }
    }

    /// Fields that accept a directory picker result.
    pub fn accepts_path(self) -> bool {
        matches!(
            self,
            FormField::SourceDir
                | FormField::TargetDir
                | FormField::CacheDir
                | FormField::ResultsPath
        )
    }

    pub fn is_toggle(self) -> bool {
        matches!(
            self,
            FormField::UseCache | FormField::ParanoidMode | FormField::KeepLogs
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, FormField::Cpus | FormField::BufferKb)
    }
}

impl FormState {
    pub fn text(&self, field: FormField) -> Option<&str> {
        match field {
            FormField::SourceDir => Some(&self.source_dir),
            FormField::TargetDir => Some(&self.target_dir),
            FormField::CacheDir => Some(&self.cache_dir),
            FormField::ResultsPath => Some(&self.results_path),
            FormField::Cpus => Some(&self.cpus),
            FormField::BufferKb => Some(&self.buffer_kb),
            _ => None,
        }
    }

    pub fn text_mut(&mut self, field: FormField) -> Option<&mut String> {
        match field {
            FormField::SourceDir => Some(&mut self.source_dir),
            FormField::TargetDir => Some(&mut self.target_dir),
            FormField::CacheDir => Some(&mut self.cache_dir),
            FormField::ResultsPath => Some(&mut self.results_path),
            FormField::Cpus => Some(&mut self.cpus),
            FormField::BufferKb => Some(&mut self.buffer_kb),
            _ => None,
        }
    }

    pub fn flag(&self, field: FormField) -> Option<bool> {
        match field {
            FormField::UseCache => Some(self.use_cache),
            FormField::ParanoidMode => Some(self.paranoid_mode),
            FormField::KeepLogs => Some(self.keep_logs),
            _ => None,
        }
    }

    pub fn toggle(&mut self, field: FormField) {
        match field {
            FormField::UseCache => self.use_cache = !self.use_cache,
            FormField::ParanoidMode => self.paranoid_mode = !self.paranoid_mode,
            FormField::KeepLogs => self.keep_logs = !self.keep_logs,
            _ => {}
        }
    }

    /// Store a picked path. Ignored for fields that do not hold paths.
    pub fn set_path(&mut self, field: FormField, path: &Path) {
        if !field.accepts_path() {
            return;
        }
        if let Some(slot) = self.text_mut(field) {
            *slot = path.to_string_lossy().into_owned();
        }
    }
}

pub fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("dude-cache")
}

pub fn default_results_path() -> PathBuf {
    std::env::temp_dir().join("dude-results.csv")
}

/// Snapshot the form into engine parameters.
///
/// Numbers that do not parse become 0; the engine reads 0 as "use default / all".
/// Empty cache and results locations fall back to the platform temp directory.
pub fn collect(form: &FormState) -> ExecutionParameters {
    let cache_dir = non_empty_path(&form.cache_dir).unwrap_or_else(default_cache_dir);
    let results_path = non_empty_path(&form.results_path).unwrap_or_else(default_results_path);

    ExecutionParameters {
        source_dir: PathBuf::from(form.source_dir.trim()),
        target_dir: PathBuf::from(form.target_dir.trim()),
        use_cache: form.use_cache,
        cache_dir,
        results_path,
        paranoid_mode: form.paranoid_mode,
        cpu_count: parse_count(&form.cpus),
        buffer_size_kb: parse_count(&form.buffer_kb),
        keep_logs: form.keep_logs,
        dual_folder_mode_enabled: false,
    }
}

fn non_empty_path(s: &str) -> Option<PathBuf> {
    let s = s.trim();
    (!s.is_empty()).then(|| PathBuf::from(s))
}

fn parse_count(s: &str) -> u32 {
    s.trim().parse().unwrap_or(0)
}
