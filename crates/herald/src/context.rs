//! Execution context and scoped logging.
//!
//! The core never prints. Everything goes through a [`Reporter`] owned by the
//! context's [`Logger`], which prepends the active prefix stack and indents by
//! the current depth:
//!
//! ```text
//! [deploy] [central] created staging repository comexample-1001
//!   [deploy] [central] uploading demo.tar.gz
//! ```
//!
//! Prefixes and indentation are pushed through RAII guards, so they are popped
//! on every exit path including `?` returns.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use herald_types::ProjectInfo;

/// Output sink for log lines.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
    fn debug(&mut self, _msg: &str) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

struct LoggerState {
    prefixes: Vec<String>,
    depth: usize,
    sink: Box<dyn Reporter>,
}

impl LoggerState {
    fn render(&self, msg: &str) -> String {
        let mut line = "  ".repeat(self.depth);
        for prefix in &self.prefixes {
            line.push('[');
            line.push_str(prefix);
            line.push_str("] ");
        }
        line.push_str(msg);
        line
    }
}

/// Prefix/indent stack in front of a [`Reporter`].
pub struct Logger {
    state: RefCell<LoggerState>,
}

impl Logger {
    pub fn new(sink: Box<dyn Reporter>) -> Self {
        Self {
            state: RefCell::new(LoggerState {
                prefixes: Vec::new(),
                depth: 0,
                sink,
            }),
        }
    }

    /// Push a prefix; it is popped when the guard drops.
    pub fn push_prefix(&self, prefix: impl Into<String>) -> PrefixGuard<'_> {
        self.state.borrow_mut().prefixes.push(prefix.into());
        PrefixGuard { logger: self }
    }

    /// Indent one level; it is undone when the guard drops.
    pub fn indent(&self) -> IndentGuard<'_> {
        self.state.borrow_mut().depth += 1;
        IndentGuard { logger: self }
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.state.borrow().prefixes.clone()
    }

    pub fn depth(&self) -> usize {
        self.state.borrow().depth
    }

    pub fn info(&self, msg: &str) {
        let mut state = self.state.borrow_mut();
        let line = state.render(msg);
        state.sink.info(&line);
    }

    pub fn warn(&self, msg: &str) {
        let mut state = self.state.borrow_mut();
        let line = state.render(msg);
        state.sink.warn(&line);
    }

    pub fn error(&self, msg: &str) {
        let mut state = self.state.borrow_mut();
        let line = state.render(msg);
        state.sink.error(&line);
    }

    pub fn debug(&self, msg: &str) {
        let mut state = self.state.borrow_mut();
        let line = state.render(msg);
        state.sink.debug(&line);
    }
}

/// Pops one prefix on drop.
#[must_use = "the prefix is popped as soon as the guard is dropped"]
pub struct PrefixGuard<'a> {
    logger: &'a Logger,
}

impl Drop for PrefixGuard<'_> {
    fn drop(&mut self) {
        self.logger.state.borrow_mut().prefixes.pop();
    }
}

/// Removes one indent level on drop.
#[must_use = "the indent is undone as soon as the guard is dropped"]
pub struct IndentGuard<'a> {
    logger: &'a Logger,
}

impl Drop for IndentGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.logger.state.borrow_mut();
        state.depth = state.depth.saturating_sub(1);
    }
}

/// Per-run state shared by reference with every provider.
pub struct ExecutionContext {
    dry_run: bool,
    base_dir: PathBuf,
    output_dir: PathBuf,
    project: ProjectInfo,
    artifacts: Vec<PathBuf>,
    logger: Logger,
}

impl ExecutionContext {
    pub fn new(
        project: ProjectInfo,
        base_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        reporter: Box<dyn Reporter>,
    ) -> Self {
        Self {
            dry_run: false,
            base_dir: base_dir.into(),
            output_dir: output_dir.into(),
            project,
            artifacts: Vec::new(),
            logger: Logger::new(reporter),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Artifacts relative to the base directory are resolved against it.
    pub fn with_artifacts(mut self, artifacts: impl IntoIterator<Item = PathBuf>) -> Self {
        let base = self.base_dir.clone();
        self.artifacts = artifacts
            .into_iter()
            .map(|p| if p.is_absolute() { p } else { base.join(p) })
            .collect();
        self
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn project(&self) -> &ProjectInfo {
        &self.project
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Directory holding detached signatures for this run.
    pub fn signatures_dir(&self) -> PathBuf {
        self.output_dir.join("signatures")
    }

    /// Log `description`, then run `action` unless this is a dry run.
    ///
    /// Every remote mutation goes through here, so a dry run prints the same
    /// lines as a live run, marked `[dry-run]`, and performs none of them.
    pub fn perform<T, E>(
        &self,
        description: &str,
        action: impl FnOnce() -> Result<T, E>,
    ) -> Result<Option<T>, E> {
        if self.dry_run {
            self.logger.info(&format!("[dry-run] {description}"));
            return Ok(None);
        }
        self.logger.info(description);
        action().map(Some)
    }
}
