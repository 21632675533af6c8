//! Shared fixtures for unit tests.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use herald_types::ProjectInfo;

use crate::context::{ExecutionContext, Reporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Reporter whose lines stay readable after the context takes ownership.
#[derive(Clone, Default)]
pub struct CollectingReporter {
    lines: Rc<RefCell<Vec<(Level, String)>>>,
}

impl CollectingReporter {
    pub fn lines(&self) -> Vec<(Level, String)> {
        self.lines.borrow().clone()
    }

    pub fn messages(&self, level: Level) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn push(&self, level: Level, msg: &str) {
        self.lines.borrow_mut().push((level, msg.to_string()));
    }
}

impl Reporter for CollectingReporter {
    fn info(&mut self, msg: &str) {
        self.push(Level::Info, msg);
    }

    fn warn(&mut self, msg: &str) {
        self.push(Level::Warn, msg);
    }

    fn error(&mut self, msg: &str) {
        self.push(Level::Error, msg);
    }

    fn debug(&mut self, msg: &str) {
        self.push(Level::Debug, msg);
    }
}

pub fn context_in(dir: &Path, dry_run: bool) -> (ExecutionContext, CollectingReporter) {
    let reporter = CollectingReporter::default();
    let ctx = ExecutionContext::new(
        ProjectInfo::new("demo", "1.0.0"),
        dir,
        dir.join("out"),
        Box::new(reporter.clone()),
    )
    .with_dry_run(dry_run);
    (ctx, reporter)
}
