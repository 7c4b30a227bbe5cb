use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::info;

/// Pipeline stages that report per-target progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Load,
    Resample,
    Align,
    Downsample,
    Continuum,
    Infer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Resample => "resample",
            Stage::Align => "align",
            Stage::Downsample => "downsample",
            Stage::Continuum => "continuum",
            Stage::Infer => "infer",
        };
        f.write_str(name)
    }
}

type Hook = dyn Fn(Stage, usize, usize) + Send + Sync;

/// Progress callback invoked as `(stage, done, total)` after each target.
///
/// Called from worker threads, so `done` values of one stage may arrive out
/// of order; each value is reported exactly once.
#[derive(Default)]
pub struct Progress {
    hook: Option<Box<Hook>>,
}

impl Progress {
    /// No reporting.
    pub fn none() -> Self {
        Progress { hook: None }
    }

    pub fn new(hook: impl Fn(Stage, usize, usize) + Send + Sync + 'static) -> Self {
        Progress {
            hook: Some(Box::new(hook)),
        }
    }

    /// Log every tenth of a stage at info level.
    pub fn logging() -> Self {
        Progress::new(|stage, done, total| {
            if total == 0 {
                return;
            }
            if done == total || done * 10 / total != (done - 1) * 10 / total {
                info!("{stage}: {done}/{total} targets");
            }
        })
    }

    pub fn report(&self, stage: Stage, done: usize, total: usize) {
        if let Some(hook) = &self.hook {
            hook(stage, done, total);
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Shared per-stage counter that worker closures tick once per target.
pub(crate) struct StageCounter<'a> {
    stage: Stage,
    total: usize,
    done: AtomicUsize,
    progress: &'a Progress,
}

impl<'a> StageCounter<'a> {
    pub(crate) fn new(stage: Stage, total: usize, progress: &'a Progress) -> Self {
        StageCounter {
            stage,
            total,
            done: AtomicUsize::new(0),
            progress,
        }
    }

    pub(crate) fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.progress.report(self.stage, done, self.total);
    }
}
