use serde::Serialize;
use std::sync::{Mutex, OnceLock};

#[derive(Clone, Debug, Default, Serialize)]
pub struct LoadProgress {
    pub loaded: usize,
    pub total: usize,
    pub done: bool,
    pub error: Option<String>,
}

impl LoadProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return if self.done { 1.0 } else { 0.0 };
        }
        self.loaded as f32 / self.total as f32
    }
}

static LOAD_PROGRESS: OnceLock<Mutex<LoadProgress>> = OnceLock::new();

fn progress_state() -> &'static Mutex<LoadProgress> {
    LOAD_PROGRESS.get_or_init(|| Mutex::new(LoadProgress::default()))
}

pub(crate) fn start_tracking(total: usize) {
    if let Ok(mut progress) = progress_state().lock() {
        *progress = LoadProgress {
            total,
            ..Default::default()
        };
    }
}

pub(crate) fn advance(count: usize) {
    if let Ok(mut progress) = progress_state().lock() {
        progress.loaded = (progress.loaded + count).min(progress.total);
    }
}

pub(crate) fn mark_finished() {
    if let Ok(mut progress) = progress_state().lock() {
        progress.loaded = progress.total;
        progress.done = true;
    }
}

pub(crate) fn record_failure(message: String) {
    if let Ok(mut progress) = progress_state().lock() {
        progress.done = true;
        progress.error = Some(message);
    }
}

pub fn current_load_progress() -> Option<LoadProgress> {
    progress_state().lock().ok().map(|p| p.clone())
}
