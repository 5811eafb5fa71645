use std::sync::Arc;
use std::time::{Duration, Instant};

/// 运行时上下文 (Runtime Context)
/// Per-invocation data shared by a workflow and every nested sub-workflow it
/// spawns. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Context {
    request_id: Arc<str>,
    depth: usize,
}

impl Context {
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: Arc::from(request_id),
            depth: 0,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Context for a nested sub-workflow, or `None` once `limit` is reached.
    pub fn nested(&self, limit: usize) -> Option<Context> {
        (self.depth < limit).then(|| Context {
            request_id: self.request_id.clone(),
            depth: self.depth + 1,
        })
    }
}

/// Accumulates orchestration time only: the clock stops while activity calls
/// are outstanding.
#[derive(Debug)]
pub struct Stopwatch {
    elapsed: Duration,
    resumed_at: Option<Instant>,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            elapsed: Duration::ZERO,
            resumed_at: Some(Instant::now()),
        }
    }

    /// Called right before awaiting activity calls.
    pub fn suspend(&mut self) {
        if let Some(at) = self.resumed_at.take() {
            self.elapsed += at.elapsed();
        }
    }

    /// Called as soon as the awaited calls resolve.
    pub fn resume(&mut self) {
        if self.resumed_at.is_none() {
            self.resumed_at = Some(Instant::now());
        }
    }

    pub fn finish(mut self) -> Duration {
        self.suspend();
        self.elapsed
    }
}
