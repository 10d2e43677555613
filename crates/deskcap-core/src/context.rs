//! Per-session context handed to each pipeline.

use crate::media::SessionClock;
use crate::runtime::RuntimeContext;
use crate::sink::ExitCallback;

/// Everything a pipeline shares with its session.
#[derive(Clone)]
pub struct PipelineContext {
    /// Runtime policy every pipeline thread enters before touching platform objects.
    pub runtime: RuntimeContext,

    /// Origin for delivery timestamps.
    pub clock: SessionClock,

    /// Error reports from either loop thread.
    pub on_exit: ExitCallback,
}

impl PipelineContext {
    pub fn new(runtime: RuntimeContext, clock: SessionClock, on_exit: ExitCallback) -> Self {
        Self {
            runtime,
            clock,
            on_exit,
        }
    }

    pub fn report(&self, message: &str) {
        (self.on_exit)(message);
    }
}
