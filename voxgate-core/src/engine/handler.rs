//! Consumer callbacks.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;

use tracing::error;

use super::pipeline::PipelineDiagnostics;
use crate::events::SpeechSegment;

/// Receives pipeline events on the processing thread.
///
/// Registered once per `VoxGate::start`. Calls are synchronous and never
/// re-entrant; a slow handler delays processing but cannot deadlock it.
/// Returning `Err` or panicking is logged and counted, then the pipeline
/// carries on.
pub trait SpeechHandler: Send + 'static {
    /// Idle → Active, with the amplitude that crossed the start threshold.
    fn on_speech_start(&mut self, _amplitude: f64) -> anyhow::Result<()> {
        Ok(())
    }

    /// A completed utterance, pre-roll included.
    fn on_speech_end(&mut self, _segment: SpeechSegment) -> anyhow::Result<()> {
        Ok(())
    }

    /// Every processed block.
    fn on_amplitude_update(&mut self, _amplitude: f64) -> anyhow::Result<()> {
        Ok(())
    }
}

type StartFn = Box<dyn FnMut(f64) -> anyhow::Result<()> + Send>;
type EndFn = Box<dyn FnMut(SpeechSegment) -> anyhow::Result<()> + Send>;
type LevelFn = Box<dyn FnMut(f64) -> anyhow::Result<()> + Send>;

/// [`SpeechHandler`] assembled from closures; unset slots do nothing.
///
/// ```no_run
/// use voxgate_core::{Callbacks, SpeechHandler};
///
/// let mut handler = Callbacks::new().with_speech_start(|amplitude| {
///     println!("speech at {amplitude:.1}");
///     Ok(())
/// });
/// handler.on_speech_start(42.0).ok();
/// ```
#[derive(Default)]
pub struct Callbacks {
    speech_start: Option<StartFn>,
    speech_end: Option<EndFn>,
    amplitude: Option<LevelFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_speech_start(
        mut self,
        f: impl FnMut(f64) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.speech_start = Some(Box::new(f));
        self
    }

    pub fn with_speech_end(
        mut self,
        f: impl FnMut(SpeechSegment) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.speech_end = Some(Box::new(f));
        self
    }

    pub fn with_amplitude_update(
        mut self,
        f: impl FnMut(f64) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.amplitude = Some(Box::new(f));
        self
    }
}

impl SpeechHandler for Callbacks {
    fn on_speech_start(&mut self, amplitude: f64) -> anyhow::Result<()> {
        match self.speech_start.as_mut() {
            Some(f) => f(amplitude),
            None => Ok(()),
        }
    }

    fn on_speech_end(&mut self, segment: SpeechSegment) -> anyhow::Result<()> {
        match self.speech_end.as_mut() {
            Some(f) => f(segment),
            None => Ok(()),
        }
    }

    fn on_amplitude_update(&mut self, amplitude: f64) -> anyhow::Result<()> {
        match self.amplitude.as_mut() {
            Some(f) => f(amplitude),
            None => Ok(()),
        }
    }
}

/// Run one handler call, absorbing errors and panics.
///
/// Returns `true` when the call completed normally.
pub(crate) fn guarded<F>(diagnostics: &PipelineDiagnostics, callback: &'static str, f: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            diagnostics.callback_errors.fetch_add(1, Ordering::Relaxed);
            error!(callback, "handler failed: {e:#}");
            false
        }
        Err(payload) => {
            diagnostics.callback_errors.fetch_add(1, Ordering::Relaxed);
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(callback, panic = %msg, "handler panicked");
            false
        }
    }
}
