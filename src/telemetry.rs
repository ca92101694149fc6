//! Continuous mode sampling with hysteresis.
//!
//! A [`TelemetryStream`] asks the board to stream one mode of a device
//! (`select <mode>`), claims the resulting `P<port>M<mode>:` lines with a
//! watcher, and publishes a sample only when it differs enough from the
//! last one published.
//!
//! A device has at most one active stream; starting another stream on the
//! same device stops the first. Stopping is best-effort: the board does not
//! acknowledge the cancel, so one stale line may still be in flight, but it
//! is never published.

use crate::device::{detach, Device, ModeSelector};
use crate::devicelist::parse_mode_response;
use crate::error::{HatResult, PortStateError};
use crate::link::{EventChannel, SerialLink, Subscription, WatcherId};
use crate::predicate;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Minimum per-field change before a sample is published.
#[derive(Debug, Clone, PartialEq)]
pub enum Wiggle {
    /// One threshold for every field.
    Scalar(f64),
    /// One threshold per field; the last one repeats for extra fields.
    PerField(Vec<f64>),
}

impl Wiggle {
    /// Threshold applying to field `index`.
    pub fn threshold(&self, index: usize) -> f64 {
        match self {
            Wiggle::Scalar(t) => *t,
            Wiggle::PerField(ts) => ts.get(index).or(ts.last()).copied().unwrap_or(0.0),
        }
    }
}

impl Default for Wiggle {
    fn default() -> Self {
        Wiggle::Scalar(0.0)
    }
}

impl From<f64> for Wiggle {
    fn from(t: f64) -> Self {
        Wiggle::Scalar(t)
    }
}

impl From<Vec<f64>> for Wiggle {
    fn from(ts: Vec<f64>) -> Self {
        Wiggle::PerField(ts)
    }
}

impl<const N: usize> From<[f64; N]> for Wiggle {
    fn from(ts: [f64; N]) -> Self {
        Wiggle::PerField(ts.to_vec())
    }
}

/// Whether `data` should be published given the last published sample.
///
/// True when there is no previous sample, the number of fields changed, or
/// any field moved by more than its threshold.
pub fn differ(wiggle: &Wiggle, data: &[f64], previous: Option<&[f64]>) -> bool {
    let Some(previous) = previous else {
        return true;
    };
    data.len() != previous.len()
        || data
            .iter()
            .zip(previous)
            .enumerate()
            .any(|(i, (now, then))| (now - then).abs() > wiggle.threshold(i))
}

#[derive(Debug, Default)]
struct StreamState {
    watcher: Option<WatcherId>,
    mode: Option<usize>,
    /// Last published sample.
    previous: Option<Vec<f64>>,
}

pub(crate) struct StreamCore {
    device: Weak<Device>,
    link: SerialLink,
    port: usize,
    wiggle: Wiggle,
    state: Mutex<StreamState>,
    updates: EventChannel<Vec<f64>>,
}

impl StreamCore {
    fn on_sample(&self, line: &str) {
        let data = match parse_mode_response(line) {
            Ok(data) => data,
            Err(e) => {
                warn!(port = self.port, "Dropping sample: {}", e);
                return;
            }
        };
        {
            let mut state = self.state.lock();
            if state.watcher.is_none()
                || !differ(&self.wiggle, &data, state.previous.as_deref())
            {
                return;
            }
            state.previous = Some(data.clone());
        }
        trace!(port = self.port, ?data, "telemetry update");
        self.updates.publish(data);
    }

    /// Remove the watcher and cancel streaming. A no-op when not streaming.
    pub(crate) fn stop(&self) {
        let watcher = {
            let mut state = self.state.lock();
            state.mode = None;
            state.watcher.take()
        };
        let Some(id) = watcher else {
            return;
        };
        self.link.remove_watcher(id);
        debug!(port = self.port, "telemetry stopped");
        if let Some(device) = self.device.upgrade() {
            detach("select cancel", device.send("select"));
        }
    }
}

/// A stream of de-duplicated samples from one mode of a device.
///
/// Created stopped by [`Device::telemetry`]. Dropping the stream stops it.
pub struct TelemetryStream {
    core: Arc<StreamCore>,
}

impl TelemetryStream {
    pub(crate) fn new(device: &Arc<Device>, wiggle: Wiggle) -> Self {
        Self {
            core: Arc::new(StreamCore {
                device: Arc::downgrade(device),
                link: device.link().clone(),
                port: device.port(),
                wiggle,
                state: Mutex::new(StreamState::default()),
                updates: EventChannel::new(),
            }),
        }
    }

    pub fn port(&self) -> usize {
        self.core.port
    }

    pub fn wiggle(&self) -> &Wiggle {
        &self.core.wiggle
    }

    pub fn is_streaming(&self) -> bool {
        self.core.state.lock().watcher.is_some()
    }

    /// Index of the mode being streamed.
    pub fn mode(&self) -> Option<usize> {
        self.core.state.lock().mode
    }

    /// Start streaming `selector`, stopping this stream and any other stream
    /// on the same device first.
    ///
    /// Returns once the `select` command is queued; there is no reply to wait
    /// for.
    pub fn start(&self, selector: impl Into<ModeSelector>) -> HatResult<()> {
        self.stop();
        let core = &self.core;
        let device = core
            .device
            .upgrade()
            .filter(|d| !d.is_destroyed())
            .ok_or(PortStateError::Detached(core.port))?;
        let selector = selector.into();
        let index = device.resolve_mode(&selector.mode)?;

        if let Some(other) = device.claim_stream(core) {
            other.stop();
        }

        let matches = predicate::prefix(format!("P{}M{}:", core.port, index));
        let weak = Arc::downgrade(core);
        let id = core.link.add_watcher(move |line| {
            if !matches(line) {
                return false;
            }
            if let Some(core) = weak.upgrade() {
                core.on_sample(line);
            }
            true
        });
        {
            let mut state = core.state.lock();
            state.watcher = Some(id);
            state.mode = Some(index);
            state.previous = None;
        }
        debug!(port = core.port, mode = index, "telemetry started");
        detach("select", device.send(format!("select {}", selector.args(index))));
        Ok(())
    }

    /// Stop streaming. Safe to call repeatedly, or on a stream never started.
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Receive published samples from now on.
    pub fn updates(&self) -> Subscription<Vec<f64>> {
        self.core.updates.subscribe()
    }
}

impl Drop for TelemetryStream {
    fn drop(&mut self) {
        self.core.stop();
    }
}

impl std::fmt::Debug for TelemetryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStream")
            .field("port", &self.core.port)
            .field("wiggle", &self.core.wiggle)
            .field("mode", &self.mode())
            .finish()
    }
}
