//! Handles to devices attached to the board's ports.
//!
//! A [`Device`] is created by the port registry from a parsed
//! [`DeviceInfo`] and stays valid until the board reports the device
//! disconnected. After that it is destroyed: [`Device::send`] and
//! [`Device::immediate`] quietly do nothing and its telemetry stream is
//! stopped.

pub mod command;
pub mod types;

pub use command::{
    combi_command, CombiEntry, Format, ModeRef, ModeSelector, PidConfig, Setpoint, Transition,
    Waveform,
};
pub use types::{lookup_type, Capability, DeviceClass, DeviceType};

use crate::devicelist::{parse_mode_response, DeviceInfo};
use crate::error::{HatError, HatResult, PortStateError};
use crate::link::{CommandLine, SerialLink};
use crate::predicate;
use crate::telemetry::{StreamCore, TelemetryStream, Wiggle};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// A device on one port.
pub struct Device {
    link: SerialLink,
    port: usize,
    info: Arc<DeviceInfo>,
    default_wiggle: Wiggle,
    destroyed: AtomicBool,
    stream: Mutex<Option<Weak<StreamCore>>>,
}

impl Device {
    pub(crate) fn new(
        link: SerialLink,
        port: usize,
        info: Arc<DeviceInfo>,
        default_wiggle: Wiggle,
    ) -> Self {
        Self {
            link,
            port,
            info,
            default_wiggle,
            destroyed: AtomicBool::new(false),
            stream: Mutex::new(None),
        }
    }

    pub fn port(&self) -> usize {
        self.port
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn class(&self) -> DeviceClass {
        self.info.class()
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.class().has(capability)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn link(&self) -> &SerialLink {
        &self.link
    }

    fn attached(&self) -> HatResult<()> {
        if self.is_destroyed() {
            Err(PortStateError::Detached(self.port).into())
        } else {
            Ok(())
        }
    }

    fn addressed(&self, cmd: impl Into<CommandLine>) -> CommandLine {
        cmd.into().prefixed(format!("port {}", self.port))
    }

    /// Send `cmd` to this port in a transaction and wait for the prompt.
    pub fn send(
        &self,
        cmd: impl Into<CommandLine>,
    ) -> impl Future<Output = HatResult<()>> + Send + 'static {
        let queued = (!self.is_destroyed()).then(|| self.link.send(self.addressed(cmd)));
        async move {
            match queued {
                Some(reply) => reply.await,
                None => Ok(()),
            }
        }
    }

    /// Write `cmd` to this port outside the transaction queue.
    pub fn immediate(
        &self,
        cmd: impl Into<CommandLine>,
    ) -> impl Future<Output = HatResult<()>> + Send + 'static {
        let written = (!self.is_destroyed()).then(|| self.link.immediate(self.addressed(cmd)));
        async move {
            match written {
                Some(write) => write.await,
                None => Ok(()),
            }
        }
    }

    /// Drive the port's output. One-shot setpoints complete when the board
    /// reports them done.
    pub fn set(
        &self,
        setpoint: impl Into<Setpoint>,
    ) -> impl Future<Output = HatResult<()>> + Send + 'static {
        let setpoint = setpoint.into();
        let done = setpoint
            .completion(self.port)
            .filter(|_| !self.is_destroyed())
            .map(|line| self.link.wait_for(predicate::literal(&line)));
        let sent = self.send(setpoint.command());
        async move {
            sent.await?;
            if let Some(done) = done {
                done.await?;
            }
            Ok(())
        }
    }

    pub fn bias(&self, bias: f64) -> impl Future<Output = HatResult<()>> + Send + 'static {
        self.send(format!("bias {bias}"))
    }

    pub fn plimit(&self, limit: f64) -> impl Future<Output = HatResult<()>> + Send + 'static {
        self.send(format!("plimit {limit}"))
    }

    /// Put the port into direct PWM drive.
    pub fn pwm(&self) -> impl Future<Output = HatResult<()>> + Send + 'static {
        self.send("pwm")
    }

    /// Configure combined-mode slot `slot`.
    pub fn combi(
        &self,
        slot: usize,
        entries: &[CombiEntry],
    ) -> impl Future<Output = HatResult<()>> + Send + 'static {
        self.send(combi_command(slot, entries))
    }

    pub fn pid(&self, config: &PidConfig) -> impl Future<Output = HatResult<()>> + Send + 'static {
        self.send(config.command())
    }

    /// Read one sample of a mode.
    pub fn sel_once(
        &self,
        selector: impl Into<ModeSelector>,
    ) -> impl Future<Output = HatResult<Vec<f64>>> + Send + 'static {
        let selector = selector.into();
        let request = self
            .attached()
            .and_then(|_| self.resolve_mode(&selector.mode))
            .map(|index| {
                let sample = self
                    .link
                    .wait_for(predicate::prefix(format!("P{}M{}:", self.port, index)));
                let sent = self.send(format!("selonce {}", selector.args(index)));
                (sent, sample)
            });
        async move {
            let (sent, sample) = request?;
            sent.await?;
            let line = sample.await?;
            Ok(parse_mode_response(&line)?)
        }
    }

    /// A stopped telemetry stream over this device's samples.
    pub fn telemetry(self: &Arc<Self>, wiggle: impl Into<Wiggle>) -> TelemetryStream {
        TelemetryStream::new(self, wiggle.into())
    }

    /// A stream using the board's configured `telemetry.default_wiggle`.
    pub fn telemetry_default(self: &Arc<Self>) -> TelemetryStream {
        self.telemetry(self.default_wiggle.clone())
    }

    /// Index of the mode `mode` refers to.
    pub fn resolve_mode(&self, mode: &ModeRef) -> HatResult<usize> {
        let index = match mode {
            ModeRef::Index(i) => self.info.modes.get(*i).map(|m| m.index),
            ModeRef::Name(name) => self.info.mode_named(name).map(|m| m.index),
        };
        index.ok_or_else(|| HatError::UnknownMode {
            port: self.port,
            mode: mode.to_string(),
        })
    }

    /// Make `core` the device's active stream, returning the one it replaces.
    pub(crate) fn claim_stream(&self, core: &Arc<StreamCore>) -> Option<Arc<StreamCore>> {
        let previous = self.stream.lock().replace(Arc::downgrade(core));
        previous
            .and_then(|weak| weak.upgrade())
            .filter(|other| !Arc::ptr_eq(other, core))
    }

    /// Stop the device's active telemetry stream, if any.
    pub fn stop_stream(&self) {
        let active = self.stream.lock().take().and_then(|weak| weak.upgrade());
        if let Some(core) = active {
            core.stop();
        }
    }

    /// Mark the device gone and stop its stream.
    pub(crate) fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(port = self.port, "device destroyed");
        self.stop_stream();
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("port", &self.port)
            .field("class", &self.class())
            .field("type_id", &self.info.type_id())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// Let a queued transaction run to completion without a caller, logging
/// its failure.
pub(crate) fn detach<F>(what: &'static str, fut: F)
where
    F: Future<Output = HatResult<()>> + Send + 'static,
{
    if tokio::runtime::Handle::try_current().is_err() {
        return;
    }
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            warn!("{} failed: {}", what, e);
        }
    });
}
