//! The board as a whole: initialisation, inventory and the port registry.
//!
//! [`BuildHat`] owns a [`SerialLink`] and keeps one descriptor and at most
//! one live [`Device`] per port. Three structural watchers keep that state
//! current once [`BuildHat::ready`] has run:
//!
//! - `P<n>: connecting` starts collecting the handshake up to
//!   `P<n>: established`, parses it and announces `connect(n)`;
//! - `P<n>: disconnected` clears the port, destroys its device and
//!   announces `disconnect(n)`;
//! - `Error...` lines are broadcast as [`HatError::Board`] notifications.

use crate::config::{Config, ConfigError};
use crate::device::{Capability, Device};
use crate::devicelist::{parse_device, parse_device_list, DeviceInfo, PORT_COUNT};
use crate::error::{GrammarError, GrammarRule, HatError, HatResult, PortStateError};
use crate::link::{
    CommandLine, EventChannel, LogMessage, SerialLink, Subscription, WatcherId,
};
use crate::port::{SerialTransport, Transport};
use crate::predicate;
use crate::telemetry::Wiggle;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

static CONNECTING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^P(\d+):\s+connecting\b").expect("valid regex"));
static DISCONNECTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^P(\d+):\s+disconnected").expect("valid regex"));
static BOARD_ERROR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^Error").expect("valid regex"));
static LIST_TERMINATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^deltat=").expect("valid regex"));

/// Descriptor per port, as last reported by the board.
pub type Inventory = [Option<Arc<DeviceInfo>>; PORT_COUNT];

fn port_of(re: &Regex, line: &str) -> Option<usize> {
    re.captures(line).and_then(|caps| caps[1].parse().ok())
}

struct HatShared {
    link: SerialLink,
    list_terminator: Regex,
    default_wiggle: Wiggle,
    descriptors: Mutex<Inventory>,
    ports: Mutex<[Option<Arc<Device>>; PORT_COUNT]>,
    ready: OnceCell<()>,
    watchers: Mutex<Vec<WatcherId>>,
    connect: EventChannel<usize>,
    disconnect: EventChannel<usize>,
    halt: EventChannel<()>,
}

impl HatShared {
    fn install_watchers(self: &Arc<Self>) {
        let mut ids = self.watchers.lock();
        if !ids.is_empty() {
            return;
        }

        let weak = Arc::downgrade(self);
        ids.push(self.link.add_watcher(move |line| {
            let Some(port) = port_of(&DISCONNECTED, line) else {
                return false;
            };
            if let Some(shared) = weak.upgrade() {
                shared.on_disconnect(port);
            }
            true
        }));

        let weak = Arc::downgrade(self);
        ids.push(self.link.add_watcher(move |line| {
            let Some(port) = port_of(&CONNECTING, line) else {
                return false;
            };
            if let Some(shared) = weak.upgrade() {
                shared.on_connecting(port);
            }
            true
        }));

        let weak: Weak<HatShared> = Arc::downgrade(self);
        ids.push(self.link.add_watcher(move |line| {
            if !BOARD_ERROR.is_match(line) {
                return false;
            }
            if let Some(shared) = weak.upgrade() {
                shared.link.notify_error(HatError::Board {
                    line: line.to_string(),
                });
            }
            true
        }));
    }

    fn on_disconnect(&self, port: usize) {
        if port >= PORT_COUNT {
            warn!(port, "Disconnect reported for unknown port");
            return;
        }
        let device = {
            let mut descriptors = self.descriptors.lock();
            descriptors[port] = None;
            self.ports.lock()[port].take()
        };
        if let Some(device) = device {
            device.destroy();
        }
        info!(port, "device disconnected");
        self.disconnect.publish(port);
    }

    /// Collect the handshake window synchronously, parse it off the reader
    /// task.
    fn on_connecting(self: &Arc<Self>, port: usize) {
        if port >= PORT_COUNT {
            warn!(port, "Connect reported for unknown port");
            return;
        }
        let window = self
            .link
            .keep_lines(predicate::literal(&format!("P{port}: established")));
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let result = window.await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if let Err(e) = result.and_then(|lines| shared.on_established(port, &lines)) {
                shared.link.notify_error(e);
            }
        });
    }

    fn on_established(&self, port: usize, lines: &[String]) -> HatResult<()> {
        let is_header = predicate::literal(&format!("P{port}: connected"));
        let start = lines
            .iter()
            .position(|l| is_header(l))
            .ok_or(GrammarError::truncated(GrammarRule::Connected { port }))?;
        // The last line is the `established` sentinel.
        let end = lines.len().saturating_sub(1).max(start);
        let info = parse_device(&lines[start..end], port)?.map(Arc::new);

        let stale = {
            let mut descriptors = self.descriptors.lock();
            descriptors[port] = info.clone();
            self.ports.lock()[port].take()
        };
        if let Some(device) = stale {
            device.destroy();
        }
        if let Some(info) = info {
            info!(port, type_id = info.type_id(), "device connected: {}", info.device_type.description);
            self.connect.publish(port);
        }
        Ok(())
    }

    fn store_inventory(&self, inventory: &Inventory) {
        let stale: Vec<Arc<Device>> = {
            let mut descriptors = self.descriptors.lock();
            let mut ports = self.ports.lock();
            let mut stale = Vec::new();
            for (port, info) in inventory.iter().enumerate() {
                let same_type = match (&descriptors[port], info) {
                    (Some(old), Some(new)) => old.type_id() == new.type_id(),
                    _ => false,
                };
                if !same_type {
                    if let Some(device) = ports[port].take() {
                        stale.push(device);
                    }
                }
                descriptors[port] = info.clone();
            }
            stale
        };
        for device in stale {
            device.destroy();
        }
    }
}

/// Handle to a controller board.
///
/// Cheap to clone; clones share the same link and registry.
#[derive(Clone)]
pub struct BuildHat {
    shared: Arc<HatShared>,
}

impl BuildHat {
    /// Drive the board over `link`, ending `list` responses at `deltat=`.
    pub fn new(link: SerialLink) -> Self {
        Self::build(link, LIST_TERMINATOR.clone(), Wiggle::default())
    }

    fn build(link: SerialLink, list_terminator: Regex, default_wiggle: Wiggle) -> Self {
        Self {
            shared: Arc::new(HatShared {
                link,
                list_terminator,
                default_wiggle,
                descriptors: Mutex::new(Default::default()),
                ports: Mutex::new(Default::default()),
                ready: OnceCell::new(),
                watchers: Mutex::new(Vec::new()),
                connect: EventChannel::new(),
                disconnect: EventChannel::new(),
                halt: EventChannel::new(),
            }),
        }
    }

    /// Drive the board over `transport` with the link settings in `config`.
    pub fn with_transport(transport: impl Transport + 'static, config: &Config) -> HatResult<Self> {
        let list_terminator = Regex::new(&config.link.list_terminator)
            .map_err(|e| ConfigError::validation("link.list_terminator", e.to_string()))?;
        let link = SerialLink::with_options(transport, config.link.link_options());
        Ok(Self::build(link, list_terminator, config.telemetry.wiggle()))
    }

    /// Drive the board on the serial device named in `config`.
    ///
    /// The device is not opened until the first command.
    pub fn open(config: &Config) -> HatResult<Self> {
        config.validate()?;
        let transport = SerialTransport::new(
            config.serial.device.clone(),
            config.serial.port_configuration(),
        );
        Self::with_transport(transport, config)
    }

    pub fn link(&self) -> &SerialLink {
        &self.shared.link
    }

    /// Threshold given to streams made with [`Device::telemetry_default`].
    pub fn default_wiggle(&self) -> &Wiggle {
        &self.shared.default_wiggle
    }

    /// Wake the board, disable command echo, read the inventory and start
    /// tracking connects and disconnects. Runs once; later calls return
    /// immediately.
    pub async fn ready(&self) -> HatResult<()> {
        let shared = &self.shared;
        shared
            .ready
            .get_or_try_init(|| async {
                shared.link.send(CommandLine::new()).await?;
                shared.link.send("echo 0").await?;
                self.list().await?;
                shared.install_watchers();
                info!("Board on {} ready", shared.link.name());
                Ok::<(), HatError>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.initialized()
    }

    /// Ask the board for its inventory and replace the stored descriptors.
    ///
    /// Handles to devices whose port emptied or changed type are destroyed.
    pub async fn list(&self) -> HatResult<Inventory> {
        let shared = &self.shared;
        let lines = shared
            .link
            .wait("list", predicate::pattern(shared.list_terminator.clone()))
            .await?;
        let start = lines.iter().position(|l| l.starts_with("P0:")).unwrap_or(0);
        let parsed = parse_device_list(&lines[start..])?;
        let inventory: Inventory = parsed.map(|info| info.map(Arc::new));
        shared.store_inventory(&inventory);
        debug!(
            attached = inventory.iter().filter(|i| i.is_some()).count(),
            "inventory refreshed"
        );
        Ok(inventory)
    }

    /// Current descriptors, initialising the board first if needed.
    pub async fn devices(&self) -> HatResult<Inventory> {
        self.ready().await?;
        Ok(self.descriptors())
    }

    /// Current descriptors, without talking to the board.
    pub fn descriptors(&self) -> Inventory {
        self.shared.descriptors.lock().clone()
    }

    /// The device on `index`, which must offer `capability`.
    ///
    /// The handle is created on first access and cached until the device
    /// disconnects.
    pub fn port(&self, index: usize, capability: Capability) -> HatResult<Arc<Device>> {
        if index >= PORT_COUNT {
            return Err(PortStateError::InvalidPort(index).into());
        }
        let descriptors = self.shared.descriptors.lock();
        let info = descriptors[index]
            .clone()
            .ok_or(PortStateError::NoDevice(index))?;
        if !info.class().has(capability) {
            return Err(PortStateError::TypeMismatch {
                port: index,
                actual: info.class(),
                expected: capability,
            }
            .into());
        }
        let mut ports = self.shared.ports.lock();
        let device = ports[index]
            .get_or_insert_with(|| {
                Arc::new(Device::new(
                    self.shared.link.clone(),
                    index,
                    info,
                    self.shared.default_wiggle.clone(),
                ))
            });
        Ok(Arc::clone(device))
    }

    /// The device on `index`, of any kind.
    pub fn device(&self, index: usize) -> HatResult<Arc<Device>> {
        self.port(index, Capability::Device)
    }

    /// Stop every port: cancel sampling, switch to PWM and drive to zero.
    ///
    /// Writes bypass the transaction queue so a stuck transaction cannot
    /// delay them. Every port is attempted; the first failure is returned.
    pub async fn halt(&self) -> HatResult<()> {
        let devices: Vec<Arc<Device>> = self.shared.ports.lock().iter().flatten().cloned().collect();
        for device in devices {
            device.stop_stream();
        }

        let mut first_error = None;
        for port in 0..PORT_COUNT {
            let cmd = CommandLine::from(["select", "pwm", "set 0"]).prefixed(format!("port {port}"));
            if let Err(e) = self.shared.link.immediate(cmd).await {
                warn!(port, "Halt failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        info!("Board halted");
        self.shared.halt.publish(());
        first_error.map_or(Ok(()), Err)
    }

    /// Remove the structural watchers, destroy every device and close the
    /// link.
    pub async fn close(&self) -> HatResult<()> {
        let shared = &self.shared;
        for id in shared.watchers.lock().drain(..) {
            shared.link.remove_watcher(id);
        }
        let devices: Vec<Arc<Device>> = shared.ports.lock().iter_mut().filter_map(Option::take).collect();
        for device in devices {
            device.destroy();
        }
        shared.connect.close();
        shared.disconnect.close();
        shared.halt.close();
        shared.link.close().await
    }

    /// Port indices as devices finish connecting.
    pub fn subscribe_connect(&self) -> Subscription<usize> {
        self.shared.connect.subscribe()
    }

    /// Port indices as devices disconnect.
    pub fn subscribe_disconnect(&self) -> Subscription<usize> {
        self.shared.disconnect.subscribe()
    }

    pub fn subscribe_halt(&self) -> Subscription<()> {
        self.shared.halt.subscribe()
    }

    pub fn subscribe_errors(&self) -> Subscription<Arc<HatError>> {
        self.shared.link.subscribe_errors()
    }

    pub fn subscribe_lines(&self) -> Subscription<String> {
        self.shared.link.subscribe_lines()
    }

    pub fn subscribe_log(&self) -> Subscription<LogMessage> {
        self.shared.link.subscribe_log()
    }
}

impl std::fmt::Debug for BuildHat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildHat")
            .field("link", &self.shared.link)
            .field("ready", &self.is_ready())
            .finish()
    }
}
