//! Bluetooth Service Module
//!
//! Main service that coordinates scanning, connection lifecycle and color
//! commands for LED controllers.
//!
//! [`BluetoothService`] is a cheap cloneable handle. Every call is forwarded
//! to a single coordinator task which also consumes the radio's callbacks, so
//! state transitions for an address never race each other.

use crate::domain::known_devices::KnownDeviceStore;
use crate::domain::models::{
    Address, ConnectionState, DeviceStatus, KnownDevice, PeripheralIdentity, Rgb, ScanMode,
    ScannedDevice,
};
use crate::domain::settings::BleSettings;
use crate::infrastructure::bluetooth::connection::{
    select_command_characteristic, ActiveConnection, ConnectionTable,
};
use crate::infrastructure::bluetooth::protocol::CommandFrame;
use crate::infrastructure::bluetooth::radio::{
    Advertisement, GattService, LinkId, Radio, RadioError, RadioEvent,
};
use crate::infrastructure::bluetooth::scanner::{BleScanner, ScanFilter};
use crate::infrastructure::storage::KeyValueStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const UNKNOWN_DEVICE_NAME: &str = "Unknown device";

enum Command {
    Connect {
        address: Address,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        address: Address,
        reply: oneshot::Sender<()>,
    },
    DisconnectAll {
        reply: oneshot::Sender<()>,
    },
    SendColor {
        color: Rgb,
        reply: oneshot::Sender<usize>,
    },
    StartScan {
        mode: ScanMode,
        reply: oneshot::Sender<()>,
    },
    StopScan {
        reply: oneshot::Sender<()>,
    },
    ScanTimeout {
        generation: u64,
    },
    SystemLinksQueried {
        target: Address,
        result: Result<Vec<PeripheralIdentity>, RadioError>,
        reply: oneshot::Sender<()>,
    },
    RemoveKnownDevice {
        address: Address,
        reply: oneshot::Sender<bool>,
    },
    ExecuteCommand {
        color: Rgb,
        reply: oneshot::Sender<OneShotStart>,
    },
    OneShotSettled {
        link: LinkId,
    },
    OneShotAbort {
        link: LinkId,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum OneShotStart {
    /// Existing bound links took the command
    Delivered,
    /// No link and no remembered target
    NoTarget,
    /// A short-lived link is being set up
    Started {
        link: LinkId,
        done: oneshot::Receiver<bool>,
    },
}

/// A connect/discover/write/disconnect cycle for a process with no live link
struct OneShot {
    address: Address,
    color: Rgb,
    done: Option<oneshot::Sender<bool>>,
    settle: Option<JoinHandle<()>>,
}

impl OneShot {
    fn finish(&mut self, delivered: bool) {
        if let Some(done) = self.done.take() {
            let _ = done.send(delivered);
        }
        if let Some(settle) = self.settle.take() {
            settle.abort();
        }
    }
}

/// Read model published to observers
struct Observers {
    connection_state: watch::Sender<ConnectionState>,
    devices: watch::Sender<BTreeMap<Address, DeviceStatus>>,
    scanned: watch::Sender<Vec<ScannedDevice>>,
    known: watch::Sender<Vec<KnownDevice>>,
    scanning: watch::Sender<bool>,
}

/// Handle to the connection manager
#[derive(Clone)]
pub struct BluetoothService {
    commands: mpsc::UnboundedSender<Command>,
    connection_state: watch::Receiver<ConnectionState>,
    devices: watch::Receiver<BTreeMap<Address, DeviceStatus>>,
    scanned: watch::Receiver<Vec<ScannedDevice>>,
    known: watch::Receiver<Vec<KnownDevice>>,
    scanning: watch::Receiver<bool>,
    one_shot_timeout: Duration,
}

impl BluetoothService {
    /// Start the coordinator task on the current tokio runtime
    pub fn spawn<R: Radio>(
        radio: Arc<R>,
        events: mpsc::UnboundedReceiver<RadioEvent>,
        store: Arc<dyn KeyValueStore>,
        settings: BleSettings,
    ) -> Self {
        let known_devices = KnownDeviceStore::load(store);

        let (connection_state_tx, connection_state) = watch::channel(ConnectionState::Disconnected);
        let (devices_tx, devices) = watch::channel(BTreeMap::new());
        let (scanned_tx, scanned) = watch::channel(Vec::new());
        let (known_tx, known) = watch::channel(known_devices.list());
        let (scanning_tx, scanning) = watch::channel(false);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let one_shot_timeout = settings.one_shot_timeout();
        let coordinator = Coordinator {
            radio,
            settings,
            known_devices,
            connections: ConnectionTable::new(),
            scanner: BleScanner::new(),
            one_shots: HashMap::new(),
            adoption_pending: false,
            observers: Observers {
                connection_state: connection_state_tx,
                devices: devices_tx,
                scanned: scanned_tx,
                known: known_tx,
                scanning: scanning_tx,
            },
            commands: commands_tx.downgrade(),
        };
        tokio::spawn(coordinator.run(commands_rx, events));

        Self {
            commands: commands_tx,
            connection_state,
            devices,
            scanned,
            known,
            scanning,
            one_shot_timeout,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, response) = oneshot::channel();
        if self.commands.send(build(reply)).is_err() {
            warn!("Bluetooth service is not running");
            return None;
        }
        response.await.ok()
    }

    /// Start a link attempt. Returns once the address is marked Connecting;
    /// the link itself completes later.
    pub async fn connect(&self, address: Address) {
        self.request(|reply| Command::Connect { address, reply })
            .await;
    }

    /// Ask the peripheral to drop the link. State follows the radio callback.
    pub async fn disconnect(&self, address: Address) {
        self.request(|reply| Command::Disconnect { address, reply })
            .await;
    }

    pub async fn disconnect_all(&self) {
        self.request(|reply| Command::DisconnectAll { reply }).await;
    }

    /// Broadcast a color to every bound link. Returns the number of writes issued.
    pub async fn send_color(&self, color: Rgb) -> usize {
        self.request(|reply| Command::SendColor { color, reply })
            .await
            .unwrap_or(0)
    }

    pub async fn start_scan(&self, mode: ScanMode) {
        self.request(|reply| Command::StartScan { mode, reply })
            .await;
    }

    pub async fn stop_scan(&self) {
        self.request(|reply| Command::StopScan { reply }).await;
    }

    /// Forget a device, disconnecting it first if linked
    pub async fn remove_known_device(&self, address: Address) -> bool {
        self.request(|reply| Command::RemoveKnownDevice { address, reply })
            .await
            .unwrap_or(false)
    }

    /// Deliver a color from a context with no guaranteed long-lived process.
    ///
    /// Uses live links when there are any; otherwise connects to the last
    /// target, writes once and disconnects. Returns false when there is no
    /// target, the link fails, or the whole cycle exceeds the one-shot timeout.
    pub async fn execute_command(&self, color: Rgb) -> bool {
        let deadline = tokio::time::Instant::now() + self.one_shot_timeout;

        let start = match self
            .request(|reply| Command::ExecuteCommand { color, reply })
            .await
        {
            Some(start) => start,
            None => return false,
        };

        let (link, done) = match start {
            OneShotStart::Delivered => return true,
            OneShotStart::NoTarget => {
                info!("No remembered device for one-shot command");
                return false;
            }
            OneShotStart::Started { link, done } => (link, done),
        };

        match tokio::time::timeout_at(deadline, done).await {
            Ok(Ok(delivered)) => delivered,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!("One-shot command on {} timed out", link);
                let _ = self.commands.send(Command::OneShotAbort { link });
                false
            }
        }
    }

    /// Tear down every link and stop the coordinator
    pub async fn shutdown(&self) {
        self.request(|reply| Command::Shutdown { reply }).await;
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.clone()
    }

    pub fn devices(&self) -> watch::Receiver<BTreeMap<Address, DeviceStatus>> {
        self.devices.clone()
    }

    pub fn scanned_devices(&self) -> watch::Receiver<Vec<ScannedDevice>> {
        self.scanned.clone()
    }

    pub fn known_devices(&self) -> watch::Receiver<Vec<KnownDevice>> {
        self.known.clone()
    }

    pub fn is_scanning(&self) -> watch::Receiver<bool> {
        self.scanning.clone()
    }

    /// Wait until `address` has a usable command characteristic
    pub async fn wait_until_bound(&self, address: &Address, timeout: Duration) -> bool {
        let mut devices = self.devices();
        let bound = devices.wait_for(|map| map.get(address).is_some_and(|s| s.command_bound));
        let reached = matches!(tokio::time::timeout(timeout, bound).await, Ok(Ok(_)));
        reached
    }
}

struct Coordinator<R: Radio> {
    radio: Arc<R>,
    settings: BleSettings,
    known_devices: KnownDeviceStore,
    connections: ConnectionTable,
    scanner: BleScanner,
    one_shots: HashMap<LinkId, OneShot>,
    /// A system connected-devices query is out for a background scan
    adoption_pending: bool,
    observers: Observers,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl<R: Radio> Coordinator<R> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<RadioEvent>,
    ) {
        info!("Bluetooth coordinator started");
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;

                // Callbacks already delivered go before later user calls
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("Radio event channel closed");
                        events_open = false;
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
            }
        }

        info!("Bluetooth coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { address, reply } => {
                self.connect(address, None);
                let _ = reply.send(());
            }
            Command::Disconnect { address, reply } => {
                self.disconnect(&address);
                let _ = reply.send(());
            }
            Command::DisconnectAll { reply } => {
                self.disconnect_all();
                let _ = reply.send(());
            }
            Command::SendColor { color, reply } => {
                let _ = reply.send(self.send_color(color));
            }
            Command::StartScan { mode, reply } => self.start_scan(mode, reply),
            Command::StopScan { reply } => {
                self.stop_scan();
                let _ = reply.send(());
            }
            Command::ScanTimeout { generation } => {
                if self.scanner.is_current(generation) {
                    info!("Scan timed out");
                    self.stop_scan();
                }
            }
            Command::SystemLinksQueried {
                target,
                result,
                reply,
            } => {
                self.on_system_links(target, result);
                let _ = reply.send(());
            }
            Command::RemoveKnownDevice { address, reply } => {
                let _ = reply.send(self.remove_known_device(&address));
            }
            Command::ExecuteCommand { color, reply } => {
                let _ = reply.send(self.start_one_shot(color));
            }
            Command::OneShotSettled { link } => self.settle_one_shot(link),
            Command::OneShotAbort { link } => {
                if let Some(mut one_shot) = self.one_shots.remove(&link) {
                    debug!("Aborting one-shot {} to {}", link, one_shot.address);
                    one_shot.finish(false);
                    self.release(link);
                }
            }
            Command::Shutdown { reply } => {
                // Normally intercepted by the run loop
                self.teardown();
                let _ = reply.send(());
            }
        }
    }

    fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Advertisement(adv) => self.on_advertisement(adv),
            RadioEvent::ScanFailed { code } => {
                error!("Scan failed with code {}", code);
                if self.scanner.end() {
                    self.publish_scan();
                }
            }
            RadioEvent::Connected { link } => {
                if self.one_shots.contains_key(&link) {
                    self.one_shot_connected(link);
                } else {
                    self.on_connected(link);
                }
            }
            RadioEvent::ServicesDiscovered { link, result } => {
                if self.one_shots.contains_key(&link) {
                    self.one_shot_discovered(link, result);
                } else {
                    self.on_services_discovered(link, result);
                }
            }
            RadioEvent::Disconnected { link } => {
                if let Some(mut one_shot) = self.one_shots.remove(&link) {
                    info!("One-shot link to {} dropped", one_shot.address);
                    one_shot.finish(false);
                    self.radio.close(link);
                } else {
                    self.on_disconnected(link);
                }
            }
        }
    }

    // --- connection lifecycle ---

    /// `name_hint` is a name learned outside this session's scan results,
    /// e.g. from the system connected-devices query.
    fn connect(&mut self, address: Address, name_hint: Option<String>) {
        self.abort_one_shots_to(&address);
        if let Some(previous) = self.connections.get(&address).map(|c| c.link) {
            debug!("Replacing {} for {}", previous, address);
            self.release(previous);
        }

        let name_hint = self
            .scanner
            .name_of(&address)
            .map(str::to_string)
            .or(name_hint);
        let link = self.connections.next_link_id();
        self.connections.insert(ActiveConnection {
            link,
            address: address.clone(),
            state: ConnectionState::Connecting,
            command_char: None,
            name_hint,
        });
        self.known_devices.set_last_target(address.clone());
        self.publish_connections();

        info!("Connecting to {} on {}", address, link);
        if let Err(e) = self.radio.connect(link, &address) {
            warn!("Connect to {} failed immediately: {}", address, e);
            self.connections.remove_link(link);
            self.publish_connections();
        }
    }

    fn on_connected(&mut self, link: LinkId) {
        let Some(connection) = self.connections.by_link_mut(link) else {
            debug!("Connected callback for stale {}, closing it", link);
            self.radio.close(link);
            return;
        };

        connection.state = ConnectionState::Connected;
        info!("Connected to {}, discovering services", connection.address);
        self.publish_connections();

        if let Err(e) = self.radio.discover_services(link) {
            warn!("Service discovery on {} could not start: {}", link, e);
        }
    }

    fn on_services_discovered(
        &mut self,
        link: LinkId,
        result: Result<Vec<GattService>, RadioError>,
    ) {
        let Some(connection) = self.connections.by_link_mut(link) else {
            debug!("Discovery result for stale {}, closing it", link);
            self.radio.close(link);
            return;
        };

        let services = match result {
            Ok(services) => services,
            Err(e) => {
                warn!("Service discovery on {} failed: {}", connection.address, e);
                return;
            }
        };

        let Some(characteristic) = select_command_characteristic(&services) else {
            warn!(
                "{} exposes no usable command characteristic",
                connection.address
            );
            return;
        };

        connection.command_char = Some(characteristic);
        // Without a fresh name, a stored one is kept as is
        let name = match &connection.name_hint {
            Some(name) => name.clone(),
            None => self
                .known_devices
                .name_of(&connection.address)
                .unwrap_or(UNKNOWN_DEVICE_NAME)
                .to_string(),
        };
        let device = KnownDevice {
            name,
            address: connection.address.clone(),
        };
        info!(
            "Command characteristic {} bound on {}",
            characteristic, device.address
        );

        if self.known_devices.add(device) {
            self.publish_known();
        }
        self.publish_connections();
    }

    fn on_disconnected(&mut self, link: LinkId) {
        match self.connections.remove_link(link) {
            Some(connection) => {
                info!("Disconnected from {}", connection.address);
                self.radio.close(link);
                self.publish_connections();
            }
            None => debug!("Disconnected callback for stale {}", link),
        }
    }

    fn disconnect(&mut self, address: &Address) {
        let Some(link) = self.connections.get(address).map(|c| c.link) else {
            debug!("Disconnect requested for {} with no link", address);
            return;
        };

        info!("Disconnecting from {}", address);
        if let Err(e) = self.radio.disconnect(link) {
            // The radio no longer knows the link, so no callback will follow
            warn!("Disconnect of {} failed: {}", address, e);
            self.connections.remove_link(link);
            self.radio.close(link);
            self.publish_connections();
        }
    }

    fn disconnect_all(&mut self) {
        for connection in self.connections.drain() {
            info!("Disconnecting from {}", connection.address);
            self.release(connection.link);
        }
        self.publish_connections();
    }

    /// Disconnect and close without waiting for the callback
    fn release(&mut self, link: LinkId) {
        if let Err(e) = self.radio.disconnect(link) {
            debug!("Disconnect of {} during release: {}", link, e);
        }
        self.radio.close(link);
        if self.connections.remove_link(link).is_some() {
            self.publish_connections();
        }
    }

    fn send_color(&mut self, color: Rgb) -> usize {
        let frame = CommandFrame::from(color);
        let targets: Vec<(LinkId, Uuid)> = self.connections.bound().collect();
        if targets.is_empty() {
            debug!("No bound device, dropping color {:?}", color);
            return 0;
        }

        let mut written = 0;
        for (link, characteristic) in targets {
            match self
                .radio
                .write_without_response(link, characteristic, frame.as_bytes())
            {
                Ok(()) => written += 1,
                Err(e) => warn!("Write on {} failed: {}", link, e),
            }
        }
        written
    }

    fn remove_known_device(&mut self, address: &Address) -> bool {
        self.disconnect(address);
        let removed = self.known_devices.remove(address);
        if removed {
            info!("Forgot device {}", address);
            self.publish_known();
        }
        removed
    }

    // --- scanning ---

    /// The reply is held back while a system link query is out, so callers
    /// see either the adopted link or the running scan once it resolves.
    fn start_scan(&mut self, mode: ScanMode, reply: oneshot::Sender<()>) {
        if mode == ScanMode::Background {
            if self.scanner.is_scanning() || self.adoption_pending {
                debug!("Scan already running, ignoring background request");
                let _ = reply.send(());
                return;
            }
            if let Some(target) = self.adoption_candidate() {
                self.query_system_links(target, reply);
                return;
            }
        }

        self.begin_scan(mode);
        let _ = reply.send(());
    }

    fn begin_scan(&mut self, mode: ScanMode) {
        if self.scanner.end() {
            let _ = self.radio.stop_scan();
        }

        let generation = self.scanner.begin(mode);
        if let Some(commands) = self.commands.upgrade() {
            let ceiling = self.settings.scan_timeout();
            self.scanner.arm_timeout(tokio::spawn(async move {
                tokio::time::sleep(ceiling).await;
                let _ = commands.send(Command::ScanTimeout { generation });
            }));
        }

        info!("Starting {:?} scan", mode);
        if let Err(e) = self.radio.start_scan() {
            error!("Scan start failed: {}", e);
            self.scanner.end();
        }
        self.publish_scan();
    }

    /// Last target, when this process holds no link to it
    fn adoption_candidate(&self) -> Option<Address> {
        self.known_devices
            .last_target()
            .filter(|target| self.connections.get(target).is_none())
            .cloned()
    }

    /// Ask the OS which peers it already links to, off the coordinator task
    fn query_system_links(&mut self, target: Address, reply: oneshot::Sender<()>) {
        let Some(commands) = self.commands.upgrade() else {
            let _ = reply.send(());
            return;
        };

        self.adoption_pending = true;
        let radio = self.radio.clone();
        tokio::spawn(async move {
            let result = radio.system_connected_devices().await;
            let _ = commands.send(Command::SystemLinksQueried {
                target,
                result,
                reply,
            });
        });
    }

    /// Recover a link the OS still holds to the last target.
    ///
    /// BLE stacks tend to reject a fresh connection to a peer that is already
    /// linked at system level, so the existing link is adopted instead.
    /// Anything else falls through to a background scan.
    fn on_system_links(
        &mut self,
        target: Address,
        result: Result<Vec<PeripheralIdentity>, RadioError>,
    ) {
        self.adoption_pending = false;

        match result {
            Ok(linked) => {
                if let Some(peer) = linked.into_iter().find(|p| p.address == target) {
                    if self.connections.get(&target).is_none() {
                        info!("{} is already linked at system level, adopting", target);
                        self.connect(target, peer.name);
                    }
                    return;
                }
            }
            Err(RadioError::PermissionDenied(reason)) => {
                warn!("Cannot check existing connections ({}), scanning instead", reason);
            }
            Err(e) => error!("Error checking existing connections: {}", e),
        }

        // A manual scan or a connect may have started while the query was out
        if self.scanner.is_scanning() || self.connections.get(&target).is_some() {
            return;
        }
        self.begin_scan(ScanMode::Background);
    }

    fn stop_scan(&mut self) {
        if self.scanner.end() {
            info!("Stopping scan");
            if let Err(e) = self.radio.stop_scan() {
                debug!("Ignoring scan stop error: {}", e);
            }
        }
        self.publish_scan();
    }

    fn on_advertisement(&mut self, adv: Advertisement) {
        let Some(mode) = self.scanner.mode() else {
            return;
        };

        let target = self.known_devices.last_target().cloned();
        let filter = ScanFilter {
            target: target.as_ref(),
            known_devices: &self.known_devices,
        };
        if !filter.matches(&adv) {
            return;
        }

        self.scanner.record(&adv);
        self.observers
            .scanned
            .send_replace(self.scanner.results().to_vec());

        let is_target = target.as_ref() == Some(&adv.address);
        if mode == ScanMode::Background && is_target && self.connections.get(&adv.address).is_none()
        {
            info!("Target {} found via scan, auto-connecting", adv.address);
            self.stop_scan();
            self.connect(adv.address, None);
        }
    }

    // --- one-shot ---

    fn start_one_shot(&mut self, color: Rgb) -> OneShotStart {
        if self.connections.has_bound() {
            self.send_color(color);
            return OneShotStart::Delivered;
        }

        let Some(address) = self.known_devices.last_target().cloned() else {
            return OneShotStart::NoTarget;
        };

        self.abort_one_shots_to(&address);
        if let Some(previous) = self.connections.get(&address).map(|c| c.link) {
            self.release(previous);
        }

        let link = self.connections.next_link_id();
        let (done_tx, done_rx) = oneshot::channel();
        self.one_shots.insert(
            link,
            OneShot {
                address: address.clone(),
                color,
                done: Some(done_tx),
                settle: None,
            },
        );

        info!("One-shot command to {} on {}", address, link);
        if let Err(e) = self.radio.connect(link, &address) {
            warn!("One-shot connect to {} failed: {}", address, e);
            if let Some(mut one_shot) = self.one_shots.remove(&link) {
                one_shot.finish(false);
            }
        }

        OneShotStart::Started {
            link,
            done: done_rx,
        }
    }

    fn one_shot_connected(&mut self, link: LinkId) {
        if let Err(e) = self.radio.discover_services(link) {
            warn!("One-shot discovery on {} could not start: {}", link, e);
            self.fail_one_shot(link);
        }
    }

    fn one_shot_discovered(&mut self, link: LinkId, result: Result<Vec<GattService>, RadioError>) {
        let characteristic = match result {
            Ok(services) => select_command_characteristic(&services),
            Err(e) => {
                warn!("One-shot discovery on {} failed: {}", link, e);
                None
            }
        };

        let color = self.one_shots.get(&link).map(|o| o.color);
        let (Some(characteristic), Some(color)) = (characteristic, color) else {
            // Disconnected callback finishes the one-shot
            if let Err(e) = self.radio.disconnect(link) {
                debug!("One-shot disconnect of {}: {}", link, e);
                self.fail_one_shot(link);
            }
            return;
        };

        let frame = CommandFrame::from(color);
        if let Err(e) = self
            .radio
            .write_without_response(link, characteristic, frame.as_bytes())
        {
            warn!("One-shot write on {} failed: {}", link, e);
            self.fail_one_shot(link);
            return;
        }

        // Let the packet leave before tearing the link down
        let settle_for = self.settings.one_shot_settle();
        let settle = self.commands.upgrade().map(|commands| {
            tokio::spawn(async move {
                tokio::time::sleep(settle_for).await;
                let _ = commands.send(Command::OneShotSettled { link });
            })
        });
        if let Some(one_shot) = self.one_shots.get_mut(&link) {
            one_shot.settle = settle;
        }
    }

    fn settle_one_shot(&mut self, link: LinkId) {
        if let Some(mut one_shot) = self.one_shots.remove(&link) {
            info!("One-shot command delivered to {}", one_shot.address);
            one_shot.settle = None;
            one_shot.finish(true);
            if let Err(e) = self.radio.disconnect(link) {
                debug!("One-shot disconnect of {}: {}", link, e);
            }
            self.radio.close(link);
        }
    }

    /// One link per address: a newer request replaces an unfinished one-shot
    fn abort_one_shots_to(&mut self, address: &Address) {
        let superseded: Vec<LinkId> = self
            .one_shots
            .iter()
            .filter(|(_, one_shot)| &one_shot.address == address)
            .map(|(link, _)| *link)
            .collect();
        for link in superseded {
            debug!("One-shot {} to {} superseded", link, address);
            self.fail_one_shot(link);
        }
    }

    fn fail_one_shot(&mut self, link: LinkId) {
        if let Some(mut one_shot) = self.one_shots.remove(&link) {
            one_shot.finish(false);
            let _ = self.radio.disconnect(link);
            self.radio.close(link);
        }
    }

    // --- teardown & read model ---

    fn teardown(&mut self) {
        if self.scanner.end() {
            let _ = self.radio.stop_scan();
        }
        let links: Vec<LinkId> = self.one_shots.keys().copied().collect();
        for link in links {
            self.fail_one_shot(link);
        }
        self.disconnect_all();
        self.publish_scan();
    }

    fn publish_connections(&self) {
        self.observers
            .connection_state
            .send_replace(self.connections.aggregate_state());
        self.observers
            .devices
            .send_replace(self.connections.statuses());
    }

    fn publish_scan(&self) {
        self.observers
            .scanning
            .send_replace(self.scanner.is_scanning());
        self.observers
            .scanned
            .send_replace(self.scanner.results().to_vec());
    }

    fn publish_known(&self) {
        self.observers.known.send_replace(self.known_devices.list());
    }
}
