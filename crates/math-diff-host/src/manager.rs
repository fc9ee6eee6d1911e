//! Device manager for hosting linked devices.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use math_diff_core::{Device, DeviceConfig, DeviceControl, DeviceFactory, DeviceId, Message};
use tokio::{
    sync::{RwLock, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    HostControl, ServiceEvent, Thing,
    control::Action,
    routes::{LinkId, Route, RouteTable},
    transport::Transport,
};

/// Device manager error.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Device not linked: {0}")]
    NotLinked(DeviceId),
    #[error("Device task failed: {0}")]
    TaskFailed(String),
}

enum DeviceCommand {
    Message(Message),
    ConfigChange {
        config: DeviceConfig,
        done: oneshot::Sender<()>,
    },
    Unlink,
}

/// Linked device state held by the manager.
struct DeviceHandle {
    link: LinkId,
    tx: mpsc::UnboundedSender<DeviceCommand>,
    task: JoinHandle<()>,
}

impl DeviceHandle {
    async fn stop(self) -> Result<(), HostError> {
        // The task unlinks on its own if the channel is already closed.
        let _ = self.tx.send(DeviceCommand::Unlink);
        self.task
            .await
            .map_err(|e| HostError::TaskFailed(e.to_string()))
    }
}

/// Keys whose value differs between `original` and `config`. Removed keys
/// map to an empty value.
fn config_delta(original: &DeviceConfig, config: &DeviceConfig) -> DeviceConfig {
    let mut changes: DeviceConfig = config
        .iter()
        .filter(|(key, value)| original.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    for key in original.keys() {
        if !config.contains_key(key) {
            changes.insert(key.clone(), String::new());
        }
    }
    changes
}

/// Owns one device and serializes every callback into it.
struct DeviceWorker<T, F> {
    link: LinkId,
    device: Box<dyn Device>,
    ctrl: HostControl,
    transport: Arc<T>,
    routes: Arc<RwLock<RouteTable>>,
    factory: Arc<F>,
}

impl<T, F> DeviceWorker<T, F>
where
    T: Transport + 'static,
    F: DeviceFactory,
{
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<DeviceCommand>,
        linked: oneshot::Sender<()>,
    ) {
        self.link().await;
        let _ = linked.send(());

        while let Some(cmd) = rx.recv().await {
            match cmd {
                DeviceCommand::Message(msg) => self.message(&msg).await,
                DeviceCommand::ConfigChange { config, done } => {
                    self.config_change(config).await;
                    let _ = done.send(());
                }
                DeviceCommand::Unlink => break,
            }
        }

        self.unlink().await;
    }

    async fn link(&mut self) {
        let status = self.device.process_link(&mut self.ctrl);
        self.flush().await;
        self.report_status(&status).await;
    }

    async fn message(&mut self, msg: &Message) {
        self.device.process_message(&mut self.ctrl, msg);
        self.flush().await;
    }

    /// Offer the device the delta to its new full configuration, relinking a
    /// fresh device with `config` if the device does not apply it.
    async fn config_change(&mut self, config: DeviceConfig) {
        let original = self.ctrl.config().clone();
        let changes = config_delta(&original, &config);

        let (status, applied) =
            self.device
                .process_config_change(&mut self.ctrl, &changes, &original);
        self.flush().await;

        if applied {
            self.ctrl.set_config(config);
            if !status.is_empty() {
                self.report_status(&status).await;
            }
            return;
        }

        debug!(device_id = self.ctrl.device_id(), "Config change not applied, relinking");
        self.unlink().await;
        self.device = self.factory.create();
        self.ctrl.set_config(config);
        self.link().await;
    }

    async fn unlink(&mut self) {
        self.device.process_unlink(&mut self.ctrl);
        self.flush().await;

        let orphaned = self.routes.write().await.remove_link(self.link);
        for topic in orphaned {
            if let Err(e) = self.transport.unsubscribe(&topic).await {
                warn!(device_id = self.ctrl.device_id(), "{e}");
            }
        }
    }

    async fn report_status(&mut self, status: &str) {
        if let Err(e) = self
            .transport
            .set_device_status(self.ctrl.device_id(), status)
            .await
        {
            warn!(device_id = self.ctrl.device_id(), "Failed to publish device status: {e}");
        }
    }

    /// Push the device's queued requests to the transport, in order.
    async fn flush(&mut self) {
        for action in self.ctrl.take_actions() {
            match action {
                Action::Subscribe { topic, tag } => {
                    let topic = self.ctrl.resolve(&topic);
                    let route = Route {
                        device_id: self.ctrl.device_id().to_string(),
                        link: self.link,
                        tag,
                    };
                    // Route first so nothing arriving right after the
                    // subscription is dropped.
                    let first = self.routes.write().await.insert(&topic, route);
                    if first {
                        if let Err(e) = self.transport.subscribe(&topic).await {
                            warn!(device_id = self.ctrl.device_id(), "{e}");
                        }
                    }
                }
                Action::Publish { topic, payload } => {
                    let topic = self.ctrl.resolve(&topic);
                    if let Err(e) = self.transport.publish(&topic, Bytes::from(payload)).await {
                        warn!(device_id = self.ctrl.device_id(), "{e}");
                    }
                }
            }
        }
    }
}

/// Device manager for hosting linked devices.
///
/// Every linked device runs on its own task, so callbacks for one device
/// never overlap while different devices proceed in parallel.
pub struct DeviceManager<T, F>
where
    T: Transport + 'static,
    F: DeviceFactory,
{
    transport: Arc<T>,
    factory: Arc<F>,
    routes: Arc<RwLock<RouteTable>>,
    devices: RwLock<HashMap<DeviceId, DeviceHandle>>,
}

impl<T, F> DeviceManager<T, F>
where
    T: Transport + 'static,
    F: DeviceFactory,
{
    /// Create a new device manager.
    #[must_use]
    pub fn new(transport: Arc<T>, factory: F) -> Self {
        Self {
            transport,
            factory: Arc::new(factory),
            routes: Arc::new(RwLock::new(RouteTable::new())),
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Transport the manager publishes through.
    #[must_use]
    pub const fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Apply a service event.
    ///
    /// # Errors
    /// Returns error if the device's task has died.
    pub async fn handle_event(&self, event: ServiceEvent) -> Result<(), HostError> {
        match event {
            ServiceEvent::Link(thing) | ServiceEvent::Update(thing) => self.link(thing).await,
            ServiceEvent::Unlink { id } => self.unlink(&id).await,
        }
    }

    /// Link a device, or apply its configuration as a change if it is
    /// already linked.
    ///
    /// Returns once the device has processed the link or change, so its
    /// subscriptions are in place.
    ///
    /// # Errors
    /// Returns error if the device's task has died.
    pub async fn link(&self, thing: Thing) -> Result<(), HostError> {
        let existing = self
            .devices
            .read()
            .await
            .get(&thing.id)
            .map(|h| h.tx.clone());

        match existing {
            Some(tx) => self.change_config(&thing.id, &tx, thing.config).await,
            None => {
                self.spawn_device(thing).await;
                Ok(())
            }
        }
    }

    async fn spawn_device(&self, thing: Thing) {
        info!(device_id = %thing.id, "Linking device");

        let link = Uuid::new_v4();
        let worker = DeviceWorker {
            link,
            device: self.factory.create(),
            ctrl: HostControl::new(&thing),
            transport: Arc::clone(&self.transport),
            routes: Arc::clone(&self.routes),
            factory: Arc::clone(&self.factory),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (linked_tx, linked_rx) = oneshot::channel();
        let task = tokio::spawn(worker.run(rx, linked_tx));

        let previous = self
            .devices
            .write()
            .await
            .insert(thing.id.clone(), DeviceHandle { link, tx, task });

        if let Some(previous) = previous {
            if let Err(e) = previous.stop().await {
                warn!(device_id = %thing.id, "{e}");
            }
        }

        let _ = linked_rx.await;
    }

    async fn change_config(
        &self,
        id: &str,
        tx: &mpsc::UnboundedSender<DeviceCommand>,
        config: DeviceConfig,
    ) -> Result<(), HostError> {
        debug!(device_id = id, "Updating device config");

        let (done_tx, done_rx) = oneshot::channel();
        tx.send(DeviceCommand::ConfigChange {
            config,
            done: done_tx,
        })
        .map_err(|_| HostError::NotLinked(id.to_string()))?;

        done_rx
            .await
            .map_err(|_| HostError::NotLinked(id.to_string()))
    }

    /// Unlink a device and wait for it to tear down.
    ///
    /// Unlinking a device that is not linked is a no-op.
    ///
    /// # Errors
    /// Returns error if the device's task panicked.
    pub async fn unlink(&self, id: &str) -> Result<(), HostError> {
        let handle = self.devices.write().await.remove(id);

        match handle {
            Some(handle) => {
                info!(device_id = id, "Unlinking device");
                handle.stop().await
            }
            None => {
                debug!(device_id = id, "Ignoring unlink for unknown device");
                Ok(())
            }
        }
    }

    /// Queue an inbound broker message for every device subscribed to it.
    ///
    /// Returns the number of deliveries queued.
    pub async fn dispatch(&self, topic: &str, payload: Bytes) -> usize {
        let routes = self.routes.read().await.lookup(topic).to_vec();
        if routes.is_empty() {
            debug!(topic, "No route for message");
            return 0;
        }

        let devices = self.devices.read().await;
        let mut delivered = 0;

        for route in routes {
            let Some(handle) = devices.get(&route.device_id) else {
                continue;
            };
            if handle.link != route.link {
                continue;
            }
            let msg = Message::new(topic, route.tag, payload.clone());
            if handle.tx.send(DeviceCommand::Message(msg)).is_ok() {
                delivered += 1;
            }
        }

        delivered
    }

    /// Identifiers of linked devices, sorted.
    pub async fn linked_devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.devices.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether a device is linked.
    pub async fn is_linked(&self, id: &str) -> bool {
        self.devices.read().await.contains_key(id)
    }

    /// Broker topics some device is subscribed to.
    pub async fn routed_topics(&self) -> Vec<String> {
        self.routes.read().await.topics()
    }

    /// Unlink every device and wait for all of them.
    pub async fn shutdown(&self) {
        let handles: Vec<(DeviceId, DeviceHandle)> =
            self.devices.write().await.drain().collect();

        let results = futures::future::join_all(
            handles
                .into_iter()
                .map(|(id, handle)| async move { (id, handle.stop().await) }),
        )
        .await;

        for (id, result) in results {
            if let Err(e) = result {
                warn!(device_id = %id, "{e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use math_diff_core::{
        DiffDevice, DiffOptions,
        topics::{INPUT_TOPICS_KEY, OUTPUT_TOPICS_KEY},
    };

    use super::*;
    use crate::transport::{MemoryBroker, Published};

    type TestManager = DeviceManager<MemoryBroker, fn() -> Box<dyn Device>>;

    fn diff_device() -> Box<dyn Device> {
        Box::new(DiffDevice::new(DiffOptions::default()))
    }

    fn manager() -> (Arc<MemoryBroker>, TestManager) {
        let broker = Arc::new(MemoryBroker::new());
        let manager = DeviceManager::new(
            Arc::clone(&broker),
            diff_device as fn() -> Box<dyn Device>,
        );
        (broker, manager)
    }

    fn thing(id: &str, inputs: &str) -> Thing {
        Thing::new(id, format!("dev/{id}")).with_config(INPUT_TOPICS_KEY, inputs)
    }

    async fn next(stream: &mut futures::stream::BoxStream<'static, Published>) -> Published {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timed out waiting for publish")
            .expect("stream closed")
    }

    #[tokio::test]
    async fn test_link_subscribes_and_reports_status() {
        let (broker, manager) = manager();

        manager.link(thing("d1", "a,b")).await.unwrap();

        assert!(manager.is_linked("d1").await);
        assert_eq!(
            broker.subscriptions(),
            vec![
                "dev/d1/transducer/a".to_string(),
                "dev/d1/transducer/b".to_string(),
            ]
        );
        assert_eq!(broker.device_status("d1").as_deref(), Some("Success"));
    }

    #[tokio::test]
    async fn test_dispatch_publishes_diffs_in_order() {
        let (broker, manager) = manager();
        let mut published = broker.published_stream();
        manager
            .link(thing("d1", "a").with_config(OUTPUT_TOPICS_KEY, "delta"))
            .await
            .unwrap();

        for v in ["1.5", "4", "3"] {
            assert_eq!(
                manager
                    .dispatch("dev/d1/transducer/a", Bytes::from(v))
                    .await,
                1
            );
        }

        let mut payloads = Vec::new();
        for _ in 0..3 {
            let msg = next(&mut published).await;
            assert_eq!(msg.topic, "dev/d1/transducer/delta");
            payloads.push(msg.payload_str().unwrap().to_string());
        }
        assert_eq!(payloads, ["1.5000000000", "2.5000000000", "-1.0000000000"]);
    }

    #[tokio::test]
    async fn test_devices_are_isolated() {
        let (broker, manager) = manager();
        let mut published = broker.published_stream();
        manager.link(thing("d1", "a")).await.unwrap();
        manager.link(thing("d2", "a")).await.unwrap();

        manager.dispatch("dev/d1/transducer/a", Bytes::from("10")).await;
        let first = next(&mut published).await;
        manager.dispatch("dev/d2/transducer/a", Bytes::from("3")).await;
        let second = next(&mut published).await;

        assert_eq!(first.topic, "dev/d1/transducer/a_diff");
        assert_eq!(first.payload_str(), Some("10.0000000000"));
        assert_eq!(second.topic, "dev/d2/transducer/a_diff");
        assert_eq!(second.payload_str(), Some("3.0000000000"));
    }

    #[tokio::test]
    async fn test_duplicate_input_topic_feeds_every_tag() {
        let (broker, manager) = manager();
        manager.link(thing("d1", "a,a")).await.unwrap();

        assert_eq!(broker.subscriptions(), vec!["dev/d1/transducer/a".to_string()]);
        assert_eq!(manager.dispatch("dev/d1/transducer/a", Bytes::from("2")).await, 2);
    }

    #[tokio::test]
    async fn test_unrouted_topic_is_dropped() {
        let (_broker, manager) = manager();
        manager.link(thing("d1", "a")).await.unwrap();

        assert_eq!(manager.dispatch("dev/d1/transducer/zzz", Bytes::from("1")).await, 0);
    }

    #[tokio::test]
    async fn test_unlink_is_idempotent_and_unsubscribes() {
        let (broker, manager) = manager();
        manager.link(thing("d1", "a")).await.unwrap();

        manager.unlink("d1").await.unwrap();
        manager.unlink("d1").await.unwrap();
        manager.unlink("never-linked").await.unwrap();

        assert!(!manager.is_linked("d1").await);
        assert!(broker.subscriptions().is_empty());
        assert!(manager.routed_topics().await.is_empty());
        assert_eq!(manager.dispatch("dev/d1/transducer/a", Bytes::from("1")).await, 0);
    }

    #[tokio::test]
    async fn test_unlink_keeps_topics_shared_with_other_devices() {
        let (broker, manager) = manager();
        manager
            .link(Thing::new("d1", "shared").with_config(INPUT_TOPICS_KEY, "a"))
            .await
            .unwrap();
        manager
            .link(Thing::new("d2", "shared").with_config(INPUT_TOPICS_KEY, "a"))
            .await
            .unwrap();

        manager.unlink("d1").await.unwrap();

        assert!(broker.is_subscribed("shared/transducer/a"));
        assert_eq!(manager.dispatch("shared/transducer/a", Bytes::from("1")).await, 1);
    }

    #[tokio::test]
    async fn test_config_change_relinks_with_new_topics() {
        let (broker, manager) = manager();
        let mut published = broker.published_stream();
        manager.link(thing("d1", "a")).await.unwrap();
        manager.dispatch("dev/d1/transducer/a", Bytes::from("5")).await;
        next(&mut published).await;

        manager
            .handle_event(ServiceEvent::Update(thing("d1", "b")))
            .await
            .unwrap();

        assert_eq!(broker.subscriptions(), vec!["dev/d1/transducer/b".to_string()]);
        assert_eq!(manager.dispatch("dev/d1/transducer/a", Bytes::from("6")).await, 0);

        // Fresh device, so the baseline starts over.
        manager.dispatch("dev/d1/transducer/b", Bytes::from("6")).await;
        let msg = next(&mut published).await;
        assert_eq!(msg.topic, "dev/d1/transducer/b_diff");
        assert_eq!(msg.payload_str(), Some("6.0000000000"));
    }

    #[tokio::test]
    async fn test_update_drops_removed_output_mapping() {
        let (broker, manager) = manager();
        let mut published = broker.published_stream();
        manager
            .link(thing("d1", "a").with_config(OUTPUT_TOPICS_KEY, "x"))
            .await
            .unwrap();

        manager
            .handle_event(ServiceEvent::Update(thing("d1", "a")))
            .await
            .unwrap();

        manager.dispatch("dev/d1/transducer/a", Bytes::from("1")).await;
        let msg = next(&mut published).await;
        assert_eq!(msg.topic, "dev/d1/transducer/a_diff");
    }

    #[test]
    fn test_config_delta_lists_changed_and_removed_keys() {
        let original: DeviceConfig = [("a", "1"), ("b", "2"), ("c", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config: DeviceConfig = [("a", "1"), ("b", "9"), ("d", "4")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut delta: Vec<_> = config_delta(&original, &config).into_iter().collect();
        delta.sort();
        assert_eq!(
            delta,
            vec![
                ("b".to_string(), "9".to_string()),
                ("c".to_string(), String::new()),
                ("d".to_string(), "4".to_string()),
            ]
        );
    }

    /// Accepts every config change and records what it was offered.
    struct AcceptingDevice {
        seen: Arc<std::sync::Mutex<Vec<(DeviceConfig, DeviceConfig)>>>,
    }

    impl Device for AcceptingDevice {
        fn process_link(&mut self, _ctrl: &mut dyn DeviceControl) -> String {
            "Linked".to_string()
        }

        fn process_unlink(&mut self, _ctrl: &mut dyn DeviceControl) {}

        fn process_config_change(
            &mut self,
            _ctrl: &mut dyn DeviceControl,
            changes: &DeviceConfig,
            original: &DeviceConfig,
        ) -> (String, bool) {
            self.seen
                .lock()
                .unwrap()
                .push((changes.clone(), original.clone()));
            ("Updated".to_string(), true)
        }

        fn process_message(&mut self, _ctrl: &mut dyn DeviceControl, _msg: &Message) {}
    }

    #[tokio::test]
    async fn test_applied_config_change_sees_delta_and_keeps_device() {
        let broker = Arc::new(MemoryBroker::new());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let factory_seen = Arc::clone(&seen);
        let manager = DeviceManager::new(Arc::clone(&broker), move || -> Box<dyn Device> {
            Box::new(AcceptingDevice {
                seen: Arc::clone(&factory_seen),
            })
        });

        manager
            .link(thing("d1", "a").with_config(OUTPUT_TOPICS_KEY, "x"))
            .await
            .unwrap();
        manager.link(thing("d1", "b")).await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        let (changes, original) = &seen[0];
        assert_eq!(changes.get(INPUT_TOPICS_KEY).map(String::as_str), Some("b"));
        assert_eq!(changes.get(OUTPUT_TOPICS_KEY).map(String::as_str), Some(""));
        assert_eq!(changes.len(), 2);
        assert_eq!(original.get(INPUT_TOPICS_KEY).map(String::as_str), Some("a"));
        assert_eq!(broker.device_status("d1").as_deref(), Some("Updated"));
    }

    #[tokio::test]
    async fn test_relink_event_is_treated_as_update() {
        let (broker, manager) = manager();
        manager
            .handle_event(ServiceEvent::Link(thing("d1", "a")))
            .await
            .unwrap();
        manager
            .handle_event(ServiceEvent::Link(thing("d1", "c")))
            .await
            .unwrap();

        assert_eq!(manager.linked_devices().await, vec!["d1".to_string()]);
        assert_eq!(broker.subscriptions(), vec!["dev/d1/transducer/c".to_string()]);
    }

    #[tokio::test]
    async fn test_update_for_unknown_device_links_it() {
        let (_broker, manager) = manager();
        manager
            .handle_event(ServiceEvent::Update(thing("d9", "a")))
            .await
            .unwrap();
        assert!(manager.is_linked("d9").await);
    }

    #[tokio::test]
    async fn test_shutdown_unlinks_everything() {
        let (broker, manager) = manager();
        manager.link(thing("d1", "a")).await.unwrap();
        manager.link(thing("d2", "b")).await.unwrap();

        manager.shutdown().await;

        assert!(manager.linked_devices().await.is_empty());
        assert!(broker.subscriptions().is_empty());
    }
}
