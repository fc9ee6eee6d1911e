//! Service client: broker connection, event routing and device hosting.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use math_diff_core::DeviceFactory;
use math_diff_host::{DeviceManager, Transport};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    BrokerUrl, FrameworkClient, MqttTransport, ServiceError,
    protocol::{NewsMessage, ServiceTopics, StatusMessage},
};

/// Status published by the broker if the service drops off unexpectedly.
pub const DISCONNECT_STATUS: &str = "Unexpected disconnect!";

/// Status published on every device event when running status is enabled.
pub const RUNNING_STATUS: &str = "Running";

/// Capacity of the request queue between the client handle and event loop.
const REQUEST_CAPACITY: usize = 64;

/// Connection settings for [`ServiceClient`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Framework REST endpoint.
    pub framework_server: String,
    /// Broker address.
    pub broker: BrokerUrl,
    /// Service identifier, also the broker username.
    pub service_id: String,
    /// Service secret, also the broker password.
    pub service_token: String,
    /// Publish a running status on every device event.
    pub running_status: bool,
}

/// Something the event loop received that the router must act on.
#[derive(Debug)]
enum Inbound {
    Connected,
    Publish { topic: String, payload: Bytes },
}

/// Managed service client.
///
/// Owns the broker connection and a `DeviceManager`; devices are linked,
/// updated and unlinked as the framework announces them.
pub struct ServiceClient<F: DeviceFactory> {
    transport: Arc<MqttTransport>,
    manager: Arc<DeviceManager<MqttTransport, F>>,
    event_loop: JoinHandle<()>,
    router: JoinHandle<()>,
}

impl<F: DeviceFactory> ServiceClient<F> {
    /// Connect to the broker and link the devices already assigned to the
    /// service.
    ///
    /// # Errors
    /// Returns error if the framework cannot be queried or a device fails
    /// to link.
    pub async fn start(options: ServiceOptions, factory: F) -> Result<Self, ServiceError> {
        let topics = ServiceTopics::new(&options.service_id);

        let mut mqtt_opts = MqttOptions::new(
            format!("{}-{}", options.service_id, Uuid::new_v4().simple()),
            options.broker.host.clone(),
            options.broker.port,
        );
        mqtt_opts.set_keep_alive(Duration::from_secs(30));
        mqtt_opts.set_credentials(options.service_id.clone(), options.service_token.clone());
        if options.broker.secure {
            mqtt_opts.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let will = serde_json::to_vec(&StatusMessage {
            message: DISCONNECT_STATUS.to_string(),
        })?;
        mqtt_opts.set_last_will(LastWill::new(&topics.status, will, QoS::AtLeastOnce, false));

        info!(
            "Connecting to {}:{} as {}",
            options.broker.host, options.broker.port, options.service_id
        );
        let (client, event_loop) = AsyncClient::new(mqtt_opts, REQUEST_CAPACITY);

        let transport = Arc::new(MqttTransport::new(client, topics));
        let manager = Arc::new(DeviceManager::new(Arc::clone(&transport), factory));

        let (tx, rx) = mpsc::unbounded_channel();
        let event_loop = spawn_event_loop(event_loop, tx);
        let router = tokio::spawn(route_inbound(
            rx,
            Arc::clone(&manager),
            options.running_status,
        ));

        let service = Self {
            transport,
            manager,
            event_loop,
            router,
        };

        if let Err(e) = service.link_existing(&options).await {
            service.event_loop.abort();
            service.router.abort();
            return Err(e);
        }

        Ok(service)
    }

    async fn link_existing(&self, options: &ServiceOptions) -> Result<(), ServiceError> {
        let framework = FrameworkClient::new(
            &options.framework_server,
            options.service_id.clone(),
            options.service_token.clone(),
        )?;

        let things = framework.fetch_things().await?;
        info!("Linking {} existing device(s)", things.len());

        for thing in things {
            self.manager.link(thing).await?;
        }

        Ok(())
    }

    /// Publish the service status.
    ///
    /// # Errors
    /// Returns error if the status cannot be queued for the broker.
    pub async fn set_status(&self, message: &str) -> Result<(), ServiceError> {
        Ok(self.transport.set_service_status(message).await?)
    }

    /// Device manager hosting the service's devices.
    #[must_use]
    pub const fn manager(&self) -> &Arc<DeviceManager<MqttTransport, F>> {
        &self.manager
    }

    /// Unlink every device and disconnect from the broker.
    pub async fn stop(mut self) {
        self.router.abort();
        self.manager.shutdown().await;

        if let Err(e) = self.transport.disconnect().await {
            warn!("Failed to disconnect cleanly: {e}");
        }
        if tokio::time::timeout(Duration::from_secs(2), &mut self.event_loop)
            .await
            .is_err()
        {
            self.event_loop.abort();
        }
    }
}

/// Drive the `rumqttc` event loop, handing inbound traffic to the router.
///
/// The loop must keep polling for the client to make progress, so routing
/// happens on a separate task.
fn spawn_event_loop(mut event_loop: EventLoop, tx: mpsc::UnboundedSender<Inbound>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("MQTT event loop started");

        loop {
            let inbound = match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to broker");
                    Inbound::Connected
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => Inbound::Publish {
                    topic: publish.topic,
                    payload: publish.payload,
                },
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("MQTT event loop stopping");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("MQTT event loop error: {e}");
                    // Wait before reconnecting
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            if tx.send(inbound).is_err() {
                break;
            }
        }
    })
}

async fn route_inbound<F: DeviceFactory>(
    mut rx: mpsc::UnboundedReceiver<Inbound>,
    manager: Arc<DeviceManager<MqttTransport, F>>,
    running_status: bool,
) {
    while let Some(inbound) = rx.recv().await {
        match inbound {
            Inbound::Connected => resubscribe(&manager).await,
            Inbound::Publish { topic, payload } if topic == manager.transport().topics().news => {
                handle_news(&manager, &payload, running_status).await;
            }
            Inbound::Publish { topic, payload } => {
                manager.dispatch(&topic, payload).await;
            }
        }
    }
}

/// Restore subscriptions after a (re)connect.
async fn resubscribe<F: DeviceFactory>(manager: &DeviceManager<MqttTransport, F>) {
    let transport = manager.transport();
    if let Err(e) = transport.subscribe_news().await {
        error!("Failed to subscribe to service news: {e}");
    }
    for topic in manager.routed_topics().await {
        if let Err(e) = transport.subscribe(&topic).await {
            warn!("{e}");
        }
    }
}

async fn handle_news<F: DeviceFactory>(
    manager: &DeviceManager<MqttTransport, F>,
    payload: &[u8],
    running_status: bool,
) {
    let event = match NewsMessage::decode(payload) {
        Ok(news) => news.into_event(),
        Err(e) => {
            warn!("Ignoring service news: {e}");
            return;
        }
    };

    debug!(device_id = event.device_id(), "Service news: {event:?}");
    if let Err(e) = manager.handle_event(event).await {
        warn!("{e}");
    }

    if running_status {
        if let Err(e) = manager.transport().set_service_status(RUNNING_STATUS).await {
            error!("Failed to publish service status: {e}");
        }
    }
}
