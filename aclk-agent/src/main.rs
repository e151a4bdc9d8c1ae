//! ACLK Agent - agent side of the agent-to-cloud link
//!
//! - Identifies the host (configured guid, MAC address or a generated one)
//! - Connects to the MQTT broker and greets the cloud with its version range
//! - Feeds cloud queries to the query worker pool
//! - Answers `/api/v1/` queries from local system data

mod config;
mod discovery;
mod metrics;
mod mqtt;
mod rx;

use aclk_query::{
    AclkQuery, Collaborators, HeaderBuilder, Host, HostRegistry, MetadataState, SessionHeader, Transport,
};
use anyhow::{Context, Result};
use chrono::Utc;
use config::AgentConfig;
use discovery::SystemInfo;
use metrics::{SysinfoEngine, SysinfoMetadata};
use mqtt::MqttTransport;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const HELLO_TOPIC: &str = "hello";
const STATS_INTERVAL: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Main agent state
struct Agent {
    config: AgentConfig,
    query: AclkQuery,
    transport: Arc<MqttTransport>,
    header: Arc<SessionHeader>,
    client: AsyncClient,
    connected_once: bool,
}

impl Agent {
    fn new(config: AgentConfig, system: SystemInfo) -> Result<(Self, rumqttc::EventLoop)> {
        let localhost = Host::new(system.hostname.clone(), system.machine_guid.clone());
        let hosts = Arc::new(HostRegistry::new(localhost));

        let client_id = config
            .mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("aclk-agent-{}", system.machine_guid));
        let mut mqtt_options = MqttOptions::new(client_id, &config.mqtt.broker_host, config.mqtt.broker_port);
        mqtt_options.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs.into()));
        mqtt_options.set_clean_session(true);
        mqtt_options.set_max_packet_size(4 * 1024 * 1024, 4 * 1024 * 1024);

        let (client, eventloop) = AsyncClient::new(mqtt_options, 64);
        let transport = Arc::new(MqttTransport::new(client.clone(), &config.mqtt.outbound_prefix));
        let header = Arc::new(SessionHeader::new(Utc::now()));

        let collaborators = Collaborators {
            transport: transport.clone(),
            engine: Arc::new(SysinfoEngine::new(system.clone())),
            metadata: Arc::new(SysinfoMetadata::new(system)),
            header: header.clone(),
        };
        let query = AclkQuery::new(config.aclk.clone(), hosts, collaborators);
        query
            .start(config.aclk.query_threads)
            .context("Failed to start query threads")?;

        Ok((
            Agent {
                config,
                query,
                transport,
                header,
                client,
                connected_once: false,
            },
            eventloop,
        ))
    }

    async fn run(&mut self, mut eventloop: rumqttc::EventLoop) -> Result<()> {
        info!(
            "Connecting to {}:{}",
            self.config.mqtt.broker_host, self.config.mqtt.broker_port
        );
        let mut stats_timer = interval(STATS_INTERVAL);

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        if let Err(e) = self.on_connected().await {
                            error!("Failed to set up the link: {:#}", e);
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        if publish.topic == self.config.mqtt.inbound_topic {
                            rx::handle(&publish.payload, self.transport.rx_version(), &self.query);
                        } else {
                            debug!("Ignoring message on {}", publish.topic);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        self.query.set_connected(false);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                },

                _ = stats_timer.tick(), if self.config.aclk.stats_enabled => {
                    let sample = self.query.stats().take_sample();
                    match serde_json::to_string(&sample) {
                        Ok(json) => info!("ACLK query stats: {}", json),
                        Err(e) => warn!("Failed to serialize query stats: {}", e),
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.query.stop();
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect failed: {}", e);
        }
        Ok(())
    }

    async fn on_connected(&mut self) -> Result<()> {
        info!("Connected to MQTT broker");
        let localhost = self.query.hosts().localhost().clone();
        if self.connected_once {
            // New session, the cloud needs the full picture again
            localhost.transition_metadata(MetadataState::Sent, MetadataState::Required);
        }
        self.connected_once = true;

        self.client
            .subscribe(&self.config.mqtt.inbound_topic, QoS::AtLeastOnce)
            .await
            .context("Failed to subscribe to inbound topic")?;
        info!("Subscribed to cloud messages on: {}", self.config.mqtt.inbound_topic);

        self.query.negotiation().rearm_at(Instant::now());
        self.send_hello().context("Failed to send hello")?;
        self.query.set_connected(true);
        Ok(())
    }

    fn send_hello(&self) -> Result<()> {
        let negotiation = self.query.negotiation();
        let mut message = self.header.build("hello", None, negotiation.version_or_min())?;
        message.push_str(&format!(
            ",\"min-version\":{},\"max-version\":{}}}",
            self.config.aclk.min_version, self.config.aclk.max_version
        ));
        self.transport.send(HELLO_TOPIC, &message, None)?;
        debug!("Hello sent: {}", message);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("aclk_agent=info,aclk_query=info,access=info")),
        )
        .init();

    info!("ACLK agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = AgentConfig::load().await.context("Failed to load configuration")?;
    let system = SystemInfo::discover(&config.agent.hostname, config.agent.machine_guid.as_deref());

    if config.agent.machine_guid.is_none() {
        // Keep the guid stable across restarts
        config.agent.machine_guid = Some(system.machine_guid.clone());
        if let Err(e) = config.save().await {
            warn!("Could not persist machine guid: {:#}", e);
        }
    }

    let (mut agent, eventloop) = Agent::new(config, system).context("Failed to create agent")?;
    agent.run(eventloop).await.context("Agent execution failed")?;

    info!("ACLK agent stopped");
    Ok(())
}
