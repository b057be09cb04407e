// MQTT intake adapter
//
// Manual acks tie the broker's at-least-once guarantee to the durable
// queue: a delivery is acked only after its sample is enqueued (or judged
// invalid). An unacked delivery redelivers when the session resumes.

use std::time::Duration;

use chargestream_config::BrokerConfig;
use chargestream_core::Stream;
use chargestream_queue::{backoff_delay, DurableQueue};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Publish, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::topic::{classify, parse_broker_url, Delivery};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const RECONNECT_BACKOFF_BASE: Duration = Duration::from_secs(1);

pub struct IntakeAdapter {
    config: BrokerConfig,
    queue: DurableQueue,
}

impl IntakeAdapter {
    pub fn new(config: BrokerConfig, queue: DurableQueue) -> Self {
        Self { config, queue }
    }

    /// Run until cancelled. Reconnects with bounded backoff on broker errors;
    /// deliveries arriving during an outage are redelivered by the broker.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let (host, port) = parse_broker_url(&self.config.url)?;

        let mut options = MqttOptions::new(self.config.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        options.set_clean_session(false);
        options.set_manual_acks(true);

        let (client, mut eventloop) = AsyncClient::new(options, EVENT_CHANNEL_CAPACITY);
        let reconnect_cap = Duration::from_secs(self.config.reconnect_max_backoff_secs);
        let mut reconnect_failures: u32 = 0;

        info!(broker = %self.config.url, "Intake adapter started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Intake adapter stopping; unacked deliveries will redeliver");
                    break;
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        reconnect_failures = 0;
                        info!("Connected to broker; subscribing to telemetry topics");
                        for stream in [Stream::Meter, Stream::Vehicle] {
                            if let Err(e) =
                                client.subscribe(stream.topic_filter(), QoS::AtLeastOnce).await
                            {
                                error!(filter = stream.topic_filter(), error = %e, "Subscribe failed");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.handle_publish(&client, publish).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        reconnect_failures += 1;
                        let delay =
                            backoff_delay(reconnect_failures, RECONNECT_BACKOFF_BASE, reconnect_cap);
                        warn!(
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "Broker connection error; reconnecting"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_publish(&self, client: &AsyncClient, publish: Publish) {
        match classify(&publish.topic, &publish.payload) {
            Delivery::Accepted(sample) => match self.queue.enqueue(&sample).await {
                Ok(_) => {
                    metrics::counter!(
                        "telemetry.accepted",
                        1,
                        "stream" => sample.stream().as_str()
                    );
                    self.ack(client, &publish).await;
                }
                Err(e) => {
                    // No ack: the broker redelivers once the queue is back
                    metrics::counter!("telemetry.enqueue_failures", 1);
                    warn!(
                        topic = %publish.topic,
                        error = %e,
                        "Enqueue failed; leaving delivery unacked"
                    );
                }
            },
            Delivery::Rejected { label, detail } => {
                metrics::counter!("telemetry.dropped_invalid", 1, "reason" => label);
                warn!(topic = %publish.topic, reason = label, detail, "Dropped invalid delivery");
                self.ack(client, &publish).await;
            }
        }
    }

    async fn ack(&self, client: &AsyncClient, publish: &Publish) {
        if let Err(e) = client.ack(publish).await {
            warn!(topic = %publish.topic, error = %e, "Failed to ack delivery");
        }
    }
}
