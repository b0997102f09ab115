//! MQTT publish sink.
//!
//! Publishes one wire-encoded image message per dispatched frame on a fixed
//! topic. The connection is driven by a background thread; `consume` itself
//! never blocks on the network. When the outbound queue is full (stalled
//! broker or link), the frame is dropped and reported as a skipped cycle;
//! a stalled transport must not stall acquisition.

use anyhow::{Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use std::time::Duration;

use super::{wire, Sink};
use crate::config::PublishSettings;
use crate::frame::Frame;

/// Outbound request queue depth shared with the driver thread.
const OUTBOUND_QUEUE: usize = 10;

pub struct PublishSink {
    client: Client,
    topic: String,
    frame_id: String,
    published: u64,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl PublishSink {
    /// Connect to the broker and start the connection-driver thread.
    pub fn connect(settings: &PublishSettings) -> Result<Self> {
        let client_id = format!("color-relay-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, &settings.mqtt_host, settings.mqtt_port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);

        let (client, connection) = Client::new(options, OUTBOUND_QUEUE);
        let handle = spawn_connection_driver(connection);
        log::info!(
            "publishing {} to mqtt://{}:{}",
            settings.topic,
            settings.mqtt_host,
            settings.mqtt_port
        );

        Ok(Self {
            client,
            topic: settings.topic.clone(),
            frame_id: settings.frame_id.clone(),
            published: 0,
            connection_handle: Some(handle),
        })
    }

    /// Frames handed to the broker queue so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Flush and tear down the broker connection.
    pub fn disconnect(mut self) -> Result<()> {
        self.client.disconnect().context("mqtt disconnect")?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Sink for PublishSink {
    fn consume(&mut self, frame: &Frame) -> Result<()> {
        let payload = wire::encode(frame, &self.frame_id)?;
        // try_publish drops the frame instead of blocking when the driver
        // thread has fallen behind; the dispatch loop logs the skipped cycle.
        self.client
            .try_publish(self.topic.as_str(), QoS::AtMostOnce, false, payload)
            .context("mqtt outbound queue full")?;
        self.published += 1;
        Ok(())
    }
}

fn spawn_connection_driver(mut connection: Connection) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("mqtt connection error: {}", e);
                    break;
                }
            }
        }
    })
}
