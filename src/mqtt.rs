// mqtt.rs

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    mpsc, Arc,
};
use std::time::Duration;

use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};
use log::*;

use crate::*;

const CONNECT_POLL_MS: u32 = 100;

pub struct MqttSession {
    url: String,
    connect_timeout_ms: u64,
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU32>,
    inbox_tx: mpsc::Sender<InboundMessage>,
    inbox: mpsc::Receiver<InboundMessage>,
}

impl MqttSession {
    pub fn new(config: &MyConfig) -> Self {
        let (inbox_tx, inbox) = mpsc::channel();
        Self {
            url: config.mqtt_url.clone(),
            connect_timeout_ms: config.session_connect_timeout_ms,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU32::new(0)),
            inbox_tx,
            inbox,
        }
    }

    fn start_client(&mut self, client_id: &str) -> Result<(), SessionError> {
        let connected = self.connected.clone();
        let generation = self.generation.clone();
        let inbox = self.inbox_tx.clone();

        let client = EspMqttClient::new_cb(
            &self.url,
            &MqttClientConfiguration {
                client_id: Some(client_id),
                keep_alive_interval: Some(Duration::from_secs(25)),
                ..Default::default()
            },
            move |event| match event.payload() {
                EventPayload::Connected(_) => {
                    // also seen on reconnects the client does by itself
                    generation.fetch_add(1, Ordering::Relaxed);
                    connected.store(true, Ordering::Relaxed);
                }
                EventPayload::Disconnected => {
                    connected.store(false, Ordering::Relaxed);
                    warn!("MQTT disconnected.");
                }
                EventPayload::Received { topic, data, .. } => {
                    // the receiver lives as long as the session
                    inbox
                        .send(InboundMessage {
                            topic: topic.unwrap_or_default().to_string(),
                            payload: data.to_vec(),
                        })
                        .ok();
                }
                EventPayload::Error(e) => error!("MQTT error: {e:?}"),
                _ => {}
            },
        )
        .map_err(|e| SessionError::Refused(format!("{e:?}")))?;

        self.client = Some(client);
        Ok(())
    }
}

impl MessageSession for MqttSession {
    fn connect(&mut self, client_id: &str) -> Result<(), SessionError> {
        if self.client.is_none() {
            self.start_client(client_id)?;
        }

        // the client connects in its own task, wait for the event
        let mut waited = 0u64;
        while !self.connected.load(Ordering::Relaxed) {
            if waited >= self.connect_timeout_ms {
                return Err(SessionError::Timeout);
            }
            FreeRtos::delay_ms(CONNECT_POLL_MS);
            waited += u64::from(CONNECT_POLL_MS);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::Relaxed)
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| SessionError::Subscribe {
                topic: topic.into(),
                reason: format!("{e:?}"),
            })?;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        let client = self.client.as_mut().ok_or(SessionError::NotConnected)?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| SessionError::Publish {
                topic: topic.into(),
                reason: format!("{e:?}"),
            })?;
        Ok(())
    }

    fn poll(&mut self) -> Option<InboundMessage> {
        self.inbox.try_recv().ok()
    }

    fn connection_generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }
}

// EOF
