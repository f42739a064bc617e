// connectivity.rs

use std::{fmt, net::Ipv4Addr};

use embedded_hal::delay::DelayNs;
use log::*;
use thiserror::Error;

use crate::{measure::settle, *};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    LinkUp,
    SessionUp,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("invalid credentials: {0}")]
    Credentials(&'static str),
    #[error("WiFi driver error: {0}")]
    Driver(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("MQTT connection refused: {0}")]
    Refused(String),
    #[error("MQTT connection timed out")]
    Timeout,
    #[error("MQTT not connected")]
    NotConnected,
    #[error("MQTT subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },
    #[error("MQTT publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("{what} still down after {attempts} attempts")]
    RetriesExhausted { what: &'static str, attempts: u32 },
    #[error("cannot publish while {0:?}")]
    NotReady(ConnectivityState),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Network link driver (WiFi station).
pub trait NetworkLink {
    fn connect(&mut self, ssid: &str, password: &str) -> Result<(), LinkError>;
    fn is_connected(&self) -> bool;
    /// `0.0.0.0` while no address is assigned.
    fn local_address(&self) -> Ipv4Addr;
    fn hardware_address(&self) -> MacAddress;
}

/// What a WiFi station driver still has to do before it can wait for
/// its address. Credentials are applied once, when the driver starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkSteps {
    pub configure: bool,
    pub associate: bool,
}

impl LinkSteps {
    pub fn plan(started: bool, associated: bool) -> Self {
        Self {
            configure: !started,
            associate: !associated,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe client. Inbound messages are queued by the client
/// and handed out one by one through `poll()`.
pub trait MessageSession {
    fn connect(&mut self, client_id: &str) -> Result<(), SessionError>;
    fn is_connected(&self) -> bool;
    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError>;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError>;
    fn poll(&mut self) -> Option<InboundMessage>;
    /// Bumped on every broker connection, including the ones the client
    /// makes on its own. Subscriptions do not survive a change.
    fn connection_generation(&self) -> u32;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    On,
    Off,
}

impl Command {
    /// Exact match only, no trimming or case folding.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            b"on" => Some(Command::On),
            b"off" => Some(Command::Off),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::On => f.write_str("on"),
            Command::Off => f.write_str("off"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectivitySettings {
    pub ssid: String,
    pub password: String,
    pub client_id: String,
    pub control_topic: String,
    pub link_retry: RetryPolicy,
    pub session_retry: RetryPolicy,
}

impl From<&MyConfig> for ConnectivitySettings {
    fn from(c: &MyConfig) -> Self {
        Self {
            ssid: c.wifi_ssid.clone(),
            password: c.wifi_pass.clone(),
            client_id: c.mqtt_client_id.clone(),
            control_topic: c.control_topic.clone(),
            link_retry: c.link_retry,
            session_retry: c.session_retry,
        }
    }
}

pub struct ConnectivityManager<L, S, D> {
    link: L,
    session: S,
    delay: D,
    settings: ConnectivitySettings,
    state: ConnectivityState,
    subscribed_generation: Option<u32>,
    last_command: Option<Command>,
}

impl<L, S, D> ConnectivityManager<L, S, D>
where
    L: NetworkLink,
    S: MessageSession,
    D: DelayNs,
{
    pub fn new(link: L, session: S, delay: D, settings: ConnectivitySettings) -> Self {
        Self {
            link,
            session,
            delay,
            settings,
            state: ConnectivityState::Disconnected,
            subscribed_generation: None,
            last_command: None,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn last_command(&self) -> Option<Command> {
        self.last_command
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn local_address(&self) -> Ipv4Addr {
        self.link.local_address()
    }

    pub fn hardware_address(&self) -> MacAddress {
        self.link.hardware_address()
    }

    pub fn client_id(&self) -> String {
        if self.settings.client_id.is_empty() {
            format!("{}-{}", env!("CARGO_PKG_NAME"), self.link.hardware_address())
        } else {
            self.settings.client_id.clone()
        }
    }

    /// Re-read link and session status from the drivers.
    pub fn refresh(&mut self) -> ConnectivityState {
        let new_state = if !self.link.is_connected() {
            ConnectivityState::Disconnected
        } else if !self.session.is_connected() {
            ConnectivityState::LinkUp
        } else {
            ConnectivityState::SessionUp
        };
        if new_state != self.state {
            info!("Connectivity {:?} -> {:?}", self.state, new_state);
            self.state = new_state;
        }
        new_state
    }

    pub fn link_is_up(&mut self) -> bool {
        self.refresh() != ConnectivityState::Disconnected
    }

    pub fn session_is_up(&mut self) -> bool {
        self.refresh() == ConnectivityState::SessionUp
    }

    /// Block until the link is up. Retries forever unless the link
    /// retry policy carries a ceiling.
    pub fn ensure_link(&mut self) -> Result<(), ConnectivityError> {
        if self.link_is_up() {
            return Ok(());
        }

        let policy = self.settings.link_retry;
        info!("WiFi connecting to {}", self.settings.ssid);
        let mut attempts = 0u32;
        loop {
            if let Err(e) = self.link.connect(&self.settings.ssid, &self.settings.password) {
                warn!("WiFi connect: {e}");
            }
            if self.link.is_connected() {
                break;
            }

            attempts += 1;
            if policy.exhausted(attempts) {
                error!("WiFi gave up after {attempts} attempts");
                return Err(ConnectivityError::RetriesExhausted {
                    what: "link",
                    attempts,
                });
            }
            info!("WiFi waiting for association... ({attempts})");
            settle(&mut self.delay, policy.interval_ms);
        }

        info!(
            "WiFi connected, IP address: {ip}, MAC: {mac}",
            ip = self.link.local_address(),
            mac = self.link.hardware_address()
        );
        self.refresh();
        Ok(())
    }

    /// Block until the messaging session is up and subscribed to the
    /// control topic. Every attempt checks the link first.
    pub fn ensure_session(&mut self) -> Result<(), ConnectivityError> {
        if self.session_is_up() {
            return Ok(());
        }

        let policy = self.settings.session_retry;
        let mut attempts = 0u32;
        loop {
            self.ensure_link()?;

            let client_id = self.client_id();
            info!("MQTT connecting as {client_id}...");
            match self.try_session(&client_id) {
                Ok(()) => break,
                Err(e) => warn!(
                    "MQTT connection failed: {e}, try again in {} ms",
                    policy.interval_ms
                ),
            }

            attempts += 1;
            if policy.exhausted(attempts) {
                error!("MQTT gave up after {attempts} attempts");
                return Err(ConnectivityError::RetriesExhausted {
                    what: "session",
                    attempts,
                });
            }
            settle(&mut self.delay, policy.interval_ms);
        }

        self.refresh();
        Ok(())
    }

    fn try_session(&mut self, client_id: &str) -> Result<(), SessionError> {
        self.session.connect(client_id)?;
        if !self.session.is_connected() {
            return Err(SessionError::NotConnected);
        }
        info!("MQTT connected.");
        let generation = self.session.connection_generation();
        self.session.subscribe(&self.settings.control_topic)?;
        self.subscribed_generation = Some(generation);
        info!("MQTT subscribed to {}", self.settings.control_topic);
        Ok(())
    }

    /// Subscribe again if the client reconnected since the last
    /// subscription without the session ever being seen down.
    fn renew_subscription(&mut self) {
        let generation = self.session.connection_generation();
        if self.subscribed_generation == Some(generation) {
            return;
        }
        info!(
            "MQTT reconnected, renewing subscription to {}",
            self.settings.control_topic
        );
        match self.session.subscribe(&self.settings.control_topic) {
            Ok(()) => self.subscribed_generation = Some(generation),
            Err(e) => warn!("MQTT resubscribe failed: {e}"),
        }
    }

    /// Drain whatever the session queued since the last call.
    /// Never blocks.
    pub fn pump_session(&mut self) -> Vec<Command> {
        if self.refresh() == ConnectivityState::SessionUp {
            self.renew_subscription();
        }
        let mut commands = Vec::new();
        while let Some(msg) = self.session.poll() {
            if let Some(cmd) = self.handle_inbound(&msg) {
                commands.push(cmd);
            }
        }
        commands
    }

    fn handle_inbound(&mut self, msg: &InboundMessage) -> Option<Command> {
        let text = String::from_utf8_lossy(&msg.payload);
        info!(
            "MQTT message arrived on topic: {topic}. Message: {text}",
            topic = msg.topic
        );

        if msg.topic != self.settings.control_topic {
            return None;
        }
        match Command::parse(&msg.payload) {
            Some(cmd) => {
                // no output is wired yet, remember it only
                info!("Changing output to {cmd}");
                self.last_command = Some(cmd);
                Some(cmd)
            }
            None => {
                warn!("Ignoring unrecognized command {text:?}");
                None
            }
        }
    }

    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ConnectivityError> {
        let state = self.refresh();
        if state != ConnectivityState::SessionUp {
            return Err(ConnectivityError::NotReady(state));
        }
        Ok(self.session.publish(topic, payload)?)
    }
}


// EOF
