pub mod engine;
pub mod partial_reliable;
pub mod policy;
pub mod reliable;

use crate::buffers::fifo_buffer::FifoBuffer;
use crate::channel::engine::ArqEngine;
use crate::channel::policy::policy_for;
use crate::channel_info::ChannelInfo;
use crate::config::ChannelConfig;
use crate::connection::Connection;
use crate::error::ArqError;
use crate::host::Host;
use crate::message::{Message, MessageFlags};
use crate::send_pipeline::SendPipeline;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug)]
enum ChannelCommand {
    Process(Message),
    ForcedAck(u32),
    ForcedReceive(Message),
    SendAck,
    SendPing(Message),
    SetRetransmitInterval(Duration),
    Stop,
}

enum ChannelState {
    /// created but not started yet
    Idle(Box<ArqEngine>),
    Active {
        commands: mpsc::UnboundedSender<ChannelCommand>,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// The handle to a channel: one per peer and reliability class.
///
/// All protocol state lives in an [ArqEngine] that is owned by a dedicated task once the channel
///  is started. The handle talks to that task through a command queue, and user messages go
///  through the outbound FIFO which the task polls at the configured interval. This serializes
///  every state transition without any locking of protocol state.
///
/// Lifecycle: `new` -> `start` -> `stop`. A stopped channel can not be restarted.
pub struct ChannelHandler {
    connection: Connection,
    config: ChannelConfig,
    outbound: Arc<FifoBuffer<Message>>,
    state: Mutex<ChannelState>,
    channel_info: Mutex<Option<ChannelInfo>>,
}

impl Drop for ChannelHandler {
    fn drop(&mut self) {
        if let Ok(state) = self.state.lock() {
            if let ChannelState::Active { handle, .. } = &*state {
                handle.abort();
            }
        }
    }
}

impl ChannelHandler {
    pub fn new(
        config: ChannelConfig,
        connection: Connection,
        initial_sequence: u32,
        initial_ack: u32,
        send_pipeline: Arc<SendPipeline>,
        host: Arc<dyn Host>,
    ) -> ChannelHandler {
        let engine = ArqEngine::new(
            &config,
            connection,
            initial_sequence,
            initial_ack,
            policy_for(&config),
            send_pipeline,
            host,
        );

        ChannelHandler {
            connection,
            config,
            outbound: Default::default(),
            state: Mutex::new(ChannelState::Idle(Box::new(engine))),
            channel_info: Default::default(),
        }
    }

    pub fn connection(&self) -> Connection {
        self.connection
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Spawns the channel's task. This must be called from inside a tokio runtime. Returns false
    ///  if the channel was started before.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match std::mem::replace(&mut *state, ChannelState::Stopped) {
            ChannelState::Idle(engine) => {
                info!("starting channel to {} ({:?})", self.connection, self.config.reliability);
                let (commands, receiver) = mpsc::unbounded_channel();
                let handle = tokio::spawn(Self::do_loop(*engine, self.outbound.clone(), receiver, self.config.poll_interval));
                *state = ChannelState::Active { commands, handle };
                true
            }
            other => {
                warn!("channel to {} was already started", self.connection);
                *state = other;
                false
            }
        }
    }

    /// Stops the channel's task, discarding all buffered messages. Messages in flight are
    ///  abandoned.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        if let ChannelState::Active { commands, .. } = &*state {
            info!("stopping channel to {}", self.connection);
            // the task may be gone already after an unrecoverable error
            let _ = commands.send(ChannelCommand::Stop);
        }
        *state = ChannelState::Stopped;
        self.outbound.clear();
    }

    pub fn is_active(&self) -> bool {
        match &*self.state.lock().unwrap() {
            ChannelState::Active { commands, .. } => !commands.is_closed(),
            _ => false,
        }
    }

    /// Queues a user message for sending. The message is sequenced and transmitted (or parked if
    ///  the send window is full) by the channel's task.
    pub fn send(&self, message_type: u16, payload: Vec<u8>, init: bool, end: bool) -> Result<(), ArqError> {
        let mut flags = MessageFlags::empty();
        flags.set(MessageFlags::INIT, init);
        flags.set(MessageFlags::END, end);

        let message = Message::new(message_type, flags, payload)
            .inspect_err(|e| warn!("not sending message to {}: {}", self.connection, e))?;

        if matches!(&*self.state.lock().unwrap(), ChannelState::Stopped) {
            return Err(ArqError::ChannelStopped(self.connection.addr()));
        }
        self.outbound.add(message);
        Ok(())
    }

    pub fn process_message(&self, message: Message) -> bool {
        self.command(ChannelCommand::Process(message))
    }

    pub fn receive_forced_ack(&self, ack: u32) -> bool {
        self.command(ChannelCommand::ForcedAck(ack))
    }

    /// Applies the receive policy to a message, without acknowledging it
    pub fn receive_forced_message(&self, message: Message) -> bool {
        self.command(ChannelCommand::ForcedReceive(message))
    }

    pub fn send_ack(&self) -> bool {
        self.command(ChannelCommand::SendAck)
    }

    pub fn send_ping(&self, message: Message) -> bool {
        self.command(ChannelCommand::SendPing(message))
    }

    pub fn set_retransmit_interval(&self, interval: Duration) -> bool {
        self.command(ChannelCommand::SetRetransmitInterval(interval))
    }

    pub fn set_channel_info(&self, channel_info: ChannelInfo) {
        *self.channel_info.lock().unwrap() = Some(channel_info);
    }

    pub fn channel_info(&self) -> Option<ChannelInfo> {
        *self.channel_info.lock().unwrap()
    }

    fn command(&self, command: ChannelCommand) -> bool {
        match &*self.state.lock().unwrap() {
            ChannelState::Active { commands, .. } => {
                if commands.send(command).is_err() {
                    debug!("channel task for {} terminated - discarding command", self.connection);
                    return false;
                }
                true
            }
            _ => {
                debug!("channel to {} is not active - discarding {:?}", self.connection, command);
                false
            }
        }
    }

    /// The channel's task: it owns the engine and runs until it receives a stop command, or
    ///  until the handle is dropped
    async fn do_loop(
        mut engine: ArqEngine,
        outbound: Arc<FifoBuffer<Message>>,
        mut commands: mpsc::UnboundedReceiver<ChannelCommand>,
        poll_interval: Duration,
    ) {
        let mut poll_interval = interval(poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retransmit_deadline = engine.retransmit_deadline();

            select! {
                command = commands.recv() => {
                    match command {
                        Some(ChannelCommand::Process(message)) => engine.process_message(message).await,
                        Some(ChannelCommand::ForcedAck(ack)) => engine.receive_ack(ack).await,
                        Some(ChannelCommand::ForcedReceive(message)) => engine.receive(message).await,
                        Some(ChannelCommand::SendAck) => engine.send_ack().await,
                        Some(ChannelCommand::SendPing(message)) => engine.send_ping(message).await,
                        Some(ChannelCommand::SetRetransmitInterval(interval)) => engine.set_retransmit_interval(interval),
                        Some(ChannelCommand::Stop) | None => {
                            debug!("channel task for {} terminating", engine.connection());
                            engine.clear();
                            outbound.clear();
                            return;
                        }
                    }
                }
                _ = poll_interval.tick() => {
                    while let Some(message) = outbound.dequeue() {
                        engine.send(message).await;
                    }
                }
                _ = sleep_until(retransmit_deadline.unwrap_or_else(Instant::now)), if retransmit_deadline.is_some() => {
                    engine.on_retransmit_timeout().await;
                }
            }
        }
    }
}
