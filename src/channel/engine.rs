use crate::buffers::sequence_buffer::SequenceBuffer;
use crate::channel::policy::{Acceptance, ReceivePolicy};
use crate::config::ChannelConfig;
use crate::connection::Connection;
use crate::host::Host;
use crate::message::Message;
use crate::safe_converter::SafeCast;
use crate::send_pipeline::SendPipeline;
use crate::sequence::forward_distance;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// The number of duplicate ACKs that triggers an immediate retransmit
const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

/// The ARQ state machine of a single channel. It is owned by exactly one task (see
///  [crate::channel::ChannelHandler]), so every method is one atomic state transition.
///
/// Sender side: outgoing data messages get consecutive sequence numbers and are transmitted
///  while they are inside the send window `(current_recognised, current_recognised + W]`, and
///  parked in the overflow buffer otherwise. Transmitted data messages stay in `sent_unacked`
///  until an ACK covers them; the oldest of them is resent when the retransmit timer expires,
///  or after three duplicate ACKs.
///
/// Receiver side: the [ReceivePolicy] decides per incoming sequence number, and the engine
///  delivers, buffers or drops accordingly, draining the reorder buffer after each delivery.
pub struct ArqEngine {
    connection: Connection,
    window_size: u32,

    /// the sequence number of the most recently sequenced outgoing data message
    current_sequence: u32,
    /// the highest sequence number acknowledged by the peer
    current_recognised: u32,
    /// the sequence number of the most recently delivered incoming message
    current_ack: u32,
    duplicate_acks: u32,

    retransmit_interval: Duration,
    min_retransmit_interval: Duration,
    /// The retransmit timer is single-shot: `None` means stopped
    retransmit_deadline: Option<Instant>,

    sent_unacked: SequenceBuffer<Message>,
    send_overflow: SequenceBuffer<Message>,
    receive_reorder: SequenceBuffer<Message>,

    policy: Box<dyn ReceivePolicy>,
    send_pipeline: Arc<SendPipeline>,
    host: Arc<dyn Host>,
}

impl ArqEngine {
    pub fn new(
        config: &ChannelConfig,
        connection: Connection,
        initial_sequence: u32,
        initial_ack: u32,
        policy: Box<dyn ReceivePolicy>,
        send_pipeline: Arc<SendPipeline>,
        host: Arc<dyn Host>,
    ) -> ArqEngine {
        ArqEngine {
            connection,
            window_size: config.window_size,
            current_sequence: initial_sequence,
            current_recognised: initial_sequence,
            current_ack: initial_ack,
            duplicate_acks: 0,
            retransmit_interval: config.retransmit_interval.max(config.min_retransmit_interval),
            min_retransmit_interval: config.min_retransmit_interval,
            retransmit_deadline: None,
            sent_unacked: SequenceBuffer::new(config.window_size),
            send_overflow: SequenceBuffer::new(config.window_size),
            receive_reorder: SequenceBuffer::new(config.window_size),
            policy,
            send_pipeline,
            host,
        }
    }

    pub fn connection(&self) -> Connection {
        self.connection
    }

    pub fn current_sequence(&self) -> u32 {
        self.current_sequence
    }

    pub fn current_recognised(&self) -> u32 {
        self.current_recognised
    }

    pub fn current_ack(&self) -> u32 {
        self.current_ack
    }

    pub fn retransmit_deadline(&self) -> Option<Instant> {
        self.retransmit_deadline
    }

    pub fn num_unacked(&self) -> usize {
        self.sent_unacked.len()
    }

    pub fn num_overflow(&self) -> usize {
        self.send_overflow.len()
    }

    pub fn num_reorder_buffered(&self) -> usize {
        self.receive_reorder.len()
    }

    /// Assigns the next sequence number and the current ack to a data message, and transmits
    ///  it if it fits into the send window. Returns true iff the message was transmitted.
    pub async fn send(&mut self, mut message: Message) -> bool {
        self.current_sequence = self.current_sequence.wrapping_add(1);
        message.sequence = self.current_sequence;
        message.ack = self.current_ack;

        if forward_distance(self.current_recognised, message.sequence) <= self.window_size {
            self.transmit(message).await;
            true
        }
        else {
            trace!("message #{} is outside the send window - parking it", message.sequence);
            self.send_overflow.add(message);
            false
        }
    }

    /// Puts a message on the wire. Data messages are tracked until they are acknowledged.
    async fn transmit(&mut self, message: Message) {
        self.send_pipeline.send_message(self.connection.addr(), &message).await;

        if !message.is_ack() && !message.is_ping() {
            self.sent_unacked.add(message);
            self.start_timer();
        }
    }

    /// Sends the current receiver ack. ACK messages are not sequenced: they carry the sequence
    ///  number of the most recent data message.
    pub async fn send_ack(&mut self) {
        trace!("sending ACK {} (recognised {})", self.current_ack, self.current_recognised);
        let ack = Message::ack_only(self.current_sequence, self.current_ack);
        self.send_pipeline.send_message(self.connection.addr(), &ack).await;
    }

    /// PING messages bypass sequencing and acknowledgement entirely
    pub async fn send_ping(&mut self, message: Message) {
        self.send_pipeline.send_message(self.connection.addr(), &message).await;
    }

    /// starting a running timer has no effect
    fn start_timer(&mut self) {
        if self.retransmit_deadline.is_none() {
            self.retransmit_deadline = Some(Instant::now() + self.retransmit_interval);
        }
    }

    fn stop_timer(&mut self) {
        self.retransmit_deadline = None;
    }

    /// A running timer is restarted with the new interval. Intervals below the configured
    ///  minimum are raised to the minimum.
    pub fn set_retransmit_interval(&mut self, interval: Duration) {
        let interval = interval.max(self.min_retransmit_interval);
        debug!("setting retransmit interval for {} to {:?}", self.connection, interval);
        self.retransmit_interval = interval;
        if self.retransmit_deadline.is_some() {
            self.retransmit_deadline = Some(Instant::now() + interval);
        }
    }

    pub fn retransmit_interval(&self) -> Duration {
        self.retransmit_interval
    }

    pub async fn on_retransmit_timeout(&mut self) {
        trace!("retransmit timer expired");
        self.stop_timer();
        self.resend_oldest().await;
    }

    async fn resend_oldest(&mut self) {
        if let Some(oldest) = self.sent_unacked.first() {
            debug!("resending message #{} to {}", oldest.sequence, self.connection);
            self.transmit(oldest).await;
        }
    }

    pub async fn receive_ack(&mut self, ack: u32) {
        let distance = forward_distance(self.current_recognised, ack);

        if distance == 0 {
            self.duplicate_acks += 1;
            trace!("duplicate ACK {} (#{})", ack, self.duplicate_acks);
            if self.duplicate_acks >= FAST_RETRANSMIT_THRESHOLD {
                self.duplicate_acks = 0;
                self.stop_timer();
                self.resend_oldest().await;
            }
        }
        else if distance <= self.window_size {
            trace!("ACK {} acknowledges {} messages", ack, distance);
            self.stop_timer();
            self.sent_unacked.remove(distance.safe_cast());
            self.current_recognised = ack;
            self.duplicate_acks = 0;

            if !self.sent_unacked.is_empty() {
                self.start_timer();
            }

            while self.sent_unacked.len() < self.window_size.safe_cast() {
                match self.send_overflow.dequeue() {
                    Some(message) => self.transmit(message).await,
                    None => break,
                }
            }
        }
        else {
            debug!("ignoring ACK {} outside the send window (recognised {})", ack, self.current_recognised);
        }
    }

    /// Entry point for every message the multiplexer routes to this channel
    pub async fn process_message(&mut self, message: Message) {
        if message.is_end() {
            self.host.on_end(message, self.connection).await;
        }
        else if message.is_ping() {
            self.host.on_ping(message, self.connection).await;
        }
        else if message.is_ack() {
            self.receive_ack(message.ack).await;
        }
        else {
            self.receive(message).await;
            self.send_ack().await;
        }
    }

    /// Applies the receive policy to a data message, and after a delivery keeps draining the
    ///  reorder buffer until its oldest entry is not deliverable yet.
    pub async fn receive(&mut self, message: Message) {
        let mut next = Some(message);
        let mut draining = false;

        while let Some(message) = next.take() {
            match self.policy.accept(message.sequence, self.current_ack) {
                Acceptance::Deliver => {
                    trace!("delivering message #{}", message.sequence);
                    self.current_ack = message.sequence;
                    self.host.on_message(message, self.connection).await;

                    next = self.receive_reorder.dequeue();
                    draining = true;
                }
                Acceptance::Buffer => {
                    trace!("buffering message #{} (ack {})", message.sequence, self.current_ack);
                    self.receive_reorder.add_unique(message);
                }
                Acceptance::Drop => {
                    trace!("dropping message #{} (ack {})", message.sequence, self.current_ack);
                    if draining {
                        next = self.receive_reorder.dequeue();
                    }
                }
            }
        }
    }

    /// Stops the timer and discards all buffered messages
    pub fn clear(&mut self) {
        self.stop_timer();
        self.sent_unacked.clear();
        self.send_overflow.clear();
        self.receive_reorder.clear();
        self.policy.reset();
    }
}
