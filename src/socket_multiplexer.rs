use crate::buffers::fifo_buffer::FifoBuffer;
use crate::channel::ChannelHandler;
use crate::channel_info::ChannelInfo;
use crate::config::{ArqConfig, ChannelConfig};
use crate::connection::{Connection, Reliability};
use crate::error::ArqError;
use crate::host::Host;
use crate::message::Message;
use crate::send_pipeline::{ReceiveSocket, SendPipeline, SendSocket};
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;

/// A SocketMultiplexer owns the socket of one reliability class, and fans incoming datagrams out
///  to the channels of the respective peers.
///
/// Receiving is decoupled from processing: a receive task does nothing but move datagrams from
///  the socket into a bounded intake queue, and a processing task polls that queue, parses the
///  datagrams and routes them. INIT messages go to the host (there is no channel for the peer
///  yet), all other messages to the peer's channel if there is one.
pub struct SocketMultiplexer {
    reliability: Reliability,
    host: Arc<dyn Host>,
    send_pipeline: Arc<SendPipeline>,
    receive_socket: Option<Arc<dyn ReceiveSocket>>,
    handlers: RwLock<FxHashMap<Connection, Arc<ChannelHandler>>>,
    intake: Arc<FifoBuffer<(SocketAddr, Vec<u8>)>>,
    poll_interval: Duration,
    max_connections: usize,
    active: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for SocketMultiplexer {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}

impl SocketMultiplexer {
    /// Binds the socket for the given reliability class to the address configured for it
    pub async fn bind(config: &ArqConfig, reliability: Reliability, host: Arc<dyn Host>) -> anyhow::Result<Arc<SocketMultiplexer>> {
        config.validate()?;

        let addr = match reliability {
            Reliability::Reliable => config.reliable_addr,
            Reliability::PartialReliable => config.no_reliable_addr,
        };
        let socket = UdpSocket::bind(addr).await
            .map_err(ArqError::TransportFault)?;
        let socket = Arc::new(socket);
        info!("bound {:?} socket to {:?}", reliability, UdpSocket::local_addr(&socket)?);

        let receive_socket: Arc<dyn ReceiveSocket> = Arc::new(socket.clone());
        Ok(Self::create(config, reliability, host, Arc::new(socket), Some(receive_socket)))
    }

    /// Creates a multiplexer without a receive socket: datagrams must be fed in through
    ///  [SocketMultiplexer::on_datagram]
    pub fn new(config: &ArqConfig, reliability: Reliability, host: Arc<dyn Host>, send_socket: Arc<dyn SendSocket>) -> Arc<SocketMultiplexer> {
        Self::create(config, reliability, host, send_socket, None)
    }

    /// Creates a multiplexer on top of arbitrary socket implementations
    pub fn with_sockets(config: &ArqConfig, reliability: Reliability, host: Arc<dyn Host>, send_socket: Arc<dyn SendSocket>, receive_socket: Arc<dyn ReceiveSocket>) -> Arc<SocketMultiplexer> {
        Self::create(config, reliability, host, send_socket, Some(receive_socket))
    }

    fn create(config: &ArqConfig, reliability: Reliability, host: Arc<dyn Host>, send_socket: Arc<dyn SendSocket>, receive_socket: Option<Arc<dyn ReceiveSocket>>) -> Arc<SocketMultiplexer> {
        Arc::new(SocketMultiplexer {
            reliability,
            host,
            send_pipeline: Arc::new(SendPipeline::new(send_socket)),
            receive_socket,
            handlers: Default::default(),
            intake: Arc::new(FifoBuffer::bounded(config.intake_queue_capacity)),
            poll_interval: config.poll_interval,
            max_connections: config.max_connections,
            active: AtomicBool::new(false),
            tasks: Default::default(),
        })
    }

    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.send_pipeline.local_addr()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn connection_count(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    /// Spawns the receive and processing tasks. This must be called from inside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        if self.active.swap(true, Ordering::AcqRel) {
            warn!("socket multiplexer was already started");
            return;
        }
        info!("starting {:?} socket multiplexer", self.reliability);

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(Self::processing_loop(Arc::downgrade(self), self.intake.clone(), self.poll_interval)));
        if let Some(socket) = &self.receive_socket {
            tasks.push(tokio::spawn(Self::recv_loop(Arc::downgrade(self), socket.clone(), self.intake.clone())));
        }
    }

    /// Stops receiving and processing, and stops and removes all channels
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            info!("stopping {:?} socket multiplexer", self.reliability);
        }

        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
        self.intake.clear();

        let handlers = std::mem::take(&mut *self.handlers.write().unwrap());
        for handler in handlers.values() {
            handler.stop();
        }
    }

    /// Creates a channel to a peer that sends through this multiplexer's socket and delivers to
    ///  its host. The channel is not registered yet, see [SocketMultiplexer::add_handler].
    ///
    /// The channel always has this multiplexer's reliability class, regardless of the
    ///  reliability in `config` or `connection`.
    pub fn create_handler(&self, connection: Connection, config: ChannelConfig, initial_sequence: u32, initial_ack: u32) -> Arc<ChannelHandler> {
        if config.reliability != self.reliability {
            warn!("creating {:?} channel for {} on a {:?} socket - using {:?}", config.reliability, connection, self.reliability, self.reliability);
        }

        Arc::new(ChannelHandler::new(
            ChannelConfig { reliability: self.reliability, ..config },
            Connection { reliability: self.reliability, ..connection },
            initial_sequence,
            initial_ack,
            self.send_pipeline.clone(),
            self.host.clone(),
        ))
    }

    /// Registers and starts a channel. Returns false if there is a channel for the connection
    ///  already, or if the maximum number of connections is reached.
    pub fn add_handler(&self, connection: Connection, handler: Arc<ChannelHandler>) -> bool {
        let mut handlers = self.handlers.write().unwrap();
        if handlers.contains_key(&connection) {
            debug!("there is a channel for {} already", connection);
            return false;
        }
        if handlers.len() >= self.max_connections {
            warn!("maximum number of connections ({}) reached - rejecting channel for {}", self.max_connections, connection);
            return false;
        }

        handler.start();
        handlers.insert(connection, handler);
        true
    }

    pub fn remove_handler(&self, connection: &Connection) -> bool {
        let removed = self.handlers.write().unwrap()
            .remove(connection);

        match removed {
            Some(handler) => {
                handler.stop();
                true
            }
            None => false,
        }
    }

    fn get_handler(&self, connection: &Connection) -> Option<Arc<ChannelHandler>> {
        self.handlers.read().unwrap()
            .get(connection)
            .cloned()
    }

    fn with_handler(&self, connection: &Connection, f: impl FnOnce(&ChannelHandler) -> bool) -> bool {
        match self.get_handler(connection) {
            Some(handler) => f(&handler),
            None => {
                debug!("no channel for {}", connection);
                false
            }
        }
    }

    /// Queues a message for the peer's channel
    pub fn try_send_message(&self, connection: &Connection, message_type: u16, payload: Vec<u8>, init: bool, end: bool) -> Result<(), ArqError> {
        self.get_handler(connection)
            .ok_or(ArqError::UnknownConnection(connection.addr()))?
            .send(message_type, payload, init, end)
    }

    /// Same as [SocketMultiplexer::try_send_message], returning false if the message can not be
    ///  sent (which is logged)
    pub fn send_message(&self, connection: &Connection, message_type: u16, payload: Vec<u8>, init: bool, end: bool) -> bool {
        match self.try_send_message(connection, message_type, payload, init, end) {
            Ok(()) => true,
            Err(e) => {
                debug!("not sending message: {}", e);
                false
            }
        }
    }

    pub fn send_forced_ack(&self, connection: &Connection) -> bool {
        self.with_handler(connection, |h| h.send_ack())
    }

    pub fn receive_forced_ack(&self, connection: &Connection, ack: u32) -> bool {
        self.with_handler(connection, |h| h.receive_forced_ack(ack))
    }

    pub fn receive_forced_message(&self, connection: &Connection, message: Message) -> bool {
        self.with_handler(connection, |h| h.receive_forced_message(message))
    }

    pub fn send_ping(&self, connection: &Connection, message: Message) -> bool {
        self.with_handler(connection, |h| h.send_ping(message))
    }

    pub fn set_retransmit_interval(&self, connection: &Connection, interval: Duration) -> bool {
        self.with_handler(connection, |h| h.set_retransmit_interval(interval))
    }

    pub fn set_channel_info(&self, connection: &Connection, channel_info: ChannelInfo) -> bool {
        self.with_handler(connection, |h| {
            h.set_channel_info(channel_info);
            true
        })
    }

    pub fn channel_info(&self, connection: &Connection) -> Option<ChannelInfo> {
        self.get_handler(connection)
            .and_then(|h| h.channel_info())
    }

    /// Sends a message directly through the socket, bypassing any channel. This is for the
    ///  handshake, before a channel exists.
    pub async fn send_without_channel(&self, to: SocketAddr, message: &Message) {
        self.send_pipeline.send_message(to, message).await;
    }

    /// Adds a received datagram to the intake queue. Returns false if the queue is full, in
    ///  which case the datagram is dropped.
    pub fn on_datagram(&self, from: SocketAddr, buf: Vec<u8>) -> bool {
        if !self.intake.add((from, buf)) {
            debug!("intake queue is full - dropping datagram from {:?}", from);
            return false;
        }
        true
    }

    async fn process_datagram(&self, from: SocketAddr, buf: &[u8]) {
        let message = match Message::deser(buf) {
            Ok(message) => message,
            Err(e) => {
                debug!("dropping datagram from {:?}: {}", from, e);
                return;
            }
        };
        trace!("received {:?} from {:?}", message, from);

        if message.is_init() {
            self.host.on_init(message, from, self.reliability).await;
            return;
        }

        let connection = Connection::new(from, self.reliability);
        match self.get_handler(&connection) {
            Some(handler) => {
                handler.process_message(message);
            }
            None => {
                debug!("no channel for {:?} - dropping {:?}", from, message);
            }
        }
    }

    async fn recv_loop(multiplexer: Weak<SocketMultiplexer>, socket: Arc<dyn ReceiveSocket>, intake: Arc<FifoBuffer<(SocketAddr, Vec<u8>)>>) {
        info!("starting receive loop");

        // one byte more than the maximum, so that oversized datagrams are not silently truncated
        let mut buf = vec![0u8; Message::MAX_DATAGRAM_LEN + 1];
        loop {
            match socket.recv_packet(&mut buf).await {
                Ok((num_read, from)) => {
                    if num_read > Message::MAX_DATAGRAM_LEN {
                        debug!("oversized datagram from {:?} - dropping", from);
                        continue;
                    }
                    if !intake.add((from, buf[..num_read].to_vec())) {
                        debug!("intake queue is full - dropping datagram from {:?}", from);
                    }
                }
                Err(e) => {
                    error!("socket error: {} - stopping socket multiplexer", e);
                    if let Some(multiplexer) = multiplexer.upgrade() {
                        multiplexer.stop();
                    }
                    return;
                }
            }
        }
    }

    async fn processing_loop(multiplexer: Weak<SocketMultiplexer>, intake: Arc<FifoBuffer<(SocketAddr, Vec<u8>)>>, poll_interval: Duration) {
        let mut poll_interval = interval(poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            poll_interval.tick().await;

            let Some(multiplexer) = multiplexer.upgrade() else {
                return;
            };
            while let Some((from, buf)) = intake.dequeue() {
                let correlation_id = Uuid::new_v4();
                let span = span!(Level::TRACE, "datagram_received", ?correlation_id);

                multiplexer.process_datagram(from, &buf)
                    .instrument(span)
                    .await;
            }
        }
    }
}
