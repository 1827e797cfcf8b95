use crate::buffers::fifo_buffer::FifoBuffer;
use crate::connection::{Connection, Reliability};
use crate::host::Host;
use crate::message::Message;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

pub type MessageCallback = Arc<dyn Fn(&Message, Connection) + Send + Sync + 'static>;
pub type TimeoutCallback = Arc<dyn Fn(Connection) + Send + Sync + 'static>;

/// The kinds of control messages, which bypass sequencing and are dispatched by kind rather than
///  by message type
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ControlEvent {
    Init,
    End,
    Ping,
}

/// A [Host] that dispatches delivered messages to callbacks registered per message type, and
///  control messages to callbacks registered per [ControlEvent]. There can be any number of
///  callbacks per type or event; they are invoked in registration order.
///
/// Callbacks run inline on the channel's task by default. After
///  [MessageRouter::spawn_processing_loop], delivered (not control) messages are queued instead
///  and dispatched by a separate task, so that slow callbacks do not hold up the protocol.
#[derive(Default)]
pub struct MessageRouter {
    handlers: RwLock<FxHashMap<u16, Vec<MessageCallback>>>,
    control_handlers: RwLock<FxHashMap<ControlEvent, Vec<MessageCallback>>>,
    timeout_handlers: RwLock<Vec<TimeoutCallback>>,
    /// only present while a processing loop is running
    queue: RwLock<Option<Arc<FifoBuffer<(Message, Connection)>>>>,
    processing_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for MessageRouter {
    fn drop(&mut self) {
        if let Ok(mut task) = self.processing_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl MessageRouter {
    pub fn new() -> MessageRouter {
        Default::default()
    }

    pub fn add_handler(&self, message_type: u16, handler: impl Fn(&Message, Connection) + Send + Sync + 'static) {
        self.handlers.write().unwrap()
            .entry(message_type)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Returns false if there were no handlers for the message type
    pub fn remove_handlers(&self, message_type: u16) -> bool {
        self.handlers.write().unwrap()
            .remove(&message_type)
            .is_some()
    }

    pub fn add_control_handler(&self, event: ControlEvent, handler: impl Fn(&Message, Connection) + Send + Sync + 'static) {
        self.control_handlers.write().unwrap()
            .entry(event)
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn remove_control_handlers(&self, event: ControlEvent) -> bool {
        self.control_handlers.write().unwrap()
            .remove(&event)
            .is_some()
    }

    pub fn add_timeout_handler(&self, handler: impl Fn(Connection) + Send + Sync + 'static) {
        self.timeout_handlers.write().unwrap()
            .push(Arc::new(handler));
    }

    /// Starts queueing delivered messages, and spawns a task that dispatches them every
    ///  `poll_interval`. Returns false if the loop is running already.
    pub fn spawn_processing_loop(self: &Arc<Self>, poll_interval: Duration) -> bool {
        let mut task = self.processing_task.lock().unwrap();
        if task.is_some() {
            warn!("message processing loop is running already");
            return false;
        }

        let queue = Arc::new(FifoBuffer::new());
        *self.queue.write().unwrap() = Some(queue.clone());
        *task = Some(tokio::spawn(Self::processing_loop(Arc::downgrade(self), queue, poll_interval)));
        info!("started message processing loop");
        true
    }

    /// Stops the processing loop. Messages that are still queued are discarded, and subsequent
    ///  messages are dispatched inline.
    pub fn stop_processing_loop(&self) {
        if let Some(handle) = self.processing_task.lock().unwrap().take() {
            info!("stopping message processing loop");
            handle.abort();
        }
        if let Some(queue) = self.queue.write().unwrap().take() {
            queue.clear();
        }
    }

    async fn processing_loop(router: Weak<MessageRouter>, queue: Arc<FifoBuffer<(Message, Connection)>>, poll_interval: Duration) {
        let mut poll_interval = interval(poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            poll_interval.tick().await;

            let Some(router) = router.upgrade() else {
                return;
            };
            while let Some((message, source)) = queue.dequeue() {
                router.dispatch(&message, source);
            }
        }
    }

    fn dispatch(&self, message: &Message, source: Connection) {
        // callbacks are invoked without holding the lock so that they can (de)register handlers
        let handlers = self.handlers.read().unwrap()
            .get(&message.message_type)
            .cloned();

        match handlers {
            Some(handlers) => {
                for handler in handlers {
                    handler(message, source);
                }
            }
            None => {
                debug!("no handler for message type {} from {} - dropping", message.message_type, source);
            }
        }
    }

    fn dispatch_control(&self, event: ControlEvent, message: &Message, source: Connection) {
        let handlers = self.control_handlers.read().unwrap()
            .get(&event)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            trace!("no handler for {:?} from {}", event, source);
        }
        for handler in handlers {
            handler(message, source);
        }
    }
}

#[async_trait]
impl Host for MessageRouter {
    async fn on_message(&self, message: Message, source: Connection) {
        let queue = self.queue.read().unwrap().clone();
        match queue {
            Some(queue) => {
                queue.add((message, source));
            }
            None => self.dispatch(&message, source),
        }
    }

    async fn on_init(&self, message: Message, from: SocketAddr, reliability: Reliability) {
        self.dispatch_control(ControlEvent::Init, &message, Connection::new(from, reliability));
    }

    async fn on_end(&self, message: Message, from: Connection) {
        self.dispatch_control(ControlEvent::End, &message, from);
    }

    async fn on_ping(&self, message: Message, from: Connection) {
        self.dispatch_control(ControlEvent::Ping, &message, from);
    }

    async fn on_timeout(&self, connection: Connection) {
        let handlers = self.timeout_handlers.read().unwrap().clone();
        for handler in handlers {
            handler(connection);
        }
    }
}
