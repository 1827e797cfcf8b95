use crate::config::ArqConfig;
use crate::connection::Connection;
use crate::host::Host;
use crate::message::Message;
use crate::socket_multiplexer::SocketMultiplexer;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// The things a [PingController] acts on: the channel it probes through, the channels whose
///  retransmit interval follows the measured round trip time, and whoever handles a dead peer.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeepAliveTarget: Send + Sync + 'static {
    fn send_ping(&self, message: Message) -> bool;

    fn set_retransmit_interval(&self, interval: Duration) -> bool;

    async fn on_timeout(&self);
}

/// Probes through one multiplexer's channel to a peer, and applies RTT measurements to that
///  channel and any number of companion channels to the same peer (typically the channel of the
///  other reliability class).
pub struct MultiplexerKeepAliveTarget {
    probe_channel: (Arc<SocketMultiplexer>, Connection),
    companions: Vec<(Arc<SocketMultiplexer>, Connection)>,
    host: Arc<dyn Host>,
}

impl MultiplexerKeepAliveTarget {
    pub fn new(multiplexer: Arc<SocketMultiplexer>, connection: Connection, host: Arc<dyn Host>) -> MultiplexerKeepAliveTarget {
        MultiplexerKeepAliveTarget {
            probe_channel: (multiplexer, connection),
            companions: Vec::new(),
            host,
        }
    }

    pub fn with_companion(mut self, multiplexer: Arc<SocketMultiplexer>, connection: Connection) -> MultiplexerKeepAliveTarget {
        self.companions.push((multiplexer, connection));
        self
    }
}

#[async_trait]
impl KeepAliveTarget for MultiplexerKeepAliveTarget {
    fn send_ping(&self, message: Message) -> bool {
        let (multiplexer, connection) = &self.probe_channel;
        multiplexer.send_ping(connection, message)
    }

    fn set_retransmit_interval(&self, interval: Duration) -> bool {
        let (multiplexer, connection) = &self.probe_channel;
        let mut result = multiplexer.set_retransmit_interval(connection, interval);
        for (multiplexer, connection) in &self.companions {
            result &= multiplexer.set_retransmit_interval(connection, interval);
        }
        result
    }

    async fn on_timeout(&self) {
        self.host.on_timeout(self.probe_channel.1).await;
    }
}

struct PingState {
    replied: bool,
    /// starts at -1 so that the first round, which has no probe to wait for, counts as zero
    num_not_replied: i64,
    probe_id: u32,
    probe_sent_at: Option<Instant>,
    last_rtt: Option<Duration>,
    timed_out: bool,
}

enum PingAction {
    Probe(u32),
    Timeout,
    Idle,
}

/// Periodically probes a peer and measures the round trip time of its replies.
///
/// Both sides of a connection run their own controller, and ping messages serve two purposes:
///  a probe (payload `[0]`) is echoed back by the receiving side with payload `[1]`, and an echo
///  completes a measurement on the originating side. The measured RTT is applied as
///  `2 x RTT` to the retransmit interval of the target's channels.
///
/// A peer that leaves `max_not_replied` consecutive probes unanswered is reported to the target
///  as timed out, and probing stops.
pub struct PingController {
    target: Arc<dyn KeepAliveTarget>,
    ping_interval: Duration,
    max_not_replied: i64,
    state: Mutex<PingState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for PingController {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl PingController {
    pub fn new(config: &ArqConfig, target: Arc<dyn KeepAliveTarget>) -> Arc<PingController> {
        Arc::new(PingController {
            target,
            ping_interval: config.ping_interval,
            max_not_replied: config.max_not_replied_pings().into(),
            state: Mutex::new(PingState {
                replied: false,
                num_not_replied: -1,
                probe_id: 0,
                probe_sent_at: None,
                last_rtt: None,
                timed_out: false,
            }),
            task: Default::default(),
        })
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        self.state.lock().unwrap().last_rtt
    }

    pub fn is_timed_out(&self) -> bool {
        self.state.lock().unwrap().timed_out
    }

    /// Spawns the probing task, with the first probe after one ping interval
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            warn!("ping controller was already started");
            return;
        }
        *task = Some(tokio::spawn(Self::do_loop(Arc::downgrade(self), self.ping_interval)));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            debug!("stopping ping controller");
            handle.abort();
        }
    }

    async fn do_loop(controller: Weak<PingController>, ping_interval: Duration) {
        let mut ticks = interval_at(Instant::now() + ping_interval, ping_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticks.tick().await;

            let Some(controller) = controller.upgrade() else {
                return;
            };
            if !controller.on_tick().await {
                return;
            }
        }
    }

    /// One probing round. Returns false once the peer timed out, i.e. when probing should stop.
    pub async fn on_tick(&self) -> bool {
        let action = {
            let mut state = self.state.lock().unwrap();
            if state.timed_out {
                PingAction::Idle
            }
            else {
                state.num_not_replied = if state.replied { 0 } else { state.num_not_replied + 1 };
                if state.num_not_replied >= self.max_not_replied {
                    state.timed_out = true;
                    PingAction::Timeout
                }
                else {
                    state.replied = false;
                    state.probe_id = state.probe_id.wrapping_add(1);
                    state.probe_sent_at = Some(Instant::now());
                    PingAction::Probe(state.probe_id)
                }
            }
        };

        match action {
            PingAction::Probe(probe_id) => {
                trace!("sending probe #{}", probe_id);
                if !self.target.send_ping(Message::ping(probe_id, false)) {
                    debug!("probe #{} could not be sent", probe_id);
                }
                true
            }
            PingAction::Timeout => {
                info!("peer did not answer {} probes - timing out", self.max_not_replied);
                self.target.on_timeout().await;
                false
            }
            PingAction::Idle => false,
        }
    }

    /// Handles a received ping: echoes the peer's probes, and completes a measurement for an
    ///  echo of the outstanding probe. Echoes of older probes are ignored.
    pub fn on_ping_received(&self, message: &Message) {
        if !message.is_echoed_ping() {
            trace!("echoing probe #{}", message.sequence);
            self.target.send_ping(Message::ping(message.sequence, true));
            return;
        }

        let rtt = {
            let mut state = self.state.lock().unwrap();
            if message.sequence != state.probe_id {
                debug!("echo of probe #{} while waiting for #{} - ignoring", message.sequence, state.probe_id);
                return;
            }
            let Some(sent_at) = state.probe_sent_at.take() else {
                debug!("duplicate echo of probe #{} - ignoring", message.sequence);
                return;
            };

            let rtt = Instant::now().duration_since(sent_at);
            state.replied = true;
            state.last_rtt = Some(rtt);
            rtt
        };

        trace!("probe #{}: rtt={:?}", message.sequence, rtt);
        self.target.set_retransmit_interval(rtt * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArqConfig;
    use crate::connection::Reliability;
    use crate::test_util::{TrackingHost, TrackingSendSocket};
    use mockall::predicate::eq;
    use std::net::SocketAddr;
    use mockall::Sequence;
    use tokio::runtime::Builder;
    use tokio::time::sleep;

    fn config() -> ArqConfig {
        ArqConfig {
            ping_interval: Duration::from_millis(100),
            keepalive_timeout: Duration::from_millis(200),
            ..ArqConfig::default()
        }
    }

    fn run_paused<F: std::future::Future<Output = ()>>(f: F) {
        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(f);
    }

    #[test]
    fn test_times_out_without_replies() {
        run_paused(async {
            // max_not_replied is round(200/100) + 1 = 3: probes in rounds 0, 1 and 2, timeout in round 3
            let mut target = MockKeepAliveTarget::new();
            let mut seq = Sequence::new();
            for probe_id in 1..=3u32 {
                target.expect_send_ping()
                    .once()
                    .in_sequence(&mut seq)
                    .withf(move |m| m.sequence == probe_id && m.is_ping() && m.payload() == [0u8])
                    .return_const(true);
            }
            target.expect_on_timeout()
                .once()
                .in_sequence(&mut seq)
                .return_const(());

            let controller = PingController::new(&config(), Arc::new(target));
            assert!(controller.on_tick().await);
            assert!(controller.on_tick().await);
            assert!(controller.on_tick().await);
            assert!(!controller.is_timed_out());
            assert!(!controller.on_tick().await);
            assert!(controller.is_timed_out());

            // no more activity after the timeout
            assert!(!controller.on_tick().await);
        });
    }

    #[test]
    fn test_reply_measures_rtt() {
        run_paused(async {
            let mut target = MockKeepAliveTarget::new();
            target.expect_send_ping()
                .withf(|m| m.sequence == 1)
                .once()
                .return_const(true);
            target.expect_set_retransmit_interval()
                .with(eq(Duration::from_millis(60)))
                .once()
                .return_const(true);

            let controller = PingController::new(&config(), Arc::new(target));
            assert!(controller.on_tick().await);
            sleep(Duration::from_millis(30)).await;
            controller.on_ping_received(&Message::ping(1, true));

            assert_eq!(controller.last_rtt(), Some(Duration::from_millis(30)));

            // duplicate echo is ignored
            controller.on_ping_received(&Message::ping(1, true));
        });
    }

    #[test]
    fn test_replies_reset_miss_counter() {
        run_paused(async {
            let mut target = MockKeepAliveTarget::new();
            target.expect_send_ping()
                .times(6)
                .return_const(true);
            target.expect_set_retransmit_interval()
                .return_const(true);
            target.expect_on_timeout()
                .never();

            let controller = PingController::new(&config(), Arc::new(target));
            for probe_id in 1..=3u32 {
                assert!(controller.on_tick().await);
                assert!(controller.on_tick().await);
                controller.on_ping_received(&Message::ping(probe_id * 2, true));
            }
            assert!(!controller.is_timed_out());
        });
    }

    #[test]
    fn test_stale_echo_is_ignored() {
        run_paused(async {
            let mut target = MockKeepAliveTarget::new();
            target.expect_send_ping()
                .times(2)
                .return_const(true);
            target.expect_set_retransmit_interval()
                .never();

            let controller = PingController::new(&config(), Arc::new(target));
            controller.on_tick().await;
            controller.on_tick().await;
            controller.on_ping_received(&Message::ping(1, true));
            assert_eq!(controller.last_rtt(), None);
        });
    }

    #[test]
    fn test_peer_probe_is_echoed() {
        let mut target = MockKeepAliveTarget::new();
        target.expect_send_ping()
            .withf(|m| m.sequence == 77 && m.is_echoed_ping())
            .once()
            .return_const(true);
        target.expect_set_retransmit_interval()
            .never();

        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let controller = PingController::new(&config(), Arc::new(target));
            controller.on_ping_received(&Message::ping(77, false));
            assert_eq!(controller.last_rtt(), None);
        });
    }

    #[test]
    fn test_loop_probes_until_timeout() {
        run_paused(async {
            let mut target = MockKeepAliveTarget::new();
            target.expect_send_ping()
                .times(3)
                .return_const(true);
            target.expect_on_timeout()
                .once()
                .return_const(());

            let controller = PingController::new(&config(), Arc::new(target));
            controller.start();

            sleep(Duration::from_millis(50)).await;
            assert!(!controller.is_timed_out());

            sleep(Duration::from_millis(400)).await;
            assert!(controller.is_timed_out());

            // the loop terminated, further time has no effect
            sleep(Duration::from_millis(1000)).await;
            controller.stop();
        });
    }

    fn channel(reliability: Reliability) -> (Arc<SocketMultiplexer>, Arc<TrackingSendSocket>, Connection) {
        let config = ArqConfig::default();
        let socket = Arc::new(TrackingSendSocket::new(SocketAddr::from(([5, 6, 7, 8], 1))));
        let multiplexer = SocketMultiplexer::new(&config, reliability, Arc::new(TrackingHost::default()), socket.clone());
        multiplexer.start();

        let connection = Connection::new(SocketAddr::from(([1, 2, 3, 4], 9)), reliability);
        let handler = multiplexer.create_handler(connection, config.channel_config(reliability), 10, 0);
        assert!(multiplexer.add_handler(connection, handler));
        (multiplexer, socket, connection)
    }

    #[test]
    fn test_multiplexer_target() {
        run_paused(async {
            let (probe_mux, probe_socket, probe_conn) = channel(Reliability::Reliable);
            let (companion_mux, companion_socket, companion_conn) = channel(Reliability::PartialReliable);
            let host = Arc::new(TrackingHost::default());

            let target = MultiplexerKeepAliveTarget::new(probe_mux.clone(), probe_conn, host.clone())
                .with_companion(companion_mux.clone(), companion_conn);

            // pings go through the probe channel only
            assert!(target.send_ping(Message::ping(5, false)));
            sleep(Duration::from_millis(5)).await;
            let sent = probe_socket.sent_messages();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, probe_conn.addr());
            assert!(sent[0].1.is_ping());
            assert_eq!(sent[0].1.sequence, 5);
            assert!(companion_socket.sent_messages().is_empty());

            // the interval applies to the companion as well: resend after 30ms instead of 200ms
            assert!(target.set_retransmit_interval(Duration::from_millis(30)));
            assert!(companion_mux.send_message(&companion_conn, 1, vec![1], false, false));
            sleep(Duration::from_millis(5)).await;
            assert_eq!(companion_socket.sent_sequences(), vec![11]);
            sleep(Duration::from_millis(30)).await;
            assert_eq!(companion_socket.sent_sequences(), vec![11]);

            // timeouts are reported for the probe channel's connection
            target.on_timeout().await;
            assert_eq!(host.events(), vec![("timeout", probe_conn.addr())]);

            probe_mux.stop();
            companion_mux.stop();
        });
    }

    #[test]
    fn test_multiplexer_target_with_unknown_companion() {
        run_paused(async {
            let (probe_mux, _, probe_conn) = channel(Reliability::Reliable);
            let (companion_mux, _, companion_conn) = channel(Reliability::PartialReliable);
            let unknown = Connection::new(SocketAddr::from(([9, 9, 9, 9], 9)), Reliability::PartialReliable);

            let target = MultiplexerKeepAliveTarget::new(probe_mux.clone(), probe_conn, Arc::new(TrackingHost::default()))
                .with_companion(companion_mux.clone(), companion_conn)
                .with_companion(companion_mux.clone(), unknown);
            assert!(!target.set_retransmit_interval(Duration::from_millis(30)));

            let target = MultiplexerKeepAliveTarget::new(probe_mux.clone(), unknown, Arc::new(TrackingHost::default()));
            assert!(!target.send_ping(Message::ping(1, false)));

            probe_mux.stop();
            companion_mux.stop();
        });
    }
}
