//! Command dispatch.
//!
//! Commands are queued, then the whole queue is flushed as one batch to every
//! ready WebSocket connection and every waiting HTTP poller. With nobody to
//! deliver to, the queue is held until a connection becomes ready, a poller
//! arrives, or another command is queued.

use std::collections::VecDeque;
use std::time::Duration;
use studiolink_core::{Command, ServerMessage};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::registry::{Connection, ConnectionRegistry, TransportSummary};

/// When the last HTTP poll arrived.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PollMark {
    seen: Instant,
    at_millis: u64,
}

impl PollMark {
    pub fn now() -> Self {
        Self {
            seen: Instant::now(),
            at_millis: crate::now_millis(),
        }
    }
}

/// What an HTTP poller gets on arrival.
#[derive(Debug)]
pub(crate) enum PollOutcome {
    /// Commands were already queued.
    Batch(Vec<Command>),
    /// Nothing queued; the next flush is delivered here.
    Wait(oneshot::Receiver<Vec<Command>>),
}

#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    registry: ConnectionRegistry,
    queue: VecDeque<Command>,
    pollers: Vec<oneshot::Sender<Vec<Command>>>,
    last_poll: Option<PollMark>,
}

impl Dispatcher {
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn add(&mut self, connection: Connection) {
        self.registry.add(connection);
    }

    pub fn remove(&mut self, id: &str) -> Option<Connection> {
        self.registry.remove(id)
    }

    /// Mark a connection ready and deliver anything queued before it was.
    pub fn mark_ready(&mut self, id: &str, version: String) -> bool {
        if !self.registry.mark_ready(id, version) {
            return false;
        }
        self.flush();
        true
    }

    /// Queue a command and try to deliver it.
    pub fn enqueue(&mut self, command: Command) -> usize {
        self.queue.push_back(command);
        self.flush()
    }

    /// Drop a command that has not been delivered yet.
    pub fn withdraw(&mut self, id: &str) -> bool {
        let before = self.queue.len();
        self.queue.retain(|c| c.id != id);
        self.queue.len() != before
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Register an HTTP poller. Anything already queued is handed over at
    /// once; otherwise the poller waits for the next flush.
    pub fn poll(&mut self, mark: PollMark) -> PollOutcome {
        self.last_poll = Some(mark);
        if !self.queue.is_empty() {
            return PollOutcome::Batch(self.queue.drain(..).collect());
        }
        self.pollers.retain(|p| !p.is_closed());
        let (tx, rx) = oneshot::channel();
        self.pollers.push(tx);
        PollOutcome::Wait(rx)
    }

    /// Record poller activity without taking commands.
    pub fn touch_poll(&mut self, mark: PollMark) {
        self.last_poll = Some(mark);
    }

    /// True while a poller is waiting or one was seen within `window`.
    pub fn http_connected(&self, window: Duration) -> bool {
        self.pollers.iter().any(|p| !p.is_closed())
            || self.last_poll.is_some_and(|m| m.seen.elapsed() < window)
    }

    /// True when some transport could pick up a command.
    pub fn is_connected(&self, window: Duration) -> bool {
        self.registry.ready_count() > 0 || self.http_connected(window)
    }

    pub fn summary(&self, window: Duration) -> TransportSummary {
        TransportSummary {
            http_connected: self.http_connected(window),
            ws_clients: self.registry.count(),
            last_poll_time: self.last_poll.map_or(0, |m| m.at_millis),
        }
    }

    /// Deliver the queue to every ready connection and waiting poller.
    ///
    /// Returns the number of recipients. The queue is kept when nobody
    /// accepted the batch.
    pub fn flush(&mut self) -> usize {
        self.pollers.retain(|p| !p.is_closed());
        if self.queue.is_empty() || (self.registry.ready_count() == 0 && self.pollers.is_empty()) {
            return 0;
        }

        let batch: Vec<Command> = self.queue.drain(..).collect();
        let frame = match (ServerMessage::Commands { data: batch.clone() }).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("failed to encode command batch: {}", e);
                self.queue.extend(batch);
                return 0;
            }
        };

        let mut delivered = 0;
        self.registry.for_each_ready(|conn| {
            if conn.send(&frame) {
                delivered += 1;
            }
        });
        for poller in self.pollers.drain(..) {
            if poller.send(batch.clone()).is_ok() {
                delivered += 1;
            }
        }

        if delivered == 0 {
            self.queue.extend(batch);
            return 0;
        }
        tracing::debug!(commands = batch.len(), recipients = delivered, "dispatched command batch");
        delivered
    }

    /// Drop every connection, poller, and queued command.
    pub fn clear(&mut self) -> Vec<Connection> {
        self.queue.clear();
        self.pollers.clear();
        self.registry.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Outbound;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn command(id: &str) -> Command {
        let mut params = serde_json::Map::new();
        params.insert("className".into(), json!("Part"));
        Command::new(id, "CreateInstance", params)
    }

    fn attach(d: &mut Dispatcher, id: &str) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        d.add(Connection::new(id.to_string(), 0, tx));
        rx
    }

    fn batch(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Command> {
        match rx.try_recv().unwrap() {
            Outbound::Frame(text) => match serde_json::from_str(&text).unwrap() {
                ServerMessage::Commands { data } => data,
                other => panic!("unexpected frame {other:?}"),
            },
            Outbound::Close => panic!("unexpected close"),
        }
    }

    #[test]
    fn queues_until_a_connection_is_ready() {
        let mut d = Dispatcher::default();
        let mut rx = attach(&mut d, "a");

        assert_eq!(d.enqueue(command("1")), 0);
        assert_eq!(d.enqueue(command("2")), 0);
        assert_eq!(d.queued(), 2);
        assert!(rx.try_recv().is_err());

        assert!(d.mark_ready("a", "2.0.0".into()));
        let cmds = batch(&mut rx);
        assert_eq!(cmds.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), ["1", "2"]);
        assert_eq!(d.queued(), 0);
    }

    #[test]
    fn broadcasts_to_every_ready_connection() {
        let mut d = Dispatcher::default();
        let mut ra = attach(&mut d, "a");
        let mut rb = attach(&mut d, "b");
        let mut rc = attach(&mut d, "c");
        d.mark_ready("a", "2.0.0".into());
        d.mark_ready("b", "2.0.0".into());

        assert_eq!(d.enqueue(command("1")), 2);
        assert_eq!(batch(&mut ra), vec![command("1")]);
        assert_eq!(batch(&mut rb), vec![command("1")]);
        assert!(rc.try_recv().is_err());
    }

    #[test]
    fn withdrawn_commands_are_not_delivered() {
        let mut d = Dispatcher::default();
        let mut rx = attach(&mut d, "a");
        d.enqueue(command("1"));
        d.enqueue(command("2"));
        assert!(d.withdraw("1"));
        assert!(!d.withdraw("1"));

        d.mark_ready("a", "2.0.0".into());
        assert_eq!(batch(&mut rx), vec![command("2")]);
    }

    #[test]
    fn poll_takes_what_is_already_queued() {
        let mut d = Dispatcher::default();
        d.enqueue(command("1"));
        match d.poll(PollMark::now()) {
            PollOutcome::Batch(cmds) => assert_eq!(cmds, vec![command("1")]),
            other => panic!("expected batch, got {other:?}"),
        }
        assert_eq!(d.queued(), 0);
    }

    #[test]
    fn waiting_pollers_share_the_next_batch() {
        let mut d = Dispatcher::default();
        let PollOutcome::Wait(mut first) = d.poll(PollMark::now()) else {
            panic!("queue should be empty");
        };
        let PollOutcome::Wait(mut second) = d.poll(PollMark::now()) else {
            panic!("queue should be empty");
        };

        assert_eq!(d.enqueue(command("1")), 2);
        assert_eq!(first.try_recv().unwrap(), vec![command("1")]);
        assert_eq!(second.try_recv().unwrap(), vec![command("1")]);
        assert_eq!(d.queued(), 0);
    }

    #[test]
    fn abandoned_pollers_do_not_swallow_commands() {
        let mut d = Dispatcher::default();
        let PollOutcome::Wait(rx) = d.poll(PollMark::now()) else {
            panic!("queue should be empty");
        };
        drop(rx);

        assert_eq!(d.enqueue(command("1")), 0);
        assert_eq!(d.queued(), 1);
    }

    #[test]
    fn closed_connections_keep_the_queue() {
        let mut d = Dispatcher::default();
        let rx = attach(&mut d, "a");
        d.mark_ready("a", "2.0.0".into());
        drop(rx);

        assert_eq!(d.enqueue(command("1")), 0);
        assert_eq!(d.queued(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_presence_expires() {
        let window = Duration::from_secs(10);
        let mut d = Dispatcher::default();
        assert!(!d.is_connected(window));
        assert_eq!(d.summary(window).last_poll_time, 0);

        d.touch_poll(PollMark::now());
        let summary = d.summary(window);
        assert!(summary.http_connected);
        assert!(summary.last_poll_time > 0);
        assert_eq!(summary.ws_clients, 0);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!d.is_connected(window));
        assert!(d.summary(window).last_poll_time > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_poller_counts_as_connected() {
        let window = Duration::from_secs(10);
        let mut d = Dispatcher::default();
        let outcome = d.poll(PollMark::now());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(d.is_connected(window));

        drop(outcome);
        assert!(!d.is_connected(window));
    }
}
