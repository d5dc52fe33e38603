//! The north-bound event bus (§6 "North-bound (engine -> collaborators)").
//!
//! One multiplexed `WatcherEvent` stream rather than a channel per message
//! type: every collaborator that cares about watcher output (the admin REST
//! surface, the chat-bot, the persistent store) wants all six event kinds,
//! not a subset, so a single topic is the right shape here.

use bitcoin::{BlockHash, Txid};
use btcwatch_channel::channel::{self, Receiver, Sender};
use btcwatch_logger::{debug, trace, warn};
use btcwatch_types::TransactionAnalysis;
use std::collections::HashMap;
use std::thread;
use std::thread::JoinHandle;

pub const REGISTER_CHANNEL_SIZE: usize = 8;
pub const NOTIFY_CHANNEL_SIZE: usize = 1024;

/// The six domain events of §6, each carrying the payload the section
/// describes. `InitialTransactionAnalysis` embeds its txid directly rather
/// than via the `:<txid>` name-suffix convention of the prose, since Rust
/// enums don't need string-typed topic names to discriminate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    InitialTransactionAnalysis {
        txid: Txid,
        analysis: TransactionAnalysis,
    },
    NewTransactionAnalysis {
        txid: Txid,
        old_analysis: TransactionAnalysis,
        new_analysis: TransactionAnalysis,
    },
    BlocksSkipped,
    NewBlockAnalyzed {
        block_hashes: Vec<BlockHash>,
        best_block_height: u64,
        new_blocks: usize,
    },
    NewAddressPayment {
        address: String,
        txid: Txid,
        status: btcwatch_types::TransactionStatus,
        confirmations: u32,
        multi_address: bool,
        income_sats: Option<u64>,
        outcome_sats: Option<u64>,
    },
    AddressOverload {
        address: String,
    },
    NewMempoolClearStatus {
        is_clear: bool,
    },
}

type StopSignal = ();
pub type NotifyRegister = Sender<btcwatch_channel::Request<(String, usize), Receiver<WatcherEvent>>>;

#[derive(Default)]
pub struct NotifyService {}

#[derive(Clone)]
pub struct NotifyController {
    signal: Sender<StopSignal>,
    register: NotifyRegister,
    notifier: Sender<WatcherEvent>,
}

impl NotifyService {
    /// Start the bus on its own OS thread, fanning every published event out
    /// to every registered subscriber via a `select!`-driven dispatch loop
    /// with two arms: register and notify.
    pub fn start<S: ToString>(self, thread_name: Option<S>) -> (JoinHandle<()>, NotifyController) {
        let (signal_sender, signal_receiver) = channel::bounded::<()>(REGISTER_CHANNEL_SIZE);
        let (register_sender, register_receiver) = channel::bounded(REGISTER_CHANNEL_SIZE);
        let (notify_sender, notify_receiver) = channel::bounded::<WatcherEvent>(NOTIFY_CHANNEL_SIZE);

        let mut subscribers: HashMap<String, Sender<WatcherEvent>> = HashMap::new();

        let mut builder = thread::Builder::new();
        if let Some(name) = thread_name {
            builder = builder.name(name.to_string());
        }
        let join_handle = builder
            .spawn(move || loop {
                channel::select! {
                    recv(signal_receiver) -> _ => break,
                    recv(register_receiver) -> msg => Self::handle_register(&mut subscribers, msg),
                    recv(notify_receiver) -> msg => Self::handle_notify(&subscribers, msg),
                }
            })
            .expect("spawn notify thread failed");

        (
            join_handle,
            NotifyController {
                signal: signal_sender,
                register: register_sender,
                notifier: notify_sender,
            },
        )
    }

    fn handle_register(
        subscribers: &mut HashMap<String, Sender<WatcherEvent>>,
        msg: Result<
            btcwatch_channel::Request<(String, usize), Receiver<WatcherEvent>>,
            channel::RecvError,
        >,
    ) {
        match msg {
            Ok(btcwatch_channel::Request {
                responder,
                arguments: (name, capacity),
            }) => {
                debug!("notify: register subscriber {name:?}");
                let (sender, receiver) = channel::bounded(capacity);
                subscribers.insert(name, sender);
                let _ = responder.send(receiver);
            }
            Err(_) => warn!("notify: register channel closed"),
        }
    }

    fn handle_notify(
        subscribers: &HashMap<String, Sender<WatcherEvent>>,
        msg: Result<WatcherEvent, channel::RecvError>,
    ) {
        match msg {
            Ok(event) => {
                trace!("notify: dispatching {event:?}");
                for subscriber in subscribers.values() {
                    let _ = subscriber.send(event.clone());
                }
            }
            Err(_) => warn!("notify: publish channel closed"),
        }
    }
}

impl NotifyController {
    pub fn stop(self) {
        let _ = self.signal.send(());
    }

    pub fn subscribe<S: ToString>(&self, name: S) -> Receiver<WatcherEvent> {
        btcwatch_channel::Request::call(&self.register, (name.to_string(), NOTIFY_CHANNEL_SIZE))
            .expect("subscribe failed: notify service gone")
    }

    pub fn notify(&self, event: WatcherEvent) {
        let _ = self.notifier.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fans_out_to_every_subscriber() {
        let (handle, notify) = NotifyService::default().start(Some("notify-test"));
        let r1 = notify.subscribe("a");
        let r2 = notify.subscribe("b");
        notify.notify(WatcherEvent::BlocksSkipped);
        assert_eq!(r1.recv(), Ok(WatcherEvent::BlocksSkipped));
        assert_eq!(r2.recv(), Ok(WatcherEvent::BlocksSkipped));
        notify.stop();
        handle.join().unwrap();
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let (handle, notify) = NotifyService::default().start::<&str>(None);
        notify.notify(WatcherEvent::NewMempoolClearStatus { is_clear: true });
        let r = notify.subscribe("late");
        notify.notify(WatcherEvent::NewMempoolClearStatus { is_clear: false });
        assert_eq!(
            r.recv(),
            Ok(WatcherEvent::NewMempoolClearStatus { is_clear: false })
        );
        notify.stop();
        handle.join().unwrap();
    }
}
