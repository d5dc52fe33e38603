//! Task Scheduler (§4.5): the single-threaded cooperative loop that owns
//! every mutation of watch state (§5).
//!
//! Turn selection is a strict priority ladder. Only the Transaction Analyzer
//! and the Analyzed-Block Window's RPC call are run through the
//! payload-buffering wrapper (`run_buffered`): those are the two suspension
//! points §5 calls out by name. The scheduler's own turn functions are free
//! to `.await` their RPC calls directly otherwise — no other turn holds
//! state open long enough, or talks to enough endpoints in one go, to need
//! the raw-tx stream buffered underneath it.

use crate::address_reporter;
use crate::block_analyzer;
use crate::control::{ControlMessage, WatcherHandle, WatcherStats, CONTROL_CHANNEL_SIZE};
use crate::mempool::MempoolObserver;
use crate::queues::WorkQueues;
use crate::state::WatchState;
use crate::tx_analyzer;
use crate::window;
use bitcoin::{Network, Txid};
use btcwatch_error::{InvariantError, InvariantErrorKind, RpcError};
use btcwatch_logger::{debug, warn};
use btcwatch_notify::{NotifyController, WatcherEvent};
use btcwatch_rpc_client::RpcClient;
use btcwatch_stream_subscriber::StreamEvent;
use btcwatch_tx_decoder::TxDecoder;
use btcwatch_types::{AddressKind, TransactionStatus, MEMPOOL_RECHECK_BATCH};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const BLOCK_DEBOUNCE: Duration = Duration::from_secs(3);
const RAW_MEMPOOL_INTERVAL: Duration = Duration::from_secs(600);
const TURN_ERROR_BACKOFF: Duration = Duration::from_secs(10);

pub struct Scheduler {
    rpc: RpcClient,
    notify: NotifyController,
    decoder: TxDecoder,
    state: WatchState,
    queues: WorkQueues,
    mempool: MempoolObserver,
    stream_events: mpsc::Receiver<StreamEvent>,
    control: mpsc::Receiver<ControlMessage>,
    stop: CancellationToken,
    chain: Option<Network>,
    block_debounce_deadline: Option<Instant>,
}

impl Scheduler {
    /// `network` is already known by the time a `Scheduler` is built: the
    /// startup sequence (§5) only reaches this point after `getblockchaininfo`
    /// has succeeded, so `get_chain()` can report it immediately rather than
    /// starting out as `None`.
    pub fn new(
        rpc: RpcClient,
        notify: NotifyController,
        network: Network,
        stream_events: mpsc::Receiver<StreamEvent>,
        stop: CancellationToken,
    ) -> (Self, WatcherHandle) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        let scheduler = Self {
            rpc,
            notify,
            decoder: TxDecoder::new(network),
            state: WatchState::new(),
            queues: WorkQueues::new(),
            mempool: MempoolObserver::new(),
            stream_events,
            control: control_rx,
            stop,
            chain: Some(network),
            block_debounce_deadline: None,
        };
        (scheduler, WatcherHandle::new(control_tx))
    }

    /// Runs until the cancellation token fires or the stream channel closes.
    pub async fn run(mut self) {
        let mut raw_mempool_timer = tokio::time::interval(RAW_MEMPOOL_INTERVAL);
        raw_mempool_timer.tick().await;
        // First-boot one-shot sweep (§4.9): arm the full scan immediately so
        // `recheck_mempool_transactions` gets seeded before the 10 min timer
        // would otherwise fire.
        self.queues.check_raw_mempool = true;

        loop {
            if self.stop.is_cancelled() {
                break;
            }

            while let Ok(event) = self.stream_events.try_recv() {
                self.handle_stream_event(event);
            }
            while let Ok(msg) = self.control.try_recv() {
                self.handle_control(msg);
            }

            if !self.queues.is_idle() {
                if let Err(e) = self.run_turn().await {
                    warn!("scheduler turn failed, backing off: {e:?}");
                    tokio::time::sleep(TURN_ERROR_BACKOFF).await;
                }
                continue;
            }

            let debounce = self.block_debounce_deadline;
            tokio::select! {
                _ = self.stop.cancelled() => break,
                maybe_event = self.stream_events.recv() => match maybe_event {
                    Some(event) => self.handle_stream_event(event),
                    None => break,
                },
                maybe_msg = self.control.recv() => {
                    if let Some(msg) = maybe_msg {
                        self.handle_control(msg);
                    }
                }
                _ = raw_mempool_timer.tick() => {
                    self.queues.check_raw_mempool = true;
                }
                _ = sleep_until_or_pending(debounce) => {
                    self.block_debounce_deadline = None;
                    self.queues.check_new_block = true;
                }
            }
        }
    }

    /// Only reached from the outer loop, which never runs concurrently with
    /// `run_buffered`'s own event loop below — so there's no case here where
    /// an analysis is already in flight.
    fn handle_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::BlockHint => self.arm_block_debounce(),
            StreamEvent::RawTx(bytes) => self.process_raw_tx_bytes(&bytes),
        }
    }

    fn buffer_during_analysis(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::BlockHint => self.arm_block_debounce(),
            StreamEvent::RawTx(bytes) => {
                if let Ok(decoded) = self.decoder.decode(&bytes) {
                    self.queues.transaction_payloads_queue.push_back(decoded);
                } else {
                    debug!("dropping undecodable stream payload received while buffering");
                }
            }
        }
    }

    fn arm_block_debounce(&mut self) {
        self.block_debounce_deadline = Some(Instant::now() + BLOCK_DEBOUNCE);
    }

    fn process_raw_tx_bytes(&mut self, bytes: &[u8]) {
        match self.decoder.decode(bytes) {
            Ok(decoded) => self.process_decoded_tx(decoded),
            Err(e) => debug!("stream tx decode failed: {e:?}"),
        }
    }

    /// §4.6 "Stream fast path".
    fn process_decoded_tx(&mut self, tx: btcwatch_types::DecodedTransaction) {
        if tx.is_coinbase {
            self.arm_block_debounce();
        }

        let already_watched_without_inputs = self
            .state
            .transaction_analyses
            .get(&tx.txid)
            .is_some_and(|a| a.transaction_input_keys.is_none());
        let pays_watched_address = tx.outputs.iter().any(|output| match &output.address {
            AddressKind::Address(address) => self.state.watched_addresses.contains_key(address),
            AddressKind::BareMultisig | AddressKind::None => false,
        });
        if already_watched_without_inputs || pays_watched_address {
            self.queues.transactions_to_reanalyze.push_back(tx.txid);
        }

        block_analyzer::check_conflicts_against_inputs(&mut self.state, &self.notify, &mut self.queues, &tx);
    }

    fn drain_payload_queue(&mut self) {
        while let Some(tx) = self.queues.transaction_payloads_queue.pop_front() {
            self.process_decoded_tx(tx);
        }
    }

    fn handle_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::WatchNewTransaction(txid) => self.queues.new_transactions_to_watch.push_back(txid),
            ControlMessage::UnwatchTransaction(txid) => self.queues.transactions_to_unwatch.push_back(txid),
            ControlMessage::WatchAddress(address, reply) => {
                let already_overloaded = self.state.watched_addresses.entry(address).or_default().overloaded;
                let _ = reply.send(already_overloaded);
            }
            ControlMessage::UnwatchAddress(address) => {
                self.state.watched_addresses.remove(&address);
            }
            ControlMessage::CountTasks(reply) => {
                let _ = reply.send(self.queues.count_tasks());
            }
            ControlMessage::GetChain(reply) => {
                let _ = reply.send(self.chain);
            }
            ControlMessage::GetMempoolWeight(reply) => {
                let _ = reply.send(self.mempool.weight());
            }
            ControlMessage::IsMempoolClear(reply) => {
                let _ = reply.send(self.mempool.is_clear());
            }
            ControlMessage::GetStats(reply) => {
                let _ = reply.send(WatcherStats {
                    queues: self.queues.queue_lengths(),
                    mempool_weight: self.mempool.weight(),
                    mempool_clear: self.mempool.is_clear(),
                });
            }
        }
    }

    async fn run_turn(&mut self) -> Result<(), RpcError> {
        if let Some(txid) = self.queues.transactions_to_unwatch.pop_front() {
            self.state.remove(&txid);
            return Ok(());
        }

        if let Some(txid) = self.queues.new_transactions_to_watch.pop_front() {
            if let Err(e) = self.run_watch_new(txid).await {
                self.queues.new_transactions_to_watch.push_front(txid);
                return Err(e);
            }
            return Ok(());
        }

        if let Some(txid) = self.queues.transactions_to_reanalyze.pop_front() {
            if let Err(e) = self.run_reanalyze(txid).await {
                self.queues.transactions_to_reanalyze.push_front(txid);
                return Err(e);
            }
            return Ok(());
        }

        if self.queues.check_new_block {
            self.queues.check_new_block = false;
            if let Err(e) = self.run_check_new_block().await {
                self.queues.check_new_block = true;
                return Err(e);
            }
            return Ok(());
        }

        if !self.queues.recheck_mempool_transactions.is_empty() {
            self.run_recheck_mempool_batch().await;
            return Ok(());
        }

        if self.queues.check_mempool_size {
            self.queues.check_mempool_size = false;
            if let Err(e) = self.mempool.check_size(&self.rpc, &self.notify).await {
                self.queues.check_mempool_size = true;
                return Err(e);
            }
            return Ok(());
        }

        if self.queues.check_raw_mempool {
            self.queues.check_raw_mempool = false;
            if let Err(e) = self.run_check_raw_mempool().await {
                self.queues.check_raw_mempool = true;
                return Err(e);
            }
            return Ok(());
        }

        Ok(())
    }

    async fn run_watch_new(&mut self, txid: Txid) -> Result<(), RpcError> {
        let rpc = self.rpc.clone();
        let window = self.state.window.clone();
        let analysis = self.run_buffered(tx_analyzer::analyze(rpc, window, txid, true)).await?;
        self.drain_payload_queue();

        if analysis.status == TransactionStatus::FullConfirmation {
            self.queues.transactions_to_unwatch.push_back(txid);
        }
        self.notify.notify(WatcherEvent::InitialTransactionAnalysis {
            txid,
            analysis: analysis.clone(),
        });
        self.state.set_analysis(txid, analysis);
        self.warn_if_unwatch_race(txid);
        Ok(())
    }

    async fn run_reanalyze(&mut self, txid: Txid) -> Result<(), RpcError> {
        let rpc = self.rpc.clone();
        let window = self.state.window.clone();
        let new = self.run_buffered(tx_analyzer::analyze(rpc, window, txid, true)).await?;
        self.drain_payload_queue();

        tx_analyzer::merge_and_emit(&mut self.state, &self.notify, &mut self.queues, txid, new, true);
        self.warn_if_unwatch_race(txid);

        if let Some(analysis) = self.state.transaction_analyses.get(&txid).cloned() {
            if let Some(raw) = &analysis.raw_transaction {
                address_reporter::report_transaction(&self.rpc, &mut self.state, &self.notify, raw, analysis.confirmations).await;
            }
        }
        Ok(())
    }

    async fn run_check_new_block(&mut self) -> Result<(), RpcError> {
        let tip = self.rpc.get_best_block_hash().await?;
        if self.state.window.contains(&tip) {
            return Ok(());
        }

        let rpc = self.rpc.clone();
        let window = self.state.window.clone();
        let outcome = self.run_buffered(window::integrate(window, rpc, tip)).await?;
        self.drain_payload_queue();

        block_analyzer::run(&self.rpc, &mut self.state, &self.notify, &mut self.queues, outcome).await?;
        self.queues.check_mempool_size = true;
        Ok(())
    }

    /// §4.5 turn 5: batches of <= B txids, fed into the conflict checker and
    /// the address reporter, no Transaction Analyzer merge involved.
    async fn run_recheck_mempool_batch(&mut self) {
        let mut batch = Vec::with_capacity(MEMPOOL_RECHECK_BATCH);
        for _ in 0..MEMPOOL_RECHECK_BATCH {
            let Some(txid) = self.queues.recheck_mempool_transactions.pop_front() else {
                break;
            };
            batch.push(txid);
        }

        let results = self.rpc.get_raw_transactions_batch(&batch).await;
        for result in results {
            match result {
                Ok(raw) => {
                    block_analyzer::check_conflicts_against_inputs(
                        &mut self.state,
                        &self.notify,
                        &mut self.queues,
                        &raw.decoded,
                    );
                    address_reporter::report_transaction(&self.rpc, &mut self.state, &self.notify, &raw.decoded, raw.confirmations)
                        .await;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("mempool recheck fetch failed: {e:?}"),
            }
        }
    }

    async fn run_check_raw_mempool(&mut self) -> Result<(), RpcError> {
        let entries = self.rpc.get_raw_mempool().await?;
        let total_weight: u64 = entries.values().map(|e| e.weight).sum();
        self.mempool.observe_total_weight(total_weight, &self.notify);

        if self.queues.initial_sweep_pending {
            self.queues.recheck_mempool_transactions.extend(entries.keys().copied());
            self.queues.initial_sweep_pending = false;
        }
        Ok(())
    }

    /// §4.5 "payload-queue discipline": keep polling the raw-tx stream while
    /// `fut` is in flight, buffering anything that arrives instead of
    /// racing it against the in-progress analysis.
    /// §7 item 4: a txid can be re-queued to unwatch by a control message or
    /// a full-confirmation merge while its own analysis turn is still
    /// suspended on an RPC call; detect rather than silently overwrite.
    fn warn_if_unwatch_race(&self, txid: Txid) {
        if self.state.is_watched(&txid) && self.queues.transactions_to_unwatch.iter().any(|t| *t == txid) {
            warn!(
                "{}",
                InvariantError::new(InvariantErrorKind::UnwatchRace, format!("txid {txid}"))
            );
        }
    }

    async fn run_buffered<T: Send + 'static>(&mut self, fut: impl Future<Output = T> + Send + 'static) -> T {
        self.queues.analysis_in_flight = true;
        tokio::pin!(fut);
        let result = loop {
            tokio::select! {
                Some(event) = self.stream_events.recv() => {
                    self.buffer_during_analysis(event);
                }
                out = &mut fut => break out,
            }
        };
        self.queues.analysis_in_flight = false;
        result
    }
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
