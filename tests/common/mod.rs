//! Shared utilities for integration tests: an in-memory chain running the aid
//! distribution contract, plus facade wiring around it.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aid_ledger::blockchain::contract::AidDistribution;
use aid_ledger::blockchain::{
    parse_private_key, BlockchainError, BlockchainResult, CallRequest, ChainId, ChainLog, Connection,
    Connector, LogQuery, ReceiptSummary, SignedTransaction,
};
use aid_ledger::config::schema::{
    EventsConfig, FacadeConfig, LedgerConfig, NetworkConfig, RetryConfig, TransactionConfig,
};
use aid_ledger::events::{CursorStore, EventHandler, EventKey, HandlerError, LedgerEvent, MemoryCursorStore};
use aid_ledger::ledger::{LedgerComponents, LedgerFacade};
use aid_ledger::registry::{parse_abi, ContractDirectory, NetworkRegistry};
use alloy::primitives::{address, hex, Address, Bytes, TxHash, B256, U256};
use alloy::sol_types::{Revert, SolCall, SolError, SolEvent, SolValue};
use async_trait::async_trait;

pub const CHAIN_ID: u64 = 31337;
pub const CONTRACT: Address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");

/// Anvil's first development keys: operator, donor, second donor.
pub const OPERATOR_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const DONOR_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const SECOND_DONOR_KEY: &str = "0x5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a";

pub fn address_of(key: &str) -> Address {
    parse_private_key(key).unwrap().address()
}

pub fn wei(ether: u64) -> U256 {
    U256::from(ether) * U256::from(1_000_000_000_000_000_000u128)
}

#[derive(Debug, Clone, Default)]
struct ChainState {
    head: u64,
    nonces: HashMap<Address, u64>,
    receipts: HashMap<TxHash, ReceiptSummary>,
    logs: Vec<ChainLog>,
    donor_totals: HashMap<Address, U256>,
    aid_records: Vec<(Address, U256, u8)>,
    balance: U256,
    seen: HashSet<TxHash>,
}

#[derive(Debug, Default)]
struct Controls {
    offline: bool,
    manual_mining: bool,
    mempool: Vec<SignedTransaction>,
    reject_next: Option<BlockchainError>,
    lost_responses: u32,
    block_sends: bool,
    sever_after_send: Option<bool>,
    sent: Vec<SignedTransaction>,
    log_queries: u32,
    call_blocks: Vec<Option<u64>>,
}

/// In-memory EVM chain with the aid distribution contract deployed at [`CONTRACT`].
///
/// Mines one block per transaction unless manual mining is on. Reverting
/// transactions are mined with a failed receipt, like a node would with a fixed
/// gas limit, and replaying them as calls yields the revert reason.
#[derive(Debug)]
pub struct MockChain {
    state: Mutex<ChainState>,
    controls: Mutex<Controls>,
    gas_price: u128,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                head: 1,
                ..ChainState::default()
            }),
            controls: Mutex::new(Controls::default()),
            gas_price: 1_000_000_000,
        })
    }

    pub fn head(&self) -> u64 {
        self.state.lock().unwrap().head
    }

    /// Produce `count` empty blocks.
    pub fn advance(&self, count: u64) {
        self.state.lock().unwrap().head += count;
    }

    pub fn set_offline(&self, offline: bool) {
        self.controls.lock().unwrap().offline = offline;
    }

    /// Keep accepted transactions in the mempool until [`MockChain::mine_pending`].
    pub fn set_manual_mining(&self, manual: bool) {
        self.controls.lock().unwrap().manual_mining = manual;
    }

    /// Answer the next send with `error`.
    pub fn reject_next(&self, error: BlockchainError) {
        self.controls.lock().unwrap().reject_next = Some(error);
    }

    /// Accept the next `count` sends but drop the response.
    pub fn lose_responses(&self, count: u32) {
        self.controls.lock().unwrap().lost_responses = count;
    }

    /// Fail every send in transport without the node seeing it.
    pub fn block_sends(&self, blocked: bool) {
        self.controls.lock().unwrap().block_sends = blocked;
    }

    /// Accept the next send, then cut the link: later sends fail in transport, and
    /// reads fail too when `reads_too` is set.
    pub fn sever_after_next_send(&self, reads_too: bool) {
        self.controls.lock().unwrap().sever_after_send = Some(reads_too);
    }

    /// Block parameter of every `eth_call`, in order.
    pub fn call_blocks(&self) -> Vec<Option<u64>> {
        self.controls.lock().unwrap().call_blocks.clone()
    }

    /// Every transaction the node accepted, in arrival order.
    pub fn sent(&self) -> Vec<SignedTransaction> {
        self.controls.lock().unwrap().sent.clone()
    }

    pub fn log_queries(&self) -> u32 {
        self.controls.lock().unwrap().log_queries
    }

    pub fn nonce_of(&self, address: Address) -> u64 {
        self.state.lock().unwrap().nonces.get(&address).copied().unwrap_or(0)
    }

    /// Mine every pending transaction into one new block.
    pub fn mine_pending(&self) {
        let pending = std::mem::take(&mut self.controls.lock().unwrap().mempool);
        let mut state = self.state.lock().unwrap();
        state.head += 1;
        let block = state.head;
        let mut log_index = 0;
        for tx in pending {
            include(&mut state, &tx, block, &mut log_index);
        }
    }

    /// Emit a raw contract log in a new block, as another sender's transaction would.
    pub fn emit(&self, topics: Vec<B256>, data: Bytes) -> ChainLog {
        let mut state = self.state.lock().unwrap();
        state.head += 1;
        let log = ChainLog {
            address: CONTRACT,
            topics,
            data,
            block_number: state.head,
            log_index: 0,
            tx_hash: B256::left_padding_from(&state.head.to_be_bytes()),
        };
        state.logs.push(log.clone());
        log
    }

    /// Emit a donation from `donor` in a new block.
    pub fn emit_donation(&self, donor: Address, amount: U256) -> ChainLog {
        let event = AidDistribution::DonationMade {
            donor,
            amount,
            timestamp: U256::from(1_700_000_000u64 + self.head()),
        };
        let data = event.encode_log_data();
        self.emit(data.topics().to_vec(), data.data)
    }

    fn check_online(&self) -> BlockchainResult<()> {
        if self.controls.lock().unwrap().offline {
            return Err(BlockchainError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    fn accept(&self, tx: &SignedTransaction) -> BlockchainResult<TxHash> {
        let mut controls = self.controls.lock().unwrap();
        if controls.offline {
            return Err(BlockchainError::Connection("connection refused".to_string()));
        }
        if controls.block_sends {
            return Err(BlockchainError::Connection("connection reset by peer".to_string()));
        }
        if let Some(error) = controls.reject_next.take() {
            return Err(error);
        }

        let mut state = self.state.lock().unwrap();
        if state.seen.contains(&tx.hash) {
            return Err(BlockchainError::rpc(-32000, "already known"));
        }
        let expected = state.nonces.get(&tx.from).copied().unwrap_or(0);
        if tx.nonce < expected {
            return Err(BlockchainError::rpc(-32000, "nonce too low"));
        }
        if tx.nonce > expected {
            return Err(BlockchainError::rpc(
                -32000,
                format!("nonce too high: expected {}, got {}", expected, tx.nonce),
            ));
        }

        state.nonces.insert(tx.from, expected + 1);
        state.seen.insert(tx.hash);
        controls.sent.push(tx.clone());

        if controls.manual_mining {
            controls.mempool.push(tx.clone());
        } else {
            state.head += 1;
            let block = state.head;
            include(&mut state, tx, block, &mut 0);
        }

        if let Some(reads_too) = controls.sever_after_send.take() {
            controls.block_sends = true;
            controls.offline = reads_too;
            return Err(BlockchainError::Connection("connection reset by peer".to_string()));
        }
        if controls.lost_responses > 0 {
            controls.lost_responses -= 1;
            return Err(BlockchainError::Connection("connection reset by peer".to_string()));
        }
        Ok(tx.hash)
    }
}

/// Apply `tx` in `block` and store its receipt. A revert keeps only the nonce.
fn include(state: &mut ChainState, tx: &SignedTransaction, block: u64, log_index: &mut u64) {
    let mut scratch = state.clone();
    let (success, logs) = match execute(&mut scratch, tx.from, &tx.input, tx.value, block) {
        Ok((_, emitted)) => {
            *state = scratch;
            let logs: Vec<ChainLog> = emitted
                .into_iter()
                .map(|(topics, data)| {
                    let log = ChainLog {
                        address: tx.to,
                        topics,
                        data,
                        block_number: block,
                        log_index: *log_index,
                        tx_hash: tx.hash,
                    };
                    *log_index += 1;
                    log
                })
                .collect();
            state.logs.extend(logs.iter().cloned());
            (true, logs)
        }
        Err(_) => (false, Vec::new()),
    };

    state.receipts.insert(
        tx.hash,
        ReceiptSummary {
            tx_hash: tx.hash,
            block_number: block,
            success,
            logs,
        },
    );
}

type Emitted = Vec<(Vec<B256>, Bytes)>;

fn calls<C: SolCall>(selector: [u8; 4]) -> bool {
    selector == C::SELECTOR
}

fn emit<E: SolEvent>(event: &E) -> (Vec<B256>, Bytes) {
    let log = event.encode_log_data();
    (log.topics().to_vec(), log.data)
}

/// Run one contract call. `Err` carries the revert reason.
fn execute(
    state: &mut ChainState,
    from: Address,
    input: &[u8],
    value: U256,
    block: u64,
) -> Result<(Vec<u8>, Emitted), String> {
    let selector: [u8; 4] = input
        .get(..4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| "missing selector".to_string())?;

    if calls::<AidDistribution::donateCall>(selector) {
        if value.is_zero() {
            return Err("Donation amount must be greater than zero".to_string());
        }
        *state.donor_totals.entry(from).or_default() += value;
        state.balance += value;
        let event = AidDistribution::DonationMade {
            donor: from,
            amount: value,
            timestamp: U256::from(1_700_000_000u64 + block),
        };
        Ok((Vec::new(), vec![emit(&event)]))
    } else if calls::<AidDistribution::fundCall>(selector) {
        if value.is_zero() {
            return Err("Funding amount must be greater than zero".to_string());
        }
        state.balance += value;
        let event = AidDistribution::ContractFunded {
            funder: from,
            amount: value,
        };
        Ok((Vec::new(), vec![emit(&event)]))
    } else if calls::<AidDistribution::createAidRecordCall>(selector) {
        let call = AidDistribution::createAidRecordCall::abi_decode(input).map_err(|e| e.to_string())?;
        if call.amount.is_zero() {
            return Err("Aid amount must be greater than zero".to_string());
        }
        state.aid_records.push((call.receiver, call.amount, 0));
        let id = U256::from(state.aid_records.len());
        let event = AidDistribution::AidRecordCreated {
            id,
            receiver: call.receiver,
            amount: call.amount,
        };
        Ok((id.abi_encode(), vec![emit(&event)]))
    } else if calls::<AidDistribution::updateAidStatusCall>(selector) {
        let call = AidDistribution::updateAidStatusCall::abi_decode(input).map_err(|e| e.to_string())?;
        aid_slot(state, call.id)?.2 = call.status;
        let event = AidDistribution::AidStatusUpdated {
            id: call.id,
            status: call.status,
        };
        Ok((Vec::new(), vec![emit(&event)]))
    } else if calls::<AidDistribution::getDonorTotalCall>(selector) {
        let call = AidDistribution::getDonorTotalCall::abi_decode(input).map_err(|e| e.to_string())?;
        let total = state.donor_totals.get(&call.donor).copied().unwrap_or_default();
        Ok((total.abi_encode(), Vec::new()))
    } else if calls::<AidDistribution::getAidRecordCall>(selector) {
        let call = AidDistribution::getAidRecordCall::abi_decode(input).map_err(|e| e.to_string())?;
        let record = *aid_slot(state, call.id)?;
        let ret = AidDistribution::getAidRecordReturn {
            receiver: record.0,
            amount: record.1,
            status: record.2,
        };
        Ok((AidDistribution::getAidRecordCall::abi_encode_returns(&ret), Vec::new()))
    } else {
        Err("unknown function".to_string())
    }
}

fn aid_slot(state: &mut ChainState, id: U256) -> Result<&mut (Address, U256, u8), String> {
    if id.is_zero() || id > U256::from(state.aid_records.len()) {
        return Err("Aid record does not exist".to_string());
    }
    let index = id.saturating_to::<usize>() - 1;
    state
        .aid_records
        .get_mut(index)
        .ok_or_else(|| "Aid record does not exist".to_string())
}

fn revert_error(reason: &str) -> BlockchainError {
    let data = Revert {
        reason: reason.to_string(),
    }
    .abi_encode();
    BlockchainError::Rpc {
        code: 3,
        message: "execution reverted".to_string(),
        data: Some(format!("\"{}\"", hex::encode_prefixed(data))),
    }
}

/// A connection to the mock chain.
#[derive(Debug)]
pub struct MockConnection {
    chain: Arc<MockChain>,
}

#[async_trait]
impl Connection for MockConnection {
    fn endpoint(&self) -> String {
        "mock".to_string()
    }

    async fn chain_id(&self) -> BlockchainResult<ChainId> {
        self.chain.check_online()?;
        Ok(ChainId(CHAIN_ID))
    }

    async fn block_number(&self) -> BlockchainResult<u64> {
        self.chain.check_online()?;
        Ok(self.chain.head())
    }

    async fn transaction_count(&self, address: Address) -> BlockchainResult<u64> {
        self.chain.check_online()?;
        Ok(self.chain.nonce_of(address))
    }

    async fn gas_price(&self) -> BlockchainResult<u128> {
        self.chain.check_online()?;
        Ok(self.chain.gas_price)
    }

    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> BlockchainResult<TxHash> {
        self.chain.accept(tx)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> BlockchainResult<Option<ReceiptSummary>> {
        self.chain.check_online()?;
        Ok(self.chain.state.lock().unwrap().receipts.get(&hash).cloned())
    }

    async fn call(&self, request: &CallRequest, block: Option<u64>) -> BlockchainResult<Bytes> {
        self.chain.check_online()?;
        self.chain.controls.lock().unwrap().call_blocks.push(block);
        let mut scratch = self.chain.state.lock().unwrap().clone();
        let at = block.unwrap_or(scratch.head);
        let from = request.from.unwrap_or_default();
        execute(&mut scratch, from, &request.input, request.value, at)
            .map(|(output, _)| Bytes::from(output))
            .map_err(|reason| revert_error(&reason))
    }

    async fn logs(&self, query: &LogQuery) -> BlockchainResult<Vec<ChainLog>> {
        self.chain.check_online()?;
        self.chain.controls.lock().unwrap().log_queries += 1;
        let state = self.chain.state.lock().unwrap();
        Ok(state.logs.iter().filter(|log| query.matches(log)).cloned().collect())
    }
}

/// Opens [`MockConnection`]s; refuses while the chain is offline.
#[derive(Debug)]
pub struct MockConnector {
    chain: Arc<MockChain>,
    connects: AtomicU32,
}

impl MockConnector {
    pub fn new(chain: Arc<MockChain>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            connects: AtomicU32::new(0),
        })
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _network: &NetworkConfig) -> BlockchainResult<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.chain.check_online()?;
        Ok(Arc::new(MockConnection {
            chain: self.chain.clone(),
        }))
    }
}

/// Fast timings for tests.
pub fn test_config() -> LedgerConfig {
    LedgerConfig {
        ledger: FacadeConfig {
            default_network: "local".to_string(),
            contract: "AidDistribution".to_string(),
            operator: Some("operator".to_string()),
        },
        networks: vec![NetworkConfig {
            name: "local".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: CHAIN_ID,
            confirmation_blocks: 1,
            ..NetworkConfig::default()
        }],
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 5,
            max_delay_ms: 20,
        },
        transactions: TransactionConfig {
            poll_interval_ms: 10,
            confirmation_timeout_secs: 5,
            ..TransactionConfig::default()
        },
        events: EventsConfig {
            poll_interval_ms: 20,
            max_block_range: 5,
            channel_capacity: 64,
            ..EventsConfig::default()
        },
        ..LedgerConfig::default()
    }
}

pub fn directory(networks: &NetworkRegistry) -> ContractDirectory {
    let book = format!(r#"{{ "AidDistribution": {{ "local": "{}" }} }}"#, CONTRACT);
    let abi = parse_abi(include_str!("../../abi/AidDistribution.json")).unwrap();
    let abis = HashMap::from([("AidDistribution".to_string(), abi)]);
    ContractDirectory::from_sources(&book, abis, networks).unwrap()
}

pub fn facade(chain: &Arc<MockChain>) -> LedgerFacade {
    facade_with(chain, test_config(), Arc::new(MemoryCursorStore::new()))
}

pub fn facade_with(chain: &Arc<MockChain>, config: LedgerConfig, cursors: Arc<dyn CursorStore>) -> LedgerFacade {
    let networks = NetworkRegistry::new(config.networks.clone()).unwrap();
    let contracts = directory(&networks);
    let signers = vec![
        ("operator".to_string(), parse_private_key(OPERATOR_KEY).unwrap()),
        ("donor".to_string(), parse_private_key(DONOR_KEY).unwrap()),
        ("second-donor".to_string(), parse_private_key(SECOND_DONOR_KEY).unwrap()),
    ];
    LedgerFacade::assemble(
        config,
        LedgerComponents {
            networks,
            contracts,
            connector: MockConnector::new(chain.clone()),
            signers,
            cursors,
        },
    )
    .unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Records every delivered event. Can be told to refuse deliveries.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<LedgerEvent>>,
    /// Refuse `.1` deliveries once `.0` events have been recorded.
    failure: Mutex<Option<(usize, u32)>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse the next `count` deliveries.
    pub fn fail_next(&self, count: u32) {
        self.fail_after(self.len(), count);
    }

    /// Accept until `recorded` events are stored, then refuse `count` deliveries.
    pub fn fail_after(&self, recorded: usize, count: u32) {
        *self.failure.lock().unwrap() = Some((recorded, count));
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<EventKey> {
        self.events().iter().map(LedgerEvent::key).collect()
    }

    pub fn blocks(&self) -> Vec<u64> {
        self.events().iter().map(|e| e.block_number).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &LedgerEvent) -> Result<(), HandlerError> {
        let mut events = self.events.lock().unwrap();
        let mut failure = self.failure.lock().unwrap();
        if let Some((recorded, remaining)) = failure.as_mut() {
            if events.len() >= *recorded && *remaining > 0 {
                *remaining -= 1;
                return Err(HandlerError::new("injected failure"));
            }
        }
        events.push(event.clone());
        Ok(())
    }
}
