//! End-to-end verification scenarios over a real store: genesis loading,
//! chain extension, reorgs, state-root mismatches and executed transfers.

use alloy_primitives::{keccak256, Address, Bytes, B256, B64, U256};
use alloy_trie::{
    root::{ordered_trie_root_with_encoder, state_root_unhashed},
    TrieAccount, EMPTY_ROOT_HASH,
};
use corten_chainspec::{ChainConfig, GenesisAccount, GenesisSpec, SealEngineType};
use corten_engine::{ExecutionEngine, VerificationResult};
use corten_primitives::{
    Block, BlockBody, BlockHeader, Receipt, Transaction, TxType, EMPTY_LIST_HASH, EMPTY_ROOT,
};
use corten_stages::TransferEvm;
use corten_storage::{initialize_genesis, read_chain_config, StateProvider, Store};
use k256::ecdsa::SigningKey;
use std::collections::BTreeMap;
use std::sync::{atomic::AtomicBool, Arc};
use tempfile::TempDir;

const GAS_LIMIT: u64 = 30_000_000;
const BENEFICIARY: Address = Address::repeat_byte(0xee);

fn test_config() -> ChainConfig {
    ChainConfig {
        chain_id: 1337,
        seal_engine: SealEngineType::NoProof,
        homestead_block: Some(0),
        tangerine_whistle_block: Some(0),
        spurious_dragon_block: Some(0),
        byzantium_block: Some(0),
        constantinople_block: Some(0),
        petersburg_block: Some(0),
        istanbul_block: Some(0),
        berlin_block: Some(0),
        terminal_total_difficulty: Some(U256::ZERO),
        merge_netsplit_block: Some(0),
        ..Default::default()
    }
}

fn test_genesis(alloc: BTreeMap<Address, GenesisAccount>) -> GenesisSpec {
    GenesisSpec {
        config: test_config(),
        nonce: B64::ZERO,
        timestamp: 0,
        extra_data: Bytes::new(),
        gas_limit: GAS_LIMIT,
        difficulty: U256::ZERO,
        mix_hash: B256::ZERO,
        beneficiary: Address::ZERO,
        state_root: None,
        alloc,
    }
}

fn open_store(alloc: BTreeMap<Address, GenesisAccount>) -> (TempDir, Store, BlockHeader) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let spec = test_genesis(alloc);
    let genesis_header = spec.header();
    let batch = store.begin_rw().unwrap();
    initialize_genesis(batch.tx(), &spec).unwrap();
    batch.commit_and_stop().unwrap();
    (dir, store, genesis_header)
}

fn engine_over<'db>(store: &'db Store) -> ExecutionEngine<'db> {
    ExecutionEngine::new(store, test_config(), TransferEvm, Arc::new(AtomicBool::new(false)))
        .unwrap()
}

/// An empty block on top of `parent`; `tag` varies the hash between
/// siblings.
fn empty_block(parent: &BlockHeader, tag: u8) -> Block {
    Block {
        header: BlockHeader {
            parent_hash: parent.hash(),
            ommers_hash: EMPTY_LIST_HASH,
            beneficiary: BENEFICIARY,
            state_root: parent.state_root,
            transactions_root: EMPTY_ROOT,
            receipts_root: EMPTY_ROOT,
            number: parent.number + 1,
            gas_limit: GAS_LIMIT,
            timestamp: parent.timestamp + 12,
            extra_data: Bytes::from(vec![tag]),
            ..Default::default()
        },
        body: BlockBody::default(),
    }
}

fn expected_state_root(accounts: &BTreeMap<Address, (u64, U256)>) -> B256 {
    state_root_unhashed(accounts.iter().map(|(address, (nonce, balance))| {
        (
            *address,
            TrieAccount {
                nonce: *nonce,
                balance: *balance,
                storage_root: EMPTY_ROOT_HASH,
                code_hash: alloy_trie::KECCAK_EMPTY,
            },
        )
    }))
}

#[test]
fn known_network_genesis_records() {
    for (chain_id, expected_hash) in [
        (1u64, corten_chainspec::MAINNET_GENESIS_HASH),
        (5, corten_chainspec::GOERLI_GENESIS_HASH),
        (11_155_111, corten_chainspec::SEPOLIA_GENESIS_HASH),
    ] {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let spec = corten_chainspec::genesis_spec_for_chain(chain_id).unwrap();
        let batch = store.begin_rw().unwrap();
        initialize_genesis(batch.tx(), &spec).unwrap();

        let config = read_chain_config(batch.tx()).unwrap().unwrap();
        assert_eq!(config.chain_id, chain_id);
        batch.commit_and_stop().unwrap();

        let tx = store.ro_tx().unwrap();
        let canonical = corten_storage::ChainProvider::new(&tx);
        assert_eq!(canonical.read_canonical_hash(0).unwrap(), Some(expected_hash));
    }

    // sepolia's merge parameters ride along in the stored config
    let (_, sepolia) = corten_chainspec::known_chain_by_id(11_155_111).unwrap();
    assert_eq!(sepolia.terminal_total_difficulty, Some(U256::from(17_000_000_000_000_000u64)));
    assert_eq!(sepolia.merge_netsplit_block, Some(1_735_371));
}

#[test]
fn verify_chain_extends_canonical_head() {
    let (_dir, store, genesis) = open_store(BTreeMap::new());
    let mut engine = engine_over(&store);

    let block1 = empty_block(&genesis, 1);
    let block2 = empty_block(&block1.header, 1);
    engine.insert_block(&block1).unwrap();
    engine.insert_block(&block2).unwrap();

    let result = engine.verify_chain(block2.header.hash()).unwrap();
    assert_eq!(result, VerificationResult::ValidChain { number: 2 });
    assert_eq!(engine.get_canonical_hash(1).unwrap(), Some(block1.header.hash()));
    assert_eq!(engine.get_canonical_hash(2).unwrap(), Some(block2.header.hash()));

    assert!(engine.notify_fork_choice_update(block2.header.hash()).unwrap());
    assert_eq!(engine.last_fork_choice().number, 2);

    // total difficulty accumulated along the way (zero difficulty chain)
    assert_eq!(
        engine.get_header_td(2, block2.header.hash()).unwrap(),
        Some(U256::ZERO)
    );
    assert_eq!(engine.get_block_progress().unwrap(), 2);
    assert_eq!(engine.get_canonical_head().unwrap().number, 2);
}

#[test]
fn reorg_rewrites_the_canonical_mapping() {
    let (_dir, store, genesis) = open_store(BTreeMap::new());
    let mut engine = engine_over(&store);

    // P at height 1; A and B compete at height 2
    let block_p = empty_block(&genesis, 0);
    let block_a = empty_block(&block_p.header, 0xaa);
    let block_b = empty_block(&block_p.header, 0xbb);
    assert_ne!(block_a.header.hash(), block_b.header.hash());

    engine.insert_block(&block_p).unwrap();
    engine.insert_block(&block_a).unwrap();
    let result = engine.verify_chain(block_a.header.hash()).unwrap();
    assert_eq!(result, VerificationResult::ValidChain { number: 2 });
    assert!(engine.notify_fork_choice_update(block_a.header.hash()).unwrap());

    engine.insert_block(&block_b).unwrap();
    let result = engine.verify_chain(block_b.header.hash()).unwrap();
    assert_eq!(result, VerificationResult::ValidChain { number: 2 });

    assert_eq!(engine.get_canonical_hash(2).unwrap(), Some(block_b.header.hash()));
    assert_eq!(engine.get_canonical_hash(1).unwrap(), Some(block_p.header.hash()));
    // the displaced sibling forks at height 1
    assert_eq!(engine.find_forking_point(block_a.header.hash()).unwrap(), 1);

    assert!(engine.notify_fork_choice_update(block_b.header.hash()).unwrap());
    assert_eq!(engine.last_fork_choice().hash, block_b.header.hash());
}

#[test]
fn wrong_state_root_reports_invalid_chain() {
    let (_dir, store, genesis) = open_store(BTreeMap::new());
    let mut engine = engine_over(&store);

    let block1 = empty_block(&genesis, 0);
    engine.insert_block(&block1).unwrap();
    assert_eq!(
        engine.verify_chain(block1.header.hash()).unwrap(),
        VerificationResult::ValidChain { number: 1 }
    );
    assert!(engine.notify_fork_choice_update(block1.header.hash()).unwrap());

    // a block advertising a root nothing can produce
    let mut block2 = empty_block(&block1.header, 0);
    block2.header.state_root = B256::repeat_byte(0x66);
    engine.insert_block(&block2).unwrap();

    let result = engine.verify_chain(block2.header.hash()).unwrap();
    match result {
        VerificationResult::InvalidChain { unwind_point, unwind_head, bad_block, bad_headers } => {
            // segment (1, 2] bisects to its lower half
            assert_eq!(unwind_point, 1);
            assert_eq!(unwind_head, block1.header.hash());
            assert_eq!(bad_block, Some(block2.header.hash()));
            assert!(bad_headers.contains(&block2.header.hash()));
        }
        other => panic!("expected InvalidChain, got {other:?}"),
    }

    // the engine recovers: fork choice back to the valid head re-verifies
    // (unwind then forward) without panicking
    assert!(engine.notify_fork_choice_update(block1.header.hash()).unwrap());
    assert_eq!(engine.get_canonical_head().unwrap().hash, block1.header.hash());
}

/// Builds a signed legacy transfer and the address it spends from.
fn signed_transfer(
    key_byte: u8,
    nonce: u64,
    to: Address,
    value: u64,
    chain_id: u64,
) -> (Transaction, Address) {
    let signing_key = SigningKey::from_bytes(&[key_byte; 32].into()).unwrap();
    let verifying_key = signing_key.verifying_key();
    let uncompressed = verifying_key.to_encoded_point(false);
    let sender = Address::from_slice(&keccak256(&uncompressed.as_bytes()[1..])[12..]);

    let mut txn = Transaction {
        tx_type: TxType::Legacy,
        nonce,
        max_priority_fee_per_gas: U256::from(1u64),
        max_fee_per_gas: U256::from(1u64),
        gas_limit: 21_000,
        to: Some(to),
        value: U256::from(value),
        chain_id: Some(chain_id),
        ..Default::default()
    };

    let sighash = txn.signing_hash();
    let (mut signature, mut recovery_id) =
        signing_key.sign_prehash_recoverable(sighash.as_slice()).unwrap();
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = k256::ecdsa::RecoveryId::from_byte(recovery_id.to_byte() ^ 1).unwrap();
    }
    txn.r = U256::from_be_slice(&signature.r().to_bytes());
    txn.s = U256::from_be_slice(&signature.s().to_bytes());
    txn.odd_y_parity = recovery_id.is_y_odd();
    assert_eq!(txn.recover_sender(), Some(sender));
    (txn, sender)
}

#[test]
fn executed_transfers_move_the_state_root() {
    let recipient = Address::repeat_byte(0x77);
    let value = 12_345u64;
    let (txn, sender) = signed_transfer(0x11, 0, recipient, value, 1337);

    let endowment = U256::from(10u64).pow(U256::from(18u64));
    let mut alloc = BTreeMap::new();
    alloc.insert(sender, GenesisAccount { balance: endowment, ..Default::default() });
    let (_dir, store, genesis) = open_store(alloc);
    let mut engine = engine_over(&store);

    // post-block world: sender pays value + gas at one wei per gas, the
    // producer keeps the tip
    let gas = U256::from(21_000u64);
    let mut world = BTreeMap::new();
    world.insert(sender, (1u64, endowment - U256::from(value) - gas));
    world.insert(recipient, (0u64, U256::from(value)));
    world.insert(BENEFICIARY, (0u64, gas));

    let receipts = vec![Receipt {
        tx_type: TxType::Legacy,
        success: true,
        cumulative_gas_used: 21_000,
        ..Default::default()
    }];
    let block = Block {
        header: BlockHeader {
            parent_hash: genesis.hash(),
            ommers_hash: EMPTY_LIST_HASH,
            beneficiary: BENEFICIARY,
            state_root: expected_state_root(&world),
            transactions_root: ordered_trie_root_with_encoder(
                std::slice::from_ref(&txn),
                |item: &Transaction, buf| item.encode_with(buf, false, false),
            ),
            receipts_root: ordered_trie_root_with_encoder(
                &receipts,
                |receipt: &Receipt, buf| receipt.encode_for_root(buf),
            ),
            number: 1,
            gas_limit: GAS_LIMIT,
            gas_used: 21_000,
            timestamp: 12,
            ..Default::default()
        },
        body: BlockBody { transactions: vec![txn], ..Default::default() },
    };

    engine.insert_block(&block).unwrap();
    assert_eq!(
        engine.verify_chain(block.header.hash()).unwrap(),
        VerificationResult::ValidChain { number: 1 }
    );
    assert!(engine.notify_fork_choice_update(block.header.hash()).unwrap());

    // committed state is visible to fresh readers
    let tx = store.ro_tx().unwrap();
    let state = StateProvider::new(&tx);
    let sender_account = state.read_account(sender).unwrap().unwrap();
    assert_eq!(sender_account.nonce, 1);
    assert_eq!(sender_account.balance, endowment - U256::from(value) - gas);
    assert_eq!(
        state.read_account(recipient).unwrap().unwrap().balance,
        U256::from(value)
    );
    // the pre-block view survives in history
    assert_eq!(
        state.read_account_at(sender, 0).unwrap().unwrap().balance,
        endowment
    );
}

#[test]
fn invalid_block_names_the_culprit() {
    let (_dir, store, genesis) = open_store(BTreeMap::new());
    let mut engine = engine_over(&store);

    let block1 = empty_block(&genesis, 0);
    // gas used without any transactions contradicts the (empty) receipts
    let mut block2 = empty_block(&block1.header, 0);
    block2.header.gas_used = 40_000;

    engine.insert_block(&block1).unwrap();
    engine.insert_block(&block2).unwrap();

    match engine.verify_chain(block2.header.hash()).unwrap() {
        VerificationResult::InvalidChain { unwind_point, bad_block, .. } => {
            assert_eq!(unwind_point, 1);
            assert_eq!(bad_block, Some(block2.header.hash()));
        }
        other => panic!("expected InvalidChain, got {other:?}"),
    }
}

#[test]
fn extends_last_fork_choice_walks_parent_links() {
    let (_dir, store, genesis) = open_store(BTreeMap::new());
    let mut engine = engine_over(&store);

    let block1 = empty_block(&genesis, 0);
    let block2 = empty_block(&block1.header, 0);
    engine.insert_block(&block1).unwrap();
    engine.insert_block(&block2).unwrap();
    engine.verify_chain(block1.header.hash()).unwrap();
    assert!(engine.notify_fork_choice_update(block1.header.hash()).unwrap());

    assert!(engine
        .extends_last_fork_choice(2, block2.header.hash())
        .unwrap());
    let stranger = empty_block(&genesis, 9);
    engine.insert_block(&stranger).unwrap();
    assert!(!engine
        .extends_last_fork_choice(1, stranger.header.hash())
        .unwrap());
}
