//! Build, sign and broadcast with seed-backed and view-only accounts.

mod common;

use std::time::Duration;

use common::*;
use wallet_core::store::WalletStore;
use wallet_core::types::{SignedBody, UnsignedBody};
use wallet_core::{ChainId, Outcome, Transfer, WalletError};

const ONE_ETH: u128 = 1_000_000_000_000_000_000;

fn evm_nonce(unsigned: &wallet_core::UnsignedTx) -> u64 {
    match &unsigned.body {
        UnsignedBody::Evm(tx) => tx.nonce,
        other => panic!("not an EVM transaction: {other:?}"),
    }
}

fn ton_seqno(unsigned: &wallet_core::UnsignedTx) -> u32 {
    match &unsigned.body {
        UnsignedBody::Ton(tx) => tx.seqno,
        other => panic!("not a TON transaction: {other:?}"),
    }
}

fn spent(unsigned: &wallet_core::UnsignedTx) -> Vec<String> {
    match &unsigned.body {
        UnsignedBody::Bitcoin(tx) => tx.spent.clone(),
        other => panic!("not a Bitcoin transaction: {other:?}"),
    }
}

#[allow(deprecated)]
async fn tracked_nonce(h: &Harness, address: &str) -> Option<u64> {
    let adapter = h.core.chains().adapter(ChainId::Ethereum).unwrap();
    adapter.as_evm().unwrap().pending_nonce(address).await
}

#[allow(deprecated)]
async fn reserved(h: &Harness, address: &str) -> Vec<String> {
    let adapter = h.core.chains().adapter(ChainId::BitcoinTestnet).unwrap();
    adapter.as_bitcoin().unwrap().reserved_outputs(address).await
}

#[tokio::test]
async fn mnemonic_signature_verifies_on_its_chain_only() {
    let h = harness(&[ChainId::Ethereum, ChainId::Solana]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let eth = account.wallet(ChainId::Ethereum).unwrap().clone();
    let sol_before = account.wallet(ChainId::Solana).unwrap().clone();
    let sol_queries = h.source.queries_for(ChainId::Solana);
    h.source.set_balance(ChainId::Ethereum, &eth.address, ONE_ETH);

    let to = recipient(&h.core, ChainId::Ethereum);
    let unsigned = h
        .core
        .build_transaction(account.id(), ChainId::Ethereum, &Transfer::new(to.clone(), ONE_ETH / 10), None)
        .await
        .unwrap();
    assert_eq!(unsigned.from, eth.address);
    assert_eq!(unsigned.to, to);

    let signed = h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, Some(password()), None)
        .await
        .unwrap();
    assert!(h.core.chains().verify_signed(&signed, &eth.address).unwrap());
    assert!(!h.core.chains().verify_signed(&signed, &to).unwrap());
    let SignedBody::Evm(evm) = &signed.body else {
        panic!("expected an EVM transaction");
    };
    assert_eq!(evm.recover_signer().unwrap().to_lowercase(), eth.address.to_lowercase());

    // Chain B saw no traffic and its wallet is unchanged.
    assert_eq!(h.source.queries_for(ChainId::Solana), sol_queries);
    let account = h.core.get_account(account.id()).await.unwrap();
    assert_eq!(account.wallet(ChainId::Solana).unwrap(), &sol_before);
    assert!(h.device.commands().is_empty());
}

#[tokio::test]
async fn signing_needs_the_right_password() {
    let h = harness(&[ChainId::Ethereum]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let from = account.wallet(ChainId::Ethereum).unwrap().address.clone();
    h.source.set_balance(ChainId::Ethereum, &from, ONE_ETH);
    let to = recipient(&h.core, ChainId::Ethereum);
    let unsigned = h
        .core
        .build_transaction(account.id(), ChainId::Ethereum, &Transfer::new(to, 1), None)
        .await
        .unwrap();

    let err = h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::PasswordRequired));

    let wrong = secrecy::SecretString::from("hunter2".to_string());
    let err = h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, Some(wrong), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::DecryptionFailed));
    assert_eq!(err.to_string(), "unable to decrypt secret");
    assert_eq!(err.outcome(), Outcome::NothingHappened);

    assert!(h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, Some(password()), None)
        .await
        .is_ok());
}

#[tokio::test]
async fn view_only_accounts_never_reach_a_signer() {
    let h = harness(&[ChainId::Ethereum]).await;
    let owner = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let address = owner.wallet(ChainId::Ethereum).unwrap().address.clone();
    h.source.set_balance(ChainId::Ethereum, &address, ONE_ETH);
    let unsigned = h
        .core
        .build_transaction(
            owner.id(),
            ChainId::Ethereum,
            &Transfer::new(recipient(&h.core, ChainId::Ethereum), 1),
            None,
        )
        .await
        .unwrap();

    // A view-only account watching the same address.
    h.core.remove_account(owner.id()).await.unwrap();
    let view = h
        .core
        .create_view_only_account(vec![(ChainId::Ethereum, address)])
        .await
        .unwrap();
    let snapshot = h.store.load().await.unwrap();

    let err = h
        .core
        .sign(view.id(), ChainId::Ethereum, &unsigned, Some(password()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::NotSignable(_)));
    assert_eq!(err.outcome(), Outcome::NothingHappened);

    assert!(h.device.commands().is_empty());
    assert!(snapshot.secrets.is_empty());
    assert_eq!(h.store.load().await.unwrap(), snapshot);

    let err = h
        .core
        .transfer(view.id(), ChainId::Ethereum, &Transfer::new(recipient(&h.core, ChainId::Ethereum), 1), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::NotSignable(_)));
    assert_eq!(h.source.broadcast_count(), 0);
}

#[tokio::test]
async fn evm_nonces_are_sequenced_per_sender() {
    let h = harness(&[ChainId::Ethereum]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let from = account.wallet(ChainId::Ethereum).unwrap().address.clone();
    h.source.set_balance(ChainId::Ethereum, &from, ONE_ETH);
    h.source.set_nonce(&from, 5);
    let transfer = Transfer::new(recipient(&h.core, ChainId::Ethereum), 1_000);

    let (a, b) = tokio::join!(
        h.core.build_transaction(account.id(), ChainId::Ethereum, &transfer, None),
        h.core.build_transaction(account.id(), ChainId::Ethereum, &transfer, None),
    );
    let mut nonces = vec![evm_nonce(&a.unwrap()), evm_nonce(&b.unwrap())];
    nonces.sort();
    assert_eq!(nonces, vec![5, 6]);

    // The chain moved ahead on its own.
    h.source.set_nonce(&from, 10);
    let c = h
        .core
        .build_transaction(account.id(), ChainId::Ethereum, &transfer, None)
        .await
        .unwrap();
    assert_eq!(evm_nonce(&c), 10);
    assert_eq!(tracked_nonce(&h, &from).await, Some(11));

    // A rejection forgets the tracked nonce.
    let signed = h
        .core
        .sign(account.id(), ChainId::Ethereum, &c, Some(password()), None)
        .await
        .unwrap();
    h.source.set_nonce(&from, 7);
    h.source.set_broadcast(BroadcastMode::Reject("nonce too high".into()));
    let err = h.core.broadcast(&signed, None).await.unwrap_err();
    assert!(matches!(err, WalletError::BroadcastRejected { .. }));
    assert_eq!(err.outcome(), Outcome::RebuildRequired);
    assert_eq!(tracked_nonce(&h, &from).await, None);

    let d = h
        .core
        .build_transaction(account.id(), ChainId::Ethereum, &transfer, None)
        .await
        .unwrap();
    assert_eq!(evm_nonce(&d), 7);
}

#[tokio::test]
async fn exhausted_nonce_is_a_query_failure() {
    let h = harness(&[ChainId::Ethereum]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let from = account.wallet(ChainId::Ethereum).unwrap().address.clone();
    h.source.set_balance(ChainId::Ethereum, &from, ONE_ETH);
    h.source.set_nonce(&from, u64::MAX);

    let err = h
        .core
        .build_transaction(
            account.id(),
            ChainId::Ethereum,
            &Transfer::new(recipient(&h.core, ChainId::Ethereum), 1_000),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::QueryFailed { chain: ChainId::Ethereum, .. }));
    assert_eq!(tracked_nonce(&h, &from).await, None);
}

#[tokio::test]
async fn ton_seqnos_are_sequenced_and_released() {
    let h = harness(&[ChainId::Ton, ChainId::TonTestnet]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let from = account.wallet(ChainId::Ton).unwrap().address.clone();
    assert!(from.starts_with("UQ"));
    assert!(account.wallet(ChainId::TonTestnet).unwrap().address.starts_with("0Q"));
    h.source.set_balance(ChainId::Ton, &from, 5_000_000_000);
    h.source.set_nonce(&from, 3);
    let transfer = Transfer::new(recipient(&h.core, ChainId::Ton), 1_000_000_000)
        .with_memo(b"thanks".to_vec());

    let first = h
        .core
        .build_transaction(account.id(), ChainId::Ton, &transfer, None)
        .await
        .unwrap();
    let second = h
        .core
        .build_transaction(account.id(), ChainId::Ton, &transfer, None)
        .await
        .unwrap();
    assert_eq!((ton_seqno(&first), ton_seqno(&second)), (3, 4));
    assert_eq!(first.fee, 5_500_000);

    // A failed signature hands its seqno back.
    let wrong = secrecy::SecretString::from("wrong".to_string());
    let err = h
        .core
        .transfer(account.id(), ChainId::Ton, &transfer, Some(wrong), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::DecryptionFailed));
    let third = h
        .core
        .build_transaction(account.id(), ChainId::Ton, &transfer, None)
        .await
        .unwrap();
    assert_eq!(ton_seqno(&third), 5);

    let signed = h
        .core
        .sign(account.id(), ChainId::Ton, &first, Some(password()), None)
        .await
        .unwrap();
    assert!(h.core.chains().verify_signed(&signed, &from).unwrap());
    assert!(!h.core.chains().verify_signed(&signed, &transfer.to).unwrap());
    assert_eq!(signed.tx_id().len(), 64);

    h.source.set_broadcast(BroadcastMode::Accept("ton-msg".into()));
    assert_eq!(h.core.broadcast(&signed, None).await.unwrap(), "ton-msg");
    let broadcasts = h.source.broadcasts.lock().unwrap().clone();
    assert_eq!(broadcasts.len(), 1);
    assert!(broadcasts[0].1.starts_with(&[0xb5, 0xee, 0x9c, 0x72]));

    // Testnet addresses are refused on mainnet, and funds are checked.
    let testnet_to = recipient(&h.core, ChainId::TonTestnet);
    let err = h
        .core
        .build_transaction(account.id(), ChainId::Ton, &Transfer::new(testnet_to, 1_000), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidTransaction(_)));
    let err = h
        .core
        .build_transaction(
            account.id(),
            ChainId::Ton,
            &Transfer::new(transfer.to.clone(), 4_999_000_000),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidTransaction(ref m) if m.contains("insufficient funds")));
}

#[tokio::test]
async fn broadcast_timeout_is_an_unknown_outcome() {
    let h = harness(&[ChainId::Ethereum]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let from = account.wallet(ChainId::Ethereum).unwrap().address.clone();
    h.source.set_balance(ChainId::Ethereum, &from, ONE_ETH);
    let transfer = Transfer::new(recipient(&h.core, ChainId::Ethereum), 1_000);

    let unsigned = h
        .core
        .build_transaction(account.id(), ChainId::Ethereum, &transfer, None)
        .await
        .unwrap();
    let signed = h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, Some(password()), None)
        .await
        .unwrap();

    h.source.set_broadcast(BroadcastMode::Hang);
    let err = h
        .core
        .broadcast(&signed, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::BroadcastTimeout { chain: ChainId::Ethereum }));
    assert_eq!(err.outcome(), Outcome::Unknown);
    assert!(!err.is_retryable());
    assert_eq!(h.source.broadcast_count(), 1);

    // The nonce stays taken: the transaction may be in a mempool.
    let next = h
        .core
        .build_transaction(account.id(), ChainId::Ethereum, &transfer, None)
        .await
        .unwrap();
    assert_eq!(evm_nonce(&next), evm_nonce(&unsigned) + 1);
}

#[tokio::test]
async fn transfer_broadcasts_the_signed_bytes_once() {
    let h = harness(&[ChainId::Tron]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let from = account.wallet(ChainId::Tron).unwrap().address.clone();
    h.source.set_balance(ChainId::Tron, &from, 50_000_000);
    h.source.set_broadcast(BroadcastMode::Accept("tron-tx".into()));

    let transfer = Transfer::new(recipient(&h.core, ChainId::Tron), 1_000_000).with_memo(b"rent".to_vec());
    let tx_id = h
        .core
        .transfer(account.id(), ChainId::Tron, &transfer, Some(password()), None)
        .await
        .unwrap();
    assert_eq!(tx_id, "tron-tx");

    let broadcasts = h.source.broadcasts.lock().unwrap().clone();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].0, ChainId::Tron);
    assert!(!broadcasts[0].1.is_empty());
}

#[tokio::test]
async fn bitcoin_outputs_stay_reserved_until_released() {
    let h = harness(&[ChainId::BitcoinTestnet]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let from = account.wallet(ChainId::BitcoinTestnet).unwrap().address.clone();
    h.source.set_utxos(&from, vec![utxo(0xAA, 0, 60_000), utxo(0xBB, 1, 50_000)]);
    let transfer = Transfer::new(recipient(&h.core, ChainId::BitcoinTestnet), 30_000);

    let first = h
        .core
        .build_transaction(account.id(), ChainId::BitcoinTestnet, &transfer, None)
        .await
        .unwrap();
    let second = h
        .core
        .build_transaction(account.id(), ChainId::BitcoinTestnet, &transfer, None)
        .await
        .unwrap();
    assert_eq!(spent(&first), vec![utxo(0xAA, 0, 60_000).outpoint()]);
    assert_eq!(spent(&second), vec![utxo(0xBB, 1, 50_000).outpoint()]);
    let mut both = [spent(&first), spent(&second)].concat();
    both.sort();
    assert_eq!(reserved(&h, &from).await, both);

    let err = h
        .core
        .build_transaction(account.id(), ChainId::BitcoinTestnet, &transfer, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidTransaction(_)));

    h.core.chains().release(&first).await.unwrap();
    assert_eq!(reserved(&h, &from).await, spent(&second));
    let third = h
        .core
        .build_transaction(account.id(), ChainId::BitcoinTestnet, &transfer, None)
        .await
        .unwrap();
    assert_eq!(spent(&third), spent(&first));

    let signed = h
        .core
        .sign(account.id(), ChainId::BitcoinTestnet, &third, Some(password()), None)
        .await
        .unwrap();
    assert!(h.core.chains().verify_signed(&signed, &from).unwrap());
}

#[tokio::test]
async fn failed_transfer_releases_its_outputs() {
    let h = harness(&[ChainId::BitcoinTestnet]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let from = account.wallet(ChainId::BitcoinTestnet).unwrap().address.clone();
    h.source.set_utxos(&from, vec![utxo(0xCC, 0, 80_000)]);
    let transfer = Transfer::new(recipient(&h.core, ChainId::BitcoinTestnet), 20_000);

    let wrong = secrecy::SecretString::from("wrong".to_string());
    let err = h
        .core
        .transfer(account.id(), ChainId::BitcoinTestnet, &transfer, Some(wrong), None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::DecryptionFailed));
    assert_eq!(h.source.broadcast_count(), 0);

    // The only output is spendable again.
    let unsigned = h
        .core
        .build_transaction(account.id(), ChainId::BitcoinTestnet, &transfer, None)
        .await
        .unwrap();
    assert_eq!(spent(&unsigned), vec![utxo(0xCC, 0, 80_000).outpoint()]);
}

#[tokio::test]
async fn build_constraints_are_named_not_clamped() {
    let h = harness(&[ChainId::Ethereum, ChainId::Solana]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let eth = account.wallet(ChainId::Ethereum).unwrap().address.clone();
    let sol = account.wallet(ChainId::Solana).unwrap().address.clone();
    h.source.set_balance(ChainId::Ethereum, &eth, 1_000);
    h.source.set_balance(ChainId::Solana, &sol, 1_000_000_000);

    let err = h
        .core
        .build_transaction(
            account.id(),
            ChainId::Ethereum,
            &Transfer::new(recipient(&h.core, ChainId::Ethereum), 10),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidTransaction(ref m) if m.contains("insufficient")));

    let err = h
        .core
        .build_transaction(
            account.id(),
            ChainId::Ethereum,
            &Transfer::new(recipient(&h.core, ChainId::Solana), 10),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidTransaction(_)));

    let err = h
        .core
        .build_transaction(
            account.id(),
            ChainId::Solana,
            &Transfer::new(recipient(&h.core, ChainId::Solana), 1).with_memo(vec![b'a'; 567]),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidTransaction(ref m) if m.contains("memo")));
}

#[tokio::test]
async fn balances_fan_out_and_fail_per_chain() {
    let h = harness(&[ChainId::Ethereum, ChainId::Solana, ChainId::Tron]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let eth = account.wallet(ChainId::Ethereum).unwrap().address.clone();
    h.source.set_balance(ChainId::Ethereum, &eth, 42);
    h.source.fail_chain(ChainId::Solana);

    let balances = h.core.get_all_balances(account.id(), None).await.unwrap();
    assert_eq!(balances.len(), 3);
    for line in &balances {
        match line.chain {
            ChainId::Ethereum => assert_eq!(*line.balance.as_ref().unwrap(), 42),
            ChainId::Solana => assert!(matches!(
                line.balance,
                Err(WalletError::QueryFailed { chain: ChainId::Solana, .. })
            )),
            ChainId::Tron => assert_eq!(*line.balance.as_ref().unwrap(), 0),
            other => panic!("unexpected chain {other}"),
        }
    }

    let err = h
        .core
        .get_balance(account.id(), ChainId::Solana, None)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let assets = h.core.get_assets(account.id(), ChainId::Ethereum, None).await.unwrap();
    assert_eq!(assets[0].balance, 42);
    assert_eq!(assets[0].contract, None);
}

#[tokio::test]
async fn slow_queries_time_out_as_query_failures() {
    let h = harness(&[ChainId::Ethereum]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    h.source.set_query_delay(Duration::from_millis(200));

    let err = h
        .core
        .get_balance(account.id(), ChainId::Ethereum, Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::QueryFailed { .. }));
}

#[tokio::test]
async fn fee_estimates_follow_the_market() {
    let h = harness(&[ChainId::Solana]).await;
    let account = h.core.create_mnemonic_account(MNEMONIC, password()).await.unwrap();
    let sol = account.wallet(ChainId::Solana).unwrap().address.clone();
    h.source.set_balance(ChainId::Solana, &sol, 1_000_000_000);

    let unsigned = h
        .core
        .build_transaction(
            account.id(),
            ChainId::Solana,
            &Transfer::new(recipient(&h.core, ChainId::Solana), 5_000_000),
            None,
        )
        .await
        .unwrap();
    assert_eq!(unsigned.fee, 5_000);
    assert_eq!(h.core.estimate_fee(&unsigned, None).await.unwrap(), 5_000);

    h.source.fail_chain(ChainId::Solana);
    let err = h.core.estimate_fee(&unsigned, None).await.unwrap_err();
    assert!(matches!(err, WalletError::EstimationUnavailable { .. }));
    assert!(err.is_retryable());
}
