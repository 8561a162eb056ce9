//! Hardware accounts signing through the simulated device.

mod common;

use std::time::Duration;

use common::*;
use wallet_core::account::{HardwareDriver, HardwareMeta};
use wallet_core::chain::KeyMaterial;
use wallet_core::config::BusyPolicy;
use wallet_core::hardware::apdu;
use wallet_core::hardware::DeviceHub;
use wallet_core::mnemonic::mnemonic_to_seed;
use wallet_core::{Account, ChainId, HardwareKey, Outcome, SessionState, Transfer, UnsignedTx, WalletError};

/// Enough native balance on any chain for a test transfer plus fees.
const FUNDS: u128 = 100_000_000_000_000_000_000;

fn meta() -> HardwareMeta {
    HardwareMeta {
        driver: HardwareDriver::Ble,
        device_id: "nano-1".into(),
        device_name: "Nano X".into(),
    }
}

async fn funded_device_account(h: &Harness, chains: &[ChainId]) -> Account {
    let account = h
        .core
        .create_hardware_account_from_device(meta(), chains, 0..1, None)
        .await
        .unwrap();
    for wallet in account.wallets() {
        h.source.set_balance(wallet.chain, &wallet.address, FUNDS);
    }
    account
}

/// A Solana transfer whose signing request spans more than one chunk.
async fn long_solana_tx(h: &Harness, account: &Account, memo: &str) -> UnsignedTx {
    let transfer = Transfer::new(recipient(&h.core, ChainId::Solana), 1_000_000)
        .with_memo(memo.repeat(300 / memo.len()).into_bytes());
    h.core
        .build_transaction(account.id(), ChainId::Solana, &transfer, None)
        .await
        .unwrap()
}

#[tokio::test]
async fn device_signs_for_its_account() {
    let h = harness(&[ChainId::Ethereum, ChainId::Solana]).await;
    let account = funded_device_account(&h, &[ChainId::Ethereum, ChainId::Solana]).await;

    let eth = account.wallet(ChainId::Ethereum).unwrap().address.clone();
    let transfer = Transfer::new(recipient(&h.core, ChainId::Ethereum), 1_000);
    let unsigned = h
        .core
        .build_transaction(account.id(), ChainId::Ethereum, &transfer, None)
        .await
        .unwrap();
    let signed = h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, None, None)
        .await
        .unwrap();
    assert!(h.core.chains().verify_signed(&signed, &eth).unwrap());

    let sol = account.wallet(ChainId::Solana).unwrap().address.clone();
    let unsigned = long_solana_tx(&h, &account, "gm").await;
    let signed = h
        .core
        .sign(account.id(), ChainId::Solana, &unsigned, None, None)
        .await
        .unwrap();
    assert!(h.core.chains().verify_signed(&signed, &sol).unwrap());

    let commands = h.device.commands();
    assert_chunks_contiguous(&commands);
    let sign_chunks = commands.iter().filter(|c| c.ins == apdu::INS_SIGN).count();
    assert!(sign_chunks >= 3, "expected a chunked solana request, got {sign_chunks} sign commands");
}

#[tokio::test]
async fn queued_signs_on_one_device_never_interleave() {
    let h = harness(&[ChainId::Solana]).await;
    let account = funded_device_account(&h, &[ChainId::Solana]).await;
    let first = long_solana_tx(&h, &account, "first ").await;
    let second = long_solana_tx(&h, &account, "second ").await;
    h.device.set_delay(Duration::from_millis(10));

    let (a, b) = tokio::join!(
        h.core.sign(account.id(), ChainId::Solana, &first, None, None),
        h.core.sign(account.id(), ChainId::Solana, &second, None, None),
    );
    let sol = account.wallet(ChainId::Solana).unwrap().address.clone();
    assert!(h.core.chains().verify_signed(&a.unwrap(), &sol).unwrap());
    assert!(h.core.chains().verify_signed(&b.unwrap(), &sol).unwrap());

    assert_eq!(h.device.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_chunks_contiguous(&h.device.commands());
}

#[tokio::test]
async fn fail_policy_turns_away_a_second_sign() {
    let mut config = test_config(vec![ChainId::Solana]);
    config.hardware.busy_policy = BusyPolicy::Fail;
    let h = harness_with(&[ChainId::Solana], config).await;
    let account = funded_device_account(&h, &[ChainId::Solana]).await;
    let first = long_solana_tx(&h, &account, "first ").await;
    let second = long_solana_tx(&h, &account, "second ").await;
    h.device.set_delay(Duration::from_millis(20));

    let (a, b) = tokio::join!(
        h.core.sign(account.id(), ChainId::Solana, &first, None, None),
        h.core.sign(account.id(), ChainId::Solana, &second, None, None),
    );
    let results = [a, b];
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(WalletError::SessionBusy(_))))
        .count();
    assert_eq!(busy, 1);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_chunks_contiguous(&h.device.commands());

    // The device is free again afterwards.
    assert!(h
        .core
        .sign(account.id(), ChainId::Solana, &second, None, None)
        .await
        .is_ok());
}

#[tokio::test]
async fn rejection_on_the_device_leaves_the_session_usable() {
    let h = harness(&[ChainId::Ethereum]).await;
    let account = funded_device_account(&h, &[ChainId::Ethereum]).await;
    let transfer = Transfer::new(recipient(&h.core, ChainId::Ethereum), 1_000);
    let unsigned = h
        .core
        .build_transaction(account.id(), ChainId::Ethereum, &transfer, None)
        .await
        .unwrap();

    h.device.set_reject(true);
    let err = h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::UserRejected));
    assert_eq!(err.outcome(), Outcome::NothingHappened);

    h.device.set_reject(false);
    assert!(h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, None, None)
        .await
        .is_ok());
}

#[tokio::test]
async fn unplugging_mid_sign_fails_with_disconnected() {
    let h = harness(&[ChainId::Ethereum]).await;
    let account = funded_device_account(&h, &[ChainId::Ethereum]).await;
    let transfer = Transfer::new(recipient(&h.core, ChainId::Ethereum), 1_000);
    let unsigned = h
        .core
        .build_transaction(account.id(), ChainId::Ethereum, &transfer, None)
        .await
        .unwrap();

    h.device.set_delay(Duration::from_millis(200));
    let (result, _) = tokio::join!(
        h.core.sign(account.id(), ChainId::Ethereum, &unsigned, None, None),
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            h.device.unplug();
        },
    );
    let err = result.unwrap_err();
    assert!(matches!(err, WalletError::DeviceDisconnected(_)));
    assert_eq!(err.outcome(), Outcome::Unknown);

    // With the device gone no new session can be opened.
    let err = h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::DeviceNotFound(_)));
}

#[tokio::test]
async fn session_stays_unusable_after_disconnect() {
    let h = harness(&[ChainId::Ethereum]).await;
    let account = funded_device_account(&h, &[ChainId::Ethereum]).await;
    let unsigned = h
        .core
        .build_transaction(
            account.id(),
            ChainId::Ethereum,
            &Transfer::new(recipient(&h.core, ChainId::Ethereum), 1_000),
            None,
        )
        .await
        .unwrap();
    let wallet = account.wallet(ChainId::Ethereum).unwrap().clone();
    h.core.close_device("nano-1");

    let hub = DeviceHub::new(h.device.clone(), BusyPolicy::Queue, Duration::from_secs(2));
    let session = hub.connect("nano-1").unwrap();
    let adapter = h.core.chains().adapter(ChainId::Ethereum).unwrap();
    h.device.unplug();

    for _ in 0..2 {
        let err = session
            .sign_transaction(adapter, wallet.index, &unsigned, wallet.public_key.as_deref().unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::DeviceDisconnected(_)));
    }
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.is_usable());
    assert!(!hub.is_claimed("nano-1"));
}

#[tokio::test]
async fn device_with_other_keys_is_refused_before_signing() {
    let h = harness(&[ChainId::Ethereum]).await;
    // Keys that do not live on the connected device.
    let foreign = mnemonic_to_seed(MNEMONIC, "").unwrap();
    let wallet = h
        .core
        .chains()
        .derive_address(ChainId::Ethereum, KeyMaterial::Seed(&foreign), 0)
        .unwrap();
    let account = h
        .core
        .create_hardware_account(
            meta(),
            vec![HardwareKey {
                chain: ChainId::Ethereum,
                index: 0,
                public_key: wallet.public_key.clone().unwrap(),
            }],
        )
        .await
        .unwrap();
    h.source.set_balance(ChainId::Ethereum, &wallet.address, FUNDS);

    let unsigned = h
        .core
        .build_transaction(
            account.id(),
            ChainId::Ethereum,
            &Transfer::new(recipient(&h.core, ChainId::Ethereum), 1),
            None,
        )
        .await
        .unwrap();
    let err = h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::DeviceMismatch { .. }));
    assert_eq!(h.device.count(apdu::INS_SIGN), 0);

    let err = h
        .core
        .verify_hardware_address(account.id(), ChainId::Ethereum, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::DeviceMismatch { .. }));
}

#[tokio::test]
async fn addresses_are_confirmed_on_screen() {
    let h = harness(&[ChainId::Tron]).await;
    let account = h
        .core
        .create_hardware_account_from_device(meta(), &[ChainId::Tron], 0..1, None)
        .await
        .unwrap();

    let shown = h
        .core
        .verify_hardware_address(account.id(), ChainId::Tron, None, None)
        .await
        .unwrap();
    assert_eq!(&shown, account.wallet(ChainId::Tron).unwrap());
    let last = h.device.commands().pop().unwrap();
    assert_eq!(last.ins, apdu::INS_GET_PUBLIC_KEY);
    assert_eq!(last.p1, apdu::P1_CONFIRM);

    h.device.set_reject(true);
    let err = h
        .core
        .verify_hardware_address(account.id(), ChainId::Tron, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::UserRejected));
}

#[tokio::test]
async fn secondary_indices_sign_with_their_own_key() {
    let h = harness(&[ChainId::Ethereum]).await;
    let seed = mnemonic_to_seed(DEVICE_MNEMONIC, "").unwrap();
    let keys: Vec<HardwareKey> = [0, 3]
        .into_iter()
        .map(|index| HardwareKey {
            chain: ChainId::Ethereum,
            index,
            public_key: h
                .core
                .chains()
                .derive_address(ChainId::Ethereum, KeyMaterial::Seed(&seed), index)
                .unwrap()
                .public_key
                .unwrap(),
        })
        .collect();
    let account = h.core.create_hardware_account(meta(), keys).await.unwrap();
    assert_eq!(account.wallet(ChainId::Ethereum).unwrap().index, 0);

    let secondary = account
        .wallets()
        .iter()
        .find(|w| w.index == 3)
        .unwrap()
        .address
        .clone();
    h.source.set_balance(ChainId::Ethereum, &secondary, FUNDS);

    let transfer = Transfer::new(recipient(&h.core, ChainId::Ethereum), 5).from_index(3);
    let unsigned = h
        .core
        .build_transaction(account.id(), ChainId::Ethereum, &transfer, None)
        .await
        .unwrap();
    assert_eq!(unsigned.from, secondary);
    let signed = h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, None, None)
        .await
        .unwrap();
    assert!(h.core.chains().verify_signed(&signed, &secondary).unwrap());

    let shown = h
        .core
        .verify_hardware_address(account.id(), ChainId::Ethereum, Some(3), None)
        .await
        .unwrap();
    assert_eq!(shown.address, secondary);
}

#[tokio::test]
async fn removing_the_last_device_account_closes_its_session() {
    let h = harness(&[ChainId::Ethereum]).await;
    let first = h
        .core
        .create_hardware_account_from_device(meta(), &[ChainId::Ethereum], 0..1, None)
        .await
        .unwrap();
    let second = h
        .core
        .create_hardware_account_from_device(meta(), &[ChainId::Ethereum], 0..1, None)
        .await
        .unwrap();
    assert_eq!(h.core.open_devices(), vec!["nano-1".to_string()]);

    h.core.remove_account(first.id()).await.unwrap();
    assert_eq!(h.core.open_devices(), vec!["nano-1".to_string()]);

    h.core.remove_account(second.id()).await.unwrap();
    assert!(h.core.open_devices().is_empty());
}

#[tokio::test]
async fn closing_a_device_forces_a_fresh_session() {
    let h = harness(&[ChainId::Ethereum]).await;
    let account = funded_device_account(&h, &[ChainId::Ethereum]).await;
    h.core.close_device("nano-1");
    h.core.close_device("nano-1");
    assert!(h.core.open_devices().is_empty());

    let unsigned = h
        .core
        .build_transaction(
            account.id(),
            ChainId::Ethereum,
            &Transfer::new(recipient(&h.core, ChainId::Ethereum), 1_000),
            None,
        )
        .await
        .unwrap();
    assert!(h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, None, None)
        .await
        .is_ok());
    assert_eq!(h.core.open_devices(), vec!["nano-1".to_string()]);
}

#[tokio::test]
async fn caller_timeout_bounds_device_calls() {
    let h = harness(&[ChainId::Ethereum]).await;
    let account = funded_device_account(&h, &[ChainId::Ethereum]).await;
    let transfer = Transfer::new(recipient(&h.core, ChainId::Ethereum), 1_000);
    let unsigned = h
        .core
        .build_transaction(account.id(), ChainId::Ethereum, &transfer, None)
        .await
        .unwrap();
    let short = Some(Duration::from_millis(50));

    // Well under the configured two seconds.
    h.device.set_delay(Duration::from_millis(400));
    let started = std::time::Instant::now();
    let err = h
        .core
        .sign(account.id(), ChainId::Ethereum, &unsigned, None, short)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::DeviceTimeout(_)));
    assert_eq!(err.outcome(), Outcome::Unknown);
    assert!(started.elapsed() < Duration::from_millis(1_000));

    let err = h
        .core
        .verify_hardware_address(account.id(), ChainId::Ethereum, None, short)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::DeviceTimeout(_)));

    let err = h
        .core
        .transfer(account.id(), ChainId::Ethereum, &transfer, None, short)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::DeviceTimeout(_)));
    assert_eq!(h.source.broadcast_count(), 0);

    // The same calls go through once the device answers in time.
    h.device.set_delay(Duration::ZERO);
    assert!(h
        .core
        .verify_hardware_address(account.id(), ChainId::Ethereum, None, short)
        .await
        .is_ok());
}

#[tokio::test]
async fn scanned_indices_can_be_imported() {
    let h = harness(&[ChainId::Ethereum]).await;
    let seed = mnemonic_to_seed(DEVICE_MNEMONIC, "").unwrap();

    let scanned = h
        .core
        .scan_hardware_wallets("nano-1", ChainId::Ethereum, 2, 3, None)
        .await
        .unwrap();
    assert_eq!(scanned.iter().map(|w| w.index).collect::<Vec<_>>(), vec![2, 3, 4]);
    for wallet in &scanned {
        let expected = h
            .core
            .chains()
            .derive_address(ChainId::Ethereum, KeyMaterial::Seed(&seed), wallet.index)
            .unwrap();
        assert_eq!(wallet, &expected);
    }
    assert!(h.core.list_accounts().await.is_empty());

    let account = h
        .core
        .create_hardware_account_from_device(meta(), &[ChainId::Ethereum], 0..3, None)
        .await
        .unwrap();
    assert_eq!(
        account.wallets().iter().map(|w| w.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(&account.wallets()[2], &scanned[0]);

    // Past the configured per-chain limit of five.
    let err = h
        .core
        .create_hardware_account_from_device(meta(), &[ChainId::Ethereum], 0..6, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidAccount(_)));

    let err = h
        .core
        .scan_hardware_wallets("nano-1", ChainId::Ethereum, u32::MAX, 2, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidAccount(_)));
}

#[tokio::test]
async fn device_signs_ton_transfers() {
    let h = harness(&[ChainId::Ton]).await;
    let account = funded_device_account(&h, &[ChainId::Ton]).await;
    let wallet = account.wallet(ChainId::Ton).unwrap().clone();

    let seed = mnemonic_to_seed(DEVICE_MNEMONIC, "").unwrap();
    let expected = h
        .core
        .chains()
        .derive_address(ChainId::Ton, KeyMaterial::Seed(&seed), 0)
        .unwrap();
    assert_eq!(wallet, expected);
    assert!(wallet.address.starts_with("UQ"));

    let transfer = Transfer::new(recipient(&h.core, ChainId::Ton), 2_000_000_000)
        .with_memo(b"from the device".to_vec());
    let tx_id = h
        .core
        .transfer(account.id(), ChainId::Ton, &transfer, None, None)
        .await
        .unwrap();
    assert_eq!(tx_id, "network-id");
    assert_eq!(h.device.count(apdu::INS_SIGN), 1);

    let broadcasts = h.source.broadcasts.lock().unwrap().clone();
    assert_eq!(broadcasts.len(), 1);
    assert!(broadcasts[0].1.starts_with(&[0xb5, 0xee, 0x9c, 0x72]));
}
