//! Seed scenarios exercising `Client` end-to-end against `ethlink-sim`'s
//! in-process driver.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ethlink_core::{Arena, Client, EthernetDevice, RecvOutcome, State};
use ethlink_sim::MockDevice;

fn new_client(device: Arc<MockDevice>, arena: Arc<Arena>) -> Client {
    Client::new("test0", "sim/test0", device, arena, None).expect("client construction")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

#[test]
fn s1_send_ack_round_trip() {
    init_tracing();
    let device = MockDevice::with_depths(2, 1);
    let arena = Arc::new(Arena::create().unwrap());
    let client = new_client(device, arena);

    let b0 = client.alloc_for_send().expect("slot 0");
    let b1 = client.alloc_for_send().expect("slot 1");
    assert_eq!(client.tx_in_flight(), 2);
    assert!(client.alloc_for_send().is_none(), "tx depth exhausted");

    client.send(b0).unwrap();

    // Give the simulated driver a moment to ack both descriptors.
    std::thread::sleep(Duration::from_millis(20));

    client.send(b1).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    // wait_send drains the final completion as part of checking whether
    // a new send slot is available.
    client.wait_send().unwrap();
    assert_eq!(client.tx_in_flight(), 0);
    assert_eq!(client.tx_total(), 2);
}

#[test]
fn s2_recv_pipeline_preserves_order() {
    init_tracing();
    let device = MockDevice::with_depths(4, 3);
    device.listen_start().unwrap();
    let arena = Arc::new(Arena::create().unwrap());
    let client = new_client(device, arena);

    for len in [64usize, 128, 100] {
        let mut b = client.alloc_for_send().expect("send slot");
        b.set_len(len);
        client.send(b).unwrap();
    }

    std::thread::sleep(Duration::from_millis(30));

    let mut lens = Vec::new();
    for _ in 0..3 {
        match client.recv().unwrap() {
            RecvOutcome::Buffer(b) => lens.push(b.len()),
            RecvOutcome::WouldBlock => panic!("expected a completion"),
        }
    }
    assert_eq!(lens, vec![64, 128, 100]);
    assert_eq!(client.rx_total(), 3);
}

#[test]
fn s3_rx_backpressure_is_not_an_error() {
    init_tracing();
    let device = MockDevice::with_depths(2, 2);
    let arena = Arc::new(Arena::create().unwrap());
    let client = new_client(device, arena);

    match client.recv().unwrap() {
        RecvOutcome::WouldBlock => {}
        RecvOutcome::Buffer(_) => panic!("nothing should be pending yet"),
    }
}

#[test]
fn s4_link_status_transitions_during_wait_recv() {
    init_tracing();
    let device = MockDevice::with_depths(2, 2);
    let arena = Arc::new(Arena::create().unwrap());

    let calls = Arc::new(AtomicU32::new(0));
    let calls_for_cb = calls.clone();
    let client = Arc::new(
        Client::new(
            "test0",
            "sim/test0",
            device.clone(),
            arena,
            Some(Box::new(move |_s: State| {
                calls_for_cb.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap(),
    );

    // wait_recv only returns on FIFO_READABLE, an error, or peer-closed;
    // it handles LINK_STATUS internally and loops. Run it in the
    // background and observe state transitions from the test thread,
    // then unblock it via close_rx.
    let client_for_thread = client.clone();
    let waiter = std::thread::spawn(move || client_for_thread.wait_recv());

    device.set_link_up(false);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(client.state(), State::Down);

    device.set_link_up(true);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(client.state(), State::Started);

    assert!(calls.load(Ordering::SeqCst) >= 2);

    device.close_rx();
    let result = waiter.join().unwrap();
    assert!(matches!(result, Err(ethlink_core::ClientError::PeerClosed)));
}

#[test]
fn s5_peer_closed_tx_propagates_and_close_reclaims() {
    init_tracing();
    let device = MockDevice::with_depths(2, 2);
    let arena = Arc::new(Arena::create().unwrap());
    let client = new_client(device.clone(), arena.clone());

    let b = client.alloc_for_send().expect("slot");
    device.close_tx();

    let err = client.send(b).expect_err("tx fifo is closed");
    assert!(matches!(err, ethlink_core::ClientError::PeerClosed));

    client.close();
    client.close(); // idempotent

    assert_eq!(client.state(), State::Closed);
}

#[test]
fn s6_foreign_free_is_fatal() {
    let arena = Arc::new(Arena::create().unwrap());
    let a = arena.register_client();
    let b_owner = arena.register_client();
    let buf = arena.alloc(a).unwrap();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        arena.free(b_owner, buf);
    }));
    assert!(result.is_err());
}
