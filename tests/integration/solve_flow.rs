//! The canonical scenario: two workers — one tame, one wild — walk the
//! order-11 group until they meet, the server solves k = 7 and broadcasts
//! it, and a third client that never sends a batch is reaped for idling.

use std::time::Duration;

use crate::*;
use wallaby_merge::Phase;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_workers_meet_and_the_server_broadcasts_seven() {
    let ctx = toy_ctx();
    let (server, addr) = start_server(ctx.clone(), quick_server_cfg(2)).await;

    // the idler connects first and never sends a thing
    let mut idler = handshake(addr, &ctx).await;

    let tame = spawn_worker(&ctx, addr, TAME_HERD, 11);
    let wild = spawn_worker(&ctx, addr, WILD_HERD, 97);

    let expected = ctx.group.encode_scalar(&7);

    // both workers hear the broadcast and stop on their own
    let tame_heard = tokio::time::timeout(Duration::from_secs(10), tame.finish())
        .await
        .expect("tame worker timed out")
        .expect("tame worker failed");
    let wild_heard = tokio::time::timeout(Duration::from_secs(10), wild.finish())
        .await
        .expect("wild worker timed out")
        .expect("wild worker failed");
    assert_eq!(tame_heard, Some(expected));
    assert_eq!(wild_heard, Some(expected));

    // the server agrees, and its table knows a collision happened
    assert_eq!(server.solution(), Some(expected));
    assert!(server.table().is_solved());
    assert!(server.table().stats().collisions >= 1);

    // the idler is force-closed — either reaped for idling or swept up by
    // the post-solve drain — without ever contributing a batch
    let mut probe = [0u8; 256];
    let deadline = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match idler.read(&mut probe).await {
                Ok(0) => break,          // EOF: session closed
                Ok(_) => continue,       // status broadcasts still flowing
                Err(_) => break,
            }
        }
    })
    .await;
    assert!(deadline.is_ok(), "idle session was never closed");

    // after the grace period the server drains and run_on returns
    let mut phase = server.phase();
    tokio::time::timeout(Duration::from_secs(5), phase.wait_for(|p| *p == Phase::Draining))
        .await
        .expect("server never drained")
        .expect("phase channel closed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_single_worker_carrying_both_herds_solves_alone() {
    // one producer whose lanes cover both populations still collides —
    // the table does not care where records come from
    let ctx = toy_ctx();
    let (server, addr) = start_server(ctx.clone(), quick_server_cfg(3_600)).await;

    let tame = spawn_worker(&ctx, addr, TAME_HERD, 5);
    let wild = spawn_worker(&ctx, addr, WILD_HERD, 5);

    let expected = ctx.group.encode_scalar(&7);
    for worker in [tame, wild] {
        let heard = tokio::time::timeout(Duration::from_secs(10), worker.finish())
            .await
            .expect("worker timed out")
            .expect("worker failed");
        assert_eq!(heard, Some(expected));
    }
    assert_eq!(server.solution(), Some(expected));
}
