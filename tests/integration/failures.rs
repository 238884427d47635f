//! Hostile and misconfigured clients: the server survives, everyone
//! else keeps working.

use std::time::Duration;

use crate::*;
use wallaby_core::wire::WireRecord;

#[tokio::test]
async fn a_worker_on_a_different_group_is_turned_away() {
    let ctx = toy_ctx();
    let (_server, addr) = start_server(ctx.clone(), quick_server_cfg(3_600)).await;

    // same code, different modulus — a different search entirely
    let group = ModGroup::new(13);
    let wrong_ctx = SearchContext::new(
        group,
        group.mul(&7),
        HerdPlan::from_herds(vec![
            Herd {
                id: 0,
                kind: Kind::Tame,
                offset: 3,
            },
            Herd {
                id: 1,
                kind: Kind::Wild,
                offset: 0,
            },
        ]),
        0,
    );

    let client = MergeClient::new(
        wrong_ctx,
        ClientConfig {
            server: addr.to_string(),
            ..ClientConfig::default()
        },
        &BufferConfig::default(),
        vec![Arc::new(DpBuffer::new(16))],
        Arc::new(Notify::new()),
        Arc::new(AtomicBool::new(false)),
    );
    assert!(matches!(client.run().await, Err(ClientError::Rejected)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn garbage_batches_close_their_sender_and_nobody_else() {
    let ctx = toy_ctx();
    let (server, addr) = start_server(ctx.clone(), quick_server_cfg(3_600)).await;

    // a record whose "point" is 11 — not an element of the order-11 group
    let mut offender = handshake(addr, &ctx).await;
    let mut bad_point = [0u8; 32];
    bad_point[0] = 11;
    let record = WireRecord {
        point: bad_point,
        distance: ctx.group.encode_scalar(&1),
        kind: Kind::Tame as u8,
        flags: 0,
        herd: TAME_HERD,
    };
    offender
        .write_all(&encode_frame(FrameKind::DpBatch, record.as_bytes()).unwrap())
        .await
        .unwrap();

    // the offender gets closed...
    let mut probe = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(5), offender.read(&mut probe)).await;
    assert_eq!(read.expect("offending session was not closed").unwrap(), 0);

    // ...and honest workers go on to solve as if nothing happened
    let tame = spawn_worker(&ctx, addr, TAME_HERD, 41);
    let wild = spawn_worker(&ctx, addr, WILD_HERD, 43);
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
