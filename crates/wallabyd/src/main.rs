//! wallabyd — distributed kangaroo search daemon.
//!
//! One binary, two roles: `wallabyd server` runs the merge authority,
//! `wallabyd worker` walks kangaroos and streams distinguished points to
//! the server. Both sides read the same config, which is what makes the
//! handshake digest line up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::Notify;

use wallaby_core::config::WallabyConfig;
use wallaby_core::dp::DpMask;
use wallaby_core::group::Group;
use wallaby_core::jump::JumpSet;
use wallaby_core::ristretto::Ristretto;
use wallaby_core::search::HerdPlan;
use wallaby_core::SearchContext;
use wallaby_engine::{seed_lane, spawn_walker, CpuWalkEngine, DpBuffer, MergeClient};
use wallaby_merge::MergeServer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = WallabyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        WallabyConfig::default()
    });

    let mode = std::env::args().nth(1).unwrap_or_else(|| "server".to_string());
    tracing::info!(mode, "wallabyd starting");

    match mode.as_str() {
        "server" => run_server(config).await,
        "worker" => run_worker(config).await,
        other => bail!("unknown mode {other:?} — usage: wallabyd [server|worker]"),
    }
}

/// Decode the configured search into a context. Server and workers run
/// this on the same config; the handshake digest catches any divergence.
fn build_context(config: &WallabyConfig) -> Result<SearchContext<Ristretto>> {
    let group = Ristretto;
    let target_bytes = config
        .search
        .target_bytes()?
        .context("search.target is required")?;
    let target = group
        .decode_point(&target_bytes)
        .context("search.target is not a valid point encoding")?;
    let range_start = group
        .decode_scalar(&config.search.range_start_bytes()?)
        .context("search.range_start is not a canonical scalar")?;
    let plan = HerdPlan::build(
        &group,
        &range_start,
        config.search.range_bits,
        config.search.tame_herds.max(1),
        config.search.wild_herds.max(1),
    );
    Ok(SearchContext::new(
        group,
        target,
        plan,
        config.search.dp_bits,
    ))
}

async fn run_server(config: WallabyConfig) -> Result<()> {
    let ctx = build_context(&config)?;
    let server = MergeServer::new(ctx, config.server.clone());

    if let Ok(path) = std::env::var("WALLABY_CHECKPOINT") {
        let path = std::path::Path::new(&path);
        if path.exists() {
            let records = wallaby_merge::checkpoint::load(
                path,
                &server.search_digest(),
                config.search.dp_bits,
            )
            .with_context(|| format!("failed to load checkpoint {}", path.display()))?;
            let count = records.len();
            for record in records {
                server.table().ingest(record);
            }
            tracing::info!(records = count, "checkpoint restored");
        }
    }

    let outcome = {
        let server = server.clone();
        tokio::select! {
            result = server.run() => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                Ok(())
            }
        }
    };

    match server.solution() {
        Some(scalar) => tracing::info!(scalar = %hex::encode(scalar), "search solved"),
        None => tracing::info!("stopping without a solution"),
    }

    // dump the table so an unsolved search can resume where it left off
    if let Ok(path) = std::env::var("WALLABY_CHECKPOINT") {
        let digest = server.search_digest();
        wallaby_merge::checkpoint::save(
            std::path::Path::new(&path),
            &digest,
            config.search.dp_bits,
            &server.table().snapshot(),
        )
        .with_context(|| format!("failed to write checkpoint {path}"))?;
    }
    outcome
}

async fn run_worker(config: WallabyConfig) -> Result<()> {
    let ctx = build_context(&config)?;
    let group = ctx.group;

    let seed = if config.search.jump_seed != 0 {
        config.search.jump_seed
    } else {
        // jump tables need not agree across workers, so a local random
        // seed is fine — and keeps workers off each other's paths
        rand::random()
    };
    let mask = DpMask::new(config.search.dp_bits);
    let lanes = config.client.lanes.max(1);
    let lane_width = config.client.lane_width.max(1);
    tracing::info!(seed, lanes, lane_width, dp_bits = mask.bits(), "worker starting");

    let stop = Arc::new(AtomicBool::new(false));
    let flush_hint = Arc::new(Notify::new());
    let mut buffers = Vec::with_capacity(lanes);
    let mut walkers = Vec::with_capacity(lanes);
    for lane in 0..lanes {
        let jumps = JumpSet::derive(&group, seed.wrapping_add(lane as u64), config.search.range_bits);
        let engine = CpuWalkEngine::new(group, jumps, mask);
        let roos = seed_lane(&ctx, lane_width, rand::random());
        let buffer = Arc::new(DpBuffer::new(config.buffer.capacity));
        walkers.push(spawn_walker(
            lane,
            group,
            engine,
            roos,
            buffer.clone(),
            flush_hint.clone(),
            stop.clone(),
        ));
        buffers.push(buffer);
    }

    let client = MergeClient::new(
        ctx,
        config.client.clone(),
        &config.buffer,
        buffers,
        flush_hint,
        stop.clone(),
    );

    let outcome = tokio::select! {
        result = client.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            None
        }
    };

    stop.store(true, Ordering::Relaxed);
    for walker in walkers {
        walker.join();
    }

    match outcome {
        Some(scalar) => tracing::info!(scalar = %hex::encode(scalar), "search solved"),
        None => tracing::info!("stopping without a solution"),
    }
    Ok(())
}
