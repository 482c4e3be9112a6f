// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Backbone runtime orchestration.
//!
//! Brings the components up in dependency order (engine and connections,
//! stream hub, chamber pollers, WebSocket endpoint, archive egress drain),
//! then waits for the shutdown signal and takes them down in reverse.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

use kiln_config::KilnConfig;
use kiln_core::types::PlcValue;
use kiln_engine::{ClientFactory, Engine, PollerSet, SimClientFactory};
use kiln_stream::StreamHub;

use crate::error::BinResult;
use crate::shutdown::ShutdownCoordinator;

/// How many points the egress drain batches before handing them on.
const EGRESS_BATCH_SIZE: usize = 1000;

/// Flush interval for partial egress batches.
const EGRESS_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Runtime
// =============================================================================

/// The main runtime that wires all components together.
pub struct Runtime {
    config: KilnConfig,
    factory: Arc<dyn ClientFactory>,
    shutdown: ShutdownCoordinator,
}

impl Runtime {
    /// Creates a runtime backed by the simulated fieldbus client.
    ///
    /// Production deployments inject their transport via
    /// [`with_factory`](Self::with_factory).
    pub fn new(config: KilnConfig) -> Self {
        Self {
            config,
            factory: Arc::new(SimClientFactory),
            shutdown: ShutdownCoordinator::new(),
        }
    }

    /// Replaces the client factory.
    pub fn with_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Runs the backbone until a shutdown signal arrives.
    pub async fn run(self) -> BinResult<()> {
        info!(
            version = kiln_core::VERSION,
            machines = self.config.machines.len(),
            "starting kiln backbone"
        );

        // Engine and per-PLC connections.
        let (engine, archive_rx) =
            Engine::new(self.factory.clone(), self.config.archive.channel_capacity);
        engine.start(&self.config.machines).await?;

        // Stream hub and its WebSocket endpoint.
        let hub = StreamHub::start();
        let stream_addr = SocketAddr::new(self.config.stream.bind_address, self.config.stream.port);
        let server = tokio::spawn(kiln_stream::serve(
            hub.clone(),
            stream_addr,
            self.shutdown.signal().wait(),
        ));

        // One poller per configured chamber.
        let pollers = PollerSet::start(
            engine.clone(),
            &self.config.machines,
            hub.publisher(),
            engine.archive_sender(),
        );

        // Archive egress: the downstream message-bus producer consumes this
        // channel in production; the built-in drain keeps it moving and
        // accounts for the flow.
        let egress = tokio::spawn(drain_archive(archive_rx, self.shutdown.subscribe()));

        info!("kiln backbone is ready");
        self.shutdown.wait_for_shutdown().await;
        info!("shutting down");

        // Reverse order: stop producing, then stop the fabric.
        pollers.stop().await;
        engine.stop().await;
        hub.stop().await;

        if let Err(e) = egress.await {
            warn!(error = %e, "archive egress drain ended abnormally");
        }
        match server.await {
            Ok(Err(e)) => warn!(error = %e, "stream endpoint ended abnormally"),
            Err(e) => warn!(error = %e, "stream endpoint task ended abnormally"),
            Ok(Ok(())) => {}
        }

        info!("kiln backbone shutdown complete");
        Ok(())
    }
}

// =============================================================================
// Archive egress
// =============================================================================

async fn drain_archive(mut rx: mpsc::Receiver<PlcValue>, mut stop: broadcast::Receiver<()>) {
    let mut batch: Vec<PlcValue> = Vec::with_capacity(EGRESS_BATCH_SIZE);
    let mut flushed: u64 = 0;
    let mut tick = interval(EGRESS_FLUSH_INTERVAL);

    loop {
        tokio::select! {
            _ = stop.recv() => {
                flushed += flush_batch(&mut batch);
                break;
            }

            point = rx.recv() => {
                match point {
                    Some(point) => {
                        batch.push(point);
                        if batch.len() >= EGRESS_BATCH_SIZE {
                            flushed += flush_batch(&mut batch);
                        }
                    }
                    None => {
                        flushed += flush_batch(&mut batch);
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                if !batch.is_empty() {
                    flushed += flush_batch(&mut batch);
                }
            }
        }
    }

    debug!(points = flushed, "archive egress drain stopped");
}

fn flush_batch(batch: &mut Vec<PlcValue>) -> u64 {
    let n = batch.len() as u64;
    if n > 0 {
        debug!(points = n, "archive egress batch");
        batch.clear();
    }
    n
}
