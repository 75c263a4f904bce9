use std::{path::Path, sync::Arc};

use anyhow::{anyhow, Context, Result};
use tokio::runtime::Handle;
use tracing::{info, warn};

use analysis::{CameraDirectory, CameraDirectoryService};
use geo_ingest_core::{PositionSource, WatchHandle};
use geo_ingest_replay::ReplaySource;
use geo_ingest_udp::UdpPositionSource;
use iox::TraceRecorder;
use ledger_client::{HttpLedger, SegmentLedger, SubmissionGateway};
use model::CameraId;

use crate::config::DriveConfig;
use crate::notices::{self, DriverNotice};
use crate::session::{DriveSession, SessionSummary};

/// Live drive fed by UDP position datagrams.
pub async fn drive(cfg: &DriveConfig, record: Option<&Path>) -> Result<SessionSummary> {
    let source = UdpPositionSource::new(cfg.udp.clone());
    run_session(cfg, source, record).await
}

/// Drives a recorded trace through the same pipeline.
pub async fn replay(cfg: &DriveConfig, trace: &Path, speedup: f64) -> Result<SessionSummary> {
    let source = ReplaySource::from_path(trace, speedup)?;
    info!("replaying {} fixes from {}", source.len(), trace.display());
    run_session(cfg, source, None).await
}

pub async fn cameras(cfg: &DriveConfig) -> Result<()> {
    let ledger = HttpLedger::new(&cfg.server)?;
    let directory = CameraDirectory::load(&ledger).await?;
    for cam in directory.cameras() {
        let limit = match cam.speed_limit_kmh {
            0 => "-".to_string(),
            l => format!("{l} km/h"),
        };
        println!(
            "{:>5}  {:<32} {:>10.6} {:>11.6}  limit {:<9} detect {:.0} m  warn {:.0} m",
            cam.id.0, cam.name, cam.position.latitude, cam.position.longitude, limit,
            cam.detection_radius_m, cam.warning_radius_m
        );
    }
    println!("{} cameras", directory.len());
    Ok(())
}

pub async fn check_segment(cfg: &DriveConfig, first: i64, second: i64) -> Result<bool> {
    let ledger = HttpLedger::new(&cfg.server)?;
    let exists = ledger.segment_exists(CameraId(first), CameraId(second)).await?;
    println!("{first} -> {second}: {}", if exists { "official segment" } else { "not an official segment" });
    Ok(exists)
}

async fn run_session<S: PositionSource + 'static>(
    cfg: &DriveConfig,
    source: S,
    record: Option<&Path>,
) -> Result<SessionSummary> {
    let ledger = Arc::new(HttpLedger::new(&cfg.server)?);
    let (ntx, nrx) = notices::channel();
    let console = notices::spawn_console(nrx);

    // a session without cameras still shows speed
    let directory = match CameraDirectory::load(ledger.as_ref() as &dyn CameraDirectoryService).await {
        Ok(d) => d,
        Err(e) => {
            warn!("{e}");
            let _ = ntx.send(DriverNotice::Status("Failed to load cameras".into()));
            CameraDirectory::empty()
        }
    };

    let ledger: Arc<dyn SegmentLedger> = ledger;
    let mut session = DriveSession::new(
        Arc::new(directory),
        cfg.tracker.clone(),
        SubmissionGateway::new(ledger, cfg.server.user_id),
        ntx.clone(),
        Handle::current(),
    );
    if let Some(path) = record {
        session = session.with_recorder(TraceRecorder::create(path)?);
        info!("recording fixes to {}", path.display());
    }
    info!("session {} starting", session.id());
    let _ = ntx.send(DriverNotice::Status("Requesting GPS...".into()));
    drop(ntx);

    let (tx, rx) = geo_ingest_core::channel();
    let watch = WatchHandle::spawn(source, tx);
    let mut worker = tokio::task::spawn_blocking(move || session.run(rx));

    let finished = tokio::select! {
        res = &mut worker => Some(res),
        sig = tokio::signal::ctrl_c() => {
            sig.context("listen for ctrl-c")?;
            info!("stopping");
            None
        }
    };
    if watch.is_finished() {
        info!("position source ended");
    }
    // dropping the watch aborts the source and disconnects the session
    drop(watch);
    let summary = match finished {
        Some(res) => res?,
        None => worker.await?,
    };
    console.join().map_err(|_| anyhow!("console thread panicked"))?;
    Ok(summary)
}
