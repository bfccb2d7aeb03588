//! System-application execution.
//!
//! A thin, compression-agnostic wrapper over the wire protocol: flood the
//! binaries, confirm the cores armed, start them (plus an optional SYNC0
//! barrier release), then block until every tracked core reaches FINISHED.
//! On failure the per-core status is logged in full, the application is torn
//! down, and the error re-raised. Reused by both the bitfield orchestrator
//! and the plain on-chip drivers.

use std::time::Duration;

use tracing::{error, warn};

use spinn_machine::{CpuState, Signal};

use crate::error::{CompressionError, Result};
use crate::targets::{CoreSubsets, ExecutableTargets};
use crate::transceiver::Transceiver;

/// Load and run a set of system binaries, returning once every tracked core
/// has FINISHED.
///
/// `binaries_to_track` restricts the completion wait to named binaries (the
/// bitfield path only waits on sorters; compressor cores are the sorters'
/// responsibility). `None` tracks everything.
///
/// # Errors
///
/// [`CompressionError::CoresNotInState`] if cores fail to arm or to finish;
/// the application is stopped before the error is returned.
pub fn run_system_application(
    txrx: &mut dyn Transceiver,
    targets: &ExecutableTargets,
    app_id: u8,
    needs_sync_barrier: bool,
    binaries_to_track: Option<&[&str]>,
    timeout: Option<Duration>,
) -> Result<()> {
    // Phase ordering matters: all data is already in SDRAM (the loader ran
    // first), so flooding and starting cannot race the writes.
    for binary in targets.binaries() {
        let Some(subsets) = targets.cores_for(binary) else {
            continue;
        };
        if !subsets.is_empty() {
            txrx.execute_flood(subsets, binary, app_id)?;
        }
    }

    let total = targets.total_processors();
    let armed = txrx.count_cores_in_state(app_id, CpuState::Ready)?;
    if armed < total {
        let status = txrx.core_status_string(&targets.all_core_subsets());
        error!("only {armed} of {total} cores reached READY:\n{status}");
        stop_quietly(txrx, app_id);
        return Err(CompressionError::CoresNotInState {
            expected: CpuState::Ready,
            status,
        });
    }

    txrx.send_signal(app_id, Signal::Start)?;
    if needs_sync_barrier {
        txrx.send_signal(app_id, Signal::Sync0)?;
    }

    let check_targets = match binaries_to_track {
        Some(names) => {
            let mut subsets = CoreSubsets::new();
            for name in names {
                if let Some(cores) = targets.cores_for(name) {
                    subsets.extend_from(cores);
                }
            }
            subsets
        }
        None => targets.all_core_subsets(),
    };

    if let Err(e) = txrx.wait_for_cores_to_be_in_state(
        &check_targets,
        app_id,
        &[CpuState::Finished],
        timeout,
    ) {
        if let CompressionError::CoresNotInState { status, .. } = &e {
            error!("compressor cores failed to finish:\n{status}");
        }
        stop_quietly(txrx, app_id);
        return Err(e);
    }

    Ok(())
}

/// Best-effort teardown; a stop failure must not mask the original error.
fn stop_quietly(txrx: &mut dyn Transceiver, app_id: u8) {
    if let Err(e) = txrx.stop_application(app_id) {
        warn!("could not stop compressor application {app_id}: {e}");
    }
}
