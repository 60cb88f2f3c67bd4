use std::sync::{Arc, Mutex, OnceLock};

use axum::{extract::State, http::StatusCode, Json};
use sysinfo::System;
use tracing::info;

use crate::models::{DiagnosticsResponse, ErrorResponse};
use crate::AppState;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Session counters plus host load
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {
    let session = state.session.diagnostics();

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Participants: {}, Frames: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        session.participants,
        session.frames_sent
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_participants: session.participants as u32,
            n_conn: session.connections as u32,
            history_depth: session.history_depth as u32,
            forward_depth: session.forward_depth as u32,
            frames_sent: session.frames_sent,
            capture_failures: session.capture_failures,
            commands_executed: session.commands_executed,
            commands_failed: session.commands_failed,
            commands_dropped: session.commands_dropped,
            started_at: session.started_at,
            uptime_seconds: session.uptime_seconds,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
