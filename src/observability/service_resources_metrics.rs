use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::time::sleep;

use crate::helpers::time::now_i64;
use crate::observability::metrics::Metrics;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

pub async fn collect_process_metrics(metrics: Arc<Metrics>, is_metrics_enabled: bool) -> Result<()> {
    if !is_metrics_enabled {
        return Ok(());
    }
    let mut sys = System::new_all();
    let pid = sysinfo::get_current_pid().map_err(|err| anyhow!("cannot resolve own pid: {}", err))?;

    let start_time_unix = now_i64();
    metrics.process_start_time.set(start_time_unix);

    loop {
        // Refresh just our process
        let pids = [pid];
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            false,
            ProcessRefreshKind::nothing()
                .with_cpu()
                .with_memory()
                .with_exe(UpdateKind::OnlyIfNotSet),
        );

        if let Some(proc) = sys.process(pid) {
            let cpu = proc.cpu_usage(); // % over last interval
            metrics.process_cpu_usage.set(cpu.into());
            metrics.process_memory_usage.set(proc.memory() as i64);
            metrics.process_virtual_memory.set(proc.virtual_memory() as i64);

            #[cfg(target_family = "unix")]
            {
                if let Ok(entries) = std::fs::read_dir(format!("/proc/{}/fd", pid.as_u32())) {
                    metrics.process_open_fds.set(entries.count() as i64);
                }
            }

            metrics.process_uptime.set(now_i64() - start_time_unix);
        }

        sleep(SAMPLE_INTERVAL).await;
    }
}
