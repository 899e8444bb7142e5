use crate::scan::{Orchestrator, ScanError, ScanRequest, ScanType};
use crate::scheduler::Scheduler;
use crate::storage::save_scan_result;
use std::time::Duration;
use tracing::{error, info, warn};

/// Main scheduler execution loop.
/// Spawns a background task per due schedule, polling every 10 seconds.
pub async fn run_scheduler_loop(scheduler: Scheduler, orchestrator: Orchestrator) {
    info!("Scheduler engine started");

    let mut interval = tokio::time::interval(Duration::from_secs(10));

    loop {
        interval.tick().await;

        match scheduler.check_due().await {
            Ok(due) => {
                for schedule in due {
                    info!(schedule = %schedule.name, subject = %schedule.subject_id, "Scheduled scan due");

                    let scheduler = scheduler.clone();
                    let orchestrator = orchestrator.clone();

                    tokio::spawn(async move {
                        // Mark as run BEFORE execution to prevent double-scheduling
                        if let Err(e) = scheduler.update_last_run(&schedule.name).await {
                            error!(schedule = %schedule.name, "Failed to update last_run: {}", e);
                            return;
                        }

                        let scan_type = match schedule.scan_type.parse::<ScanType>() {
                            Ok(t) => t,
                            Err(e) => {
                                warn!(schedule = %schedule.name, "Invalid scan type: {}", e);
                                return;
                            }
                        };

                        let request = ScanRequest::new(schedule.subject_id.clone(), scan_type);
                        match orchestrator.request_scan(request).await {
                            Ok(result) => {
                                info!(
                                    schedule = %schedule.name,
                                    subject = %schedule.subject_id,
                                    grade = %result.grade,
                                    "Scheduled scan finished"
                                );
                                if let Err(e) = save_scan_result(scheduler.get_pool(), &result) {
                                    error!(schedule = %schedule.name, "Failed to save scan result: {}", e);
                                }
                            }
                            Err(e @ ScanError::InProgress(_))
                            | Err(e @ ScanError::Cooldown { .. })
                            | Err(e @ ScanError::Busy) => {
                                // Another run or a manual scan got there first.
                                warn!(schedule = %schedule.name, "Scheduled scan skipped: {}", e);
                            }
                            Err(e) => {
                                error!(schedule = %schedule.name, "Scheduled scan failed: {}", e);
                            }
                        }
                    });
                }
            }
            Err(e) => {
                error!("Failed to check due schedules: {}", e);
            }
        }
    }
}
