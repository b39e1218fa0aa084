//! Analytics Sweeper Background Job
//!
//! Maintains the time-window counters on the word analytics rows:
//! - zeroes `today_count` at UTC midnight
//! - recomputes `week_count` for every tracked word from the trailing seven
//!   days of raw events, instead of decaying it incrementally, so the rolling
//!   window cannot drift from the event log

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::AnalyticsConfig;
use crate::db::DataStore;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct SweepSummary {
    pub rows_reset: u64,
    pub words_recomputed: usize,
    pub words_failed: usize,
}

/// One full sweep: reset daily counters, then rebuild the rolling week count
/// per tracked word. A failed word is logged and skipped; the sweep finishes.
pub async fn run_sweep<S: DataStore + ?Sized>(
    store: &Arc<S>,
    rule: &AnalyticsConfig,
) -> Result<SweepSummary> {
    let mut summary = SweepSummary {
        rows_reset: store.reset_today_counts().await?,
        ..Default::default()
    };

    let week_start = Utc::now() - Duration::days(7);
    let tracked = store.list_tracked_words(None).await?;
    for (word, language) in tracked {
        let week_count = match store
            .list_study_events(&word, &language, Some(week_start))
            .await
        {
            Ok(events) => events.len() as i64,
            Err(err) => {
                warn!(word, language, error = %err, "week recount failed; keeping stale value");
                summary.words_failed += 1;
                continue;
            }
        };
        if let Err(err) = store
            .replace_week_count(&word, &language, week_count, rule)
            .await
        {
            warn!(word, language, error = %err, "week count write failed");
            summary.words_failed += 1;
            continue;
        }
        summary.words_recomputed += 1;
    }

    Ok(summary)
}

/// Runs `run_sweep` once per UTC midnight, forever.
pub async fn start_analytics_sweeper<S: DataStore + ?Sized>(
    store: Arc<S>,
    rule: AnalyticsConfig,
) {
    info!("Starting analytics sweeper background job");

    loop {
        let wait = until_next_utc_midnight();
        sleep(wait).await;

        info!("Running analytics sweep cycle");
        let cycle_start = Instant::now();
        match run_sweep(&store, &rule).await {
            Ok(summary) => {
                info!(
                    rows_reset = summary.rows_reset,
                    words_recomputed = summary.words_recomputed,
                    words_failed = summary.words_failed,
                    duration_ms = cycle_start.elapsed().as_millis(),
                    "Analytics sweep completed"
                );
            }
            Err(e) => {
                error!(
                    error = %e,
                    duration_ms = cycle_start.elapsed().as_millis(),
                    "Analytics sweep failed"
                );
            }
        }
    }
}

fn until_next_utc_midnight() -> std::time::Duration {
    let now = Utc::now();
    let tomorrow = (now + Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc();
    (tomorrow - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(60))
}
