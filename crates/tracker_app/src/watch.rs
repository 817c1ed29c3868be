use std::time::Duration;

use anyhow::Context;
use engine_logging::{engine_info, engine_warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracker_engine::ProgressTracker;

use crate::render;

const REDRAW_INTERVAL: Duration = Duration::from_millis(250);

/// Prints the job view whenever it changes until no tracked jobs remain or
/// the user presses Ctrl-C. Jobs left running stay persisted for `resume`.
pub async fn watch(tracker: &ProgressTracker, tick_interval: Duration) -> anyhow::Result<()> {
    let mut events = tracker.events();
    let mut sweep = tokio::time::interval(tick_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut redraw = tokio::time::interval(REDRAW_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if tracker.consume_dirty() {
            print_view(tracker);
        }
        if tracker.is_empty() {
            break;
        }
        tokio::select! {
            _ = sweep.tick() => tracker.tick().await,
            _ = redraw.tick() => {}
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = render::event_line(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    engine_warn!("Display fell behind; skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            result = &mut ctrl_c => {
                result.context("listening for Ctrl-C")?;
                println!("Detached. Run `kbprogress resume` to reattach.");
                break;
            }
        }
    }

    tracker.shutdown();
    engine_info!("Stopped watching");
    Ok(())
}

fn print_view(tracker: &ProgressTracker) {
    let view = tracker.view();
    println!("-- {} active --", view.active_count);
    for line in render::render_view(&view) {
        println!("{line}");
    }
}
