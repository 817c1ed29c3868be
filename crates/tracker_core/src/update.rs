use engine_logging::{engine_debug, engine_info, short_id};

use crate::config::millis;
use crate::{
    Effect, JobId, MergeOutcome, Msg, ProgressItem, ProgressPatch, ProgressStatus, Timestamp,
    TrackerState, Verification,
};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: TrackerState, msg: Msg) -> (TrackerState, Vec<Effect>) {
    let effects = match msg {
        Msg::StartTracking { item } => start_tracking(&mut state, item),
        Msg::Update { job_id, patch } => observe_update(&mut state, job_id, patch),
        Msg::Completed { job_id, at } => complete(&mut state, &job_id, at),
        Msg::Failed { job_id, error, at } | Msg::SubscriptionFailed { job_id, error, at } => {
            fail(&mut state, &job_id, error, at)
        }
        Msg::Cancelled { job_id, at } => cancel(&mut state, &job_id, at),
        Msg::GraceElapsed { job_id } => {
            // Removal after the grace period is purely local.
            let removed_at = state
                .get(&job_id)
                .filter(|item| item.is_terminal())
                .map(|item| item.last_updated);
            if let Some(at) = removed_at {
                state.remove(&job_id, at);
            }
            Vec::new()
        }
        Msg::Dismiss { job_id, at } => {
            let mut effects = Vec::with_capacity(2);
            if state.remove(&job_id, at).is_some() {
                effects.push(Effect::Unsubscribe {
                    job_id: job_id.clone(),
                });
            }
            effects.push(Effect::ForgetJobs {
                job_ids: vec![job_id],
            });
            effects
        }
        Msg::Restore { entries, now } => restore(&mut state, entries, now),
        Msg::Verified { results, at } => verified(&mut state, results, at),
        Msg::RetryRequested { job_id } => {
            if state.contains(&job_id) {
                vec![
                    Effect::Unsubscribe {
                        job_id: job_id.clone(),
                    },
                    Effect::ForgetJobs {
                        job_ids: vec![job_id],
                    },
                ]
            } else {
                Vec::new()
            }
        }
        Msg::RetryStarted {
            previous,
            new_id,
            at,
        } => {
            let mut item = ProgressItem::new(new_id, at);
            if let Some(old) = state.remove(&previous, at) {
                item.kind = old.kind;
                item.source = old.source;
                item.request = old.request;
            }
            engine_info!(
                "Retrying job {} as {}",
                short_id(&previous),
                short_id(&item.progress_id)
            );
            start_tracking(&mut state, item)
        }
        Msg::StopRequested { job_id, at } => {
            let stoppable = state.get(&job_id).is_some_and(|item| !item.is_terminal());
            if stoppable {
                let mut effects = vec![Effect::CancelJob {
                    job_id: job_id.clone(),
                }];
                effects.extend(cancel(&mut state, &job_id, at));
                effects
            } else {
                Vec::new()
            }
        }
        Msg::Tick { now } => sweep_stale(&mut state, now),
    };

    (state, effects)
}

fn start_tracking(state: &mut TrackerState, mut item: ProgressItem) -> Vec<Effect> {
    let job_id = item.progress_id.clone();
    item.status = ProgressStatus::Starting;

    let mut effects = Vec::with_capacity(4);
    let stored = match state.item_mut(&job_id) {
        // An update may have arrived before the initiation reply; merge into it.
        Some(existing) => {
            if existing.is_terminal() {
                return Vec::new();
            }
            existing.kind = existing.kind.or(item.kind);
            if existing.source.is_none() {
                existing.source = item.source.take();
            }
            if existing.request.is_none() {
                existing.request = item.request.take();
            }
            let stored = existing.clone();
            state.mark_dirty();
            stored
        }
        None => {
            state.insert(item.clone());
            effects.push(Effect::StatusChanged {
                job_id: job_id.clone(),
                status: ProgressStatus::Starting,
            });
            item
        }
    };

    effects.push(Effect::PersistItem { item: stored });
    effects.push(Effect::Subscribe { job_id });
    if state.show_surface(true) {
        effects.push(Effect::SurfaceVisibility(true));
    }
    effects
}

fn observe_update(state: &mut TrackerState, job_id: JobId, patch: ProgressPatch) -> Vec<Effect> {
    if state.is_retired(&job_id) {
        engine_debug!(job: &job_id, "Ignoring update for retired job");
        return Vec::new();
    }

    if let Some(terminal) = patch.status.clone().filter(ProgressStatus::is_terminal) {
        return match state.get(&job_id) {
            Some(item) if patch.observed_at < item.last_updated => {
                engine_debug!(
                    "Dropping out-of-order {} for job {}",
                    terminal,
                    short_id(&job_id)
                );
                Vec::new()
            }
            Some(item) if item.is_terminal() => Vec::new(),
            Some(_) => route_terminal(state, &job_id, terminal, &patch),
            None => match state.take_pending(&job_id) {
                // Finished while its verification is in flight.
                Some(snapshot) => {
                    state.insert(snapshot);
                    let mut effects = route_terminal(state, &job_id, terminal, &patch);
                    if state.contains(&job_id) && state.show_surface(true) {
                        effects.push(Effect::SurfaceVisibility(true));
                    }
                    effects
                }
                None => vec![Effect::ForgetJobs {
                    job_ids: vec![job_id],
                }],
            },
        };
    }

    match state.item_mut(&job_id) {
        Some(item) => match item.merge(&patch) {
            Ok(MergeOutcome::Updated) => {
                let item = item.clone();
                state.mark_dirty();
                vec![Effect::PersistItem { item }]
            }
            Ok(MergeOutcome::StatusChanged { from }) => {
                let item = item.clone();
                state.mark_dirty();
                engine_debug!(job: &job_id, "{} -> {}", from, item.status);
                vec![
                    Effect::StatusChanged {
                        job_id,
                        status: item.status.clone(),
                    },
                    Effect::PersistItem { item },
                ]
            }
            Ok(MergeOutcome::Unchanged) => Vec::new(),
            Err(reason) => {
                engine_debug!(job: &job_id, "Dropping update: {}", reason);
                Vec::new()
            }
        },
        None => upsert(state, job_id, &patch),
    }
}

/// Update for a job not in the tracked set: admit it rather than fail.
fn upsert(state: &mut TrackerState, job_id: JobId, patch: &ProgressPatch) -> Vec<Effect> {
    let item = match state.take_pending(&job_id) {
        Some(mut restored) => {
            if let Err(reason) = restored.merge(patch) {
                engine_debug!(
                    "Restored job {} kept its snapshot: {}",
                    short_id(&job_id),
                    reason
                );
            }
            restored
        }
        None => ProgressItem::from_patch(job_id.clone(), patch),
    };
    engine_debug!(job: &job_id, "Admitting untracked job as {}", item.status);

    let mut effects = vec![
        Effect::StatusChanged {
            job_id: job_id.clone(),
            status: item.status.clone(),
        },
        Effect::PersistItem { item: item.clone() },
        Effect::Subscribe { job_id },
    ];
    state.insert(item);
    if state.show_surface(true) {
        effects.push(Effect::SurfaceVisibility(true));
    }
    effects
}

fn route_terminal(
    state: &mut TrackerState,
    job_id: &str,
    terminal: ProgressStatus,
    patch: &ProgressPatch,
) -> Vec<Effect> {
    // Keep the final message and percentage the server reported.
    if let Some(item) = state.item_mut(job_id) {
        let mut rest = patch.clone();
        rest.status = None;
        let _ = item.merge(&rest);
    }
    let at = patch.observed_at;
    match terminal {
        ProgressStatus::Completed => complete(state, job_id, at),
        ProgressStatus::Cancelled => cancel(state, job_id, at),
        _ => {
            let error = patch
                .error
                .clone()
                .or_else(|| patch.message.clone())
                .unwrap_or_else(|| "job failed".to_string());
            fail(state, job_id, error, at)
        }
    }
}

fn complete(state: &mut TrackerState, job_id: &str, at: Timestamp) -> Vec<Effect> {
    match state.get(job_id) {
        Some(item) if !item.is_terminal() => {}
        _ => return Vec::new(),
    }
    state.remove(job_id, at);
    engine_info!(job: job_id, "Completed");
    vec![
        Effect::StatusChanged {
            job_id: job_id.to_string(),
            status: ProgressStatus::Completed,
        },
        Effect::Unsubscribe {
            job_id: job_id.to_string(),
        },
        Effect::ForgetJobs {
            job_ids: vec![job_id.to_string()],
        },
        Effect::RefreshArtifacts,
    ]
}

fn fail(state: &mut TrackerState, job_id: &str, error: String, at: Timestamp) -> Vec<Effect> {
    let grace = state.config().failed_grace;
    let Some(item) = state.item_mut(job_id).filter(|item| !item.is_terminal()) else {
        return Vec::new();
    };
    engine_info!(job: job_id, "Failed: {}", error);
    item.status = ProgressStatus::Failed;
    item.error = Some(error);
    item.last_updated = item.last_updated.max(at);
    state.mark_dirty();
    finish_with_grace(job_id, ProgressStatus::Failed, grace)
}

fn cancel(state: &mut TrackerState, job_id: &str, at: Timestamp) -> Vec<Effect> {
    let grace = state.config().cancelled_grace;
    let Some(item) = state.item_mut(job_id).filter(|item| !item.is_terminal()) else {
        return Vec::new();
    };
    engine_info!(job: job_id, "Cancelled");
    item.status = ProgressStatus::Cancelled;
    item.last_updated = item.last_updated.max(at);
    state.mark_dirty();
    finish_with_grace(job_id, ProgressStatus::Cancelled, grace)
}

fn finish_with_grace(
    job_id: &str,
    status: ProgressStatus,
    after: std::time::Duration,
) -> Vec<Effect> {
    vec![
        Effect::StatusChanged {
            job_id: job_id.to_string(),
            status,
        },
        Effect::Unsubscribe {
            job_id: job_id.to_string(),
        },
        Effect::ForgetJobs {
            job_ids: vec![job_id.to_string()],
        },
        Effect::ScheduleRemoval {
            job_id: job_id.to_string(),
            after,
        },
    ]
}

fn restore(
    state: &mut TrackerState,
    entries: Vec<(JobId, Option<ProgressItem>)>,
    now: Timestamp,
) -> Vec<Effect> {
    let max_age = millis(state.config().restore_max_age);
    let mut stale: Vec<JobId> = Vec::new();
    let mut queued: Vec<JobId> = Vec::new();

    for (job_id, snapshot) in entries {
        if stale.contains(&job_id) || queued.contains(&job_id) || state.contains(&job_id) {
            continue;
        }
        match snapshot {
            Some(item)
                if item.progress_id == job_id
                    && !item.is_terminal()
                    && item.age(now) <= max_age =>
            {
                state.queue_verification(item);
                queued.push(job_id);
            }
            _ => stale.push(job_id),
        }
    }

    engine_info!(
        "Restoring progress: {} to verify, {} stale",
        queued.len(),
        stale.len()
    );

    let mut effects = Vec::with_capacity(2);
    if !stale.is_empty() {
        effects.push(Effect::ForgetJobs { job_ids: stale });
    }
    if queued.is_empty() {
        let visible = !state.is_empty();
        state.show_surface(visible);
        effects.push(Effect::SurfaceVisibility(visible));
    } else {
        effects.push(Effect::VerifyJobs { job_ids: queued });
    }
    effects
}

fn verified(
    state: &mut TrackerState,
    results: Vec<(JobId, Verification)>,
    at: Timestamp,
) -> Vec<Effect> {
    let mut effects = Vec::new();
    let mut gone: Vec<JobId> = Vec::new();
    let mut refresh = false;

    for (job_id, verification) in results {
        let snapshot = state.take_pending(&job_id);
        let patch = match verification {
            Verification::Gone => {
                if state.get(&job_id).is_some_and(ProgressItem::is_terminal) {
                    // Already finished; its grace timer removes it.
                    continue;
                }
                if state.remove(&job_id, at).is_some() {
                    effects.push(Effect::Unsubscribe {
                        job_id: job_id.clone(),
                    });
                }
                gone.push(job_id);
                continue;
            }
            Verification::Alive(patch) => patch,
        };

        if state.contains(&job_id) {
            // Already admitted by a live update while verification was in flight.
            if state.get(&job_id).is_some_and(|item| !item.is_terminal()) {
                effects.push(Effect::Subscribe { job_id });
            }
            continue;
        }
        let Some(mut item) = snapshot else {
            continue;
        };
        if let Some(status) = patch.status.as_ref().filter(|status| status.is_terminal()) {
            // Finished while nobody was watching.
            refresh |= *status == ProgressStatus::Completed;
            gone.push(job_id);
            continue;
        }

        item.status = ProgressStatus::Reconnecting;
        let mut current = patch;
        current.status = None;
        current.observed_at = current.observed_at.max(at).max(item.last_updated);
        let _ = item.merge(&current);

        effects.push(Effect::StatusChanged {
            job_id: job_id.clone(),
            status: ProgressStatus::Reconnecting,
        });
        effects.push(Effect::PersistItem { item: item.clone() });
        effects.push(Effect::Subscribe { job_id });
        state.insert(item);
    }

    if !gone.is_empty() {
        engine_info!("Dropping {} restored jobs the server no longer knows", gone.len());
        effects.push(Effect::ForgetJobs { job_ids: gone });
    }
    if refresh {
        effects.push(Effect::RefreshArtifacts);
    }
    if !state.is_verifying() {
        let visible = !state.is_empty();
        state.show_surface(visible);
        effects.push(Effect::SurfaceVisibility(visible));
    }
    effects
}

fn sweep_stale(state: &mut TrackerState, now: Timestamp) -> Vec<Effect> {
    let stale_after = millis(state.config().stale_after);
    let mut effects = Vec::new();
    for item in state.items_mut() {
        if item.is_terminal() || item.status == ProgressStatus::Stale {
            continue;
        }
        if item.idle_for(now) > stale_after {
            item.status = ProgressStatus::Stale;
            effects.push(Effect::StatusChanged {
                job_id: item.progress_id.clone(),
                status: ProgressStatus::Stale,
            });
            effects.push(Effect::PersistItem { item: item.clone() });
        }
    }
    if !effects.is_empty() {
        state.mark_dirty();
    }
    state.prune_retired(now);
    effects
}
