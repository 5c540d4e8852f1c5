use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use trigwatch_common::problem::{does_any_tree_have_error, ProblemKind, TargetVerification};
use trigwatch_common::types::Trigger;
use trigwatch_storage::{MutexGuard, OpContext};
use trigwatch_verify::{verify_targets, BoundTrigger, TriggerBinder};

use crate::error::AppError;
use crate::state::AppState;

/// Outcome of a create or update.
#[derive(Debug, Clone)]
pub struct SavedTrigger {
    pub trigger: Trigger,
    pub time_series_names: BTreeMap<String, Vec<String>>,
    pub checks: Vec<TargetVerification>,
}

/// Any node other than a clean root: errors and warnings alike.
fn has_problems(checks: &[TargetVerification]) -> bool {
    checks
        .iter()
        .any(|c| c.tree.kind != ProblemKind::Ok || !c.tree.problems.is_empty())
}

async fn bind_and_verify(
    state: &AppState,
    ctx: &OpContext,
    trigger: Trigger,
    validate: bool,
    now: i64,
) -> Result<(BoundTrigger, Vec<TargetVerification>), AppError> {
    let bound = TriggerBinder::new(&state.sources, now).bind(ctx, trigger).await?;
    let trigger = &bound.trigger;
    let checks = verify_targets(
        &state.sources,
        ctx,
        &trigger.targets,
        state.ttl.ttl_for(trigger.is_remote),
        trigger.is_remote,
        now,
    )
    .await?;
    if validate && does_any_tree_have_error(&checks) {
        return Err(AppError::TargetsInvalid(checks));
    }
    Ok((bound, checks))
}

async fn release(guard: &mut MutexGuard) {
    if let Err(e) = guard.unlock().await {
        tracing::warn!(lock = %guard.name(), error = %e, "Failed to release lock");
    }
}

async fn index(state: &AppState, trigger: &Trigger, checks: &[TargetVerification]) {
    if let Err(e) = state.searcher.index(trigger, has_problems(checks)).await {
        tracing::warn!(trigger_id = %trigger.id, error = %e, "Failed to index trigger");
    }
}

/// Bind, optionally reject failing verification, then persist under the
/// `trigger-create:{fingerprint}` lock. A trigger whose fingerprint is
/// already stored is a conflict.
pub async fn create_trigger(
    state: &AppState,
    ctx: &OpContext,
    mut trigger: Trigger,
    validate: bool,
    user: Option<String>,
) -> Result<SavedTrigger, AppError> {
    if trigger.id.trim().is_empty() {
        trigger.id = trigwatch_common::id::next_id();
    }
    let now = Utc::now();
    let (bound, checks) = bind_and_verify(state, ctx, trigger, validate, now.timestamp()).await?;
    let BoundTrigger {
        mut trigger,
        time_series_names,
    } = bound;

    let fingerprint = trigger.fingerprint();
    let mut guard = state
        .db
        .new_mutex(&format!("trigger-create:{fingerprint}"), state.config.lock.lease())
        .lock(ctx)
        .await?;
    let saved = persist_new(state, ctx, &mut trigger, &fingerprint, now, user).await;
    release(&mut guard).await;
    saved?;

    index(state, &trigger, &checks).await;
    tracing::info!(trigger_id = %trigger.id, name = %trigger.name, "Trigger created");
    Ok(SavedTrigger {
        trigger,
        time_series_names,
        checks,
    })
}

async fn persist_new(
    state: &AppState,
    ctx: &OpContext,
    trigger: &mut Trigger,
    fingerprint: &str,
    now: DateTime<Utc>,
    user: Option<String>,
) -> Result<(), AppError> {
    if let Some(existing) = state.db.trigger_id_by_fingerprint(ctx, fingerprint).await? {
        if state.db.get_trigger(ctx, &existing).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "trigger {existing} already watches the same targets"
            )));
        }
    }
    if state.db.get_trigger(ctx, &trigger.id).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "trigger {} already exists",
            trigger.id
        )));
    }
    trigger.created_at = Some(now);
    trigger.updated_at = Some(now);
    trigger.updated_by = user;
    state.db.save_trigger(ctx, trigger).await?;
    Ok(())
}

/// Re-bind and save an existing trigger. The `trigger-create:{fingerprint}`
/// lock of the new rule is taken before the `trigger-update:{id}` lock, so
/// an update never races a create or another update onto the same rule.
/// The number of targets is fixed at creation.
pub async fn update_trigger(
    state: &AppState,
    ctx: &OpContext,
    id: &str,
    mut trigger: Trigger,
    validate: bool,
    user: Option<String>,
) -> Result<SavedTrigger, AppError> {
    let existing = get_trigger(state, ctx, id).await?;
    if trigger.targets.len() != existing.targets.len() {
        return Err(AppError::InvalidRequest(format!(
            "number of targets cannot change (was {}, got {})",
            existing.targets.len(),
            trigger.targets.len()
        )));
    }
    trigger.id = id.to_string();
    let now = Utc::now();
    let (bound, checks) = bind_and_verify(state, ctx, trigger, validate, now.timestamp()).await?;
    let BoundTrigger {
        mut trigger,
        time_series_names,
    } = bound;

    let lease = state.config.lock.lease();
    let mut rule_guard = state
        .db
        .new_mutex(&format!("trigger-create:{}", trigger.fingerprint()), lease)
        .lock(ctx)
        .await?;
    let mut id_guard = match state
        .db
        .new_mutex(&format!("trigger-update:{id}"), lease)
        .lock(ctx)
        .await
    {
        Ok(guard) => guard,
        Err(e) => {
            release(&mut rule_guard).await;
            return Err(e.into());
        }
    };
    let saved = persist_update(state, ctx, &mut trigger, now, user).await;
    release(&mut id_guard).await;
    release(&mut rule_guard).await;
    saved?;

    index(state, &trigger, &checks).await;
    tracing::info!(trigger_id = %trigger.id, "Trigger updated");
    Ok(SavedTrigger {
        trigger,
        time_series_names,
        checks,
    })
}

async fn persist_update(
    state: &AppState,
    ctx: &OpContext,
    trigger: &mut Trigger,
    now: DateTime<Utc>,
    user: Option<String>,
) -> Result<(), AppError> {
    // Re-read under the lock: a concurrent delete wins.
    let current = get_trigger(state, ctx, &trigger.id).await?;
    if let Some(other) = state
        .db
        .trigger_id_by_fingerprint(ctx, &trigger.fingerprint())
        .await?
        .filter(|other| *other != trigger.id)
    {
        if state.db.get_trigger(ctx, &other).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "trigger {other} already watches the same targets"
            )));
        }
    }
    trigger.created_at = current.created_at;
    trigger.updated_at = Some(now);
    trigger.updated_by = user;
    state.db.save_trigger(ctx, trigger).await?;
    Ok(())
}

/// Dry-run verification. Target problems found while binding (parse,
/// evaluation, unknown function, trigger expression) are left to the trees.
pub async fn check_trigger(
    state: &AppState,
    ctx: &OpContext,
    trigger: Trigger,
) -> Result<Vec<TargetVerification>, AppError> {
    let now = Utc::now().timestamp();
    let (targets, is_remote) = match TriggerBinder::new(&state.sources, now)
        .bind(ctx, trigger.clone())
        .await
    {
        Ok(bound) => (bound.trigger.targets, bound.trigger.is_remote),
        Err(e) if e.is_target_problem() => {
            tracing::debug!(error = %e, "Bind problem left to verification");
            (trigger.targets, trigger.is_remote)
        }
        Err(e) => return Err(e.into()),
    };
    Ok(verify_targets(
        &state.sources,
        ctx,
        &targets,
        state.ttl.ttl_for(is_remote),
        is_remote,
        now,
    )
    .await?)
}

pub async fn get_trigger(state: &AppState, ctx: &OpContext, id: &str) -> Result<Trigger, AppError> {
    state
        .db
        .get_trigger(ctx, id)
        .await?
        .ok_or_else(|| AppError::NotFound {
            entity: "trigger",
            id: id.to_string(),
        })
}

pub async fn list_triggers(state: &AppState, ctx: &OpContext) -> Result<Vec<Trigger>, AppError> {
    Ok(state.db.list_triggers(ctx).await?)
}

pub async fn delete_trigger(state: &AppState, ctx: &OpContext, id: &str) -> Result<(), AppError> {
    if !state.db.delete_trigger(ctx, id).await? {
        return Err(AppError::NotFound {
            entity: "trigger",
            id: id.to_string(),
        });
    }
    if let Err(e) = state.searcher.remove(id).await {
        tracing::warn!(trigger_id = %id, error = %e, "Failed to remove trigger from index");
    }
    Ok(())
}
