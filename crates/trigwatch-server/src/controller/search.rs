use chrono::{DateTime, Utc};
use trigwatch_common::types::Trigger;
use trigwatch_storage::{OpContext, Pager};

use crate::error::AppError;
use crate::search::SearchOptions;
use crate::state::AppState;

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub options: SearchOptions,
    /// Explicit page; a reused pager advances by one when absent.
    pub page: Option<usize>,
    pub size: Option<usize>,
    pub create_pager: bool,
    pub pager_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchPage {
    pub list: Vec<Trigger>,
    pub page: usize,
    pub size: usize,
    pub total: usize,
    pub pager_id: Option<String>,
    pub pager_expire_at: Option<DateTime<Utc>>,
}

/// Three explicit modes: create a pager from a fresh search, reuse a stored
/// pager, or run a plain one-off search.
pub async fn search_triggers(
    state: &AppState,
    ctx: &OpContext,
    request: SearchRequest,
) -> Result<SearchPage, AppError> {
    let size = request
        .size
        .filter(|s| *s > 0)
        .unwrap_or(state.config.search.default_page_size.max(1));
    let pager_id = request.pager_id.filter(|id| !id.trim().is_empty());

    if request.create_pager {
        let ids = search_ids(state, &request.options).await?;
        let id = pager_id.unwrap_or_else(trigwatch_common::id::next_id);
        let ttl = state.config.search.pager_ttl();
        let pager = Pager::new(&id, request.page.unwrap_or(0), size, ttl, ids);
        state.db.save_pager(ctx, &pager, ttl).await?;
        tracing::info!(pager_id = %id, total = pager.total(), "Search pager created");
        return pager_page(state, ctx, &pager).await;
    }

    if let Some(id) = pager_id {
        let mut pager = state
            .db
            .get_pager(ctx, &id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                entity: "pager",
                id: id.clone(),
            })?;
        match request.page {
            Some(page) => pager.jump_to(page),
            None => pager.advance(),
        }
        state
            .db
            .save_pager(ctx, &pager, state.config.search.pager_ttl())
            .await?;
        return pager_page(state, ctx, &pager).await;
    }

    let ids = search_ids(state, &request.options).await?;
    let page = request.page.unwrap_or(0);
    let start = page.saturating_mul(size).min(ids.len());
    let end = start.saturating_add(size).min(ids.len());
    Ok(SearchPage {
        list: load_triggers(state, ctx, &ids[start..end]).await?,
        page,
        size,
        total: ids.len(),
        pager_id: None,
        pager_expire_at: None,
    })
}

async fn search_ids(state: &AppState, options: &SearchOptions) -> Result<Vec<String>, AppError> {
    Ok(state
        .searcher
        .search(options)
        .await?
        .into_iter()
        .map(|hit| hit.trigger_id)
        .collect())
}

async fn pager_page(state: &AppState, ctx: &OpContext, pager: &Pager) -> Result<SearchPage, AppError> {
    Ok(SearchPage {
        list: load_triggers(state, ctx, pager.page_ids()).await?,
        page: pager.page,
        size: pager.size,
        total: pager.total(),
        pager_id: Some(pager.id.clone()),
        pager_expire_at: Some(pager.expires_at),
    })
}

/// Triggers deleted since they were found are skipped.
async fn load_triggers(
    state: &AppState,
    ctx: &OpContext,
    ids: &[String],
) -> Result<Vec<Trigger>, AppError> {
    let mut list = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(trigger) = state.db.get_trigger(ctx, id).await? {
            list.push(trigger);
        }
    }
    Ok(list)
}

/// Idempotent; returns whether the pager existed.
pub async fn delete_pager(state: &AppState, ctx: &OpContext, id: &str) -> Result<bool, AppError> {
    Ok(state.db.delete_pager(ctx, id).await?)
}
