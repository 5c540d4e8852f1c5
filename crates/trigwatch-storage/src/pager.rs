use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use trigwatch_common::context::OpContext;
use crate::database::Database;
use crate::error::Result;

fn pager_key(id: &str) -> String {
    format!("trigger-search-pager:{id}")
}

/// Server-side cursor over a search result.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trigwatch_storage::Pager;
///
/// let ids: Vec<String> = (1..=5).map(|i| format!("t{i}")).collect();
/// let mut pager = Pager::new("p1", 0, 2, Duration::from_secs(60), ids);
/// assert_eq!(pager.page_ids(), ["t1", "t2"]);
/// pager.advance();
/// assert_eq!(pager.page_ids(), ["t3", "t4"]);
/// assert_eq!(pager.page_count(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pager {
    pub id: String,
    pub page: usize,
    pub size: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub trigger_ids: Vec<String>,
}

impl Pager {
    pub fn new(id: &str, page: usize, size: usize, ttl: Duration, trigger_ids: Vec<String>) -> Self {
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        Self {
            id: id.to_string(),
            page,
            size: size.max(1),
            created_at,
            expires_at,
            trigger_ids,
        }
    }

    pub fn total(&self) -> usize {
        self.trigger_ids.len()
    }

    pub fn page_count(&self) -> usize {
        self.total().div_ceil(self.size.max(1))
    }

    /// Ids on the current page; empty past the end.
    pub fn page_ids(&self) -> &[String] {
        let size = self.size.max(1);
        let start = self.page.saturating_mul(size).min(self.total());
        let end = start.saturating_add(size).min(self.total());
        &self.trigger_ids[start..end]
    }

    pub fn advance(&mut self) {
        self.page = self.page.saturating_add(1);
    }

    pub fn jump_to(&mut self, page: usize) {
        self.page = page;
    }

    pub fn has_next(&self) -> bool {
        self.page + 1 < self.page_count()
    }
}

impl Database {
    /// Persist `pager` with a fresh TTL.
    pub async fn save_pager(&self, ctx: &OpContext, pager: &Pager, ttl: Duration) -> Result<()> {
        let body = serde_json::to_string(pager)?;
        self.run(ctx, "set", self.store().set(&pager_key(&pager.id), &body, Some(ttl)))
            .await?;
        tracing::debug!(pager_id = %pager.id, page = pager.page, "Pager saved");
        Ok(())
    }

    pub async fn get_pager(&self, ctx: &OpContext, id: &str) -> Result<Option<Pager>> {
        let raw = self.run(ctx, "get", self.store().get(&pager_key(id))).await?;
        match raw {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Idempotent. Returns whether the pager existed.
    pub async fn delete_pager(&self, ctx: &OpContext, id: &str) -> Result<bool> {
        let existed = self
            .run(ctx, "delete", self.store().delete(&pager_key(id)))
            .await?;
        tracing::debug!(pager_id = %id, existed, "Pager deleted");
        Ok(existed)
    }
}
