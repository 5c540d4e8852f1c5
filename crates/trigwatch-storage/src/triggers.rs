use trigwatch_common::types::Trigger;

use trigwatch_common::context::OpContext;
use crate::database::Database;
use crate::error::{Result, StorageError};

const TRIGGER_PREFIX: &str = "trigger:";

fn trigger_key(id: &str) -> String {
    format!("{TRIGGER_PREFIX}{id}")
}

fn fingerprint_key(fingerprint: &str) -> String {
    format!("trigger-fingerprint:{fingerprint}")
}

impl Database {
    /// Insert or replace a trigger and point its fingerprint at it. A stale
    /// fingerprint mapping left by a previous version is removed.
    pub async fn save_trigger(&self, ctx: &OpContext, trigger: &Trigger) -> Result<()> {
        let store = self.store();
        let previous = self.get_trigger(ctx, &trigger.id).await?;
        let fingerprint = trigger.fingerprint();
        let body = serde_json::to_string(trigger)?;

        self.run(ctx, "set", store.set(&trigger_key(&trigger.id), &body, None))
            .await?;
        self.run(
            ctx,
            "set",
            store.set(&fingerprint_key(&fingerprint), &trigger.id, None),
        )
        .await?;
        if let Some(old) = previous.map(|p| p.fingerprint()) {
            if old != fingerprint {
                self.run(
                    ctx,
                    "compare_and_delete",
                    store.compare_and_delete(&fingerprint_key(&old), &trigger.id),
                )
                .await?;
            }
        }
        tracing::info!(trigger_id = %trigger.id, "Trigger saved");
        Ok(())
    }

    pub async fn get_trigger(&self, ctx: &OpContext, id: &str) -> Result<Option<Trigger>> {
        let raw = self
            .run(ctx, "get", self.store().get(&trigger_key(id)))
            .await?;
        raw.map(|body| serde_json::from_str(&body).map_err(StorageError::from))
            .transpose()
    }

    /// Every stored trigger, ordered by name then id.
    pub async fn list_triggers(&self, ctx: &OpContext) -> Result<Vec<Trigger>> {
        let keys = self
            .run(ctx, "scan", self.store().scan_prefix(TRIGGER_PREFIX))
            .await?;
        let mut triggers = Vec::with_capacity(keys.len());
        for key in keys {
            let id = &key[TRIGGER_PREFIX.len()..];
            // Deleted between scan and read.
            if let Some(trigger) = self.get_trigger(ctx, id).await? {
                triggers.push(trigger);
            }
        }
        triggers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(triggers)
    }

    /// Returns whether the trigger existed.
    pub async fn delete_trigger(&self, ctx: &OpContext, id: &str) -> Result<bool> {
        let Some(trigger) = self.get_trigger(ctx, id).await? else {
            return Ok(false);
        };
        let store = self.store();
        let existed = self
            .run(ctx, "delete", store.delete(&trigger_key(id)))
            .await?;
        self.run(
            ctx,
            "compare_and_delete",
            store.compare_and_delete(&fingerprint_key(&trigger.fingerprint()), id),
        )
        .await?;
        tracing::info!(trigger_id = %id, "Trigger deleted");
        Ok(existed)
    }

    pub async fn trigger_id_by_fingerprint(
        &self,
        ctx: &OpContext,
        fingerprint: &str,
    ) -> Result<Option<String>> {
        self.run(ctx, "get", self.store().get(&fingerprint_key(fingerprint)))
            .await
    }
}
