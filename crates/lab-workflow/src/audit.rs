//! 审计日志
//!
//! 只追加，不修改也不删除。

use chrono::Utc;
use lab_core::{Actor, AuditEntity, AuditEntry, Document, Result};
use lab_storage::StateStore;
use uuid::Uuid;

/// 向文档追加一条审计记录
pub(crate) fn record(
    document: &mut Document,
    actor: &Actor,
    entity_type: AuditEntity,
    entity_id: Uuid,
    action: &str,
    message: impl Into<String>,
) {
    let message = message.into();
    tracing::debug!("audit {} {}: {}", action, entity_id, message);
    document.audit_log.push(AuditEntry {
        id: Uuid::new_v4(),
        entity_type,
        entity_id,
        action: action.to_string(),
        message,
        actor: Some(actor.name.clone()),
        at: Utc::now(),
    });
}

/// 审计日志查询
#[derive(Debug, Clone)]
pub struct AuditLog {
    store: StateStore,
}

impl AuditLog {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// 某实体的全部记录，按时间先后
    pub async fn entries_for(&self, entity_id: Uuid) -> Result<Vec<AuditEntry>> {
        self.store
            .read(|doc| {
                doc.audit_log
                    .iter()
                    .filter(|e| e.entity_id == entity_id)
                    .cloned()
                    .collect()
            })
            .await
    }

    /// 最近的记录，最新的在前
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        self.store
            .read(|doc| doc.audit_log.iter().rev().take(limit).cloned().collect())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_for_and_recent() {
        let store = StateStore::in_memory();
        let target = Uuid::new_v4();
        let actor = Actor::system();
        store
            .mutate(|doc| {
                record(doc, &actor, AuditEntity::Case, target, "case.a", "first");
                record(doc, &actor, AuditEntity::Scan, Uuid::new_v4(), "scan.b", "other");
                record(doc, &actor, AuditEntity::Case, target, "case.c", "second");
                Ok(())
            })
            .await
            .unwrap();

        let log = AuditLog::new(store);
        let entries = log.entries_for(target).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].actor.as_deref(), Some("system"));

        let recent = log.recent(1).await.unwrap();
        assert_eq!(recent[0].action, "case.c");
    }
}
