//! 替换牙套库
//!
//! 每个病例按合同牙套数（分颌）维护条目，汇总值全部从当前牙套和生产订单状态推导。

use crate::audit;
use chrono::Utc;
use lab_core::{
    Actor, AuditEntity, Case, Document, Jaw, LabError, LabStatus, ReplacementBankEntry, Result, TrayState,
};
use lab_storage::StateStore;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// 替换库汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementBankSummary {
    pub case_id: Uuid,
    pub treatment_code: String,
    pub contracted_total: u32,
    /// 已投产或已交付的（颌, 牙套）单位数
    pub produced_or_delivered: u32,
    pub delivered: u32,
    pub defective: u32,
    /// 尚未完成的返工数量
    pub rework_pending: u32,
    pub balance: u32,
}

/// 补齐缺失的条目，返回新建数量
pub(crate) fn ensure_entries(document: &mut Document, case_id: Uuid) -> Result<u32> {
    let counts = document
        .case(case_id)
        .ok_or_else(|| LabError::not_found("case", case_id))?
        .tray_counts();

    let now = Utc::now();
    let mut created = 0;
    for jaw in Jaw::ALL {
        for tray_number in 1..=counts.for_jaw(jaw) {
            let exists = document
                .replacement_bank
                .iter()
                .any(|e| e.case_id == case_id && e.jaw == jaw && e.tray_number == tray_number);
            if !exists {
                document.replacement_bank.push(ReplacementBankEntry {
                    id: Uuid::new_v4(),
                    case_id,
                    jaw,
                    tray_number,
                    defective_count: 0,
                    created_at: now,
                });
                created += 1;
            }
        }
    }
    Ok(created)
}

/// 记录一次不良
pub(crate) fn record_defect(document: &mut Document, case_id: Uuid, jaw: Jaw, tray_number: u32) -> Result<u32> {
    ensure_entries(document, case_id)?;
    let entry = document
        .replacement_bank
        .iter_mut()
        .find(|e| e.case_id == case_id && e.jaw == jaw && e.tray_number == tray_number)
        .ok_or_else(|| LabError::not_found("replacement bank entry", format!("{} {}", jaw, tray_number)))?;
    entry.defective_count += 1;
    Ok(entry.defective_count)
}

pub(crate) fn summarize(document: &Document, case_id: Uuid) -> Result<ReplacementBankSummary> {
    let case = document
        .case(case_id)
        .ok_or_else(|| LabError::not_found("case", case_id))?;
    let counts = case.tray_counts();

    let mut produced_or_delivered = 0;
    let mut delivered = 0;
    for jaw in Jaw::ALL {
        for tray_number in 1..=counts.for_jaw(jaw) {
            let (produced, handed_over) = jaw_progress(document, case, jaw, tray_number);
            if produced {
                produced_or_delivered += 1;
            }
            if handed_over {
                delivered += 1;
            }
        }
    }

    let defective = document
        .replacement_bank
        .iter()
        .filter(|e| e.case_id == case_id)
        .map(|e| e.defective_count)
        .sum();
    let rework_pending = document
        .lab_items_for_case(case_id)
        .filter(|item| item.is_rework() && item.status != LabStatus::Prontas)
        .map(|item| item.planned_total().max(1))
        .sum();

    let contracted_total = counts.total();
    Ok(ReplacementBankSummary {
        case_id,
        treatment_code: case.treatment_code.clone(),
        contracted_total,
        produced_or_delivered,
        delivered,
        defective,
        rework_pending,
        balance: contracted_total.saturating_sub(produced_or_delivered) + rework_pending,
    })
}

fn covered_by_active_item(document: &Document, case: &Case, jaw: Jaw, tray_number: u32) -> bool {
    document
        .lab_items_for_case(case.id)
        .any(|item| !item.is_rework() && item.status.is_active() && item.covers(jaw, tray_number))
}

/// 单颌单牙套的（已投产, 已交付）。
///
/// 牙套状态是两颌共用的，只要有生产订单或交付批次按颌覆盖该牙套就以它们为准；
/// 没有按颌记录时（例如手工推进的牙套）才退回共用状态。
fn jaw_progress(document: &Document, case: &Case, jaw: Jaw, tray_number: u32) -> (bool, bool) {
    let has_jaw_records = Jaw::ALL.iter().any(|other| {
        case.is_delivered(*other, tray_number) || covered_by_active_item(document, case, *other, tray_number)
    });
    if has_jaw_records {
        let delivered = case.is_delivered(jaw, tray_number);
        let produced = delivered || covered_by_active_item(document, case, jaw, tray_number);
        return (produced, delivered);
    }

    let state = case.tray(tray_number).map(|t| t.state).unwrap_or(TrayState::Pendente);
    (state >= TrayState::EmProducao, state == TrayState::Entregue)
}

/// 替换牙套库组件
#[derive(Debug, Clone)]
pub struct ReplacementBank {
    store: StateStore,
    actor: Actor,
}

impl ReplacementBank {
    pub fn new(store: StateStore, actor: Actor) -> Self {
        Self { store, actor }
    }

    /// 幂等：只创建缺失的条目
    pub async fn ensure_replacement_bank_for_case(&self, case_id: Uuid) -> Result<u32> {
        let actor = self.actor.clone();
        let created = self
            .store
            .mutate(move |doc| {
                let created = ensure_entries(doc, case_id)?;
                if created > 0 {
                    audit::record(
                        doc,
                        &actor,
                        AuditEntity::ReplacementBank,
                        case_id,
                        "replacement_bank.ensured",
                        format!("{} entradas criadas no banco de reposição", created),
                    );
                }
                Ok(created)
            })
            .await?;

        if created > 0 {
            info!("Created {} replacement bank entries for case {}", created, case_id);
        }
        Ok(created)
    }

    pub async fn get_replacement_bank_summary(&self, case_id: Uuid) -> Result<ReplacementBankSummary> {
        self.store.read(move |doc| summarize(doc, case_id)).await?
    }

    pub async fn entries_for_case(&self, case_id: Uuid) -> Result<Vec<ReplacementBankEntry>> {
        self.store
            .read(move |doc| {
                doc.replacement_bank
                    .iter()
                    .filter(|e| e.case_id == case_id)
                    .cloned()
                    .collect()
            })
            .await
    }
}
