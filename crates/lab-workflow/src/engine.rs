//! 工作流引擎
//!
//! 在同一个状态存储上组装所有工作流组件，提供统一入口

use crate::{
    audit::AuditLog,
    case_lifecycle::CaseLifecycle,
    lab_orders::LabOrderPipeline,
    registry::Registry,
    replacement_bank::ReplacementBank,
    scan_intake::ScanIntake,
};
use chrono::NaiveDate;
use lab_core::{Actor, CasePhase, LabStatus, RequestKind, Result, ScanStatus, TrayState};
use lab_storage::{AttachmentUploader, StateStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 工作流参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    /// 未指定时的牙套更换间隔（天）
    pub default_change_every_days: u32,
    /// 提前生成计划补货的天数
    pub replenishment_lead_days: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            default_change_every_days: 15,
            replenishment_lead_days: 0,
        }
    }
}

/// 工作流引擎
#[derive(Debug, Clone)]
pub struct LabWorkflowEngine {
    store: StateStore,
    settings: WorkflowSettings,
    registry: Registry,
    scan_intake: ScanIntake,
    cases: CaseLifecycle,
    lab_orders: LabOrderPipeline,
    replacement_bank: ReplacementBank,
    audit: AuditLog,
}

impl LabWorkflowEngine {
    /// 以系统身份创建引擎，不配置附件上传
    pub fn new(store: StateStore, settings: WorkflowSettings) -> Self {
        Self::with_options(store, settings, Actor::system(), None)
    }

    pub fn with_options(
        store: StateStore,
        settings: WorkflowSettings,
        actor: Actor,
        uploader: Option<Arc<dyn AttachmentUploader>>,
    ) -> Self {
        tracing::debug!("Building workflow engine for actor {}", actor.name);
        Self {
            registry: Registry::new(store.clone(), actor.clone()),
            scan_intake: ScanIntake::new(
                store.clone(),
                actor.clone(),
                uploader,
                settings.default_change_every_days,
            ),
            cases: CaseLifecycle::new(store.clone(), actor.clone()),
            lab_orders: LabOrderPipeline::new(store.clone(), actor.clone(), settings.replenishment_lead_days),
            replacement_bank: ReplacementBank::new(store.clone(), actor),
            audit: AuditLog::new(store.clone()),
            store,
            settings,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn scan_intake(&self) -> &ScanIntake {
        &self.scan_intake
    }

    pub fn cases(&self) -> &CaseLifecycle {
        &self.cases
    }

    pub fn lab_orders(&self) -> &LabOrderPipeline {
        &self.lab_orders
    }

    pub fn replacement_bank(&self) -> &ReplacementBank {
        &self.replacement_bank
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// 获取系统概览
    pub async fn system_overview(&self, today: NaiveDate) -> Result<WorkflowSystemOverview> {
        self.store
            .read(move |doc| {
                let mut cases_by_phase: BTreeMap<String, usize> =
                    CasePhase::all().iter().map(|p| (p.as_str().to_string(), 0)).collect();
                for case in &doc.cases {
                    *cases_by_phase.entry(case.phase.as_str().to_string()).or_default() += 1;
                }

                let mut lab_items_by_status: BTreeMap<String, usize> =
                    LabStatus::all().iter().map(|s| (s.as_str().to_string(), 0)).collect();
                for item in &doc.lab_items {
                    *lab_items_by_status.entry(item.status.as_str().to_string()).or_default() += 1;
                }

                let pending_replenishments = doc
                    .lab_items
                    .iter()
                    .filter(|i| {
                        i.request_kind == RequestKind::ReposicaoProgramada
                            && i.status == LabStatus::AguardandoIniciar
                    })
                    .count();
                let overdue_trays = doc
                    .cases
                    .iter()
                    .filter(|c| c.phase != CasePhase::Finalizado)
                    .flat_map(|c| c.trays.iter())
                    .filter(|t| t.state == TrayState::Pendente && t.due_date < today)
                    .count();
                let scans_awaiting_review = doc
                    .scans
                    .iter()
                    .filter(|s| s.status == ScanStatus::Pendente)
                    .count();

                WorkflowSystemOverview {
                    total_cases: doc.cases.len(),
                    cases_by_phase,
                    lab_items_by_status,
                    pending_replenishments,
                    overdue_trays,
                    scans_awaiting_review,
                }
            })
            .await
    }
}

/// 系统概览
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSystemOverview {
    pub total_cases: usize,
    pub cases_by_phase: BTreeMap<String, usize>,
    pub lab_items_by_status: BTreeMap<String, usize>,
    pub pending_replenishments: usize,
    pub overdue_trays: usize,
    pub scans_awaiting_review: usize,
}

impl Default for LabWorkflowEngine {
    fn default() -> Self {
        Self::new(StateStore::in_memory(), WorkflowSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use chrono::Duration;
    use lab_core::Arch;

    #[tokio::test]
    async fn test_overview_counts() {
        let fx = fixture(false).await;
        fx.case_in_planning(Arch::Ambos, 10, 7).await;
        let case = fx.case_with_delivered_first_tray(Arch::Ambos, 10, 7).await;
        fx.engine.scan_intake().create_scan(fx.new_scan(Arch::Ambos, Vec::new())).await.unwrap();

        let today = case.tray(2).unwrap().due_date + Duration::days(1);
        fx.engine.lab_orders().generate_programmed_replenishments(today).await.unwrap();
        let overview = fx.engine.system_overview(today).await.unwrap();

        assert_eq!(overview.total_cases, 2);
        assert_eq!(overview.cases_by_phase["planejamento"], 1);
        assert_eq!(overview.cases_by_phase["em_producao"], 1);
        assert_eq!(overview.cases_by_phase["finalizado"], 0);
        assert_eq!(overview.lab_items_by_status["em_producao"], 1);
        assert_eq!(overview.pending_replenishments, 1);
        assert_eq!(overview.scans_awaiting_review, 1);
        // 两个病例的第 1、2 号牙套中仍待生产的
        assert_eq!(overview.overdue_trays, 3);
    }

    #[tokio::test]
    async fn test_default_settings() {
        let engine = LabWorkflowEngine::default();
        assert_eq!(engine.settings().default_change_every_days, 15);
        assert_eq!(engine.settings().replenishment_lead_days, 0);
    }
}
