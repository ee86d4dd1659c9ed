//! 生产订单流水线
//!
//! 订单创建、状态推进、计划补货生成和提前生产订单。

use crate::audit;
use crate::replacement_bank;
use crate::state_machine::{LabStatusMachine, TrayStateMachine};
use chrono::{NaiveDate, Utc};
use lab_core::utils::allocate_request_code;
use lab_core::{
    Actor, Arch, AuditEntity, CasePhase, Document, Jaw, LabError, LabItem, LabPriority, LabStatus, RequestKind,
    Result, TrayState,
};
use lab_storage::StateStore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 新生产订单
#[derive(Debug, Clone)]
pub struct NewLabItem {
    pub case_id: Uuid,
    pub arch: Arch,
    pub tray_number: u32,
    pub planned_upper: u32,
    pub planned_lower: u32,
    pub planned_date: NaiveDate,
    pub due_date: NaiveDate,
    /// 请求的初始状态，最终状态由计划数量决定
    pub status: LabStatus,
    pub priority: LabPriority,
    pub request_kind: RequestKind,
    pub notes: Option<String>,
}

impl NewLabItem {
    pub fn production(case_id: Uuid, arch: Arch, tray_number: u32, planned_upper: u32, planned_lower: u32, date: NaiveDate) -> Self {
        Self {
            case_id,
            arch,
            tray_number,
            planned_upper,
            planned_lower,
            planned_date: date,
            due_date: date,
            status: LabStatus::AguardandoIniciar,
            priority: LabPriority::Normal,
            request_kind: RequestKind::Producao,
            notes: None,
        }
    }
}

/// 提前生产订单的数量
#[derive(Debug, Clone, Default)]
pub struct AdvanceQuantities {
    pub planned_upper: u32,
    pub planned_lower: u32,
    /// 缺省沿用补货订单的到期日
    pub due_date: Option<NaiveDate>,
    pub priority: Option<LabPriority>,
    pub notes: Option<String>,
}

/// 订单来源关联
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ItemLinks {
    pub rework_of: Option<Uuid>,
    pub source_replenishment_id: Option<Uuid>,
}

/// 有计划数量的订单直接进入生产
pub fn promoted_status(requested: LabStatus, planned_upper: u32, planned_lower: u32) -> LabStatus {
    let status = if planned_upper > 0 || planned_lower > 0 {
        LabStatus::EmProducao
    } else {
        LabStatus::AguardandoIniciar
    };
    if status != requested {
        debug!("Lab item status {} promoted to {}", requested, status);
    }
    status
}

/// 校验并插入订单，`producao` 订单分配订单编号
pub(crate) fn insert_lab_item(
    document: &mut Document,
    actor: &Actor,
    new: NewLabItem,
    status: LabStatus,
    links: ItemLinks,
) -> Result<LabItem> {
    let case = document
        .case(new.case_id)
        .ok_or_else(|| LabError::not_found("case", new.case_id))?;
    validate_new_item(case.arch, case.tray_counts(), &new)?;
    let treatment_code = case.treatment_code.clone();

    let request_code = match new.request_kind {
        RequestKind::Producao => Some(allocate_request_code(document, &treatment_code)),
        RequestKind::ReposicaoProgramada => None,
    };

    let now = Utc::now();
    let item = LabItem {
        id: Uuid::new_v4(),
        case_id: new.case_id,
        arch: new.arch,
        tray_number: new.tray_number,
        planned_upper: new.planned_upper,
        planned_lower: new.planned_lower,
        planned_date: new.planned_date,
        due_date: new.due_date,
        status,
        priority: new.priority,
        request_kind: new.request_kind,
        request_code,
        notes: new.notes,
        rework_of: links.rework_of,
        source_replenishment_id: links.source_replenishment_id,
        created_at: now,
        updated_at: now,
    };

    document.lab_items.push(item.clone());
    sync_trays_for_item(document, &item);
    replacement_bank::ensure_entries(document, item.case_id)?;
    audit::record(
        document,
        actor,
        AuditEntity::LabItem,
        item.id,
        "lab_item.created",
        format!(
            "Pedido {} criado para o caso {} (placa {}, {})",
            item.request_code.as_deref().unwrap_or(item.request_kind.as_str()),
            treatment_code,
            item.tray_number,
            item.status
        ),
    );
    Ok(item)
}

fn validate_new_item(case_arch: Arch, counts: lab_core::TrayCounts, new: &NewLabItem) -> Result<()> {
    if new.tray_number == 0 {
        return Err(LabError::validation("tray number starts at 1"));
    }
    if new.due_date < new.planned_date {
        return Err(LabError::validation("due date is before planned date"));
    }
    if !case_arch.contains(new.arch) {
        return Err(LabError::validation(format!(
            "lab item arch {} is outside case arch {}",
            new.arch, case_arch
        )));
    }
    for jaw in Jaw::ALL {
        let planned = match jaw {
            Jaw::Superior => new.planned_upper,
            Jaw::Inferior => new.planned_lower,
        };
        if planned == 0 {
            continue;
        }
        if !new.arch.includes(jaw) {
            return Err(LabError::validation(format!("{} quantity given for arch {}", jaw, new.arch)));
        }
        // 从 tray_number 起该颌还剩的合同牙套数
        let remaining = counts.for_jaw(jaw).saturating_add(1).saturating_sub(new.tray_number);
        if planned > remaining {
            return Err(LabError::validation(format!(
                "{} {} trays from tray {} exceed the {} contracted",
                planned,
                jaw,
                new.tray_number,
                counts.for_jaw(jaw)
            )));
        }
    }
    if new.tray_number > counts.sequence_len() {
        return Err(LabError::validation(format!("tray {} is not part of the case", new.tray_number)));
    }
    Ok(())
}

/// 按订单状态推进覆盖的牙套，返工订单不影响牙套
pub(crate) fn sync_trays_for_item(document: &mut Document, item: &LabItem) {
    if item.is_rework() {
        return;
    }
    let target = match item.status {
        LabStatus::AguardandoIniciar => return,
        LabStatus::EmProducao | LabStatus::ControleQualidade => TrayState::EmProducao,
        LabStatus::Prontas => TrayState::Pronta,
    };
    let Some(case) = document.case_mut(item.case_id) else {
        return;
    };

    let machine = TrayStateMachine;
    let now = Utc::now();
    let mut raised = 0;
    for tray_number in item.covered_trays() {
        if !Jaw::ALL.iter().any(|jaw| item.covers(*jaw, tray_number)) {
            continue;
        }
        if let Some(tray) = case.tray_mut(tray_number) {
            if machine.raise(tray, target, now) {
                raised += 1;
            }
        }
    }
    if raised > 0 {
        case.updated_at = now;
        debug!("Raised {} trays of case {} to {}", raised, case.treatment_code, target);
    }
}

/// 生产订单流水线
#[derive(Debug, Clone)]
pub struct LabOrderPipeline {
    store: StateStore,
    actor: Actor,
    status_machine: LabStatusMachine,
    replenishment_lead_days: u32,
}

impl LabOrderPipeline {
    pub fn new(store: StateStore, actor: Actor, replenishment_lead_days: u32) -> Self {
        Self {
            store,
            actor,
            status_machine: LabStatusMachine::new(),
            replenishment_lead_days,
        }
    }

    /// 创建订单；任一计划数量为正时强制为 `em_producao`
    pub async fn add_lab_item(&self, payload: NewLabItem) -> Result<LabItem> {
        let actor = self.actor.clone();
        let status = promoted_status(payload.status, payload.planned_upper, payload.planned_lower);
        let item = self
            .store
            .mutate(move |doc| insert_lab_item(doc, &actor, payload, status, ItemLinks::default()))
            .await?;

        info!("Added lab item {} for case {} ({})", item.id, item.case_id, item.status);
        Ok(item)
    }

    /// 推进订单状态；进入质检不会生成返工订单
    pub async fn move_lab_item(&self, item_id: Uuid, target: LabStatus) -> Result<LabItem> {
        let actor = self.actor.clone();
        let machine = self.status_machine.clone();
        let result = self
            .store
            .mutate(move |doc| {
                let item = doc
                    .lab_item_mut(item_id)
                    .ok_or_else(|| LabError::not_found("lab item", item_id))?;
                let from = item.status;
                if !machine.validate(from, target)? {
                    return Ok(item.clone());
                }
                item.status = target;
                item.updated_at = Utc::now();
                let moved = item.clone();

                sync_trays_for_item(doc, &moved);
                replacement_bank::ensure_entries(doc, moved.case_id)?;
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::LabItem,
                    item_id,
                    "lab_item.moved",
                    format!(
                        "Pedido {}: {} -> {}",
                        moved.request_code.as_deref().unwrap_or(moved.request_kind.as_str()),
                        from,
                        target
                    ),
                );
                Ok(moved)
            })
            .await;

        match &result {
            Ok(item) => info!("Lab item {} now {}", item.id, item.status),
            Err(e) => warn!("Lab item {} move to {} rejected: {}", item_id, target, e),
        }
        result
    }

    /// 删除订单；已被交付批次引用的订单不能删除
    pub async fn remove_lab_item(&self, item_id: Uuid) -> Result<LabItem> {
        let actor = self.actor.clone();
        let removed = self
            .store
            .mutate(move |doc| {
                let index = doc
                    .lab_items
                    .iter()
                    .position(|i| i.id == item_id)
                    .ok_or_else(|| LabError::not_found("lab item", item_id))?;
                let referenced = doc
                    .cases
                    .iter()
                    .flat_map(|c| c.delivery_lots.iter())
                    .any(|lot| lot.lab_item_id == item_id);
                if referenced {
                    return Err(LabError::Precondition(format!(
                        "订单 {} 已被交付批次引用",
                        item_id
                    )));
                }
                let item = doc.lab_items.remove(index);
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::LabItem,
                    item_id,
                    "lab_item.removed",
                    format!(
                        "Pedido {} removido",
                        item.request_code.as_deref().unwrap_or(item.request_kind.as_str())
                    ),
                );
                Ok(item)
            })
            .await?;

        info!("Removed lab item {}", item_id);
        Ok(removed)
    }

    pub async fn get_lab_item(&self, item_id: Uuid) -> Result<Option<LabItem>> {
        self.store.read(move |doc| doc.lab_item(item_id).cloned()).await
    }

    pub async fn lab_items_for_case(&self, case_id: Uuid) -> Result<Vec<LabItem>> {
        self.store
            .read(move |doc| doc.lab_items_for_case(case_id).cloned().collect())
            .await
    }

    /// 某状态的订单，按到期日排序
    pub async fn list_by_status(&self, status: LabStatus) -> Result<Vec<LabItem>> {
        let mut items: Vec<LabItem> = self
            .store
            .read(move |doc| doc.lab_items.iter().filter(|i| i.status == status).cloned().collect())
            .await?;
        items.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(b.priority.cmp(&a.priority)));
        Ok(items)
    }

    /// 为到期的待生产牙套生成计划补货订单，重复调用不会重复生成
    pub async fn generate_programmed_replenishments(&self, today: NaiveDate) -> Result<Vec<LabItem>> {
        let actor = self.actor.clone();
        let horizon = today + chrono::Duration::days(i64::from(self.replenishment_lead_days));
        let created = self
            .store
            .mutate(move |doc| {
                let mut planned = Vec::new();
                for case in doc.cases.iter().filter(|c| c.phase != CasePhase::Finalizado) {
                    let counts = case.tray_counts();
                    for tray in &case.trays {
                        if tray.state != TrayState::Pendente || tray.due_date > horizon {
                            continue;
                        }
                        let earlier_delivered = case
                            .trays
                            .iter()
                            .any(|t| t.tray_number < tray.tray_number && t.state == TrayState::Entregue);
                        if !earlier_delivered {
                            continue;
                        }
                        let covered = doc.lab_items_for_case(case.id).any(|item| {
                            !item.is_rework() && Jaw::ALL.iter().any(|jaw| item.covers(*jaw, tray.tray_number))
                        });
                        if covered {
                            continue;
                        }

                        let upper = u32::from(tray.tray_number <= counts.upper);
                        let lower = u32::from(tray.tray_number <= counts.lower);
                        let arch = match (upper, lower) {
                            (1, 1) => Arch::Ambos,
                            (1, _) => Arch::Superior,
                            _ => Arch::Inferior,
                        };
                        planned.push(NewLabItem {
                            case_id: case.id,
                            arch,
                            tray_number: tray.tray_number,
                            planned_upper: upper,
                            planned_lower: lower,
                            planned_date: today.min(tray.due_date),
                            due_date: tray.due_date,
                            status: LabStatus::AguardandoIniciar,
                            priority: if tray.due_date < today {
                                LabPriority::Alta
                            } else {
                                LabPriority::Normal
                            },
                            request_kind: RequestKind::ReposicaoProgramada,
                            notes: Some(format!("Reposição programada da placa {}", tray.tray_number)),
                        });
                    }
                }

                let mut created = Vec::with_capacity(planned.len());
                for new in planned {
                    created.push(insert_lab_item(
                        doc,
                        &actor,
                        new,
                        LabStatus::AguardandoIniciar,
                        ItemLinks::default(),
                    )?);
                }
                Ok(created)
            })
            .await?;

        if !created.is_empty() {
            info!("Generated {} programmed replenishment items for {}", created.len(), today);
        }
        Ok(created)
    }

    /// 把计划补货订单转换为手动生产订单，补货订单被消耗
    pub async fn create_advance_lab_order(&self, source_id: Uuid, quantities: AdvanceQuantities) -> Result<LabItem> {
        let actor = self.actor.clone();
        let result = self
            .store
            .mutate(move |doc| {
                let source = doc
                    .lab_item(source_id)
                    .cloned()
                    .ok_or_else(|| LabError::not_found("lab item", source_id))?;
                if source.request_kind != RequestKind::ReposicaoProgramada {
                    return Err(LabError::Precondition(format!(
                        "订单 {} 不是计划补货订单",
                        source_id
                    )));
                }
                if quantities.planned_upper == 0 && quantities.planned_lower == 0 {
                    return Err(LabError::validation("advance order needs at least one tray"));
                }

                let today = Utc::now().date_naive();
                let due_date = quantities.due_date.unwrap_or(source.due_date);
                let new = NewLabItem {
                    case_id: source.case_id,
                    arch: source.arch,
                    tray_number: source.tray_number,
                    planned_upper: quantities.planned_upper,
                    planned_lower: quantities.planned_lower,
                    planned_date: today.min(due_date),
                    due_date,
                    status: LabStatus::AguardandoIniciar,
                    priority: quantities.priority.unwrap_or(source.priority),
                    request_kind: RequestKind::Producao,
                    notes: quantities.notes.or(source.notes.clone()),
                };
                let links = ItemLinks {
                    rework_of: None,
                    source_replenishment_id: Some(source.id),
                };
                doc.lab_items.retain(|i| i.id != source_id);
                let item = insert_lab_item(doc, &actor, new, LabStatus::AguardandoIniciar, links)?;
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::LabItem,
                    source_id,
                    "lab_item.advanced",
                    format!(
                        "Reposição programada da placa {} convertida no pedido {}",
                        source.tray_number,
                        item.request_code.as_deref().unwrap_or("-")
                    ),
                );
                Ok(item)
            })
            .await;

        match &result {
            Ok(item) => info!("Advance order {:?} created from replenishment {}", item.request_code, source_id),
            Err(e) => warn!("Advance order from {} rejected: {}", source_id, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case_lifecycle::GenerateLabOrder;
    use crate::test_support::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_auto_promotion() {
        let fx = fixture(false).await;
        let case = fx.case_in_production(Arch::Ambos, 20, 7).await;
        let pipeline = fx.engine.lab_orders();

        let idle = pipeline
            .add_lab_item(NewLabItem::production(case.id, Arch::Ambos, 5, 0, 0, scan_date()))
            .await
            .unwrap();
        assert_eq!(idle.status, LabStatus::AguardandoIniciar);

        for requested in LabStatus::all() {
            let mut payload = NewLabItem::production(case.id, Arch::Superior, 6, 1, 0, scan_date());
            payload.status = requested;
            let item = pipeline.add_lab_item(payload).await.unwrap();
            assert_eq!(item.status, LabStatus::EmProducao);
        }

        let mut payload = NewLabItem::production(case.id, Arch::Ambos, 7, 0, 0, scan_date());
        payload.status = LabStatus::Prontas;
        assert_eq!(pipeline.add_lab_item(payload).await.unwrap().status, LabStatus::AguardandoIniciar);
    }

    #[tokio::test]
    async fn test_request_codes_are_sequential_per_case() {
        let fx = fixture(false).await;
        let case = fx.case_in_production(Arch::Ambos, 20, 7).await;
        let pipeline = fx.engine.lab_orders();

        let first = pipeline
            .add_lab_item(NewLabItem::production(case.id, Arch::Ambos, 4, 1, 1, scan_date()))
            .await
            .unwrap();
        let second = pipeline
            .add_lab_item(NewLabItem::production(case.id, Arch::Ambos, 5, 1, 1, scan_date()))
            .await
            .unwrap();

        // fixture 已通过 generate_lab_order 创建了 /1
        assert_eq!(first.request_code, Some(format!("{}/2", case.treatment_code)));
        assert_eq!(second.request_code, Some(format!("{}/3", case.treatment_code)));

        pipeline.remove_lab_item(second.id).await.unwrap();
        let third = pipeline
            .add_lab_item(NewLabItem::production(case.id, Arch::Ambos, 5, 1, 1, scan_date()))
            .await
            .unwrap();
        assert_eq!(third.request_code, Some(format!("{}/4", case.treatment_code)));
    }

    #[tokio::test]
    async fn test_add_lab_item_validation() {
        let fx = fixture(false).await;
        let case = fx.case_in_production(Arch::Superior, 10, 7).await;
        let pipeline = fx.engine.lab_orders();

        let cases = [
            NewLabItem::production(case.id, Arch::Superior, 0, 1, 0, scan_date()),
            NewLabItem::production(case.id, Arch::Inferior, 2, 0, 1, scan_date()),
            NewLabItem::production(case.id, Arch::Superior, 9, 3, 0, scan_date()),
            NewLabItem::production(case.id, Arch::Superior, 2, 0, 1, scan_date()),
        ];
        for payload in cases {
            assert!(matches!(pipeline.add_lab_item(payload).await, Err(LabError::Validation(_))));
        }

        let missing = NewLabItem::production(Uuid::new_v4(), Arch::Superior, 1, 1, 0, scan_date());
        assert!(matches!(pipeline.add_lab_item(missing).await, Err(LabError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_add_lab_item_huge_quantity_rejected() {
        let fx = fixture(false).await;
        let case = fx.case_in_production(Arch::Superior, 10, 7).await;
        let pipeline = fx.engine.lab_orders();
        let before = fx.engine.store().snapshot().await.unwrap();

        for tray_number in [1, 2, 10] {
            let payload = NewLabItem::production(case.id, Arch::Superior, tray_number, u32::MAX, 0, scan_date());
            assert!(matches!(pipeline.add_lab_item(payload).await, Err(LabError::Validation(_))));
        }
        assert_eq!(fx.engine.store().snapshot().await.unwrap(), before);

        // 恰好用到最后一个合同牙套
        let last = pipeline
            .add_lab_item(NewLabItem::production(case.id, Arch::Superior, 9, 2, 0, scan_date()))
            .await
            .unwrap();
        assert_eq!(last.covered_trays(), 9..=10);
    }

    #[tokio::test]
    async fn test_move_into_quality_control_creates_nothing() {
        let fx = fixture(false).await;
        let case = fx.case_in_production(Arch::Ambos, 20, 7).await;
        let pipeline = fx.engine.lab_orders();
        let item = pipeline.lab_items_for_case(case.id).await.unwrap().remove(0);
        let before = pipeline.lab_items_for_case(case.id).await.unwrap().len();

        pipeline.move_lab_item(item.id, LabStatus::ControleQualidade).await.unwrap();
        pipeline.move_lab_item(item.id, LabStatus::EmProducao).await.unwrap();
        pipeline.move_lab_item(item.id, LabStatus::ControleQualidade).await.unwrap();

        let items = pipeline.lab_items_for_case(case.id).await.unwrap();
        assert_eq!(items.len(), before);
        assert!(items
            .iter()
            .all(|i| !i.notes.as_deref().unwrap_or_default().to_lowercase().contains("reconfec")));
        assert!(items.iter().all(|i| i.rework_of.is_none()));
    }

    #[tokio::test]
    async fn test_move_syncs_trays() {
        let fx = fixture(false).await;
        let case = fx.case_in_production(Arch::Ambos, 20, 7).await;
        let pipeline = fx.engine.lab_orders();
        let item = pipeline.lab_items_for_case(case.id).await.unwrap().remove(0);

        pipeline.move_lab_item(item.id, LabStatus::ControleQualidade).await.unwrap();
        pipeline.move_lab_item(item.id, LabStatus::Prontas).await.unwrap();

        let stored = fx.engine.cases().get_case(case.id).await.unwrap().unwrap();
        for n in item.covered_trays() {
            assert_eq!(stored.tray(n).unwrap().state, TrayState::Pronta);
        }
        assert_eq!(stored.tray(item.covered_trays().end() + 1).unwrap().state, TrayState::Pendente);
    }

    #[tokio::test]
    async fn test_move_rejects_invalid_transition() {
        let fx = fixture(false).await;
        let case = fx.case_in_production(Arch::Ambos, 20, 7).await;
        let pipeline = fx.engine.lab_orders();
        let idle = pipeline
            .add_lab_item(NewLabItem::production(case.id, Arch::Ambos, 8, 0, 0, scan_date()))
            .await
            .unwrap();

        let err = pipeline.move_lab_item(idle.id, LabStatus::Prontas).await.unwrap_err();
        assert!(matches!(err, LabError::InvalidStateTransition { .. }));
        assert!(matches!(
            pipeline.move_lab_item(Uuid::new_v4(), LabStatus::Prontas).await,
            Err(LabError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_referenced_item_rejected() {
        let fx = fixture(false).await;
        let case = fx.case_with_delivered_first_tray(Arch::Ambos, 20, 7).await;
        let pipeline = fx.engine.lab_orders();
        let item = pipeline.lab_items_for_case(case.id).await.unwrap().remove(0);

        let err = pipeline.remove_lab_item(item.id).await.unwrap_err();
        assert!(matches!(err, LabError::Precondition(_)));
    }

    #[tokio::test]
    async fn test_replenishment_requires_earlier_delivery() {
        let fx = fixture(false).await;
        let case = fx.case_in_production(Arch::Ambos, 20, 7).await;

        let far_future = scan_date() + Duration::days(365);
        let created = fx.engine.lab_orders().generate_programmed_replenishments(far_future).await.unwrap();
        assert!(created.iter().all(|i| i.case_id != case.id));
    }

    #[tokio::test]
    async fn test_replenishment_generation_is_idempotent() {
        let fx = fixture(false).await;
        let case = fx.case_with_delivered_first_tray(Arch::Ambos, 20, 7).await;
        let pipeline = fx.engine.lab_orders();
        let day_after_tray_3 = case.tray(3).unwrap().due_date + Duration::days(1);

        let created = pipeline.generate_programmed_replenishments(day_after_tray_3).await.unwrap();
        let numbers: Vec<u32> = created.iter().map(|i| i.tray_number).collect();
        assert_eq!(numbers, vec![2, 3]);
        let first = &created[0];
        assert_eq!(first.request_kind, RequestKind::ReposicaoProgramada);
        assert_eq!(first.status, LabStatus::AguardandoIniciar);
        assert_eq!(first.request_code, None);
        assert_eq!(first.priority, LabPriority::Alta);
        assert_eq!((first.planned_upper, first.planned_lower), (1, 1));

        assert!(pipeline.generate_programmed_replenishments(day_after_tray_3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replenishment_respects_lead_days() {
        let fx = fixture(false).await;
        let case = fx.case_with_delivered_first_tray(Arch::Ambos, 20, 7).await;
        let pipeline = LabOrderPipeline::new(fx.engine.store().clone(), Actor::system(), 7);

        let before_tray_2 = case.tray(2).unwrap().due_date - Duration::days(3);
        let created = pipeline.generate_programmed_replenishments(before_tray_2).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].tray_number, 2);
        assert_eq!(created[0].priority, LabPriority::Normal);
    }

    #[tokio::test]
    async fn test_replenishment_arch_follows_split_counts() {
        let fx = fixture(false).await;
        let case = fx.case_with_counts(Arch::Ambos, Some(3), Some(5)).await;
        let case = fx.deliver_first_tray(case).await;
        let pipeline = fx.engine.lab_orders();

        let late = case.tray(5).unwrap().due_date + Duration::days(1);
        let created = pipeline.generate_programmed_replenishments(late).await.unwrap();
        let tray_4 = created.iter().find(|i| i.tray_number == 4).unwrap();
        assert_eq!(tray_4.arch, Arch::Inferior);
        assert_eq!((tray_4.planned_upper, tray_4.planned_lower), (0, 1));
    }

    #[tokio::test]
    async fn test_advance_order_consumes_replenishment() {
        let fx = fixture(false).await;
        let case = fx.case_with_delivered_first_tray(Arch::Ambos, 20, 7).await;
        let pipeline = fx.engine.lab_orders();
        let late = case.tray(2).unwrap().due_date + Duration::days(1);
        let source = pipeline.generate_programmed_replenishments(late).await.unwrap().remove(0);

        let item = pipeline
            .create_advance_lab_order(
                source.id,
                AdvanceQuantities {
                    planned_upper: 2,
                    planned_lower: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(item.request_kind, RequestKind::Producao);
        assert_eq!(item.status, LabStatus::AguardandoIniciar);
        assert_eq!(item.source_replenishment_id, Some(source.id));
        assert_eq!(item.due_date, source.due_date);
        assert_eq!(item.request_code, Some(format!("{}/2", case.treatment_code)));
        assert!(pipeline.get_lab_item(source.id).await.unwrap().is_none());

        let audit = fx.engine.audit().entries_for(source.id).await.unwrap();
        assert!(audit.iter().any(|e| e.action == "lab_item.advanced"));
    }

    #[tokio::test]
    async fn test_advance_order_rejections() {
        let fx = fixture(false).await;
        let case = fx.case_with_delivered_first_tray(Arch::Ambos, 20, 7).await;
        let pipeline = fx.engine.lab_orders();
        let production = pipeline.lab_items_for_case(case.id).await.unwrap().remove(0);

        let err = pipeline
            .create_advance_lab_order(production.id, AdvanceQuantities { planned_upper: 1, ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::Precondition(_)));

        let late = case.tray(2).unwrap().due_date + Duration::days(1);
        let source = pipeline.generate_programmed_replenishments(late).await.unwrap().remove(0);
        let err = pipeline
            .create_advance_lab_order(source.id, AdvanceQuantities::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::Validation(_)));
        assert!(pipeline.get_lab_item(source.id).await.unwrap().is_some());

        assert!(matches!(
            pipeline.create_advance_lab_order(Uuid::new_v4(), AdvanceQuantities::default()).await,
            Err(LabError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let fx = fixture(false).await;
        let case = fx.case_in_contract(Arch::Ambos, 20, 7).await;
        fx.engine
            .cases()
            .generate_lab_order(case.id, GenerateLabOrder::trays(1, 2, 2, scan_date()))
            .await
            .unwrap();

        let active = fx.engine.lab_orders().list_by_status(LabStatus::EmProducao).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(fx.engine.lab_orders().list_by_status(LabStatus::Prontas).await.unwrap().is_empty());
    }
}
