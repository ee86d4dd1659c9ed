//! 病例生命周期
//!
//! 阶段推进、牙套状态、交付批次、患者佩戴登记和返工。
//! 所有检查在写入前完成，失败时文档保持不变。

use crate::audit;
use crate::lab_orders::{insert_lab_item, promoted_status, ItemLinks, NewLabItem};
use crate::replacement_bank;
use crate::state_machine::{CaseEvent, CaseStateMachine, TrayStateMachine, TrayTransition};
use chrono::{NaiveDate, Utc};
use lab_core::{
    Actor, Arch, AuditEntity, Budget, Case, CasePhase, Contract, DeliveryLot, Document, Installation, Jaw,
    LabError, LabItem, LabPriority, LabStatus, RequestKind, Result, Tray, TrayState,
};
use lab_storage::StateStore;
use tracing::{info, warn};
use uuid::Uuid;

/// 生成生产订单请求
#[derive(Debug, Clone)]
pub struct GenerateLabOrder {
    pub tray_number: u32,
    pub planned_upper: u32,
    pub planned_lower: u32,
    pub planned_date: NaiveDate,
    /// 缺省取起始牙套的到期日
    pub due_date: Option<NaiveDate>,
    pub priority: LabPriority,
    pub notes: Option<String>,
}

impl GenerateLabOrder {
    pub fn trays(tray_number: u32, planned_upper: u32, planned_lower: u32, planned_date: NaiveDate) -> Self {
        Self {
            tray_number,
            planned_upper,
            planned_lower,
            planned_date,
            due_date: None,
            priority: LabPriority::Normal,
            notes: None,
        }
    }
}

/// 新交付批次
#[derive(Debug, Clone)]
pub struct NewDeliveryLot {
    pub arch: Arch,
    pub tray_from: u32,
    pub tray_to: u32,
    pub delivered_to_dentist_at: NaiveDate,
    pub notes: Option<String>,
}

impl NewDeliveryLot {
    pub fn new(arch: Arch, tray_from: u32, tray_to: u32, delivered_to_dentist_at: NaiveDate) -> Self {
        Self {
            arch,
            tray_from,
            tray_to,
            delivered_to_dentist_at,
            notes: None,
        }
    }
}

/// 患者佩戴登记
#[derive(Debug, Clone)]
pub struct NewInstallation {
    pub delivered_upper: u32,
    pub delivered_lower: u32,
    pub installed_at: NaiveDate,
    pub notes: Option<String>,
}

impl NewInstallation {
    pub fn new(delivered_upper: u32, delivered_lower: u32, installed_at: NaiveDate) -> Self {
        Self {
            delivered_upper,
            delivered_lower,
            installed_at,
            notes: None,
        }
    }
}

/// 返工请求
#[derive(Debug, Clone)]
pub struct ReworkRequest {
    pub tray_number: u32,
    pub jaw: Jaw,
    /// 生产出不良品的订单
    pub source_lab_item_id: Uuid,
    pub reason: String,
    pub due_date: Option<NaiveDate>,
}

impl ReworkRequest {
    pub fn new(tray_number: u32, jaw: Jaw, source_lab_item_id: Uuid, reason: &str) -> Self {
        Self {
            tray_number,
            jaw,
            source_lab_item_id,
            reason: reason.to_string(),
            due_date: None,
        }
    }
}

/// 病例生命周期组件
#[derive(Debug, Clone)]
pub struct CaseLifecycle {
    store: StateStore,
    actor: Actor,
    phases: CaseStateMachine,
    trays: TrayStateMachine,
}

impl CaseLifecycle {
    pub fn new(store: StateStore, actor: Actor) -> Self {
        Self {
            store,
            actor,
            phases: CaseStateMachine::new(),
            trays: TrayStateMachine,
        }
    }

    pub async fn get_case(&self, case_id: Uuid) -> Result<Option<Case>> {
        self.store.read(move |doc| doc.case(case_id).cloned()).await
    }

    pub async fn find_by_code(&self, treatment_code: &str) -> Result<Option<Case>> {
        let code = treatment_code.trim().to_string();
        self.store.read(move |doc| doc.case_by_code(&code).cloned()).await
    }

    pub async fn list_cases(&self) -> Result<Vec<Case>> {
        self.store.read(|doc| doc.cases.clone()).await
    }

    pub async fn start_budget(&self, case_id: Uuid) -> Result<Case> {
        self.fire(case_id, CaseEvent::StartBudget, |_, _| Ok(())).await
    }

    /// 关闭报价，进入待签合同
    pub async fn close_budget(&self, case_id: Uuid, amount: f64) -> Result<Case> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(LabError::validation(format!("invalid budget amount: {}", amount)));
        }
        self.fire(case_id, CaseEvent::CloseBudget, move |case, _| {
            case.budget = Some(Budget {
                amount,
                closed_at: Utc::now(),
            });
            Ok(())
        })
        .await
    }

    /// 批准合同；未指定批准人时记录当前操作者
    pub async fn approve_contract(&self, case_id: Uuid, approved_by: Option<String>) -> Result<Case> {
        self.fire(case_id, CaseEvent::ApproveContract, move |case, actor| {
            case.contract = Some(Contract {
                approved_at: Utc::now(),
                approved_by: approved_by.or_else(|| Some(actor.name.clone())),
            });
            Ok(())
        })
        .await
    }

    /// 结束病例，要求全部牙套已交付
    pub async fn finish_case(&self, case_id: Uuid) -> Result<Case> {
        self.fire(case_id, CaseEvent::Finish, |case, _| {
            let open = case.trays.iter().filter(|t| t.state != TrayState::Entregue).count();
            if open > 0 {
                return Err(LabError::Precondition(format!(
                    "病例 {} 还有 {} 个牙套未交付",
                    case.treatment_code, open
                )));
            }
            Ok(())
        })
        .await
    }

    async fn fire<F>(&self, case_id: Uuid, event: CaseEvent, update: F) -> Result<Case>
    where
        F: FnOnce(&mut Case, &Actor) -> Result<()> + Send,
    {
        let actor = self.actor.clone();
        let phases = self.phases.clone();
        let result = self
            .store
            .mutate(move |doc| {
                let case = doc
                    .case_mut(case_id)
                    .ok_or_else(|| LabError::not_found("case", case_id))?;
                let from = case.phase;
                let to = phases.transition(from, event)?;
                update(case, &actor)?;
                case.phase = to;
                case.updated_at = Utc::now();
                let updated = case.clone();
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::Case,
                    case_id,
                    &format!("case.{}", event),
                    format!("Caso {}: {} -> {}", updated.treatment_code, from, to),
                );
                Ok(updated)
            })
            .await;

        match &result {
            Ok(case) => info!("Case {} moved to {} ({})", case.treatment_code, case.phase, event),
            Err(e) => warn!("Case {} event {} rejected: {}", case_id, event, e),
        }
        result
    }

    /// 生成生产订单；合同已批准的病例随之进入生产阶段
    pub async fn generate_lab_order(&self, case_id: Uuid, request: GenerateLabOrder) -> Result<LabItem> {
        let actor = self.actor.clone();
        let phases = self.phases.clone();
        let result = self
            .store
            .mutate(move |doc| {
                let case = doc
                    .case(case_id)
                    .ok_or_else(|| LabError::not_found("case", case_id))?;
                let phase = case.phase;
                let next_phase = match phase {
                    CasePhase::ContratoAprovado => Some(phases.transition(phase, CaseEvent::StartProduction)?),
                    CasePhase::EmProducao => None,
                    other => {
                        return Err(LabError::InvalidStateTransition {
                            from: other.to_string(),
                            to: CasePhase::EmProducao.to_string(),
                        })
                    }
                };

                let arch = match (request.planned_upper > 0, request.planned_lower > 0) {
                    (true, true) => Arch::Ambos,
                    (true, false) => Arch::Superior,
                    (false, true) => Arch::Inferior,
                    (false, false) => case.arch,
                };
                let due_date = request
                    .due_date
                    .or_else(|| case.tray(request.tray_number).map(|t| t.due_date))
                    .unwrap_or(request.planned_date)
                    .max(request.planned_date);
                let new = NewLabItem {
                    case_id,
                    arch,
                    tray_number: request.tray_number,
                    planned_upper: request.planned_upper,
                    planned_lower: request.planned_lower,
                    planned_date: request.planned_date,
                    due_date,
                    status: LabStatus::AguardandoIniciar,
                    priority: request.priority,
                    request_kind: RequestKind::Producao,
                    notes: request.notes,
                };

                if let Some(to) = next_phase {
                    set_phase(doc, &actor, case_id, phase, to);
                }
                let status = promoted_status(new.status, new.planned_upper, new.planned_lower);
                insert_lab_item(doc, &actor, new, status, ItemLinks::default())
            })
            .await;

        match &result {
            Ok(item) => info!("Generated lab order {:?} for case {}", item.request_code, case_id),
            Err(e) => warn!("Lab order for case {} rejected: {}", case_id, e),
        }
        result
    }

    /// 设置牙套状态：只能前进一步，回退被拒绝
    pub async fn set_tray_state(&self, case_id: Uuid, tray_number: u32, state: TrayState) -> Result<Tray> {
        let actor = self.actor.clone();
        let machine = self.trays;
        let result = self
            .store
            .mutate(move |doc| {
                let now = Utc::now();
                let case = doc
                    .case_mut(case_id)
                    .ok_or_else(|| LabError::not_found("case", case_id))?;
                require_phase(case, &[CasePhase::EmProducao])?;
                let code = case.treatment_code.clone();
                let tray = case
                    .tray_mut(tray_number)
                    .ok_or_else(|| LabError::not_found("tray", format!("{} #{}", code, tray_number)))?;
                let from = tray.state;
                let transition = machine.apply(tray, state, now)?;
                let updated = tray.clone();
                if transition == TrayTransition::Unchanged {
                    return Ok(updated);
                }

                case.updated_at = now;
                replacement_bank::ensure_entries(doc, case_id)?;
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::Case,
                    case_id,
                    "case.tray_state_changed",
                    format!("Caso {}: placa {} {} -> {}", code, tray_number, from, state),
                );
                Ok(updated)
            })
            .await;

        match &result {
            Ok(tray) => info!("Case {} tray {} is {}", case_id, tray_number, tray.state),
            Err(e) => warn!("Tray {} of case {} rejected: {}", tray_number, case_id, e),
        }
        result
    }

    /// 登记交付给牙医的批次，要求存在覆盖该批次的生产订单
    pub async fn register_case_delivery_lot(&self, case_id: Uuid, lot: NewDeliveryLot) -> Result<DeliveryLot> {
        if lot.tray_from == 0 || lot.tray_from > lot.tray_to {
            return Err(LabError::validation(format!(
                "invalid tray range {}..{}",
                lot.tray_from, lot.tray_to
            )));
        }

        let actor = self.actor.clone();
        let machine = self.trays;
        let result = self
            .store
            .mutate(move |doc| {
                let case = doc
                    .case(case_id)
                    .ok_or_else(|| LabError::not_found("case", case_id))?;
                require_phase(case, &[CasePhase::EmProducao])?;
                if !case.arch.contains(lot.arch) {
                    return Err(LabError::validation(format!(
                        "lot arch {} is outside case arch {}",
                        lot.arch, case.arch
                    )));
                }
                let counts = case.tray_counts();
                for jaw in lot.arch.jaws() {
                    if lot.tray_to > counts.for_jaw(jaw) {
                        return Err(LabError::validation(format!(
                            "{} tray {} exceeds the {} contracted",
                            jaw,
                            lot.tray_to,
                            counts.for_jaw(jaw)
                        )));
                    }
                }
                // 同一颌同一牙套只能交付一次
                for jaw in lot.arch.jaws() {
                    if let Some(tray_number) = (lot.tray_from..=lot.tray_to).find(|n| case.is_delivered(jaw, *n)) {
                        return Err(LabError::Precondition(format!(
                            "{} tray {} was already delivered to the dentist",
                            jaw, tray_number
                        )));
                    }
                }
                let code = case.treatment_code.clone();
                let lab_item_id = supporting_production_item(doc, case_id, &lot)
                    .ok_or_else(|| LabError::NoProductionOrder(code.clone()))?;

                let now = Utc::now();
                let delivery = DeliveryLot {
                    id: Uuid::new_v4(),
                    arch: lot.arch,
                    tray_from: lot.tray_from,
                    tray_to: lot.tray_to,
                    delivered_to_dentist_at: lot.delivered_to_dentist_at,
                    lab_item_id,
                    notes: lot.notes,
                };
                let case = doc
                    .case_mut(case_id)
                    .ok_or_else(|| LabError::not_found("case", case_id))?;
                for tray_number in delivery.tray_range() {
                    if let Some(tray) = case.tray_mut(tray_number) {
                        machine.raise(tray, TrayState::Entregue, now);
                    }
                }
                case.delivery_lots.push(delivery.clone());
                case.updated_at = now;
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::Case,
                    case_id,
                    "case.delivery_lot_registered",
                    format!(
                        "Caso {}: placas {} a {} ({}) entregues ao dentista",
                        code, delivery.tray_from, delivery.tray_to, delivery.arch
                    ),
                );
                Ok(delivery)
            })
            .await;

        match &result {
            Ok(lot) => info!("Case {} delivery lot {}..{} registered", case_id, lot.tray_from, lot.tray_to),
            Err(e) => warn!("Delivery lot for case {} rejected: {}", case_id, e),
        }
        result
    }

    /// 登记患者佩戴，要求已向牙医交付过批次；重复登记会覆盖
    pub async fn register_case_installation(&self, case_id: Uuid, installation: NewInstallation) -> Result<Installation> {
        let actor = self.actor.clone();
        let result = self
            .store
            .mutate(move |doc| {
                let case = doc
                    .case_mut(case_id)
                    .ok_or_else(|| LabError::not_found("case", case_id))?;
                if case.delivery_lots.is_empty() {
                    return Err(LabError::NoDentistDelivery(case.treatment_code.clone()));
                }
                if installation.delivered_upper == 0 && installation.delivered_lower == 0 {
                    return Err(LabError::validation("installation needs at least one tray"));
                }
                for (jaw, quantity) in [
                    (Jaw::Superior, installation.delivered_upper),
                    (Jaw::Inferior, installation.delivered_lower),
                ] {
                    let available = case.delivered_to_dentist(jaw);
                    if quantity > available {
                        return Err(LabError::validation(format!(
                            "{} {} trays installed but only {} delivered to the dentist",
                            quantity, jaw, available
                        )));
                    }
                }

                let record = Installation {
                    delivered_upper: installation.delivered_upper,
                    delivered_lower: installation.delivered_lower,
                    installed_at: installation.installed_at,
                    notes: installation.notes,
                };
                case.installation = Some(record.clone());
                case.updated_at = Utc::now();
                let code = case.treatment_code.clone();
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::Case,
                    case_id,
                    "case.installation_registered",
                    format!(
                        "Caso {}: instalação registrada ({} superiores, {} inferiores)",
                        code, record.delivered_upper, record.delivered_lower
                    ),
                );
                Ok(record)
            })
            .await;

        match &result {
            Ok(_) => info!("Case {} installation registered", case_id),
            Err(e) => warn!("Installation for case {} rejected: {}", case_id, e),
        }
        result
    }

    /// 返工：新建一张待开始的生产订单并在替换库记一次不良，已交付和佩戴记录保持不变
    pub async fn handle_rework(&self, case_id: Uuid, request: ReworkRequest) -> Result<LabItem> {
        let reason = request.reason.trim().to_string();
        if reason.is_empty() {
            return Err(LabError::validation("rework reason is required"));
        }

        let actor = self.actor.clone();
        let result = self
            .store
            .mutate(move |doc| {
                let case = doc
                    .case(case_id)
                    .ok_or_else(|| LabError::not_found("case", case_id))?;
                require_phase(case, &[CasePhase::EmProducao, CasePhase::Finalizado])?;
                let code = case.treatment_code.clone();
                if case.tray(request.tray_number).is_none() {
                    return Err(LabError::not_found("tray", format!("{} #{}", code, request.tray_number)));
                }
                if !case.arch.includes(request.jaw) || request.tray_number > case.tray_counts().for_jaw(request.jaw) {
                    return Err(LabError::validation(format!(
                        "tray {} {} is not contracted for case {}",
                        request.tray_number, request.jaw, code
                    )));
                }
                let source = doc
                    .lab_item(request.source_lab_item_id)
                    .ok_or_else(|| LabError::not_found("lab item", request.source_lab_item_id))?;
                if source.case_id != case_id {
                    return Err(LabError::validation(format!(
                        "lab item {} belongs to another case",
                        source.id
                    )));
                }

                let today = Utc::now().date_naive();
                let defects = replacement_bank::record_defect(doc, case_id, request.jaw, request.tray_number)?;
                let (planned_upper, planned_lower) = match request.jaw {
                    Jaw::Superior => (1, 0),
                    Jaw::Inferior => (0, 1),
                };
                let new = NewLabItem {
                    case_id,
                    arch: Arch::from(request.jaw),
                    tray_number: request.tray_number,
                    planned_upper,
                    planned_lower,
                    planned_date: today,
                    due_date: request.due_date.unwrap_or(today).max(today),
                    status: LabStatus::AguardandoIniciar,
                    priority: LabPriority::Alta,
                    request_kind: RequestKind::Producao,
                    notes: Some(format!(
                        "Reconfecção manual da placa {} ({}): {}",
                        request.tray_number, request.jaw, reason
                    )),
                };
                let links = ItemLinks {
                    rework_of: Some(request.source_lab_item_id),
                    source_replenishment_id: None,
                };
                let item = insert_lab_item(doc, &actor, new, LabStatus::AguardandoIniciar, links)?;
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::ReplacementBank,
                    case_id,
                    "replacement_bank.defect_recorded",
                    format!(
                        "Caso {}: placa {} ({}) com defeito, total {}",
                        code, request.tray_number, request.jaw, defects
                    ),
                );
                Ok(item)
            })
            .await;

        match &result {
            Ok(item) => info!("Rework {:?} created for case {}", item.request_code, case_id),
            Err(e) => warn!("Rework for case {} rejected: {}", case_id, e),
        }
        result
    }
}

fn require_phase(case: &Case, allowed: &[CasePhase]) -> Result<()> {
    if allowed.contains(&case.phase) {
        Ok(())
    } else {
        Err(LabError::Precondition(format!(
            "病例 {} 当前阶段为 {}，不允许该操作",
            case.treatment_code, case.phase
        )))
    }
}

fn set_phase(doc: &mut Document, actor: &Actor, case_id: Uuid, from: CasePhase, to: CasePhase) {
    let Some(case) = doc.case_mut(case_id) else {
        return;
    };
    case.phase = to;
    case.updated_at = Utc::now();
    let code = case.treatment_code.clone();
    audit::record(
        doc,
        actor,
        AuditEntity::Case,
        case_id,
        "case.start_production",
        format!("Caso {}: {} -> {}", code, from, to),
    );
}

/// 覆盖批次每个（颌, 牙套）的进行中或已完成生产订单，返回第一张
fn supporting_production_item(doc: &Document, case_id: Uuid, lot: &NewDeliveryLot) -> Option<Uuid> {
    let mut first = None;
    for jaw in lot.arch.jaws() {
        for tray_number in lot.tray_from..=lot.tray_to {
            let item = doc.lab_items_for_case(case_id).find(|item| {
                item.request_kind == RequestKind::Producao
                    && !item.is_rework()
                    && item.status.is_active()
                    && item.covers(jaw, tray_number)
            })?;
            first.get_or_insert(item.id);
        }
    }
    first
}
