//! 口扫接收
//!
//! 校验并保存扫描记录及其附件清单，把审核通过的扫描转换为病例。

use crate::audit;
use chrono::{NaiveDate, Utc};
use lab_core::utils::{
    allocate_treatment_code, parse_treatment_code, reserve_treatment_code, tray_due_date, CodePrefix,
};
use lab_core::{
    Actor, Arch, Attachment, AttachmentKind, AttachmentStatus, AuditEntity, Case, CasePhase, Document,
    LabError, ProductType, Result, Scan, ScanStatus, StorageRef, Tray, TrayCounts, TrayState,
};
use lab_storage::{AttachmentUploader, StateStore};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// 附件来源
#[derive(Debug, Clone)]
pub enum AttachmentSource {
    /// 已在远程存储中
    Remote(String),
    /// 本地句柄，尚未上传
    Local(String),
    /// 文件内容，接收时尝试上传
    Bytes(Vec<u8>),
}

/// 新附件
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub kind: AttachmentKind,
    pub arch: Option<Arch>,
    pub slot: Option<String>,
    pub rx_kind: Option<String>,
    pub file_name: String,
    pub source: AttachmentSource,
}

impl NewAttachment {
    pub fn remote(kind: AttachmentKind, file_name: &str, url: &str) -> Self {
        Self {
            kind,
            arch: None,
            slot: None,
            rx_kind: None,
            file_name: file_name.to_string(),
            source: AttachmentSource::Remote(url.to_string()),
        }
    }

    pub fn bytes(kind: AttachmentKind, file_name: &str, data: Vec<u8>) -> Self {
        Self {
            kind,
            arch: None,
            slot: None,
            rx_kind: None,
            file_name: file_name.to_string(),
            source: AttachmentSource::Bytes(data),
        }
    }

    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = Some(arch);
        self
    }

    pub fn with_slot(mut self, slot: &str) -> Self {
        self.slot = Some(slot.to_string());
        self
    }
}

/// 新扫描
#[derive(Debug, Clone)]
pub struct NewScan {
    pub patient_id: Uuid,
    pub dentist_id: Uuid,
    pub clinic_id: Uuid,
    pub scan_date: NaiveDate,
    pub arch: Arch,
    pub complaint: Option<String>,
    pub guidance: Option<String>,
    pub service_order_code: Option<String>,
    pub attachments: Vec<NewAttachment>,
}

/// 由扫描创建病例的参数
#[derive(Debug, Clone)]
pub struct NewCaseFromScan {
    pub product_type: ProductType,
    /// 缺省沿用扫描的牙弓
    pub arch: Option<Arch>,
    pub total_trays: Option<u32>,
    pub total_trays_upper: Option<u32>,
    pub total_trays_lower: Option<u32>,
    /// 缺省使用配置的默认间隔
    pub change_every_days: Option<u32>,
}

impl NewCaseFromScan {
    pub fn aligner(total_trays: u32, change_every_days: u32) -> Self {
        Self {
            product_type: ProductType::Alinhador,
            arch: None,
            total_trays: Some(total_trays),
            total_trays_upper: None,
            total_trays_lower: None,
            change_every_days: Some(change_every_days),
        }
    }
}

/// 扫描接收组件
#[derive(Clone)]
pub struct ScanIntake {
    store: StateStore,
    actor: Actor,
    uploader: Option<Arc<dyn AttachmentUploader>>,
    default_change_every_days: u32,
}

impl std::fmt::Debug for ScanIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanIntake")
            .field("actor", &self.actor)
            .field("uploader", &self.uploader.is_some())
            .finish()
    }
}

impl ScanIntake {
    pub fn new(
        store: StateStore,
        actor: Actor,
        uploader: Option<Arc<dyn AttachmentUploader>>,
        default_change_every_days: u32,
    ) -> Self {
        Self {
            store,
            actor,
            uploader,
            default_change_every_days,
        }
    }

    /// 上传在进入存储锁之前完成；失败时保留为待上传的本地附件
    async fn resolve_attachment(&self, new: NewAttachment) -> Attachment {
        let storage = match new.source {
            AttachmentSource::Remote(url) => StorageRef::Remote { url },
            AttachmentSource::Local(handle) => StorageRef::Local {
                handle,
                pending_upload: true,
            },
            AttachmentSource::Bytes(data) => match &self.uploader {
                Some(uploader) => match uploader.upload(&new.file_name, &data).await {
                    Ok(url) => StorageRef::Remote { url },
                    Err(e) => {
                        warn!("Upload of {} failed, keeping local copy: {}", new.file_name, e);
                        StorageRef::Local {
                            handle: new.file_name.clone(),
                            pending_upload: true,
                        }
                    }
                },
                None => StorageRef::Local {
                    handle: new.file_name.clone(),
                    pending_upload: true,
                },
            },
        };

        Attachment {
            id: Uuid::new_v4(),
            kind: new.kind,
            arch: new.arch,
            slot: new.slot,
            rx_kind: new.rx_kind,
            file_name: new.file_name,
            storage,
            status: AttachmentStatus::Ok,
            flagged_reason: None,
            flagged_at: None,
            created_at: Utc::now(),
        }
    }

    /// 创建扫描，未提供编号时按诊所前缀分配
    pub async fn create_scan(&self, payload: NewScan) -> Result<Scan> {
        let mut attachments = Vec::with_capacity(payload.attachments.len());
        for new in payload.attachments {
            attachments.push(self.resolve_attachment(new).await);
        }

        let actor = self.actor.clone();
        let scan = self
            .store
            .mutate(move |doc| {
                let clinic = doc
                    .clinic(payload.clinic_id)
                    .ok_or_else(|| LabError::not_found("clinic", payload.clinic_id))?;
                let prefix = CodePrefix::for_clinic(clinic.internal);
                if !doc.patients.iter().any(|p| p.id == payload.patient_id) {
                    return Err(LabError::not_found("patient", payload.patient_id));
                }
                if !doc.dentists.iter().any(|d| d.id == payload.dentist_id) {
                    return Err(LabError::not_found("dentist", payload.dentist_id));
                }

                let service_order_code = match payload.service_order_code.as_deref().map(str::trim) {
                    Some(code) if !code.is_empty() => {
                        if parse_treatment_code(code).is_none() {
                            return Err(LabError::validation(format!("invalid service order code: {}", code)));
                        }
                        if code_in_use(doc, code) {
                            return Err(LabError::validation(format!("service order code {} already in use", code)));
                        }
                        reserve_treatment_code(doc, code);
                        code.to_string()
                    }
                    _ => allocate_treatment_code(doc, prefix)?,
                };

                let now = Utc::now();
                let scan = Scan {
                    id: Uuid::new_v4(),
                    service_order_code: Some(service_order_code),
                    patient_id: payload.patient_id,
                    dentist_id: payload.dentist_id,
                    clinic_id: payload.clinic_id,
                    scan_date: payload.scan_date,
                    arch: payload.arch,
                    complaint: payload.complaint,
                    guidance: payload.guidance,
                    attachments,
                    status: ScanStatus::Pendente,
                    linked_case_id: None,
                    created_at: now,
                    updated_at: now,
                };
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::Scan,
                    scan.id,
                    "scan.created",
                    format!(
                        "Escaneamento {} registrado ({} arquivos)",
                        scan.service_order_code.as_deref().unwrap_or("-"),
                        scan.attachments.len()
                    ),
                );
                doc.scans.push(scan.clone());
                Ok(scan)
            })
            .await?;

        info!("Created scan {} ({:?})", scan.id, scan.service_order_code);
        Ok(scan)
    }

    pub async fn get_scan(&self, scan_id: Uuid) -> Result<Option<Scan>> {
        self.store.read(move |doc| doc.scan(scan_id).cloned()).await
    }

    /// 追加附件，不替换已有附件
    pub async fn add_scan_attachment(&self, scan_id: Uuid, new: NewAttachment) -> Result<Attachment> {
        let attachment = self.resolve_attachment(new).await;
        let actor = self.actor.clone();
        self.store
            .mutate(move |doc| {
                let scan = doc
                    .scan_mut(scan_id)
                    .ok_or_else(|| LabError::not_found("scan", scan_id))?;
                scan.attachments.push(attachment.clone());
                scan.updated_at = Utc::now();
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::Scan,
                    scan_id,
                    "scan.attachment_added",
                    format!("Arquivo {} ({}) anexado", attachment.file_name, attachment.kind.as_str()),
                );
                Ok(attachment)
            })
            .await
    }

    /// 标记附件有误；扫描或附件不存在、原因为空时返回 `None` 且不写入
    pub async fn mark_scan_attachment_error(
        &self,
        scan_id: Uuid,
        attachment_id: Uuid,
        reason: &str,
    ) -> Result<Option<Attachment>> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Ok(None);
        }
        if !self.attachment_exists(scan_id, attachment_id).await? {
            return Ok(None);
        }

        let actor = self.actor.clone();
        self.store
            .mutate(move |doc| {
                let now = Utc::now();
                let Some(attachment) = find_attachment_mut(doc, scan_id, attachment_id) else {
                    return Ok(None);
                };
                attachment.status = AttachmentStatus::Erro;
                attachment.flagged_reason = Some(reason.clone());
                attachment.flagged_at = Some(now);
                let flagged = attachment.clone();
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::Scan,
                    scan_id,
                    "scan.attachment_flagged",
                    format!("Arquivo {} marcado com erro: {}", flagged.file_name, reason),
                );
                Ok(Some(flagged))
            })
            .await
    }

    /// 清除附件错误标记
    pub async fn clear_scan_attachment_error(&self, scan_id: Uuid, attachment_id: Uuid) -> Result<Option<Attachment>> {
        if !self.attachment_exists(scan_id, attachment_id).await? {
            return Ok(None);
        }

        let actor = self.actor.clone();
        self.store
            .mutate(move |doc| {
                let Some(attachment) = find_attachment_mut(doc, scan_id, attachment_id) else {
                    return Ok(None);
                };
                attachment.status = AttachmentStatus::Ok;
                attachment.flagged_reason = None;
                attachment.flagged_at = None;
                let cleared = attachment.clone();
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::Scan,
                    scan_id,
                    "scan.attachment_cleared",
                    format!("Erro do arquivo {} removido", cleared.file_name),
                );
                Ok(Some(cleared))
            })
            .await
    }

    async fn attachment_exists(&self, scan_id: Uuid, attachment_id: Uuid) -> Result<bool> {
        self.store
            .read(move |doc| {
                doc.scan(scan_id)
                    .map(|s| s.attachments.iter().any(|a| a.id == attachment_id))
                    .unwrap_or(false)
            })
            .await
    }

    /// 审核扫描
    pub async fn set_scan_status(&self, scan_id: Uuid, status: ScanStatus) -> Result<Scan> {
        let actor = self.actor.clone();
        self.store
            .mutate(move |doc| {
                let scan = doc
                    .scan_mut(scan_id)
                    .ok_or_else(|| LabError::not_found("scan", scan_id))?;
                let from = scan.status;
                if from == status {
                    return Ok(scan.clone());
                }
                if !scan_status_allowed(from, status) {
                    return Err(LabError::InvalidStateTransition {
                        from: from.to_string(),
                        to: status.to_string(),
                    });
                }
                scan.status = status;
                scan.updated_at = Utc::now();
                let updated = scan.clone();
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::Scan,
                    scan_id,
                    "scan.status_changed",
                    format!("Status do escaneamento: {} -> {}", from, status),
                );
                Ok(updated)
            })
            .await
    }

    /// 删除扫描并解除病例关联；编号保持占用
    pub async fn delete_scan(&self, scan_id: Uuid) -> Result<Scan> {
        let actor = self.actor.clone();
        let removed = self
            .store
            .mutate(move |doc| {
                let index = doc
                    .scans
                    .iter()
                    .position(|s| s.id == scan_id)
                    .ok_or_else(|| LabError::not_found("scan", scan_id))?;
                let scan = doc.scans.remove(index);
                if let Some(code) = scan.service_order_code.as_deref() {
                    reserve_treatment_code(doc, code);
                }
                for case in doc.cases.iter_mut().filter(|c| c.scan_id == Some(scan_id)) {
                    case.scan_id = None;
                    case.updated_at = Utc::now();
                }
                audit::record(
                    doc,
                    &actor,
                    AuditEntity::Scan,
                    scan_id,
                    "scan.deleted",
                    format!(
                        "Escaneamento {} removido",
                        scan.service_order_code.as_deref().unwrap_or("-")
                    ),
                );
                Ok(scan)
            })
            .await?;

        info!("Deleted scan {}", scan_id);
        Ok(removed)
    }

    /// 由审核通过的扫描创建病例，病例创建与扫描更新在同一次写入中完成
    pub async fn create_case_from_scan(&self, scan_id: Uuid, payload: NewCaseFromScan) -> Result<Case> {
        let actor = self.actor.clone();
        let default_change_every_days = self.default_change_every_days;
        let result = self
            .store
            .mutate(move |doc| convert_scan(doc, &actor, scan_id, payload, default_change_every_days))
            .await;

        match &result {
            Ok(case) => info!("Created case {} from scan {}", case.treatment_code, scan_id),
            Err(e) if e.is_precondition() => warn!("Case creation from scan {} rejected: {}", scan_id, e),
            Err(e) => warn!("Case creation from scan {} failed: {}", scan_id, e),
        }
        result
    }
}

fn scan_status_allowed(from: ScanStatus, to: ScanStatus) -> bool {
    matches!(
        (from, to),
        (ScanStatus::Pendente, ScanStatus::Aprovado)
            | (ScanStatus::Pendente, ScanStatus::Reprovado)
            | (ScanStatus::Reprovado, ScanStatus::Pendente)
            | (ScanStatus::Reprovado, ScanStatus::Aprovado)
            | (ScanStatus::Aprovado, ScanStatus::Reprovado)
    )
}

fn code_in_use(doc: &Document, code: &str) -> bool {
    doc.cases.iter().any(|c| c.treatment_code == code)
        || doc.scans.iter().any(|s| s.service_order_code.as_deref() == Some(code))
}

fn find_attachment_mut(doc: &mut Document, scan_id: Uuid, attachment_id: Uuid) -> Option<&mut Attachment> {
    doc.scan_mut(scan_id)?
        .attachments
        .iter_mut()
        .find(|a| a.id == attachment_id)
}

/// 缺失的必需文件；只统计状态为 ok 的附件
pub fn missing_required_files(scan: &Scan) -> Vec<String> {
    let usable: Vec<&Attachment> = scan.attachments.iter().filter(|a| a.is_ok()).collect();
    let mut missing = Vec::new();

    for jaw in scan.arch.jaws() {
        let present = usable.iter().any(|a| {
            a.kind == AttachmentKind::Scan3d && a.arch.unwrap_or(scan.arch).includes(jaw)
        });
        if !present {
            missing.push(format!("scan3d {}", jaw));
        }
    }
    if !usable.iter().any(|a| a.kind == AttachmentKind::FotoIntra) {
        missing.push(AttachmentKind::FotoIntra.as_str().to_string());
    }
    if !usable.iter().any(|a| a.kind == AttachmentKind::FotoExtra) {
        missing.push(AttachmentKind::FotoExtra.as_str().to_string());
    }
    missing
}

fn convert_scan(
    doc: &mut Document,
    actor: &Actor,
    scan_id: Uuid,
    payload: NewCaseFromScan,
    default_change_every_days: u32,
) -> Result<Case> {
    let scan = doc
        .scan(scan_id)
        .cloned()
        .ok_or_else(|| LabError::not_found("scan", scan_id))?;
    let label = scan
        .service_order_code
        .clone()
        .unwrap_or_else(|| scan_id.to_string());

    if scan.status != ScanStatus::Aprovado {
        return Err(LabError::ScanNotApproved(label));
    }
    if scan.linked_case_id.is_some() {
        return Err(LabError::ScanAlreadyLinked(label));
    }
    let missing = missing_required_files(&scan);
    if !missing.is_empty() {
        return Err(LabError::MissingRequiredFiles(missing));
    }

    let arch = payload.arch.unwrap_or(scan.arch);
    let counts = TrayCounts::from_plan(
        arch,
        payload.total_trays,
        payload.total_trays_upper,
        payload.total_trays_lower,
    );
    if payload.product_type.is_aligner() && counts.total() == 0 {
        return Err(LabError::NoTraysPlanned);
    }
    let change_every_days = payload.change_every_days.unwrap_or(default_change_every_days);
    if change_every_days == 0 {
        return Err(LabError::validation("change interval must be at least one day"));
    }

    let clinic_internal = doc
        .clinic(scan.clinic_id)
        .map(|c| c.internal)
        .ok_or_else(|| LabError::not_found("clinic", scan.clinic_id))?;
    let prefix = CodePrefix::for_clinic(clinic_internal);
    let reusable = scan.service_order_code.as_deref().filter(|code| {
        parse_treatment_code(code).map(|(p, _)| p) == Some(prefix)
            && !doc.cases.iter().any(|c| c.treatment_code == *code)
    });
    let treatment_code = match reusable {
        Some(code) => {
            let code = code.to_string();
            reserve_treatment_code(doc, &code);
            code
        }
        None => allocate_treatment_code(doc, prefix)?,
    };

    let trays = (1..=counts.sequence_len())
        .map(|tray_number| Tray {
            tray_number,
            state: TrayState::Pendente,
            due_date: tray_due_date(scan.scan_date, tray_number, change_every_days),
            updated_at: None,
        })
        .collect();

    let now = Utc::now();
    let case = Case {
        id: Uuid::new_v4(),
        treatment_code,
        patient_id: scan.patient_id,
        dentist_id: scan.dentist_id,
        clinic_id: scan.clinic_id,
        scan_id: Some(scan.id),
        product_type: payload.product_type,
        arch,
        total_trays: payload.total_trays,
        total_trays_upper: payload.total_trays_upper,
        total_trays_lower: payload.total_trays_lower,
        change_every_days,
        phase: CasePhase::Planejamento,
        budget: None,
        contract: None,
        trays,
        delivery_lots: Vec::new(),
        installation: None,
        scan_files: scan.attachments.clone(),
        created_at: now,
        updated_at: now,
    };

    if let Some(source) = doc.scan_mut(scan_id) {
        source.status = ScanStatus::Convertido;
        source.linked_case_id = Some(case.id);
        source.updated_at = now;
    }
    audit::record(
        doc,
        actor,
        AuditEntity::Case,
        case.id,
        "case.created_from_scan",
        format!(
            "Caso {} criado a partir do escaneamento {} ({})",
            case.treatment_code, label, scan.id
        ),
    );
    doc.cases.push(case.clone());
    Ok(case)
}
