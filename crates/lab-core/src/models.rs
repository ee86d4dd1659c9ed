//! 核心数据模型定义
//!
//! 整个应用状态是一个文档 [`Document`]，所有集合和元素都是显式类型。
//! 序列化字段采用 camelCase，枚举取值保持与既有数据一致的葡语拼写。

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::RangeInclusive;
use uuid::Uuid;

/// 牙弓覆盖范围
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    Superior, // 上颌
    Inferior, // 下颌
    Ambos,    // 双颌
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Superior => "superior",
            Arch::Inferior => "inferior",
            Arch::Ambos => "ambos",
        }
    }

    /// 是否覆盖指定的单颌
    pub fn includes(&self, jaw: Jaw) -> bool {
        match self {
            Arch::Ambos => true,
            Arch::Superior => jaw == Jaw::Superior,
            Arch::Inferior => jaw == Jaw::Inferior,
        }
    }

    pub fn jaws(&self) -> Vec<Jaw> {
        Jaw::ALL.into_iter().filter(|jaw| self.includes(*jaw)).collect()
    }

    /// `other` 的每个单颌都在本范围内
    pub fn contains(&self, other: Arch) -> bool {
        other.jaws().into_iter().all(|jaw| self.includes(jaw))
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单颌
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Jaw {
    Superior,
    Inferior,
}

impl Jaw {
    pub const ALL: [Jaw; 2] = [Jaw::Superior, Jaw::Inferior];

    pub fn as_str(&self) -> &'static str {
        match self {
            Jaw::Superior => "superior",
            Jaw::Inferior => "inferior",
        }
    }
}

impl fmt::Display for Jaw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Jaw> for Arch {
    fn from(jaw: Jaw) -> Self {
        match jaw {
            Jaw::Superior => Arch::Superior,
            Jaw::Inferior => Arch::Inferior,
        }
    }
}

/// 诊所
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Clinic {
    pub id: Uuid,
    pub name: String,
    /// 实验室自有诊所，病例编号前缀为 `A`
    #[serde(default)]
    pub internal: bool,
    pub created_at: DateTime<Utc>,
}

/// 牙医
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dentist {
    pub id: Uuid,
    pub name: String,
    pub clinic_id: Option<Uuid>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 患者
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub birth_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// 用户角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Gestor,
    Recepcao,
    Laboratorio,
    Dentista,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

/// 当前操作者
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_id: Option<Uuid>,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            user_id: None,
            name: "system".to_string(),
            role: Role::Admin,
        }
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            user_id: Some(user.id),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

/// 患者文档
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientDocument {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// 附件类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Scan3d,    // 口扫3D模型
    FotoIntra, // 口内照片
    FotoExtra, // 口外照片
    Raiox,     // X光
    Dicom,
    Projeto,   // 治疗方案
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Scan3d => "scan3d",
            AttachmentKind::FotoIntra => "foto_intra",
            AttachmentKind::FotoExtra => "foto_extra",
            AttachmentKind::Raiox => "raiox",
            AttachmentKind::Dicom => "dicom",
            AttachmentKind::Projeto => "projeto",
        }
    }
}

/// 附件状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStatus {
    Ok,
    Erro,
}

/// 附件存储位置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageRef {
    /// 已上传的远程地址
    Remote { url: String },
    /// 本地临时句柄，上传失败时保留待重试
    Local {
        handle: String,
        #[serde(rename = "pendingUpload", default)]
        pending_upload: bool,
    },
}

impl StorageRef {
    pub fn is_pending(&self) -> bool {
        matches!(self, StorageRef::Local { pending_upload: true, .. })
    }
}

/// 扫描或病例附件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: Uuid,
    pub kind: AttachmentKind,
    /// 3D模型所属牙弓
    pub arch: Option<Arch>,
    /// 照片位置，例如 frontal、lateral_direita
    pub slot: Option<String>,
    /// X光子类型，例如 panoramica
    pub rx_kind: Option<String>,
    pub file_name: String,
    pub storage: StorageRef,
    pub status: AttachmentStatus,
    pub flagged_reason: Option<String>,
    pub flagged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn is_ok(&self) -> bool {
        self.status == AttachmentStatus::Ok
    }
}

/// 扫描状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pendente,   // 待审核
    Aprovado,   // 已通过
    Reprovado,  // 已驳回
    Convertido, // 已转为病例
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pendente => "pendente",
            ScanStatus::Aprovado => "aprovado",
            ScanStatus::Reprovado => "reprovado",
            ScanStatus::Convertido => "convertido",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 口扫记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub id: Uuid,
    pub service_order_code: Option<String>,
    pub patient_id: Uuid,
    pub dentist_id: Uuid,
    pub clinic_id: Uuid,
    pub scan_date: NaiveDate,
    pub arch: Arch,
    pub complaint: Option<String>,
    pub guidance: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub status: ScanStatus,
    pub linked_case_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 产品类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Alinhador, // 隐形矫治器
    Contencao, // 保持器
    Placa,     // 咬合板
}

impl ProductType {
    pub fn is_aligner(&self) -> bool {
        matches!(self, ProductType::Alinhador)
    }
}

/// 病例阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CasePhase {
    Planejamento,     // 方案设计
    Orcamento,        // 报价
    ContratoPendente, // 待签合同
    ContratoAprovado, // 合同已批准
    EmProducao,       // 生产中
    Finalizado,       // 已完成
}

impl CasePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CasePhase::Planejamento => "planejamento",
            CasePhase::Orcamento => "orcamento",
            CasePhase::ContratoPendente => "contrato_pendente",
            CasePhase::ContratoAprovado => "contrato_aprovado",
            CasePhase::EmProducao => "em_producao",
            CasePhase::Finalizado => "finalizado",
        }
    }

    pub fn all() -> [CasePhase; 6] {
        [
            CasePhase::Planejamento,
            CasePhase::Orcamento,
            CasePhase::ContratoPendente,
            CasePhase::ContratoAprovado,
            CasePhase::EmProducao,
            CasePhase::Finalizado,
        ]
    }
}

impl fmt::Display for CasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 牙套状态，声明顺序即生命周期顺序
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TrayState {
    Pendente,   // 待生产
    EmProducao, // 生产中
    Pronta,     // 已完成
    Entregue,   // 已交付
}

impl TrayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrayState::Pendente => "pendente",
            TrayState::EmProducao => "em_producao",
            TrayState::Pronta => "pronta",
            TrayState::Entregue => "entregue",
        }
    }

    /// 生命周期中的下一个状态
    pub fn next(&self) -> Option<TrayState> {
        match self {
            TrayState::Pendente => Some(TrayState::EmProducao),
            TrayState::EmProducao => Some(TrayState::Pronta),
            TrayState::Pronta => Some(TrayState::Entregue),
            TrayState::Entregue => None,
        }
    }
}

impl fmt::Display for TrayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个牙套
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tray {
    pub tray_number: u32,
    pub state: TrayState,
    pub due_date: NaiveDate,
    pub updated_at: Option<DateTime<Utc>>,
}

/// 报价
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub amount: f64,
    pub closed_at: DateTime<Utc>,
}

/// 合同
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub approved_at: DateTime<Utc>,
    pub approved_by: Option<String>,
}

/// 交付给牙医的批次
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLot {
    pub id: Uuid,
    pub arch: Arch,
    pub tray_from: u32,
    pub tray_to: u32,
    pub delivered_to_dentist_at: NaiveDate,
    /// 支撑该批次的生产订单
    pub lab_item_id: Uuid,
    pub notes: Option<String>,
}

impl DeliveryLot {
    pub fn tray_range(&self) -> RangeInclusive<u32> {
        self.tray_from..=self.tray_to
    }

    pub fn trays_for(&self, jaw: Jaw) -> u32 {
        if self.arch.includes(jaw) {
            self.tray_to.saturating_sub(self.tray_from).saturating_add(1)
        } else {
            0
        }
    }

    pub fn covers(&self, jaw: Jaw, tray_number: u32) -> bool {
        self.arch.includes(jaw) && self.tray_range().contains(&tray_number)
    }
}

/// 患者佩戴登记
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub delivered_upper: u32,
    pub delivered_lower: u32,
    pub installed_at: NaiveDate,
    pub notes: Option<String>,
}

/// 按颌计的牙套数量
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrayCounts {
    pub upper: u32,
    pub lower: u32,
}

impl TrayCounts {
    /// 根据牙弓过滤计划数量；分颌数量优先于总数
    pub fn from_plan(arch: Arch, total: Option<u32>, upper: Option<u32>, lower: Option<u32>) -> Self {
        let (upper, lower) = if upper.is_some() || lower.is_some() {
            (upper.unwrap_or(0), lower.unwrap_or(0))
        } else {
            let total = total.unwrap_or(0);
            (total, total)
        };
        Self {
            upper: if arch.includes(Jaw::Superior) { upper } else { 0 },
            lower: if arch.includes(Jaw::Inferior) { lower } else { 0 },
        }
    }

    pub fn for_jaw(&self, jaw: Jaw) -> u32 {
        match jaw {
            Jaw::Superior => self.upper,
            Jaw::Inferior => self.lower,
        }
    }

    pub fn total(&self) -> u32 {
        self.upper + self.lower
    }

    /// 牙套序列长度
    pub fn sequence_len(&self) -> u32 {
        self.upper.max(self.lower)
    }
}

/// 矫治病例
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: Uuid,
    pub treatment_code: String,
    pub patient_id: Uuid,
    pub dentist_id: Uuid,
    pub clinic_id: Uuid,
    pub scan_id: Option<Uuid>,
    pub product_type: ProductType,
    pub arch: Arch,
    pub total_trays: Option<u32>,
    pub total_trays_upper: Option<u32>,
    pub total_trays_lower: Option<u32>,
    pub change_every_days: u32,
    pub phase: CasePhase,
    pub budget: Option<Budget>,
    pub contract: Option<Contract>,
    #[serde(default)]
    pub trays: Vec<Tray>,
    #[serde(default)]
    pub delivery_lots: Vec<DeliveryLot>,
    pub installation: Option<Installation>,
    /// 源扫描附件的冻结副本
    #[serde(default)]
    pub scan_files: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Case {
    pub fn tray_counts(&self) -> TrayCounts {
        TrayCounts::from_plan(
            self.arch,
            self.total_trays,
            self.total_trays_upper,
            self.total_trays_lower,
        )
    }

    pub fn tray(&self, tray_number: u32) -> Option<&Tray> {
        self.trays.iter().find(|t| t.tray_number == tray_number)
    }

    pub fn tray_mut(&mut self, tray_number: u32) -> Option<&mut Tray> {
        self.trays.iter_mut().find(|t| t.tray_number == tray_number)
    }

    /// 某颌的某个牙套是否已在批次中交付给牙医
    pub fn is_delivered(&self, jaw: Jaw, tray_number: u32) -> bool {
        self.delivery_lots.iter().any(|lot| lot.covers(jaw, tray_number))
    }

    /// 已交付给牙医的指定颌牙套数，同一牙套只计一次
    pub fn delivered_to_dentist(&self, jaw: Jaw) -> u32 {
        let delivered: BTreeSet<u32> = self
            .delivery_lots
            .iter()
            .filter(|lot| lot.arch.includes(jaw))
            .flat_map(|lot| lot.tray_range())
            .collect();
        delivered.len() as u32
    }
}

/// 生产订单状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LabStatus {
    AguardandoIniciar, // 待开始
    EmProducao,        // 生产中
    ControleQualidade, // 质检
    Prontas,           // 完成
}

impl LabStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabStatus::AguardandoIniciar => "aguardando_iniciar",
            LabStatus::EmProducao => "em_producao",
            LabStatus::ControleQualidade => "controle_qualidade",
            LabStatus::Prontas => "prontas",
        }
    }

    pub fn all() -> [LabStatus; 4] {
        [
            LabStatus::AguardandoIniciar,
            LabStatus::EmProducao,
            LabStatus::ControleQualidade,
            LabStatus::Prontas,
        ]
    }

    /// 已开始生产（含已完成）
    pub fn is_active(&self) -> bool {
        !matches!(self, LabStatus::AguardandoIniciar)
    }
}

impl fmt::Display for LabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订单来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Producao,            // 生产
    ReposicaoProgramada, // 计划补货
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Producao => "producao",
            RequestKind::ReposicaoProgramada => "reposicao_programada",
        }
    }
}

/// 订单优先级
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LabPriority {
    Baixa,
    #[default]
    Normal,
    Alta,
    Urgente,
}

/// 实验室生产订单
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabItem {
    pub id: Uuid,
    pub case_id: Uuid,
    pub arch: Arch,
    pub tray_number: u32,
    pub planned_upper: u32,
    pub planned_lower: u32,
    pub planned_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: LabStatus,
    #[serde(default)]
    pub priority: LabPriority,
    pub request_kind: RequestKind,
    pub request_code: Option<String>,
    pub notes: Option<String>,
    /// 返工来源订单
    pub rework_of: Option<Uuid>,
    /// 提前生产订单对应的已消耗补货订单
    pub source_replenishment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LabItem {
    pub fn planned_for(&self, jaw: Jaw) -> u32 {
        match jaw {
            Jaw::Superior => self.planned_upper,
            Jaw::Inferior => self.planned_lower,
        }
    }

    pub fn planned_total(&self) -> u32 {
        self.planned_upper.saturating_add(self.planned_lower)
    }

    pub fn is_rework(&self) -> bool {
        self.rework_of.is_some()
    }

    /// 覆盖的牙套编号范围
    pub fn covered_trays(&self) -> RangeInclusive<u32> {
        let span = self.planned_upper.max(self.planned_lower).max(1);
        self.tray_number..=self.tray_number.saturating_add(span - 1)
    }

    /// 是否覆盖某颌的某个牙套
    pub fn covers(&self, jaw: Jaw, tray_number: u32) -> bool {
        if !self.arch.includes(jaw) {
            return false;
        }
        let planned = self.planned_for(jaw);
        if planned > 0 {
            tray_number >= self.tray_number && tray_number - self.tray_number < planned
        } else {
            self.planned_total() == 0 && tray_number == self.tray_number
        }
    }
}

/// 替换牙套库条目，每颌每个合同牙套一条
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplacementBankEntry {
    pub id: Uuid,
    pub case_id: Uuid,
    pub jaw: Jaw,
    pub tray_number: u32,
    #[serde(default)]
    pub defective_count: u32,
    pub created_at: DateTime<Utc>,
}

/// 审计实体类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    Clinic,
    Dentist,
    Patient,
    Scan,
    Case,
    LabItem,
    ReplacementBank,
}

/// 审计日志条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity_type: AuditEntity,
    pub entity_id: Uuid,
    pub action: String,
    pub message: String,
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
}

/// 应用状态文档
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Document {
    pub clinics: Vec<Clinic>,
    pub dentists: Vec<Dentist>,
    pub patients: Vec<Patient>,
    pub users: Vec<User>,
    pub patient_documents: Vec<PatientDocument>,
    pub scans: Vec<Scan>,
    pub cases: Vec<Case>,
    pub lab_items: Vec<LabItem>,
    pub replacement_bank: Vec<ReplacementBankEntry>,
    pub audit_log: Vec<AuditEntry>,
    /// 各前缀已分配的最大编号
    pub code_sequences: BTreeMap<String, u32>,
}

impl Document {
    pub fn clinic(&self, id: Uuid) -> Option<&Clinic> {
        self.clinics.iter().find(|c| c.id == id)
    }

    pub fn scan(&self, id: Uuid) -> Option<&Scan> {
        self.scans.iter().find(|s| s.id == id)
    }

    pub fn scan_mut(&mut self, id: Uuid) -> Option<&mut Scan> {
        self.scans.iter_mut().find(|s| s.id == id)
    }

    pub fn case(&self, id: Uuid) -> Option<&Case> {
        self.cases.iter().find(|c| c.id == id)
    }

    pub fn case_mut(&mut self, id: Uuid) -> Option<&mut Case> {
        self.cases.iter_mut().find(|c| c.id == id)
    }

    pub fn case_by_code(&self, treatment_code: &str) -> Option<&Case> {
        self.cases.iter().find(|c| c.treatment_code == treatment_code)
    }

    pub fn lab_item(&self, id: Uuid) -> Option<&LabItem> {
        self.lab_items.iter().find(|i| i.id == id)
    }

    pub fn lab_item_mut(&mut self, id: Uuid) -> Option<&mut LabItem> {
        self.lab_items.iter_mut().find(|i| i.id == id)
    }

    pub fn lab_items_for_case(&self, case_id: Uuid) -> impl Iterator<Item = &LabItem> {
        self.lab_items.iter().filter(move |i| i.case_id == case_id)
    }
}
