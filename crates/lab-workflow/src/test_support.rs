//! 测试夹具

use crate::case_lifecycle::{GenerateLabOrder, NewDeliveryLot};
use crate::engine::{LabWorkflowEngine, WorkflowSettings};
use crate::scan_intake::{NewAttachment, NewCaseFromScan, NewScan};
use chrono::NaiveDate;
use lab_core::{
    Arch, AttachmentKind, Case, CasePhase, Clinic, Dentist, Jaw, Patient, ProductType, Scan, ScanStatus,
};
use lab_storage::StateStore;

pub(crate) struct Fixture {
    pub engine: LabWorkflowEngine,
    pub clinic: Clinic,
    pub dentist: Dentist,
    pub patient: Patient,
}

pub(crate) fn scan_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

/// 两个3D模型、两张口内照片、一张口外照片
pub(crate) fn complete_files() -> Vec<NewAttachment> {
    vec![
        NewAttachment::remote(AttachmentKind::Scan3d, "superior.stl", "https://files.lab/superior.stl")
            .with_arch(Arch::Superior),
        NewAttachment::remote(AttachmentKind::Scan3d, "inferior.stl", "https://files.lab/inferior.stl")
            .with_arch(Arch::Inferior),
        NewAttachment::remote(AttachmentKind::FotoIntra, "frontal.jpg", "https://files.lab/frontal.jpg")
            .with_slot("frontal"),
        NewAttachment::remote(AttachmentKind::FotoExtra, "perfil.jpg", "https://files.lab/perfil.jpg")
            .with_slot("perfil"),
        NewAttachment::remote(AttachmentKind::FotoIntra, "lateral.jpg", "https://files.lab/lateral.jpg")
            .with_slot("lateral_direita"),
    ]
}

pub(crate) async fn fixture(internal: bool) -> Fixture {
    let engine = LabWorkflowEngine::new(StateStore::in_memory(), WorkflowSettings::default());
    let clinic = engine.registry().add_clinic("Clínica Centro", internal).await.unwrap();
    let dentist = engine
        .registry()
        .add_dentist("Dra. Helena Prado", Some(clinic.id), None)
        .await
        .unwrap();
    let patient = engine.registry().add_patient("Marcos Teixeira", None).await.unwrap();
    Fixture {
        engine,
        clinic,
        dentist,
        patient,
    }
}

fn unit_quantities(arch: Arch) -> (u32, u32) {
    (
        u32::from(arch.includes(Jaw::Superior)),
        u32::from(arch.includes(Jaw::Inferior)),
    )
}

impl Fixture {
    pub fn new_scan(&self, arch: Arch, attachments: Vec<NewAttachment>) -> NewScan {
        NewScan {
            patient_id: self.patient.id,
            dentist_id: self.dentist.id,
            clinic_id: self.clinic.id,
            scan_date: scan_date(),
            arch,
            complaint: Some("apinhamento anterior".to_string()),
            guidance: None,
            service_order_code: None,
            attachments,
        }
    }

    pub async fn approved_scan(&self, arch: Arch, attachments: Vec<NewAttachment>) -> Scan {
        let intake = self.engine.scan_intake();
        let scan = intake.create_scan(self.new_scan(arch, attachments)).await.unwrap();
        intake.set_scan_status(scan.id, ScanStatus::Aprovado).await.unwrap()
    }

    pub async fn case_in_planning(&self, arch: Arch, total_trays: u32, change_every_days: u32) -> Case {
        let scan = self.approved_scan(arch, complete_files()).await;
        self.engine
            .scan_intake()
            .create_case_from_scan(scan.id, NewCaseFromScan::aligner(total_trays, change_every_days))
            .await
            .unwrap()
    }

    pub async fn case_with_counts(&self, arch: Arch, upper: Option<u32>, lower: Option<u32>) -> Case {
        let scan = self.approved_scan(arch, complete_files()).await;
        let payload = NewCaseFromScan {
            product_type: ProductType::Alinhador,
            arch: None,
            total_trays: None,
            total_trays_upper: upper,
            total_trays_lower: lower,
            change_every_days: Some(7),
        };
        self.engine
            .scan_intake()
            .create_case_from_scan(scan.id, payload)
            .await
            .unwrap()
    }

    async fn advance_to_contract(&self, case: Case) -> Case {
        let cases = self.engine.cases();
        cases.start_budget(case.id).await.unwrap();
        cases.close_budget(case.id, 3200.0).await.unwrap();
        cases.approve_contract(case.id, None).await.unwrap()
    }

    pub async fn case_in_contract(&self, arch: Arch, total_trays: u32, change_every_days: u32) -> Case {
        let case = self.case_in_planning(arch, total_trays, change_every_days).await;
        self.advance_to_contract(case).await
    }

    /// 合同已批准并为 1 号牙套生成了生产订单
    pub async fn case_in_production(&self, arch: Arch, total_trays: u32, change_every_days: u32) -> Case {
        let case = self.case_in_contract(arch, total_trays, change_every_days).await;
        self.start_first_tray(case).await
    }

    async fn start_first_tray(&self, case: Case) -> Case {
        let (upper, lower) = unit_quantities(case.arch);
        self.engine
            .cases()
            .generate_lab_order(case.id, GenerateLabOrder::trays(1, upper, lower, scan_date()))
            .await
            .unwrap();
        self.engine.cases().get_case(case.id).await.unwrap().unwrap()
    }

    /// 把 1 号牙套交付给牙医
    pub async fn deliver_first_tray(&self, case: Case) -> Case {
        let mut case = case;
        if case.phase < CasePhase::ContratoAprovado {
            case = self.advance_to_contract(case).await;
        }
        if case.phase == CasePhase::ContratoAprovado {
            case = self.start_first_tray(case).await;
        }
        self.engine
            .cases()
            .register_case_delivery_lot(case.id, NewDeliveryLot::new(case.arch, 1, 1, scan_date()))
            .await
            .unwrap();
        self.engine.cases().get_case(case.id).await.unwrap().unwrap()
    }

    pub async fn case_with_delivered_first_tray(&self, arch: Arch, total_trays: u32, change_every_days: u32) -> Case {
        let case = self.case_in_planning(arch, total_trays, change_every_days).await;
        self.deliver_first_tray(case).await
    }
}
