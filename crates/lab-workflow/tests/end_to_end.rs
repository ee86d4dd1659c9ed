use chrono::{Duration, NaiveDate};
use lab_core::{Arch, AttachmentKind, CasePhase, LabError, LabStatus, RequestKind, ScanStatus, TrayState};
use lab_storage::StateStore;
use lab_workflow::{
    GenerateLabOrder, LabWorkflowEngine, NewAttachment, NewCaseFromScan, NewDeliveryLot, NewScan, WorkflowSettings,
};

fn scan_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()
}

fn files() -> Vec<NewAttachment> {
    vec![
        NewAttachment::remote(AttachmentKind::Scan3d, "arcadas.stl", "https://files.lab/arcadas.stl")
            .with_arch(Arch::Ambos),
        NewAttachment::remote(AttachmentKind::FotoIntra, "oclusal.jpg", "https://files.lab/oclusal.jpg"),
        NewAttachment::remote(AttachmentKind::FotoExtra, "sorriso.jpg", "https://files.lab/sorriso.jpg"),
    ]
}

async fn seeded_case(engine: &LabWorkflowEngine) -> lab_core::Case {
    let registry = engine.registry();
    let clinic = registry.add_clinic("Laboratório Próprio", true).await.unwrap();
    let dentist = registry.add_dentist("Dr. Rafael Lima", Some(clinic.id), None).await.unwrap();
    let patient = registry.add_patient("Beatriz Nunes", None).await.unwrap();

    let intake = engine.scan_intake();
    let scan = intake
        .create_scan(NewScan {
            patient_id: patient.id,
            dentist_id: dentist.id,
            clinic_id: clinic.id,
            scan_date: scan_date(),
            arch: Arch::Ambos,
            complaint: None,
            guidance: None,
            service_order_code: None,
            attachments: files(),
        })
        .await
        .unwrap();
    intake.set_scan_status(scan.id, ScanStatus::Aprovado).await.unwrap();
    intake
        .create_case_from_scan(scan.id, NewCaseFromScan::aligner(20, 7))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_twenty_tray_case_end_to_end() {
    let engine = LabWorkflowEngine::new(StateStore::in_memory(), WorkflowSettings::default());
    let case = seeded_case(&engine).await;
    assert_eq!(case.treatment_code, "A-0001");
    assert_eq!(case.trays.len(), 20);

    let bank = engine.replacement_bank();
    assert_eq!(bank.ensure_replacement_bank_for_case(case.id).await.unwrap(), 40);
    assert_eq!(bank.ensure_replacement_bank_for_case(case.id).await.unwrap(), 0);

    let cases = engine.cases();
    cases.start_budget(case.id).await.unwrap();
    cases.close_budget(case.id, 5400.0).await.unwrap();
    cases.approve_contract(case.id, Some("Gestão".to_string())).await.unwrap();

    // 交付前必须先有生产订单
    let lot = NewDeliveryLot::new(Arch::Ambos, 1, 1, scan_date());
    let item = cases
        .generate_lab_order(case.id, GenerateLabOrder::trays(1, 1, 1, scan_date()))
        .await
        .unwrap();
    assert_eq!(item.request_code.as_deref(), Some("A-0001/1"));
    assert_eq!(item.status, LabStatus::EmProducao);

    cases.set_tray_state(case.id, 1, TrayState::Pronta).await.unwrap();
    cases.set_tray_state(case.id, 1, TrayState::Entregue).await.unwrap();
    cases.register_case_delivery_lot(case.id, lot).await.unwrap();

    let err = cases.set_tray_state(case.id, 1, TrayState::EmProducao).await.unwrap_err();
    assert!(matches!(err, LabError::TrayRegression { tray: 1, .. }));

    // 2 号牙套保持待生产
    let stored = cases.get_case(case.id).await.unwrap().unwrap();
    assert_eq!(stored.phase, CasePhase::EmProducao);
    let tray_2 = stored.tray(2).unwrap().clone();
    assert_eq!(tray_2.state, TrayState::Pendente);
    assert_eq!(tray_2.due_date, scan_date() + Duration::days(14));

    let pipeline = engine.lab_orders();
    let before_due = pipeline
        .generate_programmed_replenishments(tray_2.due_date - Duration::days(1))
        .await
        .unwrap();
    assert!(before_due.is_empty());

    let after_due = pipeline
        .generate_programmed_replenishments(tray_2.due_date + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(after_due.len(), 1);
    assert_eq!(after_due[0].tray_number, 2);
    assert_eq!(after_due[0].request_kind, RequestKind::ReposicaoProgramada);

    // 重复生成不会产生新订单
    assert!(pipeline
        .generate_programmed_replenishments(tray_2.due_date + Duration::days(1))
        .await
        .unwrap()
        .is_empty());

    // 2 号牙套进入生产后不能回到待生产
    cases.set_tray_state(case.id, 2, TrayState::EmProducao).await.unwrap();
    let err = cases.set_tray_state(case.id, 2, TrayState::Pendente).await.unwrap_err();
    assert!(matches!(err, LabError::TrayRegression { tray: 2, .. }));

    let summary = bank.get_replacement_bank_summary(case.id).await.unwrap();
    assert_eq!(summary.contracted_total, 40);
    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.produced_or_delivered, 4);
    assert_eq!(summary.balance, 36);
}

#[tokio::test]
async fn test_json_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lab.json");

    let engine = LabWorkflowEngine::new(StateStore::json_file(&path), WorkflowSettings::default());
    let case = seeded_case(&engine).await;

    let reopened = LabWorkflowEngine::new(StateStore::json_file(&path), WorkflowSettings::default());
    let stored = reopened.cases().find_by_code("A-0001").await.unwrap().unwrap();
    assert_eq!(stored.id, case.id);
    assert_eq!(stored.trays.len(), 20);

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["cases"][0]["treatmentCode"], "A-0001");
    assert_eq!(raw["cases"][0]["phase"], "planejamento");
    assert_eq!(raw["scans"][0]["status"], "convertido");
}
