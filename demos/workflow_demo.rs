//! 工作流引擎演示程序
//!
//! 从口扫接收、病例转换、生产订单到交付、返工和计划补货的完整流程

use chrono::{Duration, NaiveDate};
use lab_core::{Arch, AttachmentKind, Jaw, LabStatus, ScanStatus};
use lab_storage::StateStore;
use lab_workflow::{
    AdvanceQuantities, GenerateLabOrder, LabWorkflowEngine, NewAttachment, NewCaseFromScan, NewDeliveryLot,
    NewInstallation, NewScan, ReworkRequest, WorkflowSettings,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    let engine = LabWorkflowEngine::new(StateStore::in_memory(), WorkflowSettings::default());
    let scan_date = NaiveDate::from_ymd_opt(2024, 6, 3).ok_or_else(|| anyhow::anyhow!("无效日期"))?;

    println!("🚀 隐形矫治器实验室工作流演示\n");

    // 1. 基础数据
    let registry = engine.registry();
    let clinic = registry.add_clinic("Clínica Sorriso", false).await?;
    let dentist = registry.add_dentist("Dra. Carla Mendes", Some(clinic.id), None).await?;
    let patient = registry.add_patient("João Pereira", None).await?;
    println!("✅ 诊所、牙医和患者已登记");

    // 2. 口扫接收与审核
    let intake = engine.scan_intake();
    let scan = intake
        .create_scan(NewScan {
            patient_id: patient.id,
            dentist_id: dentist.id,
            clinic_id: clinic.id,
            scan_date,
            arch: Arch::Ambos,
            complaint: Some("diastema superior".to_string()),
            guidance: None,
            service_order_code: None,
            attachments: sample_attachments(),
        })
        .await?;
    println!(
        "✅ 口扫已接收，服务单号 {}",
        scan.service_order_code.as_deref().unwrap_or("-")
    );
    intake.set_scan_status(scan.id, ScanStatus::Aprovado).await?;

    // 3. 转换为病例
    let case = intake
        .create_case_from_scan(scan.id, NewCaseFromScan::aligner(12, 10))
        .await?;
    println!("✅ 病例 {} 已创建，共 {} 个牙套", case.treatment_code, case.trays.len());

    // 4. 报价和合同
    let cases = engine.cases();
    cases.start_budget(case.id).await?;
    cases.close_budget(case.id, 4800.0).await?;
    cases.approve_contract(case.id, Some("Comercial".to_string())).await?;
    println!("✅ 合同已批准");

    // 5. 生产 1 号牙套
    let order = cases
        .generate_lab_order(case.id, GenerateLabOrder::trays(1, 1, 1, scan_date))
        .await?;
    let pipeline = engine.lab_orders();
    pipeline.move_lab_item(order.id, LabStatus::ControleQualidade).await?;
    pipeline.move_lab_item(order.id, LabStatus::Prontas).await?;
    println!(
        "✅ 生产订单 {} 已完成",
        order.request_code.as_deref().unwrap_or("-")
    );

    // 6. 交付与安装
    cases
        .register_case_delivery_lot(case.id, NewDeliveryLot::new(Arch::Ambos, 1, 1, scan_date + Duration::days(2)))
        .await?;
    cases
        .register_case_installation(case.id, NewInstallation::new(1, 1, scan_date + Duration::days(5)))
        .await?;
    println!("✅ 1 号牙套已交付并安装");

    // 7. 返工
    let rework = cases
        .handle_rework(case.id, ReworkRequest::new(1, Jaw::Superior, order.id, "borda fraturada"))
        .await?;
    println!("⚠️  返工订单已创建: {}", rework.notes.as_deref().unwrap_or_default());

    // 8. 计划补货与提前生产
    let stored = cases.get_case(case.id).await?.ok_or_else(|| anyhow::anyhow!("病例丢失"))?;
    let today = stored.tray(2).map(|t| t.due_date).unwrap_or(scan_date) + Duration::days(1);
    let replenishments = pipeline.generate_programmed_replenishments(today).await?;
    println!("📦 生成计划补货订单 {} 个", replenishments.len());
    if let Some(first) = replenishments.first() {
        let advanced = pipeline
            .create_advance_lab_order(
                first.id,
                AdvanceQuantities {
                    planned_upper: 1,
                    planned_lower: 1,
                    ..Default::default()
                },
            )
            .await?;
        println!(
            "📦 2 号牙套提前生产: {}",
            advanced.request_code.as_deref().unwrap_or("-")
        );
    }

    // 9. 汇总
    let summary = engine.replacement_bank().get_replacement_bank_summary(case.id).await?;
    println!("\n📊 替换库存: {}", serde_json::to_string_pretty(&summary)?);

    let overview = engine.system_overview(today).await?;
    println!("📊 系统概览: {}", serde_json::to_string_pretty(&overview)?);

    println!("\n📝 最近的审计记录:");
    for entry in engine.audit().recent(5).await? {
        println!("  - [{}] {}", entry.action, entry.message);
    }

    Ok(())
}

fn sample_attachments() -> Vec<NewAttachment> {
    vec![
        NewAttachment::remote(AttachmentKind::Scan3d, "superior.stl", "https://files.lab/superior.stl")
            .with_arch(Arch::Superior),
        NewAttachment::remote(AttachmentKind::Scan3d, "inferior.stl", "https://files.lab/inferior.stl")
            .with_arch(Arch::Inferior),
        NewAttachment::remote(AttachmentKind::FotoIntra, "frontal.jpg", "https://files.lab/frontal.jpg")
            .with_slot("frontal"),
        NewAttachment::remote(AttachmentKind::FotoExtra, "perfil.jpg", "https://files.lab/perfil.jpg")
            .with_slot("perfil"),
    ]
}
