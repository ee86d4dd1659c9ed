//! 通用工具函数
//!
//! 病例编号 (`A-0001`) 与订单编号 (`A-0001/3`) 的解析与分配。
//! 分配以全量扫描为准，并与文档中持久化的最大值比较，已删除记录的编号不会被复用。

use crate::error::{LabError, Result};
use crate::models::Document;
use chrono::{Duration, NaiveDate};

/// 编号上限（4位）
pub const MAX_TREATMENT_SEQUENCE: u32 = 9999;

/// 病例编号前缀
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodePrefix {
    /// 实验室自有诊所
    Internal,
    /// 外部诊所
    External,
}

impl CodePrefix {
    pub fn for_clinic(internal: bool) -> Self {
        if internal {
            CodePrefix::Internal
        } else {
            CodePrefix::External
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            CodePrefix::Internal => 'A',
            CodePrefix::External => 'C',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            'A' => Some(CodePrefix::Internal),
            'C' => Some(CodePrefix::External),
            _ => None,
        }
    }

    fn sequence_key(&self) -> String {
        self.as_char().to_string()
    }
}

/// 解析病例编号，格式 `^[AC]-\d{4}$`
pub fn parse_treatment_code(code: &str) -> Option<(CodePrefix, u32)> {
    let mut chars = code.chars();
    let prefix = CodePrefix::from_char(chars.next()?)?;
    if chars.next()? != '-' {
        return None;
    }
    let digits = chars.as_str();
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|n| (prefix, n))
}

pub fn is_valid_treatment_code(code: &str) -> bool {
    parse_treatment_code(code).is_some()
}

pub fn format_treatment_code(prefix: CodePrefix, sequence: u32) -> String {
    format!("{}-{:04}", prefix.as_char(), sequence)
}

/// 解析订单编号，格式 `^[AC]-\d{4}/\d+$`
pub fn parse_request_code(code: &str) -> Option<(&str, u32)> {
    let (treatment_code, sequence) = code.split_once('/')?;
    if !is_valid_treatment_code(treatment_code)
        || sequence.is_empty()
        || !sequence.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    sequence.parse().ok().map(|n| (treatment_code, n))
}

pub fn is_valid_request_code(code: &str) -> bool {
    parse_request_code(code).is_some()
}

/// 下一个可用的病例编号序号，不修改文档
pub fn next_treatment_sequence(document: &Document, prefix: CodePrefix) -> u32 {
    let existing = document
        .cases
        .iter()
        .map(|c| c.treatment_code.as_str())
        .chain(
            document
                .scans
                .iter()
                .filter_map(|s| s.service_order_code.as_deref()),
        )
        .filter_map(parse_treatment_code)
        .filter(|(p, _)| *p == prefix)
        .map(|(_, n)| n)
        .max()
        .unwrap_or(0);
    let high_water = document
        .code_sequences
        .get(&prefix.sequence_key())
        .copied()
        .unwrap_or(0);

    existing.max(high_water) + 1
}

/// 分配病例编号并记录最大值
pub fn allocate_treatment_code(document: &mut Document, prefix: CodePrefix) -> Result<String> {
    let sequence = next_treatment_sequence(document, prefix);
    if sequence > MAX_TREATMENT_SEQUENCE {
        return Err(LabError::Precondition(format!(
            "前缀 {} 的病例编号已用尽",
            prefix.as_char()
        )));
    }
    document.code_sequences.insert(prefix.sequence_key(), sequence);
    Ok(format_treatment_code(prefix, sequence))
}

/// 记录外部提供的编号，使之后的分配跳过它
pub fn reserve_treatment_code(document: &mut Document, code: &str) {
    if let Some((prefix, sequence)) = parse_treatment_code(code) {
        let entry = document.code_sequences.entry(prefix.sequence_key()).or_insert(0);
        *entry = (*entry).max(sequence);
    }
}

/// 某病例下一个订单序号
pub fn next_request_sequence(document: &Document, treatment_code: &str) -> u32 {
    let existing = document
        .lab_items
        .iter()
        .filter_map(|item| item.request_code.as_deref())
        .filter_map(parse_request_code)
        .filter(|(code, _)| *code == treatment_code)
        .map(|(_, n)| n)
        .max()
        .unwrap_or(0);
    let high_water = document
        .code_sequences
        .get(treatment_code)
        .copied()
        .unwrap_or(0);

    existing.max(high_water) + 1
}

/// 分配订单编号 `treatmentCode/N`
pub fn allocate_request_code(document: &mut Document, treatment_code: &str) -> String {
    let sequence = next_request_sequence(document, treatment_code);
    document
        .code_sequences
        .insert(treatment_code.to_string(), sequence);
    format!("{}/{}", treatment_code, sequence)
}

/// 牙套到期日 = 扫描日期 + 编号 × 更换间隔
pub fn tray_due_date(scan_date: NaiveDate, tray_number: u32, change_every_days: u32) -> NaiveDate {
    scan_date + Duration::days(i64::from(tray_number) * i64::from(change_every_days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Arch, Case, CasePhase, ProductType, Scan, ScanStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn case_with_code(code: &str) -> Case {
        let now = Utc::now();
        Case {
            id: Uuid::new_v4(),
            treatment_code: code.to_string(),
            patient_id: Uuid::new_v4(),
            dentist_id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            scan_id: None,
            product_type: ProductType::Alinhador,
            arch: Arch::Ambos,
            total_trays: Some(10),
            total_trays_upper: None,
            total_trays_lower: None,
            change_every_days: 15,
            phase: CasePhase::Planejamento,
            budget: None,
            contract: None,
            trays: Vec::new(),
            delivery_lots: Vec::new(),
            installation: None,
            scan_files: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn scan_with_code(code: Option<&str>) -> Scan {
        let now = Utc::now();
        Scan {
            id: Uuid::new_v4(),
            service_order_code: code.map(str::to_string),
            patient_id: Uuid::new_v4(),
            dentist_id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            scan_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            arch: Arch::Ambos,
            complaint: None,
            guidance: None,
            attachments: Vec::new(),
            status: ScanStatus::Pendente,
            linked_case_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_parse_treatment_code() {
        assert_eq!(parse_treatment_code("A-0042"), Some((CodePrefix::Internal, 42)));
        assert_eq!(parse_treatment_code("C-1000"), Some((CodePrefix::External, 1000)));
        assert!(parse_treatment_code("B-0001").is_none());
        assert!(parse_treatment_code("A-001").is_none());
        assert!(parse_treatment_code("A-00011").is_none());
        assert!(parse_treatment_code("A0001").is_none());
        assert!(parse_treatment_code("A-00x1").is_none());
    }

    #[test]
    fn test_parse_request_code() {
        assert_eq!(parse_request_code("C-0003/12"), Some(("C-0003", 12)));
        assert!(parse_request_code("C-0003/").is_none());
        assert!(parse_request_code("C-0003").is_none());
        assert!(parse_request_code("X-0003/1").is_none());
    }

    #[test]
    fn test_allocation_takes_max_across_cases_and_scans() {
        let mut doc = Document::default();
        doc.cases.push(case_with_code("C-0001"));
        doc.cases.push(case_with_code("C-0007"));
        doc.scans.push(scan_with_code(Some("C-0009")));
        doc.scans.push(scan_with_code(Some("A-0050")));
        doc.scans.push(scan_with_code(None));

        assert_eq!(allocate_treatment_code(&mut doc, CodePrefix::External).unwrap(), "C-0010");
        assert_eq!(allocate_treatment_code(&mut doc, CodePrefix::Internal).unwrap(), "A-0051");
    }

    #[test]
    fn test_allocation_never_reuses_removed_numbers() {
        let mut doc = Document::default();
        doc.scans.push(scan_with_code(Some("C-0004")));
        assert_eq!(allocate_treatment_code(&mut doc, CodePrefix::External).unwrap(), "C-0005");

        doc.scans.clear();
        assert_eq!(allocate_treatment_code(&mut doc, CodePrefix::External).unwrap(), "C-0006");
    }

    #[test]
    fn test_allocation_exhausted() {
        let mut doc = Document::default();
        doc.cases.push(case_with_code("A-9999"));
        assert!(allocate_treatment_code(&mut doc, CodePrefix::Internal).is_err());
    }

    #[test]
    fn test_reserve_external_code() {
        let mut doc = Document::default();
        reserve_treatment_code(&mut doc, "C-0120");
        assert_eq!(next_treatment_sequence(&doc, CodePrefix::External), 121);
        reserve_treatment_code(&mut doc, "C-0002");
        assert_eq!(next_treatment_sequence(&doc, CodePrefix::External), 121);
    }

    #[test]
    fn test_request_code_sequence() {
        let mut doc = Document::default();
        assert_eq!(allocate_request_code(&mut doc, "C-0001"), "C-0001/1");
        assert_eq!(allocate_request_code(&mut doc, "C-0001"), "C-0001/2");
        assert_eq!(allocate_request_code(&mut doc, "C-0002"), "C-0002/1");
        assert!(is_valid_request_code("C-0001/2"));
    }

    #[test]
    fn test_tray_due_date() {
        let scan_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(tray_due_date(scan_date, 2, 7), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(tray_due_date(scan_date, 0, 7), scan_date);
    }
}
