//! 状态机
//!
//! 病例阶段、牙套状态和生产订单状态三个状态机，所有转换规则集中在这里校验。

use chrono::{DateTime, Utc};
use lab_core::{CasePhase, LabError, LabStatus, Result, Tray, TrayState};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// 病例阶段转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CaseEvent {
    StartBudget,
    CloseBudget,
    ApproveContract,
    StartProduction,
    Finish,
}

impl fmt::Display for CaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaseEvent::StartBudget => "start_budget",
            CaseEvent::CloseBudget => "close_budget",
            CaseEvent::ApproveContract => "approve_contract",
            CaseEvent::StartProduction => "start_production",
            CaseEvent::Finish => "finish",
        };
        f.write_str(name)
    }
}

/// 病例阶段状态机
#[derive(Debug, Clone)]
pub struct CaseStateMachine {
    transitions: HashMap<(CasePhase, CaseEvent), CasePhase>,
}

impl CaseStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((CasePhase::Planejamento, CaseEvent::StartBudget), CasePhase::Orcamento);
        transitions.insert((CasePhase::Orcamento, CaseEvent::CloseBudget), CasePhase::ContratoPendente);
        transitions.insert((CasePhase::ContratoPendente, CaseEvent::ApproveContract), CasePhase::ContratoAprovado);
        transitions.insert((CasePhase::ContratoAprovado, CaseEvent::StartProduction), CasePhase::EmProducao);
        transitions.insert((CasePhase::EmProducao, CaseEvent::Finish), CasePhase::Finalizado);

        Self { transitions }
    }

    pub fn can_transition(&self, from: CasePhase, event: CaseEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    pub fn transition(&self, from: CasePhase, event: CaseEvent) -> Result<CasePhase> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| LabError::InvalidStateTransition {
                from: from.to_string(),
                to: event.to_string(),
            })
    }

    /// 某阶段可触发的事件
    pub fn possible_events(&self, current: CasePhase) -> Vec<CaseEvent> {
        self.transitions
            .keys()
            .filter(|(phase, _)| *phase == current)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for CaseStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 牙套状态转换结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayTransition {
    Unchanged,
    Advanced,
}

/// 牙套状态机：只允许前进一步，禁止回退
#[derive(Debug, Clone, Copy, Default)]
pub struct TrayStateMachine;

impl TrayStateMachine {
    pub fn validate(&self, tray_number: u32, from: TrayState, to: TrayState) -> Result<TrayTransition> {
        if from == to {
            return Ok(TrayTransition::Unchanged);
        }
        if to < from {
            return Err(LabError::TrayRegression {
                tray: tray_number,
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if from.next() == Some(to) {
            Ok(TrayTransition::Advanced)
        } else {
            Err(LabError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// 操作员设置牙套状态
    pub fn apply(&self, tray: &mut Tray, to: TrayState, now: DateTime<Utc>) -> Result<TrayTransition> {
        let transition = self.validate(tray.tray_number, tray.state, to)?;
        if transition == TrayTransition::Advanced {
            tray.state = to;
            tray.updated_at = Some(now);
        }
        Ok(transition)
    }

    /// 系统逐步推进到至少 `target`，已达到或超过时不变
    pub fn raise(&self, tray: &mut Tray, target: TrayState, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        while tray.state < target {
            match tray.state.next() {
                Some(next) => {
                    tray.state = next;
                    changed = true;
                }
                None => break,
            }
        }
        if changed {
            tray.updated_at = Some(now);
        }
        changed
    }
}

/// 生产订单状态机
#[derive(Debug, Clone)]
pub struct LabStatusMachine {
    transitions: HashSet<(LabStatus, LabStatus)>,
}

impl LabStatusMachine {
    pub fn new() -> Self {
        let mut transitions = HashSet::new();

        transitions.insert((LabStatus::AguardandoIniciar, LabStatus::EmProducao));
        transitions.insert((LabStatus::EmProducao, LabStatus::ControleQualidade));
        transitions.insert((LabStatus::ControleQualidade, LabStatus::Prontas));
        // 质检不合格退回生产
        transitions.insert((LabStatus::ControleQualidade, LabStatus::EmProducao));

        Self { transitions }
    }

    pub fn can_move(&self, from: LabStatus, to: LabStatus) -> bool {
        from == to || self.transitions.contains(&(from, to))
    }

    /// 返回状态是否发生变化
    pub fn validate(&self, from: LabStatus, to: LabStatus) -> Result<bool> {
        if from == to {
            return Ok(false);
        }
        if self.transitions.contains(&(from, to)) {
            Ok(true)
        } else {
            Err(LabError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl Default for LabStatusMachine {
    fn default() -> Self {
        Self::new()
    }
}
