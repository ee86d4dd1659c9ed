//! 诊所、牙医、患者登记

use crate::audit;
use chrono::{NaiveDate, Utc};
use lab_core::{Actor, AuditEntity, Clinic, Dentist, LabError, Patient, Result};
use lab_storage::StateStore;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Registry {
    store: StateStore,
    actor: Actor,
}

impl Registry {
    pub fn new(store: StateStore, actor: Actor) -> Self {
        Self { store, actor }
    }

    pub async fn add_clinic(&self, name: &str, internal: bool) -> Result<Clinic> {
        let name = required_name(name, "clinic")?;
        let actor = self.actor.clone();
        self.store
            .mutate(move |doc| {
                let clinic = Clinic {
                    id: Uuid::new_v4(),
                    name,
                    internal,
                    created_at: Utc::now(),
                };
                audit::record(doc, &actor, AuditEntity::Clinic, clinic.id, "clinic.created", format!("Clínica {} cadastrada", clinic.name));
                doc.clinics.push(clinic.clone());
                Ok(clinic)
            })
            .await
    }

    pub async fn add_dentist(&self, name: &str, clinic_id: Option<Uuid>, email: Option<String>) -> Result<Dentist> {
        let name = required_name(name, "dentist")?;
        let actor = self.actor.clone();
        self.store
            .mutate(move |doc| {
                if let Some(clinic_id) = clinic_id {
                    if doc.clinic(clinic_id).is_none() {
                        return Err(LabError::not_found("clinic", clinic_id));
                    }
                }
                let dentist = Dentist {
                    id: Uuid::new_v4(),
                    name,
                    clinic_id,
                    email,
                    created_at: Utc::now(),
                };
                audit::record(doc, &actor, AuditEntity::Dentist, dentist.id, "dentist.created", format!("Dentista {} cadastrado", dentist.name));
                doc.dentists.push(dentist.clone());
                Ok(dentist)
            })
            .await
    }

    pub async fn add_patient(&self, name: &str, birth_date: Option<NaiveDate>) -> Result<Patient> {
        let name = required_name(name, "patient")?;
        let actor = self.actor.clone();
        self.store
            .mutate(move |doc| {
                let patient = Patient {
                    id: Uuid::new_v4(),
                    name,
                    birth_date,
                    created_at: Utc::now(),
                };
                audit::record(doc, &actor, AuditEntity::Patient, patient.id, "patient.created", format!("Paciente {} cadastrado", patient.name));
                doc.patients.push(patient.clone());
                Ok(patient)
            })
            .await
    }

    pub async fn clinics(&self) -> Result<Vec<Clinic>> {
        self.store.read(|doc| doc.clinics.clone()).await
    }
}

fn required_name(name: &str, what: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LabError::validation(format!("{} name is required", what)));
    }
    Ok(name.to_string())
}
