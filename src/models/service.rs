//! Service tracking models

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use super::wire;

/// Label shown while no employee or centre has been assigned.
pub const NOT_ASSIGNED: &str = "Not Assigned";

/// Lifecycle status of a service record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl ServiceStatus {
    /// Parse any of the spellings the backend uses (`IN_PROGRESS`,
    /// `In Progress`, `in-progress`, ...).
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        match normalized.as_str() {
            "pending" | "scheduled" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "in_progress" | "started" => Some(Self::InProgress),
            "completed" | "done" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ServiceStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(Self::parse(&raw).unwrap_or_else(|| {
            tracing::warn!("Unknown service status {:?}, treating as pending", raw);
            Self::Pending
        }))
    }
}

/// Geographic position of a service centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Service centre as listed by the backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCenter {
    pub name: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl ServiceCenter {
    pub fn location(&self) -> Option<GeoLocation> {
        Some(GeoLocation {
            latitude: self.latitude?,
            longitude: self.longitude?,
        })
    }
}

/// Appointment summary as returned by `GET /slot-appointments`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentSummary {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(default)]
    pub vehicle_name: Option<String>,
    #[serde(default)]
    pub vehicle_make: Option<String>,
    #[serde(default)]
    pub vehicle_model: Option<String>,
    #[serde(default, alias = "vehicleNumber")]
    pub license_plate: Option<String>,
    #[serde(default, alias = "serviceName")]
    pub service_type: Option<String>,
    pub status: ServiceStatus,
    #[serde(default, alias = "appointmentDate", alias = "date")]
    pub start_date: Option<String>,
    #[serde(default)]
    pub estimated_completion: Option<String>,
    #[serde(default, alias = "employeeName")]
    pub assigned_employee: Option<String>,
    #[serde(default, alias = "serviceCenterName", alias = "centerName")]
    pub service_center: Option<String>,
    #[serde(default)]
    pub center_slot: Option<String>,
}

impl AppointmentSummary {
    fn vehicle_label(&self) -> String {
        if let Some(name) = self.vehicle_name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let parts: Vec<&str> = [self.vehicle_make.as_deref(), self.vehicle_model.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            "Unknown vehicle".to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// Client-side projection of one appointment ("service").
///
/// Created by the initial list fetch and then only mutated by merging
/// `ServiceUpdate` patches; cancellation is a status, never a removal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub id: String,
    pub vehicle_name: String,
    pub license_plate: String,
    pub service_type: String,
    pub status: ServiceStatus,
    pub start_date: Option<String>,
    pub estimated_completion: Option<String>,
    pub assigned_employee: String,
    pub service_center: String,
    pub center_slot: Option<String>,
    pub location: Option<GeoLocation>,
}

fn label_or_unassigned(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(NOT_ASSIGNED)
        .to_string()
}

impl ServiceRecord {
    /// Project a backend summary. Location is filled in by enrichment.
    pub fn from_summary(summary: &AppointmentSummary) -> Self {
        Self {
            id: summary.id.clone(),
            vehicle_name: summary.vehicle_label(),
            license_plate: summary.license_plate.clone().unwrap_or_default(),
            service_type: summary
                .service_type
                .clone()
                .unwrap_or_else(|| "General service".to_string()),
            status: summary.status,
            start_date: summary.start_date.clone(),
            estimated_completion: summary.estimated_completion.clone(),
            assigned_employee: label_or_unassigned(summary.assigned_employee.as_deref()),
            service_center: label_or_unassigned(summary.service_center.as_deref()),
            center_slot: summary.center_slot.clone(),
            location: None,
        }
    }

    /// New record with only the fields present in `update` overwritten.
    pub fn merged(&self, update: &ServiceUpdate) -> Self {
        let mut next = self.clone();
        if let Some(status) = update.status {
            next.status = status;
        }
        if let Some(ref employee) = update.assigned_employee {
            next.assigned_employee = label_or_unassigned(Some(employee));
        }
        if let Some(ref center) = update.service_center {
            next.service_center = label_or_unassigned(Some(center));
        }
        if let Some(ref slot) = update.center_slot {
            next.center_slot = Some(slot.clone());
        }
        if let Some(ref eta) = update.estimated_completion {
            next.estimated_completion = Some(eta.clone());
        }
        next
    }
}

/// Partial patch pushed over the event stream, keyed by record id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUpdate {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(default)]
    pub status: Option<ServiceStatus>,
    #[serde(default)]
    pub assigned_employee: Option<String>,
    #[serde(default)]
    pub service_center: Option<String>,
    #[serde(default)]
    pub center_slot: Option<String>,
    #[serde(default)]
    pub estimated_completion: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_record() -> ServiceRecord {
        let summary: AppointmentSummary = serde_json::from_str(
            r#"{"id": "A1", "vehicleMake": "Toyota", "vehicleModel": "Corolla",
                "licensePlate": "KA-01-1234", "serviceType": "Oil change",
                "status": "PENDING", "appointmentDate": "2024-06-01"}"#,
        )
        .unwrap();
        ServiceRecord::from_summary(&summary)
    }

    #[test]
    fn test_status_spellings() {
        assert_eq!(ServiceStatus::parse("IN_PROGRESS"), Some(ServiceStatus::InProgress));
        assert_eq!(ServiceStatus::parse("In Progress"), Some(ServiceStatus::InProgress));
        assert_eq!(ServiceStatus::parse("in-progress"), Some(ServiceStatus::InProgress));
        assert_eq!(ServiceStatus::parse("Canceled"), Some(ServiceStatus::Cancelled));
        assert_eq!(ServiceStatus::parse("warp"), None);
    }

    #[test]
    fn test_summary_projection() {
        let record = pending_record();
        assert_eq!(record.vehicle_name, "Toyota Corolla");
        assert_eq!(record.status, ServiceStatus::Pending);
        assert_eq!(record.assigned_employee, NOT_ASSIGNED);
        assert_eq!(record.service_center, NOT_ASSIGNED);
        assert_eq!(record.start_date.as_deref(), Some("2024-06-01"));
    }

    #[test]
    fn test_status_only_patch_keeps_other_fields() {
        let record = pending_record();
        let update: ServiceUpdate =
            serde_json::from_str(r#"{"id": "A1", "status": "in_progress"}"#).unwrap();

        let next = record.merged(&update);
        assert_eq!(next.status, ServiceStatus::InProgress);
        assert_eq!(next.assigned_employee, NOT_ASSIGNED);
        assert_eq!(next.license_plate, record.license_plate);
        assert_eq!(next.start_date, record.start_date);
    }

    #[test]
    fn test_patch_with_status_and_employee() {
        let record = pending_record();
        let update = ServiceUpdate {
            id: "A1".to_string(),
            status: Some(ServiceStatus::Completed),
            assigned_employee: Some("Jane".to_string()),
            ..Default::default()
        };

        let next = record.merged(&update);
        assert_eq!(next.id, "A1");
        assert_eq!(next.status, ServiceStatus::Completed);
        assert_eq!(next.assigned_employee, "Jane");
        assert_eq!(next.vehicle_name, record.vehicle_name);
        assert_eq!(next.service_type, record.service_type);
        assert_eq!(next.service_center, record.service_center);
        assert_eq!(next.center_slot, record.center_slot);
    }
}
