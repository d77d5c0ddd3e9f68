//! Shared production domain types.
//!
//! Orders, shifts, parts and error records travel across the ERP and REST
//! boundaries as JSON; field names follow the external camelCase contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ─── Production orders ──────────────────────────────────────────────

/// Status of a production order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Queued,
    InProgress,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Stable wire name, identical to the serde representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// A manufacturing order, shared across all machine types.
///
/// Invariant: `quantity_completed + quantity_scrap <= quantity`; the order is
/// completed exactly when that sum reaches `quantity`. Mutated only by the
/// machine that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionOrder {
    pub order_id: String,
    pub part_number: String,
    pub part_description: String,
    pub quantity: u32,
    pub quantity_completed: u32,
    pub quantity_scrap: u32,
    pub due_date: DateTime<Utc>,
    pub customer: String,
    /// 1 = Urgent, 2 = High, 3 = Normal, 4 = Low.
    pub priority: u8,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl ProductionOrder {
    /// True once completed plus scrap covers the ordered quantity.
    pub fn is_complete(&self) -> bool {
        self.quantity_completed + self.quantity_scrap >= self.quantity
    }

    /// Order completion as a 0-100 percentage.
    pub fn progress_percent(&self) -> f64 {
        if self.quantity == 0 {
            return 0.0;
        }
        f64::from(self.quantity_completed) / f64::from(self.quantity) * 100.0
    }
}

/// A producible part type with its nominal cycle time.
#[derive(Debug, Clone, Copy)]
pub struct PartDefinition {
    pub part_number: &'static str,
    pub description: &'static str,
    pub cycle_time: Duration,
}

// ─── Parts in flight ────────────────────────────────────────────────

/// Status of a physical part flowing through the production line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartStatus {
    InForming,
    AwaitingPickup,
    InTransit,
    AwaitingWelding,
    BeingWelded,
    Complete,
    Scrap,
}

/// A physical part tracked through the stations of the line.
///
/// A part is owned by the machine currently processing it or by exactly one
/// buffer between stations, never by two holders at once. `location` and
/// `status` must agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Unique part id, e.g. `PART-2026-01-12-0001`.
    pub id: String,
    /// Owning production order.
    pub order_id: String,
    pub status: PartStatus,
    /// Current machine or buffer location.
    pub location: String,

    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forming_complete: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picking_complete: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welding_complete: Option<DateTime<Utc>>,

    // Genealogy - which machines processed this part.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub forming_machine_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub picker_robot_id: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub spot_welder_id: String,

    pub is_scrap: bool,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub scrap_reason: String,
}

impl Part {
    /// New part fresh out of forming, awaiting pickup.
    pub fn new(id: String, order_id: String, machine: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            order_id,
            status: PartStatus::AwaitingPickup,
            location: machine.to_string(),
            created_at: now,
            forming_complete: Some(now),
            picking_complete: None,
            welding_complete: None,
            forming_machine_id: machine.to_string(),
            picker_robot_id: String::new(),
            spot_welder_id: String::new(),
            is_scrap: false,
            scrap_reason: String::new(),
        }
    }
}

// ─── Shifts ─────────────────────────────────────────────────────────

/// Status of a work shift. At most one shift is `Active` at any moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftStatus {
    Upcoming,
    Active,
    Ended,
}

/// A scheduled break within a shift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedBreak {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// `"break"` or `"lunch"`.
    #[serde(rename = "type")]
    pub break_type: String,
}

/// A work shift with its planned breaks. Shifts may span midnight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    /// Identity by calendar day plus shift letter, e.g. `SHIFT-2026-08-02-M`.
    pub shift_id: String,
    pub shift_name: String,
    pub shift_number: u8,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub work_center_id: String,
    pub planned_breaks: Vec<PlannedBreak>,
    pub status: ShiftStatus,
}

// ─── Machine errors ─────────────────────────────────────────────────

/// An active simulated machine error. Present exactly while the machine is in
/// `UnplannedStop`; cleared on recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
    pub expected_end: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_order(quantity: u32) -> ProductionOrder {
        ProductionOrder {
            order_id: "PO-2026-01001".into(),
            part_number: "WLD-FRAME-A01".into(),
            part_description: "Front Frame Assembly".into(),
            quantity,
            quantity_completed: 0,
            quantity_scrap: 0,
            due_date: Utc::now(),
            customer: "AutoCorp Inc.".into(),
            priority: 3,
            status: OrderStatus::Queued,
            started_at: None,
        }
    }

    #[test]
    fn test_order_completion_counts_scrap() {
        let mut order = make_order(3);
        assert!(!order.is_complete());
        order.quantity_completed = 2;
        order.quantity_scrap = 1;
        assert!(order.is_complete());
    }

    #[test]
    fn test_order_json_uses_external_field_names() {
        let order = make_order(10);
        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("orderId").is_some());
        assert!(json.get("quantityCompleted").is_some());
        assert_eq!(json["status"], "QUEUED");
    }

    #[test]
    fn test_part_status_serialization() {
        let json = serde_json::to_value(PartStatus::AwaitingWelding).unwrap();
        assert_eq!(json, "AWAITING_WELDING");
    }

    #[test]
    fn test_new_part_agrees_on_location_and_status() {
        let part = Part::new(
            "PART-2026-08-02-0001".into(),
            "LN-2026-01001".into(),
            "FormingMachine",
            Utc::now(),
        );
        assert_eq!(part.status, PartStatus::AwaitingPickup);
        assert_eq!(part.location, "FormingMachine");
        assert_eq!(part.forming_machine_id, "FormingMachine");
        assert!(!part.is_scrap);
    }
}
