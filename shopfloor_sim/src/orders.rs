//! Automatic production-order generation.
//!
//! Orders arrive from a notional ERP: random part from the catalog, random
//! customer, quantity within the configured band, due in 8-48 hours.

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shopfloor_common::types::{OrderStatus, PartDefinition, ProductionOrder};
use std::time::Duration;

/// Parts produced by the standalone welding robot.
pub const WELDING_PART_CATALOG: [PartDefinition; 6] = [
    PartDefinition {
        part_number: "WLD-FRAME-A01",
        description: "Front Frame Assembly",
        cycle_time: Duration::from_secs(55),
    },
    PartDefinition {
        part_number: "WLD-FRAME-B02",
        description: "Rear Frame Assembly",
        cycle_time: Duration::from_secs(70),
    },
    PartDefinition {
        part_number: "WLD-BRACKET-C01",
        description: "Support Bracket",
        cycle_time: Duration::from_secs(35),
    },
    PartDefinition {
        part_number: "WLD-PANEL-D01",
        description: "Side Panel",
        cycle_time: Duration::from_secs(45),
    },
    PartDefinition {
        part_number: "WLD-MOUNT-E01",
        description: "Motor Mount",
        cycle_time: Duration::from_secs(40),
    },
    PartDefinition {
        part_number: "WLD-CROSS-F01",
        description: "Cross Member",
        cycle_time: Duration::from_secs(60),
    },
];

/// Parts produced by the forming / welding line.
pub const LINE_PART_CATALOG: [PartDefinition; 5] = [
    PartDefinition {
        part_number: "RAIL-ASM-A01",
        description: "Side Rail Assembly",
        cycle_time: Duration::from_secs(45),
    },
    PartDefinition {
        part_number: "RAIL-ASM-B02",
        description: "Cross Rail Assembly",
        cycle_time: Duration::from_secs(50),
    },
    PartDefinition {
        part_number: "BRKT-FRM-C01",
        description: "Formed Bracket",
        cycle_time: Duration::from_secs(35),
    },
    PartDefinition {
        part_number: "PANEL-WLD-D01",
        description: "Welded Panel",
        cycle_time: Duration::from_secs(55),
    },
    PartDefinition {
        part_number: "MOUNT-ASM-E01",
        description: "Mount Assembly",
        cycle_time: Duration::from_secs(40),
    },
];

const CUSTOMERS: [&str; 5] = [
    "AutoCorp Inc.",
    "MechParts GmbH",
    "TechFab Solutions",
    "Industrial Motors Ltd.",
    "Assembly Systems AG",
];

/// Generates random production orders for one simulator mode.
pub struct OrderGenerator {
    catalog: &'static [PartDefinition],
    order_prefix: &'static str,
    min_qty: u32,
    max_qty: u32,
    rng: StdRng,
    order_number: u32,
}

impl OrderGenerator {
    /// Generator for the standalone welding robot (`PO-` order ids).
    pub fn for_welding(min_qty: u32, max_qty: u32) -> Self {
        Self::build(&WELDING_PART_CATALOG, "PO", min_qty, max_qty, StdRng::from_entropy())
    }

    /// Generator for the production line (`LN-` order ids).
    pub fn for_line(min_qty: u32, max_qty: u32) -> Self {
        Self::build(&LINE_PART_CATALOG, "LN", min_qty, max_qty, StdRng::from_entropy())
    }

    /// Deterministic variant for tests.
    pub fn with_seed(line_mode: bool, min_qty: u32, max_qty: u32, seed: u64) -> Self {
        let (catalog, prefix): (&'static [PartDefinition], _) = if line_mode {
            (&LINE_PART_CATALOG, "LN")
        } else {
            (&WELDING_PART_CATALOG, "PO")
        };
        Self::build(catalog, prefix, min_qty, max_qty, StdRng::seed_from_u64(seed))
    }

    fn build(
        catalog: &'static [PartDefinition],
        order_prefix: &'static str,
        min_qty: u32,
        max_qty: u32,
        rng: StdRng,
    ) -> Self {
        Self {
            catalog,
            order_prefix,
            min_qty,
            max_qty,
            rng,
            order_number: 1000,
        }
    }

    /// Create one random order.
    pub fn generate_order(&mut self, now: DateTime<Utc>) -> ProductionOrder {
        let part = self.catalog[self.rng.gen_range(0..self.catalog.len())];
        let customer = CUSTOMERS[self.rng.gen_range(0..CUSTOMERS.len())];
        let quantity = self.rng.gen_range(self.min_qty..=self.max_qty);
        let hours_until_due = self.rng.gen_range(8..48);
        let priority = self.rng.gen_range(1..=4);

        self.order_number += 1;
        let order_id = format!("{}-{}-{:05}", self.order_prefix, now.year(), self.order_number);

        ProductionOrder {
            order_id,
            part_number: part.part_number.to_string(),
            part_description: part.description.to_string(),
            quantity,
            quantity_completed: 0,
            quantity_scrap: 0,
            due_date: now + TimeDelta::hours(hours_until_due),
            customer: customer.to_string(),
            priority,
            status: OrderStatus::Queued,
            started_at: None,
        }
    }

    /// Pre-fill an initial queue of orders.
    pub fn generate_initial_queue(&mut self, count: usize, now: DateTime<Utc>) -> Vec<ProductionOrder> {
        (0..count).map(|_| self.generate_order(now)).collect()
    }
}

/// Cycle time of a catalog part, or the default when unknown.
pub fn part_cycle_time(part_number: &str, default: Duration) -> Duration {
    WELDING_PART_CATALOG
        .iter()
        .chain(LINE_PART_CATALOG.iter())
        .find(|p| p.part_number == part_number)
        .map(|p| p.cycle_time)
        .unwrap_or(default)
}
