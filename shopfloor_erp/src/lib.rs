//! ERP push client.
//!
//! Fire-and-forget POSTs of order and shift JSON to the configured ERP
//! collaborator. Transport failures and HTTP error statuses are logged at
//! warn and dropped - an unreachable ERP must never stall the simulation.

use shopfloor_common::types::{ProductionOrder, Shift};
use std::time::Duration;
use tracing::{debug, warn};

const ERP_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client against the ERP endpoint.
#[derive(Clone)]
pub struct ErpClient {
    order_url: String,
    shift_url: String,
    http: reqwest::Client,
}

impl ErpClient {
    /// Build the client from endpoint base and paths.
    ///
    /// Only client construction can fail; everything after is best-effort.
    pub fn new(endpoint: &str, order_path: &str, shift_path: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(ERP_TIMEOUT).build()?;
        Ok(Self {
            order_url: format!("{endpoint}{order_path}"),
            shift_url: format!("{endpoint}{shift_path}"),
            http,
        })
    }

    /// Push a production-order update. Never fails the caller.
    pub async fn send_order_update(&self, order: &ProductionOrder) {
        match self.http.post(&self.order_url).json(order).send().await {
            Ok(response) if response.status().is_client_error() || response.status().is_server_error() => {
                warn!(
                    status = response.status().as_u16(),
                    order_id = %order.order_id,
                    "ERP returned error status for order update"
                );
            }
            Ok(_) => {
                debug!(order_id = %order.order_id, status = ?order.status, "order update sent to ERP");
            }
            Err(err) => {
                warn!(
                    error = %err,
                    url = %self.order_url,
                    "failed to send order update (ERP endpoint may not be available)"
                );
            }
        }
    }

    /// Push a shift update. Never fails the caller.
    pub async fn send_shift_update(&self, shift: &Shift) {
        match self.http.post(&self.shift_url).json(shift).send().await {
            Ok(response) if response.status().is_client_error() || response.status().is_server_error() => {
                warn!(
                    status = response.status().as_u16(),
                    shift_id = %shift.shift_id,
                    "ERP returned error status for shift update"
                );
            }
            Ok(_) => {
                debug!(shift_id = %shift.shift_id, "shift update sent to ERP");
            }
            Err(err) => {
                warn!(
                    error = %err,
                    url = %self.shift_url,
                    "failed to send shift update (ERP endpoint may not be available)"
                );
            }
        }
    }
}
