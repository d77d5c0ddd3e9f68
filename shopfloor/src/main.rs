//! # Shopfloor Simulator
//!
//! Emulates an industrial manufacturing line for MES/ERP pipeline demos and
//! integration testing. Two deployment shapes, selected by `LINE_TYPE`:
//!
//! - empty: a single welding robot publishing under `ns=2`, folder `Robot`
//! - non-empty: a forming press, a pick-and-place robot and a stud spot
//!   welder with a line coordinator computing OEE and bottleneck
//!
//! External surfaces: an OPC UA endpoint with live timeseries, a REST
//! observer with health probes, and fire-and-forget order/shift pushes to an
//! ERP collaborator. All configuration comes from environment variables.

mod driver;

use tracing::error;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .init();

    if let Err(err) = driver::run().await {
        error!(error = %err, "fatal startup failure");
        std::process::exit(1);
    }
}
