//! Demo entry point.
//!
//! Runs one global transaction over three in-memory branches and prints the
//! report and the collected metrics. `TCC_DEMO_SCENARIO` selects what goes
//! wrong: `confirm` (default, nothing fails), `cancel` (shipping rejects its
//! try), `confirm-failed` (payment cannot confirm) or `cancel-failed`
//! (shipping rejects its try and inventory cannot cancel). Retry settings are
//! read from the `TCC_*` variables documented on `DirectorConfig::from_env`.

use std::process::ExitCode;

use tcc::{BranchService, Director, DirectorConfig, InMemoryBranch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Confirm,
    Cancel,
    ConfirmFailed,
    CancelFailed,
}

impl Scenario {
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("cancel") => Scenario::Cancel,
            Some("confirm-failed") => Scenario::ConfirmFailed,
            Some("cancel-failed") => Scenario::CancelFailed,
            _ => Scenario::Confirm,
        }
    }
}

struct Branches {
    inventory: InMemoryBranch,
    payment: InMemoryBranch,
    shipping: InMemoryBranch,
}

impl Branches {
    fn for_scenario(scenario: Scenario) -> Self {
        let branches = Self {
            inventory: InMemoryBranch::new(),
            payment: InMemoryBranch::new(),
            shipping: InMemoryBranch::new(),
        };
        match scenario {
            Scenario::Confirm => {}
            Scenario::Cancel => branches.shipping.set_fail_on_try(true),
            Scenario::ConfirmFailed => branches.payment.set_fail_on_confirm(true),
            Scenario::CancelFailed => {
                branches.shipping.set_fail_on_try(true);
                branches.inventory.set_fail_on_cancel(true);
            }
        }
        branches
    }

    fn services(&self) -> Vec<BranchService> {
        vec![
            BranchService::new("inventory", self.inventory.clone()),
            BranchService::new("payment", self.payment.clone()),
            BranchService::new("shipping", self.shipping.clone()),
        ]
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = match metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
    {
        Ok(handle) => handle,
        Err(err) => {
            tracing::error!(error = %err, "failed to install Prometheus recorder");
            return ExitCode::FAILURE;
        }
    };

    // 3. Build branches and director
    let scenario = Scenario::parse(std::env::var("TCC_DEMO_SCENARIO").ok().as_deref());
    let config = DirectorConfig::from_env();
    tracing::info!(?scenario, max_retries = config.retry.max_retries, "starting demo");

    let branches = Branches::for_scenario(scenario);
    let director = Director::from_config(branches.services(), config);

    // 4. Run the transaction
    let report = director.execute().await;
    match serde_json::to_string_pretty(&report.to_json()) {
        Ok(json) => println!("{json}"),
        Err(err) => tracing::warn!(error = %err, "failed to render report"),
    }
    println!("{}", metrics_handle.render());

    match report.into_result() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(phase = %err.phase(), branch = err.service_name(), "{err}");
            ExitCode::FAILURE
        }
    }
}
