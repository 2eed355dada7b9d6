use salvo::prelude::*;
use serde_json::{Value, json};

use super::metrics::Metrics;
use super::web_state;

pub fn health_payload() -> Value {
    let stores = web_state().map(|state| {
        json!({
            "identities": state.bridge.identities().len(),
            "correlations": state.bridge.correlations().len(),
        })
    });

    json!({
        "status": if stores.is_some() { "running" } else { "starting" },
        "uptime_seconds": Metrics::uptime_seconds(),
        "version": env!("CARGO_PKG_VERSION"),
        "stores": stores,
    })
}

#[handler]
pub async fn health_check(res: &mut Response) {
    res.render(Json(health_payload()));
}
