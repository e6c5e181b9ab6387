//! `system.time` — UTC/local timestamps (spec §4.6).

use chrono::Utc;
use serde_json::{json, Value};

pub fn now() -> Value {
    let utc = Utc::now();
    let local = chrono::Local::now();
    json!({
        "utc": utc.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "local": local.to_rfc3339(),
        "epoch_s": utc.timestamp() as f64 + utc.timestamp_subsec_nanos() as f64 / 1e9,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_expected_shape() {
        let v = now();
        assert!(v["utc"].is_string());
        assert!(v["local"].is_string());
        assert!(v["epoch_s"].is_number());
    }
}
