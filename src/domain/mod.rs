use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One merged reading across all metered channels at a single instant.
///
/// A value of `None` means the upstream API omitted the reading for that
/// channel; this is distinct from a reported zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteEnergy {
    pub ts: DateTime<Utc>,
    pub site: String,
    pub purchased: Option<f64>,
    pub production: Option<f64>,
    pub consumption: Option<f64>,
    pub self_consumption: Option<f64>,
    pub feed_in: Option<f64>,
}

impl SiteEnergy {
    /// True when at least one channel reported a reading.
    pub fn has_value(&self) -> bool {
        self.purchased.is_some()
            || self.production.is_some()
            || self.consumption.is_some()
            || self.self_consumption.is_some()
            || self.feed_in.is_some()
    }
}

/// The five metered channels reported by the monitoring API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterChannel {
    Purchased,
    Production,
    Consumption,
    SelfConsumption,
    FeedIn,
}

impl MeterChannel {
    pub const ALL: [MeterChannel; 5] = [
        MeterChannel::Purchased,
        MeterChannel::Production,
        MeterChannel::Consumption,
        MeterChannel::SelfConsumption,
        MeterChannel::FeedIn,
    ];

    /// Maps the upstream `type` string. Unknown types return `None` and are
    /// skipped by the reconciler.
    pub fn from_api(kind: &str) -> Option<Self> {
        match kind {
            "Purchased" => Some(MeterChannel::Purchased),
            "Production" => Some(MeterChannel::Production),
            "Consumption" => Some(MeterChannel::Consumption),
            "SelfConsumption" => Some(MeterChannel::SelfConsumption),
            "FeedIn" => Some(MeterChannel::FeedIn),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MeterChannel::Purchased => "Purchased",
            MeterChannel::Production => "Production",
            MeterChannel::Consumption => "Consumption",
            MeterChannel::SelfConsumption => "SelfConsumption",
            MeterChannel::FeedIn => "FeedIn",
        }
    }
}

/// One sample of one meter as returned by the API.
///
/// The `value` key is omitted entirely for missing readings, hence the
/// `Option` with a serde default.
#[derive(Debug, Clone, Deserialize)]
pub struct MeterSample {
    pub date: String,
    #[serde(default)]
    pub value: Option<f64>,
}

/// One meter entry of the `<mode>Details` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Meter {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub values: Vec<MeterSample>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_mapping_ignores_unknown_types() {
        assert_eq!(MeterChannel::from_api("FeedIn"), Some(MeterChannel::FeedIn));
        assert_eq!(MeterChannel::from_api("StorageLevel"), None);
    }

    #[test]
    fn meter_sample_without_value_key_deserializes_as_absent() {
        let sample: MeterSample =
            serde_json::from_value(serde_json::json!({"date": "2024-01-01 00:00:00"})).unwrap();
        assert_eq!(sample.value, None);

        let sample: MeterSample = serde_json::from_value(
            serde_json::json!({"date": "2024-01-01 00:00:00", "value": 0.0}),
        )
        .unwrap();
        assert_eq!(sample.value, Some(0.0));
    }

    #[test]
    fn has_value_requires_at_least_one_channel() {
        let mut reading = SiteEnergy {
            ts: Utc::now(),
            site: "s-1".to_string(),
            purchased: None,
            production: None,
            consumption: None,
            self_consumption: None,
            feed_in: None,
        };
        assert!(!reading.has_value());
        reading.feed_in = Some(0.0);
        assert!(reading.has_value());
    }
}
