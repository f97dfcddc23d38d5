use chrono_tz::Tz;
use serde_json::Value;

use crate::domain::{Meter, MeterChannel, MeterSample, SiteEnergy};
use crate::window::{self, LocalizeError};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    /// The payload violates the cross-channel consistency contract
    /// (diverging sample counts or timestamps, missing sections).
    #[error("unexpected api response format: {0}")]
    Structure(String),
    #[error(transparent)]
    Localize(#[from] LocalizeError),
}

/// Merges the per-channel series of one `<mode>Details` payload into ordered
/// per-timestamp readings.
///
/// Rules:
/// - Channels missing from the payload count as empty sequences.
/// - All non-empty channels must report the same sample count and, per
///   index, the same local timestamp.
/// - A sample without a `value` key is an absent reading, not a zero.
/// - Indices where every channel is absent produce no record.
pub struct Reconciler {
    site: String,
    tz: Tz,
}

impl Reconciler {
    pub fn new(site: impl Into<String>, tz: Tz) -> Self {
        Self {
            site: site.into(),
            tz,
        }
    }

    pub fn reconcile(&self, payload: &Value, mode: &str) -> Result<Vec<SiteEnergy>, ReconcileError> {
        let meters = extract_meters(payload, mode)?;
        let channels = partition(meters);

        let len = common_len(&channels)?;
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            let ts_str = aligned_timestamp(&channels, i)?;
            let ts = window::localize(ts_str, self.tz)?;

            let value_at =
                |c: MeterChannel| channels[c as usize].get(i).and_then(|sample| sample.value);
            let reading = SiteEnergy {
                ts,
                site: self.site.clone(),
                purchased: value_at(MeterChannel::Purchased),
                production: value_at(MeterChannel::Production),
                consumption: value_at(MeterChannel::Consumption),
                self_consumption: value_at(MeterChannel::SelfConsumption),
                feed_in: value_at(MeterChannel::FeedIn),
            };

            if reading.has_value() {
                out.push(reading);
            }
        }

        Ok(out)
    }
}

fn extract_meters(payload: &Value, mode: &str) -> Result<Vec<Meter>, ReconcileError> {
    let key = format!("{mode}Details");
    let meters = payload
        .get(&key)
        .and_then(|details| details.get("meters"))
        .ok_or_else(|| ReconcileError::Structure(format!("missing '{key}.meters' in response")))?;
    serde_json::from_value(meters.clone())
        .map_err(|e| ReconcileError::Structure(format!("undecodable meters array: {e}")))
}

/// Buckets the reported meters by channel, indexed by `MeterChannel as
/// usize`. Meters with an unrecognized type are skipped; a channel reported
/// twice keeps the last occurrence.
fn partition(meters: Vec<Meter>) -> [Vec<MeterSample>; 5] {
    let mut channels: [Vec<MeterSample>; 5] = Default::default();
    for meter in meters {
        if let Some(channel) = MeterChannel::from_api(&meter.kind) {
            channels[channel as usize] = meter.values;
        }
    }
    channels
}

/// The shared sample count of all non-empty channels. Absent channels are
/// present-but-empty and do not constrain the length.
fn common_len(channels: &[Vec<MeterSample>; 5]) -> Result<usize, ReconcileError> {
    let mut len = None;
    for channel in MeterChannel::ALL {
        let samples = &channels[channel as usize];
        if samples.is_empty() {
            continue;
        }
        match len {
            None => len = Some(samples.len()),
            Some(l) if l == samples.len() => {}
            Some(l) => {
                return Err(ReconcileError::Structure(format!(
                    "channel sample counts differ: {} has {}, expected {l}",
                    channel.as_str(),
                    samples.len(),
                )))
            }
        }
    }
    Ok(len.unwrap_or(0))
}

/// The timestamp string at index `i`, validated to be identical across all
/// non-empty channels.
fn aligned_timestamp(channels: &[Vec<MeterSample>; 5], i: usize) -> Result<&str, ReconcileError> {
    let mut ts = None;
    for channel in MeterChannel::ALL {
        let Some(sample) = channels[channel as usize].get(i) else {
            continue;
        };
        match ts {
            None => ts = Some(sample.date.as_str()),
            Some(t) if t == sample.date => {}
            Some(t) => {
                return Err(ReconcileError::Structure(format!(
                    "channel timestamps diverge at index {i}: {} reports '{}', expected '{t}'",
                    channel.as_str(),
                    sample.date,
                )))
            }
        }
    }
    ts.ok_or_else(|| ReconcileError::Structure(format!("no sample at index {i}")))
}
