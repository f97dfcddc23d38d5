use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::domain::SiteEnergy;
use crate::sinks::{RecordSink, SinkError};

/// Escape measurement/tag keys/tag values/field keys for ILP.
///
/// ILP requires escaping commas, spaces and equals with a backslash.
fn ilp_escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    out.push(',');
    ilp_escape_ident(key, out);
    out.push('=');
    ilp_escape_ident(value, out);
}

fn push_field_f64(out: &mut String, first: &mut bool, key: &str, value: f64) {
    if *first {
        *first = false;
    } else {
        out.push(',');
    }

    ilp_escape_ident(key, out);
    out.push('=');
    out.push_str(&value.to_string());
}

fn ts_to_unix_nanos(ts: chrono::DateTime<chrono::Utc>) -> i128 {
    i128::from(ts.timestamp()) * 1_000_000_000 + i128::from(ts.timestamp_subsec_nanos())
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    let len = s.len() as u32;
    hasher.update(&len.to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_opt_f64(hasher: &mut blake3::Hasher, v: Option<f64>) {
    match v {
        Some(x) => {
            hasher.update(&[1]);
            hasher.update(&x.to_bits().to_le_bytes());
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

/// Deterministic id over the full reading. A partially published cycle is
/// republished on the next pass, so the downstream table can dedup on this
/// tag.
fn event_id(reading: &SiteEnergy) -> String {
    let mut h = blake3::Hasher::new();
    h.update(&ts_to_unix_nanos(reading.ts).to_le_bytes());
    hash_str(&mut h, &reading.site);
    for v in [
        reading.purchased,
        reading.production,
        reading.consumption,
        reading.self_consumption,
        reading.feed_in,
    ] {
        hash_opt_f64(&mut h, v);
    }
    h.finalize().to_hex().to_string()
}

/// Encodes one reading as a `site_energy` ILP line. Absent channel values
/// are omitted, never zero-filled.
fn write_ilp_line(reading: &SiteEnergy, out: &mut String) {
    out.push_str("site_energy");

    // tags (SYMBOL columns)
    let event_id = event_id(reading);
    push_tag(out, "event_id", &event_id);
    push_tag(out, "site", &reading.site);

    // fields (numeric metrics)
    out.push(' ');
    let mut first = true;
    if let Some(v) = reading.purchased {
        push_field_f64(out, &mut first, "purchased", v);
    }
    if let Some(v) = reading.production {
        push_field_f64(out, &mut first, "production", v);
    }
    if let Some(v) = reading.consumption {
        push_field_f64(out, &mut first, "consumption", v);
    }
    if let Some(v) = reading.self_consumption {
        push_field_f64(out, &mut first, "self_consumption", v);
    }
    if let Some(v) = reading.feed_in {
        push_field_f64(out, &mut first, "feed_in", v);
    }

    // timestamp (nanos)
    out.push(' ');
    out.push_str(&ts_to_unix_nanos(reading.ts).to_string());
}

/// ILP-over-TCP sink. Connects lazily and reconnects between retries; a
/// write failure past `max_retries` is reported to the caller.
pub struct IlpSink {
    addr: SocketAddr,
    max_retries: u32,
    retry_backoff: Duration,
    conn: Mutex<Option<TcpStream>>,
}

impl IlpSink {
    pub fn new(addr: SocketAddr, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            addr,
            max_retries,
            retry_backoff,
            conn: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream, SinkError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| SinkError::Write(format!("failed to connect to ILP endpoint: {e}")))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    async fn write_line(&self, line: &[u8]) -> Result<(), SinkError> {
        let mut guard = self.conn.lock().await;
        let mut attempt: u32 = 0;
        loop {
            let stream = match guard.as_mut() {
                Some(s) => s,
                None => guard.insert(self.connect().await?),
            };

            match stream.write_all(line).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    *guard = None;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "ILP write failed, reconnecting and retrying"
                    );
                    metrics::counter!("ilp_retry_total").increment(1);
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    *guard = None;
                    tracing::error!(error = %e, "ILP write failed, giving up");
                    metrics::counter!("ilp_sink_errors_total").increment(1);
                    return Err(SinkError::Write(format!("ilp write failed: {e}")));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl RecordSink for IlpSink {
    async fn publish(&self, reading: &SiteEnergy) -> Result<(), SinkError> {
        // Heuristic capacity: ~160 bytes per line.
        let mut line = String::with_capacity(160);
        write_ilp_line(reading, &mut line);
        line.push('\n');

        self.write_line(line.as_bytes()).await?;

        metrics::counter!("ilp_ingested_records_total").increment(1);
        metrics::counter!("ilp_bytes_total").increment(line.len() as u64);
        Ok(())
    }
}
