//! Posts synthetic OTLP exports to a running otelgate and reports throughput.
//!
//! Usage: loadgen [requests_per_signal] [items_per_request]
//!
//! Environment variables:
//! - OTELGATE_URL: Target base URL (default: http://localhost:4318)
//! - OTELGATE_API_KEY: Bearer key to send (required)

use otelgate::otlp::{synthetic, SignalType, PROTOBUF_CONTENT_TYPE};
use prost::Message;
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const SERVICES: &[&str] = &["checkout", "payments", "inventory", "search", "gateway", "auth"];

struct LoadStats {
    requests: usize,
    items: usize,
    failures: usize,
    total_duration: Duration,
    latencies: Vec<Duration>,
}

impl LoadStats {
    fn items_per_sec(&self) -> f64 {
        self.items as f64 / self.total_duration.as_secs_f64()
    }

    fn percentile(&self, pct: usize) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted = self.latencies.clone();
        sorted.sort();
        sorted[(sorted.len() * pct / 100).min(sorted.len() - 1)]
    }

    fn avg_latency(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.latencies.iter().sum();
        sum / self.latencies.len() as u32
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

fn build_body(signal: SignalType, items: usize, rng: &mut impl Rng) -> (Vec<u8>, usize) {
    let service = SERVICES[rng.gen_range(0..SERVICES.len())];
    let start = now_nanos().saturating_sub(rng.gen_range(0..1_000_000_000));

    match signal {
        SignalType::Traces => (synthetic::trace_export(service, items, start).encode_to_vec(), items),
        SignalType::Logs => (synthetic::log_export(service, items, start).encode_to_vec(), items),
        // Fixed shape: four data points per export
        SignalType::Metrics => (synthetic::metric_export(service, start).encode_to_vec(), 4),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let requests: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(200);
    let items_per_request: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(50);
    let base_url = std::env::var("OTELGATE_URL").unwrap_or_else(|_| "http://localhost:4318".to_string());
    let api_key = std::env::var("OTELGATE_API_KEY").map_err(|_| "OTELGATE_API_KEY must be set")?;

    println!("otelgate load generator");
    println!("=======================");
    println!("Target:             {}", base_url);
    println!("Requests per signal: {}", requests);
    println!("Items per request:  {}", items_per_request);
    println!();

    let client = Client::new();
    let mut rng = rand::thread_rng();

    for signal in SignalType::ALL {
        print!("Sending {}... ", signal);
        std::io::Write::flush(&mut std::io::stdout())?;

        let url = format!("{}{}", base_url.trim_end_matches('/'), signal.path());
        let mut stats = LoadStats {
            requests,
            items: 0,
            failures: 0,
            total_duration: Duration::ZERO,
            latencies: Vec::with_capacity(requests),
        };
        let start = Instant::now();

        for _ in 0..requests {
            let (body, items) = build_body(signal, items_per_request, &mut rng);

            let request_start = Instant::now();
            let response = client
                .post(&url)
                .bearer_auth(&api_key)
                .header(reqwest::header::CONTENT_TYPE, PROTOBUF_CONTENT_TYPE)
                .body(body)
                .send()
                .await?;
            stats.latencies.push(request_start.elapsed());

            if response.status().is_success() {
                stats.items += items;
            } else {
                stats.failures += 1;
                if stats.failures == 1 {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    eprintln!("\n  {} {}", status, text);
                }
            }
        }
        stats.total_duration = start.elapsed();

        println!("done");
        println!("  Requests:    {} ({} failed)", stats.requests, stats.failures);
        println!("  Items/sec:   {:.0}", stats.items_per_sec());
        println!("  Total time:  {:?}", stats.total_duration);
        println!(
            "  Latency:     avg={:?} p50={:?} p99={:?}",
            stats.avg_latency(),
            stats.percentile(50),
            stats.percentile(99)
        );
        println!();
    }

    println!("Store Statistics:");
    let resp: Value = client
        .get(format!("{}/stats", base_url.trim_end_matches('/')))
        .send()
        .await?
        .json()
        .await?;

    if let Some(signals) = resp["store"]["signals"].as_array() {
        for s in signals {
            println!(
                "  {}: {} records, {:.2} MB",
                s["signal"].as_str().unwrap_or("?"),
                s["records"],
                s["bytes"].as_u64().unwrap_or(0) as f64 / 1024.0 / 1024.0
            );
        }
    }

    Ok(())
}
