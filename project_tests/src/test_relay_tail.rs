//! # Relay Tail
//!
//! Connects to a running relay, prints every batch it pushes and reports the
//! record rate at a fixed interval.

use chrono::Local;
use clap::Parser;
use lib_relay::SourceKind;
use project_tests::SseReader;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Event stream URL of the relay
    #[arg(short, long, default_value = "http://localhost:8000/events")]
    url: String,

    /// Source the relay serves (radar or rt)
    #[arg(short, long, default_value = "radar")]
    source: SourceKind,

    /// Resume cursor sent as Last-Event-ID
    #[arg(long)]
    last_event_id: Option<String>,

    /// Report interval in seconds
    #[arg(short, long, default_value_t = 10)]
    report_interval_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    println!("[*] Tailing {} ({})", args.url, args.source);

    let mut reader = SseReader::open(&args.url, args.last_event_id.as_deref()).await?;
    let mut report = tokio::time::interval(Duration::from_secs(args.report_interval_seconds));
    report.tick().await;
    let mut records_since_report = 0usize;

    loop {
        tokio::select! {
            event = reader.next_event() => {
                let event = match event {
                    Ok(event) => event,
                    // The reader times out when a relay stops heartbeating.
                    Err(e) => {
                        eprintln!("[ERROR] {}", e);
                        std::process::exit(1);
                    }
                };
                match event.event.as_str() {
                    "append" => {
                        let records = args.source.parse_batch(&event.data)?;
                        records_since_report += records.len();
                        println!("[{}] id={} records={}", Local::now().format("%H:%M:%S%.3f"), event.id.as_deref().unwrap_or("-"), records.len());
                        for record in &records {
                            println!("    {}", serde_json::to_string(record)?);
                        }
                    }
                    "error" => eprintln!("[{}] relay error: {}", Local::now().format("%H:%M:%S%.3f"), event.data),
                    _ => {}
                }
            }
            _ = report.tick() => {
                println!(
                    "--- {} records in the last {}s ---",
                    records_since_report,
                    args.report_interval_seconds
                );
                records_since_report = 0;
            }
        }
    }
}
