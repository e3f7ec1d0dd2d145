use std::time::Duration;

use chrono::{TimeZone, Utc};
use entsoe_prices::EntsoeClient;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entsoe_prices=info".parse().unwrap()),
        )
        .init();

    let token = std::env::var("ENTSOE_SECURITY_TOKEN").expect("ENTSOE_SECURITY_TOKEN is not set");
    let client = EntsoeClient::new(token, Some(Duration::from_secs(10)))
        .expect("Creating client failed.");

    let prices = match client.query_day_ahead_prices().await {
        Ok(prices) => prices,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    println!("Current time: {}", Utc::now().timestamp());
    println!("Day ahead prices:");
    for (timestamp, price) in prices.iter() {
        let start = Utc.timestamp_opt(timestamp, 0).unwrap();
        println!("{start}: {price:.02} {}", prices.unit());
    }
}
