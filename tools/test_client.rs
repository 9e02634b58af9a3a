//! Test Prediction Client
//!
//! Generates random images, posts them to a running service, then prints the
//! prediction history.

use futures::future::join_all;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rand::Rng;
use serde_json::Value;
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Random image generator for testing
struct ImageGenerator {
    rng: rand::rngs::ThreadRng,
    image_counter: u64,
}

impl ImageGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            image_counter: 0,
        }
    }

    /// Generate a solid-colour image with some noise, encoded as JPEG or PNG
    fn generate(&mut self) -> anyhow::Result<(String, Vec<u8>)> {
        self.image_counter += 1;

        let width = self.rng.gen_range(16..640);
        let height = self.rng.gen_range(16..640);
        let base: [u8; 3] = [self.rng.gen(), self.rng.gen(), self.rng.gen()];

        let mut img = RgbImage::new(width, height);
        for pixel in img.pixels_mut() {
            let jitter: i16 = self.rng.gen_range(-12..=12);
            *pixel = Rgb(base.map(|c| (c as i16 + jitter).clamp(0, 255) as u8));
        }

        let (format, ext) = if self.rng.gen_bool(0.5) {
            (ImageFormat::Jpeg, "jpg")
        } else {
            (ImageFormat::Png, "png")
        };

        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut buf), format)?;
        Ok((format!("sample_{:06}.{}", self.image_counter, ext), buf))
    }
}

async fn post_image(
    client: &reqwest::Client,
    base_url: &str,
    filename: String,
    bytes: Vec<u8>,
) -> anyhow::Result<Value> {
    let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
    let form = reqwest::multipart::Form::new().part("file", part);

    let response = client
        .post(format!("{}/predict", base_url))
        .multipart(form)
        .send()
        .await?;
    let status = response.status();
    let body: Value = response.json().await?;

    if !status.is_success() {
        anyhow::bail!("{}: {}", status, body["message"]);
    }
    Ok(body)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_client=info".parse()?),
        )
        .init();

    info!("Starting Test Prediction Client");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let base_url = args
        .get(1)
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let count: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(20);
    let concurrency: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(4);
    let delay_ms: u64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(50);

    info!(
        base_url = %base_url,
        count = count,
        concurrency = concurrency,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = reqwest::Client::new();
    let mut generator = ImageGenerator::new();
    let started = Instant::now();

    let mut succeeded = 0u64;
    let mut failed = 0u64;
    let mut sent = 0u64;

    while sent < count {
        let batch = (count - sent).min(concurrency.max(1) as u64);
        let mut requests = Vec::new();
        for _ in 0..batch {
            let (filename, bytes) = generator.generate()?;
            requests.push(post_image(&client, &base_url, filename, bytes));
        }
        sent += batch;

        for result in join_all(requests).await {
            match result {
                Ok(body) => {
                    succeeded += 1;
                    info!(
                        id = %body["data"]["id"].as_str().unwrap_or_default(),
                        result = %body["data"]["result"].as_str().unwrap_or_default(),
                        "Prediction"
                    );
                }
                Err(e) => {
                    failed += 1;
                    warn!(error = %e, "Prediction failed");
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "Completed! {} predictions ({} failed) in {:.1}s ({:.1} req/s)",
        succeeded,
        failed,
        elapsed,
        count as f64 / elapsed.max(f64::EPSILON)
    );

    let history: Value = client
        .get(format!("{}/predict-history", base_url))
        .send()
        .await?
        .json()
        .await?;
    let entries = history["data"].as_array().map(Vec::len).unwrap_or(0);
    info!(entries = entries, "Prediction history fetched");

    Ok(())
}
