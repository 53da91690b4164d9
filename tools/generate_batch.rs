//! Synthetic Batch Generator
//!
//! Writes a JSON array of random patient records (with `actual_label`) to
//! stdout for smoke testing `hapi-predict batch`.
//!
//! Usage: generate-batch [count] [high_risk_rate] [seed]

use hapi_risk_pipeline::schema::{FeatureKind, FeatureSchema};
use hapi_risk_pipeline::RawRecord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::info;

/// Random record generator over the HAPI schema
struct RecordGenerator {
    schema: FeatureSchema,
    rng: StdRng,
    record_counter: u64,
}

impl RecordGenerator {
    fn new(seed: u64) -> Self {
        Self {
            schema: FeatureSchema::hapi(),
            rng: StdRng::seed_from_u64(seed),
            record_counter: 0,
        }
    }

    /// Generate a record; high-risk records lean towards the last label of
    /// each codec and towards low albumin.
    fn generate(&mut self, high_risk: bool) -> RawRecord {
        self.record_counter += 1;
        let mut record = RawRecord::new();
        record.insert("patient_id".to_string(), json!(format!("P{:06}", self.record_counter)));
        record.insert("age".to_string(), json!(self.rng.gen_range(45..95)));

        let lean = if high_risk { 0.7 } else { 0.15 };
        let schema = self.schema.clone();
        for slot in schema.slots() {
            let value = match &slot.kind {
                FeatureKind::Numeric { .. } => json!(self.numeric(&slot.name, high_risk)),
                FeatureKind::Categorical(codec) => {
                    let labels = codec.labels();
                    let idx = if self.rng.gen_bool(lean) {
                        labels.len() - 1
                    } else {
                        self.rng.gen_range(0..labels.len())
                    };
                    json!(labels[idx])
                }
            };
            record.insert(slot.name.clone(), value);
        }

        let label = if high_risk {
            self.rng.gen_bool(0.8)
        } else {
            self.rng.gen_bool(0.1)
        };
        record.insert("actual_label".to_string(), json!(u8::from(label)));
        record
    }

    fn numeric(&mut self, name: &str, high_risk: bool) -> f64 {
        let value = match (name, high_risk) {
            ("hospital_days", false) => self.rng.gen_range(1.0..10.0),
            ("hospital_days", true) => self.rng.gen_range(7.0..30.0),
            ("white_cell_count", false) => self.rng.gen_range(4.0..10.0),
            ("white_cell_count", true) => self.rng.gen_range(8.0..18.0),
            ("serum_potassium", _) => self.rng.gen_range(3.2..5.2),
            ("albumin", false) => self.rng.gen_range(35.0..50.0),
            ("albumin", true) => self.rng.gen_range(22.0..36.0),
            _ => self.rng.gen_range(0.0..1.0),
        };
        (value * 10.0_f64).round() / 10.0
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("generate_batch=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let count: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(100);
    let high_risk_rate: f64 = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.3_f64)
        .clamp(0.0, 1.0);
    let seed: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(7);

    info!(count, high_risk_rate, seed, "Generating synthetic batch");

    let mut generator = RecordGenerator::new(seed);
    let mut high_risk_count = 0;
    let records: Vec<RawRecord> = (0..count)
        .map(|_| {
            let high_risk = generator.rng.gen_bool(high_risk_rate);
            if high_risk {
                high_risk_count += 1;
            }
            generator.generate(high_risk)
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&records)?);
    info!(
        total = count,
        high_risk = high_risk_count,
        low_risk = count - high_risk_count,
        "Batch written"
    );
    Ok(())
}
