/*!
Simple throughput example for hyperfine performance testing.
*/

use std::time::Instant;

use tagpersist_core::{create_default_gateway, Destination};

#[derive(Clone, PartialEq, prost::Message)]
struct EmployeeRecord {
    #[prost(int64, tag = "1")]
    employee_id: i64,
    #[prost(string, tag = "2")]
    full_name: String,
    #[prost(string, tag = "3")]
    department: String,
    #[prost(string, repeated, tag = "4")]
    skills: Vec<String>,
    #[prost(double, tag = "5")]
    salary: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let gateway = create_default_gateway();
    let temp_dir = tempfile::TempDir::new()?;

    let records: Vec<EmployeeRecord> = (0..1000)
        .map(|i| EmployeeRecord {
            employee_id: i,
            full_name: format!("Employee {i}"),
            department: ["Finance", "Engineering", "Operations"][(i % 3) as usize].to_string(),
            skills: vec!["reporting".to_string(), "planning".to_string()],
            salary: 50_000.0 + i as f64,
        })
        .collect();

    let start = Instant::now();
    let mut plain_total = 0usize;
    let mut packed_total = 0usize;
    for record in &records {
        plain_total += gateway.encode(Some(record), false)?.len();
        packed_total += gateway.encode(Some(record), true)?.len();
    }
    let encode_duration = start.elapsed();

    let blocking_path = temp_dir.path().join("blocking.bin");
    let suspending_path = temp_dir.path().join("suspending.bin");

    let start = Instant::now();
    gateway.save_blocking(Some(&records[0]), &Destination::new(&blocking_path).compressed(true))?;
    gateway
        .save_suspending(
            Some(&records[0]),
            &Destination::new(&suspending_path).compressed(true),
        )
        .await?;
    let write_duration = start.elapsed();

    assert_eq!(std::fs::read(&blocking_path)?, std::fs::read(&suspending_path)?);

    let stats = gateway.orchestrator().pool().stats();
    println!("Encoded {} records twice in: {:?}", records.len(), encode_duration);
    println!("Plain bytes: {plain_total}, gzip bytes: {packed_total}");
    println!("Two file writes completed in: {:?}", write_duration);
    println!(
        "Pool: {} allocated, {} reused, {} idle",
        stats.allocated, stats.reused, stats.idle
    );
    Ok(())
}
