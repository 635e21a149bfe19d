use serde_json::{json, Value};
use shaker_cli::input::Input;
use shaker_cli::runner::Runner;
use std::path::PathBuf;

fn output_directory(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("shaker-{}-{}", name, std::process::id()))
}

fn run(parameters: Value) -> anyhow::Result<Value> {
    let input: Input = serde_json::from_value(parameters)?;
    let settings = input.build()?;
    let directory = settings.output_directory.clone();
    Runner::new(settings)?.run()?;
    shaker_cli::read_json(directory.join("results.json"))
}

fn rows(path: PathBuf) -> anyhow::Result<Vec<csv::StringRecord>> {
    let mut rdr = csv::ReaderBuilder::new().delimiter(b'\t').from_path(path)?;
    Ok(rdr.records().collect::<Result<Vec<_>, _>>()?)
}

#[test]
fn integration() -> anyhow::Result<()> {
    let first = output_directory("first");
    let results = run(json!({
        "identifications": "../../tests/identifications.json",
        "output_directory": first,
        "fdr": 0.05,
    }))?;

    let psms = rows(first.join("psms.shaker.tsv"))?;
    assert_eq!(psms.len(), 32);
    assert_eq!(rows(first.join("peptides.shaker.tsv"))?.len(), 12);
    assert_eq!(rows(first.join("proteins.shaker.tsv"))?.len(), 6);

    // Every spectrum has a hit, so every PSM is scored
    assert!(psms.iter().all(|r| !r[6].is_empty() && !r[7].is_empty()));
    let validated_targets = psms
        .iter()
        .filter(|r| &r[5] == "1" && &r[8] == "1")
        .count() as u64;
    assert_eq!(results["validated"]["psms"][0], validated_targets);
    assert_eq!(results["parameters"]["output_paths"].as_array().unwrap().len(), 6);

    // Reusing the maps on the scored store reproduces the same validation,
    // keeping the grouping the maps were built with
    let second = output_directory("second");
    let reused = run(json!({
        "identifications": first.join("identifications.shaker.json"),
        "output_directory": second,
        "maps": first.join("maps.json"),
        "fdr": 0.05,
        "spectrum_stratification": "engine_count",
    }))?;
    assert_eq!(reused["validated"], results["validated"]);
    assert!(reused["issues"]
        .as_array()
        .unwrap()
        .iter()
        .any(|issue| issue.as_str().unwrap().contains("grouped by `charge`")));

    std::fs::remove_dir_all(first)?;
    std::fs::remove_dir_all(second)?;
    Ok(())
}

#[test]
fn maps_require_scored_identifications() {
    let directory = output_directory("unscored");
    let result = run(json!({
        "identifications": "../../tests/identifications.json",
        "output_directory": directory,
        "maps": "maps.json",
    }));
    assert!(result.is_err());
    let _ = std::fs::remove_dir_all(directory);
}
