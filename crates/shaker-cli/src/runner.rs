use super::input::Settings;
use anyhow::{ensure, Context};
use log::info;
use serde::Serialize;
use shaker_core::identification::Identification;
use shaker_core::pipeline::{ValidationMaps, ValidationPipeline};
use shaker_core::progress::{Issue, LogSink};
use shaker_core::threshold::{ThresholdEstimator, Thresholds, ValidationCounts};
use std::path::PathBuf;
use std::sync::mpsc::sync_channel;
use std::thread;
use std::time::Instant;

pub struct Runner {
    pub parameters: Settings,
    start: Instant,
}

/// Everything a run reports besides the tables: the parameters used, the
/// thresholds at every level and the issues encountered
#[derive(Serialize)]
pub struct RunSummary<'a> {
    pub parameters: &'a Settings,
    pub thresholds: &'a Thresholds,
    pub validated: ValidationCounts,
    pub issues: Vec<String>,
}

impl Runner {
    pub fn new(parameters: Settings) -> anyhow::Result<Self> {
        Ok(Self {
            parameters,
            start: Instant::now(),
        })
    }

    // Create a path for `file_name` in the specified output directory
    pub(crate) fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.output_directory.join(file_name.as_ref())
    }

    /// Read the identification store on a worker thread. Validation blocks
    /// until the store has been fully imported and handed over.
    fn load_identifications(&self) -> anyhow::Result<Identification> {
        let start = Instant::now();
        let path = self.parameters.identifications.clone();
        let (send, recv) = sync_channel(1);

        let import = thread::spawn(move || {
            let identification = crate::read_json::<_, Identification>(&path)
                .with_context(|| format!("Failed to import identifications from `{}`", path));
            // The receiver only goes away if the runner bailed out already
            let _ = send.send(identification);
        });

        let identification = recv
            .recv()
            .context("identification import ended without a result")??;
        if let Err(e) = import.join() {
            log::warn!("Failed to join import task: {e:?}");
        }

        info!(
            "- import: {:8} ms ({} spectra, {} peptides, {} proteins)",
            start.elapsed().as_millis(),
            identification.spectra().len(),
            identification.peptides().len(),
            identification.proteins().len()
        );
        Ok(identification)
    }

    /// Build the maps from scratch, or reuse persisted ones if the store was
    /// already scored in an earlier session
    fn maps(
        &self,
        identification: &mut Identification,
    ) -> anyhow::Result<(ValidationMaps, Vec<Issue>)> {
        if let Some(path) = &self.parameters.maps {
            info!("Loading score distributions from {}", path);
            ensure!(
                identification
                    .spectra()
                    .iter()
                    .all(|s| s.validation().is_some()),
                "persisted maps can only be reused with identifications that were \
                 already scored, such as a previous `identifications.shaker.json`"
            );
            let maps = crate::read_json::<_, ValidationMaps>(path)?;
            return Ok((maps, Vec::new()));
        }

        let sink = LogSink;
        let mut pipeline =
            ValidationPipeline::new(identification, self.parameters.preferences, &sink)?;
        let maps = pipeline.run()?;
        Ok((maps, pipeline.issues().to_vec()))
    }

    pub fn run(mut self) -> anyhow::Result<()> {
        let mut identification = self.load_identifications()?;

        let (maps, mut issues) = self.maps(&mut identification)?;

        let estimator = ThresholdEstimator::new(&maps, &self.parameters.preferences);
        let thresholds = estimator.estimate();
        issues.extend(estimator.issues());
        issues.extend(thresholds.issues());
        let validated = thresholds.validate(&mut identification);

        log::info!(
            "discovered {} target peptide-spectrum matches at {}% FDR",
            validated.psms.0,
            self.parameters.preferences.psm.fdr * 100.0
        );
        log::info!(
            "discovered {} target peptides at {}% FDR",
            validated.peptides.0,
            self.parameters.preferences.peptide.fdr * 100.0
        );
        log::info!(
            "discovered {} target proteins at {}% FDR",
            validated.proteins.0,
            self.parameters.preferences.protein.fdr * 100.0
        );
        log::trace!("writing outputs");

        let outputs = [
            self.write_psms(identification.spectra())?,
            self.write_peptides(identification.peptides())?,
            self.write_proteins(identification.proteins())?,
        ];
        self.parameters.output_paths.extend(outputs);

        let path = self.make_path("maps.json");
        std::fs::write(&path, serde_json::to_vec(&maps)?)?;
        self.parameters.output_paths.push(path.display().to_string());

        let path = self.make_path("identifications.shaker.json");
        std::fs::write(&path, serde_json::to_vec(&identification)?)?;
        self.parameters.output_paths.push(path.display().to_string());

        let path = self.make_path("results.json");
        self.parameters.output_paths.push(path.display().to_string());
        let summary = RunSummary {
            parameters: &self.parameters,
            thresholds: &thresholds,
            validated,
            issues: issues.iter().map(ToString::to_string).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        std::fs::write(&path, serde_json::to_vec_pretty(&summary)?)?;

        let run_time = (Instant::now() - self.start).as_secs();
        info!("finished in {}s", run_time);
        Ok(())
    }
}
