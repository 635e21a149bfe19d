use anyhow::{ensure, Context};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use shaker_core::preferences::{
    IdentificationPreferences, LevelThreshold, PeptideStratification, SpectrumStratification,
};
use std::path::PathBuf;

#[derive(Serialize)]
/// Actual run parameters - may include overrides or default values not set by user
pub struct Settings {
    pub version: String,
    pub identifications: String,
    pub preferences: IdentificationPreferences,
    pub maps: Option<String>,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,
}

#[derive(Deserialize, Default)]
/// Input parameters deserialized from JSON file
pub struct Input {
    identifications: Option<String>,
    output_directory: Option<String>,
    maps: Option<String>,
    fdr: Option<f64>,
    probabilistic: Option<bool>,
    psm: Option<LevelOptions>,
    peptide: Option<LevelOptions>,
    protein: Option<LevelOptions>,
    min_decoys: Option<u64>,
    spectrum_stratification: Option<SpectrumStratification>,
    peptide_stratification: Option<PeptideStratification>,
}

#[derive(Serialize, Deserialize, Default, Debug)]
pub struct LevelOptions {
    fdr: Option<f64>,
    probabilistic: Option<bool>,
}

impl LevelOptions {
    fn build(self, level: &str, fdr: f64) -> LevelThreshold {
        let threshold = LevelThreshold {
            fdr: self.fdr.unwrap_or(fdr),
            probabilistic: self.probabilistic,
        };
        if threshold.fdr > 0.1 {
            log::warn!(
                "{} FDR set at {}, higher than expected. FDR is a fraction, not a percentage",
                level,
                threshold.fdr
            );
        }
        threshold
    }
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let mut input = match matches.get_one::<String>("parameters") {
            Some(path) => Input::load(path)
                .with_context(|| format!("Failed to read parameters from `{path}`"))?,
            None => Input::default(),
        };

        // Handle JSON configuration overrides
        if let Some(identifications) = matches.get_one::<String>("identifications") {
            log::trace!("overriding `identifications` parameter.");
            input.identifications = Some(identifications.into());
        }
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(maps) = matches.get_one::<String>("maps") {
            log::trace!("overriding `maps` parameter.");
            input.maps = Some(maps.into());
        }
        if let Some(fdr) = matches.get_one::<f64>("fdr").copied() {
            log::trace!("overriding `fdr` parameter.");
            input.fdr = Some(fdr);
        }
        if matches.get_flag("probabilistic") {
            input.probabilistic = Some(true);
        }

        ensure!(
            input.identifications.is_some(),
            "`identifications` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        crate::read_json(path.as_ref())
    }

    pub fn build(self) -> anyhow::Result<Settings> {
        let fdr = self.fdr.unwrap_or(0.01);
        let min_decoys = self.min_decoys.unwrap_or(1);
        if min_decoys == 0 {
            log::warn!("`min_decoys: 0` is treated as 1, a map without decoys cannot be estimated");
        }

        let preferences = IdentificationPreferences {
            probabilistic: self.probabilistic.unwrap_or(false),
            psm: self.psm.unwrap_or_default().build("PSM", fdr),
            peptide: self.peptide.unwrap_or_default().build("peptide", fdr),
            protein: self.protein.unwrap_or_default().build("protein", fdr),
            min_decoys,
            spectrum_stratification: self.spectrum_stratification.unwrap_or_default(),
            peptide_stratification: self.peptide_stratification.unwrap_or_default(),
        };
        preferences.validate()?;

        let identifications = self
            .identifications
            .context("'identifications' must be provided!")?;

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path).with_context(|| {
                    format!("Failed to create output directory `{}`", path.display())
                })?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Settings {
            version: clap::crate_version!().into(),
            identifications,
            preferences,
            maps: self.maps,
            output_paths: Vec::new(),
            output_directory,
        })
    }
}
