//! FDR thresholds over finalized maps, and the validation pass that applies
//! them to the store.

use crate::identification::{Identification, Match};
use crate::pipeline::ValidationMaps;
use crate::preferences::{IdentificationPreferences, PeptideStratification, SpectrumStratification};
use crate::progress::{Issue, Level};
use crate::target_decoy::TargetDecoyResults;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub struct ThresholdEstimator<'a> {
    maps: &'a ValidationMaps,
    preferences: &'a IdentificationPreferences,
}

impl<'a> ThresholdEstimator<'a> {
    pub fn new(maps: &'a ValidationMaps, preferences: &'a IdentificationPreferences) -> Self {
        Self { maps, preferences }
    }

    /// Groupings requested by the preferences that differ from the ones the
    /// maps were built with. Thresholds always follow the maps.
    pub fn issues(&self) -> Vec<Issue> {
        let mut issues = Vec::new();
        if self.maps.spectrum_stratification != self.preferences.spectrum_stratification {
            issues.push(Issue::StratificationMismatch {
                level: Level::Spectrum,
                persisted: self.maps.spectrum_stratification.to_string(),
                requested: self.preferences.spectrum_stratification.to_string(),
            });
        }
        if self.maps.peptide_stratification != self.preferences.peptide_stratification {
            issues.push(Issue::StratificationMismatch {
                level: Level::Peptide,
                persisted: self.maps.peptide_stratification.to_string(),
                requested: self.preferences.peptide_stratification.to_string(),
            });
        }
        issues
    }

    /// One result per stratification key for spectra and peptides, a single
    /// global result for proteins
    pub fn estimate(&self) -> Thresholds {
        for issue in self.issues() {
            log::warn!("{}", issue);
        }
        let thresholds = Thresholds {
            psm: self.maps.spectrum.results(self.preferences.psm_policy()),
            peptide: self.maps.peptide.results(self.preferences.peptide_policy()),
            protein: self.maps.protein.results(self.preferences.protein_policy()),
            spectrum_stratification: self.maps.spectrum_stratification,
            peptide_stratification: self.maps.peptide_stratification,
        };
        for issue in thresholds.issues() {
            log::warn!("{}", issue);
        }
        thresholds
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thresholds {
    pub psm: BTreeMap<u8, TargetDecoyResults>,
    pub peptide: BTreeMap<String, TargetDecoyResults>,
    pub protein: TargetDecoyResults,
    spectrum_stratification: SpectrumStratification,
    peptide_stratification: PeptideStratification,
}

/// Number of validated target and decoy matches at each level
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationCounts {
    pub psms: (usize, usize),
    pub peptides: (usize, usize),
    pub proteins: (usize, usize),
}

fn unachievable<K: fmt::Display>(level: Level, key: K, results: &TargetDecoyResults) -> Option<Issue> {
    match results.limit {
        None if results.n_targets + results.n_decoys > 0 => Some(Issue::ThresholdUnachievable {
            level,
            key: key.to_string(),
            fdr: results.target_fdr,
        }),
        _ => None,
    }
}

/// Recompute the flag of every match from scratch, returning the number of
/// validated (targets, decoys)
fn apply<K, E, F>(matches: &mut [Match<K, E>], results: F) -> (usize, usize)
where
    K: fmt::Display + Send,
    E: Send,
    F: Fn(&Match<K, E>) -> Option<TargetDecoyResults> + Sync,
{
    matches
        .par_iter_mut()
        .map(|m| {
            let validated = results(&*m).map_or(false, |r| r.accepts(m.score(), m.probability()));
            let decoy = m.decoy;
            match m.validation_mut() {
                Some(parameter) => {
                    parameter.validated = validated;
                    match (validated, decoy) {
                        (true, false) => (1, 0),
                        (true, true) => (0, 1),
                        _ => (0, 0),
                    }
                }
                None => (0, 0),
            }
        })
        .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1))
}

impl Thresholds {
    /// Keys for which no threshold reaches the requested FDR
    pub fn issues(&self) -> Vec<Issue> {
        self.psm
            .iter()
            .filter_map(|(key, r)| unachievable(Level::Spectrum, key, r))
            .chain(
                self.peptide
                    .iter()
                    .filter_map(|(key, r)| unachievable(Level::Peptide, key, r)),
            )
            .chain(unachievable(Level::Protein, "", &self.protein))
            .collect()
    }

    /// Set the validated flag of every match at every level: a match is
    /// validated iff it was scored and its value on the threshold's axis is
    /// at most the limit of its key. Flags set by an earlier pass are
    /// overwritten.
    pub fn validate(&self, identification: &mut Identification) -> ValidationCounts {
        let spectra = self.spectrum_stratification;
        let peptides = self.peptide_stratification;
        let counts = ValidationCounts {
            psms: apply(&mut identification.spectra, |m| {
                self.psm.get(&spectra.key(m)).copied()
            }),
            peptides: apply(&mut identification.peptides, |m| {
                self.peptide.get(&peptides.key(m)).copied()
            }),
            proteins: apply(&mut identification.proteins, |_| Some(self.protein)),
        };
        log::info!(
            "validated {} PSMs, {} peptides, {} proteins (targets)",
            counts.psms.0,
            counts.peptides.0,
            counts.proteins.0
        );
        counts
    }
}
