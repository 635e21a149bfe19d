//! Combine the E-values of several search engines into a single spectrum
//! score.
//!
//! Each engine's first hits are used to build a target/decoy map for that
//! engine alone, turning its E-values into probabilities. Engines are then
//! treated as independent evidence: probabilities are multiplied.

use crate::identification::{Advocate, PeptideAssumption, PeptideKey, SpectrumEvidence, SpectrumMatch};
use crate::specific_map::{SpecificMapSet, SpecificModel};
use crate::target_decoy::Curation;
use rayon::prelude::*;

#[derive(Clone, Debug, Default)]
pub struct InputMap {
    maps: SpecificMapSet<Advocate>,
}

impl InputMap {
    /// Collect the first hit of every engine, for every spectrum
    pub fn from_spectra(spectra: &[SpectrumMatch]) -> Self {
        let maps = spectra
            .par_iter()
            .flat_map_iter(|spectrum| {
                spectrum
                    .evidence
                    .first_hits()
                    .map(|(advocate, hit)| (advocate, hit.e_value, hit.decoy))
                    .collect::<Vec<_>>()
            })
            .collect();
        Self { maps }
    }

    pub fn add_point(&mut self, advocate: Advocate, e_value: f64, decoy: bool) {
        self.maps.add_point(advocate, e_value, decoy);
    }

    pub fn advocates(&self) -> impl Iterator<Item = Advocate> + '_ {
        self.maps.keys().copied()
    }

    pub fn is_multiple_search_engines(&self) -> bool {
        self.maps.len() > 1
    }

    /// Estimate the E-value -> probability model of every engine
    pub fn compute_probabilities(self, min_decoys: u64) -> InputModel {
        let cured = self.maps.cure(min_decoys);
        let degraded = cured
            .degraded()
            .map(|(advocate, curation)| (*advocate, curation))
            .collect();
        InputModel {
            model: cured.estimate_probabilities(),
            degraded,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InputModel {
    model: SpecificModel<Advocate>,
    degraded: Vec<(Advocate, Curation)>,
}

impl InputModel {
    /// Probability of an E-value reported by `advocate`
    pub fn probability(&self, advocate: Advocate, e_value: f64) -> f64 {
        self.model.probability(&advocate, e_value)
    }

    /// Engines whose map lacked decoy data
    pub fn degraded(&self) -> &[(Advocate, Curation)] {
        &self.degraded
    }

    pub fn fuse_spectrum(&self, evidence: &SpectrumEvidence) -> Option<Fusion> {
        fuse(
            evidence
                .first_hits()
                .map(|(advocate, hit)| (hit, self.probability(advocate, hit.e_value))),
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Fusion {
    /// Product of the probabilities of every engine that fired
    pub score: f64,
    /// Candidate with the lowest combined probability
    pub best: PeptideAssumption,
    /// Combined probability of each candidate peptide, in order of first
    /// appearance
    pub candidates: Vec<(PeptideKey, f64)>,
}

/// Fuse per-engine `(assumption, probability)` pairs for one spectrum.
///
/// Candidates sharing a peptide multiply their probabilities. Ties between
/// candidates are broken by peptide key order. Returns `None` if no engine
/// reported anything.
pub fn fuse<'a, I>(hits: I) -> Option<Fusion>
where
    I: IntoIterator<Item = (&'a PeptideAssumption, f64)>,
{
    let mut score = 1.0;
    let mut combined: Vec<(&PeptideAssumption, f64)> = Vec::new();
    for (assumption, p) in hits {
        score *= p;
        match combined
            .iter_mut()
            .find(|(seen, _)| seen.peptide == assumption.peptide)
        {
            Some((_, q)) => *q *= p,
            None => combined.push((assumption, p)),
        }
    }

    let (best, _) = combined.iter().min_by(|a, b| {
        a.1.total_cmp(&b.1)
            .then_with(|| a.0.peptide.cmp(&b.0.peptide))
    })?;

    Some(Fusion {
        score,
        best: (*best).clone(),
        candidates: combined
            .iter()
            .map(|(a, p)| (a.peptide.clone(), *p))
            .collect(),
    })
}

/// Single search engine: the raw E-value of the first hit is the score
pub fn single_engine(evidence: &SpectrumEvidence) -> Option<Fusion> {
    let (_, hit) = evidence.first_hits().next()?;
    Some(Fusion {
        score: hit.e_value,
        best: hit.clone(),
        candidates: vec![(hit.peptide.clone(), hit.e_value)],
    })
}
