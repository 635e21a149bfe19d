//! Three-level validation cascade: spectra, then peptides, then proteins.
//!
//! Every level runs a fill stage (score each match, build the level's
//! target/decoy histogram) followed by an estimate stage (cure, estimate
//! probabilities, attach them). Stages must run in order, and a level only
//! starts once every value of the level below has been committed.
//!
//! Within a stage, values are computed in parallel into a staging vector and
//! written to the store in a single pass afterwards, so a cancelled or
//! failed stage leaves its level untouched.

use crate::identification::{Identification, Match, PeptideAssumption, ValidationParameter};
use crate::input_map::{self, InputMap};
use crate::preferences::{IdentificationPreferences, PeptideStratification, SpectrumStratification};
use crate::progress::{Issue, Level, ProgressSink, StopFlag};
use crate::specific_map::{CuredMapSet, SpecificMapSet, SpecificModel};
use crate::target_decoy::{CuredMap, Curation, TargetDecoyMap, TargetDecoyModel};
use crate::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Matches processed between two cancellation checks
const BATCH_SIZE: usize = 4096;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    SpectrumFill,
    SpectrumEstimate,
    PeptideFill,
    PeptideEstimate,
    ProteinFill,
    ProteinEstimate,
    Done,
}

impl Stage {
    fn next(self) -> Stage {
        match self {
            Stage::SpectrumFill => Stage::SpectrumEstimate,
            Stage::SpectrumEstimate => Stage::PeptideFill,
            Stage::PeptideFill => Stage::PeptideEstimate,
            Stage::PeptideEstimate => Stage::ProteinFill,
            Stage::ProteinFill => Stage::ProteinEstimate,
            Stage::ProteinEstimate | Stage::Done => Stage::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::SpectrumFill => "spectrum_fill",
            Stage::SpectrumEstimate => "spectrum_estimate",
            Stage::PeptideFill => "peptide_fill",
            Stage::PeptideEstimate => "peptide_estimate",
            Stage::ProteinFill => "protein_fill",
            Stage::ProteinEstimate => "protein_estimate",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Finalized score distributions of a run, reusable in a later session
/// without recomputation. The groupings the spectrum and peptide models are
/// keyed by travel with them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationMaps {
    pub spectrum: SpecificModel<u8>,
    pub peptide: SpecificModel<String>,
    pub protein: TargetDecoyModel,
    pub spectrum_stratification: SpectrumStratification,
    pub peptide_stratification: PeptideStratification,
}

pub struct ValidationPipeline<'a, P: ProgressSink + ?Sized> {
    identification: &'a mut Identification,
    preferences: IdentificationPreferences,
    sink: &'a P,
    stop: StopFlag,
    stage: Stage,
    issues: Vec<Issue>,

    spectrum_map: Option<SpecificMapSet<u8>>,
    spectrum_model: Option<SpecificModel<u8>>,
    peptide_map: Option<SpecificMapSet<String>>,
    peptide_model: Option<SpecificModel<String>>,
    protein_map: Option<TargetDecoyMap>,
    protein_model: Option<TargetDecoyModel>,
}

/// Evaluate `f` over `items` in parallel, checking for cancellation between
/// batches
fn staged<T, U, F>(stop: &StopFlag, stage: Stage, items: &[T], f: F) -> Result<Vec<U>>
where
    T: Sync,
    U: Send,
    F: Fn(&T) -> U + Sync,
{
    let batches = items
        .par_chunks(BATCH_SIZE)
        .map(|batch| {
            if stop.is_stopped() {
                return Err(Error::Cancelled(stage));
            }
            log::trace!("{}: batch of {}", stage, batch.len());
            Ok(batch.iter().map(&f).collect::<Vec<_>>())
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(batches.into_iter().flatten().collect())
}

fn ensure_unattached<K: fmt::Display, E>(matches: &[Match<K, E>]) -> Result<()> {
    match matches.iter().find(|m| m.validation().is_some()) {
        Some(m) => Err(Error::AlreadyAttached(m.key.to_string())),
        None => Ok(()),
    }
}

/// Attach a fresh validation parameter to every match. Returns the number of
/// matches left without a score.
fn attach_scores<K: fmt::Display, E>(
    matches: &mut [Match<K, E>],
    scores: Vec<Option<f64>>,
) -> Result<usize> {
    ensure_unattached(matches)?;
    let mut unscorable = 0;
    for (m, score) in matches.iter_mut().zip(scores) {
        let parameter = match score {
            Some(score) => ValidationParameter::scored(score),
            None => {
                unscorable += 1;
                ValidationParameter::unscored()
            }
        };
        m.attach(parameter)?;
    }
    Ok(unscorable)
}

fn attach_probabilities<K: fmt::Display, E>(
    matches: &mut [Match<K, E>],
    probabilities: Vec<Option<f64>>,
) {
    for (m, probability) in matches.iter_mut().zip(probabilities) {
        if let Some(parameter) = m.validation_mut() {
            parameter.probability = probability;
        }
    }
}

fn curation_issue(level: Level, key: String, map: &CuredMap) -> Option<Issue> {
    match map.curation() {
        Curation::InsufficientDecoys { decoys, required } if !map.bins().is_empty() => {
            Some(Issue::InsufficientDecoyData {
                level,
                key,
                decoys,
                required,
            })
        }
        _ => None,
    }
}

fn curation_issues<K>(level: Level, cured: &CuredMapSet<K>) -> Vec<Issue>
where
    K: Ord + Clone + Send + Sync + fmt::Display,
{
    let mut issues = cured
        .iter()
        .filter_map(|(key, map)| curation_issue(level, key.to_string(), map))
        .collect::<Vec<_>>();
    let non_finite = cured.iter().map(|(_, map)| map.non_finite()).sum::<usize>();
    if non_finite > 0 {
        issues.push(Issue::NonFiniteScores {
            level,
            count: non_finite,
        });
    }
    issues
}

impl<'a, P: ProgressSink + ?Sized> ValidationPipeline<'a, P> {
    pub fn new(
        identification: &'a mut Identification,
        preferences: IdentificationPreferences,
        sink: &'a P,
    ) -> Result<Self> {
        preferences.validate()?;
        Ok(Self {
            identification,
            preferences,
            sink,
            stop: StopFlag::default(),
            stage: Stage::SpectrumFill,
            issues: Vec::new(),
            spectrum_map: None,
            spectrum_model: None,
            peptide_map: None,
            peptide_model: None,
            protein_map: None,
            protein_model: None,
        })
    }

    /// Share a cancellation flag with the caller
    pub fn with_stop(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Non-fatal conditions encountered so far
    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn spectrum_model(&self) -> Option<&SpecificModel<u8>> {
        self.spectrum_model.as_ref()
    }

    pub fn peptide_model(&self) -> Option<&SpecificModel<String>> {
        self.peptide_model.as_ref()
    }

    pub fn protein_model(&self) -> Option<&TargetDecoyModel> {
        self.protein_model.as_ref()
    }

    fn enter(&self, requested: Stage) -> Result<()> {
        if self.stage != requested {
            return Err(Error::StageOrder {
                requested,
                current: self.stage,
            });
        }
        self.checkpoint()
    }

    fn checkpoint(&self) -> Result<()> {
        match self.stop.is_stopped() {
            true => Err(Error::Cancelled(self.stage)),
            false => Ok(()),
        }
    }

    fn issue(&mut self, issue: Issue) {
        log::warn!("{}", issue);
        self.issues.push(issue);
    }

    fn finish_stage(&mut self, start: Instant, report: String) {
        log::info!(
            "- {:<18} {:8} ms",
            self.stage.to_string(),
            start.elapsed().as_millis()
        );
        self.sink.append_report(&report);
        self.stage = self.stage.next();
    }

    /// Score every spectrum, designate its best assumption and fill the
    /// stratified spectrum map
    pub fn fill_spectra(&mut self) -> Result<()> {
        self.enter(Stage::SpectrumFill)?;
        let start = Instant::now();

        let input = InputMap::from_spectra(&self.identification.spectra);
        let n_engines = input.advocates().count();
        let engines = match input.is_multiple_search_engines() {
            true => {
                let model = input.compute_probabilities(self.preferences.min_decoys);
                for &(advocate, curation) in model.degraded() {
                    if let Curation::InsufficientDecoys { decoys, required } = curation {
                        self.issue(Issue::InsufficientDecoyData {
                            level: Level::Spectrum,
                            key: advocate.to_string(),
                            decoys,
                            required,
                        });
                    }
                }
                Some(model)
            }
            false => None,
        };

        let fusions = staged(
            &self.stop,
            self.stage,
            &self.identification.spectra,
            |spectrum| match &engines {
                Some(model) => model.fuse_spectrum(&spectrum.evidence),
                None => input_map::single_engine(&spectrum.evidence),
            },
        )?;
        self.checkpoint()?;

        let (scores, best): (Vec<Option<f64>>, Vec<Option<PeptideAssumption>>) = fusions
            .into_iter()
            .map(|fusion| match fusion {
                Some(fusion) => (Some(fusion.score), Some(fusion.best)),
                None => (None, None),
            })
            .unzip();

        let spectra = &mut self.identification.spectra;
        let unscorable = attach_scores(spectra, scores)?;
        for (spectrum, best) in spectra.iter_mut().zip(best) {
            if let Some(best) = best {
                spectrum.set_best_assumption(best);
            }
        }

        let stratification = self.preferences.spectrum_stratification;
        let map = spectra
            .par_iter()
            .filter_map(|s| Some((stratification.key(s), s.score()?, s.decoy)))
            .collect::<SpecificMapSet<u8>>();

        if unscorable > 0 {
            self.issue(Issue::UnscorableMatches {
                level: Level::Spectrum,
                count: unscorable,
            });
        }
        let report = format!(
            "PSM map filled: {} spectra scored over {} keys ({} search engine(s))",
            self.identification.spectra.len() - unscorable,
            map.len(),
            n_engines,
        );
        self.spectrum_map = Some(map);
        self.finish_stage(start, report);
        Ok(())
    }

    pub fn estimate_spectra(&mut self) -> Result<()> {
        self.enter(Stage::SpectrumEstimate)?;
        let start = Instant::now();
        // Kept until the stage commits, so a cancelled estimate can be retried
        let map = self
            .spectrum_map
            .clone()
            .ok_or(Error::MissingMap(self.stage))?;

        let cured = map.cure(self.preferences.min_decoys);
        for issue in curation_issues(Level::Spectrum, &cured) {
            self.issue(issue);
        }
        let model = cured.estimate_probabilities();

        let stratification = self.preferences.spectrum_stratification;
        let probabilities = staged(
            &self.stop,
            self.stage,
            &self.identification.spectra,
            |s| {
                s.score()
                    .map(|score| model.probability(&stratification.key(s), score))
            },
        )?;
        self.checkpoint()?;
        attach_probabilities(&mut self.identification.spectra, probabilities);

        let report = format!("PSM probabilities estimated for {} keys", model.len());
        self.spectrum_map = None;
        self.spectrum_model = Some(model);
        self.finish_stage(start, report);
        Ok(())
    }

    /// Peptide score: product of the probabilities of the spectra whose best
    /// assumption is this peptide
    pub fn fill_peptides(&mut self) -> Result<()> {
        self.enter(Stage::PeptideFill)?;
        let start = Instant::now();

        let identification = &*self.identification;
        let scores = staged(
            &self.stop,
            self.stage,
            &identification.peptides,
            |peptide| {
                peptide
                    .evidence
                    .spectra
                    .iter()
                    .filter_map(|id| identification.spectrum(id))
                    .filter(|spectrum| {
                        spectrum
                            .evidence
                            .best_assumption()
                            .map_or(false, |best| best.peptide == peptide.key)
                    })
                    .filter_map(|spectrum| spectrum.probability())
                    .fold(None, |acc: Option<f64>, p| Some(acc.unwrap_or(1.0) * p))
            },
        )?;
        self.checkpoint()?;

        let peptides = &mut self.identification.peptides;
        let unscorable = attach_scores(peptides, scores)?;

        let stratification = self.preferences.peptide_stratification;
        let map = peptides
            .par_iter()
            .filter_map(|p| Some((stratification.key(p), p.score()?, p.decoy)))
            .collect::<SpecificMapSet<String>>();

        if unscorable > 0 {
            self.issue(Issue::UnscorableMatches {
                level: Level::Peptide,
                count: unscorable,
            });
        }
        let report = format!(
            "Peptide map filled: {} peptides scored",
            self.identification.peptides.len() - unscorable
        );
        self.peptide_map = Some(map);
        self.finish_stage(start, report);
        Ok(())
    }

    pub fn estimate_peptides(&mut self) -> Result<()> {
        self.enter(Stage::PeptideEstimate)?;
        let start = Instant::now();
        let map = self
            .peptide_map
            .clone()
            .ok_or(Error::MissingMap(self.stage))?;

        let cured = map.cure(self.preferences.min_decoys);
        for issue in curation_issues(Level::Peptide, &cured) {
            self.issue(issue);
        }
        let model = cured.estimate_probabilities();

        let stratification = self.preferences.peptide_stratification;
        let probabilities = staged(
            &self.stop,
            self.stage,
            &self.identification.peptides,
            |p| {
                p.score()
                    .map(|score| model.probability(&stratification.key(p), score))
            },
        )?;
        self.checkpoint()?;
        attach_probabilities(&mut self.identification.peptides, probabilities);

        let report = format!("Peptide probabilities estimated for {} keys", model.len());
        self.peptide_map = None;
        self.peptide_model = Some(model);
        self.finish_stage(start, report);
        Ok(())
    }

    /// Protein score: product of the probabilities of its proteotypic
    /// peptides. Shared peptides are ignored.
    pub fn fill_proteins(&mut self) -> Result<()> {
        self.enter(Stage::ProteinFill)?;
        let start = Instant::now();

        let identification = &*self.identification;
        let scores = staged(
            &self.stop,
            self.stage,
            &identification.proteins,
            |protein| {
                protein
                    .evidence
                    .peptides
                    .iter()
                    .filter_map(|key| identification.peptide(key))
                    .filter(|peptide| peptide.evidence.is_proteotypic())
                    .filter_map(|peptide| peptide.probability())
                    .fold(None, |acc: Option<f64>, p| Some(acc.unwrap_or(1.0) * p))
            },
        )?;
        self.checkpoint()?;

        let proteins = &mut self.identification.proteins;
        let unscorable = attach_scores(proteins, scores)?;
        let map = proteins
            .par_iter()
            .filter_map(|p| Some((p.score()?, p.decoy)))
            .collect::<TargetDecoyMap>();

        if unscorable > 0 {
            self.issue(Issue::UnscorableMatches {
                level: Level::Protein,
                count: unscorable,
            });
        }
        let report = format!(
            "Protein map filled: {} proteins scored",
            self.identification.proteins.len() - unscorable
        );
        self.protein_map = Some(map);
        self.finish_stage(start, report);
        Ok(())
    }

    pub fn estimate_proteins(&mut self) -> Result<()> {
        self.enter(Stage::ProteinEstimate)?;
        let start = Instant::now();
        let map = self
            .protein_map
            .clone()
            .ok_or(Error::MissingMap(self.stage))?;

        let cured = map.cure(self.preferences.min_decoys);
        if let Some(issue) = curation_issue(Level::Protein, String::new(), &cured) {
            self.issue(issue);
        }
        if cured.non_finite() > 0 {
            self.issue(Issue::NonFiniteScores {
                level: Level::Protein,
                count: cured.non_finite(),
            });
        }
        let model = cured.estimate_probabilities();

        let probabilities = staged(
            &self.stop,
            self.stage,
            &self.identification.proteins,
            |p| p.score().map(|score| model.probability(score)),
        )?;
        self.checkpoint()?;
        attach_probabilities(&mut self.identification.proteins, probabilities);

        let report = format!(
            "Protein probabilities estimated ({} targets, {} decoys)",
            model.n_targets(),
            model.n_decoys()
        );
        self.protein_map = None;
        self.protein_model = Some(model);
        self.finish_stage(start, report);
        Ok(())
    }

    /// Bundle the finalized models. Only available once every stage ran.
    pub fn maps(&self) -> Result<ValidationMaps> {
        let missing = || Error::StageOrder {
            requested: Stage::Done,
            current: self.stage,
        };
        Ok(ValidationMaps {
            spectrum: self.spectrum_model.clone().ok_or_else(missing)?,
            peptide: self.peptide_model.clone().ok_or_else(missing)?,
            protein: self.protein_model.clone().ok_or_else(missing)?,
            spectrum_stratification: self.preferences.spectrum_stratification,
            peptide_stratification: self.preferences.peptide_stratification,
        })
    }

    fn stages(&mut self) -> Result<ValidationMaps> {
        loop {
            match self.stage {
                Stage::SpectrumFill => self.fill_spectra()?,
                Stage::SpectrumEstimate => self.estimate_spectra()?,
                Stage::PeptideFill => self.fill_peptides()?,
                Stage::PeptideEstimate => self.estimate_peptides()?,
                Stage::ProteinFill => self.fill_proteins()?,
                Stage::ProteinEstimate => self.estimate_proteins()?,
                Stage::Done => return self.maps(),
            }
        }
    }

    /// Run every remaining stage. Issues are appended to the progress sink
    /// at the end of the run, whether it completed or not.
    pub fn run(&mut self) -> Result<ValidationMaps> {
        let result = self.stages();
        for issue in &self.issues {
            self.sink.append_report(&issue.to_string());
        }
        match &result {
            Ok(_) => self.sink.set_run_finished(),
            Err(e) => self
                .sink
                .append_report(&format!("Validation incomplete: {}", e)),
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::identification::*;
    use crate::progress::ReportLog;

    fn spectrum(id: &str, seq: &str, e_value: f64, decoy: bool) -> SpectrumMatch {
        let mut evidence = SpectrumEvidence::new(2);
        evidence.push(
            Advocate::MASCOT,
            PeptideAssumption {
                peptide: PeptideKey::unmodified(seq),
                e_value,
                decoy,
            },
        );
        SpectrumMatch::new(id.into(), false, evidence)
    }

    fn peptide(seq: &str, spectra: &[&str], proteins: &[&str], decoy: bool) -> PeptideMatch {
        PeptideMatch::new(
            PeptideKey::unmodified(seq),
            decoy,
            PeptideEvidence {
                spectra: spectra.iter().map(|&s| s.into()).collect(),
                proteins: proteins.iter().map(|&s| s.into()).collect(),
            },
        )
    }

    fn protein(accessions: &[&str], peptides: &[&str], decoy: bool) -> ProteinMatch {
        ProteinMatch::new(
            ProteinKey::new(accessions.iter().copied()),
            decoy,
            ProteinEvidence {
                peptides: peptides.iter().map(|&s| PeptideKey::unmodified(s)).collect(),
            },
        )
    }

    /// Target-only store: every map falls back to identity probabilities
    fn protein_store() -> Identification {
        Identification::new(
            vec![
                spectrum("s1", "AAA", 0.1, false),
                spectrum("s2", "BBB", 0.05, false),
                spectrum("s3", "CCC", 0.01, false),
            ],
            vec![
                peptide("AAA", &["s1"], &["P1"], false),
                peptide("BBB", &["s2"], &["P1"], false),
                peptide("CCC", &["s3"], &["P1", "P2"], false),
            ],
            vec![
                protein(&["P1"], &["AAA", "BBB", "CCC"], false),
                protein(&["P2"], &["CCC"], false),
            ],
        )
        .unwrap()
    }

    #[test]
    fn stage_order_is_enforced() {
        let mut store = protein_store();
        let log = ReportLog::default();
        let mut pipeline =
            ValidationPipeline::new(&mut store, IdentificationPreferences::default(), &log)
                .unwrap();
        match pipeline.fill_peptides() {
            Err(Error::StageOrder { requested, current }) => {
                assert_eq!(requested, Stage::PeptideFill);
                assert_eq!(current, Stage::SpectrumFill);
            }
            other => panic!("unexpected {:?}", other.err()),
        }
        assert!(pipeline.maps().is_err());
        pipeline.fill_spectra().unwrap();
        assert!(pipeline.fill_spectra().is_err());
        drop(pipeline);
        assert!(store.peptides().iter().all(|p| p.validation().is_none()));
    }

    #[test]
    fn shared_peptides_are_excluded_from_proteins() {
        let mut store = protein_store();
        let log = ReportLog::default();
        let mut pipeline =
            ValidationPipeline::new(&mut store, IdentificationPreferences::default(), &log)
                .unwrap();
        pipeline.run().unwrap();
        assert_eq!(pipeline.stage(), Stage::Done);
        assert!(pipeline
            .issues()
            .contains(&Issue::UnscorableMatches {
                level: Level::Protein,
                count: 1
            }));
        drop(pipeline);

        let peptide = store.peptide(&PeptideKey::unmodified("CCC")).unwrap();
        assert_eq!(peptide.probability(), Some(0.01));

        let p1 = store.protein(&ProteinKey::new(["P1"])).unwrap();
        assert!((p1.score().unwrap() - 0.005).abs() < 1e-12);
        let p2 = store.protein(&ProteinKey::new(["P2"])).unwrap();
        assert_eq!(p2.score(), None);
        assert_eq!(p2.probability(), None);

        assert!(log.is_finished());
        assert!(log.lines().iter().any(|l| l.contains("without evidence")));
    }

    fn cascade_store() -> Identification {
        let mut spectra = vec![];
        let mut peptides = vec![];
        for i in 0..40 {
            let decoy = i % 4 == 3;
            let seq = format!("PEP{}", i % 10);
            let id = format!("scan={}", i);
            // Decoys score worse on average
            let e_value = match decoy {
                true => 0.01 * (i as f64 + 10.0),
                false => 0.001 * (i as f64 + 1.0),
            };
            spectra.push(spectrum(&id, &seq, e_value, decoy));
        }
        // Some spectra point at a peptide that is not their best assumption
        for i in 0..10 {
            let seq = format!("PEP{}", i);
            let ids = (0..40)
                .filter(|j| j % 10 == i || j % 10 == (i + 1) % 10)
                .map(|j| format!("scan={}", j))
                .collect::<Vec<_>>();
            let ids = ids.iter().map(String::as_str).collect::<Vec<_>>();
            peptides.push(peptide(&seq, &ids, &["P1"], i % 4 == 3));
        }
        Identification::new(spectra, peptides, vec![]).unwrap()
    }

    #[test]
    fn cascade_consistency() {
        let mut store = cascade_store();
        let log = ReportLog::default();
        ValidationPipeline::new(&mut store, IdentificationPreferences::default(), &log)
            .unwrap()
            .run()
            .unwrap();

        for peptide in store.peptides() {
            let expected = peptide
                .evidence
                .spectra
                .iter()
                .map(|id| store.spectrum(id).unwrap())
                .filter(|s| s.evidence.best_assumption().unwrap().peptide == peptide.key)
                .map(|s| s.probability().unwrap())
                .product::<f64>();
            assert_eq!(peptide.score(), Some(expected));
        }
    }

    #[test]
    fn cancellation_commits_nothing() {
        let mut store = cascade_store();
        let log = ReportLog::default();
        let stop = StopFlag::default();
        let mut pipeline =
            ValidationPipeline::new(&mut store, IdentificationPreferences::default(), &log)
                .unwrap()
                .with_stop(stop.clone());
        pipeline.fill_spectra().unwrap();
        pipeline.estimate_spectra().unwrap();
        stop.stop();
        assert!(matches!(
            pipeline.fill_peptides(),
            Err(Error::Cancelled(Stage::PeptideFill))
        ));
        assert!(matches!(pipeline.run(), Err(Error::Cancelled(_))));
        drop(pipeline);

        assert!(store.spectra().iter().all(|s| s.probability().is_some()));
        assert!(store.peptides().iter().all(|p| p.validation().is_none()));
        assert!(!log.is_finished());
        assert!(log.lines().last().unwrap().starts_with("Validation incomplete"));
    }

    #[test]
    fn maps_serialize() {
        let mut store = cascade_store();
        let log = ReportLog::default();
        let maps = ValidationPipeline::new(&mut store, IdentificationPreferences::default(), &log)
            .unwrap()
            .run()
            .unwrap();
        let json = serde_json::to_string(&maps).unwrap();
        let back: ValidationMaps = serde_json::from_str(&json).unwrap();
        assert_eq!(back.spectrum.len(), 1);
        assert_eq!(back.peptide.len(), 1);
        let (a, b) = (back.spectrum.get(&2).unwrap(), maps.spectrum.get(&2).unwrap());
        assert_eq!(a.bins().len(), b.bins().len());
        assert_eq!(a.window(), b.window());
        assert_eq!(a.n_decoys(), b.n_decoys());
        assert!(back.protein.bins().is_empty());
    }

    #[test]
    fn estimate_without_map_names_the_stage() {
        let mut store = protein_store();
        let log = ReportLog::default();
        let mut pipeline =
            ValidationPipeline::new(&mut store, IdentificationPreferences::default(), &log)
                .unwrap();
        pipeline.stage = Stage::PeptideEstimate;
        let err = pipeline.estimate_peptides().unwrap_err();
        assert!(matches!(err, Error::MissingMap(Stage::PeptideEstimate)));
        assert_eq!(
            err.to_string(),
            "stage `peptide_estimate` has no filled map to estimate"
        );
    }

    #[test]
    fn maps_carry_their_grouping() {
        let mut store = protein_store();
        let log = ReportLog::default();
        let mut prefs = IdentificationPreferences::default();
        prefs.spectrum_stratification = SpectrumStratification::EngineCount;
        prefs.peptide_stratification = PeptideStratification::Modifications;
        let maps = ValidationPipeline::new(&mut store, prefs, &log)
            .unwrap()
            .run()
            .unwrap();
        let back: ValidationMaps =
            serde_json::from_str(&serde_json::to_string(&maps).unwrap()).unwrap();
        assert_eq!(back.spectrum_stratification, SpectrumStratification::EngineCount);
        assert_eq!(back.peptide_stratification, PeptideStratification::Modifications);
    }
}
