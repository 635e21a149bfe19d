pub mod identification;
pub mod input_map;
pub mod pipeline;
pub mod preferences;
pub mod progress;
pub mod specific_map;
pub mod target_decoy;
pub mod threshold;

use identification::{PeptideKey, ProteinKey, SpectrumId};
use pipeline::Stage;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("stage `{requested}` cannot run while the pipeline is at `{current}`")]
    StageOrder { requested: Stage, current: Stage },
    #[error("stage `{0}` has no filled map to estimate")]
    MissingMap(Stage),
    #[error("validation cancelled during `{0}`, no results were committed for this level")]
    Cancelled(Stage),
    #[error("peptide `{peptide}` references unknown spectrum `{spectrum}`")]
    MissingSpectrum {
        peptide: PeptideKey,
        spectrum: SpectrumId,
    },
    #[error("protein `{protein}` references unknown peptide `{peptide}`")]
    MissingPeptide {
        protein: ProteinKey,
        peptide: PeptideKey,
    },
    #[error("duplicate identification key `{0}`")]
    DuplicateKey(String),
    #[error("validation parameter already attached to `{0}`")]
    AlreadyAttached(String),
    #[error("invalid FDR {0}, expected a value in [0, 1]")]
    InvalidFdr(f64),
}

pub type Result<T> = std::result::Result<T, Error>;
