use rayon::prelude::*;
use shaker_core::identification::{Match, PeptideMatch, ProteinMatch, SpectrumMatch};
use std::fmt::Display;

use crate::runner::Runner;

fn label(decoy: bool) -> &'static [u8] {
    match decoy {
        true => b"-1",
        false => b"1",
    }
}

/// Score, probability and validation columns shared by every level
fn push_validation<K: Display, E>(record: &mut csv::ByteRecord, m: &Match<K, E>) {
    for value in [m.score(), m.probability()] {
        match value {
            Some(x) => record.push_field(ryu::Buffer::new().format(x).as_bytes()),
            None => record.push_field(b""),
        }
    }
    record.push_field(itoa::Buffer::new().format(m.is_validated() as u8).as_bytes());
}

const VALIDATION_HEADERS: [&str; 3] = ["score", "posterior_error", "validated"];

impl Runner {
    pub fn serialize_spectrum(&self, spectrum: &SpectrumMatch) -> csv::ByteRecord {
        let mut record = csv::ByteRecord::new();
        record.push_field(spectrum.key.0.as_bytes());
        record.push_field(itoa::Buffer::new().format(spectrum.evidence.charge).as_bytes());
        match spectrum.evidence.best_assumption() {
            Some(best) => {
                record.push_field(best.peptide.to_string().as_bytes());
                record.push_field(ryu::Buffer::new().format(best.e_value).as_bytes());
            }
            None => {
                record.push_field(b"");
                record.push_field(b"");
            }
        }
        record.push_field(itoa::Buffer::new().format(spectrum.evidence.advocates()).as_bytes());
        record.push_field(label(spectrum.decoy));
        push_validation(&mut record, spectrum);
        record
    }

    pub fn serialize_peptide(&self, peptide: &PeptideMatch) -> csv::ByteRecord {
        let mut record = csv::ByteRecord::new();
        record.push_field(peptide.key.to_string().as_bytes());
        record.push_field(peptide.evidence.proteins.join(";").as_bytes());
        record.push_field(itoa::Buffer::new().format(peptide.evidence.spectra.len()).as_bytes());
        record.push_field(
            itoa::Buffer::new()
                .format(peptide.evidence.is_proteotypic() as u8)
                .as_bytes(),
        );
        record.push_field(label(peptide.decoy));
        push_validation(&mut record, peptide);
        record
    }

    pub fn serialize_protein(&self, protein: &ProteinMatch) -> csv::ByteRecord {
        let mut record = csv::ByteRecord::new();
        record.push_field(protein.key.to_string().as_bytes());
        record.push_field(itoa::Buffer::new().format(protein.evidence.peptides.len()).as_bytes());
        record.push_field(label(protein.decoy));
        push_validation(&mut record, protein);
        record
    }

    fn write_tsv<T, F>(
        &self,
        file_name: &str,
        headers: &[&str],
        rows: &[T],
        f: F,
    ) -> anyhow::Result<String>
    where
        T: Sync,
        F: Fn(&T) -> csv::ByteRecord + Sync + Send,
    {
        let path = self.make_path(file_name);

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let mut header = csv::ByteRecord::from(headers.to_vec());
        header.extend(VALIDATION_HEADERS);
        wtr.write_byte_record(&header)?;

        for record in rows.par_iter().map(f).collect::<Vec<_>>() {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }

    pub fn write_psms(&self, spectra: &[SpectrumMatch]) -> anyhow::Result<String> {
        self.write_tsv(
            "psms.shaker.tsv",
            &["spectrum", "charge", "peptide", "e_value", "engines", "label"],
            spectra,
            |s| self.serialize_spectrum(s),
        )
    }

    pub fn write_peptides(&self, peptides: &[PeptideMatch]) -> anyhow::Result<String> {
        self.write_tsv(
            "peptides.shaker.tsv",
            &["peptide", "proteins", "spectra", "proteotypic", "label"],
            peptides,
            |p| self.serialize_peptide(p),
        )
    }

    pub fn write_proteins(&self, proteins: &[ProteinMatch]) -> anyhow::Result<String> {
        self.write_tsv(
            "proteins.shaker.tsv",
            &["proteins", "peptides", "label"],
            proteins,
            |p| self.serialize_protein(p),
        )
    }
}
