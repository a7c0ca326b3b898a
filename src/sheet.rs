//! Tab-separated sample sheet reader.
//!
//! The first column holds the sample name whatever its header says; every
//! other column is looked up by header name. Rows are validated here, once,
//! so a malformed sheet is rejected before anything is sent to a server.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use csv::{ReaderBuilder, StringRecord};

use crate::domain::{
    AnnotationFields, Characteristic, CollectionName, Payload, ReadFiles, ReadLayout,
    SampleName, SampleRecord,
};
use crate::error::TransferError;
use crate::pipeline::{RecordSource, SourceEntry};

pub const REQUIRED_COLUMNS: &[&str] = &[
    "COLLECTION",
    "PAIRED",
    "FASTQ_R1",
    "SEQ_TYPE",
    "EXTRACTION_PROTOCOL",
    "LIBRARY_CONSTRUCTION_PROTOCOL",
    "TREATMENT_PROTOCOL",
    "GROWTH_PROTOCOL",
    "ANNOTATOR",
    "SOURCE",
    "ORGANISM",
    "STRAIN",
    "GENOTYPE",
    "MOLECULE",
];

/// Characteristic columns copied into the sample descriptor as `KEY:VALUE`.
pub const OPTIONAL_CHARACTERISTICS: &[&str] =
    &["LIBRARY_STRATEGY", "TISSUE", "AGE", "OTHER_CHAR_1", "OTHER_CHAR_2"];

#[derive(Debug, Clone)]
pub struct SheetSource {
    path: Utf8PathBuf,
}

impl SheetSource {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordSource for SheetSource {
    /// Any invalid row rejects the whole sheet.
    fn records(&self) -> Result<Vec<SourceEntry>, TransferError> {
        Ok(read_sheet(&self.path)?.into_iter().map(Ok).collect())
    }
}

pub fn read_sheet(path: &Utf8Path) -> Result<Vec<SampleRecord>, TransferError> {
    let file = File::open(path.as_std_path())
        .map_err(|_| TransferError::SheetRead(path.as_std_path().to_path_buf()))?;
    parse_sheet(file)
}

pub fn parse_sheet<R: Read>(reader: R) -> Result<Vec<SampleRecord>, TransferError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_reader(reader);

    let header = reader.headers().map_err(sheet_parse_error)?.clone();
    for column in REQUIRED_COLUMNS {
        if !header.iter().any(|name| name.trim() == *column) {
            return Err(TransferError::MissingColumn(column.to_string()));
        }
    }

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(sheet_parse_error)?;
        if row.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        let row = SheetRow::new(&header, &row);
        let record = parse_row(&row)?;
        if !seen.insert(record.name.clone()) {
            return Err(TransferError::DuplicateSample(record.name.to_string()));
        }
        records.push(record);
    }
    Ok(records)
}

/// Splits a comma separated path list, dropping blank entries.
pub fn split_paths(value: &str) -> Vec<Utf8PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(Utf8PathBuf::from)
        .collect()
}

struct SheetRow<'a> {
    name: &'a str,
    values: HashMap<&'a str, &'a str>,
}

impl<'a> SheetRow<'a> {
    fn new(header: &'a StringRecord, row: &'a StringRecord) -> Self {
        let name = row.get(0).unwrap_or("");
        let values = header
            .iter()
            .enumerate()
            .skip(1)
            .map(|(index, column)| (column.trim(), row.get(index).unwrap_or("")))
            .collect();
        Self { name, values }
    }

    fn has(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    fn get(&self, column: &str) -> &'a str {
        self.values.get(column).copied().unwrap_or("").trim()
    }

    fn text(&self, column: &str) -> String {
        self.get(column).to_string()
    }
}

fn parse_row(row: &SheetRow<'_>) -> Result<SampleRecord, TransferError> {
    let name: SampleName = row.name.parse()?;
    let missing = |field: &str| TransferError::MissingField {
        sample: name.to_string(),
        field: field.to_string(),
    };

    let collection = CollectionName::from_optional(row.get("COLLECTION"))
        .ok_or_else(|| missing("COLLECTION"))?;

    let flag = row.get("PAIRED");
    let layout = ReadLayout::from_flag(flag).ok_or_else(|| TransferError::InvalidPairedFlag {
        sample: name.to_string(),
        value: flag.to_string(),
    })?;

    let r1 = split_paths(row.get("FASTQ_R1"));
    if r1.is_empty() {
        return Err(missing("FASTQ_R1"));
    }
    let files = match layout {
        ReadLayout::Single => ReadFiles::Single(r1),
        ReadLayout::Paired => {
            if !row.has("FASTQ_R2") {
                return Err(TransferError::MissingColumn("FASTQ_R2".to_string()));
            }
            let r2 = split_paths(row.get("FASTQ_R2"));
            if r2.is_empty() {
                return Err(missing("FASTQ_R2"));
            }
            if r1.len() != r2.len() {
                return Err(TransferError::MismatchedReadLists {
                    sample: name.to_string(),
                    r1: r1.len(),
                    r2: r2.len(),
                });
            }
            ReadFiles::Paired { r1, r2 }
        }
    };

    let characteristics = OPTIONAL_CHARACTERISTICS
        .iter()
        .map(|key| Characteristic::new(*key, row.get(key)))
        .collect();

    let annotation = AnnotationFields {
        experiment_type: row.text("SEQ_TYPE"),
        extract_protocol: row.text("EXTRACTION_PROTOCOL"),
        library_prep: row.text("LIBRARY_CONSTRUCTION_PROTOCOL"),
        treatment_protocol: row.text("TREATMENT_PROTOCOL"),
        growth_protocol: row.text("GROWTH_PROTOCOL"),
        fragmentation_method: None,
        reads_info: None,
        annotator: row.text("ANNOTATOR"),
        source: row.text("SOURCE"),
        organism: row.text("ORGANISM"),
        strain: row.text("STRAIN"),
        genotype: row.text("GENOTYPE"),
        molecule: row.text("MOLECULE"),
        characteristics,
    };

    Ok(SampleRecord {
        name,
        collection: Some(collection),
        payload: Payload::Local(files),
        annotation,
    })
}

fn sheet_parse_error(err: csv::Error) -> TransferError {
    TransferError::SheetParse {
        line: err.position().map(|pos| pos.line()).unwrap_or(0),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const HEADER: &str = "SAMPLE\tCOLLECTION\tPAIRED\tFASTQ_R1\tFASTQ_R2\tSEQ_TYPE\tEXTRACTION_PROTOCOL\tLIBRARY_CONSTRUCTION_PROTOCOL\tTREATMENT_PROTOCOL\tGROWTH_PROTOCOL\tANNOTATOR\tSOURCE\tORGANISM\tSTRAIN\tGENOTYPE\tMOLECULE\tLIBRARY_STRATEGY\tTISSUE\tAGE\tOTHER_CHAR_1\tOTHER_CHAR_2";

    fn sheet(rows: &[&str]) -> String {
        let mut text = HEADER.to_string();
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text.push('\n');
        text
    }

    #[test]
    fn single_end_row() {
        let text = sheet(&["S1\tC1\t0\ta.fastq\t\tRNA-seq\tTRIzol\tTruSeq\tnone\tHL5\tJane\tlab\tD. discoideum\tAX4\twt\ttotal RNA\tRNA-Seq\t\t\t\t"]);
        let records = parse_sheet(text.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.name.as_str(), "S1");
        assert_eq!(record.collection.as_ref().unwrap().as_str(), "C1");
        assert_eq!(
            record.payload,
            Payload::Local(ReadFiles::Single(vec![Utf8PathBuf::from("a.fastq")]))
        );
        assert_eq!(record.annotation.experiment_type, "RNA-seq");
        assert_eq!(record.annotation.library_prep, "TruSeq");
        assert_eq!(record.annotation.characteristics.len(), 5);
        assert_eq!(record.annotation.characteristics[0].value, "RNA-Seq");
    }

    #[test]
    fn paired_end_row_splits_lists() {
        let text = sheet(&["S2\tC1\t1\ta1.fastq,a2.fastq,\t,b1.fastq,b2.fastq\tRNA-seq\te\tl\tt\tg\tJane\tlab\tD. discoideum\tAX4\twt\tRNA"]);
        let records = parse_sheet(text.as_bytes()).unwrap();
        assert_eq!(
            records[0].payload,
            Payload::Local(ReadFiles::Paired {
                r1: vec!["a1.fastq".into(), "a2.fastq".into()],
                r2: vec!["b1.fastq".into(), "b2.fastq".into()],
            })
        );
    }

    #[test]
    fn short_rows_are_padded() {
        let text = sheet(&["S3\tC1\t0\ta.fastq"]);
        let records = parse_sheet(text.as_bytes()).unwrap();
        assert_eq!(records[0].annotation.organism, "");
        assert!(
            records[0]
                .annotation
                .characteristics
                .iter()
                .all(|c| c.value.is_empty())
        );
    }

    #[test]
    fn invalid_paired_flag_is_rejected() {
        let text = sheet(&["S1\tC1\t2\ta.fastq"]);
        let err = parse_sheet(text.as_bytes()).unwrap_err();
        assert_matches!(err, TransferError::InvalidPairedFlag { value, .. } if value == "2");
    }

    #[test]
    fn later_invalid_row_rejects_whole_sheet() {
        let text = sheet(&["S1\tC1\t0\ta.fastq", "S2\tC1\tx\tb.fastq"]);
        let err = parse_sheet(text.as_bytes()).unwrap_err();
        assert_matches!(err, TransferError::InvalidPairedFlag { .. });
    }

    #[test]
    fn mismatched_paired_lists() {
        let text = sheet(&["S1\tC1\t1\ta1.fastq,a2.fastq\tb1.fastq"]);
        let err = parse_sheet(text.as_bytes()).unwrap_err();
        assert_matches!(err, TransferError::MismatchedReadLists { r1: 2, r2: 1, .. });
    }

    #[test]
    fn missing_r2_for_paired() {
        let text = sheet(&["S1\tC1\t1\ta1.fastq\t"]);
        let err = parse_sheet(text.as_bytes()).unwrap_err();
        assert_matches!(err, TransferError::MissingField { field, .. } if field == "FASTQ_R2");
    }

    #[test]
    fn missing_collection_value() {
        let text = sheet(&["S1\t\t0\ta.fastq"]);
        let err = parse_sheet(text.as_bytes()).unwrap_err();
        assert_matches!(err, TransferError::MissingField { field, .. } if field == "COLLECTION");
    }

    #[test]
    fn missing_required_column() {
        let text = "SAMPLE\tCOLLECTION\tPAIRED\nS1\tC1\t0\n";
        let err = parse_sheet(text.as_bytes()).unwrap_err();
        assert_matches!(err, TransferError::MissingColumn(column) if column == "FASTQ_R1");
    }

    #[test]
    fn duplicate_sample_names() {
        let text = sheet(&["S1\tC1\t0\ta.fastq", "S1\tC2\t0\tb.fastq"]);
        let err = parse_sheet(text.as_bytes()).unwrap_err();
        assert_matches!(err, TransferError::DuplicateSample(name) if name == "S1");
    }

    #[test]
    fn blank_lines_are_skipped() {
        let text = sheet(&["S1\tC1\t0\ta.fastq", "\t\t", "S2\tC1\t0\tb.fastq"]);
        let records = parse_sheet(text.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn split_paths_drops_blanks() {
        assert_eq!(
            split_paths(" a.fq , ,b.fq,"),
            vec![Utf8PathBuf::from("a.fq"), Utf8PathBuf::from("b.fq")]
        );
    }
}
