//! Inventory comparison
//!
//! Pure functions classifying scans and resource files of a source
//! experiment against its mirror copy.

use std::collections::HashMap;

use serde::Serialize;

use crate::app::catalog::ResourceFile;
use crate::app::models::{ResourceFolder, ScanRecord};

/// A series present on the source only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingScan {
    pub series: String,
    /// Resource label to download the series under
    pub format: String,
}

/// A series present on both sides with different file counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DifferingScan {
    pub series: String,
    pub source_count: u64,
    pub target_count: u64,
    pub format: String,
}

/// Compare scans by series number
///
/// File sizes are not compared; the archive recomputes them on import.
pub fn compare_scans(
    source: &[ScanRecord],
    target: &[ScanRecord],
) -> (Vec<MissingScan>, Vec<DifferingScan>) {
    let target: HashMap<&str, &ScanRecord> = target
        .iter()
        .map(|scan| (scan.series.as_str(), scan))
        .collect();

    let mut missing = Vec::new();
    let mut differing = Vec::new();

    for scan in source {
        match target.get(scan.series.as_str()) {
            None => missing.push(MissingScan {
                series: scan.series.clone(),
                format: scan.format.clone(),
            }),
            Some(copy) if copy.file_count != scan.file_count => differing.push(DifferingScan {
                series: scan.series.clone(),
                source_count: scan.file_count,
                target_count: copy.file_count,
                format: scan.format.clone(),
            }),
            Some(_) => {}
        }
    }

    (missing, differing)
}

/// Folders taking part in reconciliation
pub fn reconcilable(folders: &[ResourceFolder]) -> impl Iterator<Item = &ResourceFolder> {
    folders.iter().filter(|folder| !folder.is_degenerate())
}

/// Compare two folder listings by URI, then by digest
///
/// Returns the source files absent from the target and the URIs whose
/// digests differ.
pub fn compare_files(source: &[ResourceFile], target: &[ResourceFile]) -> (Vec<ResourceFile>, Vec<String>) {
    let target: HashMap<&str, &ResourceFile> = target
        .iter()
        .map(|file| (file.uri.as_str(), file))
        .collect();

    let mut missing = Vec::new();
    let mut differing = Vec::new();

    for file in source {
        match target.get(file.uri.as_str()) {
            None => missing.push(file.clone()),
            Some(copy) if copy.digest != file.digest => differing.push(file.uri.clone()),
            Some(_) => {}
        }
    }

    (missing, differing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::hash::Md5Hash;

    fn scan(series: &str, file_count: u64) -> ScanRecord {
        ScanRecord {
            series: series.to_string(),
            uid: String::new(),
            description: "T1w".to_string(),
            scan_type: "T1w".to_string(),
            image_type: String::new(),
            file_count,
            file_size: file_count * 1024,
            derived: false,
            raw: false,
            multiecho: false,
            resource_id: None,
            format: "DICOM".to_string(),
        }
    }

    fn file(uri: &str, content: &str) -> ResourceFile {
        ResourceFile {
            uri: uri.to_string(),
            id: format!("resources/{}", uri),
            digest: Some(Md5Hash::compute(content.as_bytes())),
            size: None,
            format: None,
            content: None,
        }
    }

    #[test]
    fn test_missing_series_reported_with_format() {
        // Test that {A:5, B:3} against {A:5} reports only B, as missing
        let source = vec![scan("A", 5), scan("B", 3)];
        let target = vec![scan("A", 5)];

        let (missing, differing) = compare_scans(&source, &target);
        assert_eq!(
            missing,
            vec![MissingScan {
                series: "B".to_string(),
                format: "DICOM".to_string()
            }]
        );
        assert!(differing.is_empty());
    }

    #[test]
    fn test_file_count_difference() {
        let mut target = scan("A", 5);
        target.file_size = 1;
        let (missing, differing) = compare_scans(&[scan("A", 6)], &[target]);
        assert!(missing.is_empty());
        assert_eq!(differing.len(), 1);
        assert_eq!(differing[0].source_count, 6);
        assert_eq!(differing[0].target_count, 5);
    }

    #[test]
    fn test_size_alone_is_not_a_difference() {
        let mut target = scan("A", 5);
        target.file_size = 1;
        let (missing, differing) = compare_scans(&[scan("A", 5)], &[target]);
        assert!(missing.is_empty() && differing.is_empty());
    }

    #[test]
    fn test_one_differing_digest() {
        // Test that exactly the URI with a changed digest is reported
        let source = vec![file("a.txt", "one"), file("b.txt", "two"), file("c.txt", "three")];
        let target = vec![file("a.txt", "one"), file("b.txt", "TWO"), file("c.txt", "three")];

        let (missing, differing) = compare_files(&source, &target);
        assert!(missing.is_empty());
        assert_eq!(differing, vec!["b.txt".to_string()]);
    }

    #[test]
    fn test_extra_target_files_ignored() {
        let source = vec![file("a.txt", "one")];
        let target = vec![file("a.txt", "one"), file("z.txt", "extra")];
        let (missing, differing) = compare_files(&source, &target);
        assert!(missing.is_empty() && differing.is_empty());

        let (missing, _) = compare_files(&target, &source);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].uri, "z.txt");
    }

    #[test]
    fn test_degenerate_folders_filtered() {
        let folder = |label: &str, count| ResourceFolder {
            label: label.to_string(),
            resource_id: format!("{}_id", label),
            file_count: count,
            file_size: 0,
        };
        let folders = vec![
            folder("NOLABEL", 4),
            folder("No Label", 2),
            folder("empty", 0),
            folder("behav", 3),
        ];

        let labels: Vec<_> = reconcilable(&folders).map(|f| f.label.as_str()).collect();
        assert_eq!(labels, vec!["behav"]);
    }
}
