//! Typed projections of XNAT metadata
//!
//! XNAT answers subject and experiment queries with a nested tree of
//! `data_fields`/`children`/`items` nodes. The tree is walked exactly once
//! here and projected onto [`Subject`], [`Experiment`], [`ScanRecord`] and
//! [`ResourceFolder`]; nothing else in the crate looks at raw JSON nodes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::xnat;
use crate::errors::{ArchiveError, ArchiveResult};

/// One `data_fields`/`children` node of an XNAT JSON tree
#[derive(Debug, Default, Deserialize)]
struct Node {
    #[serde(default)]
    data_fields: Map<String, Value>,
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    #[serde(default)]
    field: String,
    #[serde(default)]
    items: Vec<Node>,
}

impl Node {
    /// Field rendered as text; numbers are stringified, absent fields are empty
    fn text(&self, key: &str) -> String {
        match self.data_fields.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }

    fn opt_text(&self, key: &str) -> Option<String> {
        self.data_fields.get(key)?;
        Some(self.text(key))
    }

    /// Numeric field that XNAT may report as a number or a string
    fn count(&self, key: &str) -> u64 {
        match self.data_fields.get(key) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Items of the first child whose field matches
    fn items(&self, field: &str) -> &[Node] {
        self.children
            .iter()
            .find(|child| child.field == field)
            .map(|child| child.items.as_slice())
            .unwrap_or(&[])
    }
}

/// Extract the first entry of a `{"items": [...]}` query answer
fn first_item(value: &Value, what: &str) -> ArchiveResult<Node> {
    let item = value
        .get("items")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .ok_or_else(|| ArchiveError::parse(what, "response has no items"))?;
    Node::deserialize(item).map_err(|e| ArchiveError::parse(what, e))
}

/// Rows of a `{"ResultSet": {"Result": [...]}}` listing
pub fn result_rows<'a>(value: &'a Value, what: &str) -> ArchiveResult<&'a [Value]> {
    value
        .get("ResultSet")
        .and_then(|set| set.get("Result"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| ArchiveError::parse(what, "missing ResultSet.Result"))
}

/// Column of a listing row as text
pub fn row_text(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Project, subject and experiment labels addressing one experiment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ExperimentPath {
    pub project: String,
    pub subject: String,
    pub experiment: String,
}

impl ExperimentPath {
    pub fn new(
        project: impl Into<String>,
        subject: impl Into<String>,
        experiment: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            subject: subject.into(),
            experiment: experiment.into(),
        }
    }
}

impl From<&Experiment> for ExperimentPath {
    fn from(experiment: &Experiment) -> Self {
        Self::new(
            experiment.project.as_str(),
            experiment.subject.as_str(),
            experiment.label.as_str(),
        )
    }
}

impl std::fmt::Display for ExperimentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.subject, self.experiment)
    }
}

/// A study participant on one server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subject {
    pub project: String,
    pub label: String,
    pub id: String,
    pub experiments: Vec<Experiment>,
}

impl Subject {
    /// Project a subject query answer
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Parse` if the answer has no items.
    pub fn from_json(value: &Value) -> ArchiveResult<Self> {
        let node = first_item(value, "subject")?;
        let project = node.text("project");
        let label = node.text("label");

        let experiments = node
            .items("experiments/experiment")
            .iter()
            .map(|item| Experiment::from_node(&project, &label, item))
            .collect();

        Ok(Self {
            id: node.text("ID"),
            project,
            label,
            experiments,
        })
    }

    pub fn experiment_labels(&self) -> Vec<&str> {
        self.experiments.iter().map(|e| e.label.as_str()).collect()
    }
}

/// One imaging session under a subject
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Experiment {
    pub project: String,
    pub subject: String,
    /// Label visible in `project`; the share label when shared
    pub label: String,
    /// Label the experiment carries in its own project
    pub source_label: String,
    pub id: String,
    pub uid: String,
    pub date: String,
    pub shared: bool,
    pub scans: Vec<ScanRecord>,
    pub resource_folders: Vec<ResourceFolder>,
}

impl Experiment {
    /// Project an experiment query answer
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Parse` if the answer has no items.
    pub fn from_json(project: &str, subject: &str, value: &Value) -> ArchiveResult<Self> {
        let node = first_item(value, "experiment")?;
        Ok(Self::from_node(project, subject, &node))
    }

    fn from_node(project: &str, subject: &str, node: &Node) -> Self {
        let own_label = node.text("label");
        let share_label = node
            .items("sharing/share")
            .iter()
            .map(|share| share.text("label"))
            .find(|label| label.contains(subject));

        let (label, shared) = match share_label {
            Some(share_label) => (share_label, true),
            None => (own_label.clone(), false),
        };

        let scans = node
            .items("scans/scan")
            .iter()
            .map(ScanRecord::from_node)
            .collect();
        let resource_folders = node
            .items("resources/resource")
            .iter()
            .map(ResourceFolder::from_node)
            .collect();

        Self {
            project: project.to_string(),
            subject: subject.to_string(),
            label,
            source_label: own_label,
            id: node.text("ID"),
            uid: node.text("UID"),
            date: node.text("date"),
            shared,
            scans,
            resource_folders,
        }
    }

    pub fn scan(&self, series: &str) -> Option<&ScanRecord> {
        self.scans.iter().find(|scan| scan.series == series)
    }

    pub fn resource_folder(&self, label: &str) -> Option<&ResourceFolder> {
        self.resource_folders.iter().find(|f| f.label == label)
    }
}

/// One acquired series within an experiment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRecord {
    pub series: String,
    pub uid: String,
    pub description: String,
    pub scan_type: String,
    pub image_type: String,
    pub file_count: u64,
    pub file_size: u64,
    pub derived: bool,
    pub raw: bool,
    pub multiecho: bool,
    /// Resource group holding the series' DICOM files
    pub resource_id: Option<String>,
    /// Resource label used when downloading the series
    pub format: String,
}

impl ScanRecord {
    fn from_node(node: &Node) -> Self {
        let files = node.items("file");

        // The file entry that carries data rather than snapshots
        let data_entry = files.iter().rev().find(|entry| {
            entry
                .opt_text("content")
                .is_some_and(|content| !content.contains("SNAPSHOT"))
        });

        let image_type = node.text("parameters/imageType");
        let description = match node.text("series_description") {
            d if !d.is_empty() => d,
            _ => node.text("type"),
        };

        let multiecho = node
            .children
            .first()
            .and_then(|child| child.items.first())
            .map(|item| item.text("name").contains("MultiEcho"))
            .unwrap_or(false);

        let raw = node
            .children
            .iter()
            .flat_map(|child| child.items.iter())
            .any(|item| item.text("content") == "RAW");

        let resource_id = files
            .iter()
            .find(|entry| entry.text("label") == xnat::DICOM_LABEL)
            .and_then(|entry| entry.opt_text("xnat_abstractresource_id"));

        Self {
            series: node.text("ID"),
            uid: node.text("UID"),
            description,
            scan_type: node.text("type"),
            derived: image_type.contains("DERIVED"),
            image_type,
            file_count: data_entry.map(|e| e.count("file_count")).unwrap_or(0),
            file_size: data_entry.map(|e| e.count("file_size")).unwrap_or(0),
            raw,
            multiecho,
            resource_id,
            format: Self::download_format(node),
        }
    }

    fn download_format(node: &Node) -> String {
        node.children
            .iter()
            .flat_map(|child| child.items.iter())
            .find_map(|item| {
                item.opt_text("label")
                    .or_else(|| item.opt_text("format"))
            })
            .unwrap_or_else(|| xnat::DICOM_LABEL.to_string())
    }
}

/// A non-DICOM file group attached to an experiment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFolder {
    pub label: String,
    pub resource_id: String,
    pub file_count: u64,
    pub file_size: u64,
}

impl ResourceFolder {
    fn from_node(node: &Node) -> Self {
        Self {
            label: node
                .opt_text("label")
                .unwrap_or_else(|| xnat::NOLABEL.to_string()),
            resource_id: node.text("xnat_abstractresource_id"),
            file_count: node.count("file_count"),
            file_size: node.count("file_size"),
        }
    }

    /// Unlabelled or empty folders left behind by failed uploads
    pub fn is_degenerate(&self) -> bool {
        self.label == xnat::NOLABEL || self.label == xnat::NO_LABEL || self.file_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn experiment_json() -> Value {
        json!({
            "items": [{
                "data_fields": {
                    "label": "SPN01_CMH_0001_01_01",
                    "ID": "XNAT_E00042",
                    "UID": "1.2.840.1",
                    "date": "2024-03-01"
                },
                "children": [
                    {
                        "field": "scans/scan",
                        "items": [
                            {
                                "data_fields": {
                                    "ID": "1",
                                    "UID": "1.2.840.1.1",
                                    "type": "T1w",
                                    "series_description": "Sag T1 BRAVO",
                                    "parameters/imageType": "ORIGINAL\\PRIMARY"
                                },
                                "children": [{
                                    "field": "file",
                                    "items": [
                                        {"data_fields": {
                                            "label": "DICOM", "format": "DICOM",
                                            "content": "RAW", "file_count": 176,
                                            "file_size": "93000000",
                                            "xnat_abstractresource_id": 501
                                        }},
                                        {"data_fields": {
                                            "label": "SNAPSHOTS", "content": "SNAPSHOTS",
                                            "file_count": 2
                                        }}
                                    ]
                                }]
                            },
                            {
                                "data_fields": {
                                    "ID": "2",
                                    "type": "FA map",
                                    "parameters/imageType": "DERIVED\\SECONDARY"
                                },
                                "children": [{
                                    "field": "file",
                                    "items": [{"data_fields": {
                                        "format": "NIFTI", "content": "MAP",
                                        "file_count": 1, "file_size": 2048
                                    }}]
                                }]
                            }
                        ]
                    },
                    {
                        "field": "resources/resource",
                        "items": [
                            {"data_fields": {"label": "behav", "xnat_abstractresource_id": 900,
                                              "file_count": 5, "file_size": 1200}},
                            {"data_fields": {"xnat_abstractresource_id": 901}}
                        ]
                    }
                ]
            }]
        })
    }

    #[test]
    fn test_experiment_projection() {
        // Test that the nested tree is projected onto typed records
        let exp = Experiment::from_json("SPINS", "SPN01_CMH_0001_01_01", &experiment_json()).unwrap();
        assert_eq!(exp.label, "SPN01_CMH_0001_01_01");
        assert_eq!(exp.id, "XNAT_E00042");
        assert!(!exp.shared);
        assert_eq!(exp.scans.len(), 2);

        let t1 = exp.scan("1").unwrap();
        assert_eq!(t1.description, "Sag T1 BRAVO");
        assert_eq!(t1.file_count, 176);
        assert_eq!(t1.file_size, 93_000_000);
        assert_eq!(t1.resource_id.as_deref(), Some("501"));
        assert_eq!(t1.format, "DICOM");
        assert!(t1.raw);
        assert!(!t1.derived);

        let fa = exp.scan("2").unwrap();
        assert_eq!(fa.description, "FA map");
        assert!(fa.derived);
        assert_eq!(fa.format, "NIFTI");
        assert_eq!(fa.resource_id, None);
    }

    #[test]
    fn test_resource_folder_defaults() {
        // Test that a folder without label or counts is degenerate
        let exp = Experiment::from_json("SPINS", "S", &experiment_json()).unwrap();
        let behav = exp.resource_folder("behav").unwrap();
        assert_eq!(behav.resource_id, "900");
        assert!(!behav.is_degenerate());

        let unlabelled = exp.resource_folder(xnat::NOLABEL).unwrap();
        assert_eq!(unlabelled.file_count, 0);
        assert!(unlabelled.is_degenerate());
    }

    #[test]
    fn test_shared_experiment_uses_share_label() {
        // Test that a share matching the subject name becomes the visible label
        let value = json!({
            "items": [{
                "data_fields": {"label": "KCN_ABC_0001_01_SE01_MR", "ID": "E1"},
                "children": [{
                    "field": "sharing/share",
                    "items": [{"data_fields": {"label": "SPN01_CMH_0001_01_01", "project": "SPINS"}}]
                }]
            }]
        });
        let exp = Experiment::from_json("SPINS", "SPN01_CMH_0001_01_01", &value).unwrap();
        assert!(exp.shared);
        assert_eq!(exp.label, "SPN01_CMH_0001_01_01");
        assert_eq!(exp.source_label, "KCN_ABC_0001_01_SE01_MR");
    }

    #[test]
    fn test_subject_projection() {
        let value = json!({
            "items": [{
                "data_fields": {"label": "SPN01_CMH_0001", "ID": "XNAT_S001", "project": "SPINS"},
                "children": [{
                    "field": "experiments/experiment",
                    "items": [{"data_fields": {"label": "SPN01_CMH_0001_01_01", "ID": "E1"}}]
                }]
            }]
        });
        let subject = Subject::from_json(&value).unwrap();
        assert_eq!(subject.id, "XNAT_S001");
        assert_eq!(subject.experiment_labels(), vec!["SPN01_CMH_0001_01_01"]);
        assert_eq!(subject.experiments[0].project, "SPINS");
    }

    #[test]
    fn test_missing_items_is_parse_error() {
        let err = Subject::from_json(&json!({"items": []})).unwrap_err();
        assert!(matches!(err, ArchiveError::Parse { .. }));
    }

    #[test]
    fn test_result_rows() {
        let value = json!({"ResultSet": {"Result": [{"label": "a", "xnat_abstractresource_id": 7}]}});
        let rows = result_rows(&value, "listing").unwrap();
        assert_eq!(row_text(&rows[0], "label").as_deref(), Some("a"));
        assert_eq!(row_text(&rows[0], "xnat_abstractresource_id").as_deref(), Some("7"));
        assert!(result_rows(&json!({}), "listing").is_err());
    }
}
