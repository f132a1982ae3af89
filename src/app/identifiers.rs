//! Session identifier parsing and conversion
//!
//! The primary archive names sessions with Datman identifiers
//! (`STUDY_SITE_SUBJECT_TIMEPOINT[_SESSION]`), the mirror with KCNI
//! identifiers (`STUDY_SITE_SUBJECT_TIMEPOINT_SE{SESSION}_MR`). Study and
//! site codes may differ between the two; an [`IdMap`] records how. All of
//! this is pure string manipulation.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{IdentifierError, IdentifierResult};

const DEFAULT_SESSION: &str = "01";
const PHANTOM_PREFIX: &str = "PHA";
const KCNI_SESSION_PREFIX: &str = "SE";
const KCNI_MODALITY: &str = "MR";

/// Study and site code translations from KCNI codes to Datman codes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    #[serde(default)]
    pub study: HashMap<String, String>,
    #[serde(default)]
    pub site: HashMap<String, String>,
}

impl IdMap {
    fn to_datman<'a>(map: &'a HashMap<String, String>, kcni: &'a str) -> &'a str {
        map.get(kcni).map(String::as_str).unwrap_or(kcni)
    }

    fn to_kcni<'a>(map: &'a HashMap<String, String>, datman: &'a str) -> &'a str {
        map.iter()
            .find(|(_, value)| value.as_str() == datman)
            .map(|(key, _)| key.as_str())
            .unwrap_or(datman)
    }
}

/// Names under which a session is stored on an archive
pub trait ArchiveIdentifier {
    /// Label of the subject record
    fn xnat_subject_id(&self) -> String;
    /// Label of the experiment record
    fn xnat_experiment_id(&self) -> String;
    fn site(&self) -> &str;
}

fn is_code(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric())
}

fn is_session_number(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_digit())
}

/// A Datman session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatmanId {
    pub study: String,
    pub site: String,
    pub subject: String,
    pub timepoint: String,
    pub session: String,
}

impl DatmanId {
    /// Parse `STUDY_SITE_SUBJECT_TIMEPOINT[_SESSION]`; the session defaults to `01`
    ///
    /// # Errors
    ///
    /// Returns `IdentifierError::Parse` if the identifier doesn't follow the convention.
    pub fn parse(id: &str) -> IdentifierResult<Self> {
        let error = || IdentifierError::Parse {
            id: id.to_string(),
            convention: "Datman",
        };

        let parts: Vec<&str> = id.trim().split('_').collect();
        let (fields, session) = match parts.as_slice() {
            [study, site, subject, timepoint] => ([*study, *site, *subject, *timepoint], DEFAULT_SESSION),
            [study, site, subject, timepoint, session] if is_session_number(session) => {
                ([*study, *site, *subject, *timepoint], *session)
            }
            _ => return Err(error()),
        };

        if !fields.iter().all(|part| is_code(part)) {
            return Err(error());
        }

        let [study, site, subject, timepoint] = fields;
        Ok(Self {
            study: study.to_string(),
            site: site.to_string(),
            subject: subject.to_string(),
            timepoint: timepoint.to_string(),
            session: session.to_string(),
        })
    }

    pub fn is_phantom(&self) -> bool {
        self.subject.starts_with(PHANTOM_PREFIX)
    }

    /// Convert to the mirror's naming
    ///
    /// # Errors
    ///
    /// Returns `IdentifierError::Unsupported` for phantom sessions.
    pub fn to_kcni(&self, map: &IdMap) -> IdentifierResult<KcniId> {
        if self.is_phantom() {
            return Err(IdentifierError::Unsupported {
                id: self.to_string(),
                reason: "phantom sessions have no KCNI equivalent".to_string(),
            });
        }

        Ok(KcniId {
            study: IdMap::to_kcni(&map.study, &self.study).to_string(),
            site: IdMap::to_kcni(&map.site, &self.site).to_string(),
            subject: self.subject.clone(),
            timepoint: self.timepoint.clone(),
            session: self.session.clone(),
        })
    }
}

impl fmt::Display for DatmanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}",
            self.study, self.site, self.subject, self.timepoint, self.session
        )
    }
}

impl ArchiveIdentifier for DatmanId {
    fn xnat_subject_id(&self) -> String {
        self.to_string()
    }

    fn xnat_experiment_id(&self) -> String {
        self.to_string()
    }

    fn site(&self) -> &str {
        &self.site
    }
}

/// A KCNI session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KcniId {
    pub study: String,
    pub site: String,
    pub subject: String,
    pub timepoint: String,
    pub session: String,
}

impl KcniId {
    /// Parse `STUDY_SITE_SUBJECT_TIMEPOINT_SE{SESSION}_MR`
    ///
    /// # Errors
    ///
    /// Returns `IdentifierError::Parse` if the identifier doesn't follow the convention.
    pub fn parse(id: &str) -> IdentifierResult<Self> {
        let error = || IdentifierError::Parse {
            id: id.to_string(),
            convention: "KCNI",
        };

        let parts: Vec<&str> = id.trim().split('_').collect();
        let [study, site, subject, timepoint, session, modality] = parts.as_slice() else {
            return Err(error());
        };

        let session = session
            .strip_prefix(KCNI_SESSION_PREFIX)
            .filter(|s| is_session_number(s))
            .ok_or_else(error)?;

        if *modality != KCNI_MODALITY || ![study, site, subject, timepoint].iter().all(|p| is_code(p)) {
            return Err(error());
        }

        Ok(Self {
            study: study.to_string(),
            site: site.to_string(),
            subject: subject.to_string(),
            timepoint: timepoint.to_string(),
            session: session.to_string(),
        })
    }

    /// Convert to the primary archive's naming
    pub fn to_datman(&self, map: &IdMap) -> DatmanId {
        DatmanId {
            study: IdMap::to_datman(&map.study, &self.study).to_string(),
            site: IdMap::to_datman(&map.site, &self.site).to_string(),
            subject: self.subject.clone(),
            timepoint: self.timepoint.clone(),
            session: self.session.clone(),
        }
    }
}

impl fmt::Display for KcniId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}{}_{}",
            self.study,
            self.site,
            self.subject,
            self.timepoint,
            KCNI_SESSION_PREFIX,
            self.session,
            KCNI_MODALITY
        )
    }
}

impl ArchiveIdentifier for KcniId {
    fn xnat_subject_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.study, self.site, self.subject, self.timepoint
        )
    }

    fn xnat_experiment_id(&self) -> String {
        self.to_string()
    }

    fn site(&self) -> &str {
        &self.site
    }
}

/// Parse a Datman identifier and derive its mirror equivalent
pub fn resolve_pair(datman_id: &str, map: &IdMap) -> IdentifierResult<(DatmanId, KcniId)> {
    let datman = DatmanId::parse(datman_id)?;
    let kcni = datman.to_kcni(map)?;
    Ok((datman, kcni))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spins_map() -> IdMap {
        IdMap {
            study: [("SPN".to_string(), "SPN01".to_string())].into_iter().collect(),
            site: [("CAMH".to_string(), "CMH".to_string())].into_iter().collect(),
        }
    }

    #[test]
    fn test_datman_parse_defaults_session() {
        let id = DatmanId::parse("SPN01_CMH_0001_01").unwrap();
        assert_eq!(id.session, "01");
        assert_eq!(id.to_string(), "SPN01_CMH_0001_01_01");
        assert_eq!(id.xnat_subject_id(), "SPN01_CMH_0001_01_01");
        assert_eq!(id.xnat_experiment_id(), "SPN01_CMH_0001_01_01");
    }

    #[test]
    fn test_datman_parse_rejects_malformed() {
        for bad in ["", "SPN01_CMH_0001", "SPN01_CMH_0001_01_ab", "SPN01_C-H_0001_01", "A_B_C_D_01_02"] {
            assert!(DatmanId::parse(bad).is_err(), "Should reject: {}", bad);
        }
    }

    #[test]
    fn test_kcni_parse_and_labels() {
        let id = KcniId::parse("SPN_CAMH_0001_01_SE02_MR").unwrap();
        assert_eq!(id.session, "02");
        assert_eq!(id.xnat_subject_id(), "SPN_CAMH_0001_01");
        assert_eq!(id.xnat_experiment_id(), "SPN_CAMH_0001_01_SE02_MR");

        assert!(KcniId::parse("SPN_CAMH_0001_01_SE02_CT").is_err());
        assert!(KcniId::parse("SPN_CAMH_0001_01_02_MR").is_err());
    }

    #[test]
    fn test_conversion_round_trip_through_map() {
        let (datman, kcni) = resolve_pair("SPN01_CMH_0001_01_01", &spins_map()).unwrap();
        assert_eq!(kcni.to_string(), "SPN_CAMH_0001_01_SE01_MR");
        assert_eq!(kcni.to_datman(&spins_map()), datman);
    }

    #[test]
    fn test_unmapped_codes_pass_through() {
        let kcni = DatmanId::parse("ABC01_XYZ_0002_02_01")
            .unwrap()
            .to_kcni(&IdMap::default())
            .unwrap();
        assert_eq!(kcni.to_string(), "ABC01_XYZ_0002_02_SE01_MR");
    }

    #[test]
    fn test_phantom_is_unsupported() {
        let err = resolve_pair("SPN01_CMH_PHA_FBN0001", &spins_map()).unwrap_err();
        assert!(matches!(err, IdentifierError::Unsupported { .. }));
    }
}
