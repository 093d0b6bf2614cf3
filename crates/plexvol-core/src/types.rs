use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{PlexError, PlexResult};

/// Persisted metadata for one volume (an entry in `volumes.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(rename = "ServerID")]
    pub id: String,
    /// Where the data lives locally, `root/<id>`
    #[serde(rename = "Mountpoint")]
    pub mountpoint: PathBuf,
    #[serde(rename = "Mounted", default)]
    pub mounted: bool,
    /// Unix seconds of the last successful save-to-store (advisory)
    #[serde(rename = "LastSync", default)]
    pub last_sync: Option<u64>,
}

impl Volume {
    pub fn summary(&self) -> VolumeSummary {
        VolumeSummary {
            name: self.id.clone(),
            mountpoint: self.mountpoint.clone(),
        }
    }
}

/// `{Name, Mountpoint}` as returned by Get and List
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeSummary {
    pub name: String,
    pub mountpoint: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountResponse {
    pub mountpoint: PathBuf,
}

impl From<PathBuf> for MountResponse {
    fn from(mountpoint: PathBuf) -> Self {
        Self { mountpoint }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    pub volumes: Vec<VolumeSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capability {
    pub scope: Scope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub capabilities: Capability,
}

/// Check a volume id against Docker's volume-name grammar.
///
/// Ids become path components and TCP control-line fields, so anything
/// outside `[A-Za-z0-9][A-Za-z0-9_.-]*` is rejected.
pub fn validate_id(id: &str) -> PlexResult<()> {
    let mut chars = id.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(PlexError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_docker_style_names() {
        for id in ["mc-survival", "a", "srv_01.world", "7days"] {
            assert!(validate_id(id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_traversal_and_separators() {
        for id in ["", ".", "..", "../etc", "a/b", "a:b", "-lead", "sp ace"] {
            assert!(
                matches!(validate_id(id), Err(PlexError::InvalidId(_))),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn volume_uses_snapshot_field_names() {
        let vol = Volume {
            id: "mc-1".into(),
            mountpoint: PathBuf::from("/live/mc-1"),
            mounted: true,
            last_sync: Some(1_700_000_000),
        };
        let json = serde_json::to_string(&vol).unwrap();
        assert!(json.contains("ServerID"));
        assert!(json.contains("Mountpoint"));
        assert!(json.contains("Mounted"));
        assert!(json.contains("LastSync"));
    }

    #[test]
    fn summary_keeps_name_and_mountpoint_only() {
        let vol = Volume {
            id: "mc-1".into(),
            mountpoint: PathBuf::from("/live/mc-1"),
            mounted: true,
            last_sync: Some(1),
        };
        let out = serde_json::to_string(&ListResponse {
            volumes: vec![vol.summary()],
        })
        .unwrap();
        assert_eq!(out, r#"{"Volumes":[{"Name":"mc-1","Mountpoint":"/live/mc-1"}]}"#);
    }

    #[test]
    fn capabilities_serialize_lowercase_scope() {
        let caps = CapabilitiesResponse {
            capabilities: Capability {
                scope: Scope::Local,
            },
        };
        let out = serde_json::to_string(&caps).unwrap();
        assert_eq!(out, r#"{"Capabilities":{"Scope":"local"}}"#);
    }
}
