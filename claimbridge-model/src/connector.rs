use std::fmt;

/// The two connector families the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectorKind {
    /// Certificate-authenticated structured message gateway.
    StandardsGateway,
    /// Session and form based web portal.
    LegacyPortal,
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectorKind::StandardsGateway => "standards_gateway",
            ConnectorKind::LegacyPortal => "legacy_portal",
        })
    }
}

/// Processing state reported by a target for a previously accepted
/// submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TargetStatus {
    Queued,
    Complete,
    Error,
    Partial,
}

impl TargetStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TargetStatus::Queued)
    }
}
