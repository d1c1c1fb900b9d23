//! Ban change feed returned by `GET /api/server/bans/changes`.

use serde::{Deserialize, Serialize};

/// Type of change event.
///
/// The backend emits `BAN_UPSERT` / `BAN_REVOKE`; the short forms are
/// accepted as well. The type is informational: whether a ban is active is
/// decided from its timestamps, not from this tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeType {
    /// Ban was created or updated.
    Upsert,
    /// Ban was revoked.
    Revoke,
    /// Any other tag, kept verbatim.
    Other(String),
}

impl ChangeType {
    /// Parses a change tag, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "BAN_UPSERT" | "UPSERT" => ChangeType::Upsert,
            "BAN_REVOKE" | "REVOKE" => ChangeType::Revoke,
            _ => ChangeType::Other(normalized),
        }
    }
}

/// A single entry of the ban change feed.
///
/// Timestamps are kept as the raw strings the backend sent; parsing is the
/// consumer's job so that one malformed instant never rejects the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanChange {
    /// Change tag (`BAN_UPSERT`, `BAN_REVOKE`).
    #[serde(rename = "type", default)]
    pub change_type: Option<String>,
    /// Server-assigned ban id.
    #[serde(default)]
    pub ban_id: i64,
    /// Player identity the ban applies to.
    #[serde(default, alias = "xuid")]
    pub subject_id: Option<String>,
    /// Ban reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Creation instant (RFC 3339).
    #[serde(default)]
    pub created_at: Option<String>,
    /// Expiry instant (RFC 3339); absent for permanent bans.
    #[serde(default)]
    pub expires_at: Option<String>,
    /// Revocation instant (RFC 3339).
    #[serde(default)]
    pub revoked_at: Option<String>,
    /// Last modification instant (RFC 3339); drives the sync cursor.
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl BanChange {
    /// Returns the parsed change tag, if any.
    pub fn kind(&self) -> Option<ChangeType> {
        self.change_type.as_deref().map(ChangeType::parse)
    }
}

/// Response body of the ban change feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanChangesResponse {
    /// Backend clock at response time.
    #[serde(default)]
    pub server_time: Option<String>,
    /// Changes newer than the requested cursor, in no guaranteed order.
    #[serde(default)]
    pub changes: Vec<BanChange>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_type_parsing() {
        assert_eq!(ChangeType::parse("BAN_UPSERT"), ChangeType::Upsert);
        assert_eq!(ChangeType::parse(" upsert "), ChangeType::Upsert);
        assert_eq!(ChangeType::parse("ban_revoke"), ChangeType::Revoke);
        assert_eq!(
            ChangeType::parse("mute"),
            ChangeType::Other("MUTE".to_string())
        );
    }

    #[test]
    fn decode_change_feed() {
        let json = r#"{
            "serverTime": "2024-01-02T00:00:00Z",
            "changes": [
                {"type": "BAN_UPSERT", "banId": 7, "subjectId": "P1", "reason": "cheating",
                 "createdAt": "2024-01-01T00:00:00Z", "expiresAt": null,
                 "revokedAt": null, "updatedAt": "2024-01-01T00:00:00Z"}
            ]
        }"#;

        let resp: BanChangesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.changes.len(), 1);

        let change = &resp.changes[0];
        assert_eq!(change.kind(), Some(ChangeType::Upsert));
        assert_eq!(change.ban_id, 7);
        assert_eq!(change.subject_id.as_deref(), Some("P1"));
        assert!(change.expires_at.is_none());
    }

    #[test]
    fn legacy_subject_key_is_accepted() {
        let json = r#"{"changes": [{"banId": 1, "xuid": "2535400000000000"}]}"#;
        let resp: BanChangesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            resp.changes[0].subject_id.as_deref(),
            Some("2535400000000000")
        );
        assert!(resp.server_time.is_none());
    }

    #[test]
    fn missing_changes_decodes_as_empty() {
        let resp: BanChangesResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.changes.is_empty());
    }
}
