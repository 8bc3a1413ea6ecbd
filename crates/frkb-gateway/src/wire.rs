//! Request DTOs for the sync API. Field names match the wire (camelCase);
//! values are raw strings until the engine's parse step types them.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub user_key: String,
    pub count: u64,
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidirectionalDiffRequest {
    pub user_key: String,
    pub client_fingerprints: Vec<String>,
    #[serde(default)]
    pub batch_index: u32,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRequest {
    pub user_key: String,
    pub add_fingerprints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub user_key: String,
    #[serde(default)]
    pub client_fingerprints: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullDiffPageRequest {
    pub user_key: String,
    pub diff_session_id: String,
    #[serde(default)]
    pub page_index: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    pub user_key: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub user_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReportRequest {
    pub user_key: Option<String>,
    pub report: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_request_camel_case() {
        let req: CheckRequest = serde_json::from_str(
            r#"{"userKey": "550e8400-e29b-41d4-a716-446655440000", "count": 12, "hash": "ab"}"#,
        )
        .unwrap();
        assert_eq!(req.count, 12);
        assert_eq!(req.hash, "ab");
    }

    #[test]
    fn test_analyze_defaults_empty_set() {
        let req: AnalyzeRequest =
            serde_json::from_str(r#"{"userKey": "550e8400-e29b-41d4-a716-446655440000"}"#).unwrap();
        assert!(req.client_fingerprints.is_empty());
    }

    #[test]
    fn test_diff_request_optional_batch_size() {
        let req: BidirectionalDiffRequest = serde_json::from_str(
            r#"{"userKey": "u", "clientFingerprints": ["ab"], "batchIndex": 2}"#,
        )
        .unwrap();
        assert_eq!(req.batch_index, 2);
        assert!(req.batch_size.is_none());
    }
}
