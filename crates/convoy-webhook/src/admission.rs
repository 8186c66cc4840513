use serde::{Deserialize, Serialize};
use tracing::error;

/// An admission review as delivered by the cluster API: a request on the way
/// in, a response on the way out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdmissionReview {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdmissionRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub operation: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub object: serde_json::Value,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub old_object: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdmissionResponse {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Status>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
}

impl AdmissionResponse {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    /// A JSON-patch response
    pub fn patched(patches: &[PatchOperation]) -> Self {
        Self {
            allowed: true,
            patch: Some(serde_json::json!(patches)),
            patch_type: Some("JSONPatch".to_string()),
            ..Default::default()
        }
    }

    /// A denial carrying `message`
    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            result: Some(Status {
                message: message.into(),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Status {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// One JSON-patch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    pub value: serde_json::Value,
}

/// Turn a handler error into a (denied) admission response
pub fn to_admission_response(message: impl Into<String>) -> AdmissionResponse {
    let message = message.into();
    error!("{}", message);
    AdmissionResponse {
        result: Some(Status { message }),
        ..Default::default()
    }
}

/// Run `handler` over the review and fold its response back in
pub fn respond(
    mut review: AdmissionReview,
    handler: fn(&AdmissionReview) -> AdmissionResponse,
) -> AdmissionReview {
    let mut response = handler(&review);
    if let Some(request) = &review.request {
        response.uid = request.uid.clone();
    }
    review.response = Some(response);
    review
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_is_not_allowed() {
        let response = AdmissionResponse::denied("nope");
        assert!(!response.allowed);
        assert_eq!(response.result.unwrap().message, "nope");
    }

    #[test]
    fn test_respond_copies_request_uid() {
        let review = AdmissionReview {
            request: Some(AdmissionRequest {
                uid: "abc-123".to_string(),
                operation: "CREATE".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let out = respond(review, |_| AdmissionResponse::allowed());
        assert_eq!(out.response.unwrap().uid, "abc-123");
    }

    #[test]
    fn test_patch_wire_shape() {
        let response = AdmissionResponse::patched(&[PatchOperation {
            op: "add".to_string(),
            path: "/spec/state".to_string(),
            value: serde_json::json!("Open"),
        }]);

        let body = serde_json::to_string(&response).unwrap();
        assert!(body.contains(r#""patchType":"JSONPatch""#));
        assert!(body.contains(r#""path":"/spec/state""#));
    }
}
