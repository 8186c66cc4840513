use crate::admission::{to_admission_response, AdmissionResponse, AdmissionReview};
use convoy_core::PodGroup;

/// Validate a PodGroup's membership floor.
pub fn validate_pod_groups(review: &AdmissionReview) -> AdmissionResponse {
    let Some(request) = &review.request else {
        return to_admission_response("admission review carries no request");
    };

    match request.operation.as_str() {
        "CREATE" | "UPDATE" => {
            let pg: PodGroup = match serde_json::from_value(request.object.clone()) {
                Ok(pg) => pg,
                Err(e) => {
                    return to_admission_response(format!("failed to decode pod group: {}", e))
                }
            };
            if pg.spec.min_member < 1 {
                return to_admission_response("podgroup 'minMember' must be >= 1");
            }
            AdmissionResponse::allowed()
        }
        operation => to_admission_response(format!(
            "invalid operation `{}`, expect operation to be `CREATE` or `UPDATE`",
            operation
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionRequest;
    use serde_json::json;

    fn review(min_member: i64) -> AdmissionReview {
        AdmissionReview {
            request: Some(AdmissionRequest {
                name: "pg1".to_string(),
                operation: "CREATE".to_string(),
                object: json!({
                    "metadata": { "name": "pg1", "namespace": "default" },
                    "spec": { "queue": "default", "minMember": min_member },
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_min_member_floor() {
        assert!(validate_pod_groups(&review(1)).allowed);
        assert!(validate_pod_groups(&review(3)).allowed);

        let response = validate_pod_groups(&review(0));
        assert!(!response.allowed);
        assert_eq!(
            response.result.unwrap().message,
            "podgroup 'minMember' must be >= 1"
        );
    }
}
