use crate::admission::{
    to_admission_response, AdmissionResponse, AdmissionReview, PatchOperation,
};
use convoy_core::Queue;
use serde_json::json;

const QUEUE_STATES: [&str; 2] = ["Open", "Closed"];

/// Mutate a Queue on CREATE: default an absent state to Open and an absent
/// reclaimable to true, as a JSON patch.
pub fn mutate_queues(review: &AdmissionReview) -> AdmissionResponse {
    let Some(request) = &review.request else {
        return to_admission_response("admission review carries no request");
    };

    if request.operation != "CREATE" {
        return to_admission_response(format!(
            "invalid operation `{}`, expect operation to be `CREATE`",
            request.operation
        ));
    }

    let queue: Queue = match serde_json::from_value(request.object.clone()) {
        Ok(queue) => queue,
        Err(e) => return to_admission_response(format!("failed to decode queue: {}", e)),
    };

    let mut patches = Vec::new();
    if queue.spec.state.is_none() {
        patches.push(PatchOperation {
            op: "add".to_string(),
            path: "/spec/state".to_string(),
            value: json!("Open"),
        });
    }
    if queue.spec.reclaimable.is_none() {
        patches.push(PatchOperation {
            op: "add".to_string(),
            path: "/spec/reclaimable".to_string(),
            value: json!(true),
        });
    }

    AdmissionResponse::patched(&patches)
}

/// Validate a Queue: state values on CREATE/UPDATE, deletion rules on DELETE.
pub fn validate_queues(review: &AdmissionReview) -> AdmissionResponse {
    let Some(request) = &review.request else {
        return to_admission_response("admission review carries no request");
    };

    match request.operation.as_str() {
        "CREATE" | "UPDATE" => {
            let queue: Queue = match serde_json::from_value(request.object.clone()) {
                Ok(queue) => queue,
                Err(e) => return to_admission_response(format!("failed to decode queue: {}", e)),
            };
            match queue.spec.state.as_deref() {
                None => AdmissionResponse::allowed(),
                Some(state) if QUEUE_STATES.contains(&state) => AdmissionResponse::allowed(),
                Some(state) => to_admission_response(format!(
                    "requestBody.spec.state: Invalid value: \"{}\": queue state must be in [Open Closed]",
                    state
                )),
            }
        }
        "DELETE" => {
            if request.name == "default" {
                return to_admission_response("`default` queue can not be deleted");
            }
            let queue: Queue = match serde_json::from_value(request.object.clone()) {
                Ok(queue) => queue,
                Err(e) => return to_admission_response(format!("failed to decode queue: {}", e)),
            };
            let state = queue.spec.state.as_deref().unwrap_or("Open");
            if state == "Closed" {
                AdmissionResponse::allowed()
            } else {
                to_admission_response(format!(
                    "only queue with state `Closed` can be deleted, queue `{}` state is `{}`",
                    request.name, state
                ))
            }
        }
        operation => to_admission_response(format!(
            "invalid operation `{}`, expect operation to be `CREATE`, `UPDATE` or `DELETE`",
            operation
        )),
    }
}
