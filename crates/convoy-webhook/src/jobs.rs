use crate::admission::{to_admission_response, AdmissionResponse, AdmissionReview};
use convoy_core::Job;
use std::collections::HashSet;

/// Validate a batch Job's task templates and membership floor.
pub fn validate_jobs(review: &AdmissionReview) -> AdmissionResponse {
    let Some(request) = &review.request else {
        return to_admission_response("admission review carries no request");
    };

    match request.operation.as_str() {
        "CREATE" | "UPDATE" => {
            let job: Job = match serde_json::from_value(request.object.clone()) {
                Ok(job) => job,
                Err(e) => return to_admission_response(format!("failed to decode job: {}", e)),
            };
            match validate_job_spec(&job) {
                Ok(()) => AdmissionResponse::allowed(),
                Err(message) => to_admission_response(message),
            }
        }
        operation => to_admission_response(format!(
            "invalid operation `{}`, expect operation to be `CREATE` or `UPDATE`",
            operation
        )),
    }
}

fn validate_job_spec(job: &Job) -> Result<(), String> {
    if job.spec.tasks.is_empty() {
        return Err("no task specified in job spec".to_string());
    }

    let mut names = HashSet::new();
    let mut total_replicas: i64 = 0;
    for task in &job.spec.tasks {
        if !names.insert(task.name.as_str()) {
            return Err(format!("duplicated task name {}", task.name));
        }
        if task.replicas < 0 {
            return Err(format!("'replicas' < 0 in task: {}", task.name));
        }
        if let Some(min_replicas) = task.min_replicas {
            if min_replicas > task.replicas {
                return Err(format!(
                    "'minReplicas' is greater than 'replicas' in task: {}",
                    task.name
                ));
            }
        }
        total_replicas += task.replicas as i64;
    }

    if (job.spec.min_available as i64) > total_replicas {
        return Err(
            "job 'minAvailable' should not be greater than total replicas in tasks".to_string(),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionRequest;
    use serde_json::json;

    fn review(operation: &str, object: serde_json::Value) -> AdmissionReview {
        AdmissionReview {
            request: Some(AdmissionRequest {
                name: "job1".to_string(),
                operation: operation.to_string(),
                object,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_job_is_allowed() {
        let ar = review(
            "CREATE",
            json!({
                "metadata": { "name": "job1", "namespace": "default" },
                "spec": {
                    "minAvailable": 2,
                    "tasks": [
                        { "name": "master", "replicas": 1 },
                        { "name": "worker", "replicas": 3, "minReplicas": 1 },
                    ],
                },
            }),
        );
        assert!(validate_jobs(&ar).allowed);
    }

    #[test]
    fn test_empty_tasks_rejected() {
        let ar = review(
            "CREATE",
            json!({ "metadata": { "name": "job1" }, "spec": { "tasks": [] } }),
        );
        let response = validate_jobs(&ar);
        assert!(!response.allowed);
        assert_eq!(response.result.unwrap().message, "no task specified in job spec");
    }

    #[test]
    fn test_duplicate_task_names_rejected() {
        let ar = review(
            "CREATE",
            json!({
                "metadata": { "name": "job1" },
                "spec": {
                    "tasks": [
                        { "name": "worker", "replicas": 1 },
                        { "name": "worker", "replicas": 1 },
                    ],
                },
            }),
        );
        let response = validate_jobs(&ar);
        assert!(!response.allowed);
        assert_eq!(response.result.unwrap().message, "duplicated task name worker");
    }

    #[test]
    fn test_negative_replicas_rejected() {
        let ar = review(
            "CREATE",
            json!({
                "metadata": { "name": "job1" },
                "spec": { "tasks": [{ "name": "worker", "replicas": -1 }] },
            }),
        );
        assert!(!validate_jobs(&ar).allowed);
    }

    #[test]
    fn test_min_available_above_total_replicas_rejected() {
        let ar = review(
            "CREATE",
            json!({
                "metadata": { "name": "job1" },
                "spec": {
                    "minAvailable": 5,
                    "tasks": [{ "name": "worker", "replicas": 3 }],
                },
            }),
        );
        let response = validate_jobs(&ar);
        assert!(!response.allowed);
        assert_eq!(
            response.result.unwrap().message,
            "job 'minAvailable' should not be greater than total replicas in tasks"
        );
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let ar = review("DELETE", json!({}));
        let response = validate_jobs(&ar);
        assert!(!response.allowed);
        assert_eq!(
            response.result.unwrap().message,
            "invalid operation `DELETE`, expect operation to be `CREATE` or `UPDATE`"
        );
    }
}
