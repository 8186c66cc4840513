use crate::client::ControlClient;
use crate::error::Result;
use convoy_core::objects::{Metadata, OwnerReference, PodGroup, PodGroupSpec};
use convoy_core::{Pod, GROUP_NAME_ANNOTATION};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Creates a PodGroup for bare pods (no group annotation) so the scheduler
/// can treat every pod as gang-scheduled, then annotates the pod.
pub struct PodGroupController {
    client: Arc<dyn ControlClient>,
    tx: mpsc::UnboundedSender<Pod>,
    rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Pod>>>,
}

impl PodGroupController {
    pub fn new(client: Arc<dyn ControlClient>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            client,
            tx,
            rx: std::sync::Mutex::new(Some(rx)),
        }
    }

    /// Handle a pod ADDED event
    pub fn on_pod_added(&self, pod: Pod) {
        let _ = self.tx.send(pod);
    }

    /// Consume pod events until cancelled
    pub fn run(self: &Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut rx = self
            .rx
            .lock()
            .expect("receiver lock")
            .take()
            .expect("run called once");

        tokio::spawn(async move {
            info!("pod group controller is running");
            loop {
                let pod = tokio::select! {
                    _ = token.cancelled() => break,
                    pod = rx.recv() => match pod {
                        Some(pod) => pod,
                        None => break,
                    },
                };
                if let Err(e) = controller.reconcile_pod(&pod).await {
                    error!(
                        pod = %format!("{}/{}", pod.metadata.namespace, pod.metadata.name),
                        "failed to reconcile pod: {}", e
                    );
                }
            }
        })
    }

    /// Ensure a pod belongs to a PodGroup, creating one when needed
    pub async fn reconcile_pod(&self, pod: &Pod) -> Result<()> {
        let group_name = pod_group_name(pod);

        match pod.group_name() {
            Some(existing) if existing != group_name => {
                // Someone assigned the pod elsewhere; leave it alone.
                error!(
                    pod = %format!("{}/{}", pod.metadata.namespace, pod.metadata.name),
                    annotation = existing,
                    "pod group annotation does not match the generated name"
                );
                return Ok(());
            }
            Some(_) => return Ok(()),
            None => {}
        }

        if self
            .client
            .get_pod_group(&pod.metadata.namespace, &group_name)
            .await?
            .is_none()
        {
            let pg = PodGroup {
                metadata: Metadata {
                    name: group_name.clone(),
                    namespace: pod.metadata.namespace.clone(),
                    owner_references: owner_references(pod),
                    ..Default::default()
                },
                spec: PodGroupSpec {
                    min_member: 1,
                    priority_class_name: pod.spec.priority_class_name.clone(),
                    ..Default::default()
                },
                ..Default::default()
            };
            debug!(group = %group_name, "creating pod group for bare pod");
            self.client.create_pod_group(&pg).await?;
        }

        let mut annotated = pod.clone();
        annotated
            .metadata
            .annotations
            .insert(GROUP_NAME_ANNOTATION.to_string(), group_name);
        self.client.update_pod(&annotated).await
    }
}

/// The generated group name for a bare pod
fn pod_group_name(pod: &Pod) -> String {
    let uid = if pod.metadata.uid.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        pod.metadata.uid.clone()
    };
    format!("podgroup-{}", uid)
}

/// Reuse the pod's controller owner when it has one; otherwise the group is
/// owned by the pod itself.
fn owner_references(pod: &Pod) -> Vec<OwnerReference> {
    if pod
        .metadata
        .owner_references
        .iter()
        .any(|r| r.controller == Some(true))
    {
        return pod.metadata.owner_references.clone();
    }

    vec![OwnerReference {
        api_version: "v1".to_string(),
        kind: "Pod".to_string(),
        name: pod.metadata.name.clone(),
        uid: pod.metadata.uid.clone(),
        controller: Some(true),
    }]
}
