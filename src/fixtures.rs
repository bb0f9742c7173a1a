//! Mock API server plumbing for unit-testing reconciler pieces without a
//! cluster, plus a canned `WorkflowService`.

use crate::api::{WorkflowService, WorkflowServiceSpec, LAST_HANDLED_ANNOTATION};
use http::{Request, Response};
use hyper::Body;
use kube::client::Client;
use kube::api::ObjectMeta;
use std::sync::{Arc, Mutex};

impl WorkflowService {
    /// A CR shaped like the API server would return it.
    pub fn test() -> Self {
        let spec: WorkflowServiceSpec = serde_json::from_value(serde_json::json!({
            "workflow": {"dockerImage": "registry.local/workflow:1.0"},
            "common": {
                "auth": {"enable": false},
                "postgres": {"host": "pg", "port": "5432", "dbName": "workflow"},
                "broker": {"host": "broker", "port": "5672"},
            },
            "api": {}, "engine": {}, "executor": {}, "notifier": {}, "monitoring": {},
        }))
        .unwrap();
        WorkflowService {
            metadata: ObjectMeta {
                name: Some("workflow-service".into()),
                namespace: Some("default".into()),
                uid: Some("9a9c9c70-0000-0000-0000-000000000000".into()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }
}

pub type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
pub struct ApiServerVerifier(ApiServerHandle);

/// Canned request sequences the mock API server expects to see.
pub enum Scenario {
    /// GET the CR, then accept a merge patch on its status sub-resource.
    StatusPatch(WorkflowService),
    /// Accept a merge patch carrying the last-handled annotation.
    AnnotationPatch,
    /// Answer any request sequence with plausible responses, recording
    /// "METHOD path" lines for later assertions. Deployments exist once
    /// POSTed (and report full availability); deployments touched only via
    /// the scale sub-resource never become available; everything else is
    /// absent.
    RecordingApiServer(Arc<Mutex<Vec<String>>>),
}

fn not_found() -> Response<Body> {
    let status = serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": "not found",
        "reason": "NotFound",
        "code": 404,
    });
    Response::builder()
        .status(404)
        .body(Body::from(status.to_string()))
        .unwrap()
}

fn deployment_body(name: &str, available: i32) -> Vec<u8> {
    serde_json::json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": "default"},
        "spec": {"replicas": 1},
        "status": {"replicas": 1, "availableReplicas": available},
    })
    .to_string()
    .into_bytes()
}

pub fn mock_client() -> (Client, ApiServerVerifier) {
    let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
    (Client::new(mock_service, "default"), ApiServerVerifier(handle))
}

pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("timeout on mock apiserver")
        .expect("scenario completed without panic");
}

impl ApiServerVerifier {
    /// Play through the scenario, asserting each request as it arrives.
    ///
    /// The returned handle must be awaited (see [`timeout_after_1s`]) so
    /// scenario assertion failures actually fail the test.
    pub fn run(self, scenario: Scenario) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match scenario {
                Scenario::StatusPatch(cr) => {
                    self.handle_cr_get(&cr)
                        .await
                        .handle_status_patch(&cr)
                        .await;
                }
                Scenario::AnnotationPatch => {
                    self.handle_annotation_patch().await;
                }
                Scenario::RecordingApiServer(log) => {
                    self.handle_everything(log).await;
                }
            }
        })
    }

    /// Serve requests until the client goes away.
    async fn handle_everything(mut self, log: Arc<Mutex<Vec<String>>>) {
        let mut created: Vec<String> = Vec::new();
        let mut scaled: Vec<String> = Vec::new();
        while let Some((request, send)) = self.0.next_request().await {
            let method = request.method().clone();
            let path = request.uri().path().to_string();
            log.lock().unwrap().push(format!("{method} {path}"));

            let body = if path.contains("/workflowservices/") {
                serde_json::to_vec(&WorkflowService::test()).unwrap()
            } else if method == http::Method::PATCH && path.ends_with("/scale") {
                let name = path
                    .trim_end_matches("/scale")
                    .rsplit('/')
                    .next()
                    .unwrap()
                    .to_string();
                let response = serde_json::json!({
                    "apiVersion": "autoscaling/v1",
                    "kind": "Scale",
                    "metadata": {"name": name, "namespace": "default"},
                    "spec": {"replicas": 1},
                    "status": {"replicas": 0},
                })
                .to_string()
                .into_bytes();
                scaled.push(name);
                response
            } else if method == http::Method::POST || method == http::Method::PATCH {
                let bytes = hyper::body::to_bytes(request.into_body()).await.unwrap();
                if path.ends_with("/deployments") {
                    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
                    if let Some(name) = json["metadata"]["name"].as_str() {
                        created.push(name.to_string());
                    }
                }
                bytes.to_vec()
            } else if method == http::Method::GET && path.contains("/deployments/") {
                let name = path.rsplit('/').next().unwrap();
                if created.iter().any(|c| c == name) {
                    deployment_body(name, 1)
                } else if scaled.iter().any(|s| s == name) {
                    deployment_body(name, 0)
                } else {
                    send.send_response(not_found());
                    continue;
                }
            } else {
                send.send_response(not_found());
                continue;
            };
            send.send_response(Response::builder().body(Body::from(body)).unwrap());
        }
    }

    async fn handle_cr_get(mut self, cr: &WorkflowService) -> Self {
        let (request, send) = self.0.next_request().await.expect("GET not called");
        assert_eq!(request.method(), http::Method::GET);
        let response = serde_json::to_vec(cr).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        self
    }

    async fn handle_status_patch(mut self, cr: &WorkflowService) -> Self {
        let (request, send) = self.0.next_request().await.expect("PATCH not called");
        assert_eq!(request.method(), http::Method::PATCH);
        assert!(
            request.uri().to_string().contains("/status"),
            "expected a status sub-resource patch, got {}",
            request.uri()
        );
        let body = hyper::body::to_bytes(request.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let conditions = json["status"]["conditions"]
            .as_array()
            .expect("patch carries conditions");
        assert!(!conditions.is_empty());
        let response = serde_json::to_vec(cr).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        self
    }

    async fn handle_annotation_patch(mut self) -> Self {
        let (request, send) = self.0.next_request().await.expect("PATCH not called");
        assert_eq!(request.method(), http::Method::PATCH);
        let body = hyper::body::to_bytes(request.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let recorded = json["metadata"]["annotations"][LAST_HANDLED_ANNOTATION]
            .as_str()
            .expect("patch carries the last-handled annotation");
        // The annotation value must itself be a parseable spec document.
        let spec: serde_json::Value = serde_json::from_str(recorded).unwrap();
        assert!(spec.get("workflow").is_some());
        let response = serde_json::to_vec(&WorkflowService::test()).unwrap();
        send.send_response(Response::builder().body(Body::from(response)).unwrap());
        self
    }
}
