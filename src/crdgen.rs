use controller::api::WorkflowService;
use kube::CustomResourceExt;

fn main() {
    print!("{}", serde_yaml::to_string(&WorkflowService::crd()).unwrap())
}
