use kube::core::CustomResourceExt;
use mreg_operator::crd::ModelRegistry;

fn main() {
    let crd = ModelRegistry::crd();
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
    println!("{}", yaml);
}
