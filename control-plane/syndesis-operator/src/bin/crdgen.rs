use kube::core::CustomResourceExt;
use syndesis_operator::crd::Syndesis;

fn main() {
    let crd = Syndesis::crd();
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
    println!("{}", yaml);
}
