use kube::CustomResourceExt;

use calico_operator::network::{Cluster, Network};

fn main() {
    print!("{}", serde_yaml::to_string(&Network::crd()).unwrap());
    print!("---");
    print!("{}", serde_yaml::to_string(&Cluster::crd()).unwrap());
}
