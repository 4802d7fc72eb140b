use kanari::crd::generation::Generation;
use kanari::crd::workload::Workload;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    // Prints both CRDs as a JSON List; pipe through a YAML converter if needed
    let list = serde_json::json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": [Workload::crd(), Generation::crd()],
    });

    println!("{}", serde_json::to_string_pretty(&list)?);
    Ok(())
}
