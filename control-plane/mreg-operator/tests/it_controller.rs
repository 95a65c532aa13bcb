// Integration tests require a running Kubernetes cluster with the
// ModelRegistry CRD applied (`cargo run --bin crdgen | kubectl apply -f -`).
// They are ignored by default.

use std::time::Duration;

use k8s_openapi::api::{apps::v1::Deployment, core::v1::Service};
use kube::{
    Client,
    api::{Api, DeleteParams, PostParams},
};
use mreg_operator::config::OperatorConfig;
use mreg_operator::controller::{finalizer::FINALIZER, run_controller};
use mreg_operator::crd::{ModelRegistry, ModelRegistrySpec};
use tokio_util::sync::CancellationToken;

async fn wait_until<F, Fut>(what: &str, mut ready: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..60 {
        if ready().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1000)).await;
    }
    panic!("timed out waiting for {what}");
}

#[test_log::test(tokio::test)]
#[ignore]
async fn controller_deploys_and_releases_registry() {
    let client = Client::try_default().await.expect("kube client");
    let ns = "default";
    let name = format!("mreg-it-{}", std::process::id());

    let api: Api<ModelRegistry> = Api::namespaced(client.clone(), ns);
    api.create(
        &PostParams::default(),
        &ModelRegistry::new(&name, ModelRegistrySpec::default()),
    )
    .await
    .expect("create registry");

    let shutdown = CancellationToken::new();
    let cfg = OperatorConfig {
        watch_namespace: Some(ns.to_string()),
        ..Default::default()
    };
    let ctrl = tokio::spawn(run_controller(client.clone(), cfg, shutdown.clone()));

    let dep_api: Api<Deployment> = Api::namespaced(client.clone(), ns);
    let svc_api: Api<Service> = Api::namespaced(client.clone(), ns);
    wait_until("deployment and service", || async {
        dep_api.get_opt(&name).await.ok().flatten().is_some()
            && svc_api.get_opt(&name).await.ok().flatten().is_some()
    })
    .await;

    let mr = api.get(&name).await.expect("registry");
    assert!(mr.metadata.finalizers.unwrap_or_default().iter().any(|f| f == FINALIZER));

    api.delete(&name, &DeleteParams::default())
        .await
        .expect("delete registry");
    wait_until("registry release", || async {
        api.get_opt(&name).await.ok().flatten().is_none()
    })
    .await;

    shutdown.cancel();
    ctrl.abort();
}
