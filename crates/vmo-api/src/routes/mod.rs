pub mod instances;
pub mod operations;
pub mod products;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};

use crate::auth::auth_middleware;
use crate::state::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Instances
        .route(
            "/instances",
            post(instances::launch_instance).get(instances::list_instances),
        )
        .route(
            "/instances/{id}",
            get(instances::get_instance)
                .patch(instances::alter_instance)
                .delete(instances::terminate_instance),
        )
        .route("/instances/{id}/start", post(instances::start_instance))
        .route("/instances/{id}/stop", post(instances::stop_instance))
        .route("/instances/{id}/reboot", post(instances::reboot_instance))
        .route("/instances/{id}/firewalls", get(instances::list_firewalls))
        // Products
        .route("/products", get(products::list_products))
        .route("/products/{id}", get(products::get_product))
        // Background operations
        .route("/operations", get(operations::list_operations))
        .route("/operations/{id}", get(operations::get_operation))
        // Auth middleware
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use vmo_infra::catalog::{AddressManager, ImageCatalog, NetworkResolver, RegionCatalog};
    use vmo_infra::config::OrchestratorConfig;
    use vmo_infra::plane::{Command, CommandBody, CommandOutcome, ControlPlane, ResourceRef};
    use vmo_infra::types::{Architecture, ComputeLimits, ImageDescriptor, Region};
    use vmo_infra::{Collaborators, LeaseRegistry, VmOrchestrator};

    use super::*;
    use crate::config::AppConfig;

    const KEY: &str = "test-key";

    /// One running server, `srv-1`, and an otherwise empty catalog.
    struct OneServer;

    #[async_trait]
    impl ControlPlane for OneServer {
        async fn invoke(
            &self,
            command: Command,
            _resource: &ResourceRef,
            body: Option<&CommandBody>,
        ) -> vmo_infra::Result<CommandOutcome> {
            let payload = match (command, body) {
                (Command::ListWithState, Some(CommandBody::Page(page)))
                    if page.id.as_ref().is_none_or(|id| id.as_str() == "srv-1") =>
                {
                    json!({
                        "pageCount": 1,
                        "servers": [{
                            "shape": "withState",
                            "id": "srv-1",
                            "name": "web",
                            "networkId": "vlan-1",
                            "cpuCount": 2,
                            "memoryMb": 4096,
                            "disk": [{ "scsiId": 0, "sizeGb": 10 }],
                            "isDeployed": true,
                            "isStarted": true,
                            "state": "NORMAL"
                        }]
                    })
                }
                (Command::ListWithState, _) => json!({ "pageCount": 0, "servers": [] }),
                _ => Value::Null,
            };
            Ok(CommandOutcome {
                success: true,
                payload: Some(payload),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ImageCatalog for OneServer {
        async fn resolve(&self, _image_id: &str) -> vmo_infra::Result<Option<ImageDescriptor>> {
            Ok(None)
        }

        async fn find_variant(
            &self,
            _platform: &str,
            _architecture: Architecture,
            _cpu_count: u32,
            _memory_mb: u32,
        ) -> vmo_infra::Result<Option<ImageDescriptor>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl NetworkResolver for OneServer {
        async fn resolve_vlan_path(&self, vlan_id: &str, _region_id: &str) -> vmo_infra::Result<String> {
            Ok(format!("/network/{vlan_id}"))
        }
    }

    #[async_trait]
    impl AddressManager for OneServer {
        async fn release(&self, _address_id: &str) -> vmo_infra::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl RegionCatalog for OneServer {
        async fn list_regions(&self) -> vmo_infra::Result<Vec<Region>> {
            Ok(vec![Region {
                id: "NA1".into(),
                name: "North America 1".into(),
            }])
        }

        async fn compute_limits(&self, _region_id: &str) -> vmo_infra::Result<ComputeLimits> {
            Ok(ComputeLimits {
                max_cpu: 2,
                max_ram_mb: 4096,
            })
        }
    }

    fn app() -> Router {
        let fake = Arc::new(OneServer);
        let collaborators = Collaborators {
            plane: fake.clone(),
            images: fake.clone(),
            networks: fake.clone(),
            addresses: fake.clone(),
            regions: fake,
        };
        let state = AppState {
            orchestrator: VmOrchestrator::new(
                collaborators,
                OrchestratorConfig::default(),
                LeaseRegistry::new(),
            ),
            config: AppConfig {
                listen_addr: "127.0.0.1:0".parse().unwrap(),
                control_plane_api_key: KEY.into(),
                shutdown_grace: std::time::Duration::from_secs(1),
            },
        };
        api_router(state)
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {KEY}"))
            .header("content-type", "application/json");
        match body {
            Some(json) => builder.body(Body::from(json.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(req: Request<Body>) -> (StatusCode, Value) {
        let resp = app().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_key() {
        let req = Request::builder()
            .uri("/instances")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(req).await.0, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/instances")
            .header("authorization", "Bearer nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(req).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lists_and_fetches_instances() {
        let (status, body) = send(request("GET", "/instances", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "srv-1");
        assert_eq!(body[0]["phase"], "RUNNING");
        assert_eq!(body[0]["spec"], "2:4096:[10]");

        let (status, _) = send(request("GET", "/instances/srv-1", None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(request("GET", "/instances/srv-404", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(request("GET", "/instances/srv-1/firewalls", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["vlan-1"]));
    }

    #[tokio::test]
    async fn bad_products_are_bad_requests() {
        let (status, body) = send(request(
            "PATCH",
            "/instances/srv-1",
            Some(json!({ "product": "2:lots" })),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("2:lots"));

        let (status, _) = send(request(
            "PATCH",
            "/instances/srv-1",
            Some(json!({ "product": "2:4096:[5]" })),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(request(
            "POST",
            "/instances",
            Some(json!({ "product": "16:4096", "image_id": "img-1", "name": "web" })),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lists_products_for_an_architecture() {
        let (status, body) = send(request("GET", "/products?architecture=i32", None)).await;
        assert_eq!(status, StatusCode::OK);
        let products = body.as_array().unwrap();
        assert!(!products.is_empty());
        assert!(products.iter().all(|p| p["architecture"] == "i32"));

        let (status, body) = send(request("GET", "/products/2:4096", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cpu_count"], 2);

        let (status, _) = send(request("GET", "/products/8:65536", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn operations_are_queryable() {
        let (status, body) = send(request("GET", "/operations", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, _) = send(request("GET", "/operations/not-a-uuid", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(request(
            "GET",
            "/operations/00000000-0000-4000-8000-000000000000",
            None,
        ))
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
