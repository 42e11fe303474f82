use actix_web::{test, App};
use marketcore::routes::health::health_scope;
use serde_json::Value;

#[actix_rt::test]
async fn health_check_returns_healthy_status() {
    let app = test::init_service(App::new().service(health_scope())).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
}
