use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use tradein_core::config::AppConfig;
use tradein_db::{AppServices, Repositories};
use tradein_server::api::{self, CORRELATION_HEADER};

fn router() -> Router {
    let (repos, _store) = Repositories::in_memory();
    let services = AppServices::new(repos, &AppConfig::default()).expect("services");
    api::router(services)
}

struct Call {
    method: &'static str,
    uri: String,
    body: Option<Value>,
    admin: bool,
    correlation_id: Option<&'static str>,
}

impl Call {
    fn get(uri: impl Into<String>) -> Self {
        Self { method: "GET", uri: uri.into(), body: None, admin: false, correlation_id: None }
    }

    fn post(uri: impl Into<String>, body: Value) -> Self {
        Self { method: "POST", uri: uri.into(), body: Some(body), admin: false, correlation_id: None }
    }

    fn delete(uri: impl Into<String>, body: Value) -> Self {
        Self { method: "DELETE", uri: uri.into(), body: Some(body), admin: false, correlation_id: None }
    }

    fn as_admin(mut self) -> Self {
        self.admin = true;
        self
    }

    fn correlated(mut self, id: &'static str) -> Self {
        self.correlation_id = Some(id);
        self
    }

    async fn send(self, router: &Router) -> (StatusCode, Option<String>, Value) {
        let mut builder = Request::builder()
            .method(self.method)
            .uri(self.uri)
            .header("x-principal-id", "ops-1")
            .header("x-principal-email", "ops@tradein.test");
        if self.admin {
            builder = builder.header("x-principal-admin", "true");
        }
        if let Some(id) = self.correlation_id {
            builder = builder.header(CORRELATION_HEADER, id);
        }
        let request = match self.body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = router.clone().oneshot(request).await.expect("router response");
        let status = response.status();
        let correlation = response
            .headers()
            .get(CORRELATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, correlation, payload)
    }
}

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(text) => text.parse().expect("decimal string"),
        Value::Number(number) => number.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}

async fn seed_phones(router: &Router) -> Value {
    let import = json!({
        "id": "PL-PHONES-1",
        "name": "Phones October",
        "category": "phones",
        "effective_date": "2026-10-01",
        "currency": "USD",
        "rows": [
            { "make": "Apple", "model": "iPhone 13 Pro", "storage": "256GB", "prices": { "A": "500" } }
        ]
    });
    let (status, _, report) = Call::post("/price-lists", import).as_admin().send(router).await;
    assert_eq!(status, StatusCode::CREATED, "{report}");

    let (status, _, category) =
        Call::post("/price-lists/PL-PHONES-1/activate", json!({})).as_admin().send(router).await;
    assert_eq!(status, StatusCode::OK, "{category}");
    assert_eq!(category["active_price_list"], "PL-PHONES-1");
    report
}

#[tokio::test]
async fn estimate_is_created_from_a_csv_manifest_and_can_be_fetched() {
    let router = router();
    seed_phones(&router).await;

    let (status, _, detail) = Call::post(
        "/estimates",
        json!({
            "contact": { "business_name": "Acme Refurb", "contact_name": "Jordan", "email": "jordan@acme.test" },
            "category": "phones",
            "manifest": "Device,Qty\niphone 13 pro 256gb x2\n"
        }),
    )
    .send(&router)
    .await;
    assert_eq!(status, StatusCode::CREATED, "{detail}");
    assert_eq!(detail["lines"].as_array().map(Vec::len), Some(1));
    assert_eq!(detail["lines"][0]["quantity"], 2);
    assert_eq!(decimal(&detail["quote"]["totals"]["total_indicative"]), Decimal::from(1000));

    let id = detail["quote"]["id"].as_str().expect("bulk quote id").to_string();
    let (status, _, fetched) = Call::get(format!("/estimates/{id}")).send(&router).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["quote"]["id"], id.as_str());
}

#[tokio::test]
async fn missing_estimate_is_a_404_carrying_the_callers_correlation_id() {
    let router = router();

    let (status, header, body) =
        Call::get("/estimates/BQ-missing").correlated("req-404").send(&router).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(header.as_deref(), Some("req-404"));
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["correlation_id"], "req-404");
}

#[tokio::test]
async fn quote_transitions_follow_the_table() {
    let router = router();
    let report = seed_phones(&router).await;
    let device_id = report["devices_created"][0].clone();

    let (status, _, quote) = Call::post(
        "/quotes",
        json!({ "device_id": device_id, "category": "phones", "grade": "A" }),
    )
    .send(&router)
    .await;
    assert_eq!(status, StatusCode::CREATED, "{quote}");
    assert_eq!(decimal(&quote["price"]), Decimal::from(500));
    let id = quote["id"].as_str().expect("quote id").to_string();

    let (status, _, rejected) =
        Call::post(format!("/quotes/{id}/status"), json!({ "status": "paid" })).send(&router).await;
    assert_eq!(status, StatusCode::CONFLICT, "{rejected}");
    assert_eq!(rejected["error"], "conflict");

    let (status, _, accepted) =
        Call::post(format!("/quotes/{id}/status"), json!({ "status": "accepted" })).send(&router).await;
    assert_eq!(status, StatusCode::OK, "{accepted}");
    assert_eq!(accepted["from"], "quoted");
    assert_eq!(accepted["to"], "accepted");
    assert_eq!(accepted["entity"]["status"], "accepted");

    let (status, _, missing_tracking) =
        Call::post(format!("/quotes/{id}/status"), json!({ "status": "shipped", "carrier": "UPS" }))
            .send(&router)
            .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{missing_tracking}");

    let (status, _, shipped) = Call::post(
        format!("/quotes/{id}/status"),
        json!({ "status": "shipped", "carrier": "UPS", "tracking_number": "1Z999" }),
    )
    .send(&router)
    .await;
    assert_eq!(status, StatusCode::OK, "{shipped}");
    assert_eq!(shipped["to"], "shipped");
}

#[tokio::test]
async fn price_list_writes_require_an_operator() {
    let router = router();

    let (status, _, body) = Call::post(
        "/price-lists/PL-PHONES-1/adjust",
        json!({ "device_ids": [1], "adjustments": [{ "kind": "percent", "percent": "10" }] }),
    )
    .send(&router)
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
    assert!(body["message"].as_str().is_some_and(|message| message.contains("price list adjustment")));
}

#[tokio::test]
async fn alias_deletion_by_a_non_operator_is_forbidden() {
    let router = router();

    let (status, correlation, body) = Call::delete("/aliases", json!({ "raw_text": "ip13p 256" }))
        .correlated("req-alias-1")
        .send(&router)
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["correlation_id"], "req-alias-1");
    assert_eq!(correlation.as_deref(), Some("req-alias-1"));
}

#[tokio::test]
async fn bulk_adjustment_reports_applied_rows() {
    let router = router();
    let report = seed_phones(&router).await;
    let device_id = report["devices_created"][0].clone();

    let (status, _, adjusted) = Call::post(
        "/price-lists/PL-PHONES-1/adjust",
        json!({ "device_ids": [device_id], "adjustments": [{ "kind": "percent", "percent": "10" }] }),
    )
    .as_admin()
    .send(&router)
    .await;

    assert_eq!(status, StatusCode::OK, "{adjusted}");
    assert_eq!(adjusted["applied"], 1);
    assert_eq!(adjusted["chunks"], 1);
}

#[tokio::test]
async fn partner_endpoints_validate_their_inputs() {
    let router = router();

    let (status, _, _) = Call::get("/partners/P-NOPE/balance").send(&router).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, body) = Call::post(
        "/partners/P-NOPE/payouts",
        json!({ "entry_ids": [], "reference": "WIRE-1" }),
    )
    .as_admin()
    .send(&router)
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap_or_default().contains("entry_ids"), "{body}");
}

#[tokio::test]
async fn alias_recording_rejects_unknown_devices() {
    let router = router();

    let (status, _, body) =
        Call::post("/aliases", json!({ "raw_text": "13 pro 256", "device_id": 999 })).send(&router).await;

    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
}
