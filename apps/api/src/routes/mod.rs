pub mod health;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::import::handlers as import;
use crate::qualify::handlers as qualify;
use crate::ranking::handlers as runs;
use crate::results::handlers as results;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Import (shared by both pipelines)
        .route("/api/v1/import", post(import::handle_import_upload))
        .route("/api/v1/import/text", post(import::handle_import_text))
        // Standard qualifier
        .route("/api/v1/qualify", post(qualify::handle_qualify))
        // Ranking runs
        .route(
            "/api/v1/runs",
            post(runs::handle_create_run).get(runs::handle_list_runs),
        )
        .route(
            "/api/v1/runs/:id",
            get(runs::handle_get_run).delete(runs::handle_delete_run),
        )
        .route("/api/v1/runs/:id/phase1", post(runs::handle_start_phase1))
        .route("/api/v1/runs/:id/phase2", post(runs::handle_start_phase2))
        .route("/api/v1/runs/:id/pause", post(runs::handle_pause))
        .route("/api/v1/runs/:id/resume", post(runs::handle_resume))
        .route("/api/v1/runs/:id/finalize", post(runs::handle_finalize))
        // Results
        .route(
            "/api/v1/runs/:id/connections",
            get(results::handle_list_connections),
        )
        .route(
            "/api/v1/runs/:id/connections/:cid/override",
            patch(results::handle_set_override),
        )
        .route("/api/v1/runs/:id/export", get(results::handle_export))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tokio::sync::Semaphore;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::config::Config;
    use crate::models::criteria::QualificationCriteria;
    use crate::qualify::classifier::{Classifier, ClassifierError, ClassifierRecord};
    use crate::ranking::enrichment::{
        Enricher, EnrichmentError, EnrichmentRequestRecord, EnrichmentResponseItem,
    };
    use crate::ranking::memory_store::InMemoryRunStore;
    use crate::ranking::phase1::Phase1Settings;
    use crate::ranking::scorer::ScoringConfig;
    use crate::ranking::tiers::TierThresholds;
    use crate::ranking::worker::{EnrichmentWorker, WorkerRegistry, WorkerSettings};

    struct NeutralEnricher;

    #[async_trait]
    impl Enricher for NeutralEnricher {
        async fn enrich(
            &self,
            records: &[EnrichmentRequestRecord],
            _criteria: &QualificationCriteria,
        ) -> Result<Vec<EnrichmentResponseItem>, EnrichmentError> {
            Ok(neutral_items(records))
        }
    }

    fn neutral_items(records: &[EnrichmentRequestRecord]) -> Vec<EnrichmentResponseItem> {
        records
            .iter()
            .map(|r| EnrichmentResponseItem {
                id: r.id,
                ai_score: Some(0.0),
                reasoning: None,
                geography: None,
                industry: None,
                company_size: None,
                error: None,
            })
            .collect()
    }

    /// Holds the first call open until the test adds a permit to `gate`.
    struct GatedEnricher {
        gate: Semaphore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Enricher for GatedEnricher {
        async fn enrich(
            &self,
            records: &[EnrichmentRequestRecord],
            _criteria: &QualificationCriteria,
        ) -> Result<Vec<EnrichmentResponseItem>, EnrichmentError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.gate.acquire().await.unwrap().forget();
            }
            Ok(neutral_items(records))
        }
    }

    struct RejectAllClassifier;

    #[async_trait]
    impl Classifier for RejectAllClassifier {
        async fn classify(
            &self,
            records: &[ClassifierRecord],
            _criteria: &QualificationCriteria,
        ) -> Result<Vec<Value>, ClassifierError> {
            Ok(records
                .iter()
                .map(|_| json!({"qualification": "not_qualified", "confidence": "high", "reasoning": "no"}))
                .collect())
        }
    }

    fn test_app() -> Router {
        app_with(Arc::new(NeutralEnricher))
    }

    fn app_with(enricher: Arc<dyn Enricher>) -> Router {
        let config = Config {
            database_url: None,
            anthropic_api_key: "test".to_string(),
            port: 0,
            rust_log: "info".to_string(),
            phase1_chunk_size: 500,
            enrichment_batch_size: 10,
            enrichment_cost_per_call: 0.02,
            claim_timeout_secs: 300,
            qualifier_batch_size: 50,
            tier_thresholds: TierThresholds::default(),
            max_upload_bytes: 1024 * 1024,
        };
        let store = Arc::new(InMemoryRunStore::new());
        let worker = Arc::new(EnrichmentWorker::new(
            store.clone(),
            enricher,
            TierThresholds::default(),
            ScoringConfig::default(),
            WorkerSettings::default(),
        ));
        build_router(AppState {
            store,
            worker,
            workers: WorkerRegistry::new(),
            classifier: Arc::new(RejectAllClassifier),
            phase1: Phase1Settings::default(),
            config,
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn create_run(app: &Router, user: Uuid, body: Value) -> String {
        let (status, body) = send(app, json_request("POST", "/api/v1/runs", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        let mut created: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(created["owner_id"], json!(user));
        created["id"].take().as_str().unwrap().to_string()
    }

    async fn get_run(app: &Router, run_id: &str, user: Uuid) -> Value {
        let (_, body) = send(
            app,
            empty_request("GET", &format!("/api/v1/runs/{run_id}?user_id={user}")),
        )
        .await;
        serde_json::from_slice(&body).unwrap()
    }

    /// Polls the run until `done` accepts it; spawned tasks advance while we sleep.
    async fn wait_for(app: &Router, run_id: &str, user: Uuid, done: impl Fn(&Value) -> bool) -> Value {
        let mut run = Value::Null;
        for _ in 0..300 {
            run = get_run(app, run_id, user).await;
            if done(&run) {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run never reached the expected state: {run}");
    }

    async fn post(app: &Router, run_id: &str, action: &str, user: Uuid) -> (StatusCode, Value) {
        let (status, body) = send(
            app,
            empty_request("POST", &format!("/api/v1/runs/{run_id}/{action}?user_id={user}")),
        )
        .await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = send(&app, empty_request("GET", "/health")).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_run_lifecycle_through_export() {
        let app = test_app();
        let user = Uuid::new_v4();

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/v1/runs",
                json!({
                    "user_id": user,
                    "name": "Smoke",
                    "criteria": {"target_titles": ["VP Sales"]},
                    "csv": "First Name,Last Name,Company,Position\nAnn,Lee,Acme,VP Sales\nBo,Chen,,Student\n"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let created: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(created["resume_stage"], "setup");
        let run_id = created["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            empty_request("POST", &format!("/api/v1/runs/{run_id}/phase1?user_id={user}")),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let mut stage = Value::Null;
        for _ in 0..100 {
            let (_, body) = send(
                &app,
                empty_request("GET", &format!("/api/v1/runs/{run_id}?user_id={user}")),
            )
            .await;
            let run: Value = serde_json::from_slice(&body).unwrap();
            stage = run["resume_stage"].clone();
            if stage == "phase1_review" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stage, "phase1_review");

        // No borderline records, so Phase 2 is refused.
        let (status, _) = send(
            &app,
            empty_request("POST", &format!("/api/v1/runs/{run_id}/phase2?user_id={user}")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(
            &app,
            empty_request("POST", &format!("/api/v1/runs/{run_id}/finalize?user_id={user}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let finalized: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(finalized["status"], "completed");

        let (status, body) = send(
            &app,
            empty_request(
                "GET",
                &format!("/api/v1/runs/{run_id}/export?user_id={user}&kind=removal"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let csv = String::from_utf8(body).unwrap();
        assert!(csv.starts_with("rank,first_name,last_name"));
        assert!(csv.contains("Chen"));
        assert!(!csv.contains("Lee"));

        let (status, body) = send(
            &app,
            empty_request(
                "GET",
                &format!("/api/v1/runs/{run_id}/connections?user_id={user}&tier=strong_keep"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let page: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(page["total"], 1);
        assert_eq!(page["items"][0]["first_name"], "Ann");
    }

    #[tokio::test]
    async fn test_runs_of_other_users_are_not_found() {
        let app = test_app();
        let (_, body) = send(
            &app,
            json_request(
                "POST",
                "/api/v1/runs",
                json!({
                    "user_id": Uuid::new_v4(),
                    "criteria": {"description": "B2B SaaS buyers"},
                    "connections": [{"first_name": "Ann", "last_name": "Lee"}]
                }),
            ),
        )
        .await;
        let run_id = serde_json::from_slice::<Value>(&body).unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, body) = send(
            &app,
            empty_request(
                "GET",
                &format!("/api/v1/runs/{run_id}?user_id={}", Uuid::new_v4()),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_page_size_out_of_range_is_rejected() {
        let app = test_app();
        let user = Uuid::new_v4();
        let (_, body) = send(
            &app,
            json_request(
                "POST",
                "/api/v1/runs",
                json!({
                    "user_id": user,
                    "criteria": {"target_titles": ["CTO"]},
                    "connections": [{"first_name": "Ann", "last_name": "Lee"}]
                }),
            ),
        )
        .await;
        let run_id = serde_json::from_slice::<Value>(&body).unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();
        let (status, _) = send(
            &app,
            empty_request(
                "GET",
                &format!("/api/v1/runs/{run_id}/connections?user_id={user}&page_size=501"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_multipart_import() {
        let app = test_app();
        let body = "--XBOUNDARY\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"Connections.csv\"\r\n\
Content-Type: text/csv\r\n\r\n\
Notes:\nFirst Name,Last Name,Company\nAnn,Lee,Acme\nbroken,row\n\r\n\
--XBOUNDARY--\r\n";
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/import")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let report: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["connections"].as_array().unwrap().len(), 1);
        assert_eq!(report["skipped_rows"], 1);
    }

    #[tokio::test]
    async fn test_qualify_requires_criteria() {
        let app = test_app();
        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/v1/qualify",
                json!({"criteria": {}, "connections": [{"first_name": "Ann", "last_name": "Lee"}]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/v1/qualify",
                json!({
                    "criteria": {"target_titles": ["CTO"]},
                    "connections": [{"first_name": "Ann", "last_name": "Lee", "position": "CTO"}]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let outcome: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(outcome["summary"]["total"], 1);
        assert_eq!(outcome["results"][0]["qualification"], "not_qualified");
    }

    #[tokio::test]
    async fn test_resume_right_after_pause_keeps_enriching_to_completion() {
        let enricher = Arc::new(GatedEnricher {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        });
        let app = app_with(enricher.clone());
        let user = Uuid::new_v4();
        // "Account Manager" shares a word with the target title: 15 points, borderline.
        let contacts: Vec<Value> = ["Ann", "Bo", "Cy"]
            .iter()
            .map(|name| json!({"first_name": name, "last_name": "Park", "company": "Acme", "position": "Account Manager"}))
            .collect();
        let run_id = create_run(
            &app,
            user,
            json!({
                "user_id": user,
                "criteria": {"target_titles": ["Account Executive"]},
                "connections": contacts
            }),
        )
        .await;

        post(&app, &run_id, "phase1", user).await;
        let reviewed = wait_for(&app, &run_id, user, |r| r["resume_stage"] == "phase1_review").await;
        assert_eq!(reviewed["phase2_total"], 3);

        let (status, _) = post(&app, &run_id, "phase2", user).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        for _ in 0..300 {
            if enricher.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 1);

        // The first call is still in flight when the pause and the resume land.
        let (status, paused) = post(&app, &run_id, "pause", user).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(paused["status"], "paused");

        let (status, resumed) = post(&app, &run_id, "resume", user).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(resumed["status"], "phase2_running");
        assert_eq!(resumed["worker_active"], true);

        // A second resume while the first is queued is refused without side effects.
        let (status, _) = post(&app, &run_id, "resume", user).await;
        assert_eq!(status, StatusCode::CONFLICT);

        enricher.gate.add_permits(1);
        let done = wait_for(&app, &run_id, user, |r| {
            r["status"] == "completed" && r["worker_active"] == false
        })
        .await;
        assert_eq!(done["phase2_processed"], 3);
        assert_eq!(done["phase2_calls"], 3);
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_override_moves_row_between_lists_without_rescoring() {
        let app = test_app();
        let user = Uuid::new_v4();
        let run_id = create_run(
            &app,
            user,
            json!({
                "user_id": user,
                "criteria": {"target_titles": ["VP Sales"]},
                "connections": [
                    {"first_name": "Ann", "last_name": "Lee", "company": "Acme", "position": "VP Sales"},
                    {"first_name": "Bodhi", "last_name": "Chen", "company": "Acme", "position": "Engineer"}
                ]
            }),
        )
        .await;
        post(&app, &run_id, "phase1", user).await;
        wait_for(&app, &run_id, user, |r| r["resume_stage"] == "phase1_review").await;

        let row_of = move |app: Router, run_id: String| async move {
            let (status, body) = send(
                &app,
                empty_request(
                    "GET",
                    &format!("/api/v1/runs/{run_id}/connections?user_id={user}&search=bodhi"),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            let mut page: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(page["total"], 1);
            page["items"][0].take()
        };
        let removal_csv = move |app: Router, run_id: String| async move {
            let (status, body) = send(
                &app,
                empty_request(
                    "GET",
                    &format!("/api/v1/runs/{run_id}/export?user_id={user}&kind=removal"),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            String::from_utf8(body).unwrap()
        };
        let set_override = move |app: Router, run_id: String, cid: String, value: Value| async move {
            send(
                &app,
                json_request(
                    "PATCH",
                    &format!("/api/v1/runs/{run_id}/connections/{cid}/override?user_id={user}"),
                    json!({ "value": value }),
                ),
            )
            .await
            .0
        };

        let before = row_of(app.clone(), run_id.clone()).await;
        assert_eq!(before["tier"], "likely_remove");
        assert!(before["user_override"].is_null());
        assert!(removal_csv(app.clone(), run_id.clone()).await.contains("Bodhi"));
        let cid = before["id"].as_str().unwrap().to_string();

        let status = set_override(app.clone(), run_id.clone(), cid.clone(), json!("keep")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let kept = row_of(app.clone(), run_id.clone()).await;
        assert_eq!(kept["user_override"], "keep");
        assert_eq!(kept["tier"], before["tier"]);
        assert_eq!(kept["total_score"], before["total_score"]);
        assert!(!removal_csv(app.clone(), run_id.clone()).await.contains("Bodhi"));

        let status = set_override(app.clone(), run_id.clone(), cid.clone(), Value::Null).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let cleared = row_of(app.clone(), run_id.clone()).await;
        assert!(cleared["user_override"].is_null());
        assert_eq!(cleared["total_score"], before["total_score"]);
        assert!(removal_csv(app.clone(), run_id.clone()).await.contains("Bodhi"));

        let status = set_override(
            app.clone(),
            run_id.clone(),
            Uuid::new_v4().to_string(),
            json!("remove"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
