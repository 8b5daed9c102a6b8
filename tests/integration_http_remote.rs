//! HTTP remote store against an in-process PostgREST-style mock.

#[cfg(feature = "integration-tests")]
mod integration_tests {
	use std::collections::HashMap;
	use std::sync::{Arc, Mutex};
	use std::time::Duration;

	use axum::extract::{Query, State};
	use axum::http::{HeaderMap, StatusCode};
	use axum::response::{IntoResponse, Response};
	use axum::routing::get;
	use axum::{Json, Router};
	use serde_json::{Value, json};
	use url::Url;

	use clinic_sync::document::{Document, Entity};
	use clinic_sync::remote::{HttpRemoteStore, RemoteError, RemoteStore};
	use clinic_sync::sync::{ConnectivityFlag, PushOutcome, RetryPolicy, Session, StaticSession, SyncEngine};

	const ACCOUNT: &str = "acct-1";
	const API_KEY: &str = "anon-key";

	#[derive(Clone, Default)]
	struct MockTable {
		rows: Arc<Mutex<Vec<Value>>>,
		methods: Arc<Mutex<Vec<&'static str>>>,
	}

	fn authorized(headers: &HeaderMap) -> bool {
		let bearer = headers.get("authorization").and_then(|v| v.to_str().ok());
		let key = headers.get("apikey").and_then(|v| v.to_str().ok());
		bearer == Some("Bearer token") && key == Some(API_KEY)
	}

	fn eq_filter<'a>(query: &'a HashMap<String, String>, column: &str) -> Option<&'a str> {
		query.get(column).and_then(|v| v.strip_prefix("eq."))
	}

	async fn select(
		State(table): State<MockTable>,
		Query(query): Query<HashMap<String, String>>,
		headers: HeaderMap,
	) -> Response {
		if !authorized(&headers) {
			return StatusCode::UNAUTHORIZED.into_response();
		}
		table.methods.lock().unwrap().push("GET");
		let account = eq_filter(&query, "account_id").unwrap_or_default().to_string();
		let rows: Vec<Value> = table
			.rows
			.lock()
			.unwrap()
			.iter()
			.filter(|r| r["account_id"] == account.as_str())
			.map(|r| json!({"id": r["id"], "data": r["data"]}))
			.collect();
		Json(rows).into_response()
	}

	async fn insert(State(table): State<MockTable>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
		if !authorized(&headers) {
			return StatusCode::UNAUTHORIZED;
		}
		table.methods.lock().unwrap().push("POST");
		let mut rows = table.rows.lock().unwrap();
		let id = rows.len() + 1;
		rows.push(json!({
			"id": id,
			"account_id": body["account_id"],
			"data": body["data"],
			"updated_at": body["updated_at"],
		}));
		StatusCode::CREATED
	}

	async fn update(
		State(table): State<MockTable>,
		Query(query): Query<HashMap<String, String>>,
		headers: HeaderMap,
		Json(body): Json<Value>,
	) -> StatusCode {
		if !authorized(&headers) {
			return StatusCode::UNAUTHORIZED;
		}
		table.methods.lock().unwrap().push("PATCH");
		let id = eq_filter(&query, "id").unwrap_or_default().to_string();
		let mut rows = table.rows.lock().unwrap();
		match rows.iter_mut().find(|r| r["id"].to_string() == id) {
			Some(row) => {
				row["data"] = body["data"].clone();
				row["updated_at"] = body["updated_at"].clone();
				StatusCode::NO_CONTENT
			}
			None => StatusCode::NOT_FOUND,
		}
	}

	async fn serve(table: MockTable) -> Url {
		let app = Router::new()
			.route("/rest/v1/clinic_data", get(select).post(insert).patch(update))
			.with_state(table);
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		Url::parse(&format!("http://{}", addr)).unwrap()
	}

	fn store(base: &Url, sessions: Arc<StaticSession>, api_key: &str) -> HttpRemoteStore {
		HttpRemoteStore::new(
			base,
			"clinic_data",
			Some(api_key.to_string()),
			Duration::from_secs(5),
			sessions,
		)
		.unwrap()
	}

	fn signed_in() -> Arc<StaticSession> {
		Arc::new(StaticSession::new(Some(Session::new(ACCOUNT, "token"))))
	}

	fn doc(revision: u64) -> Document {
		let mut d = Document {
			revision,
			..Document::default()
		};
		d.collections.insert(
			"patients".to_string(),
			vec![
				Entity::new("p1")
					.with_updated_at(revision)
					.with_field("photo", json!("data:image/png;base64,AAAA")),
			],
		);
		d
	}

	#[tokio::test]
	async fn test_insert_then_update_single_row() {
		let table = MockTable::default();
		let base = serve(table.clone()).await;
		let remote = store(&base, signed_in(), API_KEY);

		assert!(remote.fetch_latest(ACCOUNT).await.unwrap().is_none());

		remote.upsert(ACCOUNT, &doc(1)).await.unwrap();
		let inserted = table.rows.lock().unwrap()[0]["updated_at"].clone();
		assert!(inserted.is_string(), "insert carries updated_at: {}", inserted);
		remote.upsert(ACCOUNT, &doc(2)).await.unwrap();

		let rows = table.rows.lock().unwrap().clone();
		assert_eq!(rows.len(), 1);
		assert!(rows[0]["updated_at"].is_string());
		assert_eq!(rows[0]["data"]["revision"], 2);
		assert_eq!(rows[0]["data"]["collections"]["patients"][0]["photo"], "");

		let latest = remote.fetch_latest(ACCOUNT).await.unwrap().unwrap();
		assert_eq!(latest.revision, 2);

		let methods = table.methods.lock().unwrap().clone();
		assert!(methods.contains(&"POST"));
		assert!(methods.contains(&"PATCH"));
	}

	#[tokio::test]
	async fn test_errors_are_typed() {
		let base = serve(MockTable::default()).await;

		let wrong_key = store(&base, signed_in(), "nope");
		assert!(matches!(wrong_key.fetch_latest(ACCOUNT).await, Err(RemoteError::Status(401))));

		let signed_out = store(&base, Arc::new(StaticSession::new(None)), API_KEY);
		assert!(matches!(
			signed_out.upsert(ACCOUNT, &doc(1)).await,
			Err(RemoteError::Unauthenticated)
		));
	}

	#[tokio::test]
	async fn test_engine_pushes_over_http() {
		let table = MockTable::default();
		let base = serve(table.clone()).await;
		let sessions = signed_in();
		let remote = Arc::new(store(&base, sessions.clone(), API_KEY));
		let engine = SyncEngine::builder(remote, sessions, Arc::new(ConnectivityFlag::new(true)))
			.retry_policy(RetryPolicy {
				max_attempts: 2,
				backoff_base: Duration::from_millis(1),
			})
			.build();

		assert_eq!(engine.push(Arc::new(doc(7))).await, PushOutcome::Synced);
		assert_eq!(table.rows.lock().unwrap()[0]["data"]["revision"], 7);
	}
}
