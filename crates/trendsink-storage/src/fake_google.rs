//! In-process stand-in for the BigQuery and Sheets REST endpoints used by the sinks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Form, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub(crate) const FAKE_TOKEN: &str = "fake-token";
pub(crate) const PROJECT: &str = "proj";
pub(crate) const DATASET: &str = "trends";
pub(crate) const SPREADSHEET_ID: &str = "sheet-123";
/// Any row whose keyword equals this is rejected by the fake `insertAll`.
pub(crate) const REJECTED_KEYWORD: &str = "reject-me";

pub(crate) type Grid = Vec<Vec<Value>>;

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub(crate) datasets: HashSet<(String, String)>,
    pub(crate) inserted: Vec<(String, Value)>,
    pub(crate) spreadsheets: HashMap<String, HashMap<String, Grid>>,
    pub(crate) calls: Vec<String>,
}

pub(crate) struct FakeGoogle {
    base_url: String,
    pub(crate) state: Arc<Mutex<FakeState>>,
}

impl FakeGoogle {
    pub(crate) async fn start() -> Self {
        let mut state = FakeState::default();
        state.datasets.insert((PROJECT.into(), DATASET.into()));
        let residue = vec![
            vec![json!("stale"), json!("stale"), json!("stale"), json!("stale")],
            vec![json!("stale"), json!("stale")],
            vec![json!("stale")],
            vec![json!("stale")],
            vec![json!("stale")],
        ];
        state.spreadsheets.insert(
            SPREADSHEET_ID.into(),
            HashMap::from([
                ("Sheet1".to_string(), residue),
                ("Archive".to_string(), Grid::new()),
            ]),
        );
        let state = Arc::new(Mutex::new(state));

        let app = Router::new()
            .route("/echo-form", post(echo_form))
            .route("/bigquery/v2/projects/{project}/datasets/{dataset}", get(get_dataset))
            .route(
                "/bigquery/v2/projects/{project}/datasets/{dataset}/tables/{table}/insertAll",
                post(insert_all),
            )
            .route("/v4/spreadsheets/{id}", get(get_spreadsheet))
            .route("/v4/spreadsheets/{id}/values/{range}", post(clear_values).put(update_values))
            .with_state(state.clone());

        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn sheet(&self, sheet_name: &str) -> Grid {
        self.state.lock().unwrap().spreadsheets[SPREADSHEET_ID][sheet_name].clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

type Shared = State<Arc<Mutex<FakeState>>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {FAKE_TOKEN}"))
}

fn google_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"code": status.as_u16(), "message": message}})),
    )
        .into_response()
}

async fn echo_form(Form(form): Form<HashMap<String, String>>) -> String {
    format!("f.req={}", form.get("f.req").cloned().unwrap_or_default())
}

async fn get_dataset(
    State(state): Shared,
    headers: HeaderMap,
    Path((project, dataset)): Path<(String, String)>,
) -> Response {
    if !authorized(&headers) {
        return google_error(StatusCode::UNAUTHORIZED, "bad token");
    }
    let mut state = state.lock().unwrap();
    state.calls.push(format!("get_dataset {project}.{dataset}"));
    if state.datasets.contains(&(project.clone(), dataset.clone())) {
        Json(json!({"id": format!("{project}:{dataset}")})).into_response()
    } else {
        google_error(StatusCode::NOT_FOUND, &format!("Not found: Dataset {project}:{dataset}"))
    }
}

async fn insert_all(
    State(state): Shared,
    headers: HeaderMap,
    Path((project, dataset, table)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return google_error(StatusCode::UNAUTHORIZED, "bad token");
    }
    let mut state = state.lock().unwrap();
    let table_id = format!("{project}.{dataset}.{table}");
    state.calls.push(format!("insert_all {table_id}"));

    let rows = body["rows"].as_array().cloned().unwrap_or_default();
    let mut insert_errors = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let record = row["json"].clone();
        if record["keyword"] == REJECTED_KEYWORD {
            insert_errors.push(json!({
                "index": index,
                "errors": [{"reason": "invalid", "message": "no such field: keyword"}]
            }));
        } else {
            state.inserted.push((table_id.clone(), record));
        }
    }

    if insert_errors.is_empty() {
        Json(json!({"kind": "bigquery#tableDataInsertAllResponse"})).into_response()
    } else {
        Json(json!({"kind": "bigquery#tableDataInsertAllResponse", "insertErrors": insert_errors}))
            .into_response()
    }
}

async fn get_spreadsheet(State(state): Shared, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !authorized(&headers) {
        return google_error(StatusCode::UNAUTHORIZED, "bad token");
    }
    let mut state = state.lock().unwrap();
    state.calls.push(format!("get_spreadsheet {id}"));
    let Some(sheets) = state.spreadsheets.get(&id) else {
        return google_error(StatusCode::NOT_FOUND, "Requested entity was not found.");
    };
    let mut titles = sheets.keys().cloned().collect::<Vec<_>>();
    titles.sort();
    let sheets = titles
        .iter()
        .enumerate()
        .map(|(idx, title)| json!({"properties": {"sheetId": idx, "title": title}}))
        .collect::<Vec<_>>();
    Json(json!({"sheets": sheets})).into_response()
}

fn sheet_of_range(range: &str) -> String {
    let sheet = match range.rfind('!') {
        Some(pos) => &range[..pos],
        None => range,
    };
    let sheet = sheet.strip_prefix('\'').unwrap_or(sheet);
    let sheet = sheet.strip_suffix('\'').unwrap_or(sheet);
    sheet.replace("''", "'")
}

async fn clear_values(
    State(state): Shared,
    headers: HeaderMap,
    Path((id, range)): Path<(String, String)>,
) -> Response {
    if !authorized(&headers) {
        return google_error(StatusCode::UNAUTHORIZED, "bad token");
    }
    let Some(range) = range.strip_suffix(":clear") else {
        return google_error(StatusCode::BAD_REQUEST, "expected :clear");
    };
    let sheet = sheet_of_range(range);
    let mut state = state.lock().unwrap();
    state.calls.push(format!("clear {id}/{sheet}"));
    match state.spreadsheets.get_mut(&id).and_then(|s| s.get_mut(&sheet)) {
        Some(grid) => {
            grid.clear();
            Json(json!({"spreadsheetId": id, "clearedRange": range})).into_response()
        }
        None => google_error(StatusCode::BAD_REQUEST, "Unable to parse range"),
    }
}

async fn update_values(
    State(state): Shared,
    headers: HeaderMap,
    Path((id, range)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return google_error(StatusCode::UNAUTHORIZED, "bad token");
    }
    if query.get("valueInputOption").map(String::as_str) != Some("RAW") {
        return google_error(StatusCode::BAD_REQUEST, "valueInputOption is required");
    }
    let sheet = sheet_of_range(&range);
    let values = body["values"].as_array().cloned().unwrap_or_default();
    let mut state = state.lock().unwrap();
    state.calls.push(format!("update {id}/{sheet}"));
    let Some(grid) = state.spreadsheets.get_mut(&id).and_then(|s| s.get_mut(&sheet)) else {
        return google_error(StatusCode::BAD_REQUEST, "Unable to parse range");
    };

    // Cells outside the written block keep their previous contents.
    for (r, row) in values.iter().enumerate() {
        let cells = row.as_array().cloned().unwrap_or_default();
        if grid.len() <= r {
            grid.resize(r + 1, Vec::new());
        }
        for (c, cell) in cells.into_iter().enumerate() {
            if grid[r].len() <= c {
                grid[r].resize(c + 1, Value::Null);
            }
            grid[r][c] = cell;
        }
    }

    Json(json!({"spreadsheetId": id, "updatedRange": range, "updatedRows": values.len()})).into_response()
}
