use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    routing::post,
};
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tempfile::{TempDir, tempdir};
use tokio::net::TcpListener;
use tower::ServiceExt;

use datacollab::app::{self, AppState};
use datacollab::config::Config;
use datacollab::stories::{DocumentStore, GeoFile, Person, ProjectRecord};

const BOUNDARY: &str = "datacollab-test-boundary";

/// Requests the stub collaborator API received.
#[derive(Clone, Default)]
struct Recorded {
    files: Arc<Mutex<Vec<Value>>>,
    joins: Arc<Mutex<Vec<Value>>>,
}

async fn stub_login(Json(body): Json<Value>) -> Json<Value> {
    if body["password"] == "secret" {
        Json(json!({
            "message": "SUCCESS",
            "user": { "_id": "u1" },
            "token_id": "tok",
            "access_token": "acc",
        }))
    } else {
        Json(json!({ "message": "Invalid credentials" }))
    }
}

async fn stub_logged_in(headers: HeaderMap) -> Json<Value> {
    let token = headers.get("token_id").and_then(|v| v.to_str().ok());
    if token == Some("tok") {
        Json(json!({ "message": "SUCCESS" }))
    } else {
        Json(json!({ "message": "Not logged in" }))
    }
}

async fn stub_projects(Json(body): Json<Value>) -> Json<Value> {
    if body["name"] == "taken" {
        Json(json!({ "message": "Project name already exists" }))
    } else {
        Json(json!({ "message": "SUCCESS", "project": { "_id": "p1" } }))
    }
}

async fn stub_files(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    let count = body["files"].as_array().map(|f| f.len()).unwrap_or(0);
    recorded.files.lock().unwrap().push(body);
    let files: Vec<Value> = (1..=count).map(|n| json!({ "_id": format!("file-{}", n) })).collect();
    Json(json!({ "message": "SUCCESS", "files": files }))
}

async fn stub_joins(State(recorded): State<Recorded>, Json(body): Json<Value>) -> Json<Value> {
    recorded.joins.lock().unwrap().push(body);
    Json(json!({ "message": "SUCCESS" }))
}

async fn spawn_stub(recorded: Recorded) -> String {
    let api = Router::new()
        .route("/v2/login/", post(stub_login))
        .route("/v2/users/logged-in", post(stub_logged_in))
        .route("/v2/projects/", post(stub_projects))
        .route("/v2/files/", post(stub_files))
        .route("/v2/joins/", post(stub_joins))
        .with_state(recorded);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, api).await.unwrap();
    });
    format!("http://{}", addr)
}

struct Harness {
    app: Router,
    recorded: Recorded,
    cookie: Option<String>,
    db: TempDir,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl Reply {
    fn location(&self) -> &str {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

impl Harness {
    async fn new() -> Self {
        let recorded = Recorded::default();
        let host = spawn_stub(recorded.clone()).await;
        let db = tempdir().unwrap();

        let mut config = Config::from_toml(&format!(
            r#"
            master_secret_key = "test-secret-key-that-is-long-enough-0123456789"
            email_sender_address = "noreply@example.org"
            public_base_url = "http://stories.example.org"

            [api]
            host = "{}"
            timeout_seconds = 5
            "#,
            host
        ))
        .unwrap();
        config.database_dir = db.path().to_path_buf();
        config.templates_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/templates").into();
        config.static_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/static").into();

        let app = app::router(AppState::new(config).unwrap());
        Harness {
            app,
            recorded,
            cookie: None,
            db,
        }
    }

    async fn send(&mut self, builder: axum::http::request::Builder, body: Body) -> Reply {
        let builder = match &self.cookie {
            Some(cookie) => builder.header(header::COOKIE, cookie),
            None => builder,
        };
        let response = self.app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();

        if let Some(set) = response.headers().get(header::SET_COOKIE) {
            let pair = set.to_str().unwrap().split(';').next().unwrap().to_string();
            self.cookie = Some(pair);
        }

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        Reply {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    async fn get(&mut self, path: &str) -> Reply {
        self.send(Request::get(path), Body::empty()).await
    }

    async fn post_form(&mut self, path: &str, pairs: &[(&str, &str)]) -> Reply {
        let body = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let builder = Request::post(path).header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        self.send(builder, Body::from(body)).await
    }

    async fn post_json(&mut self, path: &str, value: Value) -> Reply {
        let builder = Request::post(path).header(header::CONTENT_TYPE, "application/json");
        self.send(builder, Body::from(value.to_string())).await
    }

    async fn post_multipart(&mut self, path: &str, body: String) -> Reply {
        let builder = Request::post(path).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
        self.send(builder, Body::from(body)).await
    }

    async fn login(&mut self) {
        let reply = self
            .post_form("/login", &[("email", "ana@example.org"), ("password", "secret")])
            .await;
        assert_eq!(reply.status, StatusCode::SEE_OTHER);
        assert_eq!(reply.location(), "/collect");
    }

    fn store(&self) -> DocumentStore {
        DocumentStore::open(self.db.path()).unwrap()
    }
}

fn multipart_upload(field: &str, files: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (name, contents) in files {
        body.push_str(&format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"{n}\"\r\nContent-Type: text/csv\r\n\r\n{c}\r\n",
            b = BOUNDARY,
            f = field,
            n = name,
            c = contents
        ));
        body.push_str(&format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"s3url-hidden\"\r\n\r\nhttps://bucket.s3.amazonaws.com/p1/{n}\r\n",
            b = BOUNDARY,
            n = name
        ));
        body.push_str(&format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"s3rpath-hidden\"\r\n\r\np1/{n}\r\n",
            b = BOUNDARY,
            n = name
        ));
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));
    body
}

fn selection(column: &str, file_id: &str) -> String {
    format!(
        "{};<input type=\"hidden\" name=\"file_id\" value=\"{}\">",
        column, file_id
    )
}

fn project(id: &str, with_files: bool) -> ProjectRecord {
    let mut senders = BTreeMap::new();
    senders.insert(
        "s1".to_string(),
        Person {
            name: "Bo".into(),
            email: "bo@example.org".into(),
        },
    );
    let files = if with_files {
        vec![GeoFile {
            s3_file_path: "p1/reef.jpg".into(),
            location: [151.2, -33.8],
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            sender_id: "s1".into(),
        }]
    } else {
        Vec::new()
    };
    ProjectRecord {
        id: id.into(),
        name: format!("Project {}", id),
        license: Some("CC-BY-4.0".into()),
        organization: "Reef Watch".into(),
        owner: Person {
            name: "Ana".into(),
            email: "ana@example.org".into(),
        },
        senders,
        files,
    }
}

#[tokio::test]
async fn pages_redirect_to_login_without_session() {
    let mut h = Harness::new().await;

    for path in ["/collect", "/projects", "/map-meta-files", "/datastories/"] {
        let reply = h.get(path).await;
        assert_eq!(reply.status, StatusCode::SEE_OTHER, "{}", path);
        assert_eq!(reply.location(), "/login", "{}", path);
    }

    let index = h.get("/").await;
    assert_eq!(index.status, StatusCode::OK);
}

#[tokio::test]
async fn failed_login_shows_upstream_message() {
    let mut h = Harness::new().await;

    let reply = h
        .post_form("/login", &[("email", "ana@example.org"), ("password", "wrong")])
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.contains("Invalid credentials"));

    let collect = h.get("/collect").await;
    assert_eq!(collect.location(), "/login");
}

#[tokio::test]
async fn login_then_logout() {
    let mut h = Harness::new().await;
    h.login().await;

    let collect = h.get("/collect").await;
    assert_eq!(collect.status, StatusCode::OK);
    assert!(collect.body.contains("Collect data"));

    let logout = h.get("/logout").await;
    assert_eq!(logout.status, StatusCode::SEE_OTHER);
    assert_eq!(logout.location(), "/");

    let collect = h.get("/collect").await;
    assert_eq!(collect.location(), "/login");
}

#[tokio::test]
async fn create_project_reports_rejection() {
    let mut h = Harness::new().await;
    h.login().await;

    let reply = h
        .post_form("/projects", &[("project_name", "taken"), ("license", "CC-BY-4.0")])
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.contains("Project name already exists"));
    assert!(reply.body.contains("Create a project"));
}

#[tokio::test]
async fn upload_and_map_metadata_into_join() {
    let mut h = Harness::new().await;
    h.login().await;

    let created = h
        .post_form("/projects", &[("project_name", "Reef survey"), ("license", "CC-BY-4.0")])
        .await;
    assert!(created.body.contains("Upload raw data files"));

    let uploaded = h
        .post_multipart(
            "/upload-meta-files",
            multipart_upload(
                "upload_metadata_form-meta_data_files",
                &[("sites.csv", "site,depth\r\nA,1"), ("samples.csv", "sample,site\r\nS1,A")],
            ),
        )
        .await;
    assert_eq!(uploaded.status, StatusCode::OK);
    assert!(uploaded.body.contains("Map metadata files"));
    assert!(uploaded.body.contains("sites.csv"));
    assert!(uploaded.body.contains("depth"));

    {
        let files = h.recorded.files.lock().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["project_id"], "p1");
        assert_eq!(files[0]["files"][1]["file_type"], "META_DATA");
        assert_eq!(files[0]["files"][1]["relative_s3_path"], "p1/samples.csv");
    }

    let site_1 = selection("site", "file-1");
    let depth_1 = selection("depth", "file-1");
    let site_2 = selection("site", "file-2");
    let mapped = h
        .post_form(
            "/map-meta-files",
            &[
                ("file_name", "sites.csv"),
                ("file_id", "file-1"),
                ("file_name", "samples.csv"),
                ("file_id", "file-2"),
                ("column_select", site_1.as_str()),
                ("column_select", depth_1.as_str()),
                ("column_select", site_2.as_str()),
                ("join_select", site_1.as_str()),
                ("join_select", site_2.as_str()),
            ],
        )
        .await;
    assert_eq!(mapped.status, StatusCode::OK);
    assert!(mapped.body.contains("Join created"));

    let joins = h.recorded.joins.lock().unwrap();
    assert_eq!(
        joins[0],
        json!({
            "project_id": "p1",
            "user_id": "u1",
            "joins": [{
                "file_id_1": "file-1",
                "columns_for_file_1": ["site", "depth"],
                "join_column_for_file_1": "site",
                "file_id_2": "file-2",
                "columns_for_file_2": ["site"],
                "join_column_for_file_2": "site",
            }],
        })
    );
}

#[tokio::test]
async fn mapping_without_join_column_is_flashed() {
    let mut h = Harness::new().await;
    h.login().await;
    h.post_form("/projects", &[("project_name", "Reef survey"), ("license", "CC0-1.0")])
        .await;

    let site = selection("site", "file-1");
    let mapped = h
        .post_form(
            "/map-meta-files",
            &[("file_id", "file-1"), ("column_select", site.as_str())],
        )
        .await;
    assert_eq!(mapped.status, StatusCode::OK);
    assert!(mapped.body.contains("No join column selected for file file-1"));
    assert!(h.recorded.joins.lock().unwrap().is_empty());
}

#[tokio::test]
async fn join_preview_from_structured_selections() {
    let mut h = Harness::new().await;

    let reply = h
        .post_json(
            "/api/joins",
            json!({
                "column_select": [
                    { "column": "a", "file_id": "f1" },
                    { "column": "b", "file_id": "f2" },
                ],
                "join_select": [
                    { "column": "a", "file_id": "f1" },
                    { "column": "b", "file_id": "f2" },
                ],
            }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let payload: Value = serde_json::from_str(&reply.body).unwrap();
    assert_eq!(payload["joins"][0]["file_id_2"], "f2");
    assert_eq!(payload["joins"][0]["join_column_for_file_1"], "a");

    let missing = h
        .post_json(
            "/api/joins",
            json!({ "column_select": [{ "column": "a", "file_id": "f1" }], "join_select": [] }),
        )
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn publish_and_view_datastory() {
    let mut h = Harness::new().await;
    h.store().insert_project(project("p1", true)).unwrap();
    h.store().insert_project(project("p2", false)).unwrap();
    h.login().await;

    let listing = h.get("/datastories/").await;
    assert_eq!(listing.status, StatusCode::OK);
    assert!(listing.body.contains("Project p1"));

    let empty = h
        .post_form("/datastories/", &[("project_id", "p2"), ("plot-dataset-on-map", "plot")])
        .await;
    assert!(empty.body.contains("No files for the project yet. Cannot plot on the map."));

    let blank = h
        .post_form(
            "/datastories/",
            &[("project_id", "p1"), ("editordata", ""), ("publish-datastory", "publish")],
        )
        .await;
    assert!(blank.body.contains("Please enter your story."));

    let published = h
        .post_form(
            "/datastories/",
            &[
                ("project_id", "p1"),
                ("editordata", "<p>Coral cover is recovering.</p>"),
                ("publish-datastory", "publish"),
            ],
        )
        .await;
    assert_eq!(published.status, StatusCode::OK);
    assert!(published.body.contains("locations-view"));

    let marker = "Published at <a href=\"/datastories/";
    let start = published.body.find(marker).unwrap() + marker.len();
    let url = &published.body[start..start + 11];
    assert!(datacollab::stories::is_unique_url(url), "{}", url);

    let view = h.get(&format!("/datastories/{}", url)).await;
    assert_eq!(view.status, StatusCode::OK);
    assert!(view.body.contains("<p>Coral cover is recovering.</p>"));
    assert!(view.body.contains("Reef Watch"));
}

#[tokio::test]
async fn unknown_story_is_not_found() {
    let mut h = Harness::new().await;
    assert_eq!(h.get("/datastories/abc-def-ghi").await.status, StatusCode::NOT_FOUND);
    assert_eq!(h.get("/datastories/not-a-url").await.status, StatusCode::NOT_FOUND);
}

fn multipart_without_bucket_fields(field: &str, name: &str, contents: &str) -> String {
    format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"{n}\"\r\nContent-Type: text/csv\r\n\r\n{c}\r\n--{b}--\r\n",
        b = BOUNDARY,
        f = field,
        n = name,
        c = contents
    )
}

#[tokio::test]
async fn raw_upload_registers_files_and_moves_on() {
    let mut h = Harness::new().await;
    h.login().await;
    h.post_form("/projects", &[("project_name", "Reef survey"), ("license", "CC-BY-4.0")])
        .await;

    let uploaded = h
        .post_multipart(
            "/upload-raw-files",
            multipart_upload("upload_raw_data_form-raw_data_files", &[("reef.jpg", "jpegbytes")]),
        )
        .await;
    assert_eq!(uploaded.status, StatusCode::OK);
    assert!(uploaded.body.contains("Upload metadata files"));

    let files = h.recorded.files.lock().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["files"][0]["file_name"], "reef.jpg");
    assert_eq!(files[0]["files"][0]["file_type"], "RAW");
    assert_eq!(files[0]["files"][0]["s3_link"], "https://bucket.s3.amazonaws.com/p1/reef.jpg");
}

#[tokio::test]
async fn raw_upload_without_bucket_fields_is_refused() {
    let mut h = Harness::new().await;
    h.login().await;
    h.post_form("/projects", &[("project_name", "Reef survey"), ("license", "CC-BY-4.0")])
        .await;

    let uploaded = h
        .post_multipart(
            "/upload-raw-files",
            multipart_without_bucket_fields("upload_raw_data_form-raw_data_files", "reef.jpg", "jpegbytes"),
        )
        .await;
    assert_eq!(uploaded.status, StatusCode::OK);
    assert!(uploaded.body.contains("Every file must finish uploading"));
    assert!(uploaded.body.contains("Upload raw data files"));
    assert!(h.recorded.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn metadata_header_with_separator_is_refused() {
    let mut h = Harness::new().await;
    h.login().await;
    h.post_form("/projects", &[("project_name", "Reef survey"), ("license", "CC-BY-4.0")])
        .await;

    let uploaded = h
        .post_multipart(
            "/upload-meta-files",
            multipart_upload(
                "upload_metadata_form-meta_data_files",
                &[("temps.csv", "temp;C,site\r\n20,A")],
            ),
        )
        .await;
    assert_eq!(uploaded.status, StatusCode::OK);
    assert!(uploaded.body.contains("please rename it"));
    assert!(!uploaded.body.contains("Map metadata files"));
    assert!(h.recorded.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn created_project_is_offered_for_stories() {
    let mut h = Harness::new().await;
    h.login().await;
    h.post_form("/projects", &[("project_name", "Reef survey"), ("license", "CC-BY-4.0")])
        .await;

    let listing = h.get("/datastories/").await;
    assert!(listing.body.contains("Reef survey"));

    let details = h.store().get_datastory_details("p1").unwrap();
    assert_eq!(details.owner.email, "ana@example.org");
}

#[tokio::test]
async fn save_and_discard_draft() {
    let mut h = Harness::new().await;
    h.store().insert_project(project("p1", true)).unwrap();
    h.login().await;

    let saved = h
        .post_form(
            "/datastories/",
            &[
                ("project_id", "p1"),
                ("editordata", "<p>First notes</p>"),
                ("save-draft-datastory", "save"),
            ],
        )
        .await;
    assert_eq!(saved.status, StatusCode::OK);
    assert_eq!(
        h.store().get_datastory_details("p1").unwrap().content,
        "<p>First notes</p>"
    );

    let plotted = h
        .post_form("/datastories/", &[("project_id", "p1"), ("plot-dataset-on-map", "plot")])
        .await;
    assert!(plotted.body.contains("First notes"));

    h.post_form(
        "/datastories/",
        &[
            ("project_id", "p1"),
            ("editordata", "<p>First notes</p>"),
            ("discard-draft-datastory", "discard"),
        ],
    )
    .await;
    assert_eq!(h.store().get_datastory_details("p1").unwrap().content, "");
}

#[tokio::test]
async fn story_actions_need_a_confirmed_login() {
    let mut h = Harness::new().await;
    h.store().insert_project(project("p1", true)).unwrap();

    let reply = h
        .post_form(
            "/datastories/",
            &[("project_id", "p1"), ("editordata", "x"), ("save-draft-datastory", "save")],
        )
        .await;
    assert_eq!(reply.status, StatusCode::SEE_OTHER);
    assert_eq!(reply.location(), "/login");
    assert_eq!(h.store().get_datastory_details("p1").unwrap().content, "");
}
