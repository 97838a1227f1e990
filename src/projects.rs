//! Project creation, file uploads and the metadata join mapping.
//!
//! The pages follow the upload workflow in order: create a project, register
//! raw data files, register metadata files (their headers are read here), then
//! map metadata columns into a join.

use axum::{
    Json,
    extract::{Multipart, State},
    response::Response,
};
use axum_extra::extract::Form as MultiForm;
use axum_extra::extract::cookie::SignedCookieJar;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use crate::app::{AppState, flash_error, session_credentials};
use crate::client::{Credentials, FileType, joins_payload};
use crate::error::{AppError, Result};
use crate::mapper::{self, ColumnSelection, JoinSpec};
use crate::metadata::MetadataFile;
use crate::session::{self, Session};
use crate::stories::{Person, ProjectRecord};
use crate::upload::{METADATA_FILES_FIELD, RAW_FILES_FIELD, UploadForm};

/// Licenses a project can be published under.
pub const LICENSES: &[&str] = &["CC-BY-4.0", "CC-BY-SA-4.0", "CC0-1.0", "ODbL-1.0"];

const MAX_PROJECT_NAME: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CreateProjectForm {
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub license: String,
}

impl CreateProjectForm {
    pub fn validate(&self) -> Result<()> {
        let name = self.project_name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Project name is required.".to_string()));
        }
        if name.chars().count() > MAX_PROJECT_NAME {
            return Err(AppError::Validation(format!(
                "Project name must be at most {} characters.",
                MAX_PROJECT_NAME
            )));
        }
        if !LICENSES.contains(&self.license.as_str()) {
            return Err(AppError::Validation("Please choose a license.".to_string()));
        }
        Ok(())
    }
}

/// Mapping page submission. Every field repeats.
#[derive(Debug, Default, Deserialize)]
pub struct MapMetadataForm {
    #[serde(default)]
    pub file_name: Vec<String>,
    #[serde(default)]
    pub file_id: Vec<String>,
    #[serde(default)]
    pub column_select: Vec<String>,
    #[serde(default)]
    pub join_select: Vec<String>,
}

impl MapMetadataForm {
    /// Parse the selections into a join, checking them against the files the
    /// page listed.
    pub fn join_spec(&self) -> Result<JoinSpec> {
        let spec = mapper::map_form_values(&self.column_select, &self.join_select)?;
        spec.ensure_declared(&self.file_id)?;
        Ok(spec)
    }
}

/// Structured selections, one object per column.
#[derive(Debug, Deserialize)]
pub struct JoinPreviewRequest {
    #[serde(default)]
    pub column_select: Vec<ColumnSelection>,
    #[serde(default)]
    pub join_select: Vec<ColumnSelection>,
}

/// Session and credentials of a user who has logged in.
fn authenticated(state: &AppState, jar: &SignedCookieJar) -> Option<(Session, Credentials)> {
    let session = session::from_jar(jar, state.sessions.as_ref())?;
    let creds = session_credentials(&session)?;
    Some((session, creds))
}

/// Local record of a just-created project, owned by the logged-in user.
fn new_project_record(
    project_id: &str,
    form: &CreateProjectForm,
    creds: &Credentials,
    email: Option<&str>,
) -> ProjectRecord {
    let email = email.unwrap_or_default();
    let name = match email.split_once('@') {
        Some((user, _)) if !user.is_empty() => user.to_string(),
        _ => creds.user_id.clone(),
    };
    ProjectRecord {
        id: project_id.to_string(),
        name: form.project_name.trim().to_string(),
        license: Some(form.license.clone()),
        organization: String::new(),
        owner: Person {
            name,
            email: email.to_string(),
        },
        senders: BTreeMap::new(),
        files: Vec::new(),
    }
}

fn project_page_data() -> Value {
    json!({ "licenses": LICENSES })
}

fn upload_page_data(state: &AppState, session: &Session) -> Value {
    json!({
        "project_id": session.project_id,
        "bucket": state.config.bucket_name,
    })
}

fn mapping_page_data(files: &[MetadataFile]) -> Value {
    let files: Vec<Value> = files
        .iter()
        .map(|f| {
            json!({
                "file_id": f.file_id,
                "file_name": f.file_name,
                "options": f.column_options(),
            })
        })
        .collect();
    json!({ "files": files })
}

pub async fn serve_create_project(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Response> {
    match state.logged_in_session(&jar).await? {
        Some(session) => state.page(jar, session, "create-project", project_page_data()),
        None => Ok(state.redirect_to_login()),
    }
}

/// Create a project and move on to the raw file upload
pub async fn handle_create_project(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    axum::Form(form): axum::Form<CreateProjectForm>,
) -> Result<Response> {
    let Some((mut session, creds)) = authenticated(&state, &jar) else {
        return Ok(state.redirect_to_login());
    };

    let created = match form.validate() {
        Ok(()) => {
            state
                .api
                .create_project(&creds, form.project_name.trim(), &form.license)
                .await
        }
        Err(e) => Err(e),
    };

    match created {
        Ok(project_id) => {
            log::info!("user {} created project {}", creds.user_id, project_id);
            let record = new_project_record(&project_id, &form, &creds, session.email.as_deref());
            if let Err(e) = state.stories.insert_project(record) {
                log::error!("could not record project {} locally: {}", project_id, e);
            }
            session.project_id = Some(project_id);
            let data = upload_page_data(&state, &session);
            state.page(jar, session, "upload-raw-data-files", data)
        }
        Err(e) => {
            flash_error(&mut session, &e);
            state.page(jar, session, "create-project", project_page_data())
        }
    }
}

pub async fn serve_upload_raw_files(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Response> {
    match state.logged_in_session(&jar).await? {
        Some(session) => {
            let data = upload_page_data(&state, &session);
            state.page(jar, session, "upload-raw-data-files", data)
        }
        None => Ok(state.redirect_to_login()),
    }
}

/// Register raw data files with the current project
pub async fn handle_upload_raw_files(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    multipart: Multipart,
) -> Result<Response> {
    let Some((mut session, creds)) = authenticated(&state, &jar) else {
        return Ok(state.redirect_to_login());
    };
    let Some(project_id) = session.project_id.clone() else {
        session.flash("Please create a project first.");
        return state.redirect(jar, &session, "/projects");
    };

    let form = UploadForm::from_multipart(multipart, RAW_FILES_FIELD).await?;
    let registered = match form.complete_files(FileType::Raw) {
        Ok(files) => state.api.create_files(&creds, &project_id, &files).await,
        Err(e) => Err(e),
    };

    let data = upload_page_data(&state, &session);
    match registered {
        Ok(ids) => {
            log::info!("registered {} raw files for project {}", ids.len(), project_id);
            state.page(jar, session, "upload-metadata-files", data)
        }
        Err(e) => {
            flash_error(&mut session, &e);
            state.page(jar, session, "upload-raw-data-files", data)
        }
    }
}

pub async fn serve_upload_metadata_files(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Response> {
    match state.logged_in_session(&jar).await? {
        Some(session) => {
            let data = upload_page_data(&state, &session);
            state.page(jar, session, "upload-metadata-files", data)
        }
        None => Ok(state.redirect_to_login()),
    }
}

/// Register metadata files, read their headers and show the mapping page
pub async fn handle_upload_metadata_files(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    multipart: Multipart,
) -> Result<Response> {
    let Some((mut session, creds)) = authenticated(&state, &jar) else {
        return Ok(state.redirect_to_login());
    };
    let Some(project_id) = session.project_id.clone() else {
        session.flash("Please create a project first.");
        return state.redirect(jar, &session, "/projects");
    };

    let form = UploadForm::from_multipart(multipart, METADATA_FILES_FIELD).await?;
    match register_metadata(&state, &creds, &project_id, &form).await {
        Ok(described) => {
            log::info!(
                "registered {} metadata files for project {}",
                described.len(),
                project_id
            );
            let data = mapping_page_data(&described);
            session.metadata_files = described;
            state.page(jar, session, "map-metadata-files", data)
        }
        Err(e) => {
            flash_error(&mut session, &e);
            let data = upload_page_data(&state, &session);
            state.page(jar, session, "upload-metadata-files", data)
        }
    }
}

async fn register_metadata(
    state: &AppState,
    creds: &Credentials,
    project_id: &str,
    form: &UploadForm,
) -> Result<Vec<MetadataFile>> {
    let files = form.complete_files(FileType::MetaData)?;

    // Headers are read before registering, so a bad file registers nothing
    let described = form
        .files
        .iter()
        .map(|file| MetadataFile::from_upload("", &file.file_name, &file.contents))
        .collect::<Result<Vec<_>>>()?;

    let ids = state.api.create_files(creds, project_id, &files).await?;
    if ids.len() != form.files.len() {
        return Err(AppError::Upstream {
            message: format!(
                "File service returned {} ids for {} files",
                ids.len(),
                form.files.len()
            ),
        });
    }

    Ok(described
        .into_iter()
        .zip(ids)
        .map(|(file, file_id)| MetadataFile { file_id, ..file })
        .collect())
}

pub async fn serve_map_metadata_files(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Response> {
    match state.logged_in_session(&jar).await? {
        Some(session) => {
            let data = mapping_page_data(&session.metadata_files);
            state.page(jar, session, "map-metadata-files", data)
        }
        None => Ok(state.redirect_to_login()),
    }
}

/// Turn the mapping page's selections into a join and send it to the join service
pub async fn handle_map_metadata_files(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    MultiForm(form): MultiForm<MapMetadataForm>,
) -> Result<Response> {
    let Some((mut session, creds)) = authenticated(&state, &jar) else {
        return Ok(state.redirect_to_login());
    };
    let Some(project_id) = session.project_id.clone() else {
        session.flash("Please create a project first.");
        return state.redirect(jar, &session, "/projects");
    };

    let created = match form.join_spec() {
        Ok(spec) => state
            .api
            .create_joins(&creds, &project_id, &spec)
            .await
            .map(|()| spec),
        Err(e) => Err(e),
    };

    match created {
        Ok(spec) => {
            log::info!("created join over {} files for project {}", spec.len(), project_id);
            session.metadata_files.clear();
            state.page(jar, session, "upload-success", json!({ "project_id": project_id }))
        }
        Err(e) => {
            flash_error(&mut session, &e);
            let data = mapping_page_data(&session.metadata_files);
            state.page(jar, session, "map-metadata-files", data)
        }
    }
}

/// Build the join payload from structured selections without sending it
pub async fn preview_joins(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(request): Json<JoinPreviewRequest>,
) -> Result<Json<Value>> {
    let spec = mapper::build_join_spec(&request.column_select, &request.join_select)?;

    let session = session::from_jar(&jar, state.sessions.as_ref());
    let project_id = session.as_ref().and_then(|s| s.project_id.clone()).unwrap_or_default();
    let user_id = session
        .as_ref()
        .and_then(session_credentials)
        .map(|c| c.user_id)
        .unwrap_or_default();

    Ok(Json(joins_payload(&project_id, &user_id, &spec)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_form_validation() {
        let ok = CreateProjectForm {
            project_name: " Coastal survey ".into(),
            license: "CC-BY-4.0".into(),
        };
        assert!(ok.validate().is_ok());

        let unnamed = CreateProjectForm {
            project_name: "  ".into(),
            license: "CC-BY-4.0".into(),
        };
        assert!(unnamed.validate().is_err());

        let unlicensed = CreateProjectForm {
            project_name: "x".into(),
            license: "MIT".into(),
        };
        assert!(unlicensed.validate().is_err());

        let long = CreateProjectForm {
            project_name: "x".repeat(MAX_PROJECT_NAME + 1),
            license: "CC0-1.0".into(),
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn created_project_is_owned_by_the_login_email() {
        let form = CreateProjectForm {
            project_name: " Reef survey ".into(),
            license: "CC0-1.0".into(),
        };
        let creds = Credentials {
            user_id: "u1".into(),
            token_id: "t".into(),
            access_token: "a".into(),
        };

        let record = new_project_record("p9", &form, &creds, Some("ana@example.org"));
        assert_eq!(record.name, "Reef survey");
        assert_eq!(record.owner.name, "ana");
        assert_eq!(record.owner.email, "ana@example.org");
        assert!(record.files.is_empty());

        let anonymous = new_project_record("p9", &form, &creds, None);
        assert_eq!(anonymous.owner.name, "u1");
    }

    #[test]
    fn mapping_form_rejects_undeclared_files() {
        let form = MapMetadataForm {
            file_name: vec!["a.csv".into()],
            file_id: vec!["f1".into()],
            column_select: vec!["x;<input value=\"f2\">".into()],
            join_select: vec!["x;<input value=\"f2\">".into()],
        };
        assert!(matches!(form.join_spec(), Err(AppError::MalformedInput(_))));
    }

    #[test]
    fn mapping_page_lists_options_per_file() {
        let files = vec![MetadataFile {
            file_id: "f1".into(),
            file_name: "a.csv".into(),
            columns: vec!["site".into(), "depth".into()],
        }];
        let data = mapping_page_data(&files);
        assert_eq!(data["files"][0]["file_name"], "a.csv");
        assert_eq!(data["files"][0]["options"][1]["column"], "depth");
        assert_eq!(
            data["files"][0]["options"][0]["value"],
            "site;<input type=\"hidden\" name=\"file_id\" value=\"f1\">"
        );
    }
}
