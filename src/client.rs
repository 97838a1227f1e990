//! HTTP client for the sibling internal APIs (login, user, project, file, join).
//!
//! Every call carries the user id in the JSON body and the `token_id` /
//! `access_token` pair as headers. A call succeeds when the response's
//! `message` field equals `"SUCCESS"`; any other message is surfaced to the
//! user as-is.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{Config, Endpoints};
use crate::error::{AppError, Result};
use crate::mapper::JoinSpec;

pub const SUCCESS: &str = "SUCCESS";

/// The user/token/access-token triple the login service hands out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    pub token_id: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    Raw,
    MetaData,
}

/// A file already uploaded to the bucket, to be registered with a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub file_name: String,
    pub s3_link: String,
    pub relative_s3_path: String,
    pub file_type: FileType,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    host: String,
    endpoints: Endpoints,
}

#[derive(Deserialize)]
struct IdRef {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Deserialize)]
struct LoginReply {
    user: IdRef,
    token_id: String,
    access_token: String,
}

#[derive(Deserialize)]
struct ProjectReply {
    project: IdRef,
}

#[derive(Deserialize)]
struct FilesReply {
    #[serde(default)]
    files: Vec<IdRef>,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(ApiClient {
            http,
            host: config.api.host.trim_end_matches('/').to_string(),
            endpoints: config.api.endpoints.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    /// POST a JSON body and return the reply once its `message` is SUCCESS.
    async fn post(&self, path: &str, body: &Value, creds: Option<&Credentials>) -> Result<Value> {
        let mut request = self.http.post(self.url(path)).json(body);
        if let Some(creds) = creds {
            request = request
                .header("token_id", &creds.token_id)
                .header("access_token", &creds.access_token);
        }

        let reply: Value = request.send().await?.json().await?;
        log::debug!("{} replied {}", path, reply);
        ensure_success(reply)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Credentials> {
        let body = json!({ "email": email, "password": password });
        let reply: LoginReply = serde_json::from_value(self.post(&self.endpoints.login, &body, None).await?)?;
        Ok(Credentials {
            user_id: reply.user.id,
            token_id: reply.token_id,
            access_token: reply.access_token,
        })
    }

    pub async fn check_user_logged_in(&self, creds: &Credentials) -> Result<()> {
        let body = json!({ "user_id": creds.user_id });
        match self.post(&self.endpoints.check_user_logged_in, &body, Some(creds)).await {
            Ok(_) => Ok(()),
            Err(AppError::Upstream { message }) => {
                log::info!("login check failed for {}: {}", creds.user_id, message);
                Err(AppError::Unauthorized)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the new project's id.
    pub async fn create_project(&self, creds: &Credentials, name: &str, license: &str) -> Result<String> {
        let body = json!({ "name": name, "license": license, "user_id": creds.user_id });
        let reply: ProjectReply =
            serde_json::from_value(self.post(&self.endpoints.create_project, &body, Some(creds)).await?)?;
        Ok(reply.project.id)
    }

    /// Returns the ids the file service assigned, in submission order.
    pub async fn create_files(
        &self,
        creds: &Credentials,
        project_id: &str,
        files: &[ProjectFile],
    ) -> Result<Vec<String>> {
        let body = json!({ "project_id": project_id, "files": files, "user_id": creds.user_id });
        let reply: FilesReply =
            serde_json::from_value(self.post(&self.endpoints.create_file, &body, Some(creds)).await?)?;
        Ok(reply.files.into_iter().map(|f| f.id).collect())
    }

    pub async fn create_joins(&self, creds: &Credentials, project_id: &str, joins: &JoinSpec) -> Result<()> {
        let body = joins_payload(project_id, &creds.user_id, joins)?;
        self.post(&self.endpoints.create_joins, &body, Some(creds)).await?;
        Ok(())
    }
}

/// `{project_id, user_id, joins: [<flat join spec>]}`
pub fn joins_payload(project_id: &str, user_id: &str, joins: &JoinSpec) -> Result<Value> {
    Ok(json!({
        "project_id": project_id,
        "user_id": user_id,
        "joins": [serde_json::to_value(joins)?],
    }))
}

fn ensure_success(reply: Value) -> Result<Value> {
    match reply.get("message").and_then(Value::as_str) {
        Some(SUCCESS) => Ok(reply),
        Some(other) => Err(AppError::Upstream {
            message: other.to_string(),
        }),
        None => Err(AppError::Upstream {
            message: "Unexpected response from server".to_string(),
        }),
    }
}
