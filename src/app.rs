use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRef, Request, State},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Key, SignedCookieJar};
use handlebars::Handlebars;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::client::{ApiClient, Credentials};
use crate::config::{Config, SessionBackend};
use crate::datastories;
use crate::error::{AppError, Result};
use crate::login;
use crate::mailer::Mailer;
use crate::projects;
use crate::session::{self, FileSessionStore, MemorySessionStore, Session, SessionStore};
use crate::stories::DocumentStore;

/// How often expired sessions are swept from the store.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Everything a handler needs, shared across requests.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub api: ApiClient,
    pub sessions: Arc<dyn SessionStore>,
    pub stories: Arc<DocumentStore>,
    pub templates: Arc<Handlebars<'static>>,
    pub mailer: Option<Arc<Mailer>>,
    key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.key.clone()
    }
}

impl AppState {
    /// Build the state from a validated config.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let sessions: Arc<dyn SessionStore> = match config.session.backend {
            SessionBackend::Memory => Arc::new(MemorySessionStore::new()),
            SessionBackend::File => Arc::new(FileSessionStore::open(
                config.database_dir.join("sessions.json"),
            )?),
        };

        let mailer = match &config.smtp {
            Some(smtp) => Some(Arc::new(Mailer::new(smtp, &config.email_sender_address)?)),
            None => {
                log::info!("no [smtp] section configured, publish notifications disabled");
                None
            }
        };

        Ok(AppState {
            api: ApiClient::new(&config)?,
            stories: Arc::new(DocumentStore::open(&config.database_dir)?),
            templates: Arc::new(load_templates(&config.templates_dir)?),
            key: Key::derive_from(config.master_secret_key.as_bytes()),
            sessions,
            mailer,
            config: Arc::new(config),
        })
    }

    pub fn session_ttl(&self) -> Duration {
        self.config.session_ttl()
    }

    /// Render a template with the session's flashes and login flag merged in.
    pub fn render(&self, name: &str, session: &mut Session, mut data: Value) -> Result<Html<String>> {
        if let Value::Object(map) = &mut data {
            map.insert("flashes".to_string(), json!(session.take_flashes()));
            map.insert("logged_in".to_string(), json!(session.logged_in));
        }
        Ok(Html(self.templates.render(name, &data)?))
    }

    /// Render a page and persist the session behind it.
    pub fn page(&self, jar: SignedCookieJar, mut session: Session, name: &str, data: Value) -> Result<Response> {
        let html = self.render(name, &mut session, data)?;
        let jar = session::commit(jar, self.sessions.as_ref(), &session)?;
        Ok((jar, html).into_response())
    }

    /// Persist the session, then redirect.
    pub fn redirect(&self, jar: SignedCookieJar, session: &Session, to: &str) -> Result<Response> {
        let jar = session::commit(jar, self.sessions.as_ref(), session)?;
        Ok((jar, Redirect::to(to)).into_response())
    }

    pub fn redirect_to_login(&self) -> Response {
        Redirect::to(&self.config.login_page_url).into_response()
    }

    /// The request's session, if the user service confirms its login.
    ///
    /// `Ok(None)` means the caller should send the user to the login page.
    pub async fn logged_in_session(&self, jar: &SignedCookieJar) -> Result<Option<Session>> {
        let Some(session) = session::from_jar(jar, self.sessions.as_ref()) else {
            return Ok(None);
        };
        let Some(creds) = session.active_credentials().cloned() else {
            return Ok(None);
        };

        match self.api.check_user_logged_in(&creds).await {
            Ok(()) => Ok(Some(session)),
            Err(AppError::Unauthorized) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Credentials of a session that has logged in, without a round trip to the
/// user service.
pub fn session_credentials(session: &Session) -> Option<Credentials> {
    session.active_credentials().cloned()
}

/// Queue an error for display, hiding internals behind a generic message.
pub fn flash_error(session: &mut Session, err: &AppError) {
    if err.is_user_facing() {
        session.flash(err.to_string());
    } else {
        log::error!("{}", err);
        session.flash("Something went wrong, please try again.");
    }
}

/// Embed a value in an inline `<script>` block.
pub fn script_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

fn load_templates(dir: &Path) -> Result<Handlebars<'static>> {
    let mut templates = Handlebars::new();
    templates
        .register_templates_directory(".hbs", dir)
        .map_err(|e| AppError::Config(format!("templates in {}: {}", dir.display(), e)))?;
    log::debug!("loaded templates from {}", dir.display());
    Ok(templates)
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    log::info!(
        "{} {} -> {} in {:?}",
        method,
        path,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

async fn serve_index(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> Result<Response> {
    let session = session::load_or_new(&jar, state.sessions.as_ref(), state.session_ttl());
    state.page(jar, session, "index", json!({}))
}

async fn serve_data_licenses(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> Result<Response> {
    let session = session::load_or_new(&jar, state.sessions.as_ref(), state.session_ttl());
    state.page(jar, session, "data-licenses", json!({}))
}

/// Build the router with every page and API route.
pub fn router(state: AppState) -> Router {
    let upload_limit = state.config.upload_limit_bytes();
    let static_dir = state.config.static_dir.clone();

    Router::new()
        .route("/", get(serve_index))
        .route("/data-licenses", get(serve_data_licenses))
        .route("/login", get(login::serve_login_page).post(login::handle_login))
        .route("/logout", get(login::handle_logout).post(login::handle_logout))
        .route("/collect", get(login::serve_collect))
        .route(
            "/projects",
            get(projects::serve_create_project).post(projects::handle_create_project),
        )
        .route(
            "/upload-raw-files",
            get(projects::serve_upload_raw_files).post(projects::handle_upload_raw_files),
        )
        .route(
            "/upload-meta-files",
            get(projects::serve_upload_metadata_files).post(projects::handle_upload_metadata_files),
        )
        .route(
            "/map-meta-files",
            get(projects::serve_map_metadata_files).post(projects::handle_map_metadata_files),
        )
        .route("/api/joins", post(projects::preview_joins))
        .route(
            "/datastories/",
            get(datastories::serve_datastories).post(datastories::handle_datastories),
        )
        .route("/datastories/:url", get(datastories::view_datastory))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Start the web server and the session sweeper; runs until the listener fails.
pub async fn run(config: Config) -> Result<()> {
    let bind = config.bind.clone();
    let state = AppState::new(config)?;

    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            match sessions.purge_expired() {
                Ok(0) => {}
                Ok(n) => log::info!("purged {} expired sessions", n),
                Err(e) => log::error!("session purge failed: {}", e),
            }
        }
    });

    let app = router(state);
    let listener = TcpListener::bind(&bind).await?;
    log::info!("Listening on http://{}", bind);
    axum::serve(listener, app).await?;

    Ok(())
}
