use axum::{
    Form,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::Deserialize;
use serde_json::json;

use crate::app::{AppState, flash_error};
use crate::error::{AppError, Result};
use crate::session;

/// Login form data
///
/// The password is only forwarded to the login service, never stored.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<()> {
        let email = self.email.trim();
        if email.is_empty() || self.password.is_empty() {
            return Err(AppError::Validation(
                "Email and password are required.".to_string(),
            ));
        }
        match email.split_once('@') {
            Some((user, domain)) if !user.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(AppError::Validation("Invalid email address.".to_string())),
        }
    }
}

/// Serve the login page
pub async fn serve_login_page(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Response> {
    let session = session::load_or_new(&jar, state.sessions.as_ref(), state.session_ttl());
    state.page(jar, session, "login", json!({}))
}

/// Handle login form submissions
///
/// Forwards the credentials to the login service. On success the returned
/// user/token/access-token triple is stored in the session and the user is
/// sent to `/collect`; otherwise the form is shown again with the reason.
pub async fn handle_login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response> {
    let mut session = session::load_or_new(&jar, state.sessions.as_ref(), state.session_ttl());

    let outcome = match form.validate() {
        Ok(()) => state.api.login(form.email.trim(), &form.password).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(credentials) => {
            log::info!("user {} logged in", credentials.user_id);
            session.credentials = Some(credentials);
            session.logged_in = true;
            session.email = Some(form.email.trim().to_string());
            state.redirect(jar, &session, "/collect")
        }
        Err(e) => {
            flash_error(&mut session, &e);
            state.page(jar, session, "login", json!({ "email": form.email }))
        }
    }
}

/// Handle user logout
///
/// Ends the session, clears the cookie and redirects to the index page.
pub async fn handle_logout(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Response> {
    if let Some(creds) = session::from_jar(&jar, state.sessions.as_ref()).and_then(|s| s.credentials) {
        log::info!("user {} logged out", creds.user_id);
    }
    let jar = session::end(jar, state.sessions.as_ref())?;
    Ok((jar, Redirect::to("/")).into_response())
}

/// Serve the data collection page to logged-in users
pub async fn serve_collect(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Response> {
    match state.logged_in_session(&jar).await? {
        Some(session) => state.page(jar, session, "collect", json!({})),
        None => Ok(state.redirect_to_login()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(email: &str, password: &str) -> LoginForm {
        LoginForm {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn valid_login_form() {
        assert!(form("ana@example.org", "pw").validate().is_ok());
        assert!(form("  ana@example.org ", "pw").validate().is_ok());
    }

    #[test]
    fn invalid_login_forms() {
        assert!(form("", "pw").validate().is_err());
        assert!(form("ana@example.org", "").validate().is_err());
        assert!(form("not-an-email", "pw").validate().is_err());
        assert!(form("@example.org", "pw").validate().is_err());
    }
}
