use axum::{
    Form,
    extract::{Path, State},
    response::Response,
};
use axum_extra::extract::cookie::SignedCookieJar;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::app::{AppState, flash_error, script_json};
use crate::error::Result;
use crate::geomap::MapView;
use crate::session::{self, Session};
use crate::stories::DataStory;

/// Action requested by the data story form, one per submit button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryAction {
    Plot,
    SaveDraft,
    DiscardDraft,
    Publish,
}

#[derive(Debug, Default, Deserialize)]
pub struct DataStoryForm {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub editordata: String,
    #[serde(rename = "plot-dataset-on-map")]
    pub plot: Option<String>,
    #[serde(rename = "save-draft-datastory")]
    pub save_draft: Option<String>,
    #[serde(rename = "discard-draft-datastory")]
    pub discard_draft: Option<String>,
    #[serde(rename = "publish-datastory")]
    pub publish: Option<String>,
}

impl DataStoryForm {
    /// The pressed button. Plotting wins when a browser sends several.
    pub fn action(&self) -> Option<StoryAction> {
        if self.plot.is_some() {
            Some(StoryAction::Plot)
        } else if self.save_draft.is_some() {
            Some(StoryAction::SaveDraft)
        } else if self.discard_draft.is_some() {
            Some(StoryAction::DiscardDraft)
        } else if self.publish.is_some() {
            Some(StoryAction::Publish)
        } else {
            None
        }
    }
}

/// Projects for the dropdown and the published stories list
fn listing(state: &AppState) -> Result<Value> {
    Ok(json!({
        "projects": state.stories.get_projects()?,
        "published": state.stories.get_published_datastories()?,
        "map": Value::Null,
    }))
}

fn story_page_data(state: &AppState, story: &DataStory, with_map: bool) -> Result<Value> {
    let mut data = listing(state)?;
    data["story"] = json!({
        "project_id": story.project_id,
        "name": story.name,
        "owner": story.owner.name,
        "organization": story.organization,
        "contributors": story.contributor_names(),
        "content": story.content,
        "unique_url": story.unique_url,
    });
    if with_map {
        if let Some(map) = MapView::from_story(story) {
            data["map"] = json!(script_json(&map)?);
        }
    }
    Ok(data)
}

pub fn story_url(state: &AppState, unique_url: &str) -> String {
    format!(
        "{}/datastories/{}",
        state.config.public_base_url.trim_end_matches('/'),
        unique_url
    )
}

pub async fn serve_datastories(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Response> {
    match state.logged_in_session(&jar).await? {
        Some(session) => {
            let data = listing(&state)?;
            state.page(jar, session, "datastory", data)
        }
        None => Ok(state.redirect_to_login()),
    }
}

/// Plot, save, discard or publish the story of the chosen project
pub async fn handle_datastories(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<DataStoryForm>,
) -> Result<Response> {
    let Some(mut session) = state.logged_in_session(&jar).await? else {
        return Ok(state.redirect_to_login());
    };

    let mut story = match state.stories.get_datastory_details(&form.project_id) {
        Ok(story) => story,
        Err(e) => {
            flash_error(&mut session, &e);
            let data = listing(&state)?;
            return state.page(jar, session, "datastory", data);
        }
    };

    if story.files.is_empty() {
        session.flash("No files for the project yet. Cannot plot on the map.");
        let data = listing(&state)?;
        return state.page(jar, session, "datastory", data);
    }

    match form.action() {
        Some(StoryAction::Plot) | None => {}
        Some(StoryAction::SaveDraft) => {
            story.content = form.editordata.clone();
            state.stories.save_draft_datastory(&story)?;
            log::info!("saved draft for project {}", story.project_id);
        }
        Some(StoryAction::DiscardDraft) => {
            story.content.clear();
            state.stories.save_draft_datastory(&story)?;
            log::info!("discarded draft for project {}", story.project_id);
        }
        Some(StoryAction::Publish) => {
            story.content = form.editordata.clone();
            publish(&state, &mut session, &mut story).await?;
        }
    }

    let data = story_page_data(&state, &story, true)?;
    state.page(jar, session, "datastory", data)
}

async fn publish(state: &AppState, session: &mut Session, story: &mut DataStory) -> Result<()> {
    if story.content.trim().is_empty() {
        session.flash("Please enter your story.");
        return Ok(());
    }

    let unique_url = state.stories.fresh_unique_url()?;
    story.unique_url = Some(unique_url.clone());
    story.published_date = Some(Utc::now());
    state.stories.publish_datastory(story)?;
    log::info!("published story for project {} at {}", story.project_id, unique_url);

    let url = story_url(state, &unique_url);
    match &state.mailer {
        Some(mailer) => {
            match mailer.send_datastory_published(story, &url).await {
                Ok(sent) => log::info!("sent {} publish notices for {}", sent, url),
                Err(e) => log::error!("publish notice for {} failed: {}", url, e),
            }
        }
        None => log::info!("mail disabled, no publish notice for {}", url),
    }

    session.flash(format!("Your story is published at {}", url));
    Ok(())
}

/// Public view of a published story
pub async fn view_datastory(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(url): Path<String>,
) -> Result<Response> {
    let story = state.stories.view_datastory(&url)?;
    let session = session::load_or_new(&jar, state.sessions.as_ref(), state.session_ttl());

    let map = MapView::from_story(&story).map(|m| script_json(&m)).transpose()?;
    let data = json!({
        "name": story.name,
        "owner": story.owner.name,
        "organization": story.organization,
        "contributors": story.contributor_names(),
        "content": story.content,
        "published_date": story.published_date.map(|d| d.format("%d %B %Y").to_string()),
        "map": map,
    });
    state.page(jar, session, "publish", data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(plot: bool, save: bool, discard: bool, publish: bool) -> DataStoryForm {
        let pressed = |on: bool| on.then(|| "1".to_string());
        DataStoryForm {
            project_id: "p1".into(),
            editordata: String::new(),
            plot: pressed(plot),
            save_draft: pressed(save),
            discard_draft: pressed(discard),
            publish: pressed(publish),
        }
    }

    #[test]
    fn pressed_button_selects_action() {
        assert_eq!(form(false, true, false, false).action(), Some(StoryAction::SaveDraft));
        assert_eq!(form(false, false, true, false).action(), Some(StoryAction::DiscardDraft));
        assert_eq!(form(false, false, false, true).action(), Some(StoryAction::Publish));
        assert_eq!(form(false, false, false, false).action(), None);
    }

    #[test]
    fn plot_takes_precedence() {
        assert_eq!(form(true, false, false, true).action(), Some(StoryAction::Plot));
    }
}
