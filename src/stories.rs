//! Document store for projects and data stories.
//!
//! Two JSON collections live in the database directory:
//! - `projects.json`: project records with owner, contributors and geotagged files
//! - `datastories.json`: drafts (one per project) and published stories
//!
//! Project records are written by the project and file services; this crate
//! reads them and only writes data stories.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, create_dir_all};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{AppError, Result};

const PROJECTS_FILE: &str = "projects.json";
const STORIES_FILE: &str = "datastories.json";

const URL_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const URL_ATTEMPTS: usize = 16;

lazy_static! {
    static ref UNIQUE_URL: Regex = Regex::new(r"^[A-Za-z0-9]{3}-[A-Za-z0-9]{3}-[A-Za-z0-9]{3}$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// A file with a capture location, shown as a map marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFile {
    pub s3_file_path: String,
    /// `[longitude, latitude]`
    pub location: [f64; 2],
    pub created_at: DateTime<Utc>,
    pub sender_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub organization: String,
    pub owner: Person,
    /// Contributors keyed by sender id
    #[serde(default)]
    pub senders: BTreeMap<String, Person>,
    #[serde(default)]
    pub files: Vec<GeoFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryStatus {
    Draft,
    Published,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStory {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub organization: String,
    pub owner: Person,
    #[serde(default)]
    pub senders: BTreeMap<String, Person>,
    #[serde(default)]
    pub files: Vec<GeoFile>,
    /// Story body as HTML from the editor
    #[serde(default)]
    pub content: String,
    pub status: StoryStatus,
    #[serde(default)]
    pub unique_url: Option<String>,
    #[serde(default)]
    pub published_date: Option<DateTime<Utc>>,
}

impl DataStory {
    pub fn draft_of(project: &ProjectRecord) -> Self {
        DataStory {
            project_id: project.id.clone(),
            name: project.name.clone(),
            organization: project.organization.clone(),
            owner: project.owner.clone(),
            senders: project.senders.clone(),
            files: project.files.clone(),
            content: String::new(),
            status: StoryStatus::Draft,
            unique_url: None,
            published_date: None,
        }
    }

    pub fn contributor_names(&self) -> Vec<String> {
        self.senders.values().map(|p| p.name.clone()).collect()
    }

    /// Owner first, then contributors, without duplicates or blanks.
    pub fn recipients(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let emails = std::iter::once(&self.owner.email).chain(self.senders.values().map(|p| &p.email));
        for email in emails {
            if !email.is_empty() && !out.contains(email) {
                out.push(email.clone());
            }
        }
        out
    }
}

/// Entry in the project dropdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectChoice {
    pub id: String,
    pub name: String,
}

/// Entry in the published stories list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedSummary {
    pub name: String,
    pub unique_url: String,
    pub published_date: Option<DateTime<Utc>>,
}

pub struct DocumentStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl DocumentStore {
    /// Open the store, creating the directory and empty collections if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            create_dir_all(&dir)?;
        }
        for name in [PROJECTS_FILE, STORIES_FILE] {
            let path = dir.join(name);
            if !path.exists() {
                fs::write(&path, b"[]")?;
            }
        }
        Ok(DocumentStore {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let contents = fs::read_to_string(self.dir.join(name))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write<T: Serialize>(&self, name: &str, docs: &[T]) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(docs)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a project unless one with the same id exists already.
    ///
    /// An existing record is left alone, since the file services may have
    /// added contributors and files to it. Returns whether a record was added.
    pub fn insert_project(&self, project: ProjectRecord) -> Result<bool> {
        let _guard = self.guard();
        let mut projects: Vec<ProjectRecord> = self.read(PROJECTS_FILE)?;
        if projects.iter().any(|p| p.id == project.id) {
            return Ok(false);
        }
        projects.push(project);
        self.write(PROJECTS_FILE, &projects)?;
        Ok(true)
    }

    pub fn get_projects(&self) -> Result<Vec<ProjectChoice>> {
        let _guard = self.guard();
        let projects: Vec<ProjectRecord> = self.read(PROJECTS_FILE)?;
        Ok(projects
            .into_iter()
            .map(|p| ProjectChoice { id: p.id, name: p.name })
            .collect())
    }

    /// Newest first.
    pub fn get_published_datastories(&self) -> Result<Vec<PublishedSummary>> {
        let _guard = self.guard();
        let stories: Vec<DataStory> = self.read(STORIES_FILE)?;
        let mut published: Vec<PublishedSummary> = stories
            .into_iter()
            .filter(|s| s.status == StoryStatus::Published)
            .filter_map(|s| {
                s.unique_url.map(|unique_url| PublishedSummary {
                    name: s.name,
                    unique_url,
                    published_date: s.published_date,
                })
            })
            .collect();
        published.sort_by(|a, b| b.published_date.cmp(&a.published_date));
        Ok(published)
    }

    /// Project details with the saved draft's content, if any.
    pub fn get_datastory_details(&self, project_id: &str) -> Result<DataStory> {
        let _guard = self.guard();
        let projects: Vec<ProjectRecord> = self.read(PROJECTS_FILE)?;
        let project = projects
            .iter()
            .find(|p| p.id == project_id)
            .ok_or_else(|| AppError::NotFound(format!("project {}", project_id)))?;

        let mut story = DataStory::draft_of(project);
        let stories: Vec<DataStory> = self.read(STORIES_FILE)?;
        if let Some(draft) = stories
            .iter()
            .find(|s| s.project_id == project_id && s.status == StoryStatus::Draft)
        {
            story.content = draft.content.clone();
        }
        Ok(story)
    }

    /// Replace the project's draft.
    pub fn save_draft_datastory(&self, story: &DataStory) -> Result<()> {
        let _guard = self.guard();
        let mut stories: Vec<DataStory> = self.read(STORIES_FILE)?;
        stories.retain(|s| !(s.project_id == story.project_id && s.status == StoryStatus::Draft));

        let mut draft = story.clone();
        draft.status = StoryStatus::Draft;
        draft.unique_url = None;
        draft.published_date = None;
        stories.push(draft);
        self.write(STORIES_FILE, &stories)
    }

    /// Store a published copy. The story must carry its unique URL.
    pub fn publish_datastory(&self, story: &DataStory) -> Result<()> {
        let unique_url = story
            .unique_url
            .as_deref()
            .ok_or_else(|| AppError::Validation("published story needs a unique url".to_string()))?;

        let _guard = self.guard();
        let mut stories: Vec<DataStory> = self.read(STORIES_FILE)?;
        if stories.iter().any(|s| s.unique_url.as_deref() == Some(unique_url)) {
            return Err(AppError::Validation(format!("url {} already in use", unique_url)));
        }

        let mut published = story.clone();
        published.status = StoryStatus::Published;
        stories.push(published);
        self.write(STORIES_FILE, &stories)
    }

    pub fn view_datastory(&self, unique_url: &str) -> Result<DataStory> {
        if !is_unique_url(unique_url) {
            return Err(AppError::NotFound(format!("data story {}", unique_url)));
        }
        let _guard = self.guard();
        let stories: Vec<DataStory> = self.read(STORIES_FILE)?;
        stories
            .into_iter()
            .find(|s| s.status == StoryStatus::Published && s.unique_url.as_deref() == Some(unique_url))
            .ok_or_else(|| AppError::NotFound(format!("data story {}", unique_url)))
    }

    pub fn unique_url_taken(&self, unique_url: &str) -> Result<bool> {
        let _guard = self.guard();
        let stories: Vec<DataStory> = self.read(STORIES_FILE)?;
        Ok(stories.iter().any(|s| s.unique_url.as_deref() == Some(unique_url)))
    }

    /// A unique URL not yet used by any stored story.
    pub fn fresh_unique_url(&self) -> Result<String> {
        let mut rng = rand::thread_rng();
        for _ in 0..URL_ATTEMPTS {
            let candidate = generate_unique_url(&mut rng);
            if !self.unique_url_taken(&candidate)? {
                return Ok(candidate);
            }
        }
        Err(AppError::Validation("could not allocate a story url, try again".to_string()))
    }
}

/// Random `xxx-xxx-xxx` over `[a-zA-Z0-9]`.
pub fn generate_unique_url<R: Rng>(rng: &mut R) -> String {
    let mut group = || -> String {
        (0..3)
            .map(|_| URL_CHARSET[rng.gen_range(0..URL_CHARSET.len())] as char)
            .collect()
    };
    let (a, b, c) = (group(), group(), group());
    format!("{}-{}-{}", a, b, c)
}

pub fn is_unique_url(candidate: &str) -> bool {
    UNIQUE_URL.is_match(candidate)
}
