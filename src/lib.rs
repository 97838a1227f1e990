/*!
# Data Collaboration Frontend

A web frontend for collaborative data collection, built in Rust.

## Overview

Users log in, create projects, register raw and metadata files that the browser
has already uploaded to the bucket, map metadata columns across files into a
join, and publish data stories that pair a narrative with a map of the
project's geotagged files.

Most routes validate the session, call a sibling internal API (login, user,
project, file, join) over HTTP and render a server-side template. The one piece
of real data transformation is the metadata column mapper.

## Architecture

### Frontend Layer
- **Technologies**: HTML, CSS, handlebars templates
- Pages post plain forms; the mapping page also has a JSON endpoint

### Backend Layer
- **Technologies**: Rust, axum, reqwest
- **Core Components**:
  - Column Mapper - Parses `"<column>;<hidden input>"` selections into a per-file join
  - API Client - Talks to the collaborator services, `message == "SUCCESS"` contract
  - Session Store - Signed cookie plus a memory or file backed session table
  - Document Store - Projects and data stories as JSON collections
  - Geo Map - Marker data for a story's geotagged files

### Data Persistence Layer
- `projects.json` and `datastories.json` under the database directory
- Optional `sessions.json` when the file session backend is configured

## Modules

- **mapper**: column-to-join mapping
- **metadata**: metadata file descriptors and CSV header reading
- **upload**: multipart upload forms
- **client**: collaborator API client
- **session**: session lifecycle and storage
- **stories**: document store for projects and data stories
- **geomap**: map markers for a story
- **mailer**: publish notifications
- **login**, **projects**, **datastories**: page handlers
- **app**: state, routing and middleware
- **config**, **error**: settings and the crate error type

## Routes

- `/login`, `/logout`, `/collect` - Authentication
- `/projects` - Create a project
- `/upload-raw-files`, `/upload-meta-files` - Register files with the project
- `/map-meta-files` - Map metadata columns into a join
- `/api/joins` - Join preview from structured selections
- `/datastories/`, `/datastories/{url}` - Write, publish and read data stories
*/

pub mod app;
pub mod client;
pub mod config;
pub mod datastories;
pub mod error;
pub mod geomap;
pub mod login;
pub mod mailer;
pub mod mapper;
pub mod metadata;
pub mod projects;
pub mod session;
pub mod stories;
pub mod upload;

pub use error::{AppError, Result};
pub use mapper::{ColumnSelection, JoinSpec, build_join_spec, map_form_values};
