use serde::Serialize;

use crate::stories::DataStory;

/// DOM id of the element the map widget draws into.
pub const MAP_ELEMENT_ID: &str = "locations-view";

/// Map of a story's geotagged files, embedded in the page as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapView {
    pub identifier: String,
    pub lat: f64,
    pub lng: f64,
    pub markers: Vec<Marker>,
    pub fit_markers_to_bounds: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub lat: f64,
    pub lng: f64,
    pub infobox: String,
}

impl MapView {
    /// Centred on the first file. `None` when the story has no files.
    pub fn from_story(story: &DataStory) -> Option<Self> {
        let first = story.files.first()?;
        let markers = story
            .files
            .iter()
            .map(|file| {
                let [lng, lat] = file.location;
                let contributor = story
                    .senders
                    .get(&file.sender_id)
                    .map(|p| p.name.as_str())
                    .unwrap_or("unknown");
                Marker {
                    lat,
                    lng,
                    infobox: format!(
                        "Image: {}\n Location: ({}, {})\n Date: {}\n Contributor: {}",
                        file.s3_file_path, lng, lat, file.created_at, contributor
                    ),
                }
            })
            .collect();

        Some(MapView {
            identifier: MAP_ELEMENT_ID.to_string(),
            lat: first.location[1],
            lng: first.location[0],
            markers,
            fit_markers_to_bounds: true,
        })
    }
}
