use serde::{Deserialize, Serialize};

use crate::models::Place;

pub const DEFAULT_CENTER: LatLng = LatLng {
    lat: 40.0,
    lon: -74.5,
};
pub const DEFAULT_ZOOM: u8 = 12;
pub const FOCUS_ZOOM: u8 = 14;
pub const MIN_ZOOM: u8 = 1;
pub const MAX_ZOOM: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMarker {
    pub position: LatLng,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl MapMarker {
    pub fn for_place(place: &Place) -> Self {
        Self {
            position: LatLng {
                lat: place.lat,
                lon: place.lon,
            },
            label: short_name(&place.display_name),
            detail: Some(place.display_name.clone()),
        }
    }

    /// A marker for an itinerary stop, labelled with the activity rather than the place name.
    pub fn for_stop(activity: &str, place: &Place) -> Self {
        Self {
            label: activity.trim().to_string(),
            ..Self::for_place(place)
        }
    }
}

/// What a map surface needs to draw: where to look, how close, and what to pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub center: LatLng,
    pub zoom: u8,
    pub markers: Vec<MapMarker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<LatLng>>,
}

impl Default for MapView {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
            markers: Vec::new(),
            path: None,
        }
    }
}

impl MapView {
    /// Markers for every place in order, centred on the first.
    pub fn with_places(places: &[Place]) -> Self {
        Self::with_markers(places.iter().map(MapMarker::for_place).collect())
    }

    /// Keeps the marker order; a path joins them when there is more than one.
    pub fn with_markers(markers: Vec<MapMarker>) -> Self {
        let mut view = Self::default();
        if let Some(first) = markers.first() {
            view.center = first.position;
        }
        view.markers = markers;
        view.rebuild_path();
        view
    }

    /// Replaces the pinned markers with the chosen place and zooms in on it.
    pub fn focus_on(&mut self, place: &Place) {
        let marker = MapMarker::for_place(place);
        self.center = marker.position;
        self.zoom = FOCUS_ZOOM;
        self.markers = vec![marker];
        self.rebuild_path();
    }

    pub fn set_zoom(&mut self, zoom: u8) {
        self.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn zoom_in(&mut self) {
        self.set_zoom(self.zoom.saturating_add(1));
    }

    pub fn zoom_out(&mut self) {
        self.set_zoom(self.zoom.saturating_sub(1));
    }

    fn rebuild_path(&mut self) {
        self.path = if self.markers.len() > 1 {
            Some(self.markers.iter().map(|marker| marker.position).collect())
        } else {
            None
        };
    }
}

pub fn short_name(display_name: &str) -> String {
    display_name
        .split(',')
        .next()
        .unwrap_or(display_name)
        .trim()
        .to_string()
}
