//! Catalog record model.
//!
//! The catalog service returns collections of course records, each carrying
//! attachments of mixed provenance. Attachments are modeled as a tagged
//! union with an explicit discriminant: content-bearing files are downloaded
//! individually, while link-like attachments (plain links, forms, videos)
//! are aggregated into a single manifest at download time.

mod fetch;

pub use fetch::{CatalogFetcher, FetchError};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one catalog collection (one course's material set).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    /// Creates a collection id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target format for content that must be converted before download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Portable document format.
    Pdf,
    /// Comma-separated values.
    Csv,
    /// Plain text.
    Text,
}

impl ExportFormat {
    /// Returns the wire name used in export requests.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Text => "text",
        }
    }

    /// Returns the file extension (with leading dot) for saved exports.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => ".pdf",
            Self::Csv => ".csv",
            Self::Text => ".txt",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attachment on a course record.
///
/// The discriminant decides download behavior: `File` is fetched (or
/// converted then fetched) as bytes; `Link`, `Form`, and `Video` only
/// contribute an entry to the batch's link manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    /// A stored file, downloadable by id.
    File {
        /// Content-service file identifier.
        file_id: String,
        /// Display title.
        title: String,
        /// Present when the source requires format conversion before fetch.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        export: Option<ExportFormat>,
    },
    /// An external link.
    Link {
        /// Link target.
        url: String,
        /// Display title.
        title: String,
    },
    /// A form, reachable only through its URL.
    Form {
        /// Form URL.
        url: String,
        /// Display title.
        title: String,
    },
    /// A hosted video, reachable only through its URL.
    Video {
        /// Video URL.
        url: String,
        /// Display title.
        title: String,
    },
}

impl Attachment {
    /// Returns the identifier used for selection and deduplication.
    ///
    /// Files are identified by their content-service id; link-like
    /// attachments by their URL.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::File { file_id, .. } => file_id,
            Self::Link { url, .. } | Self::Form { url, .. } | Self::Video { url, .. } => url,
        }
    }

    /// Returns the display title.
    #[must_use]
    pub fn title(&self) -> &str {
        match self {
            Self::File { title, .. }
            | Self::Link { title, .. }
            | Self::Form { title, .. }
            | Self::Video { title, .. } => title,
        }
    }

    /// Returns whether this attachment is downloaded as bytes.
    #[must_use]
    pub fn is_content(&self) -> bool {
        matches!(self, Self::File { .. })
    }
}

/// One course record (an assignment or material post) with its attachments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    /// Record identifier within the collection.
    pub id: String,
    /// Record title.
    pub title: String,
    /// Attached items, in catalog order.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// A text announcement; droppable under cache pressure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Announcement identifier.
    pub id: String,
    /// Announcement body.
    pub text: String,
}

/// Everything the catalog returns for one collection; the unit the cache
/// stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    /// The collection this snapshot describes.
    pub collection: CollectionId,
    /// Course records with their attachments.
    pub records: Vec<CourseRecord>,
    /// Announcements; the first sub-collection dropped when a snapshot is
    /// truncated for storage.
    #[serde(default)]
    pub announcements: Vec<Announcement>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn file(id: &str) -> Attachment {
        Attachment::File {
            file_id: id.to_string(),
            title: format!("file {id}"),
            export: None,
        }
    }

    #[test]
    fn attachment_identifier_uses_file_id_for_files_and_url_otherwise() {
        assert_eq!(file("f1").identifier(), "f1");

        let link = Attachment::Link {
            url: "https://example.com/syllabus".to_string(),
            title: "Syllabus".to_string(),
        };
        assert_eq!(link.identifier(), "https://example.com/syllabus");
        assert!(!link.is_content());
        assert!(file("f1").is_content());
    }

    #[test]
    fn attachment_serializes_with_kind_discriminant() {
        let form = Attachment::Form {
            url: "https://forms.example.com/q1".to_string(),
            title: "Quiz".to_string(),
        };
        let value = serde_json::to_value(&form).unwrap();
        assert_eq!(value["kind"], "form");

        let parsed: Attachment = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, form);
    }

    #[test]
    fn file_export_field_is_omitted_when_absent() {
        let value = serde_json::to_value(file("f1")).unwrap();
        assert!(value.get("export").is_none());

        let with_export = Attachment::File {
            file_id: "f2".to_string(),
            title: "Notes".to_string(),
            export: Some(ExportFormat::Pdf),
        };
        let value = serde_json::to_value(&with_export).unwrap();
        assert_eq!(value["export"], "pdf");
    }

    #[test]
    fn snapshot_round_trips_without_announcements_field() {
        let snapshot = CollectionSnapshot {
            collection: CollectionId::new("c1"),
            records: vec![CourseRecord {
                id: "r1".to_string(),
                title: "Week 1".to_string(),
                attachments: vec![file("f1")],
            }],
            announcements: Vec::new(),
        };

        let mut value = serde_json::to_value(&snapshot).unwrap();
        // A truncated snapshot in the cache has no announcements array.
        value.as_object_mut().unwrap().remove("announcements");
        let parsed: CollectionSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn export_format_names_and_extensions() {
        assert_eq!(ExportFormat::Pdf.as_str(), "pdf");
        assert_eq!(ExportFormat::Csv.extension(), ".csv");
        assert_eq!(ExportFormat::Text.extension(), ".txt");
        assert_eq!(ExportFormat::Pdf.to_string(), "pdf");
    }
}
