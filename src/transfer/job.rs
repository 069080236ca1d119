//! Download job construction: selection, deduplication, and the
//! content/link split.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use crate::catalog::{Attachment, CourseRecord, ExportFormat};

/// Lifecycle state of one download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting to be dequeued.
    Pending,
    /// Transfer in flight.
    Active,
    /// Bytes saved.
    Succeeded,
    /// Failed after all permitted attempts.
    Failed,
}

impl JobState {
    /// Returns the string representation used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job's bytes are obtained from the content service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    /// Plain fetch by item id.
    Direct,
    /// Convert to the given format, then fetch.
    Export(ExportFormat),
}

/// One content transfer within a batch.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Content-service item identifier; unique within the batch.
    pub item_id: String,
    /// Title used for the saved filename.
    pub display_name: String,
    /// How to obtain the bytes.
    pub source: ContentSource,
    /// Lifecycle state.
    pub state: JobState,
    /// Attempts made so far.
    pub attempts: u32,
}

impl fmt::Display for DownloadJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DownloadJob {{ item_id: {}, name: {}, state: {} }}",
            self.item_id, self.display_name, self.state
        )
    }
}

/// A link-like attachment destined for the batch's link manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    /// Display title.
    pub title: String,
    /// Link target.
    pub url: String,
}

/// Builds the batch's job list from the catalog.
///
/// Walks every record's attachments, keeps those whose identifier is in
/// `requested_ids`, and collapses duplicates by identifier - an attachment
/// referenced from two parent records is downloaded once. Content
/// attachments become [`DownloadJob`]s; link-like attachments become
/// [`LinkEntry`]s, aggregated later into one synthesized manifest job.
#[must_use]
pub fn build_jobs(
    records: &[CourseRecord],
    requested_ids: &HashSet<String>,
) -> (Vec<DownloadJob>, Vec<LinkEntry>) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut jobs = Vec::new();
    let mut links = Vec::new();

    for record in records {
        for attachment in &record.attachments {
            let id = attachment.identifier();
            if !requested_ids.contains(id) || !seen.insert(id) {
                continue;
            }
            match attachment {
                Attachment::File {
                    file_id,
                    title,
                    export,
                } => {
                    jobs.push(DownloadJob {
                        item_id: file_id.clone(),
                        display_name: title.clone(),
                        source: export.map_or(ContentSource::Direct, ContentSource::Export),
                        state: JobState::Pending,
                        attempts: 0,
                    });
                }
                Attachment::Link { url, title }
                | Attachment::Form { url, title }
                | Attachment::Video { url, title } => {
                    links.push(LinkEntry {
                        title: title.clone(),
                        url: url.clone(),
                    });
                }
            }
        }
    }

    debug!(
        jobs = jobs.len(),
        links = links.len(),
        requested = requested_ids.len(),
        "built download job list"
    );
    (jobs, links)
}

/// Renders the link manifest saved as the batch's synthesized terminal job.
#[must_use]
pub fn render_link_manifest(links: &[LinkEntry]) -> String {
    let mut manifest = String::from("# Links\n\n");
    for link in links {
        manifest.push_str(&format!("- [{}]({})\n", link.title, link.url));
    }
    manifest
}
