//! Recipient resolution
//!
//! Resolves the recipient set for a job at run time: either the static
//! address list embedded in the job definition, or a filtered view of the
//! recipient cache file. The cache is re-read on every execution so
//! filtered jobs always reflect its latest contents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::ResolutionError;
use crate::models::job;
use crate::models::RecipientSpec;

/// One recipient: an email address plus opaque attributes the template
/// renderer may substitute into the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub email: String,
    pub attributes: HashMap<String, String>,
}

impl Recipient {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            attributes: HashMap::new(),
        }
    }
}

/// Produces the recipient set for a job. Implementations must not cache
/// results across executions.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    async fn resolve(&self, job: &job::Model) -> Result<Vec<Recipient>, ResolutionError>;
}

/// Resolver backed by a CSV or JSON recipient cache file.
pub struct CacheRecipientResolver {
    cache_path: PathBuf,
}

impl CacheRecipientResolver {
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
        }
    }

    fn resolve_filter(&self, field: &str, value: &str) -> Result<Vec<Recipient>, ResolutionError> {
        let records = load_cache(&self.cache_path)?;
        let total = records.len();

        let matched: Vec<Recipient> = records
            .into_iter()
            .filter(|record| record.attributes.get(field).map(String::as_str) == Some(value))
            .collect();

        debug!(
            cache = %self.cache_path.display(),
            total,
            matched = matched.len(),
            field,
            value,
            "Resolved recipients from cache filter"
        );

        if matched.is_empty() {
            return Err(ResolutionError::NoMatch {
                field: field.to_string(),
                value: value.to_string(),
            });
        }
        Ok(matched)
    }
}

#[async_trait]
impl RecipientResolver for CacheRecipientResolver {
    async fn resolve(&self, job: &job::Model) -> Result<Vec<Recipient>, ResolutionError> {
        match job.spec()? {
            RecipientSpec::StaticList { addresses } => {
                let recipients: Vec<Recipient> = addresses
                    .iter()
                    .map(|address| address.trim())
                    .filter(|address| !address.is_empty())
                    .map(Recipient::new)
                    .collect();
                if recipients.is_empty() {
                    return Err(ResolutionError::EmptyStaticList);
                }
                Ok(recipients)
            }
            RecipientSpec::CacheFilter { field, value } => self.resolve_filter(&field, &value),
        }
    }
}

/// Load every cache record carrying a non-empty email address.
fn load_cache(path: &Path) -> Result<Vec<Recipient>, ResolutionError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("csv") => load_csv(path),
        Some("json") => load_json(path),
        _ => Err(ResolutionError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

fn load_csv(path: &Path) -> Result<Vec<Recipient>, ResolutionError> {
    let mut reader = csv::Reader::from_path(path).map_err(|err| match err.kind() {
        csv::ErrorKind::Io(_) => ResolutionError::CacheUnreadable {
            path: path.to_path_buf(),
            source: into_io_error(err),
        },
        _ => ResolutionError::MalformedCache {
            path: path.to_path_buf(),
            reason: err.to_string(),
        },
    })?;

    let headers = reader
        .headers()
        .map_err(|err| ResolutionError::MalformedCache {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?
        .clone();

    let mut recipients = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| ResolutionError::MalformedCache {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let attributes: HashMap<String, String> = headers
            .iter()
            .zip(row.iter())
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        if let Some(recipient) = recipient_from_attributes(attributes) {
            recipients.push(recipient);
        }
    }
    Ok(recipients)
}

fn load_json(path: &Path) -> Result<Vec<Recipient>, ResolutionError> {
    let contents = std::fs::read_to_string(path).map_err(|source| {
        ResolutionError::CacheUnreadable {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let parsed: JsonValue =
        serde_json::from_str(&contents).map_err(|err| ResolutionError::MalformedCache {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

    let JsonValue::Array(entries) = parsed else {
        return Err(ResolutionError::MalformedCache {
            path: path.to_path_buf(),
            reason: "JSON recipient cache must be a list of objects".to_string(),
        });
    };

    let mut recipients = Vec::new();
    for entry in entries {
        let JsonValue::Object(map) = entry else {
            return Err(ResolutionError::MalformedCache {
                path: path.to_path_buf(),
                reason: "JSON recipient cache must be a list of objects".to_string(),
            });
        };
        let attributes: HashMap<String, String> = map
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    JsonValue::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();
        if let Some(recipient) = recipient_from_attributes(attributes) {
            recipients.push(recipient);
        }
    }
    Ok(recipients)
}

fn recipient_from_attributes(attributes: HashMap<String, String>) -> Option<Recipient> {
    let email = attributes.get("email")?.trim().to_string();
    if email.is_empty() {
        return None;
    }
    Some(Recipient { email, attributes })
}

fn into_io_error(err: csv::Error) -> std::io::Error {
    match err.into_kind() {
        csv::ErrorKind::Io(io_err) => io_err,
        other => std::io::Error::other(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::models::{JobStatus, ScheduleKind};

    fn job_with_spec(spec: RecipientSpec) -> job::Model {
        let now = Utc::now().fixed_offset();
        job::Model {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            template_ref: "welcome".to_string(),
            recipient_spec: spec.to_json(),
            schedule_kind: ScheduleKind::Immediate,
            run_at: None,
            cron_expr: None,
            next_run_at: Some(now),
            status: JobStatus::Active,
            retry_counter: 0,
            max_retries: 3,
            backoff_base_seconds: 60,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn static_list_resolves_embedded_addresses() {
        let resolver = CacheRecipientResolver::new("does-not-exist.csv");
        let job = job_with_spec(RecipientSpec::StaticList {
            addresses: vec!["a@example.com".to_string(), " b@example.com ".to_string()],
        });
        let recipients = resolver.resolve(&job).await.unwrap();
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[1].email, "b@example.com");
    }

    #[tokio::test]
    async fn empty_static_list_is_an_error() {
        let resolver = CacheRecipientResolver::new("does-not-exist.csv");
        let job = job_with_spec(RecipientSpec::StaticList { addresses: vec![] });
        let err = resolver.resolve(&job).await.unwrap_err();
        assert!(matches!(err, ResolutionError::EmptyStaticList));
    }

    #[tokio::test]
    async fn csv_filter_keeps_matching_rows() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("recipients.csv");
        std::fs::write(
            &cache,
            "email,department\na@example.com,marketing\nb@example.com,sales\nc@example.com,marketing\n",
        )
        .unwrap();

        let resolver = CacheRecipientResolver::new(&cache);
        let job = job_with_spec(RecipientSpec::CacheFilter {
            field: "department".to_string(),
            value: "marketing".to_string(),
        });
        let recipients = resolver.resolve(&job).await.unwrap();
        let emails: Vec<&str> = recipients.iter().map(|r| r.email.as_str()).collect();
        assert_eq!(emails, vec!["a@example.com", "c@example.com"]);
        assert_eq!(
            recipients[0].attributes.get("department").map(String::as_str),
            Some("marketing")
        );
    }

    #[tokio::test]
    async fn json_cache_is_supported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("recipients.json");
        std::fs::write(
            &cache,
            r#"[{"email":"a@example.com","tier":"gold"},{"email":"b@example.com","tier":"silver"}]"#,
        )
        .unwrap();

        let resolver = CacheRecipientResolver::new(&cache);
        let job = job_with_spec(RecipientSpec::CacheFilter {
            field: "tier".to_string(),
            value: "gold".to_string(),
        });
        let recipients = resolver.resolve(&job).await.unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].email, "a@example.com");
    }

    #[tokio::test]
    async fn filter_without_matches_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("recipients.csv");
        std::fs::write(&cache, "email,department\na@example.com,marketing\n").unwrap();

        let resolver = CacheRecipientResolver::new(&cache);
        let job = job_with_spec(RecipientSpec::CacheFilter {
            field: "department".to_string(),
            value: "legal".to_string(),
        });
        let err = resolver.resolve(&job).await.unwrap_err();
        assert!(matches!(err, ResolutionError::NoMatch { .. }));
    }

    #[tokio::test]
    async fn missing_cache_file_is_unreadable() {
        let resolver = CacheRecipientResolver::new("/definitely/not/here.csv");
        let job = job_with_spec(RecipientSpec::CacheFilter {
            field: "department".to_string(),
            value: "marketing".to_string(),
        });
        let err = resolver.resolve(&job).await.unwrap_err();
        assert!(matches!(err, ResolutionError::CacheUnreadable { .. }));
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let resolver = CacheRecipientResolver::new("recipients.yaml");
        let job = job_with_spec(RecipientSpec::CacheFilter {
            field: "department".to_string(),
            value: "marketing".to_string(),
        });
        let err = resolver.resolve(&job).await.unwrap_err();
        assert!(matches!(err, ResolutionError::UnsupportedFormat { .. }));
    }
}
