//! Source-specific enrichment hooks invoked before mapping.
//!
//! Preprocessors are external strategies: the engine only knows the
//! contract. Returning `Ok(None)` drops a record silently (incomplete or
//! irrelevant payloads) and does not count as a failure; an error aborts
//! the whole run so the queue's retry policy can take over.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::models::Pipeline;

/// A source-specific record enrichment strategy.
#[async_trait]
pub trait Preprocessor: Send + Sync {
    /// Strategy name, for logs.
    fn name(&self) -> &str;

    /// Whether this strategy handles the given pipeline.
    fn applies_to(&self, pipeline: &Pipeline) -> bool;

    /// Enrich one raw record. `None` drops the record silently.
    async fn pre_process(
        &self,
        record: Value,
        pipeline: &Pipeline,
        workspace_id: &str,
    ) -> Result<Option<Value>>;
}

/// Registry of preprocessing strategies; the first applicable one wins.
#[derive(Default)]
pub struct PreprocessorRegistry {
    preprocessors: Vec<Box<dyn Preprocessor>>,
}

impl PreprocessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, preprocessor: Box<dyn Preprocessor>) {
        self.preprocessors.push(preprocessor);
    }

    fn select(&self, pipeline: &Pipeline) -> Option<&dyn Preprocessor> {
        self.preprocessors
            .iter()
            .find(|p| p.applies_to(pipeline))
            .map(|p| p.as_ref())
    }

    /// Run the applicable strategy (if any) over a batch. Dropped records
    /// are removed; errors propagate and fail the run.
    pub async fn pre_process_records(
        &self,
        records: Vec<Value>,
        pipeline: &Pipeline,
        workspace_id: &str,
    ) -> Result<Vec<Value>> {
        let Some(preprocessor) = self.select(pipeline) else {
            return Ok(records);
        };

        debug!(
            pipeline_id = %pipeline.id,
            preprocessor = preprocessor.name(),
            count = records.len(),
            "preprocessing records"
        );

        let mut processed = Vec::with_capacity(records.len());
        for record in records {
            match preprocessor.pre_process(record, pipeline, workspace_id).await? {
                Some(enriched) => processed.push(enriched),
                None => debug!(
                    pipeline_id = %pipeline.id,
                    "preprocessor dropped record"
                ),
            }
        }

        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PipelineMode, SourceRequestConfig};
    use chrono::Utc;
    use serde_json::json;

    fn pipeline(name: &str) -> Pipeline {
        Pipeline {
            id: "p1".to_string(),
            workspace_id: "ws1".to_string(),
            name: name.to_string(),
            description: None,
            mode: PipelineMode::Push,
            target_object: "lead".to_string(),
            webhook_secret: None,
            source_url: None,
            source_http_method: None,
            source_auth_config: None,
            source_request_config: Some(SourceRequestConfig::default()),
            response_records_path: None,
            schedule: None,
            dedup_field_path: None,
            pagination_config: None,
            is_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Tags leads with a source marker and drops records without an id.
    struct LeadTagger;

    #[async_trait]
    impl Preprocessor for LeadTagger {
        fn name(&self) -> &str {
            "lead-tagger"
        }

        fn applies_to(&self, pipeline: &Pipeline) -> bool {
            pipeline.name.to_lowercase().contains("lead")
        }

        async fn pre_process(
            &self,
            record: Value,
            _pipeline: &Pipeline,
            _workspace_id: &str,
        ) -> Result<Option<Value>> {
            if record.get("lead_id").is_none() {
                return Ok(None);
            }
            let mut enriched = record;
            enriched["_tagged"] = json!(true);
            Ok(Some(enriched))
        }
    }

    #[tokio::test]
    async fn no_applicable_preprocessor_passes_records_through() {
        let mut registry = PreprocessorRegistry::new();
        registry.register(Box::new(LeadTagger));

        let records = vec![json!({"x": 1})];
        let out = registry
            .pre_process_records(records.clone(), &pipeline("Call imports"), "ws1")
            .await
            .unwrap();
        assert_eq!(out, records);
    }

    #[tokio::test]
    async fn dropped_records_are_removed_silently() {
        let mut registry = PreprocessorRegistry::new();
        registry.register(Box::new(LeadTagger));

        let records = vec![json!({"lead_id": 1}), json!({"no_id": true})];
        let out = registry
            .pre_process_records(records, &pipeline("Dialer leads"), "ws1")
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["_tagged"], json!(true));
    }
}
