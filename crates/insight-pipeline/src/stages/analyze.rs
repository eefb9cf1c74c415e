//! Analyze: find related notes and route the analysis prompt.
//!
//! A note longer than `summary_chunk_chars` is summarized part by part
//! first; the analysis prompt then carries the part summaries in place of
//! the full text. Each part is its own routing decision, so parts hit the
//! semantic cache independently and the first escalated part stops the
//! item.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use insight_router::{
    estimate_complexity, CostRouter, InvocationParams, RouteOutcome, RouteRequest, Routed,
    RouterError, TaskKind,
};
use insight_types::normalize;
use insight_vector::{EntryKind, SearchFilter, VectorError, VectorIndex};
use tracing::debug;

use crate::chunking::chunk_text;
use crate::error::StageFailure;
use crate::item::{RelatedNote, StageName, WorkItem};
use crate::stage::{Stage, StageContext};

/// Analyze stage settings.
#[derive(Debug, Clone)]
pub struct AnalyzeConfig {
    /// Related notes kept per item
    pub related_k: usize,
    /// Notes carrying any of these tags always go to a person
    pub human_first_tags: Vec<String>,
    /// Notes longer than this many characters are summarized in parts
    pub summary_chunk_chars: usize,
    pub params: InvocationParams,
}

impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            related_k: 5,
            human_first_tags: vec!["journal".to_string(), "reflection".to_string()],
            summary_chunk_chars: 4000,
            params: InvocationParams::default(),
        }
    }
}

pub struct AnalyzeStage {
    router: Arc<CostRouter>,
    index: Arc<VectorIndex>,
    config: AnalyzeConfig,
}

impl AnalyzeStage {
    pub fn new(router: Arc<CostRouter>, index: Arc<VectorIndex>, config: AnalyzeConfig) -> Self {
        Self {
            router,
            index,
            config,
        }
    }

    fn task_for(&self, item: &WorkItem) -> TaskKind {
        let human_first = item
            .tags()
            .iter()
            .any(|tag| self.config.human_first_tags.contains(tag));
        if human_first {
            TaskKind::HumanFirst
        } else {
            TaskKind::Routine
        }
    }

    fn prompt(item: &WorkItem, body: &str, related: &[RelatedNote]) -> String {
        let mut prompt = format!(
            "Summarize the note below in a few sentences, list its key themes, \
             and explain how it connects to the related notes.\n\n\
             Note: {}\n\n{}\n",
            item.path(),
            body
        );
        if !related.is_empty() {
            prompt.push_str("\nRelated notes:\n");
            for note in related {
                prompt.push_str(&format!("- {} ({:.2})\n", note.path, note.score));
            }
        }
        prompt
    }

    fn part_prompt(item: &WorkItem, part: usize, parts: usize, text: &str) -> String {
        format!(
            "Summarize part {part} of {parts} of the note below in a few sentences, \
             keeping names, decisions and open questions.\n\n\
             Note: {}\n\n{text}\n",
            item.path()
        )
    }

    fn request(&self, item: &WorkItem, id: String, prompt: String, query: String) -> RouteRequest {
        RouteRequest::new(id, prompt)
            .with_query(query)
            .with_context_filter(SearchFilter::kind(EntryKind::Chunk).excluding_path(item.path()))
            .with_params(self.config.params.clone())
    }

    async fn route(&self, request: &RouteRequest, ctx: &StageContext) -> Result<Routed, StageFailure> {
        match self.router.route(request, &ctx.cancel).await {
            Ok(routed) => Ok(routed),
            Err(RouterError::Cancelled) => Err(StageFailure::cancelled(StageName::Analyze)),
            Err(e) => Err(StageFailure::from_error(StageName::Analyze, e)),
        }
    }

    /// Summarize each part of a long note. `None` once a part escalates.
    async fn summarize_parts(
        &self,
        item: &mut WorkItem,
        text: &str,
        ctx: &StageContext,
    ) -> Result<Option<Vec<String>>, StageFailure> {
        let parts = chunk_text(text, self.config.summary_chunk_chars);
        debug!(item = %item.id, path = %item.path(), parts = parts.len(), "Summarizing long note in parts");
        let mut summaries = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let request = self
                .request(
                    item,
                    format!("{}#part{}", item.id, i + 1),
                    Self::part_prompt(item, i + 1, parts.len(), &part.text),
                    part.text.clone(),
                )
                .with_complexity(estimate_complexity(&part.text, 0));
            let routed = self.route(&request, ctx).await?;
            match absorb(item, routed) {
                Some(summary) => summaries.push(summary),
                None => return Ok(None),
            }
        }
        Ok(Some(summaries))
    }
}

/// Record a routing decision on the item. Returns the answer, if any.
fn absorb(item: &mut WorkItem, routed: Routed) -> Option<String> {
    item.confidence = routed.decision.rationale_score;
    item.record(
        StageName::Analyze,
        format!("{:?}: {}", routed.decision.path, routed.decision.explanation),
    );
    item.decisions.push(routed.decision);
    match routed.outcome {
        RouteOutcome::Answer { text, cost } => {
            item.cost_spent += cost;
            Some(text)
        }
        RouteOutcome::Escalated { escalation_id, .. } => {
            item.escalation_id = Some(escalation_id);
            None
        }
    }
}

/// Best-scoring other notes near any of the item's chunks, highest first.
pub(crate) fn related_notes(
    index: &VectorIndex,
    item: &WorkItem,
    k: usize,
) -> Result<Vec<RelatedNote>, VectorError> {
    let filter = SearchFilter::kind(EntryKind::Chunk).excluding_path(item.path());
    let mut best: HashMap<String, f32> = HashMap::new();
    for chunk in &item.chunks {
        let Some(vector) = index.vector(chunk.vector_id) else {
            continue;
        };
        for hit in index.search(&vector, k, &filter)? {
            if let Some(path) = hit.entry.source_path.clone() {
                best.entry(path)
                    .and_modify(|score| *score = score.max(hit.score))
                    .or_insert(hit.score);
            }
        }
    }
    let mut related: Vec<RelatedNote> = best
        .into_iter()
        .map(|(path, score)| RelatedNote { path, score })
        .collect();
    related.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
    related.truncate(k);
    Ok(related)
}

#[async_trait]
impl Stage for AnalyzeStage {
    fn name(&self) -> StageName {
        StageName::Analyze
    }

    async fn run(&self, mut item: WorkItem, ctx: &StageContext) -> Result<WorkItem, StageFailure> {
        item.related = related_notes(&self.index, &item, self.config.related_k)
            .map_err(|e| StageFailure::from_error(StageName::Analyze, e))?;

        let text = normalize(&item.document.text);
        let task = self.task_for(&item);
        let long = text.chars().count() > self.config.summary_chunk_chars;
        let body = if long && task == TaskKind::Routine {
            match self.summarize_parts(&mut item, &text, ctx).await? {
                Some(summaries) => summaries
                    .iter()
                    .enumerate()
                    .map(|(i, summary)| format!("Part {}: {summary}", i + 1))
                    .collect::<Vec<_>>()
                    .join("\n\n"),
                None => return Ok(item),
            }
        } else {
            text.clone()
        };

        let request = self
            .request(&item, item.id.clone(), Self::prompt(&item, &body, &item.related), text.clone())
            .with_task(task)
            .with_complexity(estimate_complexity(&text, item.related.len()));
        let routed = self.route(&request, ctx).await?;

        debug!(
            item = %item.id,
            path = %item.path(),
            route = ?routed.decision.path,
            related = item.related.len(),
            "Analyzed note"
        );
        let analysis = absorb(&mut item, routed);
        item.analysis = analysis;
        Ok(item)
    }
}
