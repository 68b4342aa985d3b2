//! Detect processor: the pairwise-LLM strategy, phases A–H inline.
//!
//! Phase map (checkpoints in parentheses):
//!   A  cache partition — fingerprint each PR, clear stale caches
//!   B  intent extraction (summary persisted per PR; batch id in cursor)
//!   C  embedding (vectors upserted, then `embed_hash`; batch id in cursor)
//!   D  candidate retrieval (k-NN in both spaces, threshold + stale filter)
//!   E  pairwise verification (pairwise cache; batch id in cursor)
//!   F  strict-clique grouping
//!   G  ranking (one chat call per group)
//!   H  atomic group replacement, usage accounting, scan completion
//!
//! A crash or provider failure retries the whole job, but phases re-derive
//! their remaining work from the persisted checkpoints, so completed
//! extractions, embeds and verifications are never repeated.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use ai_llm_service::TokenUsage;
use ai_llm_service::batch::BatchOptions;
use data_store::{Database, Job, NewDupeGroup, NewGroupMember, Pr, ScanStatus};
use detect_core::{Clique, PairEdge, VerifyResult, group_cliques};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use services::content_fingerprint;
use tracing::{debug, info, warn};
use vector_store::{VectorPoint, repo_filter};

use crate::errors::{ScanError, ScanResult};
use crate::payloads::DetectJobPayload;
use crate::prompts::{
    PrSummary, extract_json_array, extract_json_object, intent_messages, rank_messages,
    verify_messages,
};
use crate::resolve::{Services, resolve_services};

const CODE_COLLECTION: &str = "code";
const INTENT_COLLECTION: &str = "intent";

pub struct DetectProcessor {
    db: Arc<Database>,
}

/// Per-PR working state for one run.
struct PrState {
    pr: Pr,
    current_hash: String,
    changed: bool,
}

/// Async-batch resume token stored in the scan's `phase_cursor`.
#[derive(Debug, Serialize, Deserialize)]
struct PhaseCursor {
    phase: String,
    batch_id: String,
}

/// One line of the ranking model's reply.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RankEntry {
    pr_number: i64,
    score: f64,
    #[serde(default)]
    rationale: String,
}

impl DetectProcessor {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn process(&self, job: &Job) -> ScanResult<Option<Value>> {
        let payload: DetectJobPayload = serde_json::from_value(job.payload.clone())?;
        let scan_id = payload.scan.scan_id;
        let repo_id = payload.scan.repo_id;

        self.db.set_scan_status(scan_id, ScanStatus::Embedding)?;
        let account = self.db.get_account(payload.scan.account_id)?;
        let services = resolve_services(&account)?;
        let cursor = self.load_cursor(scan_id)?;

        // Phase A — cache partition.
        let mut states = self.partition(repo_id, &payload.pr_numbers)?;
        let changed_count = states.iter().filter(|s| s.changed).count();
        info!(
            scan_id,
            total = states.len(),
            changed = changed_count,
            "cache partition complete"
        );

        // Phase B — intent extraction for changed PRs lacking a summary.
        self.extract_intents(scan_id, &services, &mut states, &cursor).await?;

        // Phase C — embed changed PRs, load vectors for unchanged ones.
        let vectors_by_number = self
            .embed_and_load(scan_id, repo_id, &services, &mut states, &cursor)
            .await?;

        // Phase D — candidate retrieval.
        self.db.set_scan_status(scan_id, ScanStatus::Verifying)?;
        let pairs = self
            .retrieve_candidates(repo_id, &services, &states, &vectors_by_number)
            .await?;
        info!(scan_id, candidate_pairs = pairs.len(), "candidate retrieval complete");

        // Phase E — pairwise verification through the cache.
        let (edges, verify_misses) = self
            .verify_pairs(scan_id, repo_id, &services, &states, &pairs, &cursor)
            .await?;

        // A fully cached re-scan produced no new information; reuse the
        // previous result set instead of paying for ranking again.
        if changed_count == 0 && verify_misses == 0 {
            if let Some(groups) = self.previous_groups(scan_id, repo_id)? {
                info!(scan_id, groups = groups.len(), "nothing changed, reusing previous groups");
                self.db.set_scan_status(scan_id, ScanStatus::Ranking)?;
                self.finish(scan_id, repo_id, groups)?;
                return Ok(Some(json!({ "reused": true })));
            }
        }

        // Phase F — strict cliques.
        let cliques = group_cliques(&edges, services.scan.max_group_size);
        info!(scan_id, confirmed_edges = edges.len(), groups = cliques.len(), "grouping complete");

        // Phase G — ranking.
        self.db.set_scan_status(scan_id, ScanStatus::Ranking)?;
        let groups = self.rank_groups(scan_id, &services, &states, &cliques).await?;

        // Phase H — atomic persistence and completion.
        let group_count = groups.len();
        self.finish(scan_id, repo_id, groups)?;
        Ok(Some(json!({ "dupe_group_count": group_count })))
    }

    /* ------------------------------ phase A ------------------------------ */

    fn partition(&self, repo_id: i64, pr_numbers: &[i64]) -> ScanResult<Vec<PrState>> {
        let prs = self.db.list_prs_by_numbers(repo_id, pr_numbers)?;
        let mut states = Vec::with_capacity(prs.len());
        for mut pr in prs {
            let current_hash = fingerprint_of(&pr);
            let unchanged =
                pr.embed_hash.as_deref() == Some(current_hash.as_str()) && pr.intent_summary.is_some();

            // A summary tied to a previous fingerprint is stale; both caches
            // are invalidated together. A null embed_hash with a summary is
            // a resume point, not staleness.
            if !unchanged && pr.embed_hash.is_some() && pr.intent_summary.is_some() {
                self.db.clear_pr_caches(pr.id)?;
                pr.embed_hash = None;
                pr.intent_summary = None;
            }

            states.push(PrState {
                changed: !unchanged,
                current_hash,
                pr,
            });
        }
        Ok(states)
    }

    /* ------------------------------ phase B ------------------------------ */

    async fn extract_intents(
        &self,
        scan_id: i64,
        services: &Services,
        states: &mut [PrState],
        cursor: &Option<PhaseCursor>,
    ) -> ScanResult<()> {
        let todo: Vec<usize> = states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.changed && s.pr.intent_summary.is_none())
            .map(|(i, _)| i)
            .collect();
        if todo.is_empty() {
            return Ok(());
        }

        let mut usage = TokenUsage::default();
        if services.chat.supports_batch() && todo.len() > 1 {
            let requests: Vec<(String, _)> = todo
                .iter()
                .map(|&i| {
                    let summary = PrSummary::from(&states[i].pr);
                    (states[i].pr.number.to_string(), intent_messages(&summary))
                })
                .collect();

            let opts = self.batch_options(scan_id, "intent", cursor);
            let results = services.chat.chat_batch(requests, opts).await?;

            let by_number: HashMap<i64, usize> =
                todo.iter().map(|&i| (states[i].pr.number, i)).collect();
            let mut failures = Vec::new();
            for (custom_id, outcome) in results {
                let Some(&idx) = custom_id.parse::<i64>().ok().and_then(|n| by_number.get(&n))
                else {
                    warn!(%custom_id, "batch returned unknown custom id");
                    continue;
                };
                match outcome {
                    Ok(resp) => {
                        usage.add(resp.usage);
                        self.db
                            .set_pr_intent_summary(states[idx].pr.id, resp.content.trim())?;
                        states[idx].pr.intent_summary = Some(resp.content.trim().to_string());
                    }
                    Err(e) => failures.push(format!("pr {}: {e}", states[idx].pr.number)),
                }
            }
            self.record_usage(scan_id, "intent", usage)?;
            self.db.set_scan_phase_cursor(scan_id, None)?;
            if !failures.is_empty() {
                // Retry picks up only the PRs still missing a summary.
                return Err(ScanError::InvalidModelOutput(format!(
                    "intent batch items failed: {}",
                    failures.join("; ")
                )));
            }
        } else {
            for &i in &todo {
                let summary = PrSummary::from(&states[i].pr);
                let resp = services.chat.chat(&intent_messages(&summary)).await?;
                usage.add(resp.usage);
                self.db
                    .set_pr_intent_summary(states[i].pr.id, resp.content.trim())?;
                states[i].pr.intent_summary = Some(resp.content.trim().to_string());
            }
            self.record_usage(scan_id, "intent", usage)?;
        }
        Ok(())
    }

    /* ------------------------------ phase C ------------------------------ */

    async fn embed_and_load(
        &self,
        scan_id: i64,
        repo_id: i64,
        services: &Services,
        states: &mut Vec<PrState>,
        cursor: &Option<PhaseCursor>,
    ) -> ScanResult<HashMap<i64, (Vec<f32>, Vec<f32>)>> {
        let dim = services.embedding.dimensions() as u64;
        services.vectors.ensure_collection(CODE_COLLECTION, dim).await?;
        services.vectors.ensure_collection(INTENT_COLLECTION, dim).await?;

        let mut vectors_by_number: HashMap<i64, (Vec<f32>, Vec<f32>)> = HashMap::new();

        // Unchanged PRs: load stored vectors; a hole means the collection
        // was recreated behind our back, so the PR re-embeds after all.
        let mut to_embed: Vec<usize> = Vec::new();
        for (i, state) in states.iter().enumerate() {
            if state.changed {
                to_embed.push(i);
                continue;
            }
            let number = state.pr.number;
            let code = services
                .vectors
                .get_vector(CODE_COLLECTION, &point_id(repo_id, number, "code"))
                .await?;
            let intent = services
                .vectors
                .get_vector(INTENT_COLLECTION, &point_id(repo_id, number, "intent"))
                .await?;
            match (code, intent) {
                (Some(c), Some(v)) => {
                    vectors_by_number.insert(number, (c, v));
                }
                _ => {
                    warn!(number, "stored vectors missing for unchanged pr, re-embedding");
                    to_embed.push(i);
                }
            }
        }

        if to_embed.is_empty() {
            return Ok(vectors_by_number);
        }

        // One provider round for both spaces: code inputs first, then
        // intent inputs, split back afterwards.
        let mut inputs: Vec<String> = Vec::with_capacity(to_embed.len() * 2);
        for &i in &to_embed {
            inputs.push(code_input(&states[i].pr));
        }
        for &i in &to_embed {
            inputs.push(
                states[i]
                    .pr
                    .intent_summary
                    .clone()
                    .unwrap_or_else(|| states[i].pr.title.clone()),
            );
        }

        let (all_vectors, usage) = if services.embedding.supports_batch() && inputs.len() > 1 {
            let opts = self.batch_options(scan_id, "embed", cursor);
            services.embedding.embed_batch(&inputs, opts).await?
        } else {
            services.embedding.embed(&inputs).await?
        };
        self.record_usage(scan_id, "embed", usage)?;
        self.db.set_scan_phase_cursor(scan_id, None)?;

        if all_vectors.len() != inputs.len() {
            return Err(ScanError::InvalidModelOutput(format!(
                "embedding count mismatch: {} inputs, {} vectors",
                inputs.len(),
                all_vectors.len()
            )));
        }
        let (code_vecs, intent_vecs) = all_vectors.split_at(to_embed.len());

        let mut points_code = Vec::with_capacity(to_embed.len());
        let mut points_intent = Vec::with_capacity(to_embed.len());
        for (k, &i) in to_embed.iter().enumerate() {
            let state = &states[i];
            let payload = json!({
                "repo_id": repo_id,
                "pr_number": state.pr.number,
                "pr_id": state.pr.id,
            });
            points_code.push(VectorPoint {
                id: point_id(repo_id, state.pr.number, "code"),
                vector: code_vecs[k].clone(),
                payload: payload.clone(),
            });
            points_intent.push(VectorPoint {
                id: point_id(repo_id, state.pr.number, "intent"),
                vector: intent_vecs[k].clone(),
                payload,
            });
            vectors_by_number.insert(state.pr.number, (code_vecs[k].clone(), intent_vecs[k].clone()));
        }

        services.vectors.upsert(CODE_COLLECTION, points_code).await?;
        services.vectors.upsert(INTENT_COLLECTION, points_intent).await?;

        // Only now are the vectors durable; never write the hash first.
        for &i in &to_embed {
            let state = &mut states[i];
            self.db.set_pr_embed_hash(state.pr.id, &state.current_hash)?;
            state.pr.embed_hash = Some(state.current_hash.clone());
        }

        Ok(vectors_by_number)
    }

    /* ------------------------------ phase D ------------------------------ */

    async fn retrieve_candidates(
        &self,
        repo_id: i64,
        services: &Services,
        states: &[PrState],
        vectors_by_number: &HashMap<i64, (Vec<f32>, Vec<f32>)>,
    ) -> ScanResult<BTreeSet<(i64, i64)>> {
        let scan_set: HashSet<i64> = states.iter().map(|s| s.pr.number).collect();
        let limit = (services.scan.max_candidates_per_pr * 2) as u64;

        let mut pairs: BTreeSet<(i64, i64)> = BTreeSet::new();
        for state in states {
            let number = state.pr.number;
            let Some((code_vec, intent_vec)) = vectors_by_number.get(&number) else {
                continue;
            };
            for (collection, vector, threshold) in [
                (CODE_COLLECTION, code_vec, services.scan.code_threshold()),
                (INTENT_COLLECTION, intent_vec, services.scan.intent_threshold()),
            ] {
                let hits = services
                    .vectors
                    .search(collection, vector.clone(), limit, Some(repo_filter(repo_id)))
                    .await?;
                let neighbours: Vec<(f32, i64)> = hits
                    .iter()
                    .filter_map(|h| {
                        h.payload
                            .get("pr_number")
                            .and_then(|v| v.as_i64())
                            .map(|n| (h.score, n))
                    })
                    .collect();
                for candidate in keep_candidates(&neighbours, number, threshold, &scan_set) {
                    pairs.insert(ordered_pair(number, candidate));
                }
            }
        }
        Ok(pairs)
    }

    /* ------------------------------ phase E ------------------------------ */

    async fn verify_pairs(
        &self,
        scan_id: i64,
        repo_id: i64,
        services: &Services,
        states: &[PrState],
        pairs: &BTreeSet<(i64, i64)>,
        cursor: &Option<PhaseCursor>,
    ) -> ScanResult<(Vec<PairEdge>, usize)> {
        let by_number: HashMap<i64, &PrState> =
            states.iter().map(|s| (s.pr.number, s)).collect();

        let mut edges: Vec<PairEdge> = Vec::new();
        let mut misses: Vec<(i64, i64)> = Vec::new();

        for &(a, b) in pairs {
            let (Some(sa), Some(sb)) = (by_number.get(&a), by_number.get(&b)) else {
                continue;
            };
            match self.db.get_pairwise_result(
                repo_id,
                a,
                b,
                &sa.current_hash,
                &sb.current_hash,
            )? {
                Some(raw) => match serde_json::from_value::<VerifyResult>(raw) {
                    Ok(result) => edges.push(PairEdge { pr_a: a, pr_b: b, result }),
                    Err(e) => {
                        debug!(a, b, error = %e, "unreadable cache entry, re-verifying");
                        misses.push((a, b));
                    }
                },
                None => misses.push((a, b)),
            }
        }
        let miss_count = misses.len();
        debug!(cached = edges.len(), misses = miss_count, "pairwise cache partition");

        let mut usage = TokenUsage::default();
        let ctx = services.chat.max_context_tokens();

        if services.chat.supports_batch() && misses.len() > 1 {
            let requests: Vec<(String, _)> = misses
                .iter()
                .map(|&(a, b)| {
                    let sa = PrSummary::from(&by_number[&a].pr);
                    let sb = PrSummary::from(&by_number[&b].pr);
                    (format!("{a}-{b}"), verify_messages(&sa, &sb, ctx))
                })
                .collect();

            let opts = self.batch_options(scan_id, "verify", cursor);
            let results = services.chat.chat_batch(requests, opts).await?;

            for (custom_id, outcome) in results {
                let Some((a, b)) = parse_pair_id(&custom_id) else {
                    warn!(%custom_id, "verify batch returned unknown custom id");
                    continue;
                };
                match outcome {
                    Ok(resp) => {
                        usage.add(resp.usage);
                        match parse_verify(&resp.content) {
                            Ok(result) => {
                                self.cache_and_push(repo_id, &by_number, &mut edges, a, b, result)?;
                            }
                            // Batch semantics: a malformed item drops that
                            // candidate pair, it does not fail the scan.
                            Err(e) => warn!(a, b, error = %e, "dropping unparseable verify item"),
                        }
                    }
                    Err(e) => warn!(a, b, error = %e, "dropping failed verify item"),
                }
            }
        } else {
            for &(a, b) in &misses {
                let sa = PrSummary::from(&by_number[&a].pr);
                let sb = PrSummary::from(&by_number[&b].pr);
                let resp = services.chat.chat(&verify_messages(&sa, &sb, ctx)).await?;
                usage.add(resp.usage);
                let result = parse_verify(&resp.content).map_err(ScanError::InvalidModelOutput)?;
                self.cache_and_push(repo_id, &by_number, &mut edges, a, b, result)?;
            }
        }

        self.record_usage(scan_id, "verify", usage)?;
        self.db.set_scan_phase_cursor(scan_id, None)?;

        edges.retain(|e| e.result.is_duplicate);
        Ok((edges, miss_count))
    }

    fn cache_and_push(
        &self,
        repo_id: i64,
        by_number: &HashMap<i64, &PrState>,
        edges: &mut Vec<PairEdge>,
        a: i64,
        b: i64,
        result: VerifyResult,
    ) -> ScanResult<()> {
        let (Some(sa), Some(sb)) = (by_number.get(&a), by_number.get(&b)) else {
            return Ok(());
        };
        self.db.put_pairwise_result(
            repo_id,
            a,
            b,
            &sa.current_hash,
            &sb.current_hash,
            &serde_json::to_value(&result)?,
        )?;
        edges.push(PairEdge { pr_a: a, pr_b: b, result });
        Ok(())
    }

    /* ------------------------------ phase G ------------------------------ */

    async fn rank_groups(
        &self,
        scan_id: i64,
        services: &Services,
        states: &[PrState],
        cliques: &[Clique],
    ) -> ScanResult<Vec<NewDupeGroup>> {
        let by_number: HashMap<i64, &PrState> =
            states.iter().map(|s| (s.pr.number, s)).collect();
        let ctx = services.chat.max_context_tokens();

        let mut usage = TokenUsage::default();
        let mut groups = Vec::with_capacity(cliques.len());
        for clique in cliques {
            let summaries: Vec<PrSummary> = clique
                .members
                .iter()
                .filter_map(|n| by_number.get(n).map(|s| PrSummary::from(&s.pr)))
                .collect();
            if summaries.len() < 2 {
                continue;
            }

            let resp = services.chat.chat(&rank_messages(&summaries, ctx)).await?;
            usage.add(resp.usage);
            let entries = parse_rank(&resp.content).map_err(ScanError::InvalidModelOutput)?;
            let ranked = assemble_ranking(&clique.members, entries);

            let top_number = ranked[0].0;
            let label = by_number
                .get(&top_number)
                .map(|s| clip_label(&s.pr.title))
                .unwrap_or_else(|| format!("duplicate group around #{top_number}"));

            groups.push(NewDupeGroup {
                label,
                confidence: clique.confidence,
                relationship: clique.relationship.as_str().to_string(),
                members: ranked
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, (number, score, rationale))| {
                        by_number.get(&number).map(|s| NewGroupMember {
                            pr_id: s.pr.id,
                            rank: i as i64 + 1,
                            score,
                            rationale,
                        })
                    })
                    .collect(),
            });
        }
        self.record_usage(scan_id, "rank", usage)?;
        Ok(groups)
    }

    /* ------------------------------ phase H ------------------------------ */

    fn finish(&self, scan_id: i64, repo_id: i64, groups: Vec<NewDupeGroup>) -> ScanResult<()> {
        self.db.replace_scan_groups(scan_id, repo_id, &groups)?;
        self.db.touch_repo_last_scan(repo_id)?;
        self.db.set_scan_phase_cursor(scan_id, None)?;
        self.db.finish_scan(scan_id)?;
        info!(scan_id, groups = groups.len(), "scan finished");
        Ok(())
    }

    /* ------------------------------ support ------------------------------ */

    fn load_cursor(&self, scan_id: i64) -> ScanResult<Option<PhaseCursor>> {
        let scan = self.db.get_scan(scan_id)?;
        Ok(scan
            .phase_cursor
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()))
    }

    /// Batch options wired to the scan's `phase_cursor`: resume an existing
    /// batch for this phase, and persist any newly created batch id.
    fn batch_options(
        &self,
        scan_id: i64,
        phase: &'static str,
        cursor: &Option<PhaseCursor>,
    ) -> BatchOptions {
        let existing_batch_id = cursor
            .as_ref()
            .filter(|c| c.phase == phase)
            .map(|c| c.batch_id.clone());

        let db = self.db.clone();
        BatchOptions {
            existing_batch_id,
            on_batch_created: Some(Box::new(move |batch_id: &str| {
                let blob = json!({ "phase": phase, "batch_id": batch_id }).to_string();
                if let Err(e) = db.set_scan_phase_cursor(scan_id, Some(&blob)) {
                    warn!(scan_id, error = %e, "failed to persist phase cursor");
                }
            })),
            deadline: None,
            poll_base: None,
        }
    }

    fn record_usage(&self, scan_id: i64, phase: &str, usage: TokenUsage) -> ScanResult<()> {
        if usage.input_tokens == 0 && usage.output_tokens == 0 {
            return Ok(());
        }
        self.db.add_scan_token_usage(
            scan_id,
            phase,
            usage.input_tokens as i64,
            usage.output_tokens as i64,
        )?;
        Ok(())
    }

    /// The latest completed scan's groups, re-shaped for re-persistence.
    fn previous_groups(&self, scan_id: i64, repo_id: i64) -> ScanResult<Option<Vec<NewDupeGroup>>> {
        let previous = self
            .db
            .list_scans_for_repo(repo_id)?
            .into_iter()
            .find(|s| s.id != scan_id && s.status == ScanStatus::Done);
        let Some(previous) = previous else {
            return Ok(None);
        };
        let groups = self
            .db
            .list_scan_groups(previous.id)?
            .into_iter()
            .map(|g| NewDupeGroup {
                label: g.group.label,
                confidence: g.group.confidence,
                relationship: g.group.relationship,
                members: g
                    .members
                    .into_iter()
                    .map(|m| NewGroupMember {
                        pr_id: m.pr_id,
                        rank: m.rank,
                        score: m.score,
                        rationale: m.rationale,
                    })
                    .collect(),
            })
            .collect();
        Ok(Some(groups))
    }
}

/* ----------------------------- pure helpers ----------------------------- */

/// Embedding-relevant fingerprint of a PR (phase A).
fn fingerprint_of(pr: &Pr) -> String {
    content_fingerprint(&[
        pr.diff_hash.as_deref().unwrap_or(""),
        &pr.title,
        pr.body.as_deref().unwrap_or(""),
        &pr.file_paths.join(","),
    ])
}

/// Input for the code-space embedding.
fn code_input(pr: &Pr) -> String {
    format!("{}\n{}", pr.title, pr.file_paths.join("\n"))
}

/// Deterministic vector-store point id.
fn point_id(repo_id: i64, pr_number: i64, space: &str) -> String {
    format!("{repo_id}-{pr_number}-{space}")
}

fn ordered_pair(a: i64, b: i64) -> (i64, i64) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Filters k-NN neighbours into candidate numbers: above threshold, not the
/// query PR, and present in the current scan set (stale points are ignored
/// silently).
fn keep_candidates(
    neighbours: &[(f32, i64)],
    self_number: i64,
    threshold: f32,
    scan_set: &HashSet<i64>,
) -> Vec<i64> {
    neighbours
        .iter()
        .filter(|(score, number)| {
            *number != self_number && *score >= threshold && scan_set.contains(number)
        })
        .map(|(_, number)| *number)
        .collect()
}

fn parse_pair_id(custom_id: &str) -> Option<(i64, i64)> {
    let (a, b) = custom_id.split_once('-')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}

fn parse_verify(content: &str) -> Result<VerifyResult, String> {
    let value = extract_json_object(content)?;
    serde_json::from_value(value).map_err(|e| format!("verify shape mismatch: {e}"))
}

fn parse_rank(content: &str) -> Result<Vec<RankEntry>, String> {
    let value = extract_json_array(content)?;
    serde_json::from_value(value).map_err(|e| format!("rank shape mismatch: {e}"))
}

/// Merges the model's rank entries with the clique membership: entries are
/// deduplicated by PR number, members the model skipped get a zero score,
/// and the result is sorted by score descending (stable).
fn assemble_ranking(members: &[i64], entries: Vec<RankEntry>) -> Vec<(i64, f64, String)> {
    let member_set: HashSet<i64> = members.iter().copied().collect();
    let mut seen: HashSet<i64> = HashSet::new();
    let mut ranked: Vec<(i64, f64, String)> = Vec::with_capacity(members.len());

    for entry in entries {
        if member_set.contains(&entry.pr_number) && seen.insert(entry.pr_number) {
            ranked.push((entry.pr_number, entry.score.clamp(0.0, 100.0), entry.rationale));
        }
    }
    for &number in members {
        if seen.insert(number) {
            ranked.push((number, 0.0, String::new()));
        }
    }
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

fn clip_label(title: &str) -> String {
    match title.char_indices().nth(80) {
        Some((cut, _)) => format!("{}…", &title[..cut]),
        None => title.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pr(number: i64) -> Pr {
        Pr {
            id: number * 10,
            repo_id: 1,
            number,
            title: format!("title {number}"),
            body: Some("body".into()),
            author: "a".into(),
            diff_hash: Some("hash".into()),
            file_paths: vec!["a.rs".into(), "b.rs".into()],
            state: "open".into(),
            github_etag: None,
            embed_hash: None,
            intent_summary: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn fingerprint_covers_all_embedding_fields() {
        let base = pr(1);
        let mut other = pr(1);
        assert_eq!(fingerprint_of(&base), fingerprint_of(&other));

        other.title = "different".into();
        assert_ne!(fingerprint_of(&base), fingerprint_of(&other));

        let mut other = pr(1);
        other.diff_hash = None;
        assert_ne!(fingerprint_of(&base), fingerprint_of(&other));

        let mut other = pr(1);
        other.file_paths.push("c.rs".into());
        assert_ne!(fingerprint_of(&base), fingerprint_of(&other));
    }

    #[test]
    fn candidates_filter_self_threshold_and_stale() {
        let scan_set: HashSet<i64> = [1, 2, 3].into_iter().collect();
        let neighbours = vec![
            (0.99, 1),  // self
            (0.90, 2),  // keep
            (0.50, 3),  // below threshold
            (0.95, 42), // stale point, not in scan set
        ];
        let kept = keep_candidates(&neighbours, 1, 0.65, &scan_set);
        assert_eq!(kept, vec![2]);
    }

    #[test]
    fn ranking_dedupes_and_backfills_members() {
        let entries = vec![
            RankEntry { pr_number: 5, score: 80.0, rationale: "good".into() },
            RankEntry { pr_number: 5, score: 10.0, rationale: "dupe entry".into() },
            RankEntry { pr_number: 7, score: 95.0, rationale: "best".into() },
            RankEntry { pr_number: 99, score: 100.0, rationale: "not a member".into() },
        ];
        let ranked = assemble_ranking(&[5, 7, 9], entries);
        let numbers: Vec<i64> = ranked.iter().map(|r| r.0).collect();
        assert_eq!(numbers, vec![7, 5, 9], "sorted by score, member 9 backfilled");
        assert_eq!(ranked[2].1, 0.0);
    }

    #[test]
    fn verify_parsing_accepts_fenced_output() {
        let content = "```json\n{\"isDuplicate\": true, \"confidence\": 0.92, \
                       \"relationship\": \"exact_duplicate\", \"rationale\": \"same diff\"}\n```";
        let result = parse_verify(content).unwrap();
        assert!(result.is_duplicate);
        assert!((result.confidence - 0.92).abs() < 1e-9);
    }

    #[test]
    fn verify_parsing_rejects_prose() {
        assert!(parse_verify("these are duplicates, trust me").is_err());
    }

    #[test]
    fn pair_ids_roundtrip() {
        assert_eq!(parse_pair_id("12-34"), Some((12, 34)));
        assert_eq!(parse_pair_id("nope"), None);
    }

    #[test]
    fn point_ids_are_stable_per_space() {
        assert_eq!(point_id(1, 42, "code"), "1-42-code");
        assert_ne!(point_id(1, 42, "code"), point_id(1, 42, "intent"));
    }

    mod partition {
        use super::*;
        use data_store::PrUpsert;

        fn seed(db: &Arc<Database>, repo_id: i64, number: i64) -> i64 {
            db.upsert_pr(&PrUpsert {
                repo_id,
                number,
                title: format!("title {number}"),
                body: Some("body".into()),
                author: "a".into(),
                diff_hash: Some("hash".into()),
                file_paths: vec!["a.rs".into()],
                state: "open".into(),
                github_etag: None,
                created_at: "2026-01-01T00:00:00Z".into(),
                updated_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap()
        }

        #[test]
        fn current_fingerprint_with_summary_is_unchanged() {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let repo = db.create_repo("o", "r").unwrap();
            let id = seed(&db, repo, 1);

            let stored = db.get_pr(repo, 1).unwrap().unwrap();
            db.set_pr_intent_summary(id, "does a thing").unwrap();
            db.set_pr_embed_hash(id, &fingerprint_of(&stored)).unwrap();

            let processor = DetectProcessor::new(db);
            let states = processor.partition(repo, &[1]).unwrap();
            assert!(!states[0].changed, "current hash + summary means no work");
        }

        #[test]
        fn stale_fingerprint_clears_both_caches() {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let repo = db.create_repo("o", "r").unwrap();
            let id = seed(&db, repo, 1);
            db.set_pr_intent_summary(id, "old summary").unwrap();
            db.set_pr_embed_hash(id, "fingerprint-of-old-content").unwrap();

            let processor = DetectProcessor::new(db.clone());
            let states = processor.partition(repo, &[1]).unwrap();
            assert!(states[0].changed);

            let row = db.get_pr(repo, 1).unwrap().unwrap();
            assert!(row.embed_hash.is_none());
            assert!(row.intent_summary.is_none());
        }

        #[test]
        fn resume_point_keeps_fresh_summary() {
            // Null embed_hash with a summary is a mid-run checkpoint, not
            // staleness: the summary must survive so phase B skips the PR.
            let db = Arc::new(Database::open_in_memory().unwrap());
            let repo = db.create_repo("o", "r").unwrap();
            let id = seed(&db, repo, 1);
            db.set_pr_intent_summary(id, "fresh summary").unwrap();

            let processor = DetectProcessor::new(db.clone());
            let states = processor.partition(repo, &[1]).unwrap();
            assert!(states[0].changed, "still needs embedding");
            assert_eq!(
                states[0].pr.intent_summary.as_deref(),
                Some("fresh summary"),
                "summary kept for phase C"
            );
        }

        #[test]
        fn numbers_outside_scope_are_ignored() {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let repo = db.create_repo("o", "r").unwrap();
            seed(&db, repo, 1);
            seed(&db, repo, 2);

            let processor = DetectProcessor::new(db);
            let states = processor.partition(repo, &[2, 99]).unwrap();
            assert_eq!(states.len(), 1);
            assert_eq!(states[0].pr.number, 2);
        }
    }
}
