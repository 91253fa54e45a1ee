//! The two model-backed stages: Query Analyzer and Synthesizer.
//!
//! Each stage is a fixed instruction template plus a tolerant parser for
//! whatever the model sends back. Neither stage retries or enforces a
//! timeout; the pipeline controller owns both.

use std::sync::Arc;

use crate::error::{ClaimError, Result};
use crate::llm::LanguageModel;
use crate::models::{CoverageDecision, CoverageStatus, QueryEntities, Retrieval, SearchTerm};

// ============ Personas ============

const ANALYST_SYSTEM: &str = "You are an Insurance Query Analyst. \
You are an experienced insurance analyst who specializes in understanding customer queries. \
You have deep knowledge of medical terminology and insurance language. \
Your goal is to extract the core medical procedure or coverage question from a user query \
and turn it into a search phrase that will find the right policy clauses.";

const ADJUDICATOR_SYSTEM: &str = "You are an Insurance Coverage Adjudicator. \
You make fair, consistent coverage decisions based strictly on the policy terms you are given \
and always explain your reasoning. You consider waiting periods, exclusions, and policy age. \
Never invent policy terms that are not in the retrieved text.";

// ============ Query Analyzer ============

/// What to do when analysis fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisFallback {
    /// Surface the [`ClaimError::Analysis`].
    Fail,
    /// Search with the trimmed query itself and mark the term degraded.
    RawQuery,
}

impl AnalysisFallback {
    pub fn from_config(value: &str) -> Self {
        match value {
            "raw_query" => AnalysisFallback::RawQuery,
            _ => AnalysisFallback::Fail,
        }
    }

    /// Apply this policy to a failed analysis of `query`.
    pub fn recover(self, query: &str, err: ClaimError) -> Result<SearchTerm> {
        match self {
            AnalysisFallback::Fail => Err(err),
            AnalysisFallback::RawQuery => Ok(SearchTerm {
                text: query.trim().to_string(),
                entities: QueryEntities::default(),
                degraded: true,
            }),
        }
    }
}

/// Turns a free-form question into a concise search phrase.
pub struct QueryAnalyzer {
    llm: Arc<dyn LanguageModel>,
}

impl QueryAnalyzer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, query: &str) -> Result<SearchTerm> {
        let prompt = analysis_prompt(query);
        tracing::debug!(prompt_chars = prompt.len(), "query analysis prompt");

        let output = self
            .llm
            .complete(ANALYST_SYSTEM, &prompt)
            .await
            .map_err(|e| ClaimError::Analysis(format!("{:#}", e)))?;

        let (text, entities) = parse_analysis(&output).ok_or_else(|| {
            ClaimError::Analysis("model output contained no search phrase".to_string())
        })?;

        Ok(SearchTerm {
            text,
            entities,
            degraded: false,
        })
    }
}

fn analysis_prompt(query: &str) -> String {
    format!(
        "Analyze the user query: '{query}'\n\n\
         Extract the main medical procedure or coverage question and create an effective \
         search query. Consider synonyms and related terms that might appear in policy documents.\n\n\
         Respond with a single JSON object and nothing else:\n\
         {{\"search_query\": \"...\", \"age\": null, \"location\": null, \
         \"medical_procedure\": null, \"policy_age\": null, \"additional_context\": null}}\n\n\
         Example search queries: 'knee surgery coverage', 'cardiac procedure waiting period', \
         'dental treatment eligibility'."
    )
}

/// Pull a search phrase (and any entities) out of model output.
///
/// Accepts a JSON object (optionally fenced or surrounded by prose), or
/// falls back to the first non-empty line with labels and quotes removed.
pub fn parse_analysis(output: &str) -> Option<(String, QueryEntities)> {
    if let Some(obj) = embedded_json_object(output) {
        let entities = QueryEntities {
            age: json_field(&obj, "age"),
            location: json_field(&obj, "location"),
            medical_procedure: json_field(&obj, "medical_procedure"),
            policy_age: json_field(&obj, "policy_age"),
            additional_context: json_field(&obj, "additional_context"),
        };
        let text = json_field(&obj, "search_query").or_else(|| entities.medical_procedure.clone())?;
        return Some((text, entities));
    }

    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))?;
    // Unparseable JSON is not a search phrase.
    if line.starts_with('{') {
        return None;
    }
    let text = clean_phrase(strip_label(line));
    if text.is_empty() {
        None
    } else {
        Some((text, QueryEntities::default()))
    }
}

/// First `{` at which a complete JSON object parses. Anything after that
/// object is ignored.
fn embedded_json_object(output: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    output.match_indices('{').find_map(|(i, _)| {
        let mut values =
            serde_json::Deserializer::from_str(&output[i..]).into_iter::<serde_json::Value>();
        match values.next() {
            Some(Ok(serde_json::Value::Object(map))) => Some(map),
            _ => None,
        }
    })
}

fn json_field(obj: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<String> {
    let value = match obj.get(key)? {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn strip_label(line: &str) -> &str {
    const LABELS: &[&str] = &["search query:", "search term:", "refined query:", "query:"];
    for label in LABELS {
        if line
            .get(..label.len())
            .is_some_and(|p| p.eq_ignore_ascii_case(label))
        {
            return &line[label.len()..];
        }
    }
    line
}

fn clean_phrase(s: &str) -> String {
    s.trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`' || c == '*')
        .trim()
        .to_string()
}

// ============ Synthesizer ============

/// Produces the final coverage decision from the retrieved terms.
pub struct Synthesizer {
    llm: Arc<dyn LanguageModel>,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub async fn synthesize(
        &self,
        query: &str,
        term: &SearchTerm,
        retrieval: &Retrieval,
    ) -> Result<CoverageDecision> {
        let prompt = synthesis_prompt(query, term, retrieval);
        tracing::debug!(prompt_chars = prompt.len(), "synthesis prompt");

        let output = self
            .llm
            .complete(ADJUDICATOR_SYSTEM, &prompt)
            .await
            .map_err(|e| ClaimError::Synthesis(format!("{:#}", e)))?;

        parse_decision(&output)
    }
}

fn synthesis_prompt(query: &str, term: &SearchTerm, retrieval: &Retrieval) -> String {
    let entities = if term.entities.is_empty() {
        "- none extracted".to_string()
    } else {
        term.entities.to_prompt_lines()
    };

    format!(
        "Based on the user query: '{query}' and the retrieved policy information, \
         make a coverage determination.\n\n\
         Search term used: {search}\n\
         Details extracted from the query:\n{entities}\n\n\
         Retrieved policy information:\n{context}\n\n\
         Provide:\n\
         1. Clear decision (APPROVED/DENIED/CONDITIONAL)\n\
         2. Specific reasoning based on policy terms\n\
         3. Next steps for the user\n\
         4. Timeline information if applicable\n\n\
         Use exactly these labels:\n\
         Decision: <APPROVED|DENIED|CONDITIONAL>\n\
         Reasoning: ...\n\
         Next steps: ...\n\
         Timeline: ...",
        search = term.text,
        context = retrieval.render().trim_end(),
    )
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Reasoning,
    NextSteps,
    Timeline,
}

const SECTION_LABELS: &[(&str, Section)] = &[
    ("coverage decision", Section::Header),
    ("decision", Section::Header),
    ("status", Section::Header),
    ("reasoning", Section::Reasoning),
    ("next steps", Section::NextSteps),
    ("timeline", Section::Timeline),
];

/// Parse model output into a [`CoverageDecision`].
///
/// Fails only on empty output; missing sections and an absent status token
/// are tolerated.
pub fn parse_decision(output: &str) -> Result<CoverageDecision> {
    let text = output.trim();
    if text.is_empty() {
        return Err(ClaimError::Synthesis("model returned an empty decision".into()));
    }

    let mut reasoning = Vec::new();
    let mut next_steps = Vec::new();
    let mut timeline = Vec::new();
    let mut current = Section::Header;

    for line in text.lines() {
        if let Some((section, rest)) = section_label(line) {
            current = section;
            if !rest.is_empty() {
                push_line(current, rest, &mut reasoning, &mut next_steps, &mut timeline);
            }
            continue;
        }
        push_line(current, line, &mut reasoning, &mut next_steps, &mut timeline);
    }

    Ok(CoverageDecision {
        status: parse_status(text),
        text: text.to_string(),
        reasoning: join_section(reasoning),
        next_steps: join_section(next_steps),
        timeline: join_section(timeline),
    })
}

fn push_line<'a>(
    section: Section,
    line: &'a str,
    reasoning: &mut Vec<&'a str>,
    next_steps: &mut Vec<&'a str>,
    timeline: &mut Vec<&'a str>,
) {
    match section {
        Section::Header => {}
        Section::Reasoning => reasoning.push(line),
        Section::NextSteps => next_steps.push(line),
        Section::Timeline => timeline.push(line),
    }
}

fn join_section(lines: Vec<&str>) -> Option<String> {
    let joined = lines.join("\n");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Recognise `Reasoning:`, `**Next Steps**:`, `3. Timeline` and similar.
fn section_label(line: &str) -> Option<(Section, &str)> {
    let stripped = line.trim_start_matches(|c: char| {
        c.is_whitespace() || c.is_ascii_digit() || matches!(c, '#' | '*' | '-' | '.' | ')')
    });
    for (label, section) in SECTION_LABELS {
        let Some(prefix) = stripped.get(..label.len()) else {
            continue;
        };
        if !prefix.eq_ignore_ascii_case(label) {
            continue;
        }
        let rest = stripped[label.len()..].trim_start_matches(|c: char| c == '*' || c.is_whitespace());
        if rest.is_empty() {
            return Some((*section, ""));
        }
        if let Some(after) = rest.strip_prefix(':') {
            return Some((*section, after.trim().trim_start_matches('*').trim()));
        }
    }
    None
}

/// First whole-word APPROVED / DENIED / CONDITIONAL, case-insensitive.
pub fn parse_status(text: &str) -> CoverageStatus {
    text.split(|c: char| !c.is_alphanumeric())
        .find_map(|word| {
            if word.eq_ignore_ascii_case("approved") {
                Some(CoverageStatus::Approved)
            } else if word.eq_ignore_ascii_case("denied") {
                Some(CoverageStatus::Denied)
            } else if word.eq_ignore_ascii_case("conditional") {
                Some(CoverageStatus::Conditional)
            } else {
                None
            }
        })
        .unwrap_or(CoverageStatus::Unspecified)
}
