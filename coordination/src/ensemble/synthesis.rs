//! Synthesis prompt construction and the deterministic local fallback used
//! when the synthesis model is unreachable.

use super::types::{EnsembleResponse, ModelResponse};

/// Answer returned when no model responded
pub const NO_RESPONSE_APOLOGY: &str = "I apologize, but I'm unable to analyze your question right now: none of the analysis models responded. Please try again in a moment.";

/// Methodology recorded when no model responded
pub const NO_RESPONSE_METHODOLOGY: &str = "No model responded; ensemble analysis unavailable";

/// Closing line appended to locally synthesized answers
pub const FALLBACK_DISCLAIMER: &str = "This summary was assembled from individual model outputs without AI synthesis and is not financial advice.";

/// Build the prompt asking the primary LLM to merge weighted model outputs.
///
/// `weights` must be parallel to `responses`; missing weights render as 0.
pub fn build_synthesis_prompt(query: &str, responses: &[ModelResponse], weights: &[f64]) -> String {
    let mut prompt = String::from(
        "You are the synthesis stage of a multi-model crypto market analysis ensemble.\n\
         Several specialized models analyzed the same user question. Combine their \
         outputs into one clear, well-structured answer. Give more weight to models \
         with higher weight, state where the models agree, and call out any \
         disagreement explicitly. Do not invent data that none of the models provided. \
         End with a one-sentence reminder that this is not financial advice.\n\n",
    );

    prompt.push_str("## Model outputs\n\n");
    for (idx, response) in responses.iter().enumerate() {
        let weight = weights.get(idx).copied().unwrap_or(0.0);
        let data = serde_json::to_string(&response.data).unwrap_or_else(|_| "{}".to_string());
        prompt.push_str(&format!(
            "### {} ({})\nconfidence: {:.2}\nweight: {:.3}\ndata: {}\n\n",
            response.source,
            response.source.analysis_type(),
            response.confidence,
            weight,
            data
        ));
    }

    prompt.push_str("## User question\n\n");
    prompt.push_str(query.trim());
    prompt.push_str("\n\n## Unified answer\n");
    prompt
}

/// Assemble an answer locally from the highest-confidence response.
///
/// Returns an empty string for empty input; callers handle the no-response
/// case with [`NO_RESPONSE_APOLOGY`] instead.
pub fn local_synthesis(responses: &[ModelResponse]) -> String {
    let Some(primary) = responses
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    else {
        return String::new();
    };

    let mut out = format!(
        "Primary analysis from {} ({}, {:.0}% confidence): {}",
        primary.source,
        primary.source.analysis_type(),
        primary.confidence * 100.0,
        primary.data.summary()
    );

    let supporting: Vec<&str> = responses
        .iter()
        .filter(|r| r.source != primary.source)
        .map(|r| r.source.analysis_type())
        .collect();
    if !supporting.is_empty() {
        out.push_str("\n\nSupporting insights: ");
        out.push_str(&supporting.join(", "));
        out.push('.');
    }

    out.push_str("\n\n");
    out.push_str(FALLBACK_DISCLAIMER);
    out
}

/// Methodology line describing which models and strategy produced `response`
pub fn describe_methodology(response: &EnsembleResponse) -> String {
    let models: Vec<&str> = response
        .model_contributions
        .iter()
        .map(|r| r.source.as_str())
        .collect();
    match response.strategy {
        Some(strategy) => format!(
            "Ensemble of {} model{} ({}) weighted by {} strategy",
            models.len(),
            if models.len() == 1 { "" } else { "s" },
            models.join(", "),
            strategy
        ),
        None => NO_RESPONSE_METHODOLOGY.to_string(),
    }
}
