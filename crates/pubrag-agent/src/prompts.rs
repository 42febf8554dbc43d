//! Prompt templates for the three generation calls of a turn.

/// Fixed answer when the supplied literature does not support a response.
pub const SENTINEL: &str =
    "I cannot find sufficient evidence in the parsed literature to answer this question.";

/// Whether a generated answer is (or opens with) the sentinel.
pub fn is_sentinel(text: &str) -> bool {
    let normalize = |s: &str| {
        s.chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    };
    let text = normalize(text);
    !text.is_empty() && text.starts_with(&normalize(SENTINEL))
}

pub const REFORMULATION_PROMPT: &str = "\
You rewrite conversational questions into standalone search queries for a biomedical literature search engine.

Rules:
1. Use the conversation so far to replace pronouns and ellipses in the newest input (\"it\", \"they\", \"these papers\", \"that drug\") with the explicit terms they refer to.
2. The result must make sense to someone who never saw the conversation.
3. Do not answer the question. Output only the rewritten query, with no preamble.
4. If the input is already self-contained, output it unchanged.
5. If the input points back at papers cited in an earlier answer, copy every relevant marker of the form [PMID: <id>] from that answer into the rewritten query. Never write an id that does not appear in the conversation.

Example:
Conversation: user \"Does bevacizumab help with nosebleeds in HHT?\" / assistant \"Yes, it reduces epistaxis severity [PMID: 123].\"
Input: \"What are its side effects?\"
Output: What are the side effects of bevacizumab in HHT patients?";

/// Final user message of a reformulation request.
pub fn reformulation_request(raw_query: &str) -> String {
    format!("Rewrite this input as a standalone query: {raw_query}")
}

/// System prompt for structured query parsing.
pub fn parser_prompt(subject: &str) -> String {
    format!(
        "\
You optimize questions for hybrid (BM25 + dense) retrieval over chunks of PubMed articles about {subject}.

Reply with a single JSON object and nothing else:
{{
  \"clarification_required\": null | \"<question naming the ambiguous term and its readings>\",
  \"optimized_query\": \"<retrieval query, at most 120 words>\",
  \"metadata_filters\": {{
    \"publication_year\": null | 2021 | \"2015-2020\",
    \"first_author_lastname\": null | \"<last name>\",
    \"publication_types\": null | [\"Randomized Controlled Trial\", ...],
    \"journal_name\": null | \"<journal title>\",
    \"mesh_major_terms\": null | [\"<MeSH heading>\", ...],
    \"is_human\": null | true | false,
    \"is_animal\": null | true | false
  }}
}}

Ambiguity: set clarification_required ONLY when a biomedical term is critically ambiguous (for example a gene symbol with several unrelated meanings) so that retrieval cannot proceed. Vague time words (\"recent\", \"latest\"), bare author surnames and informal phrasing are never a reason to ask.

Optimization: use precise clinical terminology, expand important abbreviations once (e.g. \"hereditary hemorrhagic telangiectasia (HHT)\"), use canonical gene symbols, add only high-value synonyms, drop conversational filler, and keep any [PMID: <id>] markers. Do not widen or narrow the question.

Filters: fill a field only when the question states it explicitly. Never guess a year from words like \"recent\". Set is_human or is_animal only when the question restricts the study population (\"in mice\", \"human studies\")."
    )
}

/// Final user message of a parse request.
pub fn parser_request(query: &str) -> String {
    format!("Query: {query}")
}

/// System prompt for answer synthesis, with the evidence block inlined.
pub fn synthesis_prompt(subject: &str, context: &str) -> String {
    format!(
        "\
You answer clinical and research questions about {subject} using ONLY the literature excerpts below.

Rules:
1. Ground every claim in the excerpts. Do not use outside knowledge.
2. Cite every factual sentence inline with the header of the excerpt that supports it: (Author, Year) [PMID: <id>], or [PMID: <id>] alone when author or year is missing.
3. Draw on several excerpts when they are relevant, not only the first.
4. If the excerpts do not answer the question, reply with exactly: {SENTINEL}
5. Be concise, clinical and objective. No filler.

EXCERPTS:
{context}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_detection() {
        assert!(is_sentinel(SENTINEL));
        assert!(is_sentinel(&format!("  {SENTINEL}  ")));
        assert!(is_sentinel(
            "I cannot find sufficient evidence in the parsed literature to answer this question"
        ));
        assert!(!is_sentinel("Bevacizumab reduces epistaxis [PMID: 1]."));
        assert!(!is_sentinel(""));
    }

    #[test]
    fn test_prompts_embed_inputs() {
        assert!(parser_prompt("HHT").contains("about HHT"));
        let p = synthesis_prompt("HHT", "[1] (Smith, 2022) [PMID: 1]");
        assert!(p.contains("[1] (Smith, 2022) [PMID: 1]"));
        assert!(p.contains(SENTINEL));
        assert!(reformulation_request("its risks?").ends_with("its risks?"));
    }
}
