// Enrichment prompt templates for Phase 2.

pub const ENRICHMENT_SYSTEM: &str = "\
You are a B2B research analyst judging whether professional contacts match an \
ideal customer profile. Use web search to verify each person's current company, \
its industry, size and location. Be skeptical: if you cannot verify something, say so \
in the reasoning and keep the score near zero. \
Your final message MUST be valid JSON only — no markdown fences, no explanations.";

pub const ENRICHMENT_PROMPT_TEMPLATE: &str = r#"Evaluate the following contacts against the ideal customer profile.

IDEAL CUSTOMER PROFILE:
{criteria}

CONTACTS (JSON):
{records_json}

Each contact carries a deterministic_score from keyword rules; it placed them in a
borderline band. Your ai_score adjusts it: between {ai_min} and {ai_max}, positive when
the contact clearly fits the profile, negative when they clearly do not.

OUTPUT: a JSON array with exactly one object per contact, echoing its "id":
[
  {
    "id": "<contact id>",
    "ai_score": number,
    "reasoning": "one or two sentences",
    "geography": "country or region" | null,
    "industry": "company industry" | null,
    "company_size": "e.g. 1-10, 11-50, 51-200, 201-1000, 1000+" | null
  }
]
If you cannot evaluate a contact at all, return {"id": "<contact id>", "error": "why"} for it."#;
