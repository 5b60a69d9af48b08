// Classifier prompt for the standard qualifier.

pub const CLASSIFIER_PROMPT_TEMPLATE: &str = r#"Decide whether each contact below matches the ideal customer profile.

IDEAL CUSTOMER PROFILE:
{criteria}

CONTACTS (JSON array, in order):
{records_json}

Return a JSON array with exactly {count} objects, in the same order as the contacts:
[
  {
    "qualification": "qualified" | "not_qualified",
    "confidence": "high" | "medium" | "low",
    "reasoning": "one short sentence"
  }
]
Judge only from the name, company and title given. When unsure, answer
"not_qualified" with "low" confidence."#;
